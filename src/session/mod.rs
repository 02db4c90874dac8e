//! The session broker: the state machine that owns one application/browser
//! session end to end.
//!
//! One `tokio::task` per session ("the actor") owns every piece of mutable
//! session state — the application stream, the sandbox, the at-most-one
//! WebSocket, `gracefully_closed`. HTTP and WebSocket handlers never touch
//! that state directly; they post [`SessionCommand`]s over a channel and
//! await a reply. This is the async translation of the teacher's
//! reader-thread-plus-shared-writer idiom in `broker/mod.rs`: a dedicated
//! reader task feeds parsed units to the actor, and the actor is the only
//! task that ever writes to the application stream.

mod lock;

pub use lock::SessionLock;

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use axum::extract::ws::{Message as WsMessage, WebSocket};
use bytes::Bytes;
use futures_util::{SinkExt, StreamExt};
use log::{info, warn};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt, WriteHalf};
use tokio::sync::{mpsc, oneshot};

use crate::events::{EventSender, WindowEvent};
use crate::proto::limits::BUFFER_SIZE;
use crate::proto::{frame, AppToBroker, BrokerToApp, ResourceType};
use crate::sandbox::Sandbox;

/// A non-owning, cloneable reference to a running session, held by the
/// listener's session index and by HTTP handlers.
#[derive(Clone)]
pub struct SessionHandle {
    /// The session's opaque id.
    pub id: String,
    /// Shared read access to the sandbox for GET lookups, which don't need
    /// to go through the actor since they never mutate protocol state.
    pub sandbox: Arc<Sandbox>,
    cmd_tx: mpsc::Sender<SessionCommand>,
}

impl SessionHandle {
    /// Deliver a browser form submission to the session. Resolves once the
    /// framed `form` message and its body have been written to the
    /// application stream.
    pub async fn submit_form(&self, body: Bytes) -> Result<()> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.cmd_tx
            .send(SessionCommand::Submit {
                body,
                reply: reply_tx,
            })
            .await
            .context("session actor is gone")?;
        reply_rx.await.context("session actor dropped the reply")?
    }

    /// Attach a newly upgraded WebSocket to this session. Fails (and the
    /// caller should close the socket) if one is already attached.
    pub async fn attach_ws(&self, socket: WebSocket) -> Result<()> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.cmd_tx
            .send(SessionCommand::AttachWs {
                socket,
                reply: reply_tx,
            })
            .await
            .context("session actor is gone")?;
        reply_rx.await.context("session actor dropped the reply")?
    }

    /// Ask the session to close its window. Best-effort: if the actor is
    /// already gone this is a no-op.
    pub fn request_close(&self) {
        let _ = self.cmd_tx.try_send(SessionCommand::RequestClose);
    }
}

enum SessionCommand {
    Submit {
        body: Bytes,
        reply: oneshot::Sender<Result<()>>,
    },
    AttachWs {
        socket: WebSocket,
        reply: oneshot::Sender<Result<()>>,
    },
    RequestClose,
}

/// Upload-in-progress context, carried across `ReadingUploadChunk` /
/// `ReadingUploadStreamSize` transitions.
struct UploadCtx {
    url: String,
    file: tokio::fs::File,
    streamed: bool,
    rtype: ResourceType,
}

enum State {
    AwaitingControl,
    ReadingUploadChunk { upload: UploadCtx, remaining: u64 },
    ReadingUploadStreamSize { upload: UploadCtx },
    ReadingAppMsgBody { remaining: u64 },
}

enum ReadInstruction {
    Frame,
    Raw(usize),
}

enum ReaderEvent {
    Frame(Vec<u8>),
    Raw(Vec<u8>),
    Eof,
    Err(anyhow::Error),
}

enum WsEvent {
    Message(Vec<u8>),
    Closed,
}

/// Spawn a session actor driving `stream` (the application's byte stream).
/// Creates the sandbox directory and acquires the session lock before
/// returning; a held lock (duplicate session id) is a fatal admission
/// error, per the resolved "duplicate session id" design decision.
pub async fn spawn<S>(
    id: String,
    stream: S,
    session_dir: PathBuf,
    port: u16,
    events: EventSender,
    on_teardown: impl FnOnce(&str) + Send + 'static,
) -> Result<SessionHandle>
where
    S: AsyncRead + AsyncWrite + Send + Unpin + 'static,
{
    let sandbox = Arc::new(Sandbox::create(&session_dir).await?);

    let lock_path = session_dir.join("lockfile");
    let lock = SessionLock::try_acquire(&lock_path)
        .context("acquiring session lock")?
        .context("duplicate session id: lock already held")?;

    let (reader, writer) = tokio::io::split(stream);
    let (cmd_tx, cmd_rx) = mpsc::channel(8);
    let (instr_tx, instr_rx) = mpsc::channel(1);
    let (reader_tx, reader_rx) = mpsc::channel(1);

    tokio::spawn(run_reader(reader, instr_rx, reader_tx));

    let actor = Actor {
        id: id.clone(),
        sandbox: sandbox.clone(),
        writer,
        state: State::AwaitingControl,
        instr_tx,
        reader_rx,
        cmd_rx,
        ws_write: None,
        ws_in_rx: None,
        gracefully_closed: false,
        outstanding_read: false,
        port,
        events,
        on_teardown: Box::new(on_teardown),
        _lock: lock,
    };

    tokio::spawn(actor.run());

    Ok(SessionHandle {
        id,
        sandbox,
        cmd_tx,
    })
}

/// Reads from the application stream on instruction from the actor,
/// forwarding each completed read back in order. Mirrors the teacher's
/// per-session reader thread, adapted to `tokio::task` + channels.
async fn run_reader<R: AsyncRead + Unpin>(
    mut reader: R,
    mut instr_rx: mpsc::Receiver<ReadInstruction>,
    event_tx: mpsc::Sender<ReaderEvent>,
) {
    while let Some(instr) = instr_rx.recv().await {
        let event = match instr {
            ReadInstruction::Frame => match frame::read_frame(&mut reader).await {
                Ok(body) => ReaderEvent::Frame(body),
                Err(e) => classify_read_error(e),
            },
            ReadInstruction::Raw(n) => {
                let mut buf = vec![0u8; n];
                match reader.read_exact(&mut buf).await {
                    Ok(_) => ReaderEvent::Raw(buf),
                    Err(e) => classify_read_error(e.into()),
                }
            }
        };
        let is_eof = matches!(event, ReaderEvent::Eof);
        if event_tx.send(event).await.is_err() || is_eof {
            break;
        }
    }
}

fn classify_read_error(e: anyhow::Error) -> ReaderEvent {
    if let Some(io_err) = e.downcast_ref::<std::io::Error>() {
        if io_err.kind() == std::io::ErrorKind::UnexpectedEof {
            return ReaderEvent::Eof;
        }
    }
    ReaderEvent::Err(e)
}

struct Actor<S> {
    id: String,
    sandbox: Arc<Sandbox>,
    writer: WriteHalf<S>,
    state: State,
    instr_tx: mpsc::Sender<ReadInstruction>,
    reader_rx: mpsc::Receiver<ReaderEvent>,
    cmd_rx: mpsc::Receiver<SessionCommand>,
    ws_write: Option<futures_util::stream::SplitSink<WebSocket, WsMessage>>,
    ws_in_rx: Option<mpsc::Receiver<WsEvent>>,
    gracefully_closed: bool,
    /// Set when a read instruction has been sent to the reader task but its
    /// `ReaderEvent` hasn't come back yet. A `cmd_rx`/`ws_in_rx` wakeup must
    /// not enqueue another instruction while this is true — the reader's
    /// `instr_tx` channel has capacity 1, and a surplus instruction would be
    /// picked up after the in-flight read completes, desynchronizing the
    /// framed-vs-raw read pipeline.
    outstanding_read: bool,
    port: u16,
    events: EventSender,
    on_teardown: Box<dyn FnOnce(&str) + Send>,
    _lock: SessionLock,
}

// `on_teardown` is stored type-erased; satisfy the generic struct
// definition above by boxing it at construction.
impl<S> Actor<S>
where
    S: AsyncWrite + Unpin,
{
    async fn run(mut self) {
        let result = self.drive().await;
        if let Err(e) = result {
            warn!("session {} ended with error: {e:#}", self.id);
            self.send_error_best_effort(&e.to_string()).await;
        }
        self.teardown().await;
    }

    async fn drive(&mut self) -> Result<()> {
        loop {
            let instruction = match &self.state {
                State::AwaitingControl => ReadInstruction::Frame,
                State::ReadingUploadChunk { remaining, .. } => {
                    ReadInstruction::Raw((*remaining as usize).min(BUFFER_SIZE))
                }
                State::ReadingUploadStreamSize { .. } => ReadInstruction::Raw(2),
                State::ReadingAppMsgBody { remaining } => {
                    ReadInstruction::Raw((*remaining as usize).min(BUFFER_SIZE))
                }
            };
            if !self.outstanding_read {
                if self.instr_tx.send(instruction).await.is_err() {
                    return Ok(());
                }
                self.outstanding_read = true;
            }

            tokio::select! {
                biased;

                Some(cmd) = self.cmd_rx.recv() => {
                    if !self.handle_command(cmd).await? {
                        return Ok(());
                    }
                }

                ev = recv_ws(&mut self.ws_in_rx) => {
                    if let Some(ev) = ev {
                        self.handle_ws_event(ev).await?;
                    }
                }

                Some(ev) = self.reader_rx.recv() => {
                    if !self.handle_reader_event(ev).await? {
                        return Ok(());
                    }
                }
            }
        }
    }

    /// Returns `false` when the session should end.
    async fn handle_command(&mut self, cmd: SessionCommand) -> Result<bool> {
        match cmd {
            SessionCommand::Submit { body, reply } => {
                let result = self.write_form(body).await;
                let _ = reply.send(result);
            }
            SessionCommand::AttachWs { socket, reply } => {
                if self.ws_write.is_some() {
                    let _ = reply.send(Err(anyhow::anyhow!("a WebSocket is already attached")));
                    drop(socket);
                } else {
                    let (sink, mut stream) = socket.split();
                    let (ws_tx, ws_rx) = mpsc::channel(8);
                    tokio::spawn(async move {
                        while let Some(msg) = stream.next().await {
                            let event = match msg {
                                Ok(WsMessage::Binary(b)) => WsEvent::Message(b),
                                Ok(WsMessage::Text(t)) => WsEvent::Message(t.into_bytes()),
                                Ok(WsMessage::Close(_)) | Err(_) => WsEvent::Closed,
                                Ok(_) => continue,
                            };
                            let is_closed = matches!(event, WsEvent::Closed);
                            if ws_tx.send(event).await.is_err() || is_closed {
                                break;
                            }
                        }
                    });
                    self.ws_write = Some(sink);
                    self.ws_in_rx = Some(ws_rx);
                    let _ = reply.send(Ok(()));
                }
            }
            SessionCommand::RequestClose => {
                let _ = self.write_control(&BrokerToApp::CloseRequest).await;
            }
        }
        Ok(true)
    }

    async fn handle_ws_event(&mut self, ev: WsEvent) -> Result<()> {
        match ev {
            WsEvent::Message(bytes) => {
                self.write_control(&BrokerToApp::AppMsg {
                    size: bytes.len() as u64,
                })
                .await?;
                self.writer.write_all(&bytes).await?;
                self.writer.flush().await?;
            }
            WsEvent::Closed => {
                self.ws_write = None;
                self.ws_in_rx = None;
            }
        }
        Ok(())
    }

    /// Returns `false` when the session should end.
    async fn handle_reader_event(&mut self, ev: ReaderEvent) -> Result<bool> {
        self.outstanding_read = false;
        match ev {
            ReaderEvent::Eof => Ok(false),
            ReaderEvent::Err(e) => Err(e),
            ReaderEvent::Frame(body) => self.handle_control_frame(&body).await,
            ReaderEvent::Raw(bytes) => self.handle_raw_bytes(bytes).await,
        }
    }

    /// Returns `false` when the session should end (graceful `close`).
    async fn handle_control_frame(&mut self, body: &[u8]) -> Result<bool> {
        let msg = match AppToBroker::decode(body) {
            Ok(msg) => msg,
            Err(e) => {
                self.send_error_best_effort("Invalid output message").await;
                return Err(e);
            }
        };

        match msg {
            AppToBroker::Upload { url, size, rtype } => {
                let file = self.sandbox.open_upload_destination(&url, rtype).await?;
                let upload = UploadCtx {
                    url,
                    file,
                    streamed: size == 0,
                    rtype,
                };
                self.state = if size > 0 {
                    State::ReadingUploadChunk {
                        upload,
                        remaining: size,
                    }
                } else {
                    State::ReadingUploadStreamSize { upload }
                };
            }
            AppToBroker::Navigate { url } => {
                let full_url = format!("http://localhost:{}/{}{}", self.port, self.id, url);
                let _ = self.events.send(WindowEvent::OpenUrl {
                    session_id: self.id.clone(),
                    url: full_url,
                });
            }
            AppToBroker::AppMsg { size } => {
                self.state = State::ReadingAppMsgBody { remaining: size };
            }
            AppToBroker::MimeMap { map } => {
                for entry in map {
                    self.sandbox.set_mime(&entry.ext, &entry.mime).await;
                }
            }
            AppToBroker::Close => {
                self.gracefully_closed = true;
                let _ = self.events.send(WindowEvent::CloseWindow {
                    session_id: self.id.clone(),
                });
                return Ok(false);
            }
            AppToBroker::AcceptIoTransfer { token } => {
                let _ = self.events.send(WindowEvent::AcceptIoTransfer {
                    session_id: self.id.clone(),
                    token,
                });
            }
        }
        Ok(true)
    }

    async fn handle_raw_bytes(&mut self, bytes: Vec<u8>) -> Result<bool> {
        match std::mem::replace(&mut self.state, State::AwaitingControl) {
            State::ReadingUploadChunk {
                mut upload,
                remaining,
            } => {
                upload.file.write_all(&bytes).await?;
                let remaining = remaining - bytes.len() as u64;
                if remaining == 0 {
                    self.finish_upload_chunk(upload).await?;
                } else {
                    self.state = State::ReadingUploadChunk { upload, remaining };
                }
            }
            State::ReadingUploadStreamSize { upload } => {
                let chunk_size = u16::from_le_bytes([bytes[0], bytes[1]]) as u64;
                if chunk_size == 0 {
                    self.finish_upload(upload).await?;
                } else {
                    self.state = State::ReadingUploadChunk {
                        upload,
                        remaining: chunk_size,
                    };
                }
            }
            State::ReadingAppMsgBody { .. } => {
                if let Some(sink) = self.ws_write.as_mut() {
                    let _ = sink.send(WsMessage::Binary(bytes)).await;
                } else {
                    info!("session {}: app_msg with no WebSocket attached, dropped", self.id);
                }
            }
            State::AwaitingControl => unreachable!("raw bytes only arrive mid-upload/app_msg"),
        }
        Ok(true)
    }

    async fn finish_upload_chunk(&mut self, upload: UploadCtx) -> Result<()> {
        if upload.streamed {
            self.state = State::ReadingUploadStreamSize { upload };
        } else {
            self.finish_upload(upload).await?;
        }
        Ok(())
    }

    async fn finish_upload(&mut self, upload: UploadCtx) -> Result<()> {
        drop(upload.file);
        if upload.rtype == ResourceType::Archive {
            self.sandbox.expand_archive_at(&upload.url).await?;
        }
        self.state = State::AwaitingControl;
        Ok(())
    }

    async fn write_form(&mut self, body: Bytes) -> Result<()> {
        self.write_control(&BrokerToApp::Form {
            size: body.len() as u64,
            mime: "application/x-www-form-urlencoded".to_string(),
        })
        .await?;
        self.writer.write_all(&body).await?;
        self.writer.flush().await?;
        Ok(())
    }

    async fn write_control(&mut self, msg: &BrokerToApp) -> Result<()> {
        let body = msg.encode()?;
        frame::write_frame(&mut self.writer, &body).await
    }

    async fn send_error_best_effort(&mut self, message: &str) {
        let _ = self
            .write_control(&BrokerToApp::Error {
                message: message.to_string(),
            })
            .await;
    }

    async fn teardown(mut self) {
        self.ws_write = None;
        self.ws_in_rx = None;
        (self.on_teardown)(&self.id);
        if !self.gracefully_closed {
            let _ = self.events.send(WindowEvent::ShowError {
                session_id: self.id.clone(),
                message: "session ended unexpectedly".to_string(),
            });
        }
        if let Err(e) = tokio::fs::remove_dir_all(self.sandbox.root()).await {
            warn!("session {}: failed to remove sandbox directory: {e}", self.id);
        }
        info!("session {} torn down", self.id);
    }
}

async fn recv_ws(rx: &mut Option<mpsc::Receiver<WsEvent>>) -> Option<WsEvent> {
    match rx {
        Some(r) => r.recv().await,
        None => std::future::pending().await,
    }
}
