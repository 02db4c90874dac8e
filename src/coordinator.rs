//! Server coordinator: owns the sandbox root, the session index, and
//! admission of new application streams.
//!
//! Grounded on `original_source/server/src/server.cpp`'s
//! `html_forms_server_` struct: a startup sweep over the session root
//! (here run once before `serve` starts accepting HTTP) deletes every
//! subdirectory whose lock can still be acquired, and `start_session`'s
//! role is played by [`Coordinator::admit`].

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use dashmap::DashMap;
use log::{info, warn};
use tokio::io::{AsyncRead, AsyncWrite};

use crate::events::{EventReceiver, EventSender};
use crate::listener::SessionIndex;
use crate::session::{self, SessionHandle, SessionLock};

/// Owns the sandbox root directory, the active session map, and the
/// windowing event channel.
pub struct Coordinator {
    sessions_root: PathBuf,
    port: u16,
    sessions: SessionIndex,
    events: EventSender,
}

impl Coordinator {
    /// Create a coordinator rooted at `sessions_root`, which is created if
    /// missing. Returns the coordinator plus the receiving half of the
    /// windowing event channel for the caller to drive.
    pub async fn new(sessions_root: PathBuf, port: u16) -> Result<(Self, EventReceiver)> {
        tokio::fs::create_dir_all(&sessions_root)
            .await
            .with_context(|| format!("creating sessions root {}", sessions_root.display()))?;
        let (events, rx) = crate::events::channel();
        let coordinator = Self {
            sessions_root,
            port,
            sessions: Arc::new(DashMap::new()),
            events,
        };
        Ok((coordinator, rx))
    }

    /// The shared session index, handed to the HTTP listener's router.
    pub fn sessions(&self) -> SessionIndex {
        self.sessions.clone()
    }

    /// Walk the sandbox root and delete every subdirectory whose
    /// cross-process lock can still be acquired — an orphaned directory
    /// left behind by a prior broker process that didn't exit cleanly. A
    /// directory whose lock is already held belongs to a live session
    /// (possibly from a different coexisting broker process) and is left
    /// alone.
    pub async fn sweep_stale_sessions(&self) -> Result<()> {
        let mut entries = tokio::fs::read_dir(&self.sessions_root)
            .await
            .with_context(|| format!("reading {}", self.sessions_root.display()))?;

        while let Some(entry) = entries.next_entry().await? {
            if !entry.file_type().await.map(|t| t.is_dir()).unwrap_or(false) {
                continue;
            }
            let dir = entry.path();
            let lock_path = dir.join("lockfile");
            let acquirable =
                tokio::task::spawn_blocking(move || SessionLock::try_acquire(&lock_path))
                    .await
                    .context("lock-check task panicked")??;

            match acquirable {
                Some(lock) => {
                    drop(lock);
                    info!("removing stale session directory {}", dir.display());
                    if let Err(e) = tokio::fs::remove_dir_all(&dir).await {
                        warn!("failed to remove stale session directory {}: {e}", dir.display());
                    }
                }
                None => {
                    info!("session directory {} is still locked, leaving it", dir.display());
                }
            }
        }
        Ok(())
    }

    /// Admit a new application stream under session id `id`, starting its
    /// broker actor. Fails if `id` is already active in this process or if
    /// the session's cross-process lock is already held — the resolved
    /// "duplicate session id" behavior (admission fails outright).
    pub async fn admit<S>(&self, id: String, stream: S) -> Result<SessionHandle>
    where
        S: AsyncRead + AsyncWrite + Send + Unpin + 'static,
    {
        if self.sessions.contains_key(&id) {
            bail!("duplicate session id {id:?}: already active");
        }

        let session_dir = self.sessions_root.join(&id);
        let sessions = self.sessions.clone();
        let handle = session::spawn(
            id.clone(),
            stream,
            session_dir,
            self.port,
            self.events.clone(),
            move |sid| {
                sessions.remove(sid);
            },
        )
        .await?;

        self.sessions.insert(id, handle.clone());
        Ok(handle)
    }

    /// Route an externally signaled "window close requested" to the named
    /// session's `request_close`. A no-op if the session isn't active.
    pub fn request_close(&self, id: &str) {
        if let Some(handle) = self.sessions.get(id) {
            handle.request_close();
        }
    }
}
