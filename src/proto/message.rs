//! Control-message schema: the typed tagged union carried inside each
//! [`crate::proto::frame`] body, and its textual (JSON) wire form.
//!
//! Two directions, matching `spec.md` §3/§4.2:
//!
//! - [`AppToBroker`] — messages the application sends (`upload`, `navigate`,
//!   `app_msg`, `mime_map`, `close`, `accept_io_transfer`).
//! - [`BrokerToApp`] — messages the broker sends (`form`, `app_msg`,
//!   `close_request`, `error`).
//!
//! The wire object carries a required integer `type` discriminator plus
//! named payload fields, so the schema is hand-encoded onto a flat `Wire`
//! struct rather than derived from `#[serde(tag = "type")]` (which would tag
//! variants by name, not by number).

use anyhow::{anyhow, bail, Result};
use serde::{Deserialize, Serialize};

use super::limits::{BUFFER_SIZE, MAX_FORM_BODY, MAX_MIME, MAX_URL};

/// Resource type declared on an `upload` message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ResourceType {
    /// A regular file to be served as-is.
    File,
    /// An archive whose regular-file entries are expanded into the sandbox.
    Archive,
}

/// A single `(extension, mime_type)` pair from a `mime_map` message.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MimeMapEntry {
    /// File extension, with or without a leading `.` (stripped on accept).
    pub ext: String,
    /// MIME type to associate with that extension.
    pub mime: String,
}

/// Messages the application sends to the broker.
#[derive(Debug, Clone)]
pub enum AppToBroker {
    /// Upload a resource at `url`. `size == 0` means a streamed upload
    /// (16-bit length-prefixed chunks, terminated by a zero-length chunk).
    Upload {
        /// Destination URL within the session.
        url: String,
        /// Declared body size, or 0 for a streamed upload.
        size: u64,
        /// Whether the body is a single file or an archive to expand.
        rtype: ResourceType,
    },
    /// Navigate the browser window to `url` within the session.
    Navigate {
        /// Relative URL within the session.
        url: String,
    },
    /// Send an application-defined message to the browser over the
    /// attached WebSocket. `size` bytes follow as a raw body.
    AppMsg {
        /// Size in bytes of the raw body that follows.
        size: u64,
    },
    /// Install MIME overrides, in order.
    MimeMap {
        /// Extension → MIME type pairs.
        map: Vec<MimeMapEntry>,
    },
    /// Close the session gracefully.
    Close,
    /// Accept an I/O transfer token from the windowing layer.
    AcceptIoTransfer {
        /// Opaque token forwarded verbatim to the windowing layer.
        token: String,
    },
}

/// Messages the broker sends to the application.
#[derive(Debug, Clone)]
pub enum BrokerToApp {
    /// A browser form submission. `size` bytes of
    /// `application/x-www-form-urlencoded` body follow.
    Form {
        /// Size in bytes of the raw body that follows.
        size: u64,
        /// Content-Type of the submission (always
        /// `application/x-www-form-urlencoded` today).
        mime: String,
    },
    /// A message forwarded from the browser's WebSocket. `size` bytes
    /// follow as a raw body.
    AppMsg {
        /// Size in bytes of the raw body that follows.
        size: u64,
    },
    /// The windowing layer asked the user's window to close.
    CloseRequest,
    /// A fatal protocol or resource error; the stream is closed immediately
    /// after this message (if still writable).
    Error {
        /// Human-readable diagnostic.
        message: String,
    },
}

// ─── Wire encoding ──────────────────────────────────────────────────────────

/// Flat on-the-wire representation: a JSON object with an integer `type`
/// plus whichever named fields that type uses.
#[derive(Debug, Serialize, Deserialize)]
struct Wire {
    #[serde(rename = "type")]
    ty: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    size: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    mime: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none", rename = "resType")]
    res_type: Option<ResourceType>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    msg: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    token: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    map: Option<Vec<MimeMapEntry>>,
}

impl Wire {
    fn bare(ty: u32) -> Self {
        Self {
            ty,
            url: None,
            size: None,
            mime: None,
            res_type: None,
            msg: None,
            token: None,
            map: None,
        }
    }
}

mod app_to_broker_type {
    pub const UPLOAD: u32 = 0;
    pub const NAVIGATE: u32 = 1;
    pub const APP_MSG: u32 = 2;
    pub const MIME_MAP: u32 = 3;
    pub const CLOSE: u32 = 4;
    pub const ACCEPT_IO_TRANSFER: u32 = 5;
}

mod broker_to_app_type {
    pub const FORM: u32 = 0;
    pub const APP_MSG: u32 = 1;
    pub const CLOSE_REQUEST: u32 = 2;
    pub const ERROR: u32 = 3;
}

fn check_len(name: &str, len: usize, max: usize) -> Result<()> {
    if len > max {
        bail!("{name} of {len} bytes exceeds limit of {max}");
    }
    Ok(())
}

impl AppToBroker {
    /// Encode to the JSON wire object. Fails if a field exceeds its wire
    /// bound — an encoder-side (caller) error, never a peer condition.
    pub fn encode(&self) -> Result<Vec<u8>> {
        let wire = match self {
            AppToBroker::Upload { url, size, rtype } => {
                check_len("url", url.len(), MAX_URL)?;
                let mut w = Wire::bare(app_to_broker_type::UPLOAD);
                w.url = Some(url.clone());
                w.size = Some(*size);
                w.res_type = Some(*rtype);
                w
            }
            AppToBroker::Navigate { url } => {
                check_len("url", url.len(), MAX_URL)?;
                let mut w = Wire::bare(app_to_broker_type::NAVIGATE);
                w.url = Some(url.clone());
                w
            }
            AppToBroker::AppMsg { size } => {
                check_len("app_msg body", *size as usize, BUFFER_SIZE)?;
                let mut w = Wire::bare(app_to_broker_type::APP_MSG);
                w.size = Some(*size);
                w
            }
            AppToBroker::MimeMap { map } => {
                let mut w = Wire::bare(app_to_broker_type::MIME_MAP);
                w.map = Some(map.clone());
                w
            }
            AppToBroker::Close => Wire::bare(app_to_broker_type::CLOSE),
            AppToBroker::AcceptIoTransfer { token } => {
                let mut w = Wire::bare(app_to_broker_type::ACCEPT_IO_TRANSFER);
                w.token = Some(token.clone());
                w
            }
        };
        Ok(serde_json::to_vec(&wire)?)
    }

    /// Decode from the JSON wire object, validating field bounds.
    pub fn decode(bytes: &[u8]) -> Result<Self> {
        let w: Wire = serde_json::from_slice(bytes)?;
        Ok(match w.ty {
            app_to_broker_type::UPLOAD => {
                let url = w.url.ok_or_else(|| anyhow!("upload: missing url"))?;
                check_len("url", url.len(), MAX_URL)?;
                AppToBroker::Upload {
                    url,
                    size: w.size.ok_or_else(|| anyhow!("upload: missing size"))?,
                    rtype: w.res_type.ok_or_else(|| anyhow!("upload: missing resType"))?,
                }
            }
            app_to_broker_type::NAVIGATE => {
                let url = w.url.ok_or_else(|| anyhow!("navigate: missing url"))?;
                check_len("url", url.len(), MAX_URL)?;
                AppToBroker::Navigate { url }
            }
            app_to_broker_type::APP_MSG => {
                let size = w.size.ok_or_else(|| anyhow!("app_msg: missing size"))?;
                check_len("app_msg body", size as usize, BUFFER_SIZE)?;
                AppToBroker::AppMsg { size }
            }
            app_to_broker_type::MIME_MAP => AppToBroker::MimeMap {
                map: w.map.ok_or_else(|| anyhow!("mime_map: missing map"))?,
            },
            app_to_broker_type::CLOSE => AppToBroker::Close,
            app_to_broker_type::ACCEPT_IO_TRANSFER => AppToBroker::AcceptIoTransfer {
                token: w
                    .token
                    .ok_or_else(|| anyhow!("accept_io_transfer: missing token"))?,
            },
            other => bail!("unknown output message type: {other}"),
        })
    }
}

impl BrokerToApp {
    /// Encode to the JSON wire object.
    pub fn encode(&self) -> Result<Vec<u8>> {
        let wire = match self {
            BrokerToApp::Form { size, mime } => {
                check_len("form body", *size as usize, MAX_FORM_BODY)?;
                check_len("mime", mime.len(), MAX_MIME)?;
                let mut w = Wire::bare(broker_to_app_type::FORM);
                w.size = Some(*size);
                w.mime = Some(mime.clone());
                w
            }
            BrokerToApp::AppMsg { size } => {
                check_len("app_msg body", *size as usize, BUFFER_SIZE)?;
                let mut w = Wire::bare(broker_to_app_type::APP_MSG);
                w.size = Some(*size);
                w
            }
            BrokerToApp::CloseRequest => Wire::bare(broker_to_app_type::CLOSE_REQUEST),
            BrokerToApp::Error { message } => {
                let mut w = Wire::bare(broker_to_app_type::ERROR);
                w.msg = Some(message.clone());
                w
            }
        };
        Ok(serde_json::to_vec(&wire)?)
    }

    /// Decode from the JSON wire object.
    pub fn decode(bytes: &[u8]) -> Result<Self> {
        let w: Wire = serde_json::from_slice(bytes)?;
        Ok(match w.ty {
            broker_to_app_type::FORM => BrokerToApp::Form {
                size: w.size.ok_or_else(|| anyhow!("form: missing size"))?,
                mime: w.mime.ok_or_else(|| anyhow!("form: missing mime"))?,
            },
            broker_to_app_type::APP_MSG => BrokerToApp::AppMsg {
                size: w.size.ok_or_else(|| anyhow!("app_msg: missing size"))?,
            },
            broker_to_app_type::CLOSE_REQUEST => BrokerToApp::CloseRequest,
            broker_to_app_type::ERROR => BrokerToApp::Error {
                message: w.msg.ok_or_else(|| anyhow!("error: missing msg"))?,
            },
            other => bail!("unknown input message type: {other}"),
        })
    }
}

/// Normalize a `mime_map` extension: strip a single leading `.` and
/// lowercase it, matching the sandbox's case-insensitive lookup.
pub fn normalize_ext(ext: &str) -> String {
    ext.strip_prefix('.').unwrap_or(ext).to_ascii_lowercase()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn upload_round_trip() {
        let msg = AppToBroker::Upload {
            url: "/hello.html".into(),
            size: 5,
            rtype: ResourceType::File,
        };
        let bytes = msg.encode().unwrap();
        match AppToBroker::decode(&bytes).unwrap() {
            AppToBroker::Upload { url, size, rtype } => {
                assert_eq!(url, "/hello.html");
                assert_eq!(size, 5);
                assert_eq!(rtype, ResourceType::File);
            }
            other => panic!("unexpected variant: {other:?}"),
        }
    }

    #[test]
    fn oversize_url_rejected_on_encode() {
        let msg = AppToBroker::Navigate {
            url: "a".repeat(MAX_URL + 1),
        };
        assert!(msg.encode().is_err());
    }

    #[test]
    fn unknown_type_rejected_on_decode() {
        let bytes = serde_json::to_vec(&serde_json::json!({"type": 99})).unwrap();
        assert!(AppToBroker::decode(&bytes).is_err());
    }

    #[test]
    fn mime_map_round_trip() {
        let msg = AppToBroker::MimeMap {
            map: vec![MimeMapEntry {
                ext: ".css".into(),
                mime: "text/html".into(),
            }],
        };
        let bytes = msg.encode().unwrap();
        match AppToBroker::decode(&bytes).unwrap() {
            AppToBroker::MimeMap { map } => {
                assert_eq!(map.len(), 1);
                assert_eq!(normalize_ext(&map[0].ext), "css");
            }
            other => panic!("unexpected variant: {other:?}"),
        }
    }

    #[test]
    fn form_round_trip() {
        let msg = BrokerToApp::Form {
            size: 42,
            mime: "application/x-www-form-urlencoded".into(),
        };
        let bytes = msg.encode().unwrap();
        match BrokerToApp::decode(&bytes).unwrap() {
            BrokerToApp::Form { size, mime } => {
                assert_eq!(size, 42);
                assert_eq!(mime, "application/x-www-form-urlencoded");
            }
            other => panic!("unexpected variant: {other:?}"),
        }
    }
}
