//! `browser-broker`: a local, loopback-only broker that lets a non-GUI
//! application drive a browser window as its user interface.
//!
//! See `SPEC_FULL.md` for the full component breakdown. The seven pieces
//! named there map directly onto these modules:
//!
//! - [`proto`] — frame codec, wire limits, control-message schema.
//! - [`url_target`] — HTTP target parser.
//! - [`sandbox`] — per-session resource sandbox.
//! - [`listener`] — HTTP/WebSocket listener.
//! - [`session`] — the session broker state machine.
//! - [`coordinator`] — session admission, sandbox-root lifecycle.
//! - [`events`] — windowing events emitted to the (external) window layer.

pub mod coordinator;
pub mod events;
pub mod listener;
pub mod proto;
pub mod sandbox;
pub mod session;
pub mod url_target;
