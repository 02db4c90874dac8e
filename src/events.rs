//! Events the broker emits toward the (external, out of scope) windowing
//! layer, and the "close requested" signal it consumes back.
//!
//! The original broker notifies the windowing layer through a function
//! pointer plus an opaque context pointer. Per spec.md §9's design note,
//! this is replaced with a strongly-typed enum sent on an unbounded
//! `tokio::sync::mpsc` channel: the emitter never blocks on the consumer,
//! and ordering within one session is preserved because the channel is
//! per-broker and the broker is the only writer into it.

use tokio::sync::mpsc;

/// A single notification from a session broker to the windowing layer.
#[derive(Debug, Clone)]
pub enum WindowEvent {
    /// Navigate the browser window for `session_id` to `url`.
    OpenUrl {
        /// Session the event originates from.
        session_id: String,
        /// Fully qualified URL (`http://localhost:<port>/<sid><path>`).
        url: String,
    },
    /// The application asked to close its window gracefully.
    CloseWindow {
        /// Session the event originates from.
        session_id: String,
    },
    /// A fatal session error the user should see.
    ShowError {
        /// Session the event originates from.
        session_id: String,
        /// Human-readable diagnostic.
        message: String,
    },
    /// The application accepted an I/O transfer token; forward it
    /// verbatim to the windowing layer.
    AcceptIoTransfer {
        /// Session the event originates from.
        session_id: String,
        /// Opaque token, meaningful only to the windowing layer.
        token: String,
    },
}

/// Sending half of the event channel, cloned into every session.
pub type EventSender = mpsc::UnboundedSender<WindowEvent>;

/// Receiving half, held by whatever drives the windowing layer.
pub type EventReceiver = mpsc::UnboundedReceiver<WindowEvent>;

/// Create a fresh event channel. One pair is owned by the
/// [`crate::coordinator::Coordinator`] for its whole lifetime; every
/// session gets a clone of the sender.
pub fn channel() -> (EventSender, EventReceiver) {
    mpsc::unbounded_channel()
}
