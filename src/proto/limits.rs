//! Wire protocol size constants.
//!
//! Mirrors `HTML_MSG_SIZE`/`HTML_URL_SIZE`/`HTML_MIME_SIZE`/`HTML_FORM_SIZE`
//! from the original `com.gulachek.html-forms` client headers.

/// Shared control-message buffer size. Also the cap on a single `app_msg`
/// body transferred without chunking.
pub const BUFFER_SIZE: usize = 2048;

/// Maximum URL length accepted on the wire.
pub const MAX_URL: usize = 512;

/// Maximum MIME type string length accepted on the wire.
pub const MAX_MIME: usize = 256;

/// Maximum `application/x-www-form-urlencoded` POST body size.
pub const MAX_FORM_BODY: usize = 4096;

/// Maximum session ID string length (UUID-shaped, including NUL in the
/// original C API; the Rust API just caps the string length).
pub const MAX_SESSION_ID: usize = 36;

/// Maximum I/O transfer token length.
pub const MAX_TOKEN: usize = 37;
