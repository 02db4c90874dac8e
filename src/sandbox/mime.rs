//! Built-in extension → MIME type table.
//!
//! Ported verbatim from the original broker's `mime_type.cpp` lookup table.
//! Extensions are matched case-insensitively and without a leading `.`.

/// Look up the MIME type for a lowercase, dot-stripped extension. Falls
/// back to `text/plain` for anything not in the table, matching the
/// original's default.
pub fn builtin_mime(ext: &str) -> &'static str {
    match ext {
        // text
        "htm" | "html" => "text/html",
        "css" => "text/css",
        "txt" => "text/plain",
        "js" | "mjs" => "text/javascript",
        "json" => "application/json",
        "xml" => "application/xml",

        // image
        "png" => "image/png",
        "jpe" | "jpeg" | "jpg" | "jif" | "jfif" | "jfi" => "image/jpeg",
        "gif" => "image/gif",
        "bmp" | "dib" => "image/bmp",
        "ico" => "image/vnd.microsoft.icon",
        "tiff" | "tif" => "image/tiff",
        "svg" | "svgz" => "image/svg+xml",
        "webp" => "image/webp",
        "avif" => "image/avif",

        // font
        "otf" => "font/otf",
        "ttf" => "font/ttf",
        "woff" => "font/woff",
        "woff2" => "font/woff2",
        "eot" => "application/vnd.ms-fontobject",

        // audio
        "mp3" => "audio/mpeg",
        "wav" => "audio/wav",
        "weba" => "audio/webm",
        "mid" | "midi" => "audio/midi",
        "oga" => "audio/ogg",
        "opus" => "audio/opus",

        // video
        "mp4" => "video/mp4",
        "mpeg" => "video/mpeg",
        "webm" => "video/webm",
        "avi" => "video/x-msvideo",

        _ => "text/plain",
    }
}
