//! Splits an HTTP request target into `(session_id, normalized_path)`.
//!
//! Ported byte-for-byte from the original broker's `parse_target.cpp`
//! algorithm: a single left-to-right pass that extracts the leading path
//! segment as the session id, then normalizes the remainder in place,
//! collapsing `.`/`..`, honoring a root-resetting `~`, and rejecting the
//! reserved characters `@`, `%`, `+` and hidden (dot-prefixed) segments.

use anyhow::{bail, Result};

use crate::proto::limits::{MAX_SESSION_ID, MAX_URL};

/// Parse `target` (an HTTP request path) into a session id and a
/// normalized path, using the shared wire limits as capacity bounds.
pub fn parse_target(target: &str) -> Result<(String, String)> {
    parse_target_with_caps(target, MAX_SESSION_ID, MAX_URL)
}

/// Same as [`parse_target`] but with explicit capacity bounds, matching the
/// original's caller-provided buffer sizes. Exposed for boundary tests.
pub fn parse_target_with_caps(
    target: &str,
    session_id_cap: usize,
    norm_path_cap: usize,
) -> Result<(String, String)> {
    if session_id_cap < 1 || norm_path_cap < 1 {
        bail!("zero-capacity buffer");
    }

    let t = target.as_bytes();
    let n = t.len();

    // Session id: the first nonempty run of non-'/' characters.
    let mut session_id = Vec::new();
    let mut i = 0usize;
    while i < n {
        if t[i] == b'/' {
            if !session_id.is_empty() {
                break;
            }
        } else {
            if session_id.len() >= session_id_cap {
                bail!("session id exceeds capacity of {session_id_cap}");
            }
            session_id.push(t[i]);
        }
        i += 1;
    }

    if session_id.is_empty() {
        bail!("no session id in target {target:?}");
    }

    // Normalize the remainder.
    let mut path: Vec<u8> = Vec::new();
    while i < n {
        match t[i] {
            b'@' | b'%' | b'+' => bail!("reserved character {:?} in target", t[i] as char),
            _ => {}
        }

        if t[i] == b'~' {
            if i > 0 && t[i - 1] == b'/' {
                path.clear();
                path.push(b'/');
            } else {
                bail!("'~' must immediately follow '/'");
            }
            if i + 1 < n && t[i + 1] != b'/' {
                bail!("'~' must be followed by '/' or end of path");
            }
            i += 1;
            continue;
        }

        if t[i] == b'.' && i > 0 && t[i - 1] == b'/' {
            let (next_i, dot_len, only_dots) = parse_dot_run(t, n, i);
            if !only_dots {
                bail!("hidden path components are not served");
            }
            match dot_len {
                1 => {
                    i = next_i;
                    continue;
                }
                2 => {
                    let current_dir = rfind(&path, path.len().wrapping_sub(1), b'/');
                    if let Some(current_dir) = current_dir {
                        let parent_dir = if current_dir == 0 {
                            None
                        } else {
                            rfind(&path, current_dir - 1, b'/')
                        };
                        if let Some(parent_dir) = parent_dir {
                            path.truncate(parent_dir + 1);
                        }
                    }
                    i = next_i;
                    continue;
                }
                _ => bail!("malformed dot component in target"),
            }
        }

        if path.len() >= norm_path_cap - 1 {
            bail!("normalized path exceeds capacity of {norm_path_cap}");
        }

        let collapses_slash = t[i] == b'/' && !path.is_empty() && *path.last().unwrap() == b'/';
        if !collapses_slash {
            path.push(t[i]);
        }

        i += 1;
    }

    if path.is_empty() {
        path.push(b'/');
    }

    if *path.last().unwrap() == b'/' {
        let suffix = b"index.html";
        if path.len() + suffix.len() > norm_path_cap - 1 {
            bail!("normalized path exceeds capacity of {norm_path_cap} after index.html append");
        }
        path.extend_from_slice(suffix);
    }

    let session_id = String::from_utf8(session_id)?;
    let path = String::from_utf8(path)?;
    Ok((session_id, path))
}

/// Scan a run of characters up to the next `/` (or end), starting at
/// `offset`. Returns `(end_index, run_length, all_chars_were_dots)`.
fn parse_dot_run(target: &[u8], n: usize, offset: usize) -> (usize, usize, bool) {
    let mut dot_len = 0;
    let mut only_dots = true;
    let mut i = offset;
    while i < n && target[i] != b'/' {
        if target[i] == b'.' {
            dot_len += 1;
        } else {
            only_dots = false;
        }
        i += 1;
    }
    (i, dot_len, only_dots)
}

/// Search `haystack` backward from `offset` (inclusive) for `needle`.
fn rfind(haystack: &[u8], offset: usize, needle: u8) -> Option<usize> {
    if haystack.is_empty() {
        return None;
    }
    let mut i = offset.min(haystack.len() - 1) as isize;
    while i >= 0 {
        if haystack[i as usize] == needle {
            return Some(i as usize);
        }
        i -= 1;
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn simple_path() {
        let (sid, path) = parse_target("/sid/hello.html").unwrap();
        assert_eq!(sid, "sid");
        assert_eq!(path, "/hello.html");
    }

    #[test]
    fn dot_dot_pops_a_component() {
        let (sid, path) = parse_target("/sid/foo/../bar.txt").unwrap();
        assert_eq!(sid, "sid");
        assert_eq!(path, "/bar.txt");
    }

    #[test]
    fn single_dot_is_dropped() {
        let (sid, path) = parse_target("/sid/./bar.txt").unwrap();
        assert_eq!(sid, "sid");
        assert_eq!(path, "/bar.txt");
    }

    #[test]
    fn hidden_file_rejected() {
        assert!(parse_target("/sid/.foo").is_err());
    }

    #[test]
    fn tilde_resets_to_root() {
        let (sid, path) = parse_target("/sid/foo/bar/~/baz.txt").unwrap();
        assert_eq!(sid, "sid");
        assert_eq!(path, "/baz.txt");
    }

    #[test]
    fn tilde_not_preceded_by_slash_rejected() {
        assert!(parse_target("/sidfoo~/bar.txt").is_err());
    }

    #[test]
    fn reserved_characters_rejected() {
        assert!(parse_target("/sid/a@b").is_err());
        assert!(parse_target("/sid/a%20b").is_err());
        assert!(parse_target("/sid/a+b").is_err());
    }

    #[test]
    fn trailing_slash_appends_index() {
        let (sid, path) = parse_target("/sid/dir/").unwrap();
        assert_eq!(sid, "sid");
        assert_eq!(path, "/dir/index.html");
    }

    #[test]
    fn empty_path_is_root_index() {
        let (sid, path) = parse_target("/sid").unwrap();
        assert_eq!(sid, "sid");
        assert_eq!(path, "/index.html");
    }

    #[test]
    fn repeated_slashes_collapse() {
        let (sid, path) = parse_target("/sid//foo///bar.txt").unwrap();
        assert_eq!(sid, "sid");
        assert_eq!(path, "/foo/bar.txt");
    }

    #[test]
    fn url_at_capacity_boundary() {
        // capacity 512: a path filling exactly to the cap (511 body bytes
        // plus the leading '/') must be accepted; one byte more rejects.
        let body = "a".repeat(510);
        let target = format!("/sid/{body}");
        let (_, path) = parse_target(&target).unwrap();
        assert_eq!(path.len(), 511);

        let too_long = format!("/sid/{}", "a".repeat(511));
        assert!(parse_target(&too_long).is_err());
    }

    #[test]
    fn no_session_id_rejected() {
        assert!(parse_target("/").is_err());
        assert!(parse_target("").is_err());
    }
}
