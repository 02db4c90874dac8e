//! Cross-process advisory lock on a session's sandbox directory.
//!
//! `original_source/server/include/html_forms_server/private/session_lock.hpp`
//! describes the interface (`open`, `try_lock`, `unlock`) but ships two
//! platform-specific backings and the POSIX implementation file wasn't part
//! of the retrieved source. No locking crate appears anywhere in the
//! example corpus either, so this is a direct `flock(2)` substitute: one
//! lockfile per session directory, held exclusively and non-blockingly for
//! the session's lifetime.

use std::fs::{File, OpenOptions};
use std::io;
use std::os::unix::io::AsRawFd;
use std::path::Path;

/// An acquired exclusive lock on a session's lockfile. Released on drop.
pub struct SessionLock {
    file: File,
}

impl SessionLock {
    /// Open (creating if absent) the lockfile at `path` and attempt to
    /// acquire it without blocking.
    ///
    /// `Ok(None)` means another process already holds the lock — the
    /// directory belongs to a live session and must be left alone.
    pub fn try_acquire(path: &Path) -> io::Result<Option<Self>> {
        let file = OpenOptions::new().create(true).write(true).open(path)?;
        let rc = unsafe { libc::flock(file.as_raw_fd(), libc::LOCK_EX | libc::LOCK_NB) };
        if rc == 0 {
            Ok(Some(Self { file }))
        } else {
            let err = io::Error::last_os_error();
            if err.kind() == io::ErrorKind::WouldBlock {
                Ok(None)
            } else {
                Err(err)
            }
        }
    }
}

impl Drop for SessionLock {
    fn drop(&mut self) {
        unsafe {
            libc::flock(self.file.as_raw_fd(), libc::LOCK_UN);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn second_acquire_in_same_process_fails() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("lockfile");
        let first = SessionLock::try_acquire(&path).unwrap();
        assert!(first.is_some());
        let second = SessionLock::try_acquire(&path).unwrap();
        assert!(second.is_none());
    }

    #[test]
    fn lock_is_acquirable_again_after_drop() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("lockfile");
        let first = SessionLock::try_acquire(&path).unwrap().unwrap();
        drop(first);
        let second = SessionLock::try_acquire(&path).unwrap();
        assert!(second.is_some());
    }
}
