//! Singleton run lock.
//!
//! Exclusive, non-blocking lock on a named resource. Acquisition never waits:
//! when another instance holds the lock the caller is told who and gives up.

use std::fs::{File, OpenOptions};
use std::io::{self, Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

use thiserror::Error;
use tracing::{debug, warn};

#[derive(Debug, Error)]
pub enum LockError {
    #[error("failed to open or lock `{path}`: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
}

/// Result of one acquisition attempt.
#[derive(Debug)]
pub enum Acquisition {
    Acquired(LockGuard),
    /// Another instance holds the lock; `holder` is its pid when readable.
    Conflict { holder: Option<u32> },
}

/// Held lock. Released when dropped.
pub struct LockGuard {
    _held: Box<dyn Send + Sync>,
}

impl LockGuard {
    pub fn new(held: impl Send + Sync + 'static) -> Self {
        Self {
            _held: Box::new(held),
        }
    }
}

impl std::fmt::Debug for LockGuard {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LockGuard").finish_non_exhaustive()
    }
}

/// Exclusive, non-blocking lock on a well-known resource.
pub trait RunLock: Send + Sync {
    fn try_acquire(&self) -> Result<Acquisition, LockError>;
}

/// Advisory `flock` on a pid file.
///
/// The holder writes its pid into the file for operators; the file is
/// truncated again when the guard drops.
#[derive(Debug, Clone)]
pub struct FileLock {
    path: PathBuf,
}

impl FileLock {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn io_error(&self, source: io::Error) -> LockError {
        LockError::Io {
            path: self.path.clone(),
            source,
        }
    }
}

impl RunLock for FileLock {
    fn try_acquire(&self) -> Result<Acquisition, LockError> {
        if let Some(parent) = self.path.parent()
            && !parent.as_os_str().is_empty()
        {
            std::fs::create_dir_all(parent).map_err(|err| self.io_error(err))?;
        }

        let mut file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(&self.path)
            .map_err(|err| self.io_error(err))?;

        if !try_flock_exclusive(&file).map_err(|err| self.io_error(err))? {
            let holder = read_pid(&mut file);
            debug!(
                target: "staticpub::lock",
                path = %self.path.display(),
                holder = ?holder,
                "Run lock is held by another instance"
            );
            return Ok(Acquisition::Conflict { holder });
        }

        write_pid(&mut file, std::process::id()).map_err(|err| self.io_error(err))?;
        Ok(Acquisition::Acquired(LockGuard::new(HeldFile {
            file,
            path: self.path.clone(),
        })))
    }
}

struct HeldFile {
    file: File,
    path: PathBuf,
}

impl Drop for HeldFile {
    fn drop(&mut self) {
        if let Err(err) = self.file.set_len(0) {
            warn!(
                target: "staticpub::lock",
                path = %self.path.display(),
                error = %err,
                "Failed to blank pid file"
            );
        }
        unlock(&self.file);
    }
}

fn read_pid(file: &mut File) -> Option<u32> {
    let mut contents = String::new();
    file.seek(SeekFrom::Start(0)).ok()?;
    file.read_to_string(&mut contents).ok()?;
    contents.trim().parse().ok()
}

fn write_pid(file: &mut File, pid: u32) -> io::Result<()> {
    file.set_len(0)?;
    file.seek(SeekFrom::Start(0))?;
    writeln!(file, "{pid}")?;
    file.sync_data()
}

fn try_flock_exclusive(file: &File) -> io::Result<bool> {
    #[cfg(unix)]
    {
        use std::os::unix::io::AsRawFd;
        let fd = file.as_raw_fd();
        // SAFETY: fd is a valid descriptor owned by `file` for the whole call.
        #[allow(unsafe_code)]
        let result = unsafe { libc::flock(fd, libc::LOCK_EX | libc::LOCK_NB) };
        if result == 0 {
            return Ok(true);
        }
        let err = io::Error::last_os_error();
        if err.kind() == io::ErrorKind::WouldBlock || err.raw_os_error() == Some(libc::EWOULDBLOCK)
        {
            return Ok(false);
        }
        Err(err)
    }
    #[cfg(not(unix))]
    {
        let _ = file;
        Err(io::Error::new(
            io::ErrorKind::Unsupported,
            "exclusive file locks require a unix target",
        ))
    }
}

fn unlock(file: &File) {
    #[cfg(unix)]
    {
        use std::os::unix::io::AsRawFd;
        // SAFETY: fd is a valid descriptor owned by `file`.
        #[allow(unsafe_code)]
        let _ = unsafe { libc::flock(file.as_raw_fd(), libc::LOCK_UN) };
    }
    #[cfg(not(unix))]
    {
        let _ = file;
    }
}


#[cfg(all(test, not(unix)))]
mod unsupported_tests {
    use super::*;

    #[test]
    fn acquisition_fails_instead_of_granting_an_unlocked_guard() {
        let dir = tempfile::tempdir().expect("tempdir");
        let lock = FileLock::new(dir.path().join("run.pid"));

        let err = lock.try_acquire().expect_err("no flock on this target");
        assert!(matches!(
            err,
            LockError::Io { ref source, .. } if source.kind() == io::ErrorKind::Unsupported
        ));
    }
}
