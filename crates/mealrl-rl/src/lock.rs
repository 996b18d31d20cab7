//! Cross-process advisory file lock with a bounded wait
//!
//! Writers of the same table file serialize on `<table>.lock`. Acquisition
//! polls a non-blocking exclusive lock until it succeeds or the timeout
//! elapses; a stalled holder therefore surfaces as
//! [`MealRlError::LockTimeout`] instead of hanging the writer.
//!
//! On unix the lock is `flock(2)`, released by the kernel if the holder
//! dies. Elsewhere it is a sentinel file created exclusively and holding
//! the owner's pid; a sentinel older than [`SENTINEL_LEASE`] is taken to
//! belong to a crashed process and is removed.

use std::fs::{self, File, OpenOptions};
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

use tracing::debug;

use mealrl_core::util::with_suffix;
use mealrl_core::{MealRlError, Result};

/// Suffix appended to a table path to name its lock file
pub const LOCK_SUFFIX: &str = ".lock";

const POLL_INTERVAL: Duration = Duration::from_millis(10);

/// Age after which a non-unix sentinel file is considered abandoned.
/// Saves rewrite the whole table but finish well within this.
pub const SENTINEL_LEASE: Duration = Duration::from_secs(60);

/// Lock file path for a table file
pub fn lock_path_for(path: &Path) -> PathBuf {
    with_suffix(path, LOCK_SUFFIX)
}

/// Held lock; released when dropped
#[derive(Debug)]
pub struct FileLock {
    path: PathBuf,
    #[cfg_attr(not(unix), allow(dead_code))]
    file: File,
}

impl FileLock {
    /// Acquire an exclusive lock on `path`, waiting at most `timeout`.
    pub fn acquire(path: &Path, timeout: Duration) -> Result<Self> {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent)?;
        }

        let started = Instant::now();
        loop {
            if let Some(lock) = Self::try_acquire(path)? {
                debug!("Acquired lock {:?} after {:?}", path, started.elapsed());
                return Ok(lock);
            }
            let waited = started.elapsed();
            if waited >= timeout {
                return Err(MealRlError::LockTimeout {
                    path: path.display().to_string(),
                    waited_ms: u64::try_from(waited.as_millis()).unwrap_or(u64::MAX),
                });
            }
            std::thread::sleep(POLL_INTERVAL.min(timeout - waited));
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// One non-blocking attempt. `Ok(None)` means another holder has it.
    #[cfg(unix)]
    fn try_acquire(path: &Path) -> Result<Option<Self>> {
        use libc::{flock, LOCK_EX, LOCK_NB};
        use std::os::unix::io::AsRawFd;

        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(path)?;

        // SAFETY: the descriptor belongs to `file`, which outlives this call.
        let rc = unsafe { flock(file.as_raw_fd(), LOCK_EX | LOCK_NB) };
        if rc == 0 {
            return Ok(Some(Self {
                path: path.to_path_buf(),
                file,
            }));
        }

        let err = std::io::Error::last_os_error();
        if err.kind() == std::io::ErrorKind::WouldBlock {
            Ok(None)
        } else {
            Err(MealRlError::Persistence(format!(
                "Failed to lock {}: {}",
                path.display(),
                err
            )))
        }
    }

    /// One non-blocking attempt using an exclusively created sentinel file.
    #[cfg(not(unix))]
    fn try_acquire(path: &Path) -> Result<Option<Self>> {
        use std::io::Write;

        match OpenOptions::new().write(true).create_new(true).open(path) {
            Ok(mut file) => {
                writeln!(file, "{}", std::process::id())?;
                Ok(Some(Self {
                    path: path.to_path_buf(),
                    file,
                }))
            }
            Err(e) if e.kind() == std::io::ErrorKind::AlreadyExists => {
                if sentinel_is_stale(path, SENTINEL_LEASE) {
                    let owner = fs::read_to_string(path).unwrap_or_default();
                    tracing::warn!(
                        "Removing stale lock {:?} (owner pid {})",
                        path,
                        owner.trim()
                    );
                    // Lost races with another remover surface as NotFound; the next poll retries.
                    let _ = fs::remove_file(path);
                }
                Ok(None)
            }
            Err(e) => Err(e.into()),
        }
    }
}

/// Whether a sentinel has outlived its lease. Unreadable metadata counts as
/// fresh so a live holder is never evicted by accident.
#[cfg(not(unix))]
fn sentinel_is_stale(path: &Path, lease: Duration) -> bool {
    fs::metadata(path)
        .and_then(|m| m.modified())
        .ok()
        .and_then(|modified| modified.elapsed().ok())
        .is_some_and(|age| age >= lease)
}

impl Drop for FileLock {
    fn drop(&mut self) {
        #[cfg(unix)]
        {
            use std::os::unix::io::AsRawFd;
            // SAFETY: the descriptor is still owned by `self.file`.
            unsafe {
                libc::flock(self.file.as_raw_fd(), libc::LOCK_UN);
            }
        }
        #[cfg(not(unix))]
        {
            let _ = fs::remove_file(&self.path);
        }
        debug!("Released lock {:?}", self.path);
    }
}
