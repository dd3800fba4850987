//! Cross-process lock over a credential file.
//!
//! The lock is a sidecar file `<path>.lock` created with exclusive-create
//! semantics, holding the owner's PID for debugging. A lock older than
//! [`LockOptions::stale_after`] is assumed to belong to a crashed process and
//! is reclaimed. The recorded PID is never probed for liveness.

use std::fs::{self, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::process;
use std::thread;
use std::time::{Duration, Instant};

use tracing::{debug, warn};

use crate::error::{AuthError, AuthResult};

/// Timing parameters for [`CredentialLock::acquire`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LockOptions {
    /// Give up after this long.
    pub timeout: Duration,
    /// Sleep between attempts.
    pub poll_interval: Duration,
    /// Locks older than this are reclaimed.
    pub stale_after: Duration,
}

impl LockOptions {
    pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(5);
    pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(50);
    pub const DEFAULT_STALE_AFTER: Duration = Duration::from_secs(30);
}

impl Default for LockOptions {
    fn default() -> Self {
        Self {
            timeout: Self::DEFAULT_TIMEOUT,
            poll_interval: Self::DEFAULT_POLL_INTERVAL,
            stale_after: Self::DEFAULT_STALE_AFTER,
        }
    }
}

/// Returns the sidecar lock path for a credential file.
pub fn lock_path_for(path: &Path) -> PathBuf {
    let mut name = path.as_os_str().to_owned();
    name.push(".lock");
    PathBuf::from(name)
}

/// A held lock. The sidecar file is removed on [`release`](Self::release)
/// or drop, whichever comes first.
#[derive(Debug)]
pub struct CredentialLock {
    path: Option<PathBuf>,
}

impl CredentialLock {
    /// Acquires the lock guarding `path` with default timings.
    pub fn acquire(path: &Path) -> AuthResult<Self> {
        Self::acquire_with(path, LockOptions::default())
    }

    /// Acquires the lock guarding `path`.
    ///
    /// # Errors
    ///
    /// `LockTimeout` if the lock stays held past `options.timeout`; `Io` on
    /// any other filesystem failure.
    pub fn acquire_with(path: &Path, options: LockOptions) -> AuthResult<Self> {
        let lock_path = lock_path_for(path);
        let deadline = Instant::now() + options.timeout;

        loop {
            match OpenOptions::new()
                .write(true)
                .create_new(true)
                .open(&lock_path)
            {
                Ok(mut file) => {
                    // The PID is informational only.
                    let _ = writeln!(file, "{}", process::id());
                    debug!(path = %lock_path.display(), "acquired credential lock");
                    return Ok(Self {
                        path: Some(lock_path),
                    });
                }
                Err(e) if e.kind() == io::ErrorKind::AlreadyExists => {}
                Err(e) => {
                    return Err(AuthError::io(format!(
                        "failed to create lock file {}",
                        lock_path.display()
                    ))
                    .with_source(e));
                }
            }

            match lock_age(&lock_path) {
                // Released between our attempt and the stat.
                Ok(None) => continue,
                Ok(Some(age)) if age > options.stale_after => {
                    warn!(
                        path = %lock_path.display(),
                        age_secs = age.as_secs(),
                        "reclaiming stale credential lock"
                    );
                    match fs::remove_file(&lock_path) {
                        Ok(()) => continue,
                        Err(e) if e.kind() == io::ErrorKind::NotFound => continue,
                        Err(e) => {
                            return Err(AuthError::io(format!(
                                "failed to remove stale lock {}",
                                lock_path.display()
                            ))
                            .with_source(e));
                        }
                    }
                }
                Ok(Some(_)) => {}
                Err(e) => {
                    return Err(AuthError::io(format!(
                        "failed to inspect lock file {}",
                        lock_path.display()
                    ))
                    .with_source(e));
                }
            }

            if Instant::now() >= deadline {
                return Err(AuthError::lock_timeout(format!(
                    "timed out after {:?} waiting for {} (held by another gws process?)",
                    options.timeout,
                    lock_path.display()
                )));
            }
            thread::sleep(options.poll_interval);
        }
    }

    /// Returns the sidecar path while the lock is held.
    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    /// Removes the sidecar file. Calling it again is a no-op.
    pub fn release(&mut self) {
        let Some(path) = self.path.take() else {
            return;
        };
        match fs::remove_file(&path) {
            Ok(()) => debug!(path = %path.display(), "released credential lock"),
            Err(e) if e.kind() == io::ErrorKind::NotFound => {}
            Err(e) => warn!(path = %path.display(), error = %e, "failed to remove lock file"),
        }
    }
}

impl Drop for CredentialLock {
    fn drop(&mut self) {
        self.release();
    }
}

/// Age of the lock file, or `None` if it no longer exists. A modification
/// time in the future counts as age zero.
fn lock_age(path: &Path) -> io::Result<Option<Duration>> {
    match fs::metadata(path) {
        Ok(meta) => {
            let modified = meta.modified()?;
            Ok(Some(modified.elapsed().unwrap_or(Duration::ZERO)))
        }
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(None),
        Err(e) => Err(e),
    }
}
