//! On-disk persistence of the OAuth token and the granted service list.
//!
//! Writes go to a temporary file in the destination directory, which is then
//! renamed over the target, so a concurrent reader sees either the old file
//! or the new one. Token writes and deletes are serialized across processes
//! by a [`CredentialLock`]. Reads take no lock.

use std::fs::{self, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};

use serde::Serialize;
use serde::de::DeserializeOwned;
use tracing::{debug, info, warn};

use crate::error::{AuthError, AuthResult};
use crate::lock::{CredentialLock, LockOptions};
use crate::token::{Token, merge};

/// File-backed credential store.
#[derive(Debug, Clone)]
pub struct CredentialStore {
    token_path: PathBuf,
    granted_services_path: PathBuf,
    lock_options: LockOptions,
}

impl CredentialStore {
    /// Default token file name inside the config directory.
    pub const TOKEN_FILE: &'static str = "token.json";
    /// Default granted services file name inside the config directory.
    pub const GRANTED_SERVICES_FILE: &'static str = "granted_services.json";

    /// Creates a store with both files inside `dir`.
    pub fn in_dir(dir: impl AsRef<Path>) -> Self {
        let dir = dir.as_ref();
        Self::new(
            dir.join(Self::TOKEN_FILE),
            dir.join(Self::GRANTED_SERVICES_FILE),
        )
    }

    /// Creates a store with explicit file paths.
    pub fn new(token_path: impl Into<PathBuf>, granted_services_path: impl Into<PathBuf>) -> Self {
        Self {
            token_path: token_path.into(),
            granted_services_path: granted_services_path.into(),
            lock_options: LockOptions::default(),
        }
    }

    /// Overrides the lock timings.
    #[must_use]
    pub fn with_lock_options(mut self, options: LockOptions) -> Self {
        self.lock_options = options;
        self
    }

    pub fn token_path(&self) -> &Path {
        &self.token_path
    }

    pub fn granted_services_path(&self) -> &Path {
        &self.granted_services_path
    }

    /// Loads the persisted token.
    ///
    /// # Errors
    ///
    /// `NotAuthenticated` when no token file exists, `ParseError` when it is
    /// corrupt, `Io` otherwise.
    pub fn load(&self) -> AuthResult<Token> {
        let content = match fs::read_to_string(&self.token_path) {
            Ok(content) => content,
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                debug!(path = %self.token_path.display(), "no token file");
                return Err(AuthError::not_authenticated("no stored credentials"));
            }
            Err(e) => {
                return Err(AuthError::io(format!(
                    "failed to read {}",
                    self.token_path.display()
                ))
                .with_source(e));
            }
        };

        serde_json::from_str(&content).map_err(|e| {
            AuthError::parse(format!(
                "token file {} is corrupt",
                self.token_path.display()
            ))
            .with_source(e)
        })
    }

    /// Atomically replaces the persisted token.
    pub fn save(&self, token: &Token) -> AuthResult<()> {
        ensure_parent(&self.token_path)?;
        let _lock = CredentialLock::acquire_with(&self.token_path, self.lock_options)?;
        write_json_atomic(&self.token_path, token)?;
        debug!(path = %self.token_path.display(), "saved token");
        Ok(())
    }

    /// Merges `incoming` into the persisted token and saves the result, all
    /// under one lock. Returns the token that was written.
    ///
    /// A missing or corrupt stored token is replaced by `incoming`.
    pub fn save_merged(&self, incoming: Token) -> AuthResult<Token> {
        ensure_parent(&self.token_path)?;
        let _lock = CredentialLock::acquire_with(&self.token_path, self.lock_options)?;

        let existing = match self.load() {
            Ok(token) => Some(token),
            Err(e) if e.is_not_authenticated() => None,
            Err(e) => {
                warn!(error = %e, "ignoring unreadable stored token while merging");
                None
            }
        };

        let merged = merge(existing.as_ref(), Some(incoming))
            .ok_or_else(|| AuthError::internal("merge produced no token"))?;
        write_json_atomic(&self.token_path, &merged)?;
        debug!(path = %self.token_path.display(), "saved merged token");
        Ok(merged)
    }

    /// Removes the persisted token. A missing file is not an error.
    pub fn delete(&self) -> AuthResult<()> {
        if let Some(parent) = self.token_path.parent()
            && !parent.exists()
        {
            return Ok(());
        }
        let _lock = CredentialLock::acquire_with(&self.token_path, self.lock_options)?;
        match fs::remove_file(&self.token_path) {
            Ok(()) => {
                info!(path = %self.token_path.display(), "deleted stored token");
                Ok(())
            }
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(AuthError::io(format!(
                "failed to delete {}",
                self.token_path.display()
            ))
            .with_source(e)),
        }
    }

    /// Records which services were requested at login.
    pub fn save_granted_services<S: AsRef<str>>(&self, services: &[S]) -> AuthResult<()> {
        ensure_parent(&self.granted_services_path)?;
        let services: Vec<&str> = services.iter().map(AsRef::as_ref).collect();
        write_json_atomic(&self.granted_services_path, &services)
    }

    /// Returns the recorded services; empty when nothing was recorded, which
    /// means a full login.
    pub fn load_granted_services(&self) -> AuthResult<Vec<String>> {
        match fs::read_to_string(&self.granted_services_path) {
            Ok(content) => serde_json::from_str(&content).map_err(|e| {
                AuthError::parse(format!(
                    "granted services file {} is corrupt",
                    self.granted_services_path.display()
                ))
                .with_source(e)
            }),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(Vec::new()),
            Err(e) => Err(AuthError::io(format!(
                "failed to read {}",
                self.granted_services_path.display()
            ))
            .with_source(e)),
        }
    }

    /// Removes the granted services record. A missing file is not an error.
    pub fn delete_granted_services(&self) -> AuthResult<()> {
        match fs::remove_file(&self.granted_services_path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(AuthError::io(format!(
                "failed to delete {}",
                self.granted_services_path.display()
            ))
            .with_source(e)),
        }
    }
}

fn ensure_parent(path: &Path) -> AuthResult<()> {
    let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) else {
        return Ok(());
    };
    if parent.exists() {
        return Ok(());
    }
    fs::create_dir_all(parent).map_err(|e| {
        AuthError::io(format!("failed to create {}", parent.display())).with_source(e)
    })?;

    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        let _ = fs::set_permissions(parent, fs::Permissions::from_mode(0o700));
    }
    Ok(())
}

/// Serializes `value` into a sibling temp file with mode 0600, then renames
/// it over `path`.
fn write_json_atomic<T: Serialize + ?Sized>(path: &Path, value: &T) -> AuthResult<()> {
    let content = serde_json::to_vec_pretty(value)
        .map_err(|e| AuthError::internal("failed to serialize credentials").with_source(e))?;

    let temp_path = temp_path_for(path);
    let result = write_private(&temp_path, &content).and_then(|()| fs::rename(&temp_path, path));
    if let Err(e) = result {
        let _ = fs::remove_file(&temp_path);
        return Err(AuthError::io(format!("failed to write {}", path.display())).with_source(e));
    }
    Ok(())
}

/// Temp file in the same directory so the rename never crosses filesystems.
fn temp_path_for(path: &Path) -> PathBuf {
    let name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| "credentials".to_string());
    path.with_file_name(format!(".{name}.{}.tmp", uuid::Uuid::new_v4().simple()))
}

/// Creates `path` with owner-only permissions before any byte is written.
fn write_private(path: &Path, content: &[u8]) -> io::Result<()> {
    let mut options = OpenOptions::new();
    options.write(true).create_new(true);

    #[cfg(unix)]
    {
        use std::os::unix::fs::OpenOptionsExt;
        options.mode(0o600);
    }

    let mut file = options.open(path)?;

    // The umask can only narrow the mode; this pins it exactly.
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        file.set_permissions(fs::Permissions::from_mode(0o600))?;
    }

    file.write_all(content)?;
    file.sync_all()
}
