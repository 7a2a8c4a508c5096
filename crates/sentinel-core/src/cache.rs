//! Credential cache storage.
//!
//! At most one [`CredentialRecord`] is cached at a time. The file-backed
//! cache writes JSON to `~/.sentinel-signal/credentials.json` by default:
//!
//! ```text
//! ~/.sentinel-signal/          (0700)
//! └── credentials.json         (0600, replaced atomically on every store)
//! ```
//!
//! Reads never fail: a missing, unreadable or malformed file is reported as
//! an empty cache so the next mint can overwrite it.

use std::fs;
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{PoisonError, RwLock};

use tracing::{debug, instrument, warn};

use crate::error::{Error, Result};
use crate::record::CredentialRecord;

/// Storage for the single cached trial credential.
///
/// Implementations must make `store` atomic: a concurrent `load` sees either
/// the previous record or the new one, never a mix.
pub trait CredentialCache: Send + Sync {
    /// Returns the cached record, or `None` if absent or unreadable.
    fn load(&self) -> Option<CredentialRecord>;

    /// Replaces the cached record.
    ///
    /// # Errors
    ///
    /// Returns an error if the record cannot be persisted.
    fn store(&self, record: &CredentialRecord) -> Result<()>;

    /// Removes the cached record.
    ///
    /// Returns `true` if a record was removed, `false` if none existed.
    ///
    /// # Errors
    ///
    /// Returns an error if an existing record cannot be removed.
    fn clear(&self) -> Result<bool>;
}

/// File-backed credential cache.
#[derive(Debug, Clone)]
pub struct FileCredentialCache {
    path: PathBuf,
}

impl FileCredentialCache {
    /// Creates a cache backed by the file at `path`.
    ///
    /// Nothing is touched on disk until the first `store`.
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// Returns the cache file path.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    fn parent_dir(&self) -> &Path {
        self.path
            .parent()
            .filter(|p| !p.as_os_str().is_empty())
            .unwrap_or_else(|| Path::new("."))
    }
}

impl CredentialCache for FileCredentialCache {
    #[instrument(skip(self), fields(path = %self.path.display()))]
    fn load(&self) -> Option<CredentialRecord> {
        let contents = match fs::read_to_string(&self.path) {
            Ok(contents) => contents,
            Err(e) if e.kind() == ErrorKind::NotFound => {
                debug!("No cached credential");
                return None;
            }
            Err(e) => {
                warn!(error = %e, "Failed to read credential cache, ignoring it");
                return None;
            }
        };

        match serde_json::from_str::<CredentialRecord>(&contents) {
            Ok(record) => {
                debug!(expires_at = %record.expires_at, "Loaded cached credential");
                Some(record)
            }
            Err(e) => {
                warn!(error = %e, "Credential cache is corrupt, ignoring it");
                None
            }
        }
    }

    #[instrument(skip(self, record), fields(path = %self.path.display()))]
    fn store(&self, record: &CredentialRecord) -> Result<()> {
        let dir = self.parent_dir();
        create_private_dir(dir)?;

        let json = serde_json::to_string_pretty(record)?;

        // Atomic write: unique temp file in the same directory, then rename.
        // The temp file is created 0600, so the key is never world-readable.
        let mut temp = tempfile::Builder::new()
            .prefix(".credentials.")
            .suffix(".tmp")
            .tempfile_in(dir)?;
        restrict_to_owner(temp.path())?;
        temp.write_all(json.as_bytes())?;
        temp.as_file().sync_all()?;
        temp.persist(&self.path).map_err(|e| Error::Io(e.error))?;
        restrict_to_owner(&self.path)?;

        debug!(size_bytes = json.len(), "Stored credential");
        Ok(())
    }

    #[instrument(skip(self), fields(path = %self.path.display()))]
    fn clear(&self) -> Result<bool> {
        match fs::remove_file(&self.path) {
            Ok(()) => {
                debug!("Removed cached credential");
                Ok(true)
            }
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(false),
            Err(e) => Err(e.into()),
        }
    }
}

#[cfg(unix)]
fn create_private_dir(dir: &Path) -> Result<()> {
    use std::os::unix::fs::DirBuilderExt;

    if dir.is_dir() {
        return Ok(());
    }
    fs::DirBuilder::new()
        .recursive(true)
        .mode(0o700)
        .create(dir)
        .map_err(|e| {
            Error::Storage(format!(
                "Failed to create credential directory {}: {e}",
                dir.display()
            ))
        })
}

#[cfg(not(unix))]
fn create_private_dir(dir: &Path) -> Result<()> {
    fs::create_dir_all(dir).map_err(|e| {
        Error::Storage(format!(
            "Failed to create credential directory {}: {e}",
            dir.display()
        ))
    })
}

#[cfg(unix)]
fn restrict_to_owner(path: &Path) -> Result<()> {
    use std::os::unix::fs::PermissionsExt;

    fs::set_permissions(path, fs::Permissions::from_mode(0o600))?;
    Ok(())
}

#[cfg(not(unix))]
#[allow(clippy::unnecessary_wraps)]
const fn restrict_to_owner(_path: &Path) -> Result<()> {
    Ok(())
}

/// In-memory credential cache.
///
/// Useful for embedding and for tests that need to observe cache traffic.
#[derive(Debug, Default)]
pub struct MemoryCredentialCache {
    record: RwLock<Option<CredentialRecord>>,
    loads: AtomicUsize,
    stores: AtomicUsize,
}

impl MemoryCredentialCache {
    /// Creates an empty cache.
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a cache pre-populated with `record`.
    pub fn with_record(record: CredentialRecord) -> Self {
        Self {
            record: RwLock::new(Some(record)),
            ..Self::default()
        }
    }

    /// Number of `load` calls so far.
    pub fn load_count(&self) -> usize {
        self.loads.load(Ordering::SeqCst)
    }

    /// Number of `store` calls so far.
    pub fn store_count(&self) -> usize {
        self.stores.load(Ordering::SeqCst)
    }

    /// Returns the current record without counting it as a load.
    pub fn snapshot(&self) -> Option<CredentialRecord> {
        self.record
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}

impl CredentialCache for MemoryCredentialCache {
    fn load(&self) -> Option<CredentialRecord> {
        self.loads.fetch_add(1, Ordering::SeqCst);
        self.snapshot()
    }

    fn store(&self, record: &CredentialRecord) -> Result<()> {
        self.stores.fetch_add(1, Ordering::SeqCst);
        *self.record.write().unwrap_or_else(PoisonError::into_inner) = Some(record.clone());
        Ok(())
    }

    fn clear(&self) -> Result<bool> {
        Ok(self
            .record
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
            .is_some())
    }
}
