//! Home-relative path helpers.
//!
//! The credential cache lives under `~/.sentinel-signal/` unless
//! `SENTINEL_CREDENTIALS_PATH` points somewhere else.

use std::path::{Path, PathBuf};

/// Directory name under the home directory.
const APP_DIR: &str = ".sentinel-signal";

/// Cache file name inside [`APP_DIR`].
const CREDENTIALS_FILE: &str = "credentials.json";

/// Returns the default credential cache path.
///
/// `None` if the home directory cannot be determined.
pub fn default_credentials_path() -> Option<PathBuf> {
    dirs::home_dir().map(|h| h.join(APP_DIR).join(CREDENTIALS_FILE))
}

/// Expands a leading `~` to the home directory.
///
/// Paths without a leading `~` are returned unchanged. `None` if expansion
/// is needed but the home directory is unknown.
pub fn expand_home(raw: &str) -> Option<PathBuf> {
    if raw == "~" {
        return dirs::home_dir();
    }
    match raw.strip_prefix("~/") {
        Some(rest) => dirs::home_dir().map(|h| h.join(rest)),
        None => Some(Path::new(raw).to_path_buf()),
    }
}
