//! Profile registry configuration.
//!
//! The registry maps each user name to its Thunderbird gloda database path
//! and profile root. It is loaded from a TOML file at:
//! 1. `$TBARCHIVE_PROFILES` (environment variable)
//! 2. `~/.config/tbarchive/profiles.toml` (Linux/macOS)
//!    `%APPDATA%\tbarchive\profiles.toml` (Windows)
//!
//! ```toml
//! [users.alice]
//! gloda_db = "/home/alice/.thunderbird/abc.default/global-messages-db.sqlite"
//! profile = "/home/alice/.thunderbird/abc.default"
//! ```

use std::collections::BTreeMap;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::error::{ArchiveError, Result};

/// One user's profile entry.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProfileEntry {
    /// Path to the gloda database (`global-messages-db.sqlite`).
    pub gloda_db: PathBuf,
    /// Path to the Thunderbird profile directory.
    pub profile: PathBuf,
}

/// The whole profile registry file.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ProfileRegistry {
    /// User name → profile entry.
    pub users: BTreeMap<String, ProfileEntry>,
}

impl ProfileRegistry {
    /// Look up a user, failing with `UnknownUser` if absent.
    pub fn entry(&self, user: &str) -> Result<&ProfileEntry> {
        self.users
            .get(user)
            .ok_or_else(|| ArchiveError::UnknownUser {
                user: user.to_string(),
                registry: registry_file_path().unwrap_or_else(|| PathBuf::from("<unknown>")),
            })
    }

    /// All registered user names.
    pub fn user_names(&self) -> Vec<String> {
        self.users.keys().cloned().collect()
    }
}

/// Load the registry from the standard location.
///
/// A missing or unparseable file is a configuration error: without it no
/// user can be resolved.
pub fn load_registry() -> Result<ProfileRegistry> {
    let path = registry_file_path()
        .ok_or_else(|| ArchiveError::Config("could not determine registry path".into()))?;
    load_registry_from(&path)
}

/// Load the registry from an explicit path (used by tests and `--profiles`).
pub fn load_registry_from(path: &std::path::Path) -> Result<ProfileRegistry> {
    let contents = std::fs::read_to_string(path).map_err(|e| {
        ArchiveError::Config(format!("cannot read registry '{}': {e}", path.display()))
    })?;
    let registry: ProfileRegistry = toml::from_str(&contents).map_err(|e| {
        ArchiveError::Config(format!("cannot parse registry '{}': {e}", path.display()))
    })?;
    tracing::info!(path = %path.display(), users = registry.users.len(), "Loaded profile registry");
    Ok(registry)
}

/// Determine the registry file path (checking env var first, then standard dirs).
pub fn registry_file_path() -> Option<PathBuf> {
    if let Ok(env_path) = std::env::var("TBARCHIVE_PROFILES") {
        return Some(PathBuf::from(env_path));
    }
    dirs::config_dir().map(|d| d.join("tbarchive").join("profiles.toml"))
}

/// Return the cache directory for logs.
pub fn cache_dir() -> PathBuf {
    dirs::cache_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("tbarchive")
}
