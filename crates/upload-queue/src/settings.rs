//! Uploader settings.
//!
//! Stored as JSON in `<config dir>/vaultup/settings.json`:
//!
//! ```json
//! { "chunkSize": 1048576, "concurrency": 3 }
//! ```
//!
//! `VAULTUP_CHUNK_SIZE` and `VAULTUP_CONCURRENCY` override the file.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::DEFAULT_CONCURRENCY;
use crate::error::SettingsError;
use vaultup_transfer::DEFAULT_CHUNK_SIZE;

pub const CHUNK_SIZE_ENV: &str = "VAULTUP_CHUNK_SIZE";
pub const CONCURRENCY_ENV: &str = "VAULTUP_CONCURRENCY";

/// Fixed for the lifetime of a queue.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct UploaderSettings {
    /// Plaintext bytes per chunk.
    pub chunk_size: usize,
    /// Maximum number of items in `Uploading`/`Retrying` at once.
    pub concurrency: usize,
}

impl Default for UploaderSettings {
    fn default() -> Self {
        Self {
            chunk_size: DEFAULT_CHUNK_SIZE,
            concurrency: DEFAULT_CONCURRENCY,
        }
    }
}

impl UploaderSettings {
    /// Loads the settings file plus environment overrides.
    ///
    /// A missing file yields defaults; an unparsable one is logged and
    /// ignored.
    pub fn load() -> Result<Self, SettingsError> {
        let path = settings_path();
        let mut settings = if path.exists() {
            match Self::load_from(&path) {
                Ok(s) => s,
                Err(SettingsError::Json(e)) => {
                    tracing::warn!(
                        path = %path.display(),
                        error = %e,
                        "failed to parse uploader settings, using defaults"
                    );
                    Self::default()
                }
                Err(e) => return Err(e),
            }
        } else {
            Self::default()
        };
        settings.apply_env(|key| std::env::var(key).ok());
        Ok(settings.normalized())
    }

    /// Reads settings from a specific file, without environment overrides.
    pub fn load_from(path: &Path) -> Result<Self, SettingsError> {
        let content = std::fs::read_to_string(path)?;
        let settings: Self = serde_json::from_str(&content)?;
        Ok(settings.normalized())
    }

    pub fn save_to(&self, path: &Path) -> Result<(), SettingsError> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let json = serde_json::to_string_pretty(self)?;
        std::fs::write(path, json)?;
        tracing::debug!(path = %path.display(), "uploader settings saved");
        Ok(())
    }

    /// Zero values fall back to the defaults.
    pub fn normalized(self) -> Self {
        let defaults = Self::default();
        Self {
            chunk_size: if self.chunk_size == 0 {
                defaults.chunk_size
            } else {
                self.chunk_size
            },
            concurrency: if self.concurrency == 0 {
                defaults.concurrency
            } else {
                self.concurrency
            },
        }
    }

    fn apply_env(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        if let Some(v) = lookup(CHUNK_SIZE_ENV) {
            match v.trim().parse() {
                Ok(n) => self.chunk_size = n,
                Err(_) => tracing::warn!(var = CHUNK_SIZE_ENV, value = %v, "ignoring invalid override"),
            }
        }
        if let Some(v) = lookup(CONCURRENCY_ENV) {
            match v.trim().parse() {
                Ok(n) => self.concurrency = n,
                Err(_) => tracing::warn!(var = CONCURRENCY_ENV, value = %v, "ignoring invalid override"),
            }
        }
    }
}

/// `<config dir>/vaultup/settings.json`.
pub fn settings_path() -> PathBuf {
    config_base_dir().join("vaultup").join("settings.json")
}

fn config_base_dir() -> PathBuf {
    #[cfg(target_os = "windows")]
    {
        let appdata =
            std::env::var("APPDATA").unwrap_or_else(|_| "C:\\Users\\Default\\AppData".into());
        PathBuf::from(appdata)
    }

    #[cfg(not(target_os = "windows"))]
    {
        if let Ok(dir) = std::env::var("XDG_CONFIG_HOME")
            && !dir.is_empty()
        {
            return PathBuf::from(dir);
        }
        let home = std::env::var("HOME").unwrap_or_else(|_| "/tmp".into());
        PathBuf::from(home).join(".config")
    }
}
