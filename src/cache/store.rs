//! Cache persistence for the price coordinator
//!
//! Stores the whole cache as a single versioned JSON blob per installation
//! in an XDG-compliant cache directory. Loads return the raw JSON value so
//! the structure validator can inspect the blob before the typed model is
//! built from it.

use std::fs;
use std::path::PathBuf;

use directories::ProjectDirs;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, warn};

use crate::data::PriceCache;

/// Blob schema version; bumped when the persisted layout changes
const CACHE_VERSION: u32 = 1;

/// Wrapper persisted on disk
#[derive(Debug, Serialize, Deserialize)]
struct CacheEnvelope {
    version: u32,
    data: Value,
}

/// Persists one installation's price cache to disk
///
/// The store writes the whole blob on every save (no partial persistence)
/// and returns `None` from [`CacheStore::load`] on first run, on a schema
/// version mismatch, and on unreadable files - all of which the coordinator
/// treats as "start empty and refresh".
#[derive(Debug, Clone)]
pub struct CacheStore {
    path: PathBuf,
}

impl CacheStore {
    /// Creates a store using the XDG cache directory
    ///
    /// Returns `None` if no cache directory can be determined (e.g. no home
    /// directory).
    pub fn new(installation_id: &str) -> Option<Self> {
        let project_dirs = ProjectDirs::from("", "", "tibber-prices")?;
        Some(Self::with_dir(project_dirs.cache_dir().to_path_buf(), installation_id))
    }

    /// Creates a store rooted at a specific directory
    ///
    /// Used by tests and by the `--cache-dir` override.
    pub fn with_dir(cache_dir: PathBuf, installation_id: &str) -> Self {
        let file_name = format!("{}.json", storage_key(installation_id));
        Self {
            path: cache_dir.join(file_name),
        }
    }

    /// Loads the raw cache blob
    ///
    /// Returns `None` when the file does not exist, cannot be parsed, or
    /// carries a different schema version.
    pub fn load(&self) -> Option<Value> {
        let content = fs::read_to_string(&self.path).ok()?;
        let envelope: CacheEnvelope = match serde_json::from_str(&content) {
            Ok(envelope) => envelope,
            Err(err) => {
                warn!(path = %self.path.display(), %err, "discarding unreadable cache file");
                return None;
            }
        };

        if envelope.version != CACHE_VERSION {
            warn!(
                found = envelope.version,
                expected = CACHE_VERSION,
                "discarding cache with unsupported schema version"
            );
            return None;
        }

        debug!(path = %self.path.display(), "loaded cache blob");
        Some(envelope.data)
    }

    /// Writes the whole cache as one blob
    pub fn save(&self, cache: &PriceCache) -> std::io::Result<()> {
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent)?;
        }

        let envelope = CacheEnvelope {
            version: CACHE_VERSION,
            data: serde_json::to_value(cache)
                .map_err(|err| std::io::Error::new(std::io::ErrorKind::InvalidData, err))?,
        };
        let json = serde_json::to_string_pretty(&envelope)
            .map_err(|err| std::io::Error::new(std::io::ErrorKind::InvalidData, err))?;

        fs::write(&self.path, json)?;
        debug!(path = %self.path.display(), "saved cache blob");
        Ok(())
    }
}

/// Maps an installation identity to an opaque, filesystem-safe storage key
fn storage_key(installation_id: &str) -> String {
    let sanitized: String = installation_id
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() || c == '-' { c } else { '_' })
        .collect();
    format!("tibber_prices_{sanitized}")
}
