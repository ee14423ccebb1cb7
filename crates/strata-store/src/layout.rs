use crate::StoreError;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

/// Current state directory format version. Incremented on incompatible layout changes.
pub const STATE_FORMAT_VERSION: u32 = 1;
const VERSION_FILE: &str = "version";
const INSTALLED_FILE: &str = "installed.json";

/// Paths used by the engine.
///
/// Working copies live directly under `storage` as `<storage>/<name>`. The
/// state directory holds the installed catalog, the lock file, the
/// write-ahead log and the feed cache. When the state directory sits inside
/// `storage` it is hidden (dot-prefixed) so it never looks like an overlay.
#[derive(Debug, Clone)]
pub struct StateLayout {
    storage: PathBuf,
    state_dir: PathBuf,
}

#[derive(Debug, Serialize, Deserialize)]
struct StateVersion {
    format_version: u32,
}

impl StateLayout {
    pub fn new(storage: impl Into<PathBuf>, state_dir: impl Into<PathBuf>) -> Self {
        Self {
            storage: storage.into(),
            state_dir: state_dir.into(),
        }
    }

    /// Layout with the state directory at `<storage>/.strata`.
    pub fn under_storage(storage: impl Into<PathBuf>) -> Self {
        let storage = storage.into();
        let state_dir = storage.join(".strata");
        Self { storage, state_dir }
    }

    #[inline]
    pub fn storage(&self) -> &Path {
        &self.storage
    }

    #[inline]
    pub fn state_dir(&self) -> &Path {
        &self.state_dir
    }

    #[inline]
    pub fn overlay_path(&self, name: &str) -> PathBuf {
        self.storage.join(name)
    }

    #[inline]
    pub fn installed_file(&self) -> PathBuf {
        self.state_dir.join(INSTALLED_FILE)
    }

    #[inline]
    pub fn cache_dir(&self) -> PathBuf {
        self.state_dir.join("cache")
    }

    #[inline]
    pub fn wal_dir(&self) -> PathBuf {
        self.state_dir.join("wal")
    }

    #[inline]
    pub fn lock_file(&self) -> PathBuf {
        self.state_dir.join(".lock")
    }

    pub fn initialize(&self) -> Result<(), StoreError> {
        fs::create_dir_all(&self.storage)?;
        fs::create_dir_all(&self.state_dir)?;
        fs::create_dir_all(self.cache_dir())?;
        fs::create_dir_all(self.wal_dir())?;

        let version_path = self.state_dir.join(VERSION_FILE);
        if version_path.exists() {
            self.verify_version()?;
        } else {
            let ver = StateVersion {
                format_version: STATE_FORMAT_VERSION,
            };
            let content = serde_json::to_string_pretty(&ver)?;
            crate::write_atomic(&version_path, content.as_bytes())?;
        }

        Ok(())
    }

    pub fn verify_version(&self) -> Result<(), StoreError> {
        let content = fs::read_to_string(self.state_dir.join(VERSION_FILE))?;
        let ver: StateVersion = serde_json::from_str(&content)?;
        if ver.format_version != STATE_FORMAT_VERSION {
            return Err(StoreError::VersionMismatch {
                expected: STATE_FORMAT_VERSION,
                found: ver.format_version,
            });
        }
        Ok(())
    }

    /// Whether `<storage>/<name>` exists as a directory with at least one entry.
    pub fn is_populated(&self, name: &str) -> bool {
        fs::read_dir(self.overlay_path(name))
            .map(|mut entries| entries.next().is_some())
            .unwrap_or(false)
    }
}
