use crate::CoreError;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;
use strata_remote::FetchConfig;
use strata_store::StateLayout;
use strata_transport::TransportConfig;

pub const DEFAULT_STORAGE: &str = "/var/lib/strata";
pub const DEFAULT_REPOS_CONF: &str = "/etc/portage/repos.conf/strata.conf";
pub const DEFAULT_CONFIG_PATH: &str = "/etc/strata/strata.toml";

/// Engine configuration. Every field has a default, so an empty file is valid.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Root of the working copies.
    pub storage: PathBuf,
    /// Installed catalog, lock, write-ahead log and feed cache.
    /// Defaults to `<storage>/.strata`.
    pub state_dir: Option<PathBuf>,
    /// Remote catalog feeds, highest precedence first.
    pub feeds: Vec<String>,
    /// Local catalog files, merged after the feeds in file-name order.
    pub definitions_dir: Option<PathBuf>,
    pub repos_conf: Option<PathBuf>,
    /// Defaults to `<storage>/make.conf`.
    pub shell_fragment: Option<PathBuf>,
    pub sync_integration: bool,
    pub sync_type: String,
    pub auto_sync: String,
    /// URL schemes sources may use. Empty allows every scheme.
    pub protocol_filter: Vec<String>,
    pub lock_timeout_secs: u64,
    pub fetch: FetchConfig,
    pub transport: TransportConfig,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            storage: PathBuf::from(DEFAULT_STORAGE),
            state_dir: None,
            feeds: Vec::new(),
            definitions_dir: None,
            repos_conf: None,
            shell_fragment: None,
            sync_integration: true,
            sync_type: "layman".to_owned(),
            auto_sync: "yes".to_owned(),
            protocol_filter: Vec::new(),
            lock_timeout_secs: 30,
            fetch: FetchConfig::default(),
            transport: TransportConfig::default(),
        }
    }
}

impl EngineConfig {
    /// A default configuration rooted at `storage`.
    pub fn with_storage(storage: impl Into<PathBuf>) -> Self {
        Self {
            storage: storage.into(),
            ..Self::default()
        }
    }

    pub fn from_toml(content: &str, origin: &Path) -> Result<Self, CoreError> {
        toml::from_str(content).map_err(|e| CoreError::Config {
            path: origin.display().to_string(),
            reason: e.to_string(),
        })
    }

    pub fn load(path: &Path) -> Result<Self, CoreError> {
        let content = fs::read_to_string(path).map_err(|e| CoreError::Config {
            path: path.display().to_string(),
            reason: e.to_string(),
        })?;
        Self::from_toml(&content, path)
    }

    /// Load `path` if it exists, otherwise use defaults.
    pub fn load_or_default(path: &Path) -> Result<Self, CoreError> {
        if path.exists() {
            Self::load(path)
        } else {
            Ok(Self::default())
        }
    }

    pub fn layout(&self) -> StateLayout {
        match &self.state_dir {
            Some(dir) => StateLayout::new(&self.storage, dir),
            None => StateLayout::under_storage(&self.storage),
        }
    }

    pub fn repos_conf_path(&self) -> PathBuf {
        self.repos_conf
            .clone()
            .unwrap_or_else(|| PathBuf::from(DEFAULT_REPOS_CONF))
    }

    pub fn shell_fragment_path(&self) -> PathBuf {
        self.shell_fragment
            .clone()
            .unwrap_or_else(|| self.storage.join("make.conf"))
    }

    pub fn lock_timeout(&self) -> Duration {
        Duration::from_secs(self.lock_timeout_secs)
    }

    /// Whether a source URL passes `protocol_filter`.
    pub fn allows_scheme(&self, scheme: Option<&str>) -> bool {
        if self.protocol_filter.is_empty() {
            return true;
        }
        scheme.is_some_and(|s| self.protocol_filter.iter().any(|p| p.eq_ignore_ascii_case(s)))
    }
}
