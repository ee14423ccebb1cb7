//! Overlay engine for Strata.
//!
//! This crate ties the catalog, the state store, the feed fetcher and the
//! transport backends together into the [`Engine`]: the batch API for adding,
//! syncing, deleting, reinstalling, enabling and disabling overlays. It also
//! provides the engine configuration, the store lock with its bounded wait,
//! and process-wide cancellation.

pub mod concurrency;
pub mod config;
pub mod engine;
pub mod outcome;

pub use concurrency::{install_signal_handler, shutdown_requested, StoreLock};
pub use config::{EngineConfig, DEFAULT_CONFIG_PATH};
pub use engine::{Engine, InstalledOverlay};
pub use outcome::{BatchOutcome, Report};

use strata_catalog::{CatalogError, ErrorKind};
use strata_remote::RemoteError;
use strata_store::StoreError;
use strata_transport::TransportError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum CoreError {
    #[error("catalog error: {0}")]
    Catalog(#[from] CatalogError),
    #[error("store error: {0}")]
    Store(#[from] StoreError),
    #[error("remote error: {0}")]
    Remote(#[from] RemoteError),
    #[error("transport error: {0}")]
    Transport(#[from] TransportError),
    #[error("store is busy: could not lock {lock} within {waited_secs}s")]
    Busy { lock: String, waited_secs: u64 },
    #[error("configuration error in {path}: {reason}")]
    Config { path: String, reason: String },
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl CoreError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            CoreError::Busy { .. } => ErrorKind::Busy,
            CoreError::Catalog(e) | CoreError::Store(StoreError::Catalog(e)) => e.kind(),
            CoreError::Remote(e) => e.kind(),
            CoreError::Transport(e) => e.kind(),
            CoreError::Store(_)
            | CoreError::Config { .. }
            | CoreError::Io(_)
            | CoreError::Serialization(_) => ErrorKind::Corrupt,
        }
    }
}
