//! Transport backends for Strata overlays.
//!
//! Each source kind maps to one [`Transport`] that can add, sync, re-point and
//! delete a working copy at `<storage>/<name>`. Backends never spawn processes
//! themselves: every tool call goes through the [`ToolRunner`] held by the
//! [`Toolbox`], which makes the whole layer testable with a
//! [`RecordingRunner`]. The [`ops`] module wraps backends with the cleanup,
//! re-point and post-sync hook policy the engine relies on.

pub mod archive;
pub mod backend;
pub mod config;
pub mod gsorcery;
pub mod ops;
pub mod prereq;
pub mod rsync;
pub mod runner;
pub mod squashfs;
pub mod stub;
pub mod vcs;

pub use backend::{select_transport, Target, Toolbox, Transport};
pub use config::{ToolSettings, TransportConfig};
pub use ops::{install, remove, repoint, update, Removal};
pub use prereq::{check_tools, format_missing, MissingTool};
pub use runner::{Invocation, RecordingRunner, SystemRunner, ToolOutput, ToolRunner};

use strata_catalog::ErrorKind;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum TransportError {
    #[error("transport I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("no transport for source kind '{0}'")]
    UnsupportedKind(String),
    #[error("{0}")]
    MissingTool(String),
    #[error("{tool} exited with code {code}: {message}")]
    Failed {
        tool: String,
        code: i32,
        message: String,
    },
    #[error("{tool} could not reach the remote: {message}")]
    Network { tool: String, message: String },
    #[error("{0}")]
    StateConflict(String),
    #[error("invalid argument: {0}")]
    InvalidArgument(String),
}

impl TransportError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            TransportError::UnsupportedKind(_) | TransportError::MissingTool(_) => {
                ErrorKind::UnsupportedKind
            }
            TransportError::Network { .. } => ErrorKind::NetworkError,
            TransportError::StateConflict(_) => ErrorKind::StateConflict,
            TransportError::Io(_)
            | TransportError::Failed { .. }
            | TransportError::InvalidArgument(_) => ErrorKind::TransportError,
        }
    }
}
