//! Error taxonomy shared by every layer that reports per-overlay outcomes.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Classification of a per-overlay or per-file problem.
///
/// Kinds are not Rust error types: each crate keeps its own error enum and
/// maps onto one of these through a `kind()` method.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ErrorKind {
    NotFound,
    DuplicateOverlay,
    UnsupportedKind,
    NetworkError,
    TransportError,
    StateConflict,
    SourceDrift,
    Busy,
    Cancelled,
    Corrupt,
}

impl ErrorKind {
    pub fn as_str(self) -> &'static str {
        match self {
            ErrorKind::NotFound => "NotFound",
            ErrorKind::DuplicateOverlay => "DuplicateOverlay",
            ErrorKind::UnsupportedKind => "UnsupportedKind",
            ErrorKind::NetworkError => "NetworkError",
            ErrorKind::TransportError => "TransportError",
            ErrorKind::StateConflict => "StateConflict",
            ErrorKind::SourceDrift => "SourceDrift",
            ErrorKind::Busy => "Busy",
            ErrorKind::Cancelled => "Cancelled",
            ErrorKind::Corrupt => "Corrupt",
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A classified message about one subject: an overlay name, or a file/feed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Diagnostic {
    pub name: String,
    pub kind: ErrorKind,
    pub message: String,
}

impl Diagnostic {
    pub fn new(name: impl Into<String>, kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            kind,
            message: message.into(),
        }
    }
}

impl fmt::Display for Diagnostic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} [{}]: {}", self.name, self.kind, self.message)
    }
}
