//! Overlay catalog model and catalog files for Strata.
//!
//! This crate defines the data layer: the `Overlay` record with its `Source`
//! alternatives, the name-addressed `Catalog`, pluggable on-disk formats
//! (`JsonFormat` canonical, `XmlFormat` for published feeds, `TomlFormat` for
//! hand-written definitions), the merge rules used when several feeds are
//! combined, and the `ErrorKind` taxonomy every other crate reports
//! per-overlay problems with.

pub mod catalog;
pub mod diagnostic;
pub mod format;
pub mod overlay;
pub mod xml;

pub use catalog::{
    list, load, load_installed, read_file, save, save_or_remove, save_with, select, Catalog, Loaded,
};
pub use diagnostic::{Diagnostic, ErrorKind};
pub use format::{detect, parse_document, CatalogFormat, JsonFormat, TomlFormat, FORMAT_VERSION};
pub use overlay::{
    validate_name, Overlay, Owner, Quality, Source, SourceKind, Status, DEFAULT_PRIORITY,
};
pub use xml::XmlFormat;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum CatalogError {
    #[error("catalog I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("corrupt catalog {origin}: {reason}")]
    Corrupt { origin: String, reason: String },
    #[error("invalid overlay '{name}': {reason}")]
    Invalid { name: String, reason: String },
    #[error("invalid overlay name {0}")]
    InvalidName(String),
    #[error("overlay not found: {0}")]
    NotFound(String),
    #[error("serialization error: {0}")]
    Serialization(String),
}

impl CatalogError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            CatalogError::NotFound(_) => ErrorKind::NotFound,
            _ => ErrorKind::Corrupt,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn catalog_error_display_corrupt() {
        let e = CatalogError::Corrupt {
            origin: "/tmp/feed.json".to_owned(),
            reason: "expected value".to_owned(),
        };
        let msg = e.to_string();
        assert!(msg.contains("/tmp/feed.json"));
        assert!(msg.contains("expected value"));
    }

    #[test]
    fn catalog_error_display_invalid() {
        let e = CatalogError::Invalid {
            name: "foo".to_owned(),
            reason: "no sources".to_owned(),
        };
        assert!(e.to_string().contains("foo"));
    }

    #[test]
    fn catalog_error_kinds() {
        assert_eq!(CatalogError::NotFound("x".to_owned()).kind(), ErrorKind::NotFound);
        assert_eq!(
            CatalogError::InvalidName("x".to_owned()).kind(),
            ErrorKind::Corrupt
        );
    }
}
