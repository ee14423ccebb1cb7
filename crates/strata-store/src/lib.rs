//! On-disk state for Strata.
//!
//! This crate owns everything the engine persists besides working copies
//! themselves: the [`StateLayout`] of the state directory, the
//! [`WriteAheadLog`] that tracks overlays in the "being-added" state, the
//! orphan scanner, and the two derived configuration projections consumed by
//! the package manager ([`ReposConfWriter`] and [`ShellFragment`]).

pub mod layout;
pub mod orphans;
pub mod repos_conf;
pub mod shell_fragment;
pub mod wal;

pub use layout::{StateLayout, STATE_FORMAT_VERSION};
pub use orphans::scan_orphans;
pub use repos_conf::ReposConfWriter;
pub use shell_fragment::{ShellFragment, DISABLED_VAR, OVERLAY_VAR};
pub use wal::{clear_dir, RollbackStep, WalEntry, WalOpKind, WriteAheadLog};

use std::io::Write;
use std::path::Path;
use strata_catalog::CatalogError;
use thiserror::Error;

/// Fsync a directory to ensure that a preceding `rename()` is durable.
///
/// POSIX does not guarantee a rename survives a crash until the parent
/// directory itself has been synced.
pub(crate) fn fsync_dir(dir: &Path) -> Result<(), std::io::Error> {
    let f = std::fs::File::open(dir)?;
    f.sync_all()
}

/// Replace `path` with `bytes` via write-to-temp then rename.
///
/// Readers observe either the previous content or the new content, never a
/// truncated file. The parent directory is created when missing.
pub fn write_atomic(path: &Path, bytes: &[u8]) -> Result<(), StoreError> {
    let dir = match path.parent() {
        Some(p) if !p.as_os_str().is_empty() => p,
        _ => Path::new("."),
    };
    std::fs::create_dir_all(dir)?;
    let mut tmp = tempfile::NamedTempFile::new_in(dir)?;
    tmp.write_all(bytes)?;
    tmp.as_file().sync_all()?;
    tmp.persist(path).map_err(|e| StoreError::Io(e.error))?;
    fsync_dir(dir)?;
    Ok(())
}

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("store I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("state format version mismatch: expected {expected}, found {found}")]
    VersionMismatch { expected: u32, found: u32 },
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
    #[error(transparent)]
    Catalog(#[from] CatalogError),
    #[error("malformed shell fragment {path}: {reason}")]
    Fragment { path: String, reason: String },
    #[error("failed to write {path}: {reason}")]
    ConfigWrite { path: String, reason: String },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn store_error_display_version_mismatch() {
        let e = StoreError::VersionMismatch {
            expected: 2,
            found: 1,
        };
        let msg = e.to_string();
        assert!(msg.contains('2'));
        assert!(msg.contains('1'));
    }

    #[test]
    fn store_error_display_fragment() {
        let e = StoreError::Fragment {
            path: "/etc/portage/make.conf".to_owned(),
            reason: "no PORTDIR_OVERLAY assignment".to_owned(),
        };
        let msg = e.to_string();
        assert!(msg.contains("make.conf"));
        assert!(msg.contains("PORTDIR_OVERLAY"));
    }

    #[test]
    fn store_error_catalog_is_transparent() {
        let e = StoreError::from(CatalogError::NotFound("foo".to_owned()));
        assert_eq!(e.to_string(), "overlay not found: foo");
    }

    #[test]
    fn write_atomic_replaces_content() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("file.txt");
        write_atomic(&path, b"one").unwrap();
        write_atomic(&path, b"two").unwrap();
        assert_eq!(std::fs::read(&path).unwrap(), b"two");
        // No temp files left behind.
        assert_eq!(std::fs::read_dir(path.parent().unwrap()).unwrap().count(), 1);
    }
}
