use crate::layout::StateLayout;
use crate::StoreError;
use std::collections::HashSet;
use std::fs;
use strata_catalog::Catalog;
use tracing::debug;

/// Directories under storage with no installed catalog entry, sorted by name.
///
/// Hidden entries (the state directory, kept archives, extraction scratch
/// space) and plain files are never overlays. Names in `pending` are in the
/// "being-added" state and are not orphans.
pub fn scan_orphans(
    layout: &StateLayout,
    installed: &Catalog,
    pending: &[String],
) -> Result<Vec<String>, StoreError> {
    let storage = layout.storage();
    if !storage.exists() {
        return Ok(Vec::new());
    }
    let pending: HashSet<&str> = pending.iter().map(String::as_str).collect();

    let mut orphans = Vec::new();
    for entry in fs::read_dir(storage)? {
        let entry = entry?;
        let path = entry.path();
        if path == layout.state_dir() || !entry.file_type()?.is_dir() {
            continue;
        }
        let Some(name) = entry.file_name().to_str().map(str::to_owned) else {
            continue;
        };
        if name.starts_with('.') || installed.contains(&name) || pending.contains(name.as_str()) {
            continue;
        }
        debug!("orphan working copy: {}", path.display());
        orphans.push(name);
    }
    orphans.sort();
    Ok(orphans)
}
