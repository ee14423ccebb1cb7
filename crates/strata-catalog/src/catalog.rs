use crate::diagnostic::{Diagnostic, ErrorKind};
use crate::format::{parse_document, CatalogFormat, JsonFormat};
use crate::overlay::Overlay;
use crate::CatalogError;
use std::collections::{BTreeMap, HashMap};
use std::fs;
use std::io::Write;
use std::path::Path;
use tempfile::NamedTempFile;
use tracing::{debug, warn};

/// A set of overlays addressable by name, iterated in name order.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Catalog {
    overlays: BTreeMap<String, Overlay>,
}

impl Catalog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.overlays.len()
    }

    pub fn is_empty(&self) -> bool {
        self.overlays.is_empty()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.overlays.contains_key(name)
    }

    pub fn get(&self, name: &str) -> Option<&Overlay> {
        self.overlays.get(name)
    }

    /// Insert or replace, returning the previous record.
    pub fn insert(&mut self, overlay: Overlay) -> Option<Overlay> {
        self.overlays.insert(overlay.name.clone(), overlay)
    }

    pub fn remove(&mut self, name: &str) -> Option<Overlay> {
        self.overlays.remove(name)
    }

    pub fn iter(&self) -> impl Iterator<Item = &Overlay> {
        self.overlays.values()
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.overlays.keys().map(String::as_str)
    }
}

impl FromIterator<Overlay> for Catalog {
    fn from_iter<I: IntoIterator<Item = Overlay>>(iter: I) -> Self {
        let mut catalog = Catalog::new();
        for overlay in iter {
            catalog.insert(overlay);
        }
        catalog
    }
}

/// Result of merging several catalog files.
#[derive(Debug, Default)]
pub struct Loaded {
    pub catalog: Catalog,
    pub warnings: Vec<Diagnostic>,
}

fn with_origin(err: CatalogError, origin: &Path) -> CatalogError {
    match err {
        CatalogError::Corrupt { reason, .. } => CatalogError::Corrupt {
            origin: origin.display().to_string(),
            reason,
        },
        other => other,
    }
}

/// Read and parse one catalog file without validating its overlays.
pub fn read_file(path: &Path) -> Result<Vec<Overlay>, CatalogError> {
    let bytes = fs::read(path).map_err(|e| CatalogError::Corrupt {
        origin: path.display().to_string(),
        reason: e.to_string(),
    })?;
    parse_document(&bytes).map_err(|e| with_origin(e, path))
}

/// Merge catalog files in order. The first definition of a name wins.
///
/// A file that cannot be read or parsed is skipped with a `Corrupt` warning,
/// as is any single overlay that fails validation.
pub fn load<P: AsRef<Path>>(paths: &[P]) -> Loaded {
    let mut loaded = Loaded::default();
    let mut origins: HashMap<String, String> = HashMap::new();

    for path in paths {
        let path = path.as_ref();
        let overlays = match read_file(path) {
            Ok(xs) => xs,
            Err(e) => {
                warn!("skipping catalog {}: {e}", path.display());
                loaded.warnings.push(Diagnostic::new(
                    path.display().to_string(),
                    ErrorKind::Corrupt,
                    e.to_string(),
                ));
                continue;
            }
        };
        debug!("read {} overlays from {}", overlays.len(), path.display());

        for overlay in overlays {
            if let Err(e) = overlay.validate() {
                warn!("skipping overlay in {}: {e}", path.display());
                let subject = if overlay.name.is_empty() {
                    path.display().to_string()
                } else {
                    overlay.name.clone()
                };
                loaded.warnings.push(Diagnostic::new(
                    subject,
                    ErrorKind::Corrupt,
                    format!("{}: {e}", path.display()),
                ));
                continue;
            }
            if let Some(first) = origins.get(&overlay.name) {
                loaded.warnings.push(Diagnostic::new(
                    overlay.name.clone(),
                    ErrorKind::DuplicateOverlay,
                    format!(
                        "overlay '{}' from {} ignored, already defined by {first}",
                        overlay.name,
                        path.display()
                    ),
                ));
                continue;
            }
            origins.insert(overlay.name.clone(), path.display().to_string());
            loaded.catalog.insert(overlay);
        }
    }

    loaded
}

/// Load the installed catalog strictly: a missing file is an empty catalog,
/// a file that does not parse is an error.
pub fn load_installed(path: &Path) -> Result<Catalog, CatalogError> {
    if !path.exists() {
        return Ok(Catalog::new());
    }
    let mut catalog = Catalog::new();
    for overlay in read_file(path)? {
        if let Err(e) = overlay.validate() {
            warn!("installed overlay no longer validates: {e}");
        }
        if catalog.contains(&overlay.name) {
            warn!(
                "duplicate installed entry '{}' in {}, keeping the first",
                overlay.name,
                path.display()
            );
            continue;
        }
        catalog.insert(overlay);
    }
    Ok(catalog)
}

/// Write `catalog` atomically in the canonical format.
pub fn save(catalog: &Catalog, path: &Path) -> Result<(), CatalogError> {
    save_with(catalog, path, &JsonFormat)
}

pub fn save_with(
    catalog: &Catalog,
    path: &Path,
    format: &dyn CatalogFormat,
) -> Result<(), CatalogError> {
    let overlays: Vec<Overlay> = catalog.iter().cloned().collect();
    let content = format.write(&overlays)?;

    let dir = match path.parent() {
        Some(p) if !p.as_os_str().is_empty() => p,
        _ => Path::new("."),
    };
    fs::create_dir_all(dir)?;
    let mut tmp = NamedTempFile::new_in(dir)?;
    tmp.write_all(&content)?;
    tmp.as_file().sync_all()?;
    tmp.persist(path).map_err(|e| CatalogError::Io(e.error))?;
    fs::File::open(dir)?.sync_all()?;
    debug!("saved {} overlays to {}", catalog.len(), path.display());
    Ok(())
}

/// Like [`save`], but an empty catalog removes the file instead of leaving
/// an empty document behind. A missing file is not an error.
pub fn save_or_remove(catalog: &Catalog, path: &Path) -> Result<(), CatalogError> {
    if !catalog.is_empty() {
        return save(catalog, path);
    }
    match fs::remove_file(path) {
        Ok(()) => {
            debug!("removed empty catalog {}", path.display());
            Ok(())
        }
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(e.into()),
    }
}

pub fn select<'a>(catalog: &'a Catalog, name: &str) -> Result<&'a Overlay, CatalogError> {
    catalog
        .get(name)
        .ok_or_else(|| CatalogError::NotFound(name.to_owned()))
}

pub fn list(catalog: &Catalog) -> Vec<&Overlay> {
    catalog.iter().collect()
}
