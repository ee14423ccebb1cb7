//! Archive transports (`tar` and the generic `archive` kind).
//!
//! A sync never touches the live tree until the new archive has been
//! extracted completely; the fresh tree is then swapped in by rename.

use crate::backend::{check_source, remove_tree, Target, Toolbox, Transport};
use crate::runner::Invocation;
use crate::TransportError;
use std::fs;
use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};
use strata_catalog::{Source, SourceKind};
use tracing::{debug, warn};

/// Filesystem path for `file://` URLs and bare absolute paths.
pub(crate) fn local_path(url: &str) -> Option<PathBuf> {
    if let Some(rest) = url.strip_prefix("file://") {
        return Some(PathBuf::from(rest));
    }
    url.starts_with('/').then(|| PathBuf::from(url))
}

/// Download `url` to `dest` with the configured fetch command.
pub(crate) fn download(toolbox: &Toolbox, url: &str, dest: &Path) -> Result<(), TransportError> {
    let config = &toolbox.config;
    let inv = Invocation::new(config.fetch_command.as_str())
        .args(["-fsSL", "--max-time"])
        .arg(config.timeout_secs.to_string())
        .arg("-o")
        .path_arg(dest)
        .arg(url);
    if let Err(e) = toolbox.run(inv) {
        let _ = fs::remove_file(dest);
        return Err(e);
    }
    Ok(())
}

struct Package {
    path: PathBuf,
    downloaded: bool,
}

pub struct ArchiveTransport {
    kind: SourceKind,
    toolbox: Toolbox,
}

impl ArchiveTransport {
    pub fn new(kind: SourceKind, toolbox: Toolbox) -> Self {
        Self { kind, toolbox }
    }

    fn program(&self) -> String {
        self.toolbox.config.command(&self.kind)
    }

    /// Where a downloaded package is kept: `<storage>/.<name><ext>`.
    fn package_path(target: &Target<'_>) -> PathBuf {
        let ext = target.source.archive_extension().unwrap_or(".archive");
        target.storage.join(format!(".{}{ext}", target.name))
    }

    fn obtain(&self, target: &Target<'_>) -> Result<Package, TransportError> {
        if let Some(path) = local_path(&target.source.url) {
            if !path.is_file() {
                return Err(TransportError::InvalidArgument(format!(
                    "archive {} does not exist",
                    path.display()
                )));
            }
            return Ok(Package {
                path,
                downloaded: false,
            });
        }
        let path = Self::package_path(target);
        download(&self.toolbox, &target.source.url, &path)?;
        Ok(Package {
            path,
            downloaded: true,
        })
    }

    /// Extract `package` and move the selected tree onto the target path.
    fn install_tree(&self, target: &Target<'_>, package: &Path) -> Result<(), TransportError> {
        let scratch = tempfile::Builder::new()
            .prefix(&format!(".{}-", target.name))
            .tempdir_in(target.storage)?;
        let tree = scratch.path().join("tree");
        fs::create_dir(&tree)?;

        let inv = Invocation::new(self.program())
            .arg("-x")
            .args(self.toolbox.config.add_opts(&self.kind)?)
            .arg("-f")
            .path_arg(package)
            .arg("-C")
            .path_arg(&tree);
        self.toolbox.run(inv)?;

        let source = target.source;
        let root = match source.subpath.as_deref().or(source.branch.as_deref()) {
            Some(sub) => {
                let root = tree.join(sub);
                if !root.is_dir() {
                    return Err(TransportError::InvalidArgument(format!(
                        "'{sub}' does not exist in archive {}",
                        source.url
                    )));
                }
                root
            }
            None => tree,
        };

        let dest = target.path();
        let aside = scratch.path().join("previous");
        let had_previous = dest.exists();
        if had_previous {
            fs::rename(&dest, &aside)?;
        }
        if let Err(e) = fs::rename(&root, &dest) {
            if had_previous {
                let _ = fs::rename(&aside, &dest);
            }
            return Err(e.into());
        }
        fs::set_permissions(&dest, fs::Permissions::from_mode(0o755))?;
        debug!("installed {} from {}", dest.display(), package.display());
        // `scratch` drops here, taking the previous tree with it.
        Ok(())
    }

    fn refresh(&self, target: &Target<'_>) -> Result<(), TransportError> {
        check_source(target.source)?;
        let package = self.obtain(target)?;
        let result = self.install_tree(target, &package.path);
        if package.downloaded && self.toolbox.config.clean_archive {
            if let Err(e) = fs::remove_file(&package.path) {
                warn!("cannot remove {}: {e}", package.path.display());
            }
        }
        result
    }
}

impl Transport for ArchiveTransport {
    fn kind(&self) -> SourceKind {
        self.kind.clone()
    }

    fn required_tools(&self, source: &Source) -> Vec<String> {
        let mut tools = vec![self.program()];
        if local_path(&source.url).is_none() {
            tools.push(self.toolbox.config.fetch_command.clone());
        }
        tools
    }

    fn add(&self, target: &Target<'_>) -> Result<(), TransportError> {
        self.refresh(target)
    }

    fn sync(&self, target: &Target<'_>) -> Result<(), TransportError> {
        self.refresh(target)
    }

    fn delete(&self, target: &Target<'_>) -> Result<(), TransportError> {
        remove_tree(&target.path())?;
        remove_tree(&Self::package_path(target))?;
        Ok(())
    }
}
