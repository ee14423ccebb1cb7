use crate::config::TransportConfig;
use crate::runner::{Invocation, SystemRunner, ToolOutput, ToolRunner};
use crate::TransportError;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use strata_catalog::{Source, SourceKind};
use tracing::debug;

/// The working copy an operation acts on.
#[derive(Debug, Clone, Copy)]
pub struct Target<'a> {
    pub name: &'a str,
    pub storage: &'a Path,
    pub source: &'a Source,
}

impl<'a> Target<'a> {
    pub fn new(name: &'a str, storage: &'a Path, source: &'a Source) -> Self {
        Self {
            name,
            storage,
            source,
        }
    }

    /// `<storage>/<name>`
    pub fn path(&self) -> PathBuf {
        self.storage.join(self.name)
    }

    /// The same working copy with a different source.
    #[must_use]
    pub fn with_source(&self, source: &'a Source) -> Self {
        Self { source, ..*self }
    }
}

pub trait Transport: Send + Sync {
    fn kind(&self) -> SourceKind;

    /// Programs that must be installed to handle `source`.
    fn required_tools(&self, source: &Source) -> Vec<String>;

    /// Create the working copy. The target directory is absent or empty.
    fn add(&self, target: &Target<'_>) -> Result<(), TransportError>;

    /// Bring an existing working copy up to date with its source.
    fn sync(&self, target: &Target<'_>) -> Result<(), TransportError>;

    /// Point an existing working copy at `target.source` in place.
    ///
    /// Returns `false` when this kind can only change source by being
    /// deleted and added again.
    fn update_url(&self, _target: &Target<'_>, _old: &Source) -> Result<bool, TransportError> {
        Ok(false)
    }

    fn delete(&self, target: &Target<'_>) -> Result<(), TransportError> {
        remove_tree(&target.path())?;
        Ok(())
    }
}

/// Shared configuration and tool runner handed to every backend.
#[derive(Clone)]
pub struct Toolbox {
    pub config: Arc<TransportConfig>,
    pub runner: Arc<dyn ToolRunner>,
}

impl Toolbox {
    pub fn new(config: TransportConfig, runner: Arc<dyn ToolRunner>) -> Self {
        Self {
            config: Arc::new(config),
            runner,
        }
    }

    pub fn system(config: TransportConfig) -> Self {
        Self::new(config, Arc::new(SystemRunner))
    }

    /// Run `invocation` and require a zero exit status.
    pub fn run(&self, invocation: Invocation) -> Result<ToolOutput, TransportError> {
        debug!("run: {}", invocation.display());
        let output = match self.runner.run(&invocation) {
            Ok(output) => output,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(TransportError::MissingTool(format!(
                    "{}: command not found",
                    invocation.program
                )));
            }
            Err(e) => return Err(e.into()),
        };
        if output.success() {
            return Ok(output);
        }
        let message = if output.stderr.trim().is_empty() {
            output.stdout.trim().to_owned()
        } else {
            output.stderr.trim().to_owned()
        };
        if is_network_failure(&message) {
            return Err(TransportError::Network {
                tool: invocation.program,
                message,
            });
        }
        Err(TransportError::Failed {
            tool: invocation.program,
            code: output.code,
            message,
        })
    }
}

/// Compile-time registry of backends, keyed by source kind.
pub fn select_transport(
    kind: &SourceKind,
    toolbox: &Toolbox,
) -> Result<Box<dyn Transport>, TransportError> {
    use crate::vcs::{Vcs, VcsTransport};
    let tb = toolbox.clone();
    match kind {
        SourceKind::Git => Ok(Box::new(VcsTransport::new(Vcs::Git, tb))),
        SourceKind::Mercurial => Ok(Box::new(VcsTransport::new(Vcs::Mercurial, tb))),
        SourceKind::Bazaar => Ok(Box::new(VcsTransport::new(Vcs::Bazaar, tb))),
        SourceKind::Subversion => Ok(Box::new(VcsTransport::new(Vcs::Subversion, tb))),
        SourceKind::Cvs => Ok(Box::new(VcsTransport::new(Vcs::Cvs, tb))),
        SourceKind::Darcs => Ok(Box::new(VcsTransport::new(Vcs::Darcs, tb))),
        SourceKind::Rsync => Ok(Box::new(crate::rsync::RsyncTransport::new(tb))),
        SourceKind::Tar | SourceKind::Archive => Ok(Box::new(
            crate::archive::ArchiveTransport::new(kind.clone(), tb),
        )),
        SourceKind::Squashfs => Ok(Box::new(crate::squashfs::SquashfsTransport::new(tb))),
        SourceKind::GSorcery => Ok(Box::new(crate::gsorcery::GSorceryTransport::new(tb))),
        SourceKind::Stub => Ok(Box::new(crate::stub::StubTransport::new())),
        SourceKind::Unknown(tag) => Err(TransportError::UnsupportedKind(tag.clone())),
    }
}

/// Reject values that a tool could parse as an option or that break argv.
pub(crate) fn check_arg(what: &str, value: &str) -> Result<(), TransportError> {
    if value.starts_with('-') {
        return Err(TransportError::InvalidArgument(format!(
            "{what} '{value}' must not start with '-'"
        )));
    }
    if value.contains(['\0', '\n', '\r']) {
        return Err(TransportError::InvalidArgument(format!(
            "{what} {value:?} contains a control character"
        )));
    }
    Ok(())
}

pub(crate) fn check_source(source: &Source) -> Result<(), TransportError> {
    check_arg("URL", &source.url)?;
    if let Some(branch) = &source.branch {
        check_arg("branch", branch)?;
    }
    if let Some(subpath) = &source.subpath {
        check_arg("subpath", subpath)?;
        if Path::new(subpath)
            .components()
            .any(|c| matches!(c, std::path::Component::ParentDir | std::path::Component::RootDir))
        {
            return Err(TransportError::InvalidArgument(format!(
                "subpath '{subpath}' must stay inside the source"
            )));
        }
    }
    Ok(())
}

const NETWORK_MARKERS: &[&str] = &[
    "could not resolve",
    "couldn't resolve",
    "name or service not known",
    "temporary failure in name resolution",
    "unable to look up",
    "connection refused",
    "connection timed out",
    "operation timed out",
    "network is unreachable",
    "no route to host",
    "failed to connect",
    "unable to connect",
    "connection reset",
];

/// Whether a tool's error output describes a resolution or connection failure.
pub fn is_network_failure(message: &str) -> bool {
    let lower = message.to_ascii_lowercase();
    NETWORK_MARKERS.iter().any(|m| lower.contains(m))
}

/// Remove a file, symlink or directory tree. A missing path is not an error.
pub(crate) fn remove_tree(path: &Path) -> std::io::Result<()> {
    match fs::symlink_metadata(path) {
        Ok(meta) if meta.is_dir() => fs::remove_dir_all(path),
        Ok(_) => fs::remove_file(path),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(e),
    }
}
