use crate::backend::{check_source, Target, Toolbox, Transport};
use crate::runner::Invocation;
use crate::TransportError;
use std::fs;
use strata_catalog::{Source, SourceKind};

/// Options every rsync mirror run starts with.
const BASE_OPTS: &[&str] = &[
    "-rlptDvz",
    "--progress",
    "--delete",
    "--delete-after",
    "--timeout=180",
    "--exclude=distfiles/*",
    "--exclude=local/*",
    "--exclude=packages/*",
];

/// Mirrors a remote tree with `rsync`. Adding is a sync into a fresh directory.
pub struct RsyncTransport {
    toolbox: Toolbox,
}

impl RsyncTransport {
    pub fn new(toolbox: Toolbox) -> Self {
        Self { toolbox }
    }

    fn program(&self) -> String {
        self.toolbox.config.command(&SourceKind::Rsync)
    }
}

impl Transport for RsyncTransport {
    fn kind(&self) -> SourceKind {
        SourceKind::Rsync
    }

    fn required_tools(&self, _source: &Source) -> Vec<String> {
        vec![self.program()]
    }

    fn add(&self, target: &Target<'_>) -> Result<(), TransportError> {
        check_source(target.source)?;
        fs::create_dir_all(target.path())?;
        self.sync(target)
    }

    fn sync(&self, target: &Target<'_>) -> Result<(), TransportError> {
        check_source(target.source)?;
        let config = &self.toolbox.config;
        // A trailing slash copies the contents rather than the directory itself.
        let mut url = target.source.url.clone();
        if !url.ends_with('/') {
            url.push('/');
        }
        let inv = Invocation::new(self.program())
            .args(BASE_OPTS.iter().copied())
            .args(config.quiet_flag())
            .args(config.sync_opts(&SourceKind::Rsync)?)
            .arg(url)
            .path_arg(&target.path());
        self.toolbox.run(inv)?;
        Ok(())
    }
}
