use crate::TransportError;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use strata_catalog::SourceKind;

/// Per-kind tool settings. Option strings are split with shell quoting rules.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ToolSettings {
    /// Program to run instead of the kind's default.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub command: Option<String>,
    pub add_opts: String,
    pub sync_opts: String,
    /// Command run in the working copy after a successful add or sync.
    /// `%cwd=` is replaced by the working copy path.
    pub post_sync: String,
}

/// Transport settings, one `[transport.<kind>]` table per source kind.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TransportConfig {
    pub git_user: String,
    pub git_email: String,
    /// Pass quiet flags to tools that have them.
    pub quiet: bool,
    /// Delete downloaded archives after extraction.
    pub clean_archive: bool,
    /// Downloader for archive and image sources.
    pub fetch_command: String,
    pub timeout_secs: u64,
    #[serde(flatten)]
    pub tools: BTreeMap<String, ToolSettings>,
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            git_user: "strata".to_owned(),
            git_email: "strata@localhost".to_owned(),
            quiet: false,
            clean_archive: true,
            fetch_command: "curl".to_owned(),
            timeout_secs: 600,
            tools: BTreeMap::new(),
        }
    }
}

/// Program run for `kind` unless overridden.
pub fn default_command(kind: &SourceKind) -> &'static str {
    match kind {
        SourceKind::Git => "git",
        SourceKind::Mercurial => "hg",
        SourceKind::Bazaar => "bzr",
        SourceKind::Subversion => "svn",
        SourceKind::Cvs => "cvs",
        SourceKind::Darcs => "darcs",
        SourceKind::Rsync => "rsync",
        SourceKind::Tar => "tar",
        SourceKind::Archive => "bsdtar",
        SourceKind::Squashfs => "mount",
        SourceKind::GSorcery | SourceKind::Stub | SourceKind::Unknown(_) => "",
    }
}

fn split(kind: &SourceKind, what: &str, value: &str) -> Result<Vec<String>, TransportError> {
    shell_words::split(value).map_err(|e| {
        TransportError::InvalidArgument(format!("{what} for {kind} ({value:?}): {e}"))
    })
}

impl TransportConfig {
    pub fn settings(&self, kind: &SourceKind) -> ToolSettings {
        self.tools.get(kind.as_str()).cloned().unwrap_or_default()
    }

    pub fn command(&self, kind: &SourceKind) -> String {
        self.tools
            .get(kind.as_str())
            .and_then(|s| s.command.clone())
            .unwrap_or_else(|| default_command(kind).to_owned())
    }

    pub fn add_opts(&self, kind: &SourceKind) -> Result<Vec<String>, TransportError> {
        split(kind, "add_opts", &self.settings(kind).add_opts)
    }

    pub fn sync_opts(&self, kind: &SourceKind) -> Result<Vec<String>, TransportError> {
        split(kind, "sync_opts", &self.settings(kind).sync_opts)
    }

    /// The post-sync hook as argv, with `%cwd=` substituted. `None` if unset.
    pub fn post_sync(
        &self,
        kind: &SourceKind,
        cwd: &std::path::Path,
    ) -> Result<Option<Vec<String>>, TransportError> {
        let hook = self.settings(kind).post_sync;
        if hook.trim().is_empty() {
            return Ok(None);
        }
        let hook = hook.replace("%cwd=", &cwd.to_string_lossy());
        let argv = split(kind, "post_sync", &hook)?;
        Ok((!argv.is_empty()).then_some(argv))
    }

    pub fn quiet_flag(&self) -> Option<&'static str> {
        self.quiet.then_some("-q")
    }
}
