use crate::backend::{Toolbox, Transport};
use std::fmt;
use strata_catalog::Source;

/// A missing external tool with actionable install instructions.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MissingTool {
    pub name: String,
    pub purpose: &'static str,
    pub install_hint: &'static str,
}

impl fmt::Display for MissingTool {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "  - {}: {} (install: {})",
            self.name, self.purpose, self.install_hint
        )
    }
}

fn describe(program: &str) -> (&'static str, &'static str) {
    let base = program.rsplit('/').next().unwrap_or(program);
    match base {
        "git" => ("git overlays", "dev-vcs/git"),
        "hg" => ("mercurial overlays", "dev-vcs/mercurial"),
        "bzr" => ("bazaar overlays", "dev-vcs/breezy"),
        "svn" => ("subversion overlays", "dev-vcs/subversion"),
        "cvs" => ("cvs overlays", "dev-vcs/cvs"),
        "darcs" => ("darcs overlays", "dev-vcs/darcs"),
        "rsync" => ("rsync overlays", "net-misc/rsync"),
        "tar" => ("tar overlays", "app-arch/tar"),
        "bsdtar" => ("archive overlays", "app-arch/libarchive"),
        "mount" | "umount" => ("squashfs overlays", "sys-apps/util-linux"),
        "curl" => ("downloading archives and images", "net-misc/curl"),
        _ => ("this overlay's source", "see the overlay's documentation"),
    }
}

/// Tools `transport` needs for `source` that are not installed.
/// An empty list means all prerequisites are met.
pub fn check_tools(transport: &dyn Transport, source: &Source, toolbox: &Toolbox) -> Vec<MissingTool> {
    transport
        .required_tools(source)
        .into_iter()
        .filter(|tool| !toolbox.runner.tool_exists(tool))
        .map(|name| {
            let (purpose, install_hint) = describe(&name);
            MissingTool {
                name,
                purpose,
                install_hint,
            }
        })
        .collect()
}

/// Format a list of missing tools into a user-facing message.
pub fn format_missing(missing: &[MissingTool]) -> String {
    use std::fmt::Write as _;
    let mut msg = String::from("missing tools:");
    for m in missing {
        let _ = write!(msg, "\n{m}");
    }
    msg
}
