//! Version-control transports: git, mercurial, bazaar, subversion, cvs, darcs.

use crate::backend::{check_source, Target, Toolbox, Transport};
use crate::runner::Invocation;
use crate::TransportError;
use ini::{EscapePolicy, Ini, LineSeparator, WriteOption};
use strata_catalog::{Source, SourceKind};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Vcs {
    Git,
    Mercurial,
    Bazaar,
    Subversion,
    Cvs,
    Darcs,
}

impl Vcs {
    pub fn kind(self) -> SourceKind {
        match self {
            Vcs::Git => SourceKind::Git,
            Vcs::Mercurial => SourceKind::Mercurial,
            Vcs::Bazaar => SourceKind::Bazaar,
            Vcs::Subversion => SourceKind::Subversion,
            Vcs::Cvs => SourceKind::Cvs,
            Vcs::Darcs => SourceKind::Darcs,
        }
    }
}

pub struct VcsTransport {
    vcs: Vcs,
    toolbox: Toolbox,
}

impl VcsTransport {
    pub fn new(vcs: Vcs, toolbox: Toolbox) -> Self {
        Self { vcs, toolbox }
    }

    fn program(&self) -> String {
        self.toolbox.config.command(&self.vcs.kind())
    }

    fn quiet(&self) -> Option<&'static str> {
        self.toolbox.config.quiet_flag()
    }

    fn add_opts(&self) -> Result<Vec<String>, TransportError> {
        self.toolbox.config.add_opts(&self.vcs.kind())
    }

    fn sync_opts(&self) -> Result<Vec<String>, TransportError> {
        self.toolbox.config.sync_opts(&self.vcs.kind())
    }

    fn cvs_module<'s>(source: &'s Source) -> Result<&'s str, TransportError> {
        source.subpath.as_deref().ok_or_else(|| {
            TransportError::InvalidArgument(format!(
                "cvs source '{}' needs a subpath naming the module",
                source.url
            ))
        })
    }

    fn rewrite_hgrc(target: &Target<'_>) -> Result<(), TransportError> {
        let hgrc = target.path().join(".hg").join("hgrc");
        let mut conf = if hgrc.exists() {
            Ini::load_from_file(&hgrc).map_err(|e| {
                TransportError::StateConflict(format!("unreadable {}: {e}", hgrc.display()))
            })?
        } else {
            Ini::new()
        };
        conf.set_to(Some("paths"), "default".to_owned(), target.source.url.clone());
        let mut out = Vec::new();
        conf.write_to_opt(
            &mut out,
            WriteOption {
                escape_policy: EscapePolicy::Nothing,
                line_separator: LineSeparator::CR,
                kv_separator: " = ",
            },
        )?;
        strata_store::write_atomic(&hgrc, &out)
            .map_err(|e| TransportError::StateConflict(format!("cannot write {}: {e}", hgrc.display())))
    }
}

impl Transport for VcsTransport {
    fn kind(&self) -> SourceKind {
        self.vcs.kind()
    }

    fn required_tools(&self, _source: &Source) -> Vec<String> {
        vec![self.program()]
    }

    fn add(&self, target: &Target<'_>) -> Result<(), TransportError> {
        check_source(target.source)?;
        let src = target.source;
        let path = target.path();
        let branch = src.branch.as_deref();

        let inv = match self.vcs {
            Vcs::Git | Vcs::Mercurial => {
                let mut inv = Invocation::new(self.program())
                    .arg("clone")
                    .args(self.quiet())
                    .args(self.add_opts()?);
                if let Some(b) = branch {
                    inv = inv.args(["-b", b]);
                }
                inv.arg(src.url.as_str()).path_arg(&path)
            }
            Vcs::Bazaar => Invocation::new(self.program())
                .arg("branch")
                .args(self.add_opts()?)
                .arg(src.url.as_str())
                .path_arg(&path),
            Vcs::Subversion => Invocation::new(self.program())
                .arg("co")
                .args(self.quiet())
                .args(self.add_opts()?)
                // Trailing '@' keeps an '@' inside the URL from being read as a peg revision.
                .arg(format!("{}@", src.url))
                .path_arg(&path),
            Vcs::Cvs => {
                let module = Self::cvs_module(src)?;
                Invocation::new(self.program())
                    .current_dir(target.storage)
                    .env("CVSROOT", src.url.as_str())
                    .args(self.quiet())
                    .arg("co")
                    .args(self.add_opts()?)
                    .args(["-d", target.name, module])
            }
            Vcs::Darcs => Invocation::new(self.program())
                .arg("get")
                .args(self.add_opts()?)
                .arg(src.url.as_str())
                .path_arg(&path),
        };
        self.toolbox.run(inv)?;

        if self.vcs == Vcs::Git {
            let config = &self.toolbox.config;
            for (key, value) in [("user.name", &config.git_user), ("user.email", &config.git_email)] {
                self.toolbox.run(
                    Invocation::new(self.program())
                        .current_dir(&path)
                        .args(["config", key, value.as_str()]),
                )?;
            }
        }
        Ok(())
    }

    fn sync(&self, target: &Target<'_>) -> Result<(), TransportError> {
        check_source(target.source)?;
        let src = target.source;
        let path = target.path();
        let inv = match self.vcs {
            Vcs::Git => Invocation::new(self.program())
                .current_dir(&path)
                .arg("pull")
                .args(self.quiet())
                .args(self.sync_opts()?),
            Vcs::Mercurial => Invocation::new(self.program())
                .current_dir(&path)
                .args(["pull", "-u"])
                .args(self.sync_opts()?)
                .arg(src.url.as_str()),
            Vcs::Bazaar => Invocation::new(self.program())
                .current_dir(&path)
                .args(["pull", "--overwrite"])
                .args(self.sync_opts()?)
                .arg(src.url.as_str()),
            Vcs::Subversion => Invocation::new(self.program())
                .arg("up")
                .args(self.quiet())
                .args(self.sync_opts()?)
                .path_arg(&path),
            Vcs::Cvs => Invocation::new(self.program())
                .current_dir(&path)
                .args(self.quiet())
                .args(["update", "-d"])
                .args(self.sync_opts()?),
            Vcs::Darcs => Invocation::new(self.program())
                .current_dir(&path)
                .args(["pull", "--all"])
                .args(self.sync_opts()?)
                .arg(src.url.as_str()),
        };
        self.toolbox.run(inv)?;
        Ok(())
    }

    fn update_url(&self, target: &Target<'_>, old: &Source) -> Result<bool, TransportError> {
        check_source(target.source)?;
        let path = target.path();
        let new_url = target.source.url.as_str();
        match self.vcs {
            Vcs::Git => {
                self.toolbox.run(
                    Invocation::new(self.program())
                        .current_dir(&path)
                        .args(["remote", "set-url", "origin", new_url, old.url.as_str()]),
                )?;
            }
            Vcs::Mercurial => Self::rewrite_hgrc(target)?,
            Vcs::Bazaar => {
                self.toolbox.run(
                    Invocation::new(self.program())
                        .current_dir(&path)
                        .args(["bind", new_url]),
                )?;
            }
            Vcs::Subversion => {
                self.toolbox.run(
                    Invocation::new(self.program())
                        .args(["relocate", new_url])
                        .path_arg(&path),
                )?;
            }
            // The CVSROOT is recorded in every CVS/Root file.
            Vcs::Cvs => return Ok(false),
            // darcs pull names the URL explicitly.
            Vcs::Darcs => {}
        }
        Ok(true)
    }
}
