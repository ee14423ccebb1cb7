//! Working-copy operations layered over a [`Transport`].
//!
//! These functions own the policy shared by every backend: prerequisite
//! checks, refusing to clobber an existing tree, cleanup after a failed add,
//! falling back to delete-and-add when a source cannot be re-pointed in place,
//! and running the post-sync hook.

use crate::backend::{remove_tree, Target, Toolbox, Transport};
use crate::prereq::{check_tools, format_missing};
use crate::runner::Invocation;
use crate::TransportError;
use std::fs;
use std::io;
use std::path::Path;
use strata_catalog::Source;
use tracing::{info, warn};

/// Result of [`remove`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Removal {
    Removed,
    /// Nothing was on disk.
    Missing,
}

fn is_populated(path: &Path) -> bool {
    fs::read_dir(path)
        .map(|mut entries| entries.next().is_some())
        .unwrap_or(false)
}

fn ensure_tools(transport: &dyn Transport, toolbox: &Toolbox, source: &Source) -> Result<(), TransportError> {
    let missing = check_tools(transport, source, toolbox);
    if missing.is_empty() {
        Ok(())
    } else {
        Err(TransportError::MissingTool(format_missing(&missing)))
    }
}

/// Run the kind's post-sync hook in the working copy. Failures are returned
/// as warnings and never fail the operation.
fn run_hook(transport: &dyn Transport, toolbox: &Toolbox, target: &Target<'_>) -> Vec<String> {
    let path = target.path();
    let argv = match toolbox.config.post_sync(&transport.kind(), &path) {
        Ok(Some(argv)) => argv,
        Ok(None) => return Vec::new(),
        Err(e) => return vec![format!("post-sync hook for {} not run: {e}", target.name)],
    };
    let mut parts = argv.into_iter();
    let Some(program) = parts.next() else {
        return Vec::new();
    };
    let inv = Invocation::new(program).args(parts).current_dir(&path);
    match toolbox.run(inv) {
        Ok(_) => Vec::new(),
        Err(e) => vec![format!("post-sync hook for {} failed: {e}", target.name)],
    }
}

/// Create the working copy for `target`.
///
/// The target directory must be absent or empty. If the backend fails, the
/// directory is put back the way it was found. Returns hook warnings.
pub fn install(
    transport: &dyn Transport,
    toolbox: &Toolbox,
    target: &Target<'_>,
) -> Result<Vec<String>, TransportError> {
    ensure_tools(transport, toolbox, target.source)?;

    let path = target.path();
    let existed_empty = match fs::read_dir(&path) {
        Ok(mut entries) => {
            if entries.next().is_some() {
                return Err(TransportError::StateConflict(format!(
                    "{} already exists and is not empty",
                    path.display()
                )));
            }
            true
        }
        Err(e) if e.kind() == io::ErrorKind::NotFound => false,
        Err(e) => return Err(e.into()),
    };

    let result = transport.add(target).and_then(|()| {
        if is_populated(&path) {
            Ok(())
        } else {
            Err(TransportError::Failed {
                tool: transport.kind().to_string(),
                code: 0,
                message: format!("no working copy was created at {}", path.display()),
            })
        }
    });
    if let Err(e) = result {
        let cleanup = if existed_empty {
            strata_store::clear_dir(&path)
        } else {
            remove_tree(&path)
        };
        if let Err(ce) = cleanup {
            warn!("cleanup of {} failed: {ce}", path.display());
        }
        return Err(e);
    }

    info!("installed {} ({})", target.name, transport.kind());
    Ok(run_hook(transport, toolbox, target))
}

/// Bring the working copy up to date, re-creating it if it has gone missing.
pub fn update(
    transport: &dyn Transport,
    toolbox: &Toolbox,
    target: &Target<'_>,
) -> Result<Vec<String>, TransportError> {
    if !is_populated(&target.path()) {
        warn!("{} has no working copy, adding it again", target.name);
        return install(transport, toolbox, target);
    }
    ensure_tools(transport, toolbox, target.source)?;
    transport.sync(target)?;
    Ok(run_hook(transport, toolbox, target))
}

/// Move the working copy from `old_source` to `target.source`, then sync.
///
/// Same-kind sources are re-pointed in place when the backend supports it;
/// otherwise the old tree is deleted and the new source added.
pub fn repoint(
    old: &dyn Transport,
    new: &dyn Transport,
    toolbox: &Toolbox,
    target: &Target<'_>,
    old_source: &Source,
) -> Result<Vec<String>, TransportError> {
    if old.kind() == new.kind() && is_populated(&target.path()) {
        ensure_tools(new, toolbox, target.source)?;
        if new.update_url(target, old_source)? {
            info!("re-pointed {} to {}", target.name, target.source.url);
            new.sync(target)?;
            return Ok(run_hook(new, toolbox, target));
        }
    }
    replace(Some(old), new, toolbox, target, old_source)
}

/// Delete the working copy of `old_source` and add `target.source` in its
/// place. `old` is `None` when no backend handles the old kind any more.
pub fn replace(
    old: Option<&dyn Transport>,
    new: &dyn Transport,
    toolbox: &Toolbox,
    target: &Target<'_>,
    old_source: &Source,
) -> Result<Vec<String>, TransportError> {
    info!(
        "replacing {} ({} -> {})",
        target.name, old_source.url, target.source.url
    );
    remove(old, &target.with_source(old_source))?;
    install(new, toolbox, target).inspect_err(|e| {
        warn!(
            "{} has no working copy after a failed re-point: {e}; the next sync adds it again",
            target.name
        );
    })
}

/// Delete the working copy. `transport` is `None` for kinds no backend
/// handles any more; the tree is then removed directly.
pub fn remove(
    transport: Option<&dyn Transport>,
    target: &Target<'_>,
) -> Result<Removal, TransportError> {
    let path = target.path();
    if fs::symlink_metadata(&path).is_err() {
        return Ok(Removal::Missing);
    }
    match transport {
        Some(t) => t.delete(target)?,
        None => remove_tree(&path)?,
    }
    Ok(Removal::Removed)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::select_transport;
    use crate::config::{ToolSettings, TransportConfig};
    use crate::runner::RecordingRunner;
    use crate::stub::STUB_MARKER;
    use std::sync::Arc;
    use strata_catalog::SourceKind;

    fn toolbox(config: TransportConfig) -> (Arc<RecordingRunner>, Toolbox) {
        let runner = Arc::new(RecordingRunner::simulating());
        let tb = Toolbox::new(config, runner.clone());
        (runner, tb)
    }

    fn with_hook(kind: &str, hook: &str) -> TransportConfig {
        let mut config = TransportConfig::default();
        config.tools.insert(
            kind.to_owned(),
            ToolSettings {
                post_sync: hook.to_owned(),
                ..ToolSettings::default()
            },
        );
        config
    }

    #[test]
    fn install_creates_working_copy() {
        let dir = tempfile::tempdir().unwrap();
        let (_runner, tb) = toolbox(TransportConfig::default());
        let source = Source::new("stub://example/foo", SourceKind::Stub);
        let transport = select_transport(&SourceKind::Stub, &tb).unwrap();
        let warnings = install(transport.as_ref(), &tb, &Target::new("foo", dir.path(), &source))
            .unwrap();
        assert!(warnings.is_empty());
        assert!(dir.path().join("foo").join(STUB_MARKER).is_file());
    }

    #[test]
    fn install_refuses_non_empty_directory() {
        let dir = tempfile::tempdir().unwrap();
        fs::create_dir(dir.path().join("foo")).unwrap();
        fs::write(dir.path().join("foo/local-file"), "mine").unwrap();
        let (runner, tb) = toolbox(TransportConfig::default());
        let source = Source::new("https://example.org/foo.git", SourceKind::Git);
        let transport = select_transport(&SourceKind::Git, &tb).unwrap();
        let err = install(transport.as_ref(), &tb, &Target::new("foo", dir.path(), &source))
            .unwrap_err();
        assert!(matches!(err, TransportError::StateConflict(_)));
        assert!(runner.calls().is_empty());
        assert!(dir.path().join("foo/local-file").is_file());
    }

    #[test]
    fn failed_install_removes_partial_tree() {
        let dir = tempfile::tempdir().unwrap();
        let (runner, tb) = toolbox(TransportConfig::default());
        runner.add_effect("git", |inv| {
            let dest = std::path::PathBuf::from(inv.args.last().unwrap());
            fs::create_dir_all(dest.join(".git"))?;
            Err(io::Error::other("clone interrupted"))
        });
        let source = Source::new("https://example.org/foo.git", SourceKind::Git);
        let transport = select_transport(&SourceKind::Git, &tb).unwrap();
        assert!(install(transport.as_ref(), &tb, &Target::new("foo", dir.path(), &source)).is_err());
        assert!(!dir.path().join("foo").exists());
    }

    #[test]
    fn failed_install_keeps_pre_existing_empty_directory() {
        let dir = tempfile::tempdir().unwrap();
        let target_dir = dir.path().join("foo");
        fs::create_dir(&target_dir).unwrap();
        let (_runner, tb) = toolbox(TransportConfig::default());
        let source = Source::new("stub://fail/foo", SourceKind::Stub);
        let transport = select_transport(&SourceKind::Stub, &tb).unwrap();
        let err = install(transport.as_ref(), &tb, &Target::new("foo", dir.path(), &source))
            .unwrap_err();
        assert!(matches!(err, TransportError::Failed { .. }));
        assert!(target_dir.is_dir());
        assert_eq!(fs::read_dir(&target_dir).unwrap().count(), 0);
    }

    #[test]
    fn missing_tools_are_reported_before_running_anything() {
        let dir = tempfile::tempdir().unwrap();
        let (runner, tb) = toolbox(TransportConfig::default());
        runner.missing_tool("darcs");
        let source = Source::new("https://hub.darcs.net/foo", SourceKind::Darcs);
        let transport = select_transport(&SourceKind::Darcs, &tb).unwrap();
        let err = install(transport.as_ref(), &tb, &Target::new("foo", dir.path(), &source))
            .unwrap_err();
        assert!(matches!(err, TransportError::MissingTool(ref m) if m.contains("dev-vcs/darcs")));
        assert!(runner.calls().is_empty());
    }

    #[test]
    fn hook_runs_in_working_copy_and_failure_is_a_warning() {
        let dir = tempfile::tempdir().unwrap();
        let (runner, tb) = toolbox(with_hook("stub", "egencache --repo-path %cwd="));
        runner.fail_when("egencache", None, 1, "egencache: cache is locked");
        let source = Source::new("stub://example/foo", SourceKind::Stub);
        let transport = select_transport(&SourceKind::Stub, &tb).unwrap();
        let target = Target::new("foo", dir.path(), &source);
        let warnings = install(transport.as_ref(), &tb, &target).unwrap();

        let hook = &runner.calls_to("egencache")[0];
        let path = target.path();
        assert_eq!(hook.cwd.as_deref(), Some(path.as_path()));
        assert_eq!(hook.value_of("--repo-path"), path.to_str());
        assert_eq!(warnings.len(), 1);
        assert!(warnings[0].contains("post-sync hook for foo failed"));
        assert!(path.join(STUB_MARKER).is_file());
    }

    #[test]
    fn update_re_adds_missing_working_copy() {
        let dir = tempfile::tempdir().unwrap();
        let (runner, tb) = toolbox(TransportConfig::default());
        let source = Source::new("https://example.org/foo.git", SourceKind::Git);
        let transport = select_transport(&SourceKind::Git, &tb).unwrap();
        let target = Target::new("foo", dir.path(), &source);
        update(transport.as_ref(), &tb, &target).unwrap();
        assert_eq!(runner.calls_to("git")[0].args[0], "clone");

        runner.clear_calls();
        update(transport.as_ref(), &tb, &target).unwrap();
        assert_eq!(runner.calls_to("git")[0].args, vec!["pull"]);
    }

    #[test]
    fn repoint_same_kind_updates_in_place() {
        let dir = tempfile::tempdir().unwrap();
        let (runner, tb) = toolbox(TransportConfig::default());
        let old = Source::new("https://old.example.org/foo.git", SourceKind::Git);
        let new = Source::new("https://example.org/foo.git", SourceKind::Git);
        let transport = select_transport(&SourceKind::Git, &tb).unwrap();
        install(transport.as_ref(), &tb, &Target::new("foo", dir.path(), &old)).unwrap();
        runner.clear_calls();

        repoint(
            transport.as_ref(),
            transport.as_ref(),
            &tb,
            &Target::new("foo", dir.path(), &new),
            &old,
        )
        .unwrap();
        let calls = runner.calls_to("git");
        assert_eq!(calls[0].args[..2], ["remote", "set-url"]);
        assert_eq!(calls[1].args, vec!["pull"]);
    }

    #[test]
    fn repoint_archive_deletes_and_adds() {
        let dir = tempfile::tempdir().unwrap();
        let (runner, tb) = toolbox(TransportConfig::default());
        let old = Source::new("https://example.org/u1/baz.tar.gz", SourceKind::Tar);
        let new = Source::new("https://example.org/u2/baz.tar.gz", SourceKind::Tar);
        let transport = select_transport(&SourceKind::Tar, &tb).unwrap();
        install(transport.as_ref(), &tb, &Target::new("baz", dir.path(), &old)).unwrap();
        fs::write(dir.path().join("baz/stale"), "from u1").unwrap();
        runner.clear_calls();

        repoint(
            transport.as_ref(),
            transport.as_ref(),
            &tb,
            &Target::new("baz", dir.path(), &new),
            &old,
        )
        .unwrap();
        let curl = &runner.calls_to("curl")[0];
        assert_eq!(curl.args.last().unwrap(), "https://example.org/u2/baz.tar.gz");
        assert!(!dir.path().join("baz/stale").exists());
        assert!(dir.path().join("baz/profiles/repo_name").is_file());
    }

    #[test]
    fn repoint_across_kinds_replaces_tree() {
        let dir = tempfile::tempdir().unwrap();
        let (runner, tb) = toolbox(TransportConfig::default());
        let old = Source::new("stub://example/foo", SourceKind::Stub);
        let new = Source::new("https://example.org/foo.git", SourceKind::Git);
        let stub = select_transport(&SourceKind::Stub, &tb).unwrap();
        let git = select_transport(&SourceKind::Git, &tb).unwrap();
        install(stub.as_ref(), &tb, &Target::new("foo", dir.path(), &old)).unwrap();

        repoint(
            stub.as_ref(),
            git.as_ref(),
            &tb,
            &Target::new("foo", dir.path(), &new),
            &old,
        )
        .unwrap();
        assert!(!dir.path().join("foo").join(STUB_MARKER).exists());
        assert_eq!(runner.calls_to("git")[0].args[0], "clone");
    }

    #[test]
    fn failed_replace_leaves_tree_for_next_update() {
        let dir = tempfile::tempdir().unwrap();
        let (runner, tb) = toolbox(TransportConfig::default());
        runner.fail_when("git", Some("clone"), 128, "fatal: bad object HEAD");
        let old = Source::new("stub://example/foo", SourceKind::Stub);
        let new = Source::new("https://example.org/foo.git", SourceKind::Git);
        let stub = select_transport(&SourceKind::Stub, &tb).unwrap();
        let git = select_transport(&SourceKind::Git, &tb).unwrap();
        let old_target = Target::new("foo", dir.path(), &old);
        install(stub.as_ref(), &tb, &old_target).unwrap();

        let err = repoint(
            stub.as_ref(),
            git.as_ref(),
            &tb,
            &Target::new("foo", dir.path(), &new),
            &old,
        )
        .unwrap_err();
        assert!(matches!(err, TransportError::Failed { .. }));
        assert!(!old_target.path().exists());

        update(stub.as_ref(), &tb, &old_target).unwrap();
        assert!(old_target.path().join(STUB_MARKER).is_file());
    }

    #[test]
    fn replace_without_old_backend_removes_tree_directly() {
        let dir = tempfile::tempdir().unwrap();
        let (_runner, tb) = toolbox(TransportConfig::default());
        let old = Source::new("https://example.org/foo", SourceKind::Unknown("cvsnt".to_owned()));
        let new = Source::new("stub://example/foo", SourceKind::Stub);
        fs::create_dir_all(dir.path().join("foo/profiles")).unwrap();
        fs::write(dir.path().join("foo/old-file"), "old").unwrap();
        let stub = select_transport(&SourceKind::Stub, &tb).unwrap();

        replace(None, stub.as_ref(), &tb, &Target::new("foo", dir.path(), &new), &old).unwrap();
        assert!(!dir.path().join("foo/old-file").exists());
        assert!(dir.path().join("foo").join(STUB_MARKER).is_file());
    }

    #[test]
    fn remove_reports_missing_tree() {
        let dir = tempfile::tempdir().unwrap();
        let source = Source::new("stub://example/foo", SourceKind::Stub);
        let target = Target::new("foo", dir.path(), &source);
        assert_eq!(remove(None, &target).unwrap(), Removal::Missing);
        fs::create_dir_all(target.path().join("profiles")).unwrap();
        assert_eq!(remove(None, &target).unwrap(), Removal::Removed);
        assert!(!target.path().exists());
    }
}
