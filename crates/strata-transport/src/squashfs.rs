use crate::archive::{download, local_path};
use crate::backend::{check_source, remove_tree, Target, Toolbox, Transport};
use crate::runner::Invocation;
use crate::TransportError;
use std::fs;
use std::path::PathBuf;
use strata_catalog::{Source, SourceKind};
use tracing::debug;

const UMOUNT: &str = "umount";

/// Read-only squashfs images loop-mounted on the working copy path.
pub struct SquashfsTransport {
    toolbox: Toolbox,
}

impl SquashfsTransport {
    pub fn new(toolbox: Toolbox) -> Self {
        Self { toolbox }
    }

    fn program(&self) -> String {
        self.toolbox.config.command(&SourceKind::Squashfs)
    }

    fn image_path(target: &Target<'_>) -> PathBuf {
        local_path(&target.source.url)
            .unwrap_or_else(|| target.storage.join(format!(".{}.squashfs", target.name)))
    }

    fn mount(&self, target: &Target<'_>) -> Result<(), TransportError> {
        check_source(target.source)?;
        let image = Self::image_path(target);
        if local_path(&target.source.url).is_none() {
            download(&self.toolbox, &target.source.url, &image)?;
        } else if !image.is_file() {
            return Err(TransportError::InvalidArgument(format!(
                "image {} does not exist",
                image.display()
            )));
        }
        let path = target.path();
        fs::create_dir_all(&path)?;
        self.toolbox.run(
            Invocation::new(self.program())
                .args(["-o", "loop,ro"])
                .path_arg(&image)
                .path_arg(&path),
        )?;
        Ok(())
    }

    /// Unmount, ignoring failure: the tree may not be mounted at all.
    fn unmount(&self, target: &Target<'_>) {
        let inv = Invocation::new(UMOUNT).path_arg(&target.path());
        if let Err(e) = self.toolbox.run(inv) {
            debug!("umount {}: {e}", target.path().display());
        }
    }
}

impl Transport for SquashfsTransport {
    fn kind(&self) -> SourceKind {
        SourceKind::Squashfs
    }

    fn required_tools(&self, source: &Source) -> Vec<String> {
        let mut tools = vec![self.program(), UMOUNT.to_owned()];
        if local_path(&source.url).is_none() {
            tools.push(self.toolbox.config.fetch_command.clone());
        }
        tools
    }

    fn add(&self, target: &Target<'_>) -> Result<(), TransportError> {
        self.mount(target)
    }

    fn sync(&self, target: &Target<'_>) -> Result<(), TransportError> {
        self.unmount(target);
        self.mount(target)
    }

    fn delete(&self, target: &Target<'_>) -> Result<(), TransportError> {
        self.unmount(target);
        remove_tree(&target.path())?;
        if local_path(&target.source.url).is_none() {
            remove_tree(&Self::image_path(target))?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::runner::RecordingRunner;
    use crate::TransportConfig;
    use std::sync::Arc;

    fn setup() -> (Arc<RecordingRunner>, SquashfsTransport) {
        let runner = Arc::new(RecordingRunner::simulating());
        let tb = Toolbox::new(TransportConfig::default(), runner.clone());
        (runner, SquashfsTransport::new(tb))
    }

    #[test]
    fn add_downloads_image_and_mounts_read_only() {
        let dir = tempfile::tempdir().unwrap();
        let (runner, transport) = setup();
        let source = Source::new("https://example.org/qux.squashfs", SourceKind::Squashfs);
        let target = Target::new("qux", dir.path(), &source);
        transport.add(&target).unwrap();

        let image = dir.path().join(".qux.squashfs");
        assert!(image.is_file());
        let mount = &runner.calls_to("mount")[0];
        assert_eq!(
            mount.args,
            vec![
                "-o".to_owned(),
                "loop,ro".to_owned(),
                image.to_string_lossy().into_owned(),
                target.path().to_string_lossy().into_owned()
            ]
        );
        assert!(target.path().join("profiles/repo_name").is_file());
    }

    #[test]
    fn sync_remounts_and_delete_removes_image() {
        let dir = tempfile::tempdir().unwrap();
        let (runner, transport) = setup();
        let source = Source::new("https://example.org/qux.sqfs", SourceKind::Squashfs);
        let target = Target::new("qux", dir.path(), &source);
        transport.add(&target).unwrap();
        runner.clear_calls();

        transport.sync(&target).unwrap();
        let programs: Vec<String> = runner.calls().into_iter().map(|c| c.program).collect();
        assert_eq!(programs, vec!["umount", "curl", "mount"]);

        transport.delete(&target).unwrap();
        assert!(!target.path().exists());
        assert!(!dir.path().join(".qux.squashfs").exists());
    }

    #[test]
    fn unmount_failure_does_not_block_delete() {
        let dir = tempfile::tempdir().unwrap();
        let (runner, transport) = setup();
        runner.fail_when("umount", None, 32, "umount: not mounted");
        let source = Source::new("https://example.org/qux.squashfs", SourceKind::Squashfs);
        let target = Target::new("qux", dir.path(), &source);
        fs::create_dir_all(target.path()).unwrap();
        transport.delete(&target).unwrap();
        assert!(!target.path().exists());
    }
}
