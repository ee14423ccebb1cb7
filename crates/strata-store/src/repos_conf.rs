//! Repository-config projection of the installed catalog.
//!
//! The file is owned entirely by this writer and rebuilt from the installed
//! catalog on every run, one section per overlay in name order.

use crate::StoreError;
use ini::{EscapePolicy, Ini, LineSeparator, WriteOption};
use std::fs;
use std::path::{Path, PathBuf};
use strata_catalog::Catalog;
use tracing::debug;

#[derive(Debug, Clone)]
pub struct ReposConfWriter {
    path: PathBuf,
    storage: PathBuf,
    sync_integration: bool,
    sync_type: String,
    auto_sync: String,
}

impl ReposConfWriter {
    pub fn new(path: impl Into<PathBuf>, storage: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            storage: storage.into(),
            sync_integration: true,
            sync_type: "layman".to_owned(),
            auto_sync: "yes".to_owned(),
        }
    }

    /// Configure the package-manager sync keys. `sync_type` and `sync-uri`
    /// are only emitted when `enabled` is true; `auto_sync` is written verbatim.
    #[must_use]
    pub fn with_sync(mut self, enabled: bool, sync_type: &str, auto_sync: &str) -> Self {
        self.sync_integration = enabled;
        sync_type.clone_into(&mut self.sync_type);
        auto_sync.clone_into(&mut self.auto_sync);
        self
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Render the full file content for `installed`.
    pub fn render(&self, installed: &Catalog) -> Result<Vec<u8>, StoreError> {
        let mut conf = Ini::new();
        for overlay in installed.iter() {
            let Some(source) = overlay.primary_source() else {
                continue;
            };
            let location = self.storage.join(&overlay.name);
            let mut keys = vec![
                ("priority", overlay.priority.to_string()),
                ("location", location.to_string_lossy().into_owned()),
                ("layman-type", source.kind.as_str().to_owned()),
            ];
            if self.sync_integration {
                keys.push(("sync-type", self.sync_type.clone()));
                keys.push(("sync-uri", source.url.clone()));
            }
            if let Some(branch) = &source.branch {
                keys.push(("branch", branch.clone()));
            }
            keys.push(("auto-sync", self.auto_sync.clone()));

            for (key, value) in keys {
                conf.set_to(Some(overlay.name.as_str()), key.to_owned(), value);
            }
        }

        let mut out = Vec::new();
        conf.write_to_opt(
            &mut out,
            WriteOption {
                escape_policy: EscapePolicy::Nothing,
                line_separator: LineSeparator::CR,
                kv_separator: " = ",
            },
        )?;
        Ok(out)
    }

    /// Write the projection of `installed` atomically.
    ///
    /// Unchanged content is not rewritten. An empty catalog removes the file
    /// rather than leaving it with no sections.
    pub fn write(&self, installed: &Catalog) -> Result<(), StoreError> {
        if installed.is_empty() {
            return self.remove();
        }
        let rendered = self.render(installed)?;
        match fs::read(&self.path) {
            Ok(existing) if existing == rendered => {
                debug!("{} is up to date", self.path.display());
                return Ok(());
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => self.create_parent()?,
            Ok(_) => {}
            Err(e) => return Err(e.into()),
        }
        crate::write_atomic(&self.path, &rendered).map_err(|e| StoreError::ConfigWrite {
            path: self.path.display().to_string(),
            reason: e.to_string(),
        })?;
        debug!(
            "wrote {} ({} sections)",
            self.path.display(),
            installed.len()
        );
        Ok(())
    }

    fn remove(&self) -> Result<(), StoreError> {
        match fs::remove_file(&self.path) {
            Ok(()) => {
                debug!("removed {}", self.path.display());
                Ok(())
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(StoreError::ConfigWrite {
                path: self.path.display().to_string(),
                reason: e.to_string(),
            }),
        }
    }

    fn create_parent(&self) -> Result<(), StoreError> {
        let Some(parent) = self.path.parent() else {
            return Ok(());
        };
        if parent.as_os_str().is_empty() || parent.exists() {
            return Ok(());
        }
        #[cfg(unix)]
        {
            use std::os::unix::fs::DirBuilderExt;
            fs::DirBuilder::new()
                .recursive(true)
                .mode(0o755)
                .create(parent)?;
        }
        #[cfg(not(unix))]
        fs::create_dir_all(parent)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use strata_catalog::{Overlay, Source, SourceKind};

    fn overlay(name: &str, url: &str, kind: SourceKind) -> Overlay {
        Overlay::new(name, "dev@example.org", Source::new(url, kind))
    }

    fn catalog() -> Catalog {
        let mut foo = overlay("foo", "https://example.org/foo.git", SourceKind::Git);
        foo.sources[0] = foo.sources[0].clone().with_branch("main");
        foo.priority = 20;
        let bar = overlay("bar", "rsync://example.org/bar", SourceKind::Rsync);
        [foo, bar].into_iter().collect()
    }

    fn section_names(path: &Path) -> Vec<String> {
        let conf = Ini::load_from_file(path).unwrap();
        conf.sections().flatten().map(str::to_owned).collect()
    }

    #[test]
    fn every_installed_overlay_has_one_section() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("repos.conf").join("strata.conf");
        let writer = ReposConfWriter::new(&path, "/var/lib/ov");
        writer.write(&catalog()).unwrap();

        assert_eq!(section_names(&path), vec!["bar", "foo"]);
        let conf = Ini::load_from_file(&path).unwrap();
        let foo = conf.section(Some("foo")).unwrap();
        assert_eq!(foo.get("location"), Some("/var/lib/ov/foo"));
        assert_eq!(foo.get("layman-type"), Some("git"));
        assert_eq!(foo.get("priority"), Some("20"));
        assert_eq!(foo.get("sync-type"), Some("layman"));
        assert_eq!(foo.get("sync-uri"), Some("https://example.org/foo.git"));
        assert_eq!(foo.get("branch"), Some("main"));
        assert_eq!(foo.get("auto-sync"), Some("yes"));
        assert!(conf.section(Some("bar")).unwrap().get("branch").is_none());
    }

    #[test]
    fn keys_are_written_in_fixed_order() {
        let writer = ReposConfWriter::new("/unused", "/var/lib/ov");
        let text = String::from_utf8(writer.render(&catalog()).unwrap()).unwrap();
        let keys: Vec<&str> = text
            .lines()
            .skip_while(|l| *l != "[foo]")
            .skip(1)
            .take_while(|l| !l.is_empty() && !l.starts_with('['))
            .filter_map(|l| l.split(" = ").next())
            .collect();
        assert_eq!(
            keys,
            vec![
                "priority",
                "location",
                "layman-type",
                "sync-type",
                "sync-uri",
                "branch",
                "auto-sync"
            ]
        );
    }

    #[test]
    fn removed_overlay_loses_its_section() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("strata.conf");
        let writer = ReposConfWriter::new(&path, "/var/lib/ov");
        let mut installed = catalog();
        writer.write(&installed).unwrap();
        installed.remove("foo");
        writer.write(&installed).unwrap();
        assert_eq!(section_names(&path), vec!["bar"]);
    }

    #[test]
    fn without_sync_integration_omits_sync_keys() {
        let writer =
            ReposConfWriter::new("/unused", "/var/lib/ov").with_sync(false, "git", "no");
        let text = String::from_utf8(writer.render(&catalog()).unwrap()).unwrap();
        assert!(!text.contains("sync-type"));
        assert!(!text.contains("sync-uri"));
        assert!(text.contains("auto-sync = no"));
    }

    #[test]
    fn write_is_idempotent() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("strata.conf");
        let writer = ReposConfWriter::new(&path, "/var/lib/ov");
        writer.write(&catalog()).unwrap();
        let first = fs::read(&path).unwrap();
        writer.write(&catalog()).unwrap();
        assert_eq!(fs::read(&path).unwrap(), first);
    }

    #[test]
    fn empty_catalog_does_not_create_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("absent").join("strata.conf");
        ReposConfWriter::new(&path, "/var/lib/ov")
            .write(&Catalog::new())
            .unwrap();
        assert!(!path.exists());
        assert!(!path.parent().unwrap().exists());
    }

    #[test]
    fn last_overlay_removed_deletes_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("strata.conf");
        let writer = ReposConfWriter::new(&path, "/var/lib/ov");
        writer.write(&catalog()).unwrap();
        assert!(path.is_file());
        writer.write(&Catalog::new()).unwrap();
        assert!(!path.exists());
    }

    #[cfg(unix)]
    #[test]
    fn missing_parent_is_created_with_mode_0755() {
        use std::os::unix::fs::PermissionsExt;
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("repos.conf").join("strata.conf");
        ReposConfWriter::new(&path, "/var/lib/ov")
            .write(&catalog())
            .unwrap();
        let mode = fs::metadata(path.parent().unwrap())
            .unwrap()
            .permissions()
            .mode();
        // umask may only clear bits.
        assert_eq!(mode & 0o700, 0o700);
        assert_eq!(mode & 0o022, 0);
    }
}
