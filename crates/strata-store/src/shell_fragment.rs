//! Shell-fragment projection of the installed catalog.
//!
//! The fragment holds two shell assignments, `PORTDIR_OVERLAY` for enabled
//! overlays and `PORTDIR_OVERLAY_DISABLED` for disabled ones. Both list one
//! directory per line inside double quotes. Everything else in the file,
//! including entries of `PORTDIR_OVERLAY` that live outside storage, belongs
//! to the user and is preserved.

use crate::StoreError;
use regex::Regex;
use std::collections::BTreeSet;
use std::fs;
use std::ops::Range;
use std::path::{Path, PathBuf};
use strata_catalog::{Catalog, Overlay};
use tracing::debug;

pub const OVERLAY_VAR: &str = "PORTDIR_OVERLAY";
pub const DISABLED_VAR: &str = "PORTDIR_OVERLAY_DISABLED";

const EMPTY_TEMPLATE: &str = "PORTDIR_OVERLAY=\"\n\"\n";
const SELF_REFERENCES: [&str; 2] = ["$PORTDIR_OVERLAY", "${PORTDIR_OVERLAY}"];

fn assignment_re(var: &str) -> Result<Regex, StoreError> {
    Regex::new(&format!(r#"(?m)^[ \t]*{var}[ \t]*=[ \t]*"([^"]*)""#)).map_err(|e| {
        StoreError::Fragment {
            path: String::new(),
            reason: e.to_string(),
        }
    })
}

/// Location and entries of one quoted assignment.
struct Assignment {
    span: Range<usize>,
    entries: Vec<String>,
}

fn find_assignment(re: &Regex, text: &str) -> Option<Assignment> {
    let caps = re.captures(text)?;
    let whole = caps.get(0)?;
    let body = caps.get(1).map_or("", |m| m.as_str());
    Some(Assignment {
        span: whole.range(),
        entries: body.split_whitespace().map(str::to_owned).collect(),
    })
}

fn render_assignment(var: &str, lines: &[String]) -> String {
    let mut out = format!("{var}=\"\n");
    for line in lines {
        out.push_str(line);
        out.push('\n');
    }
    out.push('"');
    out
}

#[derive(Debug, Clone)]
pub struct ShellFragment {
    path: PathBuf,
    storage: PathBuf,
    /// File content as read; `None` when the file does not exist.
    text: Option<String>,
    disabled: BTreeSet<String>,
    extras: Vec<String>,
}

impl ShellFragment {
    /// Read the fragment at `path`. A missing file behaves as one with an
    /// empty `PORTDIR_OVERLAY` assignment.
    pub fn load(path: impl Into<PathBuf>, storage: impl Into<PathBuf>) -> Result<Self, StoreError> {
        let path = path.into();
        let storage = storage.into();
        let text = match fs::read_to_string(&path) {
            Ok(t) => Some(t),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => None,
            Err(e) => return Err(e.into()),
        };

        let mut fragment = Self {
            path,
            storage,
            text: None,
            disabled: BTreeSet::new(),
            extras: Vec::new(),
        };
        let body = text.as_deref().unwrap_or(EMPTY_TEMPLATE);

        let enabled = find_assignment(&assignment_re(OVERLAY_VAR)?, body).ok_or_else(|| {
            StoreError::Fragment {
                path: fragment.path.display().to_string(),
                reason: format!("no {OVERLAY_VAR} assignment found"),
            }
        })?;
        fragment.extras = enabled
            .entries
            .into_iter()
            .filter(|e| !SELF_REFERENCES.contains(&e.as_str()) && fragment.managed_name(e).is_none())
            .collect();
        if let Some(disabled) = find_assignment(&assignment_re(DISABLED_VAR)?, body) {
            fragment.disabled = disabled
                .entries
                .iter()
                .filter_map(|e| fragment.managed_name(e))
                .collect();
        }
        fragment.text = text;
        Ok(fragment)
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// The overlay name if `entry` is a directory directly under storage.
    fn managed_name(&self, entry: &str) -> Option<String> {
        let entry = Path::new(entry);
        if entry.parent()? != self.storage {
            return None;
        }
        entry.file_name()?.to_str().map(str::to_owned)
    }

    pub fn is_disabled(&self, name: &str) -> bool {
        self.disabled.contains(name)
    }

    /// Names recorded as disabled, including ones no longer installed.
    pub fn disabled(&self) -> impl Iterator<Item = &str> {
        self.disabled.iter().map(String::as_str)
    }

    /// Entries of `PORTDIR_OVERLAY` that are not managed here.
    pub fn extras(&self) -> &[String] {
        &self.extras
    }

    /// Move `name` to the enabled list. Returns whether anything changed.
    pub fn enable(&mut self, name: &str) -> bool {
        self.disabled.remove(name)
    }

    /// Move `name` to the disabled list. Returns whether anything changed.
    pub fn disable(&mut self, name: &str) -> bool {
        self.disabled.insert(name.to_owned())
    }

    fn ordered_paths<'a>(&self, overlays: impl Iterator<Item = &'a Overlay>) -> Vec<String> {
        let mut overlays: Vec<&Overlay> = overlays.collect();
        overlays.sort_by(|a, b| a.priority.cmp(&b.priority).then_with(|| a.name.cmp(&b.name)));
        overlays
            .into_iter()
            .map(|o| self.storage.join(&o.name).to_string_lossy().into_owned())
            .collect()
    }

    /// Render the fragment for `installed`. Disabled names that are no longer
    /// installed are dropped.
    pub fn render(&self, installed: &Catalog) -> Result<String, StoreError> {
        self.render_on(self.text.as_deref().unwrap_or(EMPTY_TEMPLATE), installed)
    }

    fn render_on(&self, base: &str, installed: &Catalog) -> Result<String, StoreError> {
        let mut enabled =
            self.ordered_paths(installed.iter().filter(|o| !self.disabled.contains(&o.name)));
        enabled.push(SELF_REFERENCES[0].to_owned());
        enabled.extend(self.extras.iter().cloned());
        let disabled =
            self.ordered_paths(installed.iter().filter(|o| self.disabled.contains(&o.name)));

        let overlay_block = render_assignment(OVERLAY_VAR, &enabled);
        let disabled_block = render_assignment(DISABLED_VAR, &disabled);

        let overlay_at = find_assignment(&assignment_re(OVERLAY_VAR)?, base).ok_or_else(|| {
            StoreError::Fragment {
                path: self.path.display().to_string(),
                reason: format!("no {OVERLAY_VAR} assignment found"),
            }
        })?;
        let disabled_at = find_assignment(&assignment_re(DISABLED_VAR)?, base);

        let mut out = base.to_owned();
        match disabled_at {
            Some(d) if d.span.start > overlay_at.span.start => {
                out.replace_range(d.span, &disabled_block);
                out.replace_range(overlay_at.span, &overlay_block);
            }
            Some(d) => {
                out.replace_range(overlay_at.span, &overlay_block);
                out.replace_range(d.span, &disabled_block);
            }
            None => {
                out.replace_range(overlay_at.span, &overlay_block);
                if !out.ends_with('\n') {
                    out.push('\n');
                }
                out.push_str(&disabled_block);
                out.push('\n');
            }
        }
        Ok(out)
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

    /// Write the fragment for `installed` atomically.
    ///
    /// Unchanged content is not rewritten. An absent file is not created
    /// while nothing is installed, and a file that would hold nothing but
    /// empty assignments is removed.
    pub fn write(&self, installed: &Catalog) -> Result<(), StoreError> {
        if self.text.is_none() && installed.is_empty() {
            return Ok(());
        }
        let rendered = self.render(installed)?;
        if installed.is_empty()
            && self.extras.is_empty()
            && rendered == self.render_on(EMPTY_TEMPLATE, installed)?
        {
            return self.remove();
        }
        if self.text.as_deref() == Some(rendered.as_str()) {
            debug!("{} is up to date", self.path.display());
            return Ok(());
        }
        crate::write_atomic(&self.path, rendered.as_bytes()).map_err(|e| {
            StoreError::ConfigWrite {
                path: self.path.display().to_string(),
                reason: e.to_string(),
            }
        })?;
        debug!("wrote {}", self.path.display());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use strata_catalog::{Source, SourceKind};

    fn overlay(name: &str, priority: i32) -> Overlay {
        let mut o = Overlay::new(
            name,
            "dev@example.org",
            Source::new(format!("https://example.org/{name}.git"), SourceKind::Git),
        );
        o.priority = priority;
        o
    }

    fn installed() -> Catalog {
        [overlay("zeta", 10), overlay("alpha", 50), overlay("beta", 50)]
            .into_iter()
            .collect()
    }

    #[test]
    fn missing_file_renders_from_template() {
        let dir = tempfile::tempdir().unwrap();
        let frag = ShellFragment::load(dir.path().join("make.conf"), "/var/lib/ov").unwrap();
        let text = frag.render(&installed()).unwrap();
        assert_eq!(
            text,
            "PORTDIR_OVERLAY=\"\n\
             /var/lib/ov/zeta\n\
             /var/lib/ov/alpha\n\
             /var/lib/ov/beta\n\
             $PORTDIR_OVERLAY\n\
             \"\n\
             PORTDIR_OVERLAY_DISABLED=\"\n\
             \"\n"
        );
    }

    #[test]
    fn disable_moves_entry_between_lists() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("make.conf");
        let mut frag = ShellFragment::load(&path, "/var/lib/ov").unwrap();
        assert!(frag.disable("alpha"));
        frag.write(&installed()).unwrap();

        let reloaded = ShellFragment::load(&path, "/var/lib/ov").unwrap();
        assert!(reloaded.is_disabled("alpha"));
        let text = fs::read_to_string(&path).unwrap();
        assert!(text.contains("PORTDIR_OVERLAY_DISABLED=\"\n/var/lib/ov/alpha\n\""));
        assert!(!text.contains("PORTDIR_OVERLAY=\"\n/var/lib/ov/zeta\n/var/lib/ov/alpha"));

        let mut reloaded = reloaded;
        assert!(reloaded.enable("alpha"));
        reloaded.write(&installed()).unwrap();
        assert!(!ShellFragment::load(&path, "/var/lib/ov")
            .unwrap()
            .is_disabled("alpha"));
    }

    #[test]
    fn user_text_and_foreign_entries_are_preserved() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("make.conf");
        fs::write(
            &path,
            "# my settings\nCFLAGS=\"-O2\"\nPORTDIR_OVERLAY=\"\n/usr/local/portage\n/var/lib/ov/stale\n${PORTDIR_OVERLAY}\n\"\nMAKEOPTS=\"-j4\"\n",
        )
        .unwrap();
        let frag = ShellFragment::load(&path, "/var/lib/ov").unwrap();
        assert_eq!(frag.extras(), ["/usr/local/portage".to_owned()]);

        let catalog: Catalog = [overlay("alpha", 50)].into_iter().collect();
        frag.write(&catalog).unwrap();
        let text = fs::read_to_string(&path).unwrap();
        assert!(text.starts_with("# my settings\nCFLAGS=\"-O2\"\n"));
        assert!(text.contains(
            "PORTDIR_OVERLAY=\"\n/var/lib/ov/alpha\n$PORTDIR_OVERLAY\n/usr/local/portage\n\"\nMAKEOPTS=\"-j4\"\n"
        ));
        assert!(!text.contains("stale"));
        assert!(text.ends_with("PORTDIR_OVERLAY_DISABLED=\"\n\"\n"));
    }

    #[test]
    fn stale_disabled_entries_are_dropped() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("make.conf");
        let mut frag = ShellFragment::load(&path, "/var/lib/ov").unwrap();
        frag.disable("gone");
        let text = frag.render(&installed()).unwrap();
        assert!(!text.contains("gone"));
    }

    #[test]
    fn file_without_assignment_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("make.conf");
        fs::write(&path, "CFLAGS=\"-O2\"\n").unwrap();
        let err = ShellFragment::load(&path, "/var/lib/ov").unwrap_err();
        assert!(err.to_string().contains("no PORTDIR_OVERLAY assignment"));
    }

    #[test]
    fn disabled_variable_is_not_mistaken_for_enabled() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("make.conf");
        fs::write(
            &path,
            "PORTDIR_OVERLAY_DISABLED=\"\n/var/lib/ov/beta\n\"\nPORTDIR_OVERLAY=\"\n\"\n",
        )
        .unwrap();
        let frag = ShellFragment::load(&path, "/var/lib/ov").unwrap();
        assert!(frag.is_disabled("beta"));
        let text = frag.render(&installed()).unwrap();
        assert!(text.starts_with("PORTDIR_OVERLAY_DISABLED=\"\n/var/lib/ov/beta\n\"\n"));
        assert!(text.contains("PORTDIR_OVERLAY=\"\n/var/lib/ov/zeta\n/var/lib/ov/alpha\n$PORTDIR_OVERLAY\n\"\n"));
    }

    #[test]
    fn fragment_created_for_overlays_is_removed_when_they_are_gone() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("make.conf");
        let catalog: Catalog = [overlay("alpha", 50)].into_iter().collect();
        ShellFragment::load(&path, "/var/lib/ov")
            .unwrap()
            .write(&catalog)
            .unwrap();
        assert!(path.is_file());

        ShellFragment::load(&path, "/var/lib/ov")
            .unwrap()
            .write(&Catalog::new())
            .unwrap();
        assert!(!path.exists());
    }

    #[test]
    fn user_fragment_survives_when_nothing_is_installed() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("make.conf");
        fs::write(&path, "CFLAGS=\"-O2\"\nPORTDIR_OVERLAY=\"\n/var/lib/ov/alpha\n\"\n").unwrap();
        ShellFragment::load(&path, "/var/lib/ov")
            .unwrap()
            .write(&Catalog::new())
            .unwrap();
        let text = fs::read_to_string(&path).unwrap();
        assert!(text.starts_with("CFLAGS=\"-O2\"\n"));
        assert!(!text.contains("alpha"));
    }

    #[test]
    fn write_is_idempotent_and_skips_empty_creation() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("make.conf");
        ShellFragment::load(&path, "/var/lib/ov")
            .unwrap()
            .write(&Catalog::new())
            .unwrap();
        assert!(!path.exists());

        ShellFragment::load(&path, "/var/lib/ov")
            .unwrap()
            .write(&installed())
            .unwrap();
        let first = fs::read(&path).unwrap();
        ShellFragment::load(&path, "/var/lib/ov")
            .unwrap()
            .write(&installed())
            .unwrap();
        assert_eq!(fs::read(&path).unwrap(), first);
    }
}
