use crate::layout::StateLayout;
use crate::StoreError;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

/// A single rollback step that can undo part of an operation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum RollbackStep {
    /// Remove a directory tree (a working copy that was being created).
    RemoveDir(PathBuf),
    /// Empty a directory but keep it (a working copy directory that existed empty beforehand).
    ClearDir(PathBuf),
}

/// The type of mutating operation being tracked.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum WalOpKind {
    Add,
    Repoint,
}

impl std::fmt::Display for WalOpKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            WalOpKind::Add => write!(f, "add"),
            WalOpKind::Repoint => write!(f, "repoint"),
        }
    }
}

/// A WAL entry representing an in-flight operation on one overlay.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WalEntry {
    pub op_id: String,
    pub kind: WalOpKind,
    pub overlay: String,
    pub timestamp: String,
    pub rollback_steps: Vec<RollbackStep>,
}

/// Write-ahead log for crash recovery.
///
/// An overlay with an open entry is in the transient "being-added" state:
/// its working copy may be partial and it is not yet in the installed
/// catalog. The entry is committed once the installed catalog records the
/// outcome; on startup, leftover entries are rolled back.
pub struct WriteAheadLog {
    wal_dir: PathBuf,
}

impl WriteAheadLog {
    pub fn new(layout: &StateLayout) -> Self {
        Self {
            wal_dir: layout.wal_dir(),
        }
    }

    pub fn initialize(&self) -> Result<(), StoreError> {
        fs::create_dir_all(&self.wal_dir)?;
        Ok(())
    }

    /// Begin a new WAL entry for an operation. Returns the op_id.
    pub fn begin(&self, kind: WalOpKind, overlay: &str) -> Result<String, StoreError> {
        let op_id = format!(
            "{}-{}",
            chrono::Utc::now().format("%Y%m%d%H%M%S%3f"),
            &blake3::hash(overlay.as_bytes()).to_hex()[..8]
        );
        let entry = WalEntry {
            op_id: op_id.clone(),
            kind,
            overlay: overlay.to_owned(),
            timestamp: chrono::Utc::now().to_rfc3339(),
            rollback_steps: Vec::new(),
        };
        self.write_entry(&entry)?;
        debug!("WAL begin: {} for {overlay} (op_id={op_id})", entry.kind);
        Ok(op_id)
    }

    pub fn add_rollback_step(&self, op_id: &str, step: RollbackStep) -> Result<(), StoreError> {
        let mut entry = self.read_entry(op_id)?;
        entry.rollback_steps.push(step);
        self.write_entry(&entry)
    }

    /// Commit (remove) a WAL entry once its outcome is recorded.
    pub fn commit(&self, op_id: &str) -> Result<(), StoreError> {
        let path = self.entry_path(op_id);
        if path.exists() {
            fs::remove_file(&path)?;
            debug!("WAL commit: {op_id}");
        }
        Ok(())
    }

    pub fn list_incomplete(&self) -> Result<Vec<WalEntry>, StoreError> {
        if !self.wal_dir.exists() {
            return Ok(Vec::new());
        }
        let mut entries = Vec::new();
        for dir_entry in fs::read_dir(&self.wal_dir)? {
            let path = dir_entry?.path();
            if path.extension().is_none_or(|e| e != "json") {
                continue;
            }
            match fs::read_to_string(&path) {
                Ok(content) => match serde_json::from_str::<WalEntry>(&content) {
                    Ok(entry) => entries.push(entry),
                    Err(e) => {
                        warn!("corrupt WAL entry {}: {e}", path.display());
                        let _ = fs::remove_file(&path);
                    }
                },
                Err(e) => {
                    warn!("unreadable WAL entry {}: {e}", path.display());
                    let _ = fs::remove_file(&path);
                }
            }
        }
        entries.sort_by(|a, b| a.timestamp.cmp(&b.timestamp));
        Ok(entries)
    }

    /// Names of overlays currently in the "being-added" state.
    pub fn pending_overlays(&self) -> Result<Vec<String>, StoreError> {
        Ok(self
            .list_incomplete()?
            .into_iter()
            .map(|e| e.overlay)
            .collect())
    }

    /// Roll back all incomplete entries. Returns the number rolled back.
    pub fn recover(&self) -> Result<usize, StoreError> {
        let entries = self.list_incomplete()?;
        let count = entries.len();
        for entry in &entries {
            info!(
                "WAL recovery: rolling back {} of {} (op_id={})",
                entry.kind, entry.overlay, entry.op_id
            );
            rollback_entry(entry);
            let _ = fs::remove_file(self.entry_path(&entry.op_id));
        }
        if count > 0 {
            info!("WAL recovery complete: {count} entries rolled back");
        }
        Ok(count)
    }

    fn entry_path(&self, op_id: &str) -> PathBuf {
        self.wal_dir.join(format!("{op_id}.json"))
    }

    fn write_entry(&self, entry: &WalEntry) -> Result<(), StoreError> {
        fs::create_dir_all(&self.wal_dir)?;
        let content = serde_json::to_string_pretty(entry)?;
        crate::write_atomic(&self.entry_path(&entry.op_id), content.as_bytes())
    }

    fn read_entry(&self, op_id: &str) -> Result<WalEntry, StoreError> {
        let content = fs::read_to_string(self.entry_path(op_id))?;
        Ok(serde_json::from_str(&content)?)
    }
}

fn rollback_entry(entry: &WalEntry) {
    for step in entry.rollback_steps.iter().rev() {
        match step {
            RollbackStep::RemoveDir(path) => {
                if path.exists() {
                    if let Err(e) = fs::remove_dir_all(path) {
                        warn!("WAL rollback: failed to remove dir {}: {e}", path.display());
                    } else {
                        debug!("WAL rollback: removed dir {}", path.display());
                    }
                }
            }
            RollbackStep::ClearDir(path) => {
                if let Err(e) = clear_dir(path) {
                    warn!("WAL rollback: failed to clear dir {}: {e}", path.display());
                } else {
                    debug!("WAL rollback: cleared dir {}", path.display());
                }
            }
        }
    }
}

/// Remove every entry of `dir`, keeping `dir` itself. A missing `dir` is recreated empty.
pub fn clear_dir(dir: &Path) -> std::io::Result<()> {
    if !dir.exists() {
        return fs::create_dir_all(dir);
    }
    for entry in fs::read_dir(dir)? {
        let path = entry?.path();
        if path.is_dir() && !path.is_symlink() {
            fs::remove_dir_all(&path)?;
        } else {
            fs::remove_file(&path)?;
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn setup() -> (tempfile::TempDir, StateLayout, WriteAheadLog) {
        let dir = tempfile::tempdir().unwrap();
        let layout = StateLayout::under_storage(dir.path());
        layout.initialize().unwrap();
        let wal = WriteAheadLog::new(&layout);
        wal.initialize().unwrap();
        (dir, layout, wal)
    }

    #[test]
    fn begin_creates_entry() {
        let (_dir, _layout, wal) = setup();
        let op_id = wal.begin(WalOpKind::Add, "foo").unwrap();
        assert!(!op_id.is_empty());
        let entries = wal.list_incomplete().unwrap();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].overlay, "foo");
        assert_eq!(wal.pending_overlays().unwrap(), vec!["foo".to_owned()]);
    }

    #[test]
    fn commit_removes_entry() {
        let (_dir, _layout, wal) = setup();
        let op_id = wal.begin(WalOpKind::Add, "foo").unwrap();
        wal.commit(&op_id).unwrap();
        assert!(wal.list_incomplete().unwrap().is_empty());
    }

    #[test]
    fn recover_removes_half_created_working_copy() {
        let (_dir, layout, wal) = setup();
        let op_id = wal.begin(WalOpKind::Add, "foo").unwrap();
        let target = layout.overlay_path("foo");
        fs::create_dir_all(target.join("profiles")).unwrap();
        fs::write(target.join("profiles/repo_name"), "foo").unwrap();
        wal.add_rollback_step(&op_id, RollbackStep::RemoveDir(target.clone()))
            .unwrap();

        // No commit: simulates a crash mid-clone.
        assert_eq!(wal.recover().unwrap(), 1);
        assert!(!target.exists());
        assert!(wal.list_incomplete().unwrap().is_empty());
    }

    #[test]
    fn recover_clear_dir_keeps_directory() {
        let (_dir, layout, wal) = setup();
        let target = layout.overlay_path("bar");
        fs::create_dir_all(&target).unwrap();
        let op_id = wal.begin(WalOpKind::Add, "bar").unwrap();
        wal.add_rollback_step(&op_id, RollbackStep::ClearDir(target.clone()))
            .unwrap();
        fs::write(target.join("partial"), "x").unwrap();

        wal.recover().unwrap();
        assert!(target.is_dir());
        assert_eq!(fs::read_dir(&target).unwrap().count(), 0);
    }

    #[test]
    fn recover_with_no_entries_is_noop() {
        let (_dir, _layout, wal) = setup();
        assert_eq!(wal.recover().unwrap(), 0);
    }

    #[test]
    fn recover_corrupt_wal_entry_is_removed() {
        let (_dir, layout, wal) = setup();
        fs::write(layout.wal_dir().join("corrupt-op.json"), "NOT JSON{{{").unwrap();

        let op_id = wal.begin(WalOpKind::Repoint, "baz").unwrap();
        let orphan = layout.overlay_path("baz");
        fs::create_dir_all(&orphan).unwrap();
        wal.add_rollback_step(&op_id, RollbackStep::RemoveDir(orphan.clone()))
            .unwrap();

        assert_eq!(wal.recover().unwrap(), 1);
        assert!(!orphan.exists());
        assert!(!layout.wal_dir().join("corrupt-op.json").exists());
    }

    #[test]
    fn op_kind_display() {
        assert_eq!(WalOpKind::Add.to_string(), "add");
        assert_eq!(WalOpKind::Repoint.to_string(), "repoint");
    }
}
