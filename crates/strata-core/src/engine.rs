use crate::concurrency::{shutdown_requested, StoreLock};
use crate::config::EngineConfig;
use crate::outcome::BatchOutcome;
use crate::CoreError;
use serde::Serialize;
use std::fs;
use std::path::PathBuf;
use std::sync::Arc;
use strata_catalog::{
    load, load_installed, save_or_remove, select, validate_name, Catalog, Diagnostic, ErrorKind, Overlay,
    Source, SourceKind,
};
use strata_remote::{FeedCache, FetchReport, Fetcher};
use strata_store::{
    scan_orphans, ReposConfWriter, RollbackStep, ShellFragment, StateLayout, StoreError,
    WalOpKind, WriteAheadLog,
};
use strata_transport::{
    check_tools, format_missing, ops, select_transport, Removal, SystemRunner, Target, ToolRunner,
    Toolbox, Transport, TransportError,
};
use tracing::{debug, info, warn};

type CancelCheck = Arc<dyn Fn() -> bool + Send + Sync>;

/// An installed overlay together with its shell-fragment state.
#[derive(Debug, Clone, Serialize)]
pub struct InstalledOverlay {
    #[serde(flatten)]
    pub overlay: Overlay,
    pub enabled: bool,
}

struct Added {
    record: Overlay,
    op_id: String,
    hook_warnings: Vec<String>,
}

struct Synced {
    /// New installed record when the working copy was re-pointed.
    record: Option<Overlay>,
    op_id: Option<String>,
    hook_warnings: Vec<String>,
}

/// Central orchestration engine for the overlay lifecycle.
///
/// Every batch call processes names in input order. A failure for one name
/// is recorded as a fatal on the returned [`BatchOutcome`] and never stops
/// the batch; only process-level failures (lock timeout, unreadable installed
/// catalog, config writer errors) are returned as `Err`.
pub struct Engine {
    config: EngineConfig,
    layout: StateLayout,
    wal: WriteAheadLog,
    toolbox: Toolbox,
    fetcher: Fetcher,
    installed: Catalog,
    remote: Option<Arc<Catalog>>,
    cancel: CancelCheck,
}

fn not_installed(name: &str) -> Diagnostic {
    Diagnostic::new(
        name,
        ErrorKind::NotFound,
        format!("overlay '{name}' is not installed"),
    )
}

fn not_remote(name: &str) -> Diagnostic {
    Diagnostic::new(
        name,
        ErrorKind::NotFound,
        format!("overlay '{name}' is not in the remote catalog"),
    )
}

fn transport_diag(name: &str, e: &TransportError) -> Diagnostic {
    Diagnostic::new(name, e.kind(), e.to_string())
}

fn wal_diag(name: &str, e: &StoreError) -> Diagnostic {
    Diagnostic::new(
        name,
        ErrorKind::StateConflict,
        format!("cannot record pending operation: {e}"),
    )
}

fn check_name(name: &str) -> Result<(), Diagnostic> {
    validate_name(name).map_err(|e| Diagnostic::new(name, ErrorKind::NotFound, e.to_string()))
}

fn record_hook_warnings(outcome: &mut BatchOutcome, name: &str, warnings: Vec<String>) {
    for w in warnings {
        outcome.warn(Diagnostic::new(name, ErrorKind::TransportError, w));
    }
}

impl Engine {
    /// Create an engine that runs real tools.
    pub fn new(config: EngineConfig) -> Result<Self, CoreError> {
        Self::with_runner(config, Arc::new(SystemRunner))
    }

    /// Create an engine whose tool calls go through `runner`.
    ///
    /// On construction, operations left incomplete by a previous run are
    /// rolled back, unless another process holds the store lock.
    pub fn with_runner(config: EngineConfig, runner: Arc<dyn ToolRunner>) -> Result<Self, CoreError> {
        let layout = config.layout();
        layout.initialize()?;
        let wal = WriteAheadLog::new(&layout);
        let toolbox = Toolbox::new(config.transport.clone(), runner);
        let fetcher = Fetcher::new(config.fetch.clone(), FeedCache::new(layout.cache_dir()));

        let engine = Self {
            config,
            layout,
            wal,
            toolbox,
            fetcher,
            installed: Catalog::new(),
            remote: None,
            cancel: Arc::new(shutdown_requested),
        };

        match StoreLock::try_acquire(&engine.layout.lock_file()) {
            Ok(Some(_lock)) => {
                if let Err(e) = engine.settle_wal() {
                    warn!("WAL recovery failed: {e}");
                }
            }
            Ok(None) => debug!("store lock held; skipping WAL recovery"),
            Err(e) => warn!("store lock check failed; skipping WAL recovery: {e}"),
        }
        Ok(engine)
    }

    /// Replace the cancellation check consulted between batch items.
    #[must_use]
    pub fn with_cancel_check(mut self, check: impl Fn() -> bool + Send + Sync + 'static) -> Self {
        self.cancel = Arc::new(check);
        self
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn layout(&self) -> &StateLayout {
        &self.layout
    }

    /// Commit entries whose outcome already reached the installed catalog,
    /// then roll back the rest.
    fn settle_wal(&self) -> Result<(), CoreError> {
        let installed = load_installed(&self.layout.installed_file())?;
        for entry in self.wal.list_incomplete()? {
            if installed.contains(&entry.overlay) && self.layout.is_populated(&entry.overlay) {
                debug!("WAL: {} of {} completed before exit", entry.kind, entry.overlay);
                self.wal.commit(&entry.op_id)?;
            }
        }
        let rolled_back = self.wal.recover()?;
        if rolled_back > 0 {
            info!("rolled back {rolled_back} interrupted operations");
        }
        Ok(())
    }

    fn lock(&self) -> Result<StoreLock, CoreError> {
        StoreLock::acquire_timeout(&self.layout.lock_file(), self.config.lock_timeout())
    }

    fn reload_installed(&mut self) -> Result<(), CoreError> {
        self.installed = load_installed(&self.layout.installed_file())?;
        Ok(())
    }

    fn cancelled(&self) -> bool {
        (self.cancel)()
    }

    fn definition_files(&self, warnings: &mut Vec<Diagnostic>) -> Vec<PathBuf> {
        let Some(dir) = &self.config.definitions_dir else {
            return Vec::new();
        };
        match fs::read_dir(dir) {
            Ok(entries) => {
                let mut files: Vec<PathBuf> = entries
                    .filter_map(Result::ok)
                    .map(|e| e.path())
                    .filter(|p| p.is_file())
                    .collect();
                files.sort();
                files
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Vec::new(),
            Err(e) => {
                warnings.push(Diagnostic::new(
                    dir.display().to_string(),
                    ErrorKind::Corrupt,
                    format!("cannot read definitions directory: {e}"),
                ));
                Vec::new()
            }
        }
    }

    /// The merged remote catalog, loaded on first use. Feeds without a
    /// cached copy are fetched. Warnings are returned only by the call that
    /// loads it.
    fn remote_catalog(&mut self) -> (Arc<Catalog>, Vec<Diagnostic>) {
        if let Some(remote) = &self.remote {
            return (Arc::clone(remote), Vec::new());
        }
        let report = self.fetcher.fetch_missing(&self.config.feeds);
        let mut warnings = report.warnings;
        let mut files = report.files;
        files.extend(self.definition_files(&mut warnings));

        let loaded = load(&files);
        warnings.extend(loaded.warnings);
        info!(
            "remote catalog: {} overlays from {} documents",
            loaded.catalog.len(),
            files.len()
        );
        let remote = Arc::new(loaded.catalog);
        self.remote = Some(Arc::clone(&remote));
        (remote, warnings)
    }

    /// The first source of `overlay` allowed by the protocol filter whose
    /// transport and tools are available.
    fn choose_source(&self, overlay: &Overlay) -> Result<(Source, Box<dyn Transport>), Diagnostic> {
        let name = overlay.name.as_str();
        let mut first_error = None;
        for source in &overlay.sources {
            if !self.config.allows_scheme(source.scheme().as_deref()) {
                debug!("{name}: {} filtered by protocol_filter", source.url);
                continue;
            }
            let transport = match select_transport(&source.kind, &self.toolbox) {
                Ok(t) => t,
                Err(e) => {
                    first_error.get_or_insert_with(|| transport_diag(name, &e));
                    continue;
                }
            };
            let missing = check_tools(transport.as_ref(), source, &self.toolbox);
            if !missing.is_empty() {
                let e = TransportError::MissingTool(format_missing(&missing));
                first_error.get_or_insert_with(|| transport_diag(name, &e));
                continue;
            }
            return Ok((source.clone(), transport));
        }
        Err(first_error.unwrap_or_else(|| {
            Diagnostic::new(
                name,
                ErrorKind::UnsupportedKind,
                format!(
                    "no source of '{name}' is allowed by protocol_filter [{}]",
                    self.config.protocol_filter.join(", ")
                ),
            )
        }))
    }

    fn add_one(&self, remote: &Catalog, name: &str) -> Result<Added, Diagnostic> {
        check_name(name)?;
        let overlay = remote.get(name).ok_or_else(|| not_remote(name))?;
        if self.installed.contains(name) {
            return Err(Diagnostic::new(
                name,
                ErrorKind::StateConflict,
                format!("overlay '{name}' is already installed"),
            ));
        }
        let path = self.layout.overlay_path(name);
        if self.layout.is_populated(name) {
            return Err(Diagnostic::new(
                name,
                ErrorKind::StateConflict,
                format!("{} already exists and is not empty", path.display()),
            ));
        }
        let (source, transport) = self.choose_source(overlay)?;

        let op_id = self
            .wal
            .begin(WalOpKind::Add, name)
            .map_err(|e| wal_diag(name, &e))?;
        // Register rollback before creating side effects.
        let step = if path.is_dir() {
            RollbackStep::ClearDir(path.clone())
        } else {
            RollbackStep::RemoveDir(path.clone())
        };
        if let Err(e) = self.wal.add_rollback_step(&op_id, step) {
            self.abandon_op(&op_id);
            return Err(wal_diag(name, &e));
        }

        let target = Target::new(name, self.layout.storage(), &source);
        match ops::install(transport.as_ref(), &self.toolbox, &target) {
            Ok(hook_warnings) => Ok(Added {
                record: overlay.with_primary_source(&source),
                op_id,
                hook_warnings,
            }),
            Err(e) => {
                self.abandon_op(&op_id);
                Err(transport_diag(name, &e))
            }
        }
    }

    fn sync_one(
        &self,
        remote: &Catalog,
        name: &str,
        outcome: &mut BatchOutcome,
    ) -> Result<Synced, Diagnostic> {
        check_name(name)?;
        let installed = self.installed.get(name).ok_or_else(|| not_installed(name))?;
        let current = installed.primary_source().cloned().ok_or_else(|| {
            Diagnostic::new(
                name,
                ErrorKind::Corrupt,
                format!("installed record of '{name}' has no source"),
            )
        })?;
        let storage = self.layout.storage();

        let mut repoint_to = None;
        if let Some(upstream) = remote.get(name) {
            if !upstream.has_source_url(&current.url) {
                outcome.warn(Diagnostic::new(
                    name,
                    ErrorKind::SourceDrift,
                    format!(
                        "installed source {} is not among the remote sources of '{name}' ({})",
                        current.url,
                        upstream.source_urls().collect::<Vec<_>>().join(", ")
                    ),
                ));
                match self.choose_source(upstream) {
                    Ok(choice) => repoint_to = Some((upstream, choice)),
                    Err(d) => outcome.warn(Diagnostic::new(
                        name,
                        d.kind,
                        format!("keeping installed source: {}", d.message),
                    )),
                }
            }
        }

        let Some((upstream, (source, transport))) = repoint_to else {
            let transport =
                select_transport(&current.kind, &self.toolbox).map_err(|e| transport_diag(name, &e))?;
            let hook_warnings =
                ops::update(transport.as_ref(), &self.toolbox, &Target::new(name, storage, &current))
                    .map_err(|e| transport_diag(name, &e))?;
            return Ok(Synced {
                record: None,
                op_id: None,
                hook_warnings,
            });
        };

        let op_id = self
            .wal
            .begin(WalOpKind::Repoint, name)
            .map_err(|e| wal_diag(name, &e))?;
        let target = Target::new(name, storage, &source);
        let result = match select_transport(&current.kind, &self.toolbox) {
            Ok(old) => ops::repoint(old.as_ref(), transport.as_ref(), &self.toolbox, &target, &current),
            Err(_) => ops::replace(None, transport.as_ref(), &self.toolbox, &target, &current),
        };
        match result {
            Ok(hook_warnings) => {
                info!("{name} now follows {}", source.url);
                Ok(Synced {
                    record: Some(upstream.with_primary_source(&source)),
                    op_id: Some(op_id),
                    hook_warnings,
                })
            }
            Err(e) => {
                self.abandon_op(&op_id);
                Err(transport_diag(name, &e))
            }
        }
    }

    /// Remove the working copy and the installed entry. Returns whether an
    /// entry was removed; a name that is not installed only warns.
    fn delete_one(&mut self, name: &str, outcome: &mut BatchOutcome) -> Result<bool, Diagnostic> {
        check_name(name)?;
        let Some(overlay) = self.installed.get(name) else {
            outcome.warn(not_installed(name));
            return Ok(false);
        };
        let source = overlay
            .primary_source()
            .cloned()
            .unwrap_or_else(|| Source::new(String::new(), SourceKind::Unknown(String::new())));
        // A kind without a backend is removed as a plain directory.
        let transport = select_transport(&source.kind, &self.toolbox).ok();
        let target = Target::new(name, self.layout.storage(), &source);
        match ops::remove(transport.as_deref(), &target) {
            Ok(Removal::Removed) => {}
            Ok(Removal::Missing) => outcome.warn(Diagnostic::new(
                name,
                ErrorKind::NotFound,
                format!("working copy {} was already gone", target.path().display()),
            )),
            Err(e) => return Err(transport_diag(name, &e)),
        }
        self.installed.remove(name);
        Ok(true)
    }

    /// Commit the entries of operations whose outcome is now saved. A
    /// failed commit leaves an entry that startup recovery would roll back,
    /// so it is reported on the batch.
    fn commit_ops(&self, ops: &[(String, String)], outcome: &mut BatchOutcome) {
        for (name, op_id) in ops {
            if let Err(e) = self.wal.commit(op_id) {
                warn!("WAL commit of {op_id} for {name} failed: {e}");
                outcome.warn(Diagnostic::new(
                    name,
                    ErrorKind::StateConflict,
                    format!("completed, but WAL entry {op_id} could not be committed: {e}"),
                ));
            }
        }
    }

    /// Close the entry of an operation that failed and already cleaned up.
    fn abandon_op(&self, op_id: &str) {
        if let Err(e) = self.wal.commit(op_id) {
            warn!("WAL commit of abandoned {op_id} failed: {e}");
        }
    }

    /// Save the installed catalog, then project it onto the config files.
    /// Names in `enabled` are moved to the enabled list.
    fn persist(&self, enabled: &[String]) -> Result<(), CoreError> {
        save_or_remove(&self.installed, &self.layout.installed_file())?;
        ReposConfWriter::new(self.config.repos_conf_path(), self.layout.storage())
            .with_sync(
                self.config.sync_integration,
                &self.config.sync_type,
                &self.config.auto_sync,
            )
            .write(&self.installed)?;
        let mut fragment =
            ShellFragment::load(self.config.shell_fragment_path(), self.layout.storage())?;
        for name in enabled {
            fragment.enable(name);
        }
        fragment.write(&self.installed)?;
        Ok(())
    }

    /// Install overlays from the remote catalog.
    pub fn add<S: AsRef<str>>(&mut self, names: &[S]) -> Result<BatchOutcome, CoreError> {
        let _lock = self.lock()?;
        self.reload_installed()?;
        let mut outcome = BatchOutcome::new();
        let (remote, warnings) = self.remote_catalog();
        outcome.warnings.extend(warnings);

        let mut op_ids = Vec::new();
        let mut added = Vec::new();
        for (i, name) in names.iter().enumerate() {
            if self.cancelled() {
                outcome.cancel_remaining(&names[i..]);
                break;
            }
            let name = name.as_ref();
            match self.add_one(&remote, name) {
                Ok(done) => {
                    info!("added {name}");
                    self.installed.insert(done.record);
                    op_ids.push((name.to_owned(), done.op_id));
                    added.push(name.to_owned());
                    record_hook_warnings(&mut outcome, name, done.hook_warnings);
                    outcome.success(name, format!("Successfully added overlay {name}."));
                }
                Err(d) => outcome.fatal(d),
            }
        }

        if !added.is_empty() {
            self.persist(&added)?;
        }
        self.commit_ops(&op_ids, &mut outcome);
        Ok(outcome)
    }

    /// Update installed working copies from their sources.
    ///
    /// An overlay whose installed source is no longer offered remotely gets a
    /// `SourceDrift` warning and is moved to the first usable remote source.
    pub fn sync<S: AsRef<str>>(&mut self, names: &[S]) -> Result<BatchOutcome, CoreError> {
        let _lock = self.lock()?;
        self.reload_installed()?;
        let mut outcome = BatchOutcome::new();
        let (remote, warnings) = self.remote_catalog();
        outcome.warnings.extend(warnings);

        let mut op_ids = Vec::new();
        let mut changed = false;
        for (i, name) in names.iter().enumerate() {
            if self.cancelled() {
                outcome.cancel_remaining(&names[i..]);
                break;
            }
            let name = name.as_ref();
            match self.sync_one(&remote, name, &mut outcome) {
                Ok(done) => {
                    if let Some(record) = done.record {
                        self.installed.insert(record);
                        changed = true;
                    }
                    op_ids.extend(done.op_id.map(|id| (name.to_owned(), id)));
                    record_hook_warnings(&mut outcome, name, done.hook_warnings);
                    outcome.success(name, format!("Successfully synchronized overlay {name}."));
                }
                Err(d) => outcome.fatal(d),
            }
        }

        if changed {
            self.persist(&[])?;
        }
        self.commit_ops(&op_ids, &mut outcome);
        Ok(outcome)
    }

    /// Sync every installed overlay.
    pub fn sync_all(&mut self) -> Result<BatchOutcome, CoreError> {
        self.reload_installed()?;
        let names: Vec<String> = self.installed.names().map(str::to_owned).collect();
        self.sync(names.as_slice())
    }

    /// Remove working copies and their installed entries.
    pub fn delete<S: AsRef<str>>(&mut self, names: &[S]) -> Result<BatchOutcome, CoreError> {
        let _lock = self.lock()?;
        self.reload_installed()?;
        let mut outcome = BatchOutcome::new();

        let mut removed = false;
        for (i, name) in names.iter().enumerate() {
            if self.cancelled() {
                outcome.cancel_remaining(&names[i..]);
                break;
            }
            let name = name.as_ref();
            match self.delete_one(name, &mut outcome) {
                Ok(was_installed) => {
                    removed |= was_installed;
                    outcome.success(name, format!("Successfully deleted overlay {name}."));
                }
                Err(d) => outcome.fatal(d),
            }
        }

        if removed {
            self.persist(&[])?;
        }
        Ok(outcome)
    }

    /// Delete then add each overlay. The enabled state is kept.
    pub fn reinstall<S: AsRef<str>>(&mut self, names: &[S]) -> Result<BatchOutcome, CoreError> {
        let _lock = self.lock()?;
        self.reload_installed()?;
        let mut outcome = BatchOutcome::new();
        let (remote, warnings) = self.remote_catalog();
        outcome.warnings.extend(warnings);

        let mut op_ids = Vec::new();
        let mut changed = false;
        for (i, name) in names.iter().enumerate() {
            if self.cancelled() {
                outcome.cancel_remaining(&names[i..]);
                break;
            }
            let name = name.as_ref();
            if let Err(d) = check_name(name) {
                outcome.fatal(d);
                continue;
            }
            if !self.installed.contains(name) {
                outcome.fatal(not_installed(name));
                continue;
            }
            // Refuse before deleting anything that could not be added back.
            if !remote.contains(name) {
                outcome.fatal(not_remote(name));
                continue;
            }
            match self.delete_one(name, &mut outcome) {
                Ok(_) => changed = true,
                Err(d) => {
                    outcome.fatal(d);
                    continue;
                }
            }
            match self.add_one(&remote, name) {
                Ok(done) => {
                    self.installed.insert(done.record);
                    op_ids.push((name.to_owned(), done.op_id));
                    record_hook_warnings(&mut outcome, name, done.hook_warnings);
                    outcome.success(name, format!("Successfully reinstalled overlay {name}."));
                }
                Err(d) => outcome.fatal(d),
            }
        }

        if changed {
            self.persist(&[])?;
        }
        self.commit_ops(&op_ids, &mut outcome);
        Ok(outcome)
    }

    pub fn enable<S: AsRef<str>>(&mut self, names: &[S]) -> Result<BatchOutcome, CoreError> {
        self.toggle(names, true)
    }

    pub fn disable<S: AsRef<str>>(&mut self, names: &[S]) -> Result<BatchOutcome, CoreError> {
        self.toggle(names, false)
    }

    fn toggle<S: AsRef<str>>(&mut self, names: &[S], enable: bool) -> Result<BatchOutcome, CoreError> {
        let _lock = self.lock()?;
        self.reload_installed()?;
        let mut outcome = BatchOutcome::new();
        let mut fragment =
            ShellFragment::load(self.config.shell_fragment_path(), self.layout.storage())?;
        let verb = if enable { "enabled" } else { "disabled" };

        for (i, name) in names.iter().enumerate() {
            if self.cancelled() {
                outcome.cancel_remaining(&names[i..]);
                break;
            }
            let name = name.as_ref();
            if let Err(d) = check_name(name) {
                outcome.fatal(d);
                continue;
            }
            if !self.installed.contains(name) {
                outcome.fatal(not_installed(name));
                continue;
            }
            let moved = if enable {
                fragment.enable(name)
            } else {
                fragment.disable(name)
            };
            if !moved {
                debug!("{name} was already {verb}");
            }
            outcome.success(name, format!("Successfully {verb} overlay {name}."));
        }

        fragment.write(&self.installed)?;
        Ok(outcome)
    }

    /// Refresh every feed and forget the loaded remote catalog.
    pub fn fetch(&mut self) -> FetchReport {
        let report = self.fetcher.fetch(&self.config.feeds);
        self.remote = None;
        report
    }

    pub fn list_installed(&mut self) -> Result<Vec<InstalledOverlay>, CoreError> {
        self.reload_installed()?;
        let fragment =
            ShellFragment::load(self.config.shell_fragment_path(), self.layout.storage())?;
        Ok(self
            .installed
            .iter()
            .map(|o| InstalledOverlay {
                enabled: !fragment.is_disabled(&o.name),
                overlay: o.clone(),
            })
            .collect())
    }

    /// Every remote overlay in name order, with load warnings.
    pub fn list_remote(&mut self) -> (Vec<Overlay>, Vec<Diagnostic>) {
        let (remote, warnings) = self.remote_catalog();
        (remote.iter().cloned().collect(), warnings)
    }

    /// Look `name` up remotely first, then among installed overlays.
    pub fn info(&mut self, name: &str) -> Result<Overlay, CoreError> {
        let (remote, _) = self.remote_catalog();
        if let Some(overlay) = remote.get(name) {
            return Ok(overlay.clone());
        }
        self.reload_installed()?;
        Ok(select(&self.installed, name)?.clone())
    }

    /// Directories under storage that no installed entry accounts for.
    pub fn orphans(&mut self) -> Result<Vec<String>, CoreError> {
        self.reload_installed()?;
        let pending = self.wal.pending_overlays()?;
        Ok(scan_orphans(&self.layout, &self.installed, &pending)?)
    }
}
