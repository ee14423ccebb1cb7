//! Execution of external tools.
//!
//! Backends describe each tool call as an [`Invocation`] (an argv list, never
//! a shell string) and hand it to a [`ToolRunner`]. [`SystemRunner`] spawns
//! real processes; [`RecordingRunner`] records calls and simulates their
//! effect on disk so the engine can be exercised without any tool installed.

use std::collections::HashSet;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};
use std::sync::Mutex;
use tracing::debug;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Invocation {
    pub program: String,
    pub args: Vec<String>,
    pub cwd: Option<PathBuf>,
    pub env: Vec<(String, String)>,
}

impl Invocation {
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
            cwd: None,
            env: Vec::new(),
        }
    }

    #[must_use]
    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }

    #[must_use]
    pub fn path_arg(self, path: &Path) -> Self {
        self.arg(path.to_string_lossy().into_owned())
    }

    #[must_use]
    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    #[must_use]
    pub fn current_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.cwd = Some(dir.into());
        self
    }

    #[must_use]
    pub fn env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.push((key.into(), value.into()));
        self
    }

    /// The command line as a shell would need it, for logs and messages.
    pub fn display(&self) -> String {
        shell_words::join(std::iter::once(&self.program).chain(self.args.iter()))
    }

    /// Value following `flag` in the argument list.
    pub fn value_of(&self, flag: &str) -> Option<&str> {
        self.args
            .iter()
            .position(|a| a == flag)
            .and_then(|i| self.args.get(i + 1))
            .map(String::as_str)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ToolOutput {
    /// Exit code; -1 when the process was killed by a signal.
    pub code: i32,
    pub stdout: String,
    pub stderr: String,
}

impl ToolOutput {
    pub fn success(&self) -> bool {
        self.code == 0
    }
}

pub trait ToolRunner: Send + Sync {
    /// Run to completion. `Err` means the program could not be started.
    fn run(&self, invocation: &Invocation) -> io::Result<ToolOutput>;

    fn tool_exists(&self, program: &str) -> bool;
}

/// Runs tools as child processes with stdin closed.
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemRunner;

impl ToolRunner for SystemRunner {
    fn run(&self, invocation: &Invocation) -> io::Result<ToolOutput> {
        debug!("exec: {}", invocation.display());
        let mut cmd = Command::new(&invocation.program);
        cmd.args(&invocation.args).stdin(Stdio::null());
        if let Some(cwd) = &invocation.cwd {
            cmd.current_dir(cwd);
        }
        for (k, v) in &invocation.env {
            cmd.env(k, v);
        }
        let output = cmd.output()?;
        Ok(ToolOutput {
            code: output.status.code().unwrap_or(-1),
            stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
            stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
        })
    }

    fn tool_exists(&self, program: &str) -> bool {
        if program.contains('/') {
            return Path::new(program).is_file();
        }
        Command::new("which")
            .arg(program)
            .output()
            .map(|o| o.status.success())
            .unwrap_or(false)
    }
}

type Effect = Box<dyn Fn(&Invocation) -> io::Result<()> + Send + Sync>;

struct Failure {
    program: String,
    needle: Option<String>,
    output: ToolOutput,
}

/// Records every invocation and simulates tool effects.
///
/// Effects run for invocations that do not fail. Programs registered with
/// [`RecordingRunner::missing_tool`] report as absent and fail to start.
#[derive(Default)]
pub struct RecordingRunner {
    calls: Mutex<Vec<Invocation>>,
    effects: Mutex<Vec<(String, Effect)>>,
    failures: Mutex<Vec<Failure>>,
    missing: Mutex<HashSet<String>>,
}

impl RecordingRunner {
    pub fn new() -> Self {
        Self::default()
    }

    /// A runner whose effects mimic what each supported tool leaves on disk.
    pub fn simulating() -> Self {
        let runner = Self::new();
        for program in [
            "git", "hg", "bzr", "svn", "cvs", "darcs", "rsync", "tar", "bsdtar", "curl",
            "mount", "umount",
        ] {
            runner.add_effect(program, simulate);
        }
        runner
    }

    /// Register an effect for `program`, replacing any earlier one.
    pub fn add_effect(
        &self,
        program: &str,
        effect: impl Fn(&Invocation) -> io::Result<()> + Send + Sync + 'static,
    ) {
        if let Ok(mut effects) = self.effects.lock() {
            effects.retain(|(p, _)| p != program);
            effects.push((program.to_owned(), Box::new(effect)));
        }
    }

    #[must_use]
    pub fn with_effect(
        self,
        program: &str,
        effect: impl Fn(&Invocation) -> io::Result<()> + Send + Sync + 'static,
    ) -> Self {
        self.add_effect(program, effect);
        self
    }

    /// Make `program` exit with `code` and `stderr` whenever one of its
    /// arguments contains `needle` (or always, if `needle` is `None`).
    pub fn fail_when(&self, program: &str, needle: Option<&str>, code: i32, stderr: &str) {
        if let Ok(mut failures) = self.failures.lock() {
            failures.push(Failure {
                program: program.to_owned(),
                needle: needle.map(str::to_owned),
                output: ToolOutput {
                    code,
                    stdout: String::new(),
                    stderr: stderr.to_owned(),
                },
            });
        }
    }

    pub fn missing_tool(&self, program: &str) {
        if let Ok(mut missing) = self.missing.lock() {
            missing.insert(program.to_owned());
        }
    }

    pub fn calls(&self) -> Vec<Invocation> {
        self.calls.lock().map(|c| c.clone()).unwrap_or_default()
    }

    pub fn calls_to(&self, program: &str) -> Vec<Invocation> {
        self.calls()
            .into_iter()
            .filter(|c| c.program == program)
            .collect()
    }

    pub fn clear_calls(&self) {
        if let Ok(mut calls) = self.calls.lock() {
            calls.clear();
        }
    }
}

impl ToolRunner for RecordingRunner {
    fn run(&self, invocation: &Invocation) -> io::Result<ToolOutput> {
        self.calls
            .lock()
            .map_err(|e| io::Error::other(format!("mutex poisoned: {e}")))?
            .push(invocation.clone());

        if !self.tool_exists(&invocation.program) {
            return Err(io::Error::new(
                io::ErrorKind::NotFound,
                format!("{}: command not found", invocation.program),
            ));
        }

        let failures = self
            .failures
            .lock()
            .map_err(|e| io::Error::other(format!("mutex poisoned: {e}")))?;
        let failed = failures.iter().find(|f| {
            f.program == invocation.program
                && f.needle
                    .as_deref()
                    .is_none_or(|n| invocation.args.iter().any(|a| a.contains(n)))
        });
        if let Some(f) = failed {
            return Ok(f.output.clone());
        }
        drop(failures);

        let effects = self
            .effects
            .lock()
            .map_err(|e| io::Error::other(format!("mutex poisoned: {e}")))?;
        if let Some((_, effect)) = effects.iter().find(|(p, _)| *p == invocation.program) {
            effect(invocation)?;
        }
        Ok(ToolOutput::default())
    }

    fn tool_exists(&self, program: &str) -> bool {
        self.missing
            .lock()
            .map(|m| !m.contains(program))
            .unwrap_or(false)
    }
}

fn populate(dir: &Path, marker: &str) -> io::Result<()> {
    fs::create_dir_all(dir.join("profiles"))?;
    fs::write(dir.join("profiles").join("repo_name"), marker)
}

fn last_arg_path(inv: &Invocation) -> Option<PathBuf> {
    inv.args.last().map(PathBuf::from)
}

/// Filesystem effect of a successful tool run.
fn simulate(inv: &Invocation) -> io::Result<()> {
    let first = inv.args.iter().find(|a| !a.starts_with('-')).map(String::as_str);
    match (inv.program.as_str(), first) {
        ("git" | "hg", Some("clone")) | ("bzr", Some("branch")) | ("darcs", Some("get")) => {
            if let Some(target) = last_arg_path(inv) {
                populate(&target, &inv.program)?;
                if inv.program == "hg" {
                    let url = &inv.args[inv.args.len().saturating_sub(2)];
                    fs::create_dir_all(target.join(".hg"))?;
                    fs::write(
                        target.join(".hg").join("hgrc"),
                        format!("[paths]\ndefault = {url}\n"),
                    )?;
                }
            }
        }
        ("svn", Some("co")) => {
            if let Some(target) = last_arg_path(inv) {
                populate(&target, "svn")?;
            }
        }
        ("cvs", _) if inv.args.iter().any(|a| a == "co") => {
            if let (Some(cwd), Some(name)) = (&inv.cwd, inv.value_of("-d")) {
                populate(&cwd.join(name), "cvs")?;
            }
        }
        ("rsync", _) => {
            if let Some(target) = last_arg_path(inv) {
                populate(&target, "rsync")?;
            }
        }
        ("tar" | "bsdtar", _) => {
            if let Some(dest) = inv.value_of("-C") {
                populate(Path::new(dest), "archive")?;
            }
        }
        ("curl", _) => {
            if let Some(out) = inv.value_of("-o") {
                fs::write(out, b"archive")?;
            }
        }
        ("mount", _) => {
            if let Some(target) = last_arg_path(inv) {
                populate(&target, "squashfs")?;
            }
        }
        ("umount", _) => {
            if let Some(target) = last_arg_path(inv) {
                strata_store::clear_dir(&target)?;
            }
        }
        _ => {}
    }
    Ok(())
}
