pub mod batch;
pub mod fetch;
pub mod info;
pub mod list;
pub mod orphans;

use strata_catalog::{Diagnostic, ErrorKind, Quality};
use strata_core::{BatchOutcome, CoreError};

pub const EXIT_SUCCESS: u8 = 0;
pub const EXIT_FAILURE: u8 = 1;
pub const EXIT_CONFIG_ERROR: u8 = 2;
pub const EXIT_STORE_ERROR: u8 = 3;
pub const EXIT_BUSY: u8 = 4;

pub fn json_pretty(value: &impl serde::Serialize) -> Result<String, CoreError> {
    Ok(serde_json::to_string_pretty(value)?)
}

/// Exit code for an error that aborted a whole command.
pub fn exit_code_for(err: &CoreError) -> u8 {
    match err {
        CoreError::Config { .. } => EXIT_CONFIG_ERROR,
        CoreError::Busy { .. } => EXIT_BUSY,
        CoreError::Catalog(e) if e.kind() == ErrorKind::NotFound => EXIT_FAILURE,
        CoreError::Store(_) | CoreError::Catalog(_) | CoreError::Io(_) => EXIT_STORE_ERROR,
        CoreError::Remote(_) | CoreError::Transport(_) | CoreError::Serialization(_) => {
            EXIT_FAILURE
        }
    }
}

pub fn quality_style(quality: Quality) -> console::Style {
    use console::Style;
    match quality {
        Quality::Core | Quality::Stable => Style::new().green(),
        Quality::Testing => Style::new().cyan(),
        Quality::Experimental => Style::new().yellow(),
        Quality::Broken => Style::new().red(),
    }
}

fn label(kind: ErrorKind) -> String {
    use console::Style;
    match kind {
        ErrorKind::SourceDrift | ErrorKind::DuplicateOverlay => {
            Style::new().yellow().apply_to(kind).to_string()
        }
        _ => Style::new().red().apply_to(kind).to_string(),
    }
}

/// Print feed and catalog warnings to stderr.
pub fn print_warnings(warnings: &[Diagnostic]) {
    for w in warnings {
        eprintln!("warning: [{}] {}: {}", label(w.kind), w.name, w.message);
    }
}

/// Print a batch outcome and return its exit code.
pub fn report(outcome: &BatchOutcome, json: bool) -> Result<u8, CoreError> {
    if json {
        println!("{}", json_pretty(outcome)?);
    } else {
        for s in &outcome.successes {
            println!("✓ {}", s.message);
        }
        print_warnings(&outcome.warnings);
        for f in &outcome.fatals {
            eprintln!("✗ [{}] {}: {}", label(f.kind), f.name, f.message);
        }
    }
    Ok(if outcome.is_success() {
        EXIT_SUCCESS
    } else {
        EXIT_FAILURE
    })
}
