use serde::Serialize;
use strata_catalog::{Diagnostic, ErrorKind};

/// A successfully processed item.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Report {
    pub name: String,
    pub message: String,
}

/// Per-item results of a batch operation, in input order.
///
/// The three lists are disjoint per item: an item is either a success or a
/// fatal, and may additionally carry warnings.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct BatchOutcome {
    pub successes: Vec<Report>,
    pub warnings: Vec<Diagnostic>,
    pub fatals: Vec<Diagnostic>,
}

impl BatchOutcome {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn success(&mut self, name: impl Into<String>, message: impl Into<String>) {
        self.successes.push(Report {
            name: name.into(),
            message: message.into(),
        });
    }

    pub fn warn(&mut self, diagnostic: Diagnostic) {
        self.warnings.push(diagnostic);
    }

    pub fn fatal(&mut self, diagnostic: Diagnostic) {
        self.fatals.push(diagnostic);
    }

    /// Record every name in `rest` as cancelled.
    pub fn cancel_remaining<S: AsRef<str>>(&mut self, rest: &[S]) {
        for name in rest {
            self.fatals.push(Diagnostic::new(
                name.as_ref(),
                ErrorKind::Cancelled,
                "cancelled before this overlay was processed",
            ));
        }
    }

    pub fn is_success(&self) -> bool {
        self.fatals.is_empty()
    }

    pub fn exit_code(&self) -> i32 {
        i32::from(!self.is_success())
    }

    pub fn fatal_kinds(&self) -> impl Iterator<Item = ErrorKind> + '_ {
        self.fatals.iter().map(|d| d.kind)
    }
}
