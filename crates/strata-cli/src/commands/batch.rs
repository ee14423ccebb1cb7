use super::report;
use strata_core::{CoreError, Engine};

/// The mutating batch commands.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Action {
    Add,
    Sync,
    Delete,
    Reinstall,
    Enable,
    Disable,
}

pub fn run(engine: &mut Engine, action: Action, names: &[String], json: bool) -> Result<u8, CoreError> {
    let outcome = match action {
        Action::Add => engine.add(names)?,
        Action::Sync => engine.sync(names)?,
        Action::Delete => engine.delete(names)?,
        Action::Reinstall => engine.reinstall(names)?,
        Action::Enable => engine.enable(names)?,
        Action::Disable => engine.disable(names)?,
    };
    report(&outcome, json)
}

pub fn sync_all(engine: &mut Engine, json: bool) -> Result<u8, CoreError> {
    let outcome = engine.sync_all()?;
    report(&outcome, json)
}
