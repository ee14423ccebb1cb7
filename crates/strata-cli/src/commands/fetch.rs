use super::{json_pretty, print_warnings, EXIT_FAILURE, EXIT_SUCCESS};
use strata_core::{CoreError, Engine};

pub fn run(engine: &mut Engine, json: bool) -> Result<u8, CoreError> {
    let report = engine.fetch();
    if json {
        let payload = serde_json::json!({
            "ok": report.ok,
            "changed": report.changed,
            "files": report.files,
            "warnings": report.warnings,
        });
        println!("{}", json_pretty(&payload)?);
    } else {
        print_warnings(&report.warnings);
        let verdict = if report.changed { "updated" } else { "unchanged" };
        println!("fetched {} feeds: {verdict}", report.files.len());
    }
    Ok(if report.ok { EXIT_SUCCESS } else { EXIT_FAILURE })
}
