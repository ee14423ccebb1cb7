use super::{json_pretty, print_warnings, quality_style, EXIT_SUCCESS};
use console::Style;
use strata_core::{CoreError, Engine};

pub fn run(engine: &mut Engine, installed: bool, json: bool) -> Result<u8, CoreError> {
    if installed {
        run_installed(engine, json)
    } else {
        run_remote(engine, json)
    }
}

fn run_remote(engine: &mut Engine, json: bool) -> Result<u8, CoreError> {
    let (overlays, warnings) = engine.list_remote();
    if json {
        println!("{}", json_pretty(&overlays)?);
        return Ok(EXIT_SUCCESS);
    }
    print_warnings(&warnings);
    if overlays.is_empty() {
        println!("no overlays in the remote catalog");
        return Ok(EXIT_SUCCESS);
    }
    println!("{:<24} {:<14} {:<12} SOURCE", "NAME", "QUALITY", "KIND");
    for o in &overlays {
        let (url, kind) = o
            .primary_source()
            .map(|s| (s.url.as_str(), s.kind.to_string()))
            .unwrap_or_default();
        // Pad before styling; escape codes would skew the width.
        let quality = quality_style(o.quality).apply_to(format!("{:<14}", o.quality.to_string()));
        println!("{:<24} {quality} {kind:<12} {url}", o.name);
    }
    Ok(EXIT_SUCCESS)
}

fn run_installed(engine: &mut Engine, json: bool) -> Result<u8, CoreError> {
    let overlays = engine.list_installed()?;
    if json {
        println!("{}", json_pretty(&overlays)?);
        return Ok(EXIT_SUCCESS);
    }
    if overlays.is_empty() {
        println!("no overlays installed");
        return Ok(EXIT_SUCCESS);
    }
    println!("{:<24} {:<9} {:<12} SOURCE", "NAME", "STATE", "KIND");
    for entry in &overlays {
        let o = &entry.overlay;
        let (url, kind) = o
            .primary_source()
            .map(|s| (s.url.as_str(), s.kind.to_string()))
            .unwrap_or_default();
        let state = if entry.enabled {
            Style::new().green().apply_to(format!("{:<9}", "enabled"))
        } else {
            Style::new().dim().apply_to(format!("{:<9}", "disabled"))
        };
        println!("{:<24} {state} {kind:<12} {url}", o.name);
    }
    Ok(EXIT_SUCCESS)
}
