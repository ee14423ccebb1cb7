use super::{json_pretty, quality_style, EXIT_SUCCESS};
use std::fmt::Write as _;
use strata_core::{CoreError, Engine};

pub fn run(engine: &mut Engine, name: &str, json: bool) -> Result<u8, CoreError> {
    let overlay = engine.info(name)?;
    if json {
        println!("{}", json_pretty(&overlay)?);
        return Ok(EXIT_SUCCESS);
    }

    println!("name:        {}", overlay.name);
    for (i, line) in overlay.description.iter().enumerate() {
        let label = if i == 0 { "description:" } else { "" };
        println!("{label:<12} {line}");
    }
    if let Some(homepage) = &overlay.homepage {
        println!("homepage:    {homepage}");
    }
    if let Some(irc) = &overlay.irc {
        println!("irc:         {irc}");
    }
    for owner in &overlay.owner {
        match &owner.name {
            Some(n) => println!("owner:       {n} <{}>", owner.email),
            None => println!("owner:       {}", owner.email),
        }
    }
    println!("quality:     {}", quality_style(overlay.quality).apply_to(overlay.quality));
    println!("status:      {}", overlay.status);
    println!("priority:    {}", overlay.priority);
    for source in &overlay.sources {
        let mut line = format!("{} ({})", source.url, source.kind);
        if let Some(branch) = &source.branch {
            let _ = write!(line, " branch={branch}");
        }
        if let Some(subpath) = &source.subpath {
            let _ = write!(line, " subpath={subpath}");
        }
        println!("source:      {line}");
    }
    for feed in &overlay.feeds {
        println!("feed:        {feed}");
    }
    Ok(EXIT_SUCCESS)
}
