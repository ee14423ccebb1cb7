use super::{json_pretty, EXIT_SUCCESS};
use strata_core::{CoreError, Engine};

pub fn run(engine: &mut Engine, json: bool) -> Result<u8, CoreError> {
    let orphans = engine.orphans()?;
    if json {
        println!("{}", json_pretty(&orphans)?);
    } else if orphans.is_empty() {
        println!("no orphaned working copies");
    } else {
        let storage = engine.layout().storage().to_path_buf();
        for name in &orphans {
            println!("{name}\t{}", storage.join(name).display());
        }
    }
    Ok(EXIT_SUCCESS)
}
