mod commands;

use clap::{Parser, Subcommand};
use commands::batch::Action;
use commands::exit_code_for;
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use strata_core::{install_signal_handler, CoreError, Engine, EngineConfig, DEFAULT_CONFIG_PATH};
use tracing::debug;

#[derive(Debug, Parser)]
#[command(
    name = "strata",
    version,
    about = "Synchronize third-party overlays into a source-based package tree"
)]
struct Cli {
    /// Path to the configuration file. A missing default file means defaults.
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Output results as structured JSON.
    #[arg(long, default_value_t = false, global = true)]
    json: bool,

    /// Enable verbose (debug) logging output.
    #[arg(short, long, default_value_t = false, global = true)]
    verbose: bool,

    /// Enable trace-level logging (more detailed than --verbose).
    #[arg(long, default_value_t = false, global = true)]
    trace: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Install overlays from the remote catalog.
    Add {
        #[arg(required = true)]
        names: Vec<String>,
    },
    /// Update installed overlays from their sources.
    Sync {
        #[arg(required_unless_present = "all", conflicts_with = "all")]
        names: Vec<String>,
        /// Sync every installed overlay.
        #[arg(long, default_value_t = false)]
        all: bool,
    },
    /// Remove installed overlays and their working copies.
    Delete {
        #[arg(required = true)]
        names: Vec<String>,
    },
    /// Delete and add overlays again.
    Reinstall {
        #[arg(required = true)]
        names: Vec<String>,
    },
    /// Put installed overlays back on PORTDIR_OVERLAY.
    Enable {
        #[arg(required = true)]
        names: Vec<String>,
    },
    /// Take installed overlays off PORTDIR_OVERLAY without deleting them.
    Disable {
        #[arg(required = true)]
        names: Vec<String>,
    },
    /// List remote overlays, or installed ones with --installed.
    List {
        #[arg(long, default_value_t = false)]
        installed: bool,
    },
    /// Show everything known about one overlay.
    Info { name: String },
    /// Refresh the remote catalog feeds.
    Fetch,
    /// List directories under storage that no installed overlay owns.
    Orphans,
}

fn load_config(path: Option<&PathBuf>) -> Result<EngineConfig, CoreError> {
    match path {
        Some(p) => EngineConfig::load(p),
        None => EngineConfig::load_or_default(Path::new(DEFAULT_CONFIG_PATH)),
    }
}

fn run(cli: Cli) -> Result<u8, CoreError> {
    let config = load_config(cli.config.as_ref())?;
    debug!(
        "storage {}, {} feeds",
        config.storage.display(),
        config.feeds.len()
    );
    let mut engine = Engine::new(config)?;
    let json = cli.json;

    match cli.command {
        Commands::Add { names } => commands::batch::run(&mut engine, Action::Add, &names, json),
        Commands::Sync { all: true, .. } => commands::batch::sync_all(&mut engine, json),
        Commands::Sync { names, .. } => {
            commands::batch::run(&mut engine, Action::Sync, &names, json)
        }
        Commands::Delete { names } => {
            commands::batch::run(&mut engine, Action::Delete, &names, json)
        }
        Commands::Reinstall { names } => {
            commands::batch::run(&mut engine, Action::Reinstall, &names, json)
        }
        Commands::Enable { names } => {
            commands::batch::run(&mut engine, Action::Enable, &names, json)
        }
        Commands::Disable { names } => {
            commands::batch::run(&mut engine, Action::Disable, &names, json)
        }
        Commands::List { installed } => commands::list::run(&mut engine, installed, json),
        Commands::Info { name } => commands::info::run(&mut engine, &name, json),
        Commands::Fetch => commands::fetch::run(&mut engine, json),
        Commands::Orphans => commands::orphans::run(&mut engine, json),
    }
}

fn main() -> ExitCode {
    let default_hook = std::panic::take_hook();
    std::panic::set_hook(Box::new(move |info| {
        let msg = info.to_string();
        if msg.contains("Broken pipe")
            || msg.contains("broken pipe")
            || msg.contains("os error 32")
            || msg.contains("failed printing to stdout")
        {
            std::process::exit(0);
        }
        default_hook(info);
    }));

    let cli = Cli::parse();

    let default_level = if cli.trace {
        "trace"
    } else if cli.verbose {
        "debug"
    } else {
        "warn"
    };
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_env("STRATA_LOG")
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(default_level)),
        )
        .with_writer(std::io::stderr)
        .with_target(false)
        .without_time()
        .init();

    install_signal_handler();

    match run(cli) {
        Ok(code) => ExitCode::from(code),
        Err(e) => {
            eprintln!("error: {e}");
            ExitCode::from(exit_code_for(&e))
        }
    }
}
