//! rejoin-tool: keeps a VRChat client in the instance you last joined.
//!
//! ## Subcommands
//!
//! - `run`: Start watching and read console commands from stdin
//! - `latest`: Print the latest instance recorded in the newest client log
//! - `config`: Print the effective configuration

mod console;
mod logging;

use clap::{Parser, Subcommand};
use std::path::PathBuf;

use rejoin_core::{load_config, RejoinConfig, RejoinError};

#[derive(Parser)]
#[command(name = "rejoin-tool")]
#[command(about = "Relaunches VRChat into the last instance after a crash or forced move")]
#[command(version)]
struct Cli {
    /// Configuration file (defaults to ~/.auto-rejoin/config.toml)
    #[arg(long, global = true, value_name = "PATH")]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Start watching; then type stop, start, sleep, status or quit
    Run,

    /// Print the latest instance in the newest client log
    Latest,

    /// Print the effective configuration
    Config,
}

fn main() {
    let cli = Cli::parse();

    let config = match load_config(cli.config.as_deref()) {
        Ok(config) => config,
        Err(err) => {
            let _logging_guard = logging::init(false);
            tracing::error!(error = %err, "Failed to load configuration");
            std::process::exit(1);
        }
    };
    let _logging_guard = logging::init(config.debug);

    let result = match cli.command {
        Commands::Run => console::run(config),
        Commands::Latest => print_latest(&config),
        Commands::Config => print_config(cli.config, &config),
    };

    if let Err(err) = result {
        tracing::error!(error = %err, "rejoin-tool failed");
        std::process::exit(1);
    }
}

fn print_latest(config: &RejoinConfig) -> Result<(), RejoinError> {
    let log_dir = config.log_dir()?;
    let log_path = rejoin_core::latest_log_file(&log_dir, &config.client.log_file_marker)?;
    let content = fs_err::read(&log_path).map_err(|source| RejoinError::Io {
        context: format!("reading {}", log_path.display()),
        source,
    })?;

    let zone = config.time_zone();
    match rejoin_core::scan_latest_instance(&String::from_utf8_lossy(&content), &zone) {
        Some(instance) => {
            println!("{}", instance);
            println!(
                "{}",
                rejoin_core::launch::launch_url(&config.client.url_scheme, instance.id())
            );
        }
        None => println!("No instance in {}", log_path.display()),
    }
    Ok(())
}

fn print_config(path: Option<PathBuf>, config: &RejoinConfig) -> Result<(), RejoinError> {
    let path = match path {
        Some(path) => path,
        None => rejoin_core::default_config_path()?,
    };
    let rendered = toml::to_string_pretty(config).map_err(|err| RejoinError::ConfigMalformed {
        path: path.clone(),
        details: err.to_string(),
    })?;

    println!("# {}", path.display());
    print!("{}", rendered);
    Ok(())
}
