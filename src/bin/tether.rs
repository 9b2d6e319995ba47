//! Module directory tooling

use clap::{Parser, Subcommand};
use serde::Serialize;
use std::path::{Path, PathBuf};
use tether::module::{ModuleDir, NumberedBinary};
use tether::{logging, BridgeConfig, Result};

#[derive(Parser)]
#[command(name = "tether")]
#[command(about = "Inspect tether module directories and their numbered binaries", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Configuration file (defaults to the nearest .tether.toml)
    #[arg(short, long, global = true, value_name = "FILE")]
    config: Option<PathBuf>,

    /// Verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// List module directories below ROOT
    Scan {
        #[arg(value_name = "ROOT", default_value = ".")]
        root: PathBuf,

        /// Print JSON instead of a table
        #[arg(long)]
        json: bool,
    },

    /// Print the path the next rebuild of a module should write
    NextBinary {
        #[arg(value_name = "MODULE_DIR")]
        dir: PathBuf,
    },

    /// Print the default configuration as TOML
    Config,
}

#[derive(Serialize)]
struct ScanEntry {
    name: String,
    path: PathBuf,
    latest: Option<NumberedBinary>,
    needs_rebuild: bool,
}

fn main() {
    let cli = Cli::parse();

    let result = load_config(cli.config.as_deref()).and_then(|config| {
        let mut log = config.logging.to_log_config();
        if cli.verbose {
            log.level = logging::Level::DEBUG;
        }
        let _guard = logging::init_with_config(log);

        match cli.command {
            Commands::Scan { root, json } => scan(&root, json, &config),
            Commands::NextBinary { dir } => next_binary(&dir, &config),
            Commands::Config => print_default_config(),
        }
    });

    if let Err(e) = result {
        eprintln!("Error: {}", e);
        std::process::exit(1);
    }
}

fn load_config(path: Option<&Path>) -> Result<BridgeConfig> {
    match path {
        Some(path) => BridgeConfig::load(path),
        None => Ok(BridgeConfig::discover()),
    }
}

fn scan(root: &Path, json: bool, config: &BridgeConfig) -> Result<()> {
    let mut entries = Vec::new();
    for dir in ModuleDir::discover(root, &config.modules)? {
        entries.push(ScanEntry {
            name: dir.name().to_string(),
            path: dir.root().to_path_buf(),
            latest: dir.latest_binary()?,
            needs_rebuild: dir.needs_rebuild()?,
        });
    }

    if json {
        let text = serde_json::to_string_pretty(&entries).map_err(|e| tether::BridgeError::Config(e.to_string()))?;
        println!("{text}");
        return Ok(());
    }

    if entries.is_empty() {
        println!("no modules under {}", root.display());
        return Ok(());
    }
    for entry in &entries {
        let latest = entry
            .latest
            .as_ref()
            .map_or_else(|| "-".to_string(), |b| format!("#{}", b.number));
        let status = if entry.needs_rebuild { "stale" } else { "up to date" };
        println!("{:<24} {:>6}  {:<10} {}", entry.name, latest, status, entry.path.display());
    }
    Ok(())
}

fn next_binary(dir: &Path, config: &BridgeConfig) -> Result<()> {
    let module = ModuleDir::open(dir, &config.modules)?;
    println!("{}", module.next_binary_path()?.display());
    Ok(())
}

fn print_default_config() -> Result<()> {
    print!("{}", BridgeConfig::generate_default());
    Ok(())
}
