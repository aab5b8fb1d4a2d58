//! Config validation CLI tool
//!
//! Validates a powertierd configuration file and reports any errors.

use powertier_config::{ConfigError, CURRENT_CONFIG_VERSION, load_config};
use powertier_util::{Retention, default_config_path};
use std::path::PathBuf;
use std::process::ExitCode;

fn main() -> ExitCode {
    let args: Vec<String> = std::env::args().collect();

    let config_path = match args.get(1) {
        Some(path) => PathBuf::from(path),
        None => {
            let default_path = default_config_path();
            eprintln!("Usage: validate-config [config-file]");
            eprintln!();
            eprintln!("Validates a powertierd configuration file.");
            eprintln!();
            eprintln!("If no path is provided, uses: {}", default_path.display());
            eprintln!();
            eprintln!("Example:");
            eprintln!("  validate-config {}", default_path.display());
            eprintln!("  validate-config config.example.toml");
            return ExitCode::from(2);
        }
    };

    if !config_path.exists() {
        eprintln!("Error: Configuration file not found: {}", config_path.display());
        return ExitCode::from(1);
    }

    match load_config(&config_path) {
        Ok(settings) => {
            println!("✓ Configuration is valid");
            println!();
            println!("Summary:");
            println!("  Config version: {}", CURRENT_CONFIG_VERSION);
            println!("  Data directory: {}", settings.service.data_dir.display());
            println!("  State database: {}", settings.service.state_db.display());
            match &settings.remote {
                Some(remote) => println!("  Remote: {} ({})", remote.repo, remote.branch),
                None => println!("  Remote: none"),
            }

            println!();
            println!("Tiers:");
            for tier in &settings.tiers {
                let retention = match tier.retention {
                    Retention::SinceMidnight => "since midnight".to_string(),
                    Retention::Window { seconds } => format!("last {}s", seconds),
                    Retention::Periods { max } => format!("{} periods", max),
                };
                let remote = tier
                    .remote_path()
                    .map(|p| format!(" -> {}", p))
                    .unwrap_or_default();
                println!(
                    "  - {} [{}, {}]: {}{}",
                    tier.name, tier.resolution, retention, tier.file, remote
                );
            }

            println!();
            println!("Jobs:");
            for job in &settings.jobs {
                println!(
                    "  - {} at {}: {} -> {}{}",
                    job.name,
                    job.at,
                    job.source,
                    job.target,
                    if job.sync { " (sync)" } else { "" }
                );
            }

            ExitCode::SUCCESS
        }
        Err(e) => {
            eprintln!("✗ Configuration validation failed");
            eprintln!();
            match &e {
                ConfigError::ReadError(io_err) => {
                    eprintln!("Failed to read file: {}", io_err);
                }
                ConfigError::ParseError(parse_err) => {
                    eprintln!("TOML parse error:");
                    eprintln!("  {}", parse_err);
                }
                ConfigError::ValidationFailed { errors } => {
                    eprintln!("Validation errors ({}):", errors.len());
                    for err in errors {
                        eprintln!("  - {}", err);
                    }
                }
                ConfigError::UnsupportedVersion(ver) => {
                    eprintln!(
                        "Unsupported config version: {} (expected {})",
                        ver, CURRENT_CONFIG_VERSION
                    );
                }
            }
            ExitCode::from(1)
        }
    }
}
