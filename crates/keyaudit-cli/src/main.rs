use std::io::IsTerminal;
use std::path::{Path, PathBuf};
use std::process;

use clap::{Parser, Subcommand, ValueEnum};
use dialoguer::Confirm;
use dialoguer::theme::ColorfulTheme;
use keyaudit_core::backend::DynamoDbBackend;
use keyaudit_core::{AuditConfig, Correction, DetectionMode, TableReader};
use tracing::{error, info};

/// keyaudit: detect and correct item values a new secondary index key cannot hold.
#[derive(Parser, Debug)]
#[command(name = "keyaudit", version)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Scan the table and report key violations.
    Detect {
        /// TOML configuration file.
        #[arg(short, long)]
        config: PathBuf,

        #[arg(short, long, value_enum, default_value_t = DetectMode::Keep)]
        mode: DetectMode,

        /// Skip the confirmation prompt for destructive modes.
        #[arg(short, long)]
        yes: bool,
    },
    /// Apply an edited violation report to the table.
    Correct {
        /// TOML configuration file.
        #[arg(short, long)]
        config: PathBuf,

        #[arg(short, long, value_enum)]
        mode: CorrectMode,

        /// Only update attributes that still hold the detected value.
        #[arg(long)]
        conditional: bool,

        /// Skip the confirmation prompt for destructive modes.
        #[arg(short, long)]
        yes: bool,
    },
}

#[derive(ValueEnum, Clone, Copy, Debug, PartialEq, Eq)]
enum DetectMode {
    /// Report only.
    Keep,
    /// Report and delete violating items.
    Delete,
}

#[derive(ValueEnum, Clone, Copy, Debug, PartialEq, Eq)]
enum CorrectMode {
    /// Write update values or remove blank attributes.
    Update,
    /// Delete every listed item.
    Delete,
}

fn confirm(prompt: &str) -> bool {
    if !std::io::stdin().is_terminal() {
        return false;
    }
    Confirm::with_theme(&ColorfulTheme::default())
        .with_prompt(prompt)
        .default(false)
        .interact()
        .unwrap_or(false)
}

fn load_config(path: &Path) -> Result<AuditConfig, Box<dyn std::error::Error>> {
    let config = AuditConfig::from_file(path)?;
    info!(config = %path.display(), table = %config.table_name, "loaded configuration");
    Ok(config)
}

fn run(cli: Cli) -> Result<(), Box<dyn std::error::Error>> {
    match cli.command {
        Command::Detect { config, mode, yes } => {
            let config = load_config(&config)?;
            let mode = match mode {
                DetectMode::Keep => DetectionMode::Keep,
                DetectMode::Delete => DetectionMode::Delete,
            };
            if mode == DetectionMode::Delete
                && !yes
                && !confirm(&format!(
                    "Delete every item in '{}' that violates the candidate keys?",
                    config.table_name
                ))
            {
                return Err("aborted: deletion not confirmed".into());
            }
            let backend = DynamoDbBackend::connect(&config)?;
            let summary = TableReader::new(&config, &backend).scan(mode)?;
            println!("Items scanned:      {}", summary.items_scanned);
            println!("Violations found:   {}", summary.violations_found);
            if mode == DetectionMode::Delete {
                println!("Violations deleted: {}", summary.violations_deleted);
            }
            if config.record_details {
                println!("Report:             {}", config.detection_output_path.display());
            }
        }
        Command::Correct {
            config,
            mode,
            conditional,
            yes,
        } => {
            let config = load_config(&config)?;
            let input = config.correction_input()?.display().to_string();
            let backend = DynamoDbBackend::connect(&config)?;
            let correction = Correction::new(&config, &backend);
            match mode {
                CorrectMode::Update => {
                    let conditional = conditional
                        || (!yes
                            && confirm(
                                "Only update attributes that still hold the value recorded at detection time?",
                            ));
                    let summary = correction.update_from_file(conditional)?;
                    println!("Update requests:      {}", summary.violation_update_requests);
                    println!("Successful updates:   {}", summary.successful_updates);
                    if conditional {
                        println!("Conditional failures: {}", summary.conditional_update_failures);
                    }
                    println!("Unexpected errors:    {}", summary.unexpected_errors);
                    if let Some(path) = &summary.failure_report {
                        println!("Failed rows:          {}", path.display());
                    }
                }
                CorrectMode::Delete => {
                    if !yes
                        && !confirm(&format!(
                            "Delete every item listed in '{input}' from '{}'?",
                            config.table_name
                        ))
                    {
                        return Err("aborted: deletion not confirmed".into());
                    }
                    let summary = correction.delete_from_file()?;
                    println!("Delete requests: {}", summary.violation_update_requests);
                    println!("Items deleted:   {}", summary.items_deleted);
                }
            }
        }
    }
    Ok(())
}

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    if let Err(e) = run(cli) {
        error!("{e}");
        eprintln!("Error: {e}");
        process::exit(1);
    }
}
