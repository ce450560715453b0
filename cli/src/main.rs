//! Mimic CLI
//!
//! Simulate shaped traffic against an in-memory transport and analyze
//! packet traces for size/timing fingerprints.

mod report;
mod simulate;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use mimic_obfuscation::ObfuscationConfig;
use std::path::{Path, PathBuf};
use tracing::info;
use tracing_subscriber::EnvFilter;

use report::{Row, TraceReport, parse_trace, table, trace_rows};
use simulate::SimulateOptions;

#[derive(Parser, Debug)]
#[command(name = "mimic")]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Run in verbose mode
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Shape synthetic traffic and report what an observer would see
    Simulate {
        /// Path to configuration file
        #[arg(short, long)]
        config: Option<PathBuf>,
        /// Number of data units to send
        #[arg(long, default_value_t = 200)]
        packets: usize,
        /// Units per write batch
        #[arg(long, default_value_t = 1)]
        batch: usize,
        /// Smallest synthetic payload
        #[arg(long, default_value_t = 40)]
        min_size: usize,
        /// Largest synthetic payload
        #[arg(long, default_value_t = 1200)]
        max_size: usize,
        /// Seed for reproducible runs
        #[arg(long)]
        seed: Option<u64>,
        /// Print JSON instead of tables
        #[arg(long)]
        json: bool,
    },
    /// Analyze a `timestamp_seconds,size` CSV trace
    Analyze {
        /// Trace file
        file: PathBuf,
        /// Print JSON instead of tables
        #[arg(long)]
        json: bool,
    },
    /// Show the resolved shaping profile
    Config {
        /// Path to configuration file
        #[arg(short, long)]
        config: Option<PathBuf>,
    },
}

async fn load_config(path: Option<&Path>) -> Result<ObfuscationConfig> {
    match path {
        Some(path) => {
            let config = ObfuscationConfig::load(path)
                .await
                .with_context(|| format!("loading {}", path.display()))?;
            info!("Loaded configuration from {}", path.display());
            Ok(config)
        }
        None => Ok(ObfuscationConfig::default()),
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    // Initialize logging
    let default_level = if args.verbose { "debug" } else { "info" };
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_writer(std::io::stderr)
        .init();

    match args.command {
        Commands::Simulate {
            config,
            packets,
            batch,
            min_size,
            max_size,
            seed,
            json,
        } => {
            let config = load_config(config.as_deref()).await?;
            let opts = SimulateOptions {
                packets,
                batch,
                min_size,
                max_size,
                seed,
            };
            let report = simulate::run(&config, &opts).await?;

            if json {
                println!("{}", serde_json::to_string_pretty(&report)?);
            } else {
                let mut rows = vec![
                    Row::new("padding", report.profile.distribution),
                    Row::new("timing", report.profile.timing),
                    Row::new("burst pattern", report.profile.pattern),
                    Row::new("bytes in", report.bytes_in),
                    Row::new("bytes out", report.bytes_out),
                    Row::new("downstream writes", report.downstream_writes),
                ];
                if report.bytes_in > 0 {
                    let overhead = report.bytes_out as f64 / report.bytes_in as f64 - 1.0;
                    rows.push(Row::new("overhead", format!("{:.1}%", overhead * 100.0)));
                }
                if let Some(stats) = &report.shaper {
                    rows.push(Row::new("bursts completed", stats.burst_count));
                    rows.push(Row::new("final state", format!("{:?}", stats.state)));
                }
                rows.extend(trace_rows(&report.trace));
                println!("{}", table(rows));
            }
        }
        Commands::Analyze { file, json } => {
            let content = tokio::fs::read_to_string(&file)
                .await
                .with_context(|| format!("reading {}", file.display()))?;
            let records = parse_trace(&content)?;
            info!("Parsed {} packets from {}", records.len(), file.display());

            let report = TraceReport::from_records(&records);
            if json {
                println!("{}", serde_json::to_string_pretty(&report)?);
            } else {
                println!("{}", table(trace_rows(&report)));
            }
        }
        Commands::Config { config } => {
            let config = load_config(config.as_deref()).await?;
            let profile = config.resolve();
            let rows = vec![
                Row::new("enabled", profile.enabled),
                Row::new("padding", profile.distribution),
                Row::new("timing", profile.timing),
                Row::new("burst pattern", profile.pattern),
                Row::new("min delay", format!("{:?}", profile.min_delay)),
                Row::new("max delay", format!("{:?}", profile.max_delay)),
                Row::new("debug", profile.debug),
            ];
            println!("{}", table(rows));
        }
    }

    Ok(())
}
