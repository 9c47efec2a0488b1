//! orphanq CLI — workload generator and durability verifier.
//!
//! `run` writes the transcript to stdout and logs to stderr. `verify`
//! prints nothing when the crashed state is consistent with the transcript.
//!
//! Exit status: 0 on success, 1 on a harness or protocol error, 2 when a
//! confirmed write was lost.

use clap::{Parser, Subcommand};
use orphanq::config::{Config, WorkloadConfig};
use orphanq::oracle::{Verdict, recovered_items, verify};
use orphanq::telemetry::{TelemetryConfig, init_telemetry};
use orphanq::transcript::Transcript;
use orphanq::workload::sqlite_workload;
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;

const EXIT_NOT_DURABLE: u8 = 2;

#[derive(Parser)]
#[command(name = "orphanq", about = "Crash-consistency oracle for the orphan queue")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Run the workload, writing the transcript to stdout
    Run {
        /// Workload directory; the queue lives in its `orphanqueue` subdirectory
        #[arg(long)]
        dir: Option<PathBuf>,
        /// TOML file with workload settings
        #[arg(long)]
        config: Option<PathBuf>,
        /// Number of times to open and close the queue
        #[arg(long)]
        restarts: Option<usize>,
        /// Number of times per restart to read from the queue
        #[arg(long)]
        reads: Option<usize>,
        /// Number of times to write to the queue, in parallel
        #[arg(long)]
        writes: Option<usize>,
        /// Probability of not dequeueing an item after peeking it
        #[arg(long)]
        probability: Option<f64>,
    },
    /// Check a crashed state directory against its transcript
    Verify {
        /// Crashed state directory (containing `orphanqueue`)
        crashed_dir: PathBuf,
        /// Reconstructed stdout of the crashed workload
        transcript: PathBuf,
    },
    /// Print the orphans still queued, without removing them
    Inspect {
        /// Workload or crashed state directory
        dir: PathBuf,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<ExitCode> {
    dotenvy::dotenv().ok();
    let cli = Cli::parse();
    let config = Config::from_env()?;

    match cli.command {
        Command::Run {
            dir,
            config: config_file,
            restarts,
            reads,
            writes,
            probability,
        } => {
            let _guard = init_telemetry(TelemetryConfig {
                endpoint: config.otel_endpoint.clone(),
                service_name: "orphanq-workload".to_string(),
                default_directive: config.log_level.clone(),
            })?;

            let mut workload = match config_file {
                Some(path) => WorkloadConfig::from_toml_file(&path)?,
                None => WorkloadConfig::default(),
            };
            if let Some(n) = restarts {
                workload.restarts = n;
            }
            if let Some(n) = reads {
                workload.reads = n;
            }
            if let Some(n) = writes {
                workload.writes = n;
            }
            if let Some(p) = probability {
                workload.probability = p;
            }

            cmd_run(dir.unwrap_or(config.workload_dir), workload).await
        }
        Command::Verify {
            crashed_dir,
            transcript,
        } => {
            let _guard = init_telemetry(TelemetryConfig {
                endpoint: config.otel_endpoint.clone(),
                service_name: "orphanq-verifier".to_string(),
                default_directive: "warn".to_string(),
            })?;
            cmd_verify(crashed_dir, transcript)
        }
        Command::Inspect { dir } => cmd_inspect(dir),
    }
}

async fn cmd_run(dir: PathBuf, config: WorkloadConfig) -> anyhow::Result<ExitCode> {
    let transcript = Arc::new(Transcript::stdout()?);
    sqlite_workload(config, transcript, dir)?.run().await?;
    Ok(ExitCode::SUCCESS)
}

fn cmd_verify(crashed_dir: PathBuf, transcript: PathBuf) -> anyhow::Result<ExitCode> {
    let report = verify(&crashed_dir, &transcript)?;
    match report.verdict {
        Verdict::Durable => Ok(ExitCode::SUCCESS),
        Verdict::NotDurable { lost } => {
            for key in &lost {
                eprintln!("ID {key} was not durable");
            }
            Ok(ExitCode::from(EXIT_NOT_DURABLE))
        }
    }
}

fn cmd_inspect(dir: PathBuf) -> anyhow::Result<ExitCode> {
    let items = recovered_items(&dir)?;

    if items.is_empty() {
        println!("Queue is empty.");
        return Ok(ExitCode::SUCCESS);
    }

    println!("{:<8}  {:<12}  {:<6}  ORPHANED", "OFFSET", "ID", "ISSUER");
    println!("{}", "-".repeat(60));
    for (offset, item) in items.iter().enumerate() {
        println!(
            "{:<8}  {:<12}  {:<6}  {}",
            offset,
            item.key.0,
            item.issuer_id,
            item.orphaned_at.format("%Y-%m-%d %H:%M:%S")
        );
    }

    println!("\n{} orphan(s)", items.len());
    Ok(ExitCode::SUCCESS)
}
