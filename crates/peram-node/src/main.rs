//! Perambulator generation driver.
//!
//! ```bash
//! # One rank, four worker threads, two random vectors
//! RUST_LOG=info cargo run --bin peram-node -- run --config run.json --threads 4 --samples 2
//!
//! # Low-memory run split over two in-process ranks
//! cargo run --bin peram-node -- run --config run.json --degraded --ranks 2
//!
//! # Print the header and block norms of a written perambulator
//! cargo run --bin peram-node -- inspect peram/perambulator.rnd000.cfg0714.bin
//! ```
//!
//! Exit status: 0 on success, 123 for degraded mode with several samples,
//! 222 when the gauge configuration cannot be read, 1 otherwise.

mod gauge;
mod settings;
mod solver;
mod source;

use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::thread;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use peram_pipeline::{Collaborators, LocalGroup, PipelineError, ProcessGroup, RunSummary, SampleLoop, SoloGroup};
use peram_store::{PerambulatorAccumulator, PerambulatorStore, StoreError};
use peram_types::error::EXIT_FAILURE;
use peram_types::{ConfigError, RunConfig};

use crate::gauge::Gauge;
use crate::settings::RunArgs;
use crate::solver::DiagonalSolver;
use crate::source::NoiseSource;

// ── CLI ───────────────────────────────────────────────────────────────────────

#[derive(Parser)]
#[command(
    name    = "peram-node",
    version = env!("CARGO_PKG_VERSION"),
    about   = "Perambulator generation over a diluted random-vector space"
)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Generate perambulators for one gauge configuration.
    Run(RunArgs),

    /// Print the header and block norms of a perambulator file.
    Inspect {
        /// Path to a `perambulator.*.bin` file.
        path: PathBuf,
    },
}

type Rig = Collaborators<Gauge, NoiseSource, DiagonalSolver, PerambulatorAccumulator>;

// ── Entry point ───────────────────────────────────────────────────────────────

fn main() -> ExitCode {
    // Default log level: INFO. Override with RUST_LOG=peram_pipeline=debug etc.
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();
    let outcome = match cli.command {
        Command::Run(args)       => run(&args),
        Command::Inspect { path } => inspect(&path),
    };

    match outcome {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!("{e:#}");
            ExitCode::from(exit_code(&e))
        }
    }
}

/// Map a failure to the process exit status shared by every rank.
fn exit_code(err: &anyhow::Error) -> u8 {
    if let Some(e) = err.downcast_ref::<PipelineError>() {
        return e.exit_code();
    }
    if let Some(e) = err.downcast_ref::<ConfigError>() {
        return e.exit_code();
    }
    if let Some(StoreError::Config(e)) = err.downcast_ref::<StoreError>() {
        return e.exit_code();
    }
    EXIT_FAILURE
}

// ── Run ───────────────────────────────────────────────────────────────────────

fn run(args: &RunArgs) -> Result<()> {
    let mut config = settings::load(&args.config)?;
    args.apply(&mut config);
    // Rejected configurations never reach a collaborator.
    config.validate()?;

    let ranks = args.ranks.max(1);
    if ranks == 1 {
        let group = SoloGroup::new();
        let mut rig = build_rig(&config, 0, 1)?;
        let summary = SampleLoop::new(config, &group).run(&mut rig)?;
        report(&summary);
        return Ok(());
    }

    // Every rank's collaborators exist before any rank enters a barrier.
    let groups = LocalGroup::spawn(ranks);
    let rigs = groups
        .iter()
        .map(|group| build_rig(&config, group.rank(), ranks))
        .collect::<Result<Vec<_>>>()?;

    let outcomes: Vec<Result<RunSummary, PipelineError>> = thread::scope(|scope| {
        let handles: Vec<_> = groups
            .iter()
            .zip(rigs)
            .map(|(group, mut rig)| {
                let config = config.clone();
                scope.spawn(move || SampleLoop::new(config, group).run(&mut rig))
            })
            .collect();
        handles
            .into_iter()
            .map(|h| h.join().unwrap_or(Err(PipelineError::WorkerPanicked)))
            .collect()
    });

    let mut summaries = Vec::with_capacity(ranks);
    for outcome in outcomes {
        summaries.push(outcome?);
    }
    if let Some(summary) = summaries.first() {
        report(summary);
    }
    Ok(())
}

fn build_rig(config: &RunConfig, rank: usize, ranks: usize) -> Result<Rig> {
    let spinor_len = config.lattice.local_spinor_len(ranks)?;
    Ok(Collaborators::new(
        Gauge::from_dir(config.gauge_dir.clone()),
        NoiseSource::new(config, rank, ranks)?,
        DiagonalSolver::new(spinor_len),
        peram_store::open_accumulator(config, rank, ranks)
            .with_context(|| format!("opening perambulator store for rank {rank}"))?,
    ))
}

fn report(summary: &RunSummary) {
    let inversions: usize = summary.passes.iter().map(|p| p.inversions).sum();
    info!(
        samples = summary.passes.len(),
        inversions,
        peak_buffer_sets = summary.pool.peak_live_sets,
        "run complete"
    );
}

// ── Inspect ───────────────────────────────────────────────────────────────────

fn inspect(path: &Path) -> Result<()> {
    let file = PerambulatorStore::read(path)?;
    println!("{}", serde_json::to_string_pretty(&file.header)?);
    for (coord, norm) in file.block_norms() {
        println!("{coord}  {norm:.6e}");
    }
    Ok(())
}
