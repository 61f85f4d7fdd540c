//! Random-vector loop controller.
//!
//! Drives one full pipeline pass per random-vector sample:
//! 1. Validate the configuration (no collaborator is touched on failure)
//! 2. Bring up the solver, load the gauge configuration, prepare sample 0
//! 3. Per sample: allocate, run the pass to exhaustion, release, persist
//! 4. In degraded mode, cycle the solver and shrink the accumulator before
//!    the write
//!
//! Every phase boundary is a collective barrier of the [`ProcessGroup`]. A
//! fatal error on any rank aborts the group with that error's exit code; a
//! panicking collaborator counts as a fatal error.

use std::thread;
use std::time::{Duration, Instant};

use tracing::{error, info, warn};

use peram_types::RunConfig;

use crate::buffers::{BufferPool, PoolStats};
use crate::collaborators::{Accumulator, GaugeFieldProvider, SolverBackend, SourceGenerator};
use crate::diagnostics::Diagnostics;
use crate::error::{PipelineError, Result};
use crate::group::{sync, Phase, ProcessGroup};
use crate::inversion;
use crate::lifecycle::{RunLifecycle, RunState};
use crate::scheduler::{guarded, PassReport, PipelineScheduler};

// ── Context ──────────────────────────────────────────────────────────────────

/// The external subsystems one rank drives.
#[derive(Debug)]
pub struct Collaborators<G, S, V, A> {
    pub gauge: G,
    pub source: S,
    pub solver: V,
    pub accumulator: A,
}

impl<G, S, V, A> Collaborators<G, S, V, A> {
    pub fn new(gauge: G, source: S, solver: V, accumulator: A) -> Self {
        Self {
            gauge,
            source,
            solver,
            accumulator,
        }
    }
}

/// Outcome of a completed run on one rank.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunSummary {
    pub passes: Vec<PassReport>,
    pub pool: PoolStats,
    pub state: RunState,
}

struct Progress {
    lifecycle: RunLifecycle,
    solver_live: bool,
}

// ── Sample Loop ──────────────────────────────────────────────────────────────

pub struct SampleLoop<'g, P: ProcessGroup + ?Sized> {
    config: RunConfig,
    group: &'g P,
    diagnostics: Diagnostics,
}

impl<'g, P: ProcessGroup + ?Sized> SampleLoop<'g, P> {
    pub fn new(config: RunConfig, group: &'g P) -> Self {
        let diagnostics = Diagnostics::new(group.is_coordinator());
        Self {
            config,
            group,
            diagnostics,
        }
    }

    /// Run every sample of the configuration.
    ///
    /// On error the group has already been aborted with
    /// [`PipelineError::exit_code`] and the solver finalized if it was up.
    pub fn run<G, S, V, A>(&self, collaborators: &mut Collaborators<G, S, V, A>) -> Result<RunSummary>
    where
        G: GaugeFieldProvider,
        S: SourceGenerator,
        V: SolverBackend,
        A: Accumulator,
    {
        let mut progress = Progress {
            lifecycle: RunLifecycle::new(self.config.pipeline.num_samples),
            solver_live: false,
        };

        let outcome = self
            .config
            .validate()
            .map_err(PipelineError::from)
            .and_then(|()| guarded(|| self.execute(collaborators, &mut progress)));

        if let Err(e) = &outcome {
            let code = e.exit_code();
            error!(rank = self.group.rank(), code, error = %e, "run failed");
            progress.lifecycle.fail(&e.to_string());
            if progress.solver_live {
                if let Err(fe) = collaborators.solver.finalize() {
                    warn!(error = %format!("{fe:#}"), "solver finalize failed during abort");
                }
            }
            self.group.abort(code);
        }
        outcome
    }

    fn execute<G, S, V, A>(
        &self,
        c: &mut Collaborators<G, S, V, A>,
        progress: &mut Progress,
    ) -> Result<RunSummary>
    where
        G: GaugeFieldProvider,
        S: SourceGenerator,
        V: SolverBackend,
        A: Accumulator,
    {
        let space = self.config.dilution;
        let pipeline = &self.config.pipeline;
        let samples = pipeline.num_samples;
        let degraded = pipeline.degraded_mode;

        // Everything that can be rejected is rejected before the solver starts.
        let spinor_len = self.config.lattice.local_spinor_len(self.group.size())?;
        let invert = inversion::resolve(pipeline.inversion, &c.solver)?;

        let pool = BufferPool::new(space.dirac, spinor_len);
        let scheduler = PipelineScheduler::new(space, pipeline.num_threads, pipeline.operator_id, self.diagnostics);

        c.solver.init().map_err(solver_failed("init"))?;
        progress.solver_live = true;
        progress.lifecycle.solver_ready()?;
        sync(self.group, Phase::PostInit)?;

        if self.group.is_coordinator() {
            info!(
                config_id = self.config.config_id,
                ranks = self.group.size(),
                threads = pipeline.num_threads,
                samples,
                degraded,
                "processing configuration"
            );
        }
        sync(self.group, Phase::PreGaugeLoad)?;

        let status = c.gauge.read(self.config.config_id);
        sync(self.group, Phase::PostGaugeLoad)?;
        if status < 0 {
            return Err(PipelineError::GaugeLoad {
                config_id: self.config.config_id,
                status,
            });
        }

        c.source.reseed(0).map_err(reseed_failed(0))?;
        c.accumulator.reset(0).map_err(accumulator_failed("reset", 0))?;
        progress.lifecycle.gauge_loaded()?;
        sync(self.group, Phase::PostSetup)?;

        let mut passes = Vec::with_capacity(samples);
        for sample in 0..samples {
            progress.lifecycle.begin_sample(sample)?;

            let started = Instant::now();
            let mut working = pool.allocate()?;
            self.diagnostics.elapsed("memory allocation", started);

            let pass = scheduler.run(&mut working, &mut c.source, &mut c.solver, invert, &c.accumulator);
            // Buffers go before the perambulator write, on success or not.
            pool.release(working);
            let report = pass?;
            progress.lifecycle.drained(sample)?;
            passes.push(report);

            if degraded {
                info!(rank = self.group.rank(), "cycling solver to free memory before the write");
                progress.solver_live = false;
                c.solver.finalize().map_err(solver_failed("finalize"))?;
                c.solver.init().map_err(solver_failed("init"))?;
                progress.solver_live = true;
                self.settle();
                sync(self.group, Phase::PostSolverTeardown)?;

                info!(rank = self.group.rank(), "shrinking accumulator before the write");
                c.accumulator
                    .degraded_teardown()
                    .map_err(accumulator_failed("degraded teardown", sample))?;
                self.settle();
            }

            sync(self.group, Phase::PrePersist)?;
            c.accumulator.persist(sample).map_err(accumulator_failed("persist", sample))?;
            progress.lifecycle.persisted(sample)?;
            sync(self.group, Phase::PostWrite)?;

            if sample + 1 < samples && !degraded {
                c.accumulator
                    .reset(sample + 1)
                    .map_err(accumulator_failed("reset", sample + 1))?;
                c.source.reseed(sample + 1).map_err(reseed_failed(sample + 1))?;
            }
            sync(self.group, Phase::PostReset)?;

            if self.group.is_coordinator() {
                info!(sample, inversions = report.inversions, "random vector done");
            }
        }

        c.accumulator.shutdown().map_err(accumulator_failed("shutdown", samples))?;
        progress.solver_live = false;
        c.solver.finalize().map_err(solver_failed("finalize"))?;
        progress.lifecycle.finish()?;

        Ok(RunSummary {
            passes,
            pool: pool.stats(),
            state: progress.lifecycle.state(),
        })
    }

    fn settle(&self) {
        let secs = self.config.pipeline.settle_secs;
        if secs > 0 {
            thread::sleep(Duration::from_secs(secs));
        }
    }
}

fn solver_failed(stage: &'static str) -> impl FnOnce(anyhow::Error) -> PipelineError {
    move |e| PipelineError::SolverLifecycle {
        stage,
        message: format!("{e:#}"),
    }
}

fn accumulator_failed(stage: &'static str, sample: usize) -> impl FnOnce(anyhow::Error) -> PipelineError {
    move |e| PipelineError::AccumulatorLifecycle {
        stage,
        sample,
        message: format!("{e:#}"),
    }
}

fn reseed_failed(sample: usize) -> impl FnOnce(anyhow::Error) -> PipelineError {
    move |e| PipelineError::Reseed {
        sample,
        message: format!("{e:#}"),
    }
}
