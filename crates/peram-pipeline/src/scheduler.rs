//! Two-stage solve/accumulate pipeline over the dilution space.
//!
//! ```text
//! step:        0          1          2        ...   K-1        drain
//! producer: [solve p0] [solve p1] [solve p2]  ... [solve pK-1]
//! consumers:           [accum p0] [accum p1]  ... [accum pK-2] [accum pK-1]
//! ```
//!
//! The calling thread is the producer. With a pool of `N > 1` threads the
//! other `N - 1` threads are consumers; with `N = 1` the calling thread runs
//! both roles back to back. Either way the same barrier sequence is executed
//! (see [`crate::handoff`]), and the pass ends with an explicit drain so the
//! last pair is accumulated before [`PipelineScheduler::run`] returns.
//!
//! A panic inside a collaborator is caught where the call is made, so the
//! panicking thread stays in the barrier protocol and the pass fails with
//! [`PipelineError::WorkerPanicked`].

use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::thread;
use std::time::Instant;

use crossbeam_channel::{bounded, Receiver, Sender};
use tracing::debug;

use peram_types::{DilutionPair, DilutionSpace};

use crate::buffers::{BufferSet, WorkingSet};
use crate::collaborators::{Accumulator, SolverBackend, SourceGenerator};
use crate::diagnostics::Diagnostics;
use crate::error::{PipelineError, Result};
use crate::handoff::{ConsumerSlot, GenerationHandle, Handoff};
use crate::inversion::InvertFn;

/// Counts for one completed pass.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct PassReport {
    pub pairs: usize,
    pub inversions: usize,
    pub accumulations: usize,
}

/// Drives one pass of the pipeline for a fixed dilution space and pool size.
#[derive(Debug, Clone)]
pub struct PipelineScheduler {
    space: DilutionSpace,
    num_threads: usize,
    operator_id: u32,
    diagnostics: Diagnostics,
}

impl PipelineScheduler {
    pub fn new(space: DilutionSpace, num_threads: usize, operator_id: u32, diagnostics: Diagnostics) -> Self {
        Self {
            space,
            num_threads: num_threads.max(1),
            operator_id,
            diagnostics,
        }
    }

    pub fn num_threads(&self) -> usize {
        self.num_threads
    }

    /// Run the pipeline over every `(t, e)` pair of the space.
    ///
    /// `working` must come from a pool sized to the space's full-dilution
    /// extent. Returns once every coordinate has been accumulated.
    pub fn run<S, V, A>(
        &self,
        working: &mut WorkingSet,
        source: &mut S,
        solver: &mut V,
        invert: InvertFn<V>,
        accumulator: &A,
    ) -> Result<PassReport>
    where
        S: SourceGenerator,
        V: SolverBackend,
        A: Accumulator,
    {
        let report = if self.num_threads == 1 {
            self.run_sequential(working, source, solver, invert, accumulator)?
        } else {
            self.run_pipelined(working, source, solver, invert, accumulator)?
        };

        let expected = self.space.num_coords();
        if report.accumulations != expected {
            return Err(PipelineError::IncompletePass {
                accumulated: report.accumulations,
                expected,
            });
        }
        Ok(report)
    }

    // ── Single worker ────────────────────────────────────────────────────

    fn run_sequential<S, V, A>(
        &self,
        working: &mut WorkingSet,
        source: &mut S,
        solver: &mut V,
        invert: InvertFn<V>,
        accumulator: &A,
    ) -> Result<PassReport>
    where
        S: SourceGenerator,
        V: SolverBackend,
        A: Accumulator,
    {
        let handoff = Handoff::new(1);
        let mut report = PassReport::default();

        for pair in self.space.pairs() {
            report.inversions += guarded(|| self.solve_pair(pair, working, source, solver, invert))?;

            handoff.wait_ready();
            working.parts_mut().1.swap();
            handoff.wait_published();

            let completed = working.generations().completed();
            report.accumulations +=
                self.accumulate_pair(ConsumerSlot::sole(), pair, completed, accumulator, &handoff)?;
            report.pairs += 1;
        }
        handoff.wait_ready();

        Ok(report)
    }

    // ── Producer + consumers ─────────────────────────────────────────────

    fn run_pipelined<S, V, A>(
        &self,
        working: &mut WorkingSet,
        source: &mut S,
        solver: &mut V,
        invert: InvertFn<V>,
        accumulator: &A,
    ) -> Result<PassReport>
    where
        S: SourceGenerator,
        V: SolverBackend,
        A: Accumulator,
    {
        let consumers = self.num_threads - 1;
        let handoff = Handoff::new(self.num_threads);
        let accumulated = AtomicUsize::new(0);
        let (senders, receivers): (Vec<Sender<GenerationHandle>>, Vec<Receiver<GenerationHandle>>) =
            (0..consumers).map(|_| bounded(1)).unzip();

        debug!(consumers, pairs = self.space.num_pairs(), "starting pipelined pass");

        let (produced, consumed) = thread::scope(|scope| {
            let workers: Vec<_> = receivers
                .into_iter()
                .enumerate()
                .map(|(index, rx)| {
                    let slot = ConsumerSlot { index, of: consumers };
                    let handoff = &handoff;
                    let accumulated = &accumulated;
                    scope.spawn(move || self.consume(slot, handoff, rx, accumulator, accumulated))
                })
                .collect();

            let produced = self.produce(&handoff, &senders, working, source, solver, invert);
            let consumed: Vec<Result<()>> = workers
                .into_iter()
                .map(|worker| worker.join().unwrap_or_else(|_| Err(PipelineError::WorkerPanicked)))
                .collect();
            (produced, consumed)
        });

        let inversions = produced?;
        for result in consumed {
            result?;
        }

        Ok(PassReport {
            pairs: self.space.num_pairs(),
            inversions,
            accumulations: accumulated.load(Ordering::Acquire),
        })
    }

    /// Producer role: source creation, inversions, swap, handout.
    fn produce<S, V>(
        &self,
        handoff: &Handoff,
        senders: &[Sender<GenerationHandle>],
        working: &mut WorkingSet,
        source: &mut S,
        solver: &mut V,
        invert: InvertFn<V>,
    ) -> Result<usize>
    where
        S: SourceGenerator,
        V: SolverBackend,
    {
        let mut failure = None;
        let mut inversions = 0;

        for pair in self.space.pairs() {
            if !handoff.is_aborted() {
                match guarded(|| self.solve_pair(pair, working, source, solver, invert)) {
                    Ok(n) => inversions += n,
                    Err(e) => {
                        handoff.abort();
                        remember(&mut failure, e);
                    }
                }
            }

            handoff.wait_ready();

            let (_, generations) = working.parts_mut();
            generations.swap();
            for sender in senders {
                let handle = GenerationHandle {
                    pair,
                    generation: generations.share_completed(),
                };
                if sender.send(handle).is_err() {
                    handoff.abort();
                    remember(&mut failure, PipelineError::HandoffClosed { pair });
                }
            }

            handoff.wait_published();
        }

        // Drain: the last generation is accumulated before the pass ends.
        handoff.wait_ready();

        match failure {
            Some(e) => Err(e),
            None => Ok(inversions),
        }
    }

    /// Consumer role: accumulate this slot's share of every completed pair.
    fn consume<A: Accumulator>(
        &self,
        slot: ConsumerSlot,
        handoff: &Handoff,
        rx: Receiver<GenerationHandle>,
        accumulator: &A,
        accumulated: &AtomicUsize,
    ) -> Result<()> {
        let mut failure = None;

        for pair in self.space.pairs() {
            handoff.wait_ready();
            handoff.wait_published();

            match rx.recv() {
                Ok(handle) => {
                    debug_assert_eq!(handle.pair, pair);
                    if !handoff.is_aborted() {
                        match self.accumulate_pair(slot, handle.pair, &handle.generation, accumulator, handoff) {
                            Ok(n) => {
                                accumulated.fetch_add(n, Ordering::AcqRel);
                            }
                            Err(e) => {
                                handoff.abort();
                                remember(&mut failure, e);
                            }
                        }
                    }
                    // `handle` drops here, before the next Barrier A.
                }
                Err(_) => {
                    handoff.abort();
                    remember(&mut failure, PipelineError::HandoffClosed { pair });
                }
            }
        }

        handoff.wait_ready();

        match failure {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }

    // ── Work units ───────────────────────────────────────────────────────

    fn solve_pair<S, V>(
        &self,
        pair: DilutionPair,
        working: &mut WorkingSet,
        source: &mut S,
        solver: &mut V,
        invert: InvertFn<V>,
    ) -> Result<usize>
    where
        S: SourceGenerator,
        V: SolverBackend,
    {
        let (sources, generations) = working.parts_mut();

        let started = Instant::now();
        source
            .create(pair, sources)
            .map_err(|e| PipelineError::Source {
                pair,
                message: format!("{e:#}"),
            })?;
        self.diagnostics.elapsed("create_source", started);

        let target = generations.writable()?;
        for coord in pair.dirac(&self.space) {
            if self.diagnostics.is_coordinator() {
                debug!(t = coord.t, e = coord.e, d = coord.d, "doing inversion");
            }
            let started = Instant::now();
            invert(solver, &mut target[coord.d], &sources[coord.d], self.operator_id).map_err(|e| {
                PipelineError::Solver {
                    coord,
                    message: format!("{e:#}"),
                }
            })?;
            self.diagnostics.elapsed("inversion", started);
        }

        Ok(self.space.dirac)
    }

    /// Accumulate this slot's share of `pair`, one turn per coordinate.
    ///
    /// Stops early without error once the pass is aborted elsewhere.
    fn accumulate_pair<A: Accumulator>(
        &self,
        slot: ConsumerSlot,
        pair: DilutionPair,
        generation: &BufferSet,
        accumulator: &A,
        handoff: &Handoff,
    ) -> Result<usize> {
        let started = Instant::now();
        let mut done = 0;
        for coord in slot.coords(pair, &self.space) {
            let turn = coord.flat_index(&self.space);
            if !handoff.begin_turn(turn) {
                break;
            }
            let outcome = guarded(|| {
                accumulator
                    .accumulate(coord, &generation[coord.d])
                    .map_err(|e| PipelineError::Accumulator {
                        coord,
                        message: format!("{e:#}"),
                    })
            });
            if outcome.is_err() {
                handoff.abort();
            }
            handoff.end_turn(turn);
            outcome?;
            done += 1;
        }
        if slot.index == 0 {
            self.diagnostics.elapsed("add_to_perambulator", started);
        }
        Ok(done)
    }
}

/// Run collaborator work, turning a panic into [`PipelineError::WorkerPanicked`].
pub(crate) fn guarded<T>(work: impl FnOnce() -> Result<T>) -> Result<T> {
    panic::catch_unwind(AssertUnwindSafe(work)).unwrap_or(Err(PipelineError::WorkerPanicked))
}

/// Keep the first error of a pass; later ones are consequences of the abort.
fn remember(failure: &mut Option<PipelineError>, error: PipelineError) {
    if failure.is_none() {
        *failure = Some(error);
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
