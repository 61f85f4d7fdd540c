//! Recording collaborators shared by the integration suites.
#![allow(dead_code)]

use std::collections::HashSet;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread::{self, ThreadId};
use std::time::{Duration, Instant};

use parking_lot::Mutex;

use peram_pipeline::{Accumulator, BufferSet, Collaborators, GaugeFieldProvider, SolverBackend, SourceGenerator};
use peram_types::{Complex64, DilutionCoord, DilutionPair, DilutionSpace, LatticeExtents, RunConfig};

pub const CONFIG_ID: u32 = 1000;

/// Lifecycle calls of every collaborator, in call order.
#[derive(Debug, Clone, Default)]
pub struct Journal(Arc<Mutex<Vec<String>>>);

impl Journal {
    pub fn record(&self, entry: impl Into<String>) {
        self.0.lock().push(entry.into());
    }

    pub fn entries(&self) -> Vec<String> {
        self.0.lock().clone()
    }
}

/// Wall-clock interval of one collaborator call on one buffer.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Span {
    pub address: usize,
    pub started: Instant,
    pub finished: Instant,
}

impl Span {
    pub fn overlaps(&self, other: &Span) -> bool {
        self.started < other.finished && other.started < self.finished
    }
}

/// Value a source entry carries for `coord` of `sample`.
pub fn stamp(sample: usize, coord: DilutionCoord) -> f64 {
    (sample * 1000 + coord.t * 100 + coord.e * 10 + coord.d) as f64
}

// ── Gauge ────────────────────────────────────────────────────────────────────

pub struct RecordingGauge {
    journal: Journal,
    pub status: i32,
}

impl GaugeFieldProvider for RecordingGauge {
    fn read(&mut self, config_id: u32) -> i32 {
        self.journal.record(format!("gauge.read {config_id}"));
        self.status
    }
}

// ── Source ───────────────────────────────────────────────────────────────────

pub struct RecordingSource {
    journal: Journal,
    sample: usize,
    pub pairs: Vec<DilutionPair>,
    pub threads: HashSet<ThreadId>,
}

impl SourceGenerator for RecordingSource {
    fn create(&mut self, pair: DilutionPair, sources: &mut BufferSet) -> anyhow::Result<()> {
        self.pairs.push(pair);
        self.threads.insert(thread::current().id());
        for (d, buffer) in sources.iter_mut().enumerate() {
            buffer.fill(Complex64::new(stamp(self.sample, pair.at(d)), 0.0));
        }
        Ok(())
    }

    fn reseed(&mut self, sample: usize) -> anyhow::Result<()> {
        self.journal.record(format!("source.reseed {sample}"));
        self.sample = sample;
        Ok(())
    }
}

// ── Solver ───────────────────────────────────────────────────────────────────

pub struct RecordingSolver {
    journal: Journal,
    pub direct: bool,
    pub fail_at: Option<usize>,
    pub standard_calls: usize,
    pub direct_calls: usize,
    /// Time each inversion takes.
    pub work: Duration,
    /// Address of every output buffer, in inversion order.
    pub targets: Vec<usize>,
    /// One span per inversion, in inversion order.
    pub spans: Vec<Span>,
}

impl RecordingSolver {
    fn solve(&mut self, out: &mut [Complex64], src: &[Complex64]) -> anyhow::Result<()> {
        if self.fail_at == Some(self.targets.len()) {
            anyhow::bail!("no convergence after 10000 iterations");
        }
        let address = out.as_ptr() as usize;
        let started = Instant::now();
        thread::sleep(self.work);
        out.copy_from_slice(src);
        self.targets.push(address);
        self.spans.push(Span {
            address,
            started,
            finished: Instant::now(),
        });
        Ok(())
    }
}

impl SolverBackend for RecordingSolver {
    fn init(&mut self) -> anyhow::Result<()> {
        self.journal.record("solver.init");
        Ok(())
    }

    fn invert(&mut self, out: &mut [Complex64], src: &[Complex64], _op_id: u32) -> anyhow::Result<()> {
        self.standard_calls += 1;
        self.solve(out, src)
    }

    fn supports_direct(&self) -> bool {
        self.direct
    }

    fn invert_direct(&mut self, out: &mut [Complex64], src: &[Complex64], _op_id: u32) -> anyhow::Result<()> {
        self.direct_calls += 1;
        self.solve(out, src)
    }

    fn finalize(&mut self) -> anyhow::Result<()> {
        self.journal.record("solver.finalize");
        Ok(())
    }
}

// ── Accumulator ──────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Accumulation {
    pub sample: usize,
    pub coord: DilutionCoord,
    pub address: usize,
    pub value: f64,
    pub len: usize,
    pub span: Span,
}

pub struct RecordingAccumulator {
    journal: Journal,
    sample: AtomicUsize,
    /// Time each accumulation takes.
    pub work: Duration,
    pub panic_on: Option<DilutionCoord>,
    pub seen: Mutex<Vec<Accumulation>>,
}

impl RecordingAccumulator {
    pub fn coords(&self, sample: usize) -> Vec<DilutionCoord> {
        self.seen
            .lock()
            .iter()
            .filter(|a| a.sample == sample)
            .map(|a| a.coord)
            .collect()
    }
}

impl Accumulator for RecordingAccumulator {
    fn accumulate(&self, coord: DilutionCoord, propagator: &[Complex64]) -> anyhow::Result<()> {
        if self.panic_on == Some(coord) {
            panic!("perambulator index {coord} out of range");
        }
        let address = propagator.as_ptr() as usize;
        let started = Instant::now();
        thread::sleep(self.work);
        let value = propagator[0].re;
        self.seen.lock().push(Accumulation {
            sample: self.sample.load(Ordering::Acquire),
            coord,
            address,
            value,
            len: propagator.len(),
            span: Span {
                address,
                started,
                finished: Instant::now(),
            },
        });
        Ok(())
    }

    fn persist(&mut self, sample: usize) -> anyhow::Result<()> {
        self.journal.record(format!("accumulator.persist {sample}"));
        Ok(())
    }

    fn reset(&mut self, next_sample: usize) -> anyhow::Result<()> {
        self.journal.record(format!("accumulator.reset {next_sample}"));
        self.sample.store(next_sample, Ordering::Release);
        Ok(())
    }

    fn degraded_teardown(&mut self) -> anyhow::Result<()> {
        self.journal.record("accumulator.degraded_teardown");
        Ok(())
    }

    fn shutdown(&mut self) -> anyhow::Result<()> {
        self.journal.record("accumulator.shutdown");
        Ok(())
    }
}

// ── Builders ─────────────────────────────────────────────────────────────────

pub type Rig = Collaborators<RecordingGauge, RecordingSource, RecordingSolver, RecordingAccumulator>;

pub fn rig(journal: &Journal) -> Rig {
    Collaborators::new(
        RecordingGauge {
            journal: journal.clone(),
            status: 0,
        },
        RecordingSource {
            journal: journal.clone(),
            sample: 0,
            pairs: Vec::new(),
            threads: HashSet::new(),
        },
        RecordingSolver {
            journal: journal.clone(),
            direct: false,
            fail_at: None,
            standard_calls: 0,
            direct_calls: 0,
            work: Duration::ZERO,
            targets: Vec::new(),
            spans: Vec::new(),
        },
        RecordingAccumulator {
            journal: journal.clone(),
            sample: AtomicUsize::new(0),
            work: Duration::ZERO,
            panic_on: None,
            seen: Mutex::new(Vec::new()),
        },
    )
}

/// A 2⁴ lattice (192 spinor entries) with no settle delay.
pub fn config(space: (usize, usize, usize), threads: usize, samples: usize) -> RunConfig {
    let (t, e, d) = space;
    let dilution = DilutionSpace::new(t, e, d).expect("non-empty dilution");
    let mut config = RunConfig::new(CONFIG_ID, LatticeExtents::new(2, 2), dilution);
    config.pipeline.num_threads = threads;
    config.pipeline.num_samples = samples;
    config.pipeline.settle_secs = 0;
    config
}
