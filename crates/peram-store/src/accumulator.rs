//! Reference [`Accumulator`]: projects every solved propagator onto a fixed
//! basis and keeps one block of projections per `(t, e, d)`.
//!
//! The basis is the heavy part of the state (`block_len × spinor_len`
//! entries). Degraded teardown drops it; the accumulated blocks survive so
//! the perambulator can still be written.

use std::f64::consts::TAU;
use std::path::PathBuf;
use std::sync::atomic::{AtomicUsize, Ordering};

use anyhow::{bail, ensure};
use num_complex::Complex64;
use tracing::info;

use peram_pipeline::Accumulator;
use peram_types::{DilutionCoord, DilutionSpace, RunConfig};

use crate::error::Result;
use crate::perambulator::{Perambulator, PerambulatorFile, PerambulatorHeader};
use crate::store::PerambulatorStore;

// ── Layout ───────────────────────────────────────────────────────────────────

/// Fixed shape of every perambulator a rank produces.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PerambulatorLayout {
    pub config_id: u32,
    pub rank: usize,
    pub ranks: usize,
    pub dilution: DilutionSpace,
    pub block_len: usize,
    pub spinor_len: usize,
}

impl PerambulatorLayout {
    pub fn from_config(config: &RunConfig, rank: usize, ranks: usize) -> Result<Self> {
        Ok(Self {
            config_id: config.config_id,
            rank,
            ranks,
            dilution: config.dilution,
            block_len: config.store.block_len,
            spinor_len: config.lattice.local_spinor_len(ranks)?,
        })
    }
}

// ── Projection Basis ─────────────────────────────────────────────────────────

/// `block_len` normalized plane waves over the rank-local spinor entries.
#[derive(Debug)]
pub struct ProjectionBasis {
    vectors: Vec<Box<[Complex64]>>,
}

impl ProjectionBasis {
    pub fn plane_waves(block_len: usize, spinor_len: usize) -> Self {
        let norm = 1.0 / (spinor_len as f64).sqrt();
        let vectors = (0..block_len)
            .map(|k| {
                (0..spinor_len)
                    .map(|i| {
                        let phase = TAU * ((k * i) % spinor_len) as f64 / spinor_len as f64;
                        Complex64::from_polar(norm, phase)
                    })
                    .collect()
            })
            .collect();
        Self { vectors }
    }

    /// `⟨b_k | v⟩` for every basis vector.
    pub fn project(&self, v: &[Complex64]) -> Vec<Complex64> {
        self.vectors
            .iter()
            .map(|b| b.iter().zip(v).map(|(b, x)| b.conj() * *x).sum())
            .collect()
    }

    pub fn vector(&self, k: usize) -> &[Complex64] {
        &self.vectors[k]
    }
}

// ── Accumulator ──────────────────────────────────────────────────────────────

pub struct PerambulatorAccumulator {
    layout: PerambulatorLayout,
    store: PerambulatorStore,
    perambulator: Perambulator,
    basis: Option<ProjectionBasis>,
    sample: usize,
    accumulated: AtomicUsize,
    written: Vec<PathBuf>,
}

impl PerambulatorAccumulator {
    pub fn new(layout: PerambulatorLayout, store: PerambulatorStore) -> Self {
        let perambulator = Perambulator::new(layout.dilution, layout.block_len);
        let basis = ProjectionBasis::plane_waves(layout.block_len, layout.spinor_len);
        Self {
            layout,
            store,
            perambulator,
            basis: Some(basis),
            sample: 0,
            accumulated: AtomicUsize::new(0),
            written: Vec::new(),
        }
    }

    pub fn layout(&self) -> &PerambulatorLayout {
        &self.layout
    }

    pub fn perambulator(&self) -> &Perambulator {
        &self.perambulator
    }

    /// Coordinates accumulated into the current sample.
    pub fn accumulated(&self) -> usize {
        self.accumulated.load(Ordering::Acquire)
    }

    /// Files persisted so far, in write order.
    pub fn written(&self) -> &[PathBuf] {
        &self.written
    }

    fn header(&self, sample: usize) -> PerambulatorHeader {
        PerambulatorHeader {
            config_id: self.layout.config_id,
            sample,
            rank: self.layout.rank,
            ranks: self.layout.ranks,
            dilution: self.layout.dilution,
            block_len: self.layout.block_len,
            spinor_len: self.layout.spinor_len,
            written_at: chrono::Utc::now().to_rfc3339(),
        }
    }
}

impl Accumulator for PerambulatorAccumulator {
    fn accumulate(&self, coord: DilutionCoord, propagator: &[Complex64]) -> anyhow::Result<()> {
        let Some(basis) = &self.basis else {
            bail!("projection basis was released by degraded teardown");
        };
        ensure!(
            propagator.len() == self.layout.spinor_len,
            "propagator has {} entries, expected {}",
            propagator.len(),
            self.layout.spinor_len
        );

        self.perambulator.add(coord, &basis.project(propagator));
        self.accumulated.fetch_add(1, Ordering::AcqRel);
        Ok(())
    }

    fn persist(&mut self, sample: usize) -> anyhow::Result<()> {
        ensure!(
            sample == self.sample,
            "asked to persist sample {sample} while holding sample {}",
            self.sample
        );
        let expected = self.layout.dilution.num_coords();
        let accumulated = self.accumulated();
        ensure!(
            accumulated == expected,
            "sample {sample} has {accumulated} of {expected} coordinates accumulated"
        );

        let file = PerambulatorFile {
            header: self.header(sample),
            blocks: self.perambulator.flatten(),
        };
        let path = self.store.write(&file)?;
        info!(rank = self.layout.rank, sample, path = %path.display(), "perambulator written");
        self.written.push(path);
        Ok(())
    }

    fn reset(&mut self, next_sample: usize) -> anyhow::Result<()> {
        if self.basis.is_none() {
            bail!("cannot start sample {next_sample} after degraded teardown");
        }
        self.perambulator.clear();
        self.accumulated.store(0, Ordering::Release);
        self.sample = next_sample;
        Ok(())
    }

    /// Frees the projection basis and keeps the accumulated blocks for the
    /// write. Nothing is rebuilt: degraded runs have a single sample, so the
    /// only call left after this is `persist`, and `reset` is refused.
    fn degraded_teardown(&mut self) -> anyhow::Result<()> {
        if let Some(basis) = self.basis.take() {
            let bytes = basis.vectors.len() * self.layout.spinor_len * std::mem::size_of::<Complex64>();
            info!(rank = self.layout.rank, bytes, "released projection basis");
        }
        Ok(())
    }

    fn shutdown(&mut self) -> anyhow::Result<()> {
        self.basis = None;
        info!(rank = self.layout.rank, files = self.written.len(), "accumulator shut down");
        Ok(())
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
