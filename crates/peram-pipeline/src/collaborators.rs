//! Contracts of the external subsystems the pipeline drives.
//!
//! The pipeline owns scheduling, buffering and lifecycle only. Gauge loading,
//! source construction, the linear solve and perambulator accumulation are
//! reached exclusively through these traits. Implementations report failures
//! as `anyhow` errors; the pipeline attaches the dilution coordinate and
//! treats every failure as fatal.

use peram_types::{Complex64, DilutionCoord, DilutionPair};

use crate::buffers::BufferSet;

/// Loads a gauge configuration into the solver's address space.
pub trait GaugeFieldProvider {
    /// Returns a status code; negative values mean the configuration could
    /// not be loaded. Must complete before the first inversion.
    fn read(&mut self, config_id: u32) -> i32;
}

/// Linear solver for the lattice Dirac operator.
///
/// `init`/`finalize` may be cycled more than once per run (the degraded
/// low-memory mode tears the solver down and brings it back up).
pub trait SolverBackend {
    fn init(&mut self) -> anyhow::Result<()>;

    /// Standard inverter interface: solve `D · out = src`.
    fn invert(&mut self, out: &mut [Complex64], src: &[Complex64], op_id: u32) -> anyhow::Result<()>;

    /// Whether [`SolverBackend::invert_direct`] is implemented.
    fn supports_direct(&self) -> bool {
        false
    }

    /// Pass-through inversion in the solver's native field layout.
    fn invert_direct(
        &mut self,
        _out: &mut [Complex64],
        _src: &[Complex64],
        _op_id: u32,
    ) -> anyhow::Result<()> {
        anyhow::bail!("direct inversion is not available for this solver")
    }

    fn finalize(&mut self) -> anyhow::Result<()>;
}

/// Builds the diluted source vectors for one `(t, e)` pair.
pub trait SourceGenerator {
    /// Overwrite all `D` buffers of `sources` for `pair`. Deterministic given
    /// the pair and the current random vector.
    fn create(&mut self, pair: DilutionPair, sources: &mut BufferSet) -> anyhow::Result<()>;

    /// Draw the random vector for `sample`.
    fn reseed(&mut self, sample: usize) -> anyhow::Result<()>;
}

/// Folds solved propagators into the perambulator of the current sample.
///
/// `accumulate` is called concurrently from every consumer thread, each with
/// a disjoint set of coordinates; the remaining methods are called from the
/// controller only, never while a pipeline pass is running.
pub trait Accumulator: Sync {
    fn accumulate(&self, coord: DilutionCoord, propagator: &[Complex64]) -> anyhow::Result<()>;

    /// Write the perambulator of `sample`. Only called once every coordinate of
    /// the sample has been accumulated.
    fn persist(&mut self, sample: usize) -> anyhow::Result<()>;

    /// Clear the perambulator before `next_sample` starts.
    fn reset(&mut self, next_sample: usize) -> anyhow::Result<()>;

    /// Release heavy internal state ahead of the write in degraded mode.
    fn degraded_teardown(&mut self) -> anyhow::Result<()>;

    fn shutdown(&mut self) -> anyhow::Result<()>;
}
