// Run configuration. Read-only once `RunConfig::validate` has passed.

use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::dilution::DilutionSpace;
use crate::error::ConfigError;
use crate::lattice::LatticeExtents;

// ── Inversion Mode ────────────────────────────────────────────────────────────

/// Which solver entry point fills the propagator buffers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum InversionMode {
    /// Standard inverter interface (fields are reshuffled into solver layout).
    #[default]
    Standard,
    /// Direct pass-through into the solver's native layout.
    Direct,
}

// ── Pipeline ──────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    /// Worker threads per rank: one producer, the rest consumers.
    /// Default: 2.
    pub num_threads: usize,

    /// Random-vector samples processed in this run. Default: 1.
    pub num_samples: usize,

    /// Tear down solver and accumulator state before the perambulator write.
    /// Only legal with a single sample.
    pub degraded_mode: bool,

    pub inversion: InversionMode,

    /// Operator index passed through to the solver.
    pub operator_id: u32,

    /// Pause after each degraded-mode teardown step so the allocator can
    /// return memory to the system. Default: 5 seconds.
    pub settle_secs: u64,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            num_threads: 2,
            num_samples: 1,
            degraded_mode: false,
            inversion: InversionMode::Standard,
            operator_id: 0,
            settle_secs: 5,
        }
    }
}

// ── Store ─────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreConfig {
    /// Directory that receives perambulator files. Default: `./peram`.
    pub output_dir: PathBuf,

    /// Complex entries kept per `(t, e, d)` block of the perambulator.
    /// Default: 12 (one colour-spin component each).
    pub block_len: usize,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            output_dir: PathBuf::from("peram"),
            block_len: 12,
        }
    }
}

// ── Run ───────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunConfig {
    /// Gauge configuration number.
    pub config_id: u32,

    pub lattice: LatticeExtents,

    pub dilution: DilutionSpace,

    /// Base seed for the random vectors; each sample derives its own stream.
    #[serde(default)]
    pub seed: u64,

    /// Directory holding `conf.NNNN` gauge files. `None` runs on a synthetic
    /// gauge field.
    #[serde(default)]
    pub gauge_dir: Option<PathBuf>,

    #[serde(default)]
    pub pipeline: PipelineConfig,

    #[serde(default)]
    pub store: StoreConfig,
}

impl RunConfig {
    pub fn new(config_id: u32, lattice: LatticeExtents, dilution: DilutionSpace) -> Self {
        Self {
            config_id,
            lattice,
            dilution,
            seed: 0,
            gauge_dir: None,
            pipeline: PipelineConfig::default(),
            store: StoreConfig::default(),
        }
    }

    /// Checks that do not depend on the process group or solver backend.
    ///
    /// The degraded-mode check comes first so that a run combining it with
    /// several samples always reports that condition.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.pipeline.degraded_mode && self.pipeline.num_samples > 1 {
            return Err(ConfigError::DegradedModeRequiresSingleSample {
                samples: self.pipeline.num_samples,
            });
        }
        if self.pipeline.num_samples == 0 {
            return Err(ConfigError::NoSamples);
        }
        if self.pipeline.num_threads == 0 {
            return Err(ConfigError::NoThreads);
        }
        if self.lattice.lt == 0 || self.lattice.ls == 0 {
            return Err(ConfigError::EmptyLattice);
        }
        if self.store.block_len == 0 {
            return Err(ConfigError::Invalid("store.block_len must be positive".into()));
        }
        self.dilution.validate()
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
