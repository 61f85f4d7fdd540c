// Configuration errors and the process exit codes they map to.

/// Exit code when the degraded low-memory mode is combined with more than one
/// random-vector sample.
pub const EXIT_DEGRADED_MULTI_SAMPLE: u8 = 123;

/// Exit code when the gauge configuration cannot be loaded.
pub const EXIT_GAUGE_LOAD: u8 = 222;

/// Exit code for every other fatal condition.
pub const EXIT_FAILURE: u8 = 1;

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error(
        "degraded low-memory mode clears solver and accumulator state before the \
         perambulator write and supports a single random vector, but {samples} were requested"
    )]
    DegradedModeRequiresSingleSample { samples: usize },

    #[error("dilution axis '{axis}' has zero extent")]
    EmptyDilution { axis: &'static str },

    #[error("at least one random-vector sample is required")]
    NoSamples,

    #[error("the worker pool needs at least one thread")]
    NoThreads,

    #[error("lattice extents must be positive")]
    EmptyLattice,

    #[error("spinor field of {entries} entries does not split evenly across {ranks} ranks")]
    IndivisibleLattice { entries: usize, ranks: usize },

    #[error("direct inversion was requested but the solver backend does not provide it")]
    DirectInversionUnavailable,

    #[error("invalid configuration: {0}")]
    Invalid(String),
}

impl ConfigError {
    /// Process exit code for this error.
    pub fn exit_code(&self) -> u8 {
        match self {
            Self::DegradedModeRequiresSingleSample { .. } => EXIT_DEGRADED_MULTI_SAMPLE,
            _ => EXIT_FAILURE,
        }
    }
}
