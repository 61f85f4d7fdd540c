use peram_types::error::{EXIT_FAILURE, EXIT_GAUGE_LOAD};
use peram_types::{ConfigError, DilutionCoord, DilutionPair};

#[derive(Debug, thiserror::Error)]
pub enum PipelineError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error("gauge configuration {config_id} could not be read (status {status})")]
    GaugeLoad { config_id: u32, status: i32 },

    #[error("allocation of {bytes} bytes for {buffers} buffers failed")]
    Allocation { bytes: usize, buffers: usize },

    #[error("source creation failed at (t={}, e={}): {message}", .pair.t, .pair.e)]
    Source { pair: DilutionPair, message: String },

    #[error("inversion failed at {coord}: {message}")]
    Solver { coord: DilutionCoord, message: String },

    #[error("accumulation failed at {coord}: {message}")]
    Accumulator { coord: DilutionCoord, message: String },

    #[error("random vector for sample {sample} could not be drawn: {message}")]
    Reseed { sample: usize, message: String },

    #[error("solver {stage} failed: {message}")]
    SolverLifecycle { stage: &'static str, message: String },

    #[error("accumulator {stage} failed for sample {sample}: {message}")]
    AccumulatorLifecycle {
        stage: &'static str,
        sample: usize,
        message: String,
    },

    #[error("propagator generation is still shared with consumers")]
    GenerationAliased,

    #[error("generation handoff channel closed before pair (t={}, e={})", .pair.t, .pair.e)]
    HandoffClosed { pair: DilutionPair },

    #[error("pipeline worker thread panicked")]
    WorkerPanicked,

    #[error("incomplete pass: {accumulated} of {expected} coordinates accumulated")]
    IncompletePass { accumulated: usize, expected: usize },

    #[error("process group aborted with exit code {code}")]
    GroupAborted { code: u8 },

    #[error("invalid state transition: {from} → {to}")]
    InvalidTransition { from: String, to: String },
}

impl PipelineError {
    /// Process exit code shared by every rank that reaches this error.
    pub fn exit_code(&self) -> u8 {
        match self {
            Self::Config(e) => e.exit_code(),
            Self::GaugeLoad { .. } => EXIT_GAUGE_LOAD,
            Self::GroupAborted { code } => *code,
            _ => EXIT_FAILURE,
        }
    }
}

/// Convenience alias used throughout this crate.
pub type Result<T> = std::result::Result<T, PipelineError>;
