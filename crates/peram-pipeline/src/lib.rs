//! `peram-pipeline`: the solve/accumulate pipeline behind perambulator
//! generation.
//!
//! This crate is a **scheduling layer**, not a numerics layer. Gauge loading,
//! source construction, the linear solve and the perambulator contraction sit
//! behind the traits in [`collaborators`]. Rust owns the dilution loop, the
//! producer/consumer split of the thread pool, the double-buffered propagator
//! generations and the per-sample buffer lifecycle.
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────┐   allocate   ┌──────────────┐  (t,e) pairs  ┌──────────────┐
//! │  SampleLoop  │─────────────▶│  BufferPool  │──────────────▶│  Scheduler   │
//! │ per sample   │◀─────────────│ src+2 gens   │               │ 1 producer   │
//! └──────────────┘   release    └──────────────┘               │ N-1 consumers│
//!        │ phase barriers                                      └──────────────┘
//!        ▼                                                   create / invert /
//! ┌──────────────┐                                             accumulate
//! │ ProcessGroup │
//! └──────────────┘
//! ```

pub mod buffers;
pub mod collaborators;
pub mod controller;
pub mod diagnostics;
pub mod error;
pub mod group;
pub mod handoff;
pub mod inversion;
pub mod lifecycle;
pub mod scheduler;

// ── Public re-exports ────────────────────────────────────────────────────────

pub use buffers::{BufferPool, BufferSet, Generations, PoolStats, WorkingSet};
pub use collaborators::{Accumulator, GaugeFieldProvider, SolverBackend, SourceGenerator};
pub use controller::{Collaborators, RunSummary, SampleLoop};
pub use diagnostics::Diagnostics;
pub use error::{PipelineError, Result};
pub use group::{LocalGroup, Phase, ProcessGroup, SoloGroup};
pub use inversion::InvertFn;
pub use lifecycle::{RunLifecycle, RunState};
pub use scheduler::{PassReport, PipelineScheduler};
