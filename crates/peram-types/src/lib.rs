pub mod config;
pub mod dilution;
pub mod error;
pub mod lattice;

pub use config::{InversionMode, PipelineConfig, RunConfig, StoreConfig};
pub use dilution::{DilutionCoord, DilutionPair, DilutionSpace};
pub use error::ConfigError;
pub use lattice::LatticeExtents;

/// Element type of every source and propagator buffer.
pub use num_complex::Complex64;
