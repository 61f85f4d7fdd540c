//! `peram-store`: perambulator accumulation and persistence.
//!
//! Provides the reference [`Accumulator`](peram_pipeline::Accumulator) used by
//! `peram-node` and the on-disk format its perambulators are written in.

pub mod accumulator;
pub mod error;
pub mod mmap;
pub mod perambulator;
pub mod store;

pub use accumulator::{PerambulatorAccumulator, PerambulatorLayout, ProjectionBasis};
pub use error::{Result, StoreError};
pub use perambulator::{Perambulator, PerambulatorFile, PerambulatorHeader};
pub use store::PerambulatorStore;

use peram_types::RunConfig;

/// Build the accumulator for `rank` of `ranks`, writing under the configured
/// output directory.
pub fn open_accumulator(config: &RunConfig, rank: usize, ranks: usize) -> Result<PerambulatorAccumulator> {
    let layout = PerambulatorLayout::from_config(config, rank, ranks)?;
    let store = PerambulatorStore::new(config.store.output_dir.clone())?;
    Ok(PerambulatorAccumulator::new(layout, store))
}
