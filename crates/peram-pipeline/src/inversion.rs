//! Inversion strategy, resolved once before a pipeline pass.
//!
//! The scheduler never branches on [`InversionMode`] inside the dilution
//! loop: the mode is turned into a plain function pointer up front.

use peram_types::{Complex64, ConfigError, InversionMode};

use crate::collaborators::SolverBackend;

/// Signature shared by both solver entry points.
pub type InvertFn<V> = fn(&mut V, &mut [Complex64], &[Complex64], u32) -> anyhow::Result<()>;

/// Pick the solver entry point for `mode`.
///
/// Fails when the direct path is requested but `solver` does not provide it.
pub fn resolve<V: SolverBackend>(mode: InversionMode, solver: &V) -> Result<InvertFn<V>, ConfigError> {
    match mode {
        InversionMode::Standard => Ok(V::invert as InvertFn<V>),
        InversionMode::Direct if solver.supports_direct() => Ok(V::invert_direct as InvertFn<V>),
        InversionMode::Direct => Err(ConfigError::DirectInversionUnavailable),
    }
}
