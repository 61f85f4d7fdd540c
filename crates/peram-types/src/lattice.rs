// Lattice geometry and the per-rank spinor field length derived from it.

use serde::{Deserialize, Serialize};

use crate::error::ConfigError;

/// Colour components per site.
pub const COLORS: usize = 3;

/// Spin components per site.
pub const SPINS: usize = 4;

// ── Lattice Extents ──────────────────────────────────────────────────────────

/// Global lattice extents: `lt` time slices of `ls³` spatial sites.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct LatticeExtents {
    pub lt: usize,
    pub ls: usize,
}

impl LatticeExtents {
    pub fn new(lt: usize, ls: usize) -> Self {
        Self { lt, ls }
    }

    pub fn spatial_volume(&self) -> usize {
        self.ls * self.ls * self.ls
    }

    pub fn volume(&self) -> usize {
        self.lt * self.spatial_volume()
    }

    /// Complex entries of one global spinor field (`3 · 4 · Lt · Ls³`).
    pub fn spinor_entries(&self) -> usize {
        COLORS * SPINS * self.volume()
    }

    /// Complex entries of one spinor field owned by a single rank.
    ///
    /// The global field must split evenly across `ranks`.
    pub fn local_spinor_len(&self, ranks: usize) -> Result<usize, ConfigError> {
        if self.lt == 0 || self.ls == 0 {
            return Err(ConfigError::EmptyLattice);
        }
        let entries = self.spinor_entries();
        if ranks == 0 || entries % ranks != 0 {
            return Err(ConfigError::IndivisibleLattice { entries, ranks });
        }
        Ok(entries / ranks)
    }

    /// Time slices owned by a single rank when the lattice is split along time.
    pub fn local_time_slices(&self, ranks: usize) -> Result<usize, ConfigError> {
        if ranks == 0 || self.lt % ranks != 0 {
            return Err(ConfigError::IndivisibleLattice {
                entries: self.spinor_entries(),
                ranks,
            });
        }
        Ok(self.lt / ranks)
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
