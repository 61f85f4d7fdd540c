// Dilution index space shared by the scheduler, the source generator and the
// accumulator.
//
// The enumeration order below is a layout contract: accumulators index their
// storage by `(t, e, d)` in exactly this order.

use serde::{Deserialize, Serialize};

use crate::error::ConfigError;

// ── Dilution Space ───────────────────────────────────────────────────────────

/// Extents of the three dilution axes: time, eigenvector and full (Dirac).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct DilutionSpace {
    pub time: usize,
    pub eigen: usize,
    pub dirac: usize,
}

impl DilutionSpace {
    /// Build a space, rejecting empty axes.
    pub fn new(time: usize, eigen: usize, dirac: usize) -> Result<Self, ConfigError> {
        let space = Self { time, eigen, dirac };
        space.validate()?;
        Ok(space)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        for (axis, extent) in [("time", self.time), ("eigen", self.eigen), ("dirac", self.dirac)] {
            if extent == 0 {
                return Err(ConfigError::EmptyDilution { axis });
            }
        }
        Ok(())
    }

    /// Number of inversions per `(t, e)` pair; this sizes every buffer set.
    pub fn inversions_per_pair(&self) -> usize {
        self.dirac
    }

    /// Number of `(t, e)` pairs, i.e. pipeline iterations per sample.
    pub fn num_pairs(&self) -> usize {
        self.time * self.eigen
    }

    /// Total number of `(t, e, d)` coordinates.
    pub fn num_coords(&self) -> usize {
        self.num_pairs() * self.dirac
    }

    /// `(t, e)` pairs with `t` outermost. Each call starts from the beginning.
    pub fn pairs(&self) -> DilutionPairs {
        DilutionPairs {
            eigen: self.eigen,
            time: self.time,
            next: 0,
        }
    }

    /// Every `(t, e, d)` coordinate in accumulation order.
    pub fn coords(&self) -> impl Iterator<Item = DilutionCoord> + '_ {
        self.pairs().flat_map(move |pair| pair.dirac(self))
    }
}

// ── Pair Iterator ────────────────────────────────────────────────────────────

/// Iterator over `(t, e)` pairs in nested order.
#[derive(Debug, Clone)]
pub struct DilutionPairs {
    time: usize,
    eigen: usize,
    next: usize,
}

impl Iterator for DilutionPairs {
    type Item = DilutionPair;

    fn next(&mut self) -> Option<Self::Item> {
        if self.next >= self.time * self.eigen {
            return None;
        }
        let pair = DilutionPair {
            t: self.next / self.eigen,
            e: self.next % self.eigen,
        };
        self.next += 1;
        Some(pair)
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        let remaining = (self.time * self.eigen).saturating_sub(self.next);
        (remaining, Some(remaining))
    }
}

impl ExactSizeIterator for DilutionPairs {}

// ── Pair / Coordinate ────────────────────────────────────────────────────────

/// One `(t, e)` step of the pipeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct DilutionPair {
    pub t: usize,
    pub e: usize,
}

impl DilutionPair {
    pub fn new(t: usize, e: usize) -> Self {
        Self { t, e }
    }

    pub fn at(self, d: usize) -> DilutionCoord {
        DilutionCoord { t: self.t, e: self.e, d }
    }

    /// Full-dilution indices of this pair, `d` ascending.
    pub fn dirac(self, space: &DilutionSpace) -> impl Iterator<Item = DilutionCoord> {
        (0..space.dirac).map(move |d| self.at(d))
    }

    /// Position of this pair in [`DilutionSpace::pairs`].
    pub fn ordinal(&self, space: &DilutionSpace) -> usize {
        self.t * space.eigen + self.e
    }
}

/// One `(t, e, d)` inversion / accumulation coordinate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct DilutionCoord {
    pub t: usize,
    pub e: usize,
    pub d: usize,
}

impl DilutionCoord {
    pub fn new(t: usize, e: usize, d: usize) -> Self {
        Self { t, e, d }
    }

    pub fn pair(&self) -> DilutionPair {
        DilutionPair { t: self.t, e: self.e }
    }

    /// Row-major offset `(t·E + e)·D + d`.
    pub fn flat_index(&self, space: &DilutionSpace) -> usize {
        (self.t * space.eigen + self.e) * space.dirac + self.d
    }
}

impl std::fmt::Display for DilutionCoord {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "(t={}, e={}, d={})", self.t, self.e, self.d)
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
