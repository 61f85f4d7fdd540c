//! In-memory perambulator and its on-disk form.
//!
//! A perambulator holds one block of `block_len` complex entries per
//! `(t, e, d)` coordinate, laid out by [`DilutionCoord::flat_index`].

use num_complex::Complex64;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};

use peram_types::{DilutionCoord, DilutionSpace};

use crate::error::{Result, StoreError};

// ── File Format ──────────────────────────────────────────────────────────────

/// Metadata written ahead of the blocks.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PerambulatorHeader {
    pub config_id: u32,
    pub sample: usize,
    pub rank: usize,
    pub ranks: usize,
    pub dilution: DilutionSpace,
    pub block_len: usize,
    /// Spinor entries of the rank-local propagators that were projected.
    pub spinor_len: usize,
    /// RFC 3339 time of the write.
    pub written_at: String,
}

impl PerambulatorHeader {
    /// Complex entries the blocks must hold.
    pub fn entries(&self) -> usize {
        self.dilution.num_coords() * self.block_len
    }
}

/// One persisted perambulator.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PerambulatorFile {
    pub header: PerambulatorHeader,
    pub blocks: Vec<Complex64>,
}

impl PerambulatorFile {
    /// Reject files whose block data does not match their header.
    pub fn check_shape(&self) -> Result<()> {
        let expected = self.header.entries();
        if self.blocks.len() != expected {
            return Err(StoreError::Shape {
                expected,
                actual: self.blocks.len(),
            });
        }
        Ok(())
    }

    pub fn block(&self, coord: DilutionCoord) -> &[Complex64] {
        let len = self.header.block_len;
        let start = coord.flat_index(&self.header.dilution) * len;
        &self.blocks[start..start + len]
    }

    /// Euclidean norm of every block, in accumulation order.
    pub fn block_norms(&self) -> Vec<(DilutionCoord, f64)> {
        self.header
            .dilution
            .coords()
            .map(|coord| {
                let norm = self.block(coord).iter().map(|z| z.norm_sqr()).sum::<f64>().sqrt();
                (coord, norm)
            })
            .collect()
    }
}

// ── Perambulator ─────────────────────────────────────────────────────────────

/// Running sums for one sample. Each block has its own lock, so consumers
/// working on different coordinates never contend.
#[derive(Debug)]
pub struct Perambulator {
    space: DilutionSpace,
    block_len: usize,
    blocks: Vec<Mutex<Box<[Complex64]>>>,
}

impl Perambulator {
    pub fn new(space: DilutionSpace, block_len: usize) -> Self {
        let blocks = (0..space.num_coords())
            .map(|_| Mutex::new(vec![Complex64::default(); block_len].into_boxed_slice()))
            .collect();
        Self {
            space,
            block_len,
            blocks,
        }
    }

    /// Add `contribution` to the block of `coord`.
    pub fn add(&self, coord: DilutionCoord, contribution: &[Complex64]) {
        let mut block = self.blocks[coord.flat_index(&self.space)].lock();
        for (sum, z) in block.iter_mut().zip(contribution) {
            *sum += *z;
        }
    }

    pub fn block(&self, coord: DilutionCoord) -> Vec<Complex64> {
        self.blocks[coord.flat_index(&self.space)].lock().to_vec()
    }

    pub fn clear(&self) {
        for block in &self.blocks {
            block.lock().fill(Complex64::default());
        }
    }

    /// Copy every block into one contiguous vector.
    pub fn flatten(&self) -> Vec<Complex64> {
        let mut flat = Vec::with_capacity(self.blocks.len() * self.block_len);
        for block in &self.blocks {
            flat.extend_from_slice(&block.lock());
        }
        flat
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn space() -> DilutionSpace {
        DilutionSpace::new(2, 1, 3).unwrap()
    }

    #[test]
    fn add_accumulates_into_one_block() {
        let peram = Perambulator::new(space(), 2);
        let coord = DilutionCoord::new(1, 0, 2);
        peram.add(coord, &[Complex64::new(1.0, 0.0), Complex64::new(0.0, 1.0)]);
        peram.add(coord, &[Complex64::new(1.0, 0.0), Complex64::new(0.0, 1.0)]);

        assert_eq!(peram.block(coord), vec![Complex64::new(2.0, 0.0), Complex64::new(0.0, 2.0)]);
        assert_eq!(peram.block(DilutionCoord::new(0, 0, 0)), vec![Complex64::default(); 2]);

        let flat = peram.flatten();
        assert_eq!(flat.len(), 12);
        assert_eq!(flat[10], Complex64::new(2.0, 0.0));

        peram.clear();
        assert!(peram.flatten().iter().all(|z| *z == Complex64::default()));
    }

    #[test]
    fn file_shape_and_norms() {
        let header = PerambulatorHeader {
            config_id: 1000,
            sample: 0,
            rank: 0,
            ranks: 1,
            dilution: space(),
            block_len: 1,
            spinor_len: 96,
            written_at: "2026-01-01T00:00:00+00:00".into(),
        };
        let mut file = PerambulatorFile {
            header,
            blocks: vec![Complex64::new(3.0, 4.0); 6],
        };
        file.check_shape().unwrap();
        assert_eq!(file.block_norms()[5], (DilutionCoord::new(1, 0, 2), 5.0));

        file.blocks.pop();
        assert!(matches!(file.check_shape(), Err(StoreError::Shape { expected: 6, actual: 5 })));
    }
}
