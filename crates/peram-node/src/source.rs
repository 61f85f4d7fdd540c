//! Diluted Z4 noise sources.
//!
//! Each rank owns `lt / ranks` consecutive time slices. A local spinor entry
//! is addressed as `((t_local · Vs + x) · 3 + colour) · 4 + spin`.
//!
//! Dilution pattern for a `(t, e, d)` coordinate: keep the noise entry when
//! its global time slice is `t (mod T)`, its spatial site is `e (mod E)` and
//! its colour-spin component is `d (mod D)`; zero it otherwise.

use std::f64::consts::FRAC_PI_2;

use num_complex::Complex64;
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use tracing::debug;

use peram_pipeline::{BufferSet, SourceGenerator};
use peram_types::lattice::{COLORS, SPINS};
use peram_types::{ConfigError, DilutionPair, DilutionSpace, RunConfig};

pub struct NoiseSource {
    space: DilutionSpace,
    seed: u64,
    rank: usize,
    spatial_volume: usize,
    local_slices: usize,
    noise: Vec<Complex64>,
}

impl NoiseSource {
    pub fn new(config: &RunConfig, rank: usize, ranks: usize) -> Result<Self, ConfigError> {
        let local_slices = config.lattice.local_time_slices(ranks)?;
        let len = config.lattice.local_spinor_len(ranks)?;
        Ok(Self {
            space: config.dilution,
            seed: config.seed,
            rank,
            spatial_volume: config.lattice.spatial_volume(),
            local_slices,
            noise: vec![Complex64::default(); len],
        })
    }

    /// Rank-local noise of the current sample.
    pub fn noise(&self) -> &[Complex64] {
        &self.noise
    }

    fn keeps(&self, pair: DilutionPair, d: usize, i: usize) -> bool {
        let component = i % (COLORS * SPINS);
        let site = i / (COLORS * SPINS);
        let x = site % self.spatial_volume;
        let t = self.rank * self.local_slices + site / self.spatial_volume;

        t % self.space.time == pair.t && x % self.space.eigen == pair.e && component % self.space.dirac == d
    }
}

impl SourceGenerator for NoiseSource {
    fn create(&mut self, pair: DilutionPair, sources: &mut BufferSet) -> anyhow::Result<()> {
        anyhow::ensure!(
            sources.buffer_len() == self.noise.len(),
            "source buffers hold {} entries, noise has {}",
            sources.buffer_len(),
            self.noise.len()
        );

        for (d, buffer) in sources.iter_mut().enumerate() {
            for (i, entry) in buffer.iter_mut().enumerate() {
                *entry = if self.keeps(pair, d, i) {
                    self.noise[i]
                } else {
                    Complex64::default()
                };
            }
        }
        Ok(())
    }

    /// Draw `{1, i, -1, -i}` noise. Every sample uses its own ChaCha stream;
    /// each rank takes its slice of the global vector.
    fn reseed(&mut self, sample: usize) -> anyhow::Result<()> {
        let mut rng = ChaCha8Rng::seed_from_u64(self.seed);
        rng.set_stream(sample as u64);

        let offset = self.rank * self.noise.len();
        for _ in 0..offset {
            let _: u8 = rng.gen_range(0..4);
        }
        for entry in &mut self.noise {
            *entry = Complex64::from_polar(1.0, FRAC_PI_2 * f64::from(rng.gen_range(0..4u8)));
        }

        debug!(rank = self.rank, sample, entries = self.noise.len(), "random vector drawn");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use peram_types::LatticeExtents;

    fn config(space: (usize, usize, usize)) -> RunConfig {
        let mut config = RunConfig::new(
            1000,
            LatticeExtents::new(4, 2),
            DilutionSpace::new(space.0, space.1, space.2).unwrap(),
        );
        config.seed = 1234;
        config
    }

    #[test]
    fn noise_is_z4_and_reproducible() {
        let cfg = config((1, 1, 1));
        let mut a = NoiseSource::new(&cfg, 0, 1).unwrap();
        let mut b = NoiseSource::new(&cfg, 0, 1).unwrap();
        a.reseed(3).unwrap();
        b.reseed(3).unwrap();

        assert_eq!(a.noise(), b.noise());
        assert!(a.noise().iter().all(|z| (z.norm() - 1.0).abs() < 1e-12));

        b.reseed(4).unwrap();
        assert_ne!(a.noise(), b.noise());
    }

    #[test]
    fn ranks_take_consecutive_slices_of_one_vector() {
        let cfg = config((1, 1, 1));
        let mut whole = NoiseSource::new(&cfg, 0, 1).unwrap();
        let mut upper = NoiseSource::new(&cfg, 1, 2).unwrap();
        whole.reseed(0).unwrap();
        upper.reseed(0).unwrap();

        let half = whole.noise().len() / 2;
        assert_eq!(upper.noise(), &whole.noise()[half..]);
    }

    #[test]
    fn dilution_partitions_the_noise() {
        let cfg = config((2, 2, 3));
        let space = cfg.dilution;
        let mut source = NoiseSource::new(&cfg, 0, 1).unwrap();
        source.reseed(0).unwrap();

        let len = source.noise().len();
        let mut total = vec![Complex64::default(); len];
        let mut sources = BufferSet::zeroed(space.dirac, len).unwrap();
        for pair in space.pairs() {
            source.create(pair, &mut sources).unwrap();
            for buffer in sources.iter() {
                for (sum, z) in total.iter_mut().zip(buffer) {
                    *sum += *z;
                }
            }
        }

        assert_eq!(total, source.noise());
    }

    #[test]
    fn uneven_time_split_rejected() {
        let cfg = config((1, 1, 1));
        assert!(matches!(
            NoiseSource::new(&cfg, 0, 3),
            Err(ConfigError::IndivisibleLattice { .. })
        ));
    }
}
