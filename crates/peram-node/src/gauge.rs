//! Gauge configuration providers.
//!
//! Status codes follow the solver library convention: `0` on success,
//! negative on failure.

use std::fs::File;
use std::io;
use std::path::PathBuf;

use memmap2::Mmap;
use tracing::{info, warn};

use peram_pipeline::GaugeFieldProvider;

pub const STATUS_OK: i32 = 0;
pub const STATUS_MISSING: i32 = -1;
pub const STATUS_EMPTY: i32 = -2;
pub const STATUS_UNREADABLE: i32 = -3;

/// Reads `<dir>/conf.NNNN` files.
#[derive(Debug)]
pub struct FileGaugeProvider {
    dir: PathBuf,
    checksum: Option<f64>,
}

impl FileGaugeProvider {
    pub fn new(dir: PathBuf) -> Self {
        Self { dir, checksum: None }
    }

    pub fn path_for(&self, config_id: u32) -> PathBuf {
        self.dir.join(format!("conf.{config_id:04}"))
    }

    /// Mean byte value of the last configuration read.
    pub fn checksum(&self) -> Option<f64> {
        self.checksum
    }

    fn load(&mut self, config_id: u32) -> io::Result<i32> {
        let path = self.path_for(config_id);
        let file = match File::open(&path) {
            Ok(file) => file,
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                warn!(path = %path.display(), "gauge configuration not found");
                return Ok(STATUS_MISSING);
            }
            Err(e) => return Err(e),
        };
        if file.metadata()?.len() == 0 {
            warn!(path = %path.display(), "gauge configuration is empty");
            return Ok(STATUS_EMPTY);
        }

        // SAFETY: gauge files are read-only inputs to the run.
        let mapped = unsafe { Mmap::map(&file)? };
        let checksum = mapped.iter().map(|&b| f64::from(b)).sum::<f64>() / mapped.len() as f64;
        self.checksum = Some(checksum);
        info!(config_id, bytes = mapped.len(), checksum, "gauge configuration read");
        Ok(STATUS_OK)
    }
}

impl GaugeFieldProvider for FileGaugeProvider {
    fn read(&mut self, config_id: u32) -> i32 {
        self.load(config_id).unwrap_or_else(|e| {
            warn!(config_id, error = %e, "gauge configuration unreadable");
            STATUS_UNREADABLE
        })
    }
}

/// Stands in for a gauge field when no directory is configured.
#[derive(Debug, Default)]
pub struct SyntheticGauge;

impl GaugeFieldProvider for SyntheticGauge {
    fn read(&mut self, config_id: u32) -> i32 {
        info!(config_id, "using synthetic unit gauge field");
        STATUS_OK
    }
}

/// The provider selected by the run configuration.
#[derive(Debug)]
pub enum Gauge {
    File(FileGaugeProvider),
    Synthetic(SyntheticGauge),
}

impl Gauge {
    pub fn from_dir(dir: Option<PathBuf>) -> Self {
        match dir {
            Some(dir) => Self::File(FileGaugeProvider::new(dir)),
            None => Self::Synthetic(SyntheticGauge),
        }
    }
}

impl GaugeFieldProvider for Gauge {
    fn read(&mut self, config_id: u32) -> i32 {
        match self {
            Self::File(provider) => provider.read(config_id),
            Self::Synthetic(provider) => provider.read(config_id),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_codes() {
        let dir = tempfile::tempdir().unwrap();
        let mut gauge = FileGaugeProvider::new(dir.path().to_path_buf());

        assert_eq!(gauge.read(1000), STATUS_MISSING);

        std::fs::write(gauge.path_for(1001), b"").unwrap();
        assert_eq!(gauge.read(1001), STATUS_EMPTY);

        std::fs::write(gauge.path_for(1002), [2u8, 4, 6]).unwrap();
        assert_eq!(gauge.read(1002), STATUS_OK);
        assert_eq!(gauge.checksum(), Some(4.0));
    }

    #[test]
    fn file_names_are_zero_padded() {
        let gauge = FileGaugeProvider::new(PathBuf::from("/gauge"));
        assert_eq!(gauge.path_for(7), PathBuf::from("/gauge/conf.0007"));
    }

    #[test]
    fn synthetic_always_loads() {
        let mut gauge = Gauge::from_dir(None);
        assert_eq!(gauge.read(42), STATUS_OK);
    }
}
