//! On-disk perambulator storage.
//!
//! Layout: `<output_dir>/perambulator.rnd{sample:03}.cfg{config:04}.bin`,
//! with a `.rank{rank:03}` suffix before `.bin` when more than one rank
//! writes. Each file is one bincode-encoded [`PerambulatorFile`].

use std::fs::{self, File};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};

use tracing::debug;

use crate::error::{Result, StoreError};
use crate::mmap;
use crate::perambulator::{PerambulatorFile, PerambulatorHeader};

/// Filesystem-backed perambulator store.
#[derive(Debug, Clone)]
pub struct PerambulatorStore {
    root: PathBuf,
}

impl PerambulatorStore {
    /// Open (or create) a store rooted at `root`.
    pub fn new(root: PathBuf) -> Result<Self> {
        fs::create_dir_all(&root)?;
        Ok(Self { root })
    }

    /// File name for a header's configuration, sample and rank.
    pub fn file_name(header: &PerambulatorHeader) -> String {
        let mut name = format!("perambulator.rnd{:03}.cfg{:04}", header.sample, header.config_id);
        if header.ranks > 1 {
            name.push_str(&format!(".rank{:03}", header.rank));
        }
        name.push_str(".bin");
        name
    }

    pub fn path_for(&self, header: &PerambulatorHeader) -> PathBuf {
        self.root.join(Self::file_name(header))
    }

    /// Encode `file` and write it. Returns the path written.
    pub fn write(&self, file: &PerambulatorFile) -> Result<PathBuf> {
        file.check_shape()?;
        let path = self.path_for(&file.header);

        let mut writer = BufWriter::new(File::create(&path)?);
        let bytes = bincode::serde::encode_into_std_write(file, &mut writer, bincode::config::standard())
            .map_err(|e| StoreError::Encode(e.to_string()))?;
        writer.flush()?;

        debug!(path = %path.display(), bytes, "perambulator written");
        Ok(path)
    }

    /// Read a perambulator file through a memory map.
    pub fn read(path: &Path) -> Result<PerambulatorFile> {
        let file: PerambulatorFile = mmap::decode_mapped(path)?;
        file.check_shape()?;
        Ok(file)
    }

    /// Root directory of this store.
    pub fn root(&self) -> &Path {
        &self.root
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    use num_complex::Complex64;
    use peram_types::DilutionSpace;

    fn header(sample: usize, rank: usize, ranks: usize) -> PerambulatorHeader {
        PerambulatorHeader {
            config_id: 714,
            sample,
            rank,
            ranks,
            dilution: DilutionSpace::new(2, 2, 1).unwrap(),
            block_len: 3,
            spinor_len: 192,
            written_at: "2026-10-19T12:00:00+00:00".into(),
        }
    }

    #[test]
    fn file_names() {
        assert_eq!(
            PerambulatorStore::file_name(&header(0, 0, 1)),
            "perambulator.rnd000.cfg0714.bin"
        );
        assert_eq!(
            PerambulatorStore::file_name(&header(12, 3, 4)),
            "perambulator.rnd012.cfg0714.rank003.bin"
        );
    }

    #[test]
    fn write_then_read_through_mmap() {
        let dir = tempfile::tempdir().unwrap();
        let store = PerambulatorStore::new(dir.path().join("peram")).unwrap();

        let blocks: Vec<Complex64> = (0..12).map(|i| Complex64::new(i as f64, -(i as f64))).collect();
        let file = PerambulatorFile {
            header: header(1, 0, 1),
            blocks,
        };

        let path = store.write(&file).unwrap();
        assert!(path.starts_with(store.root()));
        assert_eq!(PerambulatorStore::read(&path).unwrap(), file);
    }

    #[test]
    fn mis_shaped_file_is_not_written() {
        let dir = tempfile::tempdir().unwrap();
        let store = PerambulatorStore::new(dir.path().to_path_buf()).unwrap();
        let file = PerambulatorFile {
            header: header(0, 0, 1),
            blocks: vec![Complex64::default(); 5],
        };
        assert!(matches!(store.write(&file), Err(StoreError::Shape { .. })));
        assert!(!store.path_for(&file.header).exists());
    }
}
