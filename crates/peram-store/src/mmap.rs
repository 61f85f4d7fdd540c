//! Read-back of persisted perambulators through a memory map.
//!
//! Perambulator files can be large; decoding straight out of the mapping
//! avoids reading the whole file into a heap buffer first.

use std::fs::File;
use std::io;
use std::path::Path;

use memmap2::Mmap;
use serde::de::DeserializeOwned;

use crate::error::{Result, StoreError};

/// Memory-map an existing perambulator file read-only.
///
/// # Safety contract
///
/// Perambulator files are written once, under a name unique to their
/// configuration, sample and rank. Nothing truncates them while mapped.
pub fn mmap_file(path: &Path) -> Result<Mmap> {
    let file = File::open(path).map_err(|e| match e.kind() {
        io::ErrorKind::NotFound => StoreError::NotFound(path.to_path_buf()),
        _ => StoreError::Io(e),
    })?;
    // SAFETY: write-once files; see doc-comment above.
    let mmap = unsafe { Mmap::map(&file)? };
    Ok(mmap)
}

/// Map `path` and decode one bincode value from it.
pub fn decode_mapped<T: DeserializeOwned>(path: &Path) -> Result<T> {
    let mapped = mmap_file(path)?;
    let (value, _) = bincode::serde::decode_from_slice(&mapped, bincode::config::standard())
        .map_err(|e| StoreError::Decode(e.to_string()))?;
    Ok(value)
}

// ── Tests ─────────────────────────────────────────────────────────────────────
