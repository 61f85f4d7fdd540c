use std::io;
use std::path::PathBuf;

use peram_types::ConfigError;

/// Crate-local error type for `peram-store` operations.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error("perambulator file not found: {}", .0.display())]
    NotFound(PathBuf),

    #[error("bincode encode: {0}")]
    Encode(String),

    #[error("bincode decode: {0}")]
    Decode(String),

    #[error("perambulator holds {actual} entries, header implies {expected}")]
    Shape { expected: usize, actual: usize },
}

/// Convenience alias used throughout this crate.
pub type Result<T> = std::result::Result<T, StoreError>;
