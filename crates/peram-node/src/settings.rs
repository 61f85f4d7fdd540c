// JSON run configuration plus command-line overrides.

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use clap::Args;

use peram_types::{InversionMode, RunConfig};

/// Arguments of `peram-node run`.
#[derive(Debug, Args)]
pub struct RunArgs {
    /// JSON run configuration.
    #[arg(long, short)]
    pub config: PathBuf,

    /// Worker threads per rank (one producer, the rest consumers).
    #[arg(long)]
    pub threads: Option<usize>,

    /// Random-vector samples to process.
    #[arg(long)]
    pub samples: Option<usize>,

    /// Free solver and accumulator memory before the write. Single sample only.
    #[arg(long)]
    pub degraded: bool,

    /// Use the solver's direct inversion entry point.
    #[arg(long)]
    pub direct: bool,

    /// In-process ranks sharing the lattice.
    #[arg(long, default_value_t = 1)]
    pub ranks: usize,

    /// Directory for perambulator files.
    #[arg(long)]
    pub output: Option<PathBuf>,
}

impl RunArgs {
    pub fn apply(&self, config: &mut RunConfig) {
        if let Some(threads) = self.threads {
            config.pipeline.num_threads = threads;
        }
        if let Some(samples) = self.samples {
            config.pipeline.num_samples = samples;
        }
        if self.degraded {
            config.pipeline.degraded_mode = true;
        }
        if self.direct {
            config.pipeline.inversion = InversionMode::Direct;
        }
        if let Some(output) = &self.output {
            config.store.output_dir = output.clone();
        }
    }
}

pub fn load(path: &Path) -> Result<RunConfig> {
    let text = fs::read_to_string(path).with_context(|| format!("reading {}", path.display()))?;
    serde_json::from_str(&text).with_context(|| format!("parsing {}", path.display()))
}

#[cfg(test)]
mod tests {
    use super::*;

    const MINIMAL: &str = r#"{
        "config_id": 714,
        "lattice": { "lt": 4, "ls": 2 },
        "dilution": { "time": 2, "eigen": 1, "dirac": 4 }
    }"#;

    fn args() -> RunArgs {
        RunArgs {
            config: PathBuf::from("run.json"),
            threads: None,
            samples: None,
            degraded: false,
            direct: false,
            ranks: 1,
            output: None,
        }
    }

    #[test]
    fn load_minimal_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("run.json");
        fs::write(&path, MINIMAL).unwrap();

        let config = load(&path).unwrap();
        assert_eq!(config.config_id, 714);
        assert_eq!(config.dilution.dirac, 4);
        assert_eq!(config.pipeline.num_threads, 2);
        assert!(config.gauge_dir.is_none());
    }

    #[test]
    fn overrides_win() {
        let mut config: RunConfig = serde_json::from_str(MINIMAL).unwrap();
        let args = RunArgs {
            threads: Some(8),
            samples: Some(3),
            direct: true,
            output: Some(PathBuf::from("/scratch/peram")),
            ..args()
        };
        args.apply(&mut config);

        assert_eq!(config.pipeline.num_threads, 8);
        assert_eq!(config.pipeline.num_samples, 3);
        assert_eq!(config.pipeline.inversion, InversionMode::Direct);
        assert_eq!(config.store.output_dir, PathBuf::from("/scratch/peram"));
        assert!(!config.pipeline.degraded_mode);
    }

    #[test]
    fn missing_file_names_the_path() {
        let err = load(Path::new("/nonexistent/run.json")).unwrap_err();
        assert!(err.to_string().contains("/nonexistent/run.json"));
    }
}
