//! Application settings: the core sanitizer settings plus what only the CLI needs.

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use scour_core::SanitizerConfig;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    #[serde(flatten)]
    pub sanitizer: SanitizerConfig,
    /// Audit journal, one entry per processed file.
    pub journal_path: PathBuf,
    /// Files run by `--test`.
    pub samples_dir: PathBuf,
    /// Worker threads; 0 picks one per CPU.
    pub jobs: usize,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            sanitizer: SanitizerConfig::default(),
            journal_path: PathBuf::from("san_results.json"),
            samples_dir: PathBuf::from("Inputs"),
            jobs: 0,
        }
    }
}

impl AppConfig {
    /// Defaults, overlaid with the JSON file at `path` when one is given.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let Some(path) = path else {
            return Ok(Self::default());
        };
        let text = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;
        serde_json::from_str(&text)
            .with_context(|| format!("Invalid config file: {}", path.display()))
    }

    pub fn workers(&self, files: usize) -> usize {
        let wanted = if self.jobs == 0 { num_cpus::get() } else { self.jobs };
        wanted.clamp(1, files.max(1))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_file_means_defaults() {
        let config = AppConfig::load(None).unwrap();
        assert_eq!(config.journal_path, PathBuf::from("san_results.json"));
        assert_eq!(config.samples_dir, PathBuf::from("Inputs"));
        assert_eq!(config.sanitizer.output_dir, PathBuf::from("Outputs"));
    }

    #[test]
    fn partial_file_keeps_other_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("scour.json");
        fs::write(
            &path,
            r#"{
                "output_dir": "/srv/clean",
                "jobs": 3,
                "limits": { "max_image_pixels": 1000 },
                "converters": { "doc": { "program": "wvText", "args": ["{input}", "/dev/stdout"] } }
            }"#,
        )
        .unwrap();

        let config = AppConfig::load(Some(&path)).unwrap();
        assert_eq!(config.sanitizer.output_dir, PathBuf::from("/srv/clean"));
        assert_eq!(config.jobs, 3);
        assert_eq!(config.sanitizer.limits.max_image_pixels, 1000);
        assert_eq!(config.sanitizer.converters.doc.program, "wvText");
        assert_eq!(config.sanitizer.converters.rtf.program, "unrtf");
        assert_eq!(config.journal_path, PathBuf::from("san_results.json"));
    }

    #[test]
    fn malformed_file_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("bad.json");
        fs::write(&path, "{ not json").unwrap();
        let err = AppConfig::load(Some(&path)).unwrap_err();
        assert!(err.to_string().contains("Invalid config file"));
    }

    #[test]
    fn workers_bounded_by_files() {
        let config = AppConfig {
            jobs: 8,
            ..AppConfig::default()
        };
        assert_eq!(config.workers(3), 3);
        assert_eq!(config.workers(0), 1);
        assert_eq!(config.workers(20), 8);
    }
}
