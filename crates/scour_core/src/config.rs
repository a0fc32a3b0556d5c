//! Sanitizer settings.

use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::converter::CommandSpec;
use crate::types::FileType;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SanitizerConfig {
    /// Where rebuilt files are written.
    pub output_dir: PathBuf,
    pub limits: Limits,
    pub converters: ConverterConfig,
}

impl Default for SanitizerConfig {
    fn default() -> Self {
        Self {
            output_dir: PathBuf::from("Outputs"),
            limits: Limits::default(),
            converters: ConverterConfig::default(),
        }
    }
}

impl SanitizerConfig {
    pub fn new(output_dir: impl Into<PathBuf>) -> Self {
        Self {
            output_dir: output_dir.into(),
            ..Default::default()
        }
    }

    pub fn with_limits(mut self, limits: Limits) -> Self {
        self.limits = limits;
        self
    }

    pub fn with_converters(mut self, converters: ConverterConfig) -> Self {
        self.converters = converters;
        self
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
#[serde(default)]
pub struct Limits {
    /// Larger inputs fail extraction.
    pub max_input_bytes: u64,
    /// Ceiling for any single decompressed archive entry.
    pub max_entry_bytes: u64,
    /// Images above this many pixels are rejected before decoding.
    pub max_image_pixels: u64,
    /// Cap on rows and columns expanded from repeat attributes.
    pub max_repeat: usize,
    /// Cap on cells per table or sheet.
    pub max_table_cells: usize,
}

impl Default for Limits {
    fn default() -> Self {
        Self {
            max_input_bytes: 256 * 1024 * 1024,    // 256MB
            max_entry_bytes: 64 * 1024 * 1024,     // 64MB
            max_image_pixels: 64 * 1024 * 1024,    // 64 megapixels
            max_repeat: 1024,
            max_table_cells: 1_000_000,
        }
    }
}

/// External programs for the legacy binary formats and PDF rasterizing.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ConverterConfig {
    pub doc: CommandSpec,
    pub rtf: CommandSpec,
    pub xls: CommandSpec,
    pub ppt: CommandSpec,
    /// Must write one PNG per page, named after the `{output}` prefix.
    pub pdf_raster: CommandSpec,
    pub timeout_secs: u64,
}

impl Default for ConverterConfig {
    fn default() -> Self {
        Self {
            doc: CommandSpec::new("antiword", ["{input}"]),
            rtf: CommandSpec::new("unrtf", ["--text", "{input}"]),
            xls: CommandSpec::new("xls2csv", ["-q1", "{input}"]),
            ppt: CommandSpec::new("catppt", ["{input}"]),
            pdf_raster: CommandSpec::new("pdftoppm", ["-r", "100", "-png", "{input}", "{output}"]),
            timeout_secs: 120,
        }
    }
}

impl ConverterConfig {
    #[must_use]
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs.max(1))
    }

    /// The text converter for a legacy binary type.
    #[must_use]
    pub fn for_type(&self, file_type: FileType) -> Option<&CommandSpec> {
        match file_type {
            FileType::Doc => Some(&self.doc),
            FileType::Rtf => Some(&self.rtf),
            FileType::Xls => Some(&self.xls),
            FileType::Ppt => Some(&self.ppt),
            _ => None,
        }
    }
}
