use std::path::PathBuf;
use thiserror::Error;

use crate::converter::ConverterError;
use crate::document::BlockKind;
use crate::pipeline::Phase;
use crate::pixels::PixelError;
use crate::types::FileType;

#[derive(Debug, Error)]
pub enum CoreError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Input is {size} bytes (limit: {limit})")]
    TooLarge { size: u64, limit: u64 },
}

pub type Result<T> = std::result::Result<T, CoreError>;

#[derive(Debug, Error)]
pub enum IdentificationFailure {
    #[error("Unknown or ambiguous file type: {0}")]
    Unknown(PathBuf),

    #[error("No reconstruction pipeline for {0}")]
    Unsupported(FileType),
}

#[derive(Debug, Error)]
pub enum ExtractionFailure {
    #[error(transparent)]
    Source(#[from] CoreError),

    #[error("Archive error: {0}")]
    Archive(#[from] zip::result::ZipError),

    #[error("Missing package part: {0}")]
    MissingPart(String),

    #[error("Package part {part} exceeds {limit} bytes")]
    PartTooLarge { part: String, limit: u64 },

    #[error("Malformed XML in {part}: {message}")]
    Xml { part: String, message: String },

    #[error("Malformed content: {0}")]
    Malformed(String),

    #[error("Converter failed: {0}")]
    Converter(#[from] ConverterError),

    #[error("Image rejected: {0}")]
    Image(#[from] PixelError),
}

#[derive(Debug, Error)]
pub enum RebuildFailure {
    #[error("Archive error: {0}")]
    Archive(#[from] zip::result::ZipError),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Image encode failed: {0}")]
    Image(#[from] PixelError),

    #[error("PDF writer error: {0}")]
    Pdf(#[from] lopdf::Error),

    #[error("Nothing to rebuild: {0}")]
    Empty(&'static str),
}

#[derive(Debug, Error)]
pub enum PersistFailure {
    #[error("Cannot create output directory {path}: {source}")]
    CreateDir {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("Cannot write {path}: {source}")]
    Write {
        path: PathBuf,
        source: std::io::Error,
    },
}

/// A fatal failure for one file. No output exists when this is returned.
#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("Identification failed: {0}")]
    Identification(#[from] IdentificationFailure),

    #[error("Extraction failed: {0}")]
    Extraction(#[from] ExtractionFailure),

    #[error("Rebuild failed: {0}")]
    Rebuild(#[from] RebuildFailure),

    #[error("Persist failed: {0}")]
    Persist(#[from] PersistFailure),
}

impl PipelineError {
    #[must_use]
    pub fn phase(&self) -> Phase {
        match self {
            Self::Identification(_) => Phase::Identify,
            Self::Extraction(ExtractionFailure::Image(_)) => Phase::SanitizeImages,
            Self::Extraction(_) => Phase::Extract,
            Self::Rebuild(_) => Phase::Rebuild,
            Self::Persist(_) => Phase::Persist,
        }
    }
}

/// Content that did not make it into the output unchanged. Never fatal.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ContentWarning {
    #[error("Dropped unrecognized <{element}> in {part}")]
    UnrecognizedElement { part: String, element: String },

    #[error("Structure declares {declared} images, found {found}")]
    ImageCountMismatch { declared: usize, found: usize },

    #[error("Dropped image {origin}: {reason}")]
    ImageDropped { origin: String, reason: String },

    #[error("Image reference {0} does not resolve")]
    MissingImage(String),

    #[error("{kind} block cannot be represented in {target}")]
    Unrepresentable { kind: BlockKind, target: &'static str },

    #[error("{what} truncated at {limit}")]
    Truncated { what: String, limit: usize },

    #[error("Discarded macro project {0}")]
    MacrosDiscarded(String),

    #[error("{0} malformed embedded-image marker pairs ignored")]
    CarveAnomalies(usize),
}
