//! The seam between the sanitizer driver and the per-family document handling.
//!
//! The driver owns identification, image sanitizing and persisting; a pipeline only
//! knows how to take its family apart and how to put a clean copy back together.

use std::path::PathBuf;

use crate::config::SanitizerConfig;
use crate::document::{Extraction, IntermediateDocument, Layout};
use crate::error::{ExtractionFailure, RebuildFailure};
use crate::pipeline::Rebuilt;
use crate::types::{Family, FileType};

/// An input file after identification, read once into memory.
#[derive(Debug, Clone)]
pub struct SourceFile {
    pub path: PathBuf,
    pub file_type: FileType,
    pub bytes: Vec<u8>,
}

/// Extraction and rebuilding for one family of document types.
///
/// Extraction must never place untrusted image bytes into the document: pictures go
/// into the quarantine of the returned [`Extraction`] and only come back as
/// re-encoded pixels. Rebuilding sees nothing but the layout and the clean document.
///
/// # Thread Safety
///
/// Pipelines are stateless and shared across worker threads, so they must be
/// `Send + Sync`.
///
/// # Example
///
/// ```ignore
/// struct PlainText;
///
/// impl ReconstructionPipeline for PlainText {
///     fn family(&self) -> Family { /* ... */ }
///
///     fn output_extension(&self, _: FileType) -> &'static str {
///         "txt"
///     }
///
///     fn extract(&self, source: &SourceFile, config: &SanitizerConfig)
///         -> Result<Extraction, ExtractionFailure> {
///         let mut builder = DocumentBuilder::new();
///         builder.text(String::from_utf8_lossy(&source.bytes));
///         Ok(builder.finish())
///     }
///
///     fn rebuild(&self, _: FileType, layout: &Layout, document: &IntermediateDocument)
///         -> Result<Rebuilt, RebuildFailure> {
///         /* ... */
///     }
/// }
/// ```
pub trait ReconstructionPipeline: Send + Sync {
    fn family(&self) -> Family;

    /// Extension of the rebuilt file for an input of `file_type`.
    fn output_extension(&self, file_type: FileType) -> &'static str;

    /// Takes the source apart into structure, blocks and quarantined pictures.
    ///
    /// # Errors
    ///
    /// Any failure here is fatal for the file; recoverable content problems are
    /// reported as warnings on the extraction instead.
    fn extract(
        &self,
        source: &SourceFile,
        config: &SanitizerConfig,
    ) -> Result<Extraction, ExtractionFailure>;

    /// Serializes a fresh file from the clean document.
    fn rebuild(
        &self,
        file_type: FileType,
        layout: &Layout,
        document: &IntermediateDocument,
    ) -> Result<Rebuilt, RebuildFailure>;
}
