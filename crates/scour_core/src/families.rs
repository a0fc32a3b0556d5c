//! One [`ReconstructionPipeline`] per document family.

use std::fs;
use std::path::{Path, PathBuf};

use crate::config::SanitizerConfig;
use crate::converter::ExternalConverter;
use crate::document::{DocumentBuilder, Extraction, IntermediateDocument, Layout, RawImage};
use crate::error::{CoreError, ExtractionFailure, RebuildFailure};
use crate::formats::legacy::{self, Dialect};
use crate::formats::odf::{self, OdfKind};
use crate::formats::{pdf, sheet, slides, word};
use crate::io::read_source;
use crate::package::PackageReader;
use crate::pipeline::Rebuilt;
use crate::traits::{ReconstructionPipeline, SourceFile};
use crate::types::{Family, FileType, RasterFormat};

/// The pipeline handling `file_type`, if any.
#[must_use]
pub fn pipeline_for(file_type: FileType) -> Option<&'static dyn ReconstructionPipeline> {
    let pipeline: &'static dyn ReconstructionPipeline = match file_type.family()? {
        Family::Raster => &RasterPipeline,
        Family::WordProcessing => &WordProcessingPipeline,
        Family::Spreadsheet => &SpreadsheetPipeline,
        Family::Presentation => &PresentationPipeline,
        Family::OpenDocument => &OpenDocumentPipeline,
        Family::LegacyBinary => &LegacyBinaryPipeline,
        Family::Portable => &PortablePipeline,
    };
    Some(pipeline)
}

fn open_package(
    source: &SourceFile,
    config: &SanitizerConfig,
) -> Result<PackageReader, ExtractionFailure> {
    PackageReader::new(source.bytes.clone(), &config.limits)
}

/// Standalone PNG and JPEG files. The picture is the whole document, so a failure to
/// re-encode it fails the file.
pub struct RasterPipeline;

impl ReconstructionPipeline for RasterPipeline {
    fn family(&self) -> Family {
        Family::Raster
    }

    fn output_extension(&self, file_type: FileType) -> &'static str {
        file_type.extension()
    }

    fn extract(
        &self,
        source: &SourceFile,
        _config: &SanitizerConfig,
    ) -> Result<Extraction, ExtractionFailure> {
        let FileType::Image(format) = source.file_type else {
            return Err(ExtractionFailure::Malformed(format!(
                "{} is not a raster image",
                source.file_type
            )));
        };
        let mut builder = DocumentBuilder::new();
        builder.declare_image_slot();
        builder.image(
            RawImage {
                bytes: source.bytes.clone(),
                origin: source.path.display().to_string(),
                target: Some(format),
            },
            None,
        );
        let mut extraction = builder.finish();
        extraction.strict_images = true;
        Ok(extraction)
    }

    fn rebuild(
        &self,
        _file_type: FileType,
        _layout: &Layout,
        document: &IntermediateDocument,
    ) -> Result<Rebuilt, RebuildFailure> {
        let image = document.images.first().ok_or(RebuildFailure::Empty("no image"))?;
        Ok(Rebuilt {
            bytes: image.bytes().to_vec(),
            warnings: Vec::new(),
        })
    }
}

/// `.docx` and `.docm`, rebuilt as `.docx`.
pub struct WordProcessingPipeline;

impl ReconstructionPipeline for WordProcessingPipeline {
    fn family(&self) -> Family {
        Family::WordProcessing
    }

    fn output_extension(&self, _file_type: FileType) -> &'static str {
        "docx"
    }

    fn extract(
        &self,
        source: &SourceFile,
        config: &SanitizerConfig,
    ) -> Result<Extraction, ExtractionFailure> {
        let mut package = open_package(source, config)?;
        Ok(word::extract(&mut package, &config.limits)?.finish())
    }

    fn rebuild(
        &self,
        _file_type: FileType,
        layout: &Layout,
        document: &IntermediateDocument,
    ) -> Result<Rebuilt, RebuildFailure> {
        word::write(layout, document)
    }
}

/// `.xlsx` and `.xlsm`, rebuilt as `.xlsx`.
pub struct SpreadsheetPipeline;

impl ReconstructionPipeline for SpreadsheetPipeline {
    fn family(&self) -> Family {
        Family::Spreadsheet
    }

    fn output_extension(&self, _file_type: FileType) -> &'static str {
        "xlsx"
    }

    fn extract(
        &self,
        source: &SourceFile,
        config: &SanitizerConfig,
    ) -> Result<Extraction, ExtractionFailure> {
        let mut package = open_package(source, config)?;
        Ok(sheet::extract(&mut package, &config.limits)?.finish())
    }

    fn rebuild(
        &self,
        _file_type: FileType,
        layout: &Layout,
        document: &IntermediateDocument,
    ) -> Result<Rebuilt, RebuildFailure> {
        sheet::write(layout, document)
    }
}

/// `.pptx` and `.pptm`, rebuilt as `.pptx`.
pub struct PresentationPipeline;

impl ReconstructionPipeline for PresentationPipeline {
    fn family(&self) -> Family {
        Family::Presentation
    }

    fn output_extension(&self, _file_type: FileType) -> &'static str {
        "pptx"
    }

    fn extract(
        &self,
        source: &SourceFile,
        config: &SanitizerConfig,
    ) -> Result<Extraction, ExtractionFailure> {
        let mut package = open_package(source, config)?;
        Ok(slides::extract(&mut package, &config.limits)?.finish())
    }

    fn rebuild(
        &self,
        _file_type: FileType,
        layout: &Layout,
        document: &IntermediateDocument,
    ) -> Result<Rebuilt, RebuildFailure> {
        slides::write(layout, document)
    }
}

/// OpenDocument text, spreadsheet and presentation packages. Templates come back as
/// plain documents.
pub struct OpenDocumentPipeline;

impl OpenDocumentPipeline {
    fn kind(file_type: FileType) -> OdfKind {
        OdfKind::for_type(file_type).unwrap_or(OdfKind::Text)
    }
}

impl ReconstructionPipeline for OpenDocumentPipeline {
    fn family(&self) -> Family {
        Family::OpenDocument
    }

    fn output_extension(&self, file_type: FileType) -> &'static str {
        Self::kind(file_type).extension()
    }

    fn extract(
        &self,
        source: &SourceFile,
        config: &SanitizerConfig,
    ) -> Result<Extraction, ExtractionFailure> {
        let mut package = open_package(source, config)?;
        Ok(odf::extract(&mut package, &config.limits)?.finish())
    }

    fn rebuild(
        &self,
        file_type: FileType,
        layout: &Layout,
        document: &IntermediateDocument,
    ) -> Result<Rebuilt, RebuildFailure> {
        odf::write(Self::kind(file_type), layout, document)
    }
}

/// `.doc`, `.rtf`, `.xls` and `.ppt`: text from an external converter, pictures
/// carved from the raw bytes.
pub struct LegacyBinaryPipeline;

impl ReconstructionPipeline for LegacyBinaryPipeline {
    fn family(&self) -> Family {
        Family::LegacyBinary
    }

    fn output_extension(&self, file_type: FileType) -> &'static str {
        match file_type {
            FileType::Xls => "xlsx",
            FileType::Ppt => "pptx",
            _ => "docx",
        }
    }

    fn extract(
        &self,
        source: &SourceFile,
        config: &SanitizerConfig,
    ) -> Result<Extraction, ExtractionFailure> {
        let unsupported =
            || ExtractionFailure::Malformed(format!("no converter for {}", source.file_type));
        let dialect = Dialect::for_type(source.file_type).ok_or_else(unsupported)?;
        let command = config.converters.for_type(source.file_type).ok_or_else(unsupported)?;

        let converted = ExternalConverter::new(command.clone(), config.converters.timeout())
            .run(&source.path, None)?;
        let text = converted.stdout_lossy();
        tracing::debug!(file_type = %source.file_type, chars = text.len(), "converter finished");

        Ok(legacy::extract(&source.bytes, &text, dialect, &config.limits).finish())
    }

    fn rebuild(
        &self,
        file_type: FileType,
        layout: &Layout,
        document: &IntermediateDocument,
    ) -> Result<Rebuilt, RebuildFailure> {
        match file_type {
            FileType::Xls => sheet::write(layout, document),
            FileType::Ppt => slides::write(layout, document),
            _ => word::write(layout, document),
        }
    }
}

/// PDF: rasterized page by page and rebuilt from the page pictures alone.
pub struct PortablePipeline;

impl ReconstructionPipeline for PortablePipeline {
    fn family(&self) -> Family {
        Family::Portable
    }

    fn output_extension(&self, _file_type: FileType) -> &'static str {
        "pdf"
    }

    fn extract(
        &self,
        source: &SourceFile,
        config: &SanitizerConfig,
    ) -> Result<Extraction, ExtractionFailure> {
        let scratch = tempfile::tempdir().map_err(CoreError::from)?;
        let prefix = scratch.path().join("page");
        ExternalConverter::new(config.converters.pdf_raster.clone(), config.converters.timeout())
            .run(&source.path, Some(&prefix))?;

        let pages = rendered_pages(scratch.path()).map_err(CoreError::from)?;
        if pages.is_empty() {
            return Err(ExtractionFailure::Malformed("rasterizer produced no pages".into()));
        }

        let mut builder = DocumentBuilder::new();
        for (index, page) in pages.iter().enumerate() {
            let bytes = read_source(page, config.limits.max_input_bytes)?;
            builder.declare_image_slot();
            builder.image(
                RawImage {
                    bytes,
                    origin: format!("page {}", index + 1),
                    target: Some(RasterFormat::Png),
                },
                None,
            );
        }
        Ok(builder.finish())
    }

    fn rebuild(
        &self,
        _file_type: FileType,
        _layout: &Layout,
        document: &IntermediateDocument,
    ) -> Result<Rebuilt, RebuildFailure> {
        pdf::write(document)
    }
}

/// PNG files in `dir`, ordered by the page number the rasterizer appended.
fn rendered_pages(dir: &Path) -> std::io::Result<Vec<PathBuf>> {
    let mut pages: Vec<(u64, PathBuf)> = Vec::new();
    for entry in fs::read_dir(dir)? {
        let path = entry?.path();
        if path.extension().and_then(|e| e.to_str()) != Some("png") {
            continue;
        }
        let number = path
            .file_stem()
            .and_then(|s| s.to_str())
            .and_then(|s| s.rsplit('-').next())
            .and_then(|n| n.parse().ok())
            .unwrap_or(u64::MAX);
        pages.push((number, path));
    }
    pages.sort();
    Ok(pages.into_iter().map(|(_, path)| path).collect())
}
