//! The per-file state machine: identify, extract, sanitize images, rebuild, persist.

use std::collections::HashSet;
use std::fmt;
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, PoisonError};

use tempfile::NamedTempFile;

use crate::config::SanitizerConfig;
use crate::document::{Block, BlockKind, Extraction, ImageId, IntermediateDocument, Layout};
use crate::error::{
    ContentWarning, ExtractionFailure, IdentificationFailure, PersistFailure, PipelineError,
};
use crate::families::pipeline_for;
use crate::io::read_source;
use crate::pixels::{PixelSanitizer, SanitizedImage};
use crate::sniff::identify_path;
use crate::traits::{ReconstructionPipeline, SourceFile};
use crate::types::{Family, FileType};

/// Output of a writer: the new file and whatever it could not carry over.
#[derive(Debug, Default)]
pub struct Rebuilt {
    pub bytes: Vec<u8>,
    pub warnings: Vec<ContentWarning>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Phase {
    Identify,
    Extract,
    SanitizeImages,
    Rebuild,
    Persist,
}

impl Phase {
    #[must_use]
    pub fn name(&self) -> &'static str {
        match self {
            Self::Identify => "identify",
            Self::Extract => "extract",
            Self::SanitizeImages => "sanitize-images",
            Self::Rebuild => "rebuild",
            Self::Persist => "persist",
        }
    }
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// A file that was sanitized and written.
#[derive(Debug, Clone)]
pub struct Outcome {
    pub source: PathBuf,
    pub file_type: FileType,
    pub family: Family,
    pub output: PathBuf,
    pub warnings: Vec<ContentWarning>,
    pub blocks: usize,
    pub images: usize,
    pub bytes_written: u64,
}

/// Runs files through their family's pipeline. Shareable across threads.
pub struct Sanitizer {
    config: SanitizerConfig,
    pixels: PixelSanitizer,
    /// Output paths handed out so far; two sources never share one.
    claimed: Mutex<HashSet<PathBuf>>,
}

impl Sanitizer {
    #[must_use]
    pub fn new(config: SanitizerConfig) -> Self {
        let pixels = PixelSanitizer::new(config.limits.max_image_pixels);
        Self {
            config,
            pixels,
            claimed: Mutex::new(HashSet::new()),
        }
    }

    #[must_use]
    pub fn config(&self) -> &SanitizerConfig {
        &self.config
    }

    /// Where the rebuilt copy of `source` goes for a given output extension.
    #[must_use]
    pub fn output_path(&self, source: &Path, extension: &str) -> PathBuf {
        let stem = source
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .filter(|s| !s.is_empty())
            .unwrap_or_else(|| "file".to_string());
        self.config.output_dir.join(format!("out_{stem}.{extension}"))
    }

    /// Reserves an output path for `source`. When another file of this run already
    /// took the plain name, `_2`, `_3` and so on are appended to the stem.
    fn claim_output(&self, source: &Path, extension: &str) -> PathBuf {
        let plain = self.output_path(source, extension);
        let mut claimed = self.claimed.lock().unwrap_or_else(PoisonError::into_inner);
        let mut candidate = plain.clone();
        let mut n = 1;
        while claimed.contains(&candidate) {
            n += 1;
            let stem = plain
                .file_stem()
                .map(|s| s.to_string_lossy().into_owned())
                .unwrap_or_default();
            candidate = plain.with_file_name(format!("{stem}_{n}.{extension}"));
        }
        if n > 1 {
            tracing::warn!(
                source = %source.display(),
                taken = %plain.display(),
                output = %candidate.display(),
                "output name already used in this run"
            );
        }
        claimed.insert(candidate.clone());
        candidate
    }

    fn release_output(&self, output: &Path) {
        self.claimed
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(output);
    }

    /// Sanitizes one file. On error nothing is left in the output directory.
    pub fn process(&self, path: &Path) -> Result<Outcome, PipelineError> {
        self.process_as(path, identify_path(path))
    }

    /// Like [`process`](Self::process), for a caller that already identified the file.
    pub fn process_as(&self, path: &Path, file_type: FileType) -> Result<Outcome, PipelineError> {
        let span = tracing::info_span!("sanitize", file = %path.display());
        let _guard = span.enter();

        if !file_type.is_known() {
            return Err(IdentificationFailure::Unknown(path.to_path_buf()).into());
        }
        let pipeline =
            pipeline_for(file_type).ok_or(IdentificationFailure::Unsupported(file_type))?;
        let family = pipeline.family();
        tracing::debug!(phase = %Phase::Identify, %file_type, %family, "identified");

        let bytes = read_source(path, self.config.limits.max_input_bytes)
            .map_err(ExtractionFailure::from)?;
        let source = SourceFile {
            path: path.to_path_buf(),
            file_type,
            bytes,
        };
        let extraction = pipeline.extract(&source, &self.config)?;
        drop(source);
        tracing::debug!(
            phase = %Phase::Extract,
            blocks = extraction.document.blocks.len(),
            images = extraction.quarantine.len(),
            "extracted"
        );

        let (layout, document, mut warnings) = self.sanitize_images(extraction)?;
        tracing::debug!(
            phase = %Phase::SanitizeImages,
            images = document.images.len(),
            "images rebuilt"
        );

        let rebuilt = pipeline.rebuild(file_type, &layout, &document)?;
        for warning in rebuilt.warnings {
            if !warnings.contains(&warning) {
                warnings.push(warning);
            }
        }
        tracing::debug!(phase = %Phase::Rebuild, bytes = rebuilt.bytes.len(), "rebuilt");

        let output = self.claim_output(path, pipeline.output_extension(file_type));
        let bytes_written = match self.persist(&output, &rebuilt.bytes) {
            Ok(written) => written,
            Err(e) => {
                self.release_output(&output);
                return Err(e.into());
            }
        };

        for warning in &warnings {
            tracing::warn!(%family, "{warning}");
        }
        tracing::info!(
            %family,
            output = %output.display(),
            warnings = warnings.len(),
            "sanitized"
        );

        Ok(Outcome {
            source: path.to_path_buf(),
            file_type,
            family,
            output,
            warnings,
            blocks: document.blocks.len(),
            images: document.count(BlockKind::Image),
            bytes_written,
        })
    }

    /// Replaces every quarantined image with re-encoded pixels. Image blocks whose
    /// picture fails are removed and the surviving ids renumbered densely.
    fn sanitize_images(
        &self,
        extraction: Extraction,
    ) -> Result<(Layout, IntermediateDocument, Vec<ContentWarning>), ExtractionFailure> {
        let Extraction {
            mut layout,
            mut document,
            quarantine,
            mut warnings,
            strict_images,
        } = extraction;

        let mut images: Vec<SanitizedImage> = Vec::with_capacity(quarantine.len());
        let mut renumbered: Vec<Option<ImageId>> = Vec::with_capacity(quarantine.len());
        for raw in quarantine {
            let result = match raw.target {
                Some(target) => self.pixels.sanitize_as(&raw.bytes, target),
                None => self.pixels.sanitize(&raw.bytes),
            };
            match result {
                Ok(image) => {
                    renumbered.push(Some(ImageId(images.len())));
                    images.push(image);
                }
                Err(e) if strict_images => return Err(ExtractionFailure::Image(e)),
                Err(e) => {
                    tracing::warn!(
                        phase = %Phase::SanitizeImages,
                        origin = %raw.origin,
                        error = %e,
                        "dropping image"
                    );
                    warnings.push(ContentWarning::ImageDropped {
                        origin: raw.origin,
                        reason: e.to_string(),
                    });
                    renumbered.push(None);
                }
            }
        }

        let blocks = std::mem::take(&mut document.blocks);
        let mut kept = Vec::with_capacity(blocks.len());
        for block in blocks {
            match block {
                Block::Image(mut image) => {
                    match renumbered.get(image.id.0).copied().flatten() {
                        Some(id) => {
                            image.id = id;
                            document.blocks.push(Block::Image(image));
                            kept.push(true);
                        }
                        None => kept.push(false),
                    }
                }
                other => {
                    document.blocks.push(other);
                    kept.push(true);
                }
            }
        }
        layout.retain_blocks(&kept);
        document.images = images;
        Ok((layout, document, warnings))
    }

    /// Writes `bytes` to a temporary file beside `output` and renames it into place.
    fn persist(&self, output: &Path, bytes: &[u8]) -> Result<u64, PersistFailure> {
        let dir = &self.config.output_dir;
        fs::create_dir_all(dir).map_err(|source| PersistFailure::CreateDir {
            path: dir.clone(),
            source,
        })?;

        let write_error = |source| PersistFailure::Write {
            path: output.to_path_buf(),
            source,
        };
        let mut temp = NamedTempFile::new_in(dir).map_err(write_error)?;
        temp.write_all(bytes).map_err(write_error)?;
        temp.as_file().sync_all().map_err(write_error)?;
        temp.persist(output).map_err(|e| write_error(e.error))?;

        tracing::debug!(phase = %Phase::Persist, output = %output.display(), "persisted");
        Ok(bytes.len() as u64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::document::{DocumentBuilder, RawImage};
    use crate::pixels::test_png;
    use crate::types::RasterFormat;

    fn sanitizer(dir: &Path) -> Sanitizer {
        Sanitizer::new(SanitizerConfig::new(dir.join("Outputs")))
    }

    #[test]
    fn output_name_from_stem() {
        let s = Sanitizer::new(SanitizerConfig::new("/out"));
        assert_eq!(
            s.output_path(Path::new("/in/report.final.docx"), "docx"),
            PathBuf::from("/out/out_report.final.docx")
        );
    }

    #[test]
    fn same_stem_outputs_get_suffixes() {
        let dir = tempfile::tempdir().unwrap();
        let s = sanitizer(dir.path());
        let outputs = dir.path().join("Outputs");
        let claim = |source: &str, ext| s.claim_output(Path::new(source), ext);
        assert_eq!(claim("/a/notes.doc", "docx"), outputs.join("out_notes.docx"));
        assert_eq!(claim("/a/notes.docx", "docx"), outputs.join("out_notes_2.docx"));
        assert_eq!(claim("/b/notes.rtf", "docx"), outputs.join("out_notes_3.docx"));
        assert_eq!(claim("/a/notes.png", "png"), outputs.join("out_notes.png"));
        s.release_output(&outputs.join("out_notes_2.docx"));
        assert_eq!(claim("/c/notes.doc", "docx"), outputs.join("out_notes_2.docx"));
    }

    #[test]
    fn colliding_inputs_both_written() {
        let dir = tempfile::tempdir().unwrap();
        let first = dir.path().join("one");
        let second = dir.path().join("two");
        fs::create_dir_all(&first).unwrap();
        fs::create_dir_all(&second).unwrap();
        fs::write(first.join("photo.png"), test_png(4, 4)).unwrap();
        fs::write(second.join("photo.png"), test_png(6, 2)).unwrap();

        let s = sanitizer(dir.path());
        let a = s.process(&first.join("photo.png")).unwrap();
        let b = s.process(&second.join("photo.png")).unwrap();
        assert_ne!(a.output, b.output);
        assert!(b.output.ends_with("out_photo_2.png"));
        assert_eq!(fs::read_dir(dir.path().join("Outputs")).unwrap().count(), 2);
    }

    #[test]
    fn identified_type_is_trusted() {
        let dir = tempfile::tempdir().unwrap();
        let input = dir.path().join("photo.png");
        fs::write(&input, test_png(4, 4)).unwrap();

        let err = sanitizer(dir.path()).process_as(&input, FileType::Unknown).unwrap_err();
        assert_eq!(err.phase(), Phase::Identify);
        let outcome = sanitizer(dir.path()).process_as(&input, FileType::Image(RasterFormat::Png)).unwrap();
        assert_eq!(outcome.file_type, FileType::Image(RasterFormat::Png));
    }

    #[test]
    fn failed_image_block_is_dropped() {
        let dir = tempfile::tempdir().unwrap();
        let s = sanitizer(dir.path());

        let mut builder = DocumentBuilder::new();
        builder.section(Some("one".into()));
        builder.declare_image_slot();
        builder.declare_image_slot();
        builder.image(RawImage::new(b"not an image".to_vec(), "bad"), None);
        builder.section(Some("two".into()));
        builder.text("kept");
        builder.image(RawImage::new(test_png(3, 2), "good"), None);
        let extraction = builder.finish();

        let (layout, document, warnings) = s.sanitize_images(extraction).unwrap();
        assert_eq!(document.blocks.len(), 2);
        assert_eq!(document.blocks[0], Block::Text("kept".into()));
        match &document.blocks[1] {
            Block::Image(image) => assert_eq!(image.id, ImageId(0)),
            other => panic!("unexpected {other:?}"),
        }
        assert_eq!(document.images.len(), 1);
        assert_eq!(document.images[0].dimensions(), (3, 2));
        assert_eq!(layout.sections[1].first_block, 0);
        assert!(matches!(
            &warnings[..],
            [ContentWarning::ImageDropped { origin, .. }] if origin == "bad"
        ));
    }

    #[test]
    fn strict_image_failure_is_fatal() {
        let dir = tempfile::tempdir().unwrap();
        let s = sanitizer(dir.path());
        let mut builder = DocumentBuilder::new();
        builder.image(RawImage::new(vec![0x89, b'P', b'N', b'G'], "x.png"), None);
        let mut extraction = builder.finish();
        extraction.strict_images = true;
        assert!(matches!(
            s.sanitize_images(extraction),
            Err(ExtractionFailure::Image(_))
        ));
    }

    #[test]
    fn png_round_trip_writes_output() {
        let dir = tempfile::tempdir().unwrap();
        let input = dir.path().join("photo.png");
        let mut bytes = test_png(4, 4);
        bytes.extend_from_slice(b"appended payload");
        fs::write(&input, &bytes).unwrap();

        let outcome = sanitizer(dir.path()).process(&input).unwrap();
        assert_eq!(outcome.family, Family::Raster);
        assert_eq!(outcome.output, dir.path().join("Outputs").join("out_photo.png"));
        let written = fs::read(&outcome.output).unwrap();
        assert_eq!(written.len() as u64, outcome.bytes_written);
        assert!(!written.ends_with(b"appended payload"));
        assert_eq!(fs::read_dir(dir.path().join("Outputs")).unwrap().count(), 1);
    }

    #[test]
    fn unknown_input_leaves_nothing() {
        let dir = tempfile::tempdir().unwrap();
        let input = dir.path().join("notes.txt");
        fs::write(&input, b"plain words").unwrap();

        let err = sanitizer(dir.path()).process(&input).unwrap_err();
        assert_eq!(err.phase(), Phase::Identify);
        assert!(!dir.path().join("Outputs").exists());
    }

    #[test]
    fn corrupt_raster_fails_without_output() {
        let dir = tempfile::tempdir().unwrap();
        let input = dir.path().join("broken.png");
        let mut bytes = test_png(2, 2);
        bytes.truncate(20);
        fs::write(&input, &bytes).unwrap();

        let err = sanitizer(dir.path()).process(&input).unwrap_err();
        assert_eq!(err.phase(), Phase::SanitizeImages);
        assert!(!dir.path().join("Outputs").exists());
    }

    #[test]
    fn phase_names() {
        assert_eq!(Phase::SanitizeImages.to_string(), "sanitize-images");
    }
}
