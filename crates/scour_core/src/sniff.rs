//! Magic-number identification cross-checked against the claimed extension.
//!
//! The signature table is built once, ordered longest pattern first, so a specific
//! container signature always wins over a shorter generic one that shares its prefix.

use once_cell::sync::Lazy;
use std::fs::File;
use std::io::Read;
use std::path::Path;

use crate::types::{FileType, RasterFormat};

/// Bytes read from the head of a file for identification.
pub const HEADER_LEN: usize = 24;

const OLE_TYPES: &[FileType] = &[FileType::Doc, FileType::Xls, FileType::Ppt];

const OOXML_TYPES: &[FileType] = &[
    FileType::Docx,
    FileType::Xlsx,
    FileType::Pptx,
    FileType::Docm,
    FileType::Xlsm,
    FileType::Pptm,
];

const ODF_TYPES: &[FileType] = &[FileType::Ott, FileType::Odt, FileType::Ods, FileType::Odp];

const ZIP_TYPES: &[FileType] = &[
    FileType::Docx,
    FileType::Xlsx,
    FileType::Pptx,
    FileType::Docm,
    FileType::Xlsm,
    FileType::Pptm,
    FileType::Ott,
    FileType::Odt,
    FileType::Ods,
    FileType::Odp,
];

/// What a matched signature says about the file.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Verdict {
    /// The signature identifies exactly one type.
    Single(FileType),
    /// The signature is shared by several types; the extension must pick one of them.
    Candidates(&'static [FileType]),
}

impl Verdict {
    #[must_use]
    pub fn resolve(&self, extension: Option<&str>) -> FileType {
        match self {
            Self::Single(file_type) => *file_type,
            Self::Candidates(candidates) => discriminate(candidates, extension),
        }
    }
}

/// Picks the candidate named by `extension`. An extension outside the set is a hard
/// identification failure, never a guess.
#[must_use]
pub fn discriminate(candidates: &[FileType], extension: Option<&str>) -> FileType {
    let Some(extension) = extension else {
        return FileType::Unknown;
    };
    let extension = extension.trim_start_matches('.').to_ascii_lowercase();

    candidates
        .iter()
        .copied()
        .find(|candidate| candidate.extension() == extension)
        .unwrap_or(FileType::Unknown)
}

#[derive(Debug, Clone, Copy)]
pub struct Signature {
    pub pattern: &'static [u8],
    pub verdict: Verdict,
}

impl Signature {
    const fn new(pattern: &'static [u8], verdict: Verdict) -> Self {
        Self { pattern, verdict }
    }
}

const REGISTERED: &[Signature] = &[
    Signature::new(
        &[0x89, 0x50, 0x4E, 0x47, 0x0D, 0x0A, 0x1A, 0x0A],
        Verdict::Single(FileType::Image(RasterFormat::Png)),
    ),
    Signature::new(&[0xFF, 0xD8, 0xFF, 0xE0], Verdict::Single(FileType::Image(RasterFormat::Jpeg))),
    Signature::new(&[0xFF, 0xD8, 0xFF, 0xE1], Verdict::Single(FileType::Image(RasterFormat::Jpeg))),
    Signature::new(&[0xFF, 0xD8, 0xFF, 0xDB], Verdict::Single(FileType::Image(RasterFormat::Jpeg))),
    Signature::new(&[0xFF, 0xD8, 0xFF, 0xEE], Verdict::Single(FileType::Image(RasterFormat::Jpeg))),
    Signature::new(
        &[0xD0, 0xCF, 0x11, 0xE0, 0xA1, 0xB1, 0x1A, 0xE1],
        Verdict::Candidates(OLE_TYPES),
    ),
    Signature::new(&[0x7B, 0x5C, 0x72, 0x74, 0x66, 0x31], Verdict::Single(FileType::Rtf)),
    Signature::new(
        &[0x50, 0x4B, 0x03, 0x04, 0x14, 0x00, 0x06, 0x00],
        Verdict::Candidates(OOXML_TYPES),
    ),
    Signature::new(
        &[0x50, 0x4B, 0x03, 0x04, 0x14, 0x00, 0x00, 0x08],
        Verdict::Candidates(ODF_TYPES),
    ),
    Signature::new(&[0x50, 0x4B, 0x03, 0x04], Verdict::Candidates(ZIP_TYPES)),
    Signature::new(&[0x25, 0x50, 0x44, 0x46], Verdict::Single(FileType::Pdf)),
];

static SIGNATURES: Lazy<Vec<Signature>> = Lazy::new(|| {
    let mut table = REGISTERED.to_vec();
    // Stable: equal-length patterns keep registration order.
    table.sort_by(|a, b| b.pattern.len().cmp(&a.pattern.len()));
    table
});

/// The ordered, immutable signature table used by [`identify`].
#[must_use]
pub fn signature_table() -> &'static [Signature] {
    &SIGNATURES
}

/// Classifies `header` (any length, including empty). Never panics.
#[must_use]
pub fn identify(header: &[u8], claimed_extension: Option<&str>) -> FileType {
    signature_table()
        .iter()
        .find(|signature| header.starts_with(signature.pattern))
        .map(|signature| signature.verdict.resolve(claimed_extension))
        .unwrap_or(FileType::Unknown)
}

/// Reads the head of `path` and identifies it. Unreadable files are `Unknown`.
#[must_use]
pub fn identify_path(path: &Path) -> FileType {
    let extension = path.extension().and_then(|e| e.to_str());

    let mut header = Vec::with_capacity(HEADER_LEN);
    let read = File::open(path).and_then(|file| file.take(HEADER_LEN as u64).read_to_end(&mut header));
    if let Err(e) = read {
        tracing::warn!(file = %path.display(), error = %e, "could not read header");
        return FileType::Unknown;
    }

    let file_type = identify(&header, extension);
    tracing::debug!(file = %path.display(), %file_type, "identified");
    file_type
}
