//! Family-neutral intermediate model.
//!
//! Extractors translate a source container into ordered [`Block`]s. Image blocks only
//! ever hold an [`ImageId`]; the bytes behind it live in quarantine until the pixel
//! sanitizer has rebuilt them.

use std::ops::Range;

use crate::error::ContentWarning;
use crate::pixels::SanitizedImage;
use crate::types::RasterFormat;

/// English Metric Units per pixel at 96 dpi.
pub const EMU_PER_PIXEL: u64 = 9_525;
/// Widest image placed on a page, 6 inches.
pub const MAX_IMAGE_WIDTH_EMU: u64 = 6 * 914_400;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ImageId(pub usize);

/// Display size of an image.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Extent {
    pub width_emu: u64,
    pub height_emu: u64,
}

impl Extent {
    /// Natural size at 96 dpi, scaled down to fit the page width.
    #[must_use]
    pub fn from_pixels(width: u32, height: u32) -> Self {
        let width_emu = u64::from(width.max(1)) * EMU_PER_PIXEL;
        let height_emu = u64::from(height.max(1)) * EMU_PER_PIXEL;
        if width_emu <= MAX_IMAGE_WIDTH_EMU {
            return Self { width_emu, height_emu };
        }
        Self {
            width_emu: MAX_IMAGE_WIDTH_EMU,
            height_emu: (height_emu * MAX_IMAGE_WIDTH_EMU / width_emu).max(1),
        }
    }

    /// Size in centimetres, as written into OpenDocument frames.
    #[must_use]
    pub fn to_cm(&self) -> (f64, f64) {
        const EMU_PER_CM: f64 = 360_000.0;
        (
            self.width_emu as f64 / EMU_PER_CM,
            self.height_emu as f64 / EMU_PER_CM,
        )
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ImageRef {
    pub id: ImageId,
    /// Size declared by the source, when it declared one.
    pub extent: Option<Extent>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Table {
    pub rows: Vec<Vec<String>>,
}

impl Table {
    #[must_use]
    pub fn columns(&self) -> usize {
        self.rows.iter().map(Vec::len).max().unwrap_or(0)
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.rows.iter().all(|row| row.iter().all(|cell| cell.is_empty()))
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Block {
    Text(String),
    Image(ImageRef),
    Table(Table),
    List(Vec<String>),
}

impl Block {
    #[must_use]
    pub fn kind(&self) -> BlockKind {
        match self {
            Self::Text(_) => BlockKind::Text,
            Self::Image(_) => BlockKind::Image,
            Self::Table(_) => BlockKind::Table,
            Self::List(_) => BlockKind::List,
        }
    }

    /// Plain-text rendering for targets that only hold text.
    #[must_use]
    pub fn plain_text(&self) -> Option<String> {
        match self {
            Self::Text(text) => Some(text.clone()),
            Self::List(items) => Some(items.join("\n")),
            Self::Table(table) => Some(
                table
                    .rows
                    .iter()
                    .map(|row| row.join("\t"))
                    .collect::<Vec<_>>()
                    .join("\n"),
            ),
            Self::Image(_) => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BlockKind {
    Text,
    Image,
    Table,
    List,
}

impl std::fmt::Display for BlockKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Self::Text => "text",
            Self::Image => "image",
            Self::Table => "table",
            Self::List => "list",
        };
        write!(f, "{name}")
    }
}

/// A slide, sheet, page or the single body of a text document.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Section {
    pub title: Option<String>,
    pub first_block: usize,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Layout {
    pub sections: Vec<Section>,
    /// Images the source structure declares, whether or not they could be read.
    pub image_slots: usize,
}

impl Layout {
    /// Each section with the block range it covers. Blocks before the first section
    /// belong to an implicit untitled one.
    #[must_use]
    pub fn section_ranges(&self, block_count: usize) -> Vec<(Option<&str>, Range<usize>)> {
        let mut ranges = Vec::with_capacity(self.sections.len() + 1);
        let first = self.sections.first().map_or(block_count, |s| s.first_block);
        if first > 0 || self.sections.is_empty() {
            ranges.push((None, 0..first.min(block_count)));
        }
        for (i, section) in self.sections.iter().enumerate() {
            let end = self
                .sections
                .get(i + 1)
                .map_or(block_count, |next| next.first_block)
                .min(block_count);
            let start = section.first_block.min(end);
            ranges.push((section.title.as_deref(), start..end));
        }
        ranges
    }

    /// Renumbers section starts after blocks were removed. `kept[i]` tells whether
    /// old block `i` survived.
    pub fn retain_blocks(&mut self, kept: &[bool]) {
        for section in &mut self.sections {
            let bound = section.first_block.min(kept.len());
            section.first_block = kept[..bound].iter().filter(|&&k| k).count();
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct IntermediateDocument {
    pub blocks: Vec<Block>,
    /// Indexed by [`ImageId`]. Empty until the images have been sanitized.
    pub images: Vec<SanitizedImage>,
}

impl IntermediateDocument {
    #[must_use]
    pub fn image(&self, id: ImageId) -> Option<&SanitizedImage> {
        self.images.get(id.0)
    }

    #[must_use]
    pub fn count(&self, kind: BlockKind) -> usize {
        self.blocks.iter().filter(|b| b.kind() == kind).count()
    }
}

/// Untrusted image bytes awaiting the pixel sanitizer.
#[derive(Debug, Clone)]
pub struct RawImage {
    pub bytes: Vec<u8>,
    /// Where the bytes came from, for diagnostics.
    pub origin: String,
    /// Re-encode into this format instead of the source's.
    pub target: Option<RasterFormat>,
}

impl RawImage {
    pub fn new(bytes: Vec<u8>, origin: impl Into<String>) -> Self {
        Self {
            bytes,
            origin: origin.into(),
            target: None,
        }
    }
}

/// Result of the extract phase.
#[derive(Debug, Default)]
pub struct Extraction {
    pub layout: Layout,
    /// Image blocks index into `quarantine`.
    pub document: IntermediateDocument,
    pub quarantine: Vec<RawImage>,
    pub warnings: Vec<ContentWarning>,
    /// A failing image fails the whole file instead of being dropped.
    pub strict_images: bool,
}

/// Accumulates blocks in reading order.
#[derive(Debug, Default)]
pub struct DocumentBuilder {
    blocks: Vec<Block>,
    sections: Vec<Section>,
    quarantine: Vec<RawImage>,
    warnings: Vec<ContentWarning>,
    image_slots: usize,
}

impl DocumentBuilder {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn section(&mut self, title: Option<String>) {
        self.sections.push(Section {
            title: title.filter(|t| !t.trim().is_empty()),
            first_block: self.blocks.len(),
        });
    }

    /// Whitespace-only text is not a block.
    pub fn text(&mut self, text: impl Into<String>) {
        let text = text.into();
        if !text.trim().is_empty() {
            self.blocks.push(Block::Text(text));
        }
    }

    pub fn table(&mut self, rows: Vec<Vec<String>>) {
        let table = Table { rows };
        if !table.is_empty() {
            self.blocks.push(Block::Table(table));
        }
    }

    pub fn list(&mut self, items: Vec<String>) {
        let items: Vec<String> = items.into_iter().filter(|i| !i.trim().is_empty()).collect();
        if !items.is_empty() {
            self.blocks.push(Block::List(items));
        }
    }

    /// Quarantines `raw` and places a reference to it at the current position.
    pub fn image(&mut self, raw: RawImage, extent: Option<Extent>) -> ImageId {
        let id = ImageId(self.quarantine.len());
        self.quarantine.push(raw);
        self.blocks.push(Block::Image(ImageRef { id, extent }));
        id
    }

    /// Counts an image the source structure references.
    pub fn declare_image_slot(&mut self) {
        self.image_slots += 1;
    }

    /// Records `warning` once.
    pub fn warn(&mut self, warning: ContentWarning) {
        if !self.warnings.contains(&warning) {
            self.warnings.push(warning);
        }
    }

    #[must_use]
    pub fn block_count(&self) -> usize {
        self.blocks.len()
    }

    #[must_use]
    pub fn finish(mut self) -> Extraction {
        if self.image_slots != self.quarantine.len() {
            self.warn(ContentWarning::ImageCountMismatch {
                declared: self.image_slots,
                found: self.quarantine.len(),
            });
        }
        Extraction {
            layout: Layout {
                sections: self.sections,
                image_slots: self.image_slots,
            },
            document: IntermediateDocument {
                blocks: self.blocks,
                images: Vec::new(),
            },
            quarantine: self.quarantine,
            warnings: self.warnings,
            strict_images: false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builder_orders_blocks() {
        let mut builder = DocumentBuilder::new();
        builder.text("Heading");
        builder.text("   ");
        builder.declare_image_slot();
        let id = builder.image(RawImage::new(vec![1, 2, 3], "media/image1.png"), None);
        builder.table(vec![vec!["a".into(), "b".into()]]);
        builder.list(vec!["one".into(), "".into()]);

        let extraction = builder.finish();
        let kinds: Vec<BlockKind> = extraction.document.blocks.iter().map(Block::kind).collect();
        assert_eq!(
            kinds,
            vec![BlockKind::Text, BlockKind::Image, BlockKind::Table, BlockKind::List]
        );
        assert_eq!(id, ImageId(0));
        assert_eq!(extraction.quarantine.len(), 1);
        assert!(extraction.warnings.is_empty());
        assert!(extraction.document.images.is_empty());
    }

    #[test]
    fn image_count_mismatch_warns() {
        let mut builder = DocumentBuilder::new();
        builder.declare_image_slot();
        builder.declare_image_slot();
        builder.image(RawImage::new(vec![0], "a"), None);
        let extraction = builder.finish();
        assert_eq!(
            extraction.warnings,
            vec![ContentWarning::ImageCountMismatch { declared: 2, found: 1 }]
        );
    }

    #[test]
    fn warnings_deduplicated() {
        let mut builder = DocumentBuilder::new();
        let w = ContentWarning::UnrecognizedElement {
            part: "word/document.xml".into(),
            element: "sdt".into(),
        };
        builder.warn(w.clone());
        builder.warn(w);
        assert_eq!(builder.finish().warnings.len(), 1);
    }

    #[test]
    fn section_ranges_cover_blocks() {
        let mut builder = DocumentBuilder::new();
        builder.text("preamble");
        builder.section(Some("Sheet1".into()));
        builder.text("a");
        builder.text("b");
        builder.section(Some("Sheet2".into()));
        builder.text("c");
        let extraction = builder.finish();

        let ranges = extraction.layout.section_ranges(extraction.document.blocks.len());
        assert_eq!(
            ranges,
            vec![(None, 0..1), (Some("Sheet1"), 1..3), (Some("Sheet2"), 3..4)]
        );
    }

    #[test]
    fn retain_blocks_shifts_sections() {
        let mut layout = Layout {
            sections: vec![
                Section { title: None, first_block: 0 },
                Section { title: None, first_block: 2 },
                Section { title: None, first_block: 4 },
            ],
            image_slots: 0,
        };
        layout.retain_blocks(&[true, false, true, false, true]);
        let starts: Vec<usize> = layout.sections.iter().map(|s| s.first_block).collect();
        assert_eq!(starts, vec![0, 1, 2]);
    }

    #[test]
    fn extent_caps_width() {
        let small = Extent::from_pixels(100, 50);
        assert_eq!(small.width_emu, 952_500);
        let wide = Extent::from_pixels(2000, 1000);
        assert_eq!(wide.width_emu, MAX_IMAGE_WIDTH_EMU);
        assert_eq!(wide.height_emu, MAX_IMAGE_WIDTH_EMU / 2);
    }
}
