use std::fs;
use std::io::Cursor;
use std::path::Path;

use image::{DynamicImage, ImageFormat, Rgb, RgbImage};
use scour_core::converter::CommandSpec;
use scour_core::document::{
    Block, BlockKind, DocumentBuilder, ImageId, ImageRef, IntermediateDocument, Layout, RawImage,
};
use scour_core::formats::odf::{self, OdfKind};
use scour_core::formats::{sheet, slides, word};
use scour_core::package::PackageReader;
use scour_core::{
    ContentWarning, Family, FileType, Limits, Phase, PixelSanitizer, Sanitizer, SanitizerConfig,
};

fn png(width: u32, height: u32) -> Vec<u8> {
    let image = RgbImage::from_fn(width, height, |x, y| Rgb([x as u8 * 9, y as u8 * 9, 200]));
    let mut out = Cursor::new(Vec::new());
    DynamicImage::ImageRgb8(image)
        .write_to(&mut out, ImageFormat::Png)
        .unwrap();
    out.into_inner()
}

fn text_and_picture() -> IntermediateDocument {
    let image = PixelSanitizer::default().sanitize(&png(16, 8)).unwrap();
    IntermediateDocument {
        blocks: vec![
            Block::Text("Quarterly summary".into()),
            Block::Image(ImageRef {
                id: ImageId(0),
                extent: None,
            }),
        ],
        images: vec![image],
    }
}

fn sanitizer(dir: &Path) -> Sanitizer {
    Sanitizer::new(SanitizerConfig::new(dir.join("Outputs")))
}

#[test]
fn docx_text_and_picture_survive() {
    let dir = tempfile::tempdir().unwrap();
    let input = dir.path().join("summary.docx");
    let source = word::write(&Layout::default(), &text_and_picture()).unwrap();
    fs::write(&input, source.bytes).unwrap();

    let outcome = sanitizer(dir.path()).process(&input).unwrap();
    assert_eq!(outcome.file_type, FileType::Docx);
    assert_eq!(outcome.family, Family::WordProcessing);
    assert_eq!(outcome.blocks, 2);
    assert_eq!(outcome.images, 1);
    assert!(
        !outcome
            .warnings
            .iter()
            .any(|w| matches!(w, ContentWarning::ImageDropped { .. } | ContentWarning::MissingImage(_)))
    );

    let rebuilt = fs::read(&outcome.output).unwrap();
    let mut package = PackageReader::new(rebuilt, &Limits::default()).unwrap();
    let extraction = word::extract(&mut package, &Limits::default()).unwrap().finish();
    let kinds: Vec<BlockKind> = extraction.document.blocks.iter().map(Block::kind).collect();
    assert_eq!(kinds, vec![BlockKind::Text, BlockKind::Image]);
    assert_eq!(extraction.document.blocks[0], Block::Text("Quarterly summary".into()));
    assert_eq!(extraction.quarantine.len(), 1);
    assert!(extraction.quarantine[0].bytes.starts_with(b"\x89PNG"));
}

#[test]
fn odt_text_and_picture_survive() {
    let dir = tempfile::tempdir().unwrap();
    let input = dir.path().join("notes.odt");
    let source = odf::write(OdfKind::Text, &Layout::default(), &text_and_picture()).unwrap();
    fs::write(&input, source.bytes).unwrap();

    let outcome = sanitizer(dir.path()).process(&input).unwrap();
    assert_eq!(outcome.family, Family::OpenDocument);
    assert!(outcome.output.ends_with("out_notes.odt"));
    assert_eq!(outcome.blocks, 2);
    assert_eq!(outcome.images, 1);

    let rebuilt = fs::read(&outcome.output).unwrap();
    let mut package = PackageReader::new(rebuilt, &Limits::default()).unwrap();
    let extraction = odf::extract(&mut package, &Limits::default()).unwrap().finish();
    assert_eq!(extraction.document.count(BlockKind::Text), 1);
    assert_eq!(extraction.document.count(BlockKind::Image), 1);
}

#[test]
fn xlsx_table_survives() {
    let dir = tempfile::tempdir().unwrap();
    let input = dir.path().join("book.xlsx");
    let source = IntermediateDocument {
        blocks: vec![Block::Table(scour_core::document::Table {
            rows: vec![vec!["item".into(), "qty".into()], vec!["bolt".into(), "4".into()]],
        })],
        images: Vec::new(),
    };
    let written = sheet::write(&Layout::default(), &source).unwrap();
    fs::write(&input, written.bytes).unwrap();

    let outcome = sanitizer(dir.path()).process(&input).unwrap();
    assert_eq!(outcome.family, Family::Spreadsheet);
    assert_eq!(outcome.blocks, 1);
    assert!(outcome.output.ends_with("out_book.xlsx"));
}

#[test]
fn pptx_slides_and_picture_survive() {
    let dir = tempfile::tempdir().unwrap();
    let input = dir.path().join("deck.pptx");
    let mut builder = DocumentBuilder::new();
    builder.section(Some("Results".into()));
    builder.text("Revenue up");
    builder.image(RawImage::new(Vec::new(), "chart"), None);
    builder.section(Some("Next steps".into()));
    builder.list(vec!["hire".into(), "ship".into()]);
    let mut deck = builder.finish();
    deck.document.images.push(PixelSanitizer::default().sanitize(&png(24, 12)).unwrap());
    let source = slides::write(&deck.layout, &deck.document).unwrap();
    fs::write(&input, source.bytes).unwrap();

    let outcome = sanitizer(dir.path()).process(&input).unwrap();
    assert_eq!(outcome.file_type, FileType::Pptx);
    assert_eq!(outcome.family, Family::Presentation);
    assert!(outcome.output.ends_with("out_deck.pptx"));
    assert_eq!(outcome.blocks, 3);
    assert_eq!(outcome.images, 1);

    let rebuilt = fs::read(&outcome.output).unwrap();
    let mut package = PackageReader::new(rebuilt, &Limits::default()).unwrap();
    assert_eq!(package.names_under("ppt/media/").len(), 1);
    let extraction = slides::extract(&mut package, &Limits::default()).unwrap().finish();
    let titles: Vec<Option<&str>> =
        extraction.layout.sections.iter().map(|s| s.title.as_deref()).collect();
    assert_eq!(titles, vec![Some("Results"), Some("Next steps")]);
    let kinds: Vec<BlockKind> = extraction.document.blocks.iter().map(Block::kind).collect();
    assert_eq!(kinds, vec![BlockKind::Text, BlockKind::Image, BlockKind::List]);
    assert!(extraction.quarantine[0].bytes.starts_with(b"\x89PNG"));
}

#[cfg(unix)]
#[test]
fn legacy_text_and_carved_picture_rebuilt() {
    let dir = tempfile::tempdir().unwrap();
    let input = dir.path().join("memo.rtf");
    let mut source = b"{\\rtf1\\ansi Intro {\\pict\\pngblip ".to_vec();
    source.extend(png(10, 10));
    source.extend_from_slice(b"} End}");
    fs::write(&input, source).unwrap();

    let mut config = SanitizerConfig::new(dir.path().join("Outputs"));
    config.converters.rtf =
        CommandSpec::new("sh", ["-c", "printf 'Intro\\n\\n[pic]\\n\\nEnd\\n'"]);
    let outcome = Sanitizer::new(config).process(&input).unwrap();
    assert_eq!(outcome.file_type, FileType::Rtf);
    assert_eq!(outcome.family, Family::LegacyBinary);
    assert!(outcome.output.ends_with("out_memo.docx"));
    assert_eq!(outcome.blocks, 3);
    assert_eq!(outcome.images, 1);

    let rebuilt = fs::read(&outcome.output).unwrap();
    let mut package = PackageReader::new(rebuilt, &Limits::default()).unwrap();
    let extraction = word::extract(&mut package, &Limits::default()).unwrap().finish();
    let blocks = &extraction.document.blocks;
    assert_eq!(blocks[0], Block::Text("Intro".into()));
    assert_eq!(blocks[1].kind(), BlockKind::Image);
    assert_eq!(blocks[2], Block::Text("End".into()));
    assert_eq!(extraction.quarantine.len(), 1);
}

#[test]
fn rejected_picture_dropped_with_warning() {
    let dir = tempfile::tempdir().unwrap();
    let input = dir.path().join("broken.docx");
    // Same package, but the media part claims to be a PNG and is not.
    let good = word::write(&Layout::default(), &text_and_picture()).unwrap();
    let mut package = PackageReader::new(good.bytes, &Limits::default()).unwrap();
    let media: Vec<String> = package.names_under("word/media/");
    assert_eq!(media.len(), 1);

    let mut writer = scour_core::package::PackageWriter::new();
    for name in package.names_under("") {
        let bytes = if media.contains(&name) {
            b"\x89PNG\r\n\x1a\nnot really".to_vec()
        } else {
            package.read(&name).unwrap()
        };
        writer.deflated(&name, &bytes).unwrap();
    }
    fs::write(&input, writer.finish().unwrap()).unwrap();

    let outcome = sanitizer(dir.path()).process(&input).unwrap();
    assert_eq!(outcome.blocks, 1);
    assert_eq!(outcome.images, 0);
    assert!(
        outcome
            .warnings
            .iter()
            .any(|w| matches!(w, ContentWarning::ImageDropped { .. }))
    );
}

#[test]
fn unknown_bytes_fail_identification() {
    let dir = tempfile::tempdir().unwrap();
    let input = dir.path().join("mystery.docx");
    fs::write(&input, b"definitely not a package").unwrap();

    let err = sanitizer(dir.path()).process(&input).unwrap_err();
    assert_eq!(err.phase(), Phase::Identify);
    assert!(!dir.path().join("Outputs").exists());
}
