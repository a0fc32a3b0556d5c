use proptest::prelude::*;
use scour_core::carving::{carve, merge, resolve_regions};
use scour_core::{Carver, FileType, RasterFormat, identify};

const JPEG_START: &[u8] = &[0xFF, 0xD8, 0xFF, 0xE0];
const JPEG_END: &[u8] = &[0xFF, 0xD9];
const SHORT_PNG_START: &[u8] = &[0x89, b'P', b'N', b'G'];
const PNG_END: &[u8] = &[b'I', b'E', b'N', b'D', 0xAE, 0x42, 0x60, 0x82];

#[derive(Debug, Clone)]
enum Token {
    Start,
    End,
    Filler(usize),
}

fn token() -> impl Strategy<Value = Token> {
    prop_oneof![
        Just(Token::Start),
        Just(Token::End),
        (0usize..40).prop_map(Token::Filler),
    ]
}

fn assemble(tokens: &[Token]) -> Vec<u8> {
    let mut buffer = Vec::new();
    for token in tokens {
        match token {
            Token::Start => buffer.extend_from_slice(JPEG_START),
            Token::End => buffer.extend_from_slice(JPEG_END),
            Token::Filler(n) => buffer.resize(buffer.len() + n, 0x00),
        }
    }
    buffer
}

proptest! {
    #[test]
    fn identify_is_total(
        header in proptest::collection::vec(any::<u8>(), 0..64),
        extension in proptest::option::of("[a-zA-Z.]{0,6}"),
    ) {
        let file_type = identify(&header, extension.as_deref());
        if header.len() < 4 {
            prop_assert_eq!(file_type, FileType::Unknown);
        }
    }

    #[test]
    fn marker_soup_regions_are_ordered(tokens in proptest::collection::vec(token(), 0..60)) {
        let buffer = assemble(&tokens);
        let report = Carver::for_format(RasterFormat::Jpeg).carve(&buffer);

        for region in &report.regions {
            prop_assert!(region.end_offset > region.start_offset);
            prop_assert!(region.materialize(&buffer).is_some());
        }
        for pair in report.regions.windows(2) {
            prop_assert!(pair[0].span().end <= pair[1].start_offset);
        }
    }

    #[test]
    fn resolve_never_overlaps(
        mut starts in proptest::collection::vec(0usize..500, 0..20),
        mut ends in proptest::collection::vec(0usize..500, 0..20),
    ) {
        starts.sort_unstable();
        starts.dedup();
        ends.sort_unstable();
        ends.dedup();
        let report = resolve_regions(RasterFormat::Png, &starts, &ends, 8);
        for pair in report.regions.windows(2) {
            prop_assert!(pair[0].start_offset < pair[1].start_offset);
            prop_assert!(pair[0].span().end <= pair[1].start_offset);
        }
        if starts.is_empty() {
            prop_assert!(report.regions.is_empty());
        }
    }
}

#[test]
fn clean_objects_carve_one_region_each() {
    let mut buffer = vec![0x11; 7];
    for _ in 0..5 {
        buffer.extend_from_slice(JPEG_START);
        buffer.extend_from_slice(&[0x22; 33]);
        buffer.extend_from_slice(JPEG_END);
        buffer.extend_from_slice(&[0x33; 9]);
    }

    let report = Carver::for_format(RasterFormat::Jpeg).carve(&buffer);
    assert!(report.anomalies.is_empty());
    assert_eq!(report.regions.len(), 5);
    for region in &report.regions {
        assert_eq!(region.len(), 39);
        assert!(region.materialize(&buffer).unwrap().starts_with(JPEG_START));
    }
}

#[test]
fn nested_starts_resolve_to_outer_object() {
    let report = resolve_regions(RasterFormat::Jpeg, &[0, 50], &[80, 120], 2);
    assert_eq!(report.regions.len(), 1);
    assert_eq!(report.regions[0].start_offset, 0);
    assert_eq!(report.regions[0].end_offset, 120);
}

#[test]
fn two_kinds_carved_end_to_end() {
    let mut buffer = Vec::new();
    buffer.extend_from_slice(JPEG_START);
    buffer.extend_from_slice(&[0u8; 100]);
    buffer.extend_from_slice(JPEG_END);
    buffer.extend_from_slice(SHORT_PNG_START);
    buffer.extend_from_slice(&[0u8; 50]);
    buffer.extend_from_slice(PNG_END);

    let jpegs = carve(&buffer, &[JPEG_START], JPEG_END, RasterFormat::Jpeg);
    let pngs = carve(&buffer, &[SHORT_PNG_START], PNG_END, RasterFormat::Png);
    let regions = merge([jpegs.regions, pngs.regions]);

    assert_eq!(regions.len(), 2);
    assert_eq!(regions[0].kind, RasterFormat::Jpeg);
    assert_eq!(regions[0].start_offset, 0);
    assert_eq!(regions[0].len(), 106);
    assert_eq!(regions[1].kind, RasterFormat::Png);
    assert_eq!(regions[1].start_offset, 106);
    assert_eq!(regions[1].len(), 62);
    assert_eq!(regions[1].materialize(&buffer).unwrap().len(), 62);
    assert!(regions[1].materialize(&buffer).unwrap().ends_with(PNG_END));
}
