use crate::types::RasterFormat;
use memchr::memmem::Finder;

/// Locates start and end markers of one embedded object kind.
///
/// Start markers may be a set (JPEG has one per accepted application segment); the
/// terminator is a single sequence.
#[derive(Debug, Clone)]
pub struct MarkerScanner {
    start_finders: Vec<Finder<'static>>,
    end_finder: Finder<'static>,
    terminator_len: usize,
    kind: RasterFormat,
}

impl MarkerScanner {
    /// # Panics
    ///
    /// Panics if `terminator` is empty or any signature is empty.
    #[must_use]
    pub fn new(
        kind: RasterFormat,
        signatures: &[&'static [u8]],
        terminator: &'static [u8],
    ) -> Self {
        assert!(!terminator.is_empty(), "terminator must not be empty");
        assert!(
            signatures.iter().all(|s| !s.is_empty()),
            "signatures must not be empty"
        );
        Self {
            start_finders: signatures.iter().map(|s| Finder::new(*s)).collect(),
            end_finder: Finder::new(terminator),
            terminator_len: terminator.len(),
            kind,
        }
    }

    #[must_use]
    pub fn for_format(kind: RasterFormat) -> Self {
        Self::new(kind, kind.signatures(), kind.terminator())
    }

    #[inline]
    #[must_use]
    pub fn kind(&self) -> RasterFormat {
        self.kind
    }

    #[inline]
    #[must_use]
    pub fn terminator_len(&self) -> usize {
        self.terminator_len
    }

    /// Every offset where any start signature begins, ascending and deduplicated.
    #[must_use]
    pub fn scan_starts(&self, buffer: &[u8]) -> Vec<usize> {
        let mut offsets: Vec<usize> = self
            .start_finders
            .iter()
            .flat_map(|finder| finder.find_iter(buffer))
            .collect();
        if self.start_finders.len() > 1 {
            offsets.sort_unstable();
            offsets.dedup();
        }
        offsets
    }

    /// Every offset where the terminator begins, ascending.
    #[must_use]
    pub fn scan_ends(&self, buffer: &[u8]) -> Vec<usize> {
        self.end_finder.find_iter(buffer).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pixels::test_png;

    const SOI_EXIF: [u8; 4] = [0xFF, 0xD8, 0xFF, 0xE1];
    const SOI_JFIF: [u8; 4] = [0xFF, 0xD8, 0xFF, 0xE0];
    const EOI: [u8; 2] = [0xFF, 0xD9];

    /// Concatenates `parts` and returns the offset each part landed at.
    fn stream(parts: &[&[u8]]) -> (Vec<u8>, Vec<usize>) {
        let mut buffer = Vec::new();
        let mut offsets = Vec::new();
        for part in parts {
            offsets.push(buffer.len());
            buffer.extend_from_slice(part);
        }
        (buffer, offsets)
    }

    #[test]
    fn pictures_embedded_in_a_binary_stream() {
        let small = test_png(3, 2);
        let large = test_png(9, 7);
        let (buffer, at) = stream(&[
            &b"WordDocument\0\0"[..],
            &small[..],
            &b"\x01\x02 filler"[..],
            &large[..],
            &b"tail"[..],
        ]);
        let scanner = MarkerScanner::for_format(RasterFormat::Png);

        assert_eq!(scanner.scan_starts(&buffer), vec![at[1], at[3]]);
        assert_eq!(
            scanner.scan_ends(&buffer),
            vec![at[1] + small.len() - 8, at[3] + large.len() - 8]
        );
        assert_eq!(scanner.terminator_len(), 8);
    }

    #[test]
    fn exif_thumbnail_nests_inside_its_photo() {
        // An APP1 segment carrying a complete thumbnail, then the photo's own data.
        let app1_payload: Vec<u8> =
            [&b"\x00\x20Exif\x00\x00"[..], &SOI_JFIF[..], &[0x12, 0x34][..], &EOI[..]].concat();
        let (buffer, at) = stream(&[
            &[0x00, 0x00][..],
            &SOI_EXIF[..],
            &app1_payload[..],
            &[0x56, 0x78, 0x9A][..],
            &EOI[..],
        ]);
        let scanner = MarkerScanner::for_format(RasterFormat::Jpeg);

        let thumbnail = at[2] + 8;
        assert_eq!(scanner.scan_starts(&buffer), vec![at[1], thumbnail]);
        assert_eq!(scanner.scan_ends(&buffer), vec![thumbnail + 6, at[4]]);
    }

    #[test]
    fn every_accepted_jpeg_segment_starts_an_object() {
        let scanner = MarkerScanner::for_format(RasterFormat::Jpeg);
        for fourth in [0xE0, 0xE1, 0xDB, 0xEE] {
            let buffer = [0x00, 0xFF, 0xD8, 0xFF, fourth, 0x00];
            assert_eq!(scanner.scan_starts(&buffer), vec![1], "marker {fourth:#04X}");
        }
        // SOF0 straight after SOI is not a layout the sniffer accepts either.
        assert!(scanner.scan_starts(&[0xFF, 0xD8, 0xFF, 0xC0]).is_empty());
    }

    #[test]
    fn truncated_markers_at_the_buffer_edge() {
        let png = test_png(2, 2);
        let scanner = MarkerScanner::for_format(RasterFormat::Png);
        assert!(scanner.scan_starts(&png[..6]).is_empty());
        assert!(scanner.scan_ends(&png[..png.len() - 1]).is_empty());
        assert!(scanner.scan_starts(&[]).is_empty());
    }

    #[test]
    fn scanners_are_send_sync() {
        fn assert_send_sync<T: Send + Sync>() {}
        assert_send_sync::<MarkerScanner>();
    }
}
