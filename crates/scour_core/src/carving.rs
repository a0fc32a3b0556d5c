//! Marker-only carving of embedded raster objects.
//!
//! There is no length field to trust: a region is delimited by a start signature and a
//! terminator. Same-kind objects may nest (a JPEG carrying a JPEG thumbnail), in which
//! case the outermost object wins. Pairing is an explicit index-pair walk over the two
//! sorted offset lists, bounded by the number of starts.

use std::ops::Range;

use crate::scanners::MarkerScanner;
use crate::types::RasterFormat;

/// A located object. `end_offset` is where its terminator begins.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CandidateRegion {
    pub kind: RasterFormat,
    pub start_offset: usize,
    pub end_offset: usize,
    pub terminator_len: usize,
}

impl CandidateRegion {
    /// Bytes belonging to the object; the terminator is part of it.
    #[must_use]
    pub fn span(&self) -> Range<usize> {
        self.start_offset..self.end_offset + self.terminator_len
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.span().len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    #[must_use]
    pub fn materialize<'a>(&self, buffer: &'a [u8]) -> Option<&'a [u8]> {
        buffer.get(self.span())
    }
}

/// Marker combinations the walk refused to turn into a region as-is.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CarveAnomaly {
    /// A terminator before the first start marker.
    LeadingTerminator { offset: usize },
    /// A start marker left with no terminator to pair with.
    Unterminated { start: usize },
    /// A pairing whose terminator does not follow its start.
    Inverted { start: usize, end: usize },
    /// A pairing overlapping the previous region; merged into it.
    Coalesced { start: usize, end: usize },
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CarveReport {
    pub regions: Vec<CandidateRegion>,
    pub anomalies: Vec<CarveAnomaly>,
}

impl CarveReport {
    fn accept(&mut self, region: CandidateRegion) {
        if region.end_offset <= region.start_offset {
            self.anomalies.push(CarveAnomaly::Inverted {
                start: region.start_offset,
                end: region.end_offset,
            });
            return;
        }

        if let Some(previous) = self.regions.last_mut() {
            if region.start_offset < previous.span().end {
                if region.end_offset > previous.end_offset {
                    previous.end_offset = region.end_offset;
                }
                self.anomalies.push(CarveAnomaly::Coalesced {
                    start: region.start_offset,
                    end: region.end_offset,
                });
                return;
            }
        }

        self.regions.push(region);
    }

    fn absorb(&mut self, other: CarveReport) {
        self.regions = merge([std::mem::take(&mut self.regions), other.regions]);
        self.anomalies.extend(other.anomalies);
    }
}

/// Pairs sorted start and end offsets into regions.
///
/// Regions come out strictly ascending, non-overlapping, and with
/// `end_offset > start_offset`; anything else is reported as an anomaly.
#[must_use]
pub fn resolve_regions(
    kind: RasterFormat,
    starts: &[usize],
    ends: &[usize],
    terminator_len: usize,
) -> CarveReport {
    let mut report = CarveReport::default();
    let Some(&first_start) = starts.first() else {
        return report;
    };

    let leading = ends.iter().take_while(|&&end| end < first_start).count();
    report.anomalies.extend(
        ends[..leading]
            .iter()
            .map(|&offset| CarveAnomaly::LeadingTerminator { offset }),
    );
    let ends = &ends[leading..];

    let mut cursor = 0;
    while cursor < starts.len() {
        let Some(&close) = ends.get(cursor) else {
            report.anomalies.extend(
                starts[cursor..]
                    .iter()
                    .map(|&start| CarveAnomaly::Unterminated { start }),
            );
            break;
        };

        // Another start before this close means an object nested inside the current one.
        let mut end_cursor = cursor;
        while end_cursor + 1 < starts.len() && starts[end_cursor + 1] < close {
            end_cursor += 1;
        }

        let start = starts[cursor];
        match ends.get(end_cursor) {
            Some(&end) => report.accept(CandidateRegion {
                kind,
                start_offset: start,
                end_offset: end,
                terminator_len,
            }),
            None => report.anomalies.push(CarveAnomaly::Unterminated { start }),
        }

        cursor = if end_cursor > cursor {
            end_cursor + 1
        } else {
            cursor + 1
        };
    }

    report
}

/// Carves one object kind out of `buffer`.
#[derive(Debug, Clone)]
pub struct Carver {
    scanner: MarkerScanner,
}

impl Carver {
    #[must_use]
    pub fn new(
        kind: RasterFormat,
        signatures: &[&'static [u8]],
        terminator: &'static [u8],
    ) -> Self {
        Self {
            scanner: MarkerScanner::new(kind, signatures, terminator),
        }
    }

    #[must_use]
    pub fn for_format(kind: RasterFormat) -> Self {
        Self {
            scanner: MarkerScanner::for_format(kind),
        }
    }

    /// The start and end scans are independent read-only passes and run in parallel.
    #[must_use]
    pub fn carve(&self, buffer: &[u8]) -> CarveReport {
        let (starts, ends) = rayon::join(
            || self.scanner.scan_starts(buffer),
            || self.scanner.scan_ends(buffer),
        );
        let report = resolve_regions(
            self.scanner.kind(),
            &starts,
            &ends,
            self.scanner.terminator_len(),
        );

        tracing::debug!(
            kind = %self.scanner.kind(),
            starts = starts.len(),
            ends = ends.len(),
            regions = report.regions.len(),
            anomalies = report.anomalies.len(),
            "carved"
        );
        report
    }
}

/// Carves `buffer` for a single signature set / terminator pair.
#[must_use]
pub fn carve(
    buffer: &[u8],
    signatures: &[&'static [u8]],
    terminator: &'static [u8],
    kind: RasterFormat,
) -> CarveReport {
    Carver::new(kind, signatures, terminator).carve(buffer)
}

/// Carves every supported raster kind and merges the results by start offset.
#[must_use]
pub fn carve_rasters(buffer: &[u8]) -> CarveReport {
    let mut report = CarveReport::default();
    for kind in RasterFormat::ALL {
        report.absorb(Carver::for_format(kind).carve(buffer));
    }
    report
}

/// Stable insertion of per-kind lists into one sequence ascending by `start_offset`.
#[must_use]
pub fn merge<I>(lists: I) -> Vec<CandidateRegion>
where
    I: IntoIterator<Item = Vec<CandidateRegion>>,
{
    let mut merged: Vec<CandidateRegion> = Vec::new();
    for region in lists.into_iter().flatten() {
        let at = merged.partition_point(|r| r.start_offset <= region.start_offset);
        merged.insert(at, region);
    }
    merged
}
