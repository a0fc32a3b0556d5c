//! Legacy binary documents (`.doc`, `.rtf`, `.xls`, `.ppt`).
//!
//! The binary formats are never parsed here. Structure comes from the text an external
//! converter prints, and pictures, which the converters drop, are carved straight out
//! of the source bytes and matched to picture markers in order.

use std::collections::VecDeque;

use crate::carving::carve_rasters;
use crate::config::Limits;
use crate::document::{DocumentBuilder, RawImage};
use crate::error::ContentWarning;
use crate::types::FileType;

/// Placeholder the paragraph converters print where a picture was.
pub const PICTURE_MARKER: &str = "[pic]";
const SHEET_BREAK: char = '\u{c}';
const SHEET_NAME_FENCE: &str = "===";

/// Shape of a converter's standard output.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Dialect {
    /// Blank-line separated blocks; `|`-prefixed blocks are tables.
    Paragraphs,
    /// Comma separated, quoted cells, sheets split by form feeds. A sheet may open
    /// with a `=== name ===` line.
    Csv,
}

impl Dialect {
    #[must_use]
    pub const fn for_type(file_type: FileType) -> Option<Self> {
        match file_type {
            FileType::Doc | FileType::Rtf | FileType::Ppt => Some(Self::Paragraphs),
            FileType::Xls => Some(Self::Csv),
            _ => None,
        }
    }
}

/// Builds a document from converter output `text` and pictures carved from `source`.
pub fn extract(source: &[u8], text: &str, dialect: Dialect, limits: &Limits) -> DocumentBuilder {
    let mut builder = DocumentBuilder::new();

    let report = carve_rasters(source);
    if !report.anomalies.is_empty() {
        builder.warn(ContentWarning::CarveAnomalies(report.anomalies.len()));
    }
    let mut pictures: VecDeque<RawImage> = report
        .regions
        .iter()
        .filter_map(|region| {
            let bytes = region.materialize(source)?;
            Some(RawImage::new(
                bytes.to_vec(),
                format!("{} at offset {:#x}", region.kind, region.start_offset),
            ))
        })
        .collect();

    let text = text.replace("\r\n", "\n");
    let mut emitter = Emitter {
        builder: &mut builder,
        pictures: &mut pictures,
        limits,
        cells_left: limits.max_table_cells,
        markers: 0,
    };
    match dialect {
        Dialect::Paragraphs => emitter.paragraphs(&text),
        Dialect::Csv => emitter.sheets(&text),
    }

    // Carved pictures no marker claimed still belong to the document.
    for picture in pictures {
        builder.image(picture, None);
    }
    builder
}

struct Emitter<'a> {
    builder: &'a mut DocumentBuilder,
    pictures: &'a mut VecDeque<RawImage>,
    limits: &'a Limits,
    cells_left: usize,
    markers: usize,
}

impl Emitter<'_> {
    fn paragraphs(&mut self, text: &str) {
        for block in text.split("\n\n") {
            if block.trim_start().starts_with('|') {
                self.table(block);
                continue;
            }
            // Converters wrap long paragraphs; the wrapping is not content.
            let mut lines: Vec<&str> = Vec::new();
            for line in block.lines().map(str::trim) {
                if line == PICTURE_MARKER {
                    self.flush(&mut lines);
                    self.picture();
                } else if !line.is_empty() {
                    lines.push(line);
                }
            }
            self.flush(&mut lines);
        }
    }

    fn flush(&mut self, lines: &mut Vec<&str>) {
        if !lines.is_empty() {
            self.builder.text(lines.join(" "));
            lines.clear();
        }
    }

    fn picture(&mut self) {
        self.markers += 1;
        self.builder.declare_image_slot();
        match self.pictures.pop_front() {
            Some(picture) => {
                self.builder.image(picture, None);
            }
            None => self
                .builder
                .warn(ContentWarning::MissingImage(format!("picture {}", self.markers))),
        }
    }

    /// `|a |b |` lines. Pictures in cells are placed after the table.
    fn table(&mut self, block: &str) {
        let mut anchored = 0usize;
        let mut rows = Vec::new();
        for line in block.lines().map(str::trim).filter(|l| l.starts_with('|')) {
            let inner = line.strip_prefix('|').unwrap_or(line);
            let inner = inner.strip_suffix('|').unwrap_or(inner);
            let row: Vec<String> = inner
                .split('|')
                .map(str::trim)
                .map(|cell| {
                    if cell == PICTURE_MARKER {
                        anchored += 1;
                        String::new()
                    } else {
                        cell.to_string()
                    }
                })
                .collect();
            rows.push(row);
        }
        let rows = self.cap(rows);
        self.builder.table(rows);
        for _ in 0..anchored {
            self.picture();
        }
    }

    fn sheets(&mut self, text: &str) {
        let mut index = 0;
        for sheet in text.split(SHEET_BREAK) {
            let (name, body) = sheet_header(sheet);
            let mut rows = parse_csv(body);
            while rows.last().is_some_and(|row| row.iter().all(String::is_empty)) {
                rows.pop();
            }
            if rows.is_empty() && name.is_none() {
                continue;
            }
            index += 1;
            let name = name.unwrap_or_else(|| format!("Sheet{index}"));
            self.builder.section(Some(name));
            let rows = self.cap(rows);
            self.builder.table(rows);
        }
    }

    /// Applies the column and cell ceilings.
    fn cap(&mut self, mut rows: Vec<Vec<String>>) -> Vec<Vec<String>> {
        let mut truncated = false;
        for row in &mut rows {
            if row.len() > self.limits.max_repeat {
                row.truncate(self.limits.max_repeat);
                truncated = true;
            }
        }
        let mut kept = 0;
        for row in &rows {
            if row.len() > self.cells_left {
                truncated = true;
                break;
            }
            self.cells_left -= row.len();
            kept += 1;
        }
        rows.truncate(kept);
        if truncated {
            self.builder.warn(ContentWarning::Truncated {
                what: "converter table".into(),
                limit: self.limits.max_table_cells.min(self.limits.max_repeat),
            });
        }
        rows
    }
}

/// Splits off a `=== name ===` line some converters print before each sheet.
fn sheet_header(sheet: &str) -> (Option<String>, &str) {
    let sheet = sheet.trim_start_matches(['\r', '\n']);
    let (first, rest) = sheet.split_once('\n').unwrap_or((sheet, ""));
    let name = first
        .trim()
        .strip_prefix(SHEET_NAME_FENCE)
        .and_then(|n| n.strip_suffix(SHEET_NAME_FENCE))
        .map(str::trim)
        .filter(|n| !n.is_empty());
    match name {
        Some(name) => (Some(name.to_string()), rest),
        None => (None, sheet),
    }
}

/// Rows of comma separated cells. Quoted cells may hold commas, doubled quotes and
/// line breaks.
fn parse_csv(text: &str) -> Vec<Vec<String>> {
    let mut rows = Vec::new();
    let mut row = Vec::new();
    let mut field = String::new();
    let mut quoted = false;
    let mut chars = text.chars().peekable();
    while let Some(c) = chars.next() {
        if quoted {
            match c {
                '"' if chars.peek() == Some(&'"') => {
                    field.push('"');
                    chars.next();
                }
                '"' => quoted = false,
                other => field.push(other),
            }
            continue;
        }
        match c {
            '"' => quoted = true,
            ',' => row.push(std::mem::take(&mut field)),
            '\n' => {
                row.push(std::mem::take(&mut field));
                rows.push(std::mem::take(&mut row));
            }
            '\r' => {}
            other => field.push(other),
        }
    }
    if !field.is_empty() || !row.is_empty() {
        row.push(field);
        rows.push(row);
    }
    rows
}
