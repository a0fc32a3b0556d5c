//! SpreadsheetML (`.xlsx`, `.xlsm`). Only cell values survive: cached results replace
//! formulas, and everything outside `sheetData` is dropped.

use std::collections::HashSet;

use quick_xml::events::Event;

use crate::config::Limits;
use crate::document::{Block, BlockKind, DocumentBuilder, IntermediateDocument, Layout};
use crate::error::{ContentWarning, ExtractionFailure, RebuildFailure};
use crate::formats::{OFFICE_REL, XML_DECLARATION, content_types, main_part, relationships, warn_macros};
use crate::package::{PackageReader, PackageWriter};
use crate::pipeline::Rebuilt;
use crate::xml::{XmlReader, attr, escape, local_str, prefixed_attr};

const MAIN_FALLBACK: &str = "xl/workbook.xml";
const MACROS: &str = "xl/vbaProject.bin";
const SML_NS: &str = "http://schemas.openxmlformats.org/spreadsheetml/2006/main";
const WORKBOOK_CT: &str = "application/vnd.openxmlformats-officedocument.spreadsheetml.sheet.main+xml";
const WORKSHEET_CT: &str = "application/vnd.openxmlformats-officedocument.spreadsheetml.worksheet+xml";
const MAX_SHEET_NAME: usize = 31;

pub fn extract(
    package: &mut PackageReader,
    limits: &Limits,
) -> Result<DocumentBuilder, ExtractionFailure> {
    let workbook_part = main_part(package, MAIN_FALLBACK)?;
    let workbook = package.read_string(&workbook_part)?;
    let rels = package.relationships(&workbook_part)?;

    let mut builder = DocumentBuilder::new();
    warn_macros(package, &mut builder, MACROS);

    let shared = match rels.first_of_kind("sharedStrings") {
        Some(rel) => {
            let target = rel.target.clone();
            let xml = package.read_string(&target)?;
            shared_strings(&xml, &target)?
        }
        None => Vec::new(),
    };

    let mut cells_left = limits.max_table_cells;
    for (name, rel_id) in sheet_list(&workbook, &workbook_part)? {
        builder.section(Some(name.clone()));
        let Some(target) = rels.target(&rel_id).map(str::to_string) else {
            tracing::warn!(sheet = %name, "sheet relationship does not resolve");
            continue;
        };
        let xml = package.read_string(&target)?;
        let mut sheet = SheetParser {
            xml: XmlReader::new(&xml, &target),
            shared: &shared,
            limits,
            cells_left: &mut cells_left,
            builder: &mut builder,
        };
        let rows = sheet.parse()?;
        builder.table(rows);
    }
    Ok(builder)
}

/// `(name, relationship id)` of every sheet, in workbook order.
fn sheet_list(xml: &str, part: &str) -> Result<Vec<(String, String)>, ExtractionFailure> {
    let mut reader = XmlReader::new(xml, part);
    let mut sheets = Vec::new();
    while let Some(sheet) = reader.find(b"sheet")? {
        if let Some(rel_id) = prefixed_attr(&sheet, b"id") {
            let name = attr(&sheet, b"name").unwrap_or_else(|| format!("Sheet{}", sheets.len() + 1));
            sheets.push((name, rel_id));
        }
    }
    Ok(sheets)
}

fn shared_strings(xml: &str, part: &str) -> Result<Vec<String>, ExtractionFailure> {
    let mut reader = XmlReader::new(xml, part);
    let mut strings = Vec::new();
    while reader.find(b"si")?.is_some() {
        strings.push(rich_text(&mut reader)?);
    }
    Ok(strings)
}

/// Text of an `si` or `is` element: its `t` runs, phonetic hints excluded.
fn rich_text(reader: &mut XmlReader<'_>) -> Result<String, ExtractionFailure> {
    let mut text = String::new();
    let mut depth = 0usize;
    loop {
        match reader.next()? {
            Event::Start(e) => match e.local_name().as_ref() {
                b"t" => text.push_str(&reader.text()?),
                b"rPh" | b"rPr" => reader.skip()?,
                _ => depth += 1,
            },
            Event::End(_) if depth == 0 => return Ok(text),
            Event::End(_) => depth -= 1,
            Event::Eof => return Err(reader.eof()),
            _ => {}
        }
    }
}

struct SheetParser<'a, 'b> {
    xml: XmlReader<'a>,
    shared: &'b [String],
    limits: &'b Limits,
    cells_left: &'b mut usize,
    builder: &'b mut DocumentBuilder,
}

impl SheetParser<'_, '_> {
    fn parse(&mut self) -> Result<Vec<Vec<String>>, ExtractionFailure> {
        let mut rows = Vec::new();
        loop {
            match self.xml.next()? {
                Event::Start(e) => match e.local_name().as_ref() {
                    b"row" => {
                        // `r` is one-based; gaps before a populated row stay as empty rows.
                        let index = attr(&e, b"r")
                            .and_then(|r| r.trim().parse::<usize>().ok())
                            .and_then(|r| r.checked_sub(1))
                            .unwrap_or(rows.len());
                        let row = self.row()?;
                        if row.iter().all(String::is_empty) {
                            continue;
                        }
                        if index >= self.limits.max_repeat {
                            self.builder.warn(ContentWarning::Truncated {
                                what: format!("sheet {}", self.xml.part()),
                                limit: self.limits.max_repeat,
                            });
                            continue;
                        }
                        if index > rows.len() {
                            rows.resize(index, Vec::new());
                        }
                        rows.push(row);
                    }
                    b"drawing" | b"legacyDrawing" | b"oleObjects" | b"controls" | b"picture" => {
                        self.builder.warn(ContentWarning::UnrecognizedElement {
                            part: self.xml.part().to_string(),
                            element: local_str(&e),
                        });
                        self.xml.skip()?;
                    }
                    _ => {}
                },
                Event::Eof => return Ok(rows),
                _ => {}
            }
        }
    }

    fn row(&mut self) -> Result<Vec<String>, ExtractionFailure> {
        let mut row: Vec<String> = Vec::new();
        let mut depth = 0usize;
        loop {
            match self.xml.next()? {
                Event::Start(e) if e.local_name().as_ref() == b"c" => {
                    let column = attr(&e, b"r")
                        .and_then(|r| parse_reference(&r))
                        .map_or(row.len(), |(column, _)| column);
                    let kind = attr(&e, b"t").unwrap_or_default();
                    let value = self.cell(&kind)?;
                    if value.is_empty() {
                        continue;
                    }
                    if column >= self.limits.max_repeat || *self.cells_left == 0 {
                        self.builder.warn(ContentWarning::Truncated {
                            what: format!("sheet {}", self.xml.part()),
                            limit: self.limits.max_repeat.min(self.limits.max_table_cells),
                        });
                        continue;
                    }
                    if row.len() <= column {
                        row.resize(column + 1, String::new());
                    }
                    row[column] = value;
                    *self.cells_left -= 1;
                }
                Event::Start(_) => depth += 1,
                Event::End(_) if depth == 0 => return Ok(row),
                Event::End(_) => depth -= 1,
                Event::Eof => return Err(self.xml.eof()),
                _ => {}
            }
        }
    }

    fn cell(&mut self, kind: &str) -> Result<String, ExtractionFailure> {
        let mut value = String::new();
        let mut depth = 0usize;
        loop {
            match self.xml.next()? {
                Event::Start(e) => match e.local_name().as_ref() {
                    b"v" => value = self.xml.text()?,
                    b"is" => value = rich_text(&mut self.xml)?,
                    b"f" | b"extLst" => self.xml.skip()?,
                    _ => depth += 1,
                },
                Event::End(_) if depth == 0 => break,
                Event::End(_) => depth -= 1,
                Event::Eof => return Err(self.xml.eof()),
                _ => {}
            }
        }
        Ok(match kind {
            "s" => value
                .trim()
                .parse::<usize>()
                .ok()
                .and_then(|i| self.shared.get(i).cloned())
                .unwrap_or_default(),
            "b" => match value.trim() {
                "1" => "TRUE".into(),
                "0" => "FALSE".into(),
                _ => String::new(),
            },
            _ => value,
        })
    }
}

/// `"BC12"` -> zero-based column 54, row 12.
fn parse_reference(reference: &str) -> Option<(usize, usize)> {
    let split = reference.find(|c: char| c.is_ascii_digit())?;
    let (letters, digits) = reference.split_at(split);
    if letters.is_empty() || letters.len() > 3 {
        return None;
    }
    let mut column = 0usize;
    for c in letters.chars() {
        if !c.is_ascii_uppercase() {
            return None;
        }
        column = column * 26 + (c as usize - 'A' as usize + 1);
    }
    Some((column - 1, digits.parse().ok()?))
}

fn column_name(mut index: usize) -> String {
    let mut name = Vec::new();
    loop {
        name.push(b'A' + (index % 26) as u8);
        if index < 26 {
            break;
        }
        index = index / 26 - 1;
    }
    name.reverse();
    String::from_utf8_lossy(&name).into_owned()
}

/// Plain decimal numbers become numeric cells. Leading zeros and signs stay text.
pub(crate) fn is_numeric(value: &str) -> bool {
    let digits = value.strip_prefix('-').unwrap_or(value);
    if digits.is_empty() || value.trim() != value {
        return false;
    }
    if digits.len() > 1 && digits.starts_with('0') && !digits.starts_with("0.") {
        return false;
    }
    digits.chars().all(|c| c.is_ascii_digit() || c == '.')
        && digits.chars().filter(|&c| c == '.').count() <= 1
        && value.parse::<f64>().is_ok_and(f64::is_finite)
}

pub(crate) fn sheet_name(title: Option<&str>, index: usize, used: &mut HashSet<String>) -> String {
    let base: String = title
        .unwrap_or_default()
        .chars()
        .filter(|c| !matches!(c, '[' | ']' | ':' | '*' | '?' | '/' | '\\'))
        .take(MAX_SHEET_NAME)
        .collect();
    let base = match base.trim() {
        "" => format!("Sheet{}", index + 1),
        trimmed => trimmed.to_string(),
    };

    let mut name = base.clone();
    let mut n = 2;
    while used.contains(&name.to_lowercase()) {
        let suffix = format!(" ({n})");
        let keep = MAX_SHEET_NAME.saturating_sub(suffix.len());
        name = format!("{}{suffix}", base.chars().take(keep).collect::<String>());
        n += 1;
    }
    used.insert(name.to_lowercase());
    name
}

/// Writes a new `.xlsx`; text cells are inline strings.
pub fn write(layout: &Layout, document: &IntermediateDocument) -> Result<Rebuilt, RebuildFailure> {
    let mut warnings = Vec::new();
    let mut used = HashSet::new();
    let mut sheets = Vec::new();

    for (index, (title, range)) in layout.section_ranges(document.blocks.len()).into_iter().enumerate() {
        if title.is_none() && range.is_empty() && !layout.sections.is_empty() {
            continue;
        }
        let mut rows: Vec<Vec<String>> = Vec::new();
        for block in &document.blocks[range] {
            match block {
                Block::Table(table) => rows.extend(table.rows.iter().cloned()),
                Block::Text(text) => rows.push(vec![text.clone()]),
                Block::List(items) => rows.extend(items.iter().map(|i| vec![i.clone()])),
                Block::Image(_) => {
                    let warning = ContentWarning::Unrepresentable {
                        kind: BlockKind::Image,
                        target: "xlsx",
                    };
                    if !warnings.contains(&warning) {
                        warnings.push(warning);
                    }
                }
            }
        }
        sheets.push((sheet_name(title, index, &mut used), worksheet(&rows)));
    }
    if sheets.is_empty() {
        sheets.push((sheet_name(None, 0, &mut used), worksheet(&[])));
    }

    let mut workbook = format!(
        "{XML_DECLARATION}<workbook xmlns=\"{SML_NS}\" xmlns:r=\"{OFFICE_REL}\"><sheets>"
    );
    let mut rels = Vec::new();
    let mut overrides = vec![("/xl/workbook.xml".to_string(), WORKBOOK_CT)];
    for (i, (name, _)) in sheets.iter().enumerate() {
        let n = i + 1;
        workbook.push_str(&format!(
            "<sheet name=\"{}\" sheetId=\"{n}\" r:id=\"rId{n}\"/>",
            escape(name)
        ));
        rels.push((format!("rId{n}"), "worksheet", format!("worksheets/sheet{n}.xml")));
        overrides.push((format!("/xl/worksheets/sheet{n}.xml"), WORKSHEET_CT));
    }
    workbook.push_str("</sheets></workbook>");

    let overrides: Vec<(&str, &str)> = overrides.iter().map(|(p, c)| (p.as_str(), *c)).collect();
    let mut package = PackageWriter::new();
    package.deflated("[Content_Types].xml", content_types(&overrides).as_bytes())?;
    package.deflated(
        "_rels/.rels",
        relationships(&[("rId1".into(), "officeDocument", "xl/workbook.xml".into())]).as_bytes(),
    )?;
    package.deflated("xl/workbook.xml", workbook.as_bytes())?;
    package.deflated("xl/_rels/workbook.xml.rels", relationships(&rels).as_bytes())?;
    for (i, (_, xml)) in sheets.iter().enumerate() {
        package.deflated(&format!("xl/worksheets/sheet{}.xml", i + 1), xml.as_bytes())?;
    }

    Ok(Rebuilt {
        bytes: package.finish()?,
        warnings,
    })
}

fn worksheet(rows: &[Vec<String>]) -> String {
    let mut xml = format!("{XML_DECLARATION}<worksheet xmlns=\"{SML_NS}\"><sheetData>");
    for (r, row) in rows.iter().enumerate() {
        let row_number = r + 1;
        xml.push_str(&format!("<row r=\"{row_number}\">"));
        for (c, value) in row.iter().enumerate() {
            if value.is_empty() {
                continue;
            }
            let reference = format!("{}{row_number}", column_name(c));
            if is_numeric(value) {
                xml.push_str(&format!("<c r=\"{reference}\"><v>{value}</v></c>"));
            } else {
                xml.push_str(&format!(
                    "<c r=\"{reference}\" t=\"inlineStr\"><is><t xml:space=\"preserve\">{}</t></is></c>",
                    escape(value)
                ));
            }
        }
        xml.push_str("</row>");
    }
    xml.push_str("</sheetData></worksheet>");
    xml
}
