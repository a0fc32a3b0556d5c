//! OpenDocument packages (`.odt`, `.ott`, `.ods`, `.odp`).
//!
//! Reading walks the body of `content.xml`; styles, settings, scripts and embedded
//! objects are never looked at. Writing produces a fresh package with a minimal style
//! sheet. Presentations rebuilt from PresentationML and legacy slide decks are written
//! here as well.

use std::collections::{HashMap, HashSet};

use quick_xml::events::{BytesStart, Event};

use crate::config::Limits;
use crate::document::{Block, BlockKind, DocumentBuilder, Extent, ImageId, ImageRef, IntermediateDocument, Layout, Table};
use crate::error::{ContentWarning, ExtractionFailure, RebuildFailure};
use crate::formats::sheet::{is_numeric, sheet_name};
use crate::formats::{XML_DECLARATION, media_name, quarantine_part};
use crate::package::{PackageReader, PackageWriter, resolve_part};
use crate::pipeline::Rebuilt;
use crate::types::FileType;
use crate::xml::{XmlReader, attr, escape, local_str};

const CONTENT: &str = "content.xml";
const MACRO_DIRS: [&str; 2] = ["Basic/", "Scripts/"];
const MAX_FRAME_NESTING: usize = 16;

const NAMESPACES: &str = concat!(
    "xmlns:office=\"urn:oasis:names:tc:opendocument:xmlns:office:1.0\" ",
    "xmlns:style=\"urn:oasis:names:tc:opendocument:xmlns:style:1.0\" ",
    "xmlns:text=\"urn:oasis:names:tc:opendocument:xmlns:text:1.0\" ",
    "xmlns:table=\"urn:oasis:names:tc:opendocument:xmlns:table:1.0\" ",
    "xmlns:draw=\"urn:oasis:names:tc:opendocument:xmlns:drawing:1.0\" ",
    "xmlns:fo=\"urn:oasis:names:tc:opendocument:xmlns:xsl-fo-compatible:1.0\" ",
    "xmlns:xlink=\"http://www.w3.org/1999/xlink\" ",
    "xmlns:svg=\"urn:oasis:names:tc:opendocument:xmlns:svg-compatible:1.0\" ",
    "xmlns:presentation=\"urn:oasis:names:tc:opendocument:xmlns:presentation:1.0\"",
);
const MANIFEST_NS: &str = "urn:oasis:names:tc:opendocument:xmlns:manifest:1.0";

// Presentation page geometry, centimetres.
const SLIDE_WIDTH: f64 = 28.0;
const SLIDE_HEIGHT: f64 = 15.75;
const SLIDE_MARGIN: f64 = 1.0;
const TITLE_HEIGHT: f64 = 2.0;
const LINE_HEIGHT: f64 = 0.8;
const FRAME_GAP: f64 = 0.3;

/// Which OpenDocument body a package carries, or is written with.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OdfKind {
    Text,
    Spreadsheet,
    Presentation,
}

impl OdfKind {
    /// Output kind for a source type. Slide decks of every origin become presentations.
    #[must_use]
    pub const fn for_type(file_type: FileType) -> Option<Self> {
        match file_type {
            FileType::Odt | FileType::Ott => Some(Self::Text),
            FileType::Ods => Some(Self::Spreadsheet),
            FileType::Odp | FileType::Pptx | FileType::Pptm | FileType::Ppt => Some(Self::Presentation),
            _ => None,
        }
    }

    #[must_use]
    pub const fn extension(&self) -> &'static str {
        match self {
            Self::Text => "odt",
            Self::Spreadsheet => "ods",
            Self::Presentation => "odp",
        }
    }

    #[must_use]
    pub const fn mimetype(&self) -> &'static str {
        match self {
            Self::Text => "application/vnd.oasis.opendocument.text",
            Self::Spreadsheet => "application/vnd.oasis.opendocument.spreadsheet",
            Self::Presentation => "application/vnd.oasis.opendocument.presentation",
        }
    }

    const fn body(&self) -> &'static str {
        match self {
            Self::Text => "text",
            Self::Spreadsheet => "spreadsheet",
            Self::Presentation => "presentation",
        }
    }
}

#[derive(Debug, PartialEq)]
enum Item {
    Text(String),
    List(Vec<String>),
    Table(Vec<Vec<String>>),
    Picture { href: String, extent: Option<Extent> },
}

#[derive(Debug, Default)]
struct Page {
    title: Option<String>,
    items: Vec<Item>,
}

pub fn extract(
    package: &mut PackageReader,
    limits: &Limits,
) -> Result<DocumentBuilder, ExtractionFailure> {
    let content = package.read_string(CONTENT)?;
    let mut builder = DocumentBuilder::new();
    for dir in MACRO_DIRS {
        if !package.names_under(dir).is_empty() {
            tracing::info!(dir, "discarding macro library");
            builder.warn(ContentWarning::MacrosDiscarded(dir.to_string()));
        }
    }

    let mut parser = ContentParser {
        xml: XmlReader::new(&content, CONTENT),
        builder: &mut builder,
        limits,
        cells_left: limits.max_table_cells,
        title: None,
    };
    let (sectioned, pages) = parser.parse()?;

    for page in pages {
        if sectioned {
            builder.section(page.title);
        }
        for item in page.items {
            match item {
                Item::Text(text) => builder.text(text),
                Item::List(entries) => builder.list(entries),
                Item::Table(rows) => builder.table(rows),
                Item::Picture { href, extent } => {
                    builder.declare_image_slot();
                    match picture_part(&href) {
                        Some(part) => quarantine_part(package, &mut builder, part, extent)?,
                        None => builder.warn(ContentWarning::MissingImage(href)),
                    }
                }
            }
        }
    }
    Ok(builder)
}

/// Package part behind an `xlink:href`. Links to anything outside the package are
/// never followed.
fn picture_part(href: &str) -> Option<String> {
    let scheme = href.find(':').is_some_and(|colon| !href[..colon].contains('/'));
    if scheme {
        return None;
    }
    resolve_part("", href)
}

struct ContentParser<'a, 'b> {
    xml: XmlReader<'a>,
    builder: &'b mut DocumentBuilder,
    limits: &'b Limits,
    cells_left: usize,
    /// Text of the first title frame on the current presentation page.
    title: Option<String>,
}

impl ContentParser<'_, '_> {
    /// Returns whether the body is split into sheets or pages, and its content.
    fn parse(&mut self) -> Result<(bool, Vec<Page>), ExtractionFailure> {
        if self.xml.find(b"body")?.is_none() {
            return Err(ExtractionFailure::Malformed(format!("{CONTENT} has no office:body")));
        }
        loop {
            match self.xml.next()? {
                Event::Start(e) => {
                    return match e.local_name().as_ref() {
                        b"text" => {
                            let mut page = Page::default();
                            self.flow(&mut page.items, 0)?;
                            Ok((false, vec![page]))
                        }
                        b"spreadsheet" => Ok((true, self.spreadsheet()?)),
                        b"presentation" | b"drawing" => Ok((true, self.presentation()?)),
                        _ => Err(ExtractionFailure::Malformed(format!(
                            "unsupported document body <{}>",
                            local_str(&e)
                        ))),
                    };
                }
                Event::End(_) | Event::Eof => {
                    return Err(ExtractionFailure::Malformed(format!("{CONTENT} has an empty body")));
                }
                _ => {}
            }
        }
    }

    fn unrecognized(&mut self, element: &BytesStart<'_>) -> Result<(), ExtractionFailure> {
        self.builder.warn(ContentWarning::UnrecognizedElement {
            part: self.xml.part().to_string(),
            element: local_str(element),
        });
        self.xml.skip()
    }

    fn truncated(&mut self, what: &str, limit: usize) {
        self.builder.warn(ContentWarning::Truncated {
            what: format!("{what} in {CONTENT}"),
            limit,
        });
    }

    fn spreadsheet(&mut self) -> Result<Vec<Page>, ExtractionFailure> {
        let mut pages = Vec::new();
        loop {
            match self.xml.next()? {
                Event::Start(e) => match e.local_name().as_ref() {
                    b"table" => {
                        let mut page = Page {
                            title: attr(&e, b"name"),
                            items: Vec::new(),
                        };
                        self.table(&mut page.items, 0)?;
                        pages.push(page);
                    }
                    b"calculation-settings" | b"content-validations" | b"label-ranges"
                    | b"named-expressions" | b"database-ranges" | b"data-pilot-tables"
                    | b"consolidation" | b"dde-links" | b"tracked-changes" | b"forms"
                    | b"sequence-decls" | b"variable-decls" => self.xml.skip()?,
                    _ => self.unrecognized(&e)?,
                },
                Event::End(_) => return Ok(pages),
                Event::Eof => return Err(self.xml.eof()),
                _ => {}
            }
        }
    }

    fn presentation(&mut self) -> Result<Vec<Page>, ExtractionFailure> {
        let mut pages = Vec::new();
        loop {
            match self.xml.next()? {
                Event::Start(e) => match e.local_name().as_ref() {
                    b"page" => {
                        let name = attr(&e, b"name");
                        let mut page = Page::default();
                        self.title = None;
                        self.flow(&mut page.items, 0)?;
                        page.title = self.title.take().or(name);
                        pages.push(page);
                    }
                    b"settings" | b"header-decl" | b"footer-decl" | b"date-time-decl" | b"forms" => {
                        self.xml.skip()?;
                    }
                    _ => self.unrecognized(&e)?,
                },
                Event::End(_) => return Ok(pages),
                Event::Eof => return Err(self.xml.eof()),
                _ => {}
            }
        }
    }

    /// Block-level children of a text body, section, text box or page.
    fn flow(&mut self, items: &mut Vec<Item>, level: usize) -> Result<(), ExtractionFailure> {
        let mut depth = 0usize;
        loop {
            match self.xml.next()? {
                Event::Start(e) => match e.local_name().as_ref() {
                    b"p" | b"h" => self.paragraph(items, level)?,
                    b"list" => self.list(items, level)?,
                    b"table" => self.table(items, level)?,
                    b"frame" => self.frame(&e, items, level)?,
                    b"section" | b"custom-shape" | b"g" | b"table-of-content" | b"index-body"
                    | b"index-title" | b"illustration-index" | b"alphabetical-index"
                    | b"bibliography" => depth += 1,
                    b"sequence-decls" | b"variable-decls" | b"user-field-decls" | b"forms"
                    | b"tracked-changes" | b"soft-page-break" | b"bookmark" | b"bookmark-start"
                    | b"bookmark-end" | b"enhanced-geometry" | b"notes" | b"title" | b"desc"
                    | b"table-of-content-source" | b"illustration-index-source"
                    | b"alphabetical-index-source" | b"bibliography-source" | b"par" | b"seq" => {
                        self.xml.skip()?;
                    }
                    _ => self.unrecognized(&e)?,
                },
                Event::End(_) if depth == 0 => return Ok(()),
                Event::End(_) => depth -= 1,
                Event::Eof => return Err(self.xml.eof()),
                _ => {}
            }
        }
    }

    fn paragraph(&mut self, items: &mut Vec<Item>, level: usize) -> Result<(), ExtractionFailure> {
        let mut text = String::new();
        let mut anchored = Vec::new();
        self.inline(&mut text, &mut anchored, level)?;
        items.push(Item::Text(text));
        items.append(&mut anchored);
        Ok(())
    }

    /// Character content of a paragraph. Frames anchored inside it land in `anchored`.
    fn inline(
        &mut self,
        text: &mut String,
        anchored: &mut Vec<Item>,
        level: usize,
    ) -> Result<(), ExtractionFailure> {
        // Leading whitespace of a paragraph is not content.
        let mut after_space = true;
        let mut depth = 0usize;
        loop {
            match self.xml.next()? {
                Event::Text(t) => {
                    for c in self.xml.unescape(&t)?.chars() {
                        if matches!(c, ' ' | '\t' | '\n' | '\r') {
                            if !after_space {
                                text.push(' ');
                            }
                            after_space = true;
                        } else {
                            text.push(c);
                            after_space = false;
                        }
                    }
                }
                Event::Start(e) => match e.local_name().as_ref() {
                    b"s" => {
                        let count = attr(&e, b"c").and_then(|c| c.parse::<usize>().ok()).unwrap_or(1);
                        text.extend(std::iter::repeat_n(' ', count.min(self.limits.max_repeat)));
                        after_space = false;
                        self.xml.skip()?;
                    }
                    b"tab" => {
                        text.push('\t');
                        after_space = false;
                        self.xml.skip()?;
                    }
                    b"line-break" => {
                        text.push('\n');
                        after_space = false;
                        self.xml.skip()?;
                    }
                    b"frame" => self.frame(&e, anchored, level)?,
                    b"note" | b"annotation" | b"soft-page-break" => self.xml.skip()?,
                    _ => depth += 1,
                },
                Event::End(_) if depth == 0 => return Ok(()),
                Event::End(_) => depth -= 1,
                Event::Eof => return Err(self.xml.eof()),
                _ => {}
            }
        }
    }

    /// A list, nested lists flattened into one.
    fn list(&mut self, items: &mut Vec<Item>, level: usize) -> Result<(), ExtractionFailure> {
        let mut entries = Vec::new();
        let mut anchored = Vec::new();
        let mut depth = 0usize;
        loop {
            match self.xml.next()? {
                Event::Start(e) => match e.local_name().as_ref() {
                    b"p" | b"h" => {
                        let mut text = String::new();
                        self.inline(&mut text, &mut anchored, level)?;
                        entries.push(text);
                    }
                    b"list" | b"list-item" | b"list-header" => depth += 1,
                    b"number" | b"soft-page-break" => self.xml.skip()?,
                    _ => self.unrecognized(&e)?,
                },
                Event::End(_) if depth == 0 => break,
                Event::End(_) => depth -= 1,
                Event::Eof => return Err(self.xml.eof()),
                _ => {}
            }
        }
        items.push(Item::List(entries));
        items.append(&mut anchored);
        Ok(())
    }

    /// A table. Pictures anchored in its cells follow it.
    fn table(&mut self, items: &mut Vec<Item>, level: usize) -> Result<(), ExtractionFailure> {
        let mut rows: Vec<Vec<String>> = Vec::new();
        let mut anchored = Vec::new();
        let mut blank_rows = 0usize;
        let mut depth = 0usize;
        loop {
            match self.xml.next()? {
                Event::Start(e) => match e.local_name().as_ref() {
                    b"table-row" => {
                        let repeat = repeat_count(&e, b"number-rows-repeated");
                        let row = self.row(&mut anchored, level)?;
                        if row.is_empty() {
                            blank_rows = blank_rows.saturating_add(repeat);
                            continue;
                        }
                        let cap = self.limits.max_repeat;
                        rows.extend(std::iter::repeat_n(Vec::new(), blank_rows.min(cap)));
                        blank_rows = 0;
                        if repeat > cap {
                            self.truncated("rows", cap);
                        }
                        for _ in 0..repeat.min(cap) {
                            if self.cells_left < row.len() {
                                self.truncated("cells", self.limits.max_table_cells);
                                break;
                            }
                            self.cells_left -= row.len();
                            rows.push(row.clone());
                        }
                    }
                    b"table-header-rows" | b"table-rows" | b"table-row-group" | b"shapes" => depth += 1,
                    b"frame" => self.frame(&e, &mut anchored, level)?,
                    b"table-column" | b"table-columns" | b"table-header-columns"
                    | b"table-column-group" | b"title" | b"desc" | b"table-source" | b"scenario"
                    | b"named-expressions" | b"dde-source" | b"soft-page-break" => self.xml.skip()?,
                    _ => self.unrecognized(&e)?,
                },
                Event::End(_) if depth == 0 => break,
                Event::End(_) => depth -= 1,
                Event::Eof => return Err(self.xml.eof()),
                _ => {}
            }
        }
        items.push(Item::Table(rows));
        items.append(&mut anchored);
        Ok(())
    }

    /// Cells of one row with trailing blanks dropped.
    fn row(
        &mut self,
        anchored: &mut Vec<Item>,
        level: usize,
    ) -> Result<Vec<String>, ExtractionFailure> {
        let mut cells: Vec<String> = Vec::new();
        let mut blank = 0usize;
        let mut depth = 0usize;
        loop {
            match self.xml.next()? {
                Event::Start(e) => match e.local_name().as_ref() {
                    b"table-cell" | b"covered-table-cell" => {
                        let repeat = repeat_count(&e, b"number-columns-repeated");
                        let value = self.cell(anchored, level)?;
                        if value.is_empty() {
                            blank = blank.saturating_add(repeat);
                            continue;
                        }
                        let cap = self.limits.max_repeat;
                        if cells.len().saturating_add(blank) >= cap {
                            self.truncated("columns", cap);
                            continue;
                        }
                        cells.extend(std::iter::repeat_n(String::new(), blank));
                        blank = 0;
                        let room = cap - cells.len();
                        if repeat > room {
                            self.truncated("columns", cap);
                        }
                        cells.extend(std::iter::repeat_n(value, repeat.min(room)));
                    }
                    _ => depth += 1,
                },
                Event::End(_) if depth == 0 => return Ok(cells),
                Event::End(_) => depth -= 1,
                Event::Eof => return Err(self.xml.eof()),
                _ => {}
            }
        }
    }

    /// Paragraphs of a cell, one per line. Nested lists and tables are flattened.
    fn cell(
        &mut self,
        anchored: &mut Vec<Item>,
        level: usize,
    ) -> Result<String, ExtractionFailure> {
        let mut lines: Vec<String> = Vec::new();
        let mut depth = 0usize;
        loop {
            match self.xml.next()? {
                Event::Start(e) => match e.local_name().as_ref() {
                    b"p" | b"h" => {
                        let mut text = String::new();
                        self.inline(&mut text, anchored, level)?;
                        lines.push(text);
                    }
                    b"frame" => self.frame(&e, anchored, level)?,
                    b"annotation" | b"detective" | b"cell-range-source" => self.xml.skip()?,
                    _ => depth += 1,
                },
                Event::End(_) if depth == 0 => {
                    return Ok(lines.join("\n").trim_end_matches('\n').to_string());
                }
                Event::End(_) => depth -= 1,
                Event::Eof => return Err(self.xml.eof()),
                _ => {}
            }
        }
    }

    /// A `draw:frame`: its first image, a text box, or a table. Presentation title
    /// frames set the page title instead of adding blocks.
    fn frame(
        &mut self,
        element: &BytesStart<'_>,
        items: &mut Vec<Item>,
        level: usize,
    ) -> Result<(), ExtractionFailure> {
        if level >= MAX_FRAME_NESTING {
            self.truncated("nested frames", MAX_FRAME_NESTING);
            return self.xml.skip();
        }
        let extent = frame_extent(element);
        let is_title = attr(element, b"class").is_some_and(|c| c == "title");
        let mut content = Vec::new();
        let mut has_image = false;
        loop {
            match self.xml.next()? {
                Event::Start(e) => match e.local_name().as_ref() {
                    b"image" => {
                        if let Some(href) = attr(&e, b"href").filter(|_| !has_image) {
                            content.push(Item::Picture { href, extent });
                            has_image = true;
                        }
                        self.xml.skip()?;
                    }
                    b"text-box" => self.flow(&mut content, level + 1)?,
                    b"table" => self.table(&mut content, level + 1)?,
                    b"title" | b"desc" | b"image-map" | b"contour-polygon" | b"contour-path"
                    | b"glue-point" => self.xml.skip()?,
                    _ => self.unrecognized(&e)?,
                },
                Event::End(_) => break,
                Event::Eof => return Err(self.xml.eof()),
                _ => {}
            }
        }

        if is_title && self.title.is_none() {
            let mut title = Vec::new();
            for item in content {
                match item {
                    Item::Text(text) if !text.trim().is_empty() => title.push(text),
                    Item::Text(_) => {}
                    other => items.push(other),
                }
            }
            if !title.is_empty() {
                self.title = Some(title.join(" "));
            }
        } else {
            items.append(&mut content);
        }
        Ok(())
    }
}

fn repeat_count(element: &BytesStart<'_>, name: &[u8]) -> usize {
    attr(element, name)
        .and_then(|r| r.trim().parse::<usize>().ok())
        .unwrap_or(1)
        .max(1)
}

fn frame_extent(element: &BytesStart<'_>) -> Option<Extent> {
    let width_emu = length_emu(&attr(element, b"width")?)?;
    let height_emu = length_emu(&attr(element, b"height")?)?;
    Some(Extent { width_emu, height_emu })
}

/// `"2.5cm"` in EMU. Percentages and unknown units yield `None`.
fn length_emu(value: &str) -> Option<u64> {
    let split = value.find(|c: char| c.is_ascii_alphabetic())?;
    let (number, unit) = value.split_at(split);
    let number: f64 = number.trim().parse().ok()?;
    let per_unit = match unit {
        "cm" => 360_000.0,
        "mm" => 36_000.0,
        "in" | "inch" => 914_400.0,
        "pt" => 12_700.0,
        "pc" => 152_400.0,
        "px" => 9_525.0,
        _ => return None,
    };
    let emu = number * per_unit;
    (emu.is_finite() && (1.0..1e12).contains(&emu)).then(|| emu.round() as u64)
}

/// Writes a fresh package of the given kind.
pub fn write(
    kind: OdfKind,
    layout: &Layout,
    document: &IntermediateDocument,
) -> Result<Rebuilt, RebuildFailure> {
    let mut writer = OdfWriter {
        kind,
        body: String::new(),
        pictures: Vec::new(),
        hrefs: HashMap::new(),
        warnings: Vec::new(),
        frames: 0,
        tables: 0,
    };
    match kind {
        OdfKind::Text => writer.text_body(layout, document),
        OdfKind::Spreadsheet => writer.spreadsheet_body(layout, document),
        OdfKind::Presentation => writer.presentation_body(layout, document),
    }
    writer.finish(document)
}

struct OdfWriter {
    kind: OdfKind,
    body: String,
    /// `(image, href, media type)` in first-use order.
    pictures: Vec<(ImageId, String, &'static str)>,
    hrefs: HashMap<ImageId, String>,
    warnings: Vec<ContentWarning>,
    frames: usize,
    tables: usize,
}

impl OdfWriter {
    fn warn(&mut self, warning: ContentWarning) {
        if !self.warnings.contains(&warning) {
            self.warnings.push(warning);
        }
    }

    fn text_body(&mut self, layout: &Layout, document: &IntermediateDocument) {
        for (title, range) in layout.section_ranges(document.blocks.len()) {
            if let Some(title) = title {
                self.body.push_str(&format!(
                    "<text:h text:outline-level=\"1\">{}</text:h>",
                    inline(title)
                ));
            }
            for block in &document.blocks[range] {
                match block {
                    Block::Text(text) => self.body.push_str(&format!("<text:p>{}</text:p>", inline(text))),
                    Block::List(entries) => {
                        let list = list(entries);
                        self.body.push_str(&list);
                    }
                    Block::Table(table) => {
                        let table = self.table(table);
                        self.body.push_str(&table);
                    }
                    Block::Image(image) => {
                        if let Some((href, extent)) = self.picture(image, document) {
                            let (width, height) = extent.to_cm();
                            let frame = self.image_frame(&href, "text:anchor-type=\"as-char\"", width, height);
                            self.body.push_str(&format!("<text:p>{frame}</text:p>"));
                        }
                    }
                }
            }
        }
    }

    fn spreadsheet_body(&mut self, layout: &Layout, document: &IntermediateDocument) {
        let mut used = HashSet::new();
        let mut sheets = 0;
        for (index, (title, range)) in layout.section_ranges(document.blocks.len()).into_iter().enumerate() {
            if title.is_none() && range.is_empty() && !layout.sections.is_empty() {
                continue;
            }
            let mut rows: Vec<Vec<String>> = Vec::new();
            for block in &document.blocks[range] {
                match block {
                    Block::Table(table) => rows.extend(table.rows.iter().cloned()),
                    Block::Text(text) => rows.push(vec![text.clone()]),
                    Block::List(entries) => rows.extend(entries.iter().map(|e| vec![e.clone()])),
                    Block::Image(_) => self.warn(ContentWarning::Unrepresentable {
                        kind: BlockKind::Image,
                        target: "ods",
                    }),
                }
            }
            let name = sheet_name(title, index, &mut used);
            self.sheet(&name, &rows);
            sheets += 1;
        }
        if sheets == 0 {
            let name = sheet_name(None, 0, &mut used);
            self.sheet(&name, &[]);
        }
    }

    fn sheet(&mut self, name: &str, rows: &[Vec<String>]) {
        self.body.push_str(&format!("<table:table table:name=\"{}\">", escape(name)));
        let columns = rows.iter().map(Vec::len).max().unwrap_or(0).max(1);
        self.body.push_str(&format!(
            "<table:table-column table:number-columns-repeated=\"{columns}\"/>"
        ));
        for row in rows {
            self.body.push_str("<table:table-row>");
            if row.is_empty() {
                self.body.push_str("<table:table-cell/>");
            }
            for value in row {
                let cell = self.cell(value);
                self.body.push_str(&cell);
            }
            self.body.push_str("</table:table-row>");
        }
        self.body.push_str("</table:table>");
    }

    fn presentation_body(&mut self, layout: &Layout, document: &IntermediateDocument) {
        let mut pages = 0usize;
        for (title, range) in layout.section_ranges(document.blocks.len()) {
            if title.is_none() && range.is_empty() && !layout.sections.is_empty() {
                continue;
            }
            let name = title.map_or_else(|| format!("Slide {}", pages + 1), str::to_string);
            let mut continuation = 1;
            let mut y = self.open_page(&name, title);
            let top = y;
            for block in &document.blocks[range] {
                let height = self.block_height(block, document);
                if y + height > SLIDE_HEIGHT - SLIDE_MARGIN && y > top {
                    self.body.push_str("</draw:page>");
                    continuation += 1;
                    y = self.open_page(&format!("{name} ({continuation})"), title);
                }
                self.slide_block(block, document, y, height);
                y += height + FRAME_GAP;
            }
            self.body.push_str("</draw:page>");
            pages += 1;
        }
        if pages == 0 {
            self.open_page("Slide 1", None);
            self.body.push_str("</draw:page>");
        }
    }

    /// Starts a page and returns where content begins.
    fn open_page(&mut self, name: &str, title: Option<&str>) -> f64 {
        self.body.push_str(&format!(
            "<draw:page draw:name=\"{}\" draw:master-page-name=\"Default\">",
            escape(name)
        ));
        let Some(title) = title else {
            return SLIDE_MARGIN;
        };
        let frame = self.frame_open(SLIDE_MARGIN, SLIDE_WIDTH - 2.0 * SLIDE_MARGIN, TITLE_HEIGHT, " presentation:class=\"title\"");
        self.body.push_str(&format!(
            "{frame}<draw:text-box><text:p>{}</text:p></draw:text-box></draw:frame>",
            inline(title)
        ));
        SLIDE_MARGIN + TITLE_HEIGHT + FRAME_GAP
    }

    fn block_height(&self, block: &Block, document: &IntermediateDocument) -> f64 {
        let lines = match block {
            Block::Text(text) => text.split('\n').count(),
            Block::List(entries) => entries.len(),
            Block::Table(table) => table.rows.len(),
            Block::Image(image) => {
                return document
                    .image(image.id)
                    .map(|sanitized| {
                        let (width, height) = sanitized.dimensions();
                        let extent = image.extent.unwrap_or_else(|| Extent::from_pixels(width, height));
                        fit_slide(extent.to_cm()).1
                    })
                    .unwrap_or(0.0);
            }
        };
        lines.max(1) as f64 * LINE_HEIGHT + 0.4
    }

    fn slide_block(&mut self, block: &Block, document: &IntermediateDocument, y: f64, height: f64) {
        let width = SLIDE_WIDTH - 2.0 * SLIDE_MARGIN;
        match block {
            Block::Text(text) => {
                let frame = self.frame_open(y, width, height, "");
                self.body.push_str(&format!(
                    "{frame}<draw:text-box><text:p>{}</text:p></draw:text-box></draw:frame>",
                    inline(text)
                ));
            }
            Block::List(entries) => {
                let frame = self.frame_open(y, width, height, "");
                self.body.push_str(&format!("{frame}<draw:text-box>{}</draw:text-box></draw:frame>", list(entries)));
            }
            Block::Table(table) => {
                let frame = self.frame_open(y, width, height, "");
                let table = self.table(table);
                self.body.push_str(&format!("{frame}{table}</draw:frame>"));
            }
            Block::Image(image) => {
                if let Some((href, extent)) = self.picture(image, document) {
                    let (width, height) = fit_slide(extent.to_cm());
                    let position = format!("svg:x=\"{SLIDE_MARGIN:.2}cm\" svg:y=\"{y:.2}cm\"");
                    let frame = self.image_frame(&href, &position, width, height);
                    self.body.push_str(&frame);
                }
            }
        }
    }

    fn frame_open(&mut self, y: f64, width: f64, height: f64, extra: &str) -> String {
        self.frames += 1;
        format!(
            "<draw:frame draw:name=\"Frame{}\"{extra} svg:x=\"{SLIDE_MARGIN:.2}cm\" svg:y=\"{y:.2}cm\" \
             svg:width=\"{width:.2}cm\" svg:height=\"{height:.2}cm\">",
            self.frames
        )
    }

    fn image_frame(&mut self, href: &str, position: &str, width: f64, height: f64) -> String {
        self.frames += 1;
        format!(
            "<draw:frame draw:name=\"Image{}\" {position} svg:width=\"{width:.2}cm\" svg:height=\"{height:.2}cm\">\
             <draw:image xlink:href=\"{}\" xlink:type=\"simple\" xlink:show=\"embed\" xlink:actuate=\"onLoad\"/>\
             </draw:frame>",
            self.frames,
            escape(href)
        )
    }

    /// Registers the sanitized image behind `image` and returns its href and size.
    fn picture(
        &mut self,
        image: &ImageRef,
        document: &IntermediateDocument,
    ) -> Option<(String, Extent)> {
        let Some(sanitized) = document.image(image.id) else {
            self.warn(ContentWarning::MissingImage(format!("image {}", image.id.0)));
            return None;
        };
        let href = match self.hrefs.get(&image.id) {
            Some(href) => href.clone(),
            None => {
                let href = format!("Pictures/{}", media_name(self.pictures.len(), sanitized.format()));
                self.pictures.push((image.id, href.clone(), sanitized.format().mime()));
                self.hrefs.insert(image.id, href.clone());
                href
            }
        };
        let (width, height) = sanitized.dimensions();
        Some((href, image.extent.unwrap_or_else(|| Extent::from_pixels(width, height))))
    }

    fn table(&mut self, table: &Table) -> String {
        self.tables += 1;
        let columns = table.columns().max(1);
        let mut xml = format!(
            "<table:table table:name=\"Table{}\"><table:table-column table:number-columns-repeated=\"{columns}\"/>",
            self.tables
        );
        for row in &table.rows {
            xml.push_str("<table:table-row>");
            for column in 0..columns {
                let cell = self.cell(row.get(column).map_or("", String::as_str));
                xml.push_str(&cell);
            }
            xml.push_str("</table:table-row>");
        }
        xml.push_str("</table:table>");
        xml
    }

    fn cell(&self, value: &str) -> String {
        if value.is_empty() {
            return "<table:table-cell/>".to_string();
        }
        let paragraphs: String = value
            .split('\n')
            .map(|line| format!("<text:p>{}</text:p>", inline(line)))
            .collect();
        if self.kind == OdfKind::Spreadsheet && is_numeric(value) {
            format!("<table:table-cell office:value-type=\"float\" office:value=\"{value}\">{paragraphs}</table:table-cell>")
        } else if self.kind == OdfKind::Spreadsheet {
            format!("<table:table-cell office:value-type=\"string\">{paragraphs}</table:table-cell>")
        } else {
            format!("<table:table-cell table:style-name=\"Cell\" office:value-type=\"string\">{paragraphs}</table:table-cell>")
        }
    }

    fn finish(self, document: &IntermediateDocument) -> Result<Rebuilt, RebuildFailure> {
        let body = self.kind.body();
        let content = format!(
            "{XML_DECLARATION}<office:document-content {NAMESPACES} office:version=\"1.2\">\
             <office:automatic-styles>\
             <style:style style:name=\"Cell\" style:family=\"table-cell\">\
             <style:table-cell-properties fo:border=\"0.5pt solid #000000\" fo:padding=\"0.1cm\"/></style:style>\
             <text:list-style style:name=\"L1\"><text:list-level-style-bullet text:level=\"1\" text:bullet-char=\"\u{2022}\">\
             <style:list-level-properties text:space-before=\"0.25in\" text:min-label-width=\"0.25in\"/>\
             </text:list-level-style-bullet></text:list-style>\
             </office:automatic-styles>\
             <office:body><office:{body}>{}</office:{body}></office:body></office:document-content>",
            self.body
        );

        let mut manifest = format!(
            "{XML_DECLARATION}<manifest:manifest xmlns:manifest=\"{MANIFEST_NS}\" manifest:version=\"1.2\">\
             <manifest:file-entry manifest:full-path=\"/\" manifest:version=\"1.2\" manifest:media-type=\"{}\"/>\
             <manifest:file-entry manifest:full-path=\"content.xml\" manifest:media-type=\"text/xml\"/>\
             <manifest:file-entry manifest:full-path=\"styles.xml\" manifest:media-type=\"text/xml\"/>",
            self.kind.mimetype()
        );
        for (_, href, mime) in &self.pictures {
            manifest.push_str(&format!(
                "<manifest:file-entry manifest:full-path=\"{}\" manifest:media-type=\"{mime}\"/>",
                escape(href)
            ));
        }
        manifest.push_str("</manifest:manifest>");

        let mut package = PackageWriter::new();
        // Must be the first entry, uncompressed.
        package.stored("mimetype", self.kind.mimetype().as_bytes())?;
        package.deflated("META-INF/manifest.xml", manifest.as_bytes())?;
        package.deflated(CONTENT, content.as_bytes())?;
        package.deflated("styles.xml", styles(self.kind).as_bytes())?;
        for (id, href, _) in &self.pictures {
            if let Some(image) = document.image(*id) {
                package.stored(href, image.bytes())?;
            }
        }
        Ok(Rebuilt {
            bytes: package.finish()?,
            warnings: self.warnings,
        })
    }
}

/// Scales a size in centimetres down to the slide's content area.
fn fit_slide((width, height): (f64, f64)) -> (f64, f64) {
    let max_width = SLIDE_WIDTH - 2.0 * SLIDE_MARGIN;
    let max_height = SLIDE_HEIGHT - 2.0 * SLIDE_MARGIN - TITLE_HEIGHT - FRAME_GAP;
    let scale = (max_width / width).min(max_height / height).min(1.0);
    (width * scale, height * scale)
}

fn list(entries: &[String]) -> String {
    let mut xml = String::from("<text:list text:style-name=\"L1\">");
    for entry in entries {
        xml.push_str(&format!("<text:list-item><text:p>{}</text:p></text:list-item>", inline(entry)));
    }
    xml.push_str("</text:list>");
    xml
}

/// Paragraph content. Runs of spaces the reader would collapse become `text:s`.
fn inline(text: &str) -> String {
    fn flush(out: &mut String, spaces: usize, at_edge: bool) {
        match spaces {
            0 => {}
            1 if !at_edge => out.push(' '),
            n if at_edge => out.push_str(&format!("<text:s text:c=\"{n}\"/>")),
            n => out.push_str(&format!(" <text:s text:c=\"{}\"/>", n - 1)),
        }
    }

    let mut out = String::new();
    let mut spaces = 0usize;
    let mut at_start = true;
    for c in text.chars() {
        match c {
            ' ' => {
                spaces += 1;
                continue;
            }
            '\t' => {
                flush(&mut out, spaces, true);
                out.push_str("<text:tab/>");
            }
            '\n' => {
                flush(&mut out, spaces, true);
                out.push_str("<text:line-break/>");
            }
            other => {
                flush(&mut out, spaces, at_start);
                let mut buf = [0u8; 4];
                out.push_str(&escape(other.encode_utf8(&mut buf)));
            }
        }
        spaces = 0;
        at_start = matches!(c, '\t' | '\n');
    }
    flush(&mut out, spaces, true);
    out
}

fn styles(kind: OdfKind) -> String {
    let (width, height, margin) = match kind {
        OdfKind::Presentation => ("28cm", "15.75cm", "0cm"),
        OdfKind::Text | OdfKind::Spreadsheet => ("21cm", "29.7cm", "2cm"),
    };
    format!(
        "{XML_DECLARATION}<office:document-styles {NAMESPACES} office:version=\"1.2\">\
         <office:styles/><office:automatic-styles><style:page-layout style:name=\"PM1\">\
         <style:page-layout-properties fo:page-width=\"{width}\" fo:page-height=\"{height}\" \
         fo:margin-top=\"{margin}\" fo:margin-bottom=\"{margin}\" fo:margin-left=\"{margin}\" fo:margin-right=\"{margin}\"/>\
         </style:page-layout></office:automatic-styles><office:master-styles>\
         <style:master-page style:name=\"Default\" style:page-layout-name=\"PM1\"/>\
         </office:master-styles></office:document-styles>"
    )
}
