//! WordprocessingML (`.docx`, `.docm`): body paragraphs, numbered lists, tables and
//! inline pictures in, the same whitelist out.

use std::collections::HashMap;

use quick_xml::events::{BytesStart, Event};

use crate::config::Limits;
use crate::document::{Block, DocumentBuilder, Extent, ImageId, IntermediateDocument, Layout, Table};
use crate::error::{ContentWarning, ExtractionFailure, RebuildFailure};
use crate::formats::{
    XML_DECLARATION, content_types, main_part, media_name, place_image, relationships, warn_macros,
};
use crate::package::{PackageReader, PackageWriter, Relationships};
use crate::pipeline::Rebuilt;
use crate::xml::{XmlReader, attr, escape, local_str};

const MAIN_FALLBACK: &str = "word/document.xml";
const MACROS: &str = "word/vbaProject.bin";
const MAX_TABLE_NESTING: usize = 8;

const W_NS: &str = "http://schemas.openxmlformats.org/wordprocessingml/2006/main";
const WP_NS: &str = "http://schemas.openxmlformats.org/drawingml/2006/wordprocessingDrawing";
const A_NS: &str = "http://schemas.openxmlformats.org/drawingml/2006/main";
const PIC_NS: &str = "http://schemas.openxmlformats.org/drawingml/2006/picture";
const DOCUMENT_CT: &str =
    "application/vnd.openxmlformats-officedocument.wordprocessingml.document.main+xml";
const NUMBERING_CT: &str =
    "application/vnd.openxmlformats-officedocument.wordprocessingml.numbering+xml";

pub fn extract(
    package: &mut PackageReader,
    limits: &Limits,
) -> Result<DocumentBuilder, ExtractionFailure> {
    let part = main_part(package, MAIN_FALLBACK)?;
    let xml = package.read_string(&part)?;
    let rels = package.relationships(&part)?;

    let mut builder = DocumentBuilder::new();
    warn_macros(package, &mut builder, MACROS);

    let mut parser = BodyParser {
        xml: XmlReader::new(&xml, &part),
        package,
        rels: &rels,
        builder,
        list: Vec::new(),
        cells_left: limits.max_table_cells,
    };
    parser.parse()?;
    Ok(parser.builder)
}

#[derive(Debug, Default)]
struct Paragraph {
    text: String,
    list_item: bool,
    pictures: Vec<Picture>,
}

#[derive(Debug)]
struct Picture {
    rel_id: String,
    extent: Option<Extent>,
}

struct BodyParser<'a, 'p> {
    xml: XmlReader<'a>,
    package: &'p mut PackageReader,
    rels: &'p Relationships,
    builder: DocumentBuilder,
    /// Consecutive list paragraphs waiting to become one list block.
    list: Vec<String>,
    cells_left: usize,
}

impl BodyParser<'_, '_> {
    fn parse(&mut self) -> Result<(), ExtractionFailure> {
        if self.xml.find(b"body")?.is_none() {
            return Err(ExtractionFailure::Malformed(format!(
                "{} has no body",
                self.xml.part()
            )));
        }

        let mut depth = 0usize;
        loop {
            match self.xml.next()? {
                Event::Start(e) => match e.local_name().as_ref() {
                    b"p" => {
                        let paragraph = self.paragraph()?;
                        self.emit(paragraph)?;
                    }
                    b"tbl" => {
                        self.flush_list();
                        let (rows, pictures) = self.table(0)?;
                        self.builder.table(rows);
                        self.place_all(pictures)?;
                    }
                    // Content controls and tracked insertions wrap ordinary body content.
                    b"sdt" | b"sdtContent" | b"customXml" | b"ins" | b"smartTag" => depth += 1,
                    b"sectPr" | b"sdtPr" | b"sdtEndPr" | b"bookmarkStart" | b"bookmarkEnd"
                    | b"proofErr" | b"permStart" | b"permEnd" | b"del" => self.xml.skip()?,
                    _ => self.unrecognized(&e)?,
                },
                Event::End(_) if depth == 0 => break,
                Event::End(_) => depth -= 1,
                Event::Eof => return Err(self.xml.eof()),
                _ => {}
            }
        }
        self.flush_list();
        Ok(())
    }

    fn unrecognized(&mut self, element: &BytesStart<'_>) -> Result<(), ExtractionFailure> {
        let name = local_str(element);
        tracing::debug!(part = self.xml.part(), element = %name, "dropping unrecognized element");
        self.builder.warn(ContentWarning::UnrecognizedElement {
            part: self.xml.part().to_string(),
            element: name,
        });
        self.xml.skip()
    }

    fn emit(&mut self, paragraph: Paragraph) -> Result<(), ExtractionFailure> {
        if paragraph.list_item {
            self.list.push(paragraph.text);
        } else {
            self.flush_list();
            self.builder.text(paragraph.text);
        }
        if !paragraph.pictures.is_empty() {
            self.flush_list();
            self.place_all(paragraph.pictures)?;
        }
        Ok(())
    }

    fn flush_list(&mut self) {
        if !self.list.is_empty() {
            self.builder.list(std::mem::take(&mut self.list));
        }
    }

    fn place_all(&mut self, pictures: Vec<Picture>) -> Result<(), ExtractionFailure> {
        for picture in pictures {
            place_image(
                self.package,
                self.rels,
                &mut self.builder,
                &picture.rel_id,
                picture.extent,
            )?;
        }
        Ok(())
    }

    /// Text runs, tabs and breaks of one `w:p`, plus its pictures in order.
    fn paragraph(&mut self) -> Result<Paragraph, ExtractionFailure> {
        let mut paragraph = Paragraph::default();
        let mut extent = None;
        let mut depth = 0usize;
        loop {
            match self.xml.next()? {
                Event::Start(e) => match e.local_name().as_ref() {
                    b"t" => paragraph.text.push_str(&self.xml.text()?),
                    b"tab" => {
                        paragraph.text.push('\t');
                        self.xml.skip()?;
                    }
                    b"br" | b"cr" => {
                        paragraph.text.push('\n');
                        self.xml.skip()?;
                    }
                    b"numPr" => {
                        paragraph.list_item = true;
                        self.xml.skip()?;
                    }
                    b"pStyle" => {
                        if attr(&e, b"val").is_some_and(|v| v.starts_with("List")) {
                            paragraph.list_item = true;
                        }
                        self.xml.skip()?;
                    }
                    b"extent" => {
                        extent = parse_extent(&e);
                        self.xml.skip()?;
                    }
                    b"blip" | b"imagedata" => {
                        let rel_id = attr(&e, b"embed").or_else(|| attr(&e, b"id"));
                        if let Some(rel_id) = rel_id {
                            paragraph.pictures.push(Picture {
                                rel_id,
                                extent: extent.take(),
                            });
                        }
                        self.xml.skip()?;
                    }
                    b"rPr" | b"del" | b"delText" | b"instrText" | b"fldData" => self.xml.skip()?,
                    _ => depth += 1,
                },
                Event::End(_) if depth == 0 => return Ok(paragraph),
                Event::End(_) => depth -= 1,
                Event::Eof => return Err(self.xml.eof()),
                _ => {}
            }
        }
    }

    /// Rows of one `w:tbl`. Pictures found in cells are returned to be placed after it.
    fn table(
        &mut self,
        level: usize,
    ) -> Result<(Vec<Vec<String>>, Vec<Picture>), ExtractionFailure> {
        let mut rows = Vec::new();
        let mut pictures = Vec::new();
        let mut depth = 0usize;
        loop {
            match self.xml.next()? {
                Event::Start(e) => match e.local_name().as_ref() {
                    b"tr" => {
                        let row = self.row(level, &mut pictures)?;
                        if self.cells_left >= row.len() {
                            self.cells_left -= row.len();
                            rows.push(row);
                        } else {
                            self.builder.warn(ContentWarning::Truncated {
                                what: "table".into(),
                                limit: rows.len(),
                            });
                        }
                    }
                    b"tblPr" | b"tblGrid" | b"tblPrEx" => self.xml.skip()?,
                    _ => depth += 1,
                },
                Event::End(_) if depth == 0 => return Ok((rows, pictures)),
                Event::End(_) => depth -= 1,
                Event::Eof => return Err(self.xml.eof()),
                _ => {}
            }
        }
    }

    fn row(
        &mut self,
        level: usize,
        pictures: &mut Vec<Picture>,
    ) -> Result<Vec<String>, ExtractionFailure> {
        let mut cells = Vec::new();
        let mut depth = 0usize;
        loop {
            match self.xml.next()? {
                Event::Start(e) => match e.local_name().as_ref() {
                    b"tc" => cells.push(self.cell(level, pictures)?),
                    b"trPr" | b"tblPrEx" => self.xml.skip()?,
                    _ => depth += 1,
                },
                Event::End(_) if depth == 0 => return Ok(cells),
                Event::End(_) => depth -= 1,
                Event::Eof => return Err(self.xml.eof()),
                _ => {}
            }
        }
    }

    fn cell(
        &mut self,
        level: usize,
        pictures: &mut Vec<Picture>,
    ) -> Result<String, ExtractionFailure> {
        let mut lines: Vec<String> = Vec::new();
        let mut depth = 0usize;
        loop {
            match self.xml.next()? {
                Event::Start(e) => match e.local_name().as_ref() {
                    b"p" => {
                        let paragraph = self.paragraph()?;
                        lines.push(paragraph.text);
                        pictures.extend(paragraph.pictures);
                    }
                    b"tbl" if level < MAX_TABLE_NESTING => {
                        let (rows, nested) = self.table(level + 1)?;
                        lines.extend(rows.into_iter().map(|row| row.join("\t")));
                        pictures.extend(nested);
                    }
                    b"tbl" | b"tcPr" => self.xml.skip()?,
                    _ => depth += 1,
                },
                Event::End(_) if depth == 0 => return Ok(lines.join("\n").trim_end().to_string()),
                Event::End(_) => depth -= 1,
                Event::Eof => return Err(self.xml.eof()),
                _ => {}
            }
        }
    }
}

fn parse_extent(element: &BytesStart<'_>) -> Option<Extent> {
    let width_emu = attr(element, b"cx")?.parse().ok()?;
    let height_emu = attr(element, b"cy")?.parse().ok()?;
    (width_emu > 0 && height_emu > 0).then_some(Extent { width_emu, height_emu })
}

/// Writes a new `.docx` holding only whitelisted markup.
pub fn write(layout: &Layout, document: &IntermediateDocument) -> Result<Rebuilt, RebuildFailure> {
    let mut writer = DocxWriter::default();
    for (title, range) in layout.section_ranges(document.blocks.len()) {
        if let Some(title) = title {
            writer.heading(title);
        }
        for block in &document.blocks[range] {
            writer.block(block, document);
        }
    }
    writer.finish()
}

#[derive(Default)]
struct DocxWriter {
    body: String,
    /// Relationship id and target of each media part, in first-use order.
    media: Vec<(String, String)>,
    rel_ids: HashMap<ImageId, String>,
    uses_lists: bool,
    drawings: usize,
    warnings: Vec<ContentWarning>,
}

impl DocxWriter {
    fn heading(&mut self, title: &str) {
        self.body.push_str("<w:p><w:r><w:rPr><w:b/></w:rPr>");
        self.body.push_str(&runs_inner(title));
        self.body.push_str("</w:r></w:p>");
    }

    fn block(&mut self, block: &Block, document: &IntermediateDocument) {
        match block {
            Block::Text(text) => self.paragraph(text),
            Block::List(items) => {
                self.uses_lists = true;
                for item in items {
                    self.body.push_str(
                        "<w:p><w:pPr><w:numPr><w:ilvl w:val=\"0\"/><w:numId w:val=\"1\"/></w:numPr></w:pPr>",
                    );
                    self.body.push_str(&run(item));
                    self.body.push_str("</w:p>");
                }
            }
            Block::Table(table) => self.table(table),
            Block::Image(image) => {
                let Some(sanitized) = document.image(image.id) else {
                    self.warnings.push(ContentWarning::MissingImage(format!("image {}", image.id.0)));
                    return;
                };
                let rel_id = match self.rel_ids.get(&image.id) {
                    Some(rel_id) => rel_id.clone(),
                    None => {
                        let index = self.media.len();
                        let rel_id = format!("rIdImg{}", index + 1);
                        let target = format!("media/{}", media_name(index, sanitized.format()));
                        self.media.push((rel_id.clone(), target));
                        self.rel_ids.insert(image.id, rel_id.clone());
                        rel_id
                    }
                };
                let (width, height) = sanitized.dimensions();
                let extent = image.extent.unwrap_or_else(|| Extent::from_pixels(width, height));
                self.drawing(&rel_id, extent);
            }
        }
    }

    fn paragraph(&mut self, text: &str) {
        self.body.push_str("<w:p>");
        self.body.push_str(&run(text));
        self.body.push_str("</w:p>");
    }

    fn table(&mut self, table: &Table) {
        let columns = table.columns().max(1);
        self.body.push_str("<w:tbl><w:tblPr><w:tblW w:w=\"0\" w:type=\"auto\"/><w:tblBorders>");
        for edge in ["top", "left", "bottom", "right", "insideH", "insideV"] {
            self.body.push_str(&format!(
                "<w:{edge} w:val=\"single\" w:sz=\"4\" w:space=\"0\" w:color=\"auto\"/>"
            ));
        }
        self.body.push_str("</w:tblBorders></w:tblPr><w:tblGrid>");
        for _ in 0..columns {
            self.body.push_str("<w:gridCol/>");
        }
        self.body.push_str("</w:tblGrid>");
        for row in &table.rows {
            self.body.push_str("<w:tr>");
            for column in 0..columns {
                let text = row.get(column).map_or("", String::as_str);
                self.body.push_str("<w:tc><w:p>");
                self.body.push_str(&run(text));
                self.body.push_str("</w:p></w:tc>");
            }
            self.body.push_str("</w:tr>");
        }
        self.body.push_str("</w:tbl>");
    }

    fn drawing(&mut self, rel_id: &str, extent: Extent) {
        self.drawings += 1;
        let id = self.drawings;
        let (cx, cy) = (extent.width_emu, extent.height_emu);
        self.body.push_str(&format!(
            "<w:p><w:r><w:drawing><wp:inline distT=\"0\" distB=\"0\" distL=\"0\" distR=\"0\">\
             <wp:extent cx=\"{cx}\" cy=\"{cy}\"/><wp:docPr id=\"{id}\" name=\"Picture {id}\"/>\
             <wp:cNvGraphicFramePr><a:graphicFrameLocks noChangeAspect=\"1\"/></wp:cNvGraphicFramePr>\
             <a:graphic><a:graphicData uri=\"{PIC_NS}\"><pic:pic>\
             <pic:nvPicPr><pic:cNvPr id=\"{id}\" name=\"Picture {id}\"/><pic:cNvPicPr/></pic:nvPicPr>\
             <pic:blipFill><a:blip r:embed=\"{rel_id}\"/><a:stretch><a:fillRect/></a:stretch></pic:blipFill>\
             <pic:spPr><a:xfrm><a:off x=\"0\" y=\"0\"/><a:ext cx=\"{cx}\" cy=\"{cy}\"/></a:xfrm>\
             <a:prstGeom prst=\"rect\"><a:avLst/></a:prstGeom></pic:spPr>\
             </pic:pic></a:graphicData></a:graphic></wp:inline></w:drawing></w:r></w:p>"
        ));
    }

    fn finish(self) -> Result<Rebuilt, RebuildFailure> {
        let document = format!(
            "{XML_DECLARATION}<w:document xmlns:w=\"{W_NS}\" xmlns:r=\"{}\" xmlns:wp=\"{WP_NS}\" \
             xmlns:a=\"{A_NS}\" xmlns:pic=\"{PIC_NS}\"><w:body>{}\
             <w:sectPr><w:pgSz w:w=\"12240\" w:h=\"15840\"/>\
             <w:pgMar w:top=\"1440\" w:right=\"1440\" w:bottom=\"1440\" w:left=\"1440\" \
             w:header=\"720\" w:footer=\"720\" w:gutter=\"0\"/></w:sectPr></w:body></w:document>",
            crate::formats::OFFICE_REL,
            self.body
        );

        let mut overrides = vec![("/word/document.xml", DOCUMENT_CT)];
        let mut rels: Vec<(String, &str, String)> = Vec::new();
        if self.uses_lists {
            overrides.push(("/word/numbering.xml", NUMBERING_CT));
            rels.push(("rIdNumbering".into(), "numbering", "numbering.xml".into()));
        }
        for (rel_id, target) in &self.media {
            rels.push((rel_id.clone(), "image", target.clone()));
        }

        let mut package = PackageWriter::new();
        package.deflated("[Content_Types].xml", content_types(&overrides).as_bytes())?;
        package.deflated(
            "_rels/.rels",
            relationships(&[("rId1".into(), "officeDocument", "word/document.xml".into())]).as_bytes(),
        )?;
        package.deflated("word/document.xml", document.as_bytes())?;
        package.deflated("word/_rels/document.xml.rels", relationships(&rels).as_bytes())?;
        if self.uses_lists {
            package.deflated("word/numbering.xml", numbering().as_bytes())?;
        }
        Ok(Rebuilt {
            bytes: package.finish()?,
            warnings: self.warnings,
        })
    }
}

fn numbering() -> String {
    format!(
        "{XML_DECLARATION}<w:numbering xmlns:w=\"{W_NS}\">\
         <w:abstractNum w:abstractNumId=\"0\"><w:multiLevelType w:val=\"singleLevel\"/>\
         <w:lvl w:ilvl=\"0\"><w:start w:val=\"1\"/><w:numFmt w:val=\"bullet\"/>\
         <w:lvlText w:val=\"\u{2022}\"/><w:lvlJc w:val=\"left\"/>\
         <w:pPr><w:ind w:left=\"720\" w:hanging=\"360\"/></w:pPr></w:lvl></w:abstractNum>\
         <w:num w:numId=\"1\"><w:abstractNumId w:val=\"0\"/></w:num></w:numbering>"
    )
}

/// One run carrying `text`, with tabs and line breaks as their own elements.
fn run(text: &str) -> String {
    format!("<w:r>{}</w:r>", runs_inner(text))
}

fn runs_inner(text: &str) -> String {
    let mut out = String::new();
    for (i, line) in text.split('\n').enumerate() {
        if i > 0 {
            out.push_str("<w:br/>");
        }
        for (j, piece) in line.split('\t').enumerate() {
            if j > 0 {
                out.push_str("<w:tab/>");
            }
            if !piece.is_empty() {
                out.push_str(&format!("<w:t xml:space=\"preserve\">{}</w:t>", escape(piece)));
            }
        }
    }
    out
}
