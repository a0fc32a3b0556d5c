//! PresentationML (`.pptx`, `.pptm`). Slides become sections; text shapes, tables and
//! pictures become blocks. The writer lays the blocks out top to bottom, one slide per
//! section, continuing on a new slide when a section runs past the bottom margin.

use std::collections::HashMap;

use quick_xml::events::{BytesStart, Event};

use crate::config::Limits;
use crate::document::{
    Block, DocumentBuilder, Extent, ImageId, ImageRef, IntermediateDocument, Layout, Table,
};
use crate::error::{ContentWarning, ExtractionFailure, RebuildFailure};
use crate::formats::{
    XML_DECLARATION, content_types, main_part, media_name, place_image, relationships,
    warn_macros,
};
use crate::package::{PackageReader, PackageWriter};
use crate::pipeline::Rebuilt;
use crate::xml::{XmlReader, attr, escape, local_str, prefixed_attr};

const MAIN_FALLBACK: &str = "ppt/presentation.xml";
const MACROS: &str = "ppt/vbaProject.bin";
const MAX_GROUP_NESTING: usize = 16;

#[derive(Debug, PartialEq)]
enum Item {
    Text(String),
    List(Vec<String>),
    Table(Vec<Vec<String>>),
    Picture { rel_id: String, extent: Option<Extent> },
}

#[derive(Debug, Default)]
struct Slide {
    title: Option<String>,
    items: Vec<Item>,
}

pub fn extract(
    package: &mut PackageReader,
    limits: &Limits,
) -> Result<DocumentBuilder, ExtractionFailure> {
    let presentation_part = main_part(package, MAIN_FALLBACK)?;
    let presentation = package.read_string(&presentation_part)?;
    let rels = package.relationships(&presentation_part)?;

    let mut builder = DocumentBuilder::new();
    warn_macros(package, &mut builder, MACROS);

    let mut slide_ids = Vec::new();
    let mut reader = XmlReader::new(&presentation, &presentation_part);
    while let Some(slide) = reader.find(b"sldId")? {
        if let Some(rel_id) = prefixed_attr(&slide, b"id") {
            slide_ids.push(rel_id);
        }
    }

    let mut cells_left = limits.max_table_cells;
    for (index, rel_id) in slide_ids.iter().enumerate() {
        let Some(target) = rels.target(rel_id).map(str::to_string) else {
            tracing::warn!(slide = index + 1, "slide relationship does not resolve");
            continue;
        };
        let xml = package.read_string(&target)?;
        let slide_rels = package.relationships(&target)?;

        let mut parser = SlideParser {
            xml: XmlReader::new(&xml, &target),
            builder: &mut builder,
            cells_left: &mut cells_left,
            cell_limit: limits.max_table_cells,
        };
        let slide = parser.parse()?;

        builder.section(Some(slide.title.unwrap_or_else(|| format!("Slide {}", index + 1))));
        for item in slide.items {
            match item {
                Item::Text(text) => builder.text(text),
                Item::List(items) => builder.list(items),
                Item::Table(rows) => builder.table(rows),
                Item::Picture { rel_id, extent } => {
                    place_image(package, &slide_rels, &mut builder, &rel_id, extent)?;
                }
            }
        }
    }
    Ok(builder)
}

struct SlideParser<'a, 'b> {
    xml: XmlReader<'a>,
    builder: &'b mut DocumentBuilder,
    cells_left: &'b mut usize,
    cell_limit: usize,
}

impl SlideParser<'_, '_> {
    fn parse(&mut self) -> Result<Slide, ExtractionFailure> {
        let mut slide = Slide::default();
        if self.xml.find(b"spTree")?.is_some() {
            self.shapes(&mut slide, 0)?;
        }
        Ok(slide)
    }

    /// Children of `spTree` or of a group shape.
    fn shapes(&mut self, slide: &mut Slide, level: usize) -> Result<(), ExtractionFailure> {
        loop {
            match self.xml.next()? {
                Event::Start(e) => match e.local_name().as_ref() {
                    b"sp" => self.shape(slide)?,
                    b"pic" => {
                        let (rel_id, extent) = self.picture()?;
                        if let Some(rel_id) = rel_id {
                            slide.items.push(Item::Picture { rel_id, extent });
                        }
                    }
                    b"graphicFrame" => self.frame(slide)?,
                    b"grpSp" if level < MAX_GROUP_NESTING => self.shapes(slide, level + 1)?,
                    b"nvGrpSpPr" | b"grpSpPr" | b"cxnSp" | b"extLst" => self.xml.skip()?,
                    _ => self.unrecognized(&e)?,
                },
                Event::End(_) => return Ok(()),
                Event::Eof => return Err(self.xml.eof()),
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

    fn shape(&mut self, slide: &mut Slide) -> Result<(), ExtractionFailure> {
        let mut is_title = false;
        let mut paragraphs: Vec<(String, bool)> = Vec::new();
        let mut depth = 0usize;
        loop {
            match self.xml.next()? {
                Event::Start(e) => match e.local_name().as_ref() {
                    b"ph" => {
                        is_title = attr(&e, b"type")
                            .is_some_and(|t| t == "title" || t == "ctrTitle");
                        self.xml.skip()?;
                    }
                    b"txBody" => paragraphs = self.text_body()?,
                    b"spPr" | b"style" | b"extLst" => self.xml.skip()?,
                    _ => depth += 1,
                },
                Event::End(_) if depth == 0 => break,
                Event::End(_) => depth -= 1,
                Event::Eof => return Err(self.xml.eof()),
                _ => {}
            }
        }

        let paragraphs: Vec<(String, bool)> =
            paragraphs.into_iter().filter(|(t, _)| !t.trim().is_empty()).collect();
        if paragraphs.is_empty() {
            return Ok(());
        }
        if is_title && slide.title.is_none() {
            let title: Vec<&str> = paragraphs.iter().map(|(t, _)| t.as_str()).collect();
            slide.title = Some(title.join(" "));
        } else if paragraphs.iter().all(|(_, bulleted)| *bulleted) {
            slide.items.push(Item::List(paragraphs.into_iter().map(|(t, _)| t).collect()));
        } else {
            let text: Vec<String> = paragraphs.into_iter().map(|(t, _)| t).collect();
            slide.items.push(Item::Text(text.join("\n")));
        }
        Ok(())
    }

    /// Paragraphs of a DrawingML text body, each with whether it carries a bullet.
    fn text_body(&mut self) -> Result<Vec<(String, bool)>, ExtractionFailure> {
        let mut paragraphs = Vec::new();
        let mut depth = 0usize;
        loop {
            match self.xml.next()? {
                Event::Start(e) => match e.local_name().as_ref() {
                    b"p" => paragraphs.push(self.text_paragraph()?),
                    b"bodyPr" | b"lstStyle" => self.xml.skip()?,
                    _ => depth += 1,
                },
                Event::End(_) if depth == 0 => return Ok(paragraphs),
                Event::End(_) => depth -= 1,
                Event::Eof => return Err(self.xml.eof()),
                _ => {}
            }
        }
    }

    fn text_paragraph(&mut self) -> Result<(String, bool), ExtractionFailure> {
        let mut text = String::new();
        let mut bulleted = false;
        let mut depth = 0usize;
        loop {
            match self.xml.next()? {
                Event::Start(e) => match e.local_name().as_ref() {
                    b"t" => text.push_str(&self.xml.text()?),
                    b"br" => {
                        text.push('\n');
                        self.xml.skip()?;
                    }
                    b"buChar" | b"buAutoNum" | b"buBlip" => {
                        bulleted = true;
                        self.xml.skip()?;
                    }
                    b"buNone" | b"rPr" | b"endParaRPr" => self.xml.skip()?,
                    _ => depth += 1,
                },
                Event::End(_) if depth == 0 => return Ok((text, bulleted)),
                Event::End(_) => depth -= 1,
                Event::Eof => return Err(self.xml.eof()),
                _ => {}
            }
        }
    }

    fn picture(&mut self) -> Result<(Option<String>, Option<Extent>), ExtractionFailure> {
        let mut rel_id = None;
        let mut extent = None;
        let mut depth = 0usize;
        loop {
            match self.xml.next()? {
                Event::Start(e) => match e.local_name().as_ref() {
                    b"blip" => {
                        rel_id = attr(&e, b"embed");
                        self.xml.skip()?;
                    }
                    b"ext" => {
                        extent = parse_ext(&e);
                        self.xml.skip()?;
                    }
                    b"extLst" => self.xml.skip()?,
                    _ => depth += 1,
                },
                Event::End(_) if depth == 0 => return Ok((rel_id, extent)),
                Event::End(_) => depth -= 1,
                Event::Eof => return Err(self.xml.eof()),
                _ => {}
            }
        }
    }

    /// A graphic frame; only tables are understood.
    fn frame(&mut self, slide: &mut Slide) -> Result<(), ExtractionFailure> {
        let mut depth = 0usize;
        loop {
            match self.xml.next()? {
                Event::Start(e) => match e.local_name().as_ref() {
                    b"tbl" => {
                        let rows = self.table()?;
                        slide.items.push(Item::Table(rows));
                    }
                    b"graphicData" => {
                        let is_table = attr(&e, b"uri").is_some_and(|u| u.ends_with("/table"));
                        if is_table {
                            depth += 1;
                        } else {
                            self.unrecognized(&e)?;
                        }
                    }
                    b"nvGraphicFramePr" | b"xfrm" | b"extLst" => self.xml.skip()?,
                    _ => depth += 1,
                },
                Event::End(_) if depth == 0 => return Ok(()),
                Event::End(_) => depth -= 1,
                Event::Eof => return Err(self.xml.eof()),
                _ => {}
            }
        }
    }

    fn table(&mut self) -> Result<Vec<Vec<String>>, ExtractionFailure> {
        let mut rows: Vec<Vec<String>> = Vec::new();
        let mut depth = 0usize;
        loop {
            match self.xml.next()? {
                Event::Start(e) => match e.local_name().as_ref() {
                    b"tr" => {
                        rows.push(Vec::new());
                        depth += 1;
                    }
                    b"tc" => {
                        let text: Vec<String> = self.cell()?.into_iter().map(|(t, _)| t).collect();
                        if *self.cells_left == 0 {
                            self.builder.warn(ContentWarning::Truncated {
                                what: format!("tables in {}", self.xml.part()),
                                limit: self.cell_limit,
                            });
                        } else if let Some(row) = rows.last_mut() {
                            *self.cells_left -= 1;
                            row.push(text.join("\n").trim_end().to_string());
                        }
                    }
                    b"tblPr" | b"tblGrid" => self.xml.skip()?,
                    _ => depth += 1,
                },
                Event::End(_) if depth == 0 => return Ok(rows),
                Event::End(_) => depth -= 1,
                Event::Eof => return Err(self.xml.eof()),
                _ => {}
            }
        }
    }

    fn cell(&mut self) -> Result<Vec<(String, bool)>, ExtractionFailure> {
        let mut paragraphs = Vec::new();
        let mut depth = 0usize;
        loop {
            match self.xml.next()? {
                Event::Start(e) => match e.local_name().as_ref() {
                    b"txBody" => paragraphs = self.text_body()?,
                    b"tcPr" => self.xml.skip()?,
                    _ => depth += 1,
                },
                Event::End(_) if depth == 0 => return Ok(paragraphs),
                Event::End(_) => depth -= 1,
                Event::Eof => return Err(self.xml.eof()),
                _ => {}
            }
        }
    }
}

fn parse_ext(element: &BytesStart<'_>) -> Option<Extent> {
    let width_emu = attr(element, b"cx")?.parse().ok()?;
    let height_emu = attr(element, b"cy")?.parse().ok()?;
    (width_emu > 0 && height_emu > 0).then_some(Extent { width_emu, height_emu })
}

const A_NS: &str = "http://schemas.openxmlformats.org/drawingml/2006/main";
const TABLE_URI: &str = "http://schemas.openxmlformats.org/drawingml/2006/table";
const PRESENTATION_CT: &str =
    "application/vnd.openxmlformats-officedocument.presentationml.presentation.main+xml";
const SLIDE_CT: &str = "application/vnd.openxmlformats-officedocument.presentationml.slide+xml";
const MASTER_CT: &str =
    "application/vnd.openxmlformats-officedocument.presentationml.slideMaster+xml";
const LAYOUT_CT: &str =
    "application/vnd.openxmlformats-officedocument.presentationml.slideLayout+xml";
const THEME_CT: &str = "application/vnd.openxmlformats-officedocument.theme+xml";

// 4:3 slide, in EMU.
const SLIDE_CX: u64 = 9_144_000;
const SLIDE_CY: u64 = 6_858_000;
const MARGIN: u64 = 457_200;
const TITLE_CY: u64 = 914_400;
const GAP: u64 = 182_880;
const LINE_CY: u64 = 365_760;
const BOX_PADDING: u64 = 137_160;
const CONTENT_CX: u64 = SLIDE_CX - 2 * MARGIN;

/// Writes a new `.pptx` holding only whitelisted markup.
pub fn write(layout: &Layout, document: &IntermediateDocument) -> Result<Rebuilt, RebuildFailure> {
    let mut writer = PptxWriter::default();
    for (title, range) in layout.section_ranges(document.blocks.len()) {
        if title.is_none() && range.is_empty() && !layout.sections.is_empty() {
            continue;
        }
        writer.section(title, &document.blocks[range], document);
    }
    if writer.slides.is_empty() {
        writer.open_slide(None);
        writer.close_slide();
    }
    writer.finish(document)
}

#[derive(Default)]
struct SlideXml {
    shapes: String,
    next_shape: usize,
    /// Relationship id and media name of each picture on this slide.
    pictures: Vec<(String, String)>,
}

impl SlideXml {
    fn shape_id(&mut self) -> usize {
        self.next_shape += 1;
        self.next_shape + 1
    }
}

#[derive(Default)]
struct PptxWriter {
    slides: Vec<SlideXml>,
    current: Option<SlideXml>,
    /// Media name of each image, in first-use order.
    media: Vec<(ImageId, String)>,
    names: HashMap<ImageId, String>,
    warnings: Vec<ContentWarning>,
}

impl PptxWriter {
    fn warn(&mut self, warning: ContentWarning) {
        if !self.warnings.contains(&warning) {
            self.warnings.push(warning);
        }
    }

    fn section(&mut self, title: Option<&str>, blocks: &[Block], document: &IntermediateDocument) {
        let mut y = self.open_slide(title);
        let top = y;
        for block in blocks {
            let height = self.block_height(block, document);
            if y + height > SLIDE_CY - MARGIN && y > top {
                self.close_slide();
                y = self.open_slide(title);
            }
            self.block(block, document, y, height);
            y += height + GAP;
        }
        self.close_slide();
    }

    /// Starts a slide and returns where content begins.
    fn open_slide(&mut self, title: Option<&str>) -> u64 {
        let mut slide = SlideXml::default();
        let Some(title) = title else {
            self.current = Some(slide);
            return MARGIN;
        };
        let id = slide.shape_id();
        slide.shapes.push_str(&format!(
            "<p:sp><p:nvSpPr><p:cNvPr id=\"{id}\" name=\"Title {id}\"/>\
             <p:cNvSpPr><a:spLocks noGrp=\"1\"/></p:cNvSpPr><p:nvPr><p:ph type=\"title\"/></p:nvPr></p:nvSpPr>\
             <p:spPr>{}</p:spPr><p:txBody><a:bodyPr/><a:lstStyle/><a:p>{}</a:p></p:txBody></p:sp>",
            xfrm(MARGIN, MARGIN, CONTENT_CX, TITLE_CY),
            runs(title)
        ));
        self.current = Some(slide);
        MARGIN + TITLE_CY + GAP
    }

    fn close_slide(&mut self) {
        if let Some(slide) = self.current.take() {
            self.slides.push(slide);
        }
    }

    fn block_height(&self, block: &Block, document: &IntermediateDocument) -> u64 {
        let lines = match block {
            Block::Text(text) => text.split('\n').count(),
            Block::List(entries) => entries.iter().map(|e| e.split('\n').count()).sum(),
            Block::Table(table) => table.rows.len(),
            Block::Image(image) => {
                return self.picture_extent(image, document).map_or(0, |extent| extent.height_emu);
            }
        };
        lines.max(1) as u64 * LINE_CY + BOX_PADDING
    }

    fn picture_extent(&self, image: &ImageRef, document: &IntermediateDocument) -> Option<Extent> {
        let sanitized = document.image(image.id)?;
        let (width, height) = sanitized.dimensions();
        let extent = image.extent.unwrap_or_else(|| Extent::from_pixels(width, height));
        Some(fit_slide(extent))
    }

    fn block(&mut self, block: &Block, document: &IntermediateDocument, y: u64, height: u64) {
        match block {
            Block::Text(text) => {
                let paragraphs: String = text
                    .split('\n')
                    .map(|line| format!("<a:p><a:pPr><a:buNone/></a:pPr>{}</a:p>", runs(line)))
                    .collect();
                self.text_box(y, height, &paragraphs);
            }
            Block::List(entries) => {
                let paragraphs: String = entries
                    .iter()
                    .map(|entry| {
                        format!(
                            "<a:p><a:pPr marL=\"342900\" indent=\"-342900\"><a:buFont typeface=\"Arial\"/>\
                             <a:buChar char=\"\u{2022}\"/></a:pPr>{}</a:p>",
                            runs(entry)
                        )
                    })
                    .collect();
                self.text_box(y, height, &paragraphs);
            }
            Block::Table(table) => self.table(table, y, height),
            Block::Image(image) => self.picture(image, document, y),
        }
    }

    fn slide(&mut self) -> &mut SlideXml {
        self.current.get_or_insert_with(SlideXml::default)
    }

    fn text_box(&mut self, y: u64, height: u64, paragraphs: &str) {
        let slide = self.slide();
        let id = slide.shape_id();
        slide.shapes.push_str(&format!(
            "<p:sp><p:nvSpPr><p:cNvPr id=\"{id}\" name=\"TextBox {id}\"/><p:cNvSpPr txBox=\"1\"/><p:nvPr/></p:nvSpPr>\
             <p:spPr>{}<a:prstGeom prst=\"rect\"><a:avLst/></a:prstGeom><a:noFill/></p:spPr>\
             <p:txBody><a:bodyPr wrap=\"square\"><a:normAutofit/></a:bodyPr><a:lstStyle/>{paragraphs}</p:txBody></p:sp>",
            xfrm(MARGIN, y, CONTENT_CX, height)
        ));
    }

    fn table(&mut self, table: &Table, y: u64, height: u64) {
        let columns = table.columns().max(1);
        let column_cx = CONTENT_CX / columns as u64;
        let mut xml = String::from("<a:tbl><a:tblPr firstRow=\"1\" bandRow=\"1\"/><a:tblGrid>");
        for _ in 0..columns {
            xml.push_str(&format!("<a:gridCol w=\"{column_cx}\"/>"));
        }
        xml.push_str("</a:tblGrid>");
        for row in &table.rows {
            xml.push_str(&format!("<a:tr h=\"{LINE_CY}\">"));
            for column in 0..columns {
                let text = row.get(column).map_or("", String::as_str);
                xml.push_str(&format!(
                    "<a:tc><a:txBody><a:bodyPr/><a:lstStyle/><a:p>{}</a:p></a:txBody><a:tcPr/></a:tc>",
                    runs(text)
                ));
            }
            xml.push_str("</a:tr>");
        }
        xml.push_str("</a:tbl>");

        let slide = self.slide();
        let id = slide.shape_id();
        slide.shapes.push_str(&format!(
            "<p:graphicFrame><p:nvGraphicFramePr><p:cNvPr id=\"{id}\" name=\"Table {id}\"/>\
             <p:cNvGraphicFramePr><a:graphicFrameLocks noGrp=\"1\"/></p:cNvGraphicFramePr><p:nvPr/></p:nvGraphicFramePr>\
             <p:xfrm><a:off x=\"{MARGIN}\" y=\"{y}\"/><a:ext cx=\"{CONTENT_CX}\" cy=\"{height}\"/></p:xfrm>\
             <a:graphic><a:graphicData uri=\"{TABLE_URI}\">{xml}</a:graphicData></a:graphic></p:graphicFrame>"
        ));
    }

    fn picture(&mut self, image: &ImageRef, document: &IntermediateDocument, y: u64) {
        let extent = self.picture_extent(image, document);
        let (Some(sanitized), Some(extent)) = (document.image(image.id), extent) else {
            self.warn(ContentWarning::MissingImage(format!("image {}", image.id.0)));
            return;
        };
        let name = match self.names.get(&image.id) {
            Some(name) => name.clone(),
            None => {
                let name = media_name(self.media.len(), sanitized.format());
                self.media.push((image.id, name.clone()));
                self.names.insert(image.id, name.clone());
                name
            }
        };

        let slide = self.slide();
        let rel_id = format!("rId{}", slide.pictures.len() + 2);
        slide.pictures.push((rel_id.clone(), name));
        let id = slide.shape_id();
        slide.shapes.push_str(&format!(
            "<p:pic><p:nvPicPr><p:cNvPr id=\"{id}\" name=\"Picture {id}\"/>\
             <p:cNvPicPr><a:picLocks noChangeAspect=\"1\"/></p:cNvPicPr><p:nvPr/></p:nvPicPr>\
             <p:blipFill><a:blip r:embed=\"{rel_id}\"/><a:stretch><a:fillRect/></a:stretch></p:blipFill>\
             <p:spPr>{}<a:prstGeom prst=\"rect\"><a:avLst/></a:prstGeom></p:spPr></p:pic>",
            xfrm(MARGIN, y, extent.width_emu, extent.height_emu)
        ));
    }

    fn finish(self, document: &IntermediateDocument) -> Result<Rebuilt, RebuildFailure> {
        let slide_count = self.slides.len();

        let mut overrides: Vec<(String, &str)> = vec![
            ("/ppt/presentation.xml".into(), PRESENTATION_CT),
            ("/ppt/slideMasters/slideMaster1.xml".into(), MASTER_CT),
            ("/ppt/slideLayouts/slideLayout1.xml".into(), LAYOUT_CT),
            ("/ppt/theme/theme1.xml".into(), THEME_CT),
        ];
        let mut presentation_rels: Vec<(String, &str, String)> =
            vec![("rId1".into(), "slideMaster", "slideMasters/slideMaster1.xml".into())];
        let mut slide_ids = String::new();
        for index in 1..=slide_count {
            overrides.push((format!("/ppt/slides/slide{index}.xml"), SLIDE_CT));
            let rel_id = format!("rId{}", index + 1);
            slide_ids.push_str(&format!("<p:sldId id=\"{}\" r:id=\"{rel_id}\"/>", 255 + index));
            presentation_rels.push((rel_id, "slide", format!("slides/slide{index}.xml")));
        }
        let theme_rel = format!("rId{}", slide_count + 2);
        presentation_rels.push((theme_rel, "theme", "theme/theme1.xml".into()));
        let overrides: Vec<(&str, &str)> =
            overrides.iter().map(|(part, ct)| (part.as_str(), *ct)).collect();

        let presentation = format!(
            "{XML_DECLARATION}<p:presentation {NAMESPACES} saveSubsetFonts=\"1\">\
             <p:sldMasterIdLst><p:sldMasterId id=\"2147483648\" r:id=\"rId1\"/></p:sldMasterIdLst>\
             <p:sldIdLst>{slide_ids}</p:sldIdLst>\
             <p:sldSz cx=\"{SLIDE_CX}\" cy=\"{SLIDE_CY}\" type=\"screen4x3\"/>\
             <p:notesSz cx=\"{SLIDE_CY}\" cy=\"{SLIDE_CX}\"/></p:presentation>"
        );

        let mut package = PackageWriter::new();
        package.deflated("[Content_Types].xml", content_types(&overrides).as_bytes())?;
        let root_rels =
            relationships(&[("rId1".into(), "officeDocument", "ppt/presentation.xml".into())]);
        package.deflated("_rels/.rels", root_rels.as_bytes())?;
        package.deflated("ppt/presentation.xml", presentation.as_bytes())?;
        package.deflated(
            "ppt/_rels/presentation.xml.rels",
            relationships(&presentation_rels).as_bytes(),
        )?;
        package.deflated("ppt/slideMasters/slideMaster1.xml", slide_master().as_bytes())?;
        package.deflated(
            "ppt/slideMasters/_rels/slideMaster1.xml.rels",
            relationships(&[
                ("rId1".into(), "slideLayout", "../slideLayouts/slideLayout1.xml".into()),
                ("rId2".into(), "theme", "../theme/theme1.xml".into()),
            ])
            .as_bytes(),
        )?;
        package.deflated("ppt/slideLayouts/slideLayout1.xml", slide_layout().as_bytes())?;
        let layout_rels = relationships(&[(
            "rId1".into(),
            "slideMaster",
            "../slideMasters/slideMaster1.xml".into(),
        )]);
        package.deflated("ppt/slideLayouts/_rels/slideLayout1.xml.rels", layout_rels.as_bytes())?;
        package.deflated("ppt/theme/theme1.xml", theme().as_bytes())?;

        for (index, slide) in self.slides.iter().enumerate() {
            let number = index + 1;
            let xml = format!(
                "{XML_DECLARATION}<p:sld {NAMESPACES}><p:cSld>{}{}</p:spTree></p:cSld>\
                 <p:clrMapOvr><a:masterClrMapping/></p:clrMapOvr></p:sld>",
                SP_TREE_OPEN, slide.shapes
            );
            let mut rels: Vec<(String, &str, String)> =
                vec![("rId1".into(), "slideLayout", "../slideLayouts/slideLayout1.xml".into())];
            for (rel_id, name) in &slide.pictures {
                rels.push((rel_id.clone(), "image", format!("../media/{name}")));
            }
            package.deflated(&format!("ppt/slides/slide{number}.xml"), xml.as_bytes())?;
            package.deflated(
                &format!("ppt/slides/_rels/slide{number}.xml.rels"),
                relationships(&rels).as_bytes(),
            )?;
        }
        for (id, name) in &self.media {
            if let Some(image) = document.image(*id) {
                package.stored(&format!("ppt/media/{name}"), image.bytes())?;
            }
        }

        Ok(Rebuilt {
            bytes: package.finish()?,
            warnings: self.warnings,
        })
    }
}

const NAMESPACES: &str = concat!(
    "xmlns:a=\"http://schemas.openxmlformats.org/drawingml/2006/main\" ",
    "xmlns:r=\"http://schemas.openxmlformats.org/officeDocument/2006/relationships\" ",
    "xmlns:p=\"http://schemas.openxmlformats.org/presentationml/2006/main\""
);

const SP_TREE_OPEN: &str = "<p:spTree><p:nvGrpSpPr><p:cNvPr id=\"1\" name=\"\"/><p:cNvGrpSpPr/><p:nvPr/></p:nvGrpSpPr>\
     <p:grpSpPr><a:xfrm><a:off x=\"0\" y=\"0\"/><a:ext cx=\"0\" cy=\"0\"/>\
     <a:chOff x=\"0\" y=\"0\"/><a:chExt cx=\"0\" cy=\"0\"/></a:xfrm></p:grpSpPr>";

/// Scales a picture down to the area below a title.
fn fit_slide(extent: Extent) -> Extent {
    let max_cy = SLIDE_CY - 2 * MARGIN - TITLE_CY - GAP;
    let scale = (CONTENT_CX as f64 / extent.width_emu as f64)
        .min(max_cy as f64 / extent.height_emu as f64)
        .min(1.0);
    Extent {
        width_emu: ((extent.width_emu as f64 * scale).round() as u64).max(1),
        height_emu: ((extent.height_emu as f64 * scale).round() as u64).max(1),
    }
}

fn xfrm(x: u64, y: u64, cx: u64, cy: u64) -> String {
    format!("<a:xfrm><a:off x=\"{x}\" y=\"{y}\"/><a:ext cx=\"{cx}\" cy=\"{cy}\"/></a:xfrm>")
}

/// Runs of one paragraph, line breaks as `a:br`.
fn runs(text: &str) -> String {
    let mut out = String::new();
    for (i, line) in text.split('\n').enumerate() {
        if i > 0 {
            out.push_str("<a:br><a:rPr lang=\"en-US\"/></a:br>");
        }
        if !line.is_empty() {
            out.push_str(&format!("<a:r><a:rPr lang=\"en-US\"/><a:t>{}</a:t></a:r>", escape(line)));
        }
    }
    out
}

fn slide_master() -> String {
    format!(
        "{XML_DECLARATION}<p:sldMaster {NAMESPACES}><p:cSld><p:bg><p:bgRef idx=\"1001\"><a:schemeClr val=\"bg1\"/></p:bgRef></p:bg>\
         {SP_TREE_OPEN}</p:spTree></p:cSld>\
         <p:clrMap bg1=\"lt1\" tx1=\"dk1\" bg2=\"lt2\" tx2=\"dk2\" accent1=\"accent1\" accent2=\"accent2\" \
         accent3=\"accent3\" accent4=\"accent4\" accent5=\"accent5\" accent6=\"accent6\" hlink=\"hlink\" folHlink=\"folHlink\"/>\
         <p:sldLayoutIdLst><p:sldLayoutId id=\"2147483649\" r:id=\"rId1\"/></p:sldLayoutIdLst></p:sldMaster>"
    )
}

fn slide_layout() -> String {
    format!(
        "{XML_DECLARATION}<p:sldLayout {NAMESPACES} type=\"blank\" preserve=\"1\"><p:cSld name=\"Blank\">\
         {SP_TREE_OPEN}</p:spTree></p:cSld><p:clrMapOvr><a:masterClrMapping/></p:clrMapOvr></p:sldLayout>"
    )
}

fn theme() -> String {
    let colors = [
        ("dk1", "000000"),
        ("lt1", "FFFFFF"),
        ("dk2", "1F497D"),
        ("lt2", "EEECE1"),
        ("accent1", "4F81BD"),
        ("accent2", "C0504D"),
        ("accent3", "9BBB59"),
        ("accent4", "8064A2"),
        ("accent5", "4BACC6"),
        ("accent6", "F79646"),
        ("hlink", "0000FF"),
        ("folHlink", "800080"),
    ];
    let scheme: String = colors
        .iter()
        .map(|(name, rgb)| format!("<a:{name}><a:srgbClr val=\"{rgb}\"/></a:{name}>"))
        .collect();
    let fill = "<a:solidFill><a:schemeClr val=\"phClr\"/></a:solidFill>";
    let line = "<a:ln w=\"9525\"><a:solidFill><a:schemeClr val=\"phClr\"/></a:solidFill></a:ln>";
    let effect = "<a:effectStyle><a:effectLst/></a:effectStyle>";
    format!(
        "{XML_DECLARATION}<a:theme xmlns:a=\"{A_NS}\" name=\"Scour\"><a:themeElements>\
         <a:clrScheme name=\"Scour\">{scheme}</a:clrScheme>\
         <a:fontScheme name=\"Scour\"><a:majorFont><a:latin typeface=\"Calibri\"/><a:ea typeface=\"\"/><a:cs typeface=\"\"/></a:majorFont>\
         <a:minorFont><a:latin typeface=\"Calibri\"/><a:ea typeface=\"\"/><a:cs typeface=\"\"/></a:minorFont></a:fontScheme>\
         <a:fmtScheme name=\"Scour\"><a:fillStyleLst>{fill}{fill}{fill}</a:fillStyleLst>\
         <a:lnStyleLst>{line}{line}{line}</a:lnStyleLst>\
         <a:effectStyleLst>{effect}{effect}{effect}</a:effectStyleLst>\
         <a:bgFillStyleLst>{fill}{fill}{fill}</a:bgFillStyleLst></a:fmtScheme>\
         </a:themeElements><a:objectDefaults/><a:extraClrSchemeLst/></a:theme>"
    )
}
