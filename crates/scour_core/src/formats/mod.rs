//! Readers and writers for the individual container formats.
//!
//! Readers only ever translate recognized structure into a [`DocumentBuilder`]; writers
//! only ever see the sanitized [`IntermediateDocument`](crate::document::IntermediateDocument).

pub mod legacy;
pub mod odf;
pub mod pdf;
pub mod sheet;
pub mod slides;
pub mod word;

use crate::document::{DocumentBuilder, Extent, RawImage};
use crate::error::{ContentWarning, ExtractionFailure};
use crate::package::{PackageReader, Relationships};
use crate::types::RasterFormat;
use crate::xml::escape;

pub(crate) const XML_DECLARATION: &str =
    r#"<?xml version="1.0" encoding="UTF-8" standalone="yes"?>"#;

const REL_NS: &str = "http://schemas.openxmlformats.org/package/2006/relationships";
const CT_NS: &str = "http://schemas.openxmlformats.org/package/2006/content-types";
pub(crate) const OFFICE_REL: &str =
    "http://schemas.openxmlformats.org/officeDocument/2006/relationships";

/// Looks up a picture relationship and quarantines the bytes behind it. Missing or
/// oversized pictures become warnings; only archive corruption is fatal.
pub(crate) fn place_image(
    package: &mut PackageReader,
    rels: &Relationships,
    builder: &mut DocumentBuilder,
    rel_id: &str,
    extent: Option<Extent>,
) -> Result<(), ExtractionFailure> {
    builder.declare_image_slot();
    let Some(target) = rels.target(rel_id).map(str::to_string) else {
        builder.warn(ContentWarning::MissingImage(rel_id.to_string()));
        return Ok(());
    };
    quarantine_part(package, builder, target, extent)
}

/// Reads `part` into quarantine behind a new image block.
pub(crate) fn quarantine_part(
    package: &mut PackageReader,
    builder: &mut DocumentBuilder,
    part: String,
    extent: Option<Extent>,
) -> Result<(), ExtractionFailure> {
    match package.read(&part) {
        Ok(bytes) => {
            builder.image(RawImage::new(bytes, part), extent);
            Ok(())
        }
        Err(ExtractionFailure::MissingPart(_)) => {
            builder.warn(ContentWarning::MissingImage(part));
            Ok(())
        }
        Err(e @ ExtractionFailure::PartTooLarge { .. }) => {
            builder.warn(ContentWarning::ImageDropped {
                origin: part,
                reason: e.to_string(),
            });
            Ok(())
        }
        Err(e) => Err(e),
    }
}

pub(crate) fn warn_macros(package: &PackageReader, builder: &mut DocumentBuilder, part: &str) {
    if package.contains(part) {
        tracing::info!(part, "discarding macro project");
        builder.warn(ContentWarning::MacrosDiscarded(part.to_string()));
    }
}

/// OOXML package entry point from `_rels/.rels`, with a conventional fallback.
pub(crate) fn main_part(
    package: &mut PackageReader,
    fallback: &str,
) -> Result<String, ExtractionFailure> {
    let rels = package.relationships("")?;
    Ok(rels
        .first_of_kind("officeDocument")
        .map(|r| r.target.clone())
        .unwrap_or_else(|| fallback.to_string()))
}

pub(crate) fn media_name(index: usize, format: RasterFormat) -> String {
    format!("image{}.{}", index + 1, format.extension())
}

/// `[Content_Types].xml` with png/jpg defaults and the given overrides.
pub(crate) fn content_types(overrides: &[(&str, &str)]) -> String {
    let mut xml = format!("{XML_DECLARATION}<Types xmlns=\"{CT_NS}\">");
    xml.push_str(
        "<Default Extension=\"rels\" ContentType=\"application/vnd.openxmlformats-package.relationships+xml\"/>\
         <Default Extension=\"xml\" ContentType=\"application/xml\"/>\
         <Default Extension=\"png\" ContentType=\"image/png\"/>\
         <Default Extension=\"jpg\" ContentType=\"image/jpeg\"/>",
    );
    for (part, content_type) in overrides {
        xml.push_str(&format!(
            "<Override PartName=\"{}\" ContentType=\"{}\"/>",
            escape(part),
            escape(content_type)
        ));
    }
    xml.push_str("</Types>");
    xml
}

/// A relationships part. Entries are `(id, type suffix, target)`.
pub(crate) fn relationships(entries: &[(String, &str, String)]) -> String {
    let mut xml = format!("{XML_DECLARATION}<Relationships xmlns=\"{REL_NS}\">");
    for (id, kind, target) in entries {
        xml.push_str(&format!(
            "<Relationship Id=\"{}\" Type=\"{OFFICE_REL}/{kind}\" Target=\"{}\"/>",
            escape(id),
            escape(target)
        ));
    }
    xml.push_str("</Relationships>");
    xml
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Limits;
    use crate::package::PackageWriter;

    #[test]
    fn place_image_warns_on_missing() {
        let mut writer = PackageWriter::new();
        writer.deflated("word/media/image1.png", b"bytes").unwrap();
        let mut package = PackageReader::new(writer.finish().unwrap(), &Limits::default()).unwrap();

        let rels = Relationships::parse(
            &relationships(&[
                ("rId1".into(), "image", "media/image1.png".into()),
                ("rId2".into(), "image", "media/gone.png".into()),
            ]),
            "word/_rels/document.xml.rels",
            "word",
        )
        .unwrap();

        let mut builder = DocumentBuilder::new();
        place_image(&mut package, &rels, &mut builder, "rId1", None).unwrap();
        place_image(&mut package, &rels, &mut builder, "rId2", None).unwrap();
        place_image(&mut package, &rels, &mut builder, "rId9", None).unwrap();

        let extraction = builder.finish();
        assert_eq!(extraction.quarantine.len(), 1);
        assert_eq!(extraction.quarantine[0].origin, "word/media/image1.png");
        assert!(extraction.warnings.contains(&ContentWarning::MissingImage("word/media/gone.png".into())));
        assert!(extraction.warnings.contains(&ContentWarning::MissingImage("rId9".into())));
        assert!(extraction.warnings.contains(&ContentWarning::ImageCountMismatch { declared: 3, found: 1 }));
    }

    #[test]
    fn content_types_lists_overrides() {
        let xml = content_types(&[("/word/document.xml", "application/test+xml")]);
        assert!(xml.contains(r#"<Override PartName="/word/document.xml" ContentType="application/test+xml"/>"#));
        assert!(xml.contains(r#"Extension="png""#));
    }
}
