//! PDF output: one page per sanitized page image and nothing else. No fonts, actions,
//! annotations or metadata are ever written.

use std::io::Write;

use flate2::Compression;
use flate2::write::ZlibEncoder;
use lopdf::content::{Content, Operation};
use lopdf::{Document, Object, Stream, dictionary};

use crate::document::{Block, IntermediateDocument};
use crate::error::{ContentWarning, RebuildFailure};
use crate::pipeline::Rebuilt;

/// Resolution page images are rendered at; fixes the page size in points.
pub const PAGE_DPI: u32 = 100;

pub fn write(document: &IntermediateDocument) -> Result<Rebuilt, RebuildFailure> {
    let mut pdf = Document::with_version("1.5");
    let pages_id = pdf.new_object_id();
    let mut kids: Vec<Object> = Vec::new();
    let mut warnings: Vec<ContentWarning> = Vec::new();

    for block in &document.blocks {
        let Block::Image(image) = block else {
            let warning = ContentWarning::Unrepresentable {
                kind: block.kind(),
                target: "pdf",
            };
            if !warnings.contains(&warning) {
                warnings.push(warning);
            }
            continue;
        };
        let Some(sanitized) = document.image(image.id) else {
            warnings.push(ContentWarning::MissingImage(format!("page image {}", image.id.0)));
            continue;
        };

        let grid = sanitized.grid();
        let (width, height) = (grid.width(), grid.height());
        let xobject = Stream::new(
            dictionary! {
                "Type" => "XObject",
                "Subtype" => "Image",
                "Width" => Object::Integer(i64::from(width)),
                "Height" => Object::Integer(i64::from(height)),
                "ColorSpace" => "DeviceRGB",
                "BitsPerComponent" => Object::Integer(8),
                "Filter" => "FlateDecode",
            },
            deflate(&grid.to_rgb8())?,
        );
        let image_id = pdf.add_object(xobject);

        let (page_width, page_height) = (points(width), points(height));
        let content = Content {
            operations: vec![
                Operation::new("q", vec![]),
                Operation::new(
                    "cm",
                    vec![
                        Object::Integer(page_width),
                        Object::Integer(0),
                        Object::Integer(0),
                        Object::Integer(page_height),
                        Object::Integer(0),
                        Object::Integer(0),
                    ],
                ),
                Operation::new("Do", vec![Object::Name(b"Im0".to_vec())]),
                Operation::new("Q", vec![]),
            ],
        };
        let content_id = pdf.add_object(Stream::new(dictionary! {}, content.encode()?));
        let page_id = pdf.add_object(dictionary! {
            "Type" => "Page",
            "Parent" => pages_id,
            "MediaBox" => vec![
                Object::Integer(0),
                Object::Integer(0),
                Object::Integer(page_width),
                Object::Integer(page_height),
            ],
            "Contents" => content_id,
            "Resources" => dictionary! {
                "XObject" => dictionary! { "Im0" => image_id },
            },
        });
        kids.push(page_id.into());
    }

    if kids.is_empty() {
        return Err(RebuildFailure::Empty("no page images"));
    }
    let count = kids.len() as i64;
    pdf.objects.insert(
        pages_id,
        Object::Dictionary(dictionary! {
            "Type" => "Pages",
            "Kids" => kids,
            "Count" => Object::Integer(count),
        }),
    );
    let catalog_id = pdf.add_object(dictionary! {
        "Type" => "Catalog",
        "Pages" => pages_id,
    });
    pdf.trailer.set("Root", catalog_id);

    let mut bytes = Vec::new();
    pdf.save_to(&mut bytes)?;
    tracing::debug!(pages = count, bytes = bytes.len(), "wrote pdf");
    Ok(Rebuilt { bytes, warnings })
}

fn points(pixels: u32) -> i64 {
    (i64::from(pixels) * 72 / i64::from(PAGE_DPI)).max(1)
}

fn deflate(data: &[u8]) -> Result<Vec<u8>, RebuildFailure> {
    let mut encoder = ZlibEncoder::new(Vec::new(), Compression::default());
    encoder.write_all(data)?;
    Ok(encoder.finish()?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::document::{BlockKind, ImageId, ImageRef};
    use crate::pixels::{PixelSanitizer, test_png};

    fn page(id: usize) -> Block {
        Block::Image(ImageRef {
            id: ImageId(id),
            extent: None,
        })
    }

    #[test]
    fn one_page_per_image() {
        let sanitizer = PixelSanitizer::default();
        let document = IntermediateDocument {
            blocks: vec![page(0), Block::Text("ignored".into()), page(1)],
            images: vec![
                sanitizer.sanitize(&test_png(200, 100)).unwrap(),
                sanitizer.sanitize(&test_png(50, 50)).unwrap(),
            ],
        };
        let rebuilt = write(&document).unwrap();
        assert_eq!(
            rebuilt.warnings,
            vec![ContentWarning::Unrepresentable {
                kind: BlockKind::Text,
                target: "pdf"
            }]
        );
        assert!(rebuilt.bytes.starts_with(b"%PDF-1.5"));

        let pdf = Document::load_mem(&rebuilt.bytes).unwrap();
        let pages = pdf.get_pages();
        assert_eq!(pages.len(), 2);
        let first = pdf.get_dictionary(pages[&1]).unwrap();
        let media_box = first.get(b"MediaBox").unwrap().as_array().unwrap();
        assert_eq!(media_box[2].as_i64().unwrap(), 144);
        assert_eq!(media_box[3].as_i64().unwrap(), 72);
    }

    #[test]
    fn no_images_is_an_error() {
        let document = IntermediateDocument {
            blocks: vec![Block::Text("only text".into())],
            images: Vec::new(),
        };
        assert!(matches!(write(&document), Err(RebuildFailure::Empty(_))));
    }
}
