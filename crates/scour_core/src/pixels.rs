//! Pixel-level image reconstruction.
//!
//! The source container is decoded once. A new grid is allocated and filled pixel by
//! pixel, and only that grid is encoded. Chunks, segments, trailing bytes and metadata of
//! the source never reach the encoder.

use image::codecs::jpeg::JpegEncoder;
use image::codecs::png::PngEncoder;
use image::{DynamicImage, ImageBuffer, ImageError, Pixel};
use thiserror::Error;

use crate::types::RasterFormat;

pub const DEFAULT_MAX_PIXELS: u64 = 64 * 1024 * 1024;
const JPEG_QUALITY: u8 = 90;

#[derive(Debug, Error)]
pub enum PixelError {
    #[error("Unsupported image container")]
    Unsupported,

    #[error("Unreadable image header: {0}")]
    Header(String),

    #[error("Image is {width}x{height}, above the {limit} pixel ceiling")]
    TooLarge { width: u64, height: u64, limit: u64 },

    #[error("Decode error: {0}")]
    Decode(#[source] ImageError),

    #[error("Unsupported color mode")]
    UnsupportedMode,

    #[error("Encode error: {0}")]
    Encode(#[source] ImageError),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ColorMode {
    L8,
    La8,
    Rgb8,
    Rgba8,
    L16,
    La16,
    Rgb16,
    Rgba16,
}

impl ColorMode {
    fn of(image: &DynamicImage) -> Option<Self> {
        Some(match image {
            DynamicImage::ImageLuma8(_) => Self::L8,
            DynamicImage::ImageLumaA8(_) => Self::La8,
            DynamicImage::ImageRgb8(_) => Self::Rgb8,
            DynamicImage::ImageRgba8(_) => Self::Rgba8,
            DynamicImage::ImageLuma16(_) => Self::L16,
            DynamicImage::ImageLumaA16(_) => Self::La16,
            DynamicImage::ImageRgb16(_) => Self::Rgb16,
            DynamicImage::ImageRgba16(_) => Self::Rgba16,
            _ => return None,
        })
    }

    /// Baseline JPEG only carries 8-bit gray and RGB.
    #[must_use]
    pub fn jpeg_compatible(&self) -> bool {
        matches!(self, Self::L8 | Self::Rgb8)
    }
}

/// Freshly allocated pixels with the decoder's dimensions and mode.
#[derive(Debug, Clone)]
pub struct PixelGrid {
    width: u32,
    height: u32,
    mode: ColorMode,
    image: DynamicImage,
}

impl PixelGrid {
    /// Copies every pixel of `decoded` into a new buffer.
    fn rebuild(decoded: &DynamicImage) -> Result<Self, PixelError> {
        let mode = ColorMode::of(decoded).ok_or(PixelError::UnsupportedMode)?;
        let image = match decoded {
            DynamicImage::ImageLuma8(b) => DynamicImage::ImageLuma8(copy_pixels(b)),
            DynamicImage::ImageLumaA8(b) => DynamicImage::ImageLumaA8(copy_pixels(b)),
            DynamicImage::ImageRgb8(b) => DynamicImage::ImageRgb8(copy_pixels(b)),
            DynamicImage::ImageRgba8(b) => DynamicImage::ImageRgba8(copy_pixels(b)),
            DynamicImage::ImageLuma16(b) => DynamicImage::ImageLuma16(copy_pixels(b)),
            DynamicImage::ImageLumaA16(b) => DynamicImage::ImageLumaA16(copy_pixels(b)),
            DynamicImage::ImageRgb16(b) => DynamicImage::ImageRgb16(copy_pixels(b)),
            DynamicImage::ImageRgba16(b) => DynamicImage::ImageRgba16(copy_pixels(b)),
            _ => return Err(PixelError::UnsupportedMode),
        };
        Ok(Self {
            width: decoded.width(),
            height: decoded.height(),
            mode,
            image,
        })
    }

    #[inline]
    #[must_use]
    pub fn width(&self) -> u32 {
        self.width
    }

    #[inline]
    #[must_use]
    pub fn height(&self) -> u32 {
        self.height
    }

    #[inline]
    #[must_use]
    pub fn mode(&self) -> ColorMode {
        self.mode
    }

    /// Row-major samples.
    #[must_use]
    pub fn samples(&self) -> &[u8] {
        self.image.as_bytes()
    }

    /// 8-bit RGB samples with alpha dropped, row-major.
    #[must_use]
    pub fn to_rgb8(&self) -> Vec<u8> {
        self.image.to_rgb8().into_raw()
    }

    fn encode(&self, format: RasterFormat) -> Result<Vec<u8>, PixelError> {
        let mut encoded = Vec::new();
        match format {
            RasterFormat::Png => self
                .image
                .write_with_encoder(PngEncoder::new(&mut encoded))
                .map_err(PixelError::Encode)?,
            RasterFormat::Jpeg => self
                .image
                .write_with_encoder(JpegEncoder::new_with_quality(&mut encoded, JPEG_QUALITY))
                .map_err(PixelError::Encode)?,
        }
        Ok(encoded)
    }
}

fn copy_pixels<P: Pixel>(
    source: &ImageBuffer<P, Vec<P::Subpixel>>,
) -> ImageBuffer<P, Vec<P::Subpixel>> {
    let mut fresh = ImageBuffer::new(source.width(), source.height());
    for (x, y, pixel) in source.enumerate_pixels() {
        fresh.put_pixel(x, y, *pixel);
    }
    fresh
}

/// An encoded image produced from a [`PixelGrid`] alone.
#[derive(Debug, Clone)]
pub struct SanitizedImage {
    format: RasterFormat,
    grid: PixelGrid,
    encoded: Vec<u8>,
}

impl SanitizedImage {
    #[must_use]
    pub fn format(&self) -> RasterFormat {
        self.format
    }

    #[must_use]
    pub fn grid(&self) -> &PixelGrid {
        &self.grid
    }

    #[must_use]
    pub fn bytes(&self) -> &[u8] {
        &self.encoded
    }

    #[must_use]
    pub fn into_bytes(self) -> Vec<u8> {
        self.encoded
    }

    #[must_use]
    pub fn dimensions(&self) -> (u32, u32) {
        (self.grid.width, self.grid.height)
    }
}

#[derive(Debug, Clone, Copy)]
pub struct PixelSanitizer {
    max_pixels: u64,
}

impl Default for PixelSanitizer {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_PIXELS)
    }
}

impl PixelSanitizer {
    #[must_use]
    pub fn new(max_pixels: u64) -> Self {
        Self { max_pixels }
    }

    /// Rebuilds `bytes` in its own format.
    pub fn sanitize(&self, bytes: &[u8]) -> Result<SanitizedImage, PixelError> {
        self.sanitize_into(bytes, None)
    }

    /// Rebuilds `bytes` as `target`. A JPEG target falls back to PNG for color modes
    /// JPEG cannot hold, so the mode is never altered.
    pub fn sanitize_as(
        &self,
        bytes: &[u8],
        target: RasterFormat,
    ) -> Result<SanitizedImage, PixelError> {
        self.sanitize_into(bytes, Some(target))
    }

    fn sanitize_into(
        &self,
        bytes: &[u8],
        target: Option<RasterFormat>,
    ) -> Result<SanitizedImage, PixelError> {
        let source = image::guess_format(bytes)
            .ok()
            .and_then(RasterFormat::from_image_format)
            .ok_or(PixelError::Unsupported)?;

        self.check_dimensions(bytes)?;

        let decoded = image::load_from_memory_with_format(bytes, source.image_format())
            .map_err(PixelError::Decode)?;
        let grid = PixelGrid::rebuild(&decoded)?;
        drop(decoded);

        let mut format = target.unwrap_or(source);
        if format == RasterFormat::Jpeg && !grid.mode.jpeg_compatible() {
            format = RasterFormat::Png;
        }
        let encoded = grid.encode(format)?;

        tracing::debug!(
            source = %source,
            output = %format,
            width = grid.width,
            height = grid.height,
            in_bytes = bytes.len(),
            out_bytes = encoded.len(),
            "image rebuilt from pixels"
        );

        Ok(SanitizedImage {
            format,
            grid,
            encoded,
        })
    }

    /// Rejects oversized images from the header alone, before any pixel allocation.
    fn check_dimensions(&self, bytes: &[u8]) -> Result<(), PixelError> {
        let size = imagesize::blob_size(bytes).map_err(|e| PixelError::Header(e.to_string()))?;
        let (width, height) = (size.width as u64, size.height as u64);
        if width.saturating_mul(height) > self.max_pixels {
            return Err(PixelError::TooLarge {
                width,
                height,
                limit: self.max_pixels,
            });
        }
        Ok(())
    }
}

/// Rebuilds `bytes` in its own format under the default pixel ceiling.
pub fn sanitize(bytes: &[u8]) -> Result<SanitizedImage, PixelError> {
    PixelSanitizer::default().sanitize(bytes)
}

/// A small gradient PNG for tests that need a decodable picture.
#[cfg(test)]
pub(crate) fn test_png(width: u32, height: u32) -> Vec<u8> {
    let image = image::RgbImage::from_fn(width, height, |x, y| image::Rgb([(x * 40) as u8, (y * 40) as u8, 128]));
    let mut out = std::io::Cursor::new(Vec::new());
    DynamicImage::ImageRgb8(image)
        .write_to(&mut out, image::ImageFormat::Png)
        .expect("png encodes");
    out.into_inner()
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{GrayImage, ImageFormat, Luma, Rgb, RgbImage, Rgba, RgbaImage};
    use memchr::memmem;

    fn encode(image: DynamicImage, format: ImageFormat) -> Vec<u8> {
        let mut out = std::io::Cursor::new(Vec::new());
        image.write_to(&mut out, format).unwrap();
        out.into_inner()
    }

    fn checker_rgba(width: u32, height: u32) -> Vec<u8> {
        let image = RgbaImage::from_fn(width, height, |x, y| {
            if (x + y) % 2 == 0 {
                Rgba([255, 0, 0, 255])
            } else {
                Rgba([0, 0, 255, 128])
            }
        });
        encode(DynamicImage::ImageRgba8(image), ImageFormat::Png)
    }

    /// Inserts a tEXt chunk right after IHDR.
    fn with_text_chunk(png: &[u8], payload: &[u8]) -> Vec<u8> {
        let ihdr_end = 8 + 4 + 4 + 13 + 4;
        let mut data = b"Comment\0".to_vec();
        data.extend_from_slice(payload);

        let mut chunk = (data.len() as u32).to_be_bytes().to_vec();
        chunk.extend_from_slice(b"tEXt");
        chunk.extend_from_slice(&data);
        let mut crc = flate2::Crc::new();
        crc.update(b"tEXt");
        crc.update(&data);
        chunk.extend_from_slice(&crc.sum().to_be_bytes());

        let mut out = png[..ihdr_end].to_vec();
        out.extend_from_slice(&chunk);
        out.extend_from_slice(&png[ihdr_end..]);
        out
    }

    #[test]
    fn preserves_dimensions_and_mode() {
        let png = checker_rgba(7, 5);
        let clean = sanitize(&png).unwrap();
        assert_eq!(clean.format(), RasterFormat::Png);
        assert_eq!(clean.dimensions(), (7, 5));
        assert_eq!(clean.grid().mode(), ColorMode::Rgba8);
        assert_eq!(clean.grid().samples().len(), 7 * 5 * 4);

        let reloaded = image::load_from_memory(clean.bytes()).unwrap();
        assert_eq!(reloaded.to_rgba8().get_pixel(1, 0), &Rgba([0, 0, 255, 128]));
    }

    #[test]
    fn gray_jpeg_stays_gray_jpeg() {
        let gray = GrayImage::from_fn(16, 16, |x, _| Luma([(x * 16) as u8]));
        let jpeg = encode(DynamicImage::ImageLuma8(gray), ImageFormat::Jpeg);
        let clean = sanitize(&jpeg).unwrap();
        assert_eq!(clean.format(), RasterFormat::Jpeg);
        assert_eq!(clean.grid().mode(), ColorMode::L8);
        assert_eq!(&clean.bytes()[..2], &[0xFF, 0xD8]);
    }

    #[test]
    fn appended_payload_removed() {
        let rgb = RgbImage::from_pixel(8, 8, Rgb([10, 20, 30]));
        let mut png = encode(DynamicImage::ImageRgb8(rgb), ImageFormat::Png);
        png.extend_from_slice(b"<script>payload()</script>");

        let clean = sanitize(&png).unwrap();
        assert!(memmem::find(clean.bytes(), b"payload").is_none());
        assert!(clean.bytes().ends_with(RasterFormat::Png.terminator()));
    }

    #[test]
    fn text_chunk_removed() {
        let png = with_text_chunk(&checker_rgba(4, 4), b"SECRET-MARKER");
        assert!(memmem::find(&png, b"SECRET-MARKER").is_some());

        let clean = sanitize(&png).unwrap();
        assert!(memmem::find(clean.bytes(), b"SECRET-MARKER").is_none());
        assert!(memmem::find(clean.bytes(), b"tEXt").is_none());
        assert_eq!(clean.dimensions(), (4, 4));
    }

    #[test]
    fn converts_to_requested_format() {
        let rgb = RgbImage::from_pixel(4, 3, Rgb([200, 100, 50]));
        let png = encode(DynamicImage::ImageRgb8(rgb), ImageFormat::Png);
        let clean = PixelSanitizer::default().sanitize_as(&png, RasterFormat::Jpeg).unwrap();
        assert_eq!(clean.format(), RasterFormat::Jpeg);
        assert_eq!(clean.dimensions(), (4, 3));

        // Alpha cannot go into JPEG.
        let clean = PixelSanitizer::default()
            .sanitize_as(&checker_rgba(2, 2), RasterFormat::Jpeg)
            .unwrap();
        assert_eq!(clean.format(), RasterFormat::Png);
    }

    #[test]
    fn ceiling_rejects_before_decode() {
        let png = checker_rgba(10, 10);
        let err = PixelSanitizer::new(50).sanitize(&png).unwrap_err();
        assert!(matches!(err, PixelError::TooLarge { width: 10, height: 10, limit: 50 }));
    }

    #[test]
    fn garbage_rejected() {
        assert!(matches!(sanitize(b"not an image"), Err(PixelError::Unsupported)));

        let mut truncated = checker_rgba(8, 8);
        truncated.truncate(40);
        assert!(matches!(
            sanitize(&truncated),
            Err(PixelError::Decode(_) | PixelError::Header(_))
        ));
    }
}
