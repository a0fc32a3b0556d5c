use serde::Serialize;

/// Raster containers accepted as standalone inputs and carved out of legacy documents.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum RasterFormat {
    Jpeg,
    Png,
}

impl RasterFormat {
    pub const ALL: [RasterFormat; 2] = [Self::Jpeg, Self::Png];

    #[must_use]
    pub const fn extension(&self) -> &'static str {
        match self {
            Self::Jpeg => "jpg",
            Self::Png => "png",
        }
    }

    /// Start markers. JPEG carries one per application segment the sniffer accepts.
    #[must_use]
    pub const fn signatures(&self) -> &'static [&'static [u8]] {
        match self {
            Self::Jpeg => &[
                &[0xFF, 0xD8, 0xFF, 0xE0],
                &[0xFF, 0xD8, 0xFF, 0xE1],
                &[0xFF, 0xD8, 0xFF, 0xDB],
                &[0xFF, 0xD8, 0xFF, 0xEE],
            ],
            Self::Png => &[&[0x89, 0x50, 0x4E, 0x47, 0x0D, 0x0A, 0x1A, 0x0A]],
        }
    }

    #[must_use]
    pub const fn terminator(&self) -> &'static [u8] {
        match self {
            Self::Jpeg => &[0xFF, 0xD9],
            Self::Png => &[0x49, 0x45, 0x4E, 0x44, 0xAE, 0x42, 0x60, 0x82],
        }
    }

    #[must_use]
    pub const fn mime(&self) -> &'static str {
        match self {
            Self::Jpeg => "image/jpeg",
            Self::Png => "image/png",
        }
    }

    #[must_use]
    pub const fn name(&self) -> &'static str {
        match self {
            Self::Jpeg => "JPEG",
            Self::Png => "PNG",
        }
    }

    #[must_use]
    pub const fn image_format(&self) -> image::ImageFormat {
        match self {
            Self::Jpeg => image::ImageFormat::Jpeg,
            Self::Png => image::ImageFormat::Png,
        }
    }

    #[must_use]
    pub fn from_image_format(format: image::ImageFormat) -> Option<Self> {
        match format {
            image::ImageFormat::Jpeg => Some(Self::Jpeg),
            image::ImageFormat::Png => Some(Self::Png),
            _ => None,
        }
    }
}

impl std::fmt::Display for RasterFormat {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.name())
    }
}

/// Closed catalog of input types. Anything else is `Unknown` and never processed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FileType {
    Image(RasterFormat),
    Doc,
    Xls,
    Ppt,
    Docx,
    Xlsx,
    Pptx,
    Docm,
    Xlsm,
    Pptm,
    Odt,
    Ott,
    Ods,
    Odp,
    Pdf,
    Rtf,
    Unknown,
}

impl FileType {
    #[must_use]
    pub const fn extension(&self) -> &'static str {
        match self {
            Self::Image(format) => format.extension(),
            Self::Doc => "doc",
            Self::Xls => "xls",
            Self::Ppt => "ppt",
            Self::Docx => "docx",
            Self::Xlsx => "xlsx",
            Self::Pptx => "pptx",
            Self::Docm => "docm",
            Self::Xlsm => "xlsm",
            Self::Pptm => "pptm",
            Self::Odt => "odt",
            Self::Ott => "ott",
            Self::Ods => "ods",
            Self::Odp => "odp",
            Self::Pdf => "pdf",
            Self::Rtf => "rtf",
            Self::Unknown => "bin",
        }
    }

    #[must_use]
    pub const fn family(&self) -> Option<Family> {
        match self {
            Self::Image(_) => Some(Family::Raster),
            Self::Docx | Self::Docm => Some(Family::WordProcessing),
            Self::Xlsx | Self::Xlsm => Some(Family::Spreadsheet),
            Self::Pptx | Self::Pptm => Some(Family::Presentation),
            Self::Odt | Self::Ott | Self::Ods | Self::Odp => Some(Family::OpenDocument),
            Self::Doc | Self::Rtf | Self::Xls | Self::Ppt => Some(Family::LegacyBinary),
            Self::Pdf => Some(Family::Portable),
            Self::Unknown => None,
        }
    }

    #[must_use]
    pub const fn is_known(&self) -> bool {
        !matches!(self, Self::Unknown)
    }
}

impl std::fmt::Display for FileType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Unknown => write!(f, "unknown"),
            other => write!(f, "{}", other.extension()),
        }
    }
}

impl Serialize for FileType {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

/// Groups of file types sharing one extract/rebuild implementation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum Family {
    Raster,
    WordProcessing,
    Spreadsheet,
    Presentation,
    OpenDocument,
    LegacyBinary,
    Portable,
}

impl Family {
    #[must_use]
    pub const fn name(&self) -> &'static str {
        match self {
            Self::Raster => "raster",
            Self::WordProcessing => "word-processing",
            Self::Spreadsheet => "spreadsheet",
            Self::Presentation => "presentation",
            Self::OpenDocument => "open-document",
            Self::LegacyBinary => "legacy-binary",
            Self::Portable => "portable",
        }
    }
}

impl std::fmt::Display for Family {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.name())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_extension() {
        assert_eq!(RasterFormat::Jpeg.extension(), "jpg");
        assert_eq!(RasterFormat::Png.extension(), "png");
        assert_eq!(FileType::Image(RasterFormat::Png).extension(), "png");
        assert_eq!(FileType::Docm.extension(), "docm");
        assert_eq!(FileType::Unknown.extension(), "bin");
    }

    #[test]
    fn test_terminator_bytes() {
        assert_eq!(RasterFormat::Jpeg.terminator(), &[0xFF, 0xD9]);
        assert_eq!(RasterFormat::Png.terminator().len(), 8);
        assert_eq!(RasterFormat::Jpeg.signatures().len(), 4);
    }

    #[test]
    fn test_family_mapping() {
        assert_eq!(FileType::Ott.family(), Some(Family::OpenDocument));
        assert_eq!(FileType::Rtf.family(), Some(Family::LegacyBinary));
        assert_eq!(FileType::Pptm.family(), Some(Family::Presentation));
        assert_eq!(FileType::Unknown.family(), None);
    }

    #[test]
    fn test_display() {
        assert_eq!(format!("{}", RasterFormat::Jpeg), "JPEG");
        assert_eq!(format!("{}", FileType::Xlsm), "xlsm");
        assert_eq!(format!("{}", FileType::Unknown), "unknown");
    }
}
