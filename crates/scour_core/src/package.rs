//! Zip-based package access: bounded reads from an untrusted source archive, and a
//! writer for freshly built packages.

use std::collections::HashMap;
use std::io::{Cursor, Read, Write};

use quick_xml::events::Event;
use zip::write::SimpleFileOptions;
use zip::{CompressionMethod, ZipArchive, ZipWriter};

use crate::config::Limits;
use crate::error::{ExtractionFailure, RebuildFailure};
use crate::xml::{XmlReader, attr};

pub struct PackageReader {
    archive: ZipArchive<Cursor<Vec<u8>>>,
    max_entry_bytes: u64,
}

impl PackageReader {
    pub fn new(bytes: Vec<u8>, limits: &Limits) -> Result<Self, ExtractionFailure> {
        let archive = ZipArchive::new(Cursor::new(bytes))?;
        Ok(Self {
            archive,
            max_entry_bytes: limits.max_entry_bytes,
        })
    }

    #[must_use]
    pub fn contains(&self, name: &str) -> bool {
        self.archive.file_names().any(|n| n == name)
    }

    /// Entry names starting with `prefix`, sorted.
    #[must_use]
    pub fn names_under(&self, prefix: &str) -> Vec<String> {
        let mut names: Vec<String> = self
            .archive
            .file_names()
            .filter(|n| n.starts_with(prefix))
            .map(str::to_string)
            .collect();
        names.sort();
        names
    }

    /// Reads one entry, never inflating more than the configured ceiling.
    pub fn read(&mut self, name: &str) -> Result<Vec<u8>, ExtractionFailure> {
        let limit = self.max_entry_bytes;
        let entry = match self.archive.by_name(name) {
            Ok(entry) => entry,
            Err(zip::result::ZipError::FileNotFound) => {
                return Err(ExtractionFailure::MissingPart(name.to_string()));
            }
            Err(e) => return Err(e.into()),
        };
        let too_large = || ExtractionFailure::PartTooLarge {
            part: name.to_string(),
            limit,
        };
        if entry.size() > limit {
            return Err(too_large());
        }

        let mut buffer = Vec::with_capacity(entry.size() as usize);
        entry
            .take(limit.saturating_add(1))
            .read_to_end(&mut buffer)
            .map_err(|e| ExtractionFailure::Malformed(format!("{name}: {e}")))?;
        if buffer.len() as u64 > limit {
            return Err(too_large());
        }
        Ok(buffer)
    }

    pub fn read_string(&mut self, name: &str) -> Result<String, ExtractionFailure> {
        let bytes = self.read(name)?;
        String::from_utf8(bytes)
            .map_err(|_| ExtractionFailure::Malformed(format!("{name} is not UTF-8")))
    }

    /// Like [`read`](Self::read), but a missing entry is `None`.
    pub fn try_read(&mut self, name: &str) -> Result<Option<Vec<u8>>, ExtractionFailure> {
        match self.read(name) {
            Ok(bytes) => Ok(Some(bytes)),
            Err(ExtractionFailure::MissingPart(_)) => Ok(None),
            Err(e) => Err(e),
        }
    }

    /// Relationships of `part`; an absent relationships part is an empty set.
    pub fn relationships(&mut self, part: &str) -> Result<Relationships, ExtractionFailure> {
        let rels_name = rels_path(part);
        match self.try_read(&rels_name)? {
            Some(bytes) => {
                let xml = String::from_utf8_lossy(&bytes).into_owned();
                Relationships::parse(&xml, &rels_name, parent_dir(part))
            }
            None => Ok(Relationships::default()),
        }
    }
}

/// Builds a new zip package in memory.
pub struct PackageWriter {
    zip: ZipWriter<Cursor<Vec<u8>>>,
}

impl Default for PackageWriter {
    fn default() -> Self {
        Self::new()
    }
}

impl PackageWriter {
    #[must_use]
    pub fn new() -> Self {
        Self {
            zip: ZipWriter::new(Cursor::new(Vec::new())),
        }
    }

    pub fn stored(&mut self, name: &str, bytes: &[u8]) -> Result<(), RebuildFailure> {
        self.add(name, bytes, CompressionMethod::Stored)
    }

    pub fn deflated(&mut self, name: &str, bytes: &[u8]) -> Result<(), RebuildFailure> {
        self.add(name, bytes, CompressionMethod::Deflated)
    }

    fn add(
        &mut self,
        name: &str,
        bytes: &[u8],
        method: CompressionMethod,
    ) -> Result<(), RebuildFailure> {
        let options = SimpleFileOptions::default().compression_method(method);
        self.zip.start_file(name, options)?;
        self.zip.write_all(bytes)?;
        Ok(())
    }

    pub fn finish(self) -> Result<Vec<u8>, RebuildFailure> {
        Ok(self.zip.finish()?.into_inner())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Relationship {
    /// Package-absolute part name, without a leading slash.
    pub target: String,
    pub kind: String,
}

#[derive(Debug, Clone, Default)]
pub struct Relationships {
    by_id: HashMap<String, Relationship>,
}

impl Relationships {
    /// Parses a relationships part. External targets are never followed and are dropped.
    pub fn parse(xml: &str, part: &str, base_dir: &str) -> Result<Self, ExtractionFailure> {
        let mut reader = XmlReader::new(xml, part);
        let mut by_id = HashMap::new();
        loop {
            match reader.next()? {
                Event::Start(e) if e.local_name().as_ref() == b"Relationship" => {
                    let external = attr(&e, b"TargetMode").is_some_and(|m| m == "External");
                    let (Some(id), Some(target)) = (attr(&e, b"Id"), attr(&e, b"Target")) else {
                        continue;
                    };
                    if external {
                        continue;
                    }
                    let Some(target) = resolve_part(base_dir, &target) else {
                        continue;
                    };
                    let kind = attr(&e, b"Type")
                        .and_then(|t| t.rsplit('/').next().map(str::to_string))
                        .unwrap_or_default();
                    by_id.insert(id, Relationship { target, kind });
                }
                Event::Eof => break,
                _ => {}
            }
        }
        Ok(Self { by_id })
    }

    #[must_use]
    pub fn get(&self, id: &str) -> Option<&Relationship> {
        self.by_id.get(id)
    }

    #[must_use]
    pub fn target(&self, id: &str) -> Option<&str> {
        self.get(id).map(|r| r.target.as_str())
    }

    /// First relationship of the given type (last path segment of the type URI).
    #[must_use]
    pub fn first_of_kind(&self, kind: &str) -> Option<&Relationship> {
        let mut matching: Vec<(&String, &Relationship)> =
            self.by_id.iter().filter(|(_, r)| r.kind == kind).collect();
        matching.sort_by(|a, b| a.0.cmp(b.0));
        matching.first().map(|(_, r)| *r)
    }
}

/// `word/document.xml` -> `word/_rels/document.xml.rels`.
#[must_use]
pub fn rels_path(part: &str) -> String {
    match part.rsplit_once('/') {
        Some((dir, file)) => format!("{dir}/_rels/{file}.rels"),
        None => format!("_rels/{part}.rels"),
    }
}

#[must_use]
pub fn parent_dir(part: &str) -> &str {
    part.rsplit_once('/').map_or("", |(dir, _)| dir)
}

/// Resolves `target` against `base_dir` inside the package. Targets escaping the
/// package root yield `None`.
#[must_use]
pub fn resolve_part(base_dir: &str, target: &str) -> Option<String> {
    let (mut segments, target) = match target.strip_prefix('/') {
        Some(absolute) => (Vec::new(), absolute),
        None => (
            base_dir.split('/').filter(|s| !s.is_empty()).collect::<Vec<_>>(),
            target,
        ),
    };
    for segment in target.split('/') {
        match segment {
            "" | "." => {}
            ".." => {
                segments.pop()?;
            }
            other => segments.push(other),
        }
    }
    if segments.is_empty() {
        return None;
    }
    Some(segments.join("/"))
}

#[cfg(test)]
mod tests {
    use super::*;

    const RELS: &str = r#"<?xml version="1.0" encoding="UTF-8" standalone="yes"?>
<Relationships xmlns="http://schemas.openxmlformats.org/package/2006/relationships">
  <Relationship Id="rId2" Type="http://schemas.openxmlformats.org/officeDocument/2006/relationships/image" Target="media/image1.png"/>
  <Relationship Id="rId3" Type="http://schemas.openxmlformats.org/officeDocument/2006/relationships/hyperlink" Target="http://example.com/" TargetMode="External"/>
  <Relationship Id="rId4" Type="http://schemas.openxmlformats.org/officeDocument/2006/relationships/image" Target="../media/shared.jpeg"/>
  <Relationship Id="rId5" Type="http://schemas.openxmlformats.org/officeDocument/2006/relationships/image" Target="../../../etc/passwd"/>
</Relationships>"#;

    #[test]
    fn relationships_resolved() {
        let rels = Relationships::parse(RELS, "word/_rels/document.xml.rels", "word").unwrap();
        assert_eq!(rels.target("rId2"), Some("word/media/image1.png"));
        assert_eq!(rels.target("rId4"), Some("media/shared.jpeg"));
        assert_eq!(rels.get("rId2").map(|r| r.kind.as_str()), Some("image"));
        assert!(rels.get("rId3").is_none());
        assert!(rels.get("rId5").is_none());
        assert_eq!(rels.first_of_kind("image").map(|r| r.target.as_str()), Some("word/media/image1.png"));
    }

    #[test]
    fn part_paths() {
        assert_eq!(rels_path("word/document.xml"), "word/_rels/document.xml.rels");
        assert_eq!(rels_path("content.xml"), "_rels/content.xml.rels");
        assert_eq!(parent_dir("ppt/slides/slide1.xml"), "ppt/slides");
        assert_eq!(resolve_part("ppt/slides", "/ppt/media/a.png").as_deref(), Some("ppt/media/a.png"));
        assert_eq!(resolve_part("", "./xl/workbook.xml").as_deref(), Some("xl/workbook.xml"));
        assert_eq!(resolve_part("a", ".."), None);
    }

    #[test]
    fn write_then_read_package() {
        let mut writer = PackageWriter::new();
        writer.stored("mimetype", b"application/test").unwrap();
        writer.deflated("dir/data.xml", &[b'x'; 4096]).unwrap();
        let bytes = writer.finish().unwrap();

        let mut reader = PackageReader::new(bytes, &Limits::default()).unwrap();
        assert!(reader.contains("mimetype"));
        assert_eq!(reader.read("mimetype").unwrap(), b"application/test");
        assert_eq!(reader.names_under("dir/"), vec!["dir/data.xml".to_string()]);
        assert!(matches!(reader.read("absent"), Err(ExtractionFailure::MissingPart(_))));
        assert!(reader.try_read("absent").unwrap().is_none());
    }

    #[test]
    fn entry_ceiling_enforced() {
        let mut writer = PackageWriter::new();
        writer.deflated("big.bin", &vec![0u8; 10_000]).unwrap();
        let bytes = writer.finish().unwrap();

        let limits = Limits {
            max_entry_bytes: 1_000,
            ..Limits::default()
        };
        let mut reader = PackageReader::new(bytes, &limits).unwrap();
        assert!(matches!(
            reader.read("big.bin"),
            Err(ExtractionFailure::PartTooLarge { limit: 1_000, .. })
        ));
    }

    #[test]
    fn not_a_zip() {
        assert!(matches!(
            PackageReader::new(b"plain text".to_vec(), &Limits::default()),
            Err(ExtractionFailure::Archive(_))
        ));
    }
}
