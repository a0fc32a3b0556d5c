//! Thin reading helpers over `quick-xml` shared by the package parsers, plus escaping
//! for the writers.

use std::borrow::Cow;

use quick_xml::Reader;
use quick_xml::events::{BytesStart, BytesText, Event};

use crate::error::ExtractionFailure;

/// Pull reader over one package part. Empty elements are reported as start/end pairs.
pub struct XmlReader<'a> {
    reader: Reader<&'a [u8]>,
    part: &'a str,
}

impl<'a> XmlReader<'a> {
    pub fn new(xml: &'a str, part: &'a str) -> Self {
        let mut reader = Reader::from_str(xml);
        reader.expand_empty_elements(true);
        Self { reader, part }
    }

    #[must_use]
    pub fn part(&self) -> &'a str {
        self.part
    }

    pub fn next(&mut self) -> Result<Event<'a>, ExtractionFailure> {
        let event = self.reader.read_event().map_err(|e| self.error(e))?;
        Ok(event)
    }

    pub fn error(&self, e: impl std::fmt::Display) -> ExtractionFailure {
        ExtractionFailure::Xml {
            part: self.part.to_string(),
            message: format!("{e} at byte {}", self.reader.buffer_position()),
        }
    }

    pub fn eof(&self) -> ExtractionFailure {
        self.error("unexpected end of document")
    }

    pub fn unescape(&self, text: &BytesText<'_>) -> Result<String, ExtractionFailure> {
        text.unescape()
            .map(Cow::into_owned)
            .map_err(|e| self.error(e))
    }

    /// Consumes everything up to and including the end of the element just started.
    pub fn skip(&mut self) -> Result<(), ExtractionFailure> {
        let mut depth = 0usize;
        loop {
            match self.next()? {
                Event::Start(_) => depth += 1,
                Event::End(_) if depth == 0 => return Ok(()),
                Event::End(_) => depth -= 1,
                Event::Eof => return Err(self.eof()),
                _ => {}
            }
        }
    }

    /// Concatenated character data of the element just started, including descendants.
    pub fn text(&mut self) -> Result<String, ExtractionFailure> {
        let mut out = String::new();
        let mut depth = 0usize;
        loop {
            match self.next()? {
                Event::Text(t) => out.push_str(&self.unescape(&t)?),
                Event::CData(c) => out.push_str(&String::from_utf8_lossy(&c.into_inner())),
                Event::Start(_) => depth += 1,
                Event::End(_) if depth == 0 => return Ok(out),
                Event::End(_) => depth -= 1,
                Event::Eof => return Err(self.eof()),
                _ => {}
            }
        }
    }

    /// Advances to the first element named `local` and returns it, or `None` at EOF.
    pub fn find(&mut self, local: &[u8]) -> Result<Option<BytesStart<'a>>, ExtractionFailure> {
        loop {
            match self.next()? {
                Event::Start(e) if e.local_name().as_ref() == local => return Ok(Some(e)),
                Event::Eof => return Ok(None),
                _ => {}
            }
        }
    }
}

/// Value of the attribute whose local name is `local`, ignoring its prefix.
#[must_use]
pub fn attr(element: &BytesStart<'_>, local: &[u8]) -> Option<String> {
    element
        .attributes()
        .flatten()
        .find(|a| a.key.local_name().as_ref() == local)
        .and_then(|a| a.unescape_value().ok().map(Cow::into_owned))
}

/// Value of a namespace-prefixed attribute such as `r:id`, skipping an unprefixed
/// attribute with the same local name.
#[must_use]
pub fn prefixed_attr(element: &BytesStart<'_>, local: &[u8]) -> Option<String> {
    element
        .attributes()
        .flatten()
        .find(|a| a.key.prefix().is_some() && a.key.local_name().as_ref() == local)
        .and_then(|a| a.unescape_value().ok().map(Cow::into_owned))
}

/// Value of the attribute with exactly this qualified name.
#[must_use]
pub fn qattr(element: &BytesStart<'_>, qname: &[u8]) -> Option<String> {
    element
        .attributes()
        .flatten()
        .find(|a| a.key.as_ref() == qname)
        .and_then(|a| a.unescape_value().ok().map(Cow::into_owned))
}

#[must_use]
pub fn local(element: &BytesStart<'_>) -> Vec<u8> {
    element.local_name().as_ref().to_vec()
}

#[must_use]
pub fn local_str(element: &BytesStart<'_>) -> String {
    String::from_utf8_lossy(element.local_name().as_ref()).into_owned()
}

/// Escapes `text` for element content or attribute values, dropping characters XML 1.0
/// cannot carry at all.
#[must_use]
pub fn escape(text: &str) -> String {
    let valid: Cow<'_, str> = if text.chars().all(is_xml_char) {
        Cow::Borrowed(text)
    } else {
        Cow::Owned(text.chars().filter(|&c| is_xml_char(c)).collect())
    };
    quick_xml::escape::escape(&valid).into_owned()
}

fn is_xml_char(c: char) -> bool {
    matches!(c,
        '\u{9}' | '\u{A}' | '\u{D}'
        | '\u{20}'..='\u{D7FF}'
        | '\u{E000}'..='\u{FFFD}'
        | '\u{10000}'..='\u{10FFFF}')
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn text_collects_descendants() {
        let xml = r#"<p>Hello <b>bold &amp; <i>deep</i></b><![CDATA[<raw>]]></p><q/>"#;
        let mut reader = XmlReader::new(xml, "test.xml");
        assert!(reader.find(b"p").unwrap().is_some());
        assert_eq!(reader.text().unwrap(), "Hello bold & deep<raw>");
        let q = reader.find(b"q").unwrap().unwrap();
        assert_eq!(local(&q), b"q");
    }

    #[test]
    fn skip_consumes_subtree() {
        let xml = "<root><skip><a/><b>x</b></skip><keep/></root>";
        let mut reader = XmlReader::new(xml, "test.xml");
        reader.find(b"skip").unwrap();
        reader.skip().unwrap();
        match reader.next().unwrap() {
            Event::Start(e) => assert_eq!(local_str(&e), "keep"),
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn attributes_by_local_name() {
        let xml = r#"<a:blip xmlns:a="x" xmlns:r="y" r:embed="rId7" name="p&amp;q"/>"#;
        let mut reader = XmlReader::new(xml, "test.xml");
        let blip = reader.find(b"blip").unwrap().unwrap();
        assert_eq!(attr(&blip, b"embed").as_deref(), Some("rId7"));
        assert_eq!(qattr(&blip, b"r:embed").as_deref(), Some("rId7"));
        assert_eq!(attr(&blip, b"name").as_deref(), Some("p&q"));
        assert_eq!(attr(&blip, b"missing"), None);

        let xml = r#"<p:sldId xmlns:r="y" id="256" r:id="rId2"/>"#;
        let mut reader = XmlReader::new(xml, "test.xml");
        let slide = reader.find(b"sldId").unwrap().unwrap();
        assert_eq!(attr(&slide, b"id").as_deref(), Some("256"));
        assert_eq!(prefixed_attr(&slide, b"id").as_deref(), Some("rId2"));
    }

    #[test]
    fn truncated_document_errors() {
        let mut reader = XmlReader::new("<a><b>", "broken.xml");
        reader.find(b"a").unwrap();
        let err = reader.skip().unwrap_err();
        assert!(matches!(err, ExtractionFailure::Xml { ref part, .. } if part == "broken.xml"));
    }

    #[test]
    fn escape_drops_control_chars() {
        assert_eq!(escape("a<b & \"c\"\u{1}\u{0}"), "a&lt;b &amp; &quot;c&quot;");
        assert_eq!(escape("tab\there"), "tab\there");
    }
}
