//! Text extraction for uploaded documents (plain text, PDF, DOCX).
//!
//! The pipeline treats extraction as a single `bytes -> UTF-8 text` step.
//! The format is decided up front from the filename extension, so unsupported
//! uploads are rejected before a job exists.

use std::io::Read;

use serde::{Deserialize, Serialize};

/// Maximum decompressed bytes read from `word/document.xml` (zip-bomb protection).
const MAX_XML_ENTRY_BYTES: u64 = 50 * 1024 * 1024;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SourceFormat {
    PlainText,
    Pdf,
    Docx,
}

impl SourceFormat {
    /// Every extension the extractor understands.
    pub const ALL_EXTENSIONS: [&'static str; 3] = ["txt", "pdf", "docx"];

    /// Format for a filename, by case-insensitive extension.
    pub fn from_filename(filename: &str) -> Option<Self> {
        let (_, ext) = filename.rsplit_once('.')?;
        Self::from_extension(ext)
    }

    pub fn from_extension(ext: &str) -> Option<Self> {
        match ext.to_ascii_lowercase().as_str() {
            "txt" => Some(SourceFormat::PlainText),
            "pdf" => Some(SourceFormat::Pdf),
            "docx" => Some(SourceFormat::Docx),
            _ => None,
        }
    }

    pub fn extension(&self) -> &'static str {
        match self {
            SourceFormat::PlainText => "txt",
            SourceFormat::Pdf => "pdf",
            SourceFormat::Docx => "docx",
        }
    }
}

#[derive(Debug)]
pub enum ExtractError {
    Utf8(String),
    Pdf(String),
    Docx(String),
}

impl std::fmt::Display for ExtractError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ExtractError::Utf8(e) => write!(f, "text is not valid UTF-8: {}", e),
            ExtractError::Pdf(e) => write!(f, "PDF extraction failed: {}", e),
            ExtractError::Docx(e) => write!(f, "DOCX extraction failed: {}", e),
        }
    }
}

impl std::error::Error for ExtractError {}

/// Extracts normalized UTF-8 text from raw upload bytes.
///
/// Line endings are normalized to `\n` and trailing whitespace is trimmed,
/// so the char offsets detectors report are stable across platforms.
pub fn extract_text(bytes: &[u8], format: SourceFormat) -> Result<String, ExtractError> {
    let raw = match format {
        SourceFormat::PlainText => extract_plain(bytes)?,
        SourceFormat::Pdf => extract_pdf(bytes)?,
        SourceFormat::Docx => extract_docx(bytes)?,
    };
    Ok(normalize(&raw))
}

/// Normalizes text supplied directly (no file), same rules as [`extract_text`].
pub fn normalize(text: &str) -> String {
    let text = text.strip_prefix('\u{feff}').unwrap_or(text);
    text.replace("\r\n", "\n").trim_end().to_string()
}

fn extract_plain(bytes: &[u8]) -> Result<String, ExtractError> {
    std::str::from_utf8(bytes)
        .map(str::to_string)
        .map_err(|e| ExtractError::Utf8(e.to_string()))
}

fn extract_pdf(bytes: &[u8]) -> Result<String, ExtractError> {
    pdf_extract::extract_text_from_mem(bytes).map_err(|e| ExtractError::Pdf(e.to_string()))
}

fn extract_docx(bytes: &[u8]) -> Result<String, ExtractError> {
    let mut archive = zip::ZipArchive::new(std::io::Cursor::new(bytes))
        .map_err(|e| ExtractError::Docx(e.to_string()))?;
    let entry = archive
        .by_name("word/document.xml")
        .map_err(|_| ExtractError::Docx("word/document.xml not found".to_string()))?;

    let mut xml = Vec::new();
    entry
        .take(MAX_XML_ENTRY_BYTES)
        .read_to_end(&mut xml)
        .map_err(|e| ExtractError::Docx(e.to_string()))?;
    if xml.len() as u64 >= MAX_XML_ENTRY_BYTES {
        return Err(ExtractError::Docx(
            "word/document.xml exceeds size limit".to_string(),
        ));
    }

    docx_body_text(&xml)
}

/// Walks WordprocessingML: `w:t` runs become text, `w:tab` a tab, and each
/// closed `w:p` paragraph a newline.
fn docx_body_text(xml: &[u8]) -> Result<String, ExtractError> {
    use quick_xml::events::Event;

    let mut out = String::new();
    let mut reader = quick_xml::Reader::from_reader(xml);
    let mut buf = Vec::new();
    let mut in_text = false;
    loop {
        match reader.read_event_into(&mut buf) {
            Ok(Event::Start(e)) if e.local_name().as_ref() == b"t" => in_text = true,
            Ok(Event::Text(te)) if in_text => {
                let text = te
                    .unescape()
                    .map_err(|e| ExtractError::Docx(e.to_string()))?;
                out.push_str(&text);
            }
            Ok(Event::End(e)) => match e.local_name().as_ref() {
                b"t" => in_text = false,
                b"p" => out.push('\n'),
                _ => {}
            },
            Ok(Event::Empty(e)) => match e.local_name().as_ref() {
                b"tab" => out.push('\t'),
                b"br" => out.push('\n'),
                _ => {}
            },
            Ok(Event::Eof) => break,
            Err(e) => return Err(ExtractError::Docx(e.to_string())),
            _ => {}
        }
        buf.clear();
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn docx_with_body(body: &str) -> Vec<u8> {
        let mut buf = Vec::new();
        {
            let mut zip = zip::ZipWriter::new(std::io::Cursor::new(&mut buf));
            zip.start_file(
                "word/document.xml",
                zip::write::SimpleFileOptions::default(),
            )
            .unwrap();
            let xml = format!(
                "<?xml version=\"1.0\"?><w:document xmlns:w=\"http://schemas.openxmlformats.org/wordprocessingml/2006/main\"><w:body>{}</w:body></w:document>",
                body
            );
            zip.write_all(xml.as_bytes()).unwrap();
            zip.finish().unwrap();
        }
        buf
    }

    #[test]
    fn format_from_filename_is_case_insensitive() {
        assert_eq!(
            SourceFormat::from_filename("Essay.DOCX"),
            Some(SourceFormat::Docx)
        );
        assert_eq!(
            SourceFormat::from_filename("notes.txt"),
            Some(SourceFormat::PlainText)
        );
        assert_eq!(SourceFormat::from_filename("paper.pdf"), Some(SourceFormat::Pdf));
        assert_eq!(SourceFormat::from_filename("slides.pptx"), None);
        assert_eq!(SourceFormat::from_filename("README"), None);
    }

    #[test]
    fn plain_text_is_normalized() {
        let text = extract_text(b"\xef\xbb\xbfline one\r\nline two  \n\n", SourceFormat::PlainText)
            .unwrap();
        assert_eq!(text, "line one\nline two");
    }

    #[test]
    fn invalid_utf8_is_an_error() {
        let err = extract_text(&[0x66, 0xff, 0x6f], SourceFormat::PlainText).unwrap_err();
        assert!(matches!(err, ExtractError::Utf8(_)));
    }

    #[test]
    fn invalid_pdf_returns_error() {
        let err = extract_text(b"not a pdf", SourceFormat::Pdf).unwrap_err();
        assert!(matches!(err, ExtractError::Pdf(_)));
    }

    #[test]
    fn invalid_zip_returns_error_for_docx() {
        let err = extract_text(b"not a zip", SourceFormat::Docx).unwrap_err();
        assert!(matches!(err, ExtractError::Docx(_)));
    }

    #[test]
    fn docx_paragraphs_become_lines() {
        let bytes = docx_with_body(
            "<w:p><w:r><w:t>First</w:t></w:r><w:r><w:tab/><w:t xml:space=\"preserve\"> para</w:t></w:r></w:p><w:p><w:r><w:t>Second &amp; last</w:t></w:r></w:p>",
        );
        let text = extract_text(&bytes, SourceFormat::Docx).unwrap();
        assert_eq!(text, "First\t para\nSecond & last");
    }

    #[test]
    fn docx_without_document_xml_is_an_error() {
        let mut buf = Vec::new();
        {
            let mut zip = zip::ZipWriter::new(std::io::Cursor::new(&mut buf));
            zip.start_file("other.xml", zip::write::SimpleFileOptions::default())
                .unwrap();
            zip.write_all(b"<x/>").unwrap();
            zip.finish().unwrap();
        }
        let err = extract_text(&buf, SourceFormat::Docx).unwrap_err();
        assert!(err.to_string().contains("word/document.xml not found"));
    }
}
