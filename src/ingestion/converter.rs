//! Conversion from uploaded files to markdown plus an optional structural tree.
//!
//! [`DocumentConverter`] is the seam to the external conversion capability. [`LocalConverter`]
//! handles common formats in-process; [`super::docling::DoclingConverter`] delegates to a
//! docling-serve instance with OCR and table-structure support.

use super::types::{ConversionError, SourceFormat};
use async_trait::async_trait;
use quick_xml::{Reader, events::Event};
use scraper::{Html, Selector};
use serde_json::{Value, json};
use std::io::{Cursor, Read};
use std::path::Path;

/// Upper bound on decompressed bytes read from a single OOXML entry.
const MAX_XML_ENTRY_BYTES: u64 = 50 * 1024 * 1024;

/// Knobs forwarded to the conversion backend.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ConversionOptions {
    /// Run OCR on bitmap content.
    pub do_ocr: bool,
    /// Recover table structure.
    pub do_table_structure: bool,
    /// Resolution multiplier for rendered page images.
    pub images_scale: f32,
}

impl Default for ConversionOptions {
    fn default() -> Self {
        Self {
            do_ocr: true,
            do_table_structure: true,
            images_scale: 1.0,
        }
    }
}

/// Output of a successful conversion.
#[derive(Debug, Clone, Default)]
pub struct Conversion {
    /// Normalized markdown text.
    pub markdown: String,
    /// Best-effort structural representation.
    pub structure: Option<Value>,
}

/// External conversion capability.
#[async_trait]
pub trait DocumentConverter: Send + Sync {
    /// Convert the file at `path` into markdown and, when available, a structural tree.
    async fn convert(
        &self,
        path: &Path,
        content_type: &str,
        options: &ConversionOptions,
    ) -> Result<Conversion, ConversionError>;
}

/// In-process converter for PDFs with a text layer, DOCX, HTML, plain text, and images.
///
/// Images and scanned PDFs yield little or no text; the OCR fallback covers them.
#[derive(Debug, Default, Clone, Copy)]
pub struct LocalConverter;

impl LocalConverter {
    /// Construct a local converter.
    pub const fn new() -> Self {
        Self
    }
}

#[async_trait]
impl DocumentConverter for LocalConverter {
    async fn convert(
        &self,
        path: &Path,
        content_type: &str,
        _options: &ConversionOptions,
    ) -> Result<Conversion, ConversionError> {
        let format = SourceFormat::detect(path, content_type).ok_or_else(|| {
            ConversionError::UnsupportedContentType(if content_type.is_empty() {
                path.display().to_string()
            } else {
                content_type.to_string()
            })
        })?;
        let bytes = tokio::fs::read(path)
            .await
            .map_err(|source| ConversionError::Io {
                path: path.to_path_buf(),
                source,
            })?;

        tracing::debug!(path = %path.display(), format = format.label(), "Converting locally");
        // Parsers are CPU bound; keep them off the async workers.
        tokio::task::spawn_blocking(move || convert_bytes(format, &bytes))
            .await
            .map_err(|error| ConversionError::Extraction {
                format: format.label(),
                message: error.to_string(),
            })?
    }
}

fn convert_bytes(format: SourceFormat, bytes: &[u8]) -> Result<Conversion, ConversionError> {
    let blocks = match format {
        SourceFormat::Pdf => pdf_blocks(bytes)?,
        SourceFormat::Docx => docx_paragraphs(bytes)?,
        SourceFormat::Html => html_blocks(bytes),
        SourceFormat::Text => {
            return Ok(Conversion {
                markdown: String::from_utf8_lossy(bytes).into_owned(),
                structure: Some(json!({ "format": format.label() })),
            });
        }
        SourceFormat::Image => Vec::new(),
    };

    Ok(Conversion {
        markdown: blocks.join("\n\n"),
        structure: Some(json!({
            "format": format.label(),
            "blocks": blocks,
        })),
    })
}

fn pdf_blocks(bytes: &[u8]) -> Result<Vec<String>, ConversionError> {
    let text = pdf_extract::extract_text_from_mem(bytes).map_err(|error| {
        ConversionError::Extraction {
            format: "pdf",
            message: error.to_string(),
        }
    })?;
    Ok(split_blocks(&text))
}

/// Split extracted text on blank lines, dropping empty blocks.
fn split_blocks(text: &str) -> Vec<String> {
    let mut blocks = Vec::new();
    let mut current: Vec<&str> = Vec::new();
    for line in text.lines() {
        if line.trim().is_empty() {
            if !current.is_empty() {
                blocks.push(current.join("\n"));
                current.clear();
            }
        } else {
            current.push(line.trim_end());
        }
    }
    if !current.is_empty() {
        blocks.push(current.join("\n"));
    }
    blocks
}

fn docx_paragraphs(bytes: &[u8]) -> Result<Vec<String>, ConversionError> {
    let ooxml_error = |message: String| ConversionError::Extraction {
        format: "docx",
        message,
    };
    let mut archive =
        zip::ZipArchive::new(Cursor::new(bytes)).map_err(|error| ooxml_error(error.to_string()))?;
    let entry = archive
        .by_name("word/document.xml")
        .map_err(|error| ooxml_error(error.to_string()))?;
    let mut xml = Vec::new();
    entry
        .take(MAX_XML_ENTRY_BYTES)
        .read_to_end(&mut xml)
        .map_err(|error| ooxml_error(error.to_string()))?;
    if xml.len() as u64 >= MAX_XML_ENTRY_BYTES {
        return Err(ooxml_error("word/document.xml exceeds size limit".into()));
    }

    let mut reader = Reader::from_reader(xml.as_slice());
    let mut buf = Vec::new();
    let mut paragraphs = Vec::new();
    let mut current = String::new();
    let mut in_text = false;
    loop {
        match reader.read_event_into(&mut buf) {
            Ok(Event::Start(element)) if element.local_name().as_ref() == b"t" => in_text = true,
            Ok(Event::End(element)) => match element.local_name().as_ref() {
                b"t" => in_text = false,
                b"p" => {
                    let paragraph = std::mem::take(&mut current);
                    if !paragraph.trim().is_empty() {
                        paragraphs.push(paragraph);
                    }
                }
                _ => {}
            },
            Ok(Event::Empty(element)) if element.local_name().as_ref() == b"tab" => {
                current.push('\t');
            }
            Ok(Event::Text(text)) if in_text => {
                let unescaped = text
                    .unescape()
                    .map_err(|error| ooxml_error(error.to_string()))?;
                current.push_str(&unescaped);
            }
            Ok(Event::Eof) => break,
            Err(error) => return Err(ooxml_error(error.to_string())),
            _ => {}
        }
        buf.clear();
    }
    if !current.trim().is_empty() {
        paragraphs.push(current);
    }
    Ok(paragraphs)
}

fn html_blocks(bytes: &[u8]) -> Vec<String> {
    let source = String::from_utf8_lossy(bytes);
    let document = Html::parse_document(&source);
    let selector = Selector::parse("h1, h2, h3, h4, h5, h6, p, li, pre")
        .expect("static selector is valid");

    document
        .select(&selector)
        .filter_map(|element| {
            let text = element
                .text()
                .collect::<Vec<_>>()
                .join(" ")
                .split_whitespace()
                .collect::<Vec<_>>()
                .join(" ");
            if text.is_empty() {
                return None;
            }
            let name = element.value().name();
            let block = match name {
                "li" => format!("- {text}"),
                "pre" => format!("```\n{}\n```", element.text().collect::<String>().trim_end()),
                heading if heading.len() == 2 && heading.starts_with('h') => {
                    let level = heading[1..].parse::<usize>().unwrap_or(1);
                    format!("{} {text}", "#".repeat(level))
                }
                _ => text,
            };
            Some(block)
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn docx_bytes(body: &str) -> Vec<u8> {
        let mut cursor = Cursor::new(Vec::new());
        {
            let mut writer = zip::ZipWriter::new(&mut cursor);
            writer
                .start_file("word/document.xml", zip::write::SimpleFileOptions::default())
                .expect("start entry");
            writer.write_all(body.as_bytes()).expect("write entry");
            writer.finish().expect("finish zip");
        }
        cursor.into_inner()
    }

    #[test]
    fn split_blocks_drops_blank_runs() {
        let blocks = split_blocks("Title\n\n\n  \nFirst line\nsecond line\n\n");
        assert_eq!(blocks, vec!["Title", "First line\nsecond line"]);
    }

    #[test]
    fn docx_paragraphs_join_runs() {
        let xml = r#"<?xml version="1.0"?>
<w:document xmlns:w="http://schemas.openxmlformats.org/wordprocessingml/2006/main">
  <w:body>
    <w:p><w:r><w:t xml:space="preserve">Hello </w:t></w:r><w:r><w:t>world</w:t></w:r></w:p>
    <w:p></w:p>
    <w:p><w:r><w:t>Fish &amp; chips</w:t></w:r></w:p>
  </w:body>
</w:document>"#;
        let paragraphs = docx_paragraphs(&docx_bytes(xml)).expect("docx parsed");
        assert_eq!(paragraphs, vec!["Hello world", "Fish & chips"]);
    }

    #[test]
    fn html_blocks_render_markdown_headings() {
        let html = b"<html><body><h2>Intro</h2><p>Some   text</p><ul><li>one</li></ul></body></html>";
        let blocks = html_blocks(html);
        assert_eq!(blocks, vec!["## Intro", "Some text", "- one"]);
    }

    #[test]
    fn images_convert_to_empty_markdown() {
        let conversion = convert_bytes(SourceFormat::Image, b"\x89PNG").expect("conversion");
        assert!(conversion.markdown.is_empty());
        assert_eq!(conversion.structure.expect("structure")["format"], "image");
    }

    #[tokio::test]
    async fn local_converter_passes_text_through() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("notes.txt");
        std::fs::write(&path, "plain words").expect("write");

        let conversion = LocalConverter::new()
            .convert(&path, "text/plain", &ConversionOptions::default())
            .await
            .expect("conversion");
        assert_eq!(conversion.markdown, "plain words");
    }

    #[tokio::test]
    async fn local_converter_rejects_unknown_types() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("blob.7z");
        std::fs::write(&path, [0u8; 4]).expect("write");

        let error = LocalConverter::new()
            .convert(&path, "", &ConversionOptions::default())
            .await
            .expect_err("unsupported");
        assert!(matches!(error, ConversionError::UnsupportedContentType(_)));
    }
}
