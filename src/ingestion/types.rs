//! Data records and error definitions for document ingestion.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Raw upload handed to the pipeline by a caller.
#[derive(Debug, Clone)]
pub struct UploadedFile {
    /// Original filename as supplied by the uploader.
    pub filename: String,
    /// Declared MIME type; may be empty.
    pub content_type: String,
    /// File contents.
    pub bytes: Vec<u8>,
}

impl UploadedFile {
    /// Convenience constructor.
    pub fn new(
        filename: impl Into<String>,
        content_type: impl Into<String>,
        bytes: impl Into<Vec<u8>>,
    ) -> Self {
        Self {
            filename: filename.into(),
            content_type: content_type.into(),
            bytes: bytes.into(),
        }
    }
}

/// Metadata carried by every normalized document and inherited by its chunks.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DocumentMetadata {
    /// Sanitized filename of the upload.
    pub filename: String,
    /// MIME type of the upload.
    pub file_type: String,
    /// Citation label; the filename.
    pub source: String,
    /// Directory holding the persisted artifacts.
    pub output_dir: String,
}

/// Text form of an uploaded document ready for chunking.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NormalizedDocument {
    /// Markdown (or OCR text when the fallback replaced it).
    pub text: String,
    /// Provenance metadata.
    pub metadata: DocumentMetadata,
}

/// Structural side artifact kept for inspection only.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StructuredDocument {
    /// Filename the structure belongs to.
    pub filename: String,
    /// Converter-specific tree of sections, tables, and pictures.
    pub document: serde_json::Value,
}

/// Per-file failure recorded while the rest of the batch continues.
#[derive(Debug, Clone, Serialize)]
pub struct IngestionFailure {
    /// Filename of the skipped upload.
    pub filename: String,
    /// Human-readable reason.
    pub reason: String,
}

/// Result of ingesting a batch of uploads.
#[derive(Debug, Default)]
pub struct IngestionBatch {
    /// Successfully converted documents, in input order.
    pub documents: Vec<NormalizedDocument>,
    /// Structural artifacts for the documents that produced one.
    pub structured: Vec<StructuredDocument>,
    /// Uploads that were skipped.
    pub failures: Vec<IngestionFailure>,
}

/// Source formats understood by the local converter and the OCR rasterizer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SourceFormat {
    /// Portable Document Format.
    Pdf,
    /// Office Open XML word processing document.
    Docx,
    /// HTML page.
    Html,
    /// Plain text, markdown, CSV, JSON.
    Text,
    /// Raster image.
    Image,
}

impl SourceFormat {
    /// Detect the format from the declared MIME type, falling back to the file extension.
    pub fn detect(path: &Path, content_type: &str) -> Option<Self> {
        let declared = content_type.trim().to_lowercase();
        if let Some(format) = Self::from_mime(&declared) {
            return Some(format);
        }
        mime_guess::from_path(path)
            .first()
            .and_then(|guess| Self::from_mime(guess.essence_str()))
    }

    fn from_mime(mime: &str) -> Option<Self> {
        match mime {
            "application/pdf" => Some(Self::Pdf),
            "application/vnd.openxmlformats-officedocument.wordprocessingml.document" => {
                Some(Self::Docx)
            }
            "text/html" | "application/xhtml+xml" => Some(Self::Html),
            "application/json" | "application/x-ndjson" => Some(Self::Text),
            value if value.starts_with("text/") => Some(Self::Text),
            value if value.starts_with("image/") => Some(Self::Image),
            _ => None,
        }
    }

    /// Short label stored in structural artifacts.
    pub fn label(self) -> &'static str {
        match self {
            Self::Pdf => "pdf",
            Self::Docx => "docx",
            Self::Html => "html",
            Self::Text => "text",
            Self::Image => "image",
        }
    }
}

/// Errors raised by document converters.
#[derive(Debug, Error)]
pub enum ConversionError {
    /// Neither the declared type nor the extension maps to a supported format.
    #[error("unsupported content type '{0}'")]
    UnsupportedContentType(String),
    /// Reading the source file failed.
    #[error("failed to read {path}: {source}")]
    Io {
        /// File that could not be read.
        path: PathBuf,
        /// Underlying I/O error.
        #[source]
        source: std::io::Error,
    },
    /// Parsing the source format failed.
    #[error("{format} extraction failed: {message}")]
    Extraction {
        /// Format label.
        format: &'static str,
        /// Parser diagnostic.
        message: String,
    },
    /// The remote conversion service could not be reached or rejected the request.
    #[error("conversion service error: {0}")]
    Service(String),
}

/// Errors raised by the OCR fallback.
#[derive(Debug, Error)]
pub enum OcrError {
    /// The source format cannot be rasterized.
    #[error("cannot rasterize {0} sources")]
    UnsupportedFormat(&'static str),
    /// An external tool could not be launched.
    #[error("failed to launch {tool}: {source}")]
    Launch {
        /// Tool name.
        tool: &'static str,
        /// Spawn error.
        #[source]
        source: std::io::Error,
    },
    /// An external tool exited unsuccessfully.
    #[error("{tool} failed: {stderr}")]
    ToolFailed {
        /// Tool name.
        tool: &'static str,
        /// Captured standard error.
        stderr: String,
    },
    /// Scratch space for rendered pages could not be prepared.
    #[error("OCR scratch directory error: {0}")]
    Workspace(#[source] std::io::Error),
    /// Rasterization produced no pages.
    #[error("no pages were rendered")]
    NoPages,
}

/// Errors that cause a single upload to be skipped.
#[derive(Debug, Error)]
pub enum IngestionError {
    /// The filename has no usable final component.
    #[error("invalid filename '{0}'")]
    InvalidFilename(String),
    /// Writing an artifact failed.
    #[error("failed to write {path}: {source}")]
    Io {
        /// Target path.
        path: PathBuf,
        /// Underlying I/O error.
        #[source]
        source: std::io::Error,
    },
    /// The converter failed.
    #[error(transparent)]
    Conversion(#[from] ConversionError),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn detect_prefers_declared_type() {
        let format = SourceFormat::detect(Path::new("notes.bin"), "application/pdf");
        assert_eq!(format, Some(SourceFormat::Pdf));
    }

    #[test]
    fn detect_falls_back_to_extension() {
        assert_eq!(
            SourceFormat::detect(Path::new("report.pdf"), ""),
            Some(SourceFormat::Pdf)
        );
        assert_eq!(
            SourceFormat::detect(Path::new("scan.png"), "application/octet-stream"),
            Some(SourceFormat::Image)
        );
        assert_eq!(
            SourceFormat::detect(Path::new("notes.txt"), ""),
            Some(SourceFormat::Text)
        );
    }

    #[test]
    fn detect_rejects_unknown_types() {
        assert_eq!(SourceFormat::detect(Path::new("archive.7z"), ""), None);
    }
}
