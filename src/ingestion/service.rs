//! Ingestion service: upload → artifacts on disk → normalized document.

use super::{
    converter::{ConversionOptions, DocumentConverter},
    ocr::OcrFallback,
    types::{
        DocumentMetadata, IngestionBatch, IngestionError, IngestionFailure, NormalizedDocument,
        SourceFormat, StructuredDocument, UploadedFile,
    },
};
use crate::config::IngestionSettings;
use std::path::Path;
use std::sync::Arc;

/// Markdown shorter than this (after trimming) triggers the OCR fallback under `force_ocr`.
pub const MIN_TEXT_CHARS: usize = 50;

const MARKDOWN_ARTIFACT: &str = "document.md";
const STRUCTURE_ARTIFACT: &str = "document.json";
const OCR_ARTIFACT: &str = "ocr_document.txt";

/// Converts uploads into normalized documents and persists per-document artifacts.
///
/// Each upload gets `<output_root>/<stem>/` holding the original bytes, `document.md`,
/// `document.json`, and `ocr_document.txt` when the OCR fallback produced text. Files that fail
/// are reported in [`IngestionBatch::failures`] and do not stop the batch.
pub struct IngestionService {
    converter: Arc<dyn DocumentConverter>,
    ocr: Option<OcrFallback>,
    settings: IngestionSettings,
}

struct Ingested {
    document: NormalizedDocument,
    structured: Option<StructuredDocument>,
}

impl IngestionService {
    /// Assemble a service from explicit collaborators.
    pub fn new(
        converter: Arc<dyn DocumentConverter>,
        ocr: Option<OcrFallback>,
        settings: IngestionSettings,
    ) -> Self {
        Self {
            converter,
            ocr,
            settings,
        }
    }

    /// Assemble a service whose OCR fallback uses the system `pdftoppm` and `tesseract`.
    pub fn from_settings(converter: Arc<dyn DocumentConverter>, settings: IngestionSettings) -> Self {
        let ocr = OcrFallback::with_system_tools(
            settings.ocr_language.clone(),
            settings.ocr_max_pages,
            settings.ocr_dpi,
        );
        Self::new(converter, Some(ocr), settings)
    }

    /// Settings in effect.
    pub fn settings(&self) -> &IngestionSettings {
        &self.settings
    }

    /// Ingest every upload in order. Failures are logged, recorded, and skipped.
    pub async fn process(&self, files: Vec<UploadedFile>) -> IngestionBatch {
        let mut batch = IngestionBatch::default();
        for file in files {
            let filename = file.filename.clone();
            match self.process_file(file).await {
                Ok(Ingested {
                    document,
                    structured,
                }) => {
                    tracing::info!(
                        filename = %document.metadata.filename,
                        chars = document.text.len(),
                        output_dir = %document.metadata.output_dir,
                        "Document ingested"
                    );
                    batch.documents.push(document);
                    batch.structured.extend(structured);
                }
                Err(error) => {
                    tracing::error!(filename = %filename, %error, "Failed to ingest document");
                    batch.failures.push(IngestionFailure {
                        filename,
                        reason: error.to_string(),
                    });
                }
            }
        }
        batch
    }

    async fn process_file(&self, file: UploadedFile) -> Result<Ingested, IngestionError> {
        let (filename, stem) = sanitize_filename(&file.filename)?;
        let doc_dir = self.settings.output_root.join(&stem);
        tokio::fs::create_dir_all(&doc_dir)
            .await
            .map_err(|source| IngestionError::Io {
                path: doc_dir.clone(),
                source,
            })?;

        let source_path = doc_dir.join(&filename);
        write_artifact(&source_path, &file.bytes).await?;

        let options = ConversionOptions {
            images_scale: self.settings.images_scale(),
            ..ConversionOptions::default()
        };
        let conversion = self
            .converter
            .convert(&source_path, &file.content_type, &options)
            .await?;

        write_artifact(&doc_dir.join(MARKDOWN_ARTIFACT), conversion.markdown.as_bytes()).await?;

        let structured = conversion.structure.map(|document| StructuredDocument {
            filename: filename.clone(),
            document,
        });
        if let Some(structured) = &structured {
            write_structure(&doc_dir.join(STRUCTURE_ARTIFACT), structured).await;
        }

        let mut text = conversion.markdown;
        if self.settings.force_ocr
            && let Some(ocr) = &self.ocr
            && text.trim().chars().count() < MIN_TEXT_CHARS
            && let Some(recovered) = self
                .run_ocr(ocr, &source_path, &file.content_type, &doc_dir)
                .await
        {
            text = recovered;
        }

        let file_type = if file.content_type.trim().is_empty() {
            mime_guess::from_path(&filename)
                .first_or_octet_stream()
                .essence_str()
                .to_string()
        } else {
            file.content_type
        };

        Ok(Ingested {
            document: NormalizedDocument {
                text,
                metadata: DocumentMetadata {
                    source: filename.clone(),
                    filename,
                    file_type,
                    output_dir: doc_dir.display().to_string(),
                },
            },
            structured,
        })
    }

    /// Run the fallback; `None` keeps the primary markdown.
    async fn run_ocr(
        &self,
        ocr: &OcrFallback,
        source_path: &Path,
        content_type: &str,
        doc_dir: &Path,
    ) -> Option<String> {
        let Some(format) = SourceFormat::detect(source_path, content_type) else {
            tracing::warn!(path = %source_path.display(), "OCR fallback skipped: unknown format");
            return None;
        };
        tracing::info!(path = %source_path.display(), "Primary conversion sparse, running OCR fallback");

        let text = match ocr.run(source_path, format).await {
            Ok(text) if !text.trim().is_empty() => text,
            Ok(_) => {
                tracing::warn!(path = %source_path.display(), "OCR fallback produced no text");
                return None;
            }
            Err(error) => {
                tracing::warn!(path = %source_path.display(), %error, "OCR fallback failed");
                return None;
            }
        };

        let ocr_path = doc_dir.join(OCR_ARTIFACT);
        if let Err(error) = tokio::fs::write(&ocr_path, text.as_bytes()).await {
            tracing::warn!(path = %ocr_path.display(), %error, "Failed to persist OCR text");
        }
        Some(text)
    }
}

/// Reduce an uploaded name to its final path component and derive the artifact directory stem.
fn sanitize_filename(raw: &str) -> Result<(String, String), IngestionError> {
    let normalized = raw.replace('\\', "/");
    let candidate = Path::new(&normalized);
    let filename = candidate
        .file_name()
        .and_then(|name| name.to_str())
        .map(str::trim)
        .filter(|name| !name.is_empty() && *name != "." && *name != "..")
        .ok_or_else(|| IngestionError::InvalidFilename(raw.to_string()))?
        .to_string();
    let stem = Path::new(&filename)
        .file_stem()
        .and_then(|stem| stem.to_str())
        .filter(|stem| !stem.is_empty())
        .unwrap_or(&filename)
        .to_string();
    Ok((filename, stem))
}

async fn write_artifact(path: &Path, bytes: &[u8]) -> Result<(), IngestionError> {
    tokio::fs::write(path, bytes)
        .await
        .map_err(|source| IngestionError::Io {
            path: path.to_path_buf(),
            source,
        })
}

async fn write_structure(path: &Path, structured: &StructuredDocument) {
    let payload = match serde_json::to_vec_pretty(&structured.document) {
        Ok(payload) => payload,
        Err(error) => {
            tracing::warn!(path = %path.display(), %error, "Failed to serialize document structure");
            return;
        }
    };
    if let Err(error) = tokio::fs::write(path, payload).await {
        tracing::warn!(path = %path.display(), %error, "Failed to write document structure");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ConverterBackend;
    use crate::ingestion::converter::LocalConverter;

    fn settings(root: &Path) -> IngestionSettings {
        IngestionSettings {
            output_root: root.to_path_buf(),
            converter: ConverterBackend::Local,
            force_ocr: false,
            ocr_max_pages: 20,
            ocr_dpi: 300,
            ocr_language: "eng".into(),
        }
    }

    #[test]
    fn sanitize_strips_directories() {
        assert_eq!(
            sanitize_filename("../../etc/report.final.pdf").expect("name"),
            ("report.final.pdf".to_string(), "report.final".to_string())
        );
        assert_eq!(
            sanitize_filename(r"C:\Users\me\notes.txt").expect("name"),
            ("notes.txt".to_string(), "notes".to_string())
        );
    }

    #[test]
    fn sanitize_rejects_empty_names() {
        assert!(matches!(
            sanitize_filename(".."),
            Err(IngestionError::InvalidFilename(_))
        ));
        assert!(matches!(
            sanitize_filename("  "),
            Err(IngestionError::InvalidFilename(_))
        ));
    }

    #[tokio::test]
    async fn artifacts_are_written_per_document() {
        let root = tempfile::tempdir().expect("tempdir");
        let service = IngestionService::new(Arc::new(LocalConverter::new()), None, settings(root.path()));

        let batch = service
            .process(vec![UploadedFile::new(
                "guide.txt",
                "",
                "Installation takes five minutes.",
            )])
            .await;

        assert!(batch.failures.is_empty());
        let document = &batch.documents[0];
        assert_eq!(document.text, "Installation takes five minutes.");
        assert_eq!(document.metadata.source, "guide.txt");
        assert_eq!(document.metadata.file_type, "text/plain");

        let doc_dir = root.path().join("guide");
        assert!(doc_dir.join("guide.txt").exists());
        assert!(doc_dir.join(MARKDOWN_ARTIFACT).exists());
        assert!(doc_dir.join(STRUCTURE_ARTIFACT).exists());
        assert!(!doc_dir.join(OCR_ARTIFACT).exists());
    }

    #[tokio::test]
    async fn failed_file_does_not_stop_the_batch() {
        let root = tempfile::tempdir().expect("tempdir");
        let service = IngestionService::new(Arc::new(LocalConverter::new()), None, settings(root.path()));

        let batch = service
            .process(vec![
                UploadedFile::new("a.txt", "text/plain", "alpha"),
                UploadedFile::new("b.7z", "", vec![0u8; 4]),
                UploadedFile::new("c.txt", "text/plain", "gamma"),
            ])
            .await;

        assert_eq!(batch.documents.len(), 2);
        assert_eq!(batch.failures.len(), 1);
        assert_eq!(batch.failures[0].filename, "b.7z");
        assert_eq!(batch.documents[1].metadata.filename, "c.txt");
    }
}
