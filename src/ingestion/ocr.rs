//! OCR fallback for documents whose primary conversion produced little or no text.
//!
//! Rendering and recognition are external tools behind [`PageRasterizer`] and [`PageOcr`]; the
//! default implementations shell out to poppler's `pdftoppm` and to `tesseract`.

use super::types::{OcrError, SourceFormat};
use async_trait::async_trait;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tempfile::TempDir;
use tokio::process::Command;

/// A single rendered page.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PageImage {
    /// One-based page number.
    pub page_number: usize,
    /// Location of the rendered image.
    pub path: PathBuf,
}

/// Rendered pages plus the scratch directory that owns them.
///
/// The directory is removed when this value is dropped.
#[derive(Debug)]
pub struct RasterizedPages {
    /// Pages in ascending page order.
    pub pages: Vec<PageImage>,
    _workdir: Option<TempDir>,
}

impl RasterizedPages {
    /// Wrap pages that live outside any scratch directory.
    pub fn borrowed(pages: Vec<PageImage>) -> Self {
        Self {
            pages,
            _workdir: None,
        }
    }

    fn owned(pages: Vec<PageImage>, workdir: TempDir) -> Self {
        Self {
            pages,
            _workdir: Some(workdir),
        }
    }
}

/// Renders a source document into page images.
#[async_trait]
pub trait PageRasterizer: Send + Sync {
    /// Render at most `max_pages` pages of `source` at `dpi`.
    async fn rasterize(
        &self,
        source: &Path,
        format: SourceFormat,
        max_pages: usize,
        dpi: u32,
    ) -> Result<RasterizedPages, OcrError>;
}

/// Recognizes text lines on a page image.
#[async_trait]
pub trait PageOcr: Send + Sync {
    /// Return the recognized lines of `page`, top to bottom.
    async fn recognize(&self, page: &PageImage) -> Result<Vec<String>, OcrError>;
}

/// Rasterizer backed by `pdftoppm`. Image sources are passed through as a single page.
#[derive(Debug, Default, Clone, Copy)]
pub struct PdftoppmRasterizer;

#[async_trait]
impl PageRasterizer for PdftoppmRasterizer {
    async fn rasterize(
        &self,
        source: &Path,
        format: SourceFormat,
        max_pages: usize,
        dpi: u32,
    ) -> Result<RasterizedPages, OcrError> {
        match format {
            SourceFormat::Image => Ok(RasterizedPages::borrowed(vec![PageImage {
                page_number: 1,
                path: source.to_path_buf(),
            }])),
            SourceFormat::Pdf => {
                let workdir = tempfile::tempdir().map_err(OcrError::Workspace)?;
                let prefix = workdir.path().join("page");
                let output = Command::new("pdftoppm")
                    .arg("-png")
                    .arg("-r")
                    .arg(dpi.to_string())
                    .arg("-f")
                    .arg("1")
                    .arg("-l")
                    .arg(max_pages.max(1).to_string())
                    .arg(source)
                    .arg(&prefix)
                    .output()
                    .await
                    .map_err(|source| OcrError::Launch {
                        tool: "pdftoppm",
                        source,
                    })?;
                if !output.status.success() {
                    return Err(OcrError::ToolFailed {
                        tool: "pdftoppm",
                        stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
                    });
                }

                let pages = collect_pages(workdir.path())
                    .await
                    .map_err(OcrError::Workspace)?;
                if pages.is_empty() {
                    return Err(OcrError::NoPages);
                }
                Ok(RasterizedPages::owned(pages, workdir))
            }
            other => Err(OcrError::UnsupportedFormat(other.label())),
        }
    }
}

/// List `page-N.png` files in `dir`, sorted by `N`.
async fn collect_pages(dir: &Path) -> std::io::Result<Vec<PageImage>> {
    let mut pages = Vec::new();
    let mut entries = tokio::fs::read_dir(dir).await?;
    while let Some(entry) = entries.next_entry().await? {
        let path = entry.path();
        if let Some(page_number) = page_number_of(&path) {
            pages.push(PageImage { page_number, path });
        }
    }
    pages.sort_by_key(|page| page.page_number);
    Ok(pages)
}

fn page_number_of(path: &Path) -> Option<usize> {
    if path.extension().and_then(|ext| ext.to_str()) != Some("png") {
        return None;
    }
    let stem = path.file_stem()?.to_str()?;
    // pdftoppm zero-pads to the width of the page count.
    stem.rsplit('-').next()?.parse().ok()
}

/// OCR engine backed by the `tesseract` CLI.
#[derive(Debug, Clone)]
pub struct TesseractOcr {
    language: String,
}

impl TesseractOcr {
    /// Use the given tesseract language pack (e.g. `eng`).
    pub fn new(language: impl Into<String>) -> Self {
        Self {
            language: language.into(),
        }
    }
}

#[async_trait]
impl PageOcr for TesseractOcr {
    async fn recognize(&self, page: &PageImage) -> Result<Vec<String>, OcrError> {
        let output = Command::new("tesseract")
            .arg(&page.path)
            .arg("stdout")
            .arg("-l")
            .arg(&self.language)
            .output()
            .await
            .map_err(|source| OcrError::Launch {
                tool: "tesseract",
                source,
            })?;
        if !output.status.success() {
            return Err(OcrError::ToolFailed {
                tool: "tesseract",
                stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
            });
        }
        Ok(String::from_utf8_lossy(&output.stdout)
            .lines()
            .map(str::trim_end)
            .filter(|line| !line.trim().is_empty())
            .map(str::to_string)
            .collect())
    }
}

/// Rasterize-then-recognize pipeline used by the ingestion service.
#[derive(Clone)]
pub struct OcrFallback {
    rasterizer: Arc<dyn PageRasterizer>,
    engine: Arc<dyn PageOcr>,
    max_pages: usize,
    dpi: u32,
}

impl OcrFallback {
    /// Combine a rasterizer and an OCR engine with page and resolution limits.
    pub fn new(
        rasterizer: Arc<dyn PageRasterizer>,
        engine: Arc<dyn PageOcr>,
        max_pages: usize,
        dpi: u32,
    ) -> Self {
        Self {
            rasterizer,
            engine,
            max_pages,
            dpi,
        }
    }

    /// Default tooling: `pdftoppm` plus `tesseract` in `language`.
    pub fn with_system_tools(language: impl Into<String>, max_pages: usize, dpi: u32) -> Self {
        Self::new(
            Arc::new(PdftoppmRasterizer),
            Arc::new(TesseractOcr::new(language)),
            max_pages,
            dpi,
        )
    }

    /// OCR `source` and return its text: lines joined by newlines, pages by a blank line.
    ///
    /// Pages that fail recognition are skipped with a warning; the call fails only when every
    /// page fails.
    pub async fn run(&self, source: &Path, format: SourceFormat) -> Result<String, OcrError> {
        let rendered = self
            .rasterizer
            .rasterize(source, format, self.max_pages, self.dpi)
            .await?;
        if rendered.pages.is_empty() {
            return Err(OcrError::NoPages);
        }

        let mut texts = Vec::with_capacity(rendered.pages.len());
        let mut last_error = None;
        for page in rendered.pages.iter().take(self.max_pages.max(1)) {
            match self.engine.recognize(page).await {
                Ok(lines) => {
                    tracing::debug!(page = page.page_number, lines = lines.len(), "OCR page recognized");
                    if !lines.is_empty() {
                        texts.push(lines.join("\n"));
                    }
                }
                Err(error) => {
                    tracing::warn!(page = page.page_number, %error, "OCR failed for page");
                    last_error = Some(error);
                }
            }
        }

        match last_error {
            Some(error) if texts.is_empty() => Err(error),
            _ => Ok(texts.join("\n\n")),
        }
    }
}
