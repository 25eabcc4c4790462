//! Document ingestion: conversion to markdown, artifact persistence, and the OCR fallback.

pub mod converter;
pub mod docling;
pub mod ocr;
pub mod service;
pub mod types;

pub use converter::{Conversion, ConversionOptions, DocumentConverter, LocalConverter};
pub use docling::DoclingConverter;
pub use ocr::{OcrFallback, PageImage, PageOcr, PageRasterizer, PdftoppmRasterizer, RasterizedPages, TesseractOcr};
pub use service::{IngestionService, MIN_TEXT_CHARS};
pub use types::{
    ConversionError, DocumentMetadata, IngestionBatch, IngestionError, IngestionFailure,
    NormalizedDocument, OcrError, SourceFormat, StructuredDocument, UploadedFile,
};
