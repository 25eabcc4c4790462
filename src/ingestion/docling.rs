//! HTTP adapter for a docling-serve conversion service.

use super::converter::{Conversion, ConversionOptions, DocumentConverter};
use super::types::ConversionError;
use async_trait::async_trait;
use reqwest::{
    Client,
    multipart::{Form, Part},
};
use serde::Deserialize;
use serde_json::Value;
use std::path::Path;

/// Converter delegating to docling-serve's `/v1/convert/file` endpoint.
pub struct DoclingConverter {
    http: Client,
    base_url: String,
}

impl DoclingConverter {
    /// Build a client targeting the given docling-serve base URL.
    pub fn new(base_url: impl Into<String>) -> Result<Self, ConversionError> {
        let http = Client::builder()
            .user_agent("docrag/docling")
            .build()
            .map_err(|error| ConversionError::Service(error.to_string()))?;
        Ok(Self {
            http,
            base_url: base_url.into(),
        })
    }

    fn endpoint(&self) -> String {
        format!("{}/v1/convert/file", self.base_url.trim_end_matches('/'))
    }
}

#[derive(Debug, Deserialize)]
struct ConvertResponse {
    document: ConvertedDocument,
    #[serde(default)]
    status: Option<String>,
    #[serde(default)]
    errors: Vec<Value>,
}

#[derive(Debug, Deserialize)]
struct ConvertedDocument {
    #[serde(default)]
    md_content: Option<String>,
    #[serde(default)]
    json_content: Option<Value>,
}

#[async_trait]
impl DocumentConverter for DoclingConverter {
    async fn convert(
        &self,
        path: &Path,
        content_type: &str,
        options: &ConversionOptions,
    ) -> Result<Conversion, ConversionError> {
        let bytes = tokio::fs::read(path)
            .await
            .map_err(|source| ConversionError::Io {
                path: path.to_path_buf(),
                source,
            })?;
        let filename = path
            .file_name()
            .and_then(|name| name.to_str())
            .unwrap_or("upload")
            .to_string();

        let mut part = Part::bytes(bytes).file_name(filename);
        if !content_type.trim().is_empty() {
            part = part
                .mime_str(content_type)
                .map_err(|error| ConversionError::Service(error.to_string()))?;
        }
        let form = Form::new()
            .part("files", part)
            .text("to_formats", "md")
            .text("to_formats", "json")
            .text("do_ocr", options.do_ocr.to_string())
            .text("do_table_structure", options.do_table_structure.to_string())
            .text("images_scale", options.images_scale.to_string())
            .text("image_export_mode", "placeholder");

        let response = self
            .http
            .post(self.endpoint())
            .multipart(form)
            .send()
            .await
            .map_err(|error| {
                ConversionError::Service(format!(
                    "failed to reach docling at {}: {error}",
                    self.base_url
                ))
            })?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(ConversionError::Service(format!(
                "docling returned {status}: {body}"
            )));
        }

        let body: ConvertResponse = response.json().await.map_err(|error| {
            ConversionError::Service(format!("failed to decode docling response: {error}"))
        })?;

        if body.status.as_deref() == Some("failure") {
            return Err(ConversionError::Service(format!(
                "docling conversion failed: {}",
                Value::Array(body.errors)
            )));
        }
        if !body.errors.is_empty() {
            tracing::warn!(path = %path.display(), errors = body.errors.len(), "Docling reported partial conversion");
        }

        Ok(Conversion {
            markdown: body.document.md_content.unwrap_or_default(),
            structure: body.document.json_content,
        })
    }
}
