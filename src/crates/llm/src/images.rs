//! Turning [`ImageRef`]s into something a backend accepts.
//!
//! An image reference is a URL, a `data:` URI, or a local path. OpenAI
//! takes URLs and data URIs directly; Ollama only takes raw base64, so
//! remote images are downloaded first.

use crate::error::{LlmError, Result};
use base64::Engine;
use reqwest::Client;
use std::path::Path;
use studyflow_core::ImageRef;

/// Where an image's bytes come from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ImageSource {
    Url(String),
    Inline { mime_type: String, data: String },
}

impl ImageSource {
    /// URL form accepted by OpenAI-compatible APIs.
    pub fn to_url(&self) -> String {
        match self {
            ImageSource::Url(url) => url.clone(),
            ImageSource::Inline { mime_type, data } => format!("data:{};base64,{}", mime_type, data),
        }
    }
}

/// Resolve a reference without touching the network.
pub async fn resolve(image: &ImageRef) -> Result<ImageSource> {
    let uri = image.uri.trim();
    if let Some(rest) = uri.strip_prefix("data:") {
        let (header, data) = rest
            .split_once(',')
            .ok_or_else(|| LlmError::ImageError("malformed data URI".to_string()))?;
        let mime_type = header
            .strip_suffix(";base64")
            .ok_or_else(|| LlmError::ImageError("data URI is not base64".to_string()))?;
        return Ok(ImageSource::Inline {
            mime_type: image.mime_type.clone().unwrap_or_else(|| mime_type.to_string()),
            data: data.to_string(),
        });
    }
    if uri.starts_with("http://") || uri.starts_with("https://") {
        return Ok(ImageSource::Url(uri.to_string()));
    }

    let path = Path::new(uri.strip_prefix("file://").unwrap_or(uri));
    let bytes = tokio::fs::read(path)
        .await
        .map_err(|e| LlmError::ImageError(format!("{}: {}", path.display(), e)))?;
    Ok(ImageSource::Inline {
        mime_type: image
            .mime_type
            .clone()
            .unwrap_or_else(|| guess_mime(path).to_string()),
        data: base64::engine::general_purpose::STANDARD.encode(bytes),
    })
}

/// Resolve to raw base64, downloading remote images with `client`.
pub async fn inline_base64(client: &Client, image: &ImageRef) -> Result<String> {
    match resolve(image).await? {
        ImageSource::Inline { data, .. } => Ok(data),
        ImageSource::Url(url) => {
            let response = client.get(&url).send().await.map_err(LlmError::from_transport)?;
            if !response.status().is_success() {
                return Err(LlmError::ImageError(format!(
                    "{} answered {}",
                    url,
                    response.status()
                )));
            }
            let bytes = response.bytes().await?;
            Ok(base64::engine::general_purpose::STANDARD.encode(bytes))
        }
    }
}

fn guess_mime(path: &Path) -> &'static str {
    let ext = path
        .extension()
        .and_then(|e| e.to_str())
        .map(|e| e.to_ascii_lowercase());
    match ext.as_deref() {
        Some("jpg") | Some("jpeg") => "image/jpeg",
        Some("gif") => "image/gif",
        Some("webp") => "image/webp",
        _ => "image/png",
    }
}
