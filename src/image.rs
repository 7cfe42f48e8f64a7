//! Image loading and base64 encoding for vision requests

use std::path::Path;

use base64::Engine;

use crate::{Error, Result};

/// Base64 image payload with its detected media type
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EncodedImage {
    /// Standard base64 of the file contents
    pub data: String,
    /// Media type, e.g. `image/png`
    pub mime_type: &'static str,
}

impl EncodedImage {
    /// Encode raw image bytes, using `path` as a media type hint
    #[must_use]
    pub fn from_bytes(bytes: &[u8], path: Option<&Path>) -> Self {
        Self {
            data: base64::engine::general_purpose::STANDARD.encode(bytes),
            mime_type: detect_mime_type(bytes, path),
        }
    }

    /// Render as a `data:` URI for embedding in a request body
    #[must_use]
    pub fn data_uri(&self) -> String {
        format!("data:{};base64,{}", self.mime_type, self.data)
    }

    /// Decode the payload back into raw bytes
    ///
    /// # Errors
    ///
    /// Returns error if the payload is not valid base64
    pub fn decode(&self) -> Result<Vec<u8>> {
        base64::engine::general_purpose::STANDARD
            .decode(&self.data)
            .map_err(|e| Error::Image(e.to_string()))
    }
}

/// Detect the media type from magic bytes, then the file extension
///
/// Unknown content defaults to `image/jpeg`.
#[must_use]
pub fn detect_mime_type(bytes: &[u8], path: Option<&Path>) -> &'static str {
    if bytes.starts_with(&[0x89, b'P', b'N', b'G', 0x0D, 0x0A, 0x1A, 0x0A]) {
        return "image/png";
    }
    if bytes.starts_with(&[0xFF, 0xD8, 0xFF]) {
        return "image/jpeg";
    }
    if bytes.starts_with(b"GIF87a") || bytes.starts_with(b"GIF89a") {
        return "image/gif";
    }
    if bytes.len() >= 12 && &bytes[0..4] == b"RIFF" && &bytes[8..12] == b"WEBP" {
        return "image/webp";
    }

    let extension = path
        .and_then(Path::extension)
        .and_then(|e| e.to_str())
        .map(str::to_ascii_lowercase);

    match extension.as_deref() {
        Some("png") => "image/png",
        Some("gif") => "image/gif",
        Some("webp") => "image/webp",
        // jpeg, jpg, and any unknown type default to jpeg
        _ => "image/jpeg",
    }
}

/// Read and encode an image file
///
/// # Errors
///
/// Returns error if the file is missing or unreadable
pub async fn try_encode_image(path: &Path) -> Result<EncodedImage> {
    let bytes = tokio::fs::read(path).await.map_err(|e| {
        if e.kind() == std::io::ErrorKind::NotFound {
            Error::Image(format!("image file not found at {}", path.display()))
        } else {
            Error::Image(format!("failed to read {}: {e}", path.display()))
        }
    })?;

    tracing::debug!(path = %path.display(), bytes = bytes.len(), "image loaded");
    Ok(EncodedImage::from_bytes(&bytes, Some(path)))
}

/// Encode an optional image file, logging and swallowing any failure
pub async fn encode_image(path: Option<&Path>) -> Option<EncodedImage> {
    let path = path?;
    match try_encode_image(path).await {
        Ok(image) => Some(image),
        Err(e) => {
            tracing::warn!(error = %e, "image encoding failed, continuing without image");
            None
        }
    }
}
