//! Contract with the external try-on generation service.
//!
//! The service takes the staged body photo, the garment photo, and an
//! instruction, and answers with either a composited image or a text
//! explanation. The shell owns transport and the returned bytes; the caches
//! only ever store local file references to the result.

use async_trait::async_trait;
use base64::engine::general_purpose::STANDARD;
use base64::Engine as _;
use serde::{Deserialize, Serialize};
use thiserror::Error;

pub const DEFAULT_IMAGE_MIME: &str = "image/jpeg";

/// Instruction sent alongside the two images.
pub const TRY_ON_PROMPT: &str = "Take the first image as the base: it shows a human body in a neutral standing pose. Then take the second image: it is a clothing item (e.g., a dress/shirt/pants). Please digitally dress the person from the first image with the clothing from the second image in a realistic way. Ensure that the proportions match the body, and the clothing appears naturally worn with proper shadows, wrinkles, and perspective. Avoid any distortion. Keep the background simple or transparent if possible. The final output should look like the person is actually wearing the outfit.";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InlineImage {
    pub mime_type: String,
    #[serde(rename = "data")]
    pub base64_data: String,
}

impl InlineImage {
    #[must_use]
    pub fn from_bytes(mime_type: impl Into<String>, bytes: &[u8]) -> Self {
        Self {
            mime_type: mime_type.into(),
            base64_data: STANDARD.encode(bytes),
        }
    }

    #[must_use]
    pub fn jpeg(bytes: &[u8]) -> Self {
        Self::from_bytes(DEFAULT_IMAGE_MIME, bytes)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TryOnRequest {
    pub prompt: String,
    /// Body image first, garment second; the service is order-sensitive.
    pub images: [InlineImage; 2],
}

impl TryOnRequest {
    #[must_use]
    pub fn new(body: InlineImage, garment: InlineImage) -> Self {
        Self {
            prompt: TRY_ON_PROMPT.to_owned(),
            images: [body, garment],
        }
    }

    #[must_use]
    pub fn with_prompt(mut self, prompt: impl Into<String>) -> Self {
        self.prompt = prompt.into();
        self
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TryOnOutcome {
    /// Composited image, base64-encoded.
    Image {
        mime_type: String,
        base64_data: String,
    },
    /// The service answered with text instead of an image.
    Text { explanation: String },
    /// The request was refused by a safety/content filter.
    Blocked { reason: String },
}

#[derive(Debug, Error)]
pub enum GenerationError {
    #[error("generation service unreachable: {0}")]
    Network(String),

    #[error("generation service error: {0}")]
    Service(String),
}

/// Implemented by the platform shell over the vendor SDK.
#[async_trait]
pub trait TryOnService: Send + Sync {
    async fn generate(&self, request: TryOnRequest) -> Result<TryOnOutcome, GenerationError>;
}
