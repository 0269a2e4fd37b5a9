//! Text-generation service boundary.
//!
//! The rest of the workspace only sees [`TextGenerator`]: a prompt (optionally
//! with one image) goes in, free text comes out. [`OpenRouterClient`] is the
//! production implementation.

mod openrouter;

use async_trait::async_trait;

use studyforge_shared::Result;

pub use openrouter::OpenRouterClient;

/// An inline image attached to a generation request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImageInput {
    pub mime_type: String,
    /// Base64 payload without a `data:` prefix.
    pub base64: String,
}

impl ImageInput {
    /// Render as a `data:` URL.
    pub fn data_url(&self) -> String {
        format!("data:{};base64,{}", self.mime_type, self.base64)
    }
}

/// A single prompt, optionally multimodal.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GenerationRequest {
    pub prompt: String,
    pub image: Option<ImageInput>,
}

impl GenerationRequest {
    pub fn text(prompt: impl Into<String>) -> Self {
        Self {
            prompt: prompt.into(),
            image: None,
        }
    }

    pub fn with_image(prompt: impl Into<String>, image: ImageInput) -> Self {
        Self {
            prompt: prompt.into(),
            image: Some(image),
        }
    }
}

/// Black-box text generation: no formatting guarantees on the output.
///
/// Implementations map transport and service failures to
/// [`StudyForgeError::UpstreamUnavailable`](studyforge_shared::StudyForgeError::UpstreamUnavailable).
#[async_trait]
pub trait TextGenerator: Send + Sync {
    async fn generate(&self, request: &GenerationRequest) -> Result<String>;
}
