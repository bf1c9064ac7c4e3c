//! Generation capability seam.
//!
//! The tool loop never talks to a model provider directly; it drives a
//! [`Generator`], which turns the conversation so far into a stream of
//! [`GenerationEvent`]s.

use async_trait::async_trait;
use futures::stream::BoxStream;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio_util::sync::CancellationToken;

use super::errors::GenerationError;
use super::types::ConversationMessage;
use crate::tools::ModelToolSchema;

/// Capability name marking a model that produces images instead of text.
pub const IMAGE_GENERATION_CAPABILITY: &str = "image_generation";

/// The model a generator targets.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModelInfo {
    pub id: String,
    pub provider: String,
    /// Provider-reported capabilities, e.g. `"tools"`, `"vision"`.
    #[serde(default)]
    pub capabilities: Vec<String>,
}

impl ModelInfo {
    pub fn has_capability(&self, capability: &str) -> bool {
        self.capabilities.iter().any(|c| c == capability)
    }

    /// Image models take the single-shot path instead of the tool loop.
    pub fn supports_image_generation(&self) -> bool {
        self.has_capability(IMAGE_GENERATION_CAPABILITY)
    }
}

/// Sampling parameters forwarded to the provider.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct GenerationOptions {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_tokens: Option<u32>,
}

#[derive(Debug, Clone)]
pub struct GenerationRequest {
    pub messages: Vec<ConversationMessage>,
    /// Enabled tools; empty for image generation.
    pub tools: Vec<ModelToolSchema>,
    pub options: GenerationOptions,
}

/// One item of a generation stream.
#[derive(Debug, Clone, PartialEq)]
pub enum GenerationEvent {
    TextDelta(String),
    ReasoningDelta(String),
    /// A complete tool call. `id` may be empty if the provider assigns none.
    ToolCallRequest {
        id: String,
        name: String,
        arguments: Value,
    },
    Usage {
        prompt_tokens: u32,
        completion_tokens: u32,
    },
    Done,
}

pub type GenerationStream = BoxStream<'static, Result<GenerationEvent, GenerationError>>;

/// Result of a single-shot image generation.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct GeneratedImage {
    /// Optional caption or revised prompt.
    pub text: String,
    /// Data URLs or file paths.
    pub images: Vec<String>,
}

#[async_trait]
pub trait Generator: Send + Sync {
    fn model_info(&self) -> ModelInfo;

    /// Start streaming a response. Implementations should stop promptly
    /// once `abort` is cancelled.
    async fn generate(
        &self,
        request: GenerationRequest,
        abort: CancellationToken,
    ) -> Result<GenerationStream, GenerationError>;

    async fn generate_image(
        &self,
        _request: GenerationRequest,
        _abort: CancellationToken,
    ) -> Result<GeneratedImage, GenerationError> {
        Err(GenerationError::Unsupported {
            reason: format!("model '{}' does not generate images", self.model_info().id),
        })
    }
}
