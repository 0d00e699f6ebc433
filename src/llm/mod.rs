//! Provider adapters: one trait, two wire protocols.
//!
//! - `openai`: OpenAI-compatible chat completions (OpenAI, Groq)
//! - `gemini`: Gemini `streamGenerateContent`
//! - `streaming`: SSE line handling shared by both

pub mod gemini;
pub mod openai;
pub mod streaming;
pub mod types;
mod utils;


pub use gemini::GeminiClient;
pub use openai::OpenAIClient;
pub use types::*;

use crate::error::Result;
use async_trait::async_trait;
use futures::Stream;
use std::pin::Pin;

/// Lazy, append-only sequence of text fragments from one response.
pub type FragmentStream = Pin<Box<dyn Stream<Item = Result<String>> + Send>>;

/// Trait for different LLM provider implementations
#[async_trait]
pub trait LLMProvider: Send + Sync {
    /// Opens one streaming request. Every call is a fresh transport
    /// connection; the returned stream cannot be restarted.
    async fn stream_fragments(&self, request: LLMRequest) -> Result<FragmentStream>;

    /// Send a request and wait for the whole reply.
    async fn complete(&self, request: LLMRequest) -> Result<String> {
        let fragments = self.stream_fragments(request).await?;
        streaming::collect_fragments(fragments).await
    }

    /// Provider name used in logs (e.g. "openai", "groq", "gemini")
    fn name(&self) -> &str;
}
