use crate::error::{Result, TutorError};
use crate::llm::{
    streaming::{fragment_stream, HttpChunkStream},
    types::*,
    utils::check_response_error,
    FragmentStream, LLMProvider,
};
use async_trait::async_trait;
use reqwest::Client;
use tracing::debug;

mod stream;
mod types;

use stream::GeminiFragmentParser;
use types::*;

/// Reply the model "gives" to the injected persona turn.
pub const PERSONA_ACKNOWLEDGEMENT: &str =
    "Understood. I will follow these instructions for the rest of our conversation.";

pub struct GeminiClient {
    client: Client,
    api_key: String,
    endpoint: String,
}

impl GeminiClient {
    pub fn default_base_url() -> String {
        "https://generativelanguage.googleapis.com/v1beta".to_string()
    }

    /// `endpoint` is the full `...:streamGenerateContent` URL with the model
    /// already filled in. The key travels as a query parameter.
    pub fn new(api_key: String, endpoint: String) -> Self {
        Self::with_client(Client::new(), api_key, endpoint)
    }

    pub fn with_client(client: Client, api_key: String, endpoint: String) -> Self {
        Self {
            client,
            api_key,
            endpoint,
        }
    }

    fn text_content(role: &str, text: &str) -> GeminiContent {
        GeminiContent {
            role: Some(role.to_string()),
            parts: vec![GeminiPart {
                text: Some(text.to_string()),
            }],
        }
    }

    fn convert_message(turn: &ChatTurn) -> GeminiContent {
        let role = match turn.role {
            MessageRole::User => "user",
            MessageRole::Assistant => "model",
        };
        Self::text_content(role, &turn.content)
    }

    /// Gemini has no system role here, so the persona goes in as a leading
    /// user turn answered by a canned model turn.
    fn build_request(&self, request: &LLMRequest) -> GeminiRequest {
        let mut contents = Vec::with_capacity(request.messages.len() + 2);

        if let Some(persona) = request
            .system_prompt
            .as_deref()
            .filter(|prompt| !prompt.trim().is_empty())
        {
            contents.push(Self::text_content("user", persona));
            contents.push(Self::text_content("model", PERSONA_ACKNOWLEDGEMENT));
        }

        contents.extend(request.messages.iter().map(Self::convert_message));

        GeminiRequest {
            contents,
            generation_config: request
                .temperature
                .map(|temperature| GenerationConfig { temperature }),
        }
    }
}

#[async_trait]
impl LLMProvider for GeminiClient {
    async fn stream_fragments(&self, request: LLMRequest) -> Result<FragmentStream> {
        let gemini_request = self.build_request(&request);
        debug!(
            "Sending streaming request to gemini ({} contents)",
            gemini_request.contents.len()
        );

        let response = self
            .client
            .post(&self.endpoint)
            .query(&[("alt", "sse"), ("key", self.api_key.as_str())])
            .header("Content-Type", "application/json")
            .json(&gemini_request)
            .send()
            .await
            .map_err(|e| TutorError::Network(e.to_string()))?;

        let response = check_response_error(response).await?;

        Ok(fragment_stream(
            HttpChunkStream::new(response),
            GeminiFragmentParser,
        ))
    }

    fn name(&self) -> &str {
        "gemini"
    }
}
