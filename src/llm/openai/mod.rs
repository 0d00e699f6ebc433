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

use stream::OpenAIFragmentParser;
use types::*;

/// Client for any vendor that speaks the OpenAI chat-completions protocol.
pub struct OpenAIClient {
    client: Client,
    api_key: String,
    model: String,
    endpoint: String,
    name: String,
}

impl OpenAIClient {
    pub fn default_base_url() -> String {
        "https://api.openai.com/v1".to_string()
    }

    /// `endpoint` is the full chat-completions URL.
    pub fn new(api_key: String, model: String, endpoint: String) -> Self {
        Self::with_client(Client::new(), api_key, model, endpoint)
    }

    pub fn with_client(client: Client, api_key: String, model: String, endpoint: String) -> Self {
        Self {
            client,
            api_key,
            model,
            endpoint,
            name: "openai".to_string(),
        }
    }

    /// Report under another vendor name (e.g. "groq") in logs.
    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    fn convert_message(turn: &ChatTurn) -> OpenAIChatMessage {
        OpenAIChatMessage {
            role: match turn.role {
                MessageRole::User => "user".to_string(),
                MessageRole::Assistant => "assistant".to_string(),
            },
            content: turn.content.clone(),
        }
    }

    fn build_request(&self, request: &LLMRequest) -> OpenAIRequest {
        let mut messages = Vec::with_capacity(request.messages.len() + 1);

        if let Some(system_prompt) = request
            .system_prompt
            .as_deref()
            .filter(|prompt| !prompt.trim().is_empty())
        {
            messages.push(OpenAIChatMessage {
                role: "system".to_string(),
                content: system_prompt.to_string(),
            });
        }

        messages.extend(request.messages.iter().map(Self::convert_message));

        OpenAIRequest {
            model: self.model.clone(),
            messages,
            stream: true,
            temperature: request.temperature,
        }
    }
}

#[async_trait]
impl LLMProvider for OpenAIClient {
    async fn stream_fragments(&self, request: LLMRequest) -> Result<FragmentStream> {
        let openai_request = self.build_request(&request);
        debug!(
            "Sending streaming request to {} ({} messages, model {})",
            self.name,
            openai_request.messages.len(),
            self.model
        );

        let response = self
            .client
            .post(&self.endpoint)
            .bearer_auth(&self.api_key)
            .header("Content-Type", "application/json")
            .json(&openai_request)
            .send()
            .await
            .map_err(|e| TutorError::Network(e.to_string()))?;

        let response = check_response_error(response).await?;

        Ok(fragment_stream(
            HttpChunkStream::new(response),
            OpenAIFragmentParser::new(self.name.clone()),
        ))
    }

    fn name(&self) -> &str {
        &self.name
    }
}
