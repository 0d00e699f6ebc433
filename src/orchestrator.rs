use crate::cancel::CancellationToken;
use crate::config::{ProtocolKind, ProviderCatalog, ProviderConfig, Settings};
use crate::error::Result;
use crate::extraction::TextCompleter;
use crate::llm::{
    ChatTurn, FragmentStream, GeminiClient, LLMProvider, LLMRequest, OpenAIClient,
};
use crate::persona::persona_for_id;
use async_trait::async_trait;
use futures::stream::{self, StreamExt};
use reqwest::{Client, ClientBuilder};
use std::time::Duration;
use tracing::{debug, info, warn};

const CONNECT_TIMEOUT: Duration = Duration::from_secs(15);

/// Build the adapter for a resolved provider configuration.
pub fn create_provider(config: &ProviderConfig, client: Client) -> Box<dyn LLMProvider> {
    match config.protocol {
        ProtocolKind::OpenAiCompatible => Box::new(
            OpenAIClient::with_client(
                client,
                config.api_key.clone(),
                config.model.clone(),
                config.endpoint(),
            )
            .with_name(config.id.clone()),
        ),
        ProtocolKind::Gemini => Box::new(GeminiClient::with_client(
            client,
            config.api_key.clone(),
            config.endpoint(),
        )),
    }
}

/// Entry point for chat sends and one-shot completions.
///
/// Holds an immutable settings snapshot; concurrent calls share nothing else.
pub struct StreamOrchestrator {
    settings: Settings,
    catalog: ProviderCatalog,
    client: Client,
}

impl StreamOrchestrator {
    pub fn new(settings: Settings) -> Self {
        let client = build_client(Client::builder().connect_timeout(CONNECT_TIMEOUT));
        Self {
            settings,
            catalog: ProviderCatalog::builtin(),
            client,
        }
    }

    pub fn with_catalog(mut self, catalog: ProviderCatalog) -> Self {
        self.catalog = catalog;
        self
    }

    pub fn settings(&self) -> &Settings {
        &self.settings
    }

    fn resolve(&self) -> Result<(ProviderConfig, Box<dyn LLMProvider>)> {
        let config = self.settings.resolve_provider(&self.catalog)?;
        let provider = create_provider(&config, self.client.clone());
        Ok((config, provider))
    }

    /// Stream the tutor's reply to `turns` in the configured persona.
    ///
    /// Configuration problems surface before any request is sent. Once
    /// `cancel` fires the returned stream ends at the next pull and the
    /// underlying transport is dropped.
    pub async fn generate_streaming_response(
        &self,
        turns: &[ChatTurn],
        cancel: &CancellationToken,
    ) -> Result<FragmentStream> {
        let (config, provider) = self.resolve()?;
        let persona = persona_for_id(&self.settings.tutor_mode);

        if cancel.is_cancelled() {
            debug!("Chat send cancelled before the request was made");
            return Ok(stream::empty().boxed());
        }

        info!(
            "Streaming from {} ({}, model {}) as {}",
            config.id, config.protocol, config.model, persona.mode
        );

        let request = LLMRequest::new(turns.to_vec()).with_system_prompt(persona.system_prompt);
        let fragments = provider.stream_fragments(request).await?;
        Ok(guard_with_cancellation(fragments, cancel.clone()))
    }

    /// Single-prompt, persona-free call used by the extraction pipelines.
    pub async fn complete(&self, prompt: &str) -> Result<String> {
        let (config, provider) = self.resolve()?;
        debug!("One-shot completion via {} ({})", config.id, config.model);
        provider
            .complete(LLMRequest::new(vec![ChatTurn::user(prompt)]))
            .await
    }
}

#[async_trait]
impl TextCompleter for StreamOrchestrator {
    async fn complete(&self, prompt: &str) -> Result<String> {
        StreamOrchestrator::complete(self, prompt).await
    }
}

fn build_client(builder: ClientBuilder) -> Client {
    builder.build().unwrap_or_else(|e| {
        warn!("Failed to configure HTTP client, using defaults without connect timeout: {}", e);
        Client::new()
    })
}

/// Checks `cancel` around every pull from `inner`.
fn guard_with_cancellation(inner: FragmentStream, cancel: CancellationToken) -> FragmentStream {
    stream::unfold(Some(inner), move |state| {
        let cancel = cancel.clone();
        async move {
            let mut inner = state?;
            if cancel.is_cancelled() {
                debug!("Stream cancelled, dropping transport");
                return None;
            }
            let item = inner.next().await?;
            if cancel.is_cancelled() {
                debug!("Stream cancelled while waiting, discarding fragment");
                return None;
            }
            Some((item, Some(inner)))
        }
    })
    .boxed()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::TutorError;
    use crate::persona::{persona_for, TutorMode};
    use crate::tests::mock_server::{gemini_chunks, openai_chunks, MockReply, MockServer};

    fn settings(provider: &str, base_url: &str) -> Settings {
        let mut settings = Settings {
            selected_provider: provider.to_string(),
            tutor_mode: "exam".to_string(),
            ..Settings::default()
        };
        settings
            .api_keys
            .insert(provider.to_string(), "test-key".to_string());
        settings
            .base_urls
            .insert(provider.to_string(), base_url.to_string());
        settings
    }

    fn turns() -> Vec<ChatTurn> {
        vec![ChatTurn::user("Explain osmosis")]
    }

    #[tokio::test]
    async fn test_missing_credential_makes_no_network_call() {
        let server = MockServer::start(MockReply::Sse(openai_chunks(&["never"]))).await;
        let mut settings = settings("openai", &server.base_url);
        settings.api_keys.clear();

        let orchestrator = StreamOrchestrator::new(settings);
        let result = orchestrator
            .generate_streaming_response(&turns(), &CancellationToken::new())
            .await;

        assert!(matches!(result, Err(TutorError::Configuration(_))));
        assert!(matches!(
            orchestrator.complete("hi").await,
            Err(TutorError::Configuration(_))
        ));
        assert_eq!(server.hits(), 0);
    }

    #[tokio::test]
    async fn test_unknown_provider_is_configuration_error() {
        let server = MockServer::start(MockReply::Sse(openai_chunks(&["never"]))).await;
        let orchestrator = StreamOrchestrator::new(settings("mystery", &server.base_url));
        let result = orchestrator
            .generate_streaming_response(&turns(), &CancellationToken::new())
            .await;
        assert!(matches!(result, Err(TutorError::Configuration(_))));
        assert_eq!(server.hits(), 0);
    }

    #[tokio::test]
    async fn test_streams_with_persona_for_openai_vendor() {
        let server = MockServer::start(MockReply::Sse(openai_chunks(&["Water ", "moves."]))).await;
        let orchestrator = StreamOrchestrator::new(settings("groq", &server.base_url));

        let stream = orchestrator
            .generate_streaming_response(&turns(), &CancellationToken::new())
            .await
            .unwrap();
        let fragments: Vec<String> = stream.map(|f| f.unwrap()).collect().await;
        assert_eq!(fragments.concat(), "Water moves.");

        let captured = &server.requests()[0];
        assert_eq!(captured.body["model"], "llama-3.3-70b-versatile");
        assert_eq!(
            captured.body["messages"][0]["content"],
            persona_for(TutorMode::Exam).system_prompt
        );
    }

    #[tokio::test]
    async fn test_unknown_mode_uses_standard_persona_on_gemini() {
        let server = MockServer::start(MockReply::Sse(gemini_chunks(&["ok"]))).await;
        let mut settings = settings("gemini", &server.base_url);
        settings.tutor_mode = "pirate".to_string();

        let stream = StreamOrchestrator::new(settings)
            .generate_streaming_response(&turns(), &CancellationToken::new())
            .await
            .unwrap();
        let _: Vec<_> = stream.collect().await;

        let captured = &server.requests()[0];
        assert_eq!(captured.path, "/models/gemini-2.0-flash:streamGenerateContent");
        assert_eq!(
            captured.body["contents"][0]["parts"][0]["text"],
            persona_for(TutorMode::Standard).system_prompt
        );
    }

    #[tokio::test]
    async fn test_cancel_after_k_fragments() {
        let server =
            MockServer::start(MockReply::Sse(openai_chunks(&["a", "b", "c", "d", "e"]))).await;
        let orchestrator = StreamOrchestrator::new(settings("openai", &server.base_url));
        let cancel = CancellationToken::new();

        let mut stream = orchestrator
            .generate_streaming_response(&turns(), &cancel)
            .await
            .unwrap();

        let mut received = Vec::new();
        while let Some(fragment) = stream.next().await {
            received.push(fragment.unwrap());
            if received.len() == 2 {
                cancel.cancel();
            }
        }
        assert_eq!(received, vec!["a", "b"]);
    }

    async fn fragments_until_cancelled(cancel_after: usize) -> Vec<String> {
        let server =
            MockServer::start(MockReply::Sse(openai_chunks(&["a", "b", "c", "d", "e"]))).await;
        let orchestrator = StreamOrchestrator::new(settings("openai", &server.base_url));
        let cancel = CancellationToken::new();

        let mut stream = orchestrator
            .generate_streaming_response(&turns(), &cancel)
            .await
            .unwrap();
        if cancel_after == 0 {
            cancel.cancel();
        }

        let mut received = Vec::new();
        while let Some(fragment) = stream.next().await {
            received.push(fragment.unwrap());
            if received.len() == cancel_after {
                cancel.cancel();
            }
        }
        received
    }

    #[tokio::test]
    async fn test_cancel_at_stream_boundaries() {
        assert!(fragments_until_cancelled(0).await.is_empty());
        assert_eq!(fragments_until_cancelled(1).await, vec!["a"]);
        assert_eq!(
            fragments_until_cancelled(5).await,
            vec!["a", "b", "c", "d", "e"]
        );
    }

    #[test]
    fn test_client_builder_error_falls_back_to_default_client() {
        let _client = build_client(Client::builder().user_agent("bad\nagent"));
    }

    #[tokio::test]
    async fn test_cancelled_before_send_yields_nothing() {
        let server = MockServer::start(MockReply::Sse(openai_chunks(&["a"]))).await;
        let orchestrator = StreamOrchestrator::new(settings("openai", &server.base_url));
        let cancel = CancellationToken::new();
        cancel.cancel();

        let stream = orchestrator
            .generate_streaming_response(&turns(), &cancel)
            .await
            .unwrap();
        assert_eq!(stream.count().await, 0);
        assert_eq!(server.hits(), 0);
    }

    #[tokio::test]
    async fn test_complete_sends_single_turn_without_persona() {
        let server = MockServer::start(MockReply::Sse(openai_chunks(&["{\"ok\":", "true}"]))).await;
        let orchestrator = StreamOrchestrator::new(settings("openai", &server.base_url));

        let text = TextCompleter::complete(&orchestrator, "Make a quiz").await.unwrap();
        assert_eq!(text, "{\"ok\":true}");

        let messages = server.requests()[0].body["messages"].as_array().unwrap().clone();
        assert_eq!(messages.len(), 1);
        assert_eq!(messages[0]["role"], "user");
        assert_eq!(messages[0]["content"], "Make a quiz");
    }
}
