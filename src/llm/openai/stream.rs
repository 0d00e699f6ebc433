use super::types::OpenAIStreamResponse;
use crate::llm::streaming::SseFragmentParser;

/// Extracts `choices[0].delta.content` from chat-completion chunks.
pub struct OpenAIFragmentParser {
    provider_name: String,
}

impl OpenAIFragmentParser {
    pub fn new(provider_name: impl Into<String>) -> Self {
        Self {
            provider_name: provider_name.into(),
        }
    }
}

impl SseFragmentParser for OpenAIFragmentParser {
    fn provider_name(&self) -> &str {
        &self.provider_name
    }

    fn parse_payload(&self, payload: &str) -> serde_json::Result<Option<String>> {
        let chunk: OpenAIStreamResponse = serde_json::from_str(payload)?;
        Ok(chunk
            .choices
            .into_iter()
            .next()
            .and_then(|choice| choice.delta.content))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parses_content_delta() {
        let parser = OpenAIFragmentParser::new("openai");
        let payload = r#"{"choices":[{"delta":{"content":"Hi"},"finish_reason":null}]}"#;
        assert_eq!(parser.parse_payload(payload).unwrap().as_deref(), Some("Hi"));
    }

    #[test]
    fn test_role_only_and_usage_chunks_carry_no_text() {
        let parser = OpenAIFragmentParser::new("openai");
        let role_only = r#"{"choices":[{"delta":{"role":"assistant"}}]}"#;
        let usage_only = r#"{"choices":[],"usage":{"prompt_tokens":3}}"#;
        assert_eq!(parser.parse_payload(role_only).unwrap(), None);
        assert_eq!(parser.parse_payload(usage_only).unwrap(), None);
    }

    #[test]
    fn test_invalid_json_is_an_error() {
        let parser = OpenAIFragmentParser::new("groq");
        assert!(parser.parse_payload("{\"choices\": [").is_err());
    }
}
