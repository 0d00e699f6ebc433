use super::types::GeminiStreamResponse;
use crate::llm::streaming::SseFragmentParser;

/// Concatenates the text parts of the first candidate in each event.
pub struct GeminiFragmentParser;

impl SseFragmentParser for GeminiFragmentParser {
    fn provider_name(&self) -> &str {
        "gemini"
    }

    fn parse_payload(&self, payload: &str) -> serde_json::Result<Option<String>> {
        let event: GeminiStreamResponse = serde_json::from_str(payload)?;
        let text: String = event
            .candidates
            .into_iter()
            .next()
            .and_then(|candidate| candidate.content)
            .map(|content| {
                content
                    .parts
                    .into_iter()
                    .filter_map(|part| part.text)
                    .collect()
            })
            .unwrap_or_default();

        Ok(if text.is_empty() { None } else { Some(text) })
    }
}
