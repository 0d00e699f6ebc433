use serde::{Deserialize, Serialize};

#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum MessageRole {
    User,
    Assistant,
}

/// One turn of the conversation history. Owned by the caller.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct ChatTurn {
    pub role: MessageRole,
    pub content: String,
}

impl ChatTurn {
    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: MessageRole::User,
            content: content.into(),
        }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: MessageRole::Assistant,
            content: content.into(),
        }
    }
}

/// Generic request structure that can be mapped to different providers
#[derive(Debug, Clone, Default)]
pub struct LLMRequest {
    pub messages: Vec<ChatTurn>,
    /// Persona text. Sent as a system message or as a synthetic turn pair,
    /// depending on the wire protocol.
    pub system_prompt: Option<String>,
    pub temperature: Option<f32>,
}

impl LLMRequest {
    pub fn new(messages: Vec<ChatTurn>) -> Self {
        Self {
            messages,
            system_prompt: None,
            temperature: None,
        }
    }

    pub fn with_system_prompt(mut self, prompt: impl Into<String>) -> Self {
        self.system_prompt = Some(prompt.into());
        self
    }

    pub fn with_temperature(mut self, temperature: f32) -> Self {
        self.temperature = Some(temperature);
        self
    }
}
