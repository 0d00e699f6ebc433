//! Turning a conversation into structured study material.
//!
//! Both pipelines run the same stages: build a prompt around the transcript,
//! ask the model once, clean the reply, parse it as JSON and validate it.
//! They differ in what happens when that fails: the quiz pipeline reports an
//! error, the flowchart pipeline builds a graph from the turns instead.

pub mod flowchart;
pub mod quiz;

pub use flowchart::{
    fallback_flowchart, validate_flowchart, CanvasBounds, FlowEdge, FlowNode, FlowchartExport,
    FlowchartGenerator, FlowchartGraph, NodeType, Position,
};
pub use quiz::{score, QuizGenerator, QuizQuestion, QuizScore};

use crate::error::Result;
use crate::llm::{ChatTurn, MessageRole};
use async_trait::async_trait;
use regex::Regex;
use std::fmt;
use std::sync::OnceLock;

/// Upper bound on transcript characters embedded in a prompt
pub const MAX_TRANSCRIPT_CHARS: usize = 6000;

/// One-shot text completion, implemented by the orchestrator.
#[async_trait]
pub trait TextCompleter: Send + Sync {
    async fn complete(&self, prompt: &str) -> Result<String>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExtractionStage {
    Requesting,
    Cleaning,
    Parsing,
    Validating,
    Success,
    Fallback,
}

impl fmt::Display for ExtractionStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ExtractionStage::Requesting => "requesting",
            ExtractionStage::Cleaning => "cleaning",
            ExtractionStage::Parsing => "parsing",
            ExtractionStage::Validating => "validating",
            ExtractionStage::Success => "success",
            ExtractionStage::Fallback => "fallback",
        };
        f.write_str(name)
    }
}

/// First `max_chars` characters of `text`.
pub fn truncate_chars(text: &str, max_chars: usize) -> String {
    match text.char_indices().nth(max_chars) {
        Some((byte_index, _)) => text[..byte_index].to_string(),
        None => text.to_string(),
    }
}

/// "User: ..." / "Assistant: ..." blocks, capped at `max_chars`.
pub fn build_transcript(turns: &[ChatTurn], max_chars: usize) -> String {
    let transcript = turns
        .iter()
        .map(|turn| {
            let speaker = match turn.role {
                MessageRole::User => "User",
                MessageRole::Assistant => "Assistant",
            };
            format!("{}: {}", speaker, turn.content.trim())
        })
        .collect::<Vec<_>>()
        .join("\n\n");
    truncate_chars(&transcript, max_chars)
}

fn fence_regex() -> &'static Regex {
    static FENCE: OnceLock<Regex> = OnceLock::new();
    FENCE.get_or_init(|| Regex::new(r"```[A-Za-z0-9_-]*").expect("fence pattern is valid"))
}

/// Remove Markdown code fence markers (with or without a language tag).
pub fn strip_code_fences(text: &str) -> String {
    fence_regex().replace_all(text, "").trim().to_string()
}

/// Span from the first `{` to the last `}`, if there is one.
pub fn slice_json_object(text: &str) -> Option<&str> {
    let start = text.find('{')?;
    let end = text.rfind('}')?;
    if end < start {
        return None;
    }
    Some(&text[start..=end])
}
