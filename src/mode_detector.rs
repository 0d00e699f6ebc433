//! Keyword heuristics that propose a persona from the student's first message.
//!
//! Scoring is deterministic: each pattern that matches adds its weight to its
//! mode, confidence is the score divided by a saturation score (capped at 1),
//! and the best-scoring mode wins. Everything numeric lives in
//! [`DetectorConfig`] so hosts can tune it from the settings store.

use crate::error::Result;
use crate::persistence::{load_json, KeyValueStore};
use crate::persona::TutorMode;
use regex::{Regex, RegexBuilder};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModePattern {
    pub mode: TutorMode,
    /// Case-insensitive regular expression
    pub pattern: String,
    pub weight: f32,
}

impl ModePattern {
    fn new(mode: TutorMode, pattern: &str, weight: f32) -> Self {
        Self {
            mode,
            pattern: pattern.to_string(),
            weight,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DetectorConfig {
    /// Suggestions below this confidence are not surfaced.
    pub min_confidence: f32,
    /// Score at which confidence reaches 1.0.
    pub saturation_score: f32,
    pub patterns: Vec<ModePattern>,
}

impl Default for DetectorConfig {
    fn default() -> Self {
        use TutorMode::*;
        Self {
            min_confidence: 0.5,
            saturation_score: 3.0,
            patterns: vec![
                ModePattern::new(Exam, r"\b(exams?|midterms?|finals?|tests?)\b", 1.0),
                ModePattern::new(Exam, r"\b(tomorrow|tonight|next week|this week|soon)\b", 1.0),
                ModePattern::new(Exam, r"\b(quiz|test) me\b", 2.0),
                ModePattern::new(
                    Exam,
                    r"\b(revise|revision|review|cram(ming)?|study guide|practice questions?)\b",
                    1.0,
                ),
                ModePattern::new(Exam, r"\b(pass|grade|score|marks?)\b", 0.5),
                ModePattern::new(
                    Mentor,
                    r"\b(guide me|walk me through|step by step|help me understand)\b",
                    1.0,
                ),
                ModePattern::new(
                    Mentor,
                    r"\b(don'?t (just )?(tell|give) me the answer|give me (a )?hints?|hints? only)\b",
                    2.0,
                ),
                ModePattern::new(
                    Mentor,
                    r"\b(mentor|advice|career|struggling|stuck|confused)\b",
                    1.0,
                ),
                ModePattern::new(Mentor, r"\bwhy (does|do|is|are)\b", 0.5),
                ModePattern::new(
                    Creative,
                    r"\b(creative(ly)?|imagine|story|stories|brainstorm)\b",
                    1.0,
                ),
                ModePattern::new(Creative, r"\b(analog(y|ies)|metaphors?)\b", 2.0),
                ModePattern::new(
                    Creative,
                    r"\b(explain (it |this )?like i'?m|eli5|make it fun)\b",
                    2.0,
                ),
                ModePattern::new(Creative, r"\b(fun|playful|game)\b", 0.5),
            ],
        }
    }
}

impl DetectorConfig {
    pub const STORE_KEY: &'static str = "mode_detector";

    /// Load overrides from the store, or the built-in configuration.
    pub fn load(store: &dyn KeyValueStore) -> Result<Self> {
        Ok(load_json(store, Self::STORE_KEY)?.unwrap_or_default())
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ModeSuggestion {
    pub mode: TutorMode,
    /// 0.0..=1.0
    pub confidence: f32,
    /// Matched text fragments, in pattern order
    pub matched: Vec<String>,
}

/// Modes that can be suggested, in tie-break order
const CANDIDATE_MODES: [TutorMode; 3] = [TutorMode::Exam, TutorMode::Mentor, TutorMode::Creative];

/// A [`DetectorConfig`] with its patterns compiled.
pub struct ModeDetector {
    patterns: Vec<(TutorMode, Regex, f32)>,
    min_confidence: f32,
    saturation_score: f32,
}

impl ModeDetector {
    /// Invalid patterns are logged and left out.
    pub fn new(config: &DetectorConfig) -> Self {
        let patterns = config
            .patterns
            .iter()
            .filter_map(|p| {
                match RegexBuilder::new(&p.pattern).case_insensitive(true).build() {
                    Ok(regex) => Some((p.mode, regex, p.weight)),
                    Err(e) => {
                        warn!("Ignoring invalid mode pattern '{}': {}", p.pattern, e);
                        None
                    }
                }
            })
            .collect();

        Self {
            patterns,
            min_confidence: config.min_confidence,
            saturation_score: config.saturation_score,
        }
    }

    pub fn detect(&self, message: &str) -> Option<ModeSuggestion> {
        let mut best: Option<ModeSuggestion> = None;
        let mut best_score = 0.0f32;

        for mode in CANDIDATE_MODES {
            let mut score = 0.0f32;
            let mut matched = Vec::new();
            for (_, regex, weight) in self.patterns.iter().filter(|(m, _, _)| *m == mode) {
                if let Some(found) = regex.find(message) {
                    score += weight;
                    matched.push(found.as_str().to_string());
                }
            }

            // Strictly greater keeps the earlier mode on ties.
            if score > best_score {
                best_score = score;
                best = Some(ModeSuggestion {
                    mode,
                    confidence: self.confidence(score),
                    matched,
                });
            }
        }

        if let Some(suggestion) = &best {
            debug!(
                "Detected {} mode (confidence {:.2}, matched {:?})",
                suggestion.mode, suggestion.confidence, suggestion.matched
            );
        }
        best
    }

    fn confidence(&self, score: f32) -> f32 {
        if self.saturation_score <= 0.0 {
            return 1.0;
        }
        (score / self.saturation_score).clamp(0.0, 1.0)
    }

    pub fn should_suggest(&self, suggestion: &ModeSuggestion, active: TutorMode) -> bool {
        worth_suggesting(suggestion, active, self.min_confidence)
    }

    pub fn suggest(&self, message: &str, active: TutorMode) -> Option<ModeSuggestion> {
        self.detect(message)
            .filter(|suggestion| self.should_suggest(suggestion, active))
    }
}

/// Best persona for `message`, or `None` if nothing matched.
pub fn detect_mode(message: &str, config: &DetectorConfig) -> Option<ModeSuggestion> {
    ModeDetector::new(config).detect(message)
}

fn worth_suggesting(suggestion: &ModeSuggestion, active: TutorMode, min_confidence: f32) -> bool {
    suggestion.mode != active && suggestion.confidence >= min_confidence
}

/// False when the suggestion is already active or too weak.
pub fn should_suggest(suggestion: &ModeSuggestion, active: TutorMode, config: &DetectorConfig) -> bool {
    worth_suggesting(suggestion, active, config.min_confidence)
}

pub fn suggest_mode(
    message: &str,
    active: TutorMode,
    config: &DetectorConfig,
) -> Option<ModeSuggestion> {
    ModeDetector::new(config).suggest(message, active)
}
