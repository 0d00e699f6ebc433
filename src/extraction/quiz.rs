use super::{build_transcript, strip_code_fences, ExtractionStage, TextCompleter, MAX_TRANSCRIPT_CHARS};
use crate::error::{Result, TutorError};
use crate::llm::ChatTurn;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, info};

pub const DEFAULT_QUESTION_COUNT: usize = 5;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QuizQuestion {
    pub id: String,
    pub question: String,
    /// In the order the model wrote them
    pub options: [String; 4],
    pub correct_index: usize,
    pub explanation: String,
    pub selected_index: Option<usize>,
    pub is_correct: Option<bool>,
}

impl QuizQuestion {
    /// Record the student's choice. Returns whether it was correct, or
    /// `None` if `selected` is not a valid option index.
    pub fn answer(&mut self, selected: usize) -> Option<bool> {
        if selected >= self.options.len() {
            return None;
        }
        let correct = selected == self.correct_index;
        self.selected_index = Some(selected);
        self.is_correct = Some(correct);
        Some(correct)
    }

    pub fn correct_option(&self) -> &str {
        &self.options[self.correct_index]
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct QuizScore {
    pub total: usize,
    pub answered: usize,
    pub correct: usize,
}

impl QuizScore {
    /// Share of all questions answered correctly, 0-100
    pub fn percentage(&self) -> u32 {
        if self.total == 0 {
            return 0;
        }
        ((self.correct * 100) as f64 / self.total as f64).round() as u32
    }
}

pub fn score(questions: &[QuizQuestion]) -> QuizScore {
    QuizScore {
        total: questions.len(),
        answered: questions.iter().filter(|q| q.selected_index.is_some()).count(),
        correct: questions.iter().filter(|q| q.is_correct == Some(true)).count(),
    }
}

/// Builds multiple-choice questions from a conversation.
///
/// Strict: any unusable model output is an [`TutorError::Extraction`].
pub struct QuizGenerator<C> {
    completer: C,
    question_count: usize,
}

impl<C: TextCompleter> QuizGenerator<C> {
    pub fn new(completer: C) -> Self {
        Self {
            completer,
            question_count: DEFAULT_QUESTION_COUNT,
        }
    }

    pub fn with_question_count(mut self, count: usize) -> Self {
        self.question_count = count.max(1);
        self
    }

    pub async fn generate(&self, turns: &[ChatTurn]) -> Result<Vec<QuizQuestion>> {
        if turns.is_empty() {
            return Err(TutorError::Extraction(
                "Cannot build a quiz from an empty conversation".to_string(),
            ));
        }

        debug!("Quiz stage: {}", ExtractionStage::Requesting);
        let prompt = self.build_prompt(turns);
        let reply = self.completer.complete(&prompt).await?;

        debug!("Quiz stage: {}", ExtractionStage::Cleaning);
        let cleaned = strip_code_fences(&reply);

        debug!("Quiz stage: {}", ExtractionStage::Parsing);
        let raw: Value = serde_json::from_str(&cleaned)
            .map_err(|e| TutorError::Extraction(format!("Quiz reply is not valid JSON: {}", e)))?;

        debug!("Quiz stage: {}", ExtractionStage::Validating);
        let questions = parse_questions(&raw, &chrono::Utc::now().timestamp_millis().to_string())?;

        debug!("Quiz stage: {}", ExtractionStage::Success);
        info!("Generated quiz with {} questions", questions.len());
        Ok(questions)
    }

    fn build_prompt(&self, turns: &[ChatTurn]) -> String {
        format!(
            r#"Based on the following tutoring conversation, write {count} multiple-choice questions that check understanding of the key concepts discussed.

Conversation:
{transcript}

Respond with ONLY valid JSON, no commentary, in exactly this format:
{{"questions":[{{"question":"...","options":["...","...","...","..."],"answer":"...","explanation":"..."}}]}}

Rules:
- Every question has exactly 4 options.
- "answer" is copied character for character from one of the options.
- "explanation" says briefly why the answer is correct.
- Vary which option position holds the correct answer."#,
            count = self.question_count,
            transcript = build_transcript(turns, MAX_TRANSCRIPT_CHARS),
        )
    }
}

fn extraction_error(message: String) -> TutorError {
    TutorError::Extraction(message)
}

fn parse_questions(raw: &Value, id_prefix: &str) -> Result<Vec<QuizQuestion>> {
    let entries = raw
        .get("questions")
        .and_then(Value::as_array)
        .ok_or_else(|| extraction_error("Quiz reply has no \"questions\" array".to_string()))?;

    if entries.is_empty() {
        return Err(extraction_error("Quiz reply contains no questions".to_string()));
    }

    entries
        .iter()
        .enumerate()
        .map(|(index, entry)| parse_question(entry, index, id_prefix))
        .collect()
}

fn parse_question(entry: &Value, index: usize, id_prefix: &str) -> Result<QuizQuestion> {
    let number = index + 1;

    let question = entry
        .get("question")
        .and_then(Value::as_str)
        .map(str::trim)
        .filter(|q| !q.is_empty())
        .ok_or_else(|| extraction_error(format!("Question {} has no text", number)))?;

    let options: Vec<String> = entry
        .get("options")
        .and_then(Value::as_array)
        .ok_or_else(|| extraction_error(format!("Question {} has no options array", number)))?
        .iter()
        .map(|option| option.as_str().map(str::to_string))
        .collect::<Option<Vec<_>>>()
        .ok_or_else(|| extraction_error(format!("Question {} has a non-text option", number)))?;

    let options: [String; 4] = options.try_into().map_err(|options: Vec<String>| {
        extraction_error(format!(
            "Question {} has {} options, expected 4",
            number,
            options.len()
        ))
    })?;

    let answer = entry
        .get("answer")
        .and_then(Value::as_str)
        .ok_or_else(|| extraction_error(format!("Question {} has no answer", number)))?;

    let correct_index = options
        .iter()
        .position(|option| option == answer)
        .or_else(|| {
            options
                .iter()
                .position(|option| option.trim() == answer.trim())
        })
        .ok_or_else(|| {
            extraction_error(format!(
                "Answer of question {} (\"{}\") is not one of its options",
                number, answer
            ))
        })?;

    let explanation = entry
        .get("explanation")
        .and_then(Value::as_str)
        .unwrap_or_default()
        .trim()
        .to_string();

    Ok(QuizQuestion {
        id: format!("q-{}-{}", id_prefix, number),
        question: question.to_string(),
        options,
        correct_index,
        explanation,
        selected_index: None,
        is_correct: None,
    })
}
