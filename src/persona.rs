//! The four tutoring personas and their system prompts.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TutorMode {
    Standard,
    Exam,
    Mentor,
    Creative,
}

impl TutorMode {
    pub const ALL: [TutorMode; 4] = [
        TutorMode::Standard,
        TutorMode::Exam,
        TutorMode::Mentor,
        TutorMode::Creative,
    ];

    pub fn id(&self) -> &'static str {
        match self {
            TutorMode::Standard => "standard",
            TutorMode::Exam => "exam",
            TutorMode::Mentor => "mentor",
            TutorMode::Creative => "creative",
        }
    }

    /// Lenient lookup: unknown ids resolve to `Standard`.
    pub fn from_id_or_default(id: &str) -> Self {
        id.parse().unwrap_or(TutorMode::Standard)
    }
}

impl Default for TutorMode {
    fn default() -> Self {
        TutorMode::Standard
    }
}

impl fmt::Display for TutorMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.id())
    }
}

impl FromStr for TutorMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "standard" => Ok(TutorMode::Standard),
            "exam" => Ok(TutorMode::Exam),
            "mentor" => Ok(TutorMode::Mentor),
            "creative" => Ok(TutorMode::Creative),
            other => Err(format!("Unknown tutor mode: {}", other)),
        }
    }
}

#[derive(Debug)]
pub struct Persona {
    pub mode: TutorMode,
    pub display_name: &'static str,
    pub description: &'static str,
    pub system_prompt: &'static str,
}

static PERSONAS: [Persona; 4] = [
    Persona {
        mode: TutorMode::Standard,
        display_name: "Standard Tutor",
        description: "Clear, balanced explanations with examples.",
        system_prompt: "You are a friendly and knowledgeable tutor. Explain concepts clearly \
and accurately, starting from what the student already knows. Use concrete examples, break \
complex ideas into small steps, and check understanding with a short question at the end of \
longer explanations. If the student is wrong, correct them gently and explain why.",
    },
    Persona {
        mode: TutorMode::Exam,
        display_name: "Exam Coach",
        description: "Focused revision, key facts and practice questions.",
        system_prompt: "You are an exam preparation coach. Focus on what is most likely to be \
tested: key definitions, formulas, and common pitfalls. Keep answers concise and structured \
with bullet points. Offer practice questions and worked solutions, point out typical mistakes, \
and suggest memory aids where they help. Prioritise efficient revision over broad exploration.",
    },
    Persona {
        mode: TutorMode::Mentor,
        display_name: "Socratic Mentor",
        description: "Guides you to the answer with questions.",
        system_prompt: "You are a Socratic mentor. Do not hand out final answers straight away. \
Guide the student toward understanding with well-chosen questions and hints, one step at a \
time. Encourage them to explain their reasoning, acknowledge progress, and only reveal the full \
solution when they are stuck after several attempts or explicitly ask for it.",
    },
    Persona {
        mode: TutorMode::Creative,
        display_name: "Creative Explorer",
        description: "Analogies, stories and unexpected connections.",
        system_prompt: "You are a creative tutor who makes ideas memorable. Explain concepts \
through vivid analogies, short stories, thought experiments, and connections to everyday life \
or other subjects. Invite the student to imagine and play with ideas, while keeping the \
underlying facts accurate.",
    },
];

pub fn persona_for(mode: TutorMode) -> &'static Persona {
    match mode {
        TutorMode::Standard => &PERSONAS[0],
        TutorMode::Exam => &PERSONAS[1],
        TutorMode::Mentor => &PERSONAS[2],
        TutorMode::Creative => &PERSONAS[3],
    }
}

/// Persona for a stored mode id; unknown ids get the standard persona.
pub fn persona_for_id(id: &str) -> &'static Persona {
    persona_for(TutorMode::from_id_or_default(id))
}

pub fn all_personas() -> &'static [Persona] {
    &PERSONAS
}
