//! Core of the AI tutor: streaming chat across LLM vendors, tutoring
//! personas, quiz and flowchart extraction, and mode suggestions.

pub mod cancel;
pub mod config;
pub mod error;
pub mod extraction;
pub mod llm;
pub mod mode_detector;
pub mod orchestrator;
pub mod persistence;
pub mod persona;


pub use cancel::CancellationToken;
pub use config::{ProtocolKind, ProviderCatalog, ProviderConfig, Settings};
pub use error::{Result, TutorError};
pub use extraction::{FlowchartGenerator, QuizGenerator, TextCompleter};
pub use llm::{ChatTurn, FragmentStream, LLMProvider, MessageRole};
pub use mode_detector::{detect_mode, should_suggest, suggest_mode, DetectorConfig, ModeSuggestion};
pub use orchestrator::StreamOrchestrator;
pub use persistence::{FileKeyValueStore, KeyValueStore, MemoryKeyValueStore};
pub use persona::{persona_for, persona_for_id, Persona, TutorMode};
