use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use super::client_types::ChatError;

/// One contract clause as returned by the classifier.
///
/// In summary mode `title` carries the wire `topic` field.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClauseRecord {
    pub title: String,
    pub description: String,
}

impl ClauseRecord {
    pub fn new(title: impl Into<String>, description: impl Into<String>) -> Self {
        Self {
            title: title.into(),
            description: description.into(),
        }
    }

    /// The string used for duplicate suppression under `mode`.
    pub fn identity(&self, mode: AnalysisMode) -> &str {
        match mode {
            AnalysisMode::Detailed => &self.title,
            AnalysisMode::Summary => &self.description,
        }
    }
}

/// How clauses are requested from the text model.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AnalysisMode {
    /// Every clause, explained in plain language. Identity is the title.
    #[default]
    Detailed,
    /// Only risky or unusual clauses. Identity is the description.
    Summary,
}

impl AnalysisMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            AnalysisMode::Detailed => "detailed",
            AnalysisMode::Summary => "summary",
        }
    }

    /// Name of the title-bearing field in the wire JSON.
    pub fn title_field(&self) -> &'static str {
        match self {
            AnalysisMode::Detailed => "clause_title",
            AnalysisMode::Summary => "topic",
        }
    }
}

impl fmt::Display for AnalysisMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for AnalysisMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "detailed" => Ok(AnalysisMode::Detailed),
            "summary" => Ok(AnalysisMode::Summary),
            other => Err(format!("unknown analysis mode '{other}' (expected detailed or summary)")),
        }
    }
}

/// Text completion abstraction (allows mocking).
pub trait LlmClient: Send + Sync {
    /// Send one user prompt, optionally preceded by a system prompt, and
    /// return the raw content of the first choice.
    fn generate(&self, model: &str, prompt: &str, system: Option<&str>)
        -> Result<String, ChatError>;
}

/// Vision completion abstraction (allows mocking).
pub trait VisionClient: Send + Sync {
    /// `images` are base64-encoded PNGs, sent in order after `prompt`.
    fn chat_with_images(
        &self,
        model: &str,
        prompt: &str,
        images: &[String],
        system: Option<&str>,
    ) -> Result<String, ChatError>;
}
