pub mod types;
pub mod client_types;
pub mod client;
pub mod prompt;
pub mod parser;
pub mod classify;
pub mod terms;

pub use types::*;
pub use client_types::{validate_base_url, validate_model_name, ChatError};
pub use client::*;
pub use parser::*;
pub use classify::*;
pub use terms::*;

use thiserror::Error;

use crate::pipeline::retry::Retryable;

#[derive(Error, Debug)]
pub enum StructuringError {
    #[error("Completion service error: {0}")]
    Service(#[from] ChatError),

    #[error("Malformed clause payload: {0}")]
    MalformedPayload(String),

    #[error("Classification failed after {attempts} attempts: {reason}")]
    ClassificationFailed { attempts: u32, reason: String },

    #[error("Input text is empty")]
    EmptyInput,

    #[error("Classification cancelled after {attempts} attempts")]
    Cancelled { attempts: u32 },
}

impl Retryable for StructuringError {
    fn is_retryable(&self) -> bool {
        match self {
            StructuringError::Service(e) => e.is_retryable(),
            StructuringError::MalformedPayload(_) => true,
            StructuringError::ClassificationFailed { .. }
            | StructuringError::EmptyInput
            | StructuringError::Cancelled { .. } => false,
        }
    }
}
