//! Completion service wire types, error taxonomy, and request validators.
//!
//! The service speaks the OpenAI-compatible `/chat/completions` contract:
//! a list of messages in, `choices[0].message.content` out. Vision requests
//! carry images as `data:image/png;base64,...` URLs inside the user message.

use std::sync::LazyLock;

use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::pipeline::retry::Retryable;

/// Largest base64 image payload accepted for a single request part.
pub const MAX_IMAGE_BASE64_BYTES: usize = 20 * 1024 * 1024;

// ──────────────────────────────────────────────
// Request types
// ──────────────────────────────────────────────

/// Request body for POST `{base_url}/chat/completions`.
#[derive(Debug, Clone, Serialize)]
pub struct ChatCompletionRequest {
    pub model: String,
    pub messages: Vec<ChatMessage>,
    pub temperature: f32,
    pub stream: bool,
}

#[derive(Debug, Clone, Serialize)]
pub struct ChatMessage {
    pub role: String,
    pub content: MessageContent,
}

impl ChatMessage {
    pub fn system(text: &str) -> Self {
        Self {
            role: "system".into(),
            content: MessageContent::Text(text.to_string()),
        }
    }

    pub fn user(text: &str) -> Self {
        Self {
            role: "user".into(),
            content: MessageContent::Text(text.to_string()),
        }
    }

    /// User message with the instruction first, then one part per image.
    pub fn user_with_images(text: &str, images_base64: &[String]) -> Self {
        let mut parts = Vec::with_capacity(images_base64.len() + 1);
        parts.push(ContentPart::Text {
            text: text.to_string(),
        });
        parts.extend(images_base64.iter().map(|img| ContentPart::ImageUrl {
            image_url: ImageUrl {
                url: format!("data:image/png;base64,{img}"),
            },
        }));
        Self {
            role: "user".into(),
            content: MessageContent::Parts(parts),
        }
    }
}

/// Plain string content or multi-part (text + images) content.
#[derive(Debug, Clone, Serialize)]
#[serde(untagged)]
pub enum MessageContent {
    Text(String),
    Parts(Vec<ContentPart>),
}

#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ContentPart {
    Text { text: String },
    ImageUrl { image_url: ImageUrl },
}

#[derive(Debug, Clone, Serialize)]
pub struct ImageUrl {
    pub url: String,
}

// ──────────────────────────────────────────────
// Response types
// ──────────────────────────────────────────────

#[derive(Debug, Deserialize)]
pub(crate) struct ChatCompletionResponse {
    #[serde(default)]
    pub choices: Vec<ChatChoice>,
}

#[derive(Debug, Deserialize)]
pub(crate) struct ChatChoice {
    pub message: ChatResponseMessage,
}

#[derive(Debug, Deserialize)]
pub(crate) struct ChatResponseMessage {
    #[serde(default)]
    pub content: Option<String>,
}

impl ChatCompletionResponse {
    /// The raw content of the first choice.
    pub fn into_content(self) -> Result<String, ChatError> {
        self.choices
            .into_iter()
            .next()
            .and_then(|c| c.message.content)
            .ok_or_else(|| ChatError::MalformedResponse("response has no message content".into()))
    }
}

/// Error envelope some providers return alongside non-2xx statuses.
#[derive(Debug, Deserialize)]
pub(crate) struct ApiErrorEnvelope {
    pub error: ApiErrorBody,
}

#[derive(Debug, Deserialize)]
pub(crate) struct ApiErrorBody {
    pub message: String,
}

/// Best-effort extraction of a readable message from an error body.
pub(crate) fn error_message_from_body(body: &str) -> String {
    serde_json::from_str::<ApiErrorEnvelope>(body)
        .map(|e| e.error.message)
        .unwrap_or_else(|_| body.trim().chars().take(500).collect())
}

// ──────────────────────────────────────────────
// Error taxonomy
// ──────────────────────────────────────────────

/// Failures talking to the completion service.
#[derive(Debug, Clone, thiserror::Error)]
pub enum ChatError {
    #[error("No API key configured: set LEGALLENS_API_KEY or SAMBANOVA_API_KEY")]
    MissingApiKey,

    #[error("The completion service rejected the API key (HTTP {0})")]
    Unauthorized(u16),

    #[error("The completion service is rate limiting requests")]
    RateLimited,

    #[error("The completion service returned an error (HTTP {status}): {message}")]
    ApiError { status: u16, message: String },

    #[error("Request timed out after {0} seconds")]
    Timeout(u64),

    #[error("Network error: {0}")]
    Network(String),

    #[error("Malformed completion response: {0}")]
    MalformedResponse(String),

    #[error("Invalid model name: '{0}'")]
    InvalidModelName(String),

    #[error("Invalid service URL: '{0}'")]
    InvalidUrl(String),

    #[error("Image too large ({0} bytes), maximum is 20 MB")]
    ImageTooLarge(usize),
}

impl Retryable for ChatError {
    fn is_retryable(&self) -> bool {
        match self {
            ChatError::RateLimited
            | ChatError::Timeout(_)
            | ChatError::Network(_)
            | ChatError::MalformedResponse(_) => true,
            ChatError::ApiError { status, .. } => *status >= 500 || *status == 408,
            ChatError::MissingApiKey
            | ChatError::Unauthorized(_)
            | ChatError::InvalidModelName(_)
            | ChatError::InvalidUrl(_)
            | ChatError::ImageTooLarge(_) => false,
        }
    }
}

/// Map a non-success HTTP status to the error taxonomy.
pub fn classify_status(status: u16, body: &str) -> ChatError {
    match status {
        401 | 403 => ChatError::Unauthorized(status),
        429 => ChatError::RateLimited,
        _ => ChatError::ApiError {
            status,
            message: error_message_from_body(body),
        },
    }
}

// ──────────────────────────────────────────────
// Validators
// ──────────────────────────────────────────────

static MODEL_NAME_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^[a-zA-Z0-9][a-zA-Z0-9._-]*(/[a-zA-Z0-9][a-zA-Z0-9._-]*)?(:[a-zA-Z0-9._-]+)?$")
        .expect("static regex")
});

/// Validate a model identifier before it goes into a request body.
///
/// Accepts `name`, `name:tag` and one optional `namespace/` prefix.
/// Rejects whitespace, shell metacharacters and nested namespaces.
pub fn validate_model_name(name: &str) -> Result<(), ChatError> {
    if MODEL_NAME_RE.is_match(name) {
        Ok(())
    } else {
        Err(ChatError::InvalidModelName(name.to_string()))
    }
}

/// Validate that the base URL has an http(s) scheme and a host.
pub fn validate_base_url(url: &str) -> Result<(), ChatError> {
    let after_scheme = url
        .strip_prefix("https://")
        .or_else(|| url.strip_prefix("http://"))
        .ok_or_else(|| ChatError::InvalidUrl(url.to_string()))?;

    let host = after_scheme.split(['/', ':']).next().unwrap_or("");
    if host.is_empty() && !after_scheme.starts_with('[') {
        return Err(ChatError::InvalidUrl(url.to_string()));
    }
    if after_scheme.chars().any(char::is_whitespace) {
        return Err(ChatError::InvalidUrl(url.to_string()));
    }
    Ok(())
}
