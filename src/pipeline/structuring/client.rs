use std::collections::VecDeque;
use std::sync::Mutex;
use std::time::Duration;

use base64::Engine as _;

use super::client_types::{
    classify_status, validate_base_url, validate_model_name, ChatCompletionRequest,
    ChatCompletionResponse, ChatError, ChatMessage, MAX_IMAGE_BASE64_BYTES,
};
use super::types::{LlmClient, VisionClient};
use crate::config::Settings;

/// Default sampling temperature for every request: near-deterministic output.
pub const DEFAULT_TEMPERATURE: f32 = 0.1;

/// Blocking HTTP client for an OpenAI-compatible chat-completions service.
pub struct ChatClient {
    base_url: String,
    api_key: Option<String>,
    client: reqwest::blocking::Client,
    timeout_secs: u64,
    temperature: f32,
}

impl ChatClient {
    /// Create a client for `base_url` (e.g. `https://api.sambanova.ai/v1`).
    pub fn new(
        base_url: &str,
        api_key: Option<String>,
        timeout_secs: u64,
    ) -> Result<Self, ChatError> {
        validate_base_url(base_url)?;
        let client = reqwest::blocking::Client::builder()
            .timeout(Duration::from_secs(timeout_secs))
            .build()
            .map_err(|e| ChatError::Network(format!("Failed to create HTTP client: {e}")))?;

        Ok(Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            api_key: api_key.filter(|k| !k.trim().is_empty()),
            client,
            timeout_secs,
            temperature: DEFAULT_TEMPERATURE,
        })
    }

    pub fn from_settings(settings: &Settings) -> Result<Self, ChatError> {
        Self::new(
            &settings.base_url,
            settings.api_key.clone(),
            settings.timeout_secs,
        )
    }

    pub fn with_temperature(mut self, temperature: f32) -> Self {
        self.temperature = temperature;
        self
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    pub fn has_api_key(&self) -> bool {
        self.api_key.is_some()
    }

    fn completions_url(&self) -> String {
        format!("{}/chat/completions", self.base_url)
    }

    /// POST one chat-completions request and return the first choice's content.
    fn complete(&self, model: &str, messages: Vec<ChatMessage>) -> Result<String, ChatError> {
        validate_model_name(model)?;
        let api_key = self.api_key.as_deref().ok_or(ChatError::MissingApiKey)?;

        let body = ChatCompletionRequest {
            model: model.to_string(),
            messages,
            temperature: self.temperature,
            stream: false,
        };

        let response = self
            .client
            .post(self.completions_url())
            .bearer_auth(api_key)
            .json(&body)
            .send()
            .map_err(|e| {
                if e.is_timeout() {
                    ChatError::Timeout(self.timeout_secs)
                } else if e.is_connect() {
                    ChatError::Network(format!("Cannot reach {}: {e}", self.base_url))
                } else {
                    ChatError::Network(e.to_string())
                }
            })?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().unwrap_or_default();
            return Err(classify_status(status.as_u16(), &body));
        }

        let parsed: ChatCompletionResponse = response.json().map_err(|e| {
            if e.is_timeout() {
                ChatError::Timeout(self.timeout_secs)
            } else {
                ChatError::MalformedResponse(e.to_string())
            }
        })?;

        parsed.into_content()
    }
}

fn with_system(system: Option<&str>, user: ChatMessage) -> Vec<ChatMessage> {
    let mut messages = Vec::with_capacity(2);
    if let Some(system) = system.filter(|s| !s.is_empty()) {
        messages.push(ChatMessage::system(system));
    }
    messages.push(user);
    messages
}

impl LlmClient for ChatClient {
    fn generate(
        &self,
        model: &str,
        prompt: &str,
        system: Option<&str>,
    ) -> Result<String, ChatError> {
        let _span = tracing::info_span!("chat_generate", model = %model, prompt_len = prompt.len())
            .entered();
        let start = std::time::Instant::now();

        let content = self.complete(model, with_system(system, ChatMessage::user(prompt)))?;

        tracing::debug!(
            elapsed_ms = %start.elapsed().as_millis(),
            response_len = content.len(),
            "Text completion received"
        );
        Ok(content)
    }
}

impl VisionClient for ChatClient {
    fn chat_with_images(
        &self,
        model: &str,
        prompt: &str,
        images: &[String],
        system: Option<&str>,
    ) -> Result<String, ChatError> {
        if let Some(too_big) = images.iter().find(|img| img.len() > MAX_IMAGE_BASE64_BYTES) {
            return Err(ChatError::ImageTooLarge(too_big.len()));
        }

        let _span = tracing::info_span!(
            "chat_vision",
            model = %model,
            image_count = images.len(),
            payload_bytes = images.iter().map(String::len).sum::<usize>(),
        )
        .entered();
        let start = std::time::Instant::now();

        let content = self.complete(
            model,
            with_system(system, ChatMessage::user_with_images(prompt, images)),
        )?;

        tracing::debug!(
            elapsed_ms = %start.elapsed().as_millis(),
            response_len = content.len(),
            "Vision completion received"
        );
        Ok(content)
    }
}

// ── Mocks for testing ──────────────────────────────────────

type Responder = Box<dyn Fn(&str) -> Result<String, ChatError> + Send + Sync>;

/// Mock text client: a fixed response, or a response computed from the prompt.
pub struct MockLlmClient {
    responder: Responder,
    prompts: Mutex<Vec<String>>,
}

impl MockLlmClient {
    pub fn new(response: &str) -> Self {
        let response = response.to_string();
        Self::with_responder(move |_| Ok(response.clone()))
    }

    pub fn failing(error: ChatError) -> Self {
        Self::with_responder(move |_| Err(error.clone()))
    }

    pub fn with_responder<F>(responder: F) -> Self
    where
        F: Fn(&str) -> Result<String, ChatError> + Send + Sync + 'static,
    {
        Self {
            responder: Box::new(responder),
            prompts: Mutex::new(Vec::new()),
        }
    }

    /// Every prompt received so far, in order.
    pub fn prompts(&self) -> Vec<String> {
        self.prompts.lock().map(|p| p.clone()).unwrap_or_default()
    }

    pub fn call_count(&self) -> usize {
        self.prompts.lock().map(|p| p.len()).unwrap_or(0)
    }
}

impl LlmClient for MockLlmClient {
    fn generate(
        &self,
        _model: &str,
        prompt: &str,
        _system: Option<&str>,
    ) -> Result<String, ChatError> {
        if let Ok(mut prompts) = self.prompts.lock() {
            prompts.push(prompt.to_string());
        }
        (self.responder)(prompt)
    }
}

/// Mock text client that replays a fixed sequence of outcomes.
///
/// Once the script runs out every further call fails with a network error.
pub struct ScriptedLlmClient {
    script: Mutex<VecDeque<Result<String, ChatError>>>,
    calls: Mutex<u32>,
}

impl ScriptedLlmClient {
    pub fn new(script: Vec<Result<String, ChatError>>) -> Self {
        Self {
            script: Mutex::new(script.into()),
            calls: Mutex::new(0),
        }
    }

    pub fn call_count(&self) -> u32 {
        self.calls.lock().map(|c| *c).unwrap_or(0)
    }
}

impl LlmClient for ScriptedLlmClient {
    fn generate(
        &self,
        _model: &str,
        _prompt: &str,
        _system: Option<&str>,
    ) -> Result<String, ChatError> {
        if let Ok(mut calls) = self.calls.lock() {
            *calls += 1;
        }
        self.script
            .lock()
            .ok()
            .and_then(|mut s| s.pop_front())
            .unwrap_or_else(|| Err(ChatError::Network("script exhausted".into())))
    }
}

/// Mock vision client.
///
/// Replays `script` first, then falls back to either a fixed response or,
/// in echo mode, the UTF-8 decoding of each image joined by newlines.
pub struct MockVisionClient {
    script: Mutex<VecDeque<Result<String, ChatError>>>,
    fallback: Option<String>,
    image_counts: Mutex<Vec<usize>>,
}

impl MockVisionClient {
    pub fn new(response: &str) -> Self {
        Self {
            script: Mutex::new(VecDeque::new()),
            fallback: Some(response.to_string()),
            image_counts: Mutex::new(Vec::new()),
        }
    }

    /// Respond with the decoded bytes of the images themselves.
    pub fn echo() -> Self {
        Self {
            script: Mutex::new(VecDeque::new()),
            fallback: None,
            image_counts: Mutex::new(Vec::new()),
        }
    }

    pub fn with_script(self, script: Vec<Result<String, ChatError>>) -> Self {
        Self {
            script: Mutex::new(script.into()),
            ..self
        }
    }

    /// Number of images carried by each call, in call order.
    pub fn image_counts(&self) -> Vec<usize> {
        self.image_counts.lock().map(|c| c.clone()).unwrap_or_default()
    }

    pub fn call_count(&self) -> usize {
        self.image_counts().len()
    }
}

impl VisionClient for MockVisionClient {
    fn chat_with_images(
        &self,
        _model: &str,
        _prompt: &str,
        images: &[String],
        _system: Option<&str>,
    ) -> Result<String, ChatError> {
        if let Ok(mut counts) = self.image_counts.lock() {
            counts.push(images.len());
        }
        if let Some(next) = self.script.lock().ok().and_then(|mut s| s.pop_front()) {
            return next;
        }
        match &self.fallback {
            Some(response) => Ok(response.clone()),
            None => Ok(images
                .iter()
                .map(|img| {
                    base64::engine::general_purpose::STANDARD
                        .decode(img)
                        .map(|bytes| String::from_utf8_lossy(&bytes).into_owned())
                        .unwrap_or_default()
                })
                .collect::<Vec<_>>()
                .join("\n")),
        }
    }
}
