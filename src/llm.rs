//! # Language Model Collaborator
//!
//! The decomposer treats the language model as an injected collaborator
//! behind a narrow trait: prompt in, text out. Transport, provider choice,
//! and retry policy live behind implementations supplied by the embedding
//! application; the core only depends on the trait.
//!
//! ## Usage
//!
//! ```rust
//! use conductor_core::llm::{GenerationRequest, LanguageModel, ScriptedModel};
//!
//! # tokio_test::block_on(async {
//! let model = ScriptedModel::new([r#"[{"aspect": "overview", "query": "survey"}]"#]);
//!
//! let request = GenerationRequest::new("split this prompt").with_temperature(0.0);
//! let text = model.generate(&request).await.unwrap();
//! assert!(text.contains("overview"));
//! assert_eq!(model.remaining(), 0);
//! # });
//! ```

use std::collections::VecDeque;

use async_trait::async_trait;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Language model call errors
#[derive(Debug, Clone, Error)]
pub enum LlmError {
    #[error("LLM request failed ({provider}): {reason}")]
    RequestFailed { provider: String, reason: String },

    #[error("LLM returned an empty response ({provider})")]
    EmptyResponse { provider: String },

    #[error("Scripted model has no responses left")]
    ScriptExhausted,
}

/// One generation request. `system` carries role framing, `prompt` the task.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GenerationRequest {
    pub system: Option<String>,
    pub prompt: String,
    pub max_tokens: Option<u32>,
    pub temperature: Option<f32>,
}

impl GenerationRequest {
    pub fn new(prompt: impl Into<String>) -> Self {
        Self {
            system: None,
            prompt: prompt.into(),
            max_tokens: None,
            temperature: None,
        }
    }

    pub fn with_system(mut self, system: impl Into<String>) -> Self {
        self.system = Some(system.into());
        self
    }

    pub fn with_max_tokens(mut self, max_tokens: u32) -> Self {
        self.max_tokens = Some(max_tokens);
        self
    }

    pub fn with_temperature(mut self, temperature: f32) -> Self {
        self.temperature = Some(temperature);
        self
    }
}

/// Injected text-generation collaborator
#[async_trait]
pub trait LanguageModel: Send + Sync {
    /// Generate a completion for the request
    async fn generate(&self, request: &GenerationRequest) -> Result<String, LlmError>;

    /// Provider name for logging
    fn name(&self) -> &str {
        "language_model"
    }
}

/// Deterministic model that replays canned responses in order. Used by tests
/// and the demo binary; returns [`LlmError::ScriptExhausted`] once empty.
#[derive(Debug, Default)]
pub struct ScriptedModel {
    responses: Mutex<VecDeque<String>>,
}

impl ScriptedModel {
    pub fn new(responses: impl IntoIterator<Item = impl Into<String>>) -> Self {
        Self {
            responses: Mutex::new(responses.into_iter().map(Into::into).collect()),
        }
    }

    /// Append another canned response
    pub fn push_response(&self, response: impl Into<String>) {
        self.responses.lock().push_back(response.into());
    }

    pub fn remaining(&self) -> usize {
        self.responses.lock().len()
    }
}

#[async_trait]
impl LanguageModel for ScriptedModel {
    async fn generate(&self, _request: &GenerationRequest) -> Result<String, LlmError> {
        self.responses
            .lock()
            .pop_front()
            .ok_or(LlmError::ScriptExhausted)
    }

    fn name(&self) -> &str {
        "scripted"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_scripted_model_replays_in_order() {
        let model = ScriptedModel::new(["first", "second"]);
        let request = GenerationRequest::new("anything");

        assert_eq!(model.generate(&request).await.unwrap(), "first");
        assert_eq!(model.generate(&request).await.unwrap(), "second");
        assert!(matches!(
            model.generate(&request).await,
            Err(LlmError::ScriptExhausted)
        ));
    }

    #[tokio::test]
    async fn test_push_response_extends_script() {
        let model = ScriptedModel::new(Vec::<String>::new());
        model.push_response("late addition");
        assert_eq!(model.remaining(), 1);

        let request = GenerationRequest::new("anything");
        assert_eq!(model.generate(&request).await.unwrap(), "late addition");
    }

    #[test]
    fn test_request_builder() {
        let request = GenerationRequest::new("decompose this")
            .with_system("you are a planner")
            .with_temperature(0.2)
            .with_max_tokens(512);
        assert_eq!(request.system.as_deref(), Some("you are a planner"));
        assert_eq!(request.temperature, Some(0.2));
        assert_eq!(request.max_tokens, Some(512));
    }

    #[test]
    fn test_error_display_names_the_provider() {
        let failed = LlmError::RequestFailed {
            provider: "anthropic".to_string(),
            reason: "connection reset".to_string(),
        };
        assert_eq!(
            failed.to_string(),
            "LLM request failed (anthropic): connection reset"
        );

        let empty = LlmError::EmptyResponse {
            provider: "anthropic".to_string(),
        };
        assert_eq!(empty.to_string(), "LLM returned an empty response (anthropic)");
    }
}
