//! # Run Decomposer
//!
//! Turns a run's prompt into a dependency-ordered set of subtask
//! definitions by consulting the language model collaborator.
//!
//! ## Overview
//!
//! Decomposition happens once, during the run's planning phase:
//!
//! 1. Pick a strategy: the one pinned in the run config, or ask the model
//!    to infer one from the prompt (unrecognized answers fall back to
//!    dimension-based).
//! 2. Ask the model for a JSON array of subtask definitions shaped by the
//!    strategy's guidance.
//! 3. Parse and validate the definitions: subtask count inside the
//!    configured ceiling, dependency indices in range, no self-references.
//!
//! There is no retry here. A model or parse failure fails the run's
//! planning phase; the caller records the error on the run.

use std::fmt;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, instrument, warn};

use crate::error::ValidationError;
use crate::llm::{GenerationRequest, LanguageModel, LlmError};
use crate::models::{RunRecord, SubtaskDefinition};

/// How a prompt is split into subtasks
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DecompositionStrategy {
    /// One subtask per concrete entity named or implied by the prompt
    EntityBased,
    /// One subtask per analytical dimension of a single subject
    DimensionBased,
    /// One subtask per information source category
    SourceBased,
    /// One subtask per time period
    TemporalBased,
}

impl DecompositionStrategy {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::EntityBased => "entity_based",
            Self::DimensionBased => "dimension_based",
            Self::SourceBased => "source_based",
            Self::TemporalBased => "temporal_based",
        }
    }

    /// Strategy-specific guidance embedded in the decomposition prompt
    fn guidance(&self) -> &'static str {
        match self {
            Self::EntityBased => {
                "Create one subtask per distinct entity (company, product, person, \
                 system) the prompt asks about. Each subtask investigates exactly one entity."
            }
            Self::DimensionBased => {
                "Create one subtask per analytical dimension of the subject, such as \
                 technical detail, pricing, history, reception, or alternatives."
            }
            Self::SourceBased => {
                "Create one subtask per information source category, such as official \
                 documentation, news coverage, community discussion, or academic work."
            }
            Self::TemporalBased => {
                "Create one subtask per relevant time period so the result covers how \
                 the subject evolved."
            }
        }
    }

    /// Recognize a strategy in free-form model output
    fn from_answer(answer: &str) -> Option<Self> {
        let normalized = answer.to_lowercase();
        if normalized.contains("entity") {
            Some(Self::EntityBased)
        } else if normalized.contains("dimension") {
            Some(Self::DimensionBased)
        } else if normalized.contains("source") {
            Some(Self::SourceBased)
        } else if normalized.contains("temporal") || normalized.contains("time") {
            Some(Self::TemporalBased)
        } else {
            None
        }
    }
}

impl fmt::Display for DecompositionStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl std::str::FromStr for DecompositionStrategy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "entity_based" => Ok(Self::EntityBased),
            "dimension_based" => Ok(Self::DimensionBased),
            "source_based" => Ok(Self::SourceBased),
            "temporal_based" => Ok(Self::TemporalBased),
            _ => Err(format!("Invalid decomposition strategy: {s}")),
        }
    }
}

/// Decomposition failures. All variants are fatal for the run; planning is
/// never retried.
#[derive(Debug, Error)]
pub enum DecompositionError {
    #[error("Language model call failed: {0}")]
    Provider(#[from] LlmError),

    #[error("Language model returned an empty decomposition")]
    EmptyResponse,

    #[error("Could not parse decomposition response: {reason}")]
    ResponseParse { reason: String },

    #[error("Decomposition validation failed: {0}")]
    Validation(#[from] ValidationError),
}

/// Outcome of a successful decomposition
#[derive(Debug, Clone)]
pub struct DecompositionResult {
    pub strategy: DecompositionStrategy,
    /// Whether the strategy was inferred by the model rather than pinned in
    /// the run config
    pub strategy_inferred: bool,
    pub definitions: Vec<SubtaskDefinition>,
}

/// LLM-driven decomposition of run prompts into subtask definitions
pub struct RunDecomposer {
    model: Arc<dyn LanguageModel>,
}

impl RunDecomposer {
    pub fn new(model: Arc<dyn LanguageModel>) -> Self {
        Self { model }
    }

    /// Decompose a run's prompt into validated subtask definitions
    #[instrument(skip(self, run), fields(run_id = %run.id))]
    pub async fn decompose(
        &self,
        run: &RunRecord,
    ) -> Result<DecompositionResult, DecompositionError> {
        let (strategy, strategy_inferred) = match run.config.strategy {
            Some(strategy) => (strategy, false),
            None => (self.infer_strategy(&run.prompt).await?, true),
        };

        debug!(
            strategy = %strategy,
            inferred = strategy_inferred,
            max_subtasks = run.config.max_subtasks,
            "Requesting decomposition"
        );

        let request = GenerationRequest::new(self.decomposition_prompt(run, strategy))
            .with_system(
                "You are a planning assistant that decomposes research and \
                 automation prompts into independent subtasks.",
            )
            .with_temperature(0.2);
        let response = self.model.generate(&request).await?;
        if response.trim().is_empty() {
            return Err(DecompositionError::EmptyResponse);
        }

        let definitions = parse_definitions(&response)?;
        validate_definitions(&definitions, run.config.max_subtasks)?;

        debug!(
            subtask_count = definitions.len(),
            strategy = %strategy,
            "Decomposition accepted"
        );
        Ok(DecompositionResult {
            strategy,
            strategy_inferred,
            definitions,
        })
    }

    /// Ask the model which strategy fits the prompt; fall back to
    /// dimension-based when the answer names no known strategy.
    async fn infer_strategy(
        &self,
        prompt: &str,
    ) -> Result<DecompositionStrategy, DecompositionError> {
        let request = GenerationRequest::new(format!(
            "Which decomposition strategy fits this prompt best?\n\
             Strategies: entity_based (split by entities), dimension_based \
             (split by analytical dimensions), source_based (split by \
             information sources), temporal_based (split by time periods).\n\
             Prompt: {prompt}\n\
             Answer with the strategy name only."
        ))
        .with_temperature(0.0)
        .with_max_tokens(16);

        let answer = self.model.generate(&request).await?;
        match DecompositionStrategy::from_answer(&answer) {
            Some(strategy) => Ok(strategy),
            None => {
                warn!(
                    answer = %answer.trim(),
                    "Unrecognized strategy answer, falling back to dimension_based"
                );
                Ok(DecompositionStrategy::DimensionBased)
            }
        }
    }

    fn decomposition_prompt(&self, run: &RunRecord, strategy: DecompositionStrategy) -> String {
        format!(
            "Decompose the following prompt into at most {max} subtasks.\n\
             Strategy: {guidance}\n\
             \n\
             Respond with a JSON array. Each element must have:\n\
             - \"aspect\": short label for what the subtask covers\n\
             - \"query\": the concrete instruction a worker will execute\n\
             - \"depth\": optional, one of \"shallow\", \"moderate\", \"deep\"\n\
             - \"tool\": optional, one of \"shell\", \"code\", \"browser\"\n\
             - \"priority\": optional integer, higher runs earlier\n\
             - \"depends_on\": optional array of zero-based indices of \
             subtasks that must succeed first\n\
             \n\
             Prompt: {prompt}",
            max = run.config.max_subtasks,
            guidance = strategy.guidance(),
            prompt = run.prompt,
        )
    }
}

/// Parse the model's response into subtask definitions
fn parse_definitions(response: &str) -> Result<Vec<SubtaskDefinition>, DecompositionError> {
    let json = extract_json_array(response);
    serde_json::from_str(&json).map_err(|e| DecompositionError::ResponseParse {
        reason: e.to_string(),
    })
}

/// Extract a JSON array from LLM output (handles markdown wrapping).
fn extract_json_array(text: &str) -> String {
    let trimmed = text.trim();

    // Already a JSON array
    if trimmed.starts_with('[') {
        return trimmed.to_string();
    }

    // Wrapped in a markdown code block
    if let Some(start) = trimmed.find("```json") {
        let after = &trimmed[start + 7..];
        if let Some(end) = after.find("```") {
            return after[..end].trim().to_string();
        }
    }

    if let Some(start) = trimmed.find("```") {
        let after = &trimmed[start + 3..];
        if let Some(end) = after.find("```") {
            let inner = after[..end].trim();
            if inner.starts_with('[') {
                return inner.to_string();
            }
        }
    }

    // Try to find array bounds
    if let (Some(start), Some(end)) = (trimmed.find('['), trimmed.rfind(']')) {
        if end > start {
            return trimmed[start..=end].to_string();
        }
    }

    trimmed.to_string()
}

/// Enforce count and dependency-index invariants. Cycles are not checked
/// here; an undispatchable graph surfaces at runtime as a scheduling
/// deadlock.
fn validate_definitions(
    definitions: &[SubtaskDefinition],
    max_subtasks: usize,
) -> Result<(), ValidationError> {
    let count = definitions.len();
    if count == 0 || count > max_subtasks {
        return Err(ValidationError::SubtaskCount {
            count,
            max: max_subtasks,
        });
    }

    for (subtask_index, definition) in definitions.iter().enumerate() {
        for &dep in &definition.depends_on {
            if dep >= count {
                return Err(ValidationError::DependencyIndex {
                    subtask: subtask_index,
                    index: dep,
                    count,
                });
            }
            if dep == subtask_index {
                return Err(ValidationError::SelfDependency {
                    index: subtask_index,
                });
            }
        }
    }
    Ok(())
}
