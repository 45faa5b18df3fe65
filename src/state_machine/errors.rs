use thiserror::Error;

use crate::store::StoreError;

/// Errors raised while applying state transitions
#[derive(Debug, Error)]
pub enum StateMachineError {
    #[error("Invalid transition from {from} to {to}")]
    InvalidTransition { from: String, to: String },

    /// Presented fencing token is older than the token on the record; the
    /// caller's view of the world is stale and must be rebuilt.
    #[error("Stale fencing token {presented} for {entity}: current token is {current}")]
    StaleFencingToken {
        entity: String,
        presented: u64,
        current: u64,
    },

    #[error("Retry budget exhausted after {attempts} of {max_retries} permitted attempts")]
    RetryBudgetExhausted { attempts: u32, max_retries: u32 },

    #[error("{entity} not found")]
    NotFound { entity: String },

    #[error("Store error: {0}")]
    Store(#[from] StoreError),
}

pub type StateMachineResult<T> = Result<T, StateMachineError>;

impl StateMachineError {
    /// Whether the error signals a lost race rather than a caller bug. Lost
    /// races are dropped silently during scheduling passes.
    pub fn is_lost_race(&self) -> bool {
        matches!(
            self,
            Self::StaleFencingToken { .. } | Self::InvalidTransition { .. }
        )
    }
}
