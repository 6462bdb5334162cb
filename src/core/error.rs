use std::time::Duration;
use thiserror::Error;

/// Failure taxonomy for the consensus engine.
///
/// Only `Configuration` is fatal. Source failures are isolated to the cycle
/// they happen in and `InsufficientData` degrades to a neutral result.
/// `Conflict` is a runtime race or an illegal state transition; the caller
/// may retry or give up, the engine keeps running.
#[derive(Debug, Clone, Error, PartialEq)]
pub enum EngineError {
    #[error("source '{source_id}' failed to evaluate: {reason}")]
    SourceEvaluation { source_id: String, reason: String },

    #[error("source '{source_id}' exceeded its {budget:?} evaluation budget")]
    Timeout { source_id: String, budget: Duration },

    #[error("invalid configuration: {0}")]
    Configuration(String),

    #[error("insufficient data: {respondents} respondent(s), {required} required")]
    InsufficientData { respondents: usize, required: usize },

    #[error("conflict: {0}")]
    Conflict(String),
}

impl EngineError {
    pub fn source(source_id: impl Into<String>, reason: impl Into<String>) -> Self {
        EngineError::SourceEvaluation {
            source_id: source_id.into(),
            reason: reason.into(),
        }
    }

    pub fn config(message: impl Into<String>) -> Self {
        EngineError::Configuration(message.into())
    }

    pub fn conflict(message: impl Into<String>) -> Self {
        EngineError::Conflict(message.into())
    }

    pub fn is_fatal(&self) -> bool {
        matches!(self, EngineError::Configuration(_))
    }

    /// Timeouts are handled exactly like any other source failure.
    pub fn is_source_failure(&self) -> bool {
        matches!(
            self,
            EngineError::SourceEvaluation { .. } | EngineError::Timeout { .. }
        )
    }
}

pub type EngineResult<T> = std::result::Result<T, EngineError>;
