//! Error taxonomy for the scoring engine.

use thiserror::Error;

/// Errors surfaced by the scoring engine.
///
/// Configuration problems are fatal at startup and never occur at request
/// time. Commit failures are not represented here: a failed history append
/// degrades the result (`history_updated = false`) instead of failing the
/// request, since the caller already holds a valid score.
#[derive(Debug, Error)]
pub enum EngineError {
    /// Transaction rejected before any history lookup; no side effects.
    #[error("invalid transaction: {0}")]
    InvalidTransaction(String),

    /// Every classifier in the ensemble failed to produce a probability.
    /// Partial failure is not an error; skipped models are flagged on the
    /// result instead.
    #[error("no classifier produced a score: {0}")]
    ModelUnavailable(String),

    /// History store read failure. Fatal for the request: features cannot
    /// be computed safely without a consistent snapshot.
    #[error("history store unavailable: {0}")]
    HistoryUnavailable(String),

    /// Invalid configuration or feature-schema mismatch at startup.
    #[error("configuration error: {0}")]
    Configuration(String),
}
