//! Transaction wire types.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::EngineError;

fn generated_transaction_id() -> String {
    uuid::Uuid::new_v4().to_string()
}

/// A single financial transaction submitted for scoring.
///
/// Immutable once created: the engine scores it against the customer's
/// prior history and only then commits it to the history store, so a
/// transaction never influences its own features.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Transaction {
    /// Identifier for audit correlation; generated when the producer
    /// does not supply one.
    #[serde(default = "generated_transaction_id")]
    pub transaction_id: String,

    /// Customer identifier.
    #[serde(alias = "cst_dim_id")]
    pub customer_id: i64,

    /// Transaction time, UTC, second resolution.
    #[serde(alias = "transdatetime")]
    pub timestamp: DateTime<Utc>,

    /// Transaction amount, non-negative.
    pub amount: f64,

    /// Opaque counterparty/channel identifier.
    pub direction: String,
}

impl Transaction {
    /// Create a transaction with a generated id.
    pub fn new(
        customer_id: i64,
        timestamp: DateTime<Utc>,
        amount: f64,
        direction: impl Into<String>,
    ) -> Self {
        Self {
            transaction_id: generated_transaction_id(),
            customer_id,
            timestamp,
            amount,
            direction: direction.into(),
        }
    }

    /// Reject malformed transactions before any history lookup.
    pub fn validate(&self) -> Result<(), EngineError> {
        if self.customer_id < 0 {
            return Err(EngineError::InvalidTransaction(format!(
                "customer_id must be non-negative, got {}",
                self.customer_id
            )));
        }
        if !self.amount.is_finite() || self.amount < 0.0 {
            return Err(EngineError::InvalidTransaction(format!(
                "amount must be a non-negative finite number, got {}",
                self.amount
            )));
        }
        if self.direction.is_empty() {
            return Err(EngineError::InvalidTransaction(
                "direction must not be empty".to_string(),
            ));
        }
        Ok(())
    }
}
