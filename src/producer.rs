//! NATS publication of scoring results.

use anyhow::Result;
use async_nats::Client;
use tracing::debug;

use crate::types::ScoreResult;

/// Publishes score results for flagged transactions.
#[derive(Clone)]
pub struct ScorePublisher {
    client: Client,
    subject: String,
}

impl ScorePublisher {
    pub fn new(client: Client, subject: &str) -> Self {
        Self {
            client,
            subject: subject.to_string(),
        }
    }

    /// Publish one score result.
    pub async fn publish(&self, result: &ScoreResult) -> Result<()> {
        let payload = serde_json::to_vec(result)?;
        self.client
            .publish(self.subject.clone(), payload.into())
            .await?;

        debug!(
            transaction_id = %result.transaction_id,
            fraud_probability = result.fraud_probability,
            risk_level = ?result.risk_level,
            "Published score result"
        );
        Ok(())
    }

    pub fn subject(&self) -> &str {
        &self.subject
    }
}
