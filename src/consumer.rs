//! NATS subscription and wire decoding for incoming transactions.

use anyhow::Result;
use async_nats::{Client, Subscriber};
use tracing::info;

use crate::error::EngineError;
use crate::types::Transaction;

/// A transaction payload is a small JSON object; anything larger is a
/// misrouted or hostile message and is rejected before parsing.
pub const MAX_PAYLOAD_BYTES: usize = 64 * 1024;

/// Receives transactions to score from a NATS subject.
pub struct TransactionConsumer {
    client: Client,
    subject: String,
}

impl TransactionConsumer {
    pub fn new(client: Client, subject: &str) -> Self {
        Self {
            client,
            subject: subject.to_string(),
        }
    }

    /// Subscribe to the transaction subject.
    pub async fn subscribe(&self) -> Result<Subscriber> {
        let subscriber = self.client.subscribe(self.subject.clone()).await?;
        info!(subject = %self.subject, "Subscribed to transaction subject");
        Ok(subscriber)
    }

    /// Decode one message payload into a transaction, enforcing the size
    /// cap. Accepts both the engine's field names and the upstream wire
    /// aliases (`cst_dim_id`, `transdatetime`).
    pub fn decode(payload: &[u8]) -> Result<Transaction, EngineError> {
        if payload.len() > MAX_PAYLOAD_BYTES {
            return Err(EngineError::InvalidTransaction(format!(
                "payload of {} bytes exceeds the {} byte limit",
                payload.len(),
                MAX_PAYLOAD_BYTES
            )));
        }
        serde_json::from_slice(payload).map_err(|e| {
            EngineError::InvalidTransaction(format!("malformed transaction payload: {e}"))
        })
    }

    pub fn subject(&self) -> &str {
        &self.subject
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_decode_accepts_wire_aliases() {
        let json = br#"{
            "cst_dim_id": 555,
            "transdatetime": "2024-01-15T23:45:00Z",
            "amount": 50000.0,
            "direction": "card_transfer"
        }"#;
        let tx = TransactionConsumer::decode(json).unwrap();
        assert_eq!(tx.customer_id, 555);
        assert_eq!(tx.amount, 50000.0);
    }

    #[test]
    fn test_decode_rejects_oversized_payload() {
        let padding = "x".repeat(MAX_PAYLOAD_BYTES);
        let json = format!(
            r#"{{"customer_id": 1, "timestamp": "2024-01-15T12:00:00Z",
                "amount": 10.0, "direction": "{padding}"}}"#
        );
        assert!(matches!(
            TransactionConsumer::decode(json.as_bytes()),
            Err(EngineError::InvalidTransaction(_))
        ));
    }

    #[test]
    fn test_decode_rejects_malformed_json() {
        assert!(matches!(
            TransactionConsumer::decode(b"not json"),
            Err(EngineError::InvalidTransaction(_))
        ));
    }
}
