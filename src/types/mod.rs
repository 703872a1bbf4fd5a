//! Core data types: transactions in, score results out.

pub mod result;
pub mod transaction;

pub use result::{RiskLevel, RiskTierThresholds, ScoreResult};
pub use transaction::Transaction;
