//! Real-time transaction fraud scoring engine.
//!
//! Maintains a bounded rolling history per customer, derives a fixed
//! 60-feature vector from that history plus the incoming transaction,
//! scores it with an ensemble of pretrained ONNX classifiers and an
//! anomaly detector, and returns a calibrated fraud probability, a
//! discrete risk tier and human-readable alert explanations.

pub mod alerts;
pub mod config;
pub mod consumer;
pub mod engine;
pub mod error;
pub mod features;
pub mod history;
pub mod metrics;
pub mod models;
pub mod producer;
pub mod types;

pub use alerts::AlertGenerator;
pub use config::AppConfig;
pub use consumer::TransactionConsumer;
pub use engine::{EngineStats, ScoringEngine};
pub use error::EngineError;
pub use features::{DirectionEncoder, FeatureExtractor, FeatureVector};
pub use history::HistoryStore;
pub use models::{ModelEnsemble, ModelLoader, ScoreAggregator, Scorer};
pub use producer::ScorePublisher;
pub use types::{RiskLevel, ScoreResult, Transaction};
