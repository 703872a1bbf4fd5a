//! Model ensemble, ONNX loading and score aggregation.

pub mod aggregator;
pub mod ensemble;
pub mod loader;

pub use aggregator::ScoreAggregator;
pub use ensemble::{EnsembleOutput, ModelEnsemble, Scorer};
pub use loader::{FeatureSchema, ModelLoader};
