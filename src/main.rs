//! Fraud scoring engine entry point.
//!
//! Consumes transactions from NATS, scores each against the customer's
//! rolling history with the ONNX ensemble, and publishes flagged results.

use anyhow::Result;
use fraud_scoring_engine::{
    config::AppConfig,
    consumer::TransactionConsumer,
    engine::ScoringEngine,
    features::{DirectionEncoder, FEATURE_NAMES},
    metrics::{MetricsReporter, PipelineMetrics},
    models::ModelLoader,
    producer::ScorePublisher,
};
use futures::StreamExt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::Semaphore;
use tracing::{debug, error, info, warn};

#[tokio::main]
async fn main() -> Result<()> {
    let config = AppConfig::load()?;

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive(format!("fraud_scoring_engine={}", config.logging.level).parse()?),
        )
        .init();

    info!("Starting fraud scoring engine");
    info!(
        threshold = config.detection.threshold,
        retention_days = config.history.retention_days,
        "Configuration loaded"
    );

    // Load model artifacts and fail fast on any schema mismatch.
    let loader = ModelLoader::new(config.models.onnx_threads)?;
    let (ensemble, schema) = loader.load_ensemble(&config.models.models_dir)?;
    let encoder = DirectionEncoder::from_classes(&schema.direction_classes);

    let engine = Arc::new(ScoringEngine::new(&config, ensemble, encoder)?);
    let stats = engine.stats();
    info!(
        features = FEATURE_NAMES.len(),
        models = stats.model_count,
        classifiers = ?stats.classifier_names,
        "Scoring engine initialized"
    );

    let metrics = Arc::new(PipelineMetrics::new());

    let client = async_nats::connect(&config.nats.url).await?;
    info!(url = %config.nats.url, "Connected to NATS");

    let consumer = TransactionConsumer::new(client.clone(), &config.nats.transaction_subject);
    let publisher = Arc::new(ScorePublisher::new(client.clone(), &config.nats.score_subject));

    info!(
        workers = config.pipeline.workers,
        transaction_subject = %consumer.subject(),
        score_subject = %publisher.subject(),
        "Starting scoring loop"
    );

    let semaphore = Arc::new(Semaphore::new(config.pipeline.workers));
    let scored_count = Arc::new(AtomicU64::new(0));

    // Periodic metrics summary.
    let reporter_metrics = metrics.clone();
    tokio::spawn(async move {
        MetricsReporter::new(reporter_metrics, 30).start().await;
    });

    // Low-priority background eviction sweep; foreground scoring also
    // prunes lazily on access.
    let sweep_engine = engine.clone();
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(Duration::from_secs(600));
        loop {
            interval.tick().await;
            sweep_engine.sweep(chrono::Utc::now());
        }
    });

    let mut subscription = consumer.subscribe().await?;

    loop {
        let message = tokio::select! {
            msg = subscription.next() => match msg {
                Some(msg) => msg,
                None => break,
            },
            _ = tokio::signal::ctrl_c() => {
                info!("Shutdown signal received");
                break;
            }
        };

        let permit = semaphore.clone().acquire_owned().await?;

        let engine = engine.clone();
        let publisher = publisher.clone();
        let metrics = metrics.clone();
        let scored_count = scored_count.clone();

        tokio::spawn(async move {
            let started = Instant::now();

            let transaction = match TransactionConsumer::decode(&message.payload) {
                Ok(tx) => tx,
                Err(e) => {
                    warn!(error = %e, "Rejected transaction payload");
                    drop(permit);
                    return;
                }
            };
            let tx_id = transaction.transaction_id.clone();

            match engine.score_one(&transaction) {
                Ok(result) => {
                    metrics.record_scored(started.elapsed(), result.fraud_probability);

                    if result.is_fraud {
                        metrics.record_flagged(&format!("{:?}", result.risk_level).to_lowercase());

                        if let Err(e) = publisher.publish(&result).await {
                            error!(transaction_id = %tx_id, error = %e, "Failed to publish score result");
                        } else {
                            info!(
                                transaction_id = %tx_id,
                                fraud_probability = result.fraud_probability,
                                risk_level = ?result.risk_level,
                                alerts = result.alerts.len(),
                                "Fraud flagged"
                            );
                        }
                    } else {
                        debug!(
                            transaction_id = %tx_id,
                            fraud_probability = result.fraud_probability,
                            "Transaction scored below threshold"
                        );
                    }

                    let count = scored_count.fetch_add(1, Ordering::Relaxed) + 1;
                    if count % 100 == 0 {
                        let latency = metrics.latency_stats();
                        info!(
                            scored = count,
                            throughput = format!("{:.1} tx/s", metrics.throughput()),
                            avg_latency_us = latency.mean_us,
                            customers = engine.stats().customers_tracked,
                            "Scoring milestone"
                        );
                    }
                }
                Err(e) => {
                    error!(transaction_id = %tx_id, error = %e, "Scoring failed");
                }
            }

            drop(permit);
        });
    }

    info!("Scoring pipeline shutting down");
    metrics.log_summary();

    Ok(())
}
