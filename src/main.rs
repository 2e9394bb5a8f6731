// Command-line entry point: characterize image files and print the results as JSON
//
// Usage: lostfound-vision [--metrics] <image>...

use lostfound_vision::{core::Config, AnalysisResult, Metrics, Orchestrator};

use anyhow::{Context, Result};
use futures::future::join_all;
use serde::Serialize;
use std::sync::Arc;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

#[derive(Serialize)]
struct FileReport {
    path: String,
    #[serde(flatten)]
    result: AnalysisResult,
}

#[tokio::main]
async fn main() -> Result<()> {
    // Load configuration
    let config = Arc::new(Config::new().context("Failed to load configuration")?);

    // Initialize logging
    let filter = EnvFilter::new(format!(
        "lostfound_vision={},ort=off",
        match config.log_level() {
            tracing::Level::TRACE => "trace",
            tracing::Level::DEBUG => "debug",
            tracing::Level::INFO => "info",
            tracing::Level::WARN => "warn",
            tracing::Level::ERROR => "error",
        }
    ));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    let mut show_metrics = false;
    let mut paths = Vec::new();
    for arg in std::env::args().skip(1) {
        match arg.as_str() {
            "--metrics" => show_metrics = true,
            _ => paths.push(arg),
        }
    }

    if paths.is_empty() {
        eprintln!("Usage: lostfound-vision [--metrics] <image>...");
        std::process::exit(2);
    }

    info!("=== LOST & FOUND VISION ===");
    info!(
        "Config: cloud={} models=[{}] timeout={}s retries={} top_k={}",
        if config.cloud_enabled() { "ON" } else { "OFF" },
        config.cloud_models().join(", "),
        config.cloud_timeout_seconds(),
        config.max_retries(),
        config.top_k()
    );

    let metrics = Metrics::new();
    let orchestrator = Arc::new(Orchestrator::new(Arc::clone(&config), metrics.clone())?);

    let tasks = paths.into_iter().map(|path| {
        let orchestrator = Arc::clone(&orchestrator);
        async move {
            let result = match tokio::fs::read(&path).await {
                Ok(bytes) => orchestrator.analyze(&bytes).await,
                Err(e) => {
                    error!("Failed to read {}: {}", path, e);
                    AnalysisResult::unavailable()
                }
            };
            if result.is_unavailable() {
                warn!("No characterization for {}", path);
            }
            FileReport { path, result }
        }
    });
    let reports = join_all(tasks).await;

    println!("{}", serde_json::to_string_pretty(&reports)?);

    let snapshot = metrics.snapshot();
    info!(
        "Done: {} analyses ({} cloud, {} local, {} unavailable), avg {}ms, p95 {}ms",
        snapshot.analyses_total,
        snapshot.cloud_results,
        snapshot.local_results,
        snapshot.unavailable_results,
        snapshot.analysis_latency_avg_ms,
        snapshot.analysis_latency_p95_ms
    );

    if show_metrics {
        eprintln!("{}", metrics.to_prometheus());
    }

    Ok(())
}
