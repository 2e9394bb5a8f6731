//! Check which hosted model identifiers answer with the configured credential
//! Run with: cargo run --release --bin probe_models -- [model...]

use anyhow::{Context, Result};
use lostfound_vision::{core::Config, GeminiClient, Metrics};
use tracing::info;

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter("lostfound_vision=info")
        .with_target(false)
        .init();

    let config = Config::new().context("Failed to load configuration")?;
    let Some(api_key) = config.cloud.api_key.clone() else {
        eprintln!("GEMINI_API_KEY is not set");
        std::process::exit(1);
    };

    // Models from args, else the configured chain
    let args: Vec<String> = std::env::args().skip(1).collect();
    let models = if args.is_empty() {
        config.cloud_models().to_vec()
    } else {
        args
    };

    let client = GeminiClient::new(&config.cloud, api_key, None, Metrics::new())?;

    println!("\n=== Model probe ===");
    let mut available = 0;
    for model in &models {
        info!("Probing {}", model);
        match client.probe(model).await {
            Ok(reply) => {
                available += 1;
                let preview: String = reply.chars().take(60).collect();
                println!("  ✓ {:<32} {}", model, preview.replace('\n', " "));
            }
            Err(e) => println!("  ✗ {:<32} {}", model, e),
        }
    }
    println!("\n{}/{} models available", available, models.len());

    Ok(())
}
