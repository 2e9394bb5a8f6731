// Orchestrator: ordered fallback chain from hosted models to the local pipeline

use anyhow::Result;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, info, instrument, warn};

use crate::core::config::Config;
use crate::core::errors::{AnalysisError, ProviderError, StageResult};
use crate::core::types::AnalysisResult;
use crate::middleware::CircuitBreaker;
use crate::pipeline::LocalPipeline;
use crate::services::cloud::{DescriptionProvider, GeminiClient};
use crate::utils::{Metrics, Outcome};

/// One step of the fallback chain
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Stage {
    /// Hosted model attempt with the given identifier
    Cloud { model: String },
    /// On-device pipeline
    Local,
}

impl Stage {
    fn outcome(&self) -> Outcome {
        match self {
            Stage::Cloud { .. } => Outcome::Cloud,
            Stage::Local => Outcome::Local,
        }
    }
}

/// Cloud attempts in configured order (only when a provider exists), then local.
pub fn stage_plan(models: &[String], cloud_available: bool) -> Vec<Stage> {
    let mut stages: Vec<Stage> = if cloud_available {
        models
            .iter()
            .map(|model| Stage::Cloud { model: model.clone() })
            .collect()
    } else {
        Vec::new()
    };
    stages.push(Stage::Local);
    stages
}

/// Entry point for characterizing photographed items
pub struct Orchestrator {
    stages: Vec<Stage>,
    provider: Option<Arc<dyn DescriptionProvider>>,
    local: Arc<LocalPipeline>,
    cloud_timeout: Duration,
    metrics: Metrics,
}

impl Orchestrator {
    /// Wire the Gemini client (when a credential is configured) and the local pipeline
    #[instrument(skip(config, metrics))]
    pub fn new(config: Arc<Config>, metrics: Metrics) -> Result<Self> {
        let provider: Option<Arc<dyn DescriptionProvider>> = match config.cloud.api_key.clone() {
            Some(api_key) => Some(Arc::new(GeminiClient::new(
                &config.cloud,
                api_key,
                Some(CircuitBreaker::new()),
                metrics.clone(),
            )?)),
            None => {
                info!("GEMINI_API_KEY not set, cloud analysis disabled");
                None
            }
        };

        let local = Arc::new(LocalPipeline::from_config(&config, &metrics));
        Ok(Self::from_parts(&config, provider, local, metrics))
    }

    pub fn from_parts(
        config: &Config,
        provider: Option<Arc<dyn DescriptionProvider>>,
        local: Arc<LocalPipeline>,
        metrics: Metrics,
    ) -> Self {
        let stages = stage_plan(config.cloud_models(), provider.is_some());
        info!(
            "✓ Ready ({} stages: {})",
            stages.len(),
            stages
                .iter()
                .map(|s| match s {
                    Stage::Cloud { model } => model.as_str(),
                    Stage::Local => "local",
                })
                .collect::<Vec<_>>()
                .join(" → ")
        );

        Self {
            stages,
            provider,
            local,
            cloud_timeout: Duration::from_secs(config.cloud_timeout_seconds()),
            metrics,
        }
    }

    pub fn stages(&self) -> &[Stage] {
        &self.stages
    }

    pub fn metrics(&self) -> &Metrics {
        &self.metrics
    }

    async fn run_cloud(&self, model: &str, image_bytes: &[u8]) -> StageResult<AnalysisResult> {
        let provider = self.provider.as_ref().ok_or(AnalysisError::CloudNotConfigured)?;

        let start = Instant::now();
        let attempt = tokio::time::timeout(
            self.cloud_timeout,
            provider.generate_description(image_bytes, model),
        )
        .await
        .unwrap_or_else(|_| {
            Err(ProviderError::Timeout {
                model: model.to_string(),
                seconds: self.cloud_timeout.as_secs(),
            })
        })
        .and_then(|text| {
            if text.trim().is_empty() {
                Err(ProviderError::EmptyResponse {
                    model: model.to_string(),
                })
            } else {
                Ok(text)
            }
        });

        self.metrics
            .record_cloud_attempt(model, attempt.is_ok(), start.elapsed());

        attempt
            .map(|text| AnalysisResult::from_cloud(&text))
            .map_err(|source| AnalysisError::Cloud {
                model: model.to_string(),
                source,
            })
    }

    /// Run the local pipeline on its own task so a panic inside it stays contained.
    async fn run_local(&self, image_bytes: &Arc<Vec<u8>>) -> StageResult<AnalysisResult> {
        let local = Arc::clone(&self.local);
        let bytes = Arc::clone(image_bytes);
        tokio::spawn(async move { local.run(bytes).await })
            .await
            .map_err(|e| AnalysisError::TaskJoinFailed(e.to_string()))?
    }

    async fn run_stage(&self, stage: &Stage, image_bytes: &Arc<Vec<u8>>) -> StageResult<AnalysisResult> {
        match stage {
            Stage::Cloud { model } => self.run_cloud(model, image_bytes).await,
            Stage::Local => {
                info!("Using local fallback");
                self.run_local(image_bytes).await
            }
        }
    }

    /// Characterize one image. Never fails: the worst case is the fixed
    /// "Analysis unavailable." result.
    #[instrument(skip_all, fields(bytes = image_bytes.len()))]
    pub async fn analyze(&self, image_bytes: &[u8]) -> AnalysisResult {
        let start = Instant::now();
        let bytes = Arc::new(image_bytes.to_vec());

        for stage in &self.stages {
            match self.run_stage(stage, &bytes).await {
                Ok(result) => {
                    debug!("Stage {:?} answered in {:?}", stage, start.elapsed());
                    self.metrics.record_analysis(stage.outcome(), start.elapsed());
                    return result;
                }
                Err(e @ AnalysisError::Cloud { .. }) => {
                    debug!("{}, trying next stage", e);
                }
                Err(e) => {
                    warn!("Stage {:?} failed: {}", stage, e);
                }
            }
        }

        warn!("Every stage failed, returning the unavailable result");
        self.metrics.record_analysis(Outcome::Unavailable, start.elapsed());
        AnalysisResult::unavailable()
    }
}
