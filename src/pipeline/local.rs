// On-device characterization: decode, ensemble classification, ranking, color, caption

use std::sync::Arc;
use tracing::{debug, instrument, warn};

use crate::core::config::Config;
use crate::core::errors::{ClassifierResult, StageResult};
use crate::core::types::{AnalysisResult, ColorTag, DecodedImage, RankedLabel};
use crate::pipeline::caption::{build_tags, compose};
use crate::pipeline::color::ColorAnalyzer;
use crate::pipeline::labels::{canonicalize, is_jewelry};
use crate::services::classifier::{classify_ensemble, shared_classifier_cache, ClassifierCache};
use crate::services::palette::{MedianCutPalette, PaletteExtractor};
use crate::utils::image_ops::decode_image_async;
use crate::utils::Metrics;

/// Local fallback pipeline.
///
/// Holds no per-call state; one instance serves concurrent analyses.
pub struct LocalPipeline {
    classifiers: Arc<ClassifierCache>,
    colors: ColorAnalyzer,
    top_k: usize,
    metrics: Metrics,
}

impl LocalPipeline {
    pub fn new(
        classifiers: Arc<ClassifierCache>,
        palette: Arc<dyn PaletteExtractor>,
        top_k: usize,
        metrics: Metrics,
    ) -> Self {
        Self {
            classifiers,
            colors: ColorAnalyzer::new(palette, metrics.clone()),
            top_k,
            metrics,
        }
    }

    /// Pipeline over the process-wide ONNX classifier and the median-cut palette
    pub fn from_config(config: &Config, metrics: &Metrics) -> Self {
        Self::new(
            shared_classifier_cache(&config.classifier, metrics),
            Arc::new(MedianCutPalette::new(&config.palette)),
            config.top_k(),
            metrics.clone(),
        )
    }

    async fn ranked_labels(&self, image: Arc<DecodedImage>) -> ClassifierResult<Vec<RankedLabel>> {
        let classifier = self.classifiers.get().await?;
        let candidates = classify_ensemble(classifier, image, self.top_k).await?;
        Ok(canonicalize(&candidates))
    }

    /// Characterize one image. Fails only when the bytes cannot be decoded.
    #[instrument(skip_all, fields(bytes = image_bytes.len()))]
    pub async fn run(&self, image_bytes: Arc<Vec<u8>>) -> StageResult<AnalysisResult> {
        let image = Arc::new(decode_image_async(Arc::clone(&image_bytes)).await?);

        let ranked = match self.ranked_labels(Arc::clone(&image)).await {
            Ok(ranked) => ranked,
            Err(e) => {
                warn!("Local classification failed, continuing without labels: {}", e);
                self.metrics.record_classifier_failure();
                Vec::new()
            }
        };

        let names: Vec<&str> = ranked.iter().map(|r| r.canonical_label.as_str()).collect();
        let jewelry = is_jewelry(&names);
        debug!("Ranked labels {:?} (jewelry: {})", names, jewelry);

        let colors = self.colors.analyze(&image, image_bytes, jewelry).await;

        Ok(AnalysisResult {
            labels: build_tags(&ranked, &colors),
            colors: vec![ColorTag { name: colors.main }],
            text: compose(&ranked, &colors, jewelry),
        })
    }
}
