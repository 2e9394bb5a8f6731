// Local image classifier: ONNX MobileNet-style model behind a process-wide lazy cache

use image::imageops::{self, FilterType};
use ndarray::Array4;
use once_cell::sync::OnceCell;
use ort::session::Session;
use ort::value::{Tensor, Value};
use std::path::Path;
use std::sync::Arc;
use tracing::{debug, info, instrument, trace};

use crate::core::config::ClassifierConfig;
use crate::core::errors::{ClassifierError, ClassifierResult};
use crate::core::types::{ClassificationCandidate, DecodedImage};
use crate::services::onnx_builder::{build_session, OnnxSessionPool};
use crate::utils::image_ops::center_crop;
use crate::utils::Metrics;

/// ImageNet normalization constants
const MEAN: [f32; 3] = [0.485, 0.456, 0.406];
const STD: [f32; 3] = [0.229, 0.224, 0.225];

/// Pretrained image classifier.
///
/// Implementations are read-only after construction and shared across
/// concurrent analyses. `classify` is CPU-bound and runs on the blocking pool.
pub trait ImageClassifier: Send + Sync {
    fn classify(&self, image: &DecodedImage, top_k: usize) -> ClassifierResult<Vec<ClassificationCandidate>>;
}

/// Parse a class-name file, one class per line.
///
/// A leading WordNet id (`n01440764 tench, Tinca tinca`) is dropped.
pub fn parse_labels(text: &str) -> Vec<String> {
    text.lines()
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .map(|line| match line.split_once(' ') {
            Some((head, rest)) if is_wordnet_id(head) => rest.trim().to_string(),
            _ => line.to_string(),
        })
        .collect()
}

fn is_wordnet_id(token: &str) -> bool {
    token.len() == 9
        && token.starts_with('n')
        && token[1..].chars().all(|c| c.is_ascii_digit())
}

/// Convert raw model output into probabilities.
///
/// Outputs that already form a distribution are returned unchanged; logits
/// go through a numerically stable softmax.
pub fn to_probabilities(raw: &[f32]) -> Vec<f32> {
    let sum: f32 = raw.iter().sum();
    let is_distribution = raw.iter().all(|v| (0.0..=1.0).contains(v)) && (sum - 1.0).abs() < 1e-3;
    if is_distribution {
        return raw.to_vec();
    }

    let max = raw.iter().cloned().fold(f32::NEG_INFINITY, f32::max);
    let exps: Vec<f32> = raw.iter().map(|v| (v - max).exp()).collect();
    let total: f32 = exps.iter().sum();
    exps.iter().map(|v| v / total).collect()
}

/// Highest `k` probabilities paired with their class names.
///
/// Models with one extra leading "background" output are aligned by
/// skipping that first entry.
pub fn top_k(
    probabilities: &[f32],
    labels: &[String],
    k: usize,
) -> ClassifierResult<Vec<ClassificationCandidate>> {
    let offset = match probabilities.len() {
        n if n == labels.len() => 0,
        n if n == labels.len() + 1 => 1,
        n => {
            return Err(ClassifierError::InvalidOutput(format!(
                "model produced {} classes but {} labels are loaded",
                n,
                labels.len()
            )))
        }
    };

    let mut indexed: Vec<(usize, f32)> = probabilities[offset..].iter().cloned().enumerate().collect();
    indexed.sort_by(|a, b| b.1.partial_cmp(&a.1).unwrap_or(std::cmp::Ordering::Equal));

    Ok(indexed
        .into_iter()
        .take(k)
        .map(|(i, p)| ClassificationCandidate::new(labels[i].clone(), p))
        .collect())
}

/// NCHW float tensor, resized and ImageNet-normalized.
pub fn preprocess(image: &DecodedImage, size: u32) -> ClassifierResult<Array4<f32>> {
    if image.width() == 0 || image.height() == 0 {
        return Err(ClassifierError::InvalidInput(format!(
            "cannot classify a {}x{} image",
            image.width(),
            image.height()
        )));
    }

    let resized = imageops::resize(image, size, size, FilterType::Triangle);
    let target = size as usize;
    let mut array = Array4::<f32>::zeros((1, 3, target, target));

    for (x, y, pixel) in resized.enumerate_pixels() {
        for c in 0..3 {
            array[[0, c, y as usize, x as usize]] = (pixel[c] as f32 / 255.0 - MEAN[c]) / STD[c];
        }
    }

    trace!("Preprocessed {}x{} → [1, 3, {}, {}]", image.width(), image.height(), target, target);
    Ok(array)
}

/// ONNX Runtime classifier with a small session pool
pub struct OnnxClassifier {
    pool: OnnxSessionPool,
    labels: Vec<String>,
    input_name: String,
    output_name: String,
    input_size: u32,
}

impl OnnxClassifier {
    /// Load model and labels from disk. Blocking.
    pub fn load(config: &ClassifierConfig) -> ClassifierResult<Self> {
        let model_path = Path::new(&config.model_path);
        if !model_path.exists() {
            return Err(ClassifierError::ModelNotFound {
                path: config.model_path.clone(),
            });
        }

        let labels_text = std::fs::read_to_string(&config.labels_path).map_err(|source| {
            ClassifierError::LabelsUnreadable {
                path: config.labels_path.clone(),
                source,
            }
        })?;
        let labels = parse_labels(&labels_text);
        if labels.is_empty() {
            return Err(ClassifierError::LoadFailed(format!(
                "no class names in {}",
                config.labels_path
            )));
        }

        info!("Loading classifier from disk: {}", model_path.display());

        let pool = OnnxSessionPool::new(config.pool_size);
        let backend = config.inference_backend.as_deref();
        let (device_type, first) = build_session(model_path, backend, "classifier")
            .map_err(|e| ClassifierError::LoadFailed(format!("{:#}", e)))?;

        let (input_name, output_name) = Self::io_names(&first)?;
        pool.add(first)?;

        for i in 1..config.pool_size {
            debug!("Creating classifier session {} of {}", i + 1, config.pool_size);
            let (_, session) = build_session(model_path, backend, "classifier")
                .map_err(|e| ClassifierError::LoadFailed(format!("{:#}", e)))?;
            pool.add(session)?;
        }

        info!(
            "✓ Classifier: {} ({} sessions, {} classes)",
            device_type,
            config.pool_size,
            labels.len()
        );

        Ok(Self {
            pool,
            labels,
            input_name,
            output_name,
            input_size: config.input_size,
        })
    }

    fn io_names(session: &Session) -> ClassifierResult<(String, String)> {
        let input = session
            .inputs
            .first()
            .ok_or_else(|| ClassifierError::LoadFailed("model declares no inputs".to_string()))?;
        let output = session
            .outputs
            .first()
            .ok_or_else(|| ClassifierError::LoadFailed("model declares no outputs".to_string()))?;
        Ok((input.name.clone(), output.name.clone()))
    }

    fn infer(&self, session: &mut Session, input: Tensor<f32>) -> ClassifierResult<Vec<f32>> {
        let outputs = session.run(ort::inputs![self.input_name.as_str() => input])?;
        let (_shape, data) = outputs[self.output_name.as_str()].try_extract_tensor::<f32>()?;
        Ok(data.to_vec())
    }
}

impl ImageClassifier for OnnxClassifier {
    fn classify(&self, image: &DecodedImage, k: usize) -> ClassifierResult<Vec<ClassificationCandidate>> {
        let tensor = preprocess(image, self.input_size)?;
        let input = Value::from_array(tensor)?;

        if self.pool.available() == 0 {
            debug!("All classifier sessions busy, waiting");
        }
        let mut session = self.pool.acquire()?;
        let result = self.infer(&mut session, input);
        self.pool.release(session)?;

        let probabilities = to_probabilities(&result?);
        top_k(&probabilities, &self.labels, k)
    }
}

pub type ClassifierLoader = Arc<dyn Fn() -> ClassifierResult<Arc<dyn ImageClassifier>> + Send + Sync>;

/// Lazily loaded classifier shared by every analysis.
///
/// Concurrent first callers wait on one load. A failed load is not cached,
/// so the next caller retries.
pub struct ClassifierCache {
    cell: tokio::sync::OnceCell<Arc<dyn ImageClassifier>>,
    loader: ClassifierLoader,
    metrics: Metrics,
}

impl ClassifierCache {
    pub fn new(loader: ClassifierLoader, metrics: Metrics) -> Self {
        Self {
            cell: tokio::sync::OnceCell::new(),
            loader,
            metrics,
        }
    }

    /// Cache over the ONNX classifier described by `config`
    pub fn from_config(config: &ClassifierConfig, metrics: Metrics) -> Self {
        let config = config.clone();
        let loader: ClassifierLoader = Arc::new(move || {
            OnnxClassifier::load(&config).map(|c| Arc::new(c) as Arc<dyn ImageClassifier>)
        });
        Self::new(loader, metrics)
    }

    /// Already-loaded classifier, loading it on first use
    pub async fn get(&self) -> ClassifierResult<Arc<dyn ImageClassifier>> {
        self.cell
            .get_or_try_init(|| async {
                let loader = Arc::clone(&self.loader);
                let classifier = tokio::task::spawn_blocking(move || loader())
                    .await
                    .map_err(|e| ClassifierError::TaskJoinFailed(e.to_string()))??;
                self.metrics.record_classifier_load();
                Ok::<_, ClassifierError>(classifier)
            })
            .await
            .map(Arc::clone)
    }

    pub fn is_loaded(&self) -> bool {
        self.cell.initialized()
    }
}

static SHARED_CACHE: OnceCell<Arc<ClassifierCache>> = OnceCell::new();

/// Process-wide classifier cache. The first caller's configuration wins.
pub fn shared_classifier_cache(config: &ClassifierConfig, metrics: &Metrics) -> Arc<ClassifierCache> {
    SHARED_CACHE
        .get_or_init(|| Arc::new(ClassifierCache::from_config(config, metrics.clone())))
        .clone()
}

/// Classify the full image and its center crop concurrently.
///
/// Crop results come first so that first-seen dedup favors close-up evidence.
/// Either view failing fails the ensemble.
#[instrument(skip(classifier, image), fields(width = image.width(), height = image.height()))]
pub async fn classify_ensemble(
    classifier: Arc<dyn ImageClassifier>,
    image: Arc<DecodedImage>,
    top_k: usize,
) -> ClassifierResult<Vec<ClassificationCandidate>> {
    let crop = center_crop(&image);

    let full_task = {
        let classifier = Arc::clone(&classifier);
        let image = Arc::clone(&image);
        tokio::task::spawn_blocking(move || classifier.classify(&image, top_k))
    };
    let crop_task = tokio::task::spawn_blocking(move || classifier.classify(&crop, top_k));

    let (full, crop) = tokio::join!(full_task, crop_task);
    let full = full.map_err(|e| ClassifierError::TaskJoinFailed(e.to_string()))??;
    let crop = crop.map_err(|e| ClassifierError::TaskJoinFailed(e.to_string()))??;

    debug!("Ensemble: {} crop + {} full candidates", crop.len(), full.len());

    let mut merged = crop;
    merged.extend(full);
    Ok(merged)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::utils::test_support::{solid_image, FailingClassifier, ScriptedClassifier};
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn labels(names: &[&str]) -> Vec<String> {
        names.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_parse_labels_strips_wordnet_ids() {
        let text = "n01440764 tench, Tinca tinca\n\nn04120489 running shoe\nsandal\n";
        assert_eq!(
            parse_labels(text),
            labels(&["tench, Tinca tinca", "running shoe", "sandal"])
        );
        // Not an id: wrong length
        assert_eq!(parse_labels("n123 thing"), labels(&["n123 thing"]));
    }

    #[test]
    fn test_softmax_of_logits() {
        let probabilities = to_probabilities(&[1.0, 2.0, 3.0]);
        let sum: f32 = probabilities.iter().sum();
        assert!((sum - 1.0).abs() < 1e-5);
        assert!(probabilities[2] > probabilities[1] && probabilities[1] > probabilities[0]);
    }

    #[test]
    fn test_distribution_passes_through() {
        assert_eq!(to_probabilities(&[0.25, 0.75]), vec![0.25, 0.75]);
    }

    #[test]
    fn test_top_k() {
        let names = labels(&["table", "sandal", "mug"]);
        let top = top_k(&[0.1, 0.7, 0.2], &names, 2).unwrap();
        assert_eq!(
            top,
            vec![
                ClassificationCandidate::new("sandal", 0.7),
                ClassificationCandidate::new("mug", 0.2),
            ]
        );
    }

    #[test]
    fn test_top_k_skips_background_class() {
        let names = labels(&["table", "sandal"]);
        let top = top_k(&[0.5, 0.1, 0.4], &names, 1).unwrap();
        assert_eq!(top, vec![ClassificationCandidate::new("sandal", 0.4)]);

        assert!(matches!(
            top_k(&[0.5, 0.5], &labels(&["a", "b", "c", "d"]), 1),
            Err(ClassifierError::InvalidOutput(_))
        ));
    }

    #[test]
    fn test_preprocess_normalizes() {
        let tensor = preprocess(&solid_image(10, 6, [255, 0, 0]), 8).unwrap();
        assert_eq!(tensor.shape(), &[1, 3, 8, 8]);
        assert!((tensor[[0, 0, 3, 3]] - (1.0 - 0.485) / 0.229).abs() < 1e-4);
        assert!((tensor[[0, 1, 3, 3]] - (-0.456 / 0.224)).abs() < 1e-4);

        assert!(matches!(
            preprocess(&solid_image(0, 0, [0, 0, 0]), 8),
            Err(ClassifierError::InvalidInput(_))
        ));
    }

    #[tokio::test]
    async fn test_ensemble_puts_crop_first() {
        let classifier = ScriptedClassifier::new()
            .on_width(40, &[("running shoe", 0.8), ("table", 0.6)])
            .on_width(20, &[("sandal", 0.7)]);
        let image = Arc::new(solid_image(40, 40, [10, 10, 10]));

        let merged = classify_ensemble(Arc::new(classifier), image, 5).await.unwrap();
        let names: Vec<&str> = merged.iter().map(|c| c.raw_label.as_str()).collect();
        assert_eq!(names, vec!["sandal", "running shoe", "table"]);
    }

    #[tokio::test]
    async fn test_ensemble_fails_when_a_view_fails() {
        let image = Arc::new(solid_image(40, 40, [10, 10, 10]));
        let result = classify_ensemble(Arc::new(FailingClassifier), image, 5).await;
        assert!(result.is_err());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_first_use_loads_once() {
        let loads = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&loads);
        let loader: ClassifierLoader = Arc::new(move || {
            counter.fetch_add(1, Ordering::SeqCst);
            std::thread::sleep(std::time::Duration::from_millis(50));
            Ok(Arc::new(ScriptedClassifier::new()) as Arc<dyn ImageClassifier>)
        });
        let metrics = Metrics::new();
        let cache = Arc::new(ClassifierCache::new(loader, metrics.clone()));

        let handles: Vec<_> = (0..8)
            .map(|_| {
                let cache = Arc::clone(&cache);
                tokio::spawn(async move { cache.get().await.is_ok() })
            })
            .collect();
        for handle in handles {
            assert!(handle.await.unwrap());
        }

        assert_eq!(loads.load(Ordering::SeqCst), 1);
        assert_eq!(metrics.snapshot().classifier_loads, 1);
        assert!(cache.is_loaded());
    }

    #[tokio::test]
    async fn test_failed_load_is_retried() {
        let attempts = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&attempts);
        let loader: ClassifierLoader = Arc::new(move || {
            if counter.fetch_add(1, Ordering::SeqCst) == 0 {
                Err(ClassifierError::ModelNotFound {
                    path: "models/missing.onnx".to_string(),
                })
            } else {
                Ok(Arc::new(ScriptedClassifier::new()) as Arc<dyn ImageClassifier>)
            }
        });
        let cache = ClassifierCache::new(loader, Metrics::new());

        assert!(matches!(cache.get().await, Err(ClassifierError::ModelNotFound { .. })));
        assert!(!cache.is_loaded());
        assert!(cache.get().await.is_ok());
        assert_eq!(attempts.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn test_missing_model_file() {
        let config = ClassifierConfig {
            model_path: "definitely/missing/model.onnx".to_string(),
            labels_path: "definitely/missing/labels.txt".to_string(),
            input_size: 224,
            top_k: 5,
            pool_size: 1,
            inference_backend: None,
        };
        assert!(matches!(
            OnnxClassifier::load(&config),
            Err(ClassifierError::ModelNotFound { .. })
        ));
    }
}
