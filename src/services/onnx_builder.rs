// Shared ONNX Runtime session builder with hardware acceleration detection

use anyhow::{Context, Result};
use crossbeam::channel::{bounded, Receiver, Sender};
use ort::execution_providers::CPUExecutionProvider;
use ort::session::{builder::GraphOptimizationLevel, Session};
use std::path::Path;
use tracing::{debug, info, warn};

#[cfg(feature = "cuda")]
use ort::execution_providers::CUDAExecutionProvider;

#[cfg(all(target_os = "macos", feature = "coreml"))]
use ort::execution_providers::CoreMLExecutionProvider;

use crate::core::errors::{ClassifierError, ClassifierResult};

/// Thread count for ONNX Runtime CPU inference.
///
/// Windows is capped at 6 threads; synchronization overhead outweighs the
/// extra cores there.
/// Reference: https://github.com/microsoft/onnxruntime/issues/3713
pub fn optimal_intra_op_threads() -> usize {
    let total_cores = num_cpus::get();

    #[cfg(target_os = "windows")]
    let optimal = std::cmp::min(6, total_cores).max(1);

    #[cfg(not(target_os = "windows"))]
    let optimal = total_cores.max(1);

    debug!("CPU threads: {} total cores, using {} for inference", total_cores, optimal);
    optimal
}

/// Fixed-size pool of sessions over a crossbeam bounded channel
pub struct OnnxSessionPool {
    sender: Sender<Session>,
    receiver: Receiver<Session>,
}

impl OnnxSessionPool {
    pub fn new(capacity: usize) -> Self {
        let (sender, receiver) = bounded(capacity);
        Self { sender, receiver }
    }

    /// Add a freshly built session
    pub fn add(&self, session: Session) -> ClassifierResult<()> {
        self.sender.send(session).map_err(|_| ClassifierError::PoolClosed)
    }

    /// Take a session, blocking until one is free
    pub fn acquire(&self) -> ClassifierResult<Session> {
        self.receiver.recv().map_err(|_| ClassifierError::PoolClosed)
    }

    pub fn release(&self, session: Session) -> ClassifierResult<()> {
        self.sender.send(session).map_err(|_| ClassifierError::PoolClosed)
    }

    pub fn available(&self) -> usize {
        self.receiver.len()
    }
}

/// Build a session for the model at `model_path`.
///
/// `backend` forces a provider (`CUDA`, `COREML`, `CPU`); `None` or `AUTO`
/// tries compiled-in accelerators first and falls back to CPU.
///
/// # Returns
/// (backend_name, Session)
pub fn build_session(
    model_path: &Path,
    backend: Option<&str>,
    model_name: &str,
) -> Result<(String, Session)> {
    if let Some(forced) = backend.filter(|b| !b.eq_ignore_ascii_case("auto")) {
        info!("INFERENCE_BACKEND={}, forcing specific backend for {}", forced, model_name);
        return try_forced_backend(forced, model_path, model_name);
    }

    #[cfg(feature = "cuda")]
    {
        if let Ok(session) = Session::builder()
            .and_then(|b| b.with_execution_providers([CUDAExecutionProvider::default().build()]))
            .and_then(|b| b.with_optimization_level(GraphOptimizationLevel::Level3))
            .and_then(|b| b.with_intra_threads(optimal_intra_op_threads()))
            .and_then(|b| b.with_inter_threads(1))
            .and_then(|b| b.commit_from_file(model_path))
        {
            info!("✓ Using CUDA acceleration for {}", model_name);
            return Ok(("CUDA".to_string(), session));
        }
    }

    #[cfg(all(target_os = "macos", feature = "coreml"))]
    {
        if let Ok(session) = Session::builder()
            .and_then(|b| b.with_execution_providers([CoreMLExecutionProvider::default().build()]))
            .and_then(|b| b.with_optimization_level(GraphOptimizationLevel::Level3))
            .and_then(|b| b.with_intra_threads(optimal_intra_op_threads()))
            .and_then(|b| b.with_inter_threads(1))
            .and_then(|b| b.commit_from_file(model_path))
        {
            info!("✓ Using CoreML acceleration for {} (Apple Neural Engine)", model_name);
            return Ok(("CoreML".to_string(), session));
        }
    }

    let session = cpu_session(model_path, model_name)?;
    warn!("⚠️  Using CPU-only inference for {} (no GPU acceleration available)", model_name);
    Ok(("CPU".to_string(), session))
}

fn cpu_session(model_path: &Path, model_name: &str) -> Result<Session> {
    Session::builder()
        .context(format!("Failed to create ONNX session builder for {}", model_name))?
        .with_execution_providers([CPUExecutionProvider::default().build()])
        .context(format!("Failed to configure CPU execution provider for {}", model_name))?
        .with_optimization_level(GraphOptimizationLevel::Level3)
        .context(format!("Failed to set graph optimization level for {}", model_name))?
        .with_intra_threads(optimal_intra_op_threads())
        .context(format!("Failed to configure intra-op threads for {}", model_name))?
        .with_inter_threads(1)
        .context(format!("Failed to configure inter-op threads for {}", model_name))?
        .commit_from_file(model_path)
        .context(format!(
            "Failed to load {} ONNX model from {}. \
            This usually indicates:\n  \
            1. Model file corruption\n  \
            2. ONNX Runtime version/platform mismatch\n  \
            3. Model created with incompatible ONNX opset version",
            model_name,
            model_path.display()
        ))
}

fn try_forced_backend(backend: &str, model_path: &Path, model_name: &str) -> Result<(String, Session)> {
    match backend.to_uppercase().as_str() {
        #[cfg(feature = "cuda")]
        "CUDA" => {
            let session = Session::builder()
                .context("Failed to create session builder")?
                .with_execution_providers([CUDAExecutionProvider::default().build()])
                .context("Failed to configure CUDA provider")?
                .with_optimization_level(GraphOptimizationLevel::Level3)
                .context("Failed to set optimization level")?
                .with_intra_threads(optimal_intra_op_threads())
                .context("Failed to configure intra-op threads")?
                .with_inter_threads(1)
                .context("Failed to configure inter-op threads")?
                .commit_from_file(model_path)
                .context("Failed to load model with CUDA")?;
            info!("✓ Forced CUDA backend for {}", model_name);
            Ok(("CUDA (forced)".to_string(), session))
        }
        #[cfg(not(feature = "cuda"))]
        "CUDA" => {
            anyhow::bail!("CUDA backend not available. Rebuild with: cargo build --features cuda")
        }

        #[cfg(all(target_os = "macos", feature = "coreml"))]
        "COREML" => {
            let session = Session::builder()
                .context("Failed to create session builder")?
                .with_execution_providers([CoreMLExecutionProvider::default().build()])
                .context("Failed to configure CoreML provider")?
                .with_optimization_level(GraphOptimizationLevel::Level3)
                .context("Failed to set optimization level")?
                .with_intra_threads(optimal_intra_op_threads())
                .context("Failed to configure intra-op threads")?
                .with_inter_threads(1)
                .context("Failed to configure inter-op threads")?
                .commit_from_file(model_path)
                .context("Failed to load model with CoreML")?;
            info!("✓ Forced CoreML backend for {}", model_name);
            Ok(("CoreML (forced)".to_string(), session))
        }
        #[cfg(not(all(target_os = "macos", feature = "coreml")))]
        "COREML" => {
            anyhow::bail!("CoreML backend not available. Rebuild with: cargo build --features coreml (macOS only)")
        }

        "CPU" => {
            let session = cpu_session(model_path, model_name)?;
            info!("✓ Forced CPU backend for {}", model_name);
            Ok(("CPU (forced)".to_string(), session))
        }

        _ => {
            anyhow::bail!(
                "Unknown inference backend '{}'. Valid options: CUDA, COREML, CPU, AUTO",
                backend
            )
        }
    }
}
