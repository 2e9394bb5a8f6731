// Error types for each stage of the characterization pipeline
//
// Every error below is recovered from at the nearest enclosing stage; none of
// them reaches the caller of `Orchestrator::analyze`.

use thiserror::Error;

/// Image decoding errors
#[derive(Debug, Error)]
pub enum DecodeError {
    #[error("Image bytes are empty")]
    Empty,

    #[error("Unsupported or corrupt image: {0}")]
    Malformed(#[from] image::ImageError),

    #[error("Decoded image has no pixels ({width}x{height})")]
    ZeroSized { width: u32, height: u32 },

    #[error("Decode task join failed: {0}")]
    TaskJoinFailed(String),
}

/// Hosted generative model errors
#[derive(Debug, Error)]
pub enum ProviderError {
    #[error("HTTP request failed: {0}")]
    Http(reqwest::Error),

    #[error("Provider returned status {status}: {body}")]
    Status { status: u16, body: String },

    #[error("Provider returned an empty description (model {model})")]
    EmptyResponse { model: String },

    #[error("Invalid response format: {0}")]
    InvalidResponse(String),

    #[error("Attempt against {model} timed out after {seconds}s")]
    Timeout { model: String, seconds: u64 },

    #[error("Circuit breaker is open, provider is unavailable")]
    CircuitOpen,
}

/// Local classifier errors
#[derive(Debug, Error)]
pub enum ClassifierError {
    #[error("Classifier model not found at {path}")]
    ModelNotFound { path: String },

    #[error("Classifier labels not readable at {path}: {source}")]
    LabelsUnreadable {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Classifier failed to load: {0}")]
    LoadFailed(String),

    #[error("ONNX inference failed: {0}")]
    InferenceFailed(#[from] ort::Error),

    #[error("Invalid classifier input: {0}")]
    InvalidInput(String),

    #[error("Unexpected classifier output: {0}")]
    InvalidOutput(String),

    #[error("Session pool is closed")]
    PoolClosed,

    #[error("Classifier task join failed: {0}")]
    TaskJoinFailed(String),
}

/// Palette extraction errors
#[derive(Debug, Error)]
pub enum PaletteError {
    #[error("Palette source could not be decoded: {0}")]
    Decode(#[from] image::ImageError),

    #[error("No pixels left to quantize after filtering")]
    NoPixels,

    #[error("Palette task join failed: {0}")]
    TaskJoinFailed(String),
}

/// Failure of one stage in the orchestrator's fallback chain
#[derive(Debug, Error)]
pub enum AnalysisError {
    #[error("Cloud stage failed for model {model}: {source}")]
    Cloud {
        model: String,
        #[source]
        source: ProviderError,
    },

    #[error("Cloud stage skipped: no credential configured")]
    CloudNotConfigured,

    #[error("Image decoding failed: {0}")]
    Decode(#[from] DecodeError),

    #[error("Local pipeline task failed: {0}")]
    TaskJoinFailed(String),
}

/// Configuration errors
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("At least one cloud model identifier is required (GEMINI_MODELS)")]
    NoCloudModels,

    #[error("Cloud timeout must be > 0 seconds, got {0}")]
    InvalidTimeout(u64),

    #[error("Invalid classifier config: {0}")]
    InvalidClassifierConfig(String),

    #[error("Invalid palette config: {0}")]
    InvalidPaletteConfig(String),
}

pub type DecodeResult<T> = Result<T, DecodeError>;
pub type ProviderResult<T> = Result<T, ProviderError>;
pub type ClassifierResult<T> = Result<T, ClassifierError>;
pub type PaletteResult<T> = Result<T, PaletteError>;
pub type StageResult<T> = Result<T, AnalysisError>;
pub type ConfigResult<T> = Result<T, ConfigError>;

impl From<reqwest::Error> for ProviderError {
    fn from(e: reqwest::Error) -> Self {
        // Request URLs never reach logs
        ProviderError::Http(e.without_url())
    }
}

impl ProviderError {
    /// Whether a retry inside the same attempt may succeed
    pub fn is_transient(&self) -> bool {
        match self {
            ProviderError::Http(e) => e.is_timeout() || e.is_connect(),
            ProviderError::Status { status, .. } => *status == 429 || *status >= 500,
            _ => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_transient_status_classification() {
        let rate_limited = ProviderError::Status { status: 429, body: String::new() };
        let overloaded = ProviderError::Status { status: 503, body: String::new() };
        let unauthorized = ProviderError::Status { status: 401, body: String::new() };

        assert!(rate_limited.is_transient());
        assert!(overloaded.is_transient());
        assert!(!unauthorized.is_transient());
        assert!(!ProviderError::CircuitOpen.is_transient());
    }

    #[test]
    fn test_stage_error_wraps_source() {
        let err = AnalysisError::Cloud {
            model: "gemini-1.5-flash".to_string(),
            source: ProviderError::EmptyResponse { model: "gemini-1.5-flash".to_string() },
        };
        assert!(err.to_string().contains("gemini-1.5-flash"));
        assert!(std::error::Error::source(&err).is_some());
    }
}
