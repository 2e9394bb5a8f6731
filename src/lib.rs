// Library exports for the lost-and-found image characterization engine

// Core modules
pub mod core;
pub mod middleware;
pub mod orchestration;
pub mod pipeline;
pub mod services;
pub mod utils;

// Re-export commonly used types and functions
pub use core::{
    config::Config,
    errors::{AnalysisError, ClassifierError, ConfigError, DecodeError, PaletteError, ProviderError},
    types::{AnalysisResult, ClassificationCandidate, ColorName, ColorTag, RankedLabel},
};

pub use middleware::{CircuitBreaker, CircuitBreakerConfig, CircuitState};

pub use orchestration::{Orchestrator, Stage};

pub use pipeline::LocalPipeline;

pub use services::{ClassifierCache, DescriptionProvider, GeminiClient, ImageClassifier, MedianCutPalette};

pub use utils::{Metrics, Outcome};
