pub mod config;
pub mod errors;
pub mod types;

// Re-export commonly used items for convenience
pub use config::Config;
pub use errors::{
    AnalysisError, ClassifierError, ConfigError, DecodeError, PaletteError, ProviderError,
};
pub use types::{
    AnalysisResult, ClassificationCandidate, ColorAnalysis, ColorName, ColorTag, DecodedImage,
    RankedLabel, Swatch,
};
