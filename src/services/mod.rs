pub mod classifier;
pub mod cloud;
pub mod onnx_builder; // Shared ONNX session builder and pool
pub mod palette;

// Re-export commonly used services
pub use classifier::{
    classify_ensemble, shared_classifier_cache, ClassifierCache, ImageClassifier, OnnxClassifier,
};
pub use cloud::{DescriptionProvider, GeminiClient};
pub use palette::{MedianCutPalette, PaletteExtractor};
