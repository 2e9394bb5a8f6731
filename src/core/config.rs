use crate::core::errors::{ConfigError, ConfigResult};
use std::env;
use std::str::FromStr;
use tracing::Level;

/// Logging configuration
#[derive(Debug, Clone)]
pub struct LoggingConfig {
    pub log_level: Level,
}

/// Hosted model configuration
#[derive(Debug, Clone)]
pub struct CloudConfig {
    /// Absent credential disables the cloud path entirely
    pub api_key: Option<String>,
    /// Model identifiers, tried in order
    pub models: Vec<String>,
    pub api_base: String,
    pub timeout_seconds: u64,
    pub max_retries: u32,
}

/// Local classifier configuration
#[derive(Debug, Clone)]
pub struct ClassifierConfig {
    pub model_path: String,
    pub labels_path: String,
    pub input_size: u32,
    pub top_k: usize,
    pub pool_size: usize,
    pub inference_backend: Option<String>,
}

/// Palette extraction configuration
#[derive(Debug, Clone)]
pub struct PaletteConfig {
    /// Number of quantization boxes
    pub max_colors: usize,
    /// Number of swatches handed to the color analyzer
    pub swatch_count: usize,
    /// Pixel sampling stride
    pub quality: usize,
}

/// Main application configuration
#[derive(Debug, Clone)]
pub struct Config {
    pub logging: LoggingConfig,
    pub cloud: CloudConfig,
    pub classifier: ClassifierConfig,
    pub palette: PaletteConfig,
}

const DEFAULT_MODELS: &str = "gemini-1.5-flash,gemini-1.5-flash-latest";

fn parse_var<T, F>(lookup: &F, key: &str) -> Option<T>
where
    T: FromStr,
    F: Fn(&str) -> Option<String>,
{
    lookup(key).and_then(|s| s.trim().parse().ok())
}

impl Config {
    pub fn new() -> ConfigResult<Self> {
        // Load .env file if it exists
        let _ = dotenvy::dotenv();

        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Build configuration from an arbitrary key lookup
    pub fn from_lookup<F>(lookup: F) -> ConfigResult<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let config = Self::load(&lookup);
        config.validate()?;
        Ok(config)
    }

    fn load<F>(lookup: &F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let log_level = lookup("LOG_LEVEL")
            .and_then(|s| match s.to_lowercase().as_str() {
                "trace" => Some(Level::TRACE),
                "debug" => Some(Level::DEBUG),
                "info" => Some(Level::INFO),
                "warn" | "warning" => Some(Level::WARN),
                "error" => Some(Level::ERROR),
                _ => None,
            })
            .unwrap_or(Level::INFO);

        let models = lookup("GEMINI_MODELS")
            .unwrap_or_else(|| DEFAULT_MODELS.to_string())
            .split(',')
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
            .collect();

        Self {
            logging: LoggingConfig { log_level },
            cloud: CloudConfig {
                api_key: lookup("GEMINI_API_KEY")
                    .map(|s| s.trim().to_string())
                    .filter(|s| !s.is_empty()),
                models,
                api_base: lookup("GEMINI_API_BASE")
                    .map(|s| s.trim_end_matches('/').to_string())
                    .unwrap_or_else(|| {
                        "https://generativelanguage.googleapis.com/v1beta".to_string()
                    }),
                timeout_seconds: parse_var(lookup, "CLOUD_TIMEOUT_SECONDS").unwrap_or(30),
                max_retries: parse_var(lookup, "MAX_RETRIES").unwrap_or(0),
            },
            classifier: ClassifierConfig {
                model_path: lookup("CLASSIFIER_MODEL_PATH")
                    .unwrap_or_else(|| "models/mobilenet_v2.onnx".to_string()),
                labels_path: lookup("CLASSIFIER_LABELS_PATH")
                    .unwrap_or_else(|| "models/imagenet_labels.txt".to_string()),
                input_size: parse_var(lookup, "CLASSIFIER_INPUT_SIZE").unwrap_or(224),
                top_k: parse_var(lookup, "CLASSIFIER_TOP_K").unwrap_or(5),
                pool_size: parse_var(lookup, "CLASSIFIER_POOL_SIZE").unwrap_or(2),
                inference_backend: lookup("INFERENCE_BACKEND")
                    .map(|s| s.trim().to_uppercase())
                    .filter(|s| !s.is_empty()),
            },
            palette: PaletteConfig {
                max_colors: parse_var(lookup, "PALETTE_MAX_COLORS").unwrap_or(64),
                swatch_count: parse_var(lookup, "PALETTE_SWATCHES").unwrap_or(6),
                quality: parse_var(lookup, "PALETTE_QUALITY").unwrap_or(5),
            },
        }
    }

    fn validate(&self) -> ConfigResult<()> {
        if self.cloud.models.is_empty() {
            return Err(ConfigError::NoCloudModels);
        }

        if self.cloud.timeout_seconds == 0 {
            return Err(ConfigError::InvalidTimeout(self.cloud.timeout_seconds));
        }

        if !(32..=1024).contains(&self.classifier.input_size) {
            return Err(ConfigError::InvalidClassifierConfig(format!(
                "input_size must be between 32 and 1024, got {}",
                self.classifier.input_size
            )));
        }

        if self.classifier.top_k == 0 {
            return Err(ConfigError::InvalidClassifierConfig(
                "top_k must be > 0".to_string(),
            ));
        }

        if self.classifier.pool_size == 0 {
            return Err(ConfigError::InvalidClassifierConfig(
                "pool_size must be > 0".to_string(),
            ));
        }

        if !(2..=256).contains(&self.palette.max_colors) {
            return Err(ConfigError::InvalidPaletteConfig(format!(
                "max_colors must be between 2 and 256, got {}",
                self.palette.max_colors
            )));
        }

        if self.palette.swatch_count == 0 || self.palette.quality == 0 {
            return Err(ConfigError::InvalidPaletteConfig(
                "swatch_count and quality must be > 0".to_string(),
            ));
        }

        Ok(())
    }

    pub fn log_level(&self) -> Level {
        self.logging.log_level
    }

    /// Whether the cloud path should be attempted at all
    pub fn cloud_enabled(&self) -> bool {
        self.cloud.api_key.is_some()
    }

    pub fn cloud_models(&self) -> &[String] {
        &self.cloud.models
    }

    pub fn cloud_timeout_seconds(&self) -> u64 {
        self.cloud.timeout_seconds
    }

    pub fn max_retries(&self) -> u32 {
        self.cloud.max_retries
    }

    pub fn top_k(&self) -> usize {
        self.classifier.top_k
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn config_from(pairs: &[(&str, &str)]) -> Result<Config, ConfigError> {
        let vars: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        Config::from_lookup(|key| vars.get(key).cloned())
    }

    #[test]
    fn test_defaults() {
        let config = config_from(&[]).unwrap();
        assert!(!config.cloud_enabled());
        assert_eq!(
            config.cloud_models(),
            &["gemini-1.5-flash".to_string(), "gemini-1.5-flash-latest".to_string()]
        );
        assert_eq!(config.cloud_timeout_seconds(), 30);
        assert_eq!(config.max_retries(), 0);
        assert_eq!(config.top_k(), 5);
        assert_eq!(config.classifier.input_size, 224);
        assert_eq!(config.palette.max_colors, 64);
        assert_eq!(config.log_level(), Level::INFO);
    }

    #[test]
    fn test_max_retries_override() {
        let config = config_from(&[("MAX_RETRIES", "2")]).unwrap();
        assert_eq!(config.max_retries(), 2);
        assert_eq!(config.cloud.max_retries, 2);
    }

    #[test]
    fn test_blank_api_key_disables_cloud() {
        let config = config_from(&[("GEMINI_API_KEY", "   ")]).unwrap();
        assert!(!config.cloud_enabled());

        let config = config_from(&[("GEMINI_API_KEY", "secret")]).unwrap();
        assert!(config.cloud_enabled());
    }

    #[test]
    fn test_model_list_parsing() {
        let config = config_from(&[("GEMINI_MODELS", " a , ,b ")]).unwrap();
        assert_eq!(config.cloud_models(), &["a".to_string(), "b".to_string()]);

        assert!(matches!(
            config_from(&[("GEMINI_MODELS", " , ")]),
            Err(ConfigError::NoCloudModels)
        ));
    }

    #[test]
    fn test_validation_rejects_bad_values() {
        assert!(matches!(
            config_from(&[("CLOUD_TIMEOUT_SECONDS", "0")]),
            Err(ConfigError::InvalidTimeout(0))
        ));
        assert!(config_from(&[("CLASSIFIER_TOP_K", "0")]).is_err());
        assert!(config_from(&[("CLASSIFIER_INPUT_SIZE", "4096")]).is_err());
        assert!(config_from(&[("PALETTE_MAX_COLORS", "1")]).is_err());
        assert!(config_from(&[("PALETTE_QUALITY", "0")]).is_err());
    }

    #[test]
    fn test_api_base_trailing_slash_trimmed() {
        let config = config_from(&[("GEMINI_API_BASE", "http://localhost:8080/v1/")]).unwrap();
        assert_eq!(config.cloud.api_base, "http://localhost:8080/v1");
    }
}
