// Records exchanged between the characterization stages

use serde::{Deserialize, Serialize};
use std::fmt;

/// Decoded image owned by one local pipeline invocation (row-major RGBA)
pub type DecodedImage = image::RgbaImage;

/// Raw classifier output before canonicalization
#[derive(Debug, Clone, PartialEq)]
pub struct ClassificationCandidate {
    pub raw_label: String,
    /// Probability in [0, 1]
    pub probability: f32,
}

impl ClassificationCandidate {
    pub fn new(raw_label: impl Into<String>, probability: f32) -> Self {
        Self {
            raw_label: raw_label.into(),
            probability,
        }
    }
}

/// Canonical label with its priority-boosted score
#[derive(Debug, Clone, PartialEq)]
pub struct RankedLabel {
    pub canonical_label: String,
    pub boosted_score: f32,
}

/// Closed color vocabulary used in results and captions
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ColorName {
    #[serde(rename = "white")]
    White,
    #[serde(rename = "black")]
    Black,
    #[serde(rename = "grey")]
    Grey,
    #[serde(rename = "red")]
    Red,
    #[serde(rename = "orange")]
    Orange,
    #[serde(rename = "brown")]
    Brown,
    #[serde(rename = "green")]
    Green,
    #[serde(rename = "blue")]
    Blue,
    #[serde(rename = "purple")]
    Purple,
    #[serde(rename = "yellow")]
    Yellow,
    #[serde(rename = "colorful")]
    Colorful,
    Silver,
    Gold,
}

impl ColorName {
    pub const ALL: [ColorName; 13] = [
        ColorName::White,
        ColorName::Black,
        ColorName::Grey,
        ColorName::Red,
        ColorName::Orange,
        ColorName::Brown,
        ColorName::Green,
        ColorName::Blue,
        ColorName::Purple,
        ColorName::Yellow,
        ColorName::Colorful,
        ColorName::Silver,
        ColorName::Gold,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            ColorName::White => "white",
            ColorName::Black => "black",
            ColorName::Grey => "grey",
            ColorName::Red => "red",
            ColorName::Orange => "orange",
            ColorName::Brown => "brown",
            ColorName::Green => "green",
            ColorName::Blue => "blue",
            ColorName::Purple => "purple",
            ColorName::Yellow => "yellow",
            ColorName::Colorful => "colorful",
            ColorName::Silver => "Silver",
            ColorName::Gold => "Gold",
        }
    }
}

impl fmt::Display for ColorName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One dominant palette entry
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Swatch {
    pub r: u8,
    pub g: u8,
    pub b: u8,
    pub population: u32,
}

/// Main/secondary color decision for one image
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ColorAnalysis {
    pub main: ColorName,
    pub secondary: Option<ColorName>,
}

/// Color entry of an analysis result
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ColorTag {
    pub name: ColorName,
}

/// Structured description of one photographed item
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnalysisResult {
    pub labels: Vec<String>,
    pub colors: Vec<ColorTag>,
    pub text: String,
}

pub const CLOUD_LABEL: &str = "cloud-ai";
pub const UNKNOWN_LABEL: &str = "unknown";
pub const UNAVAILABLE_TEXT: &str = "Analysis unavailable.";

impl AnalysisResult {
    /// Result of a successful hosted-model description
    pub fn from_cloud(text: &str) -> Self {
        Self {
            labels: vec![CLOUD_LABEL.to_string()],
            colors: Vec::new(),
            text: text.trim().to_string(),
        }
    }

    /// Terminal result when every stage failed
    pub fn unavailable() -> Self {
        Self {
            labels: vec![UNKNOWN_LABEL.to_string()],
            colors: Vec::new(),
            text: UNAVAILABLE_TEXT.to_string(),
        }
    }

    pub fn is_unavailable(&self) -> bool {
        self.labels.len() == 1 && self.labels[0] == UNKNOWN_LABEL && self.colors.is_empty()
    }
}
