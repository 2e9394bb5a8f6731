// Fakes and fixtures shared by unit tests

use futures::future::BoxFuture;
use image::{ImageFormat, Rgba, RgbaImage};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::io::Cursor;
use std::time::Duration;

use crate::core::config::Config;
use crate::core::errors::{
    ClassifierError, ClassifierResult, PaletteError, PaletteResult, ProviderError, ProviderResult,
};
use crate::core::types::{ClassificationCandidate, DecodedImage, Swatch};
use crate::services::classifier::ImageClassifier;
use crate::services::cloud::DescriptionProvider;
use crate::services::palette::PaletteExtractor;

pub fn solid_image(width: u32, height: u32, rgb: [u8; 3]) -> RgbaImage {
    RgbaImage::from_pixel(width, height, Rgba([rgb[0], rgb[1], rgb[2], 255]))
}

pub fn encode_png(image: &RgbaImage) -> Vec<u8> {
    let mut buffer = Cursor::new(Vec::new());
    image.write_to(&mut buffer, ImageFormat::Png).unwrap();
    buffer.into_inner()
}

/// Defaults only, no credential
pub fn test_config() -> Config {
    Config::from_lookup(|_| None).unwrap()
}

pub struct FixedPalette(pub Vec<Swatch>);

impl PaletteExtractor for FixedPalette {
    fn extract_palette(&self, _image_bytes: &[u8]) -> PaletteResult<Vec<Swatch>> {
        Ok(self.0.clone())
    }
}

pub struct FailingPalette;

impl PaletteExtractor for FailingPalette {
    fn extract_palette(&self, _image_bytes: &[u8]) -> PaletteResult<Vec<Swatch>> {
        Err(PaletteError::NoPixels)
    }
}

/// Answers by input width, so full image and center crop can differ
#[derive(Default)]
pub struct ScriptedClassifier {
    by_width: HashMap<u32, Vec<ClassificationCandidate>>,
}

impl ScriptedClassifier {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn on_width(mut self, width: u32, candidates: &[(&str, f32)]) -> Self {
        self.by_width.insert(
            width,
            candidates
                .iter()
                .map(|(label, p)| ClassificationCandidate::new(*label, *p))
                .collect(),
        );
        self
    }
}

impl ImageClassifier for ScriptedClassifier {
    fn classify(&self, image: &DecodedImage, top_k: usize) -> ClassifierResult<Vec<ClassificationCandidate>> {
        let mut candidates = self.by_width.get(&image.width()).cloned().unwrap_or_default();
        candidates.truncate(top_k);
        Ok(candidates)
    }
}

pub struct FailingClassifier;

impl ImageClassifier for FailingClassifier {
    fn classify(&self, _image: &DecodedImage, _top_k: usize) -> ClassifierResult<Vec<ClassificationCandidate>> {
        Err(ClassifierError::InvalidOutput("scripted failure".to_string()))
    }
}

#[derive(Clone)]
pub enum Reply {
    Text(String),
    Status(u16),
    Hang,
}

/// Provider answering from a per-model script and recording each call
#[derive(Default)]
pub struct ScriptedProvider {
    replies: HashMap<String, Reply>,
    calls: Mutex<Vec<String>>,
}

impl ScriptedProvider {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn reply(mut self, model: &str, reply: Reply) -> Self {
        self.replies.insert(model.to_string(), reply);
        self
    }

    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().clone()
    }
}

impl DescriptionProvider for ScriptedProvider {
    fn generate_description<'a>(
        &'a self,
        _image: &'a [u8],
        model: &'a str,
    ) -> BoxFuture<'a, ProviderResult<String>> {
        self.calls.lock().push(model.to_string());
        let reply = self.replies.get(model).cloned().unwrap_or(Reply::Status(404));
        Box::pin(async move {
            match reply {
                Reply::Text(text) => Ok(text),
                Reply::Status(status) => Err(ProviderError::Status {
                    status,
                    body: "scripted".to_string(),
                }),
                Reply::Hang => {
                    tokio::time::sleep(Duration::from_secs(3600)).await;
                    Err(ProviderError::InvalidResponse("unreachable".to_string()))
                }
            }
        })
    }
}
