// Caption template and tag set for locally characterized items

use std::collections::HashSet;

use crate::core::types::{ColorAnalysis, RankedLabel};

/// Main item name when no label survived ranking
pub const FALLBACK_ITEM: &str = "Item";

const GENERIC_SENTENCE: &str = "A generic object was detected.";
const JEWELRY_SENTENCE: &str = " It appears to be a piece of jewelry or personal accessory.";
const FOOTWEAR_SENTENCE: &str = " It appears to be footwear.";
const ELECTRONICS_SENTENCE: &str = " It is an electronic device.";

/// Uppercase the first character and leave the rest untouched.
pub fn capitalize(s: &str) -> String {
    let mut chars = s.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().chain(chars).collect(),
        None => String::new(),
    }
}

/// Build the human-readable description.
///
/// Always non-empty. Produces up to three sentences: identification,
/// color, and an optional context sentence.
pub fn compose(labels: &[RankedLabel], colors: &ColorAnalysis, is_jewelry: bool) -> String {
    let main_item = labels
        .first()
        .map(|label| capitalize(&label.canonical_label))
        .unwrap_or_else(|| FALLBACK_ITEM.to_string());

    let mut text = String::new();

    if labels.is_empty() {
        text.push_str(GENERIC_SENTENCE);
    } else {
        text.push_str(&format!("AI analysis identifies this as a **{}**", main_item));
        let alternatives: Vec<String> = labels[1..]
            .iter()
            .map(|label| capitalize(&label.canonical_label))
            .collect();
        if alternatives.is_empty() {
            text.push('.');
        } else {
            text.push_str(&format!(" (or similar to a {}).", alternatives.join(" / ")));
        }
    }

    text.push_str(&format!(
        " The item is primarily **{}**",
        capitalize(colors.main.as_str())
    ));
    match colors.secondary {
        Some(secondary) => text.push_str(&format!(
            " with distinct **{}** accents.",
            capitalize(secondary.as_str())
        )),
        None => text.push('.'),
    }

    if is_jewelry {
        text.push_str(JEWELRY_SENTENCE);
    } else if main_item.contains("Shoe") || main_item.contains("Sneaker") {
        text.push_str(FOOTWEAR_SENTENCE);
    } else if main_item.contains("Phone") || main_item.contains("Electronic") {
        text.push_str(ELECTRONICS_SENTENCE);
    }

    text
}

/// Ordered, deduplicated union of the labels and color names.
pub fn build_tags(labels: &[RankedLabel], colors: &ColorAnalysis) -> Vec<String> {
    let candidates = labels
        .iter()
        .map(|label| label.canonical_label.clone())
        .chain(std::iter::once(colors.main.as_str().to_string()))
        .chain(colors.secondary.map(|c| c.as_str().to_string()));

    let mut seen = HashSet::new();
    candidates
        .filter(|tag| !tag.is_empty())
        .filter(|tag| seen.insert(tag.clone()))
        .collect()
}
