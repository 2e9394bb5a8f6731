// Label canonicalization, priority ranking, and the jewelry heuristic

use once_cell::sync::Lazy;
use std::collections::{HashMap, HashSet};

use crate::core::types::{ClassificationCandidate, RankedLabel};

/// Labels kept after ranking
pub const MAX_LABELS: usize = 3;

/// Score bonus for lost-and-found item categories
pub const PRIORITY_BONUS: f32 = 0.5;

pub const METAL_ITEM: &str = "Metal Item";

/// Industrial classes the classifier confuses with small metal belongings
pub static METAL_TERMS: &[&str] = &["hook", "buckle", "knot", "chain"];

/// Near-duplicate classifier classes collapsed onto one canonical noun
pub static SYNONYMS: Lazy<HashMap<&'static str, &'static str>> = Lazy::new(|| {
    HashMap::from([
        ("jersey", "T-Shirt"),
        ("maillot", "T-Shirt"),
        ("shirt", "Shirt"),
        ("sweatshirt", "Jumper"),
        ("cardigan", "Jumper"),
        ("water bottle", "Bottle"),
        ("bottle", "Bottle"),
        ("cellular telephone", "Phone"),
        ("hand-held computer", "Phone"),
        ("ipod", "Phone"),
        ("reflex camera", "Camera"),
        ("running shoe", "Shoe"),
        ("sandal", "Shoe"),
        ("clog", "Shoe"),
        ("loafers", "Shoe"),
        ("backpack", "Backpack"),
        ("bag", "Bag"),
    ])
});

/// Canonical nouns map onto themselves, so ranked output can be ranked again
static CANONICAL_NOUNS: Lazy<HashSet<&'static str>> = Lazy::new(|| {
    SYNONYMS
        .values()
        .copied()
        .chain(std::iter::once(METAL_ITEM))
        .collect()
});

/// Substrings marking plausible lost-and-found items
pub static PRIORITY_ITEMS: &[&str] = &[
    // jewelry and watches
    "ring", "jewelry", "necklace", "bracelet", "watch", "clock",
    // electronics
    "phone", "cellphone", "mobile", "electronic",
    // bags and luggage
    "wallet", "purse", "bag", "backpack", "satchel", "handbag",
    // drinkware
    "bottle", "cup", "mug", "thermos",
    // footwear
    "shoe", "sneaker", "sandal", "boot", "lofer", "footwear",
    // apparel
    "shirt", "jersey", "sweater", "jacket", "coat", "hoodie", "top",
    // headwear
    "hat", "cap", "beanie",
    // eyewear
    "glasses", "sunglasses", "spectacles",
    // keys, toys, misc
    "keys", "keychain", "toy", "car", "ball", "book", "notebook",
];

pub static JEWELRY_TERMS: &[&str] = &["ring", "necklace", "bracelet", "jewelry", "band", "watch"];

/// Map a raw classifier class name onto the canonical vocabulary.
pub fn clean_label(raw: &str) -> String {
    let head = raw.split(',').next().unwrap_or_default();
    if CANONICAL_NOUNS.contains(head) {
        return head.to_string();
    }

    let lower = head.to_lowercase();

    if METAL_TERMS.contains(&lower.as_str()) {
        return METAL_ITEM.to_string();
    }

    match SYNONYMS.get(lower.as_str()) {
        Some(canonical) => canonical.to_string(),
        None => lower,
    }
}

pub fn is_priority(label: &str) -> bool {
    let lower = label.to_lowercase();
    PRIORITY_ITEMS.iter().any(|item| lower.contains(item))
}

/// Clean, boost, rank, dedup, and truncate classifier candidates.
pub fn canonicalize(candidates: &[ClassificationCandidate]) -> Vec<RankedLabel> {
    let mut scored: Vec<RankedLabel> = candidates
        .iter()
        .map(|candidate| {
            let canonical_label = clean_label(&candidate.raw_label);
            let boosted_score = if is_priority(&canonical_label) {
                candidate.probability + PRIORITY_BONUS
            } else {
                candidate.probability
            };
            RankedLabel {
                canonical_label,
                boosted_score,
            }
        })
        .collect();

    // sort_by is stable: equal scores keep crop-first order
    scored.sort_by(|a, b| {
        b.boosted_score
            .partial_cmp(&a.boosted_score)
            .unwrap_or(std::cmp::Ordering::Equal)
    });

    let mut seen = HashSet::new();
    scored.retain(|label| seen.insert(label.canonical_label.clone()));
    scored.truncate(MAX_LABELS);
    scored
}

/// Replaying a ranked label as a candidate strips the priority bonus again.
impl From<&RankedLabel> for ClassificationCandidate {
    fn from(ranked: &RankedLabel) -> Self {
        let probability = if is_priority(&ranked.canonical_label) {
            ranked.boosted_score - PRIORITY_BONUS
        } else {
            ranked.boosted_score
        };
        ClassificationCandidate::new(ranked.canonical_label.clone(), probability)
    }
}

pub fn is_jewelry<S: AsRef<str>>(labels: &[S]) -> bool {
    labels.iter().any(|label| {
        let lower = label.as_ref().to_lowercase();
        JEWELRY_TERMS.iter().any(|term| lower.contains(term))
    })
}
