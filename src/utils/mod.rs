pub mod image_ops;
pub mod metrics;

#[cfg(test)]
pub(crate) mod test_support;

// Re-export commonly used items
pub use image_ops::{
    center_crop,
    center_crop_rect,
    center_window,
    decode_image,
    decode_image_async,
    guess_mime_type,
};
pub use metrics::{Metrics, MetricsSnapshot, Outcome};
