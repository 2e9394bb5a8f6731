use image::{imageops, ImageFormat};
use std::ops::Range;
use std::sync::Arc;

use crate::core::errors::{DecodeError, DecodeResult};
use crate::core::types::DecodedImage;

/// Share of each dimension kept by the classification center crop
pub const CENTER_CROP_FRACTION: f64 = 0.5;

/// Bounds of the tight window sampled for the center color
pub const COLOR_WINDOW_START: f64 = 0.40;
pub const COLOR_WINDOW_END: f64 = 0.60;

/// Decode encoded image bytes into a row-major RGBA buffer.
pub fn decode_image(bytes: &[u8]) -> DecodeResult<DecodedImage> {
    if bytes.is_empty() {
        return Err(DecodeError::Empty);
    }

    let rgba = image::load_from_memory(bytes)?.to_rgba8();
    if rgba.width() == 0 || rgba.height() == 0 {
        return Err(DecodeError::ZeroSized {
            width: rgba.width(),
            height: rgba.height(),
        });
    }
    Ok(rgba)
}

/// Decode on the blocking pool; decoding large photos is CPU-bound.
pub async fn decode_image_async(bytes: Arc<Vec<u8>>) -> DecodeResult<DecodedImage> {
    tokio::task::spawn_blocking(move || decode_image(&bytes))
        .await
        .map_err(|e| DecodeError::TaskJoinFailed(e.to_string()))?
}

/// Centered crop rectangle `(x, y, width, height)` covering `fraction` of each dimension.
pub fn center_crop_rect(width: u32, height: u32, fraction: f64) -> (u32, u32, u32, u32) {
    let crop_w = (width as f64 * fraction).floor() as u32;
    let crop_h = (height as f64 * fraction).floor() as u32;
    let x = (width - crop_w) / 2;
    let y = (height - crop_h) / 2;
    (x, y, crop_w, crop_h)
}

/// Close-up view used by the ensemble classifier.
pub fn center_crop(image: &DecodedImage) -> DecodedImage {
    let (x, y, w, h) = center_crop_rect(image.width(), image.height(), CENTER_CROP_FRACTION);
    imageops::crop_imm(image, x, y, w, h).to_image()
}

/// Column and row ranges of the center color window.
///
/// Never empty for a non-empty image: a degenerate window is widened to one pixel.
pub fn center_window(width: u32, height: u32) -> (Range<u32>, Range<u32>) {
    (window_axis(width), window_axis(height))
}

fn window_axis(len: u32) -> Range<u32> {
    let start = (len as f64 * COLOR_WINDOW_START).floor() as u32;
    let end = (len as f64 * COLOR_WINDOW_END).floor() as u32;
    if end > start {
        start..end
    } else {
        let start = start.min(len.saturating_sub(1));
        start..(start + 1).min(len)
    }
}

/// MIME type for an encoded image, defaulting to JPEG uploads.
pub fn guess_mime_type(bytes: &[u8]) -> &'static str {
    image::guess_format(bytes)
        .map(|format| format.to_mime_type())
        .unwrap_or_else(|_| ImageFormat::Jpeg.to_mime_type())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::utils::test_support::{encode_png, solid_image};
    use image::Rgba;

    #[tokio::test]
    async fn test_decode_png_async() {
        let bytes = encode_png(&solid_image(8, 6, [10, 20, 30]));
        let decoded = decode_image_async(Arc::new(bytes)).await.unwrap();
        assert_eq!((decoded.width(), decoded.height()), (8, 6));
        assert_eq!(decoded.get_pixel(3, 3), &Rgba([10, 20, 30, 255]));
    }

    #[test]
    fn test_decode_rejects_garbage() {
        assert!(matches!(decode_image(&[]), Err(DecodeError::Empty)));
        assert!(matches!(
            decode_image(b"definitely not an image"),
            Err(DecodeError::Malformed(_))
        ));
    }

    #[test]
    fn test_center_crop_rect_is_floored() {
        assert_eq!(center_crop_rect(100, 80, 0.5), (25, 20, 50, 40));
        assert_eq!(center_crop_rect(101, 7, 0.5), (25, 2, 50, 3));
        assert_eq!(center_crop_rect(1, 1, 0.5), (0, 0, 0, 0));
    }

    #[test]
    fn test_center_crop_takes_middle() {
        let mut image = solid_image(4, 4, [0, 0, 0]);
        image.put_pixel(1, 1, Rgba([255, 0, 0, 255]));
        image.put_pixel(2, 2, Rgba([0, 255, 0, 255]));

        let crop = center_crop(&image);
        assert_eq!((crop.width(), crop.height()), (2, 2));
        assert_eq!(crop.get_pixel(0, 0), &Rgba([255, 0, 0, 255]));
        assert_eq!(crop.get_pixel(1, 1), &Rgba([0, 255, 0, 255]));
    }

    #[test]
    fn test_center_window() {
        assert_eq!(center_window(100, 50), (40..60, 20..30));
        assert_eq!(center_window(1, 2), (0..1, 0..1));
        assert_eq!(center_window(3, 3), (1..2, 1..2));
    }

    #[test]
    fn test_guess_mime_type() {
        let png = encode_png(&solid_image(2, 2, [1, 2, 3]));
        assert_eq!(guess_mime_type(&png), "image/png");
        assert_eq!(guess_mime_type(b"????"), "image/jpeg");
    }
}
