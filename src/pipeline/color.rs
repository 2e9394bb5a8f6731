// Color naming and main/secondary color decision

use std::sync::Arc;
use tracing::{debug, warn};

use crate::core::errors::PaletteError;
use crate::core::types::{ColorAnalysis, ColorName, DecodedImage, Swatch};
use crate::services::palette::PaletteExtractor;
use crate::utils::image_ops::center_window;
use crate::utils::Metrics;

/// Name an RGB color with fixed thresholds.
///
/// The decision order is part of the contract; `yellow` is only reachable
/// when red ties for the maximum channel (see tests).
pub fn name_color(r: u8, g: u8, b: u8) -> ColorName {
    let (r, g, b) = (r as i32, g as i32, b as i32);

    if r > 190 && g > 190 && b > 190 {
        return ColorName::White;
    }
    if r < 65 && g < 65 && b < 65 {
        return ColorName::Black;
    }

    let max_diff = (r - g).abs().max((r - b).abs()).max((g - b).abs());
    if max_diff < 25 {
        return if r > 130 { ColorName::White } else { ColorName::Grey };
    }

    if r > g && r > b {
        if g > 140 && b < 100 {
            return ColorName::Orange;
        }
        if r > 150 {
            return ColorName::Red;
        }
        return ColorName::Brown;
    }
    if g > r && g > b {
        return ColorName::Green;
    }
    if b > r && b > g {
        return if r > 150 { ColorName::Purple } else { ColorName::Blue };
    }
    if r > 180 && g > 180 {
        return ColorName::Yellow;
    }
    ColorName::Colorful
}

/// Rounded mean RGB over the tight center window.
pub fn center_rgb(image: &DecodedImage) -> (u8, u8, u8) {
    let (xs, ys) = center_window(image.width(), image.height());

    let (mut r, mut g, mut b, mut count) = (0u64, 0u64, 0u64, 0u64);
    for y in ys {
        for x in xs.clone() {
            let px = image.get_pixel(x, y);
            r += px[0] as u64;
            g += px[1] as u64;
            b += px[2] as u64;
            count += 1;
        }
    }

    let mean = |sum: u64| (sum as f64 / count.max(1) as f64).round() as u8;
    (mean(r), mean(g), mean(b))
}

/// Unadjusted name of the center color.
pub fn center_color(image: &DecodedImage) -> ColorName {
    let (r, g, b) = center_rgb(image);
    let name = name_color(r, g, b);
    debug!("Center color rgb({}, {}, {}) -> {}", r, g, b, name);
    name
}

/// Most populous swatch whose name differs from the center color and is not `colorful`.
pub fn pick_secondary(center: ColorName, swatches: &[Swatch]) -> Option<ColorName> {
    let mut sorted = swatches.to_vec();
    sorted.sort_by(|a, b| b.population.cmp(&a.population));

    sorted
        .iter()
        .map(|s| name_color(s.r, s.g, s.b))
        .find(|name| *name != center && *name != ColorName::Colorful)
}

/// Metallic rename applied to the main color of jewelry.
pub fn jewelry_override(color: ColorName) -> ColorName {
    match color {
        ColorName::Grey | ColorName::White | ColorName::Black => ColorName::Silver,
        ColorName::Yellow | ColorName::Orange | ColorName::Brown => ColorName::Gold,
        other => other,
    }
}

/// Combines the center color, the palette, and the jewelry context.
pub struct ColorAnalyzer {
    palette: Arc<dyn PaletteExtractor>,
    metrics: Metrics,
}

impl ColorAnalyzer {
    pub fn new(palette: Arc<dyn PaletteExtractor>, metrics: Metrics) -> Self {
        Self { palette, metrics }
    }

    pub async fn analyze(
        &self,
        image: &DecodedImage,
        image_bytes: Arc<Vec<u8>>,
        is_jewelry: bool,
    ) -> ColorAnalysis {
        let center = center_color(image);

        let palette = Arc::clone(&self.palette);
        let swatches = tokio::task::spawn_blocking(move || palette.extract_palette(&image_bytes))
            .await
            .map_err(|e| PaletteError::TaskJoinFailed(e.to_string()))
            .and_then(|result| result);

        let secondary = match swatches {
            Ok(swatches) => pick_secondary(center, &swatches),
            Err(e) => {
                warn!("Palette extraction failed, no secondary color: {}", e);
                self.metrics.record_palette_failure();
                None
            }
        };

        let main = if is_jewelry { jewelry_override(center) } else { center };

        ColorAnalysis { main, secondary }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::utils::test_support::{solid_image, FailingPalette, FixedPalette};
    use image::Rgba;

    fn swatch(r: u8, g: u8, b: u8, population: u32) -> Swatch {
        Swatch { r, g, b, population }
    }

    #[test]
    fn test_reference_colors() {
        assert_eq!(name_color(200, 200, 200), ColorName::White);
        assert_eq!(name_color(30, 30, 30), ColorName::Black);
        assert_eq!(name_color(200, 50, 50), ColorName::Red);
        assert_eq!(name_color(50, 150, 50), ColorName::Green);
        assert_eq!(name_color(50, 50, 180), ColorName::Blue);
        assert_eq!(name_color(180, 60, 180), ColorName::Purple);
    }

    #[test]
    fn test_achromatic_and_red_family() {
        assert_eq!(name_color(140, 130, 125), ColorName::White);
        assert_eq!(name_color(100, 95, 90), ColorName::Grey);
        assert_eq!(name_color(230, 150, 40), ColorName::Orange);
        assert_eq!(name_color(120, 70, 40), ColorName::Brown);
        assert_eq!(name_color(160, 60, 200), ColorName::Purple);
    }

    #[test]
    fn test_yellow_is_reachable_only_on_red_ties() {
        // r == g > b: no channel is a strict maximum
        assert_eq!(name_color(200, 200, 100), ColorName::Yellow);
        // r == b > g with a bright green channel
        assert_eq!(name_color(230, 185, 230), ColorName::Yellow);
        // A typical yellow with r > g is captured by the red branch
        assert_eq!(name_color(240, 220, 60), ColorName::Orange);
        // Ties below the brightness threshold fall through to the catch-all
        assert_eq!(name_color(120, 120, 60), ColorName::Colorful);
    }

    #[test]
    fn test_center_rgb_uses_window_only() {
        let mut image = solid_image(10, 10, [0, 0, 255]);
        for y in 4..6 {
            for x in 4..6 {
                image.put_pixel(x, y, Rgba([200, 50, 50, 255]));
            }
        }
        assert_eq!(center_rgb(&image), (200, 50, 50));
        assert_eq!(center_color(&image), ColorName::Red);
    }

    #[test]
    fn test_center_rgb_rounds_mean() {
        let mut image = solid_image(10, 10, [0, 0, 0]);
        image.put_pixel(4, 4, Rgba([1, 2, 3, 255]));
        image.put_pixel(5, 4, Rgba([2, 2, 3, 255]));
        image.put_pixel(4, 5, Rgba([2, 3, 4, 255]));
        image.put_pixel(5, 5, Rgba([1, 3, 4, 255]));
        // means: 1.5, 2.5, 3.5
        assert_eq!(center_rgb(&image), (2, 3, 4));
    }

    #[test]
    fn test_pick_secondary_skips_center_and_colorful() {
        let swatches = vec![
            swatch(200, 50, 50, 10),  // red (same as center)
            swatch(120, 120, 60, 50), // colorful
            swatch(50, 50, 180, 5),   // blue
            swatch(50, 150, 50, 7),   // green
        ];
        assert_eq!(pick_secondary(ColorName::Red, &swatches), Some(ColorName::Green));
        assert_eq!(pick_secondary(ColorName::Red, &swatches[..2]), None);
        assert_eq!(pick_secondary(ColorName::Red, &[]), None);
    }

    #[test]
    fn test_jewelry_override() {
        for color in [ColorName::Grey, ColorName::White, ColorName::Black] {
            assert_eq!(jewelry_override(color), ColorName::Silver);
        }
        for color in [ColorName::Yellow, ColorName::Orange, ColorName::Brown] {
            assert_eq!(jewelry_override(color), ColorName::Gold);
        }
        assert_eq!(jewelry_override(ColorName::Blue), ColorName::Blue);
    }

    #[tokio::test]
    async fn test_analyzer_overrides_main_only() {
        let palette = Arc::new(FixedPalette(vec![swatch(240, 220, 60, 9)]));
        let analyzer = ColorAnalyzer::new(palette, Metrics::new());
        let image = solid_image(10, 10, [100, 95, 90]);

        let analysis = analyzer.analyze(&image, Arc::new(Vec::new()), true).await;
        assert_eq!(analysis.main, ColorName::Silver);
        // The secondary is orange and stays orange
        assert_eq!(analysis.secondary, Some(ColorName::Orange));

        let analysis = analyzer.analyze(&image, Arc::new(Vec::new()), false).await;
        assert_eq!(analysis.main, ColorName::Grey);
    }

    #[tokio::test]
    async fn test_palette_failure_drops_secondary() {
        let metrics = Metrics::new();
        let palette = Arc::new(FailingPalette);
        let analyzer = ColorAnalyzer::new(palette, metrics.clone());
        let image = solid_image(10, 10, [50, 50, 180]);

        let analysis = analyzer.analyze(&image, Arc::new(Vec::new()), false).await;
        assert_eq!(analysis, ColorAnalysis { main: ColorName::Blue, secondary: None });
        assert_eq!(metrics.snapshot().palette_failures, 1);
    }
}
