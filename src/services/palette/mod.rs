// Dominant color palette via modified median-cut quantization

use rayon::prelude::*;
use tracing::{debug, trace};

use crate::core::config::PaletteConfig;
use crate::core::errors::{PaletteError, PaletteResult};
use crate::core::types::Swatch;

const SIGNIFICANT_BITS: u32 = 5;
const SHIFT: u32 = 8 - SIGNIFICANT_BITS;
const LEVELS: usize = 1 << SIGNIFICANT_BITS;
const HISTOGRAM_SIZE: usize = LEVELS * LEVELS * LEVELS;

/// Pixels more transparent than this are ignored
const MIN_ALPHA: u8 = 125;
/// Pixels brighter than this on every channel are treated as background
const WHITE_CUTOFF: u8 = 250;

/// Share of splits driven by population alone
const POPULATION_PHASE: f64 = 0.75;

/// Pixel count above which the histogram is built on the rayon pool
const PARALLEL_THRESHOLD: usize = 100_000;

/// Source of dominant color swatches for an encoded image.
pub trait PaletteExtractor: Send + Sync {
    fn extract_palette(&self, image_bytes: &[u8]) -> PaletteResult<Vec<Swatch>>;
}

#[inline]
fn histogram_index(r: usize, g: usize, b: usize) -> usize {
    (r << (2 * SIGNIFICANT_BITS)) | (g << SIGNIFICANT_BITS) | b
}

/// Histogram cell of a sampled pixel, or None when it is filtered out
#[inline]
fn bucket(px: &[u8]) -> Option<usize> {
    if px[3] < MIN_ALPHA {
        return None;
    }
    if px[0] > WHITE_CUTOFF && px[1] > WHITE_CUTOFF && px[2] > WHITE_CUTOFF {
        return None;
    }
    Some(histogram_index(
        (px[0] >> SHIFT) as usize,
        (px[1] >> SHIFT) as usize,
        (px[2] >> SHIFT) as usize,
    ))
}

fn build_histogram_parallel(rgba: &[u8], stride: usize) -> Vec<u32> {
    rgba.par_chunks_exact(4)
        .step_by(stride)
        .filter_map(bucket)
        .fold(
            || vec![0u32; HISTOGRAM_SIZE],
            |mut histogram, index| {
                histogram[index] += 1;
                histogram
            },
        )
        .reduce(
            || vec![0u32; HISTOGRAM_SIZE],
            |mut acc, partial| {
                for (a, p) in acc.iter_mut().zip(partial) {
                    *a += p;
                }
                acc
            },
        )
}

fn build_histogram_sequential(rgba: &[u8], stride: usize) -> Vec<u32> {
    let mut histogram = vec![0u32; HISTOGRAM_SIZE];
    for index in rgba.chunks_exact(4).step_by(stride).filter_map(bucket) {
        histogram[index] += 1;
    }
    histogram
}

/// Axis-aligned box in the quantized RGB cube (inclusive bounds)
#[derive(Debug, Clone, Copy)]
struct ColorBox {
    lo: [usize; 3],
    hi: [usize; 3],
    population: u64,
}

impl ColorBox {
    fn volume(&self) -> u64 {
        (0..3).map(|axis| (self.hi[axis] - self.lo[axis] + 1) as u64).product()
    }

    fn splittable(&self) -> bool {
        self.population > 0 && (0..3).any(|axis| self.hi[axis] > self.lo[axis])
    }

    fn cells(&self) -> impl Iterator<Item = (usize, usize, usize)> + '_ {
        (self.lo[0]..=self.hi[0]).flat_map(move |r| {
            (self.lo[1]..=self.hi[1])
                .flat_map(move |g| (self.lo[2]..=self.hi[2]).map(move |b| (r, g, b)))
        })
    }

    /// Shrink to the occupied cells. None when the box is empty.
    fn fitted(lo: [usize; 3], hi: [usize; 3], histogram: &[u32]) -> Option<Self> {
        let mut min = [usize::MAX; 3];
        let mut max = [0usize; 3];
        let mut population = 0u64;

        let probe = ColorBox { lo, hi, population: 0 };
        for (r, g, b) in probe.cells() {
            let count = histogram[histogram_index(r, g, b)];
            if count == 0 {
                continue;
            }
            population += count as u64;
            for (axis, v) in [r, g, b].into_iter().enumerate() {
                min[axis] = min[axis].min(v);
                max[axis] = max[axis].max(v);
            }
        }

        (population > 0).then_some(ColorBox {
            lo: min,
            hi: max,
            population,
        })
    }

    /// Split at the population median along the longest axis.
    fn split(&self, histogram: &[u32]) -> Option<(ColorBox, ColorBox)> {
        if !self.splittable() {
            return None;
        }

        let axis = (0..3)
            .max_by_key(|&axis| self.hi[axis] - self.lo[axis])
            .unwrap_or(0);

        let mut slices = vec![0u64; self.hi[axis] - self.lo[axis] + 1];
        for (r, g, b) in self.cells() {
            let v = [r, g, b][axis];
            slices[v - self.lo[axis]] += histogram[histogram_index(r, g, b)] as u64;
        }

        let half = self.population.div_ceil(2);
        let mut cumulative = 0u64;
        let mut cut = self.lo[axis];
        for (offset, count) in slices.iter().enumerate() {
            cumulative += count;
            if cumulative >= half {
                cut = self.lo[axis] + offset;
                break;
            }
        }
        // Both halves must keep at least one slice
        let cut = cut.min(self.hi[axis] - 1);

        let mut left_hi = self.hi;
        left_hi[axis] = cut;
        let mut right_lo = self.lo;
        right_lo[axis] = cut + 1;

        let left = ColorBox::fitted(self.lo, left_hi, histogram)?;
        let right = ColorBox::fitted(right_lo, self.hi, histogram)?;
        Some((left, right))
    }

    /// Population-weighted mean color, mapped back to 8-bit channels.
    fn average(&self, histogram: &[u32]) -> (u8, u8, u8) {
        let mut sums = [0f64; 3];
        let mut total = 0f64;
        for (r, g, b) in self.cells() {
            let count = histogram[histogram_index(r, g, b)] as f64;
            if count == 0.0 {
                continue;
            }
            total += count;
            for (axis, v) in [r, g, b].into_iter().enumerate() {
                sums[axis] += count * (v as f64 + 0.5) * (1 << SHIFT) as f64;
            }
        }

        let channel = |axis: usize| -> u8 {
            let value = if total > 0.0 {
                sums[axis] / total
            } else {
                (self.lo[axis] + self.hi[axis] + 1) as f64 * (1 << SHIFT) as f64 / 2.0
            };
            value.round().clamp(0.0, 255.0) as u8
        };
        (channel(0), channel(1), channel(2))
    }
}

/// Median-cut palette extractor.
pub struct MedianCutPalette {
    max_colors: usize,
    swatch_count: usize,
    quality: usize,
}

impl MedianCutPalette {
    pub fn new(config: &PaletteConfig) -> Self {
        Self {
            max_colors: config.max_colors.max(2),
            swatch_count: config.swatch_count.max(1),
            quality: config.quality.max(1),
        }
    }

    /// Quantized histogram of the sampled, filtered pixels. Parallel for
    /// large images.
    fn histogram(&self, rgba: &[u8]) -> Vec<u32> {
        if rgba.len() / 4 >= PARALLEL_THRESHOLD {
            build_histogram_parallel(rgba, self.quality)
        } else {
            build_histogram_sequential(rgba, self.quality)
        }
    }

    /// Split the highest-ranked splittable box until `target` boxes exist.
    fn split_until<K>(&self, boxes: &mut Vec<ColorBox>, histogram: &[u32], target: usize, key: K)
    where
        K: Fn(&ColorBox) -> u64,
    {
        while boxes.len() < target {
            let Some(index) = boxes
                .iter()
                .enumerate()
                .filter(|(_, b)| b.splittable())
                .max_by_key(|(_, b)| key(b))
                .map(|(i, _)| i)
            else {
                break;
            };

            let Some((left, right)) = boxes[index].split(histogram) else {
                break;
            };
            boxes[index] = left;
            boxes.push(right);
        }
    }

    /// Quantize a decoded RGBA buffer into swatches, most populous first.
    pub fn quantize(&self, rgba: &[u8]) -> PaletteResult<Vec<Swatch>> {
        let histogram = self.histogram(rgba);

        let full = ColorBox::fitted([0; 3], [LEVELS - 1; 3], &histogram)
            .ok_or(PaletteError::NoPixels)?;
        trace!("Palette source box holds {} sampled pixels", full.population);

        let mut boxes = vec![full];
        let population_target = ((self.max_colors as f64) * POPULATION_PHASE).ceil() as usize;
        self.split_until(&mut boxes, &histogram, population_target, |b| b.population);
        self.split_until(&mut boxes, &histogram, self.max_colors, |b| {
            b.population * b.volume()
        });

        boxes.sort_by(|a, b| b.population.cmp(&a.population));

        let swatches: Vec<Swatch> = boxes
            .iter()
            .take(self.swatch_count)
            .map(|b| {
                let (r, g, bl) = b.average(&histogram);
                Swatch {
                    r,
                    g,
                    b: bl,
                    population: b.population.min(u32::MAX as u64) as u32,
                }
            })
            .collect();

        debug!("Palette: {} boxes, returning {} swatches", boxes.len(), swatches.len());
        Ok(swatches)
    }
}

impl PaletteExtractor for MedianCutPalette {
    fn extract_palette(&self, image_bytes: &[u8]) -> PaletteResult<Vec<Swatch>> {
        let rgba = image::load_from_memory(image_bytes)?.to_rgba8();
        self.quantize(rgba.as_raw())
    }
}
