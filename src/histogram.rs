use std::collections::{BTreeMap, BTreeSet};

use crate::oklab::{OKLab, srgb_to_oklab_batch};

/// Images above this pixel count are bucketed at 5 bits instead of 6.
const FINE_BUCKET_LIMIT: usize = 500_000;

/// Above this many distinct visible colors, error samples fall back to
/// histogram buckets.
pub const EXACT_SAMPLE_LIMIT: usize = 1 << 15;

/// A color the palette is fitted against.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Sample {
    pub color: OKLab,
    /// Accumulated `alpha / 255`; pulls centroids.
    pub weight: f64,
    /// Visible pixels this sample stands for; scores the fit.
    pub count: u64,
}

/// Accumulated color and weight for one histogram bucket.
#[derive(Debug, Clone, Default)]
struct Bucket {
    l_sum: f64,
    a_sum: f64,
    b_sum: f64,
    weight: f64,
    count: u64,
}

impl Bucket {
    fn add(&mut self, lab: OKLab, weight: f64) {
        self.l_sum += lab.l as f64 * weight;
        self.a_sum += lab.a as f64 * weight;
        self.b_sum += lab.b as f64 * weight;
        self.weight += weight;
        self.count += 1;
    }

    fn centroid(&self) -> OKLab {
        if self.weight < 1e-10 {
            return OKLab::default();
        }
        OKLab::new(
            (self.l_sum / self.weight) as f32,
            (self.a_sum / self.weight) as f32,
            (self.b_sum / self.weight) as f32,
        )
    }
}

/// Bucket key for an OKLab value at `bits` per channel.
fn bucket_key(lab: OKLab, bits: u32) -> u32 {
    let max_val = (1u32 << bits) - 1;
    let scale = max_val as f32;
    let l = ((lab.l.clamp(0.0, 1.0) * scale).round() as u32).min(max_val);
    let a = (((lab.a + 0.4).max(0.0) * (scale / 0.8)).round() as u32).min(max_val);
    let b = (((lab.b + 0.4).max(0.0) * (scale / 0.8)).round() as u32).min(max_val);
    (l << (bits * 2)) | (a << bits) | b
}

fn bucketize(pixels: &[rgb::RGBA8]) -> BTreeMap<u32, Bucket> {
    let bits = if pixels.len() <= FINE_BUCKET_LIMIT { 6 } else { 5 };
    let mut labs = Vec::new();
    srgb_to_oklab_batch(pixels, &mut labs);

    let mut buckets: BTreeMap<u32, Bucket> = BTreeMap::new();
    for (p, &lab) in pixels.iter().zip(&labs).filter(|(p, _)| p.a > 0) {
        buckets
            .entry(bucket_key(lab, bits))
            .or_default()
            .add(lab, p.a as f64 / 255.0);
    }
    buckets
}

/// Build a weighted OKLab histogram of the visible pixels.
///
/// Each pixel contributes `alpha / 255`, so fully transparent pixels (whose
/// color is usually meaningless padding) never pull the palette toward
/// themselves. Returns (bucket centroid, accumulated weight) pairs in a
/// deterministic order.
pub fn build_histogram(pixels: &[rgb::RGBA8]) -> Vec<(OKLab, f32)> {
    bucketize(pixels)
        .into_values()
        .map(|b| (b.centroid(), b.weight as f32))
        .collect()
}

/// Samples for scoring and refining a palette, in a deterministic order.
///
/// Up to [`EXACT_SAMPLE_LIMIT`] distinct visible colors each become one
/// sample, so a fit scored here matches [`Palette::mean_error`] on the same
/// pixels. Busier images are summarized by their histogram buckets.
///
/// [`Palette::mean_error`]: crate::Palette::mean_error
pub fn error_samples(pixels: &[rgb::RGBA8]) -> Vec<Sample> {
    let mut distinct: BTreeMap<rgb::RGB8, (u64, u64)> = BTreeMap::new();
    for p in pixels.iter().filter(|p| p.a > 0) {
        let entry = distinct.entry(rgb::RGB8::new(p.r, p.g, p.b)).or_default();
        entry.0 += 1;
        entry.1 += p.a as u64;
        if distinct.len() > EXACT_SAMPLE_LIMIT {
            return bucketize(pixels)
                .into_values()
                .map(|b| Sample {
                    color: b.centroid(),
                    weight: b.weight,
                    count: b.count,
                })
                .collect();
        }
    }

    distinct
        .into_iter()
        .map(|(c, (count, alpha))| Sample {
            color: OKLab::from_rgb(c),
            weight: alpha as f64 / 255.0,
            count,
        })
        .collect()
}

/// Return the exact set of visible colors if there are at most `max_colors`.
///
/// Only RGB is compared; alpha is carried outside the palette. Scanning stops
/// as soon as `max_colors + 1` distinct colors have been seen.
pub fn detect_exact_palette(pixels: &[rgb::RGBA8], max_colors: usize) -> Option<Vec<rgb::RGB8>> {
    let mut seen = BTreeSet::new();
    for p in pixels.iter().filter(|p| p.a > 0) {
        seen.insert(rgb::RGB8::new(p.r, p.g, p.b));
        if seen.len() > max_colors {
            return None;
        }
    }
    Some(seen.into_iter().collect())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::oklab::srgb_to_oklab;

    fn opaque(r: u8, g: u8, b: u8) -> rgb::RGBA8 {
        rgb::RGBA8::new(r, g, b, 255)
    }

    #[test]
    fn single_color_one_bucket() {
        let pixels = vec![opaque(128, 128, 128); 100];
        let hist = build_histogram(&pixels);
        assert_eq!(hist.len(), 1);
        assert!((hist[0].1 - 100.0).abs() < 0.01);
    }

    #[test]
    fn alpha_scales_weight() {
        let pixels = vec![rgb::RGBA8::new(128, 128, 128, 51); 10];
        let hist = build_histogram(&pixels);
        assert_eq!(hist.len(), 1);
        assert!((hist[0].1 - 2.0).abs() < 0.01);
    }

    #[test]
    fn transparent_pixels_are_ignored() {
        let mut pixels = vec![opaque(10, 200, 30); 4];
        pixels.extend(vec![rgb::RGBA8::new(255, 0, 255, 0); 400]);
        let hist = build_histogram(&pixels);
        assert_eq!(hist.len(), 1);
        assert!((hist[0].1 - 4.0).abs() < 0.01);
    }

    #[test]
    fn distinct_colors_separate_buckets() {
        let hist = build_histogram(&[opaque(0, 0, 0), opaque(255, 255, 255)]);
        assert_eq!(hist.len(), 2);
    }

    #[test]
    fn centroid_precision() {
        let lab = srgb_to_oklab(100, 150, 200);
        let hist = build_histogram(&vec![opaque(100, 150, 200); 10_000]);
        let c = hist[0].0;
        assert!((c.l - lab.l).abs() < 0.01);
        assert!((c.a - lab.a).abs() < 0.01);
        assert!((c.b - lab.b).abs() < 0.01);
    }

    #[test]
    fn samples_count_visible_pixels_per_color() {
        let pixels = vec![
            opaque(1, 2, 3),
            rgb::RGBA8::new(1, 2, 3, 51),
            opaque(200, 10, 10),
            rgb::RGBA8::new(9, 9, 9, 0),
        ];
        let samples = error_samples(&pixels);
        assert_eq!(samples.len(), 2);
        assert_eq!(samples[0].count, 2);
        assert!((samples[0].weight - 1.2).abs() < 1e-9);
        assert_eq!(samples[0].color, srgb_to_oklab(1, 2, 3));
        assert_eq!(samples[1].count, 1);
    }

    #[test]
    fn busy_images_sample_buckets() {
        let pixels: Vec<rgb::RGBA8> = (0..EXACT_SAMPLE_LIMIT as u32 + 10)
            .map(|i| rgb::RGBA8::new(i as u8, (i >> 8) as u8, (i >> 16) as u8 + 7, 255))
            .collect();
        let samples = error_samples(&pixels);
        assert!(samples.len() < EXACT_SAMPLE_LIMIT);
        assert_eq!(samples.iter().map(|s| s.count).sum::<u64>(), pixels.len() as u64);
    }

    #[test]
    fn exact_palette_found_and_bounded() {
        let pixels = vec![
            opaque(1, 2, 3),
            opaque(4, 5, 6),
            opaque(1, 2, 3),
            rgb::RGBA8::new(9, 9, 9, 0),
        ];
        let exact = detect_exact_palette(&pixels, 2).unwrap();
        assert_eq!(exact, vec![rgb::RGB8::new(1, 2, 3), rgb::RGB8::new(4, 5, 6)]);
        assert!(detect_exact_palette(&pixels, 1).is_none());
    }
}
