//! Batch analysis: many color-count candidates against one decoded buffer.

use rayon::prelude::*;

use crate::codec::ImageCodec;
use crate::compress::{CompressionResult, Compressor};
use crate::dither::DitherStrategy;
use crate::error::{Result, ShrinkError, Stage};
use crate::events::run_stage;
use crate::resize::downscale;
use crate::validate_colors;

/// Per-candidate results, in the order the candidates were given.
#[derive(Debug, Clone, PartialEq)]
pub struct BatchResult {
    /// Byte length of the input as uploaded, not of the analyzed buffer.
    pub original_size: usize,
    pub results: Vec<CompressionResult>,
}

impl BatchResult {
    /// Candidate with the highest ratio. Ties go to the earlier candidate.
    pub fn best(&self) -> Option<&CompressionResult> {
        self.results
            .iter()
            .reduce(|best, r| if r.ratio > best.ratio { r } else { best })
    }
}

/// Validate every candidate and drop repeats, keeping first occurrences.
fn candidates(color_counts: &[u32]) -> Result<Vec<u32>> {
    if color_counts.is_empty() {
        return Err(ShrinkError::InvalidRequest(
            "at least one color count is required".into(),
        ));
    }
    let mut unique = Vec::with_capacity(color_counts.len());
    for &colors in color_counts {
        let colors = validate_colors(colors)?;
        if !unique.contains(&colors) {
            unique.push(colors);
        }
    }
    Ok(unique)
}

impl<C: ImageCodec> Compressor<C> {
    /// Estimate the compressed size for each entry of `color_counts`.
    ///
    /// The input is decoded once and, when its longest side exceeds
    /// `analysis_max_dimension`, downscaled once; every candidate is measured
    /// on that buffer with ordered dithering, concurrently. Ratios are
    /// relative to the true input length, so they approximate the full-size
    /// result. Any invalid candidate fails the whole batch before decoding.
    pub fn analyze_batch(&self, bytes: &[u8], color_counts: &[u32]) -> Result<BatchResult> {
        let counts = run_stage(self.sink(), Stage::Validate, None, || candidates(color_counts))?;
        let buffer = self.load(bytes)?;
        let cap = self.settings().analysis_max_dimension;
        let sample = run_stage(self.sink(), Stage::Downscale, None, || downscale(&buffer, cap))?;

        let results = counts
            .par_iter()
            .map(|&colors| {
                self.compress_buffer(&sample, bytes.len(), colors, DitherStrategy::Ordered, false)
            })
            .collect::<Result<Vec<_>>>()?;

        log::info!(
            "analyzed {} candidates on {}x{} (source {}x{})",
            results.len(),
            sample.width(),
            sample.height(),
            buffer.width(),
            buffer.height()
        );
        Ok(BatchResult {
            original_size: bytes.len(),
            results,
        })
    }

    /// Size estimate for a single color count.
    pub fn analyze(&self, bytes: &[u8], colors: u32) -> Result<CompressionResult> {
        self.analyze_batch(bytes, &[colors])?
            .results
            .into_iter()
            .next()
            .ok_or_else(|| ShrinkError::failed(Stage::Measure, "analysis produced no result"))
    }
}
