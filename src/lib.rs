#![forbid(unsafe_code)]

//! Lossy PNG size reduction by palette quantization.
//!
//! A decoded [`PixelBuffer`] is quantized to a K-color [`Palette`], mapped to
//! an [`IndexedImage`] with a selectable [`DitherStrategy`], and re-encoded.
//! [`Compressor`] runs that pipeline once per request, or many times against
//! one decoded (and, for analysis, downscaled) buffer to compare candidate
//! color counts.

pub mod analysis;
pub mod codec;
pub mod compress;
pub mod dither;
pub mod error;
pub mod events;
pub mod histogram;
pub mod indexed;
pub mod median_cut;
pub mod oklab;
pub mod palette;
pub mod pixels;
pub mod report;
pub mod resize;

pub use analysis::BatchResult;
pub use codec::{ImageCodec, PNG_SIGNATURE, PngCodec};
pub use compress::{
    CompressionRequest, CompressionResult, Compressor, LosslessOptimizer, Method, Mode, Outcome,
    ReencodeOptimizer,
};
pub use dither::DitherStrategy;
pub use error::{OptimizeError, Result, ShrinkError, Stage};
pub use events::{EventSink, LogSink, PipelineEvent};
pub use indexed::IndexedImage;
pub use palette::Palette;
pub use pixels::{ColorModel, PixelBuffer};

/// Smallest and largest palette sizes.
pub const MIN_COLORS: u32 = 2;
pub const MAX_COLORS: u32 = 256;

/// Tuning shared by the single-pass and analysis paths.
#[derive(Debug, Clone)]
pub struct ShrinkConfig {
    /// Analysis downscales so that neither side exceeds this (pixels).
    pub analysis_max_dimension: u32,
    /// Quality parameter (0..=100). At 50 and above, every median-cut step
    /// is followed by k-means refinement.
    pub quality: u32,
    /// Fraction of quantization error diffused / ordered-threshold amplitude (0.0..=1.0).
    pub dither_strength: f32,
    /// Inputs larger than this are rejected before decoding.
    pub max_input_bytes: usize,
}

impl Default for ShrinkConfig {
    fn default() -> Self {
        Self {
            analysis_max_dimension: 800,
            quality: 85,
            dither_strength: 1.0,
            max_input_bytes: 16 * 1024 * 1024,
        }
    }
}

impl ShrinkConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn analysis_max_dimension(mut self, cap: u32) -> Self {
        self.analysis_max_dimension = cap.max(1);
        self
    }

    pub fn quality(mut self, q: u32) -> Self {
        self.quality = q;
        self
    }

    pub fn dither_strength(mut self, strength: f32) -> Self {
        self.dither_strength = strength.clamp(0.0, 1.0);
        self
    }

    pub fn max_input_bytes(mut self, limit: usize) -> Self {
        self.max_input_bytes = limit;
        self
    }

    pub(crate) fn check(&self) -> Result<()> {
        if self.quality > 100 {
            return Err(ShrinkError::InvalidQuality(self.quality));
        }
        Ok(())
    }

    fn refine_iterations(&self) -> usize {
        if self.quality >= 50 { 3 } else { 0 }
    }
}

/// Reject color counts outside [`MIN_COLORS`]..=[`MAX_COLORS`].
pub fn validate_colors(colors: u32) -> Result<u32> {
    if (MIN_COLORS..=MAX_COLORS).contains(&colors) {
        Ok(colors)
    } else {
        Err(ShrinkError::InvalidColorCount(colors.to_string()))
    }
}

/// Build a palette of exactly `colors` entries for `buffer`.
///
/// If the visible pixels use at most `colors` distinct colors the palette
/// reproduces them exactly; otherwise colors are chosen by weighted median
/// cut in OKLab. Fully transparent pixels never influence the palette. For a
/// fixed buffer, asking for more colors never raises
/// [`Palette::mean_error`] under plain nearest-color mapping.
pub fn quantize(buffer: &PixelBuffer, colors: u32, config: &ShrinkConfig) -> Result<Palette> {
    let colors = validate_colors(colors)?;
    config.check()?;
    Ok(quantize_pixels(&buffer.rgba_pixels(), colors as usize, config))
}

/// [`quantize`] over pixels already expanded to RGBA, with `colors` and
/// `config` already validated.
pub(crate) fn quantize_pixels(
    pixels: &[rgb::RGBA8],
    colors: usize,
    config: &ShrinkConfig,
) -> Palette {
    if let Some(exact) = histogram::detect_exact_palette(pixels, colors) {
        return Palette::exact(exact, colors);
    }

    let hist = histogram::build_histogram(pixels);
    let samples = histogram::error_samples(pixels);
    let chosen = median_cut::median_cut(hist, &samples, colors, config.refine_iterations());
    Palette::from_colors(chosen, colors)
}

/// Quantize and dither in one step.
pub fn quantize_image(
    buffer: &PixelBuffer,
    colors: u32,
    strategy: DitherStrategy,
    config: &ShrinkConfig,
) -> Result<IndexedImage> {
    let palette = quantize(buffer, colors, config)?;
    dither::dither(buffer, &palette, strategy, config.dither_strength)
}
