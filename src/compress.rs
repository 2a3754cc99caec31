//! Single-pass compression and request dispatch.

use std::borrow::Cow;
use std::io::Cursor;
use std::str::FromStr;

use crate::codec::{self, ImageCodec, PngCodec};
use crate::dither::{self, DitherStrategy};
use crate::error::{OptimizeError, Result, ShrinkError, Stage};
use crate::events::{EventSink, LogSink, run_stage};
use crate::pixels::{ColorModel, PixelBuffer};
use crate::report::{self, AnalysisReport, BatchReport, present};
use crate::{MAX_COLORS, MIN_COLORS, ShrinkConfig, quantize_pixels, validate_colors};

/// Whether the caller wants output bytes or only size estimates.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, serde::Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Mode {
    #[default]
    Compress,
    Analyze,
}

impl Mode {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Compress => "compress",
            Self::Analyze => "analyze",
        }
    }
}

impl FromStr for Mode {
    type Err = ShrinkError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "compress" => Ok(Self::Compress),
            "analyze" | "analyse" | "analysis" => Ok(Self::Analyze),
            other => Err(ShrinkError::InvalidRequest(format!(
                "unknown mode '{other}' (compress, analyze)"
            ))),
        }
    }
}

/// Reduction technique.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, serde::Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Method {
    /// Palette quantization with dithering.
    #[default]
    Quantize,
    /// Pixel-exact re-encoding through the [`LosslessOptimizer`].
    Lossless,
}

impl Method {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Quantize => "quantize",
            Self::Lossless => "lossless",
        }
    }
}

impl FromStr for Method {
    type Err = ShrinkError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "quantize" | "lossy" | "pngquant" => Ok(Self::Quantize),
            "lossless" | "optimize" | "oxipng" => Ok(Self::Lossless),
            other => Err(ShrinkError::InvalidRequest(format!(
                "unknown method '{other}' (quantize, lossless)"
            ))),
        }
    }
}

/// Parameters of one request, as accepted at the boundary.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CompressionRequest {
    pub mode: Mode,
    pub colors: u32,
    pub dither: DitherStrategy,
    pub method: Method,
    /// Batch analysis candidates. Only valid with [`Mode::Analyze`].
    pub color_counts: Option<Vec<u32>>,
}

impl Default for CompressionRequest {
    fn default() -> Self {
        Self {
            mode: Mode::Compress,
            colors: MAX_COLORS,
            dither: DitherStrategy::default(),
            method: Method::Quantize,
            color_counts: None,
        }
    }
}

impl CompressionRequest {
    /// Build a request from raw form fields. Missing or blank fields take
    /// their defaults.
    pub fn from_fields(
        mode: Option<&str>,
        colors: Option<&str>,
        color_counts: Option<&str>,
        dither: Option<&str>,
        method: Option<&str>,
    ) -> Result<Self> {
        let request = Self {
            mode: report::parse_mode(mode)?,
            colors: report::parse_colors(colors)?,
            dither: match present(dither) {
                Some(s) => s.parse()?,
                None => DitherStrategy::default(),
            },
            method: match present(method) {
                Some(s) => s.parse()?,
                None => Method::default(),
            },
            color_counts: present(color_counts)
                .map(report::parse_color_counts)
                .transpose()?,
        };
        request.validate()?;
        Ok(request)
    }

    /// Check field combinations.
    pub fn validate(&self) -> Result<()> {
        validate_colors(self.colors)?;
        if self.color_counts.is_some() && self.mode != Mode::Analyze {
            return Err(ShrinkError::InvalidRequest(
                "color_counts requires analyze mode".into(),
            ));
        }
        if self.method == Method::Lossless && self.mode == Mode::Analyze {
            return Err(ShrinkError::InvalidRequest(
                "analysis only estimates quantization".into(),
            ));
        }
        Ok(())
    }
}

/// Size metrics for one run of the pipeline.
#[derive(Debug, Clone, PartialEq)]
pub struct CompressionResult {
    pub original_size: usize,
    pub compressed_size: usize,
    /// `(original - compressed) / original * 100`. Negative when the output grew.
    pub ratio: f64,
    /// Palette size; `None` for the lossless method.
    pub colors: Option<u32>,
    pub mode: Mode,
    pub method: Method,
    pub dither: DitherStrategy,
    /// Mean squared OKLab error against the buffer that was quantized.
    pub mean_error: f32,
    /// Encoded bytes, kept only in [`Mode::Compress`].
    pub output: Option<Vec<u8>>,
}

pub fn compression_ratio(original: usize, compressed: usize) -> f64 {
    if original == 0 {
        return 0.0;
    }
    (original as f64 - compressed as f64) / original as f64 * 100.0
}

/// What [`Compressor::run`] hands back to the boundary.
#[derive(Debug, Clone)]
pub enum Outcome {
    Compressed {
        name: String,
        bytes: Vec<u8>,
        result: CompressionResult,
    },
    Analysis(AnalysisReport),
    Batch(BatchReport),
}

/// Pixel-exact PNG size reduction.
pub trait LosslessOptimizer: Send + Sync {
    /// Return an equivalent PNG, or the input itself when nothing smaller
    /// was found.
    fn optimize(&self, png: &[u8]) -> Result<Vec<u8>, OptimizeError>;
}

/// Decode and re-encode at the strongest deflate setting, keeping whichever
/// of input and output is smaller.
///
/// 16-bit sources are returned unchanged since the decoder strips them to 8 bits.
#[derive(Debug, Clone, Copy)]
pub struct ReencodeOptimizer {
    codec: PngCodec,
}

impl Default for ReencodeOptimizer {
    fn default() -> Self {
        Self {
            codec: PngCodec::new().compression(png::Compression::Best),
        }
    }
}

impl LosslessOptimizer for ReencodeOptimizer {
    fn optimize(&self, png: &[u8]) -> Result<Vec<u8>, OptimizeError> {
        let reader = png::Decoder::new(Cursor::new(png))
            .read_info()
            .map_err(|e| OptimizeError(e.to_string()))?;
        if reader.info().bit_depth == png::BitDepth::Sixteen {
            return Ok(png.to_vec());
        }

        let buffer = self
            .codec
            .decode(png)
            .map_err(|e| OptimizeError(e.to_string()))?;
        let out = self
            .codec
            .encode_pixels(&buffer)
            .map_err(|e| OptimizeError(e.to_string()))?;
        Ok(if out.len() < png.len() {
            out
        } else {
            png.to_vec()
        })
    }
}

/// The compression pipeline: validate, decode, quantize, dither, encode, measure.
///
/// Holds no per-request state; one instance can serve concurrent requests.
pub struct Compressor<C = PngCodec> {
    codec: C,
    config: ShrinkConfig,
    optimizer: Box<dyn LosslessOptimizer>,
    sink: Box<dyn EventSink>,
}

impl Default for Compressor<PngCodec> {
    fn default() -> Self {
        Self::with_codec(PngCodec::default())
    }
}

impl Compressor<PngCodec> {
    pub fn new() -> Self {
        Self::default()
    }
}

impl<C: ImageCodec> Compressor<C> {
    pub fn with_codec(codec: C) -> Self {
        Self {
            codec,
            config: ShrinkConfig::default(),
            optimizer: Box::new(ReencodeOptimizer::default()),
            sink: Box::new(LogSink),
        }
    }

    pub fn config(mut self, config: ShrinkConfig) -> Self {
        self.config = config;
        self
    }

    pub fn optimizer(mut self, optimizer: impl LosslessOptimizer + 'static) -> Self {
        self.optimizer = Box::new(optimizer);
        self
    }

    pub fn event_sink(mut self, sink: impl EventSink + 'static) -> Self {
        self.sink = Box::new(sink);
        self
    }

    pub fn codec(&self) -> &C {
        &self.codec
    }

    pub fn settings(&self) -> &ShrinkConfig {
        &self.config
    }

    pub(crate) fn sink(&self) -> &dyn EventSink {
        self.sink.as_ref()
    }

    fn check_input(&self, bytes: &[u8]) -> Result<()> {
        run_stage(self.sink(), Stage::Validate, None, || {
            let limit = self.config.max_input_bytes;
            if bytes.len() > limit {
                return Err(ShrinkError::InputTooLarge {
                    size: bytes.len(),
                    limit,
                });
            }
            codec::check_signature(bytes)
        })
    }

    /// Validate, decode once and normalize.
    pub(crate) fn load(&self, bytes: &[u8]) -> Result<PixelBuffer> {
        self.check_input(bytes)?;
        let decoded = run_stage(self.sink(), Stage::Decode, None, || {
            self.codec.decode(bytes)
        })?;
        if decoded.is_normalized() {
            return Ok(decoded);
        }
        run_stage(self.sink(), Stage::Normalize, None, || Ok(decoded.normalize()))
    }

    /// Quantize `bytes` to `colors` colors (clamped to 2..=256) and re-encode.
    pub fn compress(
        &self,
        bytes: &[u8],
        colors: u32,
        dither: DitherStrategy,
    ) -> Result<CompressionResult> {
        let colors = colors.clamp(MIN_COLORS, MAX_COLORS);
        let buffer = self.load(bytes)?;
        let result = self.compress_buffer(&buffer, bytes.len(), colors, dither, true)?;
        log::info!(
            "compressed {}x{} to {} colors ({}): {} -> {} bytes ({:.2}%)",
            buffer.width(),
            buffer.height(),
            colors,
            dither.as_str(),
            result.original_size,
            result.compressed_size,
            result.ratio
        );
        Ok(result)
    }

    /// One quantize/dither/encode/measure pass over an already decoded buffer.
    ///
    /// `original_size` is the byte length the ratio is measured against.
    /// Output bytes are kept only when `keep_output` is set.
    pub fn compress_buffer(
        &self,
        buffer: &PixelBuffer,
        original_size: usize,
        colors: u32,
        dither: DitherStrategy,
        keep_output: bool,
    ) -> Result<CompressionResult> {
        let colors = validate_colors(colors)?;
        let buffer = if buffer.is_normalized() {
            Cow::Borrowed(buffer)
        } else {
            Cow::Owned(buffer.normalize())
        };
        let sink = self.sink();
        let tag = Some(colors);
        let pixels = buffer.rgba_pixels();

        let palette = run_stage(sink, Stage::Quantize, tag, || {
            self.config.check()?;
            Ok(quantize_pixels(&pixels, colors as usize, &self.config))
        })?;
        let image = run_stage(sink, Stage::Dither, tag, || {
            dither::dither_pixels(
                &pixels,
                (buffer.width(), buffer.height()),
                buffer.model() == ColorModel::Rgba,
                &palette,
                dither,
                self.config.dither_strength,
            )
        })?;
        let encoded = run_stage(sink, Stage::Encode, tag, || self.codec.encode(&image))?;
        let mean_error = run_stage(sink, Stage::Measure, tag, || {
            Ok(image.palette().mean_error(&pixels, image.indices()))
        })?;

        Ok(CompressionResult {
            original_size,
            compressed_size: encoded.len(),
            ratio: compression_ratio(original_size, encoded.len()),
            colors: Some(colors),
            mode: if keep_output {
                Mode::Compress
            } else {
                Mode::Analyze
            },
            method: Method::Quantize,
            dither,
            mean_error,
            output: keep_output.then_some(encoded),
        })
    }

    /// Run the injected [`LosslessOptimizer`] over `bytes`.
    pub fn compress_lossless(&self, bytes: &[u8]) -> Result<CompressionResult> {
        self.check_input(bytes)?;
        let output = run_stage(self.sink(), Stage::Optimize, None, || {
            Ok(self.optimizer.optimize(bytes)?)
        })?;
        log::info!(
            "optimized losslessly: {} -> {} bytes",
            bytes.len(),
            output.len()
        );
        Ok(CompressionResult {
            original_size: bytes.len(),
            compressed_size: output.len(),
            ratio: compression_ratio(bytes.len(), output.len()),
            colors: None,
            mode: Mode::Compress,
            method: Method::Lossless,
            dither: DitherStrategy::None,
            mean_error: 0.0,
            output: Some(output),
        })
    }

    /// Dispatch a boundary request on the input file `name` with contents `bytes`.
    pub fn run(&self, name: &str, bytes: &[u8], request: &CompressionRequest) -> Result<Outcome> {
        request.validate()?;
        match (request.mode, request.method) {
            (Mode::Compress, method) => {
                let mut result = match method {
                    Method::Quantize => self.compress(bytes, request.colors, request.dither)?,
                    Method::Lossless => self.compress_lossless(bytes)?,
                };
                let bytes = result.output.take().ok_or_else(|| {
                    ShrinkError::failed(Stage::Encode, "no output produced")
                })?;
                Ok(Outcome::Compressed {
                    name: report::output_name(name, method),
                    bytes,
                    result,
                })
            }
            (Mode::Analyze, _) => match &request.color_counts {
                Some(counts) => Ok(Outcome::Batch(BatchReport::from(
                    &self.analyze_batch(bytes, counts)?,
                ))),
                None => Ok(Outcome::Analysis(AnalysisReport::from(
                    &self.analyze(bytes, request.colors)?,
                ))),
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ratio_sign() {
        assert_eq!(compression_ratio(200, 50), 75.0);
        assert!(compression_ratio(100, 120) < 0.0);
        assert_eq!(compression_ratio(0, 10), 0.0);
    }

    #[test]
    fn parses_mode_and_method() {
        assert_eq!("Analyze".parse::<Mode>().unwrap(), Mode::Analyze);
        assert_eq!("oxipng".parse::<Method>().unwrap(), Method::Lossless);
        assert!(matches!("shrink".parse::<Mode>(), Err(ShrinkError::InvalidRequest(_))));
    }

    #[test]
    fn request_defaults() {
        let req = CompressionRequest::from_fields(None, None, None, None, None).unwrap();
        assert_eq!(req, CompressionRequest::default());
    }

    #[test]
    fn request_from_fields() {
        let req = CompressionRequest::from_fields(
            Some("analyze"),
            Some("1000"),
            Some("8, 16,64"),
            Some("ordered"),
            Some(""),
        )
        .unwrap();
        assert_eq!(req.mode, Mode::Analyze);
        assert_eq!(req.colors, 256);
        assert_eq!(req.color_counts, Some(vec![8, 16, 64]));
        assert_eq!(req.dither, DitherStrategy::Ordered);
        assert_eq!(req.method, Method::Quantize);
    }

    #[test]
    fn request_rejects_bad_combinations() {
        let counts_without_analyze =
            CompressionRequest::from_fields(None, None, Some("8,16"), None, None);
        assert!(matches!(counts_without_analyze, Err(ShrinkError::InvalidRequest(_))));

        let lossless_analysis =
            CompressionRequest::from_fields(Some("analyze"), None, None, None, Some("lossless"));
        assert!(matches!(lossless_analysis, Err(ShrinkError::InvalidRequest(_))));

        let bad_count = CompressionRequest::from_fields(Some("analyze"), None, Some("8,1"), None, None);
        assert!(matches!(bad_count, Err(ShrinkError::InvalidColorCount(_))));
    }

    #[test]
    fn buffer_pass_matches_standalone_quantize_and_dither() {
        let pixels: Vec<rgb::RGBA8> = (0..24u32 * 20)
            .map(|i| {
                let h = i.wrapping_mul(2_654_435_761);
                let a = if i % 7 == 0 { 0 } else { 255 };
                rgb::RGBA8::new(h as u8, (h >> 8) as u8, (h >> 16) as u8, a)
            })
            .collect();
        let buffer = PixelBuffer::from_rgba(24, 20, &pixels).unwrap();
        let compressor = Compressor::new();
        let result = compressor
            .compress_buffer(&buffer, 10_000, 12, DitherStrategy::Ordered, true)
            .unwrap();

        let config = ShrinkConfig::default();
        let palette = crate::quantize(&buffer, 12, &config).unwrap();
        let image = dither::dither(&buffer, &palette, DitherStrategy::Ordered, 1.0).unwrap();
        assert_eq!(result.mean_error, palette.mean_error(&pixels, image.indices()));
        assert_eq!(result.output.unwrap(), compressor.codec().encode(&image).unwrap());
    }

    #[test]
    fn buffer_pass_rejects_bad_quality() {
        let buffer = PixelBuffer::from_rgb(4, 4, &[rgb::RGB8::new(1, 2, 3); 16]).unwrap();
        let compressor = Compressor::new().config(ShrinkConfig::new().quality(150));
        let err = compressor
            .compress_buffer(&buffer, 100, 8, DitherStrategy::None, false)
            .unwrap_err();
        assert!(matches!(err, ShrinkError::InvalidQuality(150)));
    }

    #[test]
    fn oversized_input_rejected_before_decode() {
        let compressor = Compressor::new().config(ShrinkConfig::new().max_input_bytes(16));
        let mut bytes = codec::PNG_SIGNATURE.to_vec();
        bytes.resize(17, 0);
        let err = compressor.compress(&bytes, 16, DitherStrategy::None).unwrap_err();
        assert!(matches!(err, ShrinkError::InputTooLarge { size: 17, limit: 16 }));
        assert!(err.is_client_error());
    }
}
