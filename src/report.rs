//! Boundary helpers: request field parsing and serializable reports.

use serde::Serialize;

use crate::analysis::BatchResult;
use crate::compress::{CompressionResult, Method, Mode};
use crate::dither::DitherStrategy;
use crate::error::{Result, ShrinkError};
use crate::{MAX_COLORS, MIN_COLORS, validate_colors};

/// Trimmed field, or `None` when missing or blank.
pub(crate) fn present(field: Option<&str>) -> Option<&str> {
    field.map(str::trim).filter(|s| !s.is_empty())
}

/// `compress` (default) or `analyze`.
pub fn parse_mode(field: Option<&str>) -> Result<Mode> {
    present(field).map_or(Ok(Mode::Compress), str::parse)
}

/// Requested palette size. Defaults to 256 and is clamped to 2..=256; only
/// non-integers are rejected.
pub fn parse_colors(field: Option<&str>) -> Result<u32> {
    let Some(raw) = present(field) else {
        return Ok(MAX_COLORS);
    };
    let value: i64 = raw
        .parse()
        .map_err(|_| ShrinkError::InvalidColorCount(raw.to_string()))?;
    Ok(value.clamp(MIN_COLORS as i64, MAX_COLORS as i64) as u32)
}

/// Comma-separated batch candidates. Each one must be an integer in
/// 2..=256; nothing is clamped.
pub fn parse_color_counts(field: &str) -> Result<Vec<u32>> {
    let counts = field
        .split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(|s| {
            s.parse::<u32>()
                .map_err(|_| ShrinkError::InvalidColorCount(s.to_string()))
                .and_then(validate_colors)
        })
        .collect::<Result<Vec<_>>>()?;
    if counts.is_empty() {
        return Err(ShrinkError::InvalidRequest("color_counts is empty".into()));
    }
    Ok(counts)
}

/// Byte count with a 1024-based unit: `512 B`, `1.5 KB`, `2.0 MB`.
pub fn human_size(bytes: usize) -> String {
    const KB: f64 = 1024.0;
    let b = bytes as f64;
    if b < KB {
        format!("{bytes} B")
    } else if b < KB * KB {
        format!("{:.1} KB", b / KB)
    } else {
        format!("{:.1} MB", b / (KB * KB))
    }
}

/// Suggested download name for a compressed upload.
///
/// Directory components are dropped and characters outside
/// `[A-Za-z0-9._-]` become `_`.
pub fn output_name(input: &str, method: Method) -> String {
    let base = input.rsplit(['/', '\\']).next().unwrap_or(input);
    let stem = match base.rfind('.') {
        Some(dot) if dot > 0 => &base[..dot],
        _ => base,
    };
    let cleaned: String = stem
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.') {
                c
            } else {
                '_'
            }
        })
        .collect();
    let cleaned = cleaned.trim_matches(['.', '_']);
    let stem = if cleaned.is_empty() { "image" } else { cleaned };
    let suffix = match method {
        Method::Quantize => "compressed",
        Method::Lossless => "optimized",
    };
    format!("{stem}_{suffix}.png")
}

fn round2(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}

/// One candidate's sizes, as reported to callers.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AnalysisReport {
    pub colors: Option<u32>,
    pub method: Method,
    pub dither: DitherStrategy,
    pub original_size: usize,
    pub original_size_human: String,
    pub compressed_size: usize,
    pub compressed_size_human: String,
    /// Percent saved, rounded to 2 decimals.
    pub ratio: f64,
    pub mean_error: f32,
}

impl From<&CompressionResult> for AnalysisReport {
    fn from(r: &CompressionResult) -> Self {
        Self {
            colors: r.colors,
            method: r.method,
            dither: r.dither,
            original_size: r.original_size,
            original_size_human: human_size(r.original_size),
            compressed_size: r.compressed_size,
            compressed_size_human: human_size(r.compressed_size),
            ratio: round2(r.ratio),
            mean_error: r.mean_error,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BatchReport {
    pub original_size: usize,
    pub original_size_human: String,
    pub results: Vec<AnalysisReport>,
}

impl From<&BatchResult> for BatchReport {
    fn from(batch: &BatchResult) -> Self {
        Self {
            original_size: batch.original_size,
            original_size_human: human_size(batch.original_size),
            results: batch.results.iter().map(AnalysisReport::from).collect(),
        }
    }
}
