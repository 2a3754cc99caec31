use thiserror::Error;

/// Pipeline stage, used to attribute events and unexpected failures.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    Validate,
    Decode,
    Normalize,
    Downscale,
    Quantize,
    Dither,
    Encode,
    Optimize,
    Measure,
}

impl Stage {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Validate => "validate",
            Self::Decode => "decode",
            Self::Normalize => "normalize",
            Self::Downscale => "downscale",
            Self::Quantize => "quantize",
            Self::Dither => "dither",
            Self::Encode => "encode",
            Self::Optimize => "optimize",
            Self::Measure => "measure",
        }
    }
}

impl core::fmt::Display for Stage {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Failure reported by a [`LosslessOptimizer`](crate::compress::LosslessOptimizer).
#[derive(Debug, Error)]
#[error("lossless optimizer failed: {0}")]
pub struct OptimizeError(pub String);

#[derive(Debug, Error)]
pub enum ShrinkError {
    #[error("input is not a PNG file (signature mismatch)")]
    NotAPng,

    #[error("color count must be an integer between 2 and 256, got {0}")]
    InvalidColorCount(String),

    #[error("quality must be between 0 and 100, got {0}")]
    InvalidQuality(u32),

    #[error("invalid request: {0}")]
    InvalidRequest(String),

    #[error("input is {size} bytes, limit is {limit} bytes")]
    InputTooLarge { size: usize, limit: usize },

    #[error("unsupported color model: {0}")]
    UnsupportedColorModel(String),

    #[error("image dimensions cannot be zero")]
    ZeroDimension,

    #[error("sample buffer length {len} does not match expected length {expected}")]
    DimensionMismatch { len: usize, expected: usize },

    #[error("decode failed: {0}")]
    Decode(String),

    #[error("encode failed: {0}")]
    Encode(String),

    #[error(transparent)]
    Optimize(#[from] OptimizeError),

    #[error("compression failed during {stage}: {cause}")]
    CompressionFailed { stage: Stage, cause: String },
}

impl ShrinkError {
    /// Whether the fault lies with the caller's input (4xx-equivalent)
    /// rather than with processing (5xx-equivalent).
    pub fn is_client_error(&self) -> bool {
        matches!(
            self,
            Self::NotAPng
                | Self::InvalidColorCount(_)
                | Self::InvalidQuality(_)
                | Self::InvalidRequest(_)
                | Self::InputTooLarge { .. }
                | Self::UnsupportedColorModel(_)
        )
    }

    pub(crate) fn failed(stage: Stage, cause: impl core::fmt::Display) -> Self {
        Self::CompressionFailed {
            stage,
            cause: cause.to_string(),
        }
    }
}

pub type Result<T, E = ShrinkError> = core::result::Result<T, E>;
