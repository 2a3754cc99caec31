use crate::error::{Result, ShrinkError};
use crate::palette::Palette;

/// A palette-mapped image ready for re-encoding.
///
/// When the source had an alpha channel, alpha is carried per pixel next to
/// the indices instead of being folded into the palette.
#[derive(Debug, Clone, PartialEq)]
pub struct IndexedImage {
    width: usize,
    height: usize,
    palette: Palette,
    indices: Vec<u8>,
    alpha: Option<Vec<u8>>,
}

impl IndexedImage {
    pub fn new(
        width: usize,
        height: usize,
        palette: Palette,
        indices: Vec<u8>,
        alpha: Option<Vec<u8>>,
    ) -> Result<Self> {
        if width == 0 || height == 0 {
            return Err(ShrinkError::ZeroDimension);
        }
        let expected = width * height;
        if indices.len() != expected {
            return Err(ShrinkError::DimensionMismatch {
                len: indices.len(),
                expected,
            });
        }
        if let Some(alpha) = &alpha {
            if alpha.len() != expected {
                return Err(ShrinkError::DimensionMismatch {
                    len: alpha.len(),
                    expected,
                });
            }
        }
        if indices.iter().any(|&i| i as usize >= palette.len()) {
            return Err(ShrinkError::failed(
                crate::error::Stage::Dither,
                "palette index out of range",
            ));
        }
        Ok(Self {
            width,
            height,
            palette,
            indices,
            alpha,
        })
    }

    pub fn width(&self) -> usize {
        self.width
    }

    pub fn height(&self) -> usize {
        self.height
    }

    pub fn palette(&self) -> &Palette {
        &self.palette
    }

    pub fn indices(&self) -> &[u8] {
        &self.indices
    }

    pub fn alpha(&self) -> Option<&[u8]> {
        self.alpha.as_deref()
    }

    /// Number of leading palette entries actually referenced (highest index + 1).
    pub fn used_len(&self) -> usize {
        self.indices.iter().copied().max().map_or(1, |m| m as usize + 1)
    }

    /// Expand back to RGBA pixels.
    pub fn to_rgba(&self) -> Vec<rgb::RGBA8> {
        let entries = self.palette.entries();
        self.indices
            .iter()
            .enumerate()
            .map(|(i, &idx)| {
                let c = entries[idx as usize];
                let a = self.alpha.as_ref().map_or(255, |alpha| alpha[i]);
                rgb::RGBA8::new(c.r, c.g, c.b, a)
            })
            .collect()
    }
}
