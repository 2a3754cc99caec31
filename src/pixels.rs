//! Decoded pixel data, independent of the container it came from.

use rgb::FromSlice;

use crate::error::{Result, ShrinkError};

/// Color model of a decoded buffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ColorModel {
    Rgb,
    Rgba,
    Grayscale,
    GrayscaleAlpha,
    /// One palette index per pixel; the palette lives on the buffer.
    Indexed,
}

impl ColorModel {
    /// Samples per pixel.
    pub const fn channels(self) -> usize {
        match self {
            Self::Rgb => 3,
            Self::Rgba => 4,
            Self::Grayscale | Self::Indexed => 1,
            Self::GrayscaleAlpha => 2,
        }
    }

    pub fn from_png(color_type: png::ColorType) -> Self {
        match color_type {
            png::ColorType::Rgb => Self::Rgb,
            png::ColorType::Rgba => Self::Rgba,
            png::ColorType::Grayscale => Self::Grayscale,
            png::ColorType::GrayscaleAlpha => Self::GrayscaleAlpha,
            png::ColorType::Indexed => Self::Indexed,
        }
    }
}

/// An immutable, row-major, 8-bit pixel buffer.
///
/// Nothing in the crate mutates a buffer after construction: normalizing,
/// resizing and quantizing all produce new values, so one decoded buffer can
/// back any number of quantization runs, including concurrent ones.
#[derive(Debug, Clone, PartialEq)]
pub struct PixelBuffer {
    width: usize,
    height: usize,
    model: ColorModel,
    samples: Vec<u8>,
    palette: Option<Vec<rgb::RGBA8>>,
}

impl PixelBuffer {
    /// Wrap direct-color samples. Use [`PixelBuffer::indexed`] for palette data.
    pub fn new(width: usize, height: usize, model: ColorModel, samples: Vec<u8>) -> Result<Self> {
        if model == ColorModel::Indexed {
            return Err(ShrinkError::UnsupportedColorModel(
                "indexed samples need a palette".into(),
            ));
        }
        check_len(width, height, model, samples.len())?;
        Ok(Self {
            width,
            height,
            model,
            samples,
            palette: None,
        })
    }

    /// Wrap palette indices together with their RGBA palette (1..=256 entries).
    pub fn indexed(
        width: usize,
        height: usize,
        indices: Vec<u8>,
        palette: Vec<rgb::RGBA8>,
    ) -> Result<Self> {
        check_len(width, height, ColorModel::Indexed, indices.len())?;
        if palette.is_empty() || palette.len() > 256 {
            return Err(ShrinkError::UnsupportedColorModel(format!(
                "palette with {} entries",
                palette.len()
            )));
        }
        if let Some(&bad) = indices.iter().find(|&&i| i as usize >= palette.len()) {
            return Err(ShrinkError::Decode(format!(
                "index {bad} outside palette of {} entries",
                palette.len()
            )));
        }
        Ok(Self {
            width,
            height,
            model: ColorModel::Indexed,
            samples: indices,
            palette: Some(palette),
        })
    }

    pub fn from_rgb(width: usize, height: usize, pixels: &[rgb::RGB8]) -> Result<Self> {
        let samples = pixels.iter().flat_map(|p| [p.r, p.g, p.b]).collect();
        Self::new(width, height, ColorModel::Rgb, samples)
    }

    pub fn from_rgba(width: usize, height: usize, pixels: &[rgb::RGBA8]) -> Result<Self> {
        let samples = pixels.iter().flat_map(|p| [p.r, p.g, p.b, p.a]).collect();
        Self::new(width, height, ColorModel::Rgba, samples)
    }

    pub fn width(&self) -> usize {
        self.width
    }

    pub fn height(&self) -> usize {
        self.height
    }

    pub fn model(&self) -> ColorModel {
        self.model
    }

    pub fn channels(&self) -> usize {
        self.model.channels()
    }

    pub fn pixel_count(&self) -> usize {
        self.width * self.height
    }

    pub fn samples(&self) -> &[u8] {
        &self.samples
    }

    /// RGBA palette of an `Indexed` buffer.
    pub fn palette(&self) -> Option<&[rgb::RGBA8]> {
        self.palette.as_deref()
    }

    /// Whether any pixel can be less than fully opaque.
    pub fn has_alpha(&self) -> bool {
        match self.model {
            ColorModel::Rgba | ColorModel::GrayscaleAlpha => true,
            ColorModel::Indexed => self
                .palette
                .as_ref()
                .is_some_and(|p| p.iter().any(|c| c.a < 255)),
            ColorModel::Rgb | ColorModel::Grayscale => false,
        }
    }

    /// Convert to `Rgb`, or to `Rgba` when the source carries transparency.
    ///
    /// Alpha is never dropped: grayscale+alpha and indexed images with a
    /// transparent palette entry become `Rgba`.
    pub fn normalize(&self) -> PixelBuffer {
        let samples = match self.model {
            ColorModel::Rgb | ColorModel::Rgba => self.samples.clone(),
            ColorModel::Grayscale => self.samples.iter().flat_map(|&v| [v, v, v]).collect(),
            ColorModel::GrayscaleAlpha => self
                .samples
                .chunks_exact(2)
                .flat_map(|ga| [ga[0], ga[0], ga[0], ga[1]])
                .collect(),
            ColorModel::Indexed => {
                let palette = self.palette.as_deref().unwrap_or(&[]);
                if self.has_alpha() {
                    self.samples
                        .iter()
                        .flat_map(|&i| {
                            let c = palette[i as usize];
                            [c.r, c.g, c.b, c.a]
                        })
                        .collect()
                } else {
                    self.samples
                        .iter()
                        .flat_map(|&i| {
                            let c = palette[i as usize];
                            [c.r, c.g, c.b]
                        })
                        .collect()
                }
            }
        };
        let model = if self.has_alpha() {
            ColorModel::Rgba
        } else {
            ColorModel::Rgb
        };
        PixelBuffer {
            width: self.width,
            height: self.height,
            model,
            samples,
            palette: None,
        }
    }

    /// Whether the buffer is already `Rgb` or `Rgba`.
    pub fn is_normalized(&self) -> bool {
        matches!(self.model, ColorModel::Rgb | ColorModel::Rgba)
    }

    /// Pixels as RGBA, alpha 255 for models without alpha.
    ///
    /// Non-normalized buffers are normalized first.
    pub fn rgba_pixels(&self) -> Vec<rgb::RGBA8> {
        match self.model {
            ColorModel::Rgba => self.samples.as_rgba().to_vec(),
            ColorModel::Rgb => self
                .samples
                .as_rgb()
                .iter()
                .map(|p| rgb::RGBA8::new(p.r, p.g, p.b, 255))
                .collect(),
            _ => self.normalize().rgba_pixels(),
        }
    }
}

fn check_len(width: usize, height: usize, model: ColorModel, len: usize) -> Result<()> {
    if width == 0 || height == 0 {
        return Err(ShrinkError::ZeroDimension);
    }
    let expected = width
        .checked_mul(height)
        .and_then(|n| n.checked_mul(model.channels()))
        .ok_or(ShrinkError::DimensionMismatch {
            len,
            expected: usize::MAX,
        })?;
    if len != expected {
        return Err(ShrinkError::DimensionMismatch { len, expected });
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_bad_lengths() {
        assert!(matches!(
            PixelBuffer::new(2, 2, ColorModel::Rgb, vec![0; 11]),
            Err(ShrinkError::DimensionMismatch { len: 11, expected: 12 })
        ));
        assert!(matches!(
            PixelBuffer::new(0, 2, ColorModel::Rgb, vec![]),
            Err(ShrinkError::ZeroDimension)
        ));
        assert!(matches!(
            PixelBuffer::new(1, 1, ColorModel::Indexed, vec![0]),
            Err(ShrinkError::UnsupportedColorModel(_))
        ));
    }

    #[test]
    fn grayscale_flattens_to_rgb() {
        let buf = PixelBuffer::new(2, 1, ColorModel::Grayscale, vec![10, 200]).unwrap();
        let norm = buf.normalize();
        assert_eq!(norm.model(), ColorModel::Rgb);
        assert_eq!(norm.samples(), &[10, 10, 10, 200, 200, 200]);
    }

    #[test]
    fn grayscale_alpha_keeps_alpha() {
        let buf = PixelBuffer::new(1, 1, ColorModel::GrayscaleAlpha, vec![50, 7]).unwrap();
        let norm = buf.normalize();
        assert_eq!(norm.model(), ColorModel::Rgba);
        assert_eq!(norm.samples(), &[50, 50, 50, 7]);
    }

    #[test]
    fn indexed_alpha_decides_model() {
        let opaque = vec![
            rgb::RGBA8::new(255, 0, 0, 255),
            rgb::RGBA8::new(0, 0, 255, 255),
        ];
        let buf = PixelBuffer::indexed(2, 1, vec![1, 0], opaque).unwrap();
        assert!(!buf.has_alpha());
        assert_eq!(buf.normalize().samples(), &[0, 0, 255, 255, 0, 0]);

        let with_trns = vec![rgb::RGBA8::new(1, 2, 3, 0), rgb::RGBA8::new(4, 5, 6, 255)];
        let buf = PixelBuffer::indexed(2, 1, vec![0, 1], with_trns).unwrap();
        let norm = buf.normalize();
        assert_eq!(norm.model(), ColorModel::Rgba);
        assert_eq!(norm.samples(), &[1, 2, 3, 0, 4, 5, 6, 255]);
    }

    #[test]
    fn indexed_rejects_out_of_range_index() {
        let palette = vec![rgb::RGBA8::new(0, 0, 0, 255)];
        assert!(PixelBuffer::indexed(1, 1, vec![3], palette).is_err());
    }

    #[test]
    fn normalize_does_not_touch_source() {
        let buf = PixelBuffer::new(1, 1, ColorModel::Grayscale, vec![9]).unwrap();
        let before = buf.clone();
        let _ = buf.normalize();
        assert_eq!(buf, before);
    }
}
