use std::borrow::Cow;
use std::str::FromStr;

use rayon::prelude::*;

use crate::error::{Result, ShrinkError};
use crate::indexed::IndexedImage;
use crate::oklab::{OKLab, srgb_to_oklab_batch};
use crate::palette::Palette;
use crate::pixels::{ColorModel, PixelBuffer};

/// How quantization error is distributed across pixels.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, serde::Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum DitherStrategy {
    /// Nearest color only. Every pixel is independent.
    None,
    /// Classic serial error diffusion (7/16, 3/16, 5/16, 1/16) in raster order.
    #[default]
    FloydSteinberg,
    /// 8x8 Bayer threshold pattern. Every pixel is independent.
    Ordered,
}

impl DitherStrategy {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::None => "none",
            Self::FloydSteinberg => "floyd-steinberg",
            Self::Ordered => "ordered",
        }
    }
}

impl FromStr for DitherStrategy {
    type Err = ShrinkError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "none" | "off" => Ok(Self::None),
            "floyd-steinberg" | "floyd_steinberg" | "floydsteinberg" | "fs" => {
                Ok(Self::FloydSteinberg)
            }
            "ordered" | "bayer" => Ok(Self::Ordered),
            other => Err(ShrinkError::InvalidRequest(format!(
                "unknown dithering strategy '{other}' (none, floyd-steinberg, ordered)"
            ))),
        }
    }
}

const BAYER_8X8: [[u8; 8]; 8] = [
    [0, 48, 12, 60, 3, 51, 15, 63],
    [32, 16, 44, 28, 35, 19, 47, 31],
    [8, 56, 4, 52, 11, 59, 7, 55],
    [40, 24, 36, 20, 43, 27, 39, 23],
    [2, 50, 14, 62, 1, 49, 13, 61],
    [34, 18, 46, 30, 33, 17, 45, 29],
    [10, 58, 6, 54, 9, 57, 5, 53],
    [42, 26, 38, 22, 41, 25, 37, 21],
];

/// Map every pixel of `buffer` to an entry of `palette`.
///
/// `strength` (0.0..=1.0) scales the diffused error for Floyd-Steinberg and
/// the threshold amplitude for ordered dithering. Exact palettes skip
/// dithering entirely: each color maps to itself.
///
/// Fully transparent pixels take index 0 and neither send nor receive
/// diffused error. Alpha is copied by position when the buffer has it.
pub fn dither(
    buffer: &PixelBuffer,
    palette: &Palette,
    strategy: DitherStrategy,
    strength: f32,
) -> Result<IndexedImage> {
    let buffer = if buffer.is_normalized() {
        Cow::Borrowed(buffer)
    } else {
        Cow::Owned(buffer.normalize())
    };
    let pixels = buffer.rgba_pixels();
    dither_pixels(
        &pixels,
        (buffer.width(), buffer.height()),
        buffer.model() == ColorModel::Rgba,
        palette,
        strategy,
        strength,
    )
}

/// [`dither`] over pixels already expanded to RGBA. Alpha is kept in the
/// result only when `keep_alpha` is set.
pub(crate) fn dither_pixels(
    pixels: &[rgb::RGBA8],
    (width, height): (usize, usize),
    keep_alpha: bool,
    palette: &Palette,
    strategy: DitherStrategy,
    strength: f32,
) -> Result<IndexedImage> {
    let strength = strength.clamp(0.0, 1.0);
    let strategy = if palette.is_exact() {
        DitherStrategy::None
    } else {
        strategy
    };
    let indices = match strategy {
        DitherStrategy::None => {
            remap_rows(pixels, width, |_, _, p| palette.nearest_rgb(to_rgb8(p)))
        }
        DitherStrategy::Ordered => ordered(pixels, width, palette, strength),
        DitherStrategy::FloydSteinberg => {
            floyd_steinberg(pixels, width, height, palette, strength)
        }
    };

    let alpha = keep_alpha.then(|| pixels.iter().map(|p| p.a).collect());
    IndexedImage::new(width, height, palette.clone(), indices, alpha)
}

#[inline]
fn to_rgb8(p: rgb::RGBA8) -> rgb::RGB8 {
    rgb::RGB8::new(p.r, p.g, p.b)
}

/// Per-pixel mapping with no cross-pixel dependency, parallel over rows.
fn remap_rows<F>(pixels: &[rgb::RGBA8], width: usize, map: F) -> Vec<u8>
where
    F: Fn(usize, usize, rgb::RGBA8) -> u8 + Sync,
{
    let mut indices = vec![0u8; pixels.len()];
    indices
        .par_chunks_mut(width)
        .zip(pixels.par_chunks(width))
        .enumerate()
        .for_each(|(y, (out, row))| {
            for (x, (slot, &p)) in out.iter_mut().zip(row).enumerate() {
                *slot = if p.a == 0 { 0 } else { map(x, y, p) };
            }
        });
    indices
}

/// Bayer-threshold dithering. The threshold depends only on the absolute
/// pixel position and the amplitude only on the palette.
fn ordered(pixels: &[rgb::RGBA8], width: usize, palette: &Palette, strength: f32) -> Vec<u8> {
    let levels = (palette.searchable_len().max(2) as f32).cbrt();
    let amplitude = strength * 255.0 / levels;

    remap_rows(pixels, width, |x, y, p| {
        let t = (BAYER_8X8[y % 8][x % 8] as f32 + 0.5) / 64.0 - 0.5;
        let offset = t * amplitude;
        let shift = |c: u8| (c as f32 + offset).round().clamp(0.0, 255.0) as u8;
        palette.nearest(OKLab::from_rgb(rgb::RGB8::new(
            shift(p.r),
            shift(p.g),
            shift(p.b),
        )))
    })
}

/// Serial Floyd-Steinberg diffusion in OKLab.
///
/// Each pixel's effective color depends on error from already-visited
/// neighbors, so this runs strictly in raster order.
fn floyd_steinberg(
    pixels: &[rgb::RGBA8],
    width: usize,
    height: usize,
    palette: &Palette,
    strength: f32,
) -> Vec<u8> {
    let mut work = Vec::new();
    srgb_to_oklab_batch(pixels, &mut work);
    let mut indices = vec![0u8; pixels.len()];
    let entries = palette.entries_oklab();

    let diffuse = |work: &mut [OKLab], target: usize, fraction: f32, err: OKLab| {
        if pixels[target].a == 0 {
            return;
        }
        let w = &mut work[target];
        w.l += err.l * fraction;
        w.a += err.a * fraction;
        w.b += err.b * fraction;
    };

    for y in 0..height {
        for x in 0..width {
            let idx = y * width + x;
            if pixels[idx].a == 0 {
                continue;
            }

            let current = work[idx];
            let chosen = palette.nearest(current);
            indices[idx] = chosen;

            let target = entries[chosen as usize];
            let err = OKLab::new(
                (current.l - target.l) * strength,
                (current.a - target.a) * strength,
                (current.b - target.b) * strength,
            );

            if x + 1 < width {
                diffuse(&mut work, idx + 1, 7.0 / 16.0, err);
            }
            if y + 1 < height {
                let below = idx + width;
                if x > 0 {
                    diffuse(&mut work, below - 1, 3.0 / 16.0, err);
                }
                diffuse(&mut work, below, 5.0 / 16.0, err);
                if x + 1 < width {
                    diffuse(&mut work, below + 1, 1.0 / 16.0, err);
                }
            }
        }
    }

    indices
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::oklab::srgb_to_oklab;

    fn four_grays() -> Palette {
        Palette::from_centroids(
            vec![
                srgb_to_oklab(0, 0, 0),
                srgb_to_oklab(85, 85, 85),
                srgb_to_oklab(170, 170, 170),
                srgb_to_oklab(255, 255, 255),
            ],
            4,
        )
    }

    fn gradient(width: usize, height: usize) -> PixelBuffer {
        let pixels: Vec<rgb::RGB8> = (0..width * height)
            .map(|i| {
                let (x, y) = (i % width, i / width);
                let v = ((x + y) * 255 / (width + height)) as u8;
                rgb::RGB8::new(v, v, v)
            })
            .collect();
        PixelBuffer::from_rgb(width, height, &pixels).unwrap()
    }

    #[test]
    fn parses_strategy_names() {
        assert_eq!("fs".parse::<DitherStrategy>().unwrap(), DitherStrategy::FloydSteinberg);
        assert_eq!(" Ordered ".parse::<DitherStrategy>().unwrap(), DitherStrategy::Ordered);
        assert_eq!("none".parse::<DitherStrategy>().unwrap(), DitherStrategy::None);
        assert!("atkinson".parse::<DitherStrategy>().is_err());
    }

    #[test]
    fn every_strategy_yields_valid_indices() {
        let palette = four_grays();
        let buf = gradient(16, 16);
        for strategy in [
            DitherStrategy::None,
            DitherStrategy::FloydSteinberg,
            DitherStrategy::Ordered,
        ] {
            let img = dither(&buf, &palette, strategy, 1.0).unwrap();
            assert_eq!(img.indices().len(), 256);
            assert!(img.indices().iter().all(|&i| (i as usize) < palette.searchable_len()));
            assert!(img.alpha().is_none());
        }
    }

    #[test]
    fn floyd_steinberg_mixes_levels_on_flat_midtone() {
        // 128 sits between two entries; diffusion must use both.
        let palette = Palette::from_centroids(
            vec![srgb_to_oklab(0, 0, 0), srgb_to_oklab(255, 255, 255)],
            2,
        );
        let buf = PixelBuffer::from_rgb(8, 8, &vec![rgb::RGB8::new(128, 128, 128); 64]).unwrap();
        let none = dither(&buf, &palette, DitherStrategy::None, 1.0).unwrap();
        let fs = dither(&buf, &palette, DitherStrategy::FloydSteinberg, 1.0).unwrap();
        let distinct = |v: &[u8]| v.iter().collect::<std::collections::BTreeSet<_>>().len();
        assert_eq!(distinct(none.indices()), 1);
        assert_eq!(distinct(fs.indices()), 2);
    }

    #[test]
    fn transparent_pixels_pass_alpha_through() {
        let palette = four_grays();
        let pixels = vec![
            rgb::RGBA8::new(255, 0, 255, 0),
            rgb::RGBA8::new(250, 250, 250, 255),
            rgb::RGBA8::new(90, 90, 90, 77),
        ];
        let buf = PixelBuffer::from_rgba(3, 1, &pixels).unwrap();
        let img = dither(&buf, &palette, DitherStrategy::FloydSteinberg, 1.0).unwrap();
        assert_eq!(img.alpha(), Some(&[0u8, 255, 77][..]));
        assert_eq!(img.indices()[0], 0);
        assert_eq!(palette.entries()[img.indices()[1] as usize], rgb::RGB8::new(255, 255, 255));
    }

    #[test]
    fn exact_palette_ignores_strategy() {
        let colors = vec![rgb::RGB8::new(12, 34, 56), rgb::RGB8::new(200, 100, 0)];
        let palette = Palette::exact(colors.clone(), 2);
        let pixels: Vec<rgb::RGB8> = (0..64).map(|i| colors[(i / 3) % 2]).collect();
        let buf = PixelBuffer::from_rgb(8, 8, &pixels).unwrap();
        let img = dither(&buf, &palette, DitherStrategy::Ordered, 1.0).unwrap();
        let out = img.to_rgba();
        for (o, p) in out.iter().zip(&pixels) {
            assert_eq!((o.r, o.g, o.b), (p.r, p.g, p.b));
        }
    }
}
