use std::borrow::Cow;

use image::imageops::FilterType;

use crate::error::{Result, ShrinkError, Stage};
use crate::pixels::{ColorModel, PixelBuffer};

/// Target dimensions when the longest side is scaled down to `cap`.
///
/// Both sides are scaled by `cap / longest` and floored, never below 1.
pub fn fit_within(width: usize, height: usize, cap: usize) -> (usize, usize) {
    let cap = cap.max(1);
    let longest = width.max(height);
    if longest <= cap {
        return (width, height);
    }
    (
        (width * cap / longest).max(1),
        (height * cap / longest).max(1),
    )
}

/// Shrink `buffer` so neither side exceeds `cap`, resampling with Lanczos3.
///
/// Returns the input untouched when it already fits. The result is always
/// normalized (RGB or RGBA) when resampling happened.
pub fn downscale(buffer: &PixelBuffer, cap: u32) -> Result<Cow<'_, PixelBuffer>> {
    let (width, height) = (buffer.width(), buffer.height());
    let (new_width, new_height) = fit_within(width, height, cap as usize);
    if (new_width, new_height) == (width, height) {
        return Ok(Cow::Borrowed(buffer));
    }

    let normalized = if buffer.is_normalized() {
        Cow::Borrowed(buffer)
    } else {
        Cow::Owned(buffer.normalize())
    };
    let samples = normalized.samples().to_vec();
    let dims = (width, height, new_width, new_height);
    let resized = match normalized.model() {
        ColorModel::Rgba => resample::<image::Rgba<u8>>(samples, dims)?,
        _ => resample::<image::Rgb<u8>>(samples, dims)?,
    };

    PixelBuffer::new(new_width, new_height, normalized.model(), resized).map(Cow::Owned)
}

fn resample<P>(samples: Vec<u8>, (w, h, nw, nh): (usize, usize, usize, usize)) -> Result<Vec<u8>>
where
    P: image::Pixel<Subpixel = u8> + 'static,
{
    let img: image::ImageBuffer<P, Vec<u8>> =
        image::ImageBuffer::from_raw(w as u32, h as u32, samples).ok_or_else(|| {
            ShrinkError::failed(Stage::Downscale, "sample buffer does not match dimensions")
        })?;
    Ok(image::imageops::resize(&img, nw as u32, nh as u32, FilterType::Lanczos3).into_raw())
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn solid(width: usize, height: usize) -> PixelBuffer {
        PixelBuffer::from_rgb(width, height, &vec![rgb::RGB8::new(40, 90, 200); width * height])
            .unwrap()
    }

    #[test]
    fn fit_within_floors_and_keeps_minimum() {
        assert_eq!(fit_within(1600, 1200, 800), (800, 600));
        assert_eq!(fit_within(1000, 333, 800), (800, 266));
        assert_eq!(fit_within(3000, 1, 800), (800, 1));
        assert_eq!(fit_within(640, 480, 800), (640, 480));
    }

    #[test]
    fn small_images_are_borrowed() {
        let buf = solid(20, 10);
        assert!(matches!(downscale(&buf, 20).unwrap(), Cow::Borrowed(_)));
    }

    #[test]
    fn large_images_fit_the_cap() {
        let buf = solid(90, 30);
        let out = downscale(&buf, 45).unwrap();
        assert_eq!((out.width(), out.height()), (45, 15));
        assert_eq!(out.model(), ColorModel::Rgb);
        // Lanczos on a flat field stays flat.
        assert!(out.samples().chunks(3).all(|p| p == [40, 90, 200]));
    }

    #[test]
    fn alpha_survives_resampling() {
        let px = vec![rgb::RGBA8::new(10, 20, 30, 128); 64 * 8];
        let buf = PixelBuffer::from_rgba(64, 8, &px).unwrap();
        let out = downscale(&buf, 16).unwrap();
        assert_eq!(out.model(), ColorModel::Rgba);
        assert_eq!((out.width(), out.height()), (16, 2));
        assert!(out.samples().chunks(4).all(|p| p[3] == 128));
    }

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(256))]

        #[test]
        fn fit_within_hits_cap_and_keeps_aspect(
            width in 1usize..4000,
            height in 1usize..4000,
            cap in 1usize..1000,
        ) {
            let (nw, nh) = fit_within(width, height, cap);
            let longest = width.max(height);
            if longest <= cap {
                prop_assert_eq!((nw, nh), (width, height));
            } else {
                prop_assert_eq!(nw.max(nh), cap);
                let scale = cap as f64 / longest as f64;
                prop_assert!((nw as f64 - width as f64 * scale).abs() <= 1.0);
                prop_assert!((nh as f64 - height as f64 * scale).abs() <= 1.0);
                prop_assert!(nw >= 1 && nh >= 1);
            }
        }

        #[test]
        fn downscale_output_matches_fit(
            width in 1usize..48,
            height in 1usize..48,
            cap in 1u32..32,
        ) {
            let buf = solid(width, height);
            let out = downscale(&buf, cap).unwrap();
            let expected = fit_within(width, height, cap as usize);
            prop_assert_eq!((out.width(), out.height()), expected);
            prop_assert!(out.width().max(out.height()) <= cap as usize);
        }
    }
}
