//! OKLab conversions used for every color-distance decision in the crate.

/// OKLab color (Bjorn Ottosson's perceptually uniform space).
/// L: lightness [0, 1], a: green-red, b: blue-yellow.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct OKLab {
    pub l: f32,
    pub a: f32,
    pub b: f32,
}

impl OKLab {
    pub const fn new(l: f32, a: f32, b: f32) -> Self {
        Self { l, a, b }
    }

    /// Squared Euclidean distance. OKLab is close enough to perceptually
    /// uniform that this stands in for visible difference.
    #[inline]
    pub fn distance_sq(self, other: Self) -> f32 {
        let dl = self.l - other.l;
        let da = self.a - other.a;
        let db = self.b - other.b;
        dl * dl + da * da + db * db
    }

    #[inline]
    pub fn from_rgb(px: rgb::RGB8) -> Self {
        srgb_to_oklab(px.r, px.g, px.b)
    }

    #[inline]
    pub fn to_rgb(self) -> rgb::RGB8 {
        let (r, g, b) = oklab_to_srgb(self);
        rgb::RGB8 { r, g, b }
    }
}

// sRGB transfer function, delegated to linear-srgb.

#[inline(always)]
fn srgb_to_linear(c: u8) -> f32 {
    linear_srgb::default::srgb_u8_to_linear(c)
}

#[inline(always)]
fn linear_to_srgb(c: f32) -> u8 {
    linear_srgb::default::linear_to_srgb_u8(c.clamp(0.0, 1.0))
}

// Matrix constants are Ottosson's reference values; the compiler truncates
// them to f32.

#[allow(clippy::excessive_precision)]
#[inline(always)]
fn linear_to_oklab(r: f32, g: f32, b: f32) -> OKLab {
    let l = 0.4122214708 * r + 0.5363325363 * g + 0.0514459929 * b;
    let m = 0.2119034982 * r + 0.6806995451 * g + 0.1073969566 * b;
    let s = 0.0883024619 * r + 0.2817188376 * g + 0.6299787005 * b;

    let l_ = l.cbrt();
    let m_ = m.cbrt();
    let s_ = s.cbrt();

    OKLab {
        l: 0.2104542553 * l_ + 0.7936177850 * m_ - 0.0040720468 * s_,
        a: 1.9779984951 * l_ - 2.4285922050 * m_ + 0.4505937099 * s_,
        b: 0.0259040371 * l_ + 0.7827717662 * m_ - 0.8086757660 * s_,
    }
}

/// Convert a whole pixel buffer to OKLab, ignoring alpha.
///
/// `out` is cleared first and ends up with one entry per pixel.
pub fn srgb_to_oklab_batch(pixels: &[rgb::RGBA8], out: &mut Vec<OKLab>) {
    out.clear();
    out.reserve(pixels.len());
    let conv = linear_srgb::lut::SrgbConverter::new();

    for p in pixels {
        out.push(linear_to_oklab(
            conv.srgb_u8_to_linear(p.r),
            conv.srgb_u8_to_linear(p.g),
            conv.srgb_u8_to_linear(p.b),
        ));
    }
}

/// Convert sRGB (0..255 per channel) to OKLab.
pub fn srgb_to_oklab(r: u8, g: u8, b: u8) -> OKLab {
    linear_to_oklab(srgb_to_linear(r), srgb_to_linear(g), srgb_to_linear(b))
}

/// Convert OKLab to sRGB (0..255 per channel), clamping out-of-gamut values.
#[allow(clippy::excessive_precision)]
pub fn oklab_to_srgb(lab: OKLab) -> (u8, u8, u8) {
    let l_ = lab.l + 0.3963377774 * lab.a + 0.2158037573 * lab.b;
    let m_ = lab.l - 0.1055613458 * lab.a - 0.0638541728 * lab.b;
    let s_ = lab.l - 0.0894841775 * lab.a - 1.2914855480 * lab.b;

    let l = l_ * l_ * l_;
    let m = m_ * m_ * m_;
    let s = s_ * s_ * s_;

    let r = 4.0767416621 * l - 3.3077115913 * m + 0.2309699292 * s;
    let g = -1.2684380046 * l + 2.6097574011 * m - 0.3413193965 * s;
    let b = -0.0041960863 * l - 0.7034186147 * m + 1.7076147010 * s;

    (linear_to_srgb(r), linear_to_srgb(g), linear_to_srgb(b))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn black_and_white_roundtrip() {
        let black = srgb_to_oklab(0, 0, 0);
        assert!(black.l.abs() < 0.001);
        assert_eq!(oklab_to_srgb(black), (0, 0, 0));

        let white = srgb_to_oklab(255, 255, 255);
        assert!((white.l - 1.0).abs() < 0.001);
        assert!(white.a.abs() < 0.001 && white.b.abs() < 0.001);
        assert_eq!(oklab_to_srgb(white), (255, 255, 255));
    }

    #[test]
    fn primaries_roundtrip() {
        let (r, g, b) = oklab_to_srgb(srgb_to_oklab(255, 0, 0));
        assert_eq!(r, 255);
        assert!(g <= 1 && b <= 1);

        let (r, g, b) = oklab_to_srgb(srgb_to_oklab(0, 0, 255));
        assert!(r <= 1 && g <= 1);
        assert_eq!(b, 255);
    }

    #[test]
    fn midtones_roundtrip_within_one_step() {
        for v in [17u8, 64, 128, 200, 243] {
            let px = rgb::RGB8 { r: v, g: v / 2, b: 255 - v };
            let back = OKLab::from_rgb(px).to_rgb();
            assert!((back.r as i16 - px.r as i16).abs() <= 1, "{px:?} -> {back:?}");
            assert!((back.g as i16 - px.g as i16).abs() <= 1, "{px:?} -> {back:?}");
            assert!((back.b as i16 - px.b as i16).abs() <= 1, "{px:?} -> {back:?}");
        }
    }

    #[test]
    fn out_of_gamut_clamps() {
        let (r, g, b) = oklab_to_srgb(OKLab::new(1.4, 0.5, -0.5));
        // clamped, not wrapped
        assert!(r == 255 || g == 255 || b == 255);
    }

    #[test]
    fn batch_matches_single_pixel_conversion() {
        let pixels: Vec<rgb::RGBA8> = (0..300u32)
            .map(|i| {
                let h = i.wrapping_mul(2_654_435_761);
                rgb::RGBA8::new(h as u8, (h >> 8) as u8, (h >> 16) as u8, (h >> 24) as u8)
            })
            .collect();
        let mut out = vec![OKLab::default(); 3];
        srgb_to_oklab_batch(&pixels, &mut out);
        assert_eq!(out.len(), pixels.len());
        for (p, lab) in pixels.iter().zip(&out) {
            let single = srgb_to_oklab(p.r, p.g, p.b);
            assert!(lab.distance_sq(single) < 1e-10, "{p:?}: {lab:?} vs {single:?}");
        }
    }

    #[test]
    fn distance_is_symmetric_and_ordered() {
        let a = srgb_to_oklab(100, 100, 100);
        let b = srgb_to_oklab(101, 100, 100);
        let far = srgb_to_oklab(200, 50, 50);
        assert!((a.distance_sq(far) - far.distance_sq(a)).abs() < 1e-10);
        assert!(a.distance_sq(a) < 1e-10);
        assert!(a.distance_sq(b) < a.distance_sq(far));
    }
}
