use std::collections::HashMap;

use crate::oklab::OKLab;

/// A quantized color palette of exactly the requested size.
///
/// The first [`searchable_len`](Palette::searchable_len) entries are distinct
/// colors sorted by OKLab lightness, which keeps neighboring indices similar
/// for PNG's scanline filters and lets [`nearest`](Palette::nearest) prune its
/// scan. Any remaining entries are padding (copies of entry 0) so the palette
/// length always matches the requested color count; padding is never
/// returned by a search.
#[derive(Debug, Clone, PartialEq)]
pub struct Palette {
    entries: Vec<rgb::RGB8>,
    oklab: Vec<OKLab>,
    exact: Option<HashMap<rgb::RGB8, u8>>,
}

impl Palette {
    /// Palette holding every source color exactly. `colors.len()` must not
    /// exceed `size`.
    pub fn exact(colors: Vec<rgb::RGB8>, size: usize) -> Self {
        let mut palette = Self::sorted(colors, size);
        let lookup = palette
            .searchable()
            .iter()
            .enumerate()
            .map(|(i, &c)| (c, i as u8))
            .collect();
        palette.exact = Some(lookup);
        palette
    }

    /// Palette from quantizer centroids. Centroids that collapse onto the
    /// same sRGB value are merged.
    pub fn from_centroids(centroids: Vec<OKLab>, size: usize) -> Self {
        Self::from_colors(centroids.into_iter().map(OKLab::to_rgb).collect(), size)
    }

    /// Palette from already-rounded sRGB colors; duplicates are merged.
    pub fn from_colors(mut colors: Vec<rgb::RGB8>, size: usize) -> Self {
        colors.sort_unstable();
        colors.dedup();
        Self::sorted(colors, size)
    }

    fn sorted(colors: Vec<rgb::RGB8>, size: usize) -> Self {
        let size = size.clamp(1, 256);
        let mut pairs: Vec<(OKLab, rgb::RGB8)> = if colors.is_empty() {
            // Nothing visible to quantize; any color will do.
            vec![(OKLab::default(), rgb::RGB8::new(0, 0, 0))]
        } else {
            colors.into_iter().map(|c| (OKLab::from_rgb(c), c)).collect()
        };
        pairs.truncate(size);
        pairs.sort_by(|x, y| x.0.l.total_cmp(&y.0.l).then(x.1.cmp(&y.1)));

        let oklab: Vec<OKLab> = pairs.iter().map(|(lab, _)| *lab).collect();
        let mut entries: Vec<rgb::RGB8> = pairs.iter().map(|(_, c)| *c).collect();
        let pad = entries[0];
        entries.resize(size, pad);

        Self {
            entries,
            oklab,
            exact: None,
        }
    }

    /// All entries, padding included.
    pub fn entries(&self) -> &[rgb::RGB8] {
        &self.entries
    }

    /// Entries that searches can return.
    pub fn searchable(&self) -> &[rgb::RGB8] {
        &self.entries[..self.oklab.len()]
    }

    pub fn searchable_len(&self) -> usize {
        self.oklab.len()
    }

    pub fn entries_oklab(&self) -> &[OKLab] {
        &self.oklab
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Whether every visible source color is present unchanged.
    pub fn is_exact(&self) -> bool {
        self.exact.is_some()
    }

    /// Index of a color that is in an exact palette.
    pub fn exact_index(&self, color: rgb::RGB8) -> Option<u8> {
        self.exact.as_ref()?.get(&color).copied()
    }

    /// Nearest searchable entry to an OKLab color.
    ///
    /// Entries are sorted by lightness, so the scan walks outward from the
    /// query's lightness and stops in each direction once the lightness gap
    /// alone exceeds the best distance found.
    pub fn nearest(&self, color: OKLab) -> u8 {
        let n = self.oklab.len();
        let start = self.oklab.partition_point(|e| e.l < color.l);
        let mut best = start.min(n - 1);
        let mut best_dist = f32::INFINITY;
        let mut up = start;
        let mut down = start;

        loop {
            let mut advanced = false;
            if up < n {
                let e = self.oklab[up];
                let dl = e.l - color.l;
                if dl * dl < best_dist {
                    let d = color.distance_sq(e);
                    if d < best_dist {
                        best_dist = d;
                        best = up;
                    }
                    up += 1;
                    advanced = true;
                } else {
                    up = n;
                }
            }
            if down > 0 {
                let e = self.oklab[down - 1];
                let dl = color.l - e.l;
                if dl * dl < best_dist {
                    let d = color.distance_sq(e);
                    if d < best_dist {
                        best_dist = d;
                        best = down - 1;
                    }
                    down -= 1;
                    advanced = true;
                } else {
                    down = 0;
                }
            }
            if !advanced {
                break;
            }
        }
        best as u8
    }

    pub fn nearest_rgb(&self, color: rgb::RGB8) -> u8 {
        match self.exact_index(color) {
            Some(i) => i,
            None => self.nearest(OKLab::from_rgb(color)),
        }
    }

    /// Mean squared OKLab distance between source pixels and their assigned
    /// entries; fully transparent pixels are skipped.
    pub fn mean_error(&self, pixels: &[rgb::RGBA8], indices: &[u8]) -> f32 {
        let mut total = 0.0f64;
        let mut count = 0usize;
        for (p, &i) in pixels.iter().zip(indices).filter(|(p, _)| p.a > 0) {
            let src = OKLab::from_rgb(rgb::RGB8::new(p.r, p.g, p.b));
            total += src.distance_sq(self.oklab[i as usize]) as f64;
            count += 1;
        }
        if count == 0 {
            0.0
        } else {
            (total / count as f64) as f32
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::oklab::srgb_to_oklab;

    fn grays(values: &[u8]) -> Vec<rgb::RGB8> {
        values.iter().map(|&v| rgb::RGB8::new(v, v, v)).collect()
    }

    #[test]
    fn padding_fills_to_requested_size() {
        let p = Palette::exact(grays(&[200, 10]), 16);
        assert_eq!(p.len(), 16);
        assert_eq!(p.searchable_len(), 2);
        assert_eq!(p.entries()[0], rgb::RGB8::new(10, 10, 10));
        assert!(p.entries()[2..].iter().all(|&c| c == p.entries()[0]));
    }

    #[test]
    fn entries_sorted_by_lightness() {
        let p = Palette::exact(grays(&[200, 10, 90, 255, 0]), 5);
        let ls: Vec<f32> = p.entries_oklab().iter().map(|e| e.l).collect();
        assert!(ls.windows(2).all(|w| w[0] <= w[1]));
    }

    #[test]
    fn merged_centroids_dedup() {
        let c = srgb_to_oklab(40, 80, 120);
        let p = Palette::from_centroids(vec![c, c, srgb_to_oklab(250, 0, 0)], 4);
        assert_eq!(p.searchable_len(), 2);
        assert_eq!(p.len(), 4);
        assert!(!p.is_exact());
    }

    #[test]
    fn empty_input_still_searchable() {
        let p = Palette::from_centroids(Vec::new(), 2);
        assert_eq!(p.len(), 2);
        assert_eq!(p.nearest(srgb_to_oklab(255, 255, 255)), 0);
    }

    #[test]
    fn nearest_matches_brute_force() {
        let colors: Vec<rgb::RGB8> = (0..40u32)
            .map(|i| {
                let h = i.wrapping_mul(2654435761);
                rgb::RGB8::new(h as u8, (h >> 8) as u8, (h >> 16) as u8)
            })
            .collect();
        let p = Palette::exact(colors, 64);
        for i in 0..500u32 {
            let h = i.wrapping_mul(40503).wrapping_add(17);
            let q = srgb_to_oklab(h as u8, (h >> 5) as u8, (h >> 11) as u8);
            let brute = p
                .entries_oklab()
                .iter()
                .enumerate()
                .min_by(|(_, a), (_, b)| q.distance_sq(**a).total_cmp(&q.distance_sq(**b)))
                .map(|(i, _)| i as u8)
                .unwrap();
            let fast = p.nearest(q);
            let da = q.distance_sq(p.entries_oklab()[fast as usize]);
            let db = q.distance_sq(p.entries_oklab()[brute as usize]);
            assert!((da - db).abs() < 1e-9, "query {i}: {fast} vs {brute}");
        }
    }

    #[test]
    fn exact_lookup_hits_every_color() {
        let colors = grays(&[3, 77, 150]);
        let p = Palette::exact(colors.clone(), 8);
        for c in colors {
            let i = p.exact_index(c).unwrap();
            assert_eq!(p.entries()[i as usize], c);
            assert_eq!(p.nearest_rgb(c), i);
        }
        assert!(p.exact_index(rgb::RGB8::new(1, 2, 3)).is_none());
    }
}
