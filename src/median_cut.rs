use rayon::prelude::*;

use crate::histogram::Sample;
use crate::oklab::OKLab;
use crate::palette::Palette;

/// A box of histogram entries awaiting subdivision.
#[derive(Debug, Clone)]
struct ColorBox {
    entries: Vec<(OKLab, f32)>,
    weight: f32,
    /// Largest per-axis extent and the axis it belongs to (0 = L, 1 = a, 2 = b).
    extent: f32,
    axis: usize,
}

impl ColorBox {
    fn new(entries: Vec<(OKLab, f32)>) -> Self {
        let weight = entries.iter().map(|(_, w)| w).sum();
        let mut min = [f32::MAX; 3];
        let mut max = [f32::MIN; 3];
        for (lab, _) in &entries {
            for (i, v) in [lab.l, lab.a, lab.b].into_iter().enumerate() {
                min[i] = min[i].min(v);
                max[i] = max[i].max(v);
            }
        }
        let ranges = [max[0] - min[0], max[1] - min[1], max[2] - min[2]];
        let axis = if ranges[0] >= ranges[1] && ranges[0] >= ranges[2] {
            0
        } else if ranges[1] >= ranges[2] {
            1
        } else {
            2
        };
        Self {
            entries,
            weight,
            extent: ranges[axis],
            axis,
        }
    }

    /// Heavier boxes with wider color spread split first.
    fn priority(&self) -> f32 {
        self.weight * self.extent
    }

    fn splittable(&self) -> bool {
        self.entries.len() >= 2 && self.extent > 0.0
    }

    fn centroid(&self) -> OKLab {
        weighted_mean(self.entries.iter().copied()).unwrap_or_default()
    }

    /// Split at the weighted median along the widest axis.
    fn split(mut self) -> (ColorBox, ColorBox) {
        let axis = self.axis;
        let key = |lab: &OKLab| match axis {
            0 => lab.l,
            1 => lab.a,
            _ => lab.b,
        };
        self.entries.sort_unstable_by(|x, y| key(&x.0).total_cmp(&key(&y.0)));

        let half = self.weight / 2.0;
        let mut accumulated = 0.0f32;
        let mut split_idx = 1;
        for (i, (_, w)) in self.entries.iter().enumerate() {
            accumulated += w;
            if accumulated >= half {
                split_idx = i + 1;
                break;
            }
        }
        split_idx = split_idx.clamp(1, self.entries.len() - 1);

        let right = self.entries.split_off(split_idx);
        (ColorBox::new(self.entries), ColorBox::new(right))
    }
}

fn weighted_mean(entries: impl Iterator<Item = (OKLab, f32)>) -> Option<OKLab> {
    let (mut l, mut a, mut b, mut w_sum) = (0.0f64, 0.0f64, 0.0f64, 0.0f64);
    for (lab, w) in entries {
        let w = w as f64;
        l += lab.l as f64 * w;
        a += lab.a as f64 * w;
        b += lab.b as f64 * w;
        w_sum += w;
    }
    (w_sum > 1e-10).then(|| OKLab::new((l / w_sum) as f32, (a / w_sum) as f32, (b / w_sum) as f32))
}

/// Samples scored per rayon task.
const SCORE_CHUNK: usize = 4096;

/// Refinement only replaces a fit that it beats by more than this fraction,
/// so summation-order noise can never make a larger palette score worse.
const MIN_GAIN: f64 = 1e-9;

/// A candidate color set scored against the error samples.
struct Fit {
    /// Distinct colors, lightness sorted.
    colors: Vec<rgb::RGB8>,
    /// Sum of squared OKLab distances to the nearest color, per visible pixel.
    error: f64,
    /// One Lloyd step: every color moved to the weighted mean of its samples.
    moved: Vec<rgb::RGB8>,
    /// Sample contributing the most error, if any contributes at all.
    worst: Option<OKLab>,
}

struct Partial {
    error: f64,
    sums: Vec<[f64; 4]>,
    worst: Option<(f64, OKLab)>,
}

impl Fit {
    fn new(colors: Vec<rgb::RGB8>, samples: &[Sample]) -> Self {
        let size = colors.len().clamp(1, 256);
        let palette = Palette::from_colors(colors, size);
        let targets = palette.entries_oklab();

        let partials: Vec<Partial> = samples
            .par_chunks(SCORE_CHUNK)
            .map(|chunk| {
                let mut part = Partial {
                    error: 0.0,
                    sums: vec![[0.0; 4]; targets.len()],
                    worst: None,
                };
                for s in chunk {
                    let i = palette.nearest(s.color) as usize;
                    let cost = s.color.distance_sq(targets[i]) as f64 * s.count as f64;
                    part.error += cost;
                    if cost > 0.0 && part.worst.is_none_or(|(w, _)| cost > w) {
                        part.worst = Some((cost, s.color));
                    }
                    let acc = &mut part.sums[i];
                    acc[0] += s.color.l as f64 * s.weight;
                    acc[1] += s.color.a as f64 * s.weight;
                    acc[2] += s.color.b as f64 * s.weight;
                    acc[3] += s.weight;
                }
                part
            })
            .collect();

        // Fold in chunk order so the score is deterministic.
        let mut error = 0.0;
        let mut sums = vec![[0.0f64; 4]; targets.len()];
        let mut worst: Option<(f64, OKLab)> = None;
        for part in partials {
            error += part.error;
            for (acc, p) in sums.iter_mut().zip(&part.sums) {
                for (a, v) in acc.iter_mut().zip(p) {
                    *a += v;
                }
            }
            if let Some((cost, color)) = part.worst
                && worst.is_none_or(|(w, _)| cost > w)
            {
                worst = Some((cost, color));
            }
        }

        let colors = palette.searchable().to_vec();
        let moved = colors
            .iter()
            .zip(&sums)
            .map(|(&c, acc)| {
                if acc[3] > 1e-10 {
                    OKLab::new(
                        (acc[0] / acc[3]) as f32,
                        (acc[1] / acc[3]) as f32,
                        (acc[2] / acc[3]) as f32,
                    )
                    .to_rgb()
                } else {
                    c
                }
            })
            .collect();

        Self {
            colors,
            error,
            moved,
            worst: worst.map(|(_, color)| color),
        }
    }

    fn beats(&self, other: &Fit) -> bool {
        self.error < other.error * (1.0 - MIN_GAIN)
    }
}

/// Weighted median cut over (centroid, weight) histogram entries, grown one
/// color at a time.
///
/// The palette for `k + 1` colors starts as the palette for `k` plus one
/// centroid from the next box split (or the worst-served sample once no box
/// can split). The box centroids themselves and up to `refine_iterations`
/// Lloyd steps over `samples` replace it only when they score lower. Each
/// step therefore scores no worse than the one before, and a call for `k`
/// colors returns exactly the prefix state a call for `k + 1` builds on.
///
/// Returns at most `max_colors` distinct sRGB colors.
pub fn median_cut(
    histogram: Vec<(OKLab, f32)>,
    samples: &[Sample],
    max_colors: usize,
    refine_iterations: usize,
) -> Vec<rgb::RGB8> {
    if histogram.is_empty() || max_colors == 0 {
        return Vec::new();
    }

    let mut boxes = vec![ColorBox::new(histogram)];
    let mut fit = Fit::new(vec![boxes[0].centroid().to_rgb()], samples);

    for _ in 1..max_colors {
        let splittable = boxes
            .iter()
            .enumerate()
            .filter(|(_, b)| b.splittable())
            .max_by(|(_, x), (_, y)| x.priority().total_cmp(&y.priority()))
            .map(|(i, _)| i);

        let added = match splittable {
            Some(idx) => {
                let parent = boxes[idx].centroid();
                let (left, right) = boxes.swap_remove(idx).split();
                let (l, r) = (left.centroid(), right.centroid());
                boxes.push(left);
                boxes.push(right);
                if l.distance_sq(parent) >= r.distance_sq(parent) { l } else { r }
            }
            None => match fit.worst {
                Some(color) if !fit.colors.contains(&color.to_rgb()) => color,
                _ => break,
            },
        };

        let mut grown = fit.colors.clone();
        grown.push(added.to_rgb());
        let mut best = Fit::new(grown, samples);

        if splittable.is_some() {
            let cut = Fit::new(boxes.iter().map(|b| b.centroid().to_rgb()).collect(), samples);
            if cut.beats(&best) {
                best = cut;
            }
        }

        for _ in 0..refine_iterations {
            let next = Fit::new(best.moved.clone(), samples);
            if !next.beats(&best) {
                break;
            }
            best = next;
        }
        fit = best;
    }

    fit.colors
}
