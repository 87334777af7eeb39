//! Ridge line construction over a [`WaveletTransform`] and the extraction of candidate
//! peak boundaries from the surviving ridges.
//!
//! A ridge line links the local maxima of the coefficient surface across adjacent scales,
//! starting at the smallest scale. Noise produces maxima that vanish after a scale or
//! two, while a true chromatographic peak persists across many scales, so filtering on
//! ridge length separates the two.
use serde::{Deserialize, Serialize};
use tracing::trace;

use crate::stats::median_spacing;
use crate::wavelet::{scale_ladder, WaveletTransform};

/// The locus of coefficient maxima for one feature across consecutive scales
#[derive(Debug, Clone, PartialEq)]
pub struct RidgeLine {
    /// The index of the scale the ridge begins at
    pub start_scale: usize,
    /// The sample index of the maximum at each scale from `start_scale` on
    pub positions: Vec<usize>,
    pub coefficients: Vec<f64>,
}

impl RidgeLine {
    fn new(start_scale: usize, position: usize, coefficient: f64) -> Self {
        Self {
            start_scale,
            positions: vec![position],
            coefficients: vec![coefficient],
        }
    }

    fn push(&mut self, position: usize, coefficient: f64) {
        self.positions.push(position);
        self.coefficients.push(coefficient);
    }

    /// The number of contiguous scales this ridge spans
    pub fn len(&self) -> usize {
        self.positions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.positions.is_empty()
    }

    pub fn last_position(&self) -> usize {
        *self.positions.last().unwrap_or(&0)
    }

    /// The scale index, sample index and value of the largest coefficient on the ridge
    pub fn best(&self) -> (usize, usize, f64) {
        let (offset, coef) = self
            .coefficients
            .iter()
            .copied()
            .enumerate()
            .fold((0, f64::NEG_INFINITY), |(bi, bc), (i, c)| {
                if c > bc {
                    (i, c)
                } else {
                    (bi, bc)
                }
            });
        (self.start_scale + offset, self.positions[offset], coef)
    }
}

/// A peak proposed by a ridge line, awaiting validation. Bounds are inclusive sample indices.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RidgeCandidate {
    pub left: usize,
    pub right: usize,
    pub coefficient: f64,
    /// The sample index the ridge sits on at its best scale
    pub center: usize,
    /// The best scale itself, in the trace's time units
    pub scale: f64,
}

/// Controls for the ridge finder
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RidgeParams {
    /// Ridges spanning fewer scales than this are treated as noise
    pub min_ridge_length: usize,
    /// A ridge's best coefficient must exceed this
    pub min_ridge_coefficient: f64,
    /// The half-width of a candidate in multiples of its best scale
    pub boundary_support: f64,
}

impl Default for RidgeParams {
    fn default() -> Self {
        Self {
            min_ridge_length: 3,
            min_ridge_coefficient: 0.0,
            boundary_support: 2.0,
        }
    }
}

/// Finds peaks in a single trace from the ridges of its wavelet transform
#[derive(Debug, Clone, Copy, Default)]
pub struct RidgePeakFinder {
    pub params: RidgeParams,
}

impl RidgePeakFinder {
    pub fn new(params: RidgeParams) -> Self {
        Self { params }
    }

    /// Find candidate peaks in `signal` sampled at `x` using scales spanning `scale_lo..=scale_hi`.
    ///
    /// Candidates are ordered by decreasing coefficient. An empty result means the trace
    /// holds no peak.
    pub fn find_peaks(
        &self,
        x: &[f64],
        signal: &[f32],
        scale_lo: f64,
        scale_hi: f64,
    ) -> Vec<RidgeCandidate> {
        self.find_peaks_with_transform(x, signal, scale_lo, scale_hi).1
    }

    /// As [`RidgePeakFinder::find_peaks`], also returning the transform the ridges were read from
    pub fn find_peaks_with_transform(
        &self,
        x: &[f64],
        signal: &[f32],
        scale_lo: f64,
        scale_hi: f64,
    ) -> (WaveletTransform, Vec<RidgeCandidate>) {
        if x.len() < 3 || x.len() != signal.len() || signal.iter().all(|v| *v <= 0.0) {
            return (WaveletTransform::default(), Vec::new());
        }
        let scales = scale_ladder(scale_lo, scale_hi);
        let transform = WaveletTransform::compute(x, signal, &scales);
        let ridges = self.build_ridges(&transform, x);
        let n_ridges = ridges.len();
        let ridges = self.filter_ridges(ridges);
        trace!(
            "{} of {n_ridges} ridges kept over {} samples",
            ridges.len(),
            x.len()
        );
        let candidates = self.extract_boundaries(&ridges, &transform, x);
        (transform, candidates)
    }

    /// Link local maxima across scales into ridge lines, smallest scale first.
    ///
    /// At each scale an open ridge claims the nearest unclaimed maximum within
    /// `max(median spacing, scale / 2)` of its last position, stronger ridges choosing
    /// first. Ridges that find no continuation are closed, and maxima left unclaimed
    /// start new ridges.
    pub fn build_ridges(&self, transform: &WaveletTransform, x: &[f64]) -> Vec<RidgeLine> {
        let n_scales = transform.n_scales();
        if n_scales == 0 {
            return Vec::new();
        }
        let spacing = median_spacing(x);
        let mut closed: Vec<RidgeLine> = Vec::new();
        let mut open: Vec<RidgeLine> = transform
            .local_maxima(0)
            .into_iter()
            .map(|i| RidgeLine::new(0, i, transform.row(0)[i]))
            .collect();

        for k in 1..n_scales {
            let row = transform.row(k);
            let maxima = transform.local_maxima(k);
            let mut claimed = vec![false; maxima.len()];
            let tolerance = spacing.max(transform.scales[k] / 2.0);

            open.sort_by(|a, b| {
                let ca = a.coefficients.last().copied().unwrap_or_default();
                let cb = b.coefficients.last().copied().unwrap_or_default();
                cb.total_cmp(&ca)
            });

            let mut still_open = Vec::with_capacity(open.len());
            for mut ridge in open.drain(..) {
                let origin = x[ridge.last_position()];
                let nearest = maxima
                    .iter()
                    .enumerate()
                    .filter(|(m, i)| !claimed[*m] && (x[**i] - origin).abs() <= tolerance)
                    .min_by(|(_, a), (_, b)| {
                        (x[**a] - origin).abs().total_cmp(&(x[**b] - origin).abs())
                    })
                    .map(|(m, i)| (m, *i));
                match nearest {
                    Some((m, i)) => {
                        claimed[m] = true;
                        ridge.push(i, row[i]);
                        still_open.push(ridge);
                    }
                    None => closed.push(ridge),
                }
            }
            open = still_open;
            for (m, i) in maxima.iter().copied().enumerate() {
                if !claimed[m] {
                    open.push(RidgeLine::new(k, i, row[i]));
                }
            }
        }
        closed.extend(open);
        closed
    }

    /// Drop ridges that are too short or too weak to be a peak
    pub fn filter_ridges(&self, ridges: Vec<RidgeLine>) -> Vec<RidgeLine> {
        ridges
            .into_iter()
            .filter(|r| {
                r.len() >= self.params.min_ridge_length
                    && r.best().2 > self.params.min_ridge_coefficient
            })
            .collect()
    }

    /// Read the boundaries of each ridge from the support of its best scale
    pub fn extract_boundaries(
        &self,
        ridges: &[RidgeLine],
        transform: &WaveletTransform,
        x: &[f64],
    ) -> Vec<RidgeCandidate> {
        let mut candidates: Vec<RidgeCandidate> = Vec::with_capacity(ridges.len());
        for ridge in ridges {
            let (scale_index, center, coefficient) = ridge.best();
            let scale = transform.scales[scale_index];
            let reach = self.params.boundary_support * scale;
            let left = x.partition_point(|v| *v < x[center] - reach).min(center);
            let right = x
                .partition_point(|v| *v <= x[center] + reach)
                .saturating_sub(1)
                .max(center);
            if candidates.iter().any(|c| c.center == center) {
                continue;
            }
            candidates.push(RidgeCandidate {
                left,
                right,
                coefficient,
                center,
                scale,
            });
        }
        candidates.sort_by(|a, b| b.coefficient.total_cmp(&a.coefficient));
        candidates
    }
}

#[cfg(test)]
mod test {
    use super::*;

    fn trace_with(peaks: &[(f64, f64, f32)], n: usize) -> (Vec<f64>, Vec<f32>) {
        let x: Vec<f64> = (0..n).map(|i| i as f64).collect();
        let y = x
            .iter()
            .map(|t| {
                peaks
                    .iter()
                    .map(|(c, s, h)| h * (-(t - c).powi(2) / (2.0 * s * s)).exp() as f32)
                    .sum()
            })
            .collect();
        (x, y)
    }

    #[test]
    fn test_single_peak() {
        let (x, y) = trace_with(&[(40.0, 2.0, 1000.0)], 80);
        let finder = RidgePeakFinder::default();
        let candidates = finder.find_peaks(&x, &y, 1.0, 6.0);
        assert_eq!(candidates.len(), 1);
        let c = candidates[0];
        assert_eq!(c.center, 40);
        assert!(c.left < 40 && c.right > 40);
        assert!(c.coefficient > 0.0);
        // Bounds span the support of the best scale
        assert!((x[c.right] - x[c.left]) <= 4.0 * c.scale + 1.0);
    }

    #[test]
    fn test_two_separated_peaks() {
        let (x, y) = trace_with(&[(20.0, 2.0, 500.0), (60.0, 2.0, 1000.0)], 80);
        let candidates = RidgePeakFinder::default().find_peaks(&x, &y, 1.0, 6.0);
        assert_eq!(candidates.len(), 2);
        assert_eq!(candidates[0].center, 60);
        assert_eq!(candidates[1].center, 20);
    }

    #[test]
    fn test_empty_and_flat() {
        let finder = RidgePeakFinder::default();
        assert!(finder.find_peaks(&[], &[], 1.0, 5.0).is_empty());
        let x: Vec<f64> = (0..20).map(|i| i as f64).collect();
        let zeros = vec![0.0f32; 20];
        assert!(finder.find_peaks(&x, &zeros, 1.0, 5.0).is_empty());
    }

    #[test]
    fn test_short_ridges_filtered() {
        let finder = RidgePeakFinder::new(RidgeParams {
            min_ridge_length: 3,
            ..Default::default()
        });
        let ridges = vec![
            RidgeLine {
                start_scale: 8,
                positions: vec![4, 4],
                coefficients: vec![5.0, 6.0],
            },
            RidgeLine {
                start_scale: 0,
                positions: vec![10, 10, 11],
                coefficients: vec![1.0, 3.0, 2.0],
            },
            RidgeLine {
                start_scale: 0,
                positions: vec![15, 15, 15],
                coefficients: vec![0.0, 0.0, 0.0],
            },
        ];
        let kept = finder.filter_ridges(ridges);
        assert_eq!(kept.len(), 1);
        assert_eq!(kept[0].best(), (1, 10, 3.0));
    }
}
