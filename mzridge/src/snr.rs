//! Signal-to-noise estimators for a candidate peak within its trace
use serde::{Deserialize, Serialize};

use crate::stats::{mean, median, median_spacing};
use crate::wavelet::WaveletTransform;

/// How the noise level around a candidate peak is measured.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind")]
pub enum SnrEstimator {
    /// Compare the apex height against intensity windows as wide as the peak, both the
    /// two that flank it and the median of every window swept across the rest of the trace
    IntensityWindow,
    /// Compare the strongest wavelet coefficient inside the peak against the coefficients
    /// around it, at a scale matching the peak's half width at half maximum
    WaveletCoefficient {
        /// How many half widths beyond each bound the noise is sampled over
        multiplier: f64,
        /// Average the magnitude of the surrounding coefficients rather than their signed value
        use_absolute: bool,
    },
}

impl Default for SnrEstimator {
    fn default() -> Self {
        Self::IntensityWindow
    }
}

impl SnrEstimator {
    /// Estimate the signal-to-noise ratio of the peak spanning `left..=right` of the trace.
    ///
    /// The result never exceeds `cap`, and a noise level of zero yields `cap` itself.
    pub fn estimate(&self, x: &[f64], signal: &[f32], left: usize, right: usize, cap: f64) -> f64 {
        if signal.is_empty() || left > right || right >= signal.len() {
            return 0.0;
        }
        let snr = match self {
            Self::IntensityWindow => intensity_window_snr(signal, left, right, cap),
            Self::WaveletCoefficient {
                multiplier,
                use_absolute,
            } => wavelet_snr(x, signal, left, right, *multiplier, *use_absolute, cap),
        };
        if snr.is_nan() {
            0.0
        } else {
            snr.min(cap)
        }
    }
}

fn ratio_or_cap(signal: f64, noise: Option<f64>, cap: f64) -> f64 {
    match noise {
        Some(noise) if noise > 0.0 => signal / noise,
        _ => cap,
    }
}

fn intensity_window_snr(signal: &[f32], left: usize, right: usize, cap: f64) -> f64 {
    let apex = signal[left..=right]
        .iter()
        .copied()
        .fold(0.0f32, f32::max) as f64;
    let width = right - left + 1;

    let flank_lo = left.saturating_sub(width);
    let flank_hi = (right + width).min(signal.len() - 1);
    let flanks: Vec<f64> = signal[flank_lo..left]
        .iter()
        .chain(signal[(right + 1).min(signal.len())..=flank_hi].iter())
        .map(|v| *v as f64)
        .collect();
    let flanking = ratio_or_cap(apex, mean(&flanks), cap);

    let mut window_means: Vec<f64> = signal[..left]
        .chunks(width)
        .chain(signal[(right + 1).min(signal.len())..].chunks(width))
        .filter(|w| w.len() == width)
        .filter_map(|w| {
            let w: Vec<f64> = w.iter().map(|v| *v as f64).collect();
            mean(&w)
        })
        .collect();
    let swept = ratio_or_cap(apex, median(&mut window_means), cap);

    flanking.max(swept)
}

/// The half width at half maximum of the peak in `left..=right`, no narrower than half the
/// trace's sampling interval
fn half_width_at_half_max(x: &[f64], signal: &[f32], left: usize, right: usize) -> f64 {
    let (apex, height) = signal[left..=right]
        .iter()
        .copied()
        .enumerate()
        .fold((0, f32::NEG_INFINITY), |(bi, bh), (i, h)| {
            if h > bh {
                (i, h)
            } else {
                (bi, bh)
            }
        });
    let apex = apex + left;
    let half = height / 2.0;
    let mut lo = apex;
    while lo > left && signal[lo - 1] >= half {
        lo -= 1;
    }
    let mut hi = apex;
    while hi < right && signal[hi + 1] >= half {
        hi += 1;
    }
    let floor = median_spacing(x) / 2.0;
    ((x[hi] - x[lo]) / 2.0).max(floor)
}

fn wavelet_snr(
    x: &[f64],
    signal: &[f32],
    left: usize,
    right: usize,
    multiplier: f64,
    use_absolute: bool,
    cap: f64,
) -> f64 {
    let hwhm = half_width_at_half_max(x, signal, left, right);
    let reach = multiplier.max(0.0) * hwhm;
    let lo = x.partition_point(|v| *v < x[left] - reach).min(left);
    let hi = x
        .partition_point(|v| *v <= x[right] + reach)
        .saturating_sub(1)
        .max(right);

    let transform = WaveletTransform::compute_signed(&x[lo..=hi], &signal[lo..=hi], &[hwhm]);
    let coefficients = transform.row(0);
    let (inner_lo, inner_hi) = (left - lo, right - lo);
    let peak_signal = coefficients[inner_lo..=inner_hi]
        .iter()
        .copied()
        .fold(f64::NEG_INFINITY, f64::max);
    if peak_signal <= 0.0 {
        return 0.0;
    }
    let outside: Vec<f64> = coefficients[..inner_lo]
        .iter()
        .chain(coefficients[inner_hi + 1..].iter())
        .map(|c| if use_absolute { c.abs() } else { *c })
        .collect();
    ratio_or_cap(peak_signal, mean(&outside), cap)
}
