//! A continuous wavelet transform over irregularly sampled traces using the Mexican hat
//! (Ricker) wavelet.
//!
//! Traces built from an LC-MS run are not guaranteed to be evenly spaced in time, so
//! the convolution integrates the kernel over the actual sample positions with trapezoid
//! weights instead of assuming a unit step.
//!
//! ```math
//! C(s, x_i) = \frac{1}{s} \sum_j y_j\, \psi\left(\frac{x_j - x_i}{s}\right) w_j
//! \qquad \psi(t) = (1 - t^2) e^{-t^2 / 2}
//! ```

/// The number of scales evaluated between the lower and upper bound of a scale range
pub const SCALE_COUNT: usize = 10;

/// Beyond this many scale units the kernel is treated as zero
const KERNEL_SUPPORT: f64 = 5.0;

#[inline]
pub fn mexican_hat(t: f64) -> f64 {
    let t2 = t * t;
    (1.0 - t2) * (-t2 / 2.0).exp()
}

/// [`SCALE_COUNT`] scales from `scale_lo` to `scale_hi` inclusive in equal steps.
///
/// The bounds are swapped if given in the wrong order.
pub fn scale_ladder(scale_lo: f64, scale_hi: f64) -> [f64; SCALE_COUNT] {
    let (lo, hi) = if scale_lo <= scale_hi {
        (scale_lo, scale_hi)
    } else {
        (scale_hi, scale_lo)
    };
    let step = (hi - lo) / (SCALE_COUNT - 1) as f64;
    let mut scales = [lo; SCALE_COUNT];
    for (k, s) in scales.iter_mut().enumerate() {
        *s = lo + step * k as f64;
    }
    scales[SCALE_COUNT - 1] = hi;
    scales
}

/// Trapezoid integration weights for each sample position
fn sample_weights(x: &[f64]) -> Vec<f64> {
    let n = x.len();
    match n {
        0 => Vec::new(),
        1 => vec![1.0],
        _ => (0..n)
            .map(|i| {
                let left = if i > 0 { x[i] - x[i - 1] } else { 0.0 };
                let right = if i + 1 < n { x[i + 1] - x[i] } else { 0.0 };
                (left + right) / 2.0
            })
            .collect(),
    }
}

/// Compute the coefficients of a single scale for every sample of the trace into `out`
pub fn transform_at_scale(
    x: &[f64],
    signal: &[f32],
    weights: &[f64],
    scale: f64,
    out: &mut Vec<f64>,
) {
    out.clear();
    if scale <= 0.0 {
        out.resize(x.len(), 0.0);
        return;
    }
    let reach = KERNEL_SUPPORT * scale;
    for xi in x.iter().copied() {
        let start = x.partition_point(|v| *v < xi - reach);
        let end = x.partition_point(|v| *v <= xi + reach);
        let mut acc = 0.0;
        for j in start..end {
            acc += signal[j] as f64 * mexican_hat((x[j] - xi) / scale) * weights[j];
        }
        out.push(acc / scale);
    }
}

/// The coefficient surface of one trace, one row per scale
#[derive(Debug, Clone, Default)]
pub struct WaveletTransform {
    pub scales: Vec<f64>,
    pub coefficients: Vec<Vec<f64>>,
}

impl WaveletTransform {
    /// Transform `signal` sampled at `x` at each of `scales`, clamping negative
    /// coefficients to zero so only peak-like responses remain.
    pub fn compute(x: &[f64], signal: &[f32], scales: &[f64]) -> Self {
        let mut this = Self::compute_signed(x, signal, scales);
        this.coefficients
            .iter_mut()
            .flatten()
            .for_each(|c| *c = c.max(0.0));
        this
    }

    /// As [`WaveletTransform::compute`], but keeping negative coefficients
    pub fn compute_signed(x: &[f64], signal: &[f32], scales: &[f64]) -> Self {
        debug_assert_eq!(x.len(), signal.len());
        let weights = sample_weights(x);
        let coefficients = scales
            .iter()
            .map(|s| {
                let mut row = Vec::with_capacity(x.len());
                transform_at_scale(x, signal, &weights, *s, &mut row);
                row
            })
            .collect();
        Self {
            scales: scales.to_vec(),
            coefficients,
        }
    }

    pub fn n_scales(&self) -> usize {
        self.scales.len()
    }

    pub fn n_samples(&self) -> usize {
        self.coefficients.first().map(|r| r.len()).unwrap_or_default()
    }

    pub fn row(&self, scale_index: usize) -> &[f64] {
        &self.coefficients[scale_index]
    }

    /// The indices of the local maxima of one scale's row. A plateau contributes its
    /// first sample only.
    pub fn local_maxima(&self, scale_index: usize) -> Vec<usize> {
        let row = self.row(scale_index);
        let n = row.len();
        (0..n)
            .filter(|i| {
                let c = row[*i];
                let left = if *i > 0 { row[i - 1] } else { 0.0 };
                let right = if i + 1 < n { row[i + 1] } else { 0.0 };
                c > 0.0 && c > left && c >= right
            })
            .collect()
    }
}
