//! Small numeric helpers shared by the signal processing modules
use num_traits::Float;

/// The median of `values`, sorting them in place
pub(crate) fn median<T: Float>(values: &mut [T]) -> Option<T> {
    if values.is_empty() {
        return None;
    }
    values.sort_by(|a, b| a.partial_cmp(b).unwrap_or(std::cmp::Ordering::Equal));
    let n = values.len();
    let two = T::one() + T::one();
    if n % 2 == 1 {
        Some(values[n / 2])
    } else {
        Some((values[n / 2 - 1] + values[n / 2]) / two)
    }
}

pub(crate) fn mean<T: Float>(values: &[T]) -> Option<T> {
    if values.is_empty() {
        return None;
    }
    let total = values.iter().fold(T::zero(), |acc, v| acc + *v);
    T::from(values.len()).map(|n| total / n)
}

/// The trapezoid-rule area under `signal` sampled at `x`
pub(crate) fn trapezoid_area(x: &[f64], signal: &[f32]) -> f64 {
    x.windows(2)
        .zip(signal.windows(2))
        .map(|(xs, ys)| (xs[1] - xs[0]) * (ys[0] as f64 + ys[1] as f64) / 2.0)
        .sum()
}

/// The median spacing between consecutive, strictly increasing positions, or 1.0 if there are none
pub(crate) fn median_spacing(x: &[f64]) -> f64 {
    let mut deltas: Vec<f64> = x
        .windows(2)
        .map(|w| w[1] - w[0])
        .filter(|d| *d > 0.0)
        .collect();
    median(&mut deltas).unwrap_or(1.0)
}
