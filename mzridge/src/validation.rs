//! The checks a ridge candidate must pass to become a [`PeakInfo`].
//!
//! The stages run in a fixed order and the first failure rejects the candidate, so
//! the expensive signal-to-noise and area estimates are only computed for candidates
//! that already look like peaks.
use std::fmt::Display;

use thiserror::Error;
use tracing::trace;

use crate::params::{DetectionParameters, Parameters};
use crate::peak::PeakInfo;
use crate::ridge::RidgeCandidate;
use crate::stats::trapezoid_area;
use crate::trace::Trace;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum ValidationStage {
    Height,
    BoundaryCorrection,
    Width,
    ZeroCrop,
    ZeroRatio,
    SignalToNoise,
    Sharpness,
    CoefficientArea,
}

impl ValidationStage {
    pub const ALL: [ValidationStage; 8] = [
        Self::Height,
        Self::BoundaryCorrection,
        Self::Width,
        Self::ZeroCrop,
        Self::ZeroRatio,
        Self::SignalToNoise,
        Self::Sharpness,
        Self::CoefficientArea,
    ];

    pub const fn index(&self) -> usize {
        *self as usize
    }
}

impl Display for ValidationStage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Self::Height => "height",
            Self::BoundaryCorrection => "boundary correction",
            Self::Width => "width",
            Self::ZeroCrop => "zero crop",
            Self::ZeroRatio => "zero ratio",
            Self::SignalToNoise => "signal-to-noise",
            Self::Sharpness => "sharpness",
            Self::CoefficientArea => "coefficient over area",
        };
        f.write_str(name)
    }
}

/// A candidate failed a stage of validation
#[derive(Debug, Clone, Copy, PartialEq, Error)]
#[error("Candidate rejected at the {stage} stage")]
pub struct Rejection {
    pub stage: ValidationStage,
}

/// How many candidates reached and failed each stage
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ValidationStats {
    reached: [usize; 8],
    rejected: [usize; 8],
    pub accepted: usize,
}

impl ValidationStats {
    pub fn reached(&self, stage: ValidationStage) -> usize {
        self.reached[stage.index()]
    }

    pub fn rejected(&self, stage: ValidationStage) -> usize {
        self.rejected[stage.index()]
    }

    /// The number of candidates validated
    pub fn total(&self) -> usize {
        self.reached(ValidationStage::Height)
    }

    pub fn merge(&mut self, other: &ValidationStats) {
        for i in 0..ValidationStage::ALL.len() {
            self.reached[i] += other.reached[i];
            self.rejected[i] += other.rejected[i];
        }
        self.accepted += other.accepted;
    }

    fn enter(&mut self, stage: ValidationStage) {
        self.reached[stage.index()] += 1;
    }

    fn reject(&mut self, stage: ValidationStage) -> Rejection {
        self.rejected[stage.index()] += 1;
        Rejection { stage }
    }
}

/// Move a left bound to the nearest local minimum: trim inward while the signal falls
/// toward the apex, otherwise extend outward while it keeps falling and has not yet
/// reached `baseline`. The bound never passes `apex`.
pub fn fix_left_boundary(signal: &[f32], left: usize, apex: usize, baseline: f32) -> usize {
    let mut left = left.min(apex);
    if left < apex && signal[left + 1] < signal[left] {
        while left < apex && signal[left + 1] < signal[left] {
            left += 1;
        }
    } else {
        while left > 0 && signal[left] > baseline && signal[left - 1] < signal[left] {
            left -= 1;
        }
    }
    left
}

/// The mirror of [`fix_left_boundary`]
pub fn fix_right_boundary(signal: &[f32], right: usize, apex: usize, baseline: f32) -> usize {
    let mut right = right.max(apex);
    let last = signal.len().saturating_sub(1);
    if right > apex && signal[right - 1] < signal[right] {
        while right > apex && signal[right - 1] < signal[right] {
            right -= 1;
        }
    } else {
        while right < last && signal[right] > baseline && signal[right + 1] < signal[right] {
            right += 1;
        }
    }
    right
}

/// The index of the first largest value in `signal[left..=right]`
fn argmax(signal: &[f32], left: usize, right: usize) -> usize {
    let mut best = left;
    for i in left..=right {
        if signal[i] > signal[best] {
            best = i;
        }
    }
    best
}

/// Applies the validation stages with one set of parameters
#[derive(Debug, Clone, Copy)]
pub struct PeakValidator<'a> {
    config: &'a DetectionParameters,
    params: &'a Parameters,
}

impl<'a> PeakValidator<'a> {
    pub fn new(config: &'a DetectionParameters, params: &'a Parameters) -> Self {
        Self { config, params }
    }

    fn width_ok(&self, times: &[f64], left: usize, right: usize) -> bool {
        let width = times[right] - times[left];
        self.params.min_peak_width <= width && width <= self.params.max_peak_width
    }

    /// Run every stage over `candidate` within `trace`, counting into `stats`
    pub fn validate(
        &self,
        trace: &Trace,
        candidate: &RidgeCandidate,
        stats: &mut ValidationStats,
    ) -> Result<PeakInfo, Rejection> {
        use ValidationStage::*;

        let signal = &trace.intensities;
        let times = &trace.times;
        if candidate.right >= signal.len() || candidate.left > candidate.right {
            stats.enter(Height);
            return Err(stats.reject(Height));
        }
        let (mut left, mut right) = (candidate.left, candidate.right);

        stats.enter(Height);
        let apex = argmax(signal, left, right);
        if signal[apex] < self.config.minimum_feature_height {
            return Err(stats.reject(Height));
        }

        stats.enter(BoundaryCorrection);
        left = fix_left_boundary(signal, left, apex, self.config.zero_intensity_threshold);
        right = fix_right_boundary(signal, right, apex, self.config.zero_intensity_threshold);
        if left >= right {
            return Err(stats.reject(BoundaryCorrection));
        }

        stats.enter(Width);
        if !self.width_ok(times, left, right) {
            return Err(stats.reject(Width));
        }

        stats.enter(ZeroCrop);
        let first_nonzero = (left..=right).find(|i| signal[*i] > 0.0);
        let last_nonzero = (left..=right).rev().find(|i| signal[*i] > 0.0);
        match (first_nonzero, last_nonzero) {
            (Some(first), Some(last)) => {
                left = left.max(first.saturating_sub(1));
                right = right.min(last + 1);
            }
            _ => return Err(stats.reject(ZeroCrop)),
        }
        if left >= right || !self.width_ok(times, left, right) {
            return Err(stats.reject(ZeroCrop));
        }

        stats.enter(ZeroRatio);
        let n_zero = signal[left..=right]
            .iter()
            .filter(|v| **v <= self.config.zero_intensity_threshold)
            .count();
        let n_nonzero = (right - left + 1) - n_zero;
        if n_zero >= n_nonzero {
            return Err(stats.reject(ZeroRatio));
        }

        stats.enter(SignalToNoise);
        let snr = self
            .config
            .snr_estimator
            .estimate(times, signal, left, right, self.config.snr_cap);
        if snr < self.config.snr_threshold {
            return Err(stats.reject(SignalToNoise));
        }

        stats.enter(Sharpness);
        let inner = &signal[left..=right];
        let mean_inner = inner.iter().map(|v| *v as f64).sum::<f64>() / inner.len() as f64;
        let mean_boundary = (signal[left] as f64 + signal[right] as f64) / 2.0;
        let sharpness = (mean_inner - mean_boundary) / self.config.minimum_feature_height as f64;
        if sharpness.is_nan() || sharpness < self.config.sharpness_threshold {
            return Err(stats.reject(Sharpness));
        }

        stats.enter(CoefficientArea);
        let area = trapezoid_area(&times[left..=right], &signal[left..=right]);
        let coeff_over_area = if area > 0.0 {
            candidate.coefficient / area
        } else {
            0.0
        };
        if area <= 0.0 || coeff_over_area < self.params.coef_area_ratio_tolerance {
            return Err(stats.reject(CoefficientArea));
        }

        stats.accepted += 1;
        let apex = argmax(signal, left, right);
        let peak = PeakInfo {
            mz: trace.mz,
            mz_bin: trace.mz_bin,
            lower_scan_bound: trace.scan_number(left),
            upper_scan_bound: trace.scan_number(right),
            max_height: signal[apex],
            max_height_scan_number: trace.scan_number(apex),
            ret_time_start: times[left],
            ret_time_end: times[right],
            signal_to_noise_ratio: snr,
            coeff_over_area,
        };
        trace!("Accepted {peak:?}");
        Ok(peak)
    }
}

#[cfg(test)]
mod test {
    use super::*;

    fn gaussian_trace(n: usize, center: f64, sigma: f64, height: f32) -> Trace {
        let times: Vec<f64> = (0..n).map(|i| i as f64).collect();
        let intensities = times
            .iter()
            .map(|t| height * (-(t - center).powi(2) / (2.0 * sigma * sigma)).exp() as f32)
            .collect();
        Trace {
            mz_bin: 1234567,
            mz: 123.4567,
            scan_lo: 100,
            times,
            intensities,
        }
    }

    fn trace_of(intensities: Vec<f32>) -> Trace {
        Trace {
            mz_bin: 1,
            mz: 0.0001,
            scan_lo: 0,
            times: (0..intensities.len()).map(|i| i as f64).collect(),
            intensities,
        }
    }

    fn candidate(left: usize, right: usize) -> RidgeCandidate {
        RidgeCandidate {
            left,
            right,
            coefficient: 900.0,
            center: (left + right) / 2,
            scale: 3.0,
        }
    }

    fn lenient() -> Parameters {
        Parameters {
            large_scale_in: 10.0,
            small_scale_in: 1.0,
            min_peak_width: 3.0,
            max_peak_width: 60.0,
            coef_area_ratio_tolerance: 0.0,
        }
    }

    #[test]
    fn test_fix_boundaries() {
        //            0    1    2    3    4    5    6    7    8    9
        let signal = [0.0, 1.0, 5.0, 3.0, 8.0, 20.0, 9.0, 2.0, 4.0, 0.0];
        // A shoulder inside the bound is trimmed to the valley
        assert_eq!(fix_left_boundary(&signal, 2, 5, 0.0), 3);
        // A bound on the rising edge extends outward to the floor
        assert_eq!(fix_left_boundary(&signal, 1, 5, 0.0), 0);
        assert_eq!(fix_left_boundary(&signal, 1, 5, 1.0), 1);
        assert_eq!(fix_right_boundary(&signal, 8, 5, 0.0), 7);
        assert_eq!(fix_right_boundary(&signal, 6, 5, 0.0), 7);
        // Never past the apex
        assert_eq!(fix_left_boundary(&signal, 7, 5, 0.0), 3);
        assert_eq!(fix_right_boundary(&signal, 3, 5, 0.0), 7);
    }

    #[test]
    fn test_accepts_clean_peak() {
        let config = DetectionParameters::default();
        let params = lenient();
        let validator = PeakValidator::new(&config, &params);
        let trace = gaussian_trace(100, 50.0, 2.0, 1000.0);
        let mut stats = ValidationStats::default();
        let peak = validator.validate(&trace, &candidate(44, 56), &mut stats).unwrap();
        assert_eq!(peak.max_height_scan_number, 150);
        assert_eq!(peak.mz_bin, 1234567);
        assert!(peak.lower_scan_bound <= peak.max_height_scan_number);
        assert!(peak.max_height_scan_number <= peak.upper_scan_bound);
        assert!(peak.width() >= params.min_peak_width && peak.width() <= params.max_peak_width);
        assert!(peak.signal_to_noise_ratio >= config.snr_threshold);
        assert!(peak.coeff_over_area > 0.0);
        assert_eq!(stats.accepted, 1);
        for stage in ValidationStage::ALL {
            assert_eq!(stats.reached(stage), 1);
            assert_eq!(stats.rejected(stage), 0);
        }
    }

    #[test]
    fn test_short_circuit() {
        let config = DetectionParameters {
            minimum_feature_height: 2000.0,
            ..Default::default()
        };
        let params = lenient();
        let validator = PeakValidator::new(&config, &params);
        let trace = gaussian_trace(100, 50.0, 2.0, 1000.0);
        let mut stats = ValidationStats::default();
        let err = validator
            .validate(&trace, &candidate(44, 56), &mut stats)
            .unwrap_err();
        assert_eq!(err.stage, ValidationStage::Height);
        assert_eq!(stats.reached(ValidationStage::Height), 1);
        assert_eq!(stats.rejected(ValidationStage::Height), 1);
        assert_eq!(stats.reached(ValidationStage::BoundaryCorrection), 0);
        assert_eq!(stats.accepted, 0);
    }

    #[test]
    fn test_width_rejection() {
        let config = DetectionParameters::default();
        let params = Parameters {
            max_peak_width: 5.0,
            ..lenient()
        };
        let validator = PeakValidator::new(&config, &params);
        let trace = gaussian_trace(100, 50.0, 2.0, 1000.0);
        let mut stats = ValidationStats::default();
        let err = validator
            .validate(&trace, &candidate(44, 56), &mut stats)
            .unwrap_err();
        assert_eq!(err.stage, ValidationStage::Width);
        assert_eq!(stats.reached(ValidationStage::ZeroCrop), 0);
    }

    #[test]
    fn test_zero_ratio_rejection() {
        let config = DetectionParameters::default();
        let params = lenient();
        let validator = PeakValidator::new(&config, &params);
        // A spike between zero-filled gaps and a near-zero plateau
        let mut intensities = vec![0.0f32; 30];
        for v in intensities[10..20].iter_mut() {
            *v = 0.5;
        }
        intensities[14] = 800.0;
        let trace = trace_of(intensities);
        let mut stats = ValidationStats::default();
        let err = validator
            .validate(&trace, &candidate(10, 19), &mut stats)
            .unwrap_err();
        assert_eq!(err.stage, ValidationStage::ZeroRatio);
        assert_eq!(stats.reached(ValidationStage::SignalToNoise), 0);
    }

    #[test]
    fn test_boundary_correction_rejection() {
        let config = DetectionParameters::default();
        let params = lenient();
        let validator = PeakValidator::new(&config, &params);
        // A one-scan candidate in the middle of a flat top cannot be widened
        let mut intensities = vec![0.0f32; 20];
        for v in intensities[4..=6].iter_mut() {
            *v = 800.0;
        }
        let trace = trace_of(intensities);
        let mut stats = ValidationStats::default();
        let err = validator
            .validate(&trace, &candidate(5, 5), &mut stats)
            .unwrap_err();
        assert_eq!(err.stage, ValidationStage::BoundaryCorrection);
        assert_eq!(stats.rejected(ValidationStage::BoundaryCorrection), 1);
        assert_eq!(stats.reached(ValidationStage::Width), 0);
    }

    #[test]
    fn test_zero_crop_rejection() {
        let config = DetectionParameters::default();
        let params = Parameters {
            min_peak_width: 5.0,
            ..lenient()
        };
        let validator = PeakValidator::new(&config, &params);
        // Wide enough with its zero padding, too narrow once the padding is cropped
        let mut intensities = vec![0.0f32; 40];
        intensities[14] = 500.0;
        intensities[15] = 800.0;
        intensities[16] = 500.0;
        let trace = trace_of(intensities);
        let mut stats = ValidationStats::default();
        let err = validator
            .validate(&trace, &candidate(10, 20), &mut stats)
            .unwrap_err();
        assert_eq!(err.stage, ValidationStage::ZeroCrop);
        assert_eq!(stats.reached(ValidationStage::Width), 1);
        assert_eq!(stats.rejected(ValidationStage::Width), 0);
        assert_eq!(stats.reached(ValidationStage::ZeroRatio), 0);
    }

    #[test]
    fn test_signal_to_noise_rejection() {
        let config = DetectionParameters::default();
        let params = lenient();
        let validator = PeakValidator::new(&config, &params);
        let mut trace = gaussian_trace(100, 50.0, 2.0, 1000.0);
        for v in trace.intensities.iter_mut() {
            *v += 600.0;
        }
        let mut stats = ValidationStats::default();
        let err = validator
            .validate(&trace, &candidate(44, 56), &mut stats)
            .unwrap_err();
        assert_eq!(err.stage, ValidationStage::SignalToNoise);
        assert_eq!(stats.reached(ValidationStage::ZeroRatio), 1);
        assert_eq!(stats.reached(ValidationStage::Sharpness), 0);
    }

    #[test]
    fn test_sharpness_rejection() {
        let config = DetectionParameters::default();
        let params = lenient();
        let validator = PeakValidator::new(&config, &params);
        // A low, flat bump on a broad pedestal, isolated within a long quiet trace
        let mut intensities = vec![0.0f32; 200];
        for v in intensities[10..50].iter_mut() {
            *v = 100.0;
        }
        for v in intensities[25..=35].iter_mut() {
            *v = 115.0;
        }
        let trace = trace_of(intensities);
        let mut stats = ValidationStats::default();
        let err = validator
            .validate(&trace, &candidate(25, 35), &mut stats)
            .unwrap_err();
        assert_eq!(err.stage, ValidationStage::Sharpness);
        assert_eq!(stats.reached(ValidationStage::SignalToNoise), 1);
        assert_eq!(stats.rejected(ValidationStage::SignalToNoise), 0);
        assert_eq!(stats.reached(ValidationStage::CoefficientArea), 0);
    }

    #[test]
    fn test_coefficient_area_rejection() {
        let config = DetectionParameters::default();
        let params = Parameters {
            coef_area_ratio_tolerance: 10.0,
            ..lenient()
        };
        let validator = PeakValidator::new(&config, &params);
        let trace = gaussian_trace(100, 50.0, 2.0, 1000.0);
        let mut stats = ValidationStats::default();
        let err = validator
            .validate(&trace, &candidate(44, 56), &mut stats)
            .unwrap_err();
        assert_eq!(err.stage, ValidationStage::CoefficientArea);
        assert_eq!(stats.reached(ValidationStage::Sharpness), 1);

        let mut total = ValidationStats::default();
        total.merge(&stats);
        total.merge(&stats);
        assert_eq!(total.rejected(ValidationStage::CoefficientArea), 2);
        assert_eq!(total.total(), 2);
    }
}
