//! Detection tunables and their layered configuration.
//!
//! [`DetectionParameters`] holds every knob the detector consults and is read through
//! [`figment`], so defaults can be overridden by a TOML document and then by
//! `MZRIDGE_`-prefixed environment variables. [`Parameters`] holds the subset the
//! detector recalibrates from the data between its two passes.
use figment::{
    providers::{Env, Format, Serialized, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::debug;

use crate::index::DEFAULT_MZ_SCALE_FACTOR;
use crate::peak::PeakInfo;
use crate::ridge::RidgeParams;
use crate::snr::SnrEstimator;
use crate::stats::mean;

/// The prefix of environment variables read by [`DetectionParameters::figment`]
pub const ENV_PREFIX: &str = "MZRIDGE_";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read detection parameters: {0}")]
    Extraction(#[from] figment::Error),
    #[error("Invalid value for {field}: {reason}")]
    InvalidValue { field: &'static str, reason: String },
}

/// The parameters the detector recalibrates after its first pass. All values are in the
/// retention time units of the scans, except the coefficient to area ratio which is in
/// their reciprocal.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Parameters {
    /// The largest wavelet scale evaluated
    pub large_scale_in: f64,
    /// The smallest wavelet scale evaluated
    pub small_scale_in: f64,
    pub min_peak_width: f64,
    pub max_peak_width: f64,
    pub coef_area_ratio_tolerance: f64,
}

impl Parameters {
    /// The first pass parameters for a run sampled every `scan_interval` time units
    pub fn initial(config: &DetectionParameters, scan_interval: f64) -> Self {
        let large_scale_in = config.initial_large_scale_scans * scan_interval;
        let min_scale = config.min_scale(scan_interval);
        Self {
            large_scale_in,
            small_scale_in: min_scale.min(large_scale_in),
            min_peak_width: config.initial_min_peak_scans * scan_interval,
            max_peak_width: config.initial_max_peak_scans * scan_interval,
            coef_area_ratio_tolerance: config.initial_coef_area_ratio_tolerance,
        }
    }

    /// Seed the lower end of the scale range from the run's m/z peak width
    pub fn seed_small_scale(
        &mut self,
        rounded_fwhm_mz: f64,
        fwhm_scale_multiplier: f64,
        min_scale: f64,
    ) {
        let upper = (self.large_scale_in / 2.0).max(min_scale);
        self.small_scale_in = (rounded_fwhm_mz * fwhm_scale_multiplier).clamp(min_scale, upper);
    }

    /// Derive the second pass parameters from the peaks accepted by the first.
    ///
    /// Returns `None` if `peaks` is empty, in which case the current values should be kept.
    pub fn calibrate(
        &self,
        peaks: &[PeakInfo],
        config: &DetectionParameters,
        scan_interval: f64,
    ) -> Option<Self> {
        let widths: Vec<f64> = peaks.iter().map(|p| p.width()).collect();
        let average_width = mean(&widths)?;
        let max_width = widths.iter().copied().fold(0.0, f64::max);
        let ratios: Vec<f64> = peaks.iter().map(|p| p.coeff_over_area).collect();
        let average_ratio = mean(&ratios)?;

        let margin = config.width_margin * average_width;
        let large_scale_in = (average_width / 2.0).max(config.min_scale(scan_interval));
        let min_peak_width = average_width - margin;
        let small_scale_in = (min_peak_width / 2.0)
            .max(config.min_scale(scan_interval))
            .min(large_scale_in);
        let calibrated = Self {
            large_scale_in,
            small_scale_in,
            min_peak_width,
            max_peak_width: max_width + margin,
            coef_area_ratio_tolerance: average_ratio / config.coef_area_divisor,
        };
        debug!(
            "Calibrated from {} peaks (average width {average_width:0.3}, \
             max width {max_width:0.3}): {calibrated:?}",
            peaks.len()
        );
        Some(calibrated)
    }
}

/// Every tunable of a detection run
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DetectionParameters {
    /// The least apex intensity a peak may have. Triplets below it never seed a trace.
    pub minimum_feature_height: f32,
    pub snr_threshold: f64,
    pub snr_estimator: SnrEstimator,
    /// Ratios above this are clamped
    pub snr_cap: f64,
    /// Intensities at or below this count as zero when checking a peak's zero ratio
    pub zero_intensity_threshold: f32,
    /// The least value of
    /// `(mean inner intensity - mean boundary intensity) / minimum_feature_height`
    pub sharpness_threshold: f64,
    /// How many peaks the first pass accepts before calibrating
    pub calibration_peak_count: usize,
    /// The fraction of the average width the calibrated width bounds are widened by
    pub width_margin: f64,
    /// The average coefficient to area ratio is divided by this to get the calibrated tolerance
    pub coef_area_divisor: f64,
    /// How many scans are sampled to estimate the m/z peak width, all of them if unset
    pub fwhm_sample_size: Option<usize>,
    /// Time units per m/z unit used to turn the m/z peak width into the smallest first pass scale
    pub fwhm_scale_multiplier: f64,
    /// The smallest scale ever evaluated, in scan intervals
    pub min_scale_scans: f64,
    pub initial_large_scale_scans: f64,
    pub initial_min_peak_scans: f64,
    pub initial_max_peak_scans: f64,
    pub initial_coef_area_ratio_tolerance: f64,
    /// Bins per m/z unit
    pub mz_scale_factor: f64,
    pub ridge: RidgeParams,
}

impl Default for DetectionParameters {
    fn default() -> Self {
        Self {
            minimum_feature_height: 100.0,
            snr_threshold: 3.0,
            snr_estimator: SnrEstimator::default(),
            snr_cap: 1e12,
            zero_intensity_threshold: 1.0,
            sharpness_threshold: 0.2,
            calibration_peak_count: 1000,
            width_margin: 0.75,
            coef_area_divisor: 1.5,
            fwhm_sample_size: Some(100),
            fwhm_scale_multiplier: 100.0,
            min_scale_scans: 1.0,
            initial_large_scale_scans: 10.0,
            initial_min_peak_scans: 3.0,
            initial_max_peak_scans: 60.0,
            initial_coef_area_ratio_tolerance: 0.0,
            mz_scale_factor: DEFAULT_MZ_SCALE_FACTOR,
            ridge: RidgeParams::default(),
        }
    }
}

impl DetectionParameters {
    /// The default parameters layered under `MZRIDGE_` environment variables
    pub fn figment() -> Figment {
        Figment::new()
            .merge(Serialized::defaults(Self::default()))
            .merge(Env::prefixed(ENV_PREFIX).split("__"))
    }

    /// The default parameters, overridden by a TOML document, then by the environment
    pub fn figment_with_toml(toml: &str) -> Figment {
        Figment::new()
            .merge(Serialized::defaults(Self::default()))
            .merge(Toml::string(toml))
            .merge(Env::prefixed(ENV_PREFIX).split("__"))
    }

    /// Extract and check parameters from any figment
    pub fn from_figment(config: &Figment) -> Result<Self, ConfigError> {
        let params: Self = config.extract()?;
        params.validate()?;
        Ok(params)
    }

    pub fn from_toml(toml: &str) -> Result<Self, ConfigError> {
        Self::from_figment(&Self::figment_with_toml(toml))
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        fn positive(field: &'static str, value: f64) -> Result<(), ConfigError> {
            if value.is_finite() && value > 0.0 {
                Ok(())
            } else {
                Err(ConfigError::InvalidValue {
                    field,
                    reason: format!("{value} must be a positive number"),
                })
            }
        }

        if self.minimum_feature_height.is_nan() || self.minimum_feature_height < 0.0 {
            return Err(ConfigError::InvalidValue {
                field: "minimum_feature_height",
                reason: format!("{} must not be negative", self.minimum_feature_height),
            });
        }
        positive("snr_cap", self.snr_cap)?;
        positive("coef_area_divisor", self.coef_area_divisor)?;
        positive("mz_scale_factor", self.mz_scale_factor)?;
        positive("min_scale_scans", self.min_scale_scans)?;
        positive("initial_large_scale_scans", self.initial_large_scale_scans)?;
        positive("initial_max_peak_scans", self.initial_max_peak_scans)?;
        if !(0.0..1.0).contains(&self.width_margin) {
            return Err(ConfigError::InvalidValue {
                field: "width_margin",
                reason: format!("{} must lie in [0, 1)", self.width_margin),
            });
        }
        if self.initial_min_peak_scans > self.initial_max_peak_scans {
            return Err(ConfigError::InvalidValue {
                field: "initial_min_peak_scans",
                reason: format!(
                    "{} exceeds initial_max_peak_scans {}",
                    self.initial_min_peak_scans, self.initial_max_peak_scans
                ),
            });
        }
        if let SnrEstimator::WaveletCoefficient { multiplier, .. } = self.snr_estimator {
            positive("snr_estimator.multiplier", multiplier)?;
        }
        Ok(())
    }

    /// The smallest scale ever evaluated for a run sampled every `scan_interval` time units
    pub fn min_scale(&self, scan_interval: f64) -> f64 {
        self.min_scale_scans * scan_interval
    }
}
