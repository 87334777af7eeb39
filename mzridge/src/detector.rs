//! The greedy, most-intense-first peak detection loop and its two pass calibration.
//!
//! The first pass runs with parameters derived from the sampling of the run and its
//! m/z peak width, stopping after a fixed number of accepted peaks. Their widths and
//! coefficient to area ratios then tune the parameters of the second pass, which runs
//! until no triplet above the minimum feature height remains.
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use identity_hash::BuildIdentityHasher;
use thiserror::Error;
use tracing::{debug, info, trace, warn};

use crate::fwhm::estimate_fwhm_mz;
use crate::index::{IndexError, MzBin, ScanNumber, TripletIndex};
use crate::params::{ConfigError, DetectionParameters, Parameters};
use crate::peak::PeakInfo;
use crate::ridge::RidgePeakFinder;
use crate::scan::Scan;
use crate::trace::Trace;
use crate::validation::{PeakValidator, ValidationStats};

#[derive(Debug, Error)]
pub enum DetectionError {
    #[error("Failed to index the scans: {0}")]
    Index(#[from] IndexError),
    #[error(transparent)]
    Config(#[from] ConfigError),
}

/// A shared flag a caller can raise to stop a detection run between iterations
#[derive(Debug, Clone, Default)]
pub struct CancellationToken(Arc<AtomicBool>);

impl CancellationToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::Release);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::Acquire)
    }
}

/// Counters for one pass of the extraction loop
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct PhaseStats {
    /// How many seeds were drawn from the index
    pub iterations: usize,
    pub accepted: usize,
    /// Seeds which yielded no peak and were removed on their own
    pub seeds_exhausted: usize,
    pub validation: ValidationStats,
}

#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct DetectionStats {
    pub calibration: PhaseStats,
    pub full: PhaseStats,
}

impl DetectionStats {
    pub fn iterations(&self) -> usize {
        self.calibration.iterations + self.full.iterations
    }

    /// Validation counters summed over both passes
    pub fn validation(&self) -> ValidationStats {
        let mut total = self.calibration.validation;
        total.merge(&self.full.validation);
        total
    }
}

/// Everything a completed detection run produced
#[derive(Debug, Clone)]
pub struct DetectionOutcome {
    /// The first pass peaks followed by the second pass peaks
    pub peaks: Vec<PeakInfo>,
    /// How many of `peaks` came from the first pass
    pub calibration_peak_count: usize,
    pub initial_parameters: Parameters,
    /// The parameters of the second pass
    pub parameters: Parameters,
    pub fwhm_mz: f64,
    pub stats: DetectionStats,
}

type ConsumedRanges = HashMap<MzBin, Vec<(ScanNumber, ScanNumber)>, BuildIdentityHasher<MzBin>>;

/// Finds peaks in a [`TripletIndex`], consuming their triplets as it goes
#[derive(Debug, Clone, Default)]
pub struct PeakDetector {
    config: DetectionParameters,
}

impl PeakDetector {
    pub fn new(config: DetectionParameters) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &DetectionParameters {
        &self.config
    }

    /// Run both passes over `index`.
    ///
    /// Returns `Ok(None)` if `cancel` was raised before the run finished. The triplets
    /// of every accepted peak are left marked removed in `index`.
    pub fn detect(
        &self,
        index: &mut TripletIndex,
        cancel: &CancellationToken,
    ) -> Result<Option<DetectionOutcome>, DetectionError> {
        self.config.validate()?;
        let previous_floor = index.intensity_floor();
        index.set_intensity_floor(self.config.minimum_feature_height);
        let outcome = self.run(index, cancel);
        index.set_intensity_floor(previous_floor);
        Ok(outcome)
    }

    fn run(
        &self,
        index: &mut TripletIndex,
        cancel: &CancellationToken,
    ) -> Option<DetectionOutcome> {
        let scan_interval = index.median_scan_interval();
        let min_scale = self.config.min_scale(scan_interval);
        let mut params = Parameters::initial(&self.config, scan_interval);

        let fwhm_mz = estimate_fwhm_mz(index, self.config.fwhm_sample_size);
        let rounded_fwhm = index.bin_to_mz(index.round_mz(fwhm_mz));
        params.seed_small_scale(rounded_fwhm, self.config.fwhm_scale_multiplier, min_scale);
        let initial_parameters = params;
        debug!(
            "Starting calibration pass over {} triplets with FWHM {fwhm_mz:0.5} \
             (scan interval {scan_interval:0.4}): {params:?}",
            index.remaining()
        );

        let mut peaks = Vec::new();
        let mut rejected_seeds = Vec::new();
        let calibration = self.run_phase(
            index,
            &params,
            Some(self.config.calibration_peak_count),
            cancel,
            &mut peaks,
            Some(&mut rejected_seeds),
        )?;
        let calibration_peak_count = peaks.len();
        debug!(
            "Calibration pass accepted {} peaks from {} seeds",
            calibration.accepted, calibration.iterations
        );

        match params.calibrate(&peaks, &self.config, scan_interval) {
            Some(calibrated) => params = calibrated,
            None => {
                warn!("No peaks accepted in the calibration pass, keeping the initial parameters")
            }
        }

        let n_restored = self.restore_rejected_seeds(index, &peaks, &rejected_seeds);
        debug!(
            "Starting full pass with {n_restored} seeds restored, \
             {} triplets remaining: {params:?}",
            index.remaining()
        );
        let full = self.run_phase(index, &params, None, cancel, &mut peaks, None)?;

        let stats = DetectionStats { calibration, full };
        info!(
            "Detected {} peaks ({calibration_peak_count} while calibrating) over {} iterations",
            peaks.len(),
            stats.iterations()
        );
        Some(DetectionOutcome {
            peaks,
            calibration_peak_count,
            initial_parameters,
            parameters: params,
            fwhm_mz,
            stats,
        })
    }

    /// Seeds the first pass gave up on get another chance under the calibrated
    /// parameters, unless a first pass peak consumed them since.
    fn restore_rejected_seeds(
        &self,
        index: &mut TripletIndex,
        peaks: &[PeakInfo],
        rejected_seeds: &[(ScanNumber, MzBin)],
    ) -> usize {
        let mut consumed = ConsumedRanges::default();
        for peak in peaks {
            consumed
                .entry(peak.mz_bin)
                .or_default()
                .push((peak.lower_scan_bound, peak.upper_scan_bound));
        }
        let mut n = 0;
        for (scan_number, mz_bin) in rejected_seeds.iter().copied() {
            let is_consumed = consumed.get(&mz_bin).is_some_and(|ranges| {
                ranges
                    .iter()
                    .any(|(lo, hi)| *lo <= scan_number && scan_number <= *hi)
            });
            if !is_consumed && index.restore_triplet(scan_number, mz_bin) {
                n += 1;
            }
        }
        n
    }

    /// Draw seeds from `index` until it is exhausted or `limit` peaks were accepted,
    /// appending accepted peaks to `peaks`. Returns `None` if cancelled.
    fn run_phase(
        &self,
        index: &mut TripletIndex,
        params: &Parameters,
        limit: Option<usize>,
        cancel: &CancellationToken,
        peaks: &mut Vec<PeakInfo>,
        mut rejected_seeds: Option<&mut Vec<(ScanNumber, MzBin)>>,
    ) -> Option<PhaseStats> {
        let scan_interval = index.median_scan_interval();
        let radius = ((params.max_peak_width / scan_interval).ceil() as ScanNumber).max(1);
        let finder = RidgePeakFinder::new(self.config.ridge);
        let validator = PeakValidator::new(&self.config, params);
        let mut stats = PhaseStats::default();

        loop {
            if cancel.is_cancelled() {
                debug!("Detection cancelled after {} iterations", stats.iterations);
                return None;
            }
            if limit.is_some_and(|limit| stats.accepted >= limit) {
                break;
            }
            let Some(seed) = index.extract_next_max_intensity() else {
                break;
            };
            stats.iterations += 1;
            let trace = index.trace_around(seed.mz_bin, seed.scan_number, radius);
            if tracing::enabled!(tracing::Level::TRACE) {
                trace!(
                    "Seed {} at {:0.4}@{} with intensity {:0.2}, trace of {} scans",
                    stats.iterations,
                    trace.mz,
                    seed.scan_number,
                    seed.intensity,
                    trace.len()
                );
            }

            match self.find_peak(
                &trace,
                seed.scan_number,
                params,
                &finder,
                &validator,
                &mut stats.validation,
            ) {
                Some(peak) => {
                    let n_removed = index.remove_range(
                        peak.mz_bin,
                        peak.lower_scan_bound,
                        peak.upper_scan_bound,
                    );
                    if n_removed == 0 {
                        index.remove_triplet(seed.scan_number, seed.mz_bin);
                    }
                    peaks.push(peak);
                    stats.accepted += 1;
                }
                None => {
                    index.remove_triplet(seed.scan_number, seed.mz_bin);
                    stats.seeds_exhausted += 1;
                    if let Some(seeds) = rejected_seeds.as_deref_mut() {
                        seeds.push((seed.scan_number, seed.mz_bin));
                    }
                }
            }
        }
        Some(stats)
    }

    /// Find the candidates in `trace` and return the first to pass validation, trying
    /// those containing the seed scan before the rest.
    pub fn find_peak(
        &self,
        trace: &Trace,
        seed_scan: ScanNumber,
        params: &Parameters,
        finder: &RidgePeakFinder,
        validator: &PeakValidator,
        stats: &mut ValidationStats,
    ) -> Option<PeakInfo> {
        let candidates = finder.find_peaks(
            &trace.times,
            &trace.intensities,
            params.small_scale_in,
            params.large_scale_in,
        );
        let seed = trace.position_of(seed_scan);
        let (containing, rest): (Vec<_>, Vec<_>) = candidates
            .into_iter()
            .partition(|c| seed.is_some_and(|s| c.left <= s && s <= c.right));
        containing
            .iter()
            .chain(rest.iter())
            .find_map(|candidate| match validator.validate(trace, candidate, stats) {
                Ok(peak) => Some(peak),
                Err(rejection) => {
                    trace!("{candidate:?} at {:0.4}: {rejection}", trace.mz);
                    None
                }
            })
    }
}

/// Index `scans` and run a complete detection over them with `config`
pub fn detect_peaks(
    scans: &[Scan],
    config: &DetectionParameters,
) -> Result<Vec<PeakInfo>, DetectionError> {
    let mut index = TripletIndex::build_with_scale_factor(scans, config.mz_scale_factor)?;
    let detector = PeakDetector::new(config.clone());
    let outcome = detector.detect(&mut index, &CancellationToken::new())?;
    Ok(outcome.map(|o| o.peaks).unwrap_or_default())
}
