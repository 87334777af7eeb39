//! Estimate the typical m/z peak width of a run from a sample of its scans.
use mzsignal::peak_picker::PeakPicker;
use mzsignal::FittedPeak;
use tracing::debug;

use crate::index::{ScanNumber, TripletIndex};
use crate::stats::median;

/// The width reported when no scan contains a resolvable, isolated peak
pub const DEFAULT_FWHM_MZ: f64 = 0.01;

/// Peaks closer to a neighbor than this many of their own widths are not isolated
const ISOLATION_WIDTHS: f64 = 2.0;

/// Peaks below this fraction of their scan's base peak are baseline, not signal
const MIN_RELATIVE_INTENSITY: f32 = 0.05;

const MIN_SIGNAL_TO_NOISE: f32 = 3.0;

/// Widths at or beyond this span the gap between centroids rather than a profile peak
const MAX_FWHM_MZ: f64 = 0.5;

/// A picker that ignores everything below [`MIN_RELATIVE_INTENSITY`] of `base_peak`
fn picker_for(base_peak: f32) -> PeakPicker {
    PeakPicker {
        intensity_threshold: base_peak * MIN_RELATIVE_INTENSITY,
        signal_to_noise_threshold: MIN_SIGNAL_TO_NOISE,
        ..Default::default()
    }
}

/// Sample up to `sample_size` evenly spaced scans from `index` (all of them if `None`),
/// pick peaks in each, and return the median full width at half maximum of the isolated
/// peaks in m/z units.
///
/// Degenerate input never fails: an index with no resolvable peaks yields [`DEFAULT_FWHM_MZ`].
pub fn estimate_fwhm_mz(index: &TripletIndex, sample_size: Option<usize>) -> f64 {
    let n_scans = index.scan_count();
    let sample_size = sample_size.unwrap_or(n_scans).min(n_scans);
    if sample_size == 0 {
        debug!("No scans to estimate FWHM from, using {DEFAULT_FWHM_MZ}");
        return DEFAULT_FWHM_MZ;
    }

    let step = n_scans as f64 / sample_size as f64;
    let mut widths = Vec::new();
    let mut mz_array = Vec::new();
    let mut intensity_array = Vec::new();
    let mut acc: Vec<FittedPeak> = Vec::new();

    for k in 0..sample_size {
        let scan_number = (k as f64 * step).floor() as ScanNumber;
        mz_array.clear();
        intensity_array.clear();
        for (bin, intensity) in index.vertical_slice(scan_number) {
            mz_array.push(index.bin_to_mz(bin));
            intensity_array.push(intensity);
        }
        if mz_array.len() < 3 {
            continue;
        }
        let base_peak = intensity_array.iter().copied().fold(0.0f32, f32::max);
        if base_peak <= 0.0 {
            continue;
        }
        acc.clear();
        let picker = picker_for(base_peak);
        if let Err(e) = picker.discover_peaks(&mz_array, &intensity_array, &mut acc) {
            debug!("Peak picking failed on scan {scan_number}: {e:?}");
            continue;
        }
        widths.extend(isolated_widths(&acc));
    }

    match median(&mut widths) {
        Some(fwhm) => {
            debug!("Estimated FWHM {fwhm:0.5} from {} isolated peaks", widths.len());
            fwhm
        }
        None => {
            debug!("No resolvable peaks in {sample_size} scans, using {DEFAULT_FWHM_MZ}");
            DEFAULT_FWHM_MZ
        }
    }
}

/// The widths of the picked peaks whose nearest neighbor is far enough away
/// that their shape was not distorted by it.
fn isolated_widths(peaks: &[FittedPeak]) -> Vec<f64> {
    let mut widths = Vec::with_capacity(peaks.len());
    for (i, peak) in peaks.iter().enumerate() {
        let width = peak.full_width_at_half_max as f64;
        if !width.is_finite() || width <= 0.0 || width >= MAX_FWHM_MZ {
            continue;
        }
        let gap_left = if i > 0 {
            peak.mz - peaks[i - 1].mz
        } else {
            f64::INFINITY
        };
        let gap_right = peaks
            .get(i + 1)
            .map(|p| p.mz - peak.mz)
            .unwrap_or(f64::INFINITY);
        if gap_left.min(gap_right) > ISOLATION_WIDTHS * width {
            widths.push(width);
        }
    }
    widths
}
