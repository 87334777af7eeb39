//! The record describing one detected chromatographic peak
use std::cmp::Ordering;

use mzpeaks::{
    coordinate::{Time, MZ},
    feature::SimpleFeature,
    prelude::*,
};
use serde::{Deserialize, Serialize};

use crate::index::{MzBin, ScanNumber, TripletIndex};

/// A chromatographic peak at one m/z bin.
///
/// Scan bounds are inclusive and always satisfy
/// `lower_scan_bound <= max_height_scan_number <= upper_scan_bound`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PeakInfo {
    pub mz: f64,
    pub mz_bin: MzBin,
    pub lower_scan_bound: ScanNumber,
    pub upper_scan_bound: ScanNumber,
    pub max_height: f32,
    pub max_height_scan_number: ScanNumber,
    pub ret_time_start: f64,
    pub ret_time_end: f64,
    pub signal_to_noise_ratio: f64,
    pub coeff_over_area: f64,
}

impl PeakInfo {
    /// The retention time span of the peak
    pub fn width(&self) -> f64 {
        self.ret_time_end - self.ret_time_start
    }

    pub fn scan_count(&self) -> usize {
        (self.upper_scan_bound - self.lower_scan_bound) as usize + 1
    }

    pub fn contains_scan(&self, scan_number: ScanNumber) -> bool {
        self.lower_scan_bound <= scan_number && scan_number <= self.upper_scan_bound
    }

    /// Whether `other` lies at the same bin and shares at least one scan with this peak
    pub fn overlaps(&self, other: &PeakInfo) -> bool {
        self.mz_bin == other.mz_bin
            && self.lower_scan_bound <= other.upper_scan_bound
            && other.lower_scan_bound <= self.upper_scan_bound
    }

    /// Read the peak's signal back out of `index` as a constant m/z chromatogram
    pub fn to_feature(&self, index: &TripletIndex) -> SimpleFeature<MZ, Time> {
        index.chromatogram(self.mz_bin, self.lower_scan_bound, self.upper_scan_bound)
    }
}

impl PartialOrd for PeakInfo {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        match self.mz.partial_cmp(&other.mz) {
            Some(Ordering::Equal) => {}
            ord => return ord,
        }
        self.ret_time_start.partial_cmp(&other.ret_time_start)
    }
}

impl CoordinateLike<MZ> for PeakInfo {
    fn coordinate(&self) -> f64 {
        self.mz
    }
}

impl IntensityMeasurement for PeakInfo {
    fn intensity(&self) -> f32 {
        self.max_height
    }
}
