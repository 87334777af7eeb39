//! A dense, zero-filled extracted ion trace at one m/z bin
use crate::index::{MzBin, ScanNumber, TripletIndex};

/// The remaining signal at one m/z bin over a contiguous scan range. Scans with no
/// remaining triplet at the bin hold zero intensity.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Trace {
    pub mz_bin: MzBin,
    pub mz: f64,
    /// The scan number of the first sample
    pub scan_lo: ScanNumber,
    pub times: Vec<f64>,
    pub intensities: Vec<f32>,
}

impl Trace {
    pub fn len(&self) -> usize {
        self.times.len()
    }

    pub fn is_empty(&self) -> bool {
        self.times.is_empty()
    }

    #[inline]
    pub fn scan_number(&self, i: usize) -> ScanNumber {
        self.scan_lo + i as ScanNumber
    }

    /// The sample index of `scan_number`, if it lies within the trace
    pub fn position_of(&self, scan_number: ScanNumber) -> Option<usize> {
        let i = scan_number.checked_sub(self.scan_lo)? as usize;
        (i < self.len()).then_some(i)
    }
}

impl TripletIndex {
    /// Build the dense trace at `mz_bin` over the `radius` scans either side of `center`,
    /// clamped to the scans of the run.
    pub fn trace_around(&self, mz_bin: MzBin, center: ScanNumber, radius: ScanNumber) -> Trace {
        let last_scan = (self.scan_count() as ScanNumber).saturating_sub(1);
        let scan_lo = center.saturating_sub(radius);
        let scan_hi = center.saturating_add(radius).min(last_scan);
        if self.scan_count() == 0 || scan_lo > scan_hi {
            return Trace {
                mz_bin,
                mz: self.bin_to_mz(mz_bin),
                scan_lo,
                ..Default::default()
            };
        }
        let times = self.scan_times()[scan_lo as usize..=scan_hi as usize].to_vec();
        let mut intensities = vec![0.0f32; times.len()];
        for (scan_number, intensity) in self.horizontal_slice(mz_bin, scan_lo, scan_hi) {
            intensities[(scan_number - scan_lo) as usize] = intensity;
        }
        Trace {
            mz_bin,
            mz: self.bin_to_mz(mz_bin),
            scan_lo,
            times,
            intensities,
        }
    }
}
