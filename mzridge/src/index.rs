//! A sparse index over the (scan, m/z bin, intensity) point cloud of an LC-MS run.
//!
//! A run may hold tens of millions of points, so a dense scan by m/z matrix is out of
//! the question. [`TripletIndex`] stores every point exactly once in scan-major order,
//! keeps a per-bin list of slots ordered by scan for horizontal (chromatographic)
//! slicing, and a max-heap with lazy deletion so the most intense remaining point can
//! be found repeatedly without a linear scan.
use std::cmp::Ordering;
use std::collections::{BinaryHeap, HashMap};
use std::ops::Range;

use identity_hash::BuildIdentityHasher;
use itertools::Itertools;
use mzpeaks::{
    coordinate::{Time, MZ},
    feature::SimpleFeature,
};
use thiserror::Error;
use tracing::{debug, trace};

use crate::scan::Scan;
use crate::stats::median_spacing;

/// An m/z value quantized by [`TripletIndex::round_mz`].
pub type MzBin = i32;

/// The position of a scan in the sequence the index was built from.
pub type ScanNumber = u32;

/// The default number of bins per m/z unit.
pub const DEFAULT_MZ_SCALE_FACTOR: f64 = 1e4;

/// An error that might occur while building a [`TripletIndex`]
#[derive(Debug, Clone, PartialEq, Error)]
pub enum IndexError {
    #[error("Scan {scan_number} has {mz_len} m/z values but {intensity_len} intensity values")]
    MalformedScan {
        scan_number: usize,
        mz_len: usize,
        intensity_len: usize,
    },
    #[error("Cannot build an index from an empty scan list")]
    EmptyInput,
}

/// One observation of the point cloud
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Triplet {
    pub scan_number: ScanNumber,
    pub mz_bin: MzBin,
    pub intensity: f32,
    pub removed: bool,
}

impl Triplet {
    pub fn new(scan_number: ScanNumber, mz_bin: MzBin, intensity: f32) -> Self {
        Self {
            scan_number,
            mz_bin,
            intensity,
            removed: false,
        }
    }
}

#[derive(Debug, Clone, Copy)]
struct HeapEntry {
    intensity: f32,
    slot: usize,
}

impl PartialEq for HeapEntry {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for HeapEntry {}

impl PartialOrd for HeapEntry {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for HeapEntry {
    /// Ties are broken in favor of the earlier slot so extraction order is deterministic
    fn cmp(&self, other: &Self) -> Ordering {
        self.intensity
            .total_cmp(&other.intensity)
            .then_with(|| other.slot.cmp(&self.slot))
    }
}

type BinSlots = HashMap<MzBin, Vec<usize>, BuildIdentityHasher<MzBin>>;

/// The sparse (scan, m/z bin) store.
///
/// Triplets are owned by the index and only ever change through their `removed` flag.
#[derive(Debug, Clone)]
pub struct TripletIndex {
    triplets: Vec<Triplet>,
    scan_offsets: Vec<usize>,
    scan_times: Vec<f64>,
    bins: BinSlots,
    heap: BinaryHeap<HeapEntry>,
    scale_factor: f64,
    intensity_floor: f32,
    median_scan_interval: f64,
    n_removed: usize,
}

impl TripletIndex {
    /// Build an index with the default quantization of [`DEFAULT_MZ_SCALE_FACTOR`]
    pub fn build(scans: &[Scan]) -> Result<Self, IndexError> {
        Self::build_with_scale_factor(scans, DEFAULT_MZ_SCALE_FACTOR)
    }

    /// Ingest every point of every scan, quantizing m/z with `scale_factor` bins per unit.
    ///
    /// Points of one scan that land in the same bin are merged into a single triplet
    /// carrying their summed intensity.
    pub fn build_with_scale_factor(scans: &[Scan], scale_factor: f64) -> Result<Self, IndexError> {
        if scans.is_empty() {
            return Err(IndexError::EmptyInput);
        }
        let n_points: usize = scans.iter().map(|s| s.len()).sum();
        let mut triplets = Vec::with_capacity(n_points);
        let mut scan_offsets = Vec::with_capacity(scans.len() + 1);
        let mut scan_times = Vec::with_capacity(scans.len());
        let mut n_merged = 0usize;

        let mut buffer: Vec<(MzBin, f32)> = Vec::new();
        for (scan_number, scan) in scans.iter().enumerate() {
            if scan.mz_array.len() != scan.intensity_array.len() {
                return Err(IndexError::MalformedScan {
                    scan_number,
                    mz_len: scan.mz_array.len(),
                    intensity_len: scan.intensity_array.len(),
                });
            }
            scan_offsets.push(triplets.len());
            scan_times.push(scan.time);

            buffer.clear();
            buffer.extend(scan.iter().map(|(mz, inten)| (quantize(mz, scale_factor), inten)));
            buffer.sort_by_key(|(bin, _)| *bin);
            for (bin, group) in &buffer.iter().group_by(|(bin, _)| *bin) {
                let mut members = 0usize;
                let mut intensity = 0.0f32;
                for (_, i) in group {
                    members += 1;
                    intensity += *i;
                }
                n_merged += members - 1;
                triplets.push(Triplet::new(scan_number as ScanNumber, bin, intensity));
            }
        }
        scan_offsets.push(triplets.len());

        let mut bins = BinSlots::default();
        for (slot, t) in triplets.iter().enumerate() {
            bins.entry(t.mz_bin).or_default().push(slot);
        }

        let heap: BinaryHeap<HeapEntry> = triplets
            .iter()
            .enumerate()
            .map(|(slot, t)| HeapEntry {
                intensity: t.intensity,
                slot,
            })
            .collect();

        let median_scan_interval = median_spacing(&scan_times);
        debug!(
            "Indexed {} points from {} scans into {} triplets over {} m/z bins ({n_merged} merged)",
            n_points,
            scans.len(),
            triplets.len(),
            bins.len()
        );

        Ok(Self {
            triplets,
            scan_offsets,
            scan_times,
            bins,
            heap,
            scale_factor,
            intensity_floor: 0.0,
            median_scan_interval,
            n_removed: 0,
        })
    }

    /// Set the intensity below which [`TripletIndex::extract_next_max_intensity`] stops
    pub fn with_intensity_floor(mut self, intensity_floor: f32) -> Self {
        self.intensity_floor = intensity_floor;
        self
    }

    pub fn set_intensity_floor(&mut self, intensity_floor: f32) {
        self.intensity_floor = intensity_floor;
    }

    pub fn intensity_floor(&self) -> f32 {
        self.intensity_floor
    }

    pub fn scale_factor(&self) -> f64 {
        self.scale_factor
    }

    /// Quantize an m/z value or width into this index's bins
    #[inline]
    pub fn round_mz(&self, mz: f64) -> MzBin {
        quantize(mz, self.scale_factor)
    }

    #[inline]
    pub fn bin_to_mz(&self, mz_bin: MzBin) -> f64 {
        mz_bin as f64 / self.scale_factor
    }

    /// The total number of triplets, removed or not
    pub fn len(&self) -> usize {
        self.triplets.len()
    }

    pub fn is_empty(&self) -> bool {
        self.triplets.is_empty()
    }

    /// The number of triplets not yet removed
    pub fn remaining(&self) -> usize {
        self.triplets.len() - self.n_removed
    }

    pub fn scan_count(&self) -> usize {
        self.scan_times.len()
    }

    pub fn scan_time(&self, scan_number: ScanNumber) -> Option<f64> {
        self.scan_times.get(scan_number as usize).copied()
    }

    pub fn scan_times(&self) -> &[f64] {
        &self.scan_times
    }

    /// The median spacing between consecutive scan times, or 1.0 for a single scan
    pub fn median_scan_interval(&self) -> f64 {
        self.median_scan_interval
    }

    /// Iterate over every m/z bin holding at least one triplet
    pub fn mz_bins(&self) -> impl Iterator<Item = MzBin> + '_ {
        self.bins.keys().copied()
    }

    fn scan_range(&self, scan_number: ScanNumber) -> Option<Range<usize>> {
        let i = scan_number as usize;
        if i + 1 < self.scan_offsets.len() {
            Some(self.scan_offsets[i]..self.scan_offsets[i + 1])
        } else {
            None
        }
    }

    fn find_slot(&self, scan_number: ScanNumber, mz_bin: MzBin) -> Option<usize> {
        let range = self.scan_range(scan_number)?;
        let start = range.start;
        self.triplets[range]
            .binary_search_by_key(&mz_bin, |t| t.mz_bin)
            .ok()
            .map(|i| start + i)
    }

    /// The slots at `mz_bin` whose scan number falls within `scan_lo..=scan_hi`
    fn bin_slots(&self, mz_bin: MzBin, scan_lo: ScanNumber, scan_hi: ScanNumber) -> &[usize] {
        match self.bins.get(&mz_bin) {
            Some(slots) => {
                let start = slots.partition_point(|s| self.triplets[*s].scan_number < scan_lo);
                let end = slots.partition_point(|s| self.triplets[*s].scan_number <= scan_hi);
                if start >= end {
                    &[]
                } else {
                    &slots[start..end]
                }
            }
            None => &[],
        }
    }

    /// Look up the triplet at a (scan, bin) coordinate whether or not it was removed
    pub fn get(&self, scan_number: ScanNumber, mz_bin: MzBin) -> Option<&Triplet> {
        self.find_slot(scan_number, mz_bin)
            .map(|slot| &self.triplets[slot])
    }

    /// All non-removed triplets at `mz_bin` with scan numbers in `scan_lo..=scan_hi`,
    /// ordered by scan number.
    ///
    /// Scans without a point in this bin are skipped, not filled with zeros.
    pub fn horizontal_slice(
        &self,
        mz_bin: MzBin,
        scan_lo: ScanNumber,
        scan_hi: ScanNumber,
    ) -> Vec<(ScanNumber, f32)> {
        self.bin_slots(mz_bin, scan_lo, scan_hi)
            .iter()
            .map(|s| &self.triplets[*s])
            .filter(|t| !t.removed)
            .map(|t| (t.scan_number, t.intensity))
            .collect()
    }

    /// The non-removed spectrum of a single scan, ordered by m/z bin
    pub fn vertical_slice(&self, scan_number: ScanNumber) -> Vec<(MzBin, f32)> {
        match self.scan_range(scan_number) {
            Some(range) => self.triplets[range]
                .iter()
                .filter(|t| !t.removed)
                .map(|t| (t.mz_bin, t.intensity))
                .collect(),
            None => Vec::new(),
        }
    }

    /// Mark every triplet at `mz_bin` within `scan_lo..=scan_hi` as removed.
    ///
    /// Returns how many triplets were newly removed, so repeating a call returns zero.
    pub fn remove_range(
        &mut self,
        mz_bin: MzBin,
        scan_lo: ScanNumber,
        scan_hi: ScanNumber,
    ) -> usize {
        let (start, end) = match self.bins.get(&mz_bin) {
            Some(slots) => (
                slots.partition_point(|s| self.triplets[*s].scan_number < scan_lo),
                slots.partition_point(|s| self.triplets[*s].scan_number <= scan_hi),
            ),
            None => return 0,
        };
        let mut n = 0;
        if let Some(slots) = self.bins.get(&mz_bin) {
            for slot in slots.iter().take(end).skip(start) {
                let t = &mut self.triplets[*slot];
                if !t.removed {
                    t.removed = true;
                    n += 1;
                }
            }
        }
        self.n_removed += n;
        trace!("Removed {n} triplets at bin {mz_bin} over scans {scan_lo}-{scan_hi}");
        n
    }

    /// Mark a single triplet removed, returning `true` if it existed and was not already removed
    pub fn remove_triplet(&mut self, scan_number: ScanNumber, mz_bin: MzBin) -> bool {
        match self.find_slot(scan_number, mz_bin) {
            Some(slot) if !self.triplets[slot].removed => {
                self.triplets[slot].removed = true;
                self.n_removed += 1;
                true
            }
            _ => false,
        }
    }

    /// Clear the removed flag of a single triplet so it can seed a trace again, returning
    /// `true` if it existed and was removed
    pub fn restore_triplet(&mut self, scan_number: ScanNumber, mz_bin: MzBin) -> bool {
        match self.find_slot(scan_number, mz_bin) {
            Some(slot) if self.triplets[slot].removed => {
                self.triplets[slot].removed = false;
                self.n_removed -= 1;
                self.heap.push(HeapEntry {
                    intensity: self.triplets[slot].intensity,
                    slot,
                });
                true
            }
            _ => false,
        }
    }

    /// Find the most intense non-removed triplet without removing it.
    ///
    /// Returns `None` when everything has been removed or the best remaining intensity
    /// is below the intensity floor.
    pub fn extract_next_max_intensity(&mut self) -> Option<Triplet> {
        while let Some(entry) = self.heap.peek() {
            let t = self.triplets[entry.slot];
            if t.removed {
                self.heap.pop();
                continue;
            }
            if t.intensity < self.intensity_floor {
                return None;
            }
            return Some(t);
        }
        None
    }

    /// Read the signal at `mz_bin` over `scan_lo..=scan_hi` into a constant m/z chromatogram,
    /// including removed points and filling scans without a point with zero intensity.
    pub fn chromatogram(
        &self,
        mz_bin: MzBin,
        scan_lo: ScanNumber,
        scan_hi: ScanNumber,
    ) -> SimpleFeature<MZ, Time> {
        let mz = self.bin_to_mz(mz_bin);
        let mut feature = SimpleFeature::<MZ, Time>::empty(mz);
        let last_scan = (self.scan_count() as ScanNumber).saturating_sub(1);
        let scan_hi = scan_hi.min(last_scan);
        if scan_lo > scan_hi {
            return feature;
        }
        let slots = self.bin_slots(mz_bin, scan_lo, scan_hi);
        let mut observed = slots.iter().map(|s| &self.triplets[*s]).peekable();
        let points: Vec<(f64, f64, f32)> = (scan_lo..=scan_hi)
            .map(|scan_number| {
                let intensity = match observed.peek() {
                    Some(t) if t.scan_number == scan_number => {
                        let i = t.intensity;
                        observed.next();
                        i
                    }
                    _ => 0.0,
                };
                (mz, self.scan_times[scan_number as usize], intensity)
            })
            .collect();
        feature.extend(points);
        feature
    }
}

#[inline]
fn quantize(mz: f64, scale_factor: f64) -> MzBin {
    (mz * scale_factor).round() as MzBin
}
