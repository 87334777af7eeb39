//! Detect chromatographic peaks directly in the (scan, m/z, intensity) point cloud of an
//! LC-MS run, without building a dense matrix or hand-tuning parameters per sample.
//!
//! Scans are loaded into a [`TripletIndex`], and a [`PeakDetector`] repeatedly takes the
//! most intense remaining point, finds peaks in the extracted ion trace through it with a
//! wavelet ridge search, validates them, and consumes the accepted ones. A short first
//! pass calibrates the width and scale parameters of the full pass.
//!
//! ```no_run
//! use mzridge::{detect_peaks, DetectionParameters, Scan};
//!
//! let scans: Vec<Scan> = Vec::new();
//! let peaks = detect_peaks(&scans, &DetectionParameters::default());
//! ```
pub mod detector;
pub mod fwhm;
pub mod index;
pub mod params;
pub mod peak;
pub mod ridge;
pub mod scan;
pub mod snr;
mod stats;
pub mod trace;
pub mod validation;
pub mod wavelet;

pub use detector::{
    detect_peaks, CancellationToken, DetectionError, DetectionOutcome, DetectionStats,
    PeakDetector, PhaseStats,
};
pub use fwhm::{estimate_fwhm_mz, DEFAULT_FWHM_MZ};
pub use index::{IndexError, MzBin, ScanNumber, Triplet, TripletIndex};
pub use params::{ConfigError, DetectionParameters, Parameters};
pub use peak::PeakInfo;
pub use ridge::{RidgeCandidate, RidgeParams, RidgePeakFinder};
pub use scan::Scan;
#[cfg(feature = "mzdata")]
pub use scan::ScanConversionError;
pub use snr::SnrEstimator;
pub use trace::Trace;
pub use validation::{PeakValidator, Rejection, ValidationStage, ValidationStats};
