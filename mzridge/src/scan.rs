//! The scan record supplied by whatever reads the raw acquisition.

/// One mass spectrum acquired at a single retention time.
///
/// The m/z and intensity arrays are parallel and must have the same length. Scans are
/// numbered by their position in the sequence handed to
/// [`TripletIndex::build`](crate::TripletIndex::build), so they are expected in order of
/// increasing retention time.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Scan {
    pub time: f64,
    pub mz_array: Vec<f64>,
    pub intensity_array: Vec<f32>,
}

impl Scan {
    pub fn new(time: f64, mz_array: Vec<f64>, intensity_array: Vec<f32>) -> Self {
        Self {
            time,
            mz_array,
            intensity_array,
        }
    }

    pub fn len(&self) -> usize {
        self.mz_array.len()
    }

    pub fn is_empty(&self) -> bool {
        self.mz_array.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (f64, f32)> + '_ {
        self.mz_array
            .iter()
            .copied()
            .zip(self.intensity_array.iter().copied())
    }
}

impl From<(f64, Vec<f64>, Vec<f32>)> for Scan {
    fn from(value: (f64, Vec<f64>, Vec<f32>)) -> Self {
        Self::new(value.0, value.1, value.2)
    }
}

#[cfg(feature = "mzdata")]
mod adapter {
    use mzdata::prelude::*;
    use mzpeaks::prelude::*;
    use thiserror::Error;

    use super::Scan;

    /// An error that might occur while reading the signal arrays of a spectrum
    #[derive(Debug, Clone, PartialEq, Error)]
    pub enum ScanConversionError {
        #[error("Spectrum {0} has no raw signal arrays")]
        NoSignalArrays(String),
        #[error("Failed to decode the signal arrays of spectrum {0}: {1}")]
        ArrayRetrieval(String, String),
    }

    impl Scan {
        /// Copy the raw signal of an `mzdata` spectrum into a [`Scan`].
        pub fn from_spectrum<C, D, S>(spectrum: &S) -> Result<Self, ScanConversionError>
        where
            C: CentroidLike,
            D: DeconvolutedCentroidLike,
            S: SpectrumLike<C, D>,
        {
            let arrays = spectrum
                .raw_arrays()
                .ok_or_else(|| ScanConversionError::NoSignalArrays(spectrum.id().to_string()))?;
            let mzs = arrays.mzs().map_err(|e| {
                ScanConversionError::ArrayRetrieval(spectrum.id().to_string(), e.to_string())
            })?;
            let intensities = arrays.intensities().map_err(|e| {
                ScanConversionError::ArrayRetrieval(spectrum.id().to_string(), e.to_string())
            })?;
            Ok(Scan::new(
                spectrum.start_time(),
                mzs.to_vec(),
                intensities.to_vec(),
            ))
        }
    }
}

#[cfg(feature = "mzdata")]
pub use adapter::ScanConversionError;
