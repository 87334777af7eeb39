use mzpeaks::prelude::*;
use mzridge::{
    detect_peaks, CancellationToken, DetectionError, DetectionParameters, PeakDetector,
    PeakInfo, Scan, SnrEstimator, TripletIndex, ValidationStage,
};

/// A run sampled every second, with a gaussian elution profile of standard deviation
/// `sigma` scans at each `(mz, center, height)` and a flat low background at 410 m/z
fn synthetic_run(n_scans: usize, profiles: &[(f64, f64, f32)], sigma: f64) -> Vec<Scan> {
    (0..n_scans)
        .map(|i| {
            let t = i as f64;
            let mut mzs = Vec::new();
            let mut intensities = Vec::new();
            for (mz, center, height) in profiles {
                mzs.push(*mz);
                intensities
                    .push(height * (-(t - center).powi(2) / (2.0 * sigma * sigma)).exp() as f32);
            }
            mzs.push(410.0);
            intensities.push(5.0);
            Scan::new(t, mzs, intensities)
        })
        .collect()
}

/// Whether any peak's apex falls within another peak at the same bin. Adjacent peaks may
/// still share a zero-intensity boundary scan.
fn reemits(peaks: &[PeakInfo]) -> bool {
    peaks.iter().enumerate().any(|(i, a)| {
        peaks[i + 1..].iter().any(|b| {
            a.overlaps(b)
                && (a.contains_scan(b.max_height_scan_number)
                    || b.contains_scan(a.max_height_scan_number))
        })
    })
}

#[test_log::test]
#[test_log(default_log_filter = "debug")]
fn test_single_gaussian() -> Result<(), DetectionError> {
    let scans = synthetic_run(100, &[(400.0, 50.0, 1000.0)], 2.0);
    let mut index = TripletIndex::build(&scans)?;
    let detector = PeakDetector::default();
    let outcome = detector
        .detect(&mut index, &CancellationToken::new())?
        .expect("not cancelled");

    assert_eq!(outcome.peaks.len(), 1);
    let peak = &outcome.peaks[0];
    assert!((peak.mz - 400.0).abs() < 1e-3);
    assert!((peak.max_height_scan_number as i64 - 50).abs() <= 1);
    assert_eq!(peak.max_height, 1000.0);
    assert!(peak.signal_to_noise_ratio > detector.config().snr_threshold);
    assert!(peak.lower_scan_bound <= peak.max_height_scan_number);
    assert!(peak.max_height_scan_number <= peak.upper_scan_bound);
    let initial = outcome.initial_parameters;
    assert!(peak.width() >= initial.min_peak_width && peak.width() <= initial.max_peak_width);

    // Calibrated from the one peak
    assert_eq!(outcome.calibration_peak_count, 1);
    assert!((outcome.parameters.large_scale_in - peak.width() / 2.0).abs() < 1e-9);
    assert_eq!(outcome.fwhm_mz, mzridge::DEFAULT_FWHM_MZ);

    let validation = outcome.stats.validation();
    assert_eq!(validation.accepted, 1);
    assert!(validation.reached(ValidationStage::CoefficientArea) >= 1);

    // The consumed signal reads back from the index
    let feature = peak.to_feature(&index);
    assert_eq!(feature.len(), peak.scan_count());
    for s in peak.lower_scan_bound..=peak.upper_scan_bound {
        assert!(index.get(s, peak.mz_bin).unwrap().removed);
    }
    Ok(())
}

#[test_log::test]
fn test_neighbouring_bins() -> Result<(), DetectionError> {
    let scans = synthetic_run(100, &[(400.0, 50.0, 1000.0), (400.0001, 53.0, 800.0)], 2.0);
    let mut index = TripletIndex::build(&scans)?;
    let bins = [index.round_mz(400.0), index.round_mz(400.0001)];
    assert_ne!(bins[0], bins[1]);

    let outcome = PeakDetector::default()
        .detect(&mut index, &CancellationToken::new())?
        .expect("not cancelled");
    assert_eq!(outcome.peaks.len(), 2);

    for (bin, center) in bins.iter().zip([50, 53]) {
        let peak = outcome
            .peaks
            .iter()
            .find(|p| p.mz_bin == *bin)
            .expect("one peak per bin");
        assert!((peak.max_height_scan_number as i64 - center).abs() <= 1);
        // Only this peak's own scans at its own bin were consumed
        for s in 0..100 {
            let t = index.get(s, *bin).unwrap();
            assert_eq!(t.removed, peak.contains_scan(s), "scan {s} at bin {bin}");
        }
    }
    Ok(())
}

#[test_log::test]
fn test_full_pass_does_not_reemit() -> Result<(), DetectionError> {
    let scans = synthetic_run(
        120,
        &[(300.0, 30.0, 1000.0), (350.0, 60.0, 800.0), (450.0, 90.0, 600.0)],
        2.0,
    );
    let mut index = TripletIndex::build(&scans)?;
    let detector = PeakDetector::new(DetectionParameters {
        calibration_peak_count: 1,
        ..Default::default()
    });
    let outcome = detector
        .detect(&mut index, &CancellationToken::new())?
        .expect("not cancelled");

    assert_eq!(outcome.calibration_peak_count, 1);
    assert_eq!(outcome.peaks.len(), 3);
    assert_eq!(outcome.peaks[0].max_height, 1000.0);
    assert!(!reemits(&outcome.peaks));
    assert_eq!(outcome.stats.calibration.accepted, 1);
    assert_eq!(outcome.stats.full.accepted, 2);
    for peak in outcome.peaks.iter() {
        assert!(peak.width() >= outcome.initial_parameters.min_peak_width);
    }
    Ok(())
}

#[test_log::test]
fn test_terminates_on_noise() -> Result<(), DetectionError> {
    // A deterministic linear congruential generator standing in for shot noise
    let mut state: u64 = 0x2545F4914F6CDD1D;
    let mut next = move || {
        state = state
            .wrapping_mul(6364136223846793005)
            .wrapping_add(1442695040888963407);
        (state >> 33) as f32 / (1u64 << 31) as f32
    };
    let scans: Vec<Scan> = (0..60)
        .map(|i| {
            let mzs: Vec<f64> = (0..15).map(|k| 500.0 + k as f64 * 0.01).collect();
            let intensities: Vec<f32> = mzs.iter().map(|_| next() * 400.0).collect();
            Scan::new(i as f64 * 0.5, mzs, intensities)
        })
        .collect();
    let mut index = TripletIndex::build(&scans)?;
    let n_triplets = index.len();
    let outcome = PeakDetector::default()
        .detect(&mut index, &CancellationToken::new())?
        .expect("not cancelled");

    assert!(outcome.stats.iterations() <= 2 * n_triplets);
    assert!(!reemits(&outcome.peaks));
    for peak in outcome.peaks.iter() {
        assert!(peak.lower_scan_bound <= peak.max_height_scan_number);
        assert!(peak.max_height_scan_number <= peak.upper_scan_bound);
    }
    // Nothing above the minimum feature height is left unexamined
    index.set_intensity_floor(DetectionParameters::default().minimum_feature_height);
    assert!(index.extract_next_max_intensity().is_none());
    Ok(())
}

#[test_log::test]
fn test_cancellation() -> Result<(), DetectionError> {
    let scans = synthetic_run(100, &[(400.0, 50.0, 1000.0)], 2.0);
    let mut index = TripletIndex::build(&scans)?;
    let token = CancellationToken::new();
    token.cancel();
    assert!(PeakDetector::default().detect(&mut index, &token)?.is_none());
    assert_eq!(index.remaining(), index.len());
    Ok(())
}

#[test_log::test]
fn test_configured_detection() -> Result<(), DetectionError> {
    let config = DetectionParameters::from_toml(
        r#"
        minimum_feature_height = 500.0

        [snr_estimator]
        kind = "WaveletCoefficient"
        multiplier = 3.0
        use_absolute = true
        "#,
    )?;
    assert!(matches!(
        config.snr_estimator,
        SnrEstimator::WaveletCoefficient { .. }
    ));
    let scans = synthetic_run(100, &[(400.0, 50.0, 1000.0), (420.0, 20.0, 300.0)], 2.0);
    let peaks = detect_peaks(&scans, &config)?;
    assert_eq!(peaks.len(), 1);
    assert!((peaks[0].max_height_scan_number as i64 - 50).abs() <= 1);
    assert!(peaks[0].signal_to_noise_ratio >= config.snr_threshold);
    Ok(())
}

#[test_log::test]
fn test_malformed_input() {
    let scans = vec![Scan::new(0.0, vec![100.0, 200.0], vec![1.0])];
    let err = detect_peaks(&scans, &DetectionParameters::default()).unwrap_err();
    assert!(matches!(err, DetectionError::Index(_)));
    let err = detect_peaks(&[], &DetectionParameters::default()).unwrap_err();
    assert!(matches!(err, DetectionError::Index(_)));
}
