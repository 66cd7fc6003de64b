//! Derived-metric calculators.
//!
//! Stateless functions over completed measurement records. No instrument
//! access, no iteration state.

/// Reference impedance of the RF bench, in ohms.
pub const REFERENCE_IMPEDANCE_OHMS: f64 = 50.0;

/// Per-index ratio `20*log10(a[k] / b[k])` in dB.
///
/// Both records must come from the same sweep, so they have the same length.
pub fn ratio_db(a: &[f64], b: &[f64]) -> Vec<f64> {
    debug_assert_eq!(a.len(), b.len(), "records from different sweeps");
    a.iter()
        .zip(b)
        .map(|(&a, &b)| 20.0 * (a / b).log10())
        .collect()
}

/// Sideband rejection of `wanted` over `image`, in dB per sweep index.
pub fn sideband_rejection(wanted: &[f64], image: &[f64]) -> Vec<f64> {
    ratio_db(wanted, image)
}

/// Gain of each reading relative to a fixed reference amplitude, in dB.
pub fn gain_db(readings: &[f64], reference: f64) -> Vec<f64> {
    readings
        .iter()
        .map(|&v| 20.0 * (v / reference).log10())
        .collect()
}

/// `10^(dBV/20)`.
pub fn dbv_to_volts(dbv: f64) -> f64 {
    10f64.powf(dbv / 20.0)
}

/// Power of each harmonic from its amplitude in dBV:
/// `(10^(A/20))^2 / impedance`.
pub fn harmonic_power(amplitudes_dbv: &[f64], impedance_ohms: f64) -> Vec<f64> {
    amplitudes_dbv
        .iter()
        .map(|&a| dbv_to_volts(a).powi(2) / impedance_ohms)
        .collect()
}

/// Total harmonic distortion from linear amplitudes, fundamental first:
/// `sqrt(sum(amplitude[1..]^2)) / amplitude[0]`.
///
/// `None` for an empty slice.
pub fn total_harmonic_distortion(amplitudes: &[f64]) -> Option<f64> {
    let (fundamental, harmonics) = amplitudes.split_first()?;
    let harmonic_sum: f64 = harmonics.iter().map(|a| a * a).sum();
    Some(harmonic_sum.sqrt() / fundamental)
}

/// THD from amplitudes logged in dBV.
pub fn total_harmonic_distortion_dbv(amplitudes_dbv: &[f64]) -> Option<f64> {
    let linear: Vec<f64> = amplitudes_dbv.iter().copied().map(dbv_to_volts).collect();
    total_harmonic_distortion(&linear)
}

/// DC input power from the supply's voltage and current.
pub fn dc_power(volts: f64, amps: f64) -> f64 {
    volts * amps
}

/// DC-to-RF conversion efficiency.
pub fn efficiency(rf_power: f64, dc_power: f64) -> f64 {
    rf_power / dc_power
}

/// Power delivered into `impedance_ohms` by an RMS voltage.
pub fn rms_power(vrms: f64, impedance_ohms: f64) -> f64 {
    vrms * vrms / impedance_ohms
}

/// Watts to dBW.
pub fn to_dbw(watts: f64) -> f64 {
    10.0 * watts.log10()
}

#[cfg(test)]
mod tests {
    use super::*;

    const EPS: f64 = 1e-12;

    #[test]
    fn sideband_rejection_is_antisymmetric() {
        let usb = [0.80, 0.75, 0.51, 0.02];
        let lsb = [0.01, 0.03, 0.49, 0.70];
        let a_over_b = sideband_rejection(&usb, &lsb);
        let b_over_a = sideband_rejection(&lsb, &usb);
        assert_eq!(a_over_b.len(), usb.len());
        for (x, y) in a_over_b.iter().zip(&b_over_a) {
            assert!((x + y).abs() < EPS, "{x} vs {y}");
        }
        assert!((ratio_db(&[10.0], &[1.0])[0] - 20.0).abs() < EPS);
    }

    #[test]
    fn thd_of_known_amplitudes() {
        let thd = total_harmonic_distortion(&[1.0, 0.1, 0.05, 0.02, 0.01]).unwrap();
        let expected = (0.1f64.powi(2) + 0.05f64.powi(2) + 0.02f64.powi(2) + 0.01f64.powi(2)).sqrt();
        assert!((thd - expected).abs() < EPS);
        assert!((thd - 0.11402).abs() < 1e-5, "THD = {thd}");
        assert!(total_harmonic_distortion(&[]).is_none());
        assert_eq!(total_harmonic_distortion(&[2.0]), Some(0.0));
    }

    #[test]
    fn thd_from_dbv_matches_linear() {
        let dbv: Vec<f64> = [1.0f64, 0.1, 0.05, 0.02, 0.01]
            .iter()
            .map(|a| 20.0 * a.log10())
            .collect();
        let thd = total_harmonic_distortion_dbv(&dbv).unwrap();
        assert!((thd - 0.11402).abs() < 1e-5);
    }

    #[test]
    fn efficiency_of_half() {
        assert_eq!(efficiency(2.0, 4.0), 0.5);
        assert_eq!(efficiency(2.0, dc_power(8.0, 0.5)), 0.5);
    }

    #[test]
    fn harmonic_power_into_fifty_ohms() {
        // 0 dBV is 1 V, 20 dBV is 10 V
        let p = harmonic_power(&[0.0, 20.0], REFERENCE_IMPEDANCE_OHMS);
        assert!((p[0] - 1.0 / 50.0).abs() < EPS);
        assert!((p[1] - 100.0 / 50.0).abs() < 1e-9);
        assert!((rms_power(10.0, 50.0) - 2.0).abs() < EPS);
        assert!((to_dbw(10.0) - 10.0).abs() < EPS);
    }

    #[test]
    fn gain_relative_to_drive() {
        let g = gain_db(&[0.447, 0.0447], 0.447);
        assert!(g[0].abs() < EPS);
        assert!((g[1] + 20.0).abs() < 1e-9);
    }
}
