//! IIR coefficient design: Butterworth highpass/bandpass and a second-order notch.
//!
//! Butterworth designs go analog prototype -> frequency transform -> bilinear
//! transform in zero/pole/gain form, then expand to transfer-function
//! polynomials. Frequencies are normalized to Nyquist internally.

use std::f64::consts::PI;

use rustfft::num_complex::Complex64;

use super::{Band, Coefficients, FilterError};

/// Bilinear sample rate used for normalized (Nyquist = 1) designs.
const NORMALIZED_FS: f64 = 2.0;

struct Zpk {
    zeros: Vec<Complex64>,
    poles: Vec<Complex64>,
    gain: f64,
}

/// Design a Butterworth highpass or bandpass filter of the given order.
pub(crate) fn butterworth(order: usize, band: Band, sampling_rate: f64) -> Result<Coefficients, FilterError> {
    if order == 0 {
        return Err(FilterError::InvalidDesign(
            "Butterworth order must be at least 1".to_string(),
        ));
    }
    let nyquist = 0.5 * sampling_rate;
    let prototype = analog_prototype(order);
    let analog = match band {
        Band::Highpass { cutoff_hz } => {
            let wn = normalized_cutoff(cutoff_hz, nyquist)?;
            to_highpass(prototype, prewarp(wn))
        }
        Band::Bandpass { low_hz, high_hz } => {
            if low_hz >= high_hz {
                return Err(FilterError::InvalidDesign(format!(
                    "Bandpass low cutoff {low_hz} Hz must be below high cutoff {high_hz} Hz"
                )));
            }
            let low = prewarp(normalized_cutoff(low_hz, nyquist)?);
            let high = prewarp(normalized_cutoff(high_hz, nyquist)?);
            to_bandpass(prototype, (low * high).sqrt(), high - low)
        }
    };
    Ok(to_transfer_function(bilinear(analog)))
}

/// Second-order notch (band-reject) centred on `notch_hz` with quality factor `quality`.
pub(crate) fn notch(notch_hz: f64, quality: f64, sampling_rate: f64) -> Result<Coefficients, FilterError> {
    if !(quality > 0.0) || !quality.is_finite() {
        return Err(FilterError::InvalidDesign(format!(
            "Notch quality factor must be positive, got {quality}"
        )));
    }
    let w0 = normalized_cutoff(notch_hz, 0.5 * sampling_rate)?;
    let bandwidth = w0 / quality * PI;
    let w0 = w0 * PI;
    // -3 dB attenuation at the band edges.
    let beta = (bandwidth / 2.0).tan();
    let gain = 1.0 / (1.0 + beta);
    let cos_w0 = w0.cos();
    Ok(Coefficients {
        b: vec![gain, -2.0 * gain * cos_w0, gain],
        a: vec![1.0, -2.0 * gain * cos_w0, 2.0 * gain - 1.0],
    })
}

fn normalized_cutoff(freq_hz: f64, nyquist: f64) -> Result<f64, FilterError> {
    let wn = freq_hz / nyquist;
    if !(wn > 0.0 && wn < 1.0) {
        return Err(FilterError::InvalidDesign(format!(
            "Frequency {freq_hz} Hz must lie strictly between 0 and Nyquist ({nyquist} Hz)"
        )));
    }
    Ok(wn)
}

fn prewarp(wn: f64) -> f64 {
    2.0 * NORMALIZED_FS * (PI * wn / NORMALIZED_FS).tan()
}

fn analog_prototype(order: usize) -> Zpk {
    let n = order as f64;
    let poles = (0..order)
        .map(|k| {
            let m = -(n - 1.0) + 2.0 * k as f64;
            -Complex64::new(0.0, PI * m / (2.0 * n)).exp()
        })
        .collect();
    Zpk {
        zeros: Vec::new(),
        poles,
        gain: 1.0,
    }
}

fn relative_degree(zpk: &Zpk) -> usize {
    zpk.poles.len() - zpk.zeros.len()
}

fn to_highpass(zpk: Zpk, wo: f64) -> Zpk {
    let degree = relative_degree(&zpk);
    let scale = product(zpk.zeros.iter().map(|&z| -z)) / product(zpk.poles.iter().map(|&p| -p));
    let mut zeros: Vec<Complex64> = zpk.zeros.iter().map(|&z| wo / z).collect();
    zeros.extend(std::iter::repeat_n(Complex64::new(0.0, 0.0), degree));
    Zpk {
        zeros,
        poles: zpk.poles.iter().map(|&p| wo / p).collect(),
        gain: zpk.gain * scale.re,
    }
}

fn to_bandpass(zpk: Zpk, wo: f64, bandwidth: f64) -> Zpk {
    let degree = relative_degree(&zpk);
    let split = |roots: &[Complex64]| -> Vec<Complex64> {
        let scaled: Vec<Complex64> = roots.iter().map(|&r| r * (bandwidth / 2.0)).collect();
        let offset: Vec<Complex64> = scaled.iter().map(|&r| (r * r - wo * wo).sqrt()).collect();
        scaled
            .iter()
            .zip(&offset)
            .map(|(&r, &d)| r + d)
            .chain(scaled.iter().zip(&offset).map(|(&r, &d)| r - d))
            .collect()
    };
    let mut zeros = split(&zpk.zeros);
    zeros.extend(std::iter::repeat_n(Complex64::new(0.0, 0.0), degree));
    Zpk {
        zeros,
        poles: split(&zpk.poles),
        gain: zpk.gain * bandwidth.powi(degree as i32),
    }
}

fn bilinear(zpk: Zpk) -> Zpk {
    let fs2 = 2.0 * NORMALIZED_FS;
    let degree = relative_degree(&zpk);
    let map = |&s: &Complex64| (fs2 + s) / (fs2 - s);
    let scale = product(zpk.zeros.iter().map(|&z| fs2 - z)) / product(zpk.poles.iter().map(|&p| fs2 - p));
    let mut zeros: Vec<Complex64> = zpk.zeros.iter().map(map).collect();
    zeros.extend(std::iter::repeat_n(Complex64::new(-1.0, 0.0), degree));
    Zpk {
        zeros,
        poles: zpk.poles.iter().map(map).collect(),
        gain: zpk.gain * scale.re,
    }
}

fn to_transfer_function(zpk: Zpk) -> Coefficients {
    let b = poly(&zpk.zeros).into_iter().map(|c| c.re * zpk.gain).collect();
    let a = poly(&zpk.poles).into_iter().map(|c| c.re).collect();
    Coefficients { b, a }
}

/// Monic polynomial coefficients (highest power first) with the given roots.
fn poly(roots: &[Complex64]) -> Vec<Complex64> {
    let mut coeffs = vec![Complex64::new(1.0, 0.0)];
    for root in roots {
        let mut next = vec![Complex64::new(0.0, 0.0); coeffs.len() + 1];
        for (idx, &c) in coeffs.iter().enumerate() {
            next[idx] += c;
            next[idx + 1] -= c * *root;
        }
        coeffs = next;
    }
    coeffs
}

fn product(values: impl Iterator<Item = Complex64>) -> Complex64 {
    values.fold(Complex64::new(1.0, 0.0), |acc, v| acc * v)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn magnitude_at(coeffs: &Coefficients, freq_hz: f64, fs: f64) -> f64 {
        let w = 2.0 * PI * freq_hz / fs;
        let eval = |poly: &[f64]| {
            poly.iter().enumerate().fold(Complex64::new(0.0, 0.0), |acc, (k, c)| {
                acc + Complex64::from_polar(*c, -w * k as f64)
            })
        };
        (eval(&coeffs.b) / eval(&coeffs.a)).norm()
    }

    #[test]
    fn highpass_order_four_matches_reference_coefficients() {
        // Reference: butter(4, 0.2, btype="high").
        let coeffs = butterworth(4, Band::Highpass { cutoff_hz: 20.0 }, 200.0).unwrap();
        let expected_b = [0.43284664, -1.73138658, 2.59707987, -1.73138658, 0.43284664];
        let expected_a = [1.0, -2.3695130, 2.31398841, -1.05466541, 0.18737949];
        for (got, want) in coeffs.b.iter().zip(expected_b) {
            assert!((got - want).abs() < 1e-6, "b: {got} vs {want}");
        }
        for (got, want) in coeffs.a.iter().zip(expected_a) {
            assert!((got - want).abs() < 1e-6, "a: {got} vs {want}");
        }
    }

    #[test]
    fn highpass_blocks_dc_and_passes_high_band() {
        let coeffs = butterworth(4, Band::Highpass { cutoff_hz: 20.0 }, 200.0).unwrap();
        assert!(magnitude_at(&coeffs, 0.0, 200.0) < 1e-9);
        assert!((magnitude_at(&coeffs, 20.0, 200.0) - std::f64::consts::FRAC_1_SQRT_2).abs() < 1e-6);
        assert!((magnitude_at(&coeffs, 80.0, 200.0) - 1.0).abs() < 1e-2);
    }

    #[test]
    fn bandpass_has_doubled_order_and_unit_gain_mid_band() {
        let band = Band::Bandpass {
            low_hz: 20.0,
            high_hz: 90.0,
        };
        let coeffs = butterworth(4, band, 250.0).unwrap();
        assert_eq!(coeffs.b.len(), 9);
        assert_eq!(coeffs.a.len(), 9);
        assert!(magnitude_at(&coeffs, 0.0, 250.0) < 1e-9);
        assert!(magnitude_at(&coeffs, 124.9, 250.0) < 1e-3);
        assert!((magnitude_at(&coeffs, 45.0, 250.0) - 1.0).abs() < 2e-2);
    }

    #[test]
    fn notch_rejects_centre_frequency_only() {
        let coeffs = notch(60.0, 30.0, 200.0).unwrap();
        assert_eq!(coeffs.b.len(), 3);
        assert!(magnitude_at(&coeffs, 60.0, 200.0) < 1e-9);
        assert!((magnitude_at(&coeffs, 20.0, 200.0) - 1.0).abs() < 1e-2);
        assert!((magnitude_at(&coeffs, 0.0, 200.0) - 1.0).abs() < 1e-9);
    }

    #[test]
    fn rejects_cutoffs_outside_nyquist() {
        assert!(matches!(
            butterworth(4, Band::Highpass { cutoff_hz: 120.0 }, 200.0),
            Err(FilterError::InvalidDesign(_))
        ));
        assert!(matches!(notch(60.0, 30.0, 100.0), Err(FilterError::InvalidDesign(_))));
        assert!(matches!(notch(60.0, 0.0, 200.0), Err(FilterError::InvalidDesign(_))));
    }
}
