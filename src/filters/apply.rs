//! Direct-form II transposed IIR evaluation: causal, zero-phase and stateful.

use super::Coefficients;

/// Coefficients normalized so `a[0] == 1` and padded to a common length.
#[derive(Debug, Clone, PartialEq)]
pub(crate) struct Normalized {
    b: Vec<f64>,
    a: Vec<f64>,
}

impl Normalized {
    pub(crate) fn new(coeffs: &Coefficients) -> Self {
        let len = coeffs.b.len().max(coeffs.a.len());
        let a0 = coeffs.a.first().copied().unwrap_or(1.0);
        let pad = |values: &[f64]| -> Vec<f64> {
            let mut out: Vec<f64> = values.iter().map(|v| v / a0).collect();
            out.resize(len, 0.0);
            out
        };
        Self {
            b: pad(&coeffs.b),
            a: pad(&coeffs.a),
        }
    }

    fn order(&self) -> usize {
        self.b.len().saturating_sub(1)
    }

    /// Steady-state delay line for a unit step input.
    fn step_state(&self) -> Vec<f64> {
        let order = self.order();
        if order == 0 {
            return Vec::new();
        }
        let a_sum: f64 = self.a.iter().sum();
        let dc_gain = if a_sum.abs() > f64::EPSILON {
            self.b.iter().sum::<f64>() / a_sum
        } else {
            0.0
        };
        let mut state = vec![0.0; order];
        state[order - 1] = self.b[order] - self.a[order] * dc_gain;
        for k in (0..order - 1).rev() {
            state[k] = self.b[k + 1] - self.a[k + 1] * dc_gain + state[k + 1];
        }
        state
    }

    #[inline]
    fn step(&self, state: &mut [f64], x: f64) -> f64 {
        let order = state.len();
        let y = self.b[0] * x + state.first().copied().unwrap_or(0.0);
        for k in 0..order {
            let carried = if k + 1 < order { state[k + 1] } else { 0.0 };
            state[k] = self.b[k + 1] * x - self.a[k + 1] * y + carried;
        }
        y
    }

    /// Single forward pass starting from `state`.
    fn run(&self, state: &mut [f64], input: impl Iterator<Item = f64>) -> Vec<f64> {
        input.map(|x| self.step(state, x)).collect()
    }
}

/// Causal single-pass filtering from a zeroed delay line.
pub(crate) fn lfilter(coeffs: &Normalized, signal: &[f64]) -> Vec<f64> {
    let mut state = vec![0.0; coeffs.order()];
    coeffs.run(&mut state, signal.iter().copied())
}

/// Forward-backward filtering with odd extension of `pad_len` samples per edge.
///
/// Callers must guarantee `signal.len() > pad_len`.
pub(crate) fn filtfilt(coeffs: &Normalized, signal: &[f64], pad_len: usize) -> Vec<f64> {
    debug_assert!(signal.len() > pad_len);
    let extended = odd_extension(signal, pad_len);
    let zi = coeffs.step_state();

    let mut state: Vec<f64> = zi.iter().map(|z| z * extended[0]).collect();
    let mut forward = coeffs.run(&mut state, extended.iter().copied());

    let last = forward.last().copied().unwrap_or(0.0);
    let mut state: Vec<f64> = zi.iter().map(|z| z * last).collect();
    forward.reverse();
    let mut backward = coeffs.run(&mut state, forward.into_iter());
    backward.reverse();

    backward[pad_len..backward.len() - pad_len].to_vec()
}

fn odd_extension(signal: &[f64], pad_len: usize) -> Vec<f64> {
    let n = signal.len();
    let first = signal[0];
    let last = signal[n - 1];
    let mut out = Vec::with_capacity(n + 2 * pad_len);
    out.extend((1..=pad_len).rev().map(|i| 2.0 * first - signal[i]));
    out.extend_from_slice(signal);
    out.extend((1..=pad_len).map(|i| 2.0 * last - signal[n - 1 - i]));
    out
}

/// Causal IIR filter that carries its delay line across calls.
///
/// The first sample seeds the delay line at steady state so a constant input
/// produces no start-up transient.
#[derive(Debug, Clone)]
pub struct IirState {
    coeffs: Normalized,
    zi: Vec<f64>,
    state: Option<Vec<f64>>,
}

impl IirState {
    pub(crate) fn new(coeffs: &Coefficients) -> Self {
        let coeffs = Normalized::new(coeffs);
        let zi = coeffs.step_state();
        Self {
            coeffs,
            zi,
            state: None,
        }
    }

    /// Filter one sample, updating the carried state.
    pub fn process(&mut self, x: f64) -> f64 {
        let zi = &self.zi;
        let state = self
            .state
            .get_or_insert_with(|| zi.iter().map(|z| z * x).collect());
        self.coeffs.step(state, x)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn moving_average() -> Coefficients {
        Coefficients {
            b: vec![0.5, 0.5],
            a: vec![1.0],
        }
    }

    fn one_pole(alpha: f64) -> Coefficients {
        Coefficients {
            b: vec![1.0 - alpha],
            a: vec![1.0, -alpha],
        }
    }

    #[test]
    fn lfilter_matches_hand_computed_fir() {
        let coeffs = Normalized::new(&moving_average());
        let out = lfilter(&coeffs, &[2.0, 4.0, 6.0]);
        assert_eq!(out, vec![1.0, 3.0, 5.0]);
    }

    #[test]
    fn lfilter_normalizes_leading_denominator() {
        let coeffs = Normalized::new(&Coefficients {
            b: vec![2.0],
            a: vec![2.0, -1.0],
        });
        let out = lfilter(&coeffs, &[1.0, 0.0, 0.0]);
        assert_eq!(out, vec![1.0, 0.5, 0.25]);
    }

    #[test]
    fn odd_extension_reflects_about_edges() {
        let ext = odd_extension(&[1.0, 2.0, 4.0, 7.0], 2);
        assert_eq!(ext, vec![-2.0, 0.0, 1.0, 2.0, 4.0, 7.0, 10.0, 12.0]);
    }

    #[test]
    fn filtfilt_passes_constant_through_unity_gain_filter() {
        let coeffs = Normalized::new(&one_pole(0.8));
        let out = filtfilt(&coeffs, &[3.0; 16], 3);
        assert_eq!(out.len(), 16);
        for value in out {
            assert!((value - 3.0).abs() < 1e-12);
        }
    }

    #[test]
    fn filtfilt_has_no_phase_lag_on_symmetric_pulse() {
        let coeffs = Normalized::new(&one_pole(0.5));
        let mut signal = vec![0.0; 41];
        signal[20] = 1.0;
        let out = filtfilt(&coeffs, &signal, 3);
        let peak = out
            .iter()
            .enumerate()
            .max_by(|a, b| a.1.total_cmp(b.1))
            .map(|(idx, _)| idx);
        assert_eq!(peak, Some(20));
        assert!((out[19] - out[21]).abs() < 1e-12);
    }

    #[test]
    fn iir_state_matches_single_pass_across_batches() {
        let coeffs = one_pole(0.9);
        let signal: Vec<f64> = (0..40).map(|i| (i as f64 * 0.3).sin()).collect();
        let mut whole = IirState::new(&coeffs);
        let expected: Vec<f64> = signal.iter().map(|&x| whole.process(x)).collect();

        let mut split = IirState::new(&coeffs);
        let mut got: Vec<f64> = signal[..13].iter().map(|&x| split.process(x)).collect();
        let mut resumed = split.clone();
        got.extend(signal[13..].iter().map(|&x| resumed.process(x)));
        assert_eq!(got, expected);
    }

    #[test]
    fn iir_state_seeds_at_steady_state() {
        let mut state = IirState::new(&one_pole(0.95));
        for _ in 0..5 {
            assert!((state.process(2.5) - 2.5).abs() < 1e-12);
        }
        let mut fresh = IirState::new(&one_pole(0.95));
        assert!((fresh.process(-1.0) + 1.0).abs() < 1e-12);
    }
}
