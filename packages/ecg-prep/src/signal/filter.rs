//! Zero-phase Butterworth bandpass
//!
//! IIR filters as cascaded second-order sections (biquads) for numerical
//! stability, applied forward and backward so the output has no phase shift
//! and QRS timing stays aligned with window boundaries.

use ndarray::Array2;
use rayon::prelude::*;
use std::f64::consts::PI;

use super::stack_rows;
use crate::config::BandpassConfig;
use crate::error::{PrepError, Result};

/// Second-order section (biquad) coefficients
/// Transfer function: H(z) = (b0 + b1*z^-1 + b2*z^-2) / (1 + a1*z^-1 + a2*z^-2)
#[derive(Debug, Clone, Copy)]
pub struct BiquadCoeffs {
    pub b0: f64,
    pub b1: f64,
    pub b2: f64,
    pub a1: f64,
    pub a2: f64,
}

impl BiquadCoeffs {
    /// Both poles strictly inside the unit circle (stability triangle)
    pub fn is_stable(&self) -> bool {
        self.a1.is_finite()
            && self.a2.is_finite()
            && self.a2.abs() < 1.0
            && self.a1.abs() < 1.0 + self.a2
    }

    /// Gain at z = 1
    fn dc_gain(&self) -> f64 {
        (self.b0 + self.b1 + self.b2) / (1.0 + self.a1 + self.a2)
    }
}

/// State for a single biquad section (Direct Form II Transposed)
#[derive(Debug, Clone, Default)]
struct BiquadState {
    z1: f64,
    z2: f64,
}

/// Single biquad filter section
#[derive(Debug, Clone)]
pub struct BiquadFilter {
    coeffs: BiquadCoeffs,
    state: BiquadState,
}

impl BiquadFilter {
    pub fn new(coeffs: BiquadCoeffs) -> Self {
        Self {
            coeffs,
            state: BiquadState::default(),
        }
    }

    /// Process a single sample using Direct Form II Transposed
    #[inline]
    pub fn process(&mut self, input: f64) -> f64 {
        let c = &self.coeffs;
        let output = c.b0 * input + self.state.z1;
        self.state.z1 = c.b1 * input - c.a1 * output + self.state.z2;
        self.state.z2 = c.b2 * input - c.a2 * output;
        output
    }

    /// Load the state the section settles into under a constant `input`.
    /// Returns the settled output, which feeds the next section.
    fn settle(&mut self, input: f64) -> f64 {
        let c = self.coeffs;
        let output = c.dc_gain() * input;
        self.state.z1 = output - c.b0 * input;
        self.state.z2 = c.b2 * input - c.a2 * output;
        output
    }

    pub fn reset(&mut self) {
        self.state = BiquadState::default();
    }
}

/// Cascaded second-order sections filter
#[derive(Debug, Clone)]
pub struct SosFilter {
    sections: Vec<BiquadFilter>,
    gain: f64,
}

impl SosFilter {
    pub fn new(sections: Vec<BiquadCoeffs>, gain: f64) -> Self {
        Self {
            sections: sections.into_iter().map(BiquadFilter::new).collect(),
            gain,
        }
    }

    pub fn num_sections(&self) -> usize {
        self.sections.len()
    }

    pub fn is_stable(&self) -> bool {
        self.gain.is_finite() && self.sections.iter().all(|s| s.coeffs.is_stable())
    }

    /// Process a single sample through all sections
    #[inline]
    pub fn process(&mut self, input: f64) -> f64 {
        let mut output = input * self.gain;
        for section in &mut self.sections {
            output = section.process(output);
        }
        output
    }

    /// Process a signal and return a new array (original unchanged)
    pub fn filter(&mut self, signal: &[f64]) -> Vec<f64> {
        signal.iter().map(|&s| self.process(s)).collect()
    }

    pub fn reset(&mut self) {
        for section in &mut self.sections {
            section.reset();
        }
    }

    /// Put every section in the steady state reached after a long run of `level`
    fn settle(&mut self, level: f64) {
        let mut carried = level * self.gain;
        for section in &mut self.sections {
            carried = section.settle(carried);
        }
    }

    /// Samples of odd reflection added at each end before forward-backward filtering
    pub fn edge_padding(&self) -> usize {
        3 * (2 * self.sections.len() + 1)
    }

    /// Forward-backward filtering with odd-reflection edge padding and
    /// steady-state initial conditions. The result has zero phase shift.
    ///
    /// Fails when the signal is not longer than the edge padding.
    pub fn filtfilt(&self, signal: &[f64]) -> std::result::Result<Vec<f64>, String> {
        let n = signal.len();
        let padlen = self.edge_padding();
        if n <= padlen {
            return Err(format!(
                "signal of {} samples is too short for edge padding of {} samples",
                n, padlen
            ));
        }

        let first = signal[0];
        let last = signal[n - 1];
        let mut extended = Vec::with_capacity(n + 2 * padlen);
        extended.extend((1..=padlen).rev().map(|i| 2.0 * first - signal[i]));
        extended.extend_from_slice(signal);
        extended.extend((1..=padlen).map(|i| 2.0 * last - signal[n - 1 - i]));

        let mut forward = self.clone();
        forward.reset();
        forward.settle(extended[0]);
        let mut y = forward.filter(&extended);

        y.reverse();
        let mut backward = self.clone();
        backward.reset();
        backward.settle(y[0]);
        let mut y = backward.filter(&y);
        y.reverse();

        Ok(y[padlen..padlen + n].to_vec())
    }
}

/// Butterworth filter designer
pub struct ButterworthFilter;

impl ButterworthFilter {
    pub fn lowpass(cutoff: f64, sample_rate: f64, order: usize) -> SosFilter {
        let wn = Self::prewarp(cutoff, sample_rate);
        SosFilter::new(Self::design_lowpass(wn, order), 1.0)
    }

    pub fn highpass(cutoff: f64, sample_rate: f64, order: usize) -> SosFilter {
        let wn = Self::prewarp(cutoff, sample_rate);
        SosFilter::new(Self::design_highpass(wn, order), 1.0)
    }

    /// Highpass cascade at `low` followed by a lowpass cascade at `high`
    pub fn bandpass(low: f64, high: f64, sample_rate: f64, order: usize) -> SosFilter {
        let mut sections = Self::design_highpass(Self::prewarp(low, sample_rate), order);
        sections.extend(Self::design_lowpass(Self::prewarp(high, sample_rate), order));
        SosFilter::new(sections, 1.0)
    }

    /// Prewarp frequency for bilinear transform
    fn prewarp(freq: f64, sample_rate: f64) -> f64 {
        (PI * freq / sample_rate).tan()
    }

    /// Damping of the k-th conjugate pole pair: s^2 + alpha*wn*s + wn^2
    fn pair_damping(k: usize, order: usize) -> f64 {
        let theta = PI * (2.0 * k as f64 + 1.0) / (2.0 * order as f64);
        2.0 * theta.sin()
    }

    fn design_lowpass(wn: f64, order: usize) -> Vec<BiquadCoeffs> {
        let num_sections = (order + 1) / 2;
        let mut sections = Vec::with_capacity(num_sections);

        for k in 0..num_sections {
            // For odd order, last section is first-order: H(s) = wn / (s + wn)
            if order % 2 == 1 && k == num_sections - 1 {
                let k_coeff = wn / (1.0 + wn);
                sections.push(BiquadCoeffs {
                    b0: k_coeff,
                    b1: k_coeff,
                    b2: 0.0,
                    a1: (wn - 1.0) / (wn + 1.0),
                    a2: 0.0,
                });
            } else {
                let alpha = Self::pair_damping(k, order);
                let wn2 = wn * wn;
                let denom = 1.0 + alpha * wn + wn2;

                sections.push(BiquadCoeffs {
                    b0: wn2 / denom,
                    b1: 2.0 * wn2 / denom,
                    b2: wn2 / denom,
                    a1: 2.0 * (wn2 - 1.0) / denom,
                    a2: (1.0 - alpha * wn + wn2) / denom,
                });
            }
        }

        sections
    }

    fn design_highpass(wn: f64, order: usize) -> Vec<BiquadCoeffs> {
        let num_sections = (order + 1) / 2;
        let mut sections = Vec::with_capacity(num_sections);

        for k in 0..num_sections {
            if order % 2 == 1 && k == num_sections - 1 {
                let k_coeff = 1.0 / (1.0 + wn);
                sections.push(BiquadCoeffs {
                    b0: k_coeff,
                    b1: -k_coeff,
                    b2: 0.0,
                    a1: (wn - 1.0) / (wn + 1.0),
                    a2: 0.0,
                });
            } else {
                let alpha = Self::pair_damping(k, order);
                let wn2 = wn * wn;
                let denom = 1.0 + alpha * wn + wn2;

                sections.push(BiquadCoeffs {
                    b0: 1.0 / denom,
                    b1: -2.0 / denom,
                    b2: 1.0 / denom,
                    a1: 2.0 * (wn2 - 1.0) / denom,
                    a2: (1.0 - alpha * wn + wn2) / denom,
                });
            }
        }

        sections
    }
}

/// Design the bandpass for one recording's native rate.
///
/// Cutoffs outside `(0, fs/2)` or an inverted band are configuration errors.
pub fn design_bandpass(config: &BandpassConfig, fs: f64) -> Result<SosFilter> {
    if !fs.is_finite() || fs <= 0.0 {
        return Err(PrepError::Configuration(format!(
            "Sample rate must be positive, got {}",
            fs
        )));
    }
    if config.order == 0 {
        return Err(PrepError::Configuration(
            "Filter order must be at least 1".to_string(),
        ));
    }
    let nyquist = fs / 2.0;
    if !(config.low > 0.0 && config.low < nyquist) {
        return Err(PrepError::Configuration(format!(
            "Low cutoff ({} Hz) must lie in (0, {}) Hz for fs = {} Hz",
            config.low, nyquist, fs
        )));
    }
    if !(config.high > 0.0 && config.high < nyquist) {
        return Err(PrepError::Configuration(format!(
            "High cutoff ({} Hz) must be less than Nyquist ({} Hz)",
            config.high, nyquist
        )));
    }
    if config.low >= config.high {
        return Err(PrepError::Configuration(
            "Low cutoff must be less than high cutoff".to_string(),
        ));
    }
    Ok(ButterworthFilter::bandpass(
        config.low,
        config.high,
        fs,
        config.order,
    ))
}

/// Result of the filter stage for one recording
#[derive(Debug, Clone)]
pub enum FilterOutcome {
    Filtered(Array2<f64>),
    /// The raw signal, passed through because filtering failed numerically
    Degraded { signal: Array2<f64>, reason: String },
}

impl FilterOutcome {
    pub fn is_degraded(&self) -> bool {
        matches!(self, FilterOutcome::Degraded { .. })
    }

    pub fn degraded_reason(&self) -> Option<&str> {
        match self {
            FilterOutcome::Filtered(_) => None,
            FilterOutcome::Degraded { reason, .. } => Some(reason),
        }
    }

    pub fn signal(&self) -> &Array2<f64> {
        match self {
            FilterOutcome::Filtered(signal) => signal,
            FilterOutcome::Degraded { signal, .. } => signal,
        }
    }

    pub fn into_signal(self) -> Array2<f64> {
        match self {
            FilterOutcome::Filtered(signal) => signal,
            FilterOutcome::Degraded { signal, .. } => signal,
        }
    }
}

/// Zero-phase bandpass of every channel of a `[C, T]` buffer.
///
/// Invalid cutoffs for `fs` are returned as [`PrepError::Configuration`]. Any
/// numerical failure instead yields [`FilterOutcome::Degraded`] carrying the
/// unfiltered signal, so one pathological recording never stops a batch.
pub fn bandpass_zero_phase(
    signal: &Array2<f32>,
    fs: f64,
    config: &BandpassConfig,
) -> Result<FilterOutcome> {
    let sos = design_bandpass(config, fs)?;
    let raw = || signal.mapv(|v| v as f64);

    if !sos.is_stable() {
        return Ok(FilterOutcome::Degraded {
            signal: raw(),
            reason: format!(
                "unstable coefficients for band {}-{} Hz at fs = {} Hz",
                config.low, config.high, fs
            ),
        });
    }

    let n_samples = signal.ncols();
    let filtered: std::result::Result<Vec<Vec<f64>>, String> = (0..signal.nrows())
        .into_par_iter()
        .map(|ch| {
            let channel: Vec<f64> = signal.row(ch).iter().map(|&v| v as f64).collect();
            let y = sos.filtfilt(&channel)?;
            // NaN input (invalid samples) propagates; only finite input must stay finite
            if channel.iter().all(|v| v.is_finite()) && y.iter().any(|v| !v.is_finite()) {
                return Err(format!("non-finite output on channel {}", ch));
            }
            Ok(y)
        })
        .collect();

    match filtered {
        Ok(rows) => Ok(FilterOutcome::Filtered(stack_rows(rows, n_samples))),
        Err(reason) => Ok(FilterOutcome::Degraded {
            signal: raw(),
            reason,
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sine(freq: f64, fs: f64, n: usize) -> Vec<f64> {
        (0..n)
            .map(|i| (2.0 * PI * freq * i as f64 / fs).sin())
            .collect()
    }

    fn rms(x: &[f64]) -> f64 {
        (x.iter().map(|v| v * v).sum::<f64>() / x.len() as f64).sqrt()
    }

    fn band() -> BandpassConfig {
        BandpassConfig {
            low: 0.5,
            high: 40.0,
            order: 4,
        }
    }

    #[test]
    fn test_lowpass_passes_dc() {
        let mut filter = ButterworthFilter::lowpass(10.0, 100.0, 2);
        let mut out = 0.0;
        for _ in 0..500 {
            out = filter.process(1.0);
        }
        assert!((out - 1.0).abs() < 1e-6);
    }

    #[test]
    fn test_designed_sections_are_stable() {
        for order in 1..=8 {
            let sos = ButterworthFilter::bandpass(0.5, 40.0, 250.0, order);
            assert!(sos.is_stable(), "order {} produced unstable sections", order);
            assert_eq!(sos.num_sections(), 2 * ((order + 1) / 2));
        }
    }

    #[test]
    fn test_bandpass_keeps_passband_and_rejects_stopband() {
        let fs = 250.0;
        let sos = ButterworthFilter::bandpass(0.5, 40.0, fs, 4);

        let pass = sine(10.0, fs, 5000);
        let stop = sine(100.0, fs, 5000);
        let pass_out = sos.filtfilt(&pass).unwrap();
        let stop_out = sos.filtfilt(&stop).unwrap();

        let inner = 500..4500;
        let pass_ratio = rms(&pass_out[inner.clone()]) / rms(&pass[inner.clone()]);
        let stop_ratio = rms(&stop_out[inner.clone()]) / rms(&stop[inner]);
        assert!(pass_ratio > 0.95, "passband ratio {}", pass_ratio);
        assert!(stop_ratio < 0.01, "stopband ratio {}", stop_ratio);
    }

    #[test]
    fn test_filtfilt_has_zero_phase() {
        let fs = 250.0;
        let sos = ButterworthFilter::bandpass(0.5, 40.0, fs, 4);
        let x = sine(5.0, fs, 4000);
        let y = sos.filtfilt(&x).unwrap();

        // Zero crossings of a passband tone stay where they were
        for i in 1000..3000 {
            if x[i - 1] < 0.0 && x[i] >= 0.0 {
                assert!(y[i - 1] < 0.05 && y[i] > -0.05);
            }
        }
        let max_err = x[1000..3000]
            .iter()
            .zip(&y[1000..3000])
            .map(|(a, b)| (a - b).abs())
            .fold(0.0, f64::max);
        assert!(max_err < 0.05, "max error {}", max_err);
    }

    #[test]
    fn test_filtfilt_rejects_short_signal() {
        let sos = ButterworthFilter::bandpass(0.5, 40.0, 250.0, 4);
        let padlen = sos.edge_padding();
        assert_eq!(padlen, 27);
        assert!(sos.filtfilt(&vec![0.0; padlen]).is_err());
        assert!(sos.filtfilt(&vec![0.0; padlen + 1]).is_ok());
    }

    #[test]
    fn test_cutoff_at_sample_rate_is_configuration_error() {
        let config = BandpassConfig {
            low: 0.0,
            high: 250.0,
            order: 4,
        };
        let signal = Array2::<f32>::zeros((1, 1000));
        let result = bandpass_zero_phase(&signal, 250.0, &config);
        assert!(matches!(result, Err(PrepError::Configuration(_))));
    }

    #[test]
    fn test_high_cutoff_above_native_nyquist_is_configuration_error() {
        // 40 Hz cannot be represented at 64 Hz sampling
        assert!(matches!(
            design_bandpass(&band(), 64.0),
            Err(PrepError::Configuration(_))
        ));
    }

    #[test]
    fn test_short_recording_degrades_to_raw() {
        let signal = Array2::from_shape_fn((2, 10), |(c, t)| (c * 10 + t) as f32);
        let outcome = bandpass_zero_phase(&signal, 250.0, &band()).unwrap();
        assert!(outcome.is_degraded());
        assert!(outcome.degraded_reason().unwrap().contains("too short"));
        assert_eq!(outcome.signal(), &signal.mapv(|v| v as f64));
    }

    #[test]
    fn test_nan_channel_does_not_degrade_clean_leads() {
        let mut signal = Array2::from_shape_fn((2, 2000), |(_, t)| {
            (100.0 + (2.0 * PI * 10.0 * t as f64 / 250.0).sin()) as f32
        });
        signal[[0, 500]] = f32::NAN;

        let outcome = bandpass_zero_phase(&signal, 250.0, &band()).unwrap();
        assert!(!outcome.is_degraded());
        let y = outcome.signal();
        assert!(y.row(0).iter().any(|v| v.is_nan()));
        assert!(y.row(1).iter().all(|v| v.is_finite()));
        let mean: f64 = y.row(1).iter().skip(500).take(1000).sum::<f64>() / 1000.0;
        assert!(mean.abs() < 0.05, "lead 1 kept its offset: {}", mean);
    }

    #[test]
    fn test_output_shape_matches_input() {
        let signal = Array2::from_shape_fn((3, 2000), |(c, t)| {
            ((t as f64 * 0.05).sin() + c as f64) as f32
        });
        let outcome = bandpass_zero_phase(&signal, 250.0, &band()).unwrap();
        assert!(!outcome.is_degraded());
        assert_eq!(outcome.signal().dim(), (3, 2000));
    }

    #[test]
    fn test_bandpass_removes_baseline_offset() {
        let signal = Array2::from_shape_fn((1, 5000), |(_, t)| {
            (100.0 + (2.0 * PI * 10.0 * t as f64 / 250.0).sin()) as f32
        });
        let outcome = bandpass_zero_phase(&signal, 250.0, &band()).unwrap();
        let y = outcome.into_signal();
        let mean: f64 = y.row(0).iter().skip(1000).take(3000).sum::<f64>() / 3000.0;
        assert!(mean.abs() < 0.05, "residual offset {}", mean);
    }
}
