//! Rational-factor polyphase resampling
//!
//! Upsample by `p`, apply a Kaiser-windowed sinc lowpass, downsample by `q`,
//! evaluated directly at the retained output samples so nothing is computed
//! for the discarded phases.

use ndarray::Array2;
use rayon::prelude::*;
use std::f64::consts::PI;

use super::stack_rows;
use crate::error::{PrepError, Result};

/// Largest denominator accepted when approximating `fs_to / fs_from`
pub const MAX_DENOMINATOR: u64 = 4096;

/// Half filter length in units of `max(p, q)`
const HALF_LEN_FACTOR: usize = 10;

const KAISER_BETA: f64 = 5.0;

/// Up/down factors in lowest terms
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ResampleRatio {
    pub up: usize,
    pub down: usize,
}

impl ResampleRatio {
    /// Ratio for converting `fs_from` to `fs_to`, both rounded to integer Hz.
    pub fn between(fs_from: f64, fs_to: f64) -> Result<Self> {
        if !(fs_from.is_finite() && fs_from > 0.0) || !(fs_to.is_finite() && fs_to > 0.0) {
            return Err(PrepError::Resample(format!(
                "sample rates must be positive, got {} -> {}",
                fs_from, fs_to
            )));
        }
        let from = fs_from.round() as u64;
        let to = fs_to.round() as u64;
        if from == 0 || to == 0 {
            return Err(PrepError::Resample(format!(
                "sample rates round to zero: {} -> {}",
                fs_from, fs_to
            )));
        }

        let (up, down) = limit_denominator(to, from, MAX_DENOMINATOR);
        if up == 0 {
            return Err(PrepError::Resample(format!(
                "ratio {}/{} is not representable with denominator <= {}",
                to, from, MAX_DENOMINATOR
            )));
        }
        Ok(Self {
            up: up as usize,
            down: down as usize,
        })
    }

    pub fn is_identity(&self) -> bool {
        self.up == self.down
    }

    /// `ceil(n * up / down)`
    pub fn output_len(&self, n: usize) -> usize {
        (n * self.up + self.down - 1) / self.down
    }
}

fn gcd(mut a: u64, mut b: u64) -> u64 {
    while b != 0 {
        let t = a % b;
        a = b;
        b = t;
    }
    a
}

/// Closest fraction to `num / den` whose denominator is at most `max_den`,
/// returned in lowest terms.
pub fn limit_denominator(num: u64, den: u64, max_den: u64) -> (u64, u64) {
    let g = gcd(num, den).max(1);
    let (num, den) = (num / g, den / g);
    if den <= max_den {
        return (num, den);
    }

    // Continued-fraction convergents p0/q0, p1/q1
    let (mut p0, mut q0, mut p1, mut q1) = (0u64, 1u64, 1u64, 0u64);
    let (mut n, mut d) = (num, den);
    loop {
        let a = n / d;
        let q2 = q0 + a * q1;
        if q2 > max_den {
            break;
        }
        let p2 = p0 + a * p1;
        p0 = p1;
        q0 = q1;
        p1 = p2;
        q1 = q2;
        let r = n - a * d;
        n = d;
        d = r;
        if d == 0 {
            break;
        }
    }

    let k = (max_den - q0) / q1;
    let (bp, bq) = (p0 + k * p1, q0 + k * q1);
    let target = num as f64 / den as f64;
    let err_semi = (bp as f64 / bq as f64 - target).abs();
    let err_conv = (p1 as f64 / q1 as f64 - target).abs();
    let (p, q) = if err_conv <= err_semi { (p1, q1) } else { (bp, bq) };
    let g = gcd(p, q).max(1);
    (p / g, q / g)
}

fn sinc(x: f64) -> f64 {
    if x == 0.0 {
        1.0
    } else {
        let px = PI * x;
        px.sin() / px
    }
}

/// Modified Bessel function of the first kind, order 0 (polynomial approximation)
fn bessel_i0(x: f64) -> f64 {
    let ax = x.abs();
    if ax < 3.75 {
        let t = (x / 3.75).powi(2);
        1.0 + t
            * (3.5156229
                + t * (3.0899424
                    + t * (1.2067492 + t * (0.2659732 + t * (0.0360768 + t * 0.0045813)))))
    } else {
        let t = 3.75 / ax;
        (ax.exp() / ax.sqrt())
            * (0.39894228
                + t * (0.01328592
                    + t * (0.00225319
                        + t * (-0.00157565
                            + t * (0.00916281
                                + t * (-0.02057706
                                    + t * (0.02635537 + t * (-0.01647633 + t * 0.00392377))))))))
    }
}

fn kaiser(size: usize, beta: f64) -> Vec<f64> {
    if size == 1 {
        return vec![1.0];
    }
    let m = (size - 1) as f64;
    let denom = bessel_i0(beta);
    (0..size)
        .map(|n| {
            let ratio = 2.0 * n as f64 / m - 1.0;
            bessel_i0(beta * (1.0 - ratio * ratio).max(0.0).sqrt()) / denom
        })
        .collect()
}

/// Anti-aliasing lowpass for the upsampled stream.
///
/// Cutoff is `1 / max(up, down)` of Nyquist; taps sum to `up` so the
/// zero-stuffed input keeps its amplitude.
pub fn design_antialias(ratio: ResampleRatio) -> Vec<f64> {
    let max_rate = ratio.up.max(ratio.down);
    let cutoff = 1.0 / max_rate as f64;
    let half_len = HALF_LEN_FACTOR * max_rate;
    let taps = 2 * half_len + 1;
    let window = kaiser(taps, KAISER_BETA);

    let mut h: Vec<f64> = (0..taps)
        .map(|m| {
            let t = m as f64 - half_len as f64;
            cutoff * sinc(cutoff * t) * window[m]
        })
        .collect();

    let sum: f64 = h.iter().sum();
    let scale = ratio.up as f64 / sum;
    for tap in &mut h {
        *tap *= scale;
    }
    h
}

/// Polyphase resampling of one channel.
///
/// Output sample `k` sits at input time `k * down / up`; samples beyond
/// either edge count as zero.
pub fn resample_poly(x: &[f64], ratio: ResampleRatio, h: &[f64]) -> Vec<f64> {
    let n_in = x.len() as i64;
    let n_out = ratio.output_len(x.len());
    let up = ratio.up as i64;
    let down = ratio.down as i64;
    let len_h = h.len() as i64;
    let center = (len_h - 1) / 2;

    let mut y = Vec::with_capacity(n_out);
    for k in 0..n_out as i64 {
        // Tap index for input m is center + k*down - m*up, which must lie in [0, len_h)
        let t = center + k * down;
        let m_max = (t / up).min(n_in - 1);
        let lo = t - len_h + 1;
        let m_min = if lo <= 0 { 0 } else { (lo + up - 1) / up };

        let mut acc = 0.0;
        let mut m = m_min;
        while m <= m_max {
            acc += h[(t - m * up) as usize] * x[m as usize];
            m += 1;
        }
        y.push(acc);
    }
    y
}

/// Resample every channel of a `[C, T]` buffer from `fs_from` to `fs_to`.
///
/// Equal integer rates return the input cast to `f32` unchanged.
pub fn resample_to(signal: &Array2<f64>, fs_from: f64, fs_to: u32) -> Result<Array2<f32>> {
    if fs_from.is_finite() && fs_from.round() as u64 == fs_to as u64 {
        return Ok(signal.mapv(|v| v as f32));
    }
    let ratio = ResampleRatio::between(fs_from, fs_to as f64)?;
    if signal.ncols() == 0 {
        return Err(PrepError::Resample("signal has no samples".to_string()));
    }

    let h = design_antialias(ratio);
    let n_out = ratio.output_len(signal.ncols());
    log::debug!(
        "Resampling {} -> {} Hz with up={} down={} ({} taps)",
        fs_from,
        fs_to,
        ratio.up,
        ratio.down,
        h.len()
    );

    let rows: Vec<Vec<f32>> = (0..signal.nrows())
        .into_par_iter()
        .map(|ch| {
            let channel = signal.row(ch).to_vec();
            resample_poly(&channel, ratio, &h)
                .into_iter()
                .map(|v| v as f32)
                .collect()
        })
        .collect();

    Ok(stack_rows(rows, n_out))
}
