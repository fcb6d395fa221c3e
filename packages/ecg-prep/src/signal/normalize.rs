use ndarray::{Array2, ArrayView1, ArrayViewMut1};

/// Added to the standard deviation so constant channels map to zero instead of NaN
pub const ZSCORE_EPSILON: f64 = 1e-6;

/// Per-channel z-score: `(x - mean) / (std + eps)` with population std.
///
/// Statistics are accumulated in `f64`. Shape and channel order are preserved.
pub fn zscore_per_lead(signal: &Array2<f32>) -> Array2<f32> {
    let mut out = Array2::<f32>::zeros(signal.raw_dim());
    for (src, dst) in signal.outer_iter().zip(out.outer_iter_mut()) {
        zscore_channel(src, dst);
    }
    out
}

fn zscore_channel(src: ArrayView1<f32>, mut dst: ArrayViewMut1<f32>) {
    let n = src.len();
    if n == 0 {
        return;
    }

    // Shifting by the first sample keeps a constant channel's deviations exactly zero
    let shift = src[0] as f64;
    let mean = shift + src.iter().map(|&v| v as f64 - shift).sum::<f64>() / n as f64;
    let var = src
        .iter()
        .map(|&v| {
            let d = v as f64 - mean;
            d * d
        })
        .sum::<f64>()
        / n as f64;
    let denom = var.sqrt() + ZSCORE_EPSILON;

    for (d, &v) in dst.iter_mut().zip(src.iter()) {
        *d = ((v as f64 - mean) / denom) as f32;
    }
}
