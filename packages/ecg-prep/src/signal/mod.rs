//! Numeric stages applied to each recording
//!
//! Filter (f64) -> Resampler (f32) -> Normalizer (f32) -> Windower (f32).
//! Each stage takes a `[channels, samples]` buffer and returns a new one.

pub mod filter;
pub mod normalize;
pub mod resample;
pub mod window;

pub use filter::{bandpass_zero_phase, ButterworthFilter, FilterOutcome, SosFilter};
pub use normalize::zscore_per_lead;
pub use resample::{resample_to, ResampleRatio, MAX_DENOMINATOR};
pub use window::{full_window_count, slice_windows, Window, WindowSpec, Windows};

use ndarray::{Array2, ArrayView1};

/// Stack equal-length rows into a `[rows, ncols]` array
pub(crate) fn stack_rows<T: Clone + Default>(rows: Vec<Vec<T>>, ncols: usize) -> Array2<T> {
    let mut out = Array2::from_elem((rows.len(), ncols), T::default());
    for (mut dst, row) in out.outer_iter_mut().zip(rows.iter()) {
        dst.assign(&ArrayView1::from(&row[..ncols]));
    }
    out
}
