//! Fixed-length windowing along the time axis

use ndarray::{s, Array2, ArrayView2};

use crate::error::{PrepError, Result};

/// Window length, stride, and trailing-data policy, all in samples
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WindowSpec {
    pub window: usize,
    pub stride: usize,
    /// Drop a trailing partial window instead of zero-padding it
    pub drop_last: bool,
}

impl WindowSpec {
    pub fn new(window: usize, stride: usize, drop_last: bool) -> Result<Self> {
        if window == 0 || stride == 0 {
            return Err(PrepError::Configuration(format!(
                "window ({}) and stride ({}) must be positive",
                window, stride
            )));
        }
        Ok(Self {
            window,
            stride,
            drop_last,
        })
    }

    pub fn from_seconds(fs: u32, win_sec: u32, stride_sec: u32, drop_last: bool) -> Self {
        Self {
            window: fs as usize * win_sec as usize,
            stride: fs as usize * stride_sec as usize,
            drop_last,
        }
    }

    /// Number of windows [`Windows`] yields for a signal of `n_samples`
    pub fn count(&self, n_samples: usize) -> usize {
        let full = full_window_count(n_samples, self.window, self.stride);
        if full == 0 || self.drop_last {
            return full;
        }
        let next = full * self.stride;
        if next < n_samples {
            full + 1
        } else {
            full
        }
    }
}

/// One window: `[C, window]` samples starting at `start`
#[derive(Debug, Clone, PartialEq)]
pub struct Window {
    pub start: usize,
    /// Zero samples appended at the end (non-zero only for a trailing partial window)
    pub padding: usize,
    pub data: Array2<f32>,
}

/// `floor((T - W) / S) + 1` when `T >= W`, else 0
pub fn full_window_count(n_samples: usize, window: usize, stride: usize) -> usize {
    if window == 0 || stride == 0 || n_samples < window {
        return 0;
    }
    (n_samples - window) / stride + 1
}

/// Lazy iterator over the windows of a `[C, T]` signal, in offset order
pub struct Windows<'a> {
    signal: ArrayView2<'a, f32>,
    spec: WindowSpec,
    next_start: usize,
    done: bool,
}

impl<'a> Windows<'a> {
    pub fn new(signal: ArrayView2<'a, f32>, spec: WindowSpec) -> Self {
        let done = spec.window == 0 || spec.stride == 0 || signal.ncols() < spec.window;
        Self {
            signal,
            spec,
            next_start: 0,
            done,
        }
    }
}

impl Iterator for Windows<'_> {
    type Item = Window;

    fn next(&mut self) -> Option<Window> {
        if self.done {
            return None;
        }
        let total = self.signal.ncols();
        let start = self.next_start;
        let end = start + self.spec.window;

        if end <= total {
            self.next_start += self.spec.stride;
            return Some(Window {
                start,
                padding: 0,
                data: self.signal.slice(s![.., start..end]).to_owned(),
            });
        }

        self.done = true;
        if self.spec.drop_last || start >= total {
            return None;
        }
        let available = total - start;
        let mut data = Array2::<f32>::zeros((self.signal.nrows(), self.spec.window));
        data.slice_mut(s![.., ..available])
            .assign(&self.signal.slice(s![.., start..total]));
        Some(Window {
            start,
            padding: self.spec.window - available,
            data,
        })
    }
}

pub fn slice_windows(signal: &Array2<f32>, spec: WindowSpec) -> Windows<'_> {
    Windows::new(signal.view(), spec)
}
