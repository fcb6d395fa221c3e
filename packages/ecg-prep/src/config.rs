//! Pipeline configuration
//!
//! Loaded once per run from YAML (`configs/base.yaml`) and passed by reference
//! into every stage. Nothing in the pipeline reads configuration from anywhere else.

use serde::{Deserialize, Serialize};
use std::path::Path;

use crate::error::{PrepError, Result};
use crate::signal::WindowSpec;

/// Bandpass cutoffs and Butterworth order
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BandpassConfig {
    /// Low cutoff in Hz
    pub low: f64,
    /// High cutoff in Hz
    pub high: f64,
    /// Butterworth order applied at each band edge
    #[serde(default = "default_filter_order")]
    pub order: usize,
}

fn default_filter_order() -> usize {
    4
}

fn default_drop_last() -> bool {
    true
}

fn default_shuffle_seed() -> u64 {
    42
}

/// Configuration for a full preprocessing run
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PipelineConfig {
    /// Sample rate every recording is resampled to (Hz)
    pub target_fs: u32,

    pub bandpass: BandpassConfig,

    /// Window length in seconds
    pub win_sec: u32,

    /// Stride between window starts in seconds (defaults to `win_sec`)
    #[serde(default)]
    pub stride_sec: Option<u32>,

    /// Discard a trailing partial window instead of zero-padding it
    #[serde(default = "default_drop_last")]
    pub drop_last: bool,

    /// Worker threads for per-recording work (None = rayon default)
    #[serde(default)]
    pub workers: Option<usize>,

    /// Seed for the final metadata shuffle
    #[serde(default = "default_shuffle_seed")]
    pub shuffle_seed: u64,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            target_fs: 250,
            bandpass: BandpassConfig {
                low: 0.5,
                high: 40.0,
                order: 4,
            },
            win_sec: 10,
            stride_sec: None,
            drop_last: true,
            workers: None,
            shuffle_seed: 42,
        }
    }
}

impl PipelineConfig {
    /// Read and validate a YAML configuration file
    pub fn from_yaml_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|e| {
            PrepError::Configuration(format!(
                "Failed to read config file {}: {}",
                path.display(),
                e
            ))
        })?;
        let config = Self::from_yaml_str(&content)?;
        log::debug!("Loaded configuration from {}: {:?}", path.display(), config);
        Ok(config)
    }

    pub fn from_yaml_str(content: &str) -> Result<Self> {
        let config: PipelineConfig = serde_yaml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    pub fn stride_sec(&self) -> u32 {
        self.stride_sec.unwrap_or(self.win_sec)
    }

    /// Window/stride in samples at the target rate
    pub fn window_spec(&self) -> WindowSpec {
        WindowSpec::from_seconds(self.target_fs, self.win_sec, self.stride_sec(), self.drop_last)
    }

    /// Checks that do not depend on any particular recording.
    ///
    /// The Nyquist bound on `bandpass.high` depends on each recording's native
    /// rate and is enforced by the filter stage.
    pub fn validate(&self) -> Result<()> {
        if self.target_fs == 0 {
            return Err(PrepError::Configuration(
                "target_fs must be a positive integer".to_string(),
            ));
        }
        if self.win_sec == 0 {
            return Err(PrepError::Configuration(
                "win_sec must be a positive integer".to_string(),
            ));
        }
        if self.stride_sec() == 0 {
            return Err(PrepError::Configuration(
                "stride_sec must be a positive integer".to_string(),
            ));
        }
        if self.workers == Some(0) {
            return Err(PrepError::Configuration(
                "workers must be at least 1".to_string(),
            ));
        }

        let bp = &self.bandpass;
        if bp.order == 0 {
            return Err(PrepError::Configuration(
                "bandpass order must be at least 1".to_string(),
            ));
        }
        if !(bp.low.is_finite() && bp.high.is_finite()) || bp.low <= 0.0 {
            return Err(PrepError::Configuration(format!(
                "bandpass low cutoff must be a positive frequency, got {}",
                bp.low
            )));
        }
        if bp.low >= bp.high {
            return Err(PrepError::Configuration(format!(
                "bandpass low cutoff ({} Hz) must be less than high cutoff ({} Hz)",
                bp.low, bp.high
            )));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const BASE_YAML: &str = r#"
target_fs: 250
bandpass:
  low: 0.5
  high: 40
  order: 4
win_sec: 10
class_roots:
  normal: { root: data/raw/ptbxl, label: 0 }
  af: { root: data/raw/mitbih_afdb, label: 1 }
"#;

    #[test]
    fn test_parse_base_yaml_with_defaults() {
        let config = PipelineConfig::from_yaml_str(BASE_YAML).unwrap();
        assert_eq!(config.target_fs, 250);
        assert_eq!(config.bandpass.high, 40.0);
        assert_eq!(config.stride_sec(), 10);
        assert!(config.drop_last);
        assert_eq!(config.shuffle_seed, 42);
        assert_eq!(config.workers, None);
    }

    #[test]
    fn test_window_spec_in_samples() {
        let config = PipelineConfig {
            stride_sec: Some(5),
            drop_last: false,
            ..Default::default()
        };
        let spec = config.window_spec();
        assert_eq!(spec.window, 2500);
        assert_eq!(spec.stride, 1250);
        assert!(!spec.drop_last);
    }

    #[test]
    fn test_rejects_zero_stride() {
        let config = PipelineConfig {
            stride_sec: Some(0),
            ..Default::default()
        };
        assert!(matches!(
            config.validate(),
            Err(PrepError::Configuration(_))
        ));
    }

    #[test]
    fn test_rejects_inverted_band() {
        let yaml = "target_fs: 250\nbandpass: {low: 40, high: 0.5}\nwin_sec: 10\n";
        assert!(matches!(
            PipelineConfig::from_yaml_str(yaml),
            Err(PrepError::Configuration(_))
        ));
    }

    #[test]
    fn test_rejects_zero_low_cutoff() {
        let yaml = "target_fs: 250\nbandpass: {low: 0, high: 40}\nwin_sec: 10\n";
        assert!(matches!(
            PipelineConfig::from_yaml_str(yaml),
            Err(PrepError::Configuration(_))
        ));
    }

    #[test]
    fn test_missing_file_is_configuration_error() {
        let err = PipelineConfig::from_yaml_file("/nonexistent/base.yaml").unwrap_err();
        assert!(err.is_fatal());
    }
}
