use ndarray::Array2;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;

use crate::signal::Window;

/// Binary rhythm class of a recording
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RecordClass {
    Normal,
    Af,
}

impl RecordClass {
    /// Classes in processing order
    pub const ALL: [RecordClass; 2] = [RecordClass::Normal, RecordClass::Af];

    pub fn as_str(&self) -> &'static str {
        match self {
            RecordClass::Normal => "normal",
            RecordClass::Af => "af",
        }
    }

    pub fn label(&self) -> u8 {
        match self {
            RecordClass::Normal => 0,
            RecordClass::Af => 1,
        }
    }

    pub fn from_label(label: u8) -> Option<Self> {
        match label {
            0 => Some(RecordClass::Normal),
            1 => Some(RecordClass::Af),
            _ => None,
        }
    }
}

impl fmt::Display for RecordClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One row of the discovery tables (`records_normal.csv`, `records_af.csv`)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RecordDescriptor {
    #[serde(rename = "class")]
    pub class: RecordClass,
    pub label: u8,
    /// Waveform path without extension
    pub basepath: String,
    pub recname: String,
    pub patient_id: String,
    #[serde(default)]
    pub fs: Option<f64>,
    #[serde(default)]
    pub n_leads: Option<usize>,
    #[serde(default)]
    pub leads: Option<String>,
    #[serde(default)]
    pub dur_sec: Option<f64>,
    #[serde(default)]
    pub has_atr: Option<u8>,
    #[serde(default)]
    pub has_qrs: Option<u8>,
}

impl RecordDescriptor {
    /// Check that the row can be handed to the loader as-is.
    pub fn validate(&self, expected: RecordClass) -> std::result::Result<(), String> {
        if self.recname.trim().is_empty() {
            return Err("empty recname".to_string());
        }
        if self.patient_id.trim().is_empty() {
            return Err(format!("{}: empty patient_id", self.recname));
        }
        if self.basepath.trim().is_empty() {
            return Err(format!("{}: empty basepath", self.recname));
        }
        if self.class != expected {
            return Err(format!(
                "{}: class '{}' found in the '{}' table",
                self.recname, self.class, expected
            ));
        }
        if RecordClass::from_label(self.label) != Some(self.class) {
            return Err(format!(
                "{}: label {} does not match class '{}'",
                self.recname, self.label, self.class
            ));
        }
        Ok(())
    }
}

/// Raw multi-channel recording as read from the waveform store
#[derive(Debug, Clone)]
pub struct Recording {
    pub recname: String,
    pub patient_id: String,
    pub class: RecordClass,
    /// Native sample rate in Hz
    pub fs: f64,
    pub channel_names: Vec<String>,
    /// `[channels, samples]`
    pub signal: Array2<f32>,
}

impl Recording {
    pub fn num_channels(&self) -> usize {
        self.signal.nrows()
    }

    pub fn num_samples(&self) -> usize {
        self.signal.ncols()
    }

    pub fn duration_secs(&self) -> f64 {
        if self.fs > 0.0 {
            self.num_samples() as f64 / self.fs
        } else {
            0.0
        }
    }
}

/// A window tagged with the recording it was sliced from
#[derive(Debug, Clone)]
pub struct WindowRecord {
    pub recname: String,
    pub patient_id: String,
    pub class: RecordClass,
    pub window: Window,
}

impl WindowRecord {
    /// File stem `{recname}_w{offset:09}`; lexicographic order equals offset order.
    pub fn file_stem(&self) -> String {
        format!("{}_w{:09}", self.recname, self.window.start)
    }
}

/// Index row for one interim (filtered, resampled, normalized) array
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InterimIndexEntry {
    #[serde(rename = "class")]
    pub class: RecordClass,
    pub label: u8,
    pub recname: String,
    pub patient_id: String,
    pub fs: u32,
    /// Comma-joined channel names
    pub leads: String,
    pub n_samples: usize,
    pub path: PathBuf,
}

/// Index row for one window array
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WindowIndexEntry {
    #[serde(rename = "class")]
    pub class: RecordClass,
    pub label: u8,
    pub recname: String,
    pub patient_id: String,
    pub fs: u32,
    pub win_sec: u32,
    pub stride_sec: u32,
    pub offset: usize,
    pub path: PathBuf,
}

/// Rows that live in a stage index and can be ordered deterministically
pub trait IndexRow {
    fn path(&self) -> &std::path::Path;
    /// `(class, patient_id, recname, offset)`
    fn sort_key(&self) -> (&'static str, &str, &str, usize);
}

impl IndexRow for InterimIndexEntry {
    fn path(&self) -> &std::path::Path {
        &self.path
    }

    fn sort_key(&self) -> (&'static str, &str, &str, usize) {
        (self.class.as_str(), &self.patient_id, &self.recname, 0)
    }
}

impl IndexRow for WindowIndexEntry {
    fn path(&self) -> &std::path::Path {
        &self.path
    }

    fn sort_key(&self) -> (&'static str, &str, &str, usize) {
        (
            self.class.as_str(),
            &self.patient_id,
            &self.recname,
            self.offset,
        )
    }
}
