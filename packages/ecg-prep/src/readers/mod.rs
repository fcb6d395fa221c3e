//! Waveform readers
//!
//! The loader stage reads a raw recording described by a [`RecordDescriptor`].
//! WFDB (`.hea` + `.dat`) and EDF files are supported; the format is chosen
//! from what exists at the descriptor's basepath.

use memmap2::Mmap;
use ndarray::Array2;
use std::fs::File;
use std::path::{Path, PathBuf};

pub mod edf;
pub mod wfdb;

pub use edf::EDFReader;
pub use wfdb::{WfdbHeader, WfdbReader, WfdbRecord};

use crate::error::{PrepError, Result};
use crate::types::{RecordDescriptor, Recording};

/// Open a file and map it into memory (read-only)
pub(crate) fn mmap_file(path: &Path) -> std::result::Result<Mmap, String> {
    let file =
        File::open(path).map_err(|e| format!("Failed to open {}: {}", path.display(), e))?;
    let mmap = unsafe { Mmap::map(&file) }
        .map_err(|e| format!("Failed to map {}: {}", path.display(), e))?;
    Ok(mmap)
}

/// Anything that can turn a descriptor into a raw recording
pub trait WaveformReader: Send + Sync {
    fn read(&self, descriptor: &RecordDescriptor) -> Result<Recording>;
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WaveformFormat {
    /// Path of the `.hea` header
    Wfdb(PathBuf),
    /// Path of the `.edf` file
    Edf(PathBuf),
}

/// Reads waveforms from the local filesystem. Relative basepaths are
/// resolved against `base_dir`.
#[derive(Debug, Clone)]
pub struct FileStore {
    base_dir: PathBuf,
}

impl FileStore {
    pub fn new<P: Into<PathBuf>>(base_dir: P) -> Self {
        Self {
            base_dir: base_dir.into(),
        }
    }

    pub fn resolve(&self, basepath: &str) -> PathBuf {
        let path = Path::new(basepath);
        if path.is_absolute() {
            path.to_path_buf()
        } else {
            self.base_dir.join(path)
        }
    }

    /// Decide how a basepath is stored on disk
    pub fn detect_format(base: &Path) -> Option<WaveformFormat> {
        let is_edf = base
            .extension()
            .and_then(|e| e.to_str())
            .is_some_and(|e| e.eq_ignore_ascii_case("edf"));
        if is_edf && base.is_file() {
            return Some(WaveformFormat::Edf(base.to_path_buf()));
        }

        let header = WfdbReader::header_path(base);
        if header.is_file() {
            return Some(WaveformFormat::Wfdb(header));
        }

        let mut edf = base.as_os_str().to_owned();
        edf.push(".edf");
        let edf = PathBuf::from(edf);
        if edf.is_file() {
            return Some(WaveformFormat::Edf(edf));
        }
        None
    }

    fn load(base: &Path) -> std::result::Result<(f64, Vec<String>, Vec<Vec<f32>>), String> {
        match Self::detect_format(base) {
            Some(WaveformFormat::Wfdb(_)) => {
                let record = WfdbReader::read(base)?;
                Ok((record.header.fs, record.channel_names, record.signals))
            }
            Some(WaveformFormat::Edf(path)) => {
                let reader = EDFReader::open(&path)?;
                let fs = reader.sample_rate()?;
                let (names, signals) = reader.read_physical()?;
                Ok((fs, names, signals))
            }
            None => Err(format!("No waveform found at {}", base.display())),
        }
    }
}

impl WaveformReader for FileStore {
    fn read(&self, descriptor: &RecordDescriptor) -> Result<Recording> {
        let base = self.resolve(&descriptor.basepath);
        let (fs, channel_names, channels) =
            Self::load(&base).map_err(|reason| PrepError::load(&descriptor.recname, reason))?;

        let n_samples = channels.first().map_or(0, Vec::len);
        if channels.is_empty() || n_samples == 0 {
            return Err(PrepError::load(&descriptor.recname, "recording has no samples"));
        }
        let mut signal = Array2::<f32>::zeros((channels.len(), n_samples));
        for (mut row, channel) in signal.outer_iter_mut().zip(&channels) {
            if channel.len() != n_samples {
                return Err(PrepError::load(
                    &descriptor.recname,
                    "channels have different lengths",
                ));
            }
            row.assign(&ndarray::ArrayView1::from(&channel[..]));
        }

        if let Some(expected) = descriptor.fs {
            if (expected - fs).abs() > 1e-6 {
                log::debug!(
                    "{}: table lists {} Hz, waveform header says {} Hz",
                    descriptor.recname,
                    expected,
                    fs
                );
            }
        }

        Ok(Recording {
            recname: descriptor.recname.clone(),
            patient_id: descriptor.patient_id.clone(),
            class: descriptor.class,
            fs,
            channel_names,
            signal,
        })
    }
}
