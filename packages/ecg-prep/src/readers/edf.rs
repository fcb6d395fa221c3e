// EDF (European Data Format) reader
// Specification: https://www.edfplus.info/specs/edf.html

use memmap2::Mmap;
use std::io::{Cursor, Read};
use std::path::Path;

use super::mmap_file;

/// Label of EDF+ annotation channels, which carry no waveform
const ANNOTATION_LABEL: &str = "EDF Annotations";

#[derive(Debug, Clone)]
pub struct EDFHeader {
    pub patient_id: String,           // 80 bytes: local patient identification
    pub start_date: String,           // 8 bytes: startdate of recording (dd.mm.yy)
    pub start_time: String,           // 8 bytes: starttime of recording (hh.mm.ss)
    pub header_bytes: usize,          // 8 bytes: number of bytes in header record
    pub num_data_records: i64,        // 8 bytes: number of data records (-1 if unknown)
    pub duration_of_data_record: f64, // 8 bytes: duration of a data record, in seconds
    pub num_signals: usize,           // 4 bytes: number of signals (channels)
}

#[derive(Debug, Clone)]
pub struct EDFSignalHeader {
    pub label: String,                 // 16 bytes
    pub physical_dimension: String,    // 8 bytes: physical dimension (e.g. mV)
    pub physical_minimum: f64,         // 8 bytes
    pub physical_maximum: f64,         // 8 bytes
    pub digital_minimum: i64,          // 8 bytes
    pub digital_maximum: i64,          // 8 bytes
    pub num_samples_per_record: usize, // 8 bytes: number of samples in each data record
}

impl EDFSignalHeader {
    pub fn sample_frequency(&self, record_duration: f64) -> f64 {
        self.num_samples_per_record as f64 / record_duration
    }

    pub fn gain(&self) -> f64 {
        let digital_range = (self.digital_maximum - self.digital_minimum) as f64;
        if digital_range == 0.0 {
            return 1.0;
        }
        (self.physical_maximum - self.physical_minimum) / digital_range
    }

    pub fn offset(&self) -> f64 {
        self.physical_maximum - self.gain() * self.digital_maximum as f64
    }

    pub fn is_annotation(&self) -> bool {
        self.label == ANNOTATION_LABEL
    }
}

pub struct EDFReader {
    mmap: Mmap,
    pub header: EDFHeader,
    pub signal_headers: Vec<EDFSignalHeader>,
}

impl EDFReader {
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self, String> {
        let mmap = mmap_file(path.as_ref())?;
        let mut cursor = Cursor::new(&mmap[..]);
        let header = Self::read_header(&mut cursor)?;
        let signal_headers = Self::read_signal_headers(&mut cursor, header.num_signals)?;
        Ok(Self {
            mmap,
            header,
            signal_headers,
        })
    }

    fn read_fixed_string<R: Read>(reader: &mut R, size: usize) -> Result<String, String> {
        let mut buffer = vec![0u8; size];
        reader
            .read_exact(&mut buffer)
            .map_err(|e| format!("Truncated EDF header: {}", e))?;
        Ok(String::from_utf8_lossy(&buffer).trim().to_string())
    }

    fn read_field<R: Read, T: std::str::FromStr>(
        reader: &mut R,
        size: usize,
        what: &str,
    ) -> Result<T, String> {
        let s = Self::read_fixed_string(reader, size)?;
        s.parse::<T>()
            .map_err(|_| format!("Invalid {} '{}'", what, s))
    }

    fn read_header<R: Read>(reader: &mut R) -> Result<EDFHeader, String> {
        let _version = Self::read_fixed_string(reader, 8)?;
        let patient_id = Self::read_fixed_string(reader, 80)?;
        let _recording_id = Self::read_fixed_string(reader, 80)?;
        let start_date = Self::read_fixed_string(reader, 8)?;
        let start_time = Self::read_fixed_string(reader, 8)?;
        let header_bytes = Self::read_field(reader, 8, "header bytes")?;
        let _reserved = Self::read_fixed_string(reader, 44)?;
        let num_data_records = Self::read_field(reader, 8, "number of data records")?;
        let duration_of_data_record: f64 = Self::read_field(reader, 8, "record duration")?;
        let num_signals = Self::read_field(reader, 4, "number of signals")?;

        if !(duration_of_data_record > 0.0) {
            return Err(format!(
                "Record duration must be positive, got {}",
                duration_of_data_record
            ));
        }

        log::debug!(
            "EDF header parsed: num_data_records={}, duration_of_data_record={}, num_signals={}",
            num_data_records,
            duration_of_data_record,
            num_signals
        );

        Ok(EDFHeader {
            patient_id,
            start_date,
            start_time,
            header_bytes,
            num_data_records,
            duration_of_data_record,
            num_signals,
        })
    }

    fn read_signal_headers<R: Read>(
        reader: &mut R,
        num_signals: usize,
    ) -> Result<Vec<EDFSignalHeader>, String> {
        // Fields are stored column-wise: all labels, then all transducers, ...
        let mut labels = Vec::with_capacity(num_signals);
        for _ in 0..num_signals {
            labels.push(Self::read_fixed_string(reader, 16)?);
        }
        for _ in 0..num_signals {
            Self::read_fixed_string(reader, 80)?;
        }
        let mut dimensions = Vec::with_capacity(num_signals);
        for _ in 0..num_signals {
            dimensions.push(Self::read_fixed_string(reader, 8)?);
        }
        let mut phys_min = Vec::with_capacity(num_signals);
        for _ in 0..num_signals {
            phys_min.push(Self::read_field::<_, f64>(reader, 8, "physical minimum")?);
        }
        let mut phys_max = Vec::with_capacity(num_signals);
        for _ in 0..num_signals {
            phys_max.push(Self::read_field::<_, f64>(reader, 8, "physical maximum")?);
        }
        let mut dig_min = Vec::with_capacity(num_signals);
        for _ in 0..num_signals {
            dig_min.push(Self::read_field::<_, i64>(reader, 8, "digital minimum")?);
        }
        let mut dig_max = Vec::with_capacity(num_signals);
        for _ in 0..num_signals {
            dig_max.push(Self::read_field::<_, i64>(reader, 8, "digital maximum")?);
        }
        for _ in 0..num_signals {
            Self::read_fixed_string(reader, 80)?;
        }
        let mut spr = Vec::with_capacity(num_signals);
        for _ in 0..num_signals {
            spr.push(Self::read_field::<_, usize>(reader, 8, "number of samples")?);
        }
        for _ in 0..num_signals {
            Self::read_fixed_string(reader, 32)?;
        }

        Ok((0..num_signals)
            .map(|i| EDFSignalHeader {
                label: labels[i].clone(),
                physical_dimension: dimensions[i].clone(),
                physical_minimum: phys_min[i],
                physical_maximum: phys_max[i],
                digital_minimum: dig_min[i],
                digital_maximum: dig_max[i],
                num_samples_per_record: spr[i],
            })
            .collect())
    }

    /// Bytes in one data record (all signals, 2 bytes per sample)
    fn record_size(&self) -> usize {
        self.signal_headers
            .iter()
            .map(|sh| sh.num_samples_per_record * 2)
            .sum()
    }

    /// Number of complete data records, from the header or the file size
    pub fn num_records(&self) -> usize {
        let available = self.mmap.len().saturating_sub(self.header.header_bytes);
        let record_size = self.record_size();
        let in_file = if record_size == 0 {
            0
        } else {
            available / record_size
        };
        if self.header.num_data_records < 0 {
            in_file
        } else {
            (self.header.num_data_records as usize).min(in_file)
        }
    }

    /// Indices of waveform signals (annotation channels excluded)
    pub fn data_signals(&self) -> Vec<usize> {
        (0..self.signal_headers.len())
            .filter(|&i| !self.signal_headers[i].is_annotation())
            .collect()
    }

    /// Common sample rate of the waveform signals
    pub fn sample_rate(&self) -> Result<f64, String> {
        let signals = self.data_signals();
        let first = signals
            .first()
            .ok_or("EDF file has no waveform signals")?;
        let spr = self.signal_headers[*first].num_samples_per_record;
        if signals
            .iter()
            .any(|&i| self.signal_headers[i].num_samples_per_record != spr)
        {
            return Err("EDF signals have different sample rates".to_string());
        }
        Ok(self.signal_headers[*first].sample_frequency(self.header.duration_of_data_record))
    }

    /// Every waveform signal in physical units, in header order
    pub fn read_physical(&self) -> Result<(Vec<String>, Vec<Vec<f32>>), String> {
        let selected = self.data_signals();
        let num_records = self.num_records();
        let record_size = self.record_size();

        // Byte offset of each signal within a data record
        let mut offsets = Vec::with_capacity(self.signal_headers.len());
        let mut acc = 0;
        for sh in &self.signal_headers {
            offsets.push(acc);
            acc += sh.num_samples_per_record * 2;
        }

        let mut names = Vec::with_capacity(selected.len());
        let mut signals = Vec::with_capacity(selected.len());
        for &i in &selected {
            let sh = &self.signal_headers[i];
            let gain = sh.gain();
            let offset = sh.offset();
            let mut samples = Vec::with_capacity(num_records * sh.num_samples_per_record);
            for record in 0..num_records {
                let start = self.header.header_bytes + record * record_size + offsets[i];
                let bytes = &self.mmap[start..start + sh.num_samples_per_record * 2];
                samples.extend(bytes.chunks_exact(2).map(|b| {
                    let digital = i16::from_le_bytes([b[0], b[1]]);
                    (gain * digital as f64 + offset) as f32
                }));
            }
            names.push(sh.label.clone());
            signals.push(samples);
        }
        Ok((names, signals))
    }

    pub fn total_duration(&self) -> f64 {
        self.num_records() as f64 * self.header.duration_of_data_record
    }
}
