// WFDB (PhysioNet) record reader
// Header format: https://physionet.org/physiotools/wag/header-5.htm
// Signal formats: https://physionet.org/physiotools/wag/signal-5.htm

use std::path::{Path, PathBuf};

use super::mmap_file;

/// Sample rate assumed when the record line omits it
const DEFAULT_FS: f64 = 250.0;
/// ADC gain assumed when the header gives 0 or nothing
const DEFAULT_GAIN: f64 = 200.0;

#[derive(Debug, Clone)]
pub struct WfdbHeader {
    pub record_name: String,
    pub num_signals: usize,
    pub fs: f64,
    /// Samples per signal; derived from the data file size when absent
    pub num_samples: Option<usize>,
    pub signals: Vec<WfdbSignalSpec>,
}

#[derive(Debug, Clone)]
pub struct WfdbSignalSpec {
    pub file_name: String,
    pub format: u16,
    pub samples_per_frame: usize,
    pub skew: usize,
    pub byte_offset: usize,
    pub gain: f64,
    pub baseline: i64,
    pub units: String,
    pub adc_resolution: Option<u32>,
    pub adc_zero: i64,
    pub description: Option<String>,
}

impl WfdbSignalSpec {
    fn to_physical(&self, digital: i32) -> f32 {
        if digital == invalid_sentinel(self.format) {
            return f32::NAN;
        }
        ((digital as i64 - self.baseline) as f64 / self.gain) as f32
    }
}

/// Digital value reserved for "no sample" in each format
fn invalid_sentinel(format: u16) -> i32 {
    match format {
        80 => -128,
        212 => -2048,
        24 => -(1 << 23),
        32 => i32::MIN,
        _ => i16::MIN as i32,
    }
}

fn is_supported_format(format: u16) -> bool {
    matches!(format, 16 | 61 | 80 | 212 | 24 | 32)
}

/// Bytes for `n` consecutive samples of `format`
fn bytes_for_samples(format: u16, n: usize) -> usize {
    match format {
        80 => n,
        212 => (3 * n + 1) / 2,
        24 => 3 * n,
        32 => 4 * n,
        _ => 2 * n,
    }
}

/// Whole samples that fit in `bytes` bytes of `format`
fn samples_in_bytes(format: u16, bytes: usize) -> usize {
    match format {
        80 => bytes,
        212 => 2 * bytes / 3,
        24 => bytes / 3,
        32 => bytes / 4,
        _ => bytes / 2,
    }
}

fn parse_number<T: std::str::FromStr>(field: &str, what: &str) -> Result<T, String> {
    field
        .parse::<T>()
        .map_err(|_| format!("Invalid {} '{}'", what, field))
}

/// Leading numeric part of a compound field such as `360/1(0)` or `200(0)/mV`
fn leading_number(field: &str) -> &str {
    let end = field.find(|c| c == '/' || c == '(').unwrap_or(field.len());
    &field[..end]
}

impl WfdbHeader {
    pub fn parse(content: &str) -> Result<Self, String> {
        let mut lines = content
            .lines()
            .map(str::trim)
            .filter(|l| !l.is_empty() && !l.starts_with('#'));

        let record_line = lines.next().ok_or("Header has no record line")?;
        let fields: Vec<&str> = record_line.split_whitespace().collect();
        let name_field = fields[0];
        if name_field.contains('/') {
            return Err(format!(
                "Multi-segment record '{}' is not supported",
                name_field
            ));
        }
        let num_signals: usize = match fields.get(1) {
            Some(f) => parse_number(f, "signal count")?,
            None => return Err("Record line is missing the signal count".to_string()),
        };
        if num_signals == 0 {
            return Err("Record has no signals".to_string());
        }
        let fs = match fields.get(2) {
            Some(f) => parse_number::<f64>(leading_number(f), "sampling frequency")?,
            None => DEFAULT_FS,
        };
        if !(fs.is_finite() && fs > 0.0) {
            return Err(format!("Invalid sampling frequency {}", fs));
        }
        let num_samples = match fields.get(3) {
            Some(f) => Some(parse_number::<usize>(f, "sample count")?),
            None => None,
        };

        let mut signals = Vec::with_capacity(num_signals);
        for (i, line) in lines.take(num_signals).enumerate() {
            signals.push(Self::parse_signal_line(line).map_err(|e| format!("Signal {}: {}", i, e))?);
        }
        if signals.len() != num_signals {
            return Err(format!(
                "Header declares {} signals but describes {}",
                num_signals,
                signals.len()
            ));
        }

        Ok(Self {
            record_name: name_field.to_string(),
            num_signals,
            fs,
            num_samples: num_samples.filter(|&n| n > 0),
            signals,
        })
    }

    fn parse_signal_line(line: &str) -> Result<WfdbSignalSpec, String> {
        let fields: Vec<&str> = line.split_whitespace().collect();
        if fields.len() < 2 {
            return Err(format!("Malformed signal line '{}'", line));
        }
        let file_name = fields[0].to_string();

        // format[xspf][:skew][+offset]
        let spec = fields[1];
        let fmt_end = spec
            .find(|c: char| !c.is_ascii_digit())
            .unwrap_or(spec.len());
        let format: u16 = parse_number(&spec[..fmt_end], "format")?;
        let mut samples_per_frame = 1;
        let mut skew = 0;
        let mut byte_offset = 0;
        let mut rest = &spec[fmt_end..];
        while let Some(tag) = rest.chars().next() {
            if !matches!(tag, 'x' | ':' | '+') {
                return Err(format!("Malformed format field '{}'", spec));
            }
            let body = &rest[tag.len_utf8()..];
            let end = body
                .find(|c: char| !c.is_ascii_digit())
                .unwrap_or(body.len());
            let value: usize = parse_number(&body[..end], "format modifier")?;
            match tag {
                'x' => samples_per_frame = value,
                ':' => skew = value,
                _ => byte_offset = value,
            }
            rest = &body[end..];
        }

        let adc_resolution = match fields.get(3) {
            Some(f) => Some(parse_number(f, "ADC resolution")?),
            None => None,
        };
        let adc_zero = match fields.get(4) {
            Some(f) => parse_number(f, "ADC zero")?,
            None => 0,
        };

        // gain[(baseline)][/units]
        let mut gain = DEFAULT_GAIN;
        let mut baseline = adc_zero;
        let mut units = "mV".to_string();
        if let Some(g) = fields.get(2) {
            let value: f64 = parse_number(leading_number(g), "gain")?;
            if value != 0.0 {
                gain = value;
            }
            if let Some(open) = g.find('(') {
                let close = g[open..]
                    .find(')')
                    .ok_or_else(|| format!("Unclosed baseline in '{}'", g))?;
                baseline = parse_number(&g[open + 1..open + close], "baseline")?;
            }
            if let Some(slash) = g.find('/') {
                units = g[slash + 1..].to_string();
            }
        }

        let description = if fields.len() > 8 {
            Some(fields[8..].join(" "))
        } else {
            None
        };

        Ok(WfdbSignalSpec {
            file_name,
            format,
            samples_per_frame,
            skew,
            byte_offset,
            gain,
            baseline,
            units,
            adc_resolution,
            adc_zero,
            description,
        })
    }

    pub fn channel_names(&self) -> Vec<String> {
        self.signals
            .iter()
            .enumerate()
            .map(|(i, s)| s.description.clone().unwrap_or_else(|| format!("sig{}", i)))
            .collect()
    }

    /// Signals grouped by data file, in order of first appearance.
    /// Each group lists signal indices in header order.
    fn file_groups(&self) -> Vec<(String, Vec<usize>)> {
        let mut groups: Vec<(String, Vec<usize>)> = Vec::new();
        for (i, s) in self.signals.iter().enumerate() {
            match groups.iter_mut().find(|(name, _)| *name == s.file_name) {
                Some((_, members)) => members.push(i),
                None => groups.push((s.file_name.clone(), vec![i])),
            }
        }
        groups
    }
}

/// Decoded WFDB record: physical units, one `Vec` per signal
#[derive(Debug, Clone)]
pub struct WfdbRecord {
    pub header: WfdbHeader,
    pub channel_names: Vec<String>,
    pub signals: Vec<Vec<f32>>,
}

impl WfdbRecord {
    pub fn num_samples(&self) -> usize {
        self.signals.first().map_or(0, Vec::len)
    }
}

pub struct WfdbReader;

impl WfdbReader {
    /// `{basepath}.hea`
    pub fn header_path(basepath: &Path) -> PathBuf {
        let mut path = basepath.as_os_str().to_owned();
        path.push(".hea");
        PathBuf::from(path)
    }

    /// Read the header at `{basepath}.hea` and every data file it references
    pub fn read(basepath: &Path) -> Result<WfdbRecord, String> {
        let header_path = Self::header_path(basepath);
        let content = std::fs::read_to_string(&header_path)
            .map_err(|e| format!("Failed to read {}: {}", header_path.display(), e))?;
        let header = WfdbHeader::parse(&content)?;
        let dir = header_path.parent().unwrap_or_else(|| Path::new("."));

        for s in &header.signals {
            if !is_supported_format(s.format) {
                return Err(format!("Unsupported signal format {}", s.format));
            }
            if s.samples_per_frame != 1 {
                return Err(format!(
                    "Multi-frequency signals ({} samples per frame) are not supported",
                    s.samples_per_frame
                ));
            }
            if s.skew != 0 {
                return Err("Skewed signals are not supported".to_string());
            }
        }

        let mut signals: Vec<Vec<f32>> = vec![Vec::new(); header.num_signals];
        let mut num_samples = header.num_samples;

        for (file_name, members) in header.file_groups() {
            let first = &header.signals[members[0]];
            if members
                .iter()
                .any(|&i| header.signals[i].format != first.format)
            {
                return Err(format!("Signals in {} use mixed formats", file_name));
            }
            let path = dir.join(&file_name);
            let mmap = mmap_file(&path)?;
            let data = mmap.get(first.byte_offset..).ok_or_else(|| {
                format!(
                    "Byte offset {} is past the end of {}",
                    first.byte_offset, file_name
                )
            })?;

            let frame_width = members.len();
            let frames = match num_samples {
                Some(n) => n,
                None => samples_in_bytes(first.format, data.len()) / frame_width,
            };
            num_samples.get_or_insert(frames);

            let digital = decode_samples(data, first.format, frames * frame_width)
                .map_err(|e| format!("{}: {}", file_name, e))?;

            for (slot, &sig) in members.iter().enumerate() {
                let spec = &header.signals[sig];
                signals[sig] = digital
                    .iter()
                    .skip(slot)
                    .step_by(frame_width)
                    .map(|&d| spec.to_physical(d))
                    .collect();
            }
        }

        let lengths_match = signals.windows(2).all(|w| w[0].len() == w[1].len());
        if !lengths_match {
            return Err("Data files disagree on the number of samples".to_string());
        }

        log::debug!(
            "WFDB record {}: {} signals, {} samples at {} Hz",
            header.record_name,
            header.num_signals,
            signals.first().map_or(0, Vec::len),
            header.fs
        );

        Ok(WfdbRecord {
            channel_names: header.channel_names(),
            header,
            signals,
        })
    }
}

/// Decode `n` interleaved digital samples from the start of `data`
pub fn decode_samples(data: &[u8], format: u16, n: usize) -> Result<Vec<i32>, String> {
    let needed = bytes_for_samples(format, n);
    if data.len() < needed {
        return Err(format!(
            "expected at least {} bytes for {} samples, found {}",
            needed,
            n,
            data.len()
        ));
    }

    let samples = match format {
        16 => data[..needed]
            .chunks_exact(2)
            .map(|b| i16::from_le_bytes([b[0], b[1]]) as i32)
            .collect(),
        61 => data[..needed]
            .chunks_exact(2)
            .map(|b| i16::from_be_bytes([b[0], b[1]]) as i32)
            .collect(),
        80 => data[..needed].iter().map(|&b| b as i32 - 128).collect(),
        212 => {
            let mut out = Vec::with_capacity(n);
            for pair in data[..needed].chunks(3) {
                let low = pair[0] as i32 | ((pair[1] as i32 & 0x0F) << 8);
                out.push(sign_extend_12(low));
                if pair.len() == 3 && out.len() < n {
                    let high = pair[2] as i32 | ((pair[1] as i32 & 0xF0) << 4);
                    out.push(sign_extend_12(high));
                }
            }
            out
        }
        24 => data[..needed]
            .chunks_exact(3)
            .map(|b| i32::from_le_bytes([0, b[0], b[1], b[2]]) >> 8)
            .collect(),
        32 => data[..needed]
            .chunks_exact(4)
            .map(|b| i32::from_le_bytes([b[0], b[1], b[2], b[3]]))
            .collect(),
        other => return Err(format!("Unsupported signal format {}", other)),
    };
    Ok(samples)
}

fn sign_extend_12(value: i32) -> i32 {
    if value > 2047 {
        value - 4096
    } else {
        value
    }
}
