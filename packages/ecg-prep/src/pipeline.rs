//! Preprocessing pipeline
//!
//! Orchestrates the per-recording stages and the three named steps:
//! 1. `interim`: load, bandpass, resample, z-score, one array per recording
//! 2. `window`: slice interim arrays into fixed-length windows
//! 3. `metadata`: shuffle the combined window index into `metadata.csv`
//!
//! Recordings are processed in parallel on a rayon pool. Each recording's
//! failure is caught at one boundary and turned into a skip; only
//! configuration errors stop a step.

use chrono::{DateTime, Utc};
use ndarray::Array2;
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::SeedableRng;
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use crate::config::PipelineConfig;
use crate::error::{PrepError, Result};
use crate::index;
use crate::layout::DataLayout;
use crate::profiling::ProfileScope;
use crate::readers::{FileStore, WaveformReader};
use crate::signal::{bandpass_zero_phase, resample_to, slice_windows, zscore_per_lead};
use crate::storage;
use crate::types::{
    InterimIndexEntry, RecordClass, RecordDescriptor, Recording, WindowIndexEntry, WindowRecord,
};

/// Named steps, in canonical order
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Step {
    Interim,
    Window,
    Metadata,
}

impl Step {
    pub const ALL: [Step; 3] = [Step::Interim, Step::Window, Step::Metadata];

    pub fn as_str(&self) -> &'static str {
        match self {
            Step::Interim => "interim",
            Step::Window => "window",
            Step::Metadata => "metadata",
        }
    }

    pub fn description(&self) -> &'static str {
        match self {
            Step::Interim => "Bandpass, resample and z-score each recording into data/interim",
            Step::Window => "Slice interim arrays into fixed-length windows under data/windows",
            Step::Metadata => "Shuffle the combined window index into data/metadata.csv",
        }
    }
}

impl fmt::Display for Step {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Step {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        Step::ALL
            .into_iter()
            .find(|step| step.as_str().eq_ignore_ascii_case(s))
            .ok_or_else(|| {
                format!(
                    "unknown step '{}' (expected one of: interim, window, metadata)",
                    s
                )
            })
    }
}

/// A recording that did not make it through a step
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SkippedRecording {
    pub class: RecordClass,
    pub recname: String,
    pub reason: String,
}

/// Counts reported when a step completes
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StageReport {
    pub step: Step,
    pub processed: usize,
    pub skipped: usize,
    /// Recordings passed through unfiltered
    pub degraded: usize,
    /// Rows in the step's combined output table
    pub rows: usize,
    pub output: PathBuf,
    pub skipped_recordings: Vec<SkippedRecording>,
    pub started_at: DateTime<Utc>,
    pub elapsed_ms: f64,
}

impl StageReport {
    fn begin(step: Step) -> Self {
        Self {
            step,
            processed: 0,
            skipped: 0,
            degraded: 0,
            rows: 0,
            output: PathBuf::new(),
            skipped_recordings: Vec::new(),
            started_at: Utc::now(),
            elapsed_ms: 0.0,
        }
    }

    /// Some recordings were skipped
    pub fn is_partial(&self) -> bool {
        self.skipped > 0
    }

    /// Fold per-recording outcomes into the counts, returning the rows of
    /// the recordings that succeeded, in input order
    fn absorb<T>(&mut self, class: RecordClass, outcomes: Vec<Outcome<T>>) -> Vec<T> {
        let mut rows = Vec::new();
        for outcome in outcomes {
            match outcome {
                Outcome::Done {
                    rows: produced,
                    degraded,
                } => {
                    self.processed += 1;
                    if degraded {
                        self.degraded += 1;
                    }
                    rows.extend(produced);
                }
                Outcome::Skipped { recname, reason } => {
                    self.skipped += 1;
                    self.skipped_recordings.push(SkippedRecording {
                        class,
                        recname,
                        reason,
                    });
                }
            }
        }
        rows
    }

    fn finish(mut self, rows: usize, output: PathBuf, timer: &ProfileScope) -> Self {
        self.rows = rows;
        self.output = output;
        self.elapsed_ms = timer.elapsed_ms();
        log::info!(
            "[{}] processed={} skipped={} degraded={} rows={} -> {}",
            self.step,
            self.processed,
            self.skipped,
            self.degraded,
            self.rows,
            self.output.display()
        );
        self
    }
}

/// What one recording produced
enum Outcome<T> {
    Done { rows: Vec<T>, degraded: bool },
    Skipped { recname: String, reason: String },
}

/// Per-recording error boundary: configuration errors propagate, anything
/// else becomes a skip
fn contain<T>(
    class: RecordClass,
    recname: &str,
    result: Result<(Vec<T>, bool)>,
) -> Result<Outcome<T>> {
    match result {
        Ok((rows, degraded)) => Ok(Outcome::Done { rows, degraded }),
        Err(e) if e.is_fatal() => Err(e),
        Err(e) => {
            log::warn!("[skip] {}/{}: {}", class, recname, e);
            Ok(Outcome::Skipped {
                recname: recname.to_string(),
                reason: e.to_string(),
            })
        }
    }
}

/// Drop arrays of a recording that failed partway so no file lacks an index row
fn remove_written(paths: impl Iterator<Item = PathBuf>) {
    for path in paths {
        if let Err(e) = std::fs::remove_file(&path) {
            log::warn!("Failed to remove {}: {}", path.display(), e);
        }
    }
}

/// Output of the filter -> resample -> normalize chain
#[derive(Debug, Clone)]
pub struct ProcessedRecording {
    /// `[C, T']` at the target rate, z-scored per channel
    pub signal: Array2<f32>,
    /// Set when the bandpass was skipped and the raw signal passed through
    pub degraded: Option<String>,
}

/// Run the numeric chain on one recording.
///
/// Fails with a configuration error when the bandpass cannot be realized at
/// the recording's native rate, or a resample error when rate conversion fails.
pub fn preprocess(recording: &Recording, config: &PipelineConfig) -> Result<ProcessedRecording> {
    crate::profile_scope!(format!("preprocess {}", recording.recname));
    let filtered = bandpass_zero_phase(&recording.signal, recording.fs, &config.bandpass)?;
    let degraded = filtered.degraded_reason().map(str::to_string);
    if let Some(reason) = &degraded {
        log::warn!(
            "[warn] bandpass failed for {} (using raw): {}",
            recording.recname,
            reason
        );
    }

    let resampled = resample_to(&filtered.into_signal(), recording.fs, config.target_fs)?;
    let signal = zscore_per_lead(&resampled);
    log::debug!(
        "{}: {} channels, {} -> {} samples",
        recording.recname,
        recording.num_channels(),
        recording.num_samples(),
        signal.ncols()
    );
    Ok(ProcessedRecording { signal, degraded })
}

/// Runs steps against one project root
pub struct PipelineRunner<R: WaveformReader = FileStore> {
    config: PipelineConfig,
    layout: DataLayout,
    reader: R,
    pool: rayon::ThreadPool,
}

impl PipelineRunner<FileStore> {
    /// Runner reading waveforms from the filesystem, with relative
    /// basepaths resolved against `root`
    pub fn new<P: AsRef<Path>>(config: PipelineConfig, root: P) -> Result<Self> {
        let root = root.as_ref();
        Self::with_reader(config, DataLayout::new(root), FileStore::new(root))
    }
}

impl<R: WaveformReader> PipelineRunner<R> {
    pub fn with_reader(config: PipelineConfig, layout: DataLayout, reader: R) -> Result<Self> {
        config.validate()?;
        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(config.workers.unwrap_or(0))
            .build()
            .map_err(|e| PrepError::Configuration(format!("Failed to build worker pool: {}", e)))?;
        log::debug!("Worker pool with {} threads", pool.current_num_threads());
        Ok(Self {
            config,
            layout,
            reader,
            pool,
        })
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    pub fn layout(&self) -> &DataLayout {
        &self.layout
    }

    /// Run `steps` in canonical order, stopping at the first failing step
    pub fn run_steps(&self, steps: &[Step]) -> Result<Vec<StageReport>> {
        let mut ordered = steps.to_vec();
        ordered.sort();
        ordered.dedup();

        let mut reports = Vec::with_capacity(ordered.len());
        for step in ordered {
            log::info!("Running step '{}'", step);
            reports.push(self.run_step(step)?);
        }
        Ok(reports)
    }

    pub fn run_step(&self, step: Step) -> Result<StageReport> {
        match step {
            Step::Interim => self.run_interim(),
            Step::Window => self.run_window(),
            Step::Metadata => self.run_metadata(),
        }
    }

    /// Filter, resample and normalize every described recording
    pub fn run_interim(&self) -> Result<StageReport> {
        let timer = ProfileScope::new("interim step");
        let fs = self.config.target_fs;
        let mut report = StageReport::begin(Step::Interim);
        let mut per_class = Vec::with_capacity(RecordClass::ALL.len());

        for class in RecordClass::ALL {
            let (descriptors, duplicates) = index::split_duplicate_recnames(
                index::read_descriptors(&self.layout.records_table(class), class)?,
            );
            let mut outcomes = self.pool.install(|| {
                descriptors
                    .par_iter()
                    .map(|d| contain(class, &d.recname, self.interim_one(d)))
                    .collect::<Result<Vec<_>>>()
            })?;
            outcomes.extend(duplicates.into_iter().map(|d| {
                log::warn!("[skip] {}/{}: duplicate recname ({})", class, d.recname, d.basepath);
                Outcome::Skipped {
                    reason: format!(
                        "duplicate recname in {} records table (basepath {})",
                        class, d.basepath
                    ),
                    recname: d.recname,
                }
            }));
            let rows = report.absorb(class, outcomes);
            index::ensure_unique_paths(&rows)?;

            let class_index = self.layout.interim_class_index(fs, class);
            index::write_index(&class_index, &rows)?;
            log::info!("[interim] {} -> {} rows -> {}", class, rows.len(), class_index.display());
            per_class.push(rows);
        }

        let combined = index::combine(per_class)?;
        let combined_path = self.layout.interim_index(fs);
        index::write_index(&combined_path, &combined)?;
        Ok(report.finish(combined.len(), combined_path, &timer))
    }

    fn interim_one(&self, descriptor: &RecordDescriptor) -> Result<(Vec<InterimIndexEntry>, bool)> {
        let recording = self.reader.read(descriptor)?;
        let processed = preprocess(&recording, &self.config)?;

        let fs = self.config.target_fs;
        let path = self
            .layout
            .interim_array(fs, recording.class, &recording.recname);
        storage::write_array(&path, &processed.signal)?;

        let entry = InterimIndexEntry {
            class: recording.class,
            label: descriptor.label,
            recname: recording.recname.clone(),
            patient_id: recording.patient_id.clone(),
            fs,
            leads: recording.channel_names.join(","),
            n_samples: processed.signal.ncols(),
            path: self.layout.relative(&path),
        };
        Ok((vec![entry], processed.degraded.is_some()))
    }

    /// Slice every interim array into windows
    pub fn run_window(&self) -> Result<StageReport> {
        let timer = ProfileScope::new("window step");
        let fs = self.config.target_fs;
        let win_sec = self.config.win_sec;
        let mut report = StageReport::begin(Step::Window);
        let mut per_class = Vec::with_capacity(RecordClass::ALL.len());

        for class in RecordClass::ALL {
            let entries: Vec<InterimIndexEntry> =
                index::read_index_or_empty(&self.layout.interim_class_index(fs, class))?;
            let outcomes = self.pool.install(|| {
                entries
                    .par_iter()
                    .map(|e| contain(class, &e.recname, self.window_one(e, class)))
                    .collect::<Result<Vec<_>>>()
            })?;
            let rows = report.absorb(class, outcomes);
            index::ensure_unique_paths(&rows)?;

            let class_index = self.layout.window_class_index(fs, win_sec, class);
            index::write_index(&class_index, &rows)?;
            log::info!("[window] {} -> {} windows -> {}", class, rows.len(), class_index.display());
            per_class.push(rows);
        }

        let combined = index::combine(per_class)?;
        let combined_path = self.layout.window_index(fs, win_sec);
        index::write_index(&combined_path, &combined)?;
        Ok(report.finish(combined.len(), combined_path, &timer))
    }

    fn window_one(
        &self,
        entry: &InterimIndexEntry,
        class: RecordClass,
    ) -> Result<(Vec<WindowIndexEntry>, bool)> {
        let signal = storage::read_array(&self.layout.resolve(&entry.path))?;
        let spec = self.config.window_spec();
        let (fs, win_sec, stride_sec) = (
            self.config.target_fs,
            self.config.win_sec,
            self.config.stride_sec(),
        );

        let mut rows: Vec<WindowIndexEntry> = Vec::with_capacity(spec.count(signal.ncols()));
        for window in slice_windows(&signal, spec) {
            let record = WindowRecord {
                recname: entry.recname.clone(),
                patient_id: entry.patient_id.clone(),
                class,
                window,
            };
            let path = self
                .layout
                .window_array(fs, win_sec, class, &record.file_stem());
            if let Err(e) = storage::write_array(&path, &record.window.data) {
                remove_written(rows.iter().map(|row| self.layout.resolve(&row.path)));
                return Err(e);
            }
            rows.push(WindowIndexEntry {
                class,
                label: entry.label,
                recname: record.recname,
                patient_id: record.patient_id,
                fs,
                win_sec,
                stride_sec,
                offset: record.window.start,
                path: self.layout.relative(&path),
            });
        }
        log::debug!("{}: {} windows", entry.recname, rows.len());
        Ok((rows, false))
    }

    /// Shuffle the combined window index with the configured seed
    pub fn run_metadata(&self) -> Result<StageReport> {
        let timer = ProfileScope::new("metadata step");
        let mut report = StageReport::begin(Step::Metadata);
        let source = self
            .layout
            .window_index(self.config.target_fs, self.config.win_sec);
        if !source.exists() {
            return Err(PrepError::Index(format!(
                "{} not found; run the window step first",
                source.display()
            )));
        }

        let mut rows: Vec<WindowIndexEntry> = index::read_index(&source)?;
        index::ensure_unique_paths(&rows)?;
        let mut rng = StdRng::seed_from_u64(self.config.shuffle_seed);
        rows.shuffle(&mut rng);

        let output = self.layout.metadata();
        index::write_index(&output, &rows)?;
        report.processed = rows.len();
        Ok(report.finish(rows.len(), output, &timer))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::BandpassConfig;
    use std::f64::consts::PI;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tempfile::TempDir;

    /// Synthetic recordings keyed by recname; names starting with "missing"
    /// fail to load
    struct SyntheticReader {
        fs: f64,
        samples: usize,
        reads: AtomicUsize,
    }

    impl WaveformReader for SyntheticReader {
        fn read(&self, d: &RecordDescriptor) -> Result<Recording> {
            self.reads.fetch_add(1, Ordering::SeqCst);
            if d.recname.starts_with("missing") {
                return Err(PrepError::load(&d.recname, "no such waveform"));
            }
            let samples = if d.recname.starts_with("short") { 20 } else { self.samples };
            let fs = self.fs;
            Ok(Recording {
                recname: d.recname.clone(),
                patient_id: d.patient_id.clone(),
                class: d.class,
                fs,
                channel_names: vec!["I".to_string(), "II".to_string()],
                signal: Array2::from_shape_fn((2, samples), |(c, t)| {
                    ((2.0 * PI * 8.0 * t as f64 / fs).sin() * (c as f64 + 1.0)) as f32
                }),
            })
        }
    }

    fn write_table(root: &Path, class: RecordClass, names: &[&str]) {
        let layout = DataLayout::new(root);
        let path = layout.records_table(class);
        std::fs::create_dir_all(path.parent().unwrap()).unwrap();
        let mut text = String::from("class,label,basepath,recname,patient_id\n");
        for name in names {
            text.push_str(&format!(
                "{},{},raw/{},{},P{}\n",
                class,
                class.label(),
                name,
                name,
                name
            ));
        }
        std::fs::write(path, text).unwrap();
    }

    fn runner(root: &Path, config: PipelineConfig, fs: f64) -> PipelineRunner<SyntheticReader> {
        PipelineRunner::with_reader(
            config,
            DataLayout::new(root),
            SyntheticReader {
                fs,
                samples: 3600,
                reads: AtomicUsize::new(0),
            },
        )
        .unwrap()
    }

    fn small_config() -> PipelineConfig {
        PipelineConfig {
            target_fs: 250,
            win_sec: 2,
            workers: Some(2),
            ..Default::default()
        }
    }

    #[test]
    fn test_step_parsing_and_order() {
        assert_eq!("Window".parse::<Step>().unwrap(), Step::Window);
        assert!("extract".parse::<Step>().is_err());
        let mut steps = vec![Step::Metadata, Step::Interim];
        steps.sort();
        assert_eq!(steps, vec![Step::Interim, Step::Metadata]);
    }

    #[test]
    fn test_preprocess_resamples_and_normalizes() {
        let reader = SyntheticReader {
            fs: 360.0,
            samples: 3600,
            reads: AtomicUsize::new(0),
        };
        let d = RecordDescriptor {
            class: RecordClass::Normal,
            label: 0,
            basepath: "raw/100".to_string(),
            recname: "100".to_string(),
            patient_id: "P100".to_string(),
            fs: None,
            n_leads: None,
            leads: None,
            dur_sec: None,
            has_atr: None,
            has_qrs: None,
        };
        let recording = reader.read(&d).unwrap();
        let out = preprocess(&recording, &PipelineConfig::default()).unwrap();
        assert!(out.degraded.is_none());
        assert_eq!(out.signal.dim(), (2, 2500));
        for row in out.signal.outer_iter() {
            let mean = row.iter().map(|&v| v as f64).sum::<f64>() / row.len() as f64;
            assert!(mean.abs() < 1e-4);
        }
    }

    #[test]
    fn test_interim_counts_skips_and_degraded() {
        let tmp = TempDir::new().unwrap();
        write_table(tmp.path(), RecordClass::Normal, &["100", "missing1", "short1"]);
        write_table(tmp.path(), RecordClass::Af, &["04015"]);

        let runner = runner(tmp.path(), small_config(), 360.0);
        let report = runner.run_interim().unwrap();
        assert_eq!(report.processed, 3);
        assert_eq!(report.skipped, 1);
        assert_eq!(report.degraded, 1);
        assert_eq!(report.rows, 3);
        assert!(report.is_partial());
        assert_eq!(report.skipped_recordings[0].recname, "missing1");

        let layout = runner.layout();
        let combined: Vec<InterimIndexEntry> = index::read_index(&layout.interim_index(250)).unwrap();
        let names: Vec<&str> = combined.iter().map(|e| e.recname.as_str()).collect();
        assert_eq!(names, vec!["04015", "100", "short1"]);
        assert_eq!(combined[1].n_samples, 2500);
        assert_eq!(combined[1].leads, "I,II");
        assert!(layout.resolve(&combined[1].path).exists());
    }

    #[test]
    fn test_nyquist_violation_stops_the_step() {
        let tmp = TempDir::new().unwrap();
        write_table(tmp.path(), RecordClass::Normal, &["100", "101"]);
        let config = PipelineConfig {
            bandpass: BandpassConfig {
                low: 0.5,
                high: 100.0,
                order: 4,
            },
            ..small_config()
        };
        let runner = runner(tmp.path(), config, 128.0);
        let err = runner.run_interim().unwrap_err();
        assert!(matches!(err, PrepError::Configuration(_)));
        assert!(!runner.layout().interim_index(250).exists());
    }

    #[test]
    fn test_duplicate_recname_is_skipped_not_fatal() {
        let tmp = TempDir::new().unwrap();
        let layout = DataLayout::new(tmp.path());
        let path = layout.records_table(RecordClass::Normal);
        std::fs::create_dir_all(path.parent().unwrap()).unwrap();
        std::fs::write(
            &path,
            "class,label,basepath,recname,patient_id\n\
             normal,0,a/100,100,P1\n\
             normal,0,b/100,100,P1\n\
             normal,0,a/101,101,P2\n",
        )
        .unwrap();

        let runner = runner(tmp.path(), small_config(), 250.0);
        let report = runner.run_interim().unwrap();
        assert_eq!(report.processed, 2);
        assert_eq!(report.skipped, 1);
        assert_eq!(runner.reader.reads.load(Ordering::SeqCst), 2);
        assert_eq!(report.skipped_recordings[0].recname, "100");
        assert!(report.skipped_recordings[0].reason.contains("b/100"));

        let class_rows: Vec<InterimIndexEntry> =
            index::read_index(&layout.interim_class_index(250, RecordClass::Normal)).unwrap();
        let names: Vec<&str> = class_rows.iter().map(|e| e.recname.as_str()).collect();
        assert_eq!(names, vec!["100", "101"]);
    }

    #[test]
    fn test_failed_window_write_leaves_no_orphans() {
        let tmp = TempDir::new().unwrap();
        write_table(tmp.path(), RecordClass::Normal, &["100", "101"]);
        let runner = runner(tmp.path(), small_config(), 250.0);
        runner.run_interim().unwrap();

        let layout = runner.layout();
        let blocker = layout.window_array(250, 2, RecordClass::Normal, "100_w000000500");
        std::fs::create_dir_all(&blocker).unwrap();

        let report = runner.run_window().unwrap();
        assert_eq!(report.processed, 1);
        assert_eq!(report.skipped, 1);
        assert_eq!(report.skipped_recordings[0].recname, "100");
        assert!(!layout
            .window_array(250, 2, RecordClass::Normal, "100_w000000000")
            .exists());
        assert!(layout
            .window_array(250, 2, RecordClass::Normal, "101_w000000000")
            .exists());
    }

    #[test]
    fn test_window_and_metadata_steps() {
        let tmp = TempDir::new().unwrap();
        write_table(tmp.path(), RecordClass::Normal, &["100", "101"]);
        write_table(tmp.path(), RecordClass::Af, &["04015"]);

        let config = PipelineConfig {
            stride_sec: Some(1),
            drop_last: false,
            ..small_config()
        };
        let runner = runner(tmp.path(), config, 250.0);
        let reports = runner
            .run_steps(&[Step::Metadata, Step::Window, Step::Interim])
            .unwrap();
        let steps: Vec<Step> = reports.iter().map(|r| r.step).collect();
        assert_eq!(steps, Step::ALL.to_vec());

        // 3600 samples, W=500, S=250: 13 full windows + 1 padded tail
        let window_report = &reports[1];
        assert_eq!(window_report.processed, 3);
        assert_eq!(window_report.rows, 3 * 14);

        let layout = runner.layout();
        let windows: Vec<WindowIndexEntry> =
            index::read_index(&layout.window_index(250, 2)).unwrap();
        let first_rec: Vec<usize> = windows
            .iter()
            .filter(|w| w.recname == "100")
            .map(|w| w.offset)
            .collect();
        assert_eq!(first_rec, (0..14).map(|k| k * 250).collect::<Vec<_>>());
        let tail = storage::read_array(&layout.resolve(&windows.last().unwrap().path)).unwrap();
        assert_eq!(tail.dim(), (2, 500));

        let metadata: Vec<WindowIndexEntry> = index::read_index(&layout.metadata()).unwrap();
        assert_eq!(metadata.len(), windows.len());
        assert_ne!(metadata, windows);
        let mut sorted = metadata.clone();
        index::sort_rows(&mut sorted);
        assert_eq!(sorted, windows);

        // Same seed, same order
        runner.run_metadata().unwrap();
        let again: Vec<WindowIndexEntry> = index::read_index(&layout.metadata()).unwrap();
        assert_eq!(again, metadata);
    }

    #[test]
    fn test_metadata_requires_window_index() {
        let tmp = TempDir::new().unwrap();
        let runner = runner(tmp.path(), small_config(), 250.0);
        assert!(matches!(runner.run_metadata(), Err(PrepError::Index(_))));
    }
}
