pub mod config;
pub mod error;
pub mod index;
pub mod layout;
pub mod pipeline;
pub mod profiling;
pub mod readers;
pub mod signal;
pub mod storage;
pub mod types;

pub use config::{BandpassConfig, PipelineConfig};
pub use error::{PrepError, Result};
pub use layout::DataLayout;
pub use pipeline::{preprocess, PipelineRunner, ProcessedRecording, StageReport, Step};
pub use readers::{FileStore, WaveformReader};
pub use types::*;
