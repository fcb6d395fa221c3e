use thiserror::Error;

#[derive(Error, Debug)]
pub enum PrepError {
    /// Fatal: every recording would fail the same way.
    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error("Failed to load recording {recname}: {reason}")]
    RecordingLoad { recname: String, reason: String },

    #[error("Resampling failed: {0}")]
    Resample(String),

    #[error("Index error: {0}")]
    Index(String),

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("CSV error: {0}")]
    CsvError(#[from] csv::Error),

    #[error("Failed to write array: {0}")]
    NpyWrite(#[from] ndarray_npy::WriteNpyError),

    #[error("Failed to read array: {0}")]
    NpyRead(#[from] ndarray_npy::ReadNpyError),

    #[error("Failed to parse configuration: {0}")]
    YamlError(#[from] serde_yaml::Error),
}

impl PrepError {
    pub fn load(recname: impl Into<String>, reason: impl Into<String>) -> Self {
        PrepError::RecordingLoad {
            recname: recname.into(),
            reason: reason.into(),
        }
    }

    /// Whether this error must stop the whole run rather than skip one recording.
    pub fn is_fatal(&self) -> bool {
        matches!(self, PrepError::Configuration(_) | PrepError::YamlError(_))
    }
}

pub type Result<T> = std::result::Result<T, PrepError>;
