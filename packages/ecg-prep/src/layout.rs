//! On-disk layout of a project's data directory

use std::path::{Path, PathBuf};

use crate::types::RecordClass;

/// Paths of every table and array the pipeline reads or writes.
///
/// Paths recorded in index files are relative to the project root so a
/// prepared tree can be moved as a whole.
#[derive(Debug, Clone)]
pub struct DataLayout {
    root: PathBuf,
}

impl DataLayout {
    pub fn new<P: Into<PathBuf>>(root: P) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn data_dir(&self) -> PathBuf {
        self.root.join("data")
    }

    pub fn default_config(&self) -> PathBuf {
        self.root.join("configs").join("base.yaml")
    }

    /// Descriptor table produced by the discovery step
    pub fn records_table(&self, class: RecordClass) -> PathBuf {
        self.data_dir().join(format!("records_{}.csv", class))
    }

    pub fn interim_dir(&self, fs: u32) -> PathBuf {
        self.data_dir().join("interim").join(format!("{}hz", fs))
    }

    pub fn interim_array(&self, fs: u32, class: RecordClass, recname: &str) -> PathBuf {
        self.interim_dir(fs)
            .join(class.as_str())
            .join(format!("{}.npy", recname))
    }

    pub fn interim_class_index(&self, fs: u32, class: RecordClass) -> PathBuf {
        self.interim_dir(fs)
            .join(format!("{}hz_{}_index.csv", fs, class))
    }

    pub fn interim_index(&self, fs: u32) -> PathBuf {
        self.interim_dir(fs).join(format!("{}hz_index.csv", fs))
    }

    pub fn windows_dir(&self, fs: u32, win_sec: u32) -> PathBuf {
        self.data_dir()
            .join("windows")
            .join(format!("{}hz_{}s", fs, win_sec))
    }

    pub fn window_array(&self, fs: u32, win_sec: u32, class: RecordClass, stem: &str) -> PathBuf {
        self.windows_dir(fs, win_sec)
            .join(class.as_str())
            .join(format!("{}.npy", stem))
    }

    pub fn window_class_index(&self, fs: u32, win_sec: u32, class: RecordClass) -> PathBuf {
        self.windows_dir(fs, win_sec)
            .join(format!("{}hz_{}s_{}_index.csv", fs, win_sec, class))
    }

    pub fn window_index(&self, fs: u32, win_sec: u32) -> PathBuf {
        self.windows_dir(fs, win_sec)
            .join(format!("{}hz_{}s_index.csv", fs, win_sec))
    }

    pub fn metadata(&self) -> PathBuf {
        self.data_dir().join("metadata.csv")
    }

    /// Form stored in index files
    pub fn relative(&self, path: &Path) -> PathBuf {
        path.strip_prefix(&self.root)
            .map(Path::to_path_buf)
            .unwrap_or_else(|_| path.to_path_buf())
    }

    /// Inverse of [`relative`](Self::relative)
    pub fn resolve(&self, path: &Path) -> PathBuf {
        if path.is_absolute() {
            path.to_path_buf()
        } else {
            self.root.join(path)
        }
    }
}
