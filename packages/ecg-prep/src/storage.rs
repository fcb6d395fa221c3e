use ndarray::Array2;
use ndarray_npy::{ReadNpyExt, WriteNpyExt};
use std::fs::{self, File};
use std::io::{BufReader, BufWriter};
use std::path::Path;

use crate::error::Result;

/// Write a `[C, T]` float32 array as `.npy`, creating parent directories
pub fn write_array(path: &Path, array: &Array2<f32>) -> Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }
    let writer = BufWriter::new(File::create(path)?);
    array.write_npy(writer)?;
    Ok(())
}

pub fn read_array(path: &Path) -> Result<Array2<f32>> {
    let reader = BufReader::new(File::open(path)?);
    Ok(Array2::<f32>::read_npy(reader)?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::PrepError;
    use tempfile::TempDir;

    #[test]
    fn test_write_creates_directories() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("interim/250hz/af/04015.npy");
        let array = Array2::from_shape_fn((2, 5), |(c, t)| c as f32 - t as f32 * 0.5);
        write_array(&path, &array).unwrap();
        assert_eq!(read_array(&path).unwrap(), array);
    }

    #[test]
    fn test_read_missing_file() {
        let tmp = TempDir::new().unwrap();
        let err = read_array(&tmp.path().join("none.npy")).unwrap_err();
        assert!(matches!(err, PrepError::IoError(_)));
    }
}
