//! Index tables: descriptor input, per-class and combined stage indexes

use serde::de::DeserializeOwned;
use serde::Serialize;
use std::collections::HashSet;
use std::fs;
use std::path::Path;

use crate::error::{PrepError, Result};
use crate::types::{IndexRow, RecordClass, RecordDescriptor};

/// Read one class's descriptor table.
///
/// A missing table means the class has no recordings. Rows that fail to
/// parse or validate are dropped with a warning.
pub fn read_descriptors(path: &Path, class: RecordClass) -> Result<Vec<RecordDescriptor>> {
    if !path.exists() {
        log::warn!(
            "No {} records table at {}; treating the class as empty",
            class,
            path.display()
        );
        return Ok(Vec::new());
    }

    let mut reader = csv::Reader::from_path(path)?;
    let mut descriptors = Vec::new();
    for (line, row) in reader.deserialize::<RecordDescriptor>().enumerate() {
        match row {
            Ok(descriptor) => match descriptor.validate(class) {
                Ok(()) => descriptors.push(descriptor),
                Err(reason) => log::warn!("Dropping row {} of {}: {}", line + 1, path.display(), reason),
            },
            Err(e) => log::warn!("Dropping row {} of {}: {}", line + 1, path.display(), e),
        }
    }

    log::debug!(
        "Read {} {} descriptors from {}",
        descriptors.len(),
        class,
        path.display()
    );
    Ok(descriptors)
}

/// Keep the first descriptor for each `recname`; later rows with the same
/// name are returned separately since they would share one interim array.
pub fn split_duplicate_recnames(
    descriptors: Vec<RecordDescriptor>,
) -> (Vec<RecordDescriptor>, Vec<RecordDescriptor>) {
    let mut seen = HashSet::with_capacity(descriptors.len());
    descriptors
        .into_iter()
        .partition(|d| seen.insert(d.recname.clone()))
}

/// Write rows as CSV with a header line, creating parent directories.
///
/// An empty slice still produces the file, with no header.
pub fn write_index<T: Serialize>(path: &Path, rows: &[T]) -> Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }
    let mut writer = csv::Writer::from_path(path)?;
    for row in rows {
        writer.serialize(row)?;
    }
    writer.flush()?;
    Ok(())
}

pub fn read_index<T: DeserializeOwned>(path: &Path) -> Result<Vec<T>> {
    let mut reader = csv::Reader::from_path(path)?;
    let mut rows = Vec::new();
    for row in reader.deserialize() {
        rows.push(row?);
    }
    Ok(rows)
}

/// Like [`read_index`], but a missing file reads as empty
pub fn read_index_or_empty<T: DeserializeOwned>(path: &Path) -> Result<Vec<T>> {
    if !path.exists() {
        log::warn!("Index {} not found; treating it as empty", path.display());
        return Ok(Vec::new());
    }
    read_index(path)
}

/// Order by `(class, patient_id, recname, offset)`
pub fn sort_rows<T: IndexRow>(rows: &mut [T]) {
    rows.sort_by(|a, b| a.sort_key().cmp(&b.sort_key()));
}

/// Every persisted array must appear in exactly one row
pub fn ensure_unique_paths<T: IndexRow>(rows: &[T]) -> Result<()> {
    let mut seen = HashSet::with_capacity(rows.len());
    for row in rows {
        if !seen.insert(row.path()) {
            return Err(PrepError::Index(format!(
                "duplicate path {}",
                row.path().display()
            )));
        }
    }
    Ok(())
}

/// Concatenate per-class rows into the combined, sorted index
pub fn combine<T: IndexRow>(per_class: Vec<Vec<T>>) -> Result<Vec<T>> {
    let mut rows: Vec<T> = per_class.into_iter().flatten().collect();
    sort_rows(&mut rows);
    ensure_unique_paths(&rows)?;
    Ok(rows)
}
