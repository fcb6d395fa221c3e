pub mod run;
pub mod steps;
pub mod validate;

use ecg_prep::{DataLayout, PipelineConfig};
use std::path::PathBuf;

/// Explicit `--config`, else `<root>/configs/base.yaml`
pub fn config_path(root: &str, config: Option<&str>) -> PathBuf {
    match config {
        Some(path) => PathBuf::from(path),
        None => DataLayout::new(root).default_config(),
    }
}

pub fn load_config(root: &str, config: Option<&str>) -> Result<(PathBuf, PipelineConfig), String> {
    let path = config_path(root, config);
    let config = PipelineConfig::from_yaml_file(&path).map_err(|e| e.to_string())?;
    Ok((path, config))
}
