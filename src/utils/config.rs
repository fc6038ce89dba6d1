//! TOML helpers for config files.

use std::fs;
use std::path::Path;

use serde::{de::DeserializeOwned, Serialize};

use crate::utils::error::{Error, Result};

/// Read and parse a TOML config file.
pub fn load_toml_config<T>(path: &Path) -> Result<T>
where
    T: DeserializeOwned,
{
    let content = fs::read_to_string(path)
        .map_err(|e| Error::Config(format!("Failed to read config {}: {e}", path.display())))?;

    toml::from_str(&content)
        .map_err(|e| Error::Config(format!("Failed to parse config {}: {e}", path.display())))
}

/// Serialize `value` as pretty TOML and write it to `path`.
pub fn save_toml_config<T>(value: &T, path: &Path) -> Result<()>
where
    T: Serialize,
{
    let content = toml::to_string_pretty(value)?;
    fs::write(path, content)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;

    #[derive(Debug, PartialEq, Serialize, Deserialize)]
    struct Sample {
        name: String,
        width: usize,
    }

    #[test]
    fn test_toml_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("sample.toml");
        let sample = Sample { name: "probe".into(), width: 64 };

        save_toml_config(&sample, &path).unwrap();
        let loaded: Sample = load_toml_config(&path).unwrap();
        assert_eq!(loaded, sample);
    }

    #[test]
    fn test_missing_file_is_config_error() {
        let result: Result<Sample> = load_toml_config(Path::new("/nonexistent/model.toml"));
        assert!(matches!(result, Err(Error::Config(_))));
    }
}
