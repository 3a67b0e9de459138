//! Service configuration, read from and written to TOML. Every field has a
//! default, so an empty or partial file is valid.

use crate::estimator::{BoostingParams, ForestParams};
use serde::{Deserialize, Serialize};
use std::fs;
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("Failed to parse configuration from TOML: {0}")]
    TomlParse(#[from] toml::de::Error),
    #[error("Failed to serialize configuration to TOML: {0}")]
    TomlSerialize(#[from] toml::ser::Error),
    #[error("test_fraction must lie strictly between 0 and 1, got {0}.")]
    InvalidTestFraction(f64),
}

/// Seed, split and estimator hyperparameters for one training run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TrainingConfig {
    /// Seeds synthetic labels, partitions and estimators.
    pub seed: u64,
    pub test_fraction: f64,
    pub forest: ForestParams,
    pub boosting: BoostingParams,
}

impl Default for TrainingConfig {
    fn default() -> Self {
        Self {
            seed: 42,
            test_fraction: 0.2,
            forest: ForestParams::default(),
            boosting: BoostingParams::default(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServiceConfig {
    /// Labelled CSV used for the initial fit and for retraining.
    pub dataset_path: PathBuf,
    pub model_dir: PathBuf,
    pub guidelines_path: PathBuf,
    pub training: TrainingConfig,
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            dataset_path: PathBuf::from("Cancer_Data.csv"),
            model_dir: PathBuf::from("models"),
            guidelines_path: PathBuf::from("guidelines.json"),
            training: TrainingConfig::default(),
        }
    }
}

impl ServiceConfig {
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let toml_string = fs::read_to_string(path)?;
        let config: Self = toml::from_str(&toml_string)?;
        config.validate()?;
        Ok(config)
    }

    pub fn save(&self, path: &Path) -> Result<(), ConfigError> {
        let toml_string = toml::to_string_pretty(self)?;
        let mut file = BufWriter::new(fs::File::create(path)?);
        file.write_all(toml_string.as_bytes())?;
        file.flush()?;
        Ok(())
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        let fraction = self.training.test_fraction;
        if !(fraction > 0.0 && fraction < 1.0) {
            return Err(ConfigError::InvalidTestFraction(fraction));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn partial_files_fall_back_to_defaults() {
        let config: ServiceConfig = toml::from_str(
            r#"
            model_dir = "artifacts"

            [training.forest]
            n_estimators = 7
            "#,
        )
        .unwrap();
        assert_eq!(config.model_dir, PathBuf::from("artifacts"));
        assert_eq!(config.dataset_path, PathBuf::from("Cancer_Data.csv"));
        assert_eq!(config.training.seed, 42);
        assert_eq!(config.training.forest.n_estimators, 7);
        assert_eq!(config.training.forest.min_samples_split, 2);
        assert_eq!(config.training.boosting.learning_rate, 0.1);
    }

    #[test]
    fn save_and_load_agree() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("oncoscope.toml");
        let mut config = ServiceConfig::default();
        config.training.forest.max_depth = Some(8);
        config.training.seed = 7;
        config.save(&path).unwrap();
        assert_eq!(ServiceConfig::load(&path).unwrap(), config);
    }

    #[test]
    fn test_fraction_outside_the_unit_interval_is_rejected() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("bad.toml");
        fs::write(&path, "[training]\ntest_fraction = 1.0\n").unwrap();
        assert!(matches!(
            ServiceConfig::load(&path),
            Err(ConfigError::InvalidTestFraction(_))
        ));
    }
}
