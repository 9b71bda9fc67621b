/// Configuration for the EVM fuzzer
use std::{fs, path::Path};

use serde::{Deserialize, Serialize};

use super::{generator::GeneratorConfig, onchain::endpoints::RpcConfig};

#[derive(thiserror::Error, Debug)]
pub enum ConfigError {
    #[error("cannot read config: {0}")]
    Io(#[from] std::io::Error),
    #[error("invalid config: {0}")]
    Json(#[from] serde_json::Error),
    #[error("invalid config: {0}")]
    Invalid(String),
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct FuzzConfig {
    /// Number of deploy/exercise rounds
    pub rounds: usize,
    /// Seed of the per-round random streams
    pub seed: u64,
    /// Rounds running at the same time
    pub workers: usize,
    pub generator: GeneratorConfig,
    pub rpc: RpcConfig,
}

impl Default for FuzzConfig {
    fn default() -> Self {
        Self {
            rounds: 10,
            seed: 0,
            workers: 1,
            generator: GeneratorConfig::default(),
            rpc: RpcConfig::default(),
        }
    }
}

impl FuzzConfig {
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let data = fs::read_to_string(path)?;
        let config: Self = serde_json::from_str(&data)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.workers == 0 {
            return Err(ConfigError::Invalid("workers must be at least 1".to_string()));
        }
        for (name, ratio) in [
            ("boundary_ratio", self.generator.boundary_ratio),
            ("address_pool_ratio", self.generator.address_pool_ratio),
        ] {
            if !(0.0..=1.0).contains(&ratio) {
                return Err(ConfigError::Invalid(format!("{} must be within [0, 1], got {}", name, ratio)));
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use std::io::Write;

    use super::*;
    use crate::evm::types::EVMU256;

    #[test]
    fn test_partial_file_keeps_defaults() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, r#"{{"rounds": 3, "generator": {{"max_string_len": 4}}, "rpc": {{"retries": 0}}}}"#).unwrap();
        let config = FuzzConfig::from_file(file.path()).unwrap();
        assert_eq!(config.rounds, 3);
        assert_eq!(config.workers, 1);
        assert_eq!(config.generator.max_string_len, 4);
        assert_eq!(config.generator.max_bytes_len, 64);
        assert_eq!(config.generator.max_value, EVMU256::from(1_000_000_000_000_000_000u128));
        assert_eq!(config.rpc.retries, 0);
        assert_eq!(config.rpc.timeout_ms, 20_000);
    }

    #[test]
    fn test_invalid_ratio() {
        let mut config = FuzzConfig::default();
        config.generator.boundary_ratio = 1.5;
        assert!(matches!(config.validate(), Err(ConfigError::Invalid(_))));
    }

    #[test]
    fn test_bad_json() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, "rounds = 3").unwrap();
        assert!(matches!(FuzzConfig::from_file(file.path()), Err(ConfigError::Json(_))));
    }
}
