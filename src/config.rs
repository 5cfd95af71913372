//! Configuration System
//!
//! Loads engine configuration from a TOML file. Backends are
//! construct-from-config: each `[[finder]]` table names a backend kind
//! and its settings, and [`EngineConfig::build_store`] turns them into
//! a registered [`Store`] at startup.
//!
//! ```toml
//! [logging]
//! filter = "carbide=debug"
//!
//! [[finder]]
//! kind = "memory"
//! name = "demo"
//! batched = true
//!
//! [[finder.series]]
//! path = "servers.web01.cpu"
//! start = 0
//! step = 60
//! values = [0.5, 0.7, nan, 0.6]   # nan marks a missing sample
//! ```

use crate::storage::{Finder, MemoryFinder, Store};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use thiserror::Error;

/// Main configuration structure
#[derive(Debug, Clone, Default, Deserialize)]
pub struct EngineConfig {
    #[serde(default)]
    pub logging: LoggingConfig,

    #[serde(default, rename = "finder")]
    pub finders: Vec<FinderConfig>,
}

/// Logging configuration
#[derive(Debug, Clone, Deserialize)]
pub struct LoggingConfig {
    #[serde(default = "default_log_filter")]
    pub filter: String,
}

fn default_log_filter() -> String {
    "carbide=info".to_string()
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            filter: default_log_filter(),
        }
    }
}

/// One configured backend.
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum FinderConfig {
    /// The in-memory backend, seeded with inline series.
    Memory {
        #[serde(default = "default_finder_name")]
        name: String,
        #[serde(default)]
        batched: bool,
        #[serde(default)]
        series: Vec<SeriesSeed>,
    },
}

fn default_finder_name() -> String {
    "memory".to_string()
}

/// One seeded series of a memory backend. A `nan` value marks a
/// missing sample.
#[derive(Debug, Clone, Deserialize)]
pub struct SeriesSeed {
    pub path: String,
    #[serde(default)]
    pub start: i64,
    #[serde(default = "default_seed_step")]
    pub step: i64,
    #[serde(default)]
    pub values: Vec<f64>,
}

fn default_seed_step() -> i64 {
    60
}

impl EngineConfig {
    /// Load configuration from a TOML file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let raw = std::fs::read_to_string(path.as_ref())?;
        Ok(toml::from_str(&raw)?)
    }

    /// The default configuration file location.
    pub fn default_path() -> PathBuf {
        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("carbide")
            .join("carbide.toml")
    }

    /// Construct and register every configured backend.
    pub fn build_store(&self) -> Result<Store, ConfigError> {
        let mut finders: Vec<Arc<dyn Finder>> = Vec::with_capacity(self.finders.len());
        for finder in &self.finders {
            match finder {
                FinderConfig::Memory {
                    name,
                    batched,
                    series,
                } => {
                    let mut memory = MemoryFinder::new(name);
                    if *batched {
                        memory = memory.batched();
                    }
                    for seed in series {
                        if seed.step <= 0 {
                            return Err(ConfigError::Invalid(format!(
                                "series '{}' has non-positive step {}",
                                seed.path, seed.step
                            )));
                        }
                        let values = seed
                            .values
                            .iter()
                            .map(|v| if v.is_nan() { None } else { Some(*v) })
                            .collect();
                        memory.add_series(&seed.path, seed.start, seed.step, values);
                    }
                    finders.push(Arc::new(memory));
                }
            }
        }
        Ok(Store::new(finders))
    }
}

/// Errors that can occur while loading configuration
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Parse error: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("Invalid configuration: {0}")]
    Invalid(String),
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write as _;

    const SAMPLE: &str = r#"
[logging]
filter = "carbide=debug"

[[finder]]
kind = "memory"
name = "demo"
batched = true

[[finder.series]]
path = "servers.web01.cpu"
start = 0
step = 60
values = [0.5, 0.7, nan, 0.6]
"#;

    #[test]
    fn test_parse_sample_config() {
        let config: EngineConfig = toml::from_str(SAMPLE).unwrap();
        assert_eq!(config.logging.filter, "carbide=debug");
        assert_eq!(config.finders.len(), 1);
        match &config.finders[0] {
            FinderConfig::Memory { name, batched, series } => {
                assert_eq!(name, "demo");
                assert!(batched);
                assert_eq!(series.len(), 1);
                assert!(series[0].values[2].is_nan());
            }
        }
    }

    #[test]
    fn test_defaults() {
        let config: EngineConfig = toml::from_str("").unwrap();
        assert_eq!(config.logging.filter, "carbide=info");
        assert!(config.finders.is_empty());
    }

    #[tokio::test]
    async fn test_build_store_round_trip() {
        let config: EngineConfig = toml::from_str(SAMPLE).unwrap();
        let store = config.build_store().unwrap();
        let nodes = store.find("servers.web01.cpu", None, None).await.unwrap();
        assert_eq!(nodes.len(), 1);
        assert!(nodes[0].is_leaf());
    }

    #[test]
    fn test_load_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(SAMPLE.as_bytes()).unwrap();
        let config = EngineConfig::load(file.path()).unwrap();
        assert_eq!(config.finders.len(), 1);
    }

    #[test]
    fn test_rejects_bad_step() {
        let config: EngineConfig = toml::from_str(
            r#"
[[finder]]
kind = "memory"

[[finder.series]]
path = "a.b"
step = 0
"#,
        )
        .unwrap();
        assert!(matches!(
            config.build_store(),
            Err(ConfigError::Invalid(_))
        ));
    }
}
