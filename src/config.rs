use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::semantic::{DevicePreference, DEFAULT_MODEL};

/// Default number of results returned from similarity queries
const DEFAULT_TOP_K: usize = 5;
/// Default FIFO cache capacity (queries)
const DEFAULT_CACHE_CAPACITY: usize = 100;
/// Default dimension for the hashed provider
const DEFAULT_HASHED_DIMENSION: usize = 256;

/// Which embedding provider the engine binds at startup.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProviderKind {
    #[default]
    Transformer,
    Hashed,
}

/// Configuration for the embedding provider and index.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Provider to bind: "transformer" or "hashed"
    #[serde(default)]
    pub provider: ProviderKind,

    /// Sentence-transformer checkpoint name
    #[serde(default = "default_model")]
    pub model: String,

    /// Directory for downloaded model files
    #[serde(default = "default_model_cache_dir")]
    pub cache_dir: String,

    /// Vector dimension when the hashed provider is used
    #[serde(default = "default_hashed_dimension")]
    pub hashed_dimension: usize,

    /// Device preference: "auto", "cpu", or "cuda"
    #[serde(default)]
    pub device: DevicePreference,

    /// Query cache capacity; 0 disables caching
    #[serde(default = "default_cache_capacity")]
    pub cache_capacity: usize,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            provider: ProviderKind::default(),
            model: DEFAULT_MODEL.to_string(),
            cache_dir: default_model_cache_dir(),
            hashed_dimension: DEFAULT_HASHED_DIMENSION,
            device: DevicePreference::default(),
            cache_capacity: DEFAULT_CACHE_CAPACITY,
        }
    }
}

fn default_model() -> String {
    DEFAULT_MODEL.to_string()
}

fn default_model_cache_dir() -> String {
    "models".to_string()
}

fn default_hashed_dimension() -> usize {
    DEFAULT_HASHED_DIMENSION
}

fn default_cache_capacity() -> usize {
    DEFAULT_CACHE_CAPACITY
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub engine: EngineConfig,

    /// Directory holding the persisted corpus and index
    #[serde(default = "default_data_dir")]
    pub data_dir: String,

    /// Default result count for queries that do not specify one
    #[serde(default = "default_top_k")]
    pub top_k: usize,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            engine: EngineConfig::default(),
            data_dir: default_data_dir(),
            top_k: DEFAULT_TOP_K,
        }
    }
}

fn default_data_dir() -> String {
    "data".to_string()
}

fn default_top_k() -> usize {
    DEFAULT_TOP_K
}

impl Config {
    fn validate(&mut self) {
        if self.top_k == 0 {
            self.top_k = DEFAULT_TOP_K;
        }
        if self.engine.hashed_dimension == 0 {
            panic!("engine.hashed_dimension must be positive");
        }
        if self.engine.model.trim().is_empty() {
            panic!("engine.model must not be empty");
        }
    }

    /// Read the config file, creating it with defaults when missing.
    pub fn load(path: &Path) -> std::io::Result<Config> {
        if !path.exists() {
            let config = Config::default();
            config.save(path)?;
            log::info!("created default config at {}", path.display());
            return Ok(config);
        }

        let raw = std::fs::read_to_string(path)?;
        let mut config: Config = serde_yml::from_str(&raw)
            .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidData, e))?;
        config.validate();
        Ok(config)
    }

    pub fn save(&self, path: &Path) -> std::io::Result<()> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }
        let raw = serde_yml::to_string(self)
            .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidData, e))?;
        std::fs::write(path, raw)
    }

    pub fn corpus_path(&self) -> PathBuf {
        Path::new(&self.data_dir).join("corpus.json")
    }

    pub fn index_path(&self) -> PathBuf {
        Path::new(&self.data_dir).join("index.bin")
    }
}
