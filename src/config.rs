use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::embed::{DEFAULT_DIMENSIONS, DEFAULT_MODEL, DEFAULT_TIMEOUT_SECS};
use crate::search::{DEFAULT_LIMIT, DEFAULT_THRESHOLD, MAX_LIMIT};
use crate::storage::DataDir;

const CONFIG_FILE: &str = "config.yaml";

const DEFAULT_LISTEN_ADDR: &str = "0.0.0.0:8080";
const TASK_QUEUE_MAX_THREADS: u16 = 4;
const DEFAULT_API_BASE: &str = "https://api.openai.com/v1";
const DEFAULT_API_KEY_ENV: &str = "OPENAI_API_KEY";

/// Configuration for the search pipeline
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct SearchConfig {
    /// Attempt the semantic path for non-blank queries
    #[serde(default = "default_semantic_enabled")]
    pub semantic_enabled: bool,

    /// Similarity cutoff [0.0, 1.0]; results must score strictly above it
    #[serde(default = "default_threshold")]
    pub threshold: f32,

    /// Page size when the request does not specify one
    #[serde(default = "default_limit")]
    pub default_limit: usize,

    /// Hard cap on the page size
    #[serde(default = "default_max_limit")]
    pub max_limit: usize,
}

impl Default for SearchConfig {
    fn default() -> Self {
        Self {
            semantic_enabled: true,
            threshold: DEFAULT_THRESHOLD,
            default_limit: DEFAULT_LIMIT,
            max_limit: MAX_LIMIT,
        }
    }
}

fn default_semantic_enabled() -> bool {
    true
}

fn default_threshold() -> f32 {
    DEFAULT_THRESHOLD
}

fn default_limit() -> usize {
    DEFAULT_LIMIT
}

fn default_max_limit() -> usize {
    MAX_LIMIT
}

/// Configuration for the embedding provider
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct EmbeddingConfig {
    /// Base URL of an OpenAI-compatible API
    #[serde(default = "default_api_base")]
    pub api_base: String,

    /// Environment variable holding the api key
    #[serde(default = "default_api_key_env")]
    pub api_key_env: String,

    /// Embedding model name
    #[serde(default = "default_model")]
    pub model: String,

    /// Vector dimensionality; must match the model
    #[serde(default = "default_dimensions")]
    pub dimensions: usize,

    /// Per-request timeout in seconds
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            api_base: DEFAULT_API_BASE.to_string(),
            api_key_env: DEFAULT_API_KEY_ENV.to_string(),
            model: DEFAULT_MODEL.to_string(),
            dimensions: DEFAULT_DIMENSIONS,
            timeout_secs: DEFAULT_TIMEOUT_SECS,
        }
    }
}

fn default_api_base() -> String {
    DEFAULT_API_BASE.to_string()
}

fn default_api_key_env() -> String {
    DEFAULT_API_KEY_ENV.to_string()
}

fn default_model() -> String {
    DEFAULT_MODEL.to_string()
}

fn default_dimensions() -> usize {
    DEFAULT_DIMENSIONS
}

fn default_timeout_secs() -> u64 {
    DEFAULT_TIMEOUT_SECS
}

/// An api token and the owner it authenticates as
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct OwnerToken {
    pub token: String,
    pub owner: String,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Config {
    #[serde(default = "default_listen_addr")]
    pub listen_addr: String,

    #[serde(default = "task_queue_max_threads")]
    pub task_queue_max_threads: u16,

    #[serde(default)]
    pub search: SearchConfig,

    #[serde(default)]
    pub embedding: EmbeddingConfig,

    #[serde(default)]
    pub tokens: Vec<OwnerToken>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            listen_addr: default_listen_addr(),
            task_queue_max_threads: TASK_QUEUE_MAX_THREADS,
            search: SearchConfig::default(),
            embedding: EmbeddingConfig::default(),
            tokens: vec![],
        }
    }
}

fn default_listen_addr() -> String {
    DEFAULT_LISTEN_ADDR.to_string()
}

fn task_queue_max_threads() -> u16 {
    TASK_QUEUE_MAX_THREADS
}

impl Config {
    fn validate(&mut self) {
        if self.task_queue_max_threads == 0 {
            self.task_queue_max_threads = 1
        }

        let search = &self.search;
        if !(0.0..=1.0).contains(&search.threshold) {
            panic!(
                "search.threshold must be between 0.0 and 1.0, got {}",
                search.threshold
            );
        }
        if search.max_limit == 0 {
            panic!("search.max_limit must be greater than 0");
        }
        if search.default_limit == 0 || search.default_limit > search.max_limit {
            panic!(
                "search.default_limit must be between 1 and search.max_limit ({}), got {}",
                search.max_limit, search.default_limit
            );
        }

        let embedding = &self.embedding;
        if embedding.dimensions == 0 {
            panic!("embedding.dimensions must be greater than 0");
        }
        if embedding.timeout_secs == 0 {
            panic!("embedding.timeout_secs must be greater than 0");
        }

        for (idx, entry) in self.tokens.iter().enumerate() {
            let idx = idx + 1;
            if entry.token.is_empty() || entry.owner.is_empty() {
                panic!("tokens entry #{idx} must have a token and an owner");
            }
            if self.tokens.iter().filter(|t| t.token == entry.token).count() > 1 {
                panic!("tokens entry #{idx} duplicates another token");
            }
        }
    }

    pub fn load_with(base_path: &Path) -> Self {
        let store = DataDir::new(base_path).expect("couldnt create data directory");

        // create new if does not exist
        if !store.exists(CONFIG_FILE) {
            store
                .write(
                    CONFIG_FILE,
                    serde_yml::to_string(&Self::default())
                        .expect("default config serializes")
                        .as_bytes(),
                )
                .expect("couldnt write default config");
        }

        let config_str = String::from_utf8(store.read(CONFIG_FILE).expect("couldnt read config"))
            .expect("config file is not valid utf8");
        let mut config: Self = serde_yml::from_str(&config_str).expect("config is malformed");

        config.validate();

        // resave in case config version needs an upgrade
        if config_str != serde_yml::to_string(&config).unwrap_or_default() {
            config.save(base_path);
        }

        config
    }

    pub fn save(&self, base_path: &Path) {
        let store = DataDir::new(base_path).expect("couldnt create data directory");
        let config_str = serde_yml::to_string(&self).expect("config serializes");
        if let Err(err) = store.write(CONFIG_FILE, config_str.as_bytes()) {
            log::error!("failed to save config: {err}");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn load_creates_default_config_file() {
        let dir = tempfile::tempdir().unwrap();
        let config = Config::load_with(dir.path());

        assert!(dir.path().join(CONFIG_FILE).exists());
        assert!(config.search.semantic_enabled);
        assert_eq!(config.search.threshold, DEFAULT_THRESHOLD);
        assert_eq!(config.search.default_limit, DEFAULT_LIMIT);
        assert_eq!(config.embedding.dimensions, DEFAULT_DIMENSIONS);
    }

    #[test]
    fn load_round_trips_saved_values() {
        let dir = tempfile::tempdir().unwrap();

        let mut config = Config::load_with(dir.path());
        config.search.threshold = 0.5;
        config.tokens.push(OwnerToken {
            token: "secret".into(),
            owner: "owner-a".into(),
        });
        config.save(dir.path());

        let reloaded = Config::load_with(dir.path());
        assert_eq!(reloaded.search.threshold, 0.5);
        assert_eq!(reloaded.tokens.len(), 1);
        assert_eq!(reloaded.tokens[0].owner, "owner-a");
    }

    #[test]
    #[should_panic(expected = "search.threshold")]
    fn out_of_range_threshold_is_rejected() {
        let mut config = Config::default();
        config.search.threshold = 1.5;
        config.validate();
    }

    #[test]
    #[should_panic(expected = "duplicates another token")]
    fn duplicate_tokens_are_rejected() {
        let mut config = Config::default();
        config.tokens = vec![
            OwnerToken {
                token: "same".into(),
                owner: "a".into(),
            },
            OwnerToken {
                token: "same".into(),
                owner: "b".into(),
            },
        ];
        config.validate();
    }
}
