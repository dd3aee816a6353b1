use std::{
    net::SocketAddr,
    path::{Path, PathBuf},
};

use serde::{Deserialize, Serialize};

use crate::semantic::{embeddings::parse_model_name, DEFAULT_MODEL};

const DEFAULT_BIND: &str = "0.0.0.0:8080";
const DEFAULT_COLLECTION: &str = "sign_vectors";
const DEFAULT_SEARCH_LIMIT: usize = 5;
const MAX_SEARCH_LIMIT: usize = 100;
const DEFAULT_LLM_BASE_URL: &str = "https://api.openai.com/v1";
const DEFAULT_LLM_MODEL: &str = "gpt-4o-mini";

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read config {path}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("config is malformed: {0}")]
    Yaml(#[from] serde_yml::Error),

    #[error("{0} must be set")]
    MissingCredential(&'static str),

    #[error("could not determine home directory, set SIGN_SEARCH_HOME")]
    NoHome,

    #[error("invalid config: {0}")]
    Invalid(String),
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StoreKind {
    #[default]
    Embedded,
    Remote,
}

/// Vector store connection settings.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct StoreConfig {
    #[serde(default)]
    pub mode: StoreKind,

    /// Directory of the embedded store (defaults to `<data dir>/vectors`)
    #[serde(default)]
    pub path: Option<PathBuf>,

    /// Qdrant URL for remote mode, e.g. `http://qdrant:6334`
    #[serde(default)]
    pub url: Option<String>,

    #[serde(default)]
    pub api_key: Option<String>,
}

/// Store selection resolved once at startup.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum StoreMode {
    Embedded { path: PathBuf },
    Remote { url: String, api_key: Option<String> },
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct EmbeddingConfig {
    /// Model name for embeddings (e.g., "all-MiniLM-L6-v2")
    #[serde(default = "default_model")]
    pub model: String,

    /// Where downloaded models are cached (defaults to `<data dir>/models`)
    #[serde(default)]
    pub cache_dir: Option<PathBuf>,
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            model: default_model(),
            cache_dir: None,
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct SearchConfig {
    #[serde(default = "default_search_limit")]
    pub default_limit: usize,

    #[serde(default = "max_search_limit")]
    pub max_limit: usize,

    /// Hits scoring below this are dropped. No threshold by default.
    #[serde(default)]
    pub score_threshold: Option<f32>,
}

impl Default for SearchConfig {
    fn default() -> Self {
        Self {
            default_limit: DEFAULT_SEARCH_LIMIT,
            max_limit: MAX_SEARCH_LIMIT,
            score_threshold: None,
        }
    }
}

/// LLM keyword extraction used by `/semantic_search`.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct KeywordConfig {
    #[serde(default)]
    pub enabled: bool,

    /// OpenAI compatible API root
    #[serde(default = "default_llm_base_url")]
    pub base_url: String,

    #[serde(default = "default_llm_model")]
    pub model: String,

    #[serde(default)]
    pub api_key: Option<String>,
}

impl Default for KeywordConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            base_url: default_llm_base_url(),
            model: default_llm_model(),
            api_key: None,
        }
    }
}

fn default_model() -> String {
    DEFAULT_MODEL.to_string()
}

fn default_search_limit() -> usize {
    DEFAULT_SEARCH_LIMIT
}

fn max_search_limit() -> usize {
    MAX_SEARCH_LIMIT
}

fn default_llm_base_url() -> String {
    DEFAULT_LLM_BASE_URL.to_string()
}

fn default_llm_model() -> String {
    DEFAULT_LLM_MODEL.to_string()
}

fn default_bind() -> String {
    DEFAULT_BIND.to_string()
}

fn default_collection() -> String {
    DEFAULT_COLLECTION.to_string()
}

fn default_cors_origins() -> Vec<String> {
    vec!["*".to_string()]
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Config {
    #[serde(default = "default_bind")]
    pub bind: String,
    #[serde(default = "default_collection")]
    pub collection: String,
    #[serde(default)]
    pub embedding: EmbeddingConfig,
    #[serde(default)]
    pub store: StoreConfig,
    #[serde(default)]
    pub search: SearchConfig,
    #[serde(default)]
    pub keywords: KeywordConfig,
    /// Allowed CORS origins, `*` allows any
    #[serde(default = "default_cors_origins")]
    pub cors_origins: Vec<String>,
    /// Bearer token required by `/recreate` when set
    #[serde(default)]
    pub admin_token: Option<String>,
    /// JSONL dataset indexed by `serve` when `index_on_startup` is set
    #[serde(default)]
    pub dataset_path: Option<PathBuf>,
    #[serde(default)]
    pub index_on_startup: bool,

    #[serde(skip_serializing, skip_deserializing)]
    data_dir: PathBuf,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            bind: default_bind(),
            collection: default_collection(),
            embedding: EmbeddingConfig::default(),
            store: StoreConfig::default(),
            search: SearchConfig::default(),
            keywords: KeywordConfig::default(),
            cors_origins: default_cors_origins(),
            admin_token: None,
            dataset_path: None,
            index_on_startup: false,
            data_dir: PathBuf::new(),
        }
    }
}

fn non_empty(value: String) -> Option<String> {
    let value = value.trim().to_string();
    (!value.is_empty()).then_some(value)
}

impl Config {
    /// Load from an optional YAML file, apply environment overrides and validate.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let mut config = match path {
            Some(path) => Self::from_file(path)?,
            None => Self::default(),
        };

        config.apply_env(|key| std::env::var(key).ok());
        config.data_dir = data_dir(|key| std::env::var(key).ok())?;
        config.validate()?;

        Ok(config)
    }

    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let config_str = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Ok(serde_yml::from_str(&config_str)?)
    }

    /// Override fields from environment variables.
    pub fn apply_env(&mut self, var: impl Fn(&str) -> Option<String>) {
        let var = |key: &str| var(key).and_then(non_empty);

        if let Some(bind) = var("SIGN_SEARCH_BIND") {
            self.bind = bind;
        }
        if let Some(collection) = var("SIGN_SEARCH_COLLECTION") {
            self.collection = collection;
        }
        if let Some(model) = var("SIGN_SEARCH_MODEL") {
            self.embedding.model = model;
        }
        if let Some(cache_dir) = var("SIGN_SEARCH_MODEL_CACHE") {
            self.embedding.cache_dir = Some(cache_dir.into());
        }
        if let Some(path) = var("SIGN_SEARCH_STORE_PATH") {
            self.store.path = Some(path.into());
        }
        if let Some(url) = var("QDRANT_URL") {
            self.store.url = Some(url);
            self.store.mode = StoreKind::Remote;
        }
        if let Some(api_key) = var("QDRANT_API_KEY") {
            self.store.api_key = Some(api_key);
        }
        // an explicit mode wins over the one implied by QDRANT_URL
        match var("SIGN_SEARCH_STORE").map(|mode| mode.to_lowercase()).as_deref() {
            Some("embedded") => self.store.mode = StoreKind::Embedded,
            Some("remote") | Some("qdrant") => self.store.mode = StoreKind::Remote,
            Some(other) => log::warn!("ignoring unknown SIGN_SEARCH_STORE={other:?}"),
            None => {}
        }
        if let Some(limit) = var("SIGN_SEARCH_DEFAULT_LIMIT") {
            match limit.parse() {
                Ok(limit) => self.search.default_limit = limit,
                Err(_) => log::warn!("ignoring non-numeric SIGN_SEARCH_DEFAULT_LIMIT={limit:?}"),
            }
        }
        if let Some(enabled) = var("SIGN_SEARCH_KEYWORDS") {
            self.keywords.enabled =
                matches!(enabled.to_lowercase().as_str(), "1" | "true" | "yes" | "on");
        }
        if let Some(base_url) = var("LLM_BASE_URL") {
            self.keywords.base_url = base_url;
        }
        if let Some(model) = var("LLM_MODEL") {
            self.keywords.model = model;
        }
        if let Some(api_key) = var("LLM_API_KEY") {
            self.keywords.api_key = Some(api_key);
        }
        if let Some(origins) = var("SIGN_SEARCH_CORS_ORIGINS") {
            self.cors_origins = origins
                .split(',')
                .map(str::trim)
                .filter(|origin| !origin.is_empty())
                .map(str::to_string)
                .collect();
        }
        if let Some(token) = var("SIGN_SEARCH_ADMIN_TOKEN") {
            self.admin_token = Some(token);
        }
        if let Some(dataset) = var("SIGN_SEARCH_DATASET") {
            self.dataset_path = Some(dataset.into());
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.collection.trim().is_empty() {
            return Err(ConfigError::Invalid("collection must not be empty".to_string()));
        }

        self.bind_addr()?;

        parse_model_name(&self.embedding.model)
            .map_err(|err| ConfigError::Invalid(err.to_string()))?;

        let search = &self.search;
        if search.max_limit == 0 {
            return Err(ConfigError::Invalid("search.max_limit must be greater than 0".to_string()));
        }
        if search.default_limit == 0 || search.default_limit > search.max_limit {
            return Err(ConfigError::Invalid(format!(
                "search.default_limit must be between 1 and {}, got {}",
                search.max_limit, search.default_limit
            )));
        }
        if let Some(threshold) = search.score_threshold {
            if !(-1.0..=1.0).contains(&threshold) {
                return Err(ConfigError::Invalid(format!(
                    "search.score_threshold must be between -1.0 and 1.0, got {threshold}"
                )));
            }
        }

        if self.keywords.enabled && self.keywords.api_key.is_none() {
            return Err(ConfigError::MissingCredential("LLM_API_KEY"));
        }

        if self.store.mode == StoreKind::Remote && self.store.url.is_none() {
            return Err(ConfigError::MissingCredential("QDRANT_URL"));
        }

        if self.index_on_startup && self.dataset_path.is_none() {
            return Err(ConfigError::Invalid(
                "index_on_startup requires dataset_path".to_string(),
            ));
        }

        Ok(())
    }

    pub fn bind_addr(&self) -> Result<SocketAddr, ConfigError> {
        self.bind
            .parse()
            .map_err(|_| ConfigError::Invalid(format!("bind address {:?} is invalid", self.bind)))
    }

    #[cfg(test)]
    pub fn with_data_dir(mut self, data_dir: PathBuf) -> Self {
        self.data_dir = data_dir;
        self
    }

    pub fn model_cache_dir(&self) -> PathBuf {
        self.embedding
            .cache_dir
            .clone()
            .unwrap_or_else(|| self.data_dir.join("models"))
    }

    pub fn store_mode(&self) -> Result<StoreMode, ConfigError> {
        match self.store.mode {
            StoreKind::Embedded => Ok(StoreMode::Embedded {
                path: self
                    .store
                    .path
                    .clone()
                    .unwrap_or_else(|| self.data_dir.join("vectors")),
            }),
            StoreKind::Remote => Ok(StoreMode::Remote {
                url: self
                    .store
                    .url
                    .clone()
                    .ok_or(ConfigError::MissingCredential("QDRANT_URL"))?,
                api_key: self.store.api_key.clone(),
            }),
        }
    }
}

fn data_dir(var: impl Fn(&str) -> Option<String>) -> Result<PathBuf, ConfigError> {
    if let Some(home) = var("SIGN_SEARCH_HOME").and_then(non_empty) {
        return Ok(PathBuf::from(home));
    }

    let home = homedir::my_home()
        .ok()
        .flatten()
        .ok_or(ConfigError::NoHome)?;
    Ok(home.join(".local/share/sign-search"))
}
