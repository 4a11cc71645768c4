//! Runtime settings and the sequence-model catalog.

use crate::error::{ConfigError, GenerationError};
use crate::llm_bridge::ProviderCatalog;
use crate::sampler::SamplingConfig;
use crate::vocabulary::TokenVocabulary;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fs;
use std::path::{Path, PathBuf};

pub const MODEL_CATALOG_SCHEMA: &str = "plasmid_gpt.models.v1";
const BUILTIN_MODEL_CATALOG: &str = include_str!("../assets/models.json");
const DEFAULT_ANNOTATOR_TIMEOUT_SECS: u64 = 120;
pub const DEFAULT_MAX_LENGTH: usize = 5000;

pub const ENV_PROVIDER_CATALOG: &str = "PLASMID_GPT_PROVIDER_CATALOG";
pub const ENV_TOKEN_CONFIG: &str = "PLASMID_GPT_TOKEN_CONFIG";
pub const ENV_MODEL_CATALOG: &str = "PLASMID_GPT_MODEL_CATALOG";
pub const ENV_ANNOTATOR_CMD: &str = "PLASMID_GPT_ANNOTATOR_CMD";
pub const ENV_ANNOTATOR_TIMEOUT: &str = "PLASMID_GPT_ANNOTATOR_TIMEOUT_SECS";
pub const ENV_MODEL: &str = "PLASMID_GPT_MODEL";
pub const ENV_LOG_DIR: &str = "PLASMID_GPT_LOG_DIR";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ModelBackend {
    /// Remote text-generation endpoint fed the conditioning prefix.
    HostedTextGeneration,
    /// Offline nucleotide composition model driven by the local sampler.
    BuiltinComposition,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelSpec {
    pub key: String,
    #[serde(default)]
    pub label: String,
    pub backend: ModelBackend,
    #[serde(default)]
    pub repo_id: Option<String>,
    #[serde(default)]
    pub endpoint: Option<String>,
    #[serde(default)]
    pub token_env: Option<String>,
    /// Logged when exceeded; the caller's length is still honoured.
    #[serde(default)]
    pub advisory_max_length: Option<usize>,
    #[serde(default)]
    pub tokenizer_vocab: Option<String>,
    #[serde(default)]
    pub sampling: SamplingConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelCatalog {
    pub schema: String,
    pub default: String,
    pub models: Vec<ModelSpec>,
    #[serde(skip)]
    base_dir: Option<PathBuf>,
}

impl ModelCatalog {
    pub fn builtin() -> Result<Self, ConfigError> {
        Self::from_json_str(BUILTIN_MODEL_CATALOG, "builtin models.json")
    }

    pub fn from_json_file(path: &Path) -> Result<Self, ConfigError> {
        let text = fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.display().to_string(),
            source,
        })?;
        let mut catalog = Self::from_json_str(&text, &path.display().to_string())?;
        catalog.base_dir = path.parent().map(Path::to_path_buf);
        Ok(catalog)
    }

    pub fn from_json_str(text: &str, origin: &str) -> Result<Self, ConfigError> {
        let catalog = serde_json::from_str::<Self>(text).map_err(|source| ConfigError::Json {
            path: origin.to_string(),
            source,
        })?;
        if catalog.schema != MODEL_CATALOG_SCHEMA {
            return Err(ConfigError::Invalid(format!(
                "{origin}: unsupported model catalog schema '{}'",
                catalog.schema
            )));
        }
        let mut seen = HashSet::new();
        for model in &catalog.models {
            if model.key.trim().is_empty() {
                return Err(ConfigError::Invalid(format!("{origin}: model with empty key")));
            }
            if !seen.insert(model.key.as_str()) {
                return Err(ConfigError::Invalid(format!(
                    "{origin}: duplicate model key '{}'",
                    model.key
                )));
            }
            if model.backend == ModelBackend::HostedTextGeneration && model.endpoint.is_none() {
                return Err(ConfigError::Invalid(format!(
                    "{origin}: hosted model '{}' has no endpoint",
                    model.key
                )));
            }
            model.sampling.validate().map_err(|e| {
                ConfigError::Invalid(format!("{origin}: model '{}': {e}", model.key))
            })?;
        }
        if !seen.contains(catalog.default.as_str()) {
            return Err(ConfigError::Invalid(format!(
                "{origin}: default model '{}' is not in the catalog",
                catalog.default
            )));
        }
        Ok(catalog)
    }

    pub fn get(&self, key: &str) -> Result<&ModelSpec, GenerationError> {
        self.models
            .iter()
            .find(|m| m.key == key.trim())
            .ok_or_else(|| GenerationError::UnknownModel(key.to_string()))
    }

    pub fn default_key(&self) -> &str {
        &self.default
    }

    pub fn keys(&self) -> impl Iterator<Item = &str> + '_ {
        self.models.iter().map(|m| m.key.as_str())
    }

    /// Relative asset paths are resolved against the catalog's directory.
    pub fn resolve_path(&self, relative: &str) -> PathBuf {
        match &self.base_dir {
            Some(dir) => dir.join(relative),
            None => PathBuf::from(relative),
        }
    }

    pub fn is_builtin(&self) -> bool {
        self.base_dir.is_none()
    }
}

/// Settings read from the process environment. Unset values fall back to
/// the assets compiled into the binary.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Settings {
    pub provider_catalog: Option<PathBuf>,
    pub token_config: Option<PathBuf>,
    pub model_catalog: Option<PathBuf>,
    pub annotator_command: Option<String>,
    pub annotator_timeout_secs: u64,
    pub default_model: Option<String>,
    pub log_dir: Option<PathBuf>,
}

impl Default for Settings {
    fn default() -> Self {
        Self::from_lookup(|_| None)
    }
}

impl Settings {
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let get = |key: &str| {
            lookup(key)
                .map(|v| v.trim().to_string())
                .filter(|v| !v.is_empty())
        };
        Self {
            provider_catalog: get(ENV_PROVIDER_CATALOG).map(PathBuf::from),
            token_config: get(ENV_TOKEN_CONFIG).map(PathBuf::from),
            model_catalog: get(ENV_MODEL_CATALOG).map(PathBuf::from),
            annotator_command: get(ENV_ANNOTATOR_CMD),
            annotator_timeout_secs: get(ENV_ANNOTATOR_TIMEOUT)
                .and_then(|v| v.parse().ok())
                .unwrap_or(DEFAULT_ANNOTATOR_TIMEOUT_SECS),
            default_model: get(ENV_MODEL),
            log_dir: get(ENV_LOG_DIR).map(PathBuf::from),
        }
    }

    pub fn load_vocabulary(&self) -> Result<TokenVocabulary, ConfigError> {
        match &self.token_config {
            Some(path) => TokenVocabulary::from_json_file(path),
            None => TokenVocabulary::builtin(),
        }
    }

    pub fn load_provider_catalog(&self) -> Result<ProviderCatalog, ConfigError> {
        match &self.provider_catalog {
            Some(path) => ProviderCatalog::from_json_file(path),
            None => ProviderCatalog::builtin(),
        }
    }

    pub fn load_model_catalog(&self) -> Result<ModelCatalog, ConfigError> {
        match &self.model_catalog {
            Some(path) => ModelCatalog::from_json_file(path),
            None => ModelCatalog::builtin(),
        }
    }

    /// Explicit key, then `PLASMID_GPT_MODEL`, then the catalog default.
    pub fn model_key<'a>(&'a self, explicit: Option<&'a str>, catalog: &'a ModelCatalog) -> &'a str {
        explicit
            .or(self.default_model.as_deref())
            .unwrap_or(catalog.default_key())
    }
}
