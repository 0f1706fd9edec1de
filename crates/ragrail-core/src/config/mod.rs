//! Configuration management

use crate::error::{RagRailError, Result};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};

/// Main configuration structure
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Config {
    /// Default LLM service configuration
    #[serde(default)]
    pub llm: LLMServiceConfig,

    /// Named model overrides, merged over `llm`
    #[serde(default)]
    pub models: HashMap<String, ModelOverride>,

    /// Retrieval augmentation and ingestion
    #[serde(default)]
    pub rag: RagConfig,

    /// Guardrail execution
    #[serde(default)]
    pub guardrails: GuardrailConfig,

    /// Chat memory
    #[serde(default)]
    pub memory: MemoryConfig,

    /// Token prices used for cost estimation
    #[serde(default)]
    pub pricing: PricingConfig,
}

/// LLM service configuration for an OpenAI-compatible endpoint
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct LLMServiceConfig {
    /// Base URL of the LLM service for chat/completions
    pub url: String,

    /// Model name for chat completions
    #[serde(default = "default_chat_model")]
    pub model: String,

    /// Base URL for embeddings service (can be different from LLM URL)
    #[serde(default)]
    pub embedding_url: Option<String>,

    /// Model name for embeddings
    #[serde(default = "default_embedding_model")]
    pub embedding_model: String,

    /// Embedding dimensions
    #[serde(default)]
    pub embedding_dimensions: Option<usize>,

    /// API key (optional, for authenticated services)
    #[serde(default)]
    pub api_key: Option<String>,

    /// Request timeout in seconds
    #[serde(default = "default_timeout")]
    pub timeout_secs: u64,

    /// Sampling temperature
    #[serde(default = "default_temperature")]
    pub temperature: f32,

    /// Maximum tokens generated per completion
    #[serde(default = "default_max_tokens")]
    pub max_tokens: u32,
}

impl LLMServiceConfig {
    /// Get the embeddings URL (falls back to main URL if not specified)
    pub fn embeddings_url(&self) -> &str {
        self.embedding_url.as_deref().unwrap_or(&self.url)
    }

    fn validate(&self, prefix: &str) -> Result<()> {
        if self.url.trim().is_empty() {
            return Err(missing(prefix, "url"));
        }
        if !self.url.starts_with("http://") && !self.url.starts_with("https://") {
            return Err(RagRailError::Config(format!(
                "{}.url must be an http(s) URL, got '{}'",
                prefix, self.url
            )));
        }
        if self.model.trim().is_empty() {
            return Err(missing(prefix, "model"));
        }
        if self.embedding_model.trim().is_empty() {
            return Err(missing(prefix, "embedding-model"));
        }
        if self.timeout_secs == 0 {
            return Err(RagRailError::Config(format!(
                "{}.timeout-secs must be greater than zero",
                prefix
            )));
        }
        if !(0.0..=2.0).contains(&self.temperature) {
            return Err(RagRailError::Config(format!(
                "{}.temperature must be between 0 and 2, got {}",
                prefix, self.temperature
            )));
        }
        Ok(())
    }
}

impl Default for LLMServiceConfig {
    fn default() -> Self {
        Self {
            url: "http://localhost:8000".to_string(),
            model: default_chat_model(),
            embedding_url: None,
            embedding_model: default_embedding_model(),
            embedding_dimensions: None,
            api_key: None,
            timeout_secs: default_timeout(),
            temperature: default_temperature(),
            max_tokens: default_max_tokens(),
        }
    }
}

fn default_chat_model() -> String {
    "meta-llama/Llama-3.1-8B-Instruct".to_string()
}

fn default_embedding_model() -> String {
    "sentence-transformers/all-MiniLM-L6-v2".to_string()
}

fn default_timeout() -> u64 {
    30
}

fn default_temperature() -> f32 {
    0.7
}

fn default_max_tokens() -> u32 {
    512
}

/// Per-named-model override; unset fields inherit from `llm`
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(rename_all = "kebab-case")]
pub struct ModelOverride {
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default)]
    pub model: Option<String>,
    #[serde(default)]
    pub embedding_url: Option<String>,
    #[serde(default)]
    pub embedding_model: Option<String>,
    #[serde(default)]
    pub embedding_dimensions: Option<usize>,
    #[serde(default)]
    pub api_key: Option<String>,
    #[serde(default)]
    pub timeout_secs: Option<u64>,
    #[serde(default)]
    pub temperature: Option<f32>,
    #[serde(default)]
    pub max_tokens: Option<u32>,
}

impl ModelOverride {
    fn apply(&self, base: &LLMServiceConfig) -> LLMServiceConfig {
        LLMServiceConfig {
            url: self.url.clone().unwrap_or_else(|| base.url.clone()),
            model: self.model.clone().unwrap_or_else(|| base.model.clone()),
            embedding_url: self.embedding_url.clone().or_else(|| base.embedding_url.clone()),
            embedding_model: self
                .embedding_model
                .clone()
                .unwrap_or_else(|| base.embedding_model.clone()),
            embedding_dimensions: self.embedding_dimensions.or(base.embedding_dimensions),
            api_key: self.api_key.clone().or_else(|| base.api_key.clone()),
            timeout_secs: self.timeout_secs.unwrap_or(base.timeout_secs),
            temperature: self.temperature.unwrap_or(base.temperature),
            max_tokens: self.max_tokens.unwrap_or(base.max_tokens),
        }
    }
}

/// Retrieval augmentation and document ingestion
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct RagConfig {
    /// Directory holding the documents to ingest
    #[serde(default)]
    pub path: Option<PathBuf>,

    /// Glob pattern matched against paths relative to `path`
    #[serde(default = "default_pattern")]
    pub pattern: String,

    #[serde(default = "default_true")]
    pub recursive: bool,

    /// Maximum segment size in characters
    #[serde(default = "default_max_segment_size")]
    pub max_segment_size: usize,

    /// Overlap between consecutive segments in characters
    #[serde(default = "default_max_overlap_size")]
    pub max_overlap_size: usize,

    /// Maximum contents returned per retriever
    #[serde(default = "default_max_results")]
    pub max_results: usize,

    /// Minimum relevance score kept by retrieval and re-ranking
    #[serde(default)]
    pub min_score: f64,

    /// Re-rank aggregated contents with the chat model
    #[serde(default)]
    pub rerank: bool,

    #[serde(default)]
    pub reuse_embeddings: ReuseEmbeddingsConfig,
}

impl Default for RagConfig {
    fn default() -> Self {
        Self {
            path: None,
            pattern: default_pattern(),
            recursive: true,
            max_segment_size: default_max_segment_size(),
            max_overlap_size: default_max_overlap_size(),
            max_results: default_max_results(),
            min_score: 0.0,
            rerank: false,
            reuse_embeddings: ReuseEmbeddingsConfig::default(),
        }
    }
}

fn default_pattern() -> String {
    "**/*.{md,txt}".to_string()
}

fn default_true() -> bool {
    true
}

fn default_max_segment_size() -> usize {
    300
}

fn default_max_overlap_size() -> usize {
    30
}

fn default_max_results() -> usize {
    3
}

/// Persist ingested embeddings so later runs skip ingestion
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct ReuseEmbeddingsConfig {
    #[serde(default)]
    pub enabled: bool,

    #[serde(default = "default_embeddings_file")]
    pub file: PathBuf,
}

impl Default for ReuseEmbeddingsConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            file: default_embeddings_file(),
        }
    }
}

fn default_embeddings_file() -> PathBuf {
    dirs::cache_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(crate::CACHE_DIR_NAME)
        .join("embeddings.json")
}

/// Guardrail execution settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct GuardrailConfig {
    /// Maximum LLM re-invocations triggered by output guardrails
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
}

impl Default for GuardrailConfig {
    fn default() -> Self {
        Self {
            max_retries: default_max_retries(),
        }
    }
}

fn default_max_retries() -> u32 {
    3
}

/// Which chat memory store to use
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum MemoryStoreKind {
    #[default]
    Memory,
    Sqlite,
}

/// Chat memory settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct MemoryConfig {
    #[serde(default)]
    pub store: MemoryStoreKind,

    /// SQLite database file, used when `store` is `sqlite`
    #[serde(default)]
    pub sqlite_path: Option<PathBuf>,

    /// Message window size
    #[serde(default = "default_max_messages")]
    pub max_messages: usize,

    /// Summarize history once it grows past `compression-threshold`
    #[serde(default)]
    pub compression: bool,

    #[serde(default = "default_compression_threshold")]
    pub compression_threshold: usize,
}

impl Default for MemoryConfig {
    fn default() -> Self {
        Self {
            store: MemoryStoreKind::Memory,
            sqlite_path: None,
            max_messages: default_max_messages(),
            compression: false,
            compression_threshold: default_compression_threshold(),
        }
    }
}

impl MemoryConfig {
    /// SQLite path, defaulting to the cache directory
    pub fn sqlite_path(&self) -> PathBuf {
        self.sqlite_path.clone().unwrap_or_else(|| {
            dirs::cache_dir()
                .unwrap_or_else(|| PathBuf::from("."))
                .join(crate::CACHE_DIR_NAME)
                .join("memory.sqlite")
        })
    }
}

fn default_max_messages() -> usize {
    20
}

fn default_compression_threshold() -> usize {
    5
}

/// Price table for cost estimation
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PricingConfig {
    /// ISO 4217 currency code
    #[serde(default = "default_currency")]
    pub currency: String,

    /// Model name (or `prefix*` pattern) to prices
    #[serde(default)]
    pub models: HashMap<String, ModelPrice>,
}

impl Default for PricingConfig {
    fn default() -> Self {
        Self {
            currency: default_currency(),
            models: HashMap::new(),
        }
    }
}

fn default_currency() -> String {
    "USD".to_string()
}

/// Prices per million tokens
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct ModelPrice {
    pub input_per_million: f64,
    pub output_per_million: f64,
}

fn missing(prefix: &str, key: &str) -> RagRailError {
    RagRailError::Config(format!("missing required property '{}.{}'", prefix, key))
}

impl Config {
    /// Load config from `RAGRAIL_CONFIG` or the default path
    pub fn load() -> Result<Self> {
        if let Ok(path) = std::env::var("RAGRAIL_CONFIG") {
            return Self::load_from(Path::new(&path));
        }
        let path = Self::default_path();
        if path.exists() {
            Self::load_from(&path)
        } else {
            let mut config = Config::default();
            config.apply_env_overrides()?;
            Ok(config)
        }
    }

    /// Load config from an explicit path; the file must exist
    ///
    /// `RAGRAIL_*` environment variables override the file.
    pub fn load_from(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            RagRailError::Config(format!("cannot read {}: {}", path.display(), e))
        })?;
        let mut config: Config = serde_yaml::from_str(&content)?;
        config.apply_env_overrides()?;
        Ok(config)
    }

    /// Apply `RAGRAIL_LLM_*` and `RAGRAIL_EMBEDDING_*` variables over `llm`
    ///
    /// Unset and empty variables leave the loaded value in place.
    pub fn apply_env_overrides(&mut self) -> Result<()> {
        self.apply_overrides(|key| std::env::var(key).ok())
    }

    fn apply_overrides(&mut self, lookup: impl Fn(&str) -> Option<String>) -> Result<()> {
        let var = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());
        let llm = &mut self.llm;

        if let Some(url) = var("RAGRAIL_LLM_URL") {
            llm.url = url;
        }
        if let Some(model) = var("RAGRAIL_LLM_MODEL") {
            llm.model = model;
        }
        if let Some(api_key) = var("RAGRAIL_LLM_API_KEY") {
            llm.api_key = Some(api_key);
        }
        if let Some(url) = var("RAGRAIL_EMBEDDING_URL") {
            llm.embedding_url = Some(url);
        }
        if let Some(model) = var("RAGRAIL_EMBEDDING_MODEL") {
            llm.embedding_model = model;
        }
        if let Some(dims) = var("RAGRAIL_EMBEDDING_DIMS") {
            let dims = dims.trim().parse().map_err(|_| {
                RagRailError::Config(format!(
                    "RAGRAIL_EMBEDDING_DIMS must be a positive integer, got '{}'",
                    dims
                ))
            })?;
            llm.embedding_dimensions = Some(dims);
        }
        Ok(())
    }

    /// Save config to a path
    pub fn save(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let content = serde_yaml::to_string(self)?;
        std::fs::write(path, content)?;
        Ok(())
    }

    /// Get default config path
    pub fn default_path() -> PathBuf {
        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join(crate::CONFIG_DIR_NAME)
            .join("config.yml")
    }

    /// Resolve the LLM configuration for a named model, or the default one
    pub fn llm_for(&self, name: Option<&str>) -> Result<LLMServiceConfig> {
        match name {
            None => Ok(self.llm.clone()),
            Some(name) => self
                .models
                .get(name)
                .map(|o| o.apply(&self.llm))
                .ok_or_else(|| {
                    RagRailError::Config(format!(
                        "no model named '{}' under 'models' (known: {})",
                        name,
                        self.model_names().join(", ")
                    ))
                }),
        }
    }

    fn model_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.models.keys().cloned().collect();
        names.sort();
        names
    }

    /// Check every property; the first problem found is reported
    pub fn validate(&self) -> Result<()> {
        self.llm.validate("llm")?;
        for name in self.model_names() {
            let resolved = self.llm_for(Some(&name))?;
            resolved.validate(&format!("models.{}", name))?;
        }

        let rag = &self.rag;
        if rag.max_segment_size == 0 {
            return Err(RagRailError::Config(
                "rag.max-segment-size must be greater than zero".to_string(),
            ));
        }
        if rag.max_overlap_size >= rag.max_segment_size {
            return Err(RagRailError::Config(format!(
                "rag.max-overlap-size ({}) must be smaller than rag.max-segment-size ({})",
                rag.max_overlap_size, rag.max_segment_size
            )));
        }
        if rag.max_results == 0 {
            return Err(RagRailError::Config(
                "rag.max-results must be greater than zero".to_string(),
            ));
        }
        if !(0.0..=1.0).contains(&rag.min_score) {
            return Err(RagRailError::Config(format!(
                "rag.min-score must be between 0 and 1, got {}",
                rag.min_score
            )));
        }
        glob::Pattern::new(&expand_braces(&rag.pattern)[0]).map_err(|e| {
            RagRailError::Config(format!("rag.pattern '{}' is invalid: {}", rag.pattern, e))
        })?;

        if self.memory.max_messages == 0 {
            return Err(RagRailError::Config(
                "memory.max-messages must be greater than zero".to_string(),
            ));
        }
        if self.memory.compression && self.memory.compression_threshold == 0 {
            return Err(RagRailError::Config(
                "memory.compression-threshold must be greater than zero".to_string(),
            ));
        }

        let currency = &self.pricing.currency;
        if currency.len() != 3 || !currency.chars().all(|c| c.is_ascii_uppercase()) {
            return Err(RagRailError::Config(format!(
                "pricing.currency must be a three-letter ISO code, got '{}'",
                currency
            )));
        }
        for (model, price) in &self.pricing.models {
            if price.input_per_million < 0.0 || price.output_per_million < 0.0 {
                return Err(RagRailError::Config(format!(
                    "pricing.models.{} has a negative price",
                    model
                )));
            }
        }

        Ok(())
    }
}

/// Expand a single `{a,b}` group, since `glob::Pattern` has no brace support
pub fn expand_braces(pattern: &str) -> Vec<String> {
    if let (Some(open), Some(close)) = (pattern.find('{'), pattern.find('}')) {
        if open < close {
            let (head, rest) = pattern.split_at(open);
            let alternatives = &rest[1..close - open];
            let tail = &rest[close - open + 1..];
            return alternatives
                .split(',')
                .map(|alt| format!("{}{}{}", head, alt, tail))
                .collect();
        }
    }
    vec![pattern.to_string()]
}

#[cfg(test)]
mod tests {
    use super::*;

    fn valid() -> Config {
        let mut config = Config::default();
        config.llm.url = "http://localhost:8000".to_string();
        config.llm.model = "test-model".to_string();
        config
    }

    #[test]
    fn test_default_config_validates() {
        assert!(valid().validate().is_ok());
    }

    #[test]
    fn test_missing_url_is_reported_by_name() {
        let mut config = valid();
        config.llm.url = String::new();
        let err = config.validate().unwrap_err().to_string();
        assert!(err.contains("'llm.url'"), "{}", err);
    }

    #[test]
    fn test_overlap_must_be_smaller_than_segment() {
        let mut config = valid();
        config.rag.max_overlap_size = config.rag.max_segment_size;
        assert!(matches!(config.validate(), Err(RagRailError::Config(_))));
    }

    #[test]
    fn test_named_model_override_inherits_defaults() {
        let mut config = valid();
        config.models.insert(
            "summarizer".to_string(),
            ModelOverride {
                model: Some("small-model".to_string()),
                timeout_secs: Some(5),
                ..Default::default()
            },
        );

        let resolved = config.llm_for(Some("summarizer")).unwrap();
        assert_eq!(resolved.model, "small-model");
        assert_eq!(resolved.timeout_secs, 5);
        assert_eq!(resolved.url, config.llm.url);

        assert!(config.llm_for(Some("unknown")).is_err());
    }

    #[test]
    fn test_overrides_replace_file_values() {
        let env: HashMap<&str, &str> = [
            ("RAGRAIL_LLM_URL", "http://env-host:1"),
            ("RAGRAIL_LLM_API_KEY", "sk-from-env"),
            ("RAGRAIL_EMBEDDING_DIMS", "384"),
            ("RAGRAIL_EMBEDDING_MODEL", ""),
        ]
        .into_iter()
        .collect();

        let mut config = valid();
        config
            .apply_overrides(|key| env.get(key).map(|v| v.to_string()))
            .unwrap();
        assert_eq!(config.llm.url, "http://env-host:1");
        assert_eq!(config.llm.api_key.as_deref(), Some("sk-from-env"));
        assert_eq!(config.llm.embedding_dimensions, Some(384));
        assert_eq!(config.llm.model, "test-model");
        assert_eq!(config.llm.embedding_model, default_embedding_model());
    }

    #[test]
    fn test_invalid_dimension_override_is_config_error() {
        let mut config = valid();
        let err = config
            .apply_overrides(|key| (key == "RAGRAIL_EMBEDDING_DIMS").then(|| "many".to_string()))
            .unwrap_err();
        assert!(matches!(err, RagRailError::Config(_)));
        assert!(err.to_string().contains("RAGRAIL_EMBEDDING_DIMS"));
    }

    #[test]
    fn test_load_from_applies_environment() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("config.yml");
        std::fs::write(&path, "llm:\n  url: http://localhost:9000\n  model: m\n").unwrap();

        temp_env::with_vars(
            [
                ("RAGRAIL_LLM_URL", Some("http://env-host:1")),
                ("RAGRAIL_LLM_API_KEY", Some("sk-from-env")),
                ("RAGRAIL_LLM_MODEL", None),
                ("RAGRAIL_EMBEDDING_URL", None),
                ("RAGRAIL_EMBEDDING_MODEL", None),
                ("RAGRAIL_EMBEDDING_DIMS", None),
            ],
            || {
                let config = Config::load_from(&path).unwrap();
                assert_eq!(config.llm.url, "http://env-host:1");
                assert_eq!(config.llm.api_key.as_deref(), Some("sk-from-env"));
                assert_eq!(config.llm.model, "m");
            },
        );
    }

    #[test]
    fn test_yaml_kebab_case_sections() {
        let yaml = r#"
llm:
  url: http://localhost:9000
  model: m
rag:
  max-segment-size: 500
  max-overlap-size: 50
  min-score: 0.6
memory:
  store: sqlite
  compression: true
  compression-threshold: 8
pricing:
  currency: EUR
  models:
    m:
      input-per-million: 1.5
      output-per-million: 2.0
"#;
        let config: Config = serde_yaml::from_str(yaml).unwrap();
        assert_eq!(config.rag.max_segment_size, 500);
        assert_eq!(config.rag.min_score, 0.6);
        assert_eq!(config.memory.store, MemoryStoreKind::Sqlite);
        assert_eq!(config.memory.compression_threshold, 8);
        assert_eq!(config.pricing.currency, "EUR");
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_expand_braces() {
        assert_eq!(
            expand_braces("**/*.{md,txt}"),
            vec!["**/*.md".to_string(), "**/*.txt".to_string()]
        );
        assert_eq!(expand_braces("*.md"), vec!["*.md".to_string()]);
    }
}
