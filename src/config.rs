use anyhow::{Context, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};

use codelore_core::retrieval::RetrievalLimits;

#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    pub db: DbConfig,
    #[serde(default)]
    pub model: ModelConfig,
    #[serde(default)]
    pub ingest: IngestConfig,
    #[serde(default)]
    pub retrieval: RetrievalConfig,
    #[serde(default)]
    pub features: FeaturesConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct DbConfig {
    pub path: PathBuf,
}

/// Embedding and completion model settings.
#[derive(Debug, Deserialize, Clone)]
pub struct ModelConfig {
    #[serde(default = "default_provider")]
    pub provider: String,
    #[serde(default)]
    pub embedding_model: Option<String>,
    #[serde(default)]
    pub chat_model: Option<String>,
    #[serde(default)]
    pub dims: Option<usize>,
    #[serde(default = "default_base_url")]
    pub base_url: String,
    #[serde(default = "default_api_key_env")]
    pub api_key_env: String,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,
}

impl Default for ModelConfig {
    fn default() -> Self {
        Self {
            provider: default_provider(),
            embedding_model: None,
            chat_model: None,
            dims: None,
            base_url: default_base_url(),
            api_key_env: default_api_key_env(),
            timeout_secs: default_timeout_secs(),
            batch_size: default_batch_size(),
        }
    }
}

impl ModelConfig {
    pub fn is_enabled(&self) -> bool {
        self.provider != "disabled"
    }
}

fn default_provider() -> String {
    "disabled".to_string()
}
fn default_base_url() -> String {
    "https://api.openai.com/v1".to_string()
}
fn default_api_key_env() -> String {
    "OPENAI_API_KEY".to_string()
}
fn default_timeout_secs() -> u64 {
    60
}
fn default_batch_size() -> usize {
    64
}

#[derive(Debug, Deserialize, Clone)]
pub struct IngestConfig {
    #[serde(default)]
    pub exclude_globs: Vec<String>,
    #[serde(default = "default_max_file_bytes")]
    pub max_file_bytes: u64,
    #[serde(default = "default_max_summary_input_chars")]
    pub max_summary_input_chars: usize,
    #[serde(default = "default_max_embed_chars")]
    pub max_embed_chars: usize,
    /// Patches shorter than this are trivial and never produce a task.
    #[serde(default = "default_min_patch_bytes")]
    pub min_patch_bytes: usize,
    #[serde(default = "default_max_patch_chars")]
    pub max_patch_chars: usize,
    /// Clone cache for remote sources.
    #[serde(default = "default_cache_dir")]
    pub cache_dir: PathBuf,
}

impl Default for IngestConfig {
    fn default() -> Self {
        Self {
            exclude_globs: Vec::new(),
            max_file_bytes: default_max_file_bytes(),
            max_summary_input_chars: default_max_summary_input_chars(),
            max_embed_chars: default_max_embed_chars(),
            min_patch_bytes: default_min_patch_bytes(),
            max_patch_chars: default_max_patch_chars(),
            cache_dir: default_cache_dir(),
        }
    }
}

fn default_max_file_bytes() -> u64 {
    1_000_000
}
fn default_max_summary_input_chars() -> usize {
    12_000
}
fn default_max_embed_chars() -> usize {
    8_000
}
fn default_min_patch_bytes() -> usize {
    200
}
fn default_max_patch_chars() -> usize {
    16_000
}
fn default_cache_dir() -> PathBuf {
    PathBuf::from("./data/repos")
}

#[derive(Debug, Deserialize, Clone)]
pub struct RetrievalConfig {
    #[serde(default = "default_notes_k")]
    pub notes_k: usize,
    #[serde(default = "default_tasks_k")]
    pub tasks_k: usize,
    #[serde(default = "default_commits_k")]
    pub commits_k: usize,
    #[serde(default = "default_documents_k")]
    pub documents_k: usize,
    #[serde(default = "default_files_k")]
    pub files_k: usize,
    #[serde(default = "default_chunks_k")]
    pub chunks_k: usize,
}

impl Default for RetrievalConfig {
    fn default() -> Self {
        let limits = RetrievalLimits::default();
        Self {
            notes_k: limits.notes_k,
            tasks_k: limits.tasks_k,
            commits_k: limits.commits_k,
            documents_k: limits.documents_k,
            files_k: limits.files_k,
            chunks_k: limits.chunks_k,
        }
    }
}

impl RetrievalConfig {
    pub fn limits(&self) -> RetrievalLimits {
        RetrievalLimits {
            notes_k: self.notes_k,
            tasks_k: self.tasks_k,
            commits_k: self.commits_k,
            documents_k: self.documents_k,
            files_k: self.files_k,
            chunks_k: self.chunks_k,
        }
    }
}

fn default_notes_k() -> usize {
    RetrievalLimits::default().notes_k
}
fn default_tasks_k() -> usize {
    RetrievalLimits::default().tasks_k
}
fn default_commits_k() -> usize {
    RetrievalLimits::default().commits_k
}
fn default_documents_k() -> usize {
    RetrievalLimits::default().documents_k
}
fn default_files_k() -> usize {
    RetrievalLimits::default().files_k
}
fn default_chunks_k() -> usize {
    RetrievalLimits::default().chunks_k
}

#[derive(Debug, Deserialize, Clone)]
pub struct FeaturesConfig {
    /// Uploaded documents. When off, the document tables are never created.
    #[serde(default = "default_true")]
    pub documents: bool,
}

impl Default for FeaturesConfig {
    fn default() -> Self {
        Self { documents: true }
    }
}

fn default_true() -> bool {
    true
}

impl Config {
    /// A config with only a database path and defaults everywhere else.
    pub fn minimal(db_path: impl Into<PathBuf>) -> Self {
        Self {
            db: DbConfig {
                path: db_path.into(),
            },
            model: ModelConfig::default(),
            ingest: IngestConfig::default(),
            retrieval: RetrievalConfig::default(),
            features: FeaturesConfig::default(),
        }
    }
}

pub fn load_config(path: &Path) -> Result<Config> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;

    let config: Config = toml::from_str(&content).with_context(|| "Failed to parse config file")?;
    validate(&config)?;
    Ok(config)
}

pub fn validate(config: &Config) -> Result<()> {
    let model = &config.model;
    match model.provider.as_str() {
        "disabled" | "openai" => {}
        other => anyhow::bail!(
            "Unknown model provider: '{}'. Must be disabled or openai.",
            other
        ),
    }

    if model.is_enabled() {
        if model.dims.unwrap_or(0) == 0 {
            anyhow::bail!("model.dims must be > 0 when provider is '{}'", model.provider);
        }
        if model.embedding_model.is_none() {
            anyhow::bail!(
                "model.embedding_model must be specified when provider is '{}'",
                model.provider
            );
        }
        if model.chat_model.is_none() {
            anyhow::bail!(
                "model.chat_model must be specified when provider is '{}'",
                model.provider
            );
        }
        if model.batch_size == 0 {
            anyhow::bail!("model.batch_size must be > 0");
        }
    }

    let r = &config.retrieval;
    if r.files_k == 0 || r.chunks_k == 0 {
        anyhow::bail!("retrieval.files_k and retrieval.chunks_k must be >= 1");
    }

    if config.ingest.max_file_bytes == 0 {
        anyhow::bail!("ingest.max_file_bytes must be > 0");
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn minimal_file_gets_defaults() {
        let config: Config = toml::from_str("[db]\npath = \"./data/lore.sqlite\"\n").unwrap();
        validate(&config).unwrap();
        assert!(!config.model.is_enabled());
        assert!(config.features.documents);
        assert_eq!(config.retrieval.limits(), RetrievalLimits::default());
        assert_eq!(config.model.api_key_env, "OPENAI_API_KEY");
    }

    #[test]
    fn enabled_provider_requires_models_and_dims() {
        let config: Config = toml::from_str(
            "[db]\npath = \"x.sqlite\"\n[model]\nprovider = \"openai\"\nembedding_model = \"e\"\n",
        )
        .unwrap();
        let err = validate(&config).unwrap_err().to_string();
        assert!(err.contains("model.dims"), "{err}");
    }

    #[test]
    fn unknown_provider_is_rejected() {
        let config: Config =
            toml::from_str("[db]\npath = \"x.sqlite\"\n[model]\nprovider = \"magic\"\n").unwrap();
        assert!(validate(&config).is_err());
    }

    #[test]
    fn documents_feature_can_be_disabled() {
        let config: Config =
            toml::from_str("[db]\npath = \"x.sqlite\"\n[features]\ndocuments = false\n").unwrap();
        assert!(!config.features.documents);
    }

    #[test]
    fn shipped_example_is_valid() {
        let config: Config = toml::from_str(include_str!("../config/lore.example.toml")).unwrap();
        validate(&config).unwrap();
        assert!(config.model.is_enabled());
        assert_eq!(config.model.dims, Some(1536));
        assert_eq!(config.ingest.exclude_globs.len(), 2);
    }
}
