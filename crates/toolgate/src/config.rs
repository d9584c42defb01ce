//! Configuration parsing and validation.
//!
//! Toolgate is configured with one TOML file (default
//! `./config/toolgate.toml`). Every section except `[db]` has defaults.
//!
//! # Example
//!
//! ```toml
//! [db]
//! path = "./data/toolgate.sqlite"
//!
//! [store]
//! backend = "sqlite"
//!
//! [retrieval]
//! default_k = 5
//! merge = "global"
//! tie_break = "corpus_then_chunk"
//! min_per_corpus = 0
//! dedupe_text = false
//!
//! [access]
//! superadmin_role = "Super-Admin"
//!
//! [[embedding.models]]
//! id = "stub-256"
//! provider = "stub"
//! dims = 256
//! ```

use anyhow::{bail, Context, Result};
use serde::Deserialize;
use std::collections::HashSet;
use std::path::{Path, PathBuf};

use toolgate_core::search::{MergeMode, MergePolicy, TieBreak};

#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    pub db: DbConfig,
    #[serde(default)]
    pub store: StoreConfig,
    #[serde(default)]
    pub retrieval: RetrievalConfig,
    #[serde(default)]
    pub access: AccessConfig,
    #[serde(default)]
    pub backends: BackendsConfig,
    #[serde(default)]
    pub embedding: EmbeddingConfig,
    #[serde(default)]
    pub server: ServerConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct DbConfig {
    pub path: PathBuf,
}

/// Process-wide vector store backend.
#[derive(Debug, Deserialize, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum StoreKind {
    Memory,
    #[default]
    Sqlite,
}

#[derive(Debug, Deserialize, Clone, Default)]
pub struct StoreConfig {
    #[serde(default)]
    pub backend: StoreKind,
}

#[derive(Debug, Deserialize, Clone)]
pub struct RetrievalConfig {
    #[serde(default = "default_k")]
    pub default_k: usize,
    #[serde(default)]
    pub merge: MergeMode,
    #[serde(default)]
    pub tie_break: TieBreak,
    /// Best hits guaranteed to each searched corpus in global mode.
    #[serde(default)]
    pub min_per_corpus: usize,
    #[serde(default)]
    pub dedupe_text: bool,
    /// Overall budget for one multi-corpus query.
    #[serde(default = "default_query_deadline_ms")]
    pub query_deadline_ms: u64,
    #[serde(default = "default_chunk_size")]
    pub default_chunk_size: usize,
    #[serde(default = "default_chunk_overlap")]
    pub default_chunk_overlap: usize,
}

impl Default for RetrievalConfig {
    fn default() -> Self {
        Self {
            default_k: default_k(),
            merge: MergeMode::default(),
            tie_break: TieBreak::default(),
            min_per_corpus: 0,
            dedupe_text: false,
            query_deadline_ms: default_query_deadline_ms(),
            default_chunk_size: default_chunk_size(),
            default_chunk_overlap: default_chunk_overlap(),
        }
    }
}

impl RetrievalConfig {
    pub fn merge_policy(&self) -> MergePolicy {
        MergePolicy {
            mode: self.merge,
            tie_break: self.tie_break,
            min_per_corpus: self.min_per_corpus,
            dedupe_text: self.dedupe_text,
        }
    }
}

fn default_k() -> usize {
    5
}
fn default_query_deadline_ms() -> u64 {
    5000
}
fn default_chunk_size() -> usize {
    1200
}
fn default_chunk_overlap() -> usize {
    200
}

#[derive(Debug, Deserialize, Clone)]
pub struct AccessConfig {
    /// Role that short-circuits to all enabled resources. Empty disables it.
    #[serde(default = "default_superadmin_role")]
    pub superadmin_role: String,
    /// Roles added to every newly created corpus's ACL.
    #[serde(default = "default_corpus_roles")]
    pub default_corpus_roles: Vec<String>,
}

impl Default for AccessConfig {
    fn default() -> Self {
        Self {
            superadmin_role: default_superadmin_role(),
            default_corpus_roles: default_corpus_roles(),
        }
    }
}

fn default_superadmin_role() -> String {
    "Super-Admin".to_string()
}
fn default_corpus_roles() -> Vec<String> {
    vec!["Admin".to_string(), "Super-Admin".to_string()]
}

#[derive(Debug, Deserialize, Clone)]
pub struct BackendsConfig {
    #[serde(default = "default_connect_timeout_secs")]
    pub connect_timeout_secs: u64,
    #[serde(default = "default_call_timeout_secs")]
    pub call_timeout_secs: u64,
}

impl Default for BackendsConfig {
    fn default() -> Self {
        Self {
            connect_timeout_secs: default_connect_timeout_secs(),
            call_timeout_secs: default_call_timeout_secs(),
        }
    }
}

fn default_connect_timeout_secs() -> u64 {
    10
}
fn default_call_timeout_secs() -> u64 {
    60
}

#[derive(Debug, Deserialize, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum EmbeddingProviderKind {
    Stub,
    Openai,
    Ollama,
}

/// One entry of the embedding model catalogue.
#[derive(Debug, Deserialize, Clone)]
pub struct EmbeddingModelConfig {
    /// Catalogue id; part of every collection key.
    pub id: String,
    pub provider: EmbeddingProviderKind,
    /// Provider-side model name. Defaults to `id`.
    #[serde(default)]
    pub model: Option<String>,
    pub dims: usize,
    /// Base URL override (Ollama server, OpenAI-compatible proxy).
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

impl EmbeddingModelConfig {
    pub fn provider_model(&self) -> &str {
        self.model.as_deref().unwrap_or(&self.id)
    }
}

fn default_batch_size() -> usize {
    64
}
fn default_max_retries() -> u32 {
    5
}
fn default_timeout_secs() -> u64 {
    30
}

#[derive(Debug, Deserialize, Clone)]
pub struct EmbeddingConfig {
    #[serde(default = "default_models")]
    pub models: Vec<EmbeddingModelConfig>,
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            models: default_models(),
        }
    }
}

fn default_models() -> Vec<EmbeddingModelConfig> {
    vec![EmbeddingModelConfig {
        id: "stub-256".to_string(),
        provider: EmbeddingProviderKind::Stub,
        model: None,
        dims: 256,
        url: None,
        batch_size: default_batch_size(),
        max_retries: default_max_retries(),
        timeout_secs: default_timeout_secs(),
    }]
}

#[derive(Debug, Deserialize, Clone)]
pub struct ServerConfig {
    #[serde(default = "default_bind")]
    pub bind: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: default_bind(),
        }
    }
}

fn default_bind() -> String {
    "127.0.0.1:7341".to_string()
}

pub fn load_config(path: &Path) -> Result<Config> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;
    parse_config(&content)
}

pub fn parse_config(content: &str) -> Result<Config> {
    let config: Config = toml::from_str(content).with_context(|| "Failed to parse config file")?;
    validate(&config)?;
    Ok(config)
}

fn validate(config: &Config) -> Result<()> {
    let r = &config.retrieval;
    if r.default_k == 0 {
        bail!("retrieval.default_k must be >= 1");
    }
    if r.query_deadline_ms == 0 {
        bail!("retrieval.query_deadline_ms must be > 0");
    }
    if r.default_chunk_size == 0 {
        bail!("retrieval.default_chunk_size must be > 0");
    }
    if r.default_chunk_overlap >= r.default_chunk_size {
        bail!("retrieval.default_chunk_overlap must be smaller than default_chunk_size");
    }

    if config.backends.connect_timeout_secs == 0 {
        bail!("backends.connect_timeout_secs must be > 0");
    }

    let mut seen = HashSet::new();
    for m in &config.embedding.models {
        if m.id.trim().is_empty() {
            bail!("embedding.models: id must not be empty");
        }
        if !seen.insert(m.id.as_str()) {
            bail!("embedding.models: duplicate id '{}'", m.id);
        }
        if m.dims == 0 {
            bail!("embedding model '{}': dims must be > 0", m.id);
        }
        if m.batch_size == 0 {
            bail!("embedding model '{}': batch_size must be > 0", m.id);
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_minimal_config_uses_defaults() {
        let config = parse_config("[db]\npath = \"/tmp/t.sqlite\"\n").unwrap();
        assert_eq!(config.store.backend, StoreKind::Sqlite);
        assert_eq!(config.retrieval.default_k, 5);
        assert_eq!(config.retrieval.merge, MergeMode::Global);
        assert_eq!(config.access.superadmin_role, "Super-Admin");
        assert_eq!(config.embedding.models.len(), 1);
        assert_eq!(config.embedding.models[0].id, "stub-256");
    }

    #[test]
    fn test_full_config() {
        let toml = r#"
[db]
path = "./data/toolgate.sqlite"

[store]
backend = "memory"

[retrieval]
default_k = 8
merge = "per_corpus"
tie_break = "chunk_then_corpus"
min_per_corpus = 1
dedupe_text = true

[[embedding.models]]
id = "text-embedding-3-small"
provider = "openai"
dims = 1536

[[embedding.models]]
id = "nomic"
provider = "ollama"
model = "nomic-embed-text"
dims = 768
url = "http://localhost:11434"
"#;
        let config = parse_config(toml).unwrap();
        assert_eq!(config.store.backend, StoreKind::Memory);
        assert_eq!(config.retrieval.merge, MergeMode::PerCorpus);
        assert_eq!(config.retrieval.tie_break, TieBreak::ChunkThenCorpus);
        let policy = config.retrieval.merge_policy();
        assert_eq!(policy.min_per_corpus, 1);
        assert!(policy.dedupe_text);
        assert_eq!(config.embedding.models[1].provider_model(), "nomic-embed-text");
        assert_eq!(config.embedding.models[0].provider_model(), "text-embedding-3-small");
    }

    #[test]
    fn test_rejects_unknown_store() {
        assert!(parse_config("[db]\npath = \"x\"\n[store]\nbackend = \"qdrant\"\n").is_err());
    }

    #[test]
    fn test_rejects_duplicate_model_ids() {
        let toml = r#"
[db]
path = "x"
[[embedding.models]]
id = "m"
provider = "stub"
dims = 8
[[embedding.models]]
id = "m"
provider = "stub"
dims = 16
"#;
        let err = parse_config(toml).unwrap_err().to_string();
        assert!(err.contains("duplicate id"));
    }

    #[test]
    fn test_rejects_bad_overlap() {
        let toml = "[db]\npath = \"x\"\n[retrieval]\ndefault_chunk_size = 100\ndefault_chunk_overlap = 100\n";
        assert!(parse_config(toml).is_err());
    }

    #[test]
    fn test_shipped_config_parses() {
        let config = parse_config(include_str!("../../../config/toolgate.toml")).unwrap();
        assert_eq!(config.server.bind, "127.0.0.1:7341");
        assert_eq!(config.access.default_corpus_roles, vec!["Admin", "Super-Admin"]);
    }
}
