use anyhow::{Context, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};

#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    pub db: DbConfig,
    #[serde(default)]
    pub storage: StorageConfig,
    #[serde(default)]
    pub chunking: ChunkingConfig,
    #[serde(default)]
    pub retrieval: RetrievalConfig,
    #[serde(default)]
    pub embedding: EmbeddingConfig,
    #[serde(default)]
    pub reasoning: ReasoningConfig,
    #[serde(default)]
    pub rerank: RerankConfig,
    #[serde(default)]
    pub dedup: DedupConfig,
    #[serde(default)]
    pub analysis: AnalysisConfig,
    #[serde(default)]
    pub jobs: JobsConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct DbConfig {
    pub path: PathBuf,
}

#[derive(Debug, Deserialize, Clone)]
pub struct StorageConfig {
    #[serde(default = "default_upload_dir")]
    pub upload_dir: PathBuf,
    #[serde(default = "default_max_upload_mb")]
    pub max_upload_size_mb: u64,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            upload_dir: default_upload_dir(),
            max_upload_size_mb: default_max_upload_mb(),
        }
    }
}

fn default_upload_dir() -> PathBuf {
    PathBuf::from("./uploads")
}
fn default_max_upload_mb() -> u64 {
    50
}

#[derive(Debug, Deserialize, Clone)]
pub struct ChunkingConfig {
    /// Chunking strategy: `semantic` or `structural`.
    #[serde(default = "default_strategy")]
    pub strategy: String,
    /// Target chunk size in tokens for the semantic chunker.
    #[serde(default = "default_chunk_tokens")]
    pub chunk_tokens: usize,
    /// Overlap between consecutive semantic chunks, in tokens.
    #[serde(default = "default_overlap_tokens")]
    pub overlap_tokens: usize,
    /// Maximum chunk size in characters for the structural chunker.
    #[serde(default = "default_max_chunk_chars")]
    pub max_chunk_chars: usize,
}

impl Default for ChunkingConfig {
    fn default() -> Self {
        Self {
            strategy: default_strategy(),
            chunk_tokens: default_chunk_tokens(),
            overlap_tokens: default_overlap_tokens(),
            max_chunk_chars: default_max_chunk_chars(),
        }
    }
}

fn default_strategy() -> String {
    "semantic".to_string()
}
fn default_chunk_tokens() -> usize {
    512
}
fn default_overlap_tokens() -> usize {
    50
}
fn default_max_chunk_chars() -> usize {
    2000
}

#[derive(Debug, Deserialize, Clone)]
pub struct RetrievalConfig {
    #[serde(default = "default_top_k")]
    pub top_k: usize,
    /// Candidate widening factor applied when reranking is enabled.
    #[serde(default = "default_widen_factor")]
    pub widen_factor: usize,
    #[serde(default = "default_min_score")]
    pub min_score: f64,
}

impl Default for RetrievalConfig {
    fn default() -> Self {
        Self {
            top_k: default_top_k(),
            widen_factor: default_widen_factor(),
            min_score: default_min_score(),
        }
    }
}

fn default_top_k() -> usize {
    10
}
fn default_widen_factor() -> usize {
    2
}
fn default_min_score() -> f64 {
    0.0
}

#[derive(Debug, Deserialize, Clone)]
pub struct EmbeddingConfig {
    /// Provider: `disabled`, `openai`, or `ollama`.
    #[serde(default = "default_disabled")]
    pub provider: String,
    #[serde(default)]
    pub model: Option<String>,
    #[serde(default)]
    pub dims: Option<usize>,
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            provider: default_disabled(),
            model: None,
            dims: None,
            url: None,
            batch_size: default_batch_size(),
            max_retries: default_max_retries(),
            timeout_secs: default_timeout_secs(),
        }
    }
}

impl EmbeddingConfig {
    pub fn is_enabled(&self) -> bool {
        self.provider != "disabled"
    }
}

fn default_disabled() -> String {
    "disabled".to_string()
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
pub struct ReasoningConfig {
    /// Provider: `disabled` or `openai` (any OpenAI-compatible endpoint).
    #[serde(default = "default_disabled")]
    pub provider: String,
    #[serde(default)]
    pub model: Option<String>,
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default = "default_temperature")]
    pub temperature: f64,
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    #[serde(default = "default_reasoning_timeout")]
    pub timeout_secs: u64,
}

impl Default for ReasoningConfig {
    fn default() -> Self {
        Self {
            provider: default_disabled(),
            model: None,
            url: None,
            temperature: default_temperature(),
            max_retries: default_max_retries(),
            timeout_secs: default_reasoning_timeout(),
        }
    }
}

impl ReasoningConfig {
    pub fn is_enabled(&self) -> bool {
        self.provider != "disabled"
    }
}

fn default_temperature() -> f64 {
    0.0
}
fn default_reasoning_timeout() -> u64 {
    120
}

#[derive(Debug, Deserialize, Clone)]
pub struct RerankConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,
    /// Scoring endpoint for model-backed reranking; heuristic when unset.
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default)]
    pub model: Option<String>,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

impl Default for RerankConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            url: None,
            model: None,
            timeout_secs: default_timeout_secs(),
        }
    }
}

fn default_true() -> bool {
    true
}

#[derive(Debug, Deserialize, Clone)]
pub struct DedupConfig {
    /// A pair joins a group iff the model says duplicate AND similarity is
    /// at or above this value.
    #[serde(default = "default_similarity_threshold")]
    pub similarity_threshold: f64,
    /// Inputs larger than this are deduplicated in fixed-size batches.
    #[serde(default = "default_dedup_batch")]
    pub batch_size: usize,
}

impl Default for DedupConfig {
    fn default() -> Self {
        Self {
            similarity_threshold: default_similarity_threshold(),
            batch_size: default_dedup_batch(),
        }
    }
}

fn default_similarity_threshold() -> f64 {
    0.7
}
fn default_dedup_batch() -> usize {
    50
}

#[derive(Debug, Deserialize, Clone)]
pub struct AnalysisConfig {
    /// Chunks retrieved per document for extraction.
    #[serde(default = "default_chunks_per_document")]
    pub chunks_per_document: usize,
    /// Name-token overlap at or above which a merged candidate matches an
    /// existing initiative.
    #[serde(default = "default_match_threshold")]
    pub match_threshold: f64,
    /// Description word-overlap below which a matched re-occurrence is
    /// flagged as modified.
    #[serde(default = "default_modified_threshold")]
    pub modified_threshold: f64,
}

impl Default for AnalysisConfig {
    fn default() -> Self {
        Self {
            chunks_per_document: default_chunks_per_document(),
            match_threshold: default_match_threshold(),
            modified_threshold: default_modified_threshold(),
        }
    }
}

fn default_chunks_per_document() -> usize {
    50
}
fn default_match_threshold() -> f64 {
    0.6
}
fn default_modified_threshold() -> f64 {
    0.4
}

#[derive(Debug, Deserialize, Clone)]
pub struct JobsConfig {
    #[serde(default = "default_workers")]
    pub workers: usize,
}

impl Default for JobsConfig {
    fn default() -> Self {
        Self {
            workers: default_workers(),
        }
    }
}

fn default_workers() -> usize {
    2
}

pub fn load_config(path: &Path) -> Result<Config> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;

    let config: Config = toml::from_str(&content).with_context(|| "Failed to parse config file")?;

    if config.chunking.chunk_tokens == 0 {
        anyhow::bail!("chunking.chunk_tokens must be > 0");
    }
    if config.chunking.overlap_tokens >= config.chunking.chunk_tokens {
        anyhow::bail!("chunking.overlap_tokens must be smaller than chunk_tokens");
    }
    match config.chunking.strategy.as_str() {
        "semantic" | "structural" => {}
        other => anyhow::bail!(
            "Unknown chunking strategy: '{}'. Must be semantic or structural.",
            other
        ),
    }

    if config.retrieval.top_k == 0 {
        anyhow::bail!("retrieval.top_k must be >= 1");
    }
    if config.retrieval.widen_factor < 2 {
        anyhow::bail!("retrieval.widen_factor must be >= 2");
    }

    if !(0.0..=1.0).contains(&config.dedup.similarity_threshold) {
        anyhow::bail!("dedup.similarity_threshold must be in [0.0, 1.0]");
    }
    if config.dedup.batch_size < 2 {
        anyhow::bail!("dedup.batch_size must be >= 2");
    }

    if !(0.0..=1.0).contains(&config.analysis.modified_threshold) {
        anyhow::bail!("analysis.modified_threshold must be in [0.0, 1.0]");
    }

    if config.embedding.is_enabled() {
        if config.embedding.model.is_none() {
            anyhow::bail!(
                "embedding.model must be specified when provider is '{}'",
                config.embedding.provider
            );
        }
        match config.embedding.provider.as_str() {
            "openai" | "ollama" => {}
            other => anyhow::bail!(
                "Unknown embedding provider: '{}'. Must be disabled, openai, or ollama.",
                other
            ),
        }
    }

    if config.reasoning.is_enabled() {
        if config.reasoning.model.is_none() {
            anyhow::bail!(
                "reasoning.model must be specified when provider is '{}'",
                config.reasoning.provider
            );
        }
        if config.reasoning.provider != "openai" {
            anyhow::bail!(
                "Unknown reasoning provider: '{}'. Must be disabled or openai.",
                config.reasoning.provider
            );
        }
    }

    if config.jobs.workers == 0 {
        anyhow::bail!("jobs.workers must be >= 1");
    }

    Ok(config)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn write_config(content: &str) -> tempfile::NamedTempFile {
        let mut f = tempfile::NamedTempFile::new().unwrap();
        f.write_all(content.as_bytes()).unwrap();
        f
    }

    #[test]
    fn minimal_config_gets_defaults() {
        let f = write_config("[db]\npath = \"/tmp/ilens.sqlite\"\n");
        let cfg = load_config(f.path()).unwrap();
        assert_eq!(cfg.chunking.strategy, "semantic");
        assert_eq!(cfg.chunking.chunk_tokens, 512);
        assert_eq!(cfg.retrieval.top_k, 10);
        assert!((cfg.dedup.similarity_threshold - 0.7).abs() < 1e-9);
        assert!(!cfg.embedding.is_enabled());
        assert!(!cfg.reasoning.is_enabled());
        assert_eq!(cfg.jobs.workers, 2);
    }

    #[test]
    fn rejects_bad_strategy() {
        let f = write_config(
            "[db]\npath = \"/tmp/ilens.sqlite\"\n[chunking]\nstrategy = \"magic\"\n",
        );
        assert!(load_config(f.path()).is_err());
    }

    #[test]
    fn rejects_overlap_not_smaller_than_chunk() {
        let f = write_config(
            "[db]\npath = \"/tmp/ilens.sqlite\"\n[chunking]\nchunk_tokens = 100\noverlap_tokens = 100\n",
        );
        assert!(load_config(f.path()).is_err());
    }

    #[test]
    fn rejects_enabled_embedding_without_model() {
        let f = write_config(
            "[db]\npath = \"/tmp/ilens.sqlite\"\n[embedding]\nprovider = \"openai\"\n",
        );
        assert!(load_config(f.path()).is_err());
    }

    #[test]
    fn rejects_out_of_range_threshold() {
        let f = write_config(
            "[db]\npath = \"/tmp/ilens.sqlite\"\n[dedup]\nsimilarity_threshold = 1.5\n",
        );
        assert!(load_config(f.path()).is_err());
    }
}
