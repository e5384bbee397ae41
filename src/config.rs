use crate::error::{RagError, Result};
use std::env;
use std::path::PathBuf;
use std::str::FromStr;

/// Characters per word-equivalent unit when sizing chunks
pub const CHARS_PER_WORD: usize = 6;

/// Which engine holds the vector collection
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BackendKind {
    /// Embedded LanceDB table in a local directory
    Lance,
    /// Remote Qdrant collection
    Qdrant,
}

impl FromStr for BackendKind {
    type Err = RagError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_lowercase().as_str() {
            "lance" | "local" => Ok(BackendKind::Lance),
            "qdrant" => Ok(BackendKind::Qdrant),
            other => Err(RagError::Config(format!("unknown vector backend: {}", other))),
        }
    }
}

/// Configuration for Qdrant
#[derive(Debug, Clone)]
pub struct QdrantConfig {
    pub url: String,
    pub api_key: Option<String>,
    pub collection: String,
}

/// Runtime configuration of the pipeline
#[derive(Debug, Clone)]
pub struct Config {
    /// Uploaded files are copied here
    pub data_dir: PathBuf,
    /// The persisted vector collection lives here
    pub store_dir: PathBuf,
    pub ollama_base_url: String,
    pub llm_model: String,
    pub embed_model: String,
    /// Chunk size in word-equivalent units
    pub chunk_size: usize,
    /// Chunk overlap in word-equivalent units
    pub chunk_overlap: usize,
    pub retriever_k: usize,
    pub score_threshold: Option<f32>,
    pub temperature: f32,
    pub backend: BackendKind,
    pub qdrant: QdrantConfig,
}

impl Default for Config {
    fn default() -> Self {
        Config {
            data_dir: PathBuf::from("data"),
            store_dir: PathBuf::from("vector_db"),
            ollama_base_url: "http://localhost:11435".to_string(),
            llm_model: "qwen2.5:1.5b".to_string(),
            embed_model: "nomic-embed-text".to_string(),
            chunk_size: 100,
            chunk_overlap: 20,
            retriever_k: 3,
            score_threshold: None,
            temperature: 0.3,
            backend: BackendKind::Lance,
            qdrant: QdrantConfig {
                url: "http://localhost:6334".to_string(),
                api_key: None,
                collection: "local_rag".to_string(),
            },
        }
    }
}

impl Config {
    /// Create a new configuration from environment variables
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Build a configuration from any key lookup, falling back to defaults.
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let defaults = Config::default();

        let config = Config {
            data_dir: lookup("RAG_DATA_DIR")
                .map(PathBuf::from)
                .unwrap_or(defaults.data_dir),
            store_dir: lookup("RAG_STORE_DIR")
                .map(PathBuf::from)
                .unwrap_or(defaults.store_dir),
            ollama_base_url: lookup("OLLAMA_BASE_URL")
                .map(|url| url.trim_end_matches('/').to_string())
                .unwrap_or(defaults.ollama_base_url),
            llm_model: lookup("LLM_MODEL").unwrap_or(defaults.llm_model),
            embed_model: lookup("EMBED_MODEL").unwrap_or(defaults.embed_model),
            chunk_size: parse_or(&lookup, "CHUNK_SIZE", defaults.chunk_size)?,
            chunk_overlap: parse_or(&lookup, "CHUNK_OVERLAP", defaults.chunk_overlap)?,
            retriever_k: parse_or(&lookup, "RETRIEVER_K", defaults.retriever_k)?,
            score_threshold: match lookup("RETRIEVER_SCORE_THRESHOLD") {
                Some(raw) => Some(parse_value("RETRIEVER_SCORE_THRESHOLD", &raw)?),
                None => None,
            },
            temperature: parse_or(&lookup, "LLM_TEMPERATURE", defaults.temperature)?,
            backend: match lookup("VECTOR_BACKEND") {
                Some(raw) => raw.parse()?,
                None => defaults.backend,
            },
            qdrant: QdrantConfig {
                url: lookup("QDRANT_URL").unwrap_or(defaults.qdrant.url),
                api_key: lookup("QDRANT_API_KEY"),
                collection: lookup("QDRANT_COLLECTION").unwrap_or(defaults.qdrant.collection),
            },
        };

        config.validate()?;
        Ok(config)
    }

    /// Reject settings the pipeline cannot run with
    pub fn validate(&self) -> Result<()> {
        if self.chunk_size == 0 {
            return Err(RagError::Config("CHUNK_SIZE must be > 0".to_string()));
        }
        if self.chunk_overlap >= self.chunk_size {
            return Err(RagError::Config(format!(
                "CHUNK_OVERLAP ({}) must be smaller than CHUNK_SIZE ({})",
                self.chunk_overlap, self.chunk_size
            )));
        }
        if self.retriever_k == 0 {
            return Err(RagError::Config("RETRIEVER_K must be > 0".to_string()));
        }
        Ok(())
    }

    /// Chunk size budget in characters
    pub fn chunk_chars(&self) -> usize {
        self.chunk_size * CHARS_PER_WORD
    }

    /// Chunk overlap budget in characters
    pub fn overlap_chars(&self) -> usize {
        self.chunk_overlap * CHARS_PER_WORD
    }
}

fn parse_or<F, T>(lookup: &F, key: &str, default: T) -> Result<T>
where
    F: Fn(&str) -> Option<String>,
    T: FromStr,
{
    match lookup(key) {
        Some(raw) => parse_value(key, &raw),
        None => Ok(default),
    }
}

fn parse_value<T: FromStr>(key: &str, raw: &str) -> Result<T> {
    raw.trim()
        .parse()
        .map_err(|_| RagError::Config(format!("{} has an invalid value: {}", key, raw)))
}
