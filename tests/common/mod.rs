#![allow(dead_code)]

use local_rag::app::App;
use local_rag::config::Config;
use local_rag::database::LanceStore;
use local_rag::embeddings::{Embedder, Embedding};
use local_rag::history::Message;
use local_rag::rag::{ChatModel, RagSession};
use local_rag::{RagError, Result};
use std::fs;
use std::path::{Path, PathBuf};
use tempfile::TempDir;

const DIM: usize = 256;

/// Deterministic bag-of-words embedding: each word bumps one hashed bucket
pub struct HashEmbedder;

impl Embedder for HashEmbedder {
    async fn embed(&self, text: &str) -> Result<Embedding> {
        if text.contains("POISON") {
            return Err(RagError::EmbeddingService("model crashed".to_string()));
        }

        let mut values = vec![0.0f32; DIM];
        for word in text
            .split(|c: char| !c.is_alphanumeric())
            .filter(|w| !w.is_empty())
        {
            let hash = word
                .to_lowercase()
                .bytes()
                .fold(2_166_136_261u32, |h, b| (h ^ b as u32).wrapping_mul(16_777_619));
            values[hash as usize % DIM] += 1.0;
        }
        Embedding::new(values)
    }
}

/// Replies with the user turn it received, so tests can see the grounding context
pub struct EchoModel;

impl ChatModel for EchoModel {
    async fn chat(&self, messages: &[Message], _temperature: f32) -> Result<String> {
        Ok(messages
            .last()
            .map(|m| m.content.clone())
            .unwrap_or_default())
    }
}

pub struct BrokenModel;

impl ChatModel for BrokenModel {
    async fn chat(&self, _messages: &[Message], _temperature: f32) -> Result<String> {
        Err(RagError::Generation("model endpoint returned 500".to_string()))
    }
}

pub struct Workspace {
    pub tmp: TempDir,
    pub config: Config,
}

impl Workspace {
    pub fn new() -> Self {
        let tmp = TempDir::new().unwrap();
        let config = Config {
            data_dir: tmp.path().join("data"),
            store_dir: tmp.path().join("vector_db"),
            ..Config::default()
        };
        fs::create_dir_all(tmp.path().join("uploads")).unwrap();
        Workspace { tmp, config }
    }

    /// Write a file into the uploads folder, outside the data directory
    pub fn upload(&self, name: &str, content: &str) -> PathBuf {
        let path = self.tmp.path().join("uploads").join(name);
        fs::write(&path, content).unwrap();
        path
    }

    pub fn store_dir(&self) -> &Path {
        &self.config.store_dir
    }

    pub async fn app<G: ChatModel>(&self, model: G) -> App<HashEmbedder, LanceStore, G> {
        let session = RagSession::new(
            HashEmbedder,
            LanceStore::new(&self.config.store_dir),
            model,
            &self.config,
        );
        App::start(session, &self.config.data_dir).await
    }
}
