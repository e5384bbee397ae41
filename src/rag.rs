use crate::chunking::{TextChunk, TextSplitter};
use crate::config::Config;
use crate::database::{SearchHit, VectorStore};
use crate::document::{load_document, Document};
use crate::embeddings::{Embedder, Embedding};
use crate::error::{RagError, Result};
use crate::history::Message;
use crate::prompt::build_messages;
use log::{debug, info};
use std::path::Path;

/// A remote language model taking a message list
#[allow(async_fn_in_trait)]
pub trait ChatModel {
    /// Generate the reply to `messages`, returned verbatim
    async fn chat(&self, messages: &[Message], temperature: f32) -> Result<String>;
}

/// Generated answer together with the chunks it was grounded on
#[derive(Debug, Clone)]
pub struct Answer {
    pub text: String,
    pub sources: Vec<SearchHit>,
}

/// Retrieves the top-k chunks for a question and asks the model about them
pub struct AnswerGenerator<G> {
    model: G,
    top_k: usize,
    score_threshold: Option<f32>,
    temperature: f32,
}

impl<G: ChatModel> AnswerGenerator<G> {
    pub fn new(model: G, config: &Config) -> Self {
        AnswerGenerator {
            model,
            top_k: config.retriever_k,
            score_threshold: config.score_threshold,
            temperature: config.temperature,
        }
    }

    pub fn top_k(&self) -> usize {
        self.top_k
    }

    /// Answer one question from the chunks most similar to it
    pub async fn answer<E: Embedder, S: VectorStore>(
        &self,
        question: &str,
        embedder: &E,
        store: &S,
    ) -> Result<Answer> {
        let query = embedder.embed(question).await?;

        let mut hits = store.search(&query, self.top_k).await?;
        if let Some(threshold) = self.score_threshold {
            hits.retain(|hit| hit.score >= threshold);
        }
        debug!("Retrieved {} chunks for question", hits.len());

        let messages = build_messages(question, &hits);
        let text = self.model.chat(&messages, self.temperature).await?;

        Ok(Answer {
            text,
            sources: hits,
        })
    }
}

/// Whether the session has a collection to answer from
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Uninitialized,
    Ready { chunks: usize },
}

/// Outcome of a successful ingest
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IngestReport {
    pub files: usize,
    pub documents: usize,
    /// Chunks created by this ingest
    pub chunks: usize,
    /// Chunks in the collection afterwards
    pub total_chunks: usize,
}

/// RAG (Retrieval-Augmented Generation) session: one vector collection and
/// the pipelines that write to and read from it
pub struct RagSession<E, S, G> {
    embedder: E,
    store: S,
    generator: AnswerGenerator<G>,
    splitter: TextSplitter,
    state: SessionState,
}

impl<E: Embedder, S: VectorStore, G: ChatModel> RagSession<E, S, G> {
    /// Create a session in the `Uninitialized` state
    pub fn new(embedder: E, store: S, model: G, config: &Config) -> Self {
        RagSession {
            embedder,
            store,
            generator: AnswerGenerator::new(model, config),
            splitter: TextSplitter::from_config(config),
            state: SessionState::Uninitialized,
        }
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn is_ready(&self) -> bool {
        matches!(self.state, SessionState::Ready { .. })
    }

    /// Pick up a collection persisted by an earlier run, if there is one
    pub async fn load_existing(&mut self) -> Result<bool> {
        if !self.store.exists().await? {
            return Ok(false);
        }

        info!("Found existing vector store. Loading...");
        let chunks = self.store.open().await?;
        self.state = SessionState::Ready { chunks };
        Ok(true)
    }

    /// Load, chunk, embed and store a batch of files.
    ///
    /// The batch is all-or-nothing: the first file that fails to load or
    /// embed aborts it before anything is written.
    pub async fn ingest<P: AsRef<Path>>(&mut self, paths: &[P]) -> Result<IngestReport> {
        let mut documents = Vec::new();
        for path in paths {
            documents.extend(load_document(path)?);
        }

        self.ingest_documents(documents, paths.len()).await
    }

    /// Chunk and embed documents without touching the store
    async fn embed_documents(
        &self,
        documents: &[Document],
    ) -> Result<(Vec<TextChunk>, Vec<Embedding>)> {
        let chunks = self.splitter.split_documents(documents);
        info!(
            "Split {} documents into {} chunks ({} estimated tokens)",
            documents.len(),
            chunks.len(),
            chunks.iter().map(|c| c.token_count).sum::<usize>()
        );
        if chunks.is_empty() {
            return Ok((chunks, Vec::new()));
        }

        info!("Generating embeddings for {} chunks...", chunks.len());
        let texts: Vec<String> = chunks.iter().map(|c| c.text.clone()).collect();
        let embeddings = self.embedder.embed_all(&texts).await?;
        Ok((chunks, embeddings))
    }

    fn current_chunks(&self) -> usize {
        match self.state {
            SessionState::Ready { chunks } => chunks,
            SessionState::Uninitialized => 0,
        }
    }

    /// Chunk, embed and append already loaded documents
    pub async fn ingest_documents(
        &mut self,
        documents: Vec<Document>,
        files: usize,
    ) -> Result<IngestReport> {
        let (chunks, embeddings) = self.embed_documents(&documents).await?;

        let mut report = IngestReport {
            files,
            documents: documents.len(),
            chunks: chunks.len(),
            total_chunks: self.current_chunks(),
        };
        if chunks.is_empty() {
            return Ok(report);
        }

        report.total_chunks = self.store.add(chunks, embeddings).await?;
        self.state = SessionState::Ready {
            chunks: report.total_chunks,
        };
        info!("RAG pipeline ready with {} chunks", report.total_chunks);

        Ok(report)
    }

    /// Replace the whole collection with these documents.
    ///
    /// Everything is chunked and embedded first; the old collection is only
    /// swapped out once that has succeeded.
    pub async fn rebuild_documents(
        &mut self,
        documents: Vec<Document>,
        files: usize,
    ) -> Result<IngestReport> {
        let (chunks, embeddings) = self.embed_documents(&documents).await?;

        let mut report = IngestReport {
            files,
            documents: documents.len(),
            chunks: chunks.len(),
            total_chunks: self.current_chunks(),
        };
        if chunks.is_empty() {
            return Ok(report);
        }

        report.total_chunks = self.store.replace(chunks, embeddings).await?;
        self.state = SessionState::Ready {
            chunks: report.total_chunks,
        };
        info!("Rebuilt RAG pipeline with {} chunks", report.total_chunks);

        Ok(report)
    }

    /// Answer a question from the current collection
    pub async fn ask(&self, question: &str) -> Result<Answer> {
        if !self.is_ready() {
            return Err(RagError::NoVectorStore);
        }
        self.generator
            .answer(question, &self.embedder, &self.store)
            .await
    }

    /// Destroy the collection and return to `Uninitialized`
    pub async fn clear(&mut self) -> Result<()> {
        self.store.delete().await?;
        self.state = SessionState::Uninitialized;
        info!("Vector store cleared");
        Ok(())
    }
}
