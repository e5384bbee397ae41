use crate::database::VectorStore;
use crate::document::{is_supported, load_directory};
use crate::embeddings::Embedder;
use crate::error::RagError;
use crate::history::{ChatHistory, Message};
use crate::rag::{ChatModel, IngestReport, RagSession};
use log::{error, info, warn};
use std::path::{Path, PathBuf};
use tokio::fs;

pub const CLEARED_STATUS: &str = "Vectorstore cleared. Upload new files to start.";

/// User-facing actions over a session. Each returns text or turns for
/// display; pipeline errors are turned into messages here and never escape.
pub struct App<E, S, G> {
    session: RagSession<E, S, G>,
    history: ChatHistory,
    data_dir: PathBuf,
}

impl<E: Embedder, S: VectorStore, G: ChatModel> App<E, S, G> {
    /// Wrap a session, loading any collection left by a previous run
    pub async fn start<P: AsRef<Path>>(mut session: RagSession<E, S, G>, data_dir: P) -> Self {
        match session.load_existing().await {
            Ok(true) => info!("RAG chain ready."),
            Ok(false) => info!("No existing vector store. Upload documents to start."),
            Err(e) => warn!("Could not load existing vector store: {}", e),
        }

        App {
            session,
            history: ChatHistory::new(),
            data_dir: data_dir.as_ref().to_path_buf(),
        }
    }

    pub fn session(&self) -> &RagSession<E, S, G> {
        &self.session
    }

    pub fn history(&self) -> &ChatHistory {
        &self.history
    }

    /// Copy uploads into the data directory and ingest them as one batch
    pub async fn process_files<P: AsRef<Path>>(&mut self, files: &[P]) -> String {
        if files.is_empty() {
            return "No files uploaded.".to_string();
        }

        match self.copy_and_ingest(files).await {
            Ok(report) if report.chunks == 0 => "No chunks created from documents.".to_string(),
            Ok(report) => format!(
                "Successfully processed {} file(s). Created {} chunks. Ready to chat!",
                report.files, report.chunks
            ),
            Err(e) => {
                error!("Ingest failed: {}", e);
                e.ingest_message()
            }
        }
    }

    async fn copy_and_ingest<P: AsRef<Path>>(&mut self, files: &[P]) -> Result<IngestReport, RagError> {
        fs::create_dir_all(&self.data_dir).await?;

        let mut copies = Vec::with_capacity(files.len());
        for file in files {
            let copy = self.copy_upload(file.as_ref()).await?;
            copies.push(copy);
        }

        self.session.ingest(&copies).await
    }

    /// Flat copy by file name; a later upload with the same name overwrites
    async fn copy_upload(&self, src: &Path) -> Result<PathBuf, RagError> {
        let name = src
            .file_name()
            .ok_or_else(|| RagError::load(src.display().to_string(), "invalid file name"))?;
        let display_name = name.to_string_lossy().to_string();

        if !is_supported(src) {
            return Err(RagError::UnsupportedFormat {
                extension: src
                    .extension()
                    .map(|ext| format!(".{}", ext.to_string_lossy()))
                    .unwrap_or_else(|| "(none)".to_string()),
                path: display_name,
            });
        }

        let dst = self.data_dir.join(name);
        let same_file = match (fs::canonicalize(src).await, fs::canonicalize(&dst).await) {
            (Ok(a), Ok(b)) => a == b,
            _ => false,
        };
        if !same_file {
            fs::copy(src, &dst)
                .await
                .map_err(|e| RagError::load(display_name, e))?;
        }

        Ok(dst)
    }

    /// Answer a question and append the exchange to the displayed history
    pub async fn chat(&mut self, message: &str) -> &[Message] {
        let question = message.trim();
        if question.is_empty() {
            return self.history.turns();
        }

        let reply = match self.session.ask(question).await {
            Ok(answer) => answer.text,
            Err(e) => {
                if !matches!(e, RagError::NoVectorStore) {
                    error!("Question failed: {}", e);
                }
                e.user_message()
            }
        };

        self.history.push_exchange(question, reply);
        self.history.turns()
    }

    /// Reset the displayed conversation only
    pub fn clear_chat(&mut self) {
        self.history.clear();
    }

    /// Destroy the collection and the conversation
    pub async fn clear_all(&mut self) -> String {
        self.history.clear();
        match self.session.clear().await {
            Ok(()) => CLEARED_STATUS.to_string(),
            Err(e) => {
                error!("Clearing the vector store failed: {}", e);
                e.user_message()
            }
        }
    }

    /// Rebuild the collection from every file in the data directory.
    /// The old collection stays in place unless the rebuild succeeds.
    pub async fn rebuild(&mut self) -> String {
        let loaded = match load_directory(&self.data_dir) {
            Ok(loaded) => loaded,
            Err(e) => return e.ingest_message(),
        };

        match self
            .session
            .rebuild_documents(loaded.documents, loaded.files)
            .await
        {
            Ok(report) if report.chunks == 0 => "No chunks created from documents.".to_string(),
            Ok(report) => format!(
                "Rebuilt vector store from {} file(s). Created {} chunks.",
                report.files, report.chunks
            ),
            Err(e) => {
                error!("Rebuild failed: {}", e);
                e.ingest_message()
            }
        }
    }
}
