use thiserror::Error;

/// Every failure the pipeline can report.
///
/// Components return these typed errors; only [`RagError::user_message`]
/// turns them into text for the person at the other end.
#[derive(Error, Debug)]
pub enum RagError {
    /// The file extension is not one of pdf, txt, md, csv, xlsx, xls
    #[error("unsupported file type: {extension} ({path})")]
    UnsupportedFormat { path: String, extension: String },

    /// Text extraction from a supported file failed
    #[error("failed to load {path}: {reason}")]
    Load { path: String, reason: String },

    /// The remote embedding call failed or returned no vector
    #[error("embedding service error: {0}")]
    EmbeddingService(String),

    /// No vector collection is present on disk or in the session
    #[error("no vector store found")]
    NoVectorStore,

    /// The remote language model call failed
    #[error("generation error: {0}")]
    Generation(String),

    /// The vector store engine rejected an operation
    #[error("vector store error: {0}")]
    Store(String),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("invalid configuration: {0}")]
    Config(String),
}

impl RagError {
    pub fn load(path: impl Into<String>, reason: impl ToString) -> Self {
        RagError::Load {
            path: path.into(),
            reason: reason.to_string(),
        }
    }

    /// Translate the error into the message shown to the user.
    pub fn user_message(&self) -> String {
        match self {
            RagError::UnsupportedFormat { path, extension } => {
                format!("Error loading {}: unsupported file type {}", path, extension)
            }
            RagError::Load { path, reason } => format!("Error loading {}: {}", path, reason),
            RagError::EmbeddingService(reason) => {
                format!("Error: embedding service failed: {}", reason)
            }
            RagError::NoVectorStore => "Please upload documents first.".to_string(),
            RagError::Generation(reason) => format!("Error: {}", reason),
            RagError::Store(reason) => format!("Error: vector store failed: {}", reason),
            RagError::Io(e) => format!("Error: {}", e),
            RagError::Config(reason) => format!("Configuration error: {}", reason),
        }
    }

    /// Message for a failed ingest or rebuild. Anything past loading is
    /// reported as a failure to set up the pipeline.
    pub fn ingest_message(&self) -> String {
        match self {
            RagError::EmbeddingService(reason) => {
                format!("Error initializing RAG: embedding service failed: {}", reason)
            }
            RagError::Store(reason) | RagError::Generation(reason) => {
                format!("Error initializing RAG: {}", reason)
            }
            RagError::Io(e) => format!("Error initializing RAG: {}", e),
            _ => self.user_message(),
        }
    }
}

/// Result type alias for pipeline operations.
pub type Result<T> = std::result::Result<T, RagError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unsupported_format_display() {
        let err = RagError::UnsupportedFormat {
            path: "notes.docx".to_string(),
            extension: ".docx".to_string(),
        };
        assert_eq!(err.to_string(), "unsupported file type: .docx (notes.docx)");
        assert_eq!(
            err.user_message(),
            "Error loading notes.docx: unsupported file type .docx"
        );
    }

    #[test]
    fn test_no_vector_store_is_instructive() {
        assert_eq!(
            RagError::NoVectorStore.user_message(),
            "Please upload documents first."
        );
    }

    #[test]
    fn test_generation_error_message() {
        let err = RagError::Generation("connection refused".to_string());
        assert_eq!(err.user_message(), "Error: connection refused");
    }

    #[test]
    fn test_load_helper() {
        let err = RagError::load("report.pdf", "broken xref table");
        assert!(matches!(err, RagError::Load { .. }));
        assert_eq!(err.to_string(), "failed to load report.pdf: broken xref table");
    }

    #[test]
    fn test_from_io_error() {
        let io_err = std::io::Error::new(std::io::ErrorKind::NotFound, "missing");
        let err: RagError = io_err.into();
        assert!(matches!(err, RagError::Io(_)));
    }

    #[test]
    fn test_store_error_prefix_depends_on_action() {
        let err = RagError::Store("query dimension 3 does not match collection dimension 2".to_string());
        assert_eq!(
            err.user_message(),
            "Error: vector store failed: query dimension 3 does not match collection dimension 2"
        );
        assert_eq!(
            err.ingest_message(),
            "Error initializing RAG: query dimension 3 does not match collection dimension 2"
        );
    }

    #[test]
    fn test_embedding_error_messages() {
        let err = RagError::EmbeddingService("model crashed".to_string());
        assert_eq!(err.user_message(), "Error: embedding service failed: model crashed");
        assert_eq!(
            err.ingest_message(),
            "Error initializing RAG: embedding service failed: model crashed"
        );

        let load = RagError::load("a.pdf", "truncated");
        assert_eq!(load.ingest_message(), load.user_message());
    }
}
