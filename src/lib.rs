pub mod app;
pub mod chunking;
pub mod config;
pub mod database;
pub mod document;
pub mod embeddings;
pub mod error;
pub mod history;
pub mod ollama;
pub mod prompt;
pub mod rag;

pub use error::{RagError, Result};
