use crate::error::{RagError, Result};
use serde::{Deserialize, Serialize};

/// Representation of a vector embedding
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct Embedding {
    pub values: Vec<f32>,
}

impl Embedding {
    /// Wrap raw values, rejecting an empty vector
    pub fn new(values: Vec<f32>) -> Result<Self> {
        if values.is_empty() {
            return Err(RagError::EmbeddingService(
                "embedding model returned an empty vector".to_string(),
            ));
        }
        Ok(Embedding { values })
    }

    pub fn dimension(&self) -> usize {
        self.values.len()
    }
}

/// Anything that turns text into a fixed-dimension vector
#[allow(async_fn_in_trait)]
pub trait Embedder {
    /// Generate the embedding for one text
    async fn embed(&self, text: &str) -> Result<Embedding>;

    /// Generate embeddings for several texts, one call each
    async fn embed_all(&self, texts: &[String]) -> Result<Vec<Embedding>> {
        let mut embeddings = Vec::with_capacity(texts.len());

        for text in texts {
            embeddings.push(self.embed(text).await?);
        }

        Ok(embeddings)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::Cell;

    struct CountingEmbedder {
        calls: Cell<usize>,
    }

    impl Embedder for CountingEmbedder {
        async fn embed(&self, text: &str) -> Result<Embedding> {
            self.calls.set(self.calls.get() + 1);
            if text == "boom" {
                return Err(RagError::EmbeddingService("model unavailable".to_string()));
            }
            Embedding::new(vec![text.len() as f32, 1.0])
        }
    }

    #[test]
    fn test_empty_vector_rejected() {
        assert!(matches!(
            Embedding::new(Vec::new()),
            Err(RagError::EmbeddingService(_))
        ));
    }

    #[tokio::test]
    async fn test_embed_all_is_one_call_per_text() {
        let embedder = CountingEmbedder { calls: Cell::new(0) };
        let texts = vec!["a".to_string(), "bb".to_string(), "ccc".to_string()];

        let embeddings = embedder.embed_all(&texts).await.unwrap();

        assert_eq!(embedder.calls.get(), 3);
        assert_eq!(embeddings[2].values, vec![3.0, 1.0]);
    }

    #[tokio::test]
    async fn test_embed_all_stops_at_first_failure() {
        let embedder = CountingEmbedder { calls: Cell::new(0) };
        let texts = vec!["a".to_string(), "boom".to_string(), "ccc".to_string()];

        assert!(embedder.embed_all(&texts).await.is_err());
        assert_eq!(embedder.calls.get(), 2);
    }
}
