use crate::config::Config;
use crate::embeddings::{Embedder, Embedding};
use crate::error::{RagError, Result};
use crate::history::Message;
use crate::rag::ChatModel;
use log::debug;
use serde::{Deserialize, Serialize};

/// Configuration for the Ollama API
#[derive(Debug, Clone)]
pub struct OllamaConfig {
    pub base_url: String,
    pub embed_model: String,
    pub llm_model: String,
}

impl From<&Config> for OllamaConfig {
    fn from(config: &Config) -> Self {
        OllamaConfig {
            base_url: config.ollama_base_url.clone(),
            embed_model: config.embed_model.clone(),
            llm_model: config.llm_model.clone(),
        }
    }
}

/// Client for the embedding and chat endpoints of an Ollama server
#[derive(Clone)]
pub struct OllamaClient {
    config: OllamaConfig,
    client: reqwest::Client,
}

impl OllamaClient {
    /// Create a new Ollama client
    pub fn new(config: OllamaConfig) -> Self {
        let client = reqwest::Client::new();
        OllamaClient { config, client }
    }

    /// Get the client configuration
    pub fn config(&self) -> &OllamaConfig {
        &self.config
    }

    async fn post<B, T>(&self, path: &str, body: &B) -> std::result::Result<T, String>
    where
        B: Serialize,
        T: for<'de> Deserialize<'de>,
    {
        let url = format!("{}{}", self.config.base_url, path);
        debug!("POST {}", url);

        let response = self
            .client
            .post(&url)
            .json(body)
            .send()
            .await
            .map_err(|e| format!("request to {} failed: {}", url, e))?;

        if !response.status().is_success() {
            let status = response.status();
            let error_text = response
                .text()
                .await
                .unwrap_or_else(|_| "Unknown error".to_string());
            return Err(format!("API request failed: {} {}", status, error_text));
        }

        response
            .json()
            .await
            .map_err(|e| format!("malformed response from {}: {}", url, e))
    }
}

impl Embedder for OllamaClient {
    async fn embed(&self, text: &str) -> Result<Embedding> {
        let request = EmbedRequest {
            model: &self.config.embed_model,
            input: text,
        };

        let response: EmbedResponse = self
            .post("/api/embed", &request)
            .await
            .map_err(RagError::EmbeddingService)?;

        let values = response
            .embeddings
            .into_iter()
            .next()
            .ok_or_else(|| RagError::EmbeddingService("no embedding returned".to_string()))?;

        Embedding::new(values)
    }
}

impl ChatModel for OllamaClient {
    async fn chat(&self, messages: &[Message], temperature: f32) -> Result<String> {
        let request = ChatRequest {
            model: &self.config.llm_model,
            messages,
            stream: false,
            options: ChatOptions { temperature },
        };

        let response: ChatResponse = self
            .post("/api/chat", &request)
            .await
            .map_err(RagError::Generation)?;

        Ok(response.message.content)
    }
}

// Request/response structures for the Ollama API

#[derive(Serialize)]
struct EmbedRequest<'a> {
    model: &'a str,
    input: &'a str,
}

#[derive(Deserialize, Debug)]
struct EmbedResponse {
    #[serde(default)]
    embeddings: Vec<Vec<f32>>,
}

#[derive(Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: &'a [Message],
    stream: bool,
    options: ChatOptions,
}

#[derive(Serialize)]
struct ChatOptions {
    temperature: f32,
}

#[derive(Deserialize, Debug)]
struct ChatResponse {
    message: ResponseMessage,
}

#[derive(Deserialize, Debug)]
struct ResponseMessage {
    content: String,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::history::Role;

    #[test]
    fn test_chat_request_shape() {
        let messages = vec![Message::new(Role::System, "rules"), Message::new(Role::User, "hi")];
        let request = ChatRequest {
            model: "qwen2.5:1.5b",
            messages: &messages,
            stream: false,
            options: ChatOptions { temperature: 0.3 },
        };

        let json = serde_json::to_value(&request).unwrap();
        assert_eq!(json["model"], "qwen2.5:1.5b");
        assert_eq!(json["stream"], false);
        assert_eq!(json["messages"][0]["role"], "system");
        assert_eq!(json["messages"][1]["content"], "hi");
        assert!((json["options"]["temperature"].as_f64().unwrap() - 0.3).abs() < 1e-6);
    }

    #[test]
    fn test_embed_response_without_vectors() {
        let response: EmbedResponse = serde_json::from_str(r#"{"model":"nomic-embed-text"}"#).unwrap();
        assert!(response.embeddings.is_empty());
    }

    #[tokio::test]
    async fn test_unreachable_server_is_embedding_error() {
        let client = OllamaClient::new(OllamaConfig {
            base_url: "http://127.0.0.1:9".to_string(),
            embed_model: "nomic-embed-text".to_string(),
            llm_model: "qwen2.5:1.5b".to_string(),
        });

        assert!(matches!(
            client.embed("hello").await,
            Err(RagError::EmbeddingService(_))
        ));
        assert!(matches!(
            client.chat(&[Message::new(Role::User, "hello")], 0.3).await,
            Err(RagError::Generation(_))
        ));
    }
}
