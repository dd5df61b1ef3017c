//! Embedding generation trait and HTTP implementation.
//!
//! The [`Embedder`] trait is the single seam for vector generation. The
//! default implementation calls an Ollama-compatible `/api/embed` endpoint,
//! which keeps the indexed memory backend usable against local models.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

/// Core embedding generation interface.
#[async_trait]
pub trait Embedder: Send + Sync {
    /// Generate an embedding vector for the given text.
    ///
    /// # Errors
    ///
    /// Returns an error if the provider is unreachable or the response is
    /// malformed.
    async fn embed(&self, text: &str) -> Result<Vec<f32>, EmbedderError>;

    /// Dimensionality of the vectors this embedder produces.
    fn dimensions(&self) -> usize;
}

/// Errors from embedding generation.
#[derive(Debug, thiserror::Error)]
pub enum EmbedderError {
    /// HTTP transport failure.
    #[error("embedder request failed: {0}")]
    Request(#[from] reqwest::Error),

    /// Response did not match the expected format.
    #[error("embedder response parse error: {0}")]
    Parse(String),

    /// Provider is unavailable.
    #[error("embedder unavailable: {0}")]
    Unavailable(String),
}

/// Embedder calling an Ollama-compatible `/api/embed` endpoint.
pub struct HttpEmbedder {
    model: String,
    base_url: String,
    dims: usize,
    client: reqwest::Client,
}

impl std::fmt::Debug for HttpEmbedder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HttpEmbedder")
            .field("model", &self.model)
            .field("base_url", &self.base_url)
            .field("dims", &self.dims)
            .finish()
    }
}

impl HttpEmbedder {
    /// Create an embedder for `model` served at `base_url`.
    ///
    /// `dims` is the expected dimensionality; writes verify produced
    /// vectors against it.
    pub fn new(model: &str, base_url: &str, dims: usize) -> Self {
        Self {
            model: model.to_owned(),
            base_url: base_url.trim_end_matches('/').to_owned(),
            dims,
            client: reqwest::Client::new(),
        }
    }
}

#[derive(Debug, Serialize)]
struct EmbedRequest {
    model: String,
    input: String,
}

#[derive(Debug, Deserialize)]
struct EmbedResponse {
    embeddings: Vec<Vec<f32>>,
}

#[async_trait]
impl Embedder for HttpEmbedder {
    async fn embed(&self, text: &str) -> Result<Vec<f32>, EmbedderError> {
        let url = format!("{}/api/embed", self.base_url);
        let body = EmbedRequest {
            model: self.model.clone(),
            input: text.to_owned(),
        };

        let response = self.client.post(&url).json(&body).send().await?;
        let status = response.status();
        if !status.is_success() {
            let body_text = response.text().await.unwrap_or_default();
            return Err(EmbedderError::Unavailable(format!(
                "embedding endpoint returned {status}: {body_text}"
            )));
        }

        let parsed: EmbedResponse = response
            .json()
            .await
            .map_err(|e| EmbedderError::Parse(e.to_string()))?;
        parsed
            .embeddings
            .into_iter()
            .next()
            .ok_or_else(|| EmbedderError::Parse("empty embeddings array".to_owned()))
    }

    fn dimensions(&self) -> usize {
        self.dims
    }
}
