//! Remote embedding provider
//!
//! Delegates embedding generation to the cloud backend's own embedding
//! endpoint so that vectors stored there are comparable to vectors it
//! generates for queries. Used exclusively by the cloud store — the local
//! store never calls out over the network for embeddings.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use super::{EmbeddingError, EmbeddingProvider, REMOTE_EMBEDDING_DIMENSIONS};

#[derive(Debug, Serialize)]
struct EmbedRequest<'a> {
    input: &'a [&'a str],
}

#[derive(Debug, Deserialize)]
struct EmbedResponse {
    embeddings: Vec<Vec<f32>>,
}

/// Embedding provider that calls a remote HTTP endpoint.
pub struct RemoteEmbeddingProvider {
    client: reqwest::Client,
    endpoint: String,
    api_key: Option<String>,
}

impl RemoteEmbeddingProvider {
    pub fn new(client: reqwest::Client, endpoint: impl Into<String>, api_key: Option<String>) -> Self {
        Self {
            client,
            endpoint: endpoint.into(),
            api_key,
        }
    }

    fn request(&self, body: &EmbedRequest<'_>) -> reqwest::RequestBuilder {
        let mut req = self.client.post(format!("{}/embeddings", self.endpoint)).json(body);
        if let Some(key) = &self.api_key {
            req = req.bearer_auth(key);
        }
        req
    }
}

#[async_trait]
impl EmbeddingProvider for RemoteEmbeddingProvider {
    fn dimensions(&self) -> usize {
        REMOTE_EMBEDDING_DIMENSIONS
    }

    async fn embed(&self, text: &str) -> Result<Vec<f32>, EmbeddingError> {
        if text.is_empty() {
            return Err(EmbeddingError::InvalidInput("text cannot be empty".into()));
        }
        let mut vectors = self.embed_batch(&[text]).await?;
        vectors
            .pop()
            .ok_or_else(|| EmbeddingError::EmbeddingFailed("no embedding returned".into()))
    }

    async fn embed_batch(&self, texts: &[&str]) -> Result<Vec<Vec<f32>>, EmbeddingError> {
        if texts.is_empty() {
            return Ok(vec![]);
        }

        let body = EmbedRequest { input: texts };
        let response = self
            .request(&body)
            .send()
            .await
            .map_err(|e| EmbeddingError::EmbeddingFailed(e.to_string()))?;

        if !response.status().is_success() {
            return Err(EmbeddingError::EmbeddingFailed(format!(
                "remote embedding endpoint returned {}",
                response.status()
            )));
        }

        let parsed: EmbedResponse = response
            .json()
            .await
            .map_err(|e| EmbeddingError::EmbeddingFailed(e.to_string()))?;

        if parsed.embeddings.len() != texts.len() {
            return Err(EmbeddingError::EmbeddingFailed(format!(
                "expected {} embeddings, got {}",
                texts.len(),
                parsed.embeddings.len()
            )));
        }

        Ok(parsed.embeddings)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn provider_reports_remote_dimensions() {
        let provider = RemoteEmbeddingProvider::new(reqwest::Client::new(), "https://example.invalid", None);
        assert_eq!(provider.dimensions(), REMOTE_EMBEDDING_DIMENSIONS);
    }
}
