//! Embedding providers
//!
//! Two implementations share one trait: [`local::LocalEmbeddingProvider`] runs
//! fastembed in-process (384-dim, Matryoshka-truncated from a 768-dim base
//! model) for the local store, and [`remote::RemoteEmbeddingProvider`] calls
//! out to the cloud backend's embedding endpoint (768-dim, server-side model).
//! A local and a cloud memory are therefore never directly comparable by raw
//! dot product; each store only ever compares vectors it produced itself.

mod local;
mod remote;

pub use local::LocalEmbeddingProvider;
pub use remote::RemoteEmbeddingProvider;

use async_trait::async_trait;

/// Dimensions produced by the local (fastembed) provider after Matryoshka truncation.
pub const LOCAL_EMBEDDING_DIMENSIONS: usize = 384;

/// Dimensions produced by the remote (cloud) provider.
pub const REMOTE_EMBEDDING_DIMENSIONS: usize = 768;

/// Maximum input length in characters before truncation.
pub const MAX_TEXT_LENGTH: usize = 8192;

/// Batch size used when embedding multiple texts at once.
pub const BATCH_SIZE: usize = 32;

#[non_exhaustive]
#[derive(Debug, Clone)]
pub enum EmbeddingError {
    ModelInit(String),
    EmbeddingFailed(String),
    InvalidInput(String),
}

impl std::fmt::Display for EmbeddingError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            EmbeddingError::ModelInit(e) => write!(f, "model initialization failed: {e}"),
            EmbeddingError::EmbeddingFailed(e) => write!(f, "embedding generation failed: {e}"),
            EmbeddingError::InvalidInput(e) => write!(f, "invalid input: {e}"),
        }
    }
}

impl std::error::Error for EmbeddingError {}

impl From<EmbeddingError> for crate::error::MemoryError {
    fn from(e: EmbeddingError) -> Self {
        crate::error::MemoryError::Embedding(e.to_string())
    }
}

/// A provider of text embeddings, local or remote.
#[async_trait]
pub trait EmbeddingProvider: Send + Sync {
    /// Dimensions of the vectors this provider returns.
    fn dimensions(&self) -> usize;

    async fn embed(&self, text: &str) -> Result<Vec<f32>, EmbeddingError>;

    async fn embed_batch(&self, texts: &[&str]) -> Result<Vec<Vec<f32>>, EmbeddingError> {
        let mut out = Vec::with_capacity(texts.len());
        for t in texts {
            out.push(self.embed(t).await?);
        }
        Ok(out)
    }
}

/// Truncate `vector` to `dims` and L2-renormalize (Matryoshka Representation
/// Learning: the first N dims of a trained MRL model ARE a valid N-dim embedding).
#[inline]
pub fn matryoshka_truncate(mut vector: Vec<f32>, dims: usize) -> Vec<f32> {
    if vector.len() > dims {
        vector.truncate(dims);
    }
    let norm = vector.iter().map(|x| x * x).sum::<f32>().sqrt();
    if norm > 0.0 {
        for x in &mut vector {
            *x /= norm;
        }
    }
    vector
}

#[inline]
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() {
        return 0.0;
    }
    let mut dot = 0.0_f32;
    let mut norm_a = 0.0_f32;
    let mut norm_b = 0.0_f32;
    for (x, y) in a.iter().zip(b.iter()) {
        dot += x * y;
        norm_a += x * x;
        norm_b += y * y;
    }
    let denom = (norm_a * norm_b).sqrt();
    if denom > 0.0 {
        dot / denom
    } else {
        0.0
    }
}

#[inline]
pub fn euclidean_distance(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() {
        return f32::MAX;
    }
    a.iter()
        .zip(b.iter())
        .map(|(x, y)| (x - y).powi(2))
        .sum::<f32>()
        .sqrt()
}

#[inline]
pub fn dot_product(a: &[f32], b: &[f32]) -> f32 {
    a.iter().zip(b.iter()).map(|(x, y)| x * y).sum()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cosine_similarity_identical_is_one() {
        let a = vec![1.0, 2.0, 3.0];
        assert!((cosine_similarity(&a, &a) - 1.0).abs() < 0.0001);
    }

    #[test]
    fn cosine_similarity_orthogonal_is_zero() {
        let a = vec![1.0, 0.0];
        let b = vec![0.0, 1.0];
        assert!(cosine_similarity(&a, &b).abs() < 0.0001);
    }

    #[test]
    fn matryoshka_truncate_renormalizes() {
        let v = vec![3.0_f32; 768];
        let truncated = matryoshka_truncate(v, 384);
        assert_eq!(truncated.len(), 384);
        let norm: f32 = truncated.iter().map(|x| x * x).sum::<f32>().sqrt();
        assert!((norm - 1.0).abs() < 0.0001);
    }
}
