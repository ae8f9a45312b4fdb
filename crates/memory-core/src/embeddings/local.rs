//! Local embedding provider
//!
//! Uses fastembed v5 for in-process ONNX inference. No network calls; model
//! weights are downloaded once and cached under a platform cache directory
//! (or `FASTEMBED_CACHE_PATH` if set).
//!
//! Base model is Nomic Embed Text v1.5 (768d, 8192 token context, Matryoshka
//! Representation Learning support); output is truncated to
//! [`super::LOCAL_EMBEDDING_DIMENSIONS`] (384) to match the dimensionality the
//! local vector index and schema are built around.

use std::sync::{Mutex, OnceLock};

use async_trait::async_trait;
use fastembed::{EmbeddingModel, InitOptions, TextEmbedding};

use super::{matryoshka_truncate, EmbeddingError, EmbeddingProvider, BATCH_SIZE, MAX_TEXT_LENGTH};

static EMBEDDING_MODEL_RESULT: OnceLock<Result<Mutex<TextEmbedding>, String>> = OnceLock::new();

fn get_cache_dir() -> std::path::PathBuf {
    if let Ok(path) = std::env::var("FASTEMBED_CACHE_PATH") {
        return std::path::PathBuf::from(path);
    }

    if let Some(proj_dirs) = directories::ProjectDirs::from("com", "memvault", "core") {
        return proj_dirs.cache_dir().join("fastembed");
    }

    if let Some(base_dirs) = directories::BaseDirs::new() {
        return base_dirs.home_dir().join(".cache/memvault/fastembed");
    }

    std::path::PathBuf::from(".fastembed_cache")
}

fn get_model() -> Result<std::sync::MutexGuard<'static, TextEmbedding>, EmbeddingError> {
    let result = EMBEDDING_MODEL_RESULT.get_or_init(|| {
        let cache_dir = get_cache_dir();
        if let Err(e) = std::fs::create_dir_all(&cache_dir) {
            tracing::warn!("failed to create fastembed cache dir {:?}: {}", cache_dir, e);
        }

        let options = InitOptions::new(EmbeddingModel::NomicEmbedTextV15)
            .with_show_download_progress(true)
            .with_cache_dir(cache_dir);

        TextEmbedding::try_new(options).map(Mutex::new).map_err(|e| {
            format!(
                "failed to initialize nomic-embed-text-v1.5: {e}. \
                ensure the ONNX runtime is available and model files can be downloaded"
            )
        })
    });

    match result {
        Ok(model) => model
            .lock()
            .map_err(|e| EmbeddingError::ModelInit(format!("lock poisoned: {e}"))),
        Err(err) => Err(EmbeddingError::ModelInit(err.clone())),
    }
}

/// Local ONNX-backed embedding provider. Cheap to clone — it only wraps a
/// handle to the process-global model.
#[derive(Debug, Default, Clone, Copy)]
pub struct LocalEmbeddingProvider;

impl LocalEmbeddingProvider {
    pub fn new() -> Self {
        Self
    }

    /// Eagerly initialize (and therefore download, if needed) the model.
    pub fn warm_up(&self) -> Result<(), EmbeddingError> {
        get_model().map(|_| ())
    }

    pub fn is_ready(&self) -> bool {
        match get_model() {
            Ok(_) => true,
            Err(e) => {
                tracing::warn!("local embedding model not ready: {}", e);
                false
            }
        }
    }

    pub fn model_name(&self) -> &'static str {
        "nomic-ai/nomic-embed-text-v1.5"
    }
}

#[async_trait]
impl EmbeddingProvider for LocalEmbeddingProvider {
    fn dimensions(&self) -> usize {
        super::LOCAL_EMBEDDING_DIMENSIONS
    }

    async fn embed(&self, text: &str) -> Result<Vec<f32>, EmbeddingError> {
        if text.is_empty() {
            return Err(EmbeddingError::InvalidInput("text cannot be empty".into()));
        }

        let text = if text.len() > MAX_TEXT_LENGTH {
            &text[..MAX_TEXT_LENGTH]
        } else {
            text
        };

        let mut model = get_model()?;
        let embeddings = model
            .embed(vec![text], None)
            .map_err(|e| EmbeddingError::EmbeddingFailed(e.to_string()))?;

        let raw = embeddings
            .into_iter()
            .next()
            .ok_or_else(|| EmbeddingError::EmbeddingFailed("no embedding generated".into()))?;

        Ok(matryoshka_truncate(raw, super::LOCAL_EMBEDDING_DIMENSIONS))
    }

    async fn embed_batch(&self, texts: &[&str]) -> Result<Vec<Vec<f32>>, EmbeddingError> {
        if texts.is_empty() {
            return Ok(vec![]);
        }

        let mut model = get_model()?;
        let mut out = Vec::with_capacity(texts.len());

        for chunk in texts.chunks(BATCH_SIZE) {
            let truncated: Vec<&str> = chunk
                .iter()
                .map(|t| if t.len() > MAX_TEXT_LENGTH { &t[..MAX_TEXT_LENGTH] } else { *t })
                .collect();

            let embeddings = model
                .embed(truncated, None)
                .map_err(|e| EmbeddingError::EmbeddingFailed(e.to_string()))?;

            for emb in embeddings {
                out.push(matryoshka_truncate(emb, super::LOCAL_EMBEDDING_DIMENSIONS));
            }
        }

        Ok(out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn provider_reports_local_dimensions() {
        let provider = LocalEmbeddingProvider::new();
        assert_eq!(provider.dimensions(), super::super::LOCAL_EMBEDDING_DIMENSIONS);
    }
}
