//! Embedding generation for the index.
//!
//! Providers turn text into vectors; [`Embedder`] wraps one provider with a
//! per-call timeout, dimension checking and an optional cache so rebuilds only
//! pay for records whose text changed.

pub mod cache;
pub mod config;
pub mod provider;
pub mod providers;

pub use cache::EmbeddingCache;
pub use config::EmbeddingConfig;
pub use provider::{create_provider, EmbeddingProvider};

use simdex_core::{AppError, AppResult};
use std::sync::Arc;
use std::time::Duration;

/// Where an embedding came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EmbeddingSource {
    Provider,
    Cache,
}

/// Provider front-end used by the index manager.
#[derive(Debug)]
pub struct Embedder {
    provider: Arc<dyn EmbeddingProvider>,
    timeout: Duration,
    cache: Option<EmbeddingCache>,
}

impl Embedder {
    pub fn new(provider: Arc<dyn EmbeddingProvider>, timeout: Duration) -> Self {
        Self {
            provider,
            timeout,
            cache: None,
        }
    }

    pub fn with_cache(mut self, capacity: usize) -> Self {
        self.cache = Some(EmbeddingCache::new(capacity));
        self
    }

    pub fn provider(&self) -> &Arc<dyn EmbeddingProvider> {
        &self.provider
    }

    pub fn dimensions(&self) -> usize {
        self.provider.dimensions()
    }

    pub fn cache(&self) -> Option<&EmbeddingCache> {
        self.cache.as_ref()
    }

    /// Digest of `text` together with the provider and model that embed it.
    ///
    /// Stored next to each committed vector; a vector is only reused while its
    /// fingerprint still matches.
    pub fn fingerprint(&self, text: &str) -> String {
        EmbeddingCache::digest(&format!(
            "{}\n{}\n{}",
            self.provider.provider_name(),
            self.provider.model_name(),
            text
        ))
    }

    /// Embed `text`, consulting the cache first when one is configured.
    pub async fn embed(&self, text: &str) -> AppResult<(Vec<f32>, EmbeddingSource)> {
        if let Some(hit) = self.cache.as_ref().and_then(|c| c.get(text)) {
            return Ok((hit, EmbeddingSource::Cache));
        }

        let embedding = self.embed_uncached(text).await?;
        if let Some(cache) = &self.cache {
            cache.insert(text, embedding.clone());
        }
        Ok((embedding, EmbeddingSource::Provider))
    }

    /// Embed `text` through the provider, bounded by the configured timeout.
    pub async fn embed_uncached(&self, text: &str) -> AppResult<Vec<f32>> {
        let embedding = tokio::time::timeout(self.timeout, self.provider.embed(text))
            .await
            .map_err(|_| {
                AppError::Embedding(format!(
                    "Provider '{}' did not answer within {:?}",
                    self.provider.provider_name(),
                    self.timeout
                ))
            })?
            .map_err(|e| match e {
                AppError::Embedding(_) => e,
                other => AppError::Embedding(other.to_string()),
            })?;

        if embedding.len() != self.provider.dimensions() {
            return Err(AppError::Embedding(format!(
                "Provider '{}' returned {} dimensions, expected {}",
                self.provider.provider_name(),
                embedding.len(),
                self.provider.dimensions()
            )));
        }

        Ok(embedding)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::embeddings::providers::mock::MockProvider;

    #[derive(Debug)]
    struct SlowProvider;

    #[async_trait::async_trait]
    impl EmbeddingProvider for SlowProvider {
        fn provider_name(&self) -> &str {
            "slow"
        }

        fn model_name(&self) -> &str {
            "slow-v1"
        }

        fn dimensions(&self) -> usize {
            4
        }

        async fn embed_batch(&self, texts: &[String]) -> AppResult<Vec<Vec<f32>>> {
            tokio::time::sleep(Duration::from_secs(5)).await;
            Ok(texts.iter().map(|_| vec![0.0; 4]).collect())
        }
    }

    #[derive(Debug)]
    struct ShortProvider;

    #[async_trait::async_trait]
    impl EmbeddingProvider for ShortProvider {
        fn provider_name(&self) -> &str {
            "short"
        }

        fn model_name(&self) -> &str {
            "short-v1"
        }

        fn dimensions(&self) -> usize {
            4
        }

        async fn embed_batch(&self, texts: &[String]) -> AppResult<Vec<Vec<f32>>> {
            Ok(texts.iter().map(|_| vec![1.0; 2]).collect())
        }
    }

    #[tokio::test]
    async fn test_cache_hit_skips_provider() {
        let embedder = Embedder::new(Arc::new(MockProvider::new(16)), Duration::from_secs(1))
            .with_cache(8);

        let (first, source) = embedder.embed("lake trip").await.unwrap();
        assert_eq!(source, EmbeddingSource::Provider);

        let (second, source) = embedder.embed("lake trip").await.unwrap();
        assert_eq!(source, EmbeddingSource::Cache);
        assert_eq!(first, second);
    }

    #[test]
    fn test_fingerprint_tracks_text_and_model() {
        let mock = Embedder::new(Arc::new(MockProvider::new(4)), Duration::from_secs(1));
        let short = Embedder::new(Arc::new(ShortProvider), Duration::from_secs(1));

        assert_eq!(mock.fingerprint("lake trip"), mock.fingerprint("lake trip"));
        assert_ne!(mock.fingerprint("lake trip"), mock.fingerprint("lake tour"));
        assert_ne!(mock.fingerprint("lake trip"), short.fingerprint("lake trip"));
    }

    #[tokio::test]
    async fn test_timeout_is_embedding_error() {
        let embedder = Embedder::new(Arc::new(SlowProvider), Duration::from_millis(20));
        let err = embedder.embed("anything").await.unwrap_err();
        assert!(matches!(err, AppError::Embedding(ref m) if m.contains("did not answer")));
    }

    #[tokio::test]
    async fn test_dimension_mismatch_is_embedding_error() {
        let embedder = Embedder::new(Arc::new(ShortProvider), Duration::from_secs(1));
        let err = embedder.embed("anything").await.unwrap_err();
        assert!(matches!(err, AppError::Embedding(ref m) if m.contains("2 dimensions")));
    }
}
