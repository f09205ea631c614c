use async_openai::{config::OpenAIConfig, types::CreateEmbeddingRequestArgs, Client};
use tokio_retry::{
    strategy::{jitter, ExponentialBackoff},
    Retry,
};
use tracing::debug;

use crate::{error::AppError, utils::config::EmbeddingConfig};

/// Provider identity surfaced through the `info()` contract.
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize)]
pub struct EmbeddingInfo {
    pub provider: String,
    pub model: String,
    pub dimensions: usize,
}

/// Client for the locally hosted embedding endpoint. The base URL is
/// validated as loopback at configuration time; this type assumes it.
#[derive(Clone)]
pub struct EmbeddingProvider {
    client: Client<OpenAIConfig>,
    model: String,
    dimensions: usize,
    max_batch_size: usize,
}

impl EmbeddingProvider {
    pub fn new(config: &EmbeddingConfig, max_batch_size: usize) -> Self {
        let openai_config = OpenAIConfig::new().with_api_base(config.base_url.clone());
        Self {
            client: Client::with_config(openai_config),
            model: config.model.clone(),
            dimensions: config.dimensions,
            max_batch_size: max_batch_size.max(1),
        }
    }

    pub const fn dimensions(&self) -> usize {
        self.dimensions
    }

    pub fn info(&self) -> EmbeddingInfo {
        EmbeddingInfo {
            provider: "local".to_string(),
            model: self.model.clone(),
            dimensions: self.dimensions,
        }
    }

    /// Generates an embedding for a single input, retrying transient
    /// failures with jittered exponential backoff.
    pub async fn embed(&self, input: &str) -> Result<Vec<f32>, AppError> {
        let retry_strategy = ExponentialBackoff::from_millis(100).map(jitter).take(3);

        let embedding = Retry::spawn(retry_strategy, || self.embed_once(input)).await?;

        if embedding.len() != self.dimensions {
            return Err(AppError::InternalError(format!(
                "embedding for input has dimension {}, expected {}",
                embedding.len(),
                self.dimensions
            )));
        }

        Ok(embedding)
    }

    /// Embeds a batch of texts in sub-batches of at most
    /// `max_batch_size`. Output order matches input order.
    pub async fn embed_batch(&self, inputs: &[String]) -> Result<Vec<Vec<f32>>, AppError> {
        let mut results = Vec::with_capacity(inputs.len());

        for batch in inputs.chunks(self.max_batch_size) {
            let request = CreateEmbeddingRequestArgs::default()
                .model(&self.model)
                .dimensions(u32::try_from(self.dimensions).unwrap_or(u32::MAX))
                .input(batch.to_vec())
                .build()?;

            let response = self.client.embeddings().create(request).await?;

            if response.data.len() != batch.len() {
                return Err(AppError::InternalError(format!(
                    "embedding batch returned {} vectors for {} inputs",
                    response.data.len(),
                    batch.len()
                )));
            }

            // The API tags each vector with its input index; sort so output
            // order always matches input order.
            let mut data = response.data;
            data.sort_by_key(|entry| entry.index);
            results.extend(data.into_iter().map(|entry| entry.embedding));
        }

        debug!(count = results.len(), "Generated embedding batch");

        Ok(results)
    }

    pub async fn health(&self) -> bool {
        self.embed_once("ok").await.is_ok()
    }

    async fn embed_once(&self, input: &str) -> Result<Vec<f32>, AppError> {
        let request = CreateEmbeddingRequestArgs::default()
            .model(&self.model)
            .dimensions(u32::try_from(self.dimensions).unwrap_or(u32::MAX))
            .input([input])
            .build()?;

        let response = self.client.embeddings().create(request).await?;

        let embedding = response
            .data
            .into_iter()
            .next()
            .ok_or_else(|| AppError::LLMParsing("No embedding data received".into()))?
            .embedding;

        Ok(embedding)
    }
}

/// Cosine similarity between two vectors, 0.0 when either norm vanishes.
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() || a.is_empty() {
        return 0.0;
    }

    let mut dot = 0.0f32;
    let mut norm_a = 0.0f32;
    let mut norm_b = 0.0f32;
    for (x, y) in a.iter().zip(b.iter()) {
        dot = x.mul_add(*y, dot);
        norm_a = x.mul_add(*x, norm_a);
        norm_b = y.mul_add(*y, norm_b);
    }

    let denom = norm_a.sqrt() * norm_b.sqrt();
    if denom <= f32::EPSILON {
        0.0
    } else {
        dot / denom
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cosine_similarity_of_identical_vectors_is_one() {
        let v = vec![0.3, 0.5, 0.2];
        assert!((cosine_similarity(&v, &v) - 1.0).abs() < 1e-6);
    }

    #[test]
    fn cosine_similarity_of_orthogonal_vectors_is_zero() {
        let a = vec![1.0, 0.0];
        let b = vec![0.0, 1.0];
        assert!(cosine_similarity(&a, &b).abs() < 1e-6);
    }

    #[test]
    fn cosine_similarity_handles_zero_and_mismatched_vectors() {
        assert!(cosine_similarity(&[0.0, 0.0], &[1.0, 1.0]).abs() < f32::EPSILON);
        assert!(cosine_similarity(&[1.0], &[1.0, 0.0]).abs() < f32::EPSILON);
    }

    #[test]
    fn provider_reports_local_info() {
        let provider = EmbeddingProvider::new(
            &EmbeddingConfig {
                base_url: "http://127.0.0.1:11434/v1".into(),
                model: "nomic-embed-text".into(),
                dimensions: 768,
            },
            100,
        );

        let info = provider.info();
        assert_eq!(info.provider, "local");
        assert_eq!(info.model, "nomic-embed-text");
        assert_eq!(info.dimensions, 768);
    }
}
