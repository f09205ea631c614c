use config::{Config, ConfigError, Environment, File};
use serde::Deserialize;
use url::Url;

use crate::error::AppError;

/// Vector index engine selector. Both variants resolve to the metadata
/// store's HNSW index; the knob exists so deployment configs written for
/// other engines keep validating.
#[derive(Clone, Copy, Debug, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum VectorDbKind {
    Chromadb,
    Faiss,
}

#[derive(Clone, Debug, Deserialize)]
pub struct VectorDbConfig {
    #[serde(default = "default_vector_db_kind", rename = "type")]
    pub kind: VectorDbKind,
    pub dimension: usize,
}

#[derive(Clone, Debug, Deserialize)]
pub struct EmbeddingConfig {
    #[serde(default = "default_embedding_base_url")]
    pub base_url: String,
    #[serde(default = "default_embedding_model")]
    pub model: String,
    #[serde(default = "default_embedding_dimensions")]
    pub dimensions: usize,
}

#[derive(Clone, Debug, Deserialize)]
pub struct LlmConfig {
    #[serde(default = "default_llm_base_url")]
    pub base_url: String,
    #[serde(default = "default_llm_model")]
    pub model: String,
}

#[derive(Clone, Debug, Deserialize)]
pub struct CacheConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default = "default_cache_ttl_seconds")]
    pub ttl_seconds: u64,
}

#[derive(Clone, Debug, Deserialize)]
pub struct PerformanceConfig {
    #[serde(default = "default_max_embedding_batch_size")]
    pub max_embedding_batch_size: usize,
    #[serde(default = "default_retrieval_top_k")]
    pub retrieval_top_k: usize,
}

/// Recognized for validation only; enforcement happens in the external
/// transport, not the core.
#[derive(Clone, Debug, Deserialize)]
pub struct RateLimitConfig {
    #[serde(default)]
    pub enabled: bool,
    #[serde(default = "default_rate_limit_window_ms")]
    pub window_ms: u64,
    #[serde(default = "default_rate_limit_max_requests")]
    pub max_requests: u32,
    #[serde(default)]
    pub ip_whitelist: Vec<String>,
}

#[derive(Clone, Debug, Deserialize)]
pub struct EnrichmentConfig {
    #[serde(default = "default_rollout_percentage")]
    pub rollout_percentage: u8,
}

#[derive(Clone, Debug, Deserialize)]
pub struct IngestionConfig {
    #[serde(default)]
    pub sentence_embeddings_enabled: bool,
}

#[derive(Clone, Debug, Deserialize)]
pub struct AppConfig {
    pub surrealdb_address: String,
    pub surrealdb_username: String,
    pub surrealdb_password: String,
    pub surrealdb_namespace: String,
    pub surrealdb_database: String,
    pub embedding: EmbeddingConfig,
    pub llm: LlmConfig,
    pub vector_db: VectorDbConfig,
    #[serde(default = "default_cache_config")]
    pub cache: CacheConfig,
    #[serde(default = "default_performance_config")]
    pub performance: PerformanceConfig,
    #[serde(default = "default_rate_limit_config")]
    pub rate_limit: RateLimitConfig,
    #[serde(default = "default_enrichment_config")]
    pub enrichment: EnrichmentConfig,
    #[serde(default = "default_ingestion_config")]
    pub ingestion: IngestionConfig,
    #[serde(default = "default_request_deadline_ms")]
    pub request_deadline_ms: u64,
    #[serde(default = "default_metadata_pool_size")]
    pub metadata_pool_size: u32,
}

fn default_vector_db_kind() -> VectorDbKind {
    VectorDbKind::Faiss
}
fn default_embedding_base_url() -> String {
    "http://127.0.0.1:11434/v1".to_string()
}
fn default_embedding_model() -> String {
    "nomic-embed-text".to_string()
}
fn default_embedding_dimensions() -> usize {
    768
}
fn default_llm_base_url() -> String {
    "http://127.0.0.1:11434/v1".to_string()
}
fn default_llm_model() -> String {
    "llama3.1:8b".to_string()
}
const fn default_true() -> bool {
    true
}
const fn default_cache_ttl_seconds() -> u64 {
    300
}
const fn default_max_embedding_batch_size() -> usize {
    100
}
const fn default_retrieval_top_k() -> usize {
    10
}
const fn default_rate_limit_window_ms() -> u64 {
    60_000
}
const fn default_rate_limit_max_requests() -> u32 {
    60
}
const fn default_rollout_percentage() -> u8 {
    100
}
const fn default_request_deadline_ms() -> u64 {
    6_000
}
const fn default_metadata_pool_size() -> u32 {
    20
}
fn default_cache_config() -> CacheConfig {
    CacheConfig {
        enabled: true,
        ttl_seconds: default_cache_ttl_seconds(),
    }
}
fn default_performance_config() -> PerformanceConfig {
    PerformanceConfig {
        max_embedding_batch_size: default_max_embedding_batch_size(),
        retrieval_top_k: default_retrieval_top_k(),
    }
}
fn default_rate_limit_config() -> RateLimitConfig {
    RateLimitConfig {
        enabled: false,
        window_ms: default_rate_limit_window_ms(),
        max_requests: default_rate_limit_max_requests(),
        ip_whitelist: Vec::new(),
    }
}
fn default_enrichment_config() -> EnrichmentConfig {
    EnrichmentConfig {
        rollout_percentage: default_rollout_percentage(),
    }
}
fn default_ingestion_config() -> IngestionConfig {
    IngestionConfig {
        sentence_embeddings_enabled: false,
    }
}

pub fn get_config() -> Result<AppConfig, ConfigError> {
    let config = Config::builder()
        .add_source(File::with_name("config").required(false))
        .add_source(Environment::default().separator("__"))
        .build()?;

    config.try_deserialize()
}

impl AppConfig {
    /// Validates the loaded configuration. Inference endpoints must stay
    /// on-premises, so any non-loopback base URL is rejected here rather
    /// than at first request time.
    pub fn validate(&self) -> Result<(), AppError> {
        ensure_local_endpoint("embedding.base_url", &self.embedding.base_url)?;
        ensure_local_endpoint("llm.base_url", &self.llm.base_url)?;

        if self.vector_db.dimension != self.embedding.dimensions {
            return Err(AppError::Validation(format!(
                "vector_db.dimension ({}) must equal embedding.dimensions ({})",
                self.vector_db.dimension, self.embedding.dimensions
            )));
        }

        if self.performance.max_embedding_batch_size == 0 {
            return Err(AppError::Validation(
                "performance.max_embedding_batch_size must be at least 1".into(),
            ));
        }

        if self.performance.retrieval_top_k == 0 {
            return Err(AppError::Validation(
                "performance.retrieval_top_k must be at least 1".into(),
            ));
        }

        if self.enrichment.rollout_percentage > 100 {
            return Err(AppError::Validation(format!(
                "enrichment.rollout_percentage must be within 0..=100, got {}",
                self.enrichment.rollout_percentage
            )));
        }

        if self.metadata_pool_size == 0 {
            return Err(AppError::Validation(
                "metadata_pool_size must be at least 1".into(),
            ));
        }

        Ok(())
    }
}

fn ensure_local_endpoint(field: &str, raw: &str) -> Result<(), AppError> {
    let url = Url::parse(raw)
        .map_err(|e| AppError::Validation(format!("{field} is not a valid URL: {e}")))?;

    let local = match url.host_str() {
        Some(host) => {
            host.eq_ignore_ascii_case("localhost") || host == "127.0.0.1" || host == "::1"
        }
        None => false,
    };

    if local {
        Ok(())
    } else {
        Err(AppError::Validation(format!(
            "{field} must point to a local endpoint; protected health information never leaves this host (got {raw})"
        )))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn base_config() -> AppConfig {
        AppConfig {
            surrealdb_address: "mem://".into(),
            surrealdb_username: "root".into(),
            surrealdb_password: "root".into(),
            surrealdb_namespace: "anamnes".into(),
            surrealdb_database: "test".into(),
            embedding: EmbeddingConfig {
                base_url: default_embedding_base_url(),
                model: default_embedding_model(),
                dimensions: 768,
            },
            llm: LlmConfig {
                base_url: default_llm_base_url(),
                model: default_llm_model(),
            },
            vector_db: VectorDbConfig {
                kind: VectorDbKind::Faiss,
                dimension: 768,
            },
            cache: default_cache_config(),
            performance: default_performance_config(),
            rate_limit: default_rate_limit_config(),
            enrichment: default_enrichment_config(),
            ingestion: default_ingestion_config(),
            request_deadline_ms: default_request_deadline_ms(),
            metadata_pool_size: default_metadata_pool_size(),
        }
    }

    #[test]
    fn validates_default_local_config() {
        assert!(base_config().validate().is_ok());
    }

    #[test]
    fn rejects_remote_embedding_endpoint() {
        let mut config = base_config();
        config.embedding.base_url = "https://api.openai.com/v1".into();

        let err = config.validate().unwrap_err();
        assert!(matches!(err, AppError::Validation(_)));
        assert!(err.to_string().contains("embedding.base_url"));
    }

    #[test]
    fn rejects_remote_llm_endpoint() {
        let mut config = base_config();
        config.llm.base_url = "http://inference.internal:8000/v1".into();

        assert!(config.validate().is_err());
    }

    #[test]
    fn accepts_localhost_hostname() {
        let mut config = base_config();
        config.llm.base_url = "http://localhost:8080/v1".into();

        assert!(config.validate().is_ok());
    }

    #[test]
    fn rejects_dimension_mismatch() {
        let mut config = base_config();
        config.vector_db.dimension = 1536;

        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("vector_db.dimension"));
    }

    #[test]
    fn rejects_zero_batch_size() {
        let mut config = base_config();
        config.performance.max_embedding_batch_size = 0;

        assert!(config.validate().is_err());
    }
}
