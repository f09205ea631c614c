pub mod cache;
pub mod config;
pub mod keyword;
pub mod pipeline;
pub mod scoring;
pub mod snippet;

use std::sync::{Arc, RwLock};
use std::time::Instant;

use chrono::Utc;
use common::{
    error::AppError, storage::db::SurrealDbClient, storage::types::record_chunk::RecordChunk,
    utils::embedding::EmbeddingProvider,
};
use query_understanding::StructuredQuery;
use serde::{Deserialize, Serialize};
use tracing::{info, instrument};

pub use cache::RetrievalCache;
pub use config::RetrievalTuning;
pub use keyword::Bm25Index;
pub use pipeline::{PipelineStage, StageKind, StageMetric};

/// Process-wide keyword index: writes are serialized behind the lock,
/// reads run concurrently.
pub type SharedKeywordIndex = Arc<RwLock<Bm25Index>>;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Highlight {
    pub start: usize,
    pub end: usize,
    pub text: String,
}

/// One ranked retrieval result. Within a result set, `rank` is the 1-based
/// position in score-descending order.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetrievalCandidate {
    pub chunk: RecordChunk,
    pub score: f32,
    pub snippet: String,
    pub highlights: Vec<Highlight>,
    pub rank: usize,
}

/// Pipeline output, including per-stage diagnostics. On failure or deadline
/// expiry `error` is set and `candidates` holds whatever was computed.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetrievalOutput {
    pub candidates: Vec<RetrievalCandidate>,
    pub stage_metrics: Vec<StageMetric>,
    pub error: Option<String>,
    pub cache_hit: bool,
    pub retrieval_time_ms: u128,
}

/// Runs the seven-stage pipeline for one query, consulting the cache first.
#[instrument(skip_all, fields(patient_id = %query.patient_id, intent = %query.intent))]
pub async fn run_pipeline(
    db: &SurrealDbClient,
    embedding_provider: Option<&EmbeddingProvider>,
    keyword_index: &SharedKeywordIndex,
    cache: Option<&RetrievalCache>,
    query: &StructuredQuery,
    tuning: RetrievalTuning,
) -> Result<RetrievalOutput, AppError> {
    run_pipeline_with_embedding(db, embedding_provider, None, keyword_index, cache, query, tuning)
        .await
}

/// Pipeline entry point that accepts a precomputed query embedding, used by
/// tests and by callers that already embedded the query.
#[allow(clippy::too_many_arguments)]
pub async fn run_pipeline_with_embedding(
    db: &SurrealDbClient,
    embedding_provider: Option<&EmbeddingProvider>,
    query_embedding: Option<Vec<f32>>,
    keyword_index: &SharedKeywordIndex,
    cache: Option<&RetrievalCache>,
    query: &StructuredQuery,
    tuning: RetrievalTuning,
) -> Result<RetrievalOutput, AppError> {
    let started = Instant::now();

    let cache_key = cache.map(|c| c.key_for(query, &tuning));
    if let (Some(cache), Some(key)) = (cache, cache_key.as_deref()) {
        if let Some(candidates) = cache.get(key) {
            info!(candidates = candidates.len(), "Retrieval cache hit");
            return Ok(RetrievalOutput {
                candidates,
                stage_metrics: Vec::new(),
                error: None,
                cache_hit: true,
                retrieval_time_ms: started.elapsed().as_millis(),
            });
        }
    }

    let mut ctx = pipeline::PipelineContext::new(
        db,
        embedding_provider,
        keyword_index,
        query,
        tuning,
        Utc::now(),
    );
    ctx.query_embedding = query_embedding;

    pipeline::execute(&mut ctx).await;

    let output = RetrievalOutput {
        candidates: ctx.candidates,
        stage_metrics: ctx.stage_metrics,
        error: ctx.error,
        cache_hit: false,
        retrieval_time_ms: started.elapsed().as_millis(),
    };

    if output.error.is_none() {
        if let (Some(cache), Some(key)) = (cache, cache_key) {
            cache.insert(key, output.candidates.clone());
        }
    }

    info!(
        candidates = output.candidates.len(),
        elapsed_ms = output.retrieval_time_ms,
        error = output.error.as_deref().unwrap_or(""),
        "Retrieval pipeline finished"
    );

    Ok(output)
}
