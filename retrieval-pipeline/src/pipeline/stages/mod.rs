use async_trait::async_trait;
use chrono::{DateTime, Utc};
use common::{
    error::AppError,
    storage::{
        db::SurrealDbClient,
        types::record_chunk::{ChunkFilter, RecordChunk},
    },
    utils::embedding::EmbeddingProvider,
};
use query_understanding::StructuredQuery;
use std::collections::{HashMap, HashSet};
use std::future::Future;
use std::time::{Duration, Instant};
use tracing::{debug, instrument, warn};

use crate::{
    config::RetrievalTuning,
    scoring::{
        clamp_unit, combine, jaccard_similarity, keyword_component, min_max_normalize,
        quality_score, recency_score, remap_similarity, sort_by_score_desc, ScoreComponents,
    },
    snippet::{extract_highlights, extract_snippet},
    RetrievalCandidate, SharedKeywordIndex,
};

use super::{PipelineStage, StageKind, StageMetric};

/// A chunk moving through the pipeline with its accumulated signals.
#[derive(Debug, Clone)]
pub struct ScoredChunk {
    pub chunk: RecordChunk,
    /// Raw cosine similarity from the vector store, when available.
    pub semantic: f32,
    /// Normalized BM25 score, when available.
    pub keyword: f32,
    /// Hybrid blend used for the stage-2 cut.
    pub hybrid: f32,
    /// Combined relevance score from stage 3 onward.
    pub score: f32,
}

impl ScoredChunk {
    fn from_chunk(chunk: RecordChunk) -> Self {
        Self {
            chunk,
            semantic: 0.0,
            keyword: 0.0,
            hybrid: 0.0,
            score: 0.0,
        }
    }
}

pub struct PipelineContext<'a> {
    pub db: &'a SurrealDbClient,
    pub embedding_provider: Option<&'a EmbeddingProvider>,
    pub keyword_index: &'a SharedKeywordIndex,
    pub query: &'a StructuredQuery,
    pub tuning: RetrievalTuning,
    pub now: DateTime<Utc>,
    pub deadline: Option<Instant>,
    pub query_embedding: Option<Vec<f32>>,
    pub filtered_chunks: Vec<RecordChunk>,
    pub scored: Vec<ScoredChunk>,
    pub candidates: Vec<RetrievalCandidate>,
    pub stage_metrics: Vec<StageMetric>,
    pub error: Option<String>,
}

impl<'a> PipelineContext<'a> {
    pub fn new(
        db: &'a SurrealDbClient,
        embedding_provider: Option<&'a EmbeddingProvider>,
        keyword_index: &'a SharedKeywordIndex,
        query: &'a StructuredQuery,
        tuning: RetrievalTuning,
        now: DateTime<Utc>,
    ) -> Self {
        let deadline = tuning
            .deadline_ms
            .map(|ms| Instant::now() + Duration::from_millis(ms));
        Self {
            db,
            embedding_provider,
            keyword_index,
            query,
            tuning,
            now,
            deadline,
            query_embedding: None,
            filtered_chunks: Vec::new(),
            scored: Vec::new(),
            candidates: Vec::new(),
            stage_metrics: Vec::new(),
            error: None,
        }
    }

    /// The number of items currently flowing between stages.
    pub fn item_count(&self) -> usize {
        if !self.candidates.is_empty() {
            self.candidates.len()
        } else if !self.scored.is_empty() {
            self.scored.len()
        } else {
            self.filtered_chunks.len()
        }
    }

    /// Remaining deadline budget, or a Timeout error once expired.
    fn checked_remaining(&self) -> Result<Option<Duration>, AppError> {
        match self.deadline {
            None => Ok(None),
            Some(deadline) => {
                let now = Instant::now();
                if now >= deadline {
                    Err(AppError::Timeout("request deadline exceeded".into()))
                } else {
                    Ok(Some(deadline - now))
                }
            }
        }
    }
}

async fn with_deadline<T, F>(remaining: Option<Duration>, fut: F) -> Result<T, AppError>
where
    F: Future<Output = Result<T, AppError>>,
{
    match remaining {
        None => fut.await,
        Some(budget) => tokio::time::timeout(budget, fut)
            .await
            .map_err(|_| AppError::Timeout("request deadline exceeded".into()))?,
    }
}

#[derive(Debug, Clone, Copy)]
pub struct MetadataFilterStage;

#[async_trait]
impl PipelineStage for MetadataFilterStage {
    fn kind(&self) -> StageKind {
        StageKind::MetadataFilter
    }

    async fn execute(&self, ctx: &mut PipelineContext<'_>) -> Result<(), AppError> {
        metadata_filter(ctx).await
    }
}

#[derive(Debug, Clone, Copy)]
pub struct HybridSearchStage;

#[async_trait]
impl PipelineStage for HybridSearchStage {
    fn kind(&self) -> StageKind {
        StageKind::HybridSearch
    }

    async fn execute(&self, ctx: &mut PipelineContext<'_>) -> Result<(), AppError> {
        hybrid_search(ctx).await
    }
}

#[derive(Debug, Clone, Copy)]
pub struct ScoringStage;

#[async_trait]
impl PipelineStage for ScoringStage {
    fn kind(&self) -> StageKind {
        StageKind::Scoring
    }

    async fn execute(&self, ctx: &mut PipelineContext<'_>) -> Result<(), AppError> {
        score_candidates(ctx);
        Ok(())
    }
}

#[derive(Debug, Clone, Copy)]
pub struct RerankStage;

#[async_trait]
impl PipelineStage for RerankStage {
    fn kind(&self) -> StageKind {
        StageKind::Rerank
    }

    async fn execute(&self, ctx: &mut PipelineContext<'_>) -> Result<(), AppError> {
        if ctx.tuning.rerank_enabled {
            apply_rerank(&mut ctx.scored, ctx.query, ctx.tuning.rerank_blend_weight);
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Copy)]
pub struct DiversifyStage;

#[async_trait]
impl PipelineStage for DiversifyStage {
    fn kind(&self) -> StageKind {
        StageKind::Diversify
    }

    async fn execute(&self, ctx: &mut PipelineContext<'_>) -> Result<(), AppError> {
        if ctx.tuning.diversify_enabled {
            apply_diversity(
                &mut ctx.scored,
                ctx.tuning.diversity_threshold,
                ctx.tuning.diversity_penalty,
            );
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Copy)]
pub struct TimeDecayStage;

#[async_trait]
impl PipelineStage for TimeDecayStage {
    fn kind(&self) -> StageKind {
        StageKind::TimeDecay
    }

    async fn execute(&self, ctx: &mut PipelineContext<'_>) -> Result<(), AppError> {
        if ctx.tuning.time_decay_enabled {
            apply_time_decay(&mut ctx.scored, ctx.now);
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Copy)]
pub struct SnippetStage;

#[async_trait]
impl PipelineStage for SnippetStage {
    fn kind(&self) -> StageKind {
        StageKind::Snippet
    }

    async fn execute(&self, ctx: &mut PipelineContext<'_>) -> Result<(), AppError> {
        build_candidates(ctx);
        Ok(())
    }
}

/// Stage 1: reduce the chunk universe by patient, artifact type, and date.
#[instrument(level = "trace", skip_all)]
async fn metadata_filter(ctx: &mut PipelineContext<'_>) -> Result<(), AppError> {
    let remaining = ctx.checked_remaining()?;

    let filter = ChunkFilter {
        artifact_types: ctx.query.filters.artifact_types.clone(),
        occurred_from: ctx.query.filters.occurred_from,
        occurred_to: ctx.query.filters.occurred_to,
    };

    let chunks = with_deadline(
        remaining,
        RecordChunk::find_filtered(ctx.db, &ctx.query.patient_id, &filter),
    )
    .await?;

    debug!(
        chunks = chunks.len(),
        patient_id = %ctx.query.patient_id,
        "Metadata filter reduced chunk universe"
    );

    ctx.filtered_chunks = chunks;
    Ok(())
}

/// Stage 2: blend dense similarity with BM25 keyword scores and keep the
/// top `2 * top_k` candidates.
#[instrument(level = "trace", skip_all)]
async fn hybrid_search(ctx: &mut PipelineContext<'_>) -> Result<(), AppError> {
    if ctx.filtered_chunks.is_empty() {
        return Ok(());
    }

    let take = (ctx.tuning.top_k * 2).max(20);
    let filtered_ids: HashSet<String> =
        ctx.filtered_chunks.iter().map(|c| c.id.clone()).collect();

    // Dense side. A missing embedding degrades to keyword-only retrieval
    // rather than failing the stage.
    let embedding = match ctx.query_embedding.clone() {
        Some(embedding) => Some(embedding),
        None => match ctx.embedding_provider {
            Some(provider) => {
                let remaining = ctx.checked_remaining()?;
                match with_deadline(remaining, provider.embed(&ctx.query.original_query)).await {
                    Ok(embedding) => {
                        ctx.query_embedding = Some(embedding.clone());
                        Some(embedding)
                    }
                    Err(AppError::Timeout(message)) => return Err(AppError::Timeout(message)),
                    Err(err) => {
                        warn!(error = %err, "Query embedding failed; keyword-only retrieval");
                        None
                    }
                }
            }
            None => None,
        },
    };

    let mut semantic: HashMap<String, f32> = HashMap::new();
    if let Some(embedding) = embedding {
        let remaining = ctx.checked_remaining()?;
        let results = with_deadline(
            remaining,
            RecordChunk::vector_search(take, embedding, ctx.db, &ctx.query.patient_id),
        )
        .await?;
        for result in results {
            if filtered_ids.contains(&result.chunk.id) {
                semantic.insert(result.chunk.id, result.score);
            }
        }
    }

    // Sparse side, restricted to the filtered universe.
    let keyword_hits = {
        let index = ctx
            .keyword_index
            .read()
            .map_err(|_| AppError::InternalError("keyword index lock poisoned".into()))?;
        index.search(&ctx.query.original_query, Some(&filtered_ids))
    };
    let normalized = min_max_normalize(&keyword_hits.iter().map(|(_, s)| *s).collect::<Vec<_>>());
    let keyword: HashMap<String, f32> = keyword_hits
        .iter()
        .zip(normalized)
        .map(|((id, _), norm)| (id.clone(), norm))
        .collect();

    let alpha = clamp_unit(ctx.tuning.alpha);
    let mut scored: Vec<ScoredChunk> = std::mem::take(&mut ctx.filtered_chunks)
        .into_iter()
        .map(|chunk| {
            let sem = semantic.get(&chunk.id).copied().unwrap_or(0.0);
            let kw = keyword.get(&chunk.id).copied().unwrap_or(0.0);
            let mut entry = ScoredChunk::from_chunk(chunk);
            entry.semantic = sem;
            entry.keyword = kw;
            entry.hybrid = alpha.mul_add(sem, (1.0 - alpha) * kw);
            entry
        })
        .collect();

    sort_by_score_desc(&mut scored, |s| s.hybrid, |s| s.chunk.id.clone());
    scored.truncate(take);

    debug!(
        semantic_hits = semantic.len(),
        keyword_hits = keyword.len(),
        kept = scored.len(),
        "Hybrid search blended candidate signals"
    );

    ctx.scored = scored;
    Ok(())
}

/// Stage 3: multi-signal relevance scoring.
fn score_candidates(ctx: &mut PipelineContext<'_>) {
    // When hybrid search failed upstream the raw filtered chunks are still
    // here; score them with zeroed search signals.
    if ctx.scored.is_empty() && !ctx.filtered_chunks.is_empty() {
        ctx.scored = std::mem::take(&mut ctx.filtered_chunks)
            .into_iter()
            .map(ScoredChunk::from_chunk)
            .collect();
    }

    let (low, high) = (ctx.tuning.sim_remap_low, ctx.tuning.sim_remap_high);
    for entry in &mut ctx.scored {
        let components = ScoreComponents {
            semantic: remap_similarity(entry.semantic, low, high),
            keyword: keyword_component(&ctx.query.original_query, &entry.chunk.chunk_text),
            recency: recency_score(entry.chunk.occurred_at, ctx.now),
            quality: quality_score(&entry.chunk.chunk_text),
        };
        entry.score = combine(components);
    }

    sort_by_score_desc(&mut ctx.scored, |s| s.score, |s| s.chunk.id.clone());
}

/// Stage 4: deterministic re-ranking by entity coverage and query-token
/// overlap, blended with the initial score.
pub fn apply_rerank(scored: &mut [ScoredChunk], query: &StructuredQuery, blend_weight: f32) {
    if scored.is_empty() {
        return;
    }

    let query_tokens: HashSet<String> =
        crate::keyword::Bm25Index::tokenize(&query.original_query)
            .into_iter()
            .collect();

    for entry in scored.iter_mut() {
        let text_lower = entry.chunk.chunk_text.to_lowercase();

        let coverage = if query.entities.is_empty() {
            None
        } else {
            #[allow(clippy::cast_precision_loss)]
            let covered = query
                .entities
                .iter()
                .filter(|e| text_lower.contains(e.value.as_str()))
                .count() as f32;
            #[allow(clippy::cast_precision_loss)]
            Some(covered / query.entities.len() as f32)
        };

        let overlap = if query_tokens.is_empty() {
            0.0
        } else {
            let chunk_tokens: HashSet<String> =
                crate::keyword::Bm25Index::tokenize(&entry.chunk.chunk_text)
                    .into_iter()
                    .collect();
            #[allow(clippy::cast_precision_loss)]
            let shared = query_tokens.intersection(&chunk_tokens).count() as f32;
            #[allow(clippy::cast_precision_loss)]
            let total = query_tokens.len() as f32;
            shared / total
        };

        let rerank_score = coverage.map_or(overlap, |c| 0.5f32.mul_add(c, 0.5 * overlap));
        let blend = clamp_unit(blend_weight);
        entry.score = clamp_unit(blend.mul_add(entry.score, (1.0 - blend) * rerank_score));
    }

    sort_by_score_desc(scored, |s| s.score, |s| s.chunk.id.clone());
}

/// Stage 5: near-duplicate down-weighting. A candidate whose token-set
/// Jaccard similarity against any earlier-emitted chunk exceeds the
/// threshold keeps its place in the set but loses 30% of its score.
pub fn apply_diversity(scored: &mut Vec<ScoredChunk>, threshold: f32, penalty: f32) {
    let mut emitted: Vec<String> = Vec::new();

    for entry in scored.iter_mut() {
        let is_redundant = emitted
            .iter()
            .any(|seen| jaccard_similarity(seen, &entry.chunk.chunk_text) > threshold);
        if is_redundant {
            entry.score *= penalty;
        }
        emitted.push(entry.chunk.chunk_text.clone());
    }

    sort_by_score_desc(scored.as_mut_slice(), |s| s.score, |s| s.chunk.id.clone());
}

/// Stage 6: recency decay, `score * (0.7 + 0.3 * recency)`.
pub fn apply_time_decay(scored: &mut Vec<ScoredChunk>, now: DateTime<Utc>) {
    for entry in scored.iter_mut() {
        let recency = recency_score(entry.chunk.occurred_at, now);
        entry.score *= 0.3f32.mul_add(recency, 0.7);
    }

    sort_by_score_desc(scored.as_mut_slice(), |s| s.score, |s| s.chunk.id.clone());
}

/// Stage 7: snippet/highlight extraction and final ranking.
fn build_candidates(ctx: &mut PipelineContext<'_>) {
    let mut scored = std::mem::take(&mut ctx.scored);
    scored.truncate(ctx.tuning.top_k);

    ctx.candidates = scored
        .into_iter()
        .enumerate()
        .map(|(position, entry)| {
            let snippet = extract_snippet(
                &entry.chunk.chunk_text,
                &ctx.query.original_query,
                ctx.tuning.snippet_length,
            );
            let highlights = extract_highlights(&entry.chunk.chunk_text, &ctx.query.original_query);
            RetrievalCandidate {
                chunk: entry.chunk,
                score: clamp_unit(entry.score),
                snippet,
                highlights,
                rank: position + 1,
            }
        })
        .collect();
}
