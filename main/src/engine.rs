use std::sync::{Arc, RwLock};
use std::time::{Duration, Instant};

use answer_pipeline::{
    generate_answer, AnswerDraft, AnswerGenerator, Extraction, LlmAnswerGenerator, ReasoningStyle,
};
use chrono::Utc;
use common::{
    error::AppError,
    storage::{
        db::SurrealDbClient,
        types::{conversation_record::ConversationRecord, record_chunk::RecordChunk},
    },
    utils::{
        config::AppConfig,
        embedding::EmbeddingProvider,
        llm::{GenerationParams, LlmClient},
        rollout,
    },
};
use ingestion_pipeline::{
    EmbeddingServices, IndexReport, IndexerConfig, IndexerPipeline, IndexerServices,
};
use quality_pipeline::{AnswerEmbedder, QualityAssessor, QualityMetrics, QualityOutcome};
use retrieval_pipeline::{
    Bm25Index, RetrievalCache, RetrievalCandidate, RetrievalTuning, SharedKeywordIndex,
    StageMetric,
};
use serde::Serialize;
use tracing::{info, instrument, warn};

/// Per-request knobs accepted by the query contract.
#[derive(Debug, Clone, Default)]
pub struct QueryOptions {
    pub alpha: Option<f32>,
    pub top_k: Option<usize>,
    pub detailed_reasoning: bool,
}

#[derive(Debug, Clone, Serialize)]
pub struct SourceRef {
    pub artifact_id: String,
    pub chunk_id: String,
    pub rank: usize,
    pub score: f32,
    pub snippet: String,
}

#[derive(Debug, Clone, Copy, Default, Serialize)]
pub struct TimingMetrics {
    pub parse_ms: u128,
    pub retrieval_ms: u128,
    pub generation_ms: u128,
    pub quality_ms: u128,
    pub total_ms: u128,
}

/// The complete structured answer returned to the caller.
#[derive(Debug, Clone, Serialize)]
pub struct AnswerBundle {
    pub query_id: String,
    pub short_answer: String,
    pub detailed_summary: String,
    pub extractions: Vec<Extraction>,
    pub sources: Vec<SourceRef>,
    pub quality: QualityMetrics,
    pub cache_hit: bool,
    pub timing: TimingMetrics,
    pub stage_metrics: Vec<StageMetric>,
    pub warnings: Vec<String>,
}

/// Composition root for the answering engine. Components share the
/// keyword index and retrieval cache; everything else is owned.
pub struct QueryEngine {
    db: Arc<SurrealDbClient>,
    config: AppConfig,
    user_id: String,
    keyword_index: SharedKeywordIndex,
    cache: Option<RetrievalCache>,
    query_embedding_provider: Option<Arc<EmbeddingProvider>>,
    indexer_services: Arc<dyn IndexerServices>,
    generator: Arc<dyn AnswerGenerator>,
    assessor: QualityAssessor,
}

impl QueryEngine {
    /// Wires the engine against the local inference endpoints from
    /// configuration. The configuration must already be validated.
    pub fn new(db: Arc<SurrealDbClient>, config: AppConfig, user_id: String) -> Self {
        let embedding_provider = Arc::new(EmbeddingProvider::new(
            &config.embedding,
            config.performance.max_embedding_batch_size,
        ));
        let llm = Arc::new(LlmClient::new(&config.llm));
        let generator = Arc::new(LlmAnswerGenerator::new(
            Arc::clone(&llm),
            GenerationParams::default(),
            Duration::from_millis(config.request_deadline_ms),
        ));

        Self::with_parts(
            db,
            config,
            user_id,
            generator,
            Arc::new(EmbeddingServices::new(Arc::clone(&embedding_provider))),
            Some(Arc::clone(&embedding_provider) as Arc<dyn AnswerEmbedder>),
            Some(embedding_provider),
        )
    }

    /// Fully injectable constructor used by tests and alternative wiring.
    pub fn with_parts(
        db: Arc<SurrealDbClient>,
        config: AppConfig,
        user_id: String,
        generator: Arc<dyn AnswerGenerator>,
        indexer_services: Arc<dyn IndexerServices>,
        answer_embedder: Option<Arc<dyn AnswerEmbedder>>,
        query_embedding_provider: Option<Arc<EmbeddingProvider>>,
    ) -> Self {
        let cache = config.cache.enabled.then(|| {
            RetrievalCache::new(Duration::from_secs(config.cache.ttl_seconds), 100)
        });
        let assessor = QualityAssessor::new(Arc::clone(&db), answer_embedder);

        Self {
            db,
            config,
            user_id,
            keyword_index: Arc::new(RwLock::new(Bm25Index::new())),
            cache,
            query_embedding_provider,
            indexer_services,
            generator,
            assessor,
        }
    }

    /// Reloads the in-memory keyword index from persisted chunks; called
    /// once at startup.
    pub async fn warm_start(&self) -> Result<usize, AppError> {
        IndexerPipeline::rebuild_keyword_index(&self.db, &self.keyword_index).await
    }

    pub const fn keyword_index(&self) -> &SharedKeywordIndex {
        &self.keyword_index
    }

    /// `index(patient_id, force_reindex)` from the transport contract.
    #[instrument(skip(self))]
    pub async fn index(
        &self,
        patient_id: &str,
        force_reindex: bool,
    ) -> Result<IndexReport, AppError> {
        if patient_id.trim().is_empty() {
            return Err(AppError::InvalidInput("patient_id must not be empty".into()));
        }

        let enrichment_enabled = rollout::enrichment_enabled(
            &self.user_id,
            patient_id,
            self.config.enrichment.rollout_percentage,
        );
        let indexer = IndexerPipeline::new(
            Arc::clone(&self.db),
            Arc::clone(&self.indexer_services),
            IndexerConfig {
                enrichment_enabled,
                sentence_embeddings_enabled: self.config.ingestion.sentence_embeddings_enabled,
                ..IndexerConfig::default()
            },
        );

        indexer
            .index_patient(patient_id, force_reindex, &self.keyword_index)
            .await
    }

    /// `recent_queries(patient_id, limit)` from the transport contract.
    pub async fn recent_queries(
        &self,
        patient_id: &str,
        limit: usize,
    ) -> Result<Vec<ConversationRecord>, AppError> {
        ConversationRecord::recent_queries(&self.db, patient_id, limit).await
    }

    /// `query(query, patient_id, options)` from the transport contract:
    /// understanding, retrieval, grounded generation, persistence, and the
    /// full quality pass.
    #[instrument(skip(self, query_text, options), fields(patient_id))]
    pub async fn query(
        &self,
        query_text: &str,
        patient_id: &str,
        options: QueryOptions,
    ) -> Result<AnswerBundle, AppError> {
        let total_start = Instant::now();
        let mut timing = TimingMetrics::default();
        let mut warnings = Vec::new();

        let parse_start = Instant::now();
        let structured = query_understanding::parse(query_text, patient_id, Utc::now())?;
        timing.parse_ms = parse_start.elapsed().as_millis();

        // A patient with nothing indexed gets an empty answer with zero
        // sources instead of a generation pass.
        if RecordChunk::count_for_patient(&self.db, patient_id).await? == 0 {
            warnings.push(format!("no indexed chunks for patient {patient_id}"));
            timing.total_ms = total_start.elapsed().as_millis();
            return Ok(AnswerBundle {
                query_id: structured.query_id.clone(),
                short_answer: String::new(),
                detailed_summary: String::new(),
                extractions: Vec::new(),
                sources: Vec::new(),
                quality: QualityMetrics::aggregate(1.0, 1.0, 0.0, 0.0),
                cache_hit: false,
                timing,
                stage_metrics: Vec::new(),
                warnings,
            });
        }

        let mut tuning = RetrievalTuning {
            top_k: self.config.performance.retrieval_top_k,
            deadline_ms: Some(self.config.request_deadline_ms),
            ..RetrievalTuning::default()
        };
        if let Some(alpha) = options.alpha {
            tuning.alpha = alpha.clamp(0.0, 1.0);
        }
        if let Some(top_k) = options.top_k {
            tuning.top_k = top_k.max(1);
        }

        let retrieval_start = Instant::now();
        let retrieval = retrieval_pipeline::run_pipeline(
            &self.db,
            self.query_embedding_provider.as_deref(),
            &self.keyword_index,
            self.cache.as_ref(),
            &structured,
            tuning,
        )
        .await?;
        timing.retrieval_ms = retrieval_start.elapsed().as_millis();

        if let Some(error) = &retrieval.error {
            warnings.push(format!("retrieval degraded: {error}"));
        }

        let style = if options.detailed_reasoning || structured.constraints.include_reasoning {
            ReasoningStyle::Detailed
        } else {
            ReasoningStyle::Concise
        };

        let generation_start = Instant::now();
        let draft =
            generate_answer(&*self.generator, &structured, &retrieval.candidates, style).await?;
        timing.generation_ms = generation_start.elapsed().as_millis();

        let record = self.build_record(&structured, &draft, &retrieval.candidates, &timing);
        let persisted = match self.db.store_item(record.clone()).await {
            Ok(_) => true,
            Err(err) => {
                warn!(error = %err, "Conversation persistence failed; answering anyway");
                warnings.push(format!("conversation not persisted: {err}"));
                false
            }
        };

        let quality_start = Instant::now();
        let outcome = self
            .assessor
            .assess_and_persist(&record, &draft, &retrieval.candidates)
            .await?;
        timing.quality_ms = quality_start.elapsed().as_millis();
        if persisted {
            warnings.extend(outcome.persistence_warnings.iter().cloned());
        }

        timing.total_ms = total_start.elapsed().as_millis();
        info!(
            query_id = %structured.query_id,
            candidates = retrieval.candidates.len(),
            grade = outcome.metrics.quality_grade.as_str(),
            total_ms = timing.total_ms,
            "Query answered"
        );

        Ok(Self::build_bundle(
            structured.query_id,
            draft,
            retrieval.candidates,
            retrieval.stage_metrics,
            retrieval.cache_hit,
            &outcome,
            timing,
            warnings,
        ))
    }

    fn build_record(
        &self,
        structured: &query_understanding::StructuredQuery,
        draft: &AnswerDraft,
        candidates: &[RetrievalCandidate],
        timing: &TimingMetrics,
    ) -> ConversationRecord {
        let mut record = ConversationRecord::new(
            structured.patient_id.clone(),
            structured.original_query.clone(),
            structured.intent.to_string(),
            draft.short_answer.clone(),
            draft.detailed_summary.clone(),
            self.generator.model_name(),
        );
        record.id = structured.query_id.clone();
        record.extractions = serde_json::to_value(&draft.extractions).unwrap_or_default();
        record.sources = serde_json::to_value(
            candidates
                .iter()
                .map(|c| {
                    serde_json::json!({
                        "artifact_id": c.chunk.artifact_id,
                        "chunk_id": c.chunk.id,
                        "rank": c.rank,
                    })
                })
                .collect::<Vec<_>>(),
        )
        .unwrap_or_default();
        record.retrieval_candidates = serde_json::to_value(candidates).unwrap_or_default();
        record.feature_flags = serde_json::json!({
            "cache_enabled": self.config.cache.enabled,
            "enrichment_rollout_percentage": self.config.enrichment.rollout_percentage,
            "sentence_embeddings_enabled": self.config.ingestion.sentence_embeddings_enabled,
        });
        record.timing_ms = serde_json::to_value(timing).unwrap_or_default();
        record
    }

    #[allow(clippy::too_many_arguments)]
    fn build_bundle(
        query_id: String,
        draft: AnswerDraft,
        candidates: Vec<RetrievalCandidate>,
        stage_metrics: Vec<StageMetric>,
        cache_hit: bool,
        outcome: &QualityOutcome,
        timing: TimingMetrics,
        warnings: Vec<String>,
    ) -> AnswerBundle {
        let sources = candidates
            .iter()
            .map(|c| SourceRef {
                artifact_id: c.chunk.artifact_id.clone(),
                chunk_id: c.chunk.id.clone(),
                rank: c.rank,
                score: c.score,
                snippet: c.snippet.clone(),
            })
            .collect();

        AnswerBundle {
            query_id,
            short_answer: draft.short_answer,
            detailed_summary: draft.detailed_summary,
            extractions: draft.extractions,
            sources,
            quality: outcome.metrics,
            cache_hit,
            timing,
            stage_metrics,
            warnings,
        }
    }
}
