pub mod aggregate;
pub mod confidence;
pub mod consistency;
pub mod grounding;
pub mod hallucination;

use std::sync::Arc;

use answer_pipeline::AnswerDraft;
use async_trait::async_trait;
use chrono::{Duration, Utc};
use common::{
    error::AppError,
    storage::{
        db::SurrealDbClient,
        types::{
            confidence_metric::{ConfidenceMetric, OVERALL_EXTRACTION_INDEX},
            consistency_check::ConsistencyCheckRecord,
            conversation_record::{ConversationRecord, QualityScores},
            grounding_verification::GroundingVerification,
            hallucination_detection::HallucinationDetection,
            quality_trend::QualityTrend,
        },
    },
    utils::embedding::EmbeddingProvider,
};
use retrieval_pipeline::RetrievalCandidate;
use tracing::{instrument, warn};

pub use aggregate::{QualityGrade, QualityMetrics};
pub use confidence::{ConfidenceReport, UncertaintyLevel};
pub use consistency::{ConsistencyReport, Contradiction, Severity, HISTORY_WINDOW_DAYS};
pub use grounding::{GroundingReport, StatementGrounding, VerificationMethod};
pub use hallucination::{AnswerSampler, HallucinationReport, RiskLevel};

/// Embedding seam used by the grounding verifier and the SelfCheckGPT
/// path; implemented by the local embedding provider, stubbed in tests.
#[async_trait]
pub trait AnswerEmbedder: Send + Sync {
    async fn embed(&self, text: &str) -> Result<Vec<f32>, AppError>;
}

#[async_trait]
impl AnswerEmbedder for EmbeddingProvider {
    async fn embed(&self, text: &str) -> Result<Vec<f32>, AppError> {
        EmbeddingProvider::embed(self, text).await
    }
}

/// Everything the quality pass produced for one answer.
#[derive(Debug, Clone)]
pub struct QualityOutcome {
    pub metrics: QualityMetrics,
    pub grounding: GroundingReport,
    pub consistency: ConsistencyReport,
    pub confidence: ConfidenceReport,
    pub hallucination: HallucinationReport,
    /// Persistence problems are reported here, never as a failed query.
    pub persistence_warnings: Vec<String>,
}

/// Post-generation verification: grounding, cross-query consistency,
/// confidence, hallucination risk, and the aggregated grade, persisted to
/// the quality tables.
pub struct QualityAssessor {
    db: Arc<SurrealDbClient>,
    embedder: Option<Arc<dyn AnswerEmbedder>>,
}

impl QualityAssessor {
    pub fn new(db: Arc<SurrealDbClient>, embedder: Option<Arc<dyn AnswerEmbedder>>) -> Self {
        Self { db, embedder }
    }

    /// Runs all quality checks for a stored conversation and persists the
    /// results. Persistence failures are logged and surfaced as warnings;
    /// they never fail the assessment.
    #[instrument(skip_all, fields(conversation_id = %conversation.id, patient_id = %conversation.patient_id))]
    pub async fn assess_and_persist(
        &self,
        conversation: &ConversationRecord,
        draft: &AnswerDraft,
        candidates: &[RetrievalCandidate],
    ) -> Result<QualityOutcome, AppError> {
        let now = Utc::now();
        let since = now - Duration::days(HISTORY_WINDOW_DAYS);
        let history = ConversationRecord::recent_for_patient(
            &self.db,
            &conversation.patient_id,
            since,
            Some(&conversation.id),
        )
        .await?;

        let grounding = match self.embedder.as_deref() {
            Some(embedder) => {
                match grounding::verify(draft, candidates, Some(embedder)).await {
                    Ok(report) => report,
                    Err(err) => {
                        warn!(error = %err, "Embedding-backed grounding failed; retrying lexical-only");
                        grounding::verify(draft, candidates, None).await?
                    }
                }
            }
            None => grounding::verify(draft, candidates, None).await?,
        };

        let consistency = consistency::check(draft, &history, now);
        let confidence =
            confidence::aggregate(draft, candidates, consistency.consistency_score);
        let hallucination = hallucination::assess(
            grounding.grounding_score,
            consistency.consistency_score,
            confidence.overall_confidence,
        );
        let metrics = QualityMetrics::aggregate(
            grounding.grounding_score,
            consistency.consistency_score,
            confidence.overall_confidence,
            hallucination.risk,
        );

        let persistence_warnings = self
            .persist(
                conversation,
                &grounding,
                &consistency,
                &confidence,
                &hallucination,
                &metrics,
            )
            .await;

        Ok(QualityOutcome {
            metrics,
            grounding,
            consistency,
            confidence,
            hallucination,
            persistence_warnings,
        })
    }

    async fn persist(
        &self,
        conversation: &ConversationRecord,
        grounding: &GroundingReport,
        consistency: &ConsistencyReport,
        confidence: &ConfidenceReport,
        hallucination: &HallucinationReport,
        metrics: &QualityMetrics,
    ) -> Vec<String> {
        let mut warnings = Vec::new();
        let conversation_id = conversation.id.clone();
        let patient_id = conversation.patient_id.clone();

        let grounding_record = GroundingVerification::new(
            conversation_id.clone(),
            patient_id.clone(),
            grounding.grounding_score,
            u32::try_from(grounding.total_statements).unwrap_or(u32::MAX),
            u32::try_from(grounding.grounded_statements).unwrap_or(u32::MAX),
            grounding.unsupported_statements.clone(),
            serde_json::to_value(&grounding.statements).unwrap_or_default(),
            grounding.warnings.clone(),
        );
        record_failure(&mut warnings, "grounding_verification", grounding_record.insert(&self.db).await);

        let consistency_record = ConsistencyCheckRecord::new(
            conversation_id.clone(),
            patient_id.clone(),
            consistency.consistency_score,
            serde_json::to_value(&consistency.contradictions).unwrap_or_default(),
            u32::try_from(consistency.checked_conversations).unwrap_or(u32::MAX),
            consistency.warnings.clone(),
        );
        record_failure(&mut warnings, "consistency_checks", consistency_record.insert(&self.db).await);

        for entry in &confidence.per_extraction {
            let row = ConfidenceMetric::new(
                conversation_id.clone(),
                patient_id.clone(),
                i32::try_from(entry.extraction_index).unwrap_or(i32::MAX),
                entry.factors.as_array(),
                entry.aggregate_confidence,
                entry.uncertainty_level.as_str().to_owned(),
            );
            record_failure(&mut warnings, "confidence_metrics", row.insert(&self.db).await);
        }
        let mut overall_row = ConfidenceMetric::new(
            conversation_id.clone(),
            patient_id.clone(),
            OVERALL_EXTRACTION_INDEX,
            [0.0, 0.0, 0.0, consistency.consistency_score],
            confidence.overall_confidence,
            confidence.uncertainty_level.as_str().to_owned(),
        );
        overall_row.low_confidence_reasons = confidence.low_confidence_reasons.clone();
        overall_row.recommendation = Some(confidence.recommendation.clone());
        record_failure(&mut warnings, "confidence_metrics", overall_row.insert(&self.db).await);

        let mut hallucination_record = HallucinationDetection::new(
            conversation_id.clone(),
            patient_id.clone(),
            hallucination.risk,
            hallucination.risk_level.as_str().to_owned(),
            hallucination.detected,
            hallucination.method.clone(),
        );
        hallucination_record.semantic_consistency = hallucination.semantic_consistency;
        hallucination_record.sample_count = hallucination
            .sample_count
            .map(|n| u32::try_from(n).unwrap_or(u32::MAX));
        record_failure(&mut warnings, "hallucination_detections", hallucination_record.insert(&self.db).await);

        record_failure(
            &mut warnings,
            "conversation_history",
            ConversationRecord::update_quality_scores(
                &self.db,
                &conversation_id,
                QualityScores {
                    grounding_score: metrics.grounding_score,
                    consistency_score: metrics.consistency_score,
                    confidence_score: metrics.confidence_score,
                    hallucination_risk: metrics.hallucination_risk,
                    overall_quality_score: metrics.overall_quality_score,
                    quality_grade: metrics.quality_grade.as_str().to_owned(),
                },
            )
            .await,
        );

        let period = conversation.query_timestamp.format("%Y-%m").to_string();
        record_failure(
            &mut warnings,
            "quality_trends",
            QualityTrend::record(
                &self.db,
                &patient_id,
                &period,
                metrics.overall_quality_score,
                metrics.grounding_score,
                metrics.consistency_score,
                metrics.confidence_score,
            )
            .await,
        );

        warnings
    }
}

fn record_failure(warnings: &mut Vec<String>, table: &str, result: Result<(), AppError>) {
    if let Err(err) = result {
        warn!(table, error = %err, "Quality persistence failed");
        warnings.push(format!("{table}: {err}"));
    }
}
