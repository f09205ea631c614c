use crate::{error::AppError, storage::db::SurrealDbClient, stored_object};
use uuid::Uuid;

/// Quality scores written back onto a conversation exactly once.
#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct QualityScores {
    pub grounding_score: f32,
    pub consistency_score: f32,
    pub confidence_score: f32,
    pub hallucination_risk: f32,
    pub overall_quality_score: f32,
    pub quality_grade: String,
}

stored_object!(ConversationRecord, "conversation_history", {
    patient_id: String,
    query: String,
    query_intent: String,
    #[serde(serialize_with = "serialize_datetime", deserialize_with = "deserialize_datetime", default)]
    query_timestamp: DateTime<Utc>,
    short_answer: String,
    detailed_summary: String,
    model_used: String,
    extractions: serde_json::Value,
    sources: serde_json::Value,
    retrieval_candidates: serde_json::Value,
    feature_flags: serde_json::Value,
    timing_ms: serde_json::Value,
    grounding_score: Option<f32>,
    consistency_score: Option<f32>,
    confidence_score: Option<f32>,
    hallucination_risk: Option<f32>,
    overall_quality_score: Option<f32>,
    quality_grade: Option<String>
});

impl ConversationRecord {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        patient_id: String,
        query: String,
        query_intent: String,
        short_answer: String,
        detailed_summary: String,
        model_used: String,
    ) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4().to_string(),
            created_at: now,
            updated_at: now,
            patient_id,
            query,
            query_intent,
            query_timestamp: now,
            short_answer,
            detailed_summary,
            model_used,
            extractions: serde_json::Value::Array(Vec::new()),
            sources: serde_json::Value::Array(Vec::new()),
            retrieval_candidates: serde_json::Value::Array(Vec::new()),
            feature_flags: serde_json::Value::Object(serde_json::Map::new()),
            timing_ms: serde_json::Value::Object(serde_json::Map::new()),
            grounding_score: None,
            consistency_score: None,
            confidence_score: None,
            hallucination_risk: None,
            overall_quality_score: None,
            quality_grade: None,
        }
    }

    /// Conversations for this patient since `since`, newest first, excluding
    /// the conversation currently being assessed.
    pub async fn recent_for_patient(
        db: &SurrealDbClient,
        patient_id: &str,
        since: DateTime<Utc>,
        exclude_id: Option<&str>,
    ) -> Result<Vec<Self>, AppError> {
        let mut sql = String::from(
            "SELECT * FROM conversation_history \
             WHERE patient_id = $patient_id AND query_timestamp >= $since",
        );
        if exclude_id.is_some() {
            sql.push_str(" AND id != type::thing('conversation_history', $exclude)");
        }
        sql.push_str(" ORDER BY query_timestamp DESC");

        let mut query = db
            .client
            .query(sql)
            .bind(("patient_id", patient_id.to_owned()))
            .bind(("since", surrealdb::Datetime::from(since)));
        if let Some(exclude) = exclude_id {
            query = query.bind(("exclude", exclude.to_owned()));
        }

        let records: Vec<Self> = query.await?.take(0)?;
        Ok(records)
    }

    pub async fn recent_queries(
        db: &SurrealDbClient,
        patient_id: &str,
        limit: usize,
    ) -> Result<Vec<Self>, AppError> {
        let records: Vec<Self> = db
            .client
            .query(
                "SELECT * FROM conversation_history WHERE patient_id = $patient_id \
                 ORDER BY query_timestamp DESC LIMIT $limit",
            )
            .bind(("patient_id", patient_id.to_owned()))
            .bind(("limit", i64::try_from(limit).unwrap_or(i64::MAX)))
            .await?
            .take(0)?;
        Ok(records)
    }

    /// Writes the quality scores once. A conversation that already carries
    /// scores rejects the second write; the record is immutable afterwards.
    pub async fn update_quality_scores(
        db: &SurrealDbClient,
        id: &str,
        scores: QualityScores,
    ) -> Result<(), AppError> {
        let updated: Option<Self> = db
            .client
            .query(
                "UPDATE type::thing('conversation_history', $id) SET \
                   grounding_score = $scores.grounding_score, \
                   consistency_score = $scores.consistency_score, \
                   confidence_score = $scores.confidence_score, \
                   hallucination_risk = $scores.hallucination_risk, \
                   overall_quality_score = $scores.overall_quality_score, \
                   quality_grade = $scores.quality_grade, \
                   updated_at = time::now() \
                 WHERE overall_quality_score = NONE OR overall_quality_score = NULL \
                 RETURN AFTER",
            )
            .bind(("id", id.to_owned()))
            .bind(("scores", scores))
            .await?
            .take(0)?;

        if updated.is_some() {
            return Ok(());
        }

        let existing: Option<Self> = db.get_item(id).await?;
        match existing {
            Some(record) if record.overall_quality_score.is_some() => {
                Err(AppError::IntegrityViolation(format!(
                    "quality scores already written for conversation {id}"
                )))
            }
            Some(_) => Err(AppError::QualityPersistence(format!(
                "quality score update for conversation {id} did not apply"
            ))),
            None => Err(AppError::NotFound(format!("conversation {id} not found"))),
        }
    }

    /// Deletes the conversation and every quality record it owns.
    pub async fn delete_cascade(db: &SurrealDbClient, id: &str) -> Result<(), AppError> {
        db.client
            .query(
                "BEGIN TRANSACTION;
                 DELETE grounding_verification WHERE conversation_id = $id;
                 DELETE consistency_checks WHERE conversation_id = $id;
                 DELETE confidence_metrics WHERE conversation_id = $id;
                 DELETE hallucination_detections WHERE conversation_id = $id;
                 DELETE type::thing('conversation_history', $id);
                 COMMIT TRANSACTION;",
            )
            .bind(("id", id.to_owned()))
            .await?
            .check()?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    async fn setup_db() -> SurrealDbClient {
        let db = SurrealDbClient::memory("test_ns", &Uuid::new_v4().to_string())
            .await
            .expect("Failed to start in-memory surrealdb");
        db.apply_migrations(3).await.expect("migrations");
        db
    }

    fn sample_record(patient_id: &str) -> ConversationRecord {
        ConversationRecord::new(
            patient_id.to_owned(),
            "What medications is the patient taking?".into(),
            "retrieve_medications".into(),
            "Two active medications.".into(),
            "The patient takes Atorvastatin 20mg and Lisinopril 10mg.".into(),
            "llama3.1:8b".into(),
        )
    }

    fn sample_scores() -> QualityScores {
        QualityScores {
            grounding_score: 0.95,
            consistency_score: 1.0,
            confidence_score: 0.85,
            hallucination_risk: 0.05,
            overall_quality_score: 0.92,
            quality_grade: "excellent".into(),
        }
    }

    #[tokio::test]
    async fn quality_scores_write_once() {
        let db = setup_db().await;
        let record = sample_record("patient-1");
        let id = record.id.clone();

        db.store_item(record).await.expect("store");

        ConversationRecord::update_quality_scores(&db, &id, sample_scores())
            .await
            .expect("first write");

        let err = ConversationRecord::update_quality_scores(&db, &id, sample_scores())
            .await
            .expect_err("second write must fail");
        assert!(matches!(err, AppError::IntegrityViolation(_)));

        let stored: ConversationRecord = db.get_item(&id).await.expect("get").expect("present");
        assert_eq!(stored.quality_grade.as_deref(), Some("excellent"));
    }

    #[tokio::test]
    async fn update_quality_scores_missing_conversation_is_not_found() {
        let db = setup_db().await;

        let err = ConversationRecord::update_quality_scores(&db, "missing", sample_scores())
            .await
            .expect_err("must fail");
        assert!(matches!(err, AppError::NotFound(_)));
    }

    #[tokio::test]
    async fn recent_for_patient_excludes_current_and_old() {
        let db = setup_db().await;

        let mut old = sample_record("patient-1");
        old.query_timestamp = Utc::now() - Duration::days(60);
        let recent = sample_record("patient-1");
        let current = sample_record("patient-1");
        let current_id = current.id.clone();
        let recent_id = recent.id.clone();

        for record in [old, recent, current] {
            db.store_item(record).await.expect("store");
        }

        let since = Utc::now() - Duration::days(30);
        let found =
            ConversationRecord::recent_for_patient(&db, "patient-1", since, Some(&current_id))
                .await
                .expect("fetch");

        assert_eq!(found.len(), 1);
        assert_eq!(found[0].id, recent_id);
    }

    #[tokio::test]
    async fn recent_queries_orders_newest_first_and_limits() {
        let db = setup_db().await;

        for offset in 0..3 {
            let mut record = sample_record("patient-1");
            record.query_timestamp = Utc::now() - Duration::hours(offset);
            db.store_item(record).await.expect("store");
        }

        let found = ConversationRecord::recent_queries(&db, "patient-1", 2)
            .await
            .expect("fetch");

        assert_eq!(found.len(), 2);
        assert!(found[0].query_timestamp >= found[1].query_timestamp);
    }

    #[tokio::test]
    async fn delete_cascade_removes_conversation() {
        let db = setup_db().await;
        let record = sample_record("patient-1");
        let id = record.id.clone();
        db.store_item(record).await.expect("store");

        ConversationRecord::delete_cascade(&db, &id)
            .await
            .expect("cascade");

        let gone: Option<ConversationRecord> = db.get_item(&id).await.expect("get");
        assert!(gone.is_none());
    }
}
