use crate::{error::AppError, storage::db::SurrealDbClient, stored_object};
use uuid::Uuid;

// Rolling per-patient aggregates, one row per (patient, period).
stored_object!(QualityTrend, "quality_trends", {
    patient_id: String,
    period: String,
    avg_overall: f32,
    avg_grounding: f32,
    avg_consistency: f32,
    avg_confidence: f32,
    query_count: u32
});

impl QualityTrend {
    pub fn new(patient_id: String, period: String) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4().to_string(),
            created_at: now,
            updated_at: now,
            patient_id,
            period,
            avg_overall: 0.0,
            avg_grounding: 0.0,
            avg_consistency: 0.0,
            avg_confidence: 0.0,
            query_count: 0,
        }
    }

    /// Folds one conversation's scores into the period aggregate, creating
    /// the row on first use.
    pub async fn record(
        db: &SurrealDbClient,
        patient_id: &str,
        period: &str,
        overall: f32,
        grounding: f32,
        consistency: f32,
        confidence: f32,
    ) -> Result<(), AppError> {
        let existing: Vec<Self> = db
            .client
            .query(
                "SELECT * FROM quality_trends \
                 WHERE patient_id = $patient_id AND period = $period",
            )
            .bind(("patient_id", patient_id.to_owned()))
            .bind(("period", period.to_owned()))
            .await?
            .take(0)?;

        let mut trend = existing.into_iter().next().unwrap_or_else(|| {
            Self::new(patient_id.to_owned(), period.to_owned())
        });

        let n = f32::from(u16::try_from(trend.query_count).unwrap_or(u16::MAX));
        let fold = |avg: f32, value: f32| avg.mul_add(n, value) / (n + 1.0);
        trend.avg_overall = fold(trend.avg_overall, overall);
        trend.avg_grounding = fold(trend.avg_grounding, grounding);
        trend.avg_consistency = fold(trend.avg_consistency, consistency);
        trend.avg_confidence = fold(trend.avg_confidence, confidence);
        trend.query_count = trend.query_count.saturating_add(1);
        trend.updated_at = Utc::now();

        db.client
            .query("UPSERT type::thing('quality_trends', $id) CONTENT $trend")
            .bind(("id", trend.id.clone()))
            .bind(("trend", trend))
            .await?
            .check()?;

        Ok(())
    }
}
