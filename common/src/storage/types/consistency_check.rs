use crate::{
    error::AppError,
    storage::{db::SurrealDbClient, types::quality_insert_error},
    stored_object,
};
use uuid::Uuid;

stored_object!(ConsistencyCheckRecord, "consistency_checks", {
    conversation_id: String,
    patient_id: String,
    consistency_score: f32,
    contradictions: serde_json::Value,
    checked_conversations: u32,
    warnings: Vec<String>
});

impl ConsistencyCheckRecord {
    pub fn new(
        conversation_id: String,
        patient_id: String,
        consistency_score: f32,
        contradictions: serde_json::Value,
        checked_conversations: u32,
        warnings: Vec<String>,
    ) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4().to_string(),
            created_at: now,
            updated_at: now,
            conversation_id,
            patient_id,
            consistency_score,
            contradictions,
            checked_conversations,
            warnings,
        }
    }

    pub async fn insert(self, db: &SurrealDbClient) -> Result<(), AppError> {
        db.store_item(self).await.map_err(quality_insert_error)?;
        Ok(())
    }
}
