use crate::{
    error::AppError,
    storage::{db::SurrealDbClient, types::quality_insert_error},
    stored_object,
};
use uuid::Uuid;

stored_object!(GroundingVerification, "grounding_verification", {
    conversation_id: String,
    patient_id: String,
    grounding_score: f32,
    total_statements: u32,
    grounded_statements: u32,
    unsupported_statements: Vec<String>,
    statement_results: serde_json::Value,
    warnings: Vec<String>
});

impl GroundingVerification {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        conversation_id: String,
        patient_id: String,
        grounding_score: f32,
        total_statements: u32,
        grounded_statements: u32,
        unsupported_statements: Vec<String>,
        statement_results: serde_json::Value,
        warnings: Vec<String>,
    ) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4().to_string(),
            created_at: now,
            updated_at: now,
            conversation_id,
            patient_id,
            grounding_score,
            total_statements,
            grounded_statements,
            unsupported_statements,
            statement_results,
            warnings,
        }
    }

    /// Inserts the record; a second insert for the same conversation fails
    /// with an integrity violation at the unique index.
    pub async fn insert(self, db: &SurrealDbClient) -> Result<(), AppError> {
        db.store_item(self).await.map_err(quality_insert_error)?;
        Ok(())
    }
}
