use crate::{error::AppError, storage::db::SurrealDbClient, stored_object};
use uuid::Uuid;

// Relationship tuples resolved at indexing time; chunks reference these by id
// instead of carrying cross-artifact back-references in their text.
stored_object!(ArtifactRelationship, "artifact_relationship", {
    subject_id: String,
    predicate: String,
    object_id: String,
    patient_id: String
});

impl ArtifactRelationship {
    pub fn new(
        subject_id: String,
        predicate: String,
        object_id: String,
        patient_id: String,
    ) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4().to_string(),
            created_at: now,
            updated_at: now,
            subject_id,
            predicate,
            object_id,
            patient_id,
        }
    }

    pub async fn for_subject(
        db: &SurrealDbClient,
        subject_id: &str,
        patient_id: &str,
    ) -> Result<Vec<Self>, AppError> {
        let relationships: Vec<Self> = db
            .client
            .query(
                "SELECT * FROM artifact_relationship \
                 WHERE subject_id = $subject_id AND patient_id = $patient_id",
            )
            .bind(("subject_id", subject_id.to_owned()))
            .bind(("patient_id", patient_id.to_owned()))
            .await?
            .take(0)?;
        Ok(relationships)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn relationships_are_scoped_to_subject_and_patient() {
        let db = SurrealDbClient::memory("test_ns", &Uuid::new_v4().to_string())
            .await
            .expect("Failed to start in-memory surrealdb");
        db.apply_migrations(3).await.expect("migrations");

        let rel = ArtifactRelationship::new(
            "artifact-1".into(),
            "treats".into(),
            "artifact-2".into(),
            "patient-1".into(),
        );
        let other_patient = ArtifactRelationship::new(
            "artifact-1".into(),
            "treats".into(),
            "artifact-3".into(),
            "patient-2".into(),
        );

        db.store_item(rel.clone()).await.expect("store");
        db.store_item(other_patient).await.expect("store");

        let found = ArtifactRelationship::for_subject(&db, "artifact-1", "patient-1")
            .await
            .expect("fetch");
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].object_id, "artifact-2");
    }
}
