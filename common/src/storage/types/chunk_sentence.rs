use crate::{error::AppError, storage::db::SurrealDbClient, stored_object};
use uuid::Uuid;

stored_object!(ChunkSentence, "chunk_sentence", {
    chunk_id: String,
    artifact_id: String,
    patient_id: String,
    text: String,
    chunk_start: usize,
    chunk_end: usize,
    artifact_start: usize,
    artifact_end: usize
});

impl ChunkSentence {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        chunk_id: String,
        artifact_id: String,
        patient_id: String,
        text: String,
        chunk_offsets: (usize, usize),
        artifact_offsets: (usize, usize),
    ) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4().to_string(),
            created_at: now,
            updated_at: now,
            chunk_id,
            artifact_id,
            patient_id,
            text,
            chunk_start: chunk_offsets.0,
            chunk_end: chunk_offsets.1,
            artifact_start: artifact_offsets.0,
            artifact_end: artifact_offsets.1,
        }
    }

    pub async fn for_chunk(db: &SurrealDbClient, chunk_id: &str) -> Result<Vec<Self>, AppError> {
        let sentences: Vec<Self> = db
            .client
            .query(
                "SELECT * FROM chunk_sentence WHERE chunk_id = $chunk_id ORDER BY chunk_start ASC",
            )
            .bind(("chunk_id", chunk_id.to_owned()))
            .await?
            .take(0)?;
        Ok(sentences)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn sentences_come_back_in_offset_order() {
        let db = SurrealDbClient::memory("test_ns", &Uuid::new_v4().to_string())
            .await
            .expect("Failed to start in-memory surrealdb");
        db.apply_migrations(3).await.expect("migrations");

        let chunk_id = Uuid::new_v4().to_string();
        let second = ChunkSentence::new(
            chunk_id.clone(),
            "artifact-1".into(),
            "patient-1".into(),
            "Continued on Lisinopril.".into(),
            (25, 49),
            (25, 49),
        );
        let first = ChunkSentence::new(
            chunk_id.clone(),
            "artifact-1".into(),
            "patient-1".into(),
            "BP stable at follow-up.".into(),
            (0, 23),
            (0, 23),
        );

        db.store_item(second).await.expect("store second");
        db.store_item(first).await.expect("store first");

        let sentences = ChunkSentence::for_chunk(&db, &chunk_id)
            .await
            .expect("fetch");
        assert_eq!(sentences.len(), 2);
        assert_eq!(sentences[0].chunk_start, 0);
        assert_eq!(sentences[1].chunk_start, 25);
    }
}
