use crate::{error::AppError, storage::db::SurrealDbClient, stored_object};

stored_object!(ChunkEmbedding, "chunk_embedding", {
    chunk_id: Thing,
    artifact_id: String,
    patient_id: String,
    embedding: Vec<f32>
});

impl ChunkEmbedding {
    /// The embedding record reuses the chunk id so the mapping stays 1:1.
    pub fn new(
        chunk_id: &str,
        artifact_id: String,
        embedding: Vec<f32>,
        patient_id: String,
    ) -> Self {
        let now = Utc::now();
        Self {
            id: chunk_id.to_owned(),
            created_at: now,
            updated_at: now,
            chunk_id: Thing::from(("record_chunk", chunk_id)),
            artifact_id,
            patient_id,
            embedding,
        }
    }

    pub async fn get_by_chunk_id(
        chunk_id: &str,
        db: &SurrealDbClient,
    ) -> Result<Option<Self>, AppError> {
        let found: Option<Self> = db.get_item(chunk_id).await?;
        Ok(found)
    }

    pub async fn count_for_patient(
        db: &SurrealDbClient,
        patient_id: &str,
    ) -> Result<usize, AppError> {
        #[derive(Deserialize)]
        struct CountRow {
            total: usize,
        }

        let mut response = db
            .client
            .query(
                "SELECT count() AS total FROM chunk_embedding WHERE patient_id = $patient_id GROUP ALL",
            )
            .bind(("patient_id", patient_id.to_owned()))
            .await?;

        let row: Option<CountRow> = response.take(0)?;
        Ok(row.map_or(0, |r| r.total))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use uuid::Uuid;

    #[tokio::test]
    async fn embedding_record_shares_chunk_id() {
        let db = SurrealDbClient::memory("test_ns", &Uuid::new_v4().to_string())
            .await
            .expect("Failed to start in-memory surrealdb");
        db.apply_migrations(3).await.expect("migrations");

        let chunk_id = Uuid::new_v4().to_string();
        let emb = ChunkEmbedding::new(
            &chunk_id,
            "artifact-1".into(),
            vec![0.1, 0.2, 0.3],
            "patient-1".into(),
        );

        db.store_item(emb).await.expect("store");

        let fetched = ChunkEmbedding::get_by_chunk_id(&chunk_id, &db)
            .await
            .expect("fetch");
        assert!(fetched.is_some());
        assert_eq!(fetched.unwrap().artifact_id, "artifact-1");
    }
}
