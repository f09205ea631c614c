use crate::storage::types::artifact::ArtifactType;
use crate::storage::types::chunk_embedding::ChunkEmbedding;
use crate::{error::AppError, storage::db::SurrealDbClient, stored_object};
use uuid::Uuid;

stored_object!(RecordChunk, "record_chunk", {
    artifact_id: String,
    patient_id: String,
    artifact_type: ArtifactType,
    #[serde(serialize_with = "serialize_datetime", deserialize_with = "deserialize_datetime", default)]
    occurred_at: DateTime<Utc>,
    author: Option<String>,
    chunk_text: String,
    enriched_text: Option<String>,
    extracted_entities: Vec<String>,
    relationship_ids: Vec<String>,
    source_url: Option<String>,
    context_expansion_level: u8
});

/// Search result including hydrated chunk.
#[allow(clippy::module_name_repetitions)]
#[derive(Debug, serde::Serialize, serde::Deserialize, PartialEq)]
pub struct ChunkSearchResult {
    pub chunk: RecordChunk,
    pub score: f32,
}

/// Predicates applied by the metadata-filter stage.
#[derive(Debug, Clone, Default)]
pub struct ChunkFilter {
    pub artifact_types: Option<Vec<ArtifactType>>,
    pub occurred_from: Option<DateTime<Utc>>,
    pub occurred_to: Option<DateTime<Utc>>,
}

impl RecordChunk {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        artifact_id: String,
        patient_id: String,
        artifact_type: ArtifactType,
        occurred_at: DateTime<Utc>,
        author: Option<String>,
        chunk_text: String,
    ) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4().to_string(),
            created_at: now,
            updated_at: now,
            artifact_id,
            patient_id,
            artifact_type,
            occurred_at,
            author,
            chunk_text,
            enriched_text: None,
            extracted_entities: Vec::new(),
            relationship_ids: Vec::new(),
            source_url: None,
            context_expansion_level: 0,
        }
    }

    /// Atomically store a chunk and its embedding.
    /// Writes the chunk to `record_chunk` and the embedding to `chunk_embedding`
    /// in one transaction so neither can be orphaned.
    pub async fn store_with_embedding(
        chunk: RecordChunk,
        embedding: Vec<f32>,
        db: &SurrealDbClient,
    ) -> Result<(), AppError> {
        let chunk_id = chunk.id.clone();
        let artifact_id = chunk.artifact_id.clone();
        let patient_id = chunk.patient_id.clone();

        let emb = ChunkEmbedding::new(&chunk_id, artifact_id, embedding, patient_id);

        let response = db
            .client
            .query("BEGIN TRANSACTION;")
            .query(format!(
                "CREATE type::thing('{chunk_table}', $chunk_id) CONTENT $chunk;",
                chunk_table = Self::table_name(),
            ))
            .query(format!(
                "CREATE type::thing('{emb_table}', $emb_id) CONTENT $emb;",
                emb_table = ChunkEmbedding::table_name(),
            ))
            .query("COMMIT TRANSACTION;")
            .bind(("chunk_id", chunk_id.clone()))
            .bind(("chunk", chunk))
            .bind(("emb_id", emb.id.clone()))
            .bind(("emb", emb))
            .await
            .map_err(AppError::Database)?;

        response.check().map_err(AppError::Database)?;

        Ok(())
    }

    /// Vector search over chunk embeddings, fetching full chunk rows.
    pub async fn vector_search(
        take: usize,
        query_embedding: Vec<f32>,
        db: &SurrealDbClient,
        patient_id: &str,
    ) -> Result<Vec<ChunkSearchResult>, AppError> {
        #[allow(clippy::missing_docs_in_private_items)]
        #[derive(Deserialize)]
        struct Row {
            chunk_id: RecordChunk,
            score: f32,
        }

        let sql = format!(
            r#"
            SELECT
                chunk_id,
                vector::similarity::cosine(embedding, $embedding) AS score
            FROM {emb_table}
            WHERE patient_id = $patient_id
              AND embedding <|{take},100|> $embedding
            ORDER BY score DESC
            LIMIT {take}
            FETCH chunk_id;
            "#,
            emb_table = ChunkEmbedding::table_name(),
            take = take
        );

        let mut response = db
            .query(&sql)
            .bind(("embedding", query_embedding))
            .bind(("patient_id", patient_id.to_string()))
            .await
            .map_err(|e| AppError::InternalError(format!("Surreal query failed: {e}")))?;

        let rows: Vec<Row> = response.take::<Vec<Row>>(0).unwrap_or_default();

        Ok(rows
            .into_iter()
            .map(|r| ChunkSearchResult {
                chunk: r.chunk_id,
                score: r.score,
            })
            .collect())
    }

    /// Chunks for one patient satisfying the metadata-filter predicates.
    pub async fn find_filtered(
        db: &SurrealDbClient,
        patient_id: &str,
        filter: &ChunkFilter,
    ) -> Result<Vec<Self>, AppError> {
        let mut sql = String::from("SELECT * FROM record_chunk WHERE patient_id = $patient_id");
        if filter.artifact_types.is_some() {
            sql.push_str(" AND artifact_type IN $types");
        }
        if filter.occurred_from.is_some() {
            sql.push_str(" AND occurred_at >= $from");
        }
        if filter.occurred_to.is_some() {
            sql.push_str(" AND occurred_at <= $to");
        }
        sql.push_str(" ORDER BY occurred_at DESC");

        let mut query = db.client.query(sql).bind(("patient_id", patient_id.to_owned()));
        if let Some(types) = &filter.artifact_types {
            let labels: Vec<String> = types.iter().map(|t| t.as_str().to_owned()).collect();
            query = query.bind(("types", labels));
        }
        if let Some(from) = filter.occurred_from {
            query = query.bind(("from", surrealdb::Datetime::from(from)));
        }
        if let Some(to) = filter.occurred_to {
            query = query.bind(("to", surrealdb::Datetime::from(to)));
        }

        let chunks: Vec<Self> = query.await?.take(0)?;
        Ok(chunks)
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
            .query("SELECT count() AS total FROM record_chunk WHERE patient_id = $patient_id GROUP ALL")
            .bind(("patient_id", patient_id.to_owned()))
            .await?;

        let row: Option<CountRow> = response.take(0)?;
        Ok(row.map_or(0, |r| r.total))
    }

    pub async fn count_for_artifact(
        db: &SurrealDbClient,
        artifact_id: &str,
    ) -> Result<usize, AppError> {
        #[derive(Deserialize)]
        struct CountRow {
            total: usize,
        }

        let mut response = db
            .client
            .query("SELECT count() AS total FROM record_chunk WHERE artifact_id = $artifact_id GROUP ALL")
            .bind(("artifact_id", artifact_id.to_owned()))
            .await?;

        let row: Option<CountRow> = response.take(0)?;
        Ok(row.map_or(0, |r| r.total))
    }

    /// Removes the artifact's chunks, sentences, and embeddings. Run before
    /// re-indexing so indexing stays idempotent.
    pub async fn delete_by_artifact_id(
        artifact_id: &str,
        db: &SurrealDbClient,
    ) -> Result<(), AppError> {
        db.client
            .query(
                "BEGIN TRANSACTION;
                 DELETE record_chunk WHERE artifact_id = $artifact_id;
                 DELETE chunk_embedding WHERE artifact_id = $artifact_id;
                 DELETE chunk_sentence WHERE artifact_id = $artifact_id;
                 DELETE sentence_embedding WHERE artifact_id = $artifact_id;
                 COMMIT TRANSACTION;",
            )
            .bind(("artifact_id", artifact_id.to_owned()))
            .await?
            .check()?;

        Ok(())
    }

    /// Raw text used for search and grounding; enriched text is reserved for
    /// prompt context.
    pub fn grounding_text(&self) -> &str {
        &self.chunk_text
    }

    /// Text handed to the prompt builder, preferring the enriched variant.
    pub fn context_text(&self) -> &str {
        self.enriched_text.as_deref().unwrap_or(&self.chunk_text)
    }
}
