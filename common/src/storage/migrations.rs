use crate::error::AppError;

use super::db::SurrealDbClient;

/// Applies the schema. Every statement is written to be idempotent
/// (`IF NOT EXISTS` / `OVERWRITE`) so migrations can run on every startup
/// and in every test without coordination.
pub async fn apply(db: &SurrealDbClient, embedding_dimension: usize) -> Result<(), AppError> {
    define_tables(db).await?;
    define_lookup_indexes(db).await?;
    define_quality_indexes(db).await?;
    define_vector_indexes(db, embedding_dimension).await?;
    Ok(())
}

async fn define_tables(db: &SurrealDbClient) -> Result<(), AppError> {
    db.client
        .query(
            "DEFINE TABLE IF NOT EXISTS artifact SCHEMALESS;
             DEFINE TABLE IF NOT EXISTS record_chunk SCHEMALESS;
             DEFINE TABLE IF NOT EXISTS chunk_embedding SCHEMALESS;
             DEFINE TABLE IF NOT EXISTS chunk_sentence SCHEMALESS;
             DEFINE TABLE IF NOT EXISTS sentence_embedding SCHEMALESS;
             DEFINE TABLE IF NOT EXISTS artifact_relationship SCHEMALESS;
             DEFINE TABLE IF NOT EXISTS conversation_history SCHEMALESS;
             DEFINE TABLE IF NOT EXISTS grounding_verification SCHEMALESS;
             DEFINE TABLE IF NOT EXISTS consistency_checks SCHEMALESS;
             DEFINE TABLE IF NOT EXISTS confidence_metrics SCHEMALESS;
             DEFINE TABLE IF NOT EXISTS hallucination_detections SCHEMALESS;
             DEFINE TABLE IF NOT EXISTS quality_trends SCHEMALESS;",
        )
        .await?
        .check()?;
    Ok(())
}

async fn define_lookup_indexes(db: &SurrealDbClient) -> Result<(), AppError> {
    db.client
        .query(
            "DEFINE INDEX IF NOT EXISTS idx_artifact_patient ON artifact FIELDS patient_id;
             DEFINE INDEX IF NOT EXISTS idx_chunk_patient ON record_chunk FIELDS patient_id;
             DEFINE INDEX IF NOT EXISTS idx_chunk_artifact ON record_chunk FIELDS artifact_id;
             DEFINE INDEX IF NOT EXISTS idx_chunk_type ON record_chunk FIELDS artifact_type;
             DEFINE INDEX IF NOT EXISTS idx_chunk_occurred ON record_chunk FIELDS occurred_at;
             DEFINE INDEX IF NOT EXISTS idx_sentence_chunk ON chunk_sentence FIELDS chunk_id;
             DEFINE INDEX IF NOT EXISTS idx_sentence_artifact ON chunk_sentence FIELDS artifact_id;
             DEFINE INDEX IF NOT EXISTS idx_relationship_subject ON artifact_relationship FIELDS subject_id;
             DEFINE INDEX IF NOT EXISTS idx_relationship_patient ON artifact_relationship FIELDS patient_id;
             DEFINE INDEX IF NOT EXISTS idx_conversation_patient ON conversation_history FIELDS patient_id;
             DEFINE INDEX IF NOT EXISTS idx_conversation_timestamp ON conversation_history FIELDS query_timestamp;",
        )
        .await?
        .check()?;
    Ok(())
}

/// One quality row per conversation is a schema-level guarantee; a second
/// write must fail with a unique-index violation.
async fn define_quality_indexes(db: &SurrealDbClient) -> Result<(), AppError> {
    db.client
        .query(
            "DEFINE INDEX IF NOT EXISTS idx_grounding_conversation ON grounding_verification FIELDS conversation_id UNIQUE;
             DEFINE INDEX IF NOT EXISTS idx_consistency_conversation ON consistency_checks FIELDS conversation_id UNIQUE;
             DEFINE INDEX IF NOT EXISTS idx_confidence_conversation ON confidence_metrics FIELDS conversation_id, extraction_index UNIQUE;
             DEFINE INDEX IF NOT EXISTS idx_hallucination_conversation ON hallucination_detections FIELDS conversation_id UNIQUE;
             DEFINE INDEX IF NOT EXISTS idx_trend_patient_period ON quality_trends FIELDS patient_id, period UNIQUE;",
        )
        .await?
        .check()?;
    Ok(())
}

async fn define_vector_indexes(
    db: &SurrealDbClient,
    embedding_dimension: usize,
) -> Result<(), AppError> {
    // OVERWRITE so a dimension change at startup redefines the index in place.
    db.client
        .query(format!(
            "DEFINE INDEX OVERWRITE idx_embedding_chunks ON chunk_embedding FIELDS embedding HNSW DIMENSION {embedding_dimension};
             DEFINE INDEX OVERWRITE idx_embedding_sentences ON sentence_embedding FIELDS embedding HNSW DIMENSION {embedding_dimension};"
        ))
        .await?
        .check()?;
    Ok(())
}
