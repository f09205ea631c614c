use crate::stored_object;

// Stored only when two-pass precise citation is enabled; never mixed into
// the chunk-level search index.
stored_object!(SentenceEmbedding, "sentence_embedding", {
    sentence_id: String,
    chunk_id: String,
    artifact_id: String,
    patient_id: String,
    embedding: Vec<f32>
});

impl SentenceEmbedding {
    pub fn new(
        sentence_id: String,
        chunk_id: String,
        artifact_id: String,
        patient_id: String,
        embedding: Vec<f32>,
    ) -> Self {
        let now = Utc::now();
        Self {
            id: sentence_id.clone(),
            created_at: now,
            updated_at: now,
            sentence_id,
            chunk_id,
            artifact_id,
            patient_id,
            embedding,
        }
    }
}
