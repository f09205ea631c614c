use std::sync::Arc;
use std::time::Instant;

use async_trait::async_trait;
use common::{
    error::AppError,
    storage::{
        db::SurrealDbClient,
        types::{
            artifact::Artifact, chunk_sentence::ChunkSentence, record_chunk::RecordChunk,
            sentence_embedding::SentenceEmbedding,
        },
    },
    utils::embedding::EmbeddingProvider,
};
use retrieval_pipeline::SharedKeywordIndex;
use serde::Serialize;
use tracing::{debug, info, warn};

use crate::{chunker::Chunker, enricher::build_enrichment_header, sentences::SentenceSplitter};

/// Embedding seam so tests can index without a live model server.
#[async_trait]
pub trait IndexerServices: Send + Sync {
    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, AppError>;
}

pub struct EmbeddingServices {
    provider: Arc<EmbeddingProvider>,
}

impl EmbeddingServices {
    pub fn new(provider: Arc<EmbeddingProvider>) -> Self {
        Self { provider }
    }
}

#[async_trait]
impl IndexerServices for EmbeddingServices {
    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, AppError> {
        self.provider.embed_batch(texts).await
    }
}

#[derive(Debug, Clone)]
pub struct IndexerConfig {
    pub min_chunk_words: usize,
    pub max_chunk_words: usize,
    pub max_sentence_chars: usize,
    pub enrichment_enabled: bool,
    pub sentence_embeddings_enabled: bool,
}

impl Default for IndexerConfig {
    fn default() -> Self {
        Self {
            min_chunk_words: 50,
            max_chunk_words: 150,
            max_sentence_chars: 400,
            enrichment_enabled: true,
            sentence_embeddings_enabled: false,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct IndexOutcome {
    pub artifact_id: String,
    pub chunk_count: usize,
    pub sentence_count: usize,
    pub skipped: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct IndexReport {
    pub patient_id: String,
    pub artifacts_indexed: usize,
    pub artifacts_skipped: usize,
    pub chunks_written: usize,
    pub elapsed_ms: u128,
}

/// Chunks, enriches, embeds, and persists artifacts, and feeds the keyword
/// index. Indexing is idempotent per artifact: existing chunks are replaced
/// by a deterministic re-derivation from the artifact text.
pub struct IndexerPipeline {
    db: Arc<SurrealDbClient>,
    services: Arc<dyn IndexerServices>,
    config: IndexerConfig,
    chunker: Chunker,
}

impl IndexerPipeline {
    pub fn new(
        db: Arc<SurrealDbClient>,
        services: Arc<dyn IndexerServices>,
        config: IndexerConfig,
    ) -> Self {
        let splitter = SentenceSplitter::new(config.max_sentence_chars);
        let chunker = Chunker::new(config.min_chunk_words, config.max_chunk_words, splitter);
        Self {
            db,
            services,
            config,
            chunker,
        }
    }

    /// Indexes every artifact of the patient. Already-indexed artifacts are
    /// skipped unless `force_reindex` is set.
    #[tracing::instrument(skip_all, fields(patient_id, force_reindex))]
    pub async fn index_patient(
        &self,
        patient_id: &str,
        force_reindex: bool,
        keyword_index: &SharedKeywordIndex,
    ) -> Result<IndexReport, AppError> {
        let started = Instant::now();
        let artifacts = Artifact::for_patient(&self.db, patient_id).await?;
        if artifacts.is_empty() {
            return Err(AppError::NotFound(format!(
                "no artifacts recorded for patient {patient_id}"
            )));
        }

        let mut indexed = 0;
        let mut skipped = 0;
        let mut chunks_written = 0;

        for artifact in &artifacts {
            if !force_reindex
                && RecordChunk::count_for_artifact(&self.db, &artifact.id).await? > 0
            {
                skipped += 1;
                continue;
            }

            let outcome = self.index_artifact(artifact, keyword_index).await?;
            indexed += 1;
            chunks_written += outcome.chunk_count;
        }

        let report = IndexReport {
            patient_id: patient_id.to_owned(),
            artifacts_indexed: indexed,
            artifacts_skipped: skipped,
            chunks_written,
            elapsed_ms: started.elapsed().as_millis(),
        };

        info!(
            artifacts_indexed = report.artifacts_indexed,
            artifacts_skipped = report.artifacts_skipped,
            chunks_written = report.chunks_written,
            "Patient indexing finished"
        );

        Ok(report)
    }

    /// Indexes one artifact: split into sentences and chunks, optionally
    /// enrich, embed in input order, persist, and feed the keyword index.
    #[tracing::instrument(skip_all, fields(artifact_id = %artifact.id))]
    pub async fn index_artifact(
        &self,
        artifact: &Artifact,
        keyword_index: &SharedKeywordIndex,
    ) -> Result<IndexOutcome, AppError> {
        if artifact.text.trim().is_empty() {
            return Err(AppError::InvalidInput(format!(
                "artifact {} has no text to index",
                artifact.id
            )));
        }

        // Replacing prior output keeps indexing idempotent.
        RecordChunk::delete_by_artifact_id(&artifact.id, &self.db).await?;

        let drafts = self.chunker.chunk(&artifact.text);
        if drafts.is_empty() {
            return Ok(IndexOutcome {
                artifact_id: artifact.id.clone(),
                chunk_count: 0,
                sentence_count: 0,
                skipped: false,
            });
        }

        let enrichment = if self.config.enrichment_enabled {
            build_enrichment_header(&self.db, artifact).await?
        } else {
            None
        };

        let chunk_texts: Vec<String> = drafts.iter().map(|d| d.text.clone()).collect();
        let embeddings = self.services.embed_batch(&chunk_texts).await?;
        if embeddings.len() != drafts.len() {
            return Err(AppError::InternalError(format!(
                "embedding batch returned {} vectors for {} chunks",
                embeddings.len(),
                drafts.len()
            )));
        }

        let mut sentence_count = 0;
        let chunk_count = drafts.len();

        for (draft, embedding) in drafts.into_iter().zip(embeddings) {
            let mut chunk = RecordChunk::new(
                artifact.id.clone(),
                artifact.patient_id.clone(),
                artifact.artifact_type,
                artifact.occurred_at,
                artifact.author.clone(),
                draft.text.clone(),
            );
            chunk.source_url = artifact.source_url.clone();
            if let Some((header, relationship_ids)) = &enrichment {
                chunk.enriched_text = Some(format!("{header}\n{}", draft.text));
                chunk.relationship_ids = relationship_ids.clone();
                chunk.context_expansion_level = 1;
            }

            let chunk_id = chunk.id.clone();
            let raw_text = chunk.chunk_text.clone();

            RecordChunk::store_with_embedding(chunk, embedding, &self.db).await?;

            let mut sentence_rows = Vec::with_capacity(draft.sentences.len());
            for span in &draft.sentences {
                let sentence = ChunkSentence::new(
                    chunk_id.clone(),
                    artifact.id.clone(),
                    artifact.patient_id.clone(),
                    span.text.clone(),
                    (span.start - draft.start, span.end - draft.start),
                    (span.start, span.end),
                );
                sentence_rows.push(sentence);
            }
            sentence_count += sentence_rows.len();

            if self.config.sentence_embeddings_enabled && !sentence_rows.is_empty() {
                let sentence_texts: Vec<String> =
                    sentence_rows.iter().map(|s| s.text.clone()).collect();
                let sentence_embeddings = self.services.embed_batch(&sentence_texts).await?;
                for (sentence, embedding) in sentence_rows.iter().zip(sentence_embeddings) {
                    let record = SentenceEmbedding::new(
                        sentence.id.clone(),
                        chunk_id.clone(),
                        artifact.id.clone(),
                        artifact.patient_id.clone(),
                        embedding,
                    );
                    if let Err(err) = self.db.store_item(record).await {
                        warn!(error = %err, "Failed to store sentence embedding");
                    }
                }
            }

            for sentence in sentence_rows {
                self.db.store_item(sentence).await?;
            }

            match keyword_index.write() {
                Ok(mut index) => index.add_document(&chunk_id, &raw_text),
                Err(_) => {
                    return Err(AppError::InternalError(
                        "keyword index lock poisoned".into(),
                    ))
                }
            }
        }

        debug!(chunk_count, sentence_count, "Indexed artifact");

        Ok(IndexOutcome {
            artifact_id: artifact.id.clone(),
            chunk_count,
            sentence_count,
            skipped: false,
        })
    }

    /// Rebuilds the in-memory keyword index from the stored chunks, used at
    /// startup.
    pub async fn rebuild_keyword_index(
        db: &SurrealDbClient,
        keyword_index: &SharedKeywordIndex,
    ) -> Result<usize, AppError> {
        let chunks: Vec<RecordChunk> = db.get_all_stored_items().await?;
        let count = chunks.len();

        let mut index = keyword_index
            .write()
            .map_err(|_| AppError::InternalError("keyword index lock poisoned".into()))?;
        for chunk in chunks {
            index.add_document(&chunk.id, &chunk.chunk_text);
        }

        Ok(count)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use common::storage::types::artifact::ArtifactType;
    use retrieval_pipeline::Bm25Index;
    use std::sync::RwLock;
    use uuid::Uuid;

    /// Deterministic embeddings encoding input order in the first
    /// component, so batch-order preservation is observable.
    struct StubServices;

    #[async_trait]
    impl IndexerServices for StubServices {
        async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, AppError> {
            #[allow(clippy::cast_precision_loss)]
            Ok(texts
                .iter()
                .enumerate()
                .map(|(i, text)| vec![i as f32, text.len() as f32, 1.0])
                .collect())
        }
    }

    async fn setup() -> (Arc<SurrealDbClient>, IndexerPipeline, SharedKeywordIndex) {
        let db = Arc::new(
            SurrealDbClient::memory("test_ns", &Uuid::new_v4().to_string())
                .await
                .expect("Failed to start in-memory surrealdb"),
        );
        db.apply_migrations(3).await.expect("migrations");

        let pipeline = IndexerPipeline::new(
            Arc::clone(&db),
            Arc::new(StubServices),
            IndexerConfig::default(),
        );
        let index: SharedKeywordIndex = Arc::new(RwLock::new(Bm25Index::new()));
        (db, pipeline, index)
    }

    fn note_artifact(patient_id: &str, text: &str) -> Artifact {
        Artifact::new(
            patient_id.to_owned(),
            ArtifactType::Note,
            Utc::now(),
            text.to_owned(),
        )
    }

    fn long_note_text() -> String {
        (0..8)
            .map(|i| format!("Visit {i} covered blood pressure trends, medication adherence, recent lab work, and planned follow-up steps for the coming month."))
            .collect::<Vec<_>>()
            .join(" ")
    }

    #[tokio::test]
    async fn empty_artifact_text_is_invalid_input() {
        let (_db, pipeline, index) = setup().await;
        let artifact = note_artifact("patient-1", "   ");

        let err = pipeline
            .index_artifact(&artifact, &index)
            .await
            .expect_err("must fail");
        assert!(matches!(err, AppError::InvalidInput(_)));
    }

    #[tokio::test]
    async fn indexing_writes_chunks_sentences_and_keyword_entries() {
        let (db, pipeline, index) = setup().await;
        let artifact = note_artifact("patient-1", &long_note_text());
        db.store_item(artifact.clone()).await.expect("store");

        let outcome = pipeline
            .index_artifact(&artifact, &index)
            .await
            .expect("index");

        assert!(outcome.chunk_count >= 1);
        assert!(outcome.sentence_count >= outcome.chunk_count);
        assert_eq!(
            RecordChunk::count_for_artifact(&db, &artifact.id)
                .await
                .expect("count"),
            outcome.chunk_count
        );
        assert_eq!(index.read().expect("lock").len(), outcome.chunk_count);
    }

    #[tokio::test]
    async fn indexing_twice_leaves_the_same_state_as_once() {
        let (db, pipeline, index) = setup().await;
        let artifact = note_artifact("patient-1", &long_note_text());
        db.store_item(artifact.clone()).await.expect("store");

        let first = pipeline
            .index_artifact(&artifact, &index)
            .await
            .expect("first index");
        let second = pipeline
            .index_artifact(&artifact, &index)
            .await
            .expect("second index");

        assert_eq!(first.chunk_count, second.chunk_count);
        assert_eq!(first.sentence_count, second.sentence_count);

        let stored = RecordChunk::count_for_artifact(&db, &artifact.id)
            .await
            .expect("count");
        assert_eq!(stored, second.chunk_count, "no duplicate chunks");

        let mut texts: Vec<String> = db
            .get_all_stored_items::<RecordChunk>()
            .await
            .expect("chunks")
            .into_iter()
            .map(|c| c.chunk_text)
            .collect();
        texts.sort();
        texts.dedup();
        assert_eq!(texts.len(), second.chunk_count, "chunk content is stable");
    }

    #[tokio::test]
    async fn index_patient_skips_indexed_artifacts_unless_forced() {
        let (db, pipeline, index) = setup().await;
        let first = note_artifact("patient-1", &long_note_text());
        let second = note_artifact("patient-1", &long_note_text());
        db.store_item(first.clone()).await.expect("store");
        db.store_item(second.clone()).await.expect("store");

        let initial = pipeline
            .index_patient("patient-1", false, &index)
            .await
            .expect("index patient");
        assert_eq!(initial.artifacts_indexed, 2);
        assert_eq!(initial.artifacts_skipped, 0);

        let repeat = pipeline
            .index_patient("patient-1", false, &index)
            .await
            .expect("repeat");
        assert_eq!(repeat.artifacts_indexed, 0);
        assert_eq!(repeat.artifacts_skipped, 2);

        let forced = pipeline
            .index_patient("patient-1", true, &index)
            .await
            .expect("forced");
        assert_eq!(forced.artifacts_indexed, 2);
    }

    #[tokio::test]
    async fn index_patient_with_no_artifacts_is_not_found() {
        let (_db, pipeline, index) = setup().await;

        let err = pipeline
            .index_patient("ghost", false, &index)
            .await
            .expect_err("must fail");
        assert!(matches!(err, AppError::NotFound(_)));
    }

    #[tokio::test]
    async fn embeddings_preserve_chunk_order() {
        let (db, pipeline, index) = setup().await;
        let artifact = note_artifact("patient-1", &long_note_text());
        db.store_item(artifact.clone()).await.expect("store");

        pipeline
            .index_artifact(&artifact, &index)
            .await
            .expect("index");

        // The stub encodes each input's length in the second component, so a
        // mispaired batch would show up as a length mismatch here.
        let chunks: Vec<RecordChunk> = db
            .get_all_stored_items::<RecordChunk>()
            .await
            .expect("chunks");
        assert!(!chunks.is_empty());

        for chunk in &chunks {
            let embedding =
                common::storage::types::chunk_embedding::ChunkEmbedding::get_by_chunk_id(
                    &chunk.id, &db,
                )
                .await
                .expect("embedding")
                .expect("present");
            #[allow(clippy::cast_precision_loss)]
            let expected = chunk.chunk_text.len() as f32;
            assert!((embedding.embedding[1] - expected).abs() < f32::EPSILON);
        }
    }

    #[tokio::test]
    async fn enrichment_header_lands_in_enriched_text_only() {
        let (db, pipeline, index) = setup().await;

        let note = note_artifact("patient-1", &long_note_text());
        let condition = Artifact::new(
            "patient-1".into(),
            ArtifactType::Condition,
            Utc::now(),
            "Condition: Hypertension. Status: active.".into(),
        )
        .with_title("Hypertension");

        db.store_item(note.clone()).await.expect("store note");
        db.store_item(condition.clone()).await.expect("store condition");
        db.store_item(
            common::storage::types::artifact_relationship::ArtifactRelationship::new(
                note.id.clone(),
                "addresses".into(),
                condition.id.clone(),
                "patient-1".into(),
            ),
        )
        .await
        .expect("store rel");

        pipeline.index_artifact(&note, &index).await.expect("index");

        let chunks: Vec<RecordChunk> = db.get_all_stored_items().await.expect("chunks");
        let note_chunks: Vec<&RecordChunk> = chunks
            .iter()
            .filter(|c| c.artifact_id == note.id)
            .collect();
        assert!(!note_chunks.is_empty());
        for chunk in note_chunks {
            let enriched = chunk.enriched_text.as_ref().expect("enriched");
            assert!(enriched.contains("Related Conditions: Hypertension"));
            assert!(!chunk.chunk_text.contains("Related Conditions"));
            assert_eq!(chunk.context_expansion_level, 1);
        }
    }

    #[tokio::test]
    async fn rebuild_keyword_index_loads_existing_chunks() {
        let (db, pipeline, index) = setup().await;
        let artifact = note_artifact("patient-1", &long_note_text());
        db.store_item(artifact.clone()).await.expect("store");
        pipeline
            .index_artifact(&artifact, &index)
            .await
            .expect("index");

        let fresh: SharedKeywordIndex = Arc::new(RwLock::new(Bm25Index::new()));
        let loaded = IndexerPipeline::rebuild_keyword_index(&db, &fresh)
            .await
            .expect("rebuild");

        assert_eq!(loaded, index.read().expect("lock").len());
    }
}
