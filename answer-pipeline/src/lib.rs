pub mod parser;
pub mod prompt;

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use common::{
    error::AppError,
    utils::llm::{GenerationParams, LlmClient},
};
use query_understanding::StructuredQuery;
use retrieval_pipeline::RetrievalCandidate;
use serde::{Deserialize, Serialize};
use tracing::instrument;

pub use prompt::{build_prompt, PromptBundle, ReasoningStyle};

/// Where a fact in the answer came from.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Provenance {
    pub artifact_id: String,
    pub chunk_id: String,
    pub char_offsets: Option<(usize, usize)>,
    pub supporting_text: String,
    pub confidence: f32,
}

/// A typed fact parsed from the LLM answer. `content` maps canonical
/// attribute names ("name", "dosage", ...) to values.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Extraction {
    #[serde(rename = "type")]
    pub extraction_type: String,
    pub content: BTreeMap<String, String>,
    pub provenance: Provenance,
}

/// Parsed generation output before quality assessment.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnswerDraft {
    pub short_answer: String,
    pub detailed_summary: String,
    pub extractions: Vec<Extraction>,
}

/// Generation seam: the engine wires the real LLM client, tests wire a
/// scripted generator.
#[async_trait]
pub trait AnswerGenerator: Send + Sync {
    async fn generate(
        &self,
        system_prompt: &str,
        user_message: &str,
        schema: serde_json::Value,
    ) -> Result<String, AppError>;

    fn model_name(&self) -> String;
}

pub struct LlmAnswerGenerator {
    client: Arc<LlmClient>,
    params: GenerationParams,
    deadline: Duration,
}

impl LlmAnswerGenerator {
    pub fn new(client: Arc<LlmClient>, params: GenerationParams, deadline: Duration) -> Self {
        Self {
            client,
            params,
            deadline,
        }
    }
}

#[async_trait]
impl AnswerGenerator for LlmAnswerGenerator {
    async fn generate(
        &self,
        system_prompt: &str,
        user_message: &str,
        schema: serde_json::Value,
    ) -> Result<String, AppError> {
        self.client
            .generate_structured(
                system_prompt,
                user_message,
                "clinical_answer",
                schema,
                self.params,
                self.deadline,
            )
            .await
    }

    fn model_name(&self) -> String {
        self.client.model().to_owned()
    }
}

/// Builds the prompt, drives the generator, and parses the structured
/// output with per-claim provenance validated against the candidate set.
#[instrument(skip_all, fields(query_id = %query.query_id))]
pub async fn generate_answer(
    generator: &dyn AnswerGenerator,
    query: &StructuredQuery,
    candidates: &[RetrievalCandidate],
    style: ReasoningStyle,
) -> Result<AnswerDraft, AppError> {
    let bundle = build_prompt(query, candidates, chrono::Utc::now(), style);
    let raw = generator
        .generate(&bundle.system, &bundle.user, parser::answer_schema())
        .await?;
    parser::parse_answer(&raw, candidates)
}
