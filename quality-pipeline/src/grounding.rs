use answer_pipeline::AnswerDraft;
use common::{error::AppError, utils::embedding::cosine_similarity};
use retrieval_pipeline::RetrievalCandidate;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::AnswerEmbedder;

/// Fragments shorter than this are noise, not verifiable claims.
const MIN_STATEMENT_CHARS: usize = 11;
const EXACT_MATCH_CONFIDENCE: f32 = 0.95;
const OVERLAP_THRESHOLD: f32 = 0.60;
const EMBEDDING_THRESHOLD: f32 = 0.75;
const LOW_CONFIDENCE_WARNING: f32 = 0.7;
const INFERENCE_WARNING_SHARE: f32 = 0.30;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VerificationMethod {
    ExactMatch,
    SemanticMatch,
    Inference,
    Unsupported,
}

/// Per-statement verification result.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StatementGrounding {
    pub statement: String,
    pub statement_index: usize,
    pub is_grounded: bool,
    pub source_chunk_id: Option<String>,
    pub source_artifact_id: Option<String>,
    pub supporting_evidence: Option<String>,
    pub grounding_confidence: f32,
    pub verification_method: VerificationMethod,
    pub similarity_score: Option<f32>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GroundingReport {
    pub grounding_score: f32,
    pub total_statements: usize,
    pub grounded_statements: usize,
    pub statements: Vec<StatementGrounding>,
    pub unsupported_statements: Vec<String>,
    pub warnings: Vec<String>,
}

/// Decomposes the short and detailed answers into atomic statements:
/// sentence terminators first, then coordinating conjunctions, dropping
/// fragments shorter than 11 characters.
pub fn decompose(draft: &AnswerDraft) -> Vec<String> {
    let combined = format!("{}\n{}", draft.short_answer, draft.detailed_summary);
    let mut statements = Vec::new();

    for raw_sentence in combined.split_inclusive(['.', '!', '?', '\n']) {
        let sentence = raw_sentence
            .trim()
            .trim_start_matches(['-', '*', '•'])
            .trim();
        if sentence.is_empty() {
            continue;
        }

        for fragment in split_on_conjunctions(sentence) {
            let fragment = fragment.trim().trim_matches(['.', '!', '?']).trim();
            if fragment.chars().count() >= MIN_STATEMENT_CHARS {
                statements.push(fragment.to_owned());
            }
        }
    }

    statements
}

fn split_on_conjunctions(sentence: &str) -> Vec<String> {
    let mut fragments = vec![sentence.to_owned()];
    for conjunction in [" and ", " but ", " or ", " nor ", " yet ", " so "] {
        fragments = fragments
            .into_iter()
            .flat_map(|fragment| {
                fragment
                    .split(conjunction)
                    .map(str::to_owned)
                    .collect::<Vec<_>>()
            })
            .collect();
    }
    fragments
}

/// Verifies every statement against the source chunks, walking the ladder:
/// exact substring match, word-overlap, embedding similarity, unsupported.
/// The embedding rung reports `inference` since it asserts support without
/// lexical evidence; when no embedder is wired the rung is skipped.
pub async fn verify(
    draft: &AnswerDraft,
    candidates: &[RetrievalCandidate],
    embedder: Option<&dyn AnswerEmbedder>,
) -> Result<GroundingReport, AppError> {
    let statements = decompose(draft);
    let total = statements.len();

    let chunk_embeddings = match embedder {
        Some(embedder) if !candidates.is_empty() && !statements.is_empty() => {
            let mut embeddings = Vec::with_capacity(candidates.len());
            for candidate in candidates {
                embeddings.push(embedder.embed(&candidate.chunk.chunk_text).await?);
            }
            Some(embeddings)
        }
        _ => None,
    };

    let mut results = Vec::with_capacity(total);
    for (index, statement) in statements.into_iter().enumerate() {
        let grounding = verify_statement(
            &statement,
            index,
            candidates,
            embedder,
            chunk_embeddings.as_deref(),
        )
        .await?;
        results.push(grounding);
    }

    Ok(build_report(results, total))
}

async fn verify_statement(
    statement: &str,
    index: usize,
    candidates: &[RetrievalCandidate],
    embedder: Option<&dyn AnswerEmbedder>,
    chunk_embeddings: Option<&[Vec<f32>]>,
) -> Result<StatementGrounding, AppError> {
    let normalized_statement = normalize(statement);

    // Rung 1: normalized substring containment.
    for candidate in candidates {
        let normalized_chunk = normalize(&candidate.chunk.chunk_text);
        if normalized_chunk.contains(&normalized_statement) {
            return Ok(StatementGrounding {
                statement: statement.to_owned(),
                statement_index: index,
                is_grounded: true,
                source_chunk_id: Some(candidate.chunk.id.clone()),
                source_artifact_id: Some(candidate.chunk.artifact_id.clone()),
                supporting_evidence: Some(candidate.snippet.clone()),
                grounding_confidence: EXACT_MATCH_CONFIDENCE,
                verification_method: VerificationMethod::ExactMatch,
                similarity_score: None,
            });
        }
    }

    // Rung 2: word-overlap ratio over tokens longer than 3 characters.
    let statement_tokens: Vec<String> = long_tokens(statement);
    if !statement_tokens.is_empty() {
        let mut best: Option<(f32, &RetrievalCandidate)> = None;
        for candidate in candidates {
            let chunk_tokens: Vec<String> = long_tokens(&candidate.chunk.chunk_text);
            #[allow(clippy::cast_precision_loss)]
            let ratio = statement_tokens
                .iter()
                .filter(|t| chunk_tokens.contains(t))
                .count() as f32
                / statement_tokens.len() as f32;

            if best.as_ref().map_or(true, |(b, _)| ratio > *b) {
                best = Some((ratio, candidate));
            }
        }

        if let Some((ratio, candidate)) = best {
            if ratio >= OVERLAP_THRESHOLD {
                return Ok(StatementGrounding {
                    statement: statement.to_owned(),
                    statement_index: index,
                    is_grounded: true,
                    source_chunk_id: Some(candidate.chunk.id.clone()),
                    source_artifact_id: Some(candidate.chunk.artifact_id.clone()),
                    supporting_evidence: Some(candidate.snippet.clone()),
                    grounding_confidence: 0.20f32.mul_add(ratio, 0.70),
                    verification_method: VerificationMethod::SemanticMatch,
                    similarity_score: None,
                });
            }
        }
    }

    // Rung 3: embedding cosine similarity against each chunk.
    if let (Some(embedder), Some(chunk_embeddings)) = (embedder, chunk_embeddings) {
        let statement_embedding = embedder.embed(statement).await?;
        let mut best: Option<(f32, usize)> = None;
        for (chunk_index, chunk_embedding) in chunk_embeddings.iter().enumerate() {
            let similarity = cosine_similarity(&statement_embedding, chunk_embedding);
            if best.map_or(true, |(b, _)| similarity > b) {
                best = Some((similarity, chunk_index));
            }
        }

        if let Some((similarity, chunk_index)) = best {
            if similarity >= EMBEDDING_THRESHOLD {
                let candidate = candidates.get(chunk_index);
                return Ok(StatementGrounding {
                    statement: statement.to_owned(),
                    statement_index: index,
                    is_grounded: true,
                    source_chunk_id: candidate.map(|c| c.chunk.id.clone()),
                    source_artifact_id: candidate.map(|c| c.chunk.artifact_id.clone()),
                    supporting_evidence: candidate.map(|c| c.snippet.clone()),
                    grounding_confidence: similarity * 0.9,
                    verification_method: VerificationMethod::Inference,
                    similarity_score: Some(similarity),
                });
            }
        }
    }

    Ok(StatementGrounding {
        statement: statement.to_owned(),
        statement_index: index,
        is_grounded: false,
        source_chunk_id: None,
        source_artifact_id: None,
        supporting_evidence: None,
        grounding_confidence: 0.0,
        verification_method: VerificationMethod::Unsupported,
        similarity_score: None,
    })
}

fn build_report(statements: Vec<StatementGrounding>, total: usize) -> GroundingReport {
    if total == 0 {
        return GroundingReport {
            grounding_score: 1.0,
            total_statements: 0,
            grounded_statements: 0,
            statements,
            unsupported_statements: Vec::new(),
            warnings: Vec::new(),
        };
    }

    let grounded = statements.iter().filter(|s| s.is_grounded).count();
    let confidence_sum: f32 = statements.iter().map(|s| s.grounding_confidence).sum();
    #[allow(clippy::cast_precision_loss)]
    let total_f = total as f32;
    #[allow(clippy::cast_precision_loss)]
    let grounding_score = 0.7 * (grounded as f32 / total_f) + 0.3 * (confidence_sum / total_f);

    let unsupported_statements: Vec<String> = statements
        .iter()
        .filter(|s| !s.is_grounded)
        .map(|s| s.statement.clone())
        .collect();

    let mut warnings = Vec::new();
    if !unsupported_statements.is_empty() {
        warnings.push(format!(
            "{} statement(s) could not be grounded in any source",
            unsupported_statements.len()
        ));
    }

    let weakly_grounded = statements
        .iter()
        .filter(|s| s.is_grounded && s.grounding_confidence < LOW_CONFIDENCE_WARNING)
        .count();
    if weakly_grounded > 0 {
        warnings.push(format!(
            "{weakly_grounded} grounded statement(s) have confidence below {LOW_CONFIDENCE_WARNING}"
        ));
    }

    let inferred = statements
        .iter()
        .filter(|s| s.verification_method == VerificationMethod::Inference)
        .count();
    #[allow(clippy::cast_precision_loss)]
    if inferred as f32 / total_f > INFERENCE_WARNING_SHARE {
        warnings.push(format!(
            "{inferred} of {total} statements rely on inference-level evidence"
        ));
    }

    debug!(
        grounded,
        total,
        score = grounding_score,
        "Grounding verification complete"
    );

    GroundingReport {
        grounding_score,
        total_statements: total,
        grounded_statements: grounded,
        statements,
        unsupported_statements,
        warnings,
    }
}

fn normalize(text: &str) -> String {
    text.chars()
        .filter(|c| c.is_alphanumeric() || c.is_whitespace())
        .collect::<String>()
        .to_lowercase()
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
}

fn long_tokens(text: &str) -> Vec<String> {
    text.split(|c: char| !c.is_alphanumeric())
        .filter(|t| t.chars().count() > 3)
        .map(str::to_lowercase)
        .collect()
}
