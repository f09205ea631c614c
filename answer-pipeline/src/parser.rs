use std::collections::{BTreeMap, HashMap};

use common::error::AppError;
use retrieval_pipeline::RetrievalCandidate;
use serde::Deserialize;
use tracing::warn;

use crate::{AnswerDraft, Extraction, Provenance};

/// Wire format the LLM is constrained to produce.
#[derive(Debug, Deserialize)]
struct LlmAnswerFormat {
    short_answer: String,
    detailed_summary: String,
    #[serde(default)]
    extractions: Vec<LlmExtraction>,
}

#[derive(Debug, Deserialize)]
struct LlmExtraction {
    #[serde(rename = "type")]
    extraction_type: String,
    #[serde(default)]
    content: BTreeMap<String, String>,
    chunk_id: String,
    #[serde(default = "default_confidence")]
    confidence: f32,
}

const fn default_confidence() -> f32 {
    0.5
}

/// Strict JSON schema handed to the LLM for structured generation.
pub fn answer_schema() -> serde_json::Value {
    serde_json::json!({
        "type": "object",
        "properties": {
            "short_answer": {
                "type": "string",
                "description": "Direct answer to the question"
            },
            "detailed_summary": {
                "type": "string",
                "description": "Bulleted summary with citations"
            },
            "extractions": {
                "type": "array",
                "items": {
                    "type": "object",
                    "properties": {
                        "type": {
                            "type": "string",
                            "description": "medication | condition | symptom | procedure | ..."
                        },
                        "content": {
                            "type": "object",
                            "additionalProperties": {"type": "string"}
                        },
                        "chunk_id": {
                            "type": "string",
                            "description": "Id of the source excerpt supporting this fact"
                        },
                        "confidence": {"type": "number"}
                    },
                    "required": ["type", "content", "chunk_id", "confidence"],
                    "additionalProperties": false
                }
            }
        },
        "required": ["short_answer", "detailed_summary", "extractions"],
        "additionalProperties": false
    })
}

/// Parses the LLM output and attaches provenance. Extractions whose
/// `chunk_id` does not appear in the retrieval candidate set are dropped;
/// provenance must always point inside the evidence the model saw.
pub fn parse_answer(
    raw: &str,
    candidates: &[RetrievalCandidate],
) -> Result<AnswerDraft, AppError> {
    let parsed: LlmAnswerFormat = serde_json::from_str(raw)
        .map_err(|e| AppError::LLMParsing(format!("Failed to parse LLM answer: {e}")))?;

    let by_chunk_id: HashMap<&str, &RetrievalCandidate> = candidates
        .iter()
        .map(|c| (c.chunk.id.as_str(), c))
        .collect();

    let mut extractions = Vec::with_capacity(parsed.extractions.len());
    for extraction in parsed.extractions {
        let Some(candidate) = by_chunk_id.get(extraction.chunk_id.as_str()) else {
            warn!(
                chunk_id = %extraction.chunk_id,
                extraction_type = %extraction.extraction_type,
                "Dropping extraction with provenance outside the candidate set"
            );
            continue;
        };

        let claim_text = extraction
            .content
            .values()
            .cloned()
            .collect::<Vec<_>>()
            .join(" ");
        let supporting_text = best_supporting_sentence(&candidate.chunk.chunk_text, &claim_text);
        let char_offsets = candidate
            .chunk
            .chunk_text
            .find(&supporting_text)
            .map(|start| (start, start + supporting_text.len()));

        extractions.push(Extraction {
            extraction_type: extraction.extraction_type,
            content: extraction.content,
            provenance: Provenance {
                artifact_id: candidate.chunk.artifact_id.clone(),
                chunk_id: candidate.chunk.id.clone(),
                char_offsets,
                supporting_text,
                confidence: extraction.confidence.clamp(0.0, 1.0),
            },
        });
    }

    Ok(AnswerDraft {
        short_answer: parsed.short_answer,
        detailed_summary: parsed.detailed_summary,
        extractions,
    })
}

/// The source-chunk sentence with the highest token overlap against the
/// extraction's content.
fn best_supporting_sentence(chunk_text: &str, claim_text: &str) -> String {
    let claim_tokens: Vec<String> = tokenize(claim_text);

    let mut best: Option<(usize, &str)> = None;
    for sentence in split_sentences(chunk_text) {
        let sentence_tokens: Vec<String> = tokenize(sentence);
        let overlap = claim_tokens
            .iter()
            .filter(|t| sentence_tokens.contains(t))
            .count();

        let better = match best {
            None => true,
            Some((best_overlap, _)) => overlap > best_overlap,
        };
        if better {
            best = Some((overlap, sentence));
        }
    }

    best.map(|(_, sentence)| sentence.trim().to_owned())
        .unwrap_or_else(|| chunk_text.trim().to_owned())
}

fn split_sentences(text: &str) -> Vec<&str> {
    text.split_inclusive(['.', '!', '?'])
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .collect()
}

fn tokenize(text: &str) -> Vec<String> {
    text.split(|c: char| !c.is_alphanumeric())
        .filter(|t| t.len() > 1)
        .map(str::to_lowercase)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use common::storage::types::{artifact::ArtifactType, record_chunk::RecordChunk};

    fn candidate(id: &str, text: &str) -> RetrievalCandidate {
        let mut chunk = RecordChunk::new(
            "artifact-1".into(),
            "patient-1".into(),
            ArtifactType::Medication,
            Utc::now(),
            None,
            text.to_owned(),
        );
        chunk.id = id.to_owned();
        RetrievalCandidate {
            chunk,
            score: 0.9,
            snippet: text.to_owned(),
            highlights: Vec::new(),
            rank: 1,
        }
    }

    fn answer_json(chunk_id: &str) -> String {
        serde_json::json!({
            "short_answer": "Atorvastatin 20mg daily.",
            "detailed_summary": "- Atorvastatin 20mg, taken daily [chunk-a]",
            "extractions": [{
                "type": "medication",
                "content": {"name": "Atorvastatin", "dosage": "20mg"},
                "chunk_id": chunk_id,
                "confidence": 0.9
            }]
        })
        .to_string()
    }

    #[test]
    fn valid_answer_parses_with_provenance() {
        let candidate = candidate(
            "chunk-a",
            "Started statin therapy. Medication: Atorvastatin. Dosage: 20mg. Tolerating well.",
        );

        let draft = parse_answer(&answer_json("chunk-a"), &[candidate]).expect("parse");

        assert_eq!(draft.extractions.len(), 1);
        let provenance = &draft.extractions[0].provenance;
        assert_eq!(provenance.chunk_id, "chunk-a");
        assert_eq!(provenance.artifact_id, "artifact-1");
        assert!(provenance.supporting_text.contains("Atorvastatin"));
        assert!(provenance.char_offsets.is_some());
    }

    #[test]
    fn extraction_outside_candidate_set_is_rejected() {
        let candidate = candidate("chunk-a", "Medication: Atorvastatin. Dosage: 20mg.");

        let draft = parse_answer(&answer_json("chunk-unknown"), &[candidate]).expect("parse");

        assert!(draft.extractions.is_empty());
        assert_eq!(draft.short_answer, "Atorvastatin 20mg daily.");
    }

    #[test]
    fn supporting_text_is_the_best_overlapping_sentence() {
        let text = "Visit went well. Medication: Atorvastatin. Dosage: 20mg. Follow up in a month.";
        let best = best_supporting_sentence(text, "Atorvastatin 20mg");
        assert!(best.contains("Atorvastatin"));
        assert!(!best.contains("Visit went well"));
    }

    #[test]
    fn malformed_json_is_a_parsing_error() {
        let err = parse_answer("not json", &[]).expect_err("must fail");
        assert!(matches!(err, AppError::LLMParsing(_)));
    }

    #[test]
    fn confidence_is_clamped() {
        let candidate = candidate("chunk-a", "Medication: Atorvastatin. Dosage: 20mg.");
        let raw = serde_json::json!({
            "short_answer": "x",
            "detailed_summary": "y",
            "extractions": [{
                "type": "medication",
                "content": {"name": "Atorvastatin"},
                "chunk_id": "chunk-a",
                "confidence": 3.5
            }]
        })
        .to_string();

        let draft = parse_answer(&raw, &[candidate]).expect("parse");
        assert!((draft.extractions[0].provenance.confidence - 1.0).abs() < f32::EPSILON);
    }

    #[test]
    fn offsets_point_at_the_supporting_text() {
        let text = "Seen today. Medication: Lisinopril. Dosage: 10mg. Stable.";
        let candidate = candidate("chunk-a", text);
        let raw = serde_json::json!({
            "short_answer": "Lisinopril 10mg.",
            "detailed_summary": "- Lisinopril 10mg",
            "extractions": [{
                "type": "medication",
                "content": {"name": "Lisinopril", "dosage": "10mg"},
                "chunk_id": "chunk-a",
                "confidence": 0.8
            }]
        })
        .to_string();

        let draft = parse_answer(&raw, &[candidate]).expect("parse");
        let provenance = &draft.extractions[0].provenance;
        let (start, end) = provenance.char_offsets.expect("offsets");
        assert_eq!(&text[start..end], provenance.supporting_text);
    }
}
