use std::collections::BTreeMap;
use std::fmt::Write;

use chrono::{DateTime, Utc};
use query_understanding::{QueryIntent, StructuredQuery};
use retrieval_pipeline::RetrievalCandidate;

/// Maximum number of context chunks placed in the prompt.
pub const MAX_CONTEXT_CHUNKS: usize = 10;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReasoningStyle {
    Concise,
    Detailed,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PromptBundle {
    pub system: String,
    pub user: String,
}

const SYSTEM_PROMPT: &str = "\
You are a clinical records assistant answering questions about one patient's \
medical record. Follow these rules strictly:
- Answer only from the numbered source excerpts provided; never invent facts.
- Every factual claim must cite the chunk id of the excerpt supporting it.
- Keep the short answer and the detailed summary internally consistent; any \
count or status stated in one must match the other.
- Distinguish current from historical information: prefer the most recent \
excerpt when sources conflict, and state when something was discontinued or \
resolved.
- If the sources do not answer the question, say so instead of guessing.";

/// Assembles system prompt, grouped context, user query, and
/// intent-specific reasoning instructions.
pub fn build_prompt(
    query: &StructuredQuery,
    candidates: &[RetrievalCandidate],
    now: DateTime<Utc>,
    style: ReasoningStyle,
) -> PromptBundle {
    let mut user = String::new();

    user.push_str("Source excerpts from the patient's record, grouped by type:\n");
    user.push_str("==================\n");
    write_context(&mut user, candidates, now);

    user.push_str("\nUser Question:\n==================\n");
    user.push_str(&emphasized_query(query));
    user.push('\n');

    user.push_str("\nInstructions:\n==================\n");
    write_instructions(&mut user, query, style);

    PromptBundle {
        system: SYSTEM_PROMPT.to_owned(),
        user,
    }
}

fn write_context(out: &mut String, candidates: &[RetrievalCandidate], now: DateTime<Utc>) {
    let mut grouped: BTreeMap<String, Vec<&RetrievalCandidate>> = BTreeMap::new();
    for candidate in candidates.iter().take(MAX_CONTEXT_CHUNKS) {
        grouped
            .entry(candidate.chunk.artifact_type.as_str().to_owned())
            .or_default()
            .push(candidate);
    }

    if grouped.is_empty() {
        out.push_str("(no matching records)\n");
        return;
    }

    for (artifact_type, group) in grouped {
        let _ = writeln!(out, "## {artifact_type}");
        for candidate in group {
            let age = humanize_age(candidate.chunk.occurred_at, now);
            let author = candidate
                .chunk
                .author
                .as_deref()
                .map(|a| format!(", author: {a}"))
                .unwrap_or_default();
            let _ = writeln!(
                out,
                "[chunk {id}] ({age}{author}, relevance {score:.2})",
                id = candidate.chunk.id,
                score = candidate.score,
            );
            // Enriched text carries the related-conditions/medications
            // headers resolved at indexing time.
            let _ = writeln!(out, "{}", candidate.chunk.context_text());
        }
    }
}

fn emphasized_query(query: &StructuredQuery) -> String {
    let mut text = query.original_query.clone();
    for entity in &query.entities {
        let lowered = text.to_lowercase();
        if let Some(position) = lowered.find(&entity.value) {
            let end = position + entity.value.len();
            let original = text.get(position..end).unwrap_or(&entity.value).to_owned();
            text.replace_range(position..end, &format!("**{original}**"));
        }
    }
    text
}

fn write_instructions(out: &mut String, query: &StructuredQuery, style: ReasoningStyle) {
    let constraints = query.constraints;
    let _ = writeln!(
        out,
        "- Short answer: at most {} words.",
        constraints.max_short_answer_words
    );
    let _ = writeln!(
        out,
        "- Detailed summary: around {} bullet points, citing at least {} distinct sources when available.",
        constraints.summary_bullets, constraints.min_sources
    );
    if constraints.include_reasoning {
        out.push_str("- Walk through your clinical reasoning in the detailed summary.\n");
    } else {
        out.push_str("- Do not include reasoning steps; state the answer directly.\n");
    }

    match style {
        ReasoningStyle::Concise => {
            out.push_str("- Keep explanations brief.\n");
        }
        ReasoningStyle::Detailed => {
            out.push_str("- Expand on clinically relevant context.\n");
        }
    }

    match query.intent {
        QueryIntent::RetrieveMedications => {
            out.push_str(
                "- Deduplicate medications by normalized name, use the most recent \
                 occurrence of each, and report a count that matches across the \
                 short answer and the detailed summary.\n",
            );
        }
        QueryIntent::Comparison => {
            out.push_str(
                "- Compare values across the time periods involved and state the \
                 direction of change explicitly.\n",
            );
        }
        QueryIntent::Summary => {
            out.push_str("- Cover each artifact type present in the sources.\n");
        }
        _ => {}
    }

    if let Some(window) = &query.temporal_filter {
        let _ = writeln!(
            out,
            "- Only use information from the period \"{}\"; treat anything outside it as historical context.",
            window.label
        );
    }
}

/// Coarse temporal phrasing used to annotate context chunks.
pub fn humanize_age(occurred_at: DateTime<Utc>, now: DateTime<Utc>) -> String {
    let days = (now - occurred_at).num_days();
    if days <= 0 {
        "today".to_owned()
    } else if days == 1 {
        "yesterday".to_owned()
    } else if days < 14 {
        format!("{days} days ago")
    } else if days < 60 {
        format!("{} weeks ago", days / 7)
    } else if days < 730 {
        format!("{} months ago", days / 30)
    } else {
        format!("{} years ago", days / 365)
    }
}
