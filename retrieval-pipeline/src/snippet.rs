use crate::{keyword::Bm25Index, Highlight};

const ELLIPSIS: &str = "...";
const MIN_HIGHLIGHT_TOKEN_LEN: usize = 3;

/// Extracts a contextual snippet centered on the earliest query-token
/// occurrence, with ellipses marking truncation on either side.
pub fn extract_snippet(chunk_text: &str, query: &str, snippet_length: usize) -> String {
    if chunk_text.len() <= snippet_length {
        return chunk_text.to_owned();
    }

    let lowered = chunk_text.to_lowercase();
    let anchor = Bm25Index::tokenize(query)
        .iter()
        .filter_map(|token| lowered.find(token.as_str()))
        .min()
        .unwrap_or(0);

    let half = snippet_length / 2;
    let mut start = anchor.saturating_sub(half);
    let mut end = (start + snippet_length).min(chunk_text.len());
    if end == chunk_text.len() {
        start = end.saturating_sub(snippet_length);
    }

    // Stay on character boundaries.
    while start > 0 && !chunk_text.is_char_boundary(start) {
        start -= 1;
    }
    while end < chunk_text.len() && !chunk_text.is_char_boundary(end) {
        end += 1;
    }

    let mut snippet = String::new();
    if start > 0 {
        snippet.push_str(ELLIPSIS);
    }
    snippet.push_str(chunk_text.get(start..end).unwrap_or_default());
    if end < chunk_text.len() {
        snippet.push_str(ELLIPSIS);
    }
    snippet
}

/// Emits a highlight for every occurrence of each query token of length
/// >= 3 in the chunk text, sorted by start offset.
pub fn extract_highlights(chunk_text: &str, query: &str) -> Vec<Highlight> {
    let lowered = chunk_text.to_lowercase();
    let mut tokens: Vec<String> = Bm25Index::tokenize(query)
        .into_iter()
        .filter(|t| t.chars().count() >= MIN_HIGHLIGHT_TOKEN_LEN)
        .collect();
    tokens.sort();
    tokens.dedup();

    let mut highlights = Vec::new();
    for token in &tokens {
        let mut offset = 0;
        while let Some(found) = lowered.get(offset..).and_then(|rest| rest.find(token.as_str())) {
            let start = offset + found;
            let end = start + token.len();
            if let Some(text) = chunk_text.get(start..end) {
                highlights.push(Highlight {
                    start,
                    end,
                    text: text.to_owned(),
                });
            }
            offset = end;
        }
    }

    highlights.sort_by_key(|h| h.start);
    highlights
}
