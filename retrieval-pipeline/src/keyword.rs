use std::collections::{HashMap, HashSet};

/// Fixed stop-word list applied during tokenization.
const STOP_WORDS: &[&str] = &[
    "a", "an", "and", "are", "as", "at", "be", "but", "by", "for", "from", "has", "have", "in",
    "is", "it", "its", "of", "on", "or", "that", "the", "this", "to", "was", "were", "what",
    "when", "which", "who", "will", "with",
];

#[derive(Debug, Clone, Default)]
struct DocEntry {
    length: f32,
    term_frequencies: HashMap<String, f32>,
}

/// In-memory BM25 keyword index over chunk text. Document frequency maps
/// and the running average document length update incrementally as
/// documents are added or replaced.
#[derive(Debug, Clone)]
pub struct Bm25Index {
    k1: f32,
    b: f32,
    docs: HashMap<String, DocEntry>,
    document_frequencies: HashMap<String, u32>,
    total_length: f32,
}

impl Default for Bm25Index {
    fn default() -> Self {
        Self::new()
    }
}

impl Bm25Index {
    pub fn new() -> Self {
        Self::with_params(1.5, 0.75)
    }

    pub fn with_params(k1: f32, b: f32) -> Self {
        Self {
            k1,
            b,
            docs: HashMap::new(),
            document_frequencies: HashMap::new(),
            total_length: 0.0,
        }
    }

    /// Lowercases, strips non-alphanumerics, drops stop words and tokens of
    /// length <= 1.
    pub fn tokenize(text: &str) -> Vec<String> {
        text.split(|c: char| !c.is_alphanumeric())
            .map(str::to_lowercase)
            .filter(|t| t.chars().count() > 1 && !STOP_WORDS.contains(&t.as_str()))
            .collect()
    }

    pub fn len(&self) -> usize {
        self.docs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.docs.is_empty()
    }

    pub fn contains(&self, doc_id: &str) -> bool {
        self.docs.contains_key(doc_id)
    }

    /// Adds or replaces a document. Replacement keeps indexing idempotent:
    /// adding the same chunk twice leaves the statistics unchanged.
    pub fn add_document(&mut self, doc_id: &str, text: &str) {
        if self.docs.contains_key(doc_id) {
            self.remove_document(doc_id);
        }

        let tokens = Self::tokenize(text);
        // A document with zero tokens has length 1 by convention so the
        // normalization term never divides by zero.
        #[allow(clippy::cast_precision_loss)]
        let length = (tokens.len().max(1)) as f32;

        let mut term_frequencies: HashMap<String, f32> = HashMap::new();
        for token in tokens {
            *term_frequencies.entry(token).or_insert(0.0) += 1.0;
        }

        for term in term_frequencies.keys() {
            *self
                .document_frequencies
                .entry(term.clone())
                .or_insert(0) += 1;
        }

        self.total_length += length;
        self.docs.insert(
            doc_id.to_owned(),
            DocEntry {
                length,
                term_frequencies,
            },
        );
    }

    pub fn remove_document(&mut self, doc_id: &str) {
        if let Some(entry) = self.docs.remove(doc_id) {
            self.total_length -= entry.length;
            for term in entry.term_frequencies.keys() {
                if let Some(df) = self.document_frequencies.get_mut(term) {
                    *df = df.saturating_sub(1);
                    if *df == 0 {
                        self.document_frequencies.remove(term);
                    }
                }
            }
        }
    }

    /// Scores the query against every indexed document (optionally limited
    /// to `restrict_to`), returning positive scores in descending order.
    /// An empty index yields an empty result set.
    pub fn search(
        &self,
        query: &str,
        restrict_to: Option<&HashSet<String>>,
    ) -> Vec<(String, f32)> {
        if self.docs.is_empty() {
            return Vec::new();
        }

        let query_tokens = Self::tokenize(query);
        if query_tokens.is_empty() {
            return Vec::new();
        }

        #[allow(clippy::cast_precision_loss)]
        let doc_count = self.docs.len() as f32;
        let avg_length = self.total_length / doc_count;

        let mut results: Vec<(String, f32)> = self
            .docs
            .iter()
            .filter(|(id, _)| restrict_to.map_or(true, |ids| ids.contains(*id)))
            .filter_map(|(id, entry)| {
                let score = self.score_document(entry, &query_tokens, doc_count, avg_length);
                (score > 0.0).then(|| (id.clone(), score))
            })
            .collect();

        results.sort_by(|a, b| {
            b.1.partial_cmp(&a.1)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| a.0.cmp(&b.0))
        });
        results
    }

    fn score_document(
        &self,
        entry: &DocEntry,
        query_tokens: &[String],
        doc_count: f32,
        avg_length: f32,
    ) -> f32 {
        let mut score = 0.0;
        let norm = self
            .k1
            * (1.0 - self.b + self.b * entry.length / avg_length.max(f32::EPSILON));

        for token in query_tokens {
            let Some(tf) = entry.term_frequencies.get(token) else {
                continue;
            };
            #[allow(clippy::cast_precision_loss)]
            let df = self
                .document_frequencies
                .get(token)
                .copied()
                .unwrap_or(0) as f32;
            let idf = ((doc_count - df + 0.5) / (df + 0.5) + 1.0).ln();
            score += idf * (tf * (self.k1 + 1.0)) / (tf + norm);
        }

        score
    }
}
