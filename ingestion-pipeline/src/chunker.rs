use crate::sentences::{SentenceSpan, SentenceSplitter};

/// A chunk assembled from whole sentences, carrying artifact-relative
/// offsets for itself and each sentence.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChunkDraft {
    pub text: String,
    pub start: usize,
    pub end: usize,
    pub sentences: Vec<SentenceSpan>,
}

/// Packs sentences into chunks of roughly `min_words..=max_words` words.
/// Sentences are never split across chunks; a single over-long sentence
/// becomes its own chunk.
#[derive(Debug, Clone)]
pub struct Chunker {
    min_words: usize,
    max_words: usize,
    splitter: SentenceSplitter,
}

impl Default for Chunker {
    fn default() -> Self {
        Self::new(50, 150, SentenceSplitter::default())
    }
}

impl Chunker {
    pub fn new(min_words: usize, max_words: usize, splitter: SentenceSplitter) -> Self {
        let min_words = min_words.max(1);
        Self {
            min_words,
            max_words: max_words.max(min_words),
            splitter,
        }
    }

    pub fn chunk(&self, text: &str) -> Vec<ChunkDraft> {
        let sentences = self.splitter.split(text);
        if sentences.is_empty() {
            return Vec::new();
        }

        let mut chunks = Vec::new();
        let mut current: Vec<SentenceSpan> = Vec::new();
        let mut current_words = 0usize;

        for sentence in sentences {
            let words = sentence.text.split_whitespace().count();

            if !current.is_empty() && current_words + words > self.max_words {
                chunks.push(Self::assemble(text, std::mem::take(&mut current)));
                current_words = 0;
            }

            current_words += words;
            current.push(sentence);

            if current_words >= self.min_words {
                chunks.push(Self::assemble(text, std::mem::take(&mut current)));
                current_words = 0;
            }
        }

        if !current.is_empty() {
            chunks.push(Self::assemble(text, current));
        }

        chunks
    }

    fn assemble(text: &str, sentences: Vec<SentenceSpan>) -> ChunkDraft {
        let start = sentences.first().map_or(0, |s| s.start);
        let end = sentences.last().map_or(0, |s| s.end);
        ChunkDraft {
            text: text.get(start..end).unwrap_or_default().to_owned(),
            start,
            end,
            sentences,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sentence(words: usize, topic: &str) -> String {
        let mut s = String::new();
        for i in 0..words.saturating_sub(1) {
            s.push_str(topic);
            s.push_str(&i.to_string());
            s.push(' ');
        }
        s.push_str("end.");
        s
    }

    #[test]
    fn empty_text_yields_no_chunks() {
        assert!(Chunker::default().chunk("").is_empty());
        assert!(Chunker::default().chunk("   ").is_empty());
    }

    #[test]
    fn short_text_becomes_a_single_chunk() {
        let chunks = Chunker::default().chunk("BP stable. Continue plan.");
        assert_eq!(chunks.len(), 1);
        assert_eq!(chunks[0].sentences.len(), 2);
    }

    #[test]
    fn chunks_stay_within_the_word_budget() {
        let text = (0..12).map(|_| sentence(20, "word")).collect::<Vec<_>>().join(" ");
        let chunks = Chunker::default().chunk(&text);

        assert!(chunks.len() > 1);
        for chunk in &chunks {
            let words = chunk.text.split_whitespace().count();
            assert!(words <= 150, "chunk has {words} words");
        }
    }

    #[test]
    fn sentences_are_never_split_across_chunks() {
        let text = (0..10).map(|_| sentence(30, "tok")).collect::<Vec<_>>().join(" ");
        let chunks = Chunker::default().chunk(&text);

        for chunk in &chunks {
            for span in &chunk.sentences {
                assert!(span.start >= chunk.start && span.end <= chunk.end);
                assert_eq!(&text[span.start..span.end], span.text);
            }
        }
    }

    #[test]
    fn chunk_text_is_a_contiguous_slice_of_the_artifact() {
        let text = (0..6).map(|_| sentence(25, "alpha")).collect::<Vec<_>>().join(" ");
        let chunks = Chunker::default().chunk(&text);

        for chunk in &chunks {
            assert_eq!(&text[chunk.start..chunk.end], chunk.text);
        }
    }

    #[test]
    fn an_over_long_sentence_forms_its_own_chunk() {
        let big = sentence(200, "long");
        let splitter = SentenceSplitter::new(10_000);
        let chunks = Chunker::new(50, 150, splitter).chunk(&big);

        assert_eq!(chunks.len(), 1);
        assert_eq!(chunks[0].sentences.len(), 1);
    }
}
