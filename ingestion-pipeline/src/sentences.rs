use std::collections::HashSet;

/// Abbreviations that must not terminate a sentence. Compared without the
/// trailing period, case-insensitively.
const DEFAULT_ABBREVIATIONS: &[&str] = &[
    "dr", "mr", "mrs", "ms", "prof", "st", "jr", "sr", "vs", "etc", "approx", "dept", "mg",
    "mcg", "ml", "oz", "tab", "tabs", "cap", "caps", "inj", "resp", "temp", "wt", "ht", "pt",
    "no", "vol",
];

/// One sentence with half-open character offsets into the input text.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SentenceSpan {
    pub text: String,
    pub start: usize,
    pub end: usize,
}

/// Sentence segmentation aware of clinical abbreviations. Long sentences
/// split on clause delimiters and are hard-capped at a maximum length.
#[derive(Debug, Clone)]
pub struct SentenceSplitter {
    abbreviations: HashSet<String>,
    max_sentence_chars: usize,
}

impl Default for SentenceSplitter {
    fn default() -> Self {
        Self::new(400)
    }
}

impl SentenceSplitter {
    pub fn new(max_sentence_chars: usize) -> Self {
        Self {
            abbreviations: DEFAULT_ABBREVIATIONS
                .iter()
                .map(|a| (*a).to_owned())
                .collect(),
            max_sentence_chars: max_sentence_chars.max(40),
        }
    }

    pub fn split(&self, text: &str) -> Vec<SentenceSpan> {
        let chars: Vec<(usize, char)> = text.char_indices().collect();
        let mut spans = Vec::new();
        let mut sentence_start: Option<usize> = None;

        for (position, &(byte_offset, c)) in chars.iter().enumerate() {
            if sentence_start.is_none() && !c.is_whitespace() {
                sentence_start = Some(byte_offset);
            }

            let is_terminator = matches!(c, '.' | '!' | '?');
            if !is_terminator {
                continue;
            }

            let next = chars.get(position + 1).map(|&(_, ch)| ch);
            let boundary = match next {
                None => true,
                Some(ch) if ch.is_whitespace() => {
                    !(c == '.' && self.is_abbreviation_before(text, byte_offset))
                }
                // Decimal points ("6.1"), inner periods of "b.i.d." etc.
                Some(_) => false,
            };

            if boundary {
                if let Some(start) = sentence_start.take() {
                    let end = byte_offset + c.len_utf8();
                    self.push_capped(text, start, end, &mut spans);
                }
            }
        }

        // Trailing text without a terminator still forms a sentence.
        if let Some(start) = sentence_start {
            let end = text.len();
            let tail = text.get(start..end).unwrap_or_default();
            if !tail.trim().is_empty() {
                self.push_capped(text, start, end, &mut spans);
            }
        }

        spans
    }

    /// True when the word immediately before the period at `dot_offset` is a
    /// known abbreviation or a single letter (as in "b.i.d.").
    fn is_abbreviation_before(&self, text: &str, dot_offset: usize) -> bool {
        let before = text.get(..dot_offset).unwrap_or_default();
        let word: String = before
            .chars()
            .rev()
            .take_while(|c| c.is_alphanumeric())
            .collect::<Vec<_>>()
            .into_iter()
            .rev()
            .collect();

        if word.is_empty() {
            return false;
        }
        if word.chars().count() == 1 && word.chars().all(char::is_alphabetic) {
            return true;
        }
        self.abbreviations.contains(&word.to_lowercase())
    }

    /// Emits the span, splitting on clause delimiters when it exceeds the
    /// maximum length.
    fn push_capped(&self, text: &str, start: usize, end: usize, spans: &mut Vec<SentenceSpan>) {
        let slice = text.get(start..end).unwrap_or_default();
        if slice.chars().count() <= self.max_sentence_chars {
            spans.push(SentenceSpan {
                text: slice.to_owned(),
                start,
                end,
            });
            return;
        }

        let mut piece_start = start;
        while piece_start < end {
            let remaining = text.get(piece_start..end).unwrap_or_default();
            if remaining.chars().count() <= self.max_sentence_chars {
                spans.push(SentenceSpan {
                    text: remaining.to_owned(),
                    start: piece_start,
                    end,
                });
                break;
            }

            let window_end = char_floor(remaining, self.max_sentence_chars);
            let window = remaining.get(..window_end).unwrap_or_default();
            let cut = window
                .rfind([',', ';', ':'])
                .map_or(window_end, |delim| delim + 1);

            let piece_end = piece_start + cut.max(1);
            let piece = text.get(piece_start..piece_end).unwrap_or_default();
            if !piece.trim().is_empty() {
                spans.push(SentenceSpan {
                    text: piece.to_owned(),
                    start: piece_start,
                    end: piece_end,
                });
            }

            piece_start = piece_end;
            // Skip leading whitespace of the next piece.
            while piece_start < end && !text.is_char_boundary(piece_start) {
                piece_start += 1;
            }
            let rest = text.get(piece_start..end).unwrap_or_default();
            let trimmed = rest.len() - rest.trim_start().len();
            piece_start += trimmed;
        }
    }
}

/// Largest byte offset covering at most `max_chars` characters.
fn char_floor(text: &str, max_chars: usize) -> usize {
    text.char_indices()
        .nth(max_chars)
        .map_or(text.len(), |(offset, _)| offset)
}
