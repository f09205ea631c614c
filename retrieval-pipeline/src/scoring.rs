use chrono::{DateTime, Utc};
use std::cmp::Ordering;
use std::collections::HashSet;

use crate::keyword::Bm25Index;

/// Weights of the combined relevance score.
const SEMANTIC_WEIGHT: f32 = 0.50;
const KEYWORD_WEIGHT: f32 = 0.25;
const RECENCY_WEIGHT: f32 = 0.15;
const QUALITY_WEIGHT: f32 = 0.10;

const EXACT_MATCH_CREDIT: f32 = 0.3;
const PARTIAL_MATCH_CREDIT: f32 = 0.1;

pub const fn clamp_unit(value: f32) -> f32 {
    value.clamp(0.0, 1.0)
}

/// Linear remap of raw cosine similarity so that `low` maps to 0 and
/// `high` maps to 1, clamped to the unit interval. The endpoints are
/// empirically tuned and kept configurable.
pub fn remap_similarity(similarity: f32, low: f32, high: f32) -> f32 {
    if !similarity.is_finite() || (high - low).abs() < f32::EPSILON {
        return 0.0;
    }
    clamp_unit((similarity - low) / (high - low))
}

/// Age-based recency: 1.0 within 30 days, linear to 0.5 at 365 days,
/// linear to 0.0 at 730 days.
pub fn recency_score(occurred_at: DateTime<Utc>, now: DateTime<Utc>) -> f32 {
    #[allow(clippy::cast_precision_loss)]
    let age_days = (now - occurred_at).num_days().max(0) as f32;

    if age_days <= 30.0 {
        1.0
    } else if age_days <= 365.0 {
        1.0 - 0.5 * (age_days - 30.0) / 335.0
    } else if age_days <= 730.0 {
        0.5 - 0.5 * (age_days - 365.0) / 365.0
    } else {
        0.0
    }
}

/// Content-quality heuristic peaking for chunks of 50-150 words.
pub fn quality_score(text: &str) -> f32 {
    #[allow(clippy::cast_precision_loss)]
    let words = text.split_whitespace().count() as f32;

    if words < 1.0 {
        0.0
    } else if words < 50.0 {
        words / 50.0
    } else if words <= 150.0 {
        1.0
    } else {
        150.0 / words
    }
}

/// Exact/partial keyword credit: a query token earns 0.3 when it appears
/// verbatim among the chunk tokens, else 0.1 when contained inside a longer
/// chunk token; each token counts at most once. Capped at 1.0.
pub fn keyword_component(query: &str, chunk_text: &str) -> f32 {
    let query_tokens = Bm25Index::tokenize(query);
    if query_tokens.is_empty() {
        return 0.0;
    }

    let chunk_tokens: HashSet<String> = Bm25Index::tokenize(chunk_text).into_iter().collect();

    let mut credit = 0.0f32;
    for token in &query_tokens {
        if chunk_tokens.contains(token) {
            credit += EXACT_MATCH_CREDIT;
        } else if chunk_tokens.iter().any(|ct| ct.contains(token.as_str())) {
            credit += PARTIAL_MATCH_CREDIT;
        }
    }

    credit.min(1.0)
}

/// Inputs to the combined relevance score.
#[derive(Debug, Clone, Copy)]
pub struct ScoreComponents {
    pub semantic: f32,
    pub keyword: f32,
    pub recency: f32,
    pub quality: f32,
}

pub fn combine(components: ScoreComponents) -> f32 {
    clamp_unit(
        components.semantic * SEMANTIC_WEIGHT
            + components.keyword * KEYWORD_WEIGHT
            + components.recency * RECENCY_WEIGHT
            + components.quality * QUALITY_WEIGHT,
    )
}

/// Min-max normalization into [0,1]; a constant score list maps to 1.0.
pub fn min_max_normalize(scores: &[f32]) -> Vec<f32> {
    if scores.is_empty() {
        return Vec::new();
    }

    let mut min = f32::MAX;
    let mut max = f32::MIN;

    for s in scores {
        if !s.is_finite() {
            continue;
        }
        if *s < min {
            min = *s;
        }
        if *s > max {
            max = *s;
        }
    }

    if !min.is_finite() || !max.is_finite() {
        return scores.iter().map(|_| 0.0).collect();
    }

    if (max - min).abs() < f32::EPSILON {
        return vec![1.0; scores.len()];
    }

    scores
        .iter()
        .map(|score| {
            if score.is_finite() {
                clamp_unit((score - min) / (max - min))
            } else {
                0.0
            }
        })
        .collect()
}

/// Token-set Jaccard similarity used by the diversification stage.
pub fn jaccard_similarity(a: &str, b: &str) -> f32 {
    let set_a: HashSet<String> = Bm25Index::tokenize(a).into_iter().collect();
    let set_b: HashSet<String> = Bm25Index::tokenize(b).into_iter().collect();

    if set_a.is_empty() && set_b.is_empty() {
        return 0.0;
    }

    #[allow(clippy::cast_precision_loss)]
    let intersection = set_a.intersection(&set_b).count() as f32;
    #[allow(clippy::cast_precision_loss)]
    let union = set_a.union(&set_b).count() as f32;

    intersection / union
}

/// Descending-score sort with a stable id tiebreak.
pub fn sort_by_score_desc<T, F>(items: &mut [T], score_of: F, id_of: impl Fn(&T) -> String)
where
    F: Fn(&T) -> f32,
{
    items.sort_by(|a, b| {
        score_of(b)
            .partial_cmp(&score_of(a))
            .unwrap_or(Ordering::Equal)
            .then_with(|| id_of(a).cmp(&id_of(b)))
    });
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    #[test]
    fn remap_pins_the_configured_endpoints() {
        assert!(remap_similarity(0.5, 0.5, 0.8).abs() < f32::EPSILON);
        assert!((remap_similarity(0.8, 0.5, 0.8) - 1.0).abs() < f32::EPSILON);
        assert!((remap_similarity(0.65, 0.5, 0.8) - 0.5).abs() < 1e-6);
    }

    #[test]
    fn remap_clamps_outside_the_band() {
        assert!(remap_similarity(0.2, 0.5, 0.8).abs() < f32::EPSILON);
        assert!((remap_similarity(0.95, 0.5, 0.8) - 1.0).abs() < f32::EPSILON);
    }

    #[test]
    fn recency_matches_the_specified_knots() {
        let now = Utc::now();
        assert!((recency_score(now, now) - 1.0).abs() < f32::EPSILON);
        assert!((recency_score(now - Duration::days(30), now) - 1.0).abs() < f32::EPSILON);
        assert!((recency_score(now - Duration::days(365), now) - 0.5).abs() < 1e-3);
        assert!(recency_score(now - Duration::days(730), now).abs() < 1e-3);
        assert!(recency_score(now - Duration::days(1000), now).abs() < f32::EPSILON);
    }

    #[test]
    fn quality_peaks_between_fifty_and_one_hundred_fifty_words() {
        let short = "word ".repeat(25);
        let ideal = "word ".repeat(100);
        let long = "word ".repeat(300);

        assert!((quality_score(&short) - 0.5).abs() < f32::EPSILON);
        assert!((quality_score(&ideal) - 1.0).abs() < f32::EPSILON);
        assert!((quality_score(&long) - 0.5).abs() < f32::EPSILON);
    }

    #[test]
    fn keyword_component_credits_exact_over_partial() {
        let exact = keyword_component("metformin", "Medication: Metformin 500mg");
        let partial = keyword_component("met", "Medication: Metformin 500mg");

        assert!((exact - 0.3).abs() < f32::EPSILON);
        assert!((partial - 0.1).abs() < f32::EPSILON);
    }

    #[test]
    fn keyword_component_caps_at_one() {
        let query = "one two three four five six seven eight nine ten eleven twelve";
        let text = query;
        assert!((keyword_component(query, text) - 1.0).abs() < f32::EPSILON);
    }

    #[test]
    fn combine_weights_sum_to_the_expected_score() {
        let score = combine(ScoreComponents {
            semantic: 1.0,
            keyword: 1.0,
            recency: 1.0,
            quality: 1.0,
        });
        assert!((score - 1.0).abs() < f32::EPSILON);

        let half = combine(ScoreComponents {
            semantic: 1.0,
            keyword: 0.0,
            recency: 0.0,
            quality: 0.0,
        });
        assert!((half - 0.5).abs() < f32::EPSILON);
    }

    #[test]
    fn jaccard_of_identical_texts_is_one() {
        let text = "lisinopril ten milligrams daily morning";
        assert!((jaccard_similarity(text, text) - 1.0).abs() < f32::EPSILON);
    }

    #[test]
    fn jaccard_of_disjoint_texts_is_zero() {
        assert!(jaccard_similarity("aspirin daily", "warfarin weekly").abs() < f32::EPSILON);
    }
}
