use common::{error::AppError, utils::embedding::cosine_similarity};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::AnswerEmbedder;

const DETECTION_THRESHOLD: f32 = 0.30;
const VARIANCE_THRESHOLD: f32 = 0.40;
pub const MIN_SELF_CHECK_SAMPLES: usize = 2;
pub const MAX_SELF_CHECK_SAMPLES: usize = 5;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RiskLevel {
    VeryLow,
    Low,
    Medium,
    High,
    VeryHigh,
}

impl RiskLevel {
    pub fn for_risk(risk: f32) -> Self {
        if risk < 0.1 {
            Self::VeryLow
        } else if risk < 0.2 {
            Self::Low
        } else if risk < 0.4 {
            Self::Medium
        } else if risk < 0.7 {
            Self::High
        } else {
            Self::VeryHigh
        }
    }

    pub const fn as_str(self) -> &'static str {
        match self {
            Self::VeryLow => "very_low",
            Self::Low => "low",
            Self::Medium => "medium",
            Self::High => "high",
            Self::VeryHigh => "very_high",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HallucinationReport {
    pub risk: f32,
    pub risk_level: RiskLevel,
    pub detected: bool,
    pub method: String,
    pub semantic_consistency: Option<f32>,
    pub sample_count: Option<usize>,
}

/// Primary path: composite risk from the three quality scores.
pub fn assess(grounding_score: f32, consistency_score: f32, confidence_score: f32) -> HallucinationReport {
    let risk = (0.40 * (1.0 - grounding_score)
        + 0.30 * (1.0 - consistency_score)
        + 0.30 * (1.0 - confidence_score))
        .clamp(0.0, 1.0);

    let report = HallucinationReport {
        risk,
        risk_level: RiskLevel::for_risk(risk),
        detected: risk > DETECTION_THRESHOLD,
        method: "score_composite".to_owned(),
        semantic_consistency: None,
        sample_count: None,
    };

    debug!(
        risk,
        level = report.risk_level.as_str(),
        detected = report.detected,
        "Hallucination risk assessed"
    );

    report
}

/// Sampling seam for the SelfCheckGPT path: regenerate the answer at a
/// given temperature.
#[async_trait::async_trait]
pub trait AnswerSampler: Send + Sync {
    async fn sample(&self, temperature: f32) -> Result<String, AppError>;
}

/// Optional SelfCheckGPT path: regenerate the answer at stepped
/// temperatures, embed every sample, and measure pairwise agreement.
/// Disagreement (variance above 0.40) flags the answer.
pub async fn self_check(
    sampler: &dyn AnswerSampler,
    embedder: &dyn AnswerEmbedder,
    sample_count: usize,
    base_temperature: f32,
    temperature_step: f32,
) -> Result<HallucinationReport, AppError> {
    let sample_count = sample_count.clamp(MIN_SELF_CHECK_SAMPLES, MAX_SELF_CHECK_SAMPLES);

    let mut embeddings = Vec::with_capacity(sample_count);
    for i in 0..sample_count {
        #[allow(clippy::cast_precision_loss)]
        let temperature = temperature_step.mul_add(i as f32, base_temperature);
        let sample = sampler.sample(temperature).await?;
        embeddings.push(embedder.embed(&sample).await?);
    }

    let mut pair_count = 0usize;
    let mut similarity_sum = 0.0f32;
    for i in 0..embeddings.len() {
        for j in (i + 1)..embeddings.len() {
            similarity_sum += cosine_similarity(&embeddings[i], &embeddings[j]);
            pair_count += 1;
        }
    }

    #[allow(clippy::cast_precision_loss)]
    let semantic_consistency = if pair_count == 0 {
        1.0
    } else {
        (similarity_sum / pair_count as f32).clamp(0.0, 1.0)
    };
    let variance = 1.0 - semantic_consistency;

    Ok(HallucinationReport {
        risk: variance,
        risk_level: RiskLevel::for_risk(variance),
        detected: variance > VARIANCE_THRESHOLD,
        method: "self_check".to_owned(),
        semantic_consistency: Some(semantic_consistency),
        sample_count: Some(sample_count),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn perfect_scores_mean_zero_risk() {
        let report = assess(1.0, 1.0, 1.0);
        assert!(report.risk.abs() < f32::EPSILON);
        assert_eq!(report.risk_level, RiskLevel::VeryLow);
        assert!(!report.detected);
    }

    #[test]
    fn risk_formula_matches_the_weights() {
        let report = assess(0.5, 1.0, 1.0);
        assert!((report.risk - 0.2).abs() < 1e-6);
        assert_eq!(report.risk_level, RiskLevel::Medium);
        assert!(!report.detected);
    }

    #[test]
    fn poor_grounding_trips_detection() {
        let report = assess(0.1, 0.8, 0.7);
        // 0.4*0.9 + 0.3*0.2 + 0.3*0.3 = 0.51
        assert!((report.risk - 0.51).abs() < 1e-6);
        assert!(report.detected);
        assert_eq!(report.risk_level, RiskLevel::High);
    }

    #[test]
    fn risk_levels_follow_the_bands() {
        assert_eq!(RiskLevel::for_risk(0.05), RiskLevel::VeryLow);
        assert_eq!(RiskLevel::for_risk(0.15), RiskLevel::Low);
        assert_eq!(RiskLevel::for_risk(0.3), RiskLevel::Medium);
        assert_eq!(RiskLevel::for_risk(0.5), RiskLevel::High);
        assert_eq!(RiskLevel::for_risk(0.9), RiskLevel::VeryHigh);
    }

    struct FixedSampler;

    #[async_trait::async_trait]
    impl AnswerSampler for FixedSampler {
        async fn sample(&self, temperature: f32) -> Result<String, AppError> {
            Ok(format!("sample at {temperature}"))
        }
    }

    struct AgreeingEmbedder;

    #[async_trait::async_trait]
    impl AnswerEmbedder for AgreeingEmbedder {
        async fn embed(&self, _text: &str) -> Result<Vec<f32>, AppError> {
            Ok(vec![1.0, 0.0, 0.0])
        }
    }

    struct DisagreeingEmbedder {
        counter: std::sync::atomic::AtomicUsize,
    }

    #[async_trait::async_trait]
    impl AnswerEmbedder for DisagreeingEmbedder {
        async fn embed(&self, _text: &str) -> Result<Vec<f32>, AppError> {
            let n = self
                .counter
                .fetch_add(1, std::sync::atomic::Ordering::SeqCst);
            // Orthogonal directions: every pair disagrees completely.
            let mut v = vec![0.0; 8];
            if let Some(slot) = v.get_mut(n % 8) {
                *slot = 1.0;
            }
            Ok(v)
        }
    }

    #[tokio::test]
    async fn agreeing_samples_pass_the_self_check() {
        let report = self_check(&FixedSampler, &AgreeingEmbedder, 3, 0.3, 0.2)
            .await
            .expect("self check");

        assert!((report.semantic_consistency.unwrap() - 1.0).abs() < 1e-6);
        assert!(!report.detected);
        assert_eq!(report.sample_count, Some(3));
        assert_eq!(report.method, "self_check");
    }

    #[tokio::test]
    async fn disagreeing_samples_trip_the_self_check() {
        let embedder = DisagreeingEmbedder {
            counter: std::sync::atomic::AtomicUsize::new(0),
        };
        let report = self_check(&FixedSampler, &embedder, 3, 0.3, 0.2)
            .await
            .expect("self check");

        assert!(report.semantic_consistency.unwrap() < 0.1);
        assert!(report.detected);
    }

    #[tokio::test]
    async fn sample_count_is_clamped_to_the_allowed_band() {
        let report = self_check(&FixedSampler, &AgreeingEmbedder, 9, 0.3, 0.2)
            .await
            .expect("self check");
        assert_eq!(report.sample_count, Some(MAX_SELF_CHECK_SAMPLES));

        let report = self_check(&FixedSampler, &AgreeingEmbedder, 0, 0.3, 0.2)
            .await
            .expect("self check");
        assert_eq!(report.sample_count, Some(MIN_SELF_CHECK_SAMPLES));
    }
}
