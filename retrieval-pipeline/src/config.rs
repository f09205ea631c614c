use serde::{Deserialize, Serialize};

/// Tunable parameters that govern each retrieval stage.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RetrievalTuning {
    /// Hybrid blend weight: `alpha * semantic + (1 - alpha) * keyword`.
    pub alpha: f32,
    /// Final candidate count; hybrid search keeps `2 * top_k` for scoring.
    pub top_k: usize,
    /// Endpoints of the linear similarity remap applied before weighting.
    pub sim_remap_low: f32,
    pub sim_remap_high: f32,
    pub rerank_enabled: bool,
    pub rerank_blend_weight: f32,
    pub diversify_enabled: bool,
    pub diversity_threshold: f32,
    pub diversity_penalty: f32,
    pub time_decay_enabled: bool,
    pub snippet_length: usize,
    /// Per-request deadline propagated into every suspension point.
    pub deadline_ms: Option<u64>,
}

impl Default for RetrievalTuning {
    fn default() -> Self {
        Self {
            alpha: 0.7,
            top_k: 10,
            sim_remap_low: 0.5,
            sim_remap_high: 0.8,
            rerank_enabled: true,
            rerank_blend_weight: 0.65,
            diversify_enabled: true,
            diversity_threshold: 0.85,
            diversity_penalty: 0.7,
            time_decay_enabled: true,
            snippet_length: 200,
            deadline_ms: None,
        }
    }
}

impl RetrievalTuning {
    pub fn with_top_k(mut self, top_k: usize) -> Self {
        self.top_k = top_k.max(1);
        self
    }
}
