pub mod stages;

use async_trait::async_trait;
use common::error::AppError;
use serde::{Deserialize, Serialize};
use std::time::Instant;
use tracing::warn;

pub use stages::{PipelineContext, ScoredChunk};

/// The seven retrieval stages, in execution order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StageKind {
    MetadataFilter,
    HybridSearch,
    Scoring,
    Rerank,
    Diversify,
    TimeDecay,
    Snippet,
}

impl StageKind {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::MetadataFilter => "metadata_filter",
            Self::HybridSearch => "hybrid_search",
            Self::Scoring => "scoring",
            Self::Rerank => "rerank",
            Self::Diversify => "diversify",
            Self::TimeDecay => "time_decay",
            Self::Snippet => "snippet",
        }
    }
}

impl std::fmt::Display for StageKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Per-stage diagnostics recorded for every run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StageMetric {
    pub stage: String,
    pub duration_ms: u128,
    pub input_count: usize,
    pub output_count: usize,
    pub error: Option<String>,
}

// Pipeline stage trait
#[async_trait]
pub trait PipelineStage: Send + Sync {
    fn kind(&self) -> StageKind;
    async fn execute(&self, ctx: &mut PipelineContext<'_>) -> Result<(), AppError>;
}

pub type BoxedStage = Box<dyn PipelineStage>;

fn default_stages() -> Vec<BoxedStage> {
    vec![
        Box::new(stages::MetadataFilterStage),
        Box::new(stages::HybridSearchStage),
        Box::new(stages::ScoringStage),
        Box::new(stages::RerankStage),
        Box::new(stages::DiversifyStage),
        Box::new(stages::TimeDecayStage),
        Box::new(stages::SnippetStage),
    ]
}

/// Drives all stages over the context. A failing stage records its error
/// and forwards its input unchanged; only a deadline expiry aborts the
/// remaining stages, leaving partial results in place.
pub async fn execute(ctx: &mut PipelineContext<'_>) {
    for stage in default_stages() {
        let kind = stage.kind();
        let input_count = ctx.item_count();
        let start = Instant::now();
        let result = stage.execute(ctx).await;
        let duration_ms = start.elapsed().as_millis();

        match result {
            Ok(()) => {
                ctx.stage_metrics.push(StageMetric {
                    stage: kind.to_string(),
                    duration_ms,
                    input_count,
                    output_count: ctx.item_count(),
                    error: None,
                });
            }
            Err(err) => {
                warn!(stage = %kind, error = %err, "Retrieval stage failed; forwarding input");
                let timed_out = matches!(err, AppError::Timeout(_));
                ctx.stage_metrics.push(StageMetric {
                    stage: kind.to_string(),
                    duration_ms,
                    input_count,
                    output_count: input_count,
                    error: Some(err.to_string()),
                });

                // A dead metadata store or an expired deadline leaves
                // nothing for downstream stages to work with.
                if timed_out {
                    ctx.error = Some(err.to_string());
                    break;
                }
                if matches!(kind, StageKind::MetadataFilter | StageKind::HybridSearch)
                    && ctx.item_count() == 0
                {
                    ctx.error = Some(err.to_string());
                }
            }
        }
    }
}
