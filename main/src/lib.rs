pub mod engine;

pub use engine::{AnswerBundle, QueryEngine, QueryOptions, SourceRef, TimingMetrics};
