pub mod chunker;
pub mod enricher;
pub mod pipeline;
pub mod sentences;

pub use chunker::{ChunkDraft, Chunker};
pub use enricher::build_enrichment_header;
pub use pipeline::{
    EmbeddingServices, IndexOutcome, IndexReport, IndexerConfig, IndexerPipeline, IndexerServices,
};
pub use sentences::{SentenceSpan, SentenceSplitter};
