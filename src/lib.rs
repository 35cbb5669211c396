//! Loupe — a multi-step agentic question-answering pipeline over a RAG
//! search backend.
//!
//! A run decomposes the user question into sub-questions, answers each in
//! a parallel branch (query expansion, retrieval, verification, reranking,
//! generation, grading), merges the branch results, synthesizes an initial
//! answer, and — subject to a pluggable policy — performs a refinement
//! pass before writing a metrics record. Progress and answer tokens are
//! streamed to the consumer as typed packets.
//!
//! ```no_run
//! use std::sync::Arc;
//! use loupe::{run_pipeline, RunConfig};
//! # async fn example(
//! #     fast: Arc<dyn loupe::LlmClient>,
//! #     primary: Arc<dyn loupe::LlmClient>,
//! #     search: Arc<dyn loupe::SearchProvider>,
//! # ) -> loupe::Result<()> {
//! let config = RunConfig::new("what is x?", fast, primary, search);
//! let mut stream = run_pipeline(config)?;
//! while let Some(packet) = stream.next_packet().await {
//!     println!("{packet:?}");
//! }
//! let state = stream.finish().await?;
//! println!("{}", state.initial_answer.unwrap_or_default());
//! # Ok(())
//! # }
//! ```

mod run;

pub use run::{compiled_main_graph, reset_compiled_graph, run_pipeline, SEARCH_TOOL_NAME};

pub use loupe_core::config::{PipelineSettings, RerankSettings, RunConfig};
pub use loupe_core::error::{LoupeError, Result};
pub use loupe_core::models::{
    CombinedMetrics, EntityTermExtraction, InitialAnswerStats, RefinedAnswerStats,
    RunMetricsRecord,
};
pub use loupe_core::traits::{
    AlwaysRefine, LlmClient, MetricsStore, NeverRefine, RefinePolicy, Reranker, SearchProvider,
};
pub use loupe_core::types::{
    QuestionAnswerResult, QuestionId, RetrievalStats, SearchOptions, SearchResponse, Section,
    StreamPacket, UNKNOWN_ANSWER,
};
pub use loupe_graph::stream::AnswerStream;
pub use loupe_memory::SqliteMetricsStore;
pub use loupe_nodes::MainState;
