use futures::future::BoxFuture;
use futures::stream::BoxStream;

use crate::error::Result;
use crate::models::{InitialAnswerStats, RunMetricsRecord};
use crate::types::{SearchOptions, SearchResponse, Section};

/// LLM invocation — streaming and complete-response variants.
///
/// Both handles in a run configuration (fast and primary) are shared,
/// re-entrant references; a handle is never exclusively owned by a branch.
pub trait LlmClient: Send + Sync + 'static {
    /// Send a prompt and receive an ordered, finite stream of text fragments.
    fn stream(&self, prompt: String) -> BoxFuture<'_, Result<BoxStream<'static, Result<String>>>>;

    /// Send a prompt and receive the complete response.
    fn invoke(&self, prompt: String) -> BoxFuture<'_, Result<String>>;
}

/// Document retrieval — the external search collaborator.
pub trait SearchProvider: Send + Sync + 'static {
    /// Run one query. An empty query is the caller's responsibility to
    /// short-circuit; providers may treat it as an error.
    fn run(
        &self,
        query: String,
        options: SearchOptions,
    ) -> BoxFuture<'_, Result<SearchResponse>>;
}

/// Document reranking — the external reranking collaborator.
pub trait Reranker: Send + Sync + 'static {
    /// Reorder sections by relevance to the query context, best first.
    fn rerank(
        &self,
        query: String,
        sections: Vec<Section>,
        num_rerank: usize,
    ) -> BoxFuture<'_, Result<Vec<Section>>>;
}

/// Persistence — append-only write of one combined metrics record per run.
pub trait MetricsStore: Send + Sync + 'static {
    fn log_run(&self, record: RunMetricsRecord) -> BoxFuture<'_, Result<()>>;
}

/// Policy deciding whether the refinement pass runs after initial synthesis.
pub trait RefinePolicy: Send + Sync + 'static {
    fn should_refine(&self, stats: &InitialAnswerStats, initial_answer_quality: bool) -> bool;
}

/// Default policy: always run the refinement pass.
#[derive(Debug, Clone, Copy, Default)]
pub struct AlwaysRefine;

impl RefinePolicy for AlwaysRefine {
    fn should_refine(&self, _stats: &InitialAnswerStats, _quality: bool) -> bool {
        true
    }
}

/// Policy that never refines — useful for single-phase runs and tests.
#[derive(Debug, Clone, Copy, Default)]
pub struct NeverRefine;

impl RefinePolicy for NeverRefine {
    fn should_refine(&self, _stats: &InitialAnswerStats, _quality: bool) -> bool {
        false
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_policies() {
        let stats = InitialAnswerStats::default();
        assert!(AlwaysRefine.should_refine(&stats, true));
        assert!(!NeverRefine.should_refine(&stats, false));
    }
}
