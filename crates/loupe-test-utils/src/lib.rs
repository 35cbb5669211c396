//! Mocks and fixtures shared by Loupe unit and integration tests.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use futures::future::BoxFuture;
use futures::stream::BoxStream;
use futures::StreamExt;

use loupe_core::config::RunConfig;
use loupe_core::error::Result;
use loupe_core::models::RunMetricsRecord;
use loupe_core::traits::{LlmClient, MetricsStore, Reranker, SearchProvider};
use loupe_core::types::{SearchOptions, SearchResponse, Section};

/// Initialize tracing for tests. Safe to call repeatedly.
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .with_test_writer()
        .try_init();
}

/// Build a section fixture.
pub fn make_section(document_id: &str, chunk_ind: usize, score: f64) -> Section {
    Section {
        document_id: document_id.into(),
        chunk_ind,
        title: Some(format!("{document_id} title")),
        link: None,
        content: format!("Content of {document_id} chunk {chunk_ind}."),
        score: Some(score),
    }
}

/// LLM mock that routes prompts to responses by substring match.
///
/// Rules are checked in registration order; the first whose pattern occurs
/// in the prompt wins, otherwise the default response is returned. Routing
/// by content (instead of call order) keeps parallel-branch tests
/// deterministic.
pub struct MockLlm {
    rules: Vec<(String, String)>,
    default: String,
    calls: AtomicUsize,
    prompts: Mutex<Vec<String>>,
}

impl MockLlm {
    pub fn new(default: impl Into<String>) -> Self {
        Self {
            rules: Vec::new(),
            default: default.into(),
            calls: AtomicUsize::new(0),
            prompts: Mutex::new(Vec::new()),
        }
    }

    /// Register a substring-pattern rule.
    pub fn with_rule(mut self, pattern: impl Into<String>, response: impl Into<String>) -> Self {
        self.rules.push((pattern.into(), response.into()));
        self
    }

    /// Total number of `stream` + `invoke` calls issued.
    pub fn call_count(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    /// All prompts seen so far.
    pub fn prompts(&self) -> Vec<String> {
        self.prompts.lock().unwrap().clone()
    }

    fn respond(&self, prompt: &str) -> String {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.prompts.lock().unwrap().push(prompt.to_string());
        self.rules
            .iter()
            .find(|(pattern, _)| prompt.contains(pattern))
            .map(|(_, response)| response.clone())
            .unwrap_or_else(|| self.default.clone())
    }
}

impl LlmClient for MockLlm {
    fn stream(&self, prompt: String) -> BoxFuture<'_, Result<BoxStream<'static, Result<String>>>> {
        Box::pin(async move {
            let response = self.respond(&prompt);
            // Chunk on word boundaries, keeping delimiters, so newline
            // handling in incremental parsers gets exercised.
            let fragments: Vec<Result<String>> = response
                .split_inclusive(|c: char| c == ' ' || c == '\n')
                .map(|piece| Ok(piece.to_string()))
                .collect();
            let stream: BoxStream<'static, Result<String>> =
                futures::stream::iter(fragments).boxed();
            Ok(stream)
        })
    }

    fn invoke(&self, prompt: String) -> BoxFuture<'_, Result<String>> {
        Box::pin(async move { Ok(self.respond(&prompt)) })
    }
}

/// Search mock returning a fixed section list for every query.
pub struct MockSearch {
    sections: Vec<Section>,
    queries: Mutex<Vec<String>>,
}

impl MockSearch {
    pub fn new(sections: Vec<Section>) -> Self {
        Self {
            sections,
            queries: Mutex::new(Vec::new()),
        }
    }

    pub fn empty() -> Self {
        Self::new(Vec::new())
    }

    /// All queries issued so far.
    pub fn queries(&self) -> Vec<String> {
        self.queries.lock().unwrap().clone()
    }
}

impl SearchProvider for MockSearch {
    fn run(
        &self,
        query: String,
        options: SearchOptions,
    ) -> BoxFuture<'_, Result<SearchResponse>> {
        Box::pin(async move {
            self.queries.lock().unwrap().push(query);
            let mut top_sections = self.sections.clone();
            top_sections.truncate(options.max_results);
            Ok(SearchResponse {
                top_sections,
                applied_filters: Default::default(),
            })
        })
    }
}

/// Reranker mock that reverses the input order (a visible reordering).
#[derive(Default)]
pub struct ReversingReranker {
    calls: AtomicUsize,
}

impl ReversingReranker {
    pub fn call_count(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

impl Reranker for ReversingReranker {
    fn rerank(
        &self,
        _query: String,
        mut sections: Vec<Section>,
        num_rerank: usize,
    ) -> BoxFuture<'_, Result<Vec<Section>>> {
        Box::pin(async move {
            self.calls.fetch_add(1, Ordering::SeqCst);
            sections.reverse();
            sections.truncate(num_rerank);
            Ok(sections)
        })
    }
}

/// Metrics sink recording every logged run in memory.
#[derive(Default)]
pub struct RecordingMetrics {
    records: Mutex<Vec<RunMetricsRecord>>,
}

impl RecordingMetrics {
    pub fn records(&self) -> Vec<RunMetricsRecord> {
        self.records.lock().unwrap().clone()
    }
}

impl MetricsStore for RecordingMetrics {
    fn log_run(&self, record: RunMetricsRecord) -> BoxFuture<'_, Result<()>> {
        Box::pin(async move {
            self.records.lock().unwrap().push(record);
            Ok(())
        })
    }
}

/// A minimal run configuration over mock collaborators.
pub fn test_config(query: &str) -> RunConfig {
    RunConfig::new(
        query,
        Arc::new(MockLlm::new("ok")),
        Arc::new(MockLlm::new("ok")),
        Arc::new(MockSearch::empty()),
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_mock_llm_routing() {
        let llm = MockLlm::new("default answer").with_rule("decompose", "q1\nq2");
        assert_eq!(
            llm.invoke("please decompose this".into()).await.unwrap(),
            "q1\nq2"
        );
        assert_eq!(llm.invoke("other".into()).await.unwrap(), "default answer");
        assert_eq!(llm.call_count(), 2);
    }

    #[tokio::test]
    async fn test_mock_llm_stream_reassembles() {
        let llm = MockLlm::new("one two\nthree");
        let mut stream = llm.stream("x".into()).await.unwrap();
        let mut text = String::new();
        while let Some(fragment) = stream.next().await {
            text.push_str(&fragment.unwrap());
        }
        assert_eq!(text, "one two\nthree");
    }

    #[tokio::test]
    async fn test_mock_search_truncates() {
        let search = MockSearch::new(vec![
            make_section("d1", 0, 0.9),
            make_section("d2", 0, 0.8),
            make_section("d3", 0, 0.7),
        ]);
        let response = search
            .run(
                "q".into(),
                SearchOptions {
                    max_results: 2,
                    skip_rerank: true,
                },
            )
            .await
            .unwrap();
        assert_eq!(response.top_sections.len(), 2);
        assert_eq!(search.queries(), vec!["q"]);
    }
}
