use std::sync::Arc;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::{LoupeError, Result};
use crate::traits::{AlwaysRefine, LlmClient, MetricsStore, RefinePolicy, Reranker, SearchProvider};

/// Tunable pipeline settings, loadable from TOML.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineSettings {
    /// Maximum sections kept from one retrieval call.
    #[serde(default = "default_max_query_retrieval_results")]
    pub max_query_retrieval_results: usize,
    /// Maximum sections kept after reranking.
    #[serde(default = "default_max_reranked_results")]
    pub max_reranked_results: usize,
    /// Number of rewritten retrieval queries per sub-question.
    #[serde(default = "default_num_expanded_queries")]
    pub num_expanded_queries: usize,
    /// Collect per-retrieval fit-score stats (off by default).
    #[serde(default)]
    pub collect_retrieval_stats: bool,
    /// Collect rerank fit-score stats (off by default).
    #[serde(default)]
    pub collect_rerank_stats: bool,
    /// Rerank settings; reranking is skipped entirely when absent.
    #[serde(default)]
    pub rerank: Option<RerankSettings>,
    /// Capacity of the bounded event channel feeding the packet stream.
    #[serde(default = "default_event_channel_capacity")]
    pub event_channel_capacity: usize,
}

/// Settings for the external reranking collaborator.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RerankSettings {
    #[serde(default)]
    pub model_name: Option<String>,
    #[serde(default = "default_num_rerank")]
    pub num_rerank: usize,
}

fn default_max_query_retrieval_results() -> usize {
    15
}

fn default_max_reranked_results() -> usize {
    10
}

fn default_num_expanded_queries() -> usize {
    3
}

fn default_event_channel_capacity() -> usize {
    256
}

fn default_num_rerank() -> usize {
    10
}

impl Default for PipelineSettings {
    fn default() -> Self {
        Self {
            max_query_retrieval_results: default_max_query_retrieval_results(),
            max_reranked_results: default_max_reranked_results(),
            num_expanded_queries: default_num_expanded_queries(),
            collect_retrieval_stats: false,
            collect_rerank_stats: false,
            rerank: None,
            event_channel_capacity: default_event_channel_capacity(),
        }
    }
}

impl PipelineSettings {
    /// Parse settings from a TOML string.
    pub fn from_toml(content: &str) -> Result<Self> {
        toml::from_str(content).map_err(|e| LoupeError::Config(e.to_string()))
    }
}

/// Immutable per-run configuration, read-only to all nodes.
#[derive(Clone)]
pub struct RunConfig {
    /// The original user question.
    pub query: String,
    /// Optional persona prompt shaping the assistant's voice.
    pub persona_prompt: Option<String>,
    /// Primary (larger) LLM handle.
    pub primary_llm: Arc<dyn LlmClient>,
    /// Fast/cheap LLM handle used for decomposition, grading, extraction.
    pub fast_llm: Arc<dyn LlmClient>,
    /// The external search collaborator.
    pub search: Arc<dyn SearchProvider>,
    /// Optional external reranking collaborator.
    pub reranker: Option<Arc<dyn Reranker>>,
    /// Optional metrics sink; required only when persistence is on.
    pub metrics: Option<Arc<dyn MetricsStore>>,
    /// Policy deciding whether a refinement pass runs.
    pub refine_policy: Arc<dyn RefinePolicy>,
    /// Chat session this run belongs to.
    pub session_id: Option<Uuid>,
    /// The user message that triggered this run.
    pub message_id: Option<i64>,
    pub user_id: Option<Uuid>,
    pub persona_id: Option<i64>,
    /// Whether the terminal node writes the metrics record.
    pub use_persistence: bool,
    pub settings: PipelineSettings,
}

impl RunConfig {
    /// Create a run configuration with defaults (persistence off, always
    /// refine, no reranker).
    pub fn new(
        query: impl Into<String>,
        fast_llm: Arc<dyn LlmClient>,
        primary_llm: Arc<dyn LlmClient>,
        search: Arc<dyn SearchProvider>,
    ) -> Self {
        Self {
            query: query.into(),
            persona_prompt: None,
            primary_llm,
            fast_llm,
            search,
            reranker: None,
            metrics: None,
            refine_policy: Arc::new(AlwaysRefine),
            session_id: None,
            message_id: None,
            user_id: None,
            persona_id: None,
            use_persistence: false,
            settings: PipelineSettings::default(),
        }
    }

    /// Set the persona prompt.
    pub fn with_persona(mut self, prompt: impl Into<String>) -> Self {
        self.persona_prompt = Some(prompt.into());
        self
    }

    /// Set the reranking collaborator.
    pub fn with_reranker(mut self, reranker: Arc<dyn Reranker>) -> Self {
        self.reranker = Some(reranker);
        self
    }

    /// Enable persistence against the given metrics sink.
    pub fn with_persistence(
        mut self,
        metrics: Arc<dyn MetricsStore>,
        session_id: Uuid,
        message_id: i64,
    ) -> Self {
        self.metrics = Some(metrics);
        self.session_id = Some(session_id);
        self.message_id = Some(message_id);
        self.use_persistence = true;
        self
    }

    /// Set the refinement policy.
    pub fn with_refine_policy(mut self, policy: Arc<dyn RefinePolicy>) -> Self {
        self.refine_policy = policy;
        self
    }

    /// Set the pipeline settings.
    pub fn with_settings(mut self, settings: PipelineSettings) -> Self {
        self.settings = settings;
        self
    }

    /// Validate required fields. Failures here abort the run before any
    /// node executes.
    pub fn validate(&self) -> Result<()> {
        if self.query.trim().is_empty() {
            return Err(LoupeError::Config("query must not be empty".into()));
        }
        if self.use_persistence {
            if self.session_id.is_none() || self.message_id.is_none() {
                return Err(LoupeError::Config(
                    "session_id and message_id must be provided when persistence is enabled"
                        .into(),
                ));
            }
            if self.metrics.is_none() {
                return Err(LoupeError::Config(
                    "a metrics store must be provided when persistence is enabled".into(),
                ));
            }
        }
        Ok(())
    }
}

impl std::fmt::Debug for RunConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RunConfig")
            .field("query", &self.query)
            .field("persona_prompt", &self.persona_prompt.is_some())
            .field("reranker", &self.reranker.is_some())
            .field("metrics", &self.metrics.is_some())
            .field("session_id", &self.session_id)
            .field("message_id", &self.message_id)
            .field("use_persistence", &self.use_persistence)
            .field("settings", &self.settings)
            .finish()
    }
}
