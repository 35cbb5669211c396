use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::LoupeError;

/// Sentinel answer used when the model indicates it cannot answer a
/// sub-question. The grader short-circuits on it without an LLM call.
pub const UNKNOWN_ANSWER: &str = "I don't know";

/// Identifier of a sub-question: phase level (0 = initial, 1 = refinement)
/// plus ordinal position within that level.
///
/// The original question itself is addressed as `0_0`; decomposed
/// sub-questions of the initial phase are `0_1..`, refinement
/// sub-questions are `1_0..`.
#[derive(Debug, Clone, Copy, Default, Hash, Eq, PartialEq, Serialize, Deserialize)]
pub struct QuestionId {
    pub level: u8,
    pub num: usize,
}

impl QuestionId {
    pub fn new(level: u8, num: usize) -> Self {
        Self { level, num }
    }
}

impl std::fmt::Display for QuestionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}_{}", self.level, self.num)
    }
}

impl std::str::FromStr for QuestionId {
    type Err = LoupeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (level, num) = s
            .split_once('_')
            .ok_or_else(|| LoupeError::Graph(format!("malformed question id: {s}")))?;
        Ok(Self {
            level: level
                .parse()
                .map_err(|_| LoupeError::Graph(format!("malformed question id: {s}")))?,
            num: num
                .parse()
                .map_err(|_| LoupeError::Graph(format!("malformed question id: {s}")))?,
        })
    }
}

/// One retrieved document chunk.
///
/// Identity is `document_id` plus the chunk ordinal — deduplication across
/// branches and phases is keyed on [`Section::section_id`].
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Section {
    pub document_id: String,
    pub chunk_ind: usize,
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default)]
    pub link: Option<String>,
    pub content: String,
    #[serde(default)]
    pub score: Option<f64>,
}

impl Section {
    /// Stable chunk identity used for deduplication and stats bookkeeping.
    pub fn section_id(&self) -> String {
        format!("{}__{}", self.document_id, self.chunk_ind)
    }
}

/// Options passed to the external search collaborator.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SearchOptions {
    pub max_results: usize,
    /// Retrieval for sub-queries skips the search backend's own reranking;
    /// the pipeline reranks verified sections itself.
    pub skip_rerank: bool,
}

/// Filters the search backend reports as applied to a query.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct SearchFilters {
    #[serde(default)]
    pub source_types: Vec<String>,
    #[serde(default)]
    pub time_cutoff: Option<DateTime<Utc>>,
}

/// Response from the external search collaborator.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SearchResponse {
    pub top_sections: Vec<Section>,
    #[serde(default)]
    pub applied_filters: SearchFilters,
}

/// Optional fit-score statistics for one retrieval, collected only when
/// the stats flag is enabled in settings.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct FitStats {
    pub fit_score_lift: f64,
    pub rerank_effect: f64,
}

/// Result of retrieving for a single (possibly rewritten) query.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueryResult {
    pub query: String,
    pub sections: Vec<Section>,
    #[serde(default)]
    pub applied_filters: SearchFilters,
    #[serde(default)]
    pub fit_stats: Option<FitStats>,
}

/// Verified/rejected chunk counts and scores for one retrieval scope.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct RetrievalStats {
    pub verified_count: Option<usize>,
    pub verified_avg_score: Option<f64>,
    pub rejected_count: Option<usize>,
    pub rejected_avg_score: Option<f64>,
    #[serde(default)]
    pub verified_section_ids: Vec<String>,
    #[serde(default)]
    pub rejected_section_ids: Vec<String>,
}

/// One sub-question's outcome, produced by its answer branch and consumed
/// by fan-in aggregation. Immutable after creation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QuestionAnswerResult {
    pub question: String,
    pub question_id: QuestionId,
    pub answer: String,
    /// Grader verdict, a "yes"/"no"-prefixed string.
    pub quality: String,
    pub query_results: Vec<QueryResult>,
    pub documents: Vec<Section>,
    pub retrieval_stats: RetrievalStats,
}

impl QuestionAnswerResult {
    /// Whether this sub-answer should be cited by synthesis: positive
    /// verdict, non-empty, and not the unknown sentinel.
    pub fn is_usable(&self) -> bool {
        self.quality.to_lowercase().starts_with("yes")
            && !self.answer.is_empty()
            && self.answer != UNKNOWN_ANSWER
    }
}

/// A typed packet delivered to the consuming client.
///
/// Every packet that belongs to one branch carries its [`QuestionId`] so a
/// consumer can reconstruct per-branch ordering from the interleaved stream.
#[derive(Debug, Clone, Serialize, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum StreamPacket {
    /// Marker emitted before the graph starts, naming the invoked tool.
    ToolStart { tool_name: String, query: String },
    /// A fully parsed decomposed sub-question.
    SubQuestion { id: QuestionId, text: String },
    /// A rewritten retrieval query for one sub-question.
    SubQuery { id: QuestionId, query: String },
    /// A streamed token of one sub-answer.
    SubAnswerPiece { id: QuestionId, piece: String },
    /// One sub-answer finished streaming.
    SubAnswerFinished { id: QuestionId },
    /// A streamed token of the phase-level (initial or refined) answer.
    PhaseAnswerPiece { level: u8, piece: String },
    /// The phase-level answer finished streaming.
    PhaseFinished { level: u8 },
    /// The refinement pass is starting.
    RefinementStarted { query: String },
}

impl StreamPacket {
    /// The phase level this packet belongs to.
    pub fn level(&self) -> u8 {
        match self {
            StreamPacket::ToolStart { .. } => 0,
            StreamPacket::SubQuestion { id, .. }
            | StreamPacket::SubQuery { id, .. }
            | StreamPacket::SubAnswerPiece { id, .. }
            | StreamPacket::SubAnswerFinished { id } => id.level,
            StreamPacket::PhaseAnswerPiece { level, .. }
            | StreamPacket::PhaseFinished { level } => *level,
            StreamPacket::RefinementStarted { .. } => 1,
        }
    }
}
