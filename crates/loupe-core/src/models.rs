//! Derived result models: extraction output, effectiveness stats, and the
//! combined metrics record written to the telemetry store.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::types::QuestionId;

/// An entity named in the retrieved context.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Entity {
    pub name: String,
    pub entity_type: String,
}

/// A relationship between named entities.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Relationship {
    pub name: String,
    pub relationship_type: String,
    pub entities: Vec<String>,
}

/// A domain term with related terms.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Term {
    pub name: String,
    pub term_type: String,
    pub similar_to: Vec<String>,
}

/// Output of the entity/relationship/term extraction node.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct EntityTermExtraction {
    pub entities: Vec<Entity>,
    pub relationships: Vec<Relationship>,
    pub terms: Vec<Term>,
}

/// A sub-question produced by the refinement decomposition.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FollowUpSubQuestion {
    pub question: String,
    pub question_id: QuestionId,
    pub verified: bool,
    pub answered: bool,
    pub answer: String,
}

/// Per-scope verified-document summary.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct ScopeStats {
    pub num_verified_documents: usize,
    pub verified_avg_score: Option<f64>,
}

/// Effectiveness ratios comparing sub-question retrieval against the
/// original-question baseline. `None` means undefined (both sides empty).
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct Effectiveness {
    pub utilized_chunk_ratio: Option<f64>,
    pub support_ratio: Option<f64>,
}

/// Stats computed once after initial synthesis.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct InitialAnswerStats {
    pub sub_questions: ScopeStats,
    pub original_question: ScopeStats,
    pub effectiveness: Effectiveness,
}

/// Stats computed once after refined synthesis.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct RefinedAnswerStats {
    pub revision_doc_efficiency: Option<f64>,
    pub revision_question_efficiency: Option<f64>,
}

/// Phase durations derived from recorded timestamps.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct RunTimings {
    pub base_duration_s: Option<f64>,
    pub refined_duration_s: Option<f64>,
    pub full_duration_s: Option<f64>,
}

/// Metrics for the base (initial) phase.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct BaseMetrics {
    pub num_verified_documents_total: usize,
    pub num_verified_documents_core: Option<usize>,
    pub verified_avg_score_core: Option<f64>,
    pub num_verified_documents_base: usize,
    pub verified_avg_score_base: Option<f64>,
    pub doc_boost_factor: Option<f64>,
    pub support_boost_factor: Option<f64>,
    pub duration_s: Option<f64>,
}

/// Metrics for the refinement phase.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct RefinedMetrics {
    pub doc_boost_factor: Option<f64>,
    pub question_boost_factor: Option<f64>,
    pub duration_s: Option<f64>,
}

/// The full metrics record assembled by the terminal node.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CombinedMetrics {
    pub timings: RunTimings,
    pub base: Option<BaseMetrics>,
    pub refined: Option<RefinedMetrics>,
}

/// One append-only telemetry row, keyed by user/persona/session.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunMetricsRecord {
    pub run_id: Uuid,
    pub user_id: Option<Uuid>,
    pub persona_id: Option<i64>,
    pub session_id: Option<Uuid>,
    /// "refined" when the refinement phase ran, else "base".
    pub agent_type: String,
    pub start_time: DateTime<Utc>,
    pub metrics: CombinedMetrics,
}
