//! The two pipeline states: the main (run-level) state and the per-branch
//! state of one sub-question's answer subgraph.

use chrono::{DateTime, Utc};

use loupe_core::models::{
    BaseMetrics, EntityTermExtraction, FollowUpSubQuestion, InitialAnswerStats, RefinedAnswerStats,
    RefinedMetrics,
};
use loupe_core::types::{
    QueryResult, QuestionAnswerResult, QuestionId, RetrievalStats, Section,
};
use loupe_graph::state::{
    apply_append, apply_replace, merge_sections, MergeStrategy, PipelineState,
};

/// Run-level accumulator threaded through the main graph.
#[derive(Debug, Default)]
pub struct MainState {
    // Phase timing markers
    pub start_time: Option<DateTime<Utc>>,
    pub base_end_time: Option<DateTime<Utc>>,
    pub refined_start_time: Option<DateTime<Utc>>,
    pub refined_end_time: Option<DateTime<Utc>>,

    // Initial phase
    pub sub_questions: Vec<String>,
    pub answer_results: Vec<QuestionAnswerResult>,
    /// Deduplicated union of documents retrieved by sub-question branches.
    pub documents: Vec<Section>,
    /// Documents retrieved for the original question (baseline branch).
    pub original_question_documents: Vec<Section>,
    pub original_question_retrieval_stats: RetrievalStats,
    pub initial_answer: Option<String>,
    pub initial_base_answer: Option<String>,
    pub initial_answer_quality: Option<bool>,
    pub initial_answer_stats: Option<InitialAnswerStats>,

    // Refinement phase
    pub extraction: Option<EntityTermExtraction>,
    pub require_refinement: Option<bool>,
    pub follow_up_sub_questions: Vec<FollowUpSubQuestion>,
    pub follow_up_answer_results: Vec<QuestionAnswerResult>,
    pub follow_up_documents: Vec<Section>,
    pub refined_answer: Option<String>,
    pub refined_answer_stats: Option<RefinedAnswerStats>,

    // Telemetry
    pub base_metrics: Option<BaseMetrics>,
    pub refined_metrics: Option<RefinedMetrics>,
}

/// Fields of [`MainState`].
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum MainField {
    StartTime,
    BaseEndTime,
    RefinedStartTime,
    RefinedEndTime,
    SubQuestions,
    AnswerResults,
    Documents,
    OriginalQuestionDocuments,
    OriginalQuestionRetrievalStats,
    InitialAnswer,
    InitialBaseAnswer,
    InitialAnswerQuality,
    InitialAnswerStats,
    Extraction,
    RequireRefinement,
    FollowUpSubQuestions,
    FollowUpAnswerResults,
    FollowUpDocuments,
    RefinedAnswer,
    RefinedAnswerStats,
    BaseMetrics,
    RefinedMetrics,
}

impl MainField {
    /// All fields, for table-driven policy tests.
    pub const ALL: &'static [MainField] = &[
        MainField::StartTime,
        MainField::BaseEndTime,
        MainField::RefinedStartTime,
        MainField::RefinedEndTime,
        MainField::SubQuestions,
        MainField::AnswerResults,
        MainField::Documents,
        MainField::OriginalQuestionDocuments,
        MainField::OriginalQuestionRetrievalStats,
        MainField::InitialAnswer,
        MainField::InitialBaseAnswer,
        MainField::InitialAnswerQuality,
        MainField::InitialAnswerStats,
        MainField::Extraction,
        MainField::RequireRefinement,
        MainField::FollowUpSubQuestions,
        MainField::FollowUpAnswerResults,
        MainField::FollowUpDocuments,
        MainField::RefinedAnswer,
        MainField::RefinedAnswerStats,
        MainField::BaseMetrics,
        MainField::RefinedMetrics,
    ];
}

/// Partial update to [`MainState`]. `Vec` fields accumulate; `Option`
/// fields replace when present.
#[derive(Debug, Default)]
pub struct MainDelta {
    pub start_time: Option<DateTime<Utc>>,
    pub base_end_time: Option<DateTime<Utc>>,
    pub refined_start_time: Option<DateTime<Utc>>,
    pub refined_end_time: Option<DateTime<Utc>>,

    pub sub_questions: Option<Vec<String>>,
    pub answer_results: Vec<QuestionAnswerResult>,
    pub documents: Vec<Section>,
    pub original_question_documents: Vec<Section>,
    pub original_question_retrieval_stats: Option<RetrievalStats>,
    pub initial_answer: Option<String>,
    pub initial_base_answer: Option<String>,
    pub initial_answer_quality: Option<bool>,
    pub initial_answer_stats: Option<InitialAnswerStats>,

    pub extraction: Option<EntityTermExtraction>,
    pub require_refinement: Option<bool>,
    pub follow_up_sub_questions: Option<Vec<FollowUpSubQuestion>>,
    pub follow_up_answer_results: Vec<QuestionAnswerResult>,
    pub follow_up_documents: Vec<Section>,
    pub refined_answer: Option<String>,
    pub refined_answer_stats: Option<RefinedAnswerStats>,

    pub base_metrics: Option<BaseMetrics>,
    pub refined_metrics: Option<RefinedMetrics>,
}

impl PipelineState for MainState {
    type Delta = MainDelta;
    type Field = MainField;

    fn merge_strategy(field: MainField) -> MergeStrategy {
        match field {
            MainField::AnswerResults | MainField::FollowUpAnswerResults => MergeStrategy::Append,
            MainField::Documents
            | MainField::OriginalQuestionDocuments
            | MainField::FollowUpDocuments => MergeStrategy::DedupSections,
            _ => MergeStrategy::Replace,
        }
    }

    fn apply(&mut self, delta: MainDelta) {
        debug_assert_eq!(
            Self::merge_strategy(MainField::AnswerResults),
            MergeStrategy::Append
        );
        debug_assert_eq!(
            Self::merge_strategy(MainField::Documents),
            MergeStrategy::DedupSections
        );

        apply_replace(&mut self.start_time, delta.start_time.map(Some));
        apply_replace(&mut self.base_end_time, delta.base_end_time.map(Some));
        apply_replace(
            &mut self.refined_start_time,
            delta.refined_start_time.map(Some),
        );
        apply_replace(&mut self.refined_end_time, delta.refined_end_time.map(Some));

        apply_replace(&mut self.sub_questions, delta.sub_questions);
        apply_append(&mut self.answer_results, delta.answer_results);
        merge_sections(&mut self.documents, delta.documents);
        merge_sections(
            &mut self.original_question_documents,
            delta.original_question_documents,
        );
        apply_replace(
            &mut self.original_question_retrieval_stats,
            delta.original_question_retrieval_stats,
        );
        apply_replace(&mut self.initial_answer, delta.initial_answer.map(Some));
        apply_replace(
            &mut self.initial_base_answer,
            delta.initial_base_answer.map(Some),
        );
        apply_replace(
            &mut self.initial_answer_quality,
            delta.initial_answer_quality.map(Some),
        );
        apply_replace(
            &mut self.initial_answer_stats,
            delta.initial_answer_stats.map(Some),
        );

        apply_replace(&mut self.extraction, delta.extraction.map(Some));
        apply_replace(
            &mut self.require_refinement,
            delta.require_refinement.map(Some),
        );
        apply_replace(
            &mut self.follow_up_sub_questions,
            delta.follow_up_sub_questions,
        );
        apply_append(
            &mut self.follow_up_answer_results,
            delta.follow_up_answer_results,
        );
        merge_sections(&mut self.follow_up_documents, delta.follow_up_documents);
        apply_replace(&mut self.refined_answer, delta.refined_answer.map(Some));
        apply_replace(
            &mut self.refined_answer_stats,
            delta.refined_answer_stats.map(Some),
        );

        apply_replace(&mut self.base_metrics, delta.base_metrics.map(Some));
        apply_replace(&mut self.refined_metrics, delta.refined_metrics.map(Some));
    }
}

/// Per-branch accumulator for one sub-question's answer subgraph (also used
/// by the original-question baseline retrieval branch).
#[derive(Debug, Default)]
pub struct BranchState {
    pub question: String,
    pub question_id: QuestionId,
    pub sub_queries: Vec<String>,
    pub query_results: Vec<QueryResult>,
    /// Deduplicated union across the per-query retrieval fan-out.
    pub retrieved_documents: Vec<Section>,
    pub verified_documents: Vec<Section>,
    pub reranked_documents: Vec<Section>,
    pub retrieval_stats: RetrievalStats,
    pub answer: String,
    pub quality: String,
}

impl BranchState {
    pub fn for_question(question: impl Into<String>, question_id: QuestionId) -> Self {
        Self {
            question: question.into(),
            question_id,
            ..Default::default()
        }
    }

    /// Fold the finished branch into its immutable result.
    pub fn into_answer_result(self) -> QuestionAnswerResult {
        QuestionAnswerResult {
            question: self.question,
            question_id: self.question_id,
            answer: self.answer,
            quality: self.quality,
            query_results: self.query_results,
            documents: self.reranked_documents,
            retrieval_stats: self.retrieval_stats,
        }
    }
}

/// Fields of [`BranchState`].
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum BranchField {
    SubQueries,
    QueryResults,
    RetrievedDocuments,
    VerifiedDocuments,
    RerankedDocuments,
    RetrievalStats,
    Answer,
    Quality,
}

impl BranchField {
    pub const ALL: &'static [BranchField] = &[
        BranchField::SubQueries,
        BranchField::QueryResults,
        BranchField::RetrievedDocuments,
        BranchField::VerifiedDocuments,
        BranchField::RerankedDocuments,
        BranchField::RetrievalStats,
        BranchField::Answer,
        BranchField::Quality,
    ];
}

/// Partial update to [`BranchState`].
#[derive(Debug, Default)]
pub struct BranchDelta {
    pub sub_queries: Option<Vec<String>>,
    pub query_results: Vec<QueryResult>,
    pub retrieved_documents: Vec<Section>,
    pub verified_documents: Option<Vec<Section>>,
    pub reranked_documents: Option<Vec<Section>>,
    pub retrieval_stats: Option<RetrievalStats>,
    pub answer: Option<String>,
    pub quality: Option<String>,
}

impl PipelineState for BranchState {
    type Delta = BranchDelta;
    type Field = BranchField;

    fn merge_strategy(field: BranchField) -> MergeStrategy {
        match field {
            BranchField::QueryResults => MergeStrategy::Append,
            BranchField::RetrievedDocuments => MergeStrategy::DedupSections,
            _ => MergeStrategy::Replace,
        }
    }

    fn apply(&mut self, delta: BranchDelta) {
        debug_assert_eq!(
            Self::merge_strategy(BranchField::QueryResults),
            MergeStrategy::Append
        );

        apply_replace(&mut self.sub_queries, delta.sub_queries);
        apply_append(&mut self.query_results, delta.query_results);
        merge_sections(&mut self.retrieved_documents, delta.retrieved_documents);
        apply_replace(&mut self.verified_documents, delta.verified_documents);
        apply_replace(&mut self.reranked_documents, delta.reranked_documents);
        apply_replace(&mut self.retrieval_stats, delta.retrieval_stats);
        apply_replace(&mut self.answer, delta.answer);
        apply_replace(&mut self.quality, delta.quality);
    }
}
