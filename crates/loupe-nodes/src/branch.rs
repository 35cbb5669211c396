//! Branch subgraph topologies and the fan-out edges of the main graph.

use std::sync::Arc;

use tracing::debug;

use loupe_core::error::Result;
use loupe_core::types::QuestionId;
use loupe_graph::edge::{BranchFuture, Edge, FanOutEdge};
use loupe_graph::executor::Graph;
use loupe_graph::node::NodeContext;

use crate::answer::{GenerateAnswer, GradeAnswer};
use crate::retrieval::{ExpandQueries, QueryFanOut, RerankDocuments, VerifyDocuments};
use crate::state::{BranchState, MainDelta, MainField, MainState};

/// Retrieval-only subgraph: expand -> retrieve (fan-out) -> verify -> rerank.
/// Used for the original-question baseline branch.
pub fn build_retrieval_graph() -> Result<Graph<BranchState>> {
    Graph::builder()
        .add_node(ExpandQueries)
        .add_node(VerifyDocuments)
        .add_node(RerankDocuments)
        .add_edge(Edge::fan_out("expand_queries", Arc::new(QueryFanOut)))
        .add_edge(Edge::to("verify_documents", "rerank_documents"))
        .add_edge(Edge::end("rerank_documents"))
        .entry("expand_queries")
        .build()
}

/// Full answer subgraph: retrieval plus sub-answer generation and grading.
pub fn build_answer_graph() -> Result<Graph<BranchState>> {
    Graph::builder()
        .add_node(ExpandQueries)
        .add_node(VerifyDocuments)
        .add_node(RerankDocuments)
        .add_node(GenerateAnswer)
        .add_node(GradeAnswer)
        .add_edge(Edge::fan_out("expand_queries", Arc::new(QueryFanOut)))
        .add_edge(Edge::to("verify_documents", "rerank_documents"))
        .add_edge(Edge::to("rerank_documents", "generate_answer"))
        .add_edge(Edge::to("generate_answer", "grade_answer"))
        .add_edge(Edge::end("grade_answer"))
        .entry("expand_queries")
        .build()
}

/// Run the answer subgraph for one sub-question and wrap its result into a
/// main-state delta via `wrap`.
fn answer_branch(
    graph: Arc<Graph<BranchState>>,
    question: String,
    question_id: QuestionId,
    ctx: NodeContext,
    wrap: fn(loupe_core::types::QuestionAnswerResult) -> MainDelta,
) -> BranchFuture<MainState> {
    Box::pin(async move {
        debug!(question_id = %question_id, "starting answer branch");
        let state = BranchState::for_question(question, question_id);
        let final_state = graph.execute(state, &ctx).await?;
        Ok(wrap(final_state.into_answer_result()))
    })
}

/// Run the retrieval subgraph against the original question, contributing
/// the baseline documents and retrieval stats.
fn base_search_branch(
    graph: Arc<Graph<BranchState>>,
    ctx: NodeContext,
) -> BranchFuture<MainState> {
    Box::pin(async move {
        let question = ctx.config.query.clone();
        let state = BranchState::for_question(question, QuestionId::new(0, 0));
        let final_state = graph.execute(state, &ctx).await?;
        Ok(MainDelta {
            original_question_documents: final_state.reranked_documents.clone(),
            original_question_retrieval_stats: Some(final_state.retrieval_stats),
            ..Default::default()
        })
    })
}

/// Initial-phase fan-out: the original-question baseline branch plus one
/// answer branch per decomposed sub-question, joined at `ingest_answers`.
pub struct InitialFanOut {
    answer_graph: Arc<Graph<BranchState>>,
    retrieval_graph: Arc<Graph<BranchState>>,
}

impl InitialFanOut {
    pub fn new(
        answer_graph: Arc<Graph<BranchState>>,
        retrieval_graph: Arc<Graph<BranchState>>,
    ) -> Self {
        Self {
            answer_graph,
            retrieval_graph,
        }
    }
}

impl FanOutEdge<MainState> for InitialFanOut {
    fn join_node(&self) -> &'static str {
        "ingest_answers"
    }

    fn accumulating_writes(&self) -> &'static [MainField] {
        &[MainField::AnswerResults]
    }

    fn dispatch(&self, state: &MainState, ctx: &NodeContext) -> Vec<BranchFuture<MainState>> {
        let mut branches = Vec::with_capacity(state.sub_questions.len() + 1);
        // The baseline retrieval is the sole writer of the
        // original-question fields.
        branches.push(base_search_branch(self.retrieval_graph.clone(), ctx.clone()));
        for (index, question) in state.sub_questions.iter().enumerate() {
            branches.push(answer_branch(
                self.answer_graph.clone(),
                question.clone(),
                QuestionId::new(0, index + 1),
                ctx.clone(),
                |result| MainDelta {
                    answer_results: vec![result],
                    ..Default::default()
                },
            ));
        }
        branches
    }

    fn empty_delta(&self) -> MainDelta {
        MainDelta {
            answer_results: vec![],
            ..Default::default()
        }
    }
}

/// Refinement-phase fan-out: one answer branch per follow-up sub-question,
/// joined at `ingest_follow_up_answers`.
pub struct FollowUpFanOut {
    answer_graph: Arc<Graph<BranchState>>,
}

impl FollowUpFanOut {
    pub fn new(answer_graph: Arc<Graph<BranchState>>) -> Self {
        Self { answer_graph }
    }
}

impl FanOutEdge<MainState> for FollowUpFanOut {
    fn join_node(&self) -> &'static str {
        "ingest_follow_up_answers"
    }

    fn accumulating_writes(&self) -> &'static [MainField] {
        &[MainField::FollowUpAnswerResults]
    }

    fn dispatch(&self, state: &MainState, ctx: &NodeContext) -> Vec<BranchFuture<MainState>> {
        state
            .follow_up_sub_questions
            .iter()
            .map(|follow_up| {
                answer_branch(
                    self.answer_graph.clone(),
                    follow_up.question.clone(),
                    follow_up.question_id,
                    ctx.clone(),
                    |result| MainDelta {
                        follow_up_answer_results: vec![result],
                        ..Default::default()
                    },
                )
            })
            .collect()
    }

    fn empty_delta(&self) -> MainDelta {
        MainDelta {
            follow_up_answer_results: vec![],
            ..Default::default()
        }
    }
}
