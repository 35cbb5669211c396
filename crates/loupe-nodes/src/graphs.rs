//! The main graph topology.

use std::sync::Arc;

use loupe_core::error::Result;
use loupe_graph::edge::Edge;
use loupe_graph::executor::Graph;

use crate::branch::{build_answer_graph, build_retrieval_graph, FollowUpFanOut, InitialFanOut};
use crate::decision::{route_refinement, RefineDecision};
use crate::decompose::{Decompose, FollowUpDecompose};
use crate::extract::ExtractEntities;
use crate::ingest::{IngestAnswers, IngestFollowUpAnswers};
use crate::logging::LogMetrics;
use crate::state::MainState;
use crate::synthesize::{
    CheckInitialAnswer, GenerateBaseAnswer, GenerateInitialAnswer, GenerateRefinedAnswer,
};

/// Build the full two-phase pipeline:
///
/// ```text
/// decompose ══╗ (baseline + one branch per sub-question)
///             ╚═> ingest_answers -> generate_initial_base_answer
///                 -> generate_initial_answer -> check_initial_answer
///                 -> decide_refinement ──┬─> log_metrics
///                                        └─> extract_entities
///                                            -> follow_up_decompose ══╗
///                 ingest_follow_up_answers <═══════════════════════════╝
///                 -> generate_refined_answer -> log_metrics
/// ```
pub fn build_main_graph() -> Result<Graph<MainState>> {
    let answer_graph = Arc::new(build_answer_graph()?);
    let retrieval_graph = Arc::new(build_retrieval_graph()?);

    Graph::builder()
        .add_node(Decompose)
        .add_node(IngestAnswers)
        .add_node(GenerateBaseAnswer)
        .add_node(GenerateInitialAnswer)
        .add_node(CheckInitialAnswer)
        .add_node(RefineDecision)
        .add_node(ExtractEntities)
        .add_node(FollowUpDecompose)
        .add_node(IngestFollowUpAnswers)
        .add_node(GenerateRefinedAnswer)
        .add_node(LogMetrics)
        .add_edge(Edge::fan_out(
            "decompose",
            Arc::new(InitialFanOut::new(answer_graph.clone(), retrieval_graph)),
        ))
        .add_edge(Edge::to("ingest_answers", "generate_initial_base_answer"))
        .add_edge(Edge::to(
            "generate_initial_base_answer",
            "generate_initial_answer",
        ))
        .add_edge(Edge::to("generate_initial_answer", "check_initial_answer"))
        .add_edge(Edge::to("check_initial_answer", "decide_refinement"))
        .add_edge(Edge::route(
            "decide_refinement",
            &["extract_entities", "log_metrics"],
            route_refinement,
        ))
        .add_edge(Edge::to("extract_entities", "follow_up_decompose"))
        .add_edge(Edge::fan_out(
            "follow_up_decompose",
            Arc::new(FollowUpFanOut::new(answer_graph)),
        ))
        .add_edge(Edge::to(
            "ingest_follow_up_answers",
            "generate_refined_answer",
        ))
        .add_edge(Edge::to("generate_refined_answer", "log_metrics"))
        .add_edge(Edge::end("log_metrics"))
        .entry("decompose")
        .build()
}
