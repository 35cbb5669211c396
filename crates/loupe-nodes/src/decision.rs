//! The refinement decision router node.

use futures::future::BoxFuture;
use tracing::info;

use loupe_core::error::Result;
use loupe_core::types::StreamPacket;
use loupe_graph::node::{GraphNode, NodeContext};

use crate::state::{MainDelta, MainField, MainState};

/// Decide whether the refinement pass runs, by consulting the run's
/// pluggable policy. When refining, announces the second pass to the
/// client.
pub struct RefineDecision;

impl GraphNode<MainState> for RefineDecision {
    fn name(&self) -> &'static str {
        "decide_refinement"
    }

    fn writes(&self) -> &'static [MainField] {
        &[MainField::RequireRefinement]
    }

    fn run<'a>(
        &'a self,
        state: &'a MainState,
        ctx: &'a NodeContext,
    ) -> BoxFuture<'a, Result<MainDelta>> {
        Box::pin(async move {
            let stats = state.initial_answer_stats.clone().unwrap_or_default();
            let quality = state.initial_answer_quality.unwrap_or(true);
            let refine = ctx.config.refine_policy.should_refine(&stats, quality);

            info!(refine, "refinement decision");
            if refine {
                ctx.emitter
                    .dispatch(
                        "refinement_started",
                        StreamPacket::RefinementStarted {
                            query: ctx.config.query.clone(),
                        },
                    )
                    .await;
            }

            Ok(MainDelta {
                require_refinement: Some(refine),
                ..Default::default()
            })
        })
    }
}

/// Route edge decision after [`RefineDecision`].
pub fn route_refinement(state: &MainState) -> &'static str {
    if state.require_refinement == Some(true) {
        "extract_entities"
    } else {
        "log_metrics"
    }
}
