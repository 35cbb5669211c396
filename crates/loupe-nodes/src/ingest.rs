//! Fan-in nodes: fold parallel branch results into the shared document
//! collections.

use futures::future::BoxFuture;
use tracing::debug;

use loupe_core::error::Result;
use loupe_core::types::Section;
use loupe_graph::node::{GraphNode, NodeContext};

use crate::state::{MainDelta, MainField, MainState};

/// Join barrier of the initial fan-out. Flattens the documents of all
/// answer results into the shared deduplicated collection. Tolerates zero
/// branches: an empty result list simply contributes nothing.
pub struct IngestAnswers;

impl GraphNode<MainState> for IngestAnswers {
    fn name(&self) -> &'static str {
        "ingest_answers"
    }

    fn writes(&self) -> &'static [MainField] {
        &[MainField::Documents]
    }

    fn run<'a>(
        &'a self,
        state: &'a MainState,
        _ctx: &'a NodeContext,
    ) -> BoxFuture<'a, Result<MainDelta>> {
        Box::pin(async move {
            let documents: Vec<Section> = state
                .answer_results
                .iter()
                .flat_map(|result| result.documents.iter().cloned())
                .collect();
            debug!(
                results = state.answer_results.len(),
                documents = documents.len(),
                "ingested answer branches"
            );
            // The documents field's dedup merge collapses duplicates
            Ok(MainDelta {
                documents,
                ..Default::default()
            })
        })
    }
}

/// Join barrier of the refinement fan-out.
pub struct IngestFollowUpAnswers;

impl GraphNode<MainState> for IngestFollowUpAnswers {
    fn name(&self) -> &'static str {
        "ingest_follow_up_answers"
    }

    fn writes(&self) -> &'static [MainField] {
        &[MainField::FollowUpDocuments]
    }

    fn run<'a>(
        &'a self,
        state: &'a MainState,
        _ctx: &'a NodeContext,
    ) -> BoxFuture<'a, Result<MainDelta>> {
        Box::pin(async move {
            let follow_up_documents: Vec<Section> = state
                .follow_up_answer_results
                .iter()
                .flat_map(|result| result.documents.iter().cloned())
                .collect();
            debug!(
                results = state.follow_up_answer_results.len(),
                documents = follow_up_documents.len(),
                "ingested follow-up branches"
            );
            Ok(MainDelta {
                follow_up_documents,
                ..Default::default()
            })
        })
    }
}
