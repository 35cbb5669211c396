//! The retrieval half of a branch subgraph: query expansion, per-query
//! retrieval fan-out, section verification, and reranking.

use std::sync::Arc;

use futures::future::BoxFuture;
use tracing::{debug, warn};

use loupe_core::config::RunConfig;
use loupe_core::error::Result;
use loupe_core::types::{
    QueryResult, RetrievalStats, SearchOptions, Section, StreamPacket,
};
use loupe_graph::edge::{BranchFuture, FanOutEdge};
use loupe_graph::node::{GraphNode, NodeContext};

use crate::prompts;
use crate::state::{BranchDelta, BranchField, BranchState};
use crate::stats::{average_score, calculate_fit_stats};
use crate::streaming::stream_line_packets;

/// Rewrite the branch question into retrieval queries.
///
/// Streams the fast LLM and emits one sub-query packet per parsed line.
pub struct ExpandQueries;

impl GraphNode<BranchState> for ExpandQueries {
    fn name(&self) -> &'static str {
        "expand_queries"
    }

    fn writes(&self) -> &'static [BranchField] {
        &[BranchField::SubQueries]
    }

    fn run<'a>(
        &'a self,
        state: &'a BranchState,
        ctx: &'a NodeContext,
    ) -> BoxFuture<'a, Result<BranchDelta>> {
        Box::pin(async move {
            let max_queries = ctx.config.settings.num_expanded_queries;
            let prompt = prompts::fill(
                prompts::QUERY_REWRITE_PROMPT,
                &[
                    ("question", state.question.as_str()),
                    ("num_queries", &max_queries.to_string()),
                ],
            );

            let question_id = state.question_id;
            let mut sub_queries = stream_line_packets(
                ctx,
                &ctx.config.fast_llm,
                prompt,
                "sub_queries",
                move |_index, query| StreamPacket::SubQuery {
                    id: question_id,
                    query,
                },
            )
            .await?;
            sub_queries.truncate(max_queries);

            Ok(BranchDelta {
                sub_queries: Some(sub_queries),
                ..Default::default()
            })
        })
    }
}

/// Fan out one retrieval task per rewritten query, joining at the
/// verification node.
pub struct QueryFanOut;

impl FanOutEdge<BranchState> for QueryFanOut {
    fn join_node(&self) -> &'static str {
        "verify_documents"
    }

    fn accumulating_writes(&self) -> &'static [BranchField] {
        &[BranchField::QueryResults, BranchField::RetrievedDocuments]
    }

    fn dispatch(&self, state: &BranchState, ctx: &NodeContext) -> Vec<BranchFuture<BranchState>> {
        state
            .sub_queries
            .iter()
            .map(|query| {
                let query = query.clone();
                let config = ctx.config.clone();
                let fut: BranchFuture<BranchState> =
                    Box::pin(async move { retrieve_for_query(query, config).await });
                fut
            })
            .collect()
    }

    fn empty_delta(&self) -> BranchDelta {
        BranchDelta::default()
    }
}

/// Retrieve sections for one query from the external search collaborator.
///
/// An empty/whitespace query skips the call entirely and contributes an
/// empty result — a defined edge case, not an error.
pub(crate) async fn retrieve_for_query(query: String, config: RunConfig) -> Result<BranchDelta> {
    if query.trim().is_empty() {
        warn!("empty query, skipping retrieval");
        return Ok(BranchDelta::default());
    }

    let options = SearchOptions {
        max_results: config.settings.max_query_retrieval_results,
        skip_rerank: true,
    };
    let response = config.search.run(query.clone(), options).await?;

    let mut sections = response.top_sections;
    sections.truncate(config.settings.max_query_retrieval_results);

    let fit_stats = if config.settings.collect_retrieval_stats {
        Some(calculate_fit_stats(&sections, &sections))
    } else {
        None
    };

    debug!(query = %query, sections = sections.len(), "retrieved");

    Ok(BranchDelta {
        query_results: vec![QueryResult {
            query,
            sections: sections.clone(),
            applied_filters: response.applied_filters,
            fit_stats,
        }],
        retrieved_documents: sections,
        ..Default::default()
    })
}

/// Judge each retrieved section for relevance to the branch question and
/// build the branch's retrieval stats.
pub struct VerifyDocuments;

impl GraphNode<BranchState> for VerifyDocuments {
    fn name(&self) -> &'static str {
        "verify_documents"
    }

    fn writes(&self) -> &'static [BranchField] {
        &[BranchField::VerifiedDocuments, BranchField::RetrievalStats]
    }

    fn run<'a>(
        &'a self,
        state: &'a BranchState,
        ctx: &'a NodeContext,
    ) -> BoxFuture<'a, Result<BranchDelta>> {
        Box::pin(async move {
            let verdicts = futures::future::join_all(state.retrieved_documents.iter().map(
                |section| {
                    let fast_llm = ctx.config.fast_llm.clone();
                    let prompt = prompts::fill(
                        prompts::DOC_VERIFICATION_PROMPT,
                        &[
                            ("question", state.question.as_str()),
                            ("document", section.content.as_str()),
                        ],
                    );
                    async move {
                        let verdict = fast_llm.invoke(prompt).await?;
                        Ok::<bool, loupe_core::error::LoupeError>(
                            verdict.trim().to_lowercase().starts_with("yes"),
                        )
                    }
                },
            ))
            .await;

            let mut verified: Vec<Section> = Vec::new();
            let mut rejected: Vec<Section> = Vec::new();
            for (section, verdict) in state.retrieved_documents.iter().zip(verdicts) {
                if verdict? {
                    verified.push(section.clone());
                } else {
                    rejected.push(section.clone());
                }
            }

            let stats = RetrievalStats {
                verified_count: Some(verified.len()),
                verified_avg_score: average_score(&verified),
                rejected_count: Some(rejected.len()),
                rejected_avg_score: average_score(&rejected),
                verified_section_ids: verified.iter().map(|s| s.section_id()).collect(),
                rejected_section_ids: rejected.iter().map(|s| s.section_id()).collect(),
            };

            debug!(
                question_id = %state.question_id,
                verified = verified.len(),
                rejected = rejected.len(),
                "verified sections"
            );

            Ok(BranchDelta {
                verified_documents: Some(verified),
                retrieval_stats: Some(stats),
                ..Default::default()
            })
        })
    }
}

/// Rerank the verified sections with the external collaborator, or pass
/// them through unchanged when reranking is not configured.
pub struct RerankDocuments;

impl GraphNode<BranchState> for RerankDocuments {
    fn name(&self) -> &'static str {
        "rerank_documents"
    }

    fn writes(&self) -> &'static [BranchField] {
        &[BranchField::RerankedDocuments]
    }

    fn run<'a>(
        &'a self,
        state: &'a BranchState,
        ctx: &'a NodeContext,
    ) -> BoxFuture<'a, Result<BranchDelta>> {
        Box::pin(async move {
            let verified = state.verified_documents.clone();

            let mut reranked = match (&ctx.config.settings.rerank, &ctx.config.reranker) {
                (Some(settings), Some(reranker)) if settings.num_rerank > 0 => {
                    reranker
                        .rerank(state.question.clone(), verified.clone(), settings.num_rerank)
                        .await?
                }
                _ => {
                    // Degraded mode, not a failure
                    warn!("no reranking settings found, using retrieval order");
                    verified.clone()
                }
            };
            reranked.truncate(ctx.config.settings.max_reranked_results);

            if ctx.config.settings.collect_rerank_stats {
                let fit_stats = calculate_fit_stats(&reranked, &verified);
                debug!(
                    question_id = %state.question_id,
                    fit_score_lift = fit_stats.fit_score_lift,
                    rerank_effect = fit_stats.rerank_effect,
                    "rerank fit stats"
                );
            }

            Ok(BranchDelta {
                reranked_documents: Some(reranked),
                ..Default::default()
            })
        })
    }
}
