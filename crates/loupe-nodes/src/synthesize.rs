//! Phase-level answer synthesis: the initial answer, the plain-RAG
//! baseline answer, the initial quality check, and the refined answer.

use std::collections::HashSet;

use chrono::Utc;
use futures::future::BoxFuture;
use tracing::{debug, info};

use loupe_core::error::Result;
use loupe_core::models::{BaseMetrics, RefinedAnswerStats, RefinedMetrics};
use loupe_core::types::{QuestionAnswerResult, StreamPacket};
use loupe_graph::node::{GraphNode, NodeContext};
use loupe_graph::state::dedup_sections;

use crate::prompts;
use crate::state::{MainDelta, MainField, MainState};
use crate::stats::{
    compute_initial_stats, revision_doc_efficiency, revision_question_efficiency,
};
use crate::streaming::stream_answer_pieces;

fn format_good_answers<'a>(results: impl Iterator<Item = &'a QuestionAnswerResult>) -> Vec<String> {
    results
        .filter(|result| result.is_usable())
        .map(|result| {
            prompts::fill(
                prompts::SUB_QUESTION_ANSWER_TEMPLATE,
                &[
                    ("sub_question", result.question.as_str()),
                    ("sub_answer", result.answer.as_str()),
                ],
            )
        })
        .collect()
}

/// Synthesize the initial answer from sub-answers and documents, streaming
/// tokens as packets and computing the base-phase stats and metrics.
pub struct GenerateInitialAnswer;

impl GraphNode<MainState> for GenerateInitialAnswer {
    fn name(&self) -> &'static str {
        "generate_initial_answer"
    }

    fn writes(&self) -> &'static [MainField] {
        &[
            MainField::InitialAnswer,
            MainField::InitialAnswerStats,
            MainField::BaseEndTime,
            MainField::BaseMetrics,
        ]
    }

    fn run<'a>(
        &'a self,
        state: &'a MainState,
        ctx: &'a NodeContext,
    ) -> BoxFuture<'a, Result<MainDelta>> {
        Box::pin(async move {
            let relevant_docs = dedup_sections(
                state
                    .documents
                    .iter()
                    .chain(state.original_question_documents.iter())
                    .cloned(),
            );

            let good_qa = format_good_answers(state.answer_results.iter());
            let persona = prompts::persona_specification(ctx.config.persona_prompt.as_deref());
            let context = prompts::format_docs(&relevant_docs);

            // Template choice depends on whether any sub-question produced
            // a usable answer.
            let prompt = if good_qa.is_empty() {
                prompts::fill(
                    prompts::INITIAL_SYNTHESIS_PROMPT_NO_SUB_ANSWERS,
                    &[
                        ("persona_specification", persona.as_str()),
                        ("question", ctx.config.query.as_str()),
                        ("context", context.as_str()),
                    ],
                )
            } else {
                prompts::fill(
                    prompts::INITIAL_SYNTHESIS_PROMPT,
                    &[
                        ("persona_specification", persona.as_str()),
                        ("question", ctx.config.query.as_str()),
                        ("answered_sub_questions", &good_qa.join("\n\n------\n\n")),
                        ("context", context.as_str()),
                    ],
                )
            };

            let answer = stream_answer_pieces(
                ctx,
                &ctx.config.primary_llm,
                prompt,
                "initial_answer",
                |piece| StreamPacket::PhaseAnswerPiece { level: 0, piece },
            )
            .await?;
            ctx.emitter
                .dispatch("phase_finished", StreamPacket::PhaseFinished { level: 0 })
                .await;

            let stats = compute_initial_stats(
                &state.answer_results,
                &state.original_question_retrieval_stats,
            );
            info!(
                utilized_chunk_ratio = ?stats.effectiveness.utilized_chunk_ratio,
                support_ratio = ?stats.effectiveness.support_ratio,
                "initial answer generated"
            );

            let base_end_time = Utc::now();
            let duration_s = state
                .start_time
                .map(|start| (base_end_time - start).num_milliseconds() as f64 / 1000.0);

            let base_metrics = BaseMetrics {
                num_verified_documents_total: relevant_docs.len(),
                num_verified_documents_core: state.original_question_retrieval_stats.verified_count,
                verified_avg_score_core: state.original_question_retrieval_stats.verified_avg_score,
                num_verified_documents_base: stats.sub_questions.num_verified_documents,
                verified_avg_score_base: stats.sub_questions.verified_avg_score,
                doc_boost_factor: stats.effectiveness.utilized_chunk_ratio,
                support_boost_factor: stats.effectiveness.support_ratio,
                duration_s,
            };

            Ok(MainDelta {
                initial_answer: Some(answer),
                initial_answer_stats: Some(stats),
                base_end_time: Some(base_end_time),
                base_metrics: Some(base_metrics),
                ..Default::default()
            })
        })
    }
}

/// Plain-RAG baseline answer over the original-question documents only,
/// kept for comparison logging. Not streamed to the client.
pub struct GenerateBaseAnswer;

impl GraphNode<MainState> for GenerateBaseAnswer {
    fn name(&self) -> &'static str {
        "generate_initial_base_answer"
    }

    fn writes(&self) -> &'static [MainField] {
        &[MainField::InitialBaseAnswer]
    }

    fn run<'a>(
        &'a self,
        state: &'a MainState,
        ctx: &'a NodeContext,
    ) -> BoxFuture<'a, Result<MainDelta>> {
        Box::pin(async move {
            let prompt = prompts::fill(
                prompts::BASE_SYNTHESIS_PROMPT,
                &[
                    ("question", ctx.config.query.as_str()),
                    (
                        "context",
                        &prompts::format_docs(&state.original_question_documents),
                    ),
                ],
            );
            let answer = ctx.config.fast_llm.invoke(prompt).await?;
            debug!(chars = answer.len(), "baseline answer generated");
            Ok(MainDelta {
                initial_base_answer: Some(answer),
                ..Default::default()
            })
        })
    }
}

/// Check whether the initial answer satisfies the original question.
/// The verdict is currently fixed; the node exists so the policy has a
/// seam.
pub struct CheckInitialAnswer;

impl GraphNode<MainState> for CheckInitialAnswer {
    fn name(&self) -> &'static str {
        "check_initial_answer"
    }

    fn writes(&self) -> &'static [MainField] {
        &[MainField::InitialAnswerQuality]
    }

    fn run<'a>(
        &'a self,
        _state: &'a MainState,
        _ctx: &'a NodeContext,
    ) -> BoxFuture<'a, Result<MainDelta>> {
        Box::pin(async move {
            debug!("initial answer quality check (fixed positive verdict)");
            Ok(MainDelta {
                initial_answer_quality: Some(true),
                ..Default::default()
            })
        })
    }
}

/// Synthesize the refined answer from the combined initial and follow-up
/// evidence, computing revision-efficiency stats and refined metrics.
pub struct GenerateRefinedAnswer;

impl GraphNode<MainState> for GenerateRefinedAnswer {
    fn name(&self) -> &'static str {
        "generate_refined_answer"
    }

    fn writes(&self) -> &'static [MainField] {
        &[
            MainField::RefinedAnswer,
            MainField::RefinedAnswerStats,
            MainField::RefinedEndTime,
            MainField::RefinedMetrics,
        ]
    }

    fn run<'a>(
        &'a self,
        state: &'a MainState,
        ctx: &'a NodeContext,
    ) -> BoxFuture<'a, Result<MainDelta>> {
        Box::pin(async move {
            let combined_documents = dedup_sections(
                state
                    .documents
                    .iter()
                    .chain(state.follow_up_documents.iter())
                    .cloned(),
            );
            let doc_efficiency = revision_doc_efficiency(
                state.documents.len(),
                state.follow_up_documents.len(),
                combined_documents.len(),
            );

            let initial_good: HashSet<&str> = state
                .answer_results
                .iter()
                .filter(|r| r.is_usable())
                .map(|r| r.question.as_str())
                .collect();
            let new_good: HashSet<&str> = state
                .follow_up_answer_results
                .iter()
                .filter(|r| r.is_usable())
                .map(|r| r.question.as_str())
                .collect();
            let total_good = initial_good.union(&new_good).count();
            let question_efficiency = revision_question_efficiency(
                initial_good.len(),
                new_good.len(),
                total_good,
            );

            // Usable answers from both phases, first occurrence wins
            let mut seen = HashSet::new();
            let good_qa: Vec<String> = format_good_answers(
                state
                    .answer_results
                    .iter()
                    .chain(state.follow_up_answer_results.iter()),
            )
            .into_iter()
            .filter(|entry| seen.insert(entry.clone()))
            .collect();

            let persona = prompts::persona_specification(ctx.config.persona_prompt.as_deref());
            let context = prompts::format_docs(&combined_documents);
            let initial_answer = state.initial_answer.as_deref().unwrap_or("");

            let prompt = if good_qa.is_empty() {
                prompts::fill(
                    prompts::REFINED_SYNTHESIS_PROMPT_NO_SUB_ANSWERS,
                    &[
                        ("persona_specification", persona.as_str()),
                        ("question", ctx.config.query.as_str()),
                        ("initial_answer", initial_answer),
                        ("context", context.as_str()),
                    ],
                )
            } else {
                prompts::fill(
                    prompts::REFINED_SYNTHESIS_PROMPT,
                    &[
                        ("persona_specification", persona.as_str()),
                        ("question", ctx.config.query.as_str()),
                        ("initial_answer", initial_answer),
                        ("answered_sub_questions", &good_qa.join("\n\n------\n\n")),
                        ("context", context.as_str()),
                    ],
                )
            };

            let answer = stream_answer_pieces(
                ctx,
                &ctx.config.primary_llm,
                prompt,
                "refined_answer",
                |piece| StreamPacket::PhaseAnswerPiece { level: 1, piece },
            )
            .await?;
            ctx.emitter
                .dispatch("phase_finished", StreamPacket::PhaseFinished { level: 1 })
                .await;

            let refined_end_time = Utc::now();
            let duration_s = state
                .refined_start_time
                .map(|start| (refined_end_time - start).num_milliseconds() as f64 / 1000.0);

            info!(
                doc_efficiency,
                question_efficiency, "refined answer generated"
            );

            Ok(MainDelta {
                refined_answer: Some(answer),
                refined_answer_stats: Some(RefinedAnswerStats {
                    revision_doc_efficiency: Some(doc_efficiency),
                    revision_question_efficiency: Some(question_efficiency),
                }),
                refined_end_time: Some(refined_end_time),
                refined_metrics: Some(RefinedMetrics {
                    doc_boost_factor: Some(doc_efficiency),
                    question_boost_factor: Some(question_efficiency),
                    duration_s,
                }),
                ..Default::default()
            })
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use loupe_core::types::{QuestionId, RetrievalStats, UNKNOWN_ANSWER};
    use loupe_graph::event::{EventEmitter, ExecEvent};
    use loupe_graph::state::PipelineState;
    use loupe_test_utils::{make_section, MockLlm};
    use std::sync::Arc;
    use tokio::sync::mpsc;
    use tokio_util::sync::CancellationToken;

    fn ctx_with_primary(llm: MockLlm) -> (NodeContext, mpsc::Receiver<ExecEvent>, Arc<MockLlm>) {
        let (tx, rx) = mpsc::channel(512);
        let cancel = CancellationToken::new();
        let llm = Arc::new(llm);
        let mut config = loupe_test_utils::test_config("What are the guiding principles behind X?");
        config.primary_llm = llm.clone();
        (
            NodeContext::new(config, EventEmitter::new(tx, cancel.clone()), cancel),
            rx,
            llm,
        )
    }

    fn result(num: usize, answer: &str, quality: &str) -> QuestionAnswerResult {
        QuestionAnswerResult {
            question: format!("sub-question {num}"),
            question_id: QuestionId::new(0, num),
            answer: answer.into(),
            quality: quality.into(),
            query_results: vec![],
            documents: vec![],
            retrieval_stats: RetrievalStats::default(),
        }
    }

    #[tokio::test]
    async fn test_initial_answer_uses_sub_answers_when_usable() {
        let (ctx, _rx, llm) = ctx_with_primary(MockLlm::new("The principles are ..."));
        let mut state = MainState::default();
        state.apply(MainDelta {
            start_time: Some(Utc::now()),
            answer_results: vec![
                result(1, "First answer.", "yes - good"),
                result(2, UNKNOWN_ANSWER, "no - unanswered"),
            ],
            documents: vec![make_section("d1", 0, 0.9)],
            ..Default::default()
        });

        let delta = GenerateInitialAnswer.run(&state, &ctx).await.unwrap();
        assert_eq!(delta.initial_answer.as_deref(), Some("The principles are ..."));
        assert!(delta.base_metrics.is_some());
        assert!(delta.base_end_time.is_some());

        let prompt = llm.prompts().remove(0);
        assert!(prompt.contains("sub-question 1"));
        assert!(prompt.contains("First answer."));
        // The unanswered sub-question must not be cited
        assert!(!prompt.contains("sub-question 2"));
    }

    #[tokio::test]
    async fn test_initial_answer_without_usable_sub_answers() {
        let (ctx, mut rx, llm) = ctx_with_primary(MockLlm::new("Answer from documents."));
        let mut state = MainState::default();
        state.apply(MainDelta {
            answer_results: vec![result(1, UNKNOWN_ANSWER, "no")],
            original_question_documents: vec![make_section("orig", 0, 0.8)],
            ..Default::default()
        });

        let delta = GenerateInitialAnswer.run(&state, &ctx).await.unwrap();
        assert!(delta.initial_answer.is_some());

        // The no-sub-answers template does not carry the sub-answer block
        let prompt = llm.prompts().remove(0);
        assert!(!prompt.contains("Answered sub-questions"));
        // Synthesis fell back to original-question documents
        assert!(prompt.contains("Content of orig chunk 0."));

        let mut phase_finished = 0;
        while let Ok(event) = rx.try_recv() {
            if let ExecEvent::Custom {
                name: "phase_finished",
                ..
            } = event
            {
                phase_finished += 1;
            }
        }
        assert_eq!(phase_finished, 1);
    }

    #[tokio::test]
    async fn test_refined_answer_stats() {
        let (ctx, _rx, _llm) = ctx_with_primary(MockLlm::new("Refined."));
        let mut state = MainState::default();
        state.apply(MainDelta {
            refined_start_time: Some(Utc::now()),
            initial_answer: Some("Draft.".into()),
            answer_results: vec![result(1, "Initial good.", "yes")],
            follow_up_answer_results: vec![{
                let mut r = result(1, "Follow-up good.", "yes");
                r.question = "follow-up question".into();
                r.question_id = QuestionId::new(1, 0);
                r
            }],
            documents: vec![make_section("d1", 0, 0.9), make_section("d2", 0, 0.8)],
            follow_up_documents: vec![make_section("d2", 0, 0.8), make_section("d3", 0, 0.7)],
            ..Default::default()
        });

        let delta = GenerateRefinedAnswer.run(&state, &ctx).await.unwrap();
        let stats = delta.refined_answer_stats.unwrap();
        // combined 3 over initial 2
        assert_eq!(stats.revision_doc_efficiency, Some(1.5));
        // 2 good total over 1 initial good
        assert_eq!(stats.revision_question_efficiency, Some(2.0));
        assert_eq!(delta.refined_answer.as_deref(), Some("Refined."));
        assert!(delta.refined_metrics.unwrap().duration_s.is_some());
    }

    #[tokio::test]
    async fn test_base_answer_uses_fast_llm() {
        let (tx, _rx) = mpsc::channel(64);
        let cancel = CancellationToken::new();
        let fast = Arc::new(MockLlm::new("Base answer."));
        let mut config = loupe_test_utils::test_config("q");
        config.fast_llm = fast.clone();
        let ctx = NodeContext::new(config, EventEmitter::new(tx, cancel.clone()), cancel);

        let delta = GenerateBaseAnswer
            .run(&MainState::default(), &ctx)
            .await
            .unwrap();
        assert_eq!(delta.initial_base_answer.as_deref(), Some("Base answer."));
        assert_eq!(fast.call_count(), 1);
    }
}
