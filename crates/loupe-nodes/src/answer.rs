//! Sub-answer generation and grading for one branch.

use futures::future::BoxFuture;
use tracing::debug;

use loupe_core::error::Result;
use loupe_core::types::{StreamPacket, UNKNOWN_ANSWER};
use loupe_graph::node::{GraphNode, NodeContext};

use crate::prompts;
use crate::state::{BranchDelta, BranchField, BranchState};
use crate::streaming::stream_answer_pieces;

/// Generate the sub-answer from the reranked sections, streaming each
/// token as a packet.
pub struct GenerateAnswer;

impl GraphNode<BranchState> for GenerateAnswer {
    fn name(&self) -> &'static str {
        "generate_answer"
    }

    fn writes(&self) -> &'static [BranchField] {
        &[BranchField::Answer]
    }

    fn run<'a>(
        &'a self,
        state: &'a BranchState,
        ctx: &'a NodeContext,
    ) -> BoxFuture<'a, Result<BranchDelta>> {
        Box::pin(async move {
            let prompt = prompts::fill(
                prompts::SUB_ANSWER_PROMPT,
                &[
                    ("question", state.question.as_str()),
                    ("context", &prompts::format_docs(&state.reranked_documents)),
                ],
            );

            let question_id = state.question_id;
            let answer = stream_answer_pieces(
                ctx,
                &ctx.config.fast_llm,
                prompt,
                "sub_answers",
                move |piece| StreamPacket::SubAnswerPiece {
                    id: question_id,
                    piece,
                },
            )
            .await?;

            ctx.emitter
                .dispatch(
                    "sub_answer_finished",
                    StreamPacket::SubAnswerFinished { id: question_id },
                )
                .await;

            // Normalize a cannot-answer response to the sentinel so the
            // grader's fast path sees one canonical form.
            let answer = answer.trim().to_string();
            let answer = if answer.is_empty() || answer.starts_with(UNKNOWN_ANSWER) {
                UNKNOWN_ANSWER.to_string()
            } else {
                answer
            };

            Ok(BranchDelta {
                answer: Some(answer),
                ..Default::default()
            })
        })
    }
}

/// Grade whether the sub-answer addresses its sub-question.
///
/// The unknown sentinel short-circuits to a negative verdict without an
/// LLM call.
pub struct GradeAnswer;

impl GraphNode<BranchState> for GradeAnswer {
    fn name(&self) -> &'static str {
        "grade_answer"
    }

    fn writes(&self) -> &'static [BranchField] {
        &[BranchField::Quality]
    }

    fn run<'a>(
        &'a self,
        state: &'a BranchState,
        ctx: &'a NodeContext,
    ) -> BoxFuture<'a, Result<BranchDelta>> {
        Box::pin(async move {
            if state.answer == UNKNOWN_ANSWER {
                debug!(question_id = %state.question_id, "unknown answer, skipping grading");
                return Ok(BranchDelta {
                    quality: Some("no - unanswered".to_string()),
                    ..Default::default()
                });
            }

            let prompt = prompts::fill(
                prompts::SUB_CHECK_PROMPT,
                &[
                    ("question", state.question.as_str()),
                    ("answer", state.answer.as_str()),
                ],
            );
            let quality = ctx.config.fast_llm.invoke(prompt).await?;

            Ok(BranchDelta {
                quality: Some(quality),
                ..Default::default()
            })
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use loupe_graph::event::{EventEmitter, ExecEvent};
    use loupe_test_utils::MockLlm;
    use std::sync::Arc;
    use tokio::sync::mpsc;
    use tokio_util::sync::CancellationToken;

    fn ctx_with_llm(llm: MockLlm) -> (NodeContext, mpsc::Receiver<ExecEvent>, Arc<MockLlm>) {
        let (tx, rx) = mpsc::channel(256);
        let cancel = CancellationToken::new();
        let llm = Arc::new(llm);
        let mut config = loupe_test_utils::test_config("q");
        config.fast_llm = llm.clone();
        (
            NodeContext::new(config, EventEmitter::new(tx, cancel.clone()), cancel),
            rx,
            llm,
        )
    }

    #[tokio::test]
    async fn test_generate_streams_and_finishes() {
        let (ctx, mut rx, _llm) = ctx_with_llm(MockLlm::new("X is a database system."));
        let state = BranchState::for_question("what is x?", Default::default());

        let delta = GenerateAnswer.run(&state, &ctx).await.unwrap();
        assert_eq!(delta.answer.as_deref(), Some("X is a database system."));

        let mut pieces = 0;
        let mut finished = 0;
        while let Ok(event) = rx.try_recv() {
            match event {
                ExecEvent::Custom {
                    name: "sub_answers",
                    ..
                } => pieces += 1,
                ExecEvent::Custom {
                    name: "sub_answer_finished",
                    ..
                } => finished += 1,
                _ => {}
            }
        }
        assert!(pieces > 1);
        assert_eq!(finished, 1);
    }

    #[tokio::test]
    async fn test_generate_normalizes_unknown() {
        let (ctx, _rx, _llm) = ctx_with_llm(MockLlm::new("I don't know  "));
        let state = BranchState::for_question("q", Default::default());
        let delta = GenerateAnswer.run(&state, &ctx).await.unwrap();
        assert_eq!(delta.answer.as_deref(), Some(UNKNOWN_ANSWER));
    }

    #[tokio::test]
    async fn test_grade_short_circuits_on_unknown() {
        let (ctx, _rx, llm) = ctx_with_llm(MockLlm::new("yes"));
        let mut state = BranchState::for_question("q", Default::default());
        state.answer = UNKNOWN_ANSWER.to_string();

        let delta = GradeAnswer.run(&state, &ctx).await.unwrap();
        assert!(delta.quality.unwrap().starts_with("no"));
        // The fast path must not issue an LLM call
        assert_eq!(llm.call_count(), 0);
    }

    #[tokio::test]
    async fn test_grade_calls_llm_for_real_answer() {
        let (ctx, _rx, llm) = ctx_with_llm(MockLlm::new("yes - addresses the question"));
        let mut state = BranchState::for_question("q", Default::default());
        state.answer = "a real answer".to_string();

        let delta = GradeAnswer.run(&state, &ctx).await.unwrap();
        assert!(delta.quality.unwrap().starts_with("yes"));
        assert_eq!(llm.call_count(), 1);
    }
}
