//! Question decomposition: the initial pass and the follow-up (refinement)
//! pass.

use chrono::Utc;
use futures::future::BoxFuture;
use tracing::{debug, info};

use loupe_core::error::{LoupeError, Result};
use loupe_core::models::FollowUpSubQuestion;
use loupe_core::types::{QuestionId, StreamPacket};
use loupe_graph::node::{GraphNode, NodeContext};

use crate::parsing::strip_code_fences;
use crate::prompts;
use crate::state::{MainDelta, MainField, MainState};
use crate::streaming::stream_line_packets;

/// Decompose the original question into initial sub-questions.
///
/// Streams the fast LLM and emits one sub-question packet per parsed line
/// as soon as its delimiter is seen. Also records the run start timestamp.
pub struct Decompose;

impl GraphNode<MainState> for Decompose {
    fn name(&self) -> &'static str {
        "decompose"
    }

    fn writes(&self) -> &'static [MainField] {
        &[MainField::SubQuestions, MainField::StartTime]
    }

    fn run<'a>(
        &'a self,
        _state: &'a MainState,
        ctx: &'a NodeContext,
    ) -> BoxFuture<'a, Result<MainDelta>> {
        Box::pin(async move {
            let start_time = Utc::now();
            let prompt = prompts::fill(
                prompts::INITIAL_DECOMPOSITION_PROMPT,
                &[("question", &ctx.config.query)],
            );

            let sub_questions = stream_line_packets(
                ctx,
                &ctx.config.fast_llm,
                prompt,
                "sub_questions",
                |index, text| StreamPacket::SubQuestion {
                    // Ordinal 0 is reserved for the original question
                    id: QuestionId::new(0, index + 1),
                    text,
                },
            )
            .await?;

            info!(count = sub_questions.len(), "decomposed question");

            Ok(MainDelta {
                start_time: Some(start_time),
                sub_questions: Some(sub_questions),
                ..Default::default()
            })
        })
    }
}

/// Decompose follow-up sub-questions for the refinement pass.
///
/// The prompt carries the initial answer, the entity/term extraction, and
/// the addressed/failed sub-question lists. The response must be a fenced
/// JSON object; an unparsable response fails the run — there is no safe
/// default for structured extraction.
pub struct FollowUpDecompose;

impl GraphNode<MainState> for FollowUpDecompose {
    fn name(&self) -> &'static str {
        "follow_up_decompose"
    }

    fn writes(&self) -> &'static [MainField] {
        &[
            MainField::FollowUpSubQuestions,
            MainField::RefinedStartTime,
        ]
    }

    fn run<'a>(
        &'a self,
        state: &'a MainState,
        ctx: &'a NodeContext,
    ) -> BoxFuture<'a, Result<MainDelta>> {
        Box::pin(async move {
            let refined_start_time = Utc::now();

            let addressed: Vec<&str> = state
                .answer_results
                .iter()
                .filter(|r| r.quality.to_lowercase().contains("yes"))
                .map(|r| r.question.as_str())
                .collect();
            let failed: Vec<&str> = state
                .answer_results
                .iter()
                .filter(|r| r.quality.to_lowercase().contains("no"))
                .map(|r| r.question.as_str())
                .collect();

            let extraction = state.extraction.clone().unwrap_or_default();
            let prompt = prompts::fill(
                prompts::FOLLOW_UP_DECOMPOSITION_PROMPT,
                &[
                    ("question", ctx.config.query.as_str()),
                    ("base_answer", state.initial_answer.as_deref().unwrap_or("")),
                    (
                        "entity_term_extraction",
                        &prompts::format_entity_term_extraction(&extraction),
                    ),
                    ("answered_sub_questions", &addressed.join("\n - ")),
                    ("failed_sub_questions", &failed.join("\n - ")),
                ],
            );

            let response = ctx.config.fast_llm.invoke(prompt).await?;
            let cleaned = strip_code_fences(&response);
            let parsed: serde_json::Value = serde_json::from_str(&cleaned)
                .map_err(|e| LoupeError::LlmParse(format!("follow-up decomposition: {e}")))?;

            let raw_questions = parsed
                .get("sub_questions")
                .and_then(|v| v.as_array())
                .ok_or_else(|| {
                    LoupeError::LlmParse("follow-up decomposition: missing sub_questions".into())
                })?;

            let mut follow_ups = Vec::new();
            for (num, entry) in raw_questions.iter().enumerate() {
                let Some(text) = entry
                    .get("sub_question")
                    .and_then(|v| v.as_str())
                    .or_else(|| entry.as_str())
                else {
                    debug!(num, "skipping malformed follow-up sub-question entry");
                    continue;
                };
                let question_id = QuestionId::new(1, num);
                ctx.emitter
                    .dispatch(
                        "sub_questions",
                        StreamPacket::SubQuestion {
                            id: question_id,
                            text: text.to_string(),
                        },
                    )
                    .await;
                follow_ups.push(FollowUpSubQuestion {
                    question: text.to_string(),
                    question_id,
                    verified: false,
                    answered: false,
                    answer: String::new(),
                });
            }

            info!(count = follow_ups.len(), "decomposed follow-up questions");

            Ok(MainDelta {
                refined_start_time: Some(refined_start_time),
                follow_up_sub_questions: Some(follow_ups),
                ..Default::default()
            })
        })
    }
}
