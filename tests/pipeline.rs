//! End-to-end pipeline tests over mock collaborators.

use std::sync::Arc;
use std::time::{Duration, Instant};

use futures::future::BoxFuture;
use futures::stream::BoxStream;

use loupe::{
    run_pipeline, LlmClient, LoupeError, NeverRefine, QuestionId, Result, RunConfig, StreamPacket,
    UNKNOWN_ANSWER,
};
use loupe_test_utils::{init_tracing, make_section, MockLlm, MockSearch, RecordingMetrics};

/// Fast-LLM rules covering every prompt the pipeline issues.
fn scripted_fast_llm() -> MockLlm {
    MockLlm::new("yes")
        .with_rule(
            "Decompose the question below",
            "sub q one\nsub q two\nsub q three",
        )
        .with_rule(
            "Propose follow-up sub-questions",
            r#"{"sub_questions": [{"sub_question": "follow-up one"}]}"#,
        )
        .with_rule("keyword search", "alpha query\nbeta query")
        .with_rule("Determine whether the document excerpt", "yes")
        .with_rule("respond with exactly: I don't know", "A solid sub-answer.")
        .with_rule("Determine whether the proposed answer", "yes - addressed")
        .with_rule(
            "extract the entities",
            r#"{"retrieved_entities_relationships": {"entities": [{"entity_name": "X", "entity_type": "topic"}]}}"#,
        )
        .with_rule(
            "Answer the question using only the documents below",
            "Baseline answer.",
        )
}

fn scripted_primary_llm() -> MockLlm {
    MockLlm::new("Synthesized answer.").with_rule("A first research pass", "Refined synthesis.")
}

fn base_config(fast: Arc<MockLlm>, primary: Arc<MockLlm>, search: Arc<MockSearch>) -> RunConfig {
    RunConfig::new(
        "What are the guiding principles behind X?",
        fast,
        primary,
        search,
    )
}

#[tokio::test(flavor = "multi_thread")]
async fn test_full_run_with_refinement() {
    init_tracing();
    let fast = Arc::new(scripted_fast_llm());
    let primary = Arc::new(scripted_primary_llm());
    let search = Arc::new(MockSearch::new(vec![
        make_section("d1", 0, 0.9),
        make_section("d2", 0, 0.8),
        make_section("d3", 0, 0.7),
    ]));
    let metrics = Arc::new(RecordingMetrics::default());

    let config = base_config(fast, primary, search).with_persistence(
        metrics.clone(),
        uuid::Uuid::new_v4(),
        42,
    );

    let mut stream = run_pipeline(config).unwrap();
    let mut packets = Vec::new();
    while let Some(packet) = stream.next_packet().await {
        packets.push(packet);
    }
    let state = stream.finish().await.unwrap();

    // Three parallel branches produced three results post fan-in
    assert_eq!(state.answer_results.len(), 3);
    assert!(state.answer_results.iter().all(|r| r.is_usable()));
    assert_eq!(state.follow_up_answer_results.len(), 1);

    // Documents are deduplicated across branches by chunk identity
    assert_eq!(state.documents.len(), 3);
    assert_eq!(state.original_question_documents.len(), 3);
    assert_eq!(
        state.original_question_retrieval_stats.verified_count,
        Some(3)
    );

    assert_eq!(state.initial_answer.as_deref(), Some("Synthesized answer."));
    assert_eq!(state.initial_base_answer.as_deref(), Some("Baseline answer."));
    assert_eq!(state.refined_answer.as_deref(), Some("Refined synthesis."));
    assert!(state.initial_answer_stats.is_some());
    assert_eq!(state.require_refinement, Some(true));

    // Stream protocol: kickoff first, then decomposition before answers
    assert!(matches!(packets[0], StreamPacket::ToolStart { .. }));
    let sub_questions: Vec<&StreamPacket> = packets
        .iter()
        .filter(|p| matches!(p, StreamPacket::SubQuestion { id, .. } if id.level == 0))
        .collect();
    assert_eq!(sub_questions.len(), 3);
    assert!(packets
        .iter()
        .any(|p| matches!(p, StreamPacket::SubQuestion { id, .. } if id.level == 1)));
    assert!(packets
        .iter()
        .any(|p| matches!(p, StreamPacket::PhaseFinished { level: 0 })));
    assert!(packets
        .iter()
        .any(|p| matches!(p, StreamPacket::PhaseFinished { level: 1 })));
    assert!(packets
        .iter()
        .any(|p| matches!(p, StreamPacket::RefinementStarted { .. })));
    // Per-branch sub-answer tokens carry their branch ordinal
    assert!(packets.iter().any(
        |p| matches!(p, StreamPacket::SubAnswerPiece { id, .. } if *id == QuestionId::new(0, 2))
    ));

    // One combined metrics record was persisted
    let records = metrics.records();
    assert_eq!(records.len(), 1);
    assert_eq!(records[0].agent_type, "refined");
    assert!(records[0].metrics.timings.base_duration_s.is_some());
    assert!(records[0].metrics.timings.refined_duration_s.is_some());
    assert!(records[0].metrics.base.is_some());
    assert!(records[0].metrics.refined.is_some());
}

#[tokio::test(flavor = "multi_thread")]
async fn test_zero_sub_questions_falls_back_to_original_docs() {
    init_tracing();
    // Rules match in registration order, so the empty decomposition must
    // come first.
    let fast = Arc::new(
        MockLlm::new("yes")
            .with_rule("Decompose the question below", "\n")
            .with_rule("keyword search", "alpha query")
            .with_rule("Determine whether the document excerpt", "yes")
            .with_rule(
                "Answer the question using only the documents below",
                "Baseline answer.",
            ),
    );
    let primary = Arc::new(scripted_primary_llm());
    let search = Arc::new(MockSearch::new(vec![
        make_section("orig", 0, 0.9),
        make_section("orig", 1, 0.8),
    ]));

    let mut config = base_config(fast, primary.clone(), search);
    config.refine_policy = Arc::new(NeverRefine);

    let mut stream = run_pipeline(config).unwrap();
    while stream.next_packet().await.is_some() {}
    let state = stream.finish().await.unwrap();

    // Fan-in was reached with an explicitly empty result
    assert!(state.sub_questions.is_empty());
    assert!(state.answer_results.is_empty());
    assert!(state.documents.is_empty());

    // Synthesis proceeded using only original-question documents
    assert!(state.initial_answer.is_some());
    let synthesis_prompt = primary
        .prompts()
        .into_iter()
        .find(|p| p.contains("retrieved documents"))
        .expect("no-sub-answers synthesis prompt");
    assert!(synthesis_prompt.contains("Content of orig chunk 0."));

    assert_eq!(state.require_refinement, Some(false));
    assert!(state.refined_answer.is_none());
}

#[tokio::test(flavor = "multi_thread")]
async fn test_unknown_answer_skips_grading_call() {
    init_tracing();
    let fast = Arc::new(
        MockLlm::new("yes")
            .with_rule("Decompose the question below", "only sub question")
            .with_rule("keyword search", "one query")
            .with_rule("Determine whether the document excerpt", "yes")
            .with_rule("respond with exactly: I don't know", "I don't know")
            .with_rule(
                "Answer the question using only the documents below",
                "Baseline answer.",
            ),
    );
    let primary = Arc::new(scripted_primary_llm());
    let search = Arc::new(MockSearch::new(vec![make_section("d1", 0, 0.5)]));

    let mut config = base_config(fast.clone(), primary, search);
    config.refine_policy = Arc::new(NeverRefine);

    let mut stream = run_pipeline(config).unwrap();
    while stream.next_packet().await.is_some() {}
    let state = stream.finish().await.unwrap();

    assert_eq!(state.answer_results.len(), 1);
    assert_eq!(state.answer_results[0].answer, UNKNOWN_ANSWER);
    assert!(state.answer_results[0].quality.starts_with("no"));

    // The grader must not have issued an LLM call for the sentinel answer
    assert!(!fast
        .prompts()
        .iter()
        .any(|p| p.contains("Determine whether the proposed answer")));
}

#[tokio::test]
async fn test_missing_run_identifiers_fail_before_any_node() {
    let fast = Arc::new(scripted_fast_llm());
    let primary = Arc::new(scripted_primary_llm());
    let search = Arc::new(MockSearch::empty());

    let mut config = base_config(fast.clone(), primary, search);
    config.use_persistence = true; // but no session/message ids

    let result = run_pipeline(config);
    assert!(matches!(result, Err(LoupeError::Config(_))));
    // Nothing ran
    assert_eq!(fast.call_count(), 0);
}

/// LLM wrapper that stalls on prompts matching a pattern, so a run can be
/// cancelled while branches are mid-flight.
struct StallingLlm {
    inner: MockLlm,
    slow_pattern: String,
    delay: Duration,
}

impl LlmClient for StallingLlm {
    fn stream(&self, prompt: String) -> BoxFuture<'_, Result<BoxStream<'static, Result<String>>>> {
        Box::pin(async move {
            if prompt.contains(&self.slow_pattern) {
                tokio::time::sleep(self.delay).await;
            }
            self.inner.stream(prompt).await
        })
    }

    fn invoke(&self, prompt: String) -> BoxFuture<'_, Result<String>> {
        Box::pin(async move {
            if prompt.contains(&self.slow_pattern) {
                tokio::time::sleep(self.delay).await;
            }
            self.inner.invoke(prompt).await
        })
    }
}

#[tokio::test(flavor = "multi_thread")]
async fn test_cancel_mid_run_stops_branches() {
    init_tracing();
    let fast = Arc::new(StallingLlm {
        inner: scripted_fast_llm(),
        // Stall inside the parallel branches, after decomposition
        slow_pattern: "Determine whether the document excerpt".into(),
        delay: Duration::from_secs(30),
    });
    let primary = Arc::new(scripted_primary_llm());
    let search = Arc::new(MockSearch::new(vec![make_section("d1", 0, 0.9)]));

    let config = RunConfig::new(
        "What are the guiding principles behind X?",
        fast,
        primary,
        search,
    );

    let started = Instant::now();
    let mut stream = run_pipeline(config).unwrap();

    // Read until the decomposition has fanned out
    let mut seen_sub_questions = 0;
    while let Some(packet) = stream.next_packet().await {
        if matches!(packet, StreamPacket::SubQuestion { .. }) {
            seen_sub_questions += 1;
            if seen_sub_questions == 3 {
                break;
            }
        }
    }

    // Consumer stops reading: teardown must cancel all in-flight branches
    // and await the run task before returning.
    let result = stream.cancel().await;
    assert!(matches!(result, Err(LoupeError::Cancelled)));
    assert!(
        started.elapsed() < Duration::from_secs(10),
        "teardown did not cancel in-flight branches promptly"
    );
}

#[tokio::test(flavor = "multi_thread")]
async fn test_blocking_consumer_on_dedicated_thread() {
    init_tracing();
    let fast = Arc::new(scripted_fast_llm());
    let primary = Arc::new(scripted_primary_llm());
    let search = Arc::new(MockSearch::new(vec![make_section("d1", 0, 0.9)]));

    let mut config = base_config(fast, primary, search);
    config.refine_policy = Arc::new(NeverRefine);

    let mut stream = run_pipeline(config).unwrap();
    let packets = tokio::task::spawn_blocking(move || {
        let packets: Vec<StreamPacket> = stream.blocking_packets().collect();
        (packets, stream)
    });
    let (packets, stream) = packets.await.unwrap();

    assert!(matches!(packets[0], StreamPacket::ToolStart { .. }));
    assert!(packets
        .iter()
        .any(|p| matches!(p, StreamPacket::PhaseFinished { level: 0 })));

    let state = stream.finish().await.unwrap();
    assert_eq!(state.answer_results.len(), 3);
}

#[tokio::test]
async fn test_compiled_graph_singleton_and_teardown() {
    let first = loupe::compiled_main_graph().unwrap();
    let second = loupe::compiled_main_graph().unwrap();
    assert!(Arc::ptr_eq(&first, &second));

    loupe::reset_compiled_graph();
    let third = loupe::compiled_main_graph().unwrap();
    assert!(!Arc::ptr_eq(&first, &third));
}
