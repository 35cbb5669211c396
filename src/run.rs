//! Pipeline entry point: compile the graph once, run it on a spawned
//! task, and hand the caller the packet stream.

use std::sync::{Arc, Mutex};

use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use loupe_core::config::RunConfig;
use loupe_core::error::{LoupeError, Result};
use loupe_core::types::StreamPacket;
use loupe_graph::event::EventEmitter;
use loupe_graph::executor::Graph;
use loupe_graph::node::NodeContext;
use loupe_graph::stream::AnswerStream;
use loupe_nodes::{build_main_graph, MainState};

/// Name reported in the tool-invocation kickoff packet.
pub const SEARCH_TOOL_NAME: &str = "agentic_search";

// Compiled once per process; the topology is stateless and shared across
// runs. `reset_compiled_graph` tears it down for tests.
static MAIN_GRAPH: Mutex<Option<Arc<Graph<MainState>>>> = Mutex::new(None);

/// The lazily compiled main graph.
pub fn compiled_main_graph() -> Result<Arc<Graph<MainState>>> {
    let mut guard = MAIN_GRAPH
        .lock()
        .map_err(|_| LoupeError::Graph("compiled graph lock poisoned".into()))?;
    if let Some(graph) = guard.as_ref() {
        return Ok(graph.clone());
    }
    let graph = Arc::new(build_main_graph()?);
    *guard = Some(graph.clone());
    Ok(graph)
}

/// Drop the compiled graph so the next run rebuilds it. Intended for
/// tests.
pub fn reset_compiled_graph() {
    if let Ok(mut guard) = MAIN_GRAPH.lock() {
        *guard = None;
    }
}

/// Start one pipeline run and return its packet stream.
///
/// Configuration errors are raised here, before any node executes. Must be
/// called from within a tokio runtime; the run itself executes on a
/// spawned task and is cancelled when the stream is cancelled or dropped.
pub fn run_pipeline(config: RunConfig) -> Result<AnswerStream<MainState>> {
    config.validate()?;
    let graph = compiled_main_graph()?;

    let capacity = config.settings.event_channel_capacity.max(1);
    let (tx, rx) = mpsc::channel(capacity);
    let cancel = CancellationToken::new();
    let emitter = EventEmitter::new(tx, cancel.clone());
    let ctx = NodeContext::new(config, emitter, cancel.clone());

    let handle = tokio::spawn(async move {
        // Announce the run to the client before the graph starts.
        ctx.emitter
            .dispatch(
                "tool_start",
                StreamPacket::ToolStart {
                    tool_name: SEARCH_TOOL_NAME.to_string(),
                    query: ctx.config.query.clone(),
                },
            )
            .await;
        graph.execute(MainState::default(), &ctx).await
    });

    Ok(AnswerStream::new(rx, cancel, handle))
}
