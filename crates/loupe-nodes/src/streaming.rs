//! Shared helpers for consuming LLM token streams while dispatching
//! packets incrementally.

use std::sync::Arc;

use futures::StreamExt;

use loupe_core::error::{LoupeError, Result};
use loupe_core::traits::LlmClient;
use loupe_core::types::StreamPacket;
use loupe_graph::node::NodeContext;

/// Stream a newline-delimited LLM response, dispatching one packet per
/// completed non-empty line as soon as its delimiter is seen. Returns the
/// parsed lines.
pub(crate) async fn stream_line_packets(
    ctx: &NodeContext,
    llm: &Arc<dyn LlmClient>,
    prompt: String,
    event_name: &'static str,
    mut make_packet: impl FnMut(usize, String) -> StreamPacket,
) -> Result<Vec<String>> {
    let mut stream = llm.stream(prompt).await?;
    let mut buffer = String::new();
    let mut lines: Vec<String> = Vec::new();

    while let Some(fragment) = stream.next().await {
        if ctx.cancel.is_cancelled() {
            return Err(LoupeError::Cancelled);
        }
        buffer.push_str(&fragment?);
        while let Some(pos) = buffer.find('\n') {
            let line: String = buffer.drain(..=pos).collect();
            let line = line.trim();
            if !line.is_empty() {
                ctx.emitter
                    .dispatch(event_name, make_packet(lines.len(), line.to_string()))
                    .await;
                lines.push(line.to_string());
            }
        }
    }

    // Flush a trailing line that arrived without a final newline.
    let tail = buffer.trim();
    if !tail.is_empty() {
        ctx.emitter
            .dispatch(event_name, make_packet(lines.len(), tail.to_string()))
            .await;
        lines.push(tail.to_string());
    }

    Ok(lines)
}

/// Stream an LLM response, dispatching one packet per fragment, and return
/// the concatenated text.
pub(crate) async fn stream_answer_pieces(
    ctx: &NodeContext,
    llm: &Arc<dyn LlmClient>,
    prompt: String,
    event_name: &'static str,
    mut make_packet: impl FnMut(String) -> StreamPacket,
) -> Result<String> {
    let mut stream = llm.stream(prompt).await?;
    let mut answer = String::new();

    while let Some(fragment) = stream.next().await {
        if ctx.cancel.is_cancelled() {
            return Err(LoupeError::Cancelled);
        }
        let fragment = fragment?;
        ctx.emitter
            .dispatch(event_name, make_packet(fragment.clone()))
            .await;
        answer.push_str(&fragment);
    }

    Ok(answer)
}
