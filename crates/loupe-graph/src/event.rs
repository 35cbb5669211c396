//! Internal execution events and the emitter nodes use to dispatch them.

use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use loupe_core::types::StreamPacket;

/// An event produced during graph execution.
///
/// Executor bookkeeping events (`NodeStarted`/`NodeFinished`) travel on the
/// same channel as custom dispatches but are filtered out by the stream
/// adapter's allow-list.
#[derive(Debug, Clone)]
pub enum ExecEvent {
    NodeStarted {
        node: &'static str,
    },
    NodeFinished {
        node: &'static str,
        elapsed_ms: u64,
    },
    /// A named out-of-band dispatch from a node.
    Custom {
        name: &'static str,
        packet: StreamPacket,
    },
}

/// Custom event names that are translated into externally visible packets.
/// Everything else on the channel is dropped silently.
pub const STREAMED_EVENTS: &[&str] = &[
    "tool_start",
    "sub_questions",
    "sub_queries",
    "sub_answers",
    "sub_answer_finished",
    "initial_answer",
    "refined_answer",
    "phase_finished",
    "refinement_started",
];

/// Translate an internal event into an external packet, or drop it.
pub fn parse_event(event: ExecEvent) -> Option<StreamPacket> {
    match event {
        ExecEvent::Custom { name, packet } if STREAMED_EVENTS.contains(&name) => Some(packet),
        _ => None,
    }
}

/// Handle for dispatching events from inside nodes and branches.
///
/// Sends apply backpressure through the bounded channel. When the consumer
/// has gone away (channel closed), the emitter cancels the run so in-flight
/// work stops instead of streaming into the void.
#[derive(Clone)]
pub struct EventEmitter {
    tx: mpsc::Sender<ExecEvent>,
    cancel: CancellationToken,
}

impl EventEmitter {
    pub fn new(tx: mpsc::Sender<ExecEvent>, cancel: CancellationToken) -> Self {
        Self { tx, cancel }
    }

    async fn send(&self, event: ExecEvent) {
        if self.tx.send(event).await.is_err() {
            self.cancel.cancel();
        }
    }

    /// Dispatch a custom named event carrying a packet.
    pub async fn dispatch(&self, name: &'static str, packet: StreamPacket) {
        self.send(ExecEvent::Custom { name, packet }).await;
    }

    pub(crate) async fn node_started(&self, node: &'static str) {
        self.send(ExecEvent::NodeStarted { node }).await;
    }

    pub(crate) async fn node_finished(&self, node: &'static str, elapsed_ms: u64) {
        self.send(ExecEvent::NodeFinished { node, elapsed_ms }).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use loupe_core::types::QuestionId;

    #[test]
    fn test_allow_list_filtering() {
        let packet = StreamPacket::SubQuestion {
            id: QuestionId::new(0, 1),
            text: "q".into(),
        };
        let kept = parse_event(ExecEvent::Custom {
            name: "sub_questions",
            packet: packet.clone(),
        });
        assert_eq!(kept, Some(packet.clone()));

        let dropped = parse_event(ExecEvent::Custom {
            name: "debug_only",
            packet,
        });
        assert_eq!(dropped, None);

        assert_eq!(parse_event(ExecEvent::NodeStarted { node: "x" }), None);
    }

    #[tokio::test]
    async fn test_emitter_cancels_when_consumer_gone() {
        let (tx, rx) = mpsc::channel(4);
        let cancel = CancellationToken::new();
        let emitter = EventEmitter::new(tx, cancel.clone());
        drop(rx);

        emitter
            .dispatch("sub_questions", StreamPacket::PhaseFinished { level: 0 })
            .await;
        assert!(cancel.is_cancelled());
    }
}
