//! Graph Execution Core — typed state, declarative merge policies, and a
//! scheduler with dynamic parallel fan-out.
//!
//! A pipeline is a directed graph of [`GraphNode`]s connected by
//! [`Edge`]s. Nodes return partial state deltas; the executor merges them
//! into the shared state using each field's declared [`MergeStrategy`].
//! Fan-out edges spawn one task per dispatched branch and join at a
//! barrier node before execution continues. Nodes dispatch out-of-band
//! events through an [`EventEmitter`]; the [`AnswerStream`] adapter
//! filters them against an allow-list and presents a single ordered
//! packet sequence to the consumer.

pub mod edge;
pub mod event;
pub mod executor;
pub mod node;
pub mod state;
pub mod stream;

pub use edge::{BranchFuture, Edge, FanOutEdge, Transition};
pub use event::{parse_event, EventEmitter, ExecEvent, STREAMED_EVENTS};
pub use executor::{Graph, GraphBuilder};
pub use node::{GraphNode, NodeContext};
pub use state::{
    apply_append, apply_replace, dedup_sections, merge_sections, MergeStrategy, PipelineState,
};
pub use stream::{AnswerStream, BlockingPackets};
