use futures::future::BoxFuture;
use tokio_util::sync::CancellationToken;

use loupe_core::config::RunConfig;
use loupe_core::error::Result;

use crate::event::EventEmitter;
use crate::state::PipelineState;

/// Read-only execution context handed to every node and branch.
#[derive(Clone)]
pub struct NodeContext {
    pub config: RunConfig,
    pub emitter: EventEmitter,
    pub cancel: CancellationToken,
}

impl NodeContext {
    pub fn new(config: RunConfig, emitter: EventEmitter, cancel: CancellationToken) -> Self {
        Self {
            config,
            emitter,
            cancel,
        }
    }
}

/// One unit of work in the graph.
///
/// A node reads the current state and the run configuration, performs one
/// step (LLM call, retrieval call, computation), and returns the partial
/// update to merge. It never mutates the input state; packets are emitted
/// out-of-band through `ctx.emitter`.
pub trait GraphNode<S: PipelineState>: Send + Sync {
    /// Unique node label within its graph.
    fn name(&self) -> &'static str;

    /// Fields this node's delta may set. Used for merge-policy validation.
    fn writes(&self) -> &'static [S::Field];

    fn run<'a>(&'a self, state: &'a S, ctx: &'a NodeContext) -> BoxFuture<'a, Result<S::Delta>>;
}
