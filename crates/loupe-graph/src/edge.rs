use std::sync::Arc;

use futures::future::BoxFuture;

use loupe_core::error::Result;

use crate::node::NodeContext;
use crate::state::PipelineState;

/// Decision function for a conditional edge.
pub type RouteFn<S> = fn(&S) -> &'static str;

/// A future computing one fan-out branch's delta.
pub type BranchFuture<S> = BoxFuture<'static, Result<<S as PipelineState>::Delta>>;

/// An outgoing edge of one node.
pub struct Edge<S: PipelineState> {
    pub from: &'static str,
    pub transition: Transition<S>,
}

/// What happens after a node completes.
pub enum Transition<S: PipelineState> {
    /// Unconditional transition to the named node.
    To(&'static str),
    /// Conditional branch. `decide` is a pure function of state and must
    /// return one of `options` (validated at build time, checked at runtime).
    Route {
        options: &'static [&'static str],
        decide: RouteFn<S>,
    },
    /// Dynamic parallel fan-out, joined at the edge's fan-in node.
    FanOut(Arc<dyn FanOutEdge<S>>),
    /// Terminal: the graph is complete after this node.
    End,
}

impl<S: PipelineState> Edge<S> {
    pub fn to(from: &'static str, to: &'static str) -> Self {
        Self {
            from,
            transition: Transition::To(to),
        }
    }

    pub fn route(
        from: &'static str,
        options: &'static [&'static str],
        decide: RouteFn<S>,
    ) -> Self {
        Self {
            from,
            transition: Transition::Route { options, decide },
        }
    }

    pub fn fan_out(from: &'static str, edge: Arc<dyn FanOutEdge<S>>) -> Self {
        Self {
            from,
            transition: Transition::FanOut(edge),
        }
    }

    pub fn end(from: &'static str) -> Self {
        Self {
            from,
            transition: Transition::End,
        }
    }
}

/// A dynamic fan-out: builds a variable-length list of parallel branch
/// invocations from the current state, each returning a delta merged back
/// at the join barrier.
pub trait FanOutEdge<S: PipelineState>: Send + Sync {
    /// The fan-in node that runs once every branch has completed.
    fn join_node(&self) -> &'static str;

    /// Fields that more than one branch may write. Build-time validation
    /// rejects any of these declared with a `Replace` strategy.
    fn accumulating_writes(&self) -> &'static [S::Field];

    /// Construct one branch future per dispatch item from a read-only
    /// projection of the parent state.
    fn dispatch(&self, state: &S, ctx: &NodeContext) -> Vec<BranchFuture<S>>;

    /// Delta delivered to the join node when dispatch yields zero branches,
    /// so downstream merge logic always observes a consistent shape.
    fn empty_delta(&self) -> S::Delta;
}
