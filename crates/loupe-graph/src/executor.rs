use std::collections::HashMap;
use std::sync::Arc;
use std::time::Instant;

use tokio::task::JoinSet;
use tracing::{debug, error, info};

use loupe_core::error::{LoupeError, Result};

use crate::edge::{Edge, Transition};
use crate::node::{GraphNode, NodeContext};
use crate::state::{MergeStrategy, PipelineState};

/// A compiled, validated graph topology.
///
/// The topology is stateless and shareable; per-run data lives in the
/// state value threaded through [`Graph::execute`].
pub struct Graph<S: PipelineState> {
    nodes: HashMap<&'static str, Arc<dyn GraphNode<S>>>,
    transitions: HashMap<&'static str, Transition<S>>,
    entry: &'static str,
}

/// Builder collecting nodes and edges before validation.
pub struct GraphBuilder<S: PipelineState> {
    nodes: Vec<Arc<dyn GraphNode<S>>>,
    edges: Vec<Edge<S>>,
    entry: Option<&'static str>,
}

impl<S: PipelineState> Default for GraphBuilder<S> {
    fn default() -> Self {
        Self::new()
    }
}

impl<S: PipelineState> GraphBuilder<S> {
    pub fn new() -> Self {
        Self {
            nodes: Vec::new(),
            edges: Vec::new(),
            entry: None,
        }
    }

    pub fn add_node(mut self, node: impl GraphNode<S> + 'static) -> Self {
        self.nodes.push(Arc::new(node));
        self
    }

    pub fn add_edge(mut self, edge: Edge<S>) -> Self {
        self.edges.push(edge);
        self
    }

    pub fn entry(mut self, name: &'static str) -> Self {
        self.entry = Some(name);
        self
    }

    /// Validate the topology and produce an executable graph.
    pub fn build(self) -> Result<Graph<S>> {
        let entry = self
            .entry
            .ok_or_else(|| LoupeError::Graph("graph has no entry node".into()))?;

        let mut nodes: HashMap<&'static str, Arc<dyn GraphNode<S>>> = HashMap::new();
        for node in self.nodes {
            if nodes.insert(node.name(), node.clone()).is_some() {
                return Err(LoupeError::Graph(format!(
                    "duplicate node '{}'",
                    node.name()
                )));
            }
        }

        if !nodes.contains_key(entry) {
            return Err(LoupeError::Graph(format!(
                "entry node '{entry}' not found in graph"
            )));
        }

        let mut transitions: HashMap<&'static str, Transition<S>> = HashMap::new();
        for edge in self.edges {
            if !nodes.contains_key(edge.from) {
                return Err(LoupeError::Graph(format!(
                    "edge from unknown node '{}'",
                    edge.from
                )));
            }
            match &edge.transition {
                Transition::To(target) => {
                    if !nodes.contains_key(target) {
                        return Err(LoupeError::Graph(format!(
                            "edge '{}' -> unknown node '{target}'",
                            edge.from
                        )));
                    }
                }
                Transition::Route { options, .. } => {
                    if options.is_empty() {
                        return Err(LoupeError::Graph(format!(
                            "route from '{}' has no options",
                            edge.from
                        )));
                    }
                    for target in *options {
                        if !nodes.contains_key(target) {
                            return Err(LoupeError::Graph(format!(
                                "route '{}' -> unknown node '{target}'",
                                edge.from
                            )));
                        }
                    }
                }
                Transition::FanOut(fan_out) => {
                    if !nodes.contains_key(fan_out.join_node()) {
                        return Err(LoupeError::Graph(format!(
                            "fan-out from '{}' joins at unknown node '{}'",
                            edge.from,
                            fan_out.join_node()
                        )));
                    }
                    // Fields several branches write concurrently must have a
                    // combining strategy.
                    for field in fan_out.accumulating_writes() {
                        if S::merge_strategy(*field) == MergeStrategy::Replace {
                            return Err(LoupeError::Graph(format!(
                                "fan-out from '{}' writes field {field:?} with a replace strategy",
                                edge.from
                            )));
                        }
                    }
                }
                Transition::End => {}
            }
            if transitions.insert(edge.from, edge.transition).is_some() {
                return Err(LoupeError::Graph(format!(
                    "node '{}' has more than one outgoing edge",
                    edge.from
                )));
            }
        }

        Ok(Graph {
            nodes,
            transitions,
            entry,
        })
    }
}

impl<S: PipelineState> Graph<S> {
    pub fn builder() -> GraphBuilder<S> {
        GraphBuilder::new()
    }

    /// Execute the graph to completion, threading `state` through every
    /// node and merging fan-out branch deltas at each join barrier.
    ///
    /// An error raised in any node or branch fails the whole run; packets
    /// already emitted remain valid.
    pub async fn execute(&self, mut state: S, ctx: &NodeContext) -> Result<S> {
        let mut current = self.entry;

        loop {
            if ctx.cancel.is_cancelled() {
                return Err(LoupeError::Cancelled);
            }

            let node = self
                .nodes
                .get(current)
                .ok_or_else(|| LoupeError::Graph(format!("node '{current}' not found")))?;

            debug!(node = %node.name(), "executing graph node");
            ctx.emitter.node_started(node.name()).await;
            let node_start = Instant::now();

            let delta = tokio::select! {
                result = node.run(&state, ctx) => result?,
                _ = ctx.cancel.cancelled() => return Err(LoupeError::Cancelled),
            };
            state.apply(delta);

            ctx.emitter
                .node_finished(node.name(), node_start.elapsed().as_millis() as u64)
                .await;

            let Some(transition) = self.transitions.get(current) else {
                debug!(node = %current, "no outgoing edge, graph complete");
                break;
            };

            match transition {
                Transition::To(next) => current = *next,
                Transition::Route { options, decide } => {
                    let next = decide(&state);
                    if !options.contains(&next) {
                        return Err(LoupeError::Graph(format!(
                            "route from '{current}' chose undeclared target '{next}'"
                        )));
                    }
                    debug!(from = %current, to = %next, "route decided");
                    current = next;
                }
                Transition::FanOut(fan_out) => {
                    let branches = fan_out.dispatch(&state, ctx);
                    if branches.is_empty() {
                        // Zero items still reach the fan-in node, with an
                        // explicitly empty result.
                        debug!(from = %current, "fan-out with zero branches");
                        state.apply(fan_out.empty_delta());
                    } else {
                        info!(from = %current, branches = branches.len(), "fan-out");
                        let mut set: JoinSet<(usize, Result<S::Delta>)> = JoinSet::new();
                        for (index, branch) in branches.into_iter().enumerate() {
                            let cancel = ctx.cancel.clone();
                            set.spawn(async move {
                                tokio::select! {
                                    result = branch => (index, result),
                                    _ = cancel.cancelled() => (index, Err(LoupeError::Cancelled)),
                                }
                            });
                        }

                        let mut deltas = Vec::new();
                        while let Some(joined) = set.join_next().await {
                            let (index, result) = match joined {
                                Ok(pair) => pair,
                                Err(e) if e.is_cancelled() => {
                                    set.shutdown().await;
                                    return Err(LoupeError::Cancelled);
                                }
                                Err(e) => {
                                    set.shutdown().await;
                                    return Err(LoupeError::Graph(format!(
                                        "branch task failed: {e}"
                                    )));
                                }
                            };
                            match result {
                                Ok(delta) => deltas.push((index, delta)),
                                Err(e) => {
                                    // One failed branch fails the run; cancel
                                    // and await the rest first.
                                    error!(error = %e, "fan-out branch failed");
                                    set.shutdown().await;
                                    return Err(e);
                                }
                            }
                        }

                        // Merge in dispatch order so the final content does
                        // not depend on completion order.
                        deltas.sort_by_key(|(index, _)| *index);
                        for (_, delta) in deltas {
                            state.apply(delta);
                        }
                    }
                    current = fan_out.join_node();
                }
                Transition::End => break,
            }
        }

        Ok(state)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::edge::{BranchFuture, FanOutEdge};
    use crate::event::EventEmitter;
    use crate::state::{apply_append, apply_replace};
    use futures::future::BoxFuture;
    use tokio::sync::mpsc;
    use tokio_util::sync::CancellationToken;

    #[derive(Debug, Default)]
    struct TestState {
        visited: Vec<String>,
        items: Vec<i32>,
        label: Option<String>,
    }

    #[derive(Debug, Clone, Copy, PartialEq)]
    enum TestField {
        Visited,
        Items,
        Label,
    }

    #[derive(Debug, Default)]
    struct TestDelta {
        visited: Vec<String>,
        items: Vec<i32>,
        label: Option<String>,
    }

    impl PipelineState for TestState {
        type Delta = TestDelta;
        type Field = TestField;

        fn merge_strategy(field: TestField) -> MergeStrategy {
            match field {
                TestField::Visited | TestField::Items => MergeStrategy::Append,
                TestField::Label => MergeStrategy::Replace,
            }
        }

        fn apply(&mut self, delta: TestDelta) {
            apply_append(&mut self.visited, delta.visited);
            apply_append(&mut self.items, delta.items);
            apply_replace(&mut self.label, delta.label.map(Some));
        }
    }

    struct Visit(&'static str);

    impl GraphNode<TestState> for Visit {
        fn name(&self) -> &'static str {
            self.0
        }

        fn writes(&self) -> &'static [TestField] {
            &[TestField::Visited]
        }

        fn run<'a>(
            &'a self,
            _state: &'a TestState,
            _ctx: &'a NodeContext,
        ) -> BoxFuture<'a, Result<TestDelta>> {
            Box::pin(async move {
                Ok(TestDelta {
                    visited: vec![self.0.to_string()],
                    ..Default::default()
                })
            })
        }
    }

    struct FanItems {
        branches: usize,
        per_branch: usize,
    }

    impl FanOutEdge<TestState> for FanItems {
        fn join_node(&self) -> &'static str {
            "join"
        }

        fn accumulating_writes(&self) -> &'static [TestField] {
            &[TestField::Items]
        }

        fn dispatch(&self, _state: &TestState, _ctx: &NodeContext) -> Vec<BranchFuture<TestState>> {
            (0..self.branches)
                .map(|branch| {
                    let per_branch = self.per_branch;
                    let fut: BranchFuture<TestState> = Box::pin(async move {
                        Ok(TestDelta {
                            items: vec![branch as i32; per_branch],
                            ..Default::default()
                        })
                    });
                    fut
                })
                .collect()
        }

        fn empty_delta(&self) -> TestDelta {
            TestDelta::default()
        }
    }

    struct BadFan;

    impl FanOutEdge<TestState> for BadFan {
        fn join_node(&self) -> &'static str {
            "join"
        }

        fn accumulating_writes(&self) -> &'static [TestField] {
            &[TestField::Label]
        }

        fn dispatch(&self, _state: &TestState, _ctx: &NodeContext) -> Vec<BranchFuture<TestState>> {
            vec![]
        }

        fn empty_delta(&self) -> TestDelta {
            TestDelta::default()
        }
    }

    // Returns the receiver too: dropping it would make the emitter cancel
    // the run mid-test.
    fn test_ctx() -> (NodeContext, mpsc::Receiver<crate::event::ExecEvent>) {
        let (tx, rx) = mpsc::channel(1024);
        let cancel = CancellationToken::new();
        let ctx = NodeContext::new(
            loupe_test_utils::test_config("test question"),
            EventEmitter::new(tx, cancel.clone()),
            cancel,
        );
        (ctx, rx)
    }

    #[tokio::test]
    async fn test_linear_execution() {
        let graph = Graph::builder()
            .add_node(Visit("a"))
            .add_node(Visit("b"))
            .add_node(Visit("c"))
            .add_edge(Edge::to("a", "b"))
            .add_edge(Edge::to("b", "c"))
            .entry("a")
            .build()
            .unwrap();

        let state = {
            let (ctx, _rx) = test_ctx();
            graph.execute(TestState::default(), &ctx).await.unwrap()
        };
        assert_eq!(state.visited, vec!["a", "b", "c"]);
    }

    #[tokio::test]
    async fn test_fan_out_no_loss() {
        let graph = Graph::builder()
            .add_node(Visit("start"))
            .add_node(Visit("join"))
            .add_edge(Edge::fan_out(
                "start",
                Arc::new(FanItems {
                    branches: 4,
                    per_branch: 3,
                }),
            ))
            .entry("start")
            .build()
            .unwrap();

        let state = {
            let (ctx, _rx) = test_ctx();
            graph.execute(TestState::default(), &ctx).await.unwrap()
        };
        // N branches x k items each, nothing lost, nothing duplicated
        assert_eq!(state.items.len(), 12);
        // Deterministic merge order regardless of completion order
        assert_eq!(state.items, vec![0, 0, 0, 1, 1, 1, 2, 2, 2, 3, 3, 3]);
        assert_eq!(state.visited, vec!["start", "join"]);
    }

    #[tokio::test]
    async fn test_fan_out_zero_branches_reaches_join() {
        let graph = Graph::builder()
            .add_node(Visit("start"))
            .add_node(Visit("join"))
            .add_edge(Edge::fan_out(
                "start",
                Arc::new(FanItems {
                    branches: 0,
                    per_branch: 3,
                }),
            ))
            .entry("start")
            .build()
            .unwrap();

        let state = {
            let (ctx, _rx) = test_ctx();
            graph.execute(TestState::default(), &ctx).await.unwrap()
        };
        assert!(state.items.is_empty());
        assert_eq!(state.visited, vec!["start", "join"]);
    }

    #[tokio::test]
    async fn test_route_transition() {
        fn decide(state: &TestState) -> &'static str {
            if state.visited.contains(&"start".to_string()) {
                "yes"
            } else {
                "no"
            }
        }

        let graph = Graph::builder()
            .add_node(Visit("start"))
            .add_node(Visit("yes"))
            .add_node(Visit("no"))
            .add_edge(Edge::route("start", &["yes", "no"], decide))
            .entry("start")
            .build()
            .unwrap();

        let state = {
            let (ctx, _rx) = test_ctx();
            graph.execute(TestState::default(), &ctx).await.unwrap()
        };
        assert_eq!(state.visited, vec!["start", "yes"]);
    }

    #[test]
    fn test_build_rejects_replace_field_on_fan_out() {
        let result = Graph::builder()
            .add_node(Visit("start"))
            .add_node(Visit("join"))
            .add_edge(Edge::fan_out("start", Arc::new(BadFan)))
            .entry("start")
            .build();

        assert!(matches!(result, Err(LoupeError::Graph(_))));
    }

    #[test]
    fn test_build_rejects_unknown_targets() {
        let result = Graph::builder()
            .add_node(Visit("a"))
            .add_edge(Edge::to("a", "missing"))
            .entry("a")
            .build();
        assert!(result.is_err());

        let result = Graph::<TestState>::builder().entry("a").build();
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn test_branch_error_fails_run() {
        struct FailingFan;

        impl FanOutEdge<TestState> for FailingFan {
            fn join_node(&self) -> &'static str {
                "join"
            }

            fn accumulating_writes(&self) -> &'static [TestField] {
                &[TestField::Items]
            }

            fn dispatch(
                &self,
                _state: &TestState,
                _ctx: &NodeContext,
            ) -> Vec<BranchFuture<TestState>> {
                vec![
                    Box::pin(async {
                        Ok(TestDelta {
                            items: vec![1],
                            ..Default::default()
                        })
                    }),
                    Box::pin(async { Err(LoupeError::Search("backend down".into())) }),
                ]
            }

            fn empty_delta(&self) -> TestDelta {
                TestDelta::default()
            }
        }

        let graph = Graph::builder()
            .add_node(Visit("start"))
            .add_node(Visit("join"))
            .add_edge(Edge::fan_out("start", Arc::new(FailingFan)))
            .entry("start")
            .build()
            .unwrap();

        let (ctx, _rx) = test_ctx();
        let result = graph.execute(TestState::default(), &ctx).await;
        assert!(matches!(result, Err(LoupeError::Search(_))));
    }

    #[tokio::test]
    async fn test_cancelled_before_start() {
        let graph = Graph::builder()
            .add_node(Visit("a"))
            .entry("a")
            .build()
            .unwrap();

        let (ctx, _rx) = test_ctx();
        ctx.cancel.cancel();
        let result = graph.execute(TestState::default(), &ctx).await;
        assert!(matches!(result, Err(LoupeError::Cancelled)));
    }
}
