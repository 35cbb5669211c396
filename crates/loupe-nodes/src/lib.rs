//! Pipeline nodes and topologies: decomposition, per-sub-question answer
//! branches, fan-in aggregation, synthesis, effectiveness stats, and the
//! terminal metrics node.

pub mod answer;
pub mod branch;
pub mod decision;
pub mod decompose;
pub mod extract;
pub mod graphs;
pub mod ingest;
pub mod logging;
pub mod parsing;
pub mod prompts;
pub mod retrieval;
pub mod state;
pub mod stats;
mod streaming;
pub mod synthesize;

pub use graphs::build_main_graph;
pub use state::{BranchDelta, BranchField, BranchState, MainDelta, MainField, MainState};
pub use stats::{boost_ratio, IMPROVEMENT_SENTINEL};
