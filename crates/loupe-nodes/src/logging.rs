//! The terminal node: derive phase durations, assemble the combined
//! metrics record, and persist it.

use chrono::{DateTime, Utc};
use futures::future::BoxFuture;
use tracing::{info, warn};
use uuid::Uuid;

use loupe_core::error::Result;
use loupe_core::models::{CombinedMetrics, RunMetricsRecord, RunTimings};
use loupe_graph::node::{GraphNode, NodeContext};

use crate::state::{MainDelta, MainField, MainState};

fn duration_s(start: Option<DateTime<Utc>>, end: Option<DateTime<Utc>>) -> Option<f64> {
    match (start, end) {
        (Some(start), Some(end)) => Some((end - start).num_milliseconds() as f64 / 1000.0),
        _ => None,
    }
}

/// Compute run timings and write the metrics record. Telemetry is
/// non-essential: a failed write is logged and swallowed, the run's answer
/// still stands.
pub struct LogMetrics;

impl GraphNode<MainState> for LogMetrics {
    fn name(&self) -> &'static str {
        "log_metrics"
    }

    fn writes(&self) -> &'static [MainField] {
        &[]
    }

    fn run<'a>(
        &'a self,
        state: &'a MainState,
        ctx: &'a NodeContext,
    ) -> BoxFuture<'a, Result<MainDelta>> {
        Box::pin(async move {
            let base_duration_s = duration_s(state.start_time, state.base_end_time);
            let refined_duration_s =
                duration_s(state.refined_start_time, state.refined_end_time);
            let end_time = match (state.base_end_time, state.refined_end_time) {
                (Some(base), Some(refined)) => Some(base.max(refined)),
                (base, refined) => base.or(refined),
            };
            let full_duration_s = duration_s(state.start_time, end_time);

            let agent_type = if refined_duration_s.is_some() {
                "refined"
            } else {
                "base"
            };

            let metrics = CombinedMetrics {
                timings: RunTimings {
                    base_duration_s,
                    refined_duration_s,
                    full_duration_s,
                },
                base: state.base_metrics.clone(),
                refined: state.refined_metrics.clone(),
            };

            info!(
                agent_type,
                base_duration_s, refined_duration_s, full_duration_s, "run complete"
            );

            if ctx.config.use_persistence {
                if let Some(store) = &ctx.config.metrics {
                    let record = RunMetricsRecord {
                        run_id: Uuid::new_v4(),
                        user_id: ctx.config.user_id,
                        persona_id: ctx.config.persona_id,
                        session_id: ctx.config.session_id,
                        agent_type: agent_type.to_string(),
                        start_time: state.start_time.unwrap_or_else(Utc::now),
                        metrics,
                    };
                    if let Err(e) = store.log_run(record).await {
                        warn!(error = %e, "failed to persist run metrics");
                    }
                }
            }

            Ok(MainDelta::default())
        })
    }
}
