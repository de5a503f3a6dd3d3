use std::sync::Arc;

use crate::metrics::Metrics;

/// Carries the shared collaborators the Orchestrator injects into the rest
/// of the pipeline (§9 Design Notes: "global singletons" become a value
/// passed explicitly instead of process-global mutable state).
///
/// `CoreContext` itself stays deliberately thin: the Cache Index, Rate
/// Limiter, and Circuit Breaker registry live in their own crates and are
/// threaded through call signatures rather than stashed here, to keep the
/// dependency DAG Orchestrator -> (Fetcher, Extractor, Validator) ->
/// (Cache, Index, Dedup) and never the reverse.
#[derive(Clone)]
pub struct CoreContext {
    pub trace_id: String,
    pub metrics: Arc<Metrics>,
}

impl CoreContext {
    pub fn new(trace_id: String) -> Self {
        Self {
            trace_id,
            metrics: Arc::new(Metrics::new()),
        }
    }
}
