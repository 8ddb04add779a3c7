use tracing::trace;

// Counters are emitted as trace events; the Prometheus recorder installed by the binary only
// serves the exposition endpoint.

pub fn inc_requests(route: &'static str) {
    trace!(target: "analyzer.metrics", route = route, "requests_total_inc");
}

pub fn stage_elapsed(stage: &'static str, elapsed_ms: u128) {
    trace!(
        target: "analyzer.metrics",
        stage = stage,
        elapsed_ms = elapsed_ms as u64,
        "stage_elapsed"
    );
}

pub fn provider_outcome(provider: &'static str, outcome: &'static str) {
    trace!(
        target: "analyzer.metrics",
        provider = provider,
        outcome = outcome,
        "provider_outcome_inc"
    );
}
