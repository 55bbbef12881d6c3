//! Metrics and observability utilities
//!
//! Counters and histograms for the retrieval/analysis pipeline with
//! standardized naming. Recording is a no-op until the embedding process
//! installs a recorder.

use metrics::{counter, describe_counter, describe_histogram, histogram, Unit};
use std::time::Instant;

/// Metrics prefix for all CorpusQA metrics
pub const METRICS_PREFIX: &str = "corpusqa";

/// Register all metric descriptions
pub fn register_metrics() {
    describe_counter!(
        format!("{}_queries_total", METRICS_PREFIX),
        Unit::Count,
        "Total queries answered, by strategy"
    );

    describe_histogram!(
        format!("{}_query_duration_seconds", METRICS_PREFIX),
        Unit::Seconds,
        "End-to-end query latency in seconds"
    );

    describe_histogram!(
        format!("{}_retrieval_duration_seconds", METRICS_PREFIX),
        Unit::Seconds,
        "Retrieval stage latency in seconds"
    );

    describe_counter!(
        format!("{}_retrieval_fallbacks_total", METRICS_PREFIX),
        Unit::Count,
        "Retrieval calls that fell back to a bare similarity search"
    );

    describe_counter!(
        format!("{}_sufficiency_verdicts_total", METRICS_PREFIX),
        Unit::Count,
        "Sufficiency verdicts, by verdict and decision path"
    );

    describe_counter!(
        format!("{}_escalations_total", METRICS_PREFIX),
        Unit::Count,
        "Document escalations, by outcome"
    );

    describe_counter!(
        format!("{}_iterative_documents_total", METRICS_PREFIX),
        Unit::Count,
        "Documents entering iterative analysis, by outcome"
    );

    describe_counter!(
        format!("{}_completion_requests_total", METRICS_PREFIX),
        Unit::Count,
        "Completion endpoint calls, by status"
    );

    describe_histogram!(
        format!("{}_completion_duration_seconds", METRICS_PREFIX),
        Unit::Seconds,
        "Completion endpoint latency in seconds"
    );

    tracing::info!("Metrics registered");
}

/// Timer tied to one query; records totals on finish
pub struct QueryMetrics {
    start: Instant,
    strategy: String,
}

impl QueryMetrics {
    /// Start tracking a query
    pub fn start(strategy: &str) -> Self {
        Self {
            start: Instant::now(),
            strategy: strategy.to_string(),
        }
    }

    /// Record query completion
    pub fn finish(self, degraded: bool) {
        let duration = self.start.elapsed().as_secs_f64();

        counter!(
            format!("{}_queries_total", METRICS_PREFIX),
            "strategy" => self.strategy.clone(),
            "degraded" => degraded.to_string()
        )
        .increment(1);

        histogram!(
            format!("{}_query_duration_seconds", METRICS_PREFIX),
            "strategy" => self.strategy
        )
        .record(duration);
    }
}

/// Record one retrieval stage
pub fn record_retrieval(duration_secs: f64, strategy: &str, fell_back: bool) {
    histogram!(
        format!("{}_retrieval_duration_seconds", METRICS_PREFIX),
        "strategy" => strategy.to_string()
    )
    .record(duration_secs);

    if fell_back {
        counter!(
            format!("{}_retrieval_fallbacks_total", METRICS_PREFIX),
            "strategy" => strategy.to_string()
        )
        .increment(1);
    }
}

/// Record a sufficiency verdict and the path that produced it
pub fn record_sufficiency(verdict: &str, path: &str) {
    counter!(
        format!("{}_sufficiency_verdicts_total", METRICS_PREFIX),
        "verdict" => verdict.to_string(),
        "path" => path.to_string()
    )
    .increment(1);
}

/// Record a document escalation outcome
pub fn record_escalation(outcome: &str) {
    counter!(
        format!("{}_escalations_total", METRICS_PREFIX),
        "outcome" => outcome.to_string()
    )
    .increment(1);
}

/// Record a document's iterative-analysis outcome
pub fn record_iterative_document(outcome: &str) {
    counter!(
        format!("{}_iterative_documents_total", METRICS_PREFIX),
        "outcome" => outcome.to_string()
    )
    .increment(1);
}

/// Record a completion endpoint call
pub fn record_completion(duration_secs: f64, success: bool) {
    let status = if success { "success" } else { "error" };

    counter!(
        format!("{}_completion_requests_total", METRICS_PREFIX),
        "status" => status.to_string()
    )
    .increment(1);

    histogram!(format!("{}_completion_duration_seconds", METRICS_PREFIX))
        .record(duration_secs);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_query_metrics_runs_without_recorder() {
        let metrics = QueryMetrics::start("semantic");
        metrics.finish(false);
        record_retrieval(0.05, "semantic", true);
        record_sufficiency("sufficient", "judge");
        record_completion(0.8, false);
        // No recorder installed; recording must be a no-op, not a panic
    }
}
