//! Prometheus metrics for fraud engine

use lazy_static::lazy_static;
use prometheus::{
    register_counter, register_counter_vec, register_histogram_vec, Counter, CounterVec,
    HistogramVec,
};

lazy_static! {
    /// Evaluations by resulting risk level
    pub static ref EVALUATIONS_TOTAL: CounterVec = register_counter_vec!(
        "fraud_engine_evaluations_total",
        "Total transactions evaluated",
        &["risk_level", "method"]
    )
    .unwrap();

    /// Evaluation duration
    pub static ref EVALUATION_DURATION: HistogramVec = register_histogram_vec!(
        "fraud_engine_evaluation_duration_seconds",
        "Evaluation duration in seconds",
        &["method"]
    )
    .unwrap();

    /// Collectors that fell back to the default score
    pub static ref COLLECTOR_FALLBACK_TOTAL: CounterVec = register_counter_vec!(
        "fraud_engine_collector_fallback_total",
        "Signal collector failures replaced by the fallback score",
        &["source"]
    )
    .unwrap();

    /// Hard overrides that forced a HIGH verdict
    pub static ref OVERRIDES_TOTAL: CounterVec = register_counter_vec!(
        "fraud_engine_overrides_total",
        "Hard overrides applied",
        &["reason"]
    )
    .unwrap();

    /// Evaluations that fell back to the conservative verdict
    pub static ref EVALUATION_FAILURES_TOTAL: CounterVec = register_counter_vec!(
        "fraud_engine_evaluation_failures_total",
        "Evaluations answered with the conservative verdict",
        &["cause"]
    )
    .unwrap();

    /// Block markers written
    pub static ref BLOCK_MARKERS_TOTAL: Counter = register_counter!(
        "fraud_engine_block_markers_total",
        "Block markers written"
    )
    .unwrap();

    /// Security alerts that could not be published
    pub static ref ALERT_FAILURES_TOTAL: Counter = register_counter!(
        "fraud_engine_alert_failures_total",
        "Security alerts that failed to publish"
    )
    .unwrap();

    /// Outcome records appended
    pub static ref FEEDBACK_RECORDS_TOTAL: CounterVec = register_counter_vec!(
        "fraud_engine_feedback_records_total",
        "Outcome records appended to the feedback store",
        &["actual"]
    )
    .unwrap();
}
