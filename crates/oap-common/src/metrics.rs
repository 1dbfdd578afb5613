//! Runtime counters for the analysis core
#![allow(clippy::cast_precision_loss)]

use metrics::{counter, gauge, histogram};

// ============================================================================
// Compilation Metrics
// ============================================================================

/// Record a finished compilation batch
pub fn record_compile(scripts: usize, metric_units: usize, dispatchers: usize, duration_ms: f64) {
    counter!("oap_oal_compilations_total").increment(1);
    gauge!("oap_oal_scripts").set(scripts as f64);
    gauge!("oap_oal_metric_units").set(metric_units as f64);
    gauge!("oap_oal_dispatchers").set(dispatchers as f64);
    histogram!("oap_oal_compile_duration_ms").record(duration_ms);
}

/// Record a rejected compilation batch
pub fn record_compile_failure() {
    counter!("oap_oal_compile_failures_total").increment(1);
}

// ============================================================================
// Dispatch Metrics
// ============================================================================

/// Record an event routed to a scope dispatcher
pub fn record_event_dispatched(scope: &str) {
    counter!("oap_dispatch_events_total", "scope" => scope.to_string()).increment(1);
}

/// Record an event dropped before dispatch
pub fn record_event_dropped(scope: &str, reason: &'static str) {
    counter!(
        "oap_dispatch_events_dropped_total",
        "scope" => scope.to_string(),
        "reason" => reason
    )
    .increment(1);
}

/// Record a failed dispatcher step
pub fn record_dispatch_failure(metric: &str) {
    counter!("oap_dispatch_failures_total", "metric" => metric.to_string()).increment(1);
}

/// Record the number of live units in the minute cache
pub fn set_cache_size(units: usize) {
    gauge!("oap_cache_units").set(units as f64);
}

// ============================================================================
// Persistence Metrics
// ============================================================================

/// Record units persisted for one granularity
pub fn record_flush(downsampling: &str, units: usize, duration_ms: f64) {
    counter!("oap_flush_units_total", "downsampling" => downsampling.to_string())
        .increment(units as u64);
    histogram!("oap_flush_duration_ms", "downsampling" => downsampling.to_string())
        .record(duration_ms);
}

/// Record a table write that failed and was kept for the next flush
pub fn record_flush_failure(table: &str, downsampling: &str) {
    counter!(
        "oap_flush_failures_total",
        "table" => table.to_string(),
        "downsampling" => downsampling.to_string()
    )
    .increment(1);
}

/// Record units received from a remote node
pub fn record_remote_received(units: usize) {
    counter!("oap_remote_units_received_total").increment(units as u64);
}
