//! Prometheus counters for the control-plane core.

use metrics::{counter, histogram};

// =============================================================================
// Cluster CRUD
// =============================================================================

pub fn cluster_created() {
    counter!("bosun_clusters_created_total").increment(1);
}

pub fn cluster_updated() {
    counter!("bosun_clusters_updated_total").increment(1);
}

pub fn cluster_deleted() {
    counter!("bosun_clusters_deleted_total").increment(1);
}

pub fn clusters_listed(count: usize) {
    counter!("bosun_clusters_listed_total").increment(1);
    histogram!("bosun_clusters_list_size").record(count as f64);
}

// =============================================================================
// Event fan-out
// =============================================================================

/// Event published directly after commit, before the flusher saw it.
pub fn event_published_inline() {
    counter!("bosun_events_published_total", "path" => "inline").increment(1);
}

pub fn outbox_drained(count: usize) {
    histogram!("bosun_outbox_batch_size").record(count as f64);
}

pub fn outbox_published() {
    counter!("bosun_events_published_total", "path" => "flusher").increment(1);
}

pub fn outbox_publish_failed() {
    counter!("bosun_outbox_publish_failures_total").increment(1);
}

// =============================================================================
// Reconciliation
// =============================================================================

pub fn reconcile_dispatched() {
    counter!("bosun_reconcile_dispatched_total").increment(1);
}

pub fn reconcile_dispatch_failed() {
    counter!("bosun_reconcile_dispatch_failures_total").increment(1);
}

pub fn reconcile_cycle(candidates: usize) {
    counter!("bosun_reconcile_cycles_total").increment(1);
    histogram!("bosun_reconcile_cycle_candidates").record(candidates as f64);
}

pub fn reconcile_deferred(count: usize) {
    counter!("bosun_reconcile_deferred_total").increment(count as u64);
}

// =============================================================================
// Status ingestion
// =============================================================================

pub fn status_report_applied(controller: &str) {
    counter!("bosun_status_reports_total", "controller" => controller.to_string()).increment(1);
}

pub fn status_report_rejected(reason: &'static str) {
    counter!("bosun_status_reports_rejected_total", "reason" => reason).increment(1);
}

// =============================================================================
// Reactive trigger
// =============================================================================

pub fn reactive_signal() {
    counter!("bosun_reactive_signals_total").increment(1);
}

pub fn reactive_fired() {
    counter!("bosun_reactive_wakeups_total").increment(1);
}

pub fn reactive_dropped() {
    counter!("bosun_reactive_dropped_total").increment(1);
}

// =============================================================================
// Database
// =============================================================================

pub fn db_error(operation: &str) {
    counter!("bosun_db_errors_total", "operation" => operation.to_string()).increment(1);
}
