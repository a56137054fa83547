//! Prometheus metrics for workers and schedule engines
//!
//! # Usage
//!
//! Call `init_metrics()` at application startup to register all metrics.
//! If initialization fails (or never happens), the recording functions
//! below are no-ops.

use prometheus::{
    register_counter_vec, register_gauge_vec, CounterVec, Encoder, GaugeVec, TextEncoder,
};
use std::sync::OnceLock;

// ============================================================================
// Metrics Storage
// ============================================================================

struct WorkerMetrics {
    active_sessions: GaugeVec,
    admissions: CounterVec,
    session_failures: CounterVec,
    reconciliation_corrections: CounterVec,
    drops: CounterVec,
    schedule_actions: CounterVec,
}

static WORKER_METRICS: OnceLock<WorkerMetrics> = OnceLock::new();

/// Flag to track if initialization was attempted
static METRICS_INIT_ATTEMPTED: OnceLock<bool> = OnceLock::new();

// ============================================================================
// Initialization
// ============================================================================

/// Register all metrics with the default Prometheus registry
///
/// ```ignore
/// if let Err(e) = dropler::metrics::init_metrics() {
///     tracing::warn!("Metrics initialization failed: {}", e);
/// }
/// ```
pub fn init_metrics() -> Result<(), prometheus::Error> {
    if METRICS_INIT_ATTEMPTED.get().is_some() {
        return Ok(());
    }
    METRICS_INIT_ATTEMPTED.set(true).ok();

    let metrics = WorkerMetrics {
        active_sessions: register_gauge_vec!(
            "dropler_active_sessions",
            "Sessions currently active per task",
            &["task"]
        )?,
        admissions: register_counter_vec!(
            "dropler_admissions_total",
            "Accounts admitted to start a session",
            &["task"]
        )?,
        session_failures: register_counter_vec!(
            "dropler_session_failures_total",
            "Session starts that did not reach the active state",
            &["task", "result"]
        )?,
        reconciliation_corrections: register_counter_vec!(
            "dropler_reconciliation_corrections_total",
            "Times the active count drifted and was corrected",
            &["task"]
        )?,
        drops: register_counter_vec!(
            "dropler_drops_total",
            "Drops routed to a task's statistics sink",
            &["task"]
        )?,
        schedule_actions: register_counter_vec!(
            "dropler_schedule_actions_total",
            "Start/stop actions applied by the schedule engine",
            &["task", "action"]
        )?,
    };

    WORKER_METRICS.set(metrics).ok();
    Ok(())
}

/// Render all registered metrics in the text exposition format
pub fn gather_metrics() -> String {
    let encoder = TextEncoder::new();
    let families = prometheus::gather();
    let mut buffer = Vec::new();
    if let Err(e) = encoder.encode(&families, &mut buffer) {
        tracing::warn!("Failed to encode metrics: {}", e);
        return String::new();
    }
    String::from_utf8(buffer).unwrap_or_default()
}

// ============================================================================
// Recording
// ============================================================================

pub fn set_active_sessions(task_id: u32, count: usize) {
    if let Some(m) = WORKER_METRICS.get() {
        m.active_sessions
            .with_label_values(&[task_id.to_string().as_str()])
            .set(count as f64);
    }
}

pub fn record_admission(task_id: u32) {
    if let Some(m) = WORKER_METRICS.get() {
        m.admissions.with_label_values(&[task_id.to_string().as_str()]).inc();
    }
}

pub fn record_session_failure(task_id: u32, result: &str) {
    if let Some(m) = WORKER_METRICS.get() {
        m.session_failures
            .with_label_values(&[task_id.to_string().as_str(), result])
            .inc();
    }
}

pub fn record_reconciliation(task_id: u32) {
    if let Some(m) = WORKER_METRICS.get() {
        m.reconciliation_corrections
            .with_label_values(&[task_id.to_string().as_str()])
            .inc();
    }
}

pub fn record_drop(task_id: u32) {
    if let Some(m) = WORKER_METRICS.get() {
        m.drops.with_label_values(&[task_id.to_string().as_str()]).inc();
    }
}

pub fn record_schedule_action(task_id: u32, action: &str) {
    if let Some(m) = WORKER_METRICS.get() {
        m.schedule_actions
            .with_label_values(&[task_id.to_string().as_str(), action])
            .inc();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_init_is_idempotent_and_recording_works() {
        init_metrics().unwrap();
        init_metrics().unwrap();

        record_admission(99);
        set_active_sessions(99, 3);

        let text = gather_metrics();
        assert!(text.contains("dropler_admissions_total"));
        assert!(text.contains("dropler_active_sessions"));
    }
}
