//! Prometheus metrics for the dispatch engine
//!
//! Call `init_metrics()` at application startup to register all metrics.
//! If initialization fails (or never happens), metric operations become
//! no-ops so the engine keeps running without observability.

use prometheus::{
    register_counter, register_counter_vec, Counter, CounterVec, Encoder, TextEncoder,
};
use std::sync::OnceLock;

/// Container for all engine metrics
struct EngineMetrics {
    messages_sent: Counter,
    send_failures: CounterVec,
    attempts: CounterVec,
    proxy_disabled: Counter,
    health_probes: Counter,
    jobs_finished: CounterVec,
}

static ENGINE_METRICS: OnceLock<EngineMetrics> = OnceLock::new();

/// Flag to track if initialization was attempted
static METRICS_INIT_ATTEMPTED: OnceLock<bool> = OnceLock::new();

/// Initialize all Prometheus metrics
///
/// Should be called once at application startup. Double initialization is
/// a no-op.
pub fn init_metrics() -> Result<(), Box<dyn std::error::Error>> {
    if METRICS_INIT_ATTEMPTED.get().is_some() {
        return Ok(());
    }
    METRICS_INIT_ATTEMPTED.set(true).ok();

    let metrics = EngineMetrics {
        messages_sent: register_counter!(
            "volley_messages_sent_total",
            "Total messages delivered successfully"
        )?,
        send_failures: register_counter_vec!(
            "volley_send_failures_total",
            "Total failed send attempts by error kind",
            &["kind"]
        )?,
        attempts: register_counter_vec!(
            "volley_attempts_total",
            "Total send attempts by execution mode",
            &["mode"]
        )?,
        proxy_disabled: register_counter!(
            "volley_proxy_disabled_total",
            "Proxies retired after repeated failures"
        )?,
        health_probes: register_counter!(
            "volley_health_probes_total",
            "Live account health probes performed"
        )?,
        jobs_finished: register_counter_vec!(
            "volley_jobs_finished_total",
            "Jobs reaching a terminal status",
            &["status"]
        )?,
    };

    ENGINE_METRICS.set(metrics).ok();
    Ok(())
}

/// Record a successful delivery
pub fn message_sent() {
    if let Some(m) = ENGINE_METRICS.get() {
        m.messages_sent.inc();
    }
}

/// Record a failed attempt with its classified kind
pub fn send_failure(kind: &str) {
    if let Some(m) = ENGINE_METRICS.get() {
        m.send_failures.with_label_values(&[kind]).inc();
    }
}

/// Record an attempt under the given mode
pub fn attempt(mode: &str) {
    if let Some(m) = ENGINE_METRICS.get() {
        m.attempts.with_label_values(&[mode]).inc();
    }
}

/// Record a retired proxy
pub fn proxy_disabled() {
    if let Some(m) = ENGINE_METRICS.get() {
        m.proxy_disabled.inc();
    }
}

/// Record a live health probe
pub fn health_probe() {
    if let Some(m) = ENGINE_METRICS.get() {
        m.health_probes.inc();
    }
}

/// Record a job reaching a terminal status
pub fn job_finished(status: &str) {
    if let Some(m) = ENGINE_METRICS.get() {
        m.jobs_finished.with_label_values(&[status]).inc();
    }
}

/// Render all registered metrics in the Prometheus text format
pub fn render() -> String {
    let encoder = TextEncoder::new();
    let families = prometheus::gather();
    let mut buffer = Vec::new();
    if let Err(e) = encoder.encode(&families, &mut buffer) {
        tracing::warn!(error = %e, "Failed to encode metrics");
        return String::new();
    }
    String::from_utf8(buffer).unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_metrics_noop_before_init() {
        // Must not panic when metrics were never registered
        message_sent();
        send_failure("peer_flood");
        attempt("normal");
        proxy_disabled();
        health_probe();
        job_finished("completed");
    }

    #[test]
    fn test_init_and_render() {
        init_metrics().unwrap();
        // Second call is a no-op
        init_metrics().unwrap();

        message_sent();
        send_failure("rate_limited");

        let text = render();
        assert!(text.contains("volley_messages_sent_total"));
    }
}
