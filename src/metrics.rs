use lazy_static::lazy_static;
use prometheus::{CounterVec, Encoder, Gauge, IntCounter, Opts, Registry, TextEncoder};

/// Metric name prefix for all gateway metrics
const PREFIX: &str = "gateway";

lazy_static! {
    // Global Prometheus registry
    pub static ref REGISTRY: Registry = Registry::new();

    // Session Metrics
    pub static ref ACTIVE_SESSIONS: Gauge = Gauge::new(
        format!("{PREFIX}_active_sessions"),
        "Number of live sessions in the registry"
    ).expect("Failed to create active_sessions metric");

    pub static ref SESSIONS_CREATED_TOTAL: IntCounter = IntCounter::new(
        format!("{PREFIX}_sessions_created_total"),
        "Total sessions created"
    ).expect("Failed to create sessions_created_total metric");

    pub static ref SESSIONS_CLOSED_TOTAL: CounterVec = CounterVec::new(
        Opts::new(format!("{PREFIX}_sessions_closed_total"), "Total sessions closed"),
        &["reason"]
    ).expect("Failed to create sessions_closed_total metric");

    // Validation Metrics
    pub static ref VALIDATION_REJECTIONS_TOTAL: CounterVec = CounterVec::new(
        Opts::new(
            format!("{PREFIX}_validation_rejections_total"),
            "Inbound messages rejected before dispatch"
        ),
        &["reason"]
    ).expect("Failed to create validation_rejections_total metric");

    // Task Metrics
    pub static ref TASK_UPDATES_TOTAL: CounterVec = CounterVec::new(
        Opts::new(format!("{PREFIX}_task_updates_total"), "Task updates emitted"),
        &["kind"]
    ).expect("Failed to create task_updates_total metric");

    pub static ref TASK_OUTCOMES_TOTAL: CounterVec = CounterVec::new(
        Opts::new(format!("{PREFIX}_task_outcomes_total"), "Task invocations by outcome"),
        &["outcome"]
    ).expect("Failed to create task_outcomes_total metric");
}

/// Initialize all metrics and register them with the Prometheus registry
pub fn init_metrics() {
    // Register all metrics - ignore errors if already registered (for tests)
    let _ = REGISTRY.register(Box::new(ACTIVE_SESSIONS.clone()));
    let _ = REGISTRY.register(Box::new(SESSIONS_CREATED_TOTAL.clone()));
    let _ = REGISTRY.register(Box::new(SESSIONS_CLOSED_TOTAL.clone()));
    let _ = REGISTRY.register(Box::new(VALIDATION_REJECTIONS_TOTAL.clone()));
    let _ = REGISTRY.register(Box::new(TASK_UPDATES_TOTAL.clone()));
    let _ = REGISTRY.register(Box::new(TASK_OUTCOMES_TOTAL.clone()));

    tracing::info!("Metrics system initialized successfully");
}

pub fn record_session_created() {
    SESSIONS_CREATED_TOTAL.inc();
    ACTIVE_SESSIONS.inc();
}

pub fn record_session_closed(reason: &str) {
    SESSIONS_CLOSED_TOTAL.with_label_values(&[reason]).inc();
    ACTIVE_SESSIONS.dec();
}

pub fn record_rejection(reason: &str) {
    VALIDATION_REJECTIONS_TOTAL
        .with_label_values(&[reason])
        .inc();
}

pub fn record_task_update(kind: &str) {
    TASK_UPDATES_TOTAL.with_label_values(&[kind]).inc();
}

pub fn record_task_outcome(outcome: &str) {
    TASK_OUTCOMES_TOTAL.with_label_values(&[outcome]).inc();
}

/// Text exposition of every registered metric.
pub fn render() -> String {
    let encoder = TextEncoder::new();
    let metric_families = REGISTRY.gather();
    let mut buffer = Vec::new();
    if let Err(e) = encoder.encode(&metric_families, &mut buffer) {
        tracing::error!("Failed to encode metrics: {}", e);
        return String::new();
    }
    String::from_utf8_lossy(&buffer).into_owned()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_render_includes_registered_metrics() {
        init_metrics();
        record_rejection("invalid_method");
        record_task_outcome("completed");

        let output = render();
        assert!(output.contains("gateway_validation_rejections_total"));
        assert!(output.contains("invalid_method"));
        assert!(output.contains("gateway_task_outcomes_total"));
    }

    #[test]
    fn test_init_is_idempotent() {
        init_metrics();
        init_metrics();
        assert!(render().contains("gateway_sessions_created_total"));
    }
}
