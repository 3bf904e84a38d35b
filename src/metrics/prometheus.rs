//! Prometheus metric registration and export.

use prometheus::{Counter, CounterVec, Encoder, HistogramVec, Opts, Registry, TextEncoder};
use std::sync::{Mutex, OnceLock};

/// Registry holding every content-forge metric.
pub static REGISTRY: OnceLock<Registry> = OnceLock::new();

/// Model attempts, labeled by task kind and attempt outcome.
pub static ATTEMPTS_TOTAL: OnceLock<CounterVec> = OnceLock::new();

/// Deterministic repairs applied, labeled by task kind and repair kind.
pub static SOFT_REPAIRS_TOTAL: OnceLock<CounterVec> = OnceLock::new();

/// Finished requests, labeled by task kind and terminal outcome.
pub static OUTCOMES_TOTAL: OnceLock<CounterVec> = OnceLock::new();

/// Model call latency in seconds, labeled by model.
pub static GATEWAY_LATENCY: OnceLock<HistogramVec> = OnceLock::new();

/// Calls rejected because the gateway had no free slot.
pub static GATEWAY_BACKPRESSURE_TOTAL: OnceLock<Counter> = OnceLock::new();

static INIT_LOCK: Mutex<()> = Mutex::new(());

/// Create and register all metrics.
///
/// Call once at startup; later calls are no-ops.
pub fn init_metrics() -> Result<(), prometheus::Error> {
    let _guard = INIT_LOCK.lock().unwrap_or_else(|e| e.into_inner());
    if REGISTRY.get().is_some() {
        return Ok(());
    }

    let registry = Registry::new();

    let attempts_total = CounterVec::new(
        Opts::new("content_forge_attempts_total", "Model attempts by outcome"),
        &["kind", "outcome"],
    )?;

    let soft_repairs_total = CounterVec::new(
        Opts::new(
            "content_forge_soft_repairs_total",
            "Deterministic repairs applied to model replies",
        ),
        &["kind", "repair"],
    )?;

    let outcomes_total = CounterVec::new(
        Opts::new(
            "content_forge_pipeline_outcomes_total",
            "Requests by terminal outcome",
        ),
        &["kind", "outcome"],
    )?;

    let gateway_latency = HistogramVec::new(
        prometheus::HistogramOpts::new(
            "content_forge_gateway_latency_seconds",
            "Model call latency in seconds",
        )
        .buckets(vec![0.5, 1.0, 2.0, 5.0, 10.0, 20.0, 30.0, 60.0]),
        &["model"],
    )?;

    let gateway_backpressure_total = Counter::new(
        "content_forge_gateway_backpressure_total",
        "Model calls rejected for lack of a free slot",
    )?;

    registry.register(Box::new(attempts_total.clone()))?;
    registry.register(Box::new(soft_repairs_total.clone()))?;
    registry.register(Box::new(outcomes_total.clone()))?;
    registry.register(Box::new(gateway_latency.clone()))?;
    registry.register(Box::new(gateway_backpressure_total.clone()))?;

    let _ = ATTEMPTS_TOTAL.set(attempts_total);
    let _ = SOFT_REPAIRS_TOTAL.set(soft_repairs_total);
    let _ = OUTCOMES_TOTAL.set(outcomes_total);
    let _ = GATEWAY_LATENCY.set(gateway_latency);
    let _ = GATEWAY_BACKPRESSURE_TOTAL.set(gateway_backpressure_total);
    let _ = REGISTRY.set(registry);

    tracing::debug!("Prometheus metrics initialized");

    Ok(())
}

/// Export all registered metrics in the Prometheus text format.
pub fn export_metrics() -> String {
    let Some(registry) = REGISTRY.get() else {
        return "# Metrics not initialized. Call init_metrics() first.\n".to_string();
    };

    let encoder = TextEncoder::new();
    let metric_families = registry.gather();

    let mut buffer = Vec::new();
    if let Err(e) = encoder.encode(&metric_families, &mut buffer) {
        return format!("# Error encoding metrics: {}\n", e);
    }

    String::from_utf8(buffer)
        .unwrap_or_else(|e| format!("# Error converting metrics to UTF-8: {}\n", e))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_init_is_repeatable() {
        assert!(init_metrics().is_ok());
        assert!(init_metrics().is_ok());
        assert!(REGISTRY.get().is_some());
    }

    #[test]
    fn test_export_after_recording() {
        let _ = init_metrics();
        if let Some(attempts) = ATTEMPTS_TOTAL.get() {
            attempts
                .with_label_values(&["bulk_question_generation", "success"])
                .inc();
        }

        let metrics = export_metrics();
        assert!(!metrics.starts_with("# Error"));
        assert!(metrics.contains("content_forge_attempts_total"));
    }
}
