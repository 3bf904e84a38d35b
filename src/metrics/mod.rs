//! Prometheus metrics for the pipeline.
//!
//! ```ignore
//! use content_forge::metrics::{export_metrics, init_metrics};
//!
//! init_metrics()?;
//! // ... run requests ...
//! println!("{}", export_metrics());
//! ```

pub mod collectors;
pub mod prometheus;

pub use collectors::{AttemptOutcome, MetricsCollector};
pub use prometheus::{
    export_metrics, init_metrics, ATTEMPTS_TOTAL, GATEWAY_BACKPRESSURE_TOTAL, GATEWAY_LATENCY,
    OUTCOMES_TOTAL, REGISTRY, SOFT_REPAIRS_TOTAL,
};
