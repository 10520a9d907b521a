//! Prometheus metrics for scull devices
//!
//! Features:
//! - Bytes read / written per device
//! - Trims per device
//! - Interrupted lock waits
//! - Live quantum bytes across all devices

use prometheus::{Encoder, IntCounter, IntCounterVec, IntGauge, Opts, Registry, TextEncoder};
use tracing::{error, info};

lazy_static::lazy_static! {
    /// Global metrics registry
    pub static ref METRICS_REGISTRY: Registry = Registry::new();

    pub static ref BYTES_READ: IntCounterVec = IntCounterVec::new(
        Opts::new("scull_bytes_read_total", "Bytes read from a device"),
        &["device"]
    ).unwrap();

    pub static ref BYTES_WRITTEN: IntCounterVec = IntCounterVec::new(
        Opts::new("scull_bytes_written_total", "Bytes written to a device"),
        &["device"]
    ).unwrap();

    pub static ref TRIMS: IntCounterVec = IntCounterVec::new(
        Opts::new("scull_trims_total", "Number of times a device was trimmed"),
        &["device"]
    ).unwrap();

    pub static ref INTERRUPTED_WAITS: IntCounter = IntCounter::new(
        "scull_interrupted_waits_total",
        "Lock waits abandoned because of an interrupt"
    ).unwrap();

    pub static ref QUANTUM_BYTES: IntGauge = IntGauge::new(
        "scull_quantum_bytes",
        "Bytes held by live quanta"
    ).unwrap();
}

/// Initialize metrics registry
pub fn init_metrics() {
    info!("Initializing Prometheus metrics");

    METRICS_REGISTRY.register(Box::new(BYTES_READ.clone())).ok();
    METRICS_REGISTRY.register(Box::new(BYTES_WRITTEN.clone())).ok();
    METRICS_REGISTRY.register(Box::new(TRIMS.clone())).ok();
    METRICS_REGISTRY.register(Box::new(INTERRUPTED_WAITS.clone())).ok();
    METRICS_REGISTRY.register(Box::new(QUANTUM_BYTES.clone())).ok();
}

/// Export all metrics in Prometheus text format
pub fn export_metrics() -> String {
    let encoder = TextEncoder::new();
    let metric_families = METRICS_REGISTRY.gather();

    let mut buffer = Vec::new();
    if let Err(e) = encoder.encode(&metric_families, &mut buffer) {
        error!(error = %e, "Failed to encode metrics");
        return String::from("# Error encoding metrics\n");
    }

    String::from_utf8(buffer).unwrap_or_else(|_| String::from("# Error converting metrics\n"))
}
