//! Operation Metrics
//!
//! Prometheus counters and histograms for pod operations, kept in a
//! registry owned by the manager so several managers never collide on the
//! global default registry.

use crate::error::{Error, Result};
use prometheus::{Encoder, HistogramOpts, HistogramVec, IntCounterVec, Opts, Registry, TextEncoder};
use std::time::Duration;

/// Outcome label of a finished operation
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    Success,
    Failure,
}

impl Outcome {
    fn as_str(&self) -> &'static str {
        match self {
            Outcome::Success => "success",
            Outcome::Failure => "failure",
        }
    }
}

/// Per-driver operation metrics
#[derive(Clone)]
pub struct PodMetrics {
    registry: Registry,
    operations: IntCounterVec,
    duration: HistogramVec,
}

impl PodMetrics {
    pub fn new() -> Result<Self> {
        let registry = Registry::new();

        let operations = IntCounterVec::new(
            Opts::new("pod_operations_total", "Pod operations by outcome"),
            &["driver", "operation", "outcome"],
        )
        .map_err(metrics_error)?;
        let duration = HistogramVec::new(
            HistogramOpts::new(
                "pod_operation_duration_seconds",
                "Duration of pod operations",
            )
            .buckets(vec![0.1, 0.5, 1.0, 5.0, 15.0, 30.0, 60.0, 120.0, 300.0]),
            &["driver", "operation"],
        )
        .map_err(metrics_error)?;

        registry
            .register(Box::new(operations.clone()))
            .map_err(metrics_error)?;
        registry
            .register(Box::new(duration.clone()))
            .map_err(metrics_error)?;

        Ok(Self {
            registry,
            operations,
            duration,
        })
    }

    pub fn record(&self, driver: &str, operation: &str, outcome: Outcome, elapsed: Duration) {
        self.operations
            .with_label_values(&[driver, operation, outcome.as_str()])
            .inc();
        self.duration
            .with_label_values(&[driver, operation])
            .observe(elapsed.as_secs_f64());
    }

    /// Count of recorded operations with the given labels
    pub fn count(&self, driver: &str, operation: &str, outcome: Outcome) -> u64 {
        self.operations
            .with_label_values(&[driver, operation, outcome.as_str()])
            .get()
    }

    /// Prometheus text exposition
    pub fn encode(&self) -> Result<String> {
        let mut buffer = Vec::new();
        TextEncoder::new()
            .encode(&self.registry.gather(), &mut buffer)
            .map_err(metrics_error)?;
        String::from_utf8(buffer).map_err(|e| Error::Internal(format!("metrics encoding: {}", e)))
    }
}

fn metrics_error(err: prometheus::Error) -> Error {
    Error::Internal(format!("metrics: {}", err))
}
