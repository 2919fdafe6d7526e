//! Latency observations of registry operations.

use std::time::Instant;

#[cfg(feature = "metrics")]
use opentelemetry::metrics::Histogram;

#[cfg(feature = "metrics")]
const LATENCY_HISTOGRAM: &str = "lorastack.registry.latency";

#[derive(Debug)]
pub(crate) struct Latency {
    entity: &'static str,
    #[cfg(feature = "metrics")]
    histogram: Histogram<f64>,
}

impl Latency {
    pub(crate) fn new(entity: &'static str) -> Self {
        Self {
            entity,
            #[cfg(feature = "metrics")]
            histogram: lorastack_core::metrics::latency_histogram(LATENCY_HISTOGRAM),
        }
    }

    pub(crate) fn observe(&self, action: &'static str, started: Instant) {
        let elapsed = started.elapsed();
        #[cfg(feature = "metrics")]
        lorastack_core::metrics::record_latency(&self.histogram, self.entity, action, elapsed);
        tracing::debug!(
            entity = self.entity,
            action,
            elapsed_us = u64::try_from(elapsed.as_micros()).unwrap_or(u64::MAX),
            "Registry operation"
        );
    }
}
