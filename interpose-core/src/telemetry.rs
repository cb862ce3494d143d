//! Prometheus metrics using the prometheus-client crate.
//!
//! [`CoreMetrics`] registers the core's counters into a host-owned
//! [`Registry`]. The host calls [`init_metrics`] once at startup; components
//! look the instance up through [`get_core_metrics`] and skip recording when
//! metrics were never installed (tests, embedded use).

use std::sync::{Arc, OnceLock};

use prometheus_client::encoding::EncodeLabelSet;
use prometheus_client::metrics::counter::Counter;
use prometheus_client::metrics::family::Family;
use prometheus_client::registry::Registry;

// ─────────────────────────────────────────────────────────────────────────────
// Label Sets
// ─────────────────────────────────────────────────────────────────────────────

/// Labels for mutation event counters.
#[derive(Clone, Debug, Hash, PartialEq, Eq, EncodeLabelSet)]
pub struct MutationLabels {
    /// Mutation operation (e.g., "set_header", "update_request")
    pub operation: String,
}

/// Labels for listener failure counters.
#[derive(Clone, Debug, Hash, PartialEq, Eq, EncodeLabelSet)]
pub struct ListenerFailureLabels {
    /// Event channel name (e.g., "mutation")
    pub channel: String,
    /// Failure type: "error" or "panic"
    pub failure: String,
}

/// Labels for body decode counters.
#[derive(Clone, Debug, Hash, PartialEq, Eq, EncodeLabelSet)]
pub struct DecodeLabels {
    /// Normalized content-encoding token ("identity", "gzip", "deflate", "br", "unsupported")
    pub encoding: String,
    /// "success" or the error kind label
    pub outcome: String,
}

// ─────────────────────────────────────────────────────────────────────────────
// Metrics
// ─────────────────────────────────────────────────────────────────────────────

/// Counters for the transaction core.
#[derive(Debug, Clone)]
pub struct CoreMetrics {
    /// Mutation events dispatched, by operation.
    pub mutation_events_total: Family<MutationLabels, Counter>,
    /// Listener invocations that returned an error or panicked.
    pub listener_failures_total: Family<ListenerFailureLabels, Counter>,
    /// Body decode attempts, by encoding and outcome.
    pub body_decodes_total: Family<DecodeLabels, Counter>,
}

impl CoreMetrics {
    /// Create and register all core metrics.
    ///
    /// Counter names are registered without the `_total` suffix;
    /// prometheus-client appends it on exposition.
    pub fn new(registry: &mut Registry) -> Self {
        let mutation_events_total = Family::<MutationLabels, Counter>::default();
        registry.register(
            "interpose_mutation_events",
            "Mutation events dispatched per operation",
            mutation_events_total.clone(),
        );

        let listener_failures_total = Family::<ListenerFailureLabels, Counter>::default();
        registry.register(
            "interpose_listener_failures",
            "Event listener invocations that failed",
            listener_failures_total.clone(),
        );

        let body_decodes_total = Family::<DecodeLabels, Counter>::default();
        registry.register(
            "interpose_body_decodes",
            "Body decode attempts by encoding and outcome",
            body_decodes_total.clone(),
        );

        Self {
            mutation_events_total,
            listener_failures_total,
            body_decodes_total,
        }
    }

    /// Record one dispatched mutation event.
    pub fn record_mutation(&self, operation: &str) {
        self.mutation_events_total
            .get_or_create(&MutationLabels {
                operation: operation.to_string(),
            })
            .inc();
    }

    /// Record a listener failure on the given channel.
    pub fn record_listener_failure(&self, channel: &str, failure: &str) {
        self.listener_failures_total
            .get_or_create(&ListenerFailureLabels {
                channel: channel.to_string(),
                failure: failure.to_string(),
            })
            .inc();
    }

    /// Record a body decode outcome.
    pub fn record_decode(&self, encoding: &str, outcome: &str) {
        self.body_decodes_total
            .get_or_create(&DecodeLabels {
                encoding: encoding.to_string(),
                outcome: outcome.to_string(),
            })
            .inc();
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Global Metrics
// ─────────────────────────────────────────────────────────────────────────────

static CORE_METRICS: OnceLock<Arc<CoreMetrics>> = OnceLock::new();

/// Initialize global core metrics.
///
/// Only the first call registers anything. Later calls leave `registry`
/// untouched and return `false`.
pub fn init_metrics(registry: &mut Registry) -> bool {
    if CORE_METRICS.get().is_some() {
        return false;
    }
    CORE_METRICS.set(Arc::new(CoreMetrics::new(registry))).is_ok()
}

/// Get the global core metrics instance, if installed.
pub fn get_core_metrics() -> Option<Arc<CoreMetrics>> {
    CORE_METRICS.get().cloned()
}
