//! Pull-based metrics for the producer pipeline.
//!
//! Uses the `metrics` crate facade; the Prometheus exporter serves
//! `GET /metrics` on the configured port.
//!
//! The generator's cumulative counter keeps its historical name
//! `event_generated_count`; everything else follows the
//! `pageflow_{name}_total` convention.

use std::sync::OnceLock;

pub use metrics::{counter, gauge, histogram};

static METRICS_INITIALIZED: OnceLock<()> = OnceLock::new();

/// Start the Prometheus exporter.
///
/// Serves metrics at `http://{addr}/metrics`. Safe to call more than once;
/// only the first call installs the recorder.
pub fn init_metrics(
    addr: std::net::SocketAddr,
) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    METRICS_INITIALIZED.get_or_init(
        || match metrics_exporter_prometheus::PrometheusBuilder::new()
            .with_http_listener(addr)
            .install()
        {
            Ok(()) => {
                tracing::info!("metrics exporter listening on http://{}/metrics", addr);
            }
            Err(e) => {
                tracing::error!("failed to start metrics exporter: {}", e);
            }
        },
    );
    Ok(())
}

/// Counters incremented by the pipeline stages.
pub struct PipelineMetrics;

impl PipelineMetrics {
    /// Cumulative events emitted by the generator.
    pub fn add_events_generated(count: u64) {
        metrics::counter!("event_generated_count").increment(count);
    }

    /// Events accepted by the publisher's submit paths.
    pub fn increment_events_submitted() {
        metrics::counter!("pageflow_events_submitted_total").increment(1);
    }

    /// Envelopes acknowledged with success.
    pub fn add_sends_succeeded(count: u64) {
        metrics::counter!("pageflow_sends_succeeded_total").increment(count);
    }

    /// Envelopes acknowledged with an error.
    pub fn add_sends_failed(count: u64) {
        metrics::counter!("pageflow_sends_failed_total").increment(count);
    }

    /// Batches handed to a flush function.
    pub fn increment_flush_batches() {
        metrics::counter!("pageflow_flush_batches_total").increment(1);
    }

    /// Envelopes dropped at the batcher's safety ceiling.
    pub fn increment_flush_drops() {
        metrics::counter!("pageflow_flush_drops_total").increment(1);
    }

    /// Failed write attempts that the dispatcher retried.
    pub fn increment_retry_attempts() {
        metrics::counter!("pageflow_retry_attempts_total").increment(1);
    }
}
