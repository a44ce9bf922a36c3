//! Delivery accounting for a running pipeline.
//!
//! Complements the pull-based metrics endpoint with an in-process snapshot a
//! caller can poll cheaply.

use std::sync::atomic::{AtomicU64, Ordering};

/// Shared counters incremented by the pipeline stages.
#[derive(Debug, Default)]
pub struct PipelineStats {
    pub(crate) events_submitted: AtomicU64,
    pub(crate) acks_succeeded: AtomicU64,
    pub(crate) acks_failed: AtomicU64,
    pub(crate) batches_flushed: AtomicU64,
}

impl PipelineStats {
    pub fn snapshot(&self) -> PipelineStatsSnapshot {
        PipelineStatsSnapshot {
            events_submitted: self.events_submitted.load(Ordering::Relaxed),
            acks_succeeded: self.acks_succeeded.load(Ordering::Relaxed),
            acks_failed: self.acks_failed.load(Ordering::Relaxed),
            batches_flushed: self.batches_flushed.load(Ordering::Relaxed),
        }
    }
}

/// Point-in-time view of the pipeline's counters.
#[derive(Debug, Clone)]
pub struct PipelineStatsSnapshot {
    /// Events accepted by the submit paths.
    pub events_submitted: u64,
    /// Envelopes acknowledged with success.
    pub acks_succeeded: u64,
    /// Envelopes acknowledged with an error.
    pub acks_failed: u64,
    /// Batches handed to the partition writers.
    pub batches_flushed: u64,
}

impl PipelineStatsSnapshot {
    /// Fraction of settled envelopes that succeeded.
    pub fn success_rate(&self) -> f64 {
        let settled = self.acks_succeeded + self.acks_failed;
        if settled == 0 {
            1.0
        } else {
            self.acks_succeeded as f64 / settled as f64
        }
    }

    /// Envelopes admitted but not yet settled either way.
    pub fn pending(&self) -> u64 {
        self.events_submitted
            .saturating_sub(self.acks_succeeded + self.acks_failed)
    }
}
