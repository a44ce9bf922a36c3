//! The canonical per-partition flush routine.
//!
//! For every batch: fuse the submission contexts into one lifetime,
//! serialize, write through the retrying dispatcher, and settle each
//! envelope's callback with the final verdict.

use crate::broker::{PartitionWriter, Record};
use crate::dispatcher::Dispatcher;
use crate::envelope::{Envelope, FlushFn};
use crate::stats::PipelineStats;
use bytes::Bytes;
use pageflow_core::{merge, PageViewEvent, PipelineMetrics};
use std::sync::atomic::Ordering;
use std::sync::Arc;
use tracing::error;

/// Build the flush function for one partition.
///
/// Envelopes that fail serialization are acknowledged immediately with the
/// serialization error and dropped from the batch; the rest are written as
/// one record vector (key = user_id, value = event JSON) and acknowledged
/// together after the dispatcher's final verdict.
pub fn partition_flush<W>(
    dispatcher: Arc<Dispatcher>,
    writer: Arc<W>,
    stats: Arc<PipelineStats>,
) -> FlushFn<PageViewEvent>
where
    W: PartitionWriter + ?Sized + 'static,
{
    Arc::new(move |envelopes: Vec<Envelope<PageViewEvent>>| {
        let dispatcher = Arc::clone(&dispatcher);
        let writer = Arc::clone(&writer);
        let stats = Arc::clone(&stats);

        Box::pin(async move {
            stats.batches_flushed.fetch_add(1, Ordering::Relaxed);
            let merged = merge(envelopes.iter().map(|envelope| envelope.token.clone()));

            let mut valid = Vec::with_capacity(envelopes.len());
            let mut records = Vec::with_capacity(envelopes.len());
            for envelope in envelopes {
                match envelope.payload.to_bytes() {
                    Ok(bytes) => {
                        records.push(Record {
                            key: Bytes::copy_from_slice(envelope.payload.user_id.as_bytes()),
                            value: Bytes::from(bytes),
                        });
                        valid.push(envelope);
                    }
                    Err(err) => {
                        error!(error = %err, "dropping unserializable event");
                        PipelineMetrics::add_sends_failed(1);
                        stats.acks_failed.fetch_add(1, Ordering::Relaxed);
                        envelope.ack(&merged, Some(&err));
                    }
                }
            }

            if valid.is_empty() {
                merged.cancel();
                return;
            }

            let verdict = dispatcher
                .write(&merged, |attempt_token| {
                    let writer = Arc::clone(&writer);
                    let records = records.clone();
                    async move { writer.write_batch(&attempt_token, records).await }
                })
                .await;

            match verdict {
                Ok(()) => {
                    PipelineMetrics::add_sends_succeeded(valid.len() as u64);
                    stats
                        .acks_succeeded
                        .fetch_add(valid.len() as u64, Ordering::Relaxed);
                    for envelope in &valid {
                        envelope.ack(&merged, None);
                    }
                }
                Err(err) => {
                    error!(error = %err, batch = valid.len(), "batch write failed");
                    PipelineMetrics::add_sends_failed(valid.len() as u64);
                    stats
                        .acks_failed
                        .fetch_add(valid.len() as u64, Ordering::Relaxed);
                    for envelope in &valid {
                        envelope.ack(&merged, Some(&err));
                    }
                }
            }

            // Release the merge watchers.
            merged.cancel();
        })
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::envelope::Callback;
    use async_trait::async_trait;
    use pageflow_core::{Error, Region, Result};
    use parking_lot::Mutex;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;
    use tokio_util::sync::CancellationToken;

    struct RecordingWriter {
        batches: Mutex<Vec<Vec<Record>>>,
        fail: bool,
        delay: Duration,
    }

    impl RecordingWriter {
        fn new(fail: bool) -> Self {
            Self {
                batches: Mutex::new(Vec::new()),
                fail,
                delay: Duration::ZERO,
            }
        }
    }

    #[async_trait]
    impl PartitionWriter for RecordingWriter {
        async fn write_batch(&self, _: &CancellationToken, records: Vec<Record>) -> Result<()> {
            if !self.delay.is_zero() {
                tokio::time::sleep(self.delay).await;
            }
            if self.fail {
                return Err(Error::Write("unreachable broker".into()));
            }
            self.batches.lock().push(records);
            Ok(())
        }
    }

    fn sample_event(user_id: &str) -> PageViewEvent {
        PageViewEvent {
            page_id: "page-1".to_string(),
            user_id: user_id.to_string(),
            view_duration: 100,
            timestamp: chrono::Utc::now(),
            user_agent: String::new(),
            ip_address: "10.0.0.1".to_string(),
            region: Some(Region::US),
            is_bounce: false,
        }
    }

    fn counting_callback(
        oks: Arc<AtomicUsize>,
        errs: Arc<AtomicUsize>,
    ) -> Callback<PageViewEvent> {
        Arc::new(move |_, _, err| {
            if err.is_none() {
                oks.fetch_add(1, Ordering::SeqCst);
            } else {
                errs.fetch_add(1, Ordering::SeqCst);
            }
        })
    }

    #[tokio::test]
    async fn successful_flush_acks_every_envelope_once() {
        let writer = Arc::new(RecordingWriter::new(false));
        let stats = Arc::new(PipelineStats::default());
        let flush = partition_flush(
            Arc::new(Dispatcher::new()),
            Arc::clone(&writer),
            Arc::clone(&stats),
        );

        let oks = Arc::new(AtomicUsize::new(0));
        let errs = Arc::new(AtomicUsize::new(0));
        let envelopes = (0..3)
            .map(|i| {
                Envelope::new(
                    CancellationToken::new(),
                    sample_event(&format!("user-{i}")),
                    Some(counting_callback(Arc::clone(&oks), Arc::clone(&errs))),
                )
            })
            .collect();

        flush(envelopes).await;

        assert_eq!(oks.load(Ordering::SeqCst), 3);
        assert_eq!(errs.load(Ordering::SeqCst), 0);

        let batches = writer.batches.lock();
        assert_eq!(batches.len(), 1);
        assert_eq!(batches[0].len(), 3);
        assert_eq!(batches[0][0].key, Bytes::from_static(b"user-0"));
        let decoded = PageViewEvent::from_bytes(&batches[0][0].value).unwrap();
        assert_eq!(decoded.user_id, "user-0");

        let snapshot = stats.snapshot();
        assert_eq!(snapshot.batches_flushed, 1);
        assert_eq!(snapshot.acks_succeeded, 3);
        assert_eq!(snapshot.acks_failed, 0);
    }

    #[tokio::test]
    async fn failed_flush_acks_every_envelope_with_the_error() {
        let writer = Arc::new(RecordingWriter::new(true));
        let dispatcher = Dispatcher::new()
            .with_attempts(2)
            .with_initial_timeout(Duration::from_millis(50));
        let stats = Arc::new(PipelineStats::default());
        let flush = partition_flush(Arc::new(dispatcher), writer, Arc::clone(&stats));

        let oks = Arc::new(AtomicUsize::new(0));
        let errs = Arc::new(AtomicUsize::new(0));
        let envelopes = (0..2)
            .map(|i| {
                Envelope::new(
                    CancellationToken::new(),
                    sample_event(&format!("user-{i}")),
                    Some(counting_callback(Arc::clone(&oks), Arc::clone(&errs))),
                )
            })
            .collect();

        flush(envelopes).await;

        assert_eq!(oks.load(Ordering::SeqCst), 0);
        assert_eq!(errs.load(Ordering::SeqCst), 2);
        assert_eq!(stats.snapshot().acks_failed, 2);
    }

    #[tokio::test]
    async fn cancelled_submission_context_cancels_the_merged_lifetime() {
        let mut writer = RecordingWriter::new(false);
        writer.delay = Duration::from_millis(10);
        let flush = partition_flush(
            Arc::new(Dispatcher::new()),
            Arc::new(writer),
            Arc::new(PipelineStats::default()),
        );

        let abandoned = CancellationToken::new();
        let observed = Arc::new(AtomicUsize::new(0));
        let callback: Callback<PageViewEvent> = {
            let observed = Arc::clone(&observed);
            Arc::new(move |token, _, _| {
                if token.is_cancelled() {
                    observed.fetch_add(1, Ordering::SeqCst);
                }
            })
        };

        abandoned.cancel();
        let envelopes = vec![Envelope::new(
            abandoned,
            sample_event("user-0"),
            Some(callback),
        )];

        flush(envelopes).await;

        // The ack arrived on the merged context, which the abandoned
        // submission had already cancelled.
        assert_eq!(observed.load(Ordering::SeqCst), 1);
    }
}
