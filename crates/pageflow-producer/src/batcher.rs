//! Per-partition batcher: a bounded buffer of envelopes flushed as one
//! vector, by size, by time, or both.
//!
//! Pushers share one mutex over the buffer; a flush snapshots the buffer
//! under the lock and runs on a fresh task, so push latency stays O(1) and
//! independent of downstream throughput.

use crate::envelope::{Callback, Envelope, FlushFn};
use pageflow_core::{Error, PipelineMetrics, Result};
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Notify;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{error, warn};

/// Hard cap on buffered envelopes. Under sustained overload pushes beyond
/// this are rejected (and logged) rather than allowed to block the
/// submission path.
const BUFFER_CEILING: usize = 131_072;

const DEFAULT_FLUSH_SIZE: usize = 300;
const DEFAULT_FLUSH_PERIOD: Duration = Duration::from_secs(2);

/// What triggers a flush.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum BatchMode {
    /// Flush when the buffer reaches `flush_size`. No timer.
    Size,
    /// Flush every `flush_period`. Push never triggers a flush.
    #[default]
    Time,
    /// Flush on either trigger; a size-triggered flush resets the timer.
    Hybrid,
}

#[derive(Debug, Clone)]
pub struct BatcherConfig {
    pub mode: BatchMode,
    pub flush_size: usize,
    pub flush_period: Duration,
}

impl Default for BatcherConfig {
    fn default() -> Self {
        Self {
            mode: BatchMode::default(),
            flush_size: DEFAULT_FLUSH_SIZE,
            flush_period: DEFAULT_FLUSH_PERIOD,
        }
    }
}

/// Accumulates envelopes destined for one partition.
///
/// Many tasks may push concurrently. The flush function receives the full
/// envelope vector, callbacks included; acknowledging each envelope is its
/// responsibility.
pub struct Batcher<T> {
    config: BatcherConfig,
    flush: FlushFn<T>,
    buffer: Arc<Mutex<Vec<Envelope<T>>>>,
    stopped: AtomicBool,
    stop: CancellationToken,
    reset: Arc<Notify>,
    ticker: Mutex<Option<JoinHandle<()>>>,
    tasks: TaskTracker,
}

impl<T: Send + Sync + 'static> Batcher<T> {
    /// Build a batcher and start its ticker when the mode needs one.
    pub fn new(config: BatcherConfig, flush: FlushFn<T>) -> Result<Self> {
        if config.flush_size == 0 {
            return Err(Error::InvalidConfig("flush size must be at least 1".into()));
        }
        if config.flush_period.is_zero() {
            return Err(Error::InvalidConfig("flush period must be positive".into()));
        }

        let batcher = Self {
            config,
            flush,
            buffer: Arc::new(Mutex::new(Vec::new())),
            stopped: AtomicBool::new(false),
            stop: CancellationToken::new(),
            reset: Arc::new(Notify::new()),
            ticker: Mutex::new(None),
            tasks: TaskTracker::new(),
        };

        if matches!(batcher.config.mode, BatchMode::Time | BatchMode::Hybrid) {
            let handle = batcher.spawn_ticker();
            *batcher.ticker.lock() = Some(handle);
        }

        Ok(batcher)
    }

    /// Append an envelope; may trigger an asynchronous flush.
    pub fn push(
        &self,
        token: CancellationToken,
        payload: T,
        callback: Option<Callback<T>>,
    ) -> Result<()> {
        if self.stopped.load(Ordering::SeqCst) {
            error!("push to a stopped batcher");
            return Err(Error::BatcherStopped);
        }

        let batch = {
            let mut buffer = self.buffer.lock();
            if buffer.len() >= BUFFER_CEILING {
                warn!(ceiling = BUFFER_CEILING, "batch buffer full, dropping message");
                PipelineMetrics::increment_flush_drops();
                return Err(Error::BufferFull);
            }

            buffer.push(Envelope::new(token, payload, callback));

            match self.config.mode {
                BatchMode::Size | BatchMode::Hybrid
                    if buffer.len() >= self.config.flush_size =>
                {
                    Some(std::mem::take(&mut *buffer))
                }
                _ => None,
            }
        };

        if let Some(batch) = batch {
            if self.config.mode == BatchMode::Hybrid {
                self.reset.notify_one();
            }
            self.spawn_flush(batch);
        }

        Ok(())
    }

    /// Stop the ticker, flush the remaining buffer, and wait for every
    /// outstanding flush task, so all acknowledgements land before this
    /// returns. Idempotent.
    pub async fn close(&self) {
        if self.stopped.swap(true, Ordering::SeqCst) {
            return;
        }

        self.stop.cancel();
        let ticker = self.ticker.lock().take();
        if let Some(handle) = ticker {
            let _ = handle.await;
        }

        let batch = std::mem::take(&mut *self.buffer.lock());
        if !batch.is_empty() {
            PipelineMetrics::increment_flush_batches();
            (self.flush)(batch).await;
        }

        self.tasks.close();
        self.tasks.wait().await;
    }

    fn spawn_flush(&self, batch: Vec<Envelope<T>>) {
        PipelineMetrics::increment_flush_batches();
        let flush = Arc::clone(&self.flush);
        self.tasks.spawn(async move {
            flush(batch).await;
        });
    }

    fn spawn_ticker(&self) -> JoinHandle<()> {
        let buffer = Arc::clone(&self.buffer);
        let flush = Arc::clone(&self.flush);
        let stop = self.stop.clone();
        let reset = Arc::clone(&self.reset);
        let period = self.config.flush_period;
        let tasks = self.tasks.clone();

        tokio::spawn(async move {
            loop {
                tokio::select! {
                    biased;
                    _ = stop.cancelled() => return,
                    _ = reset.notified() => continue,
                    _ = tokio::time::sleep(period) => {
                        let batch = std::mem::take(&mut *buffer.lock());
                        if !batch.is_empty() {
                            PipelineMetrics::increment_flush_batches();
                            let flush = Arc::clone(&flush);
                            tasks.spawn(async move {
                                flush(batch).await;
                            });
                        }
                    }
                }
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::envelope::FlushFuture;

    type FlushLog = Arc<Mutex<Vec<Vec<String>>>>;

    fn recording_flush(log: FlushLog) -> FlushFn<String> {
        Arc::new(move |batch: Vec<Envelope<String>>| -> FlushFuture {
            let log = Arc::clone(&log);
            Box::pin(async move {
                log.lock()
                    .push(batch.into_iter().map(|e| e.payload).collect());
            })
        })
    }

    fn push_all(batcher: &Batcher<String>, payloads: &[&str]) {
        for payload in payloads {
            batcher
                .push(CancellationToken::new(), payload.to_string(), None)
                .unwrap();
        }
    }

    #[tokio::test]
    async fn size_mode_flushes_at_flush_size() {
        let log: FlushLog = Arc::new(Mutex::new(Vec::new()));
        let batcher = Batcher::new(
            BatcherConfig {
                mode: BatchMode::Size,
                flush_size: 2,
                ..Default::default()
            },
            recording_flush(Arc::clone(&log)),
        )
        .unwrap();

        push_all(&batcher, &["a", "b"]);
        batcher.close().await;

        assert_eq!(*log.lock(), vec![vec!["a".to_string(), "b".to_string()]]);
    }

    #[tokio::test]
    async fn time_mode_flushes_on_the_ticker() {
        let log: FlushLog = Arc::new(Mutex::new(Vec::new()));
        let batcher = Batcher::new(
            BatcherConfig {
                mode: BatchMode::Time,
                flush_period: Duration::from_millis(20),
                ..Default::default()
            },
            recording_flush(Arc::clone(&log)),
        )
        .unwrap();

        push_all(&batcher, &["a"]);
        tokio::time::sleep(Duration::from_millis(60)).await;

        assert_eq!(log.lock().first(), Some(&vec!["a".to_string()]));
        batcher.close().await;
    }

    #[tokio::test]
    async fn close_flushes_the_remainder() {
        let log: FlushLog = Arc::new(Mutex::new(Vec::new()));
        let batcher = Batcher::new(
            BatcherConfig {
                mode: BatchMode::Size,
                flush_size: 5,
                ..Default::default()
            },
            recording_flush(Arc::clone(&log)),
        )
        .unwrap();

        push_all(&batcher, &["a", "b"]);
        batcher.close().await;

        assert_eq!(*log.lock(), vec![vec!["a".to_string(), "b".to_string()]]);
    }

    #[tokio::test]
    async fn push_after_close_is_rejected() {
        let log: FlushLog = Arc::new(Mutex::new(Vec::new()));
        let batcher = Batcher::new(
            BatcherConfig {
                mode: BatchMode::Size,
                flush_size: 2,
                ..Default::default()
            },
            recording_flush(Arc::clone(&log)),
        )
        .unwrap();

        batcher.close().await;
        let result = batcher.push(CancellationToken::new(), "a".to_string(), None);
        assert!(matches!(result, Err(Error::BatcherStopped)));
        assert!(log.lock().is_empty());
    }

    #[tokio::test]
    async fn close_is_idempotent() {
        let log: FlushLog = Arc::new(Mutex::new(Vec::new()));
        let batcher = Batcher::new(
            BatcherConfig {
                mode: BatchMode::Size,
                flush_size: 5,
                ..Default::default()
            },
            recording_flush(Arc::clone(&log)),
        )
        .unwrap();

        push_all(&batcher, &["a"]);
        batcher.close().await;
        batcher.close().await;

        assert_eq!(log.lock().len(), 1);
    }

    #[tokio::test]
    async fn size_mode_produces_full_batches_then_one_shorter() {
        let log: FlushLog = Arc::new(Mutex::new(Vec::new()));
        let batcher = Batcher::new(
            BatcherConfig {
                mode: BatchMode::Size,
                flush_size: 3,
                ..Default::default()
            },
            recording_flush(Arc::clone(&log)),
        )
        .unwrap();

        for i in 0..10 {
            batcher
                .push(CancellationToken::new(), format!("m{i}"), None)
                .unwrap();
        }
        batcher.close().await;

        let lengths: Vec<usize> = log.lock().iter().map(|batch| batch.len()).collect();
        let mut sorted = lengths.clone();
        sorted.sort_unstable_by(|a, b| b.cmp(a));
        assert_eq!(sorted, vec![3, 3, 3, 1]);
        assert_eq!(lengths.iter().sum::<usize>(), 10);
    }

    #[tokio::test]
    async fn hybrid_mode_flushes_on_both_triggers() {
        let log: FlushLog = Arc::new(Mutex::new(Vec::new()));
        let batcher = Batcher::new(
            BatcherConfig {
                mode: BatchMode::Hybrid,
                flush_size: 3,
                flush_period: Duration::from_millis(40),
            },
            recording_flush(Arc::clone(&log)),
        )
        .unwrap();

        // Size trigger fires immediately.
        push_all(&batcher, &["a", "b", "c"]);
        tokio::time::sleep(Duration::from_millis(10)).await;
        assert_eq!(log.lock().len(), 1);
        assert_eq!(log.lock()[0].len(), 3);

        // A lone message is picked up by the (reset) ticker.
        push_all(&batcher, &["d"]);
        tokio::time::sleep(Duration::from_millis(80)).await;
        assert_eq!(log.lock().len(), 2);
        assert_eq!(log.lock()[1], vec!["d".to_string()]);

        batcher.close().await;
    }

    #[tokio::test]
    async fn ceiling_rejects_further_pushes() {
        let log: FlushLog = Arc::new(Mutex::new(Vec::new()));
        let batcher = Batcher::new(
            BatcherConfig {
                mode: BatchMode::Time,
                flush_period: Duration::from_secs(3600),
                ..Default::default()
            },
            recording_flush(Arc::clone(&log)),
        )
        .unwrap();

        let token = CancellationToken::new();
        for i in 0..BUFFER_CEILING {
            batcher
                .push(token.clone(), format!("m{i}"), None)
                .unwrap();
        }

        let overflow = batcher.push(token.clone(), "overflow".to_string(), None);
        assert!(matches!(overflow, Err(Error::BufferFull)));

        batcher.close().await;
        assert_eq!(log.lock().iter().map(|b| b.len()).sum::<usize>(), BUFFER_CEILING);
    }
}
