//! Asynchronous publisher: a bounded work queue drained by a fixed pool of
//! workers, each forwarding messages through a caller-supplied write
//! function.

use crate::envelope::{Callback, WriteFn};
use pageflow_core::{Error, PipelineMetrics, Result};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::warn;

struct AsyncMessage<T> {
    token: CancellationToken,
    payload: T,
    callback: Option<Callback<T>>,
}

/// Bounded async submit path backed by a fixed worker pool.
///
/// `send_async` enqueues and blocks only when the queue is full; workers pull
/// in arrival order but interleave arbitrarily. `close` is one-shot: the
/// second call returns [`Error::Closed`].
pub struct Publisher<T> {
    write: WriteFn<T>,
    tx: mpsc::Sender<AsyncMessage<T>>,
    rx: Arc<tokio::sync::Mutex<mpsc::Receiver<AsyncMessage<T>>>>,
    close_token: CancellationToken,
    closed: AtomicBool,
    workers: parking_lot::Mutex<Vec<JoinHandle<()>>>,
}

impl<T: Clone + Send + Sync + 'static> Publisher<T> {
    /// Spawn `worker_count` workers draining a queue of capacity `buffer`.
    ///
    /// Workers stop when the parent token cancels or the publisher closes.
    pub fn new(
        parent: CancellationToken,
        write: WriteFn<T>,
        worker_count: usize,
        buffer: usize,
    ) -> Self {
        let (tx, rx) = mpsc::channel(buffer.max(1));
        let rx = Arc::new(tokio::sync::Mutex::new(rx));
        let close_token = CancellationToken::new();

        let workers = (0..worker_count.max(1))
            .map(|_| {
                let parent = parent.clone();
                let close = close_token.clone();
                let rx = Arc::clone(&rx);
                let write = Arc::clone(&write);
                tokio::spawn(async move {
                    worker_loop(parent, close, rx, write).await;
                })
            })
            .collect();

        Self {
            write,
            tx,
            rx,
            close_token,
            closed: AtomicBool::new(false),
            workers: parking_lot::Mutex::new(workers),
        }
    }

    /// Invoke the write function inline on the caller's context.
    pub fn send_sync(&self, token: &CancellationToken, payload: T) -> Result<()> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(Error::Closed);
        }

        PipelineMetrics::increment_events_submitted();
        (self.write)(token, payload, None)
    }

    /// Enqueue a message for the worker pool.
    ///
    /// Blocks while the queue is full; fails with [`Error::Closed`] once the
    /// publisher has closed.
    pub async fn send_async(
        &self,
        token: CancellationToken,
        payload: T,
        callback: Option<Callback<T>>,
    ) -> Result<()> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(Error::Closed);
        }

        self.tx
            .send(AsyncMessage {
                token,
                payload,
                callback,
            })
            .await
            .map_err(|_| Error::Closed)?;

        PipelineMetrics::increment_events_submitted();
        Ok(())
    }

    /// Stop the workers and wait for them to finish their current messages.
    ///
    /// Messages still queued at that point are settled with
    /// [`Error::Cancelled`] so no admitted envelope loses its callback. The
    /// second call returns [`Error::Closed`].
    pub async fn close(&self) -> Result<()> {
        if self.closed.swap(true, Ordering::SeqCst) {
            return Err(Error::Closed);
        }

        self.close_token.cancel();

        let workers = std::mem::take(&mut *self.workers.lock());
        for worker in workers {
            let _ = worker.await;
        }

        // Settle whatever the workers did not get to.
        let mut rx = self.rx.lock().await;
        while let Ok(message) = rx.try_recv() {
            if let Some(callback) = &message.callback {
                callback(&message.token, &message.payload, Some(&Error::Cancelled));
            }
        }

        Ok(())
    }
}

async fn worker_loop<T: Clone + Send + Sync + 'static>(
    parent: CancellationToken,
    close: CancellationToken,
    rx: Arc<tokio::sync::Mutex<mpsc::Receiver<AsyncMessage<T>>>>,
    write: WriteFn<T>,
) {
    loop {
        let message = {
            let mut rx = rx.lock().await;
            tokio::select! {
                biased;
                _ = parent.cancelled() => return,
                _ = close.cancelled() => return,
                message = rx.recv() => match message {
                    Some(message) => message,
                    None => return,
                },
            }
        };

        if let Err(err) = (write)(
            &message.token,
            message.payload.clone(),
            message.callback.clone(),
        ) {
            warn!(error = %err, "async write failed");
            if let Some(callback) = &message.callback {
                callback(&message.token, &message.payload, Some(&err));
            }
        }
    }
}
