//! Message envelope and the callback/write-function seams between stages.

use pageflow_core::{Error, Result};
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

/// Acknowledgement callback carried alongside a payload.
///
/// Invoked at most once per envelope, by whichever stage first knows the
/// delivery verdict: `None` for success, `Some(err)` for failure.
pub type Callback<T> = Arc<dyn Fn(&CancellationToken, &T, Option<&Error>) + Send + Sync>;

/// Write function the publisher's workers forward each message through.
pub type WriteFn<T> =
    Arc<dyn Fn(&CancellationToken, T, Option<Callback<T>>) -> Result<()> + Send + Sync>;

/// Placement function invoked by the partitioner with the chosen index.
pub type PartitionWriteFn<T> =
    Arc<dyn Fn(&CancellationToken, usize, T, Option<Callback<T>>) -> Result<()> + Send + Sync>;

/// Key extractor for key-mode placement.
pub type KeyFn<T> = Arc<dyn Fn(&T) -> String + Send + Sync>;

pub type FlushFuture = Pin<Box<dyn Future<Output = ()> + Send>>;

/// Flush function a batcher hands its buffered envelopes to, one vector per
/// flush. Per-envelope acknowledgement is the flush function's job.
pub type FlushFn<T> = Arc<dyn Fn(Vec<Envelope<T>>) -> FlushFuture + Send + Sync>;

/// A payload travelling through the batcher: submission context, the payload
/// itself, and the optional acknowledgement callback.
///
/// Created at submit time; ownership moves from the publisher worker into the
/// batcher buffer, and from there into the flush task that settles it.
pub struct Envelope<T> {
    pub token: CancellationToken,
    pub payload: T,
    pub callback: Option<Callback<T>>,
}

impl<T> Envelope<T> {
    pub fn new(token: CancellationToken, payload: T, callback: Option<Callback<T>>) -> Self {
        Self {
            token,
            payload,
            callback,
        }
    }

    /// Deliver the verdict for this envelope. A `None` callback opts out of
    /// all delivery reporting.
    pub fn ack(&self, token: &CancellationToken, err: Option<&Error>) {
        if let Some(callback) = &self.callback {
            callback(token, &self.payload, err);
        }
    }
}

impl<T: std::fmt::Debug> std::fmt::Debug for Envelope<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Envelope")
            .field("payload", &self.payload)
            .field("has_callback", &self.callback.is_some())
            .finish()
    }
}
