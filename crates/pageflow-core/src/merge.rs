//! Cancellation fan-in.
//!
//! A batch flush inherits the lifetimes of every envelope that entered the
//! batch: the merged token cancels as soon as any submitter loses interest,
//! or when the flush itself cancels it.

use tokio_util::sync::CancellationToken;

/// Fuse any number of cancellation tokens into one.
///
/// The returned token is cancelled when any input token is cancelled or when
/// `cancel()` is invoked on it directly (idempotent, always safe). One
/// watcher task is spawned per input; every watcher exits as soon as the
/// merged token fires, whichever side fired it.
pub fn merge<I>(tokens: I) -> CancellationToken
where
    I: IntoIterator<Item = CancellationToken>,
{
    let merged = CancellationToken::new();

    for token in tokens {
        let merged = merged.clone();
        tokio::spawn(async move {
            tokio::select! {
                _ = token.cancelled() => merged.cancel(),
                _ = merged.cancelled() => {}
            }
        });
    }

    merged
}
