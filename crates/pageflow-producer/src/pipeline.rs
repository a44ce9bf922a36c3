//! End-to-end wiring: publisher → partitioner → per-partition batchers →
//! dispatcher → partition writers.
//!
//! Shutdown order mirrors startup in reverse: the publisher stops accepting
//! and drains first, then every batcher flushes its remainder and waits for
//! outstanding acknowledgements. The caller closes the broker connections
//! afterwards.

use crate::batcher::{Batcher, BatcherConfig};
use crate::broker::PartitionWriter;
use crate::dispatcher::Dispatcher;
use crate::envelope::{Callback, KeyFn, PartitionWriteFn, WriteFn};
use crate::flush::partition_flush;
use crate::partitioner::Partitioner;
use crate::publisher::Publisher;
use crate::stats::{PipelineStats, PipelineStatsSnapshot};
use pageflow_core::{Error, PageViewEvent, Result};
use std::sync::atomic::Ordering;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::warn;

/// Placement policy selection for the pipeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum PlacementMode {
    #[default]
    RoundRobin,
    Random,
    /// FNV-1a over the event's user id.
    Key,
}

impl std::str::FromStr for PlacementMode {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "round_robin" => Ok(PlacementMode::RoundRobin),
            "random" => Ok(PlacementMode::Random),
            "key" => Ok(PlacementMode::Key),
            other => Err(Error::InvalidMode(other.to_string())),
        }
    }
}

/// Tunables for the whole delivery pipeline.
#[derive(Debug, Clone)]
pub struct PipelineConfig {
    pub publisher_workers: usize,
    pub publisher_buffer: usize,
    pub placement: PlacementMode,
    pub batch: BatcherConfig,
    pub dispatcher: Dispatcher,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            publisher_workers: 8,
            publisher_buffer: 4096,
            placement: PlacementMode::default(),
            batch: BatcherConfig::default(),
            dispatcher: Dispatcher::new(),
        }
    }
}

/// The assembled delivery pipeline for page-view events.
pub struct Pipeline {
    publisher: Publisher<PageViewEvent>,
    batchers: Arc<Vec<Batcher<PageViewEvent>>>,
    stats: Arc<PipelineStats>,
}

impl Pipeline {
    /// Wire the pipeline over one writer per partition.
    ///
    /// Writers are acquired by the caller before the pipeline starts and
    /// stay alive until after [`Pipeline::close`] returns.
    pub fn new(
        parent: CancellationToken,
        config: PipelineConfig,
        writers: Vec<Arc<dyn PartitionWriter>>,
    ) -> Result<Self> {
        if writers.is_empty() {
            return Err(Error::InvalidCount(0));
        }

        let dispatcher = Arc::new(config.dispatcher);
        let stats = Arc::new(PipelineStats::default());
        let batchers: Vec<Batcher<PageViewEvent>> = writers
            .into_iter()
            .map(|writer| {
                Batcher::new(
                    config.batch.clone(),
                    partition_flush(Arc::clone(&dispatcher), writer, Arc::clone(&stats)),
                )
            })
            .collect::<Result<_>>()?;
        let batchers = Arc::new(batchers);
        let partition_count = batchers.len();

        let push: PartitionWriteFn<PageViewEvent> = {
            let batchers = Arc::clone(&batchers);
            Arc::new(move |token, partition, event, callback| {
                batchers[partition].push(token.clone(), event, callback)
            })
        };

        let partitioner = Arc::new(Partitioner::new(push));
        match config.placement {
            PlacementMode::RoundRobin => partitioner.set_round_robin_mode(partition_count)?,
            PlacementMode::Random => partitioner.set_random_mode(partition_count)?,
            PlacementMode::Key => {
                let by_user: KeyFn<PageViewEvent> =
                    Arc::new(|event: &PageViewEvent| event.user_id.clone());
                partitioner.set_key_mode(by_user, partition_count)?
            }
        }

        let write: WriteFn<PageViewEvent> = {
            let partitioner = Arc::clone(&partitioner);
            Arc::new(move |token, event, callback| partitioner.write(token, event, callback))
        };

        let publisher = Publisher::new(
            parent,
            write,
            config.publisher_workers,
            config.publisher_buffer,
        );

        Ok(Self {
            publisher,
            batchers,
            stats,
        })
    }

    /// Queue an event for asynchronous delivery.
    pub async fn send_async(
        &self,
        token: CancellationToken,
        event: PageViewEvent,
        callback: Option<Callback<PageViewEvent>>,
    ) -> Result<()> {
        self.publisher.send_async(token, event, callback).await?;
        self.stats.events_submitted.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }

    /// Deliver an event on the caller's context, bypassing the queue.
    pub fn send_sync(&self, token: &CancellationToken, event: PageViewEvent) -> Result<()> {
        self.publisher.send_sync(token, event)?;
        self.stats.events_submitted.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }

    /// Point-in-time delivery accounting.
    pub fn stats(&self) -> PipelineStatsSnapshot {
        self.stats.snapshot()
    }

    /// Close the publisher, then every batcher. All in-flight callbacks have
    /// fired by the time this returns.
    pub async fn close(&self) {
        if let Err(err) = self.publisher.close().await {
            warn!(error = %err, "publisher close");
        }
        for batcher in self.batchers.iter() {
            batcher.close().await;
        }
    }
}
