//! # pageflow-producer
//!
//! The delivery pipeline that connects one stochastic page-view source to N
//! independent partition writers while preserving per-message
//! acknowledgement under batching, concurrency and transient failures:
//!
//! ```text
//! Generator ──events──▶ Publisher ──▶ Partitioner ──▶ Batcher[p] ──▶ Dispatcher ──▶ Broker[p]
//!                          │                                              │
//!                          └──────────── per-message callback ◀───────────┘
//! ```
//!
//! Delivery is at-least-once; a submission's outcome is observable
//! exclusively through its callback, which fires at most once per envelope.
//!
//! ## Example
//!
//! ```rust,ignore
//! use pageflow_producer::{EventGenerator, Pipeline, PipelineConfig};
//! use tokio_util::sync::CancellationToken;
//!
//! # async fn example(writers: Vec<std::sync::Arc<dyn pageflow_producer::PartitionWriter>>) -> pageflow_core::Result<()> {
//! let root = CancellationToken::new();
//! let pipeline = Pipeline::new(root.clone(), PipelineConfig::default(), writers)?;
//!
//! let mut events = EventGenerator::new().listen();
//! while let Some(tagged) = events.recv().await {
//!     pipeline
//!         .send_async(root.child_token(), tagged.event, None)
//!         .await?;
//! }
//! pipeline.close().await;
//! # Ok(())
//! # }
//! ```

pub mod batcher;
pub mod broker;
pub mod dispatcher;
pub mod envelope;
pub mod flush;
pub mod generator;
pub mod partitioner;
pub mod pipeline;
pub mod publisher;
pub mod stats;

pub use batcher::{BatchMode, Batcher, BatcherConfig};
pub use broker::{BrokerConnection, PartitionWriter, Record, SharedBrokerWriter};
pub use dispatcher::Dispatcher;
pub use envelope::{Callback, Envelope, FlushFn, KeyFn, PartitionWriteFn, WriteFn};
pub use flush::partition_flush;
pub use generator::{EventGenerator, EventStream, GeneratorMode};
pub use partitioner::Partitioner;
pub use pipeline::{Pipeline, PipelineConfig, PlacementMode};
pub use publisher::Publisher;
pub use stats::{PipelineStats, PipelineStatsSnapshot};
