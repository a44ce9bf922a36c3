//! pageflow producer daemon.
//!
//! Bootstraps logging and metrics, dials one broker connection per
//! partition, wires the delivery pipeline, and feeds it from the event
//! generator until interrupted.
//!
//! Usage:
//!   # defaults: regular profile, 5 partitions, round-robin
//!   pageflowd
//!
//!   # burst load, key placement, hybrid batching
//!   pageflowd --generator-mode peak --partition-mode key --batcher-mode hybrid

mod cli;

use clap::Parser;
use cli::Cli;
use pageflow_core::{init_metrics, PageViewEvent};
use pageflow_producer::{
    BrokerConnection, Callback, EventGenerator, PartitionWriter, Pipeline, SharedBrokerWriter,
};
use std::net::SocketAddr;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| cli.log_level.clone().into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    if let Err(e) = cli.validate() {
        eprintln!("Configuration error: {e}");
        std::process::exit(1);
    }

    let metrics_addr: SocketAddr = ([0, 0, 0, 0], cli.metrics_port).into();
    if let Err(e) = init_metrics(metrics_addr) {
        error!(error = %e, "metrics exporter failed to start");
    }

    // One connection per partition, acquired before anything produces.
    let mut writers = Vec::with_capacity(cli.partition_count);
    for partition in 0..cli.partition_count {
        let connection =
            BrokerConnection::connect(&cli.broker_addr, &cli.broker_topic, partition as u32)
                .await?;
        writers.push(SharedBrokerWriter::new(connection));
    }

    let root = CancellationToken::new();
    let pipeline = Pipeline::new(
        root.clone(),
        cli.pipeline_config(),
        writers
            .iter()
            .map(|writer| Arc::new(writer.clone()) as Arc<dyn PartitionWriter>)
            .collect(),
    )?;

    let generator = EventGenerator::new()
        .with_mode(cli.generator_mode.into())
        .with_duration_max(cli.generator_duration_max)
        .with_bounce_rate(cli.generator_bounce_rate)
        .with_invalid_rate(cli.generator_invalid_rate);
    let mut events = generator.listen();

    let stream_stop = events.stop_token();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("shutdown signal received, stopping the generator");
            stream_stop.cancel();
        }
    });

    info!(
        topic = %cli.broker_topic,
        partitions = cli.partition_count,
        workers = cli.publisher_workers,
        "producer started"
    );

    let ack: Callback<PageViewEvent> = Arc::new(|_, event, err| {
        info!(
            user_id = %event.user_id,
            success = err.is_none(),
            "event sent"
        );
    });

    while let Some(tagged) = events.recv().await {
        if let Err(err) = pipeline
            .send_async(root.child_token(), tagged.event, Some(Arc::clone(&ack)))
            .await
        {
            error!(error = %err, "submit failed");
        }
    }

    // Reverse of startup: publisher drains, batchers flush and settle, then
    // the broker connections go down.
    info!("draining the pipeline");
    pipeline.close().await;
    for writer in &writers {
        if let Err(err) = writer.close().await {
            error!(error = %err, "broker connection close");
        }
    }

    let stats = pipeline.stats();
    info!(
        submitted = stats.events_submitted,
        succeeded = stats.acks_succeeded,
        failed = stats.acks_failed,
        batches = stats.batches_flushed,
        "shutdown complete"
    );
    Ok(())
}
