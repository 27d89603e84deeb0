use std::{sync::Arc, time::Duration};

use bytesize::ByteSize;
use clap::Args;
use snafu::ResultExt;
use tern_ingest_core::{
    BulkIngestor, IngestError, IngestorOptions, InMemorySink, run_background_flusher,
};
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::{
    error::{IngestSnafu, InvalidArgumentSnafu, InvalidRangeSnafu, JoinSnafu, Result},
    generators::OperationGenerator,
    helpers::{format_stats, parse_size_range},
};

#[derive(Debug, Args)]
pub struct StressArgs {
    /// Number of concurrent producer tasks.
    #[arg(long, default_value = "4")]
    producers: usize,
    /// Operations per second per producer. Zero means as fast as possible.
    #[arg(long, default_value = "1000")]
    rate: u64,
    /// The document size.
    ///
    /// Either provide a size (e.g. 512 or 1KiB) or a range (e.g. 200-4KiB).
    #[arg(long, default_value = "200-2KiB")]
    payload_size: String,
    /// Fraction of operations that delete a previously indexed document.
    #[arg(long, default_value = "0.1")]
    delete_ratio: f64,
    /// Let the store assign document ids. Disables deletes.
    #[arg(long)]
    auto_ids: bool,
    /// Collection to write to.
    ///
    /// Repeat this flag to write to multiple collections.
    #[arg(long = "collection", default_values = ["books", "logs"])]
    collections: Vec<String>,
    /// Reject every write to this collection.
    #[arg(long)]
    fail_collection: Option<String>,
    /// Put the collections in bulk mode while loading.
    #[arg(long)]
    bulk: bool,
    /// Simulated store latency per batch, in milliseconds.
    #[arg(long, default_value = "0")]
    sink_latency_ms: u64,
    /// Stop after this many seconds. Runs until Ctrl-C otherwise.
    #[arg(long)]
    duration_secs: Option<u64>,
    #[clap(flatten)]
    ingestor: IngestorArgs,
}

/// Arguments for configuring the ingestor.
#[derive(Args, Debug, Clone)]
pub struct IngestorArgs {
    /// Number of operations after which a batch is sent.
    #[arg(long, default_value = "1000")]
    pub max_actions: usize,
    /// Maximum number of batches in flight. Defaults to four per CPU.
    #[arg(long)]
    pub max_concurrency: Option<usize>,
    /// Batch size after which a batch is sent.
    #[arg(long, default_value = "10MiB")]
    pub max_volume: ByteSize,
    /// Interval at which queued operations are sent, in milliseconds.
    #[arg(long, default_value = "30000")]
    pub flush_interval_ms: u64,
    /// How long shutdown waits for in-flight batches, in milliseconds.
    #[arg(long, default_value = "60000")]
    pub shutdown_timeout_ms: u64,
}

impl IngestorArgs {
    pub fn options(&self) -> IngestorOptions {
        let mut options = IngestorOptions::default()
            .with_max_actions_per_batch(self.max_actions)
            .with_max_volume_per_batch(self.max_volume)
            .with_flush_interval(Duration::from_millis(self.flush_interval_ms))
            .with_max_wait_on_shutdown(Duration::from_millis(self.shutdown_timeout_ms));

        if let Some(max_concurrency) = self.max_concurrency {
            options = options.with_max_concurrent_batches(max_concurrency);
        }

        options
    }
}

impl StressArgs {
    pub async fn run(self, ct: CancellationToken) -> Result<()> {
        if !(0.0..=1.0).contains(&self.delete_ratio) {
            return InvalidArgumentSnafu {
                message: format!("delete ratio must be between 0 and 1, got {}", self.delete_ratio),
            }
            .fail();
        }

        if self.collections.is_empty() || self.producers == 0 {
            return InvalidArgumentSnafu {
                message: "at least one collection and one producer are required".to_string(),
            }
            .fail();
        }

        let payload_size = parse_size_range(&self.payload_size).context(InvalidRangeSnafu {})?;
        let options = self.ingestor.options();

        println!("Running stress test");
        println!("  Producers: {} at {} ops/s each", self.producers, self.rate);
        println!("  Collections: {}", self.collections.join(", "));
        println!("  Payload size: {:?}", payload_size);
        println!(
            "  Batches: {} actions, {}, {} in flight, flush every {:?}",
            options.max_actions_per_batch,
            options.max_volume_per_batch.display().iec(),
            options.max_concurrent_batches,
            options.flush_interval
        );

        let mut sink = InMemorySink::new();
        if self.sink_latency_ms > 0 {
            sink = sink.with_latency(Duration::from_millis(self.sink_latency_ms));
        }
        if let Some(collection) = &self.fail_collection {
            sink.block_writes(collection.clone());
        }
        let sink = Arc::new(sink);

        let ingestor = BulkIngestor::new(sink.clone(), options).context(IngestSnafu {
            operation: "create ingestor",
        })?;

        if self.bulk {
            for collection in self.collections.iter() {
                ingestor.start_bulk(collection).await.context(IngestSnafu {
                    operation: "start bulk mode",
                })?;
            }
        }

        let producers_ct = ct.child_token();
        let flusher = tokio::spawn(run_background_flusher(ingestor.clone(), ct.child_token()));

        let producers = (0..self.producers)
            .map(|producer| {
                let generator = OperationGenerator::new(
                    producer,
                    self.collections.clone(),
                    payload_size.clone(),
                    self.delete_ratio,
                )
                .with_auto_ids(self.auto_ids);

                tokio::spawn(produce(
                    ingestor.clone(),
                    generator,
                    self.rate,
                    producers_ct.clone(),
                ))
            })
            .collect::<Vec<_>>();

        let deadline = self.duration_secs.map(Duration::from_secs);
        report_until_stopped(&ingestor, &ct, deadline).await;
        producers_ct.cancel();

        let mut produced = 0;
        for producer in producers {
            produced += producer.await.context(JoinSnafu {})?;
        }

        let drained = ingestor.shutdown().await;
        flusher
            .await
            .context(JoinSnafu {})?
            .context(IngestSnafu {
                operation: "background flush",
            })?;

        println!("Produced {} operations", produced);
        println!("{}", format_stats(&ingestor.stats()));
        for collection in self.collections.iter() {
            println!("  {}: {} documents", collection, sink.count(collection));
        }
        if !drained {
            println!("Some batches were still in flight at shutdown");
        }
        if let Some(error) = ingestor.last_error() {
            println!("Ingestor closed: {}", error);
        }

        Ok(())
    }
}

async fn produce(
    ingestor: BulkIngestor,
    mut generator: OperationGenerator,
    rate: u64,
    ct: CancellationToken,
) -> u64 {
    let mut ticker = (rate > 0).then(|| {
        let mut interval = tokio::time::interval(Duration::from_secs_f64(1.0 / rate as f64));
        interval.set_missed_tick_behavior(MissedTickBehavior::Skip);
        interval
    });
    let mut produced = 0;

    loop {
        if let Some(ticker) = ticker.as_mut() {
            tokio::select! {
                _ = ct.cancelled() => break,
                _ = ticker.tick() => {}
            }
        } else if ct.is_cancelled() {
            break;
        }

        let operation = generator.next_operation();
        match ingestor.add(operation).await {
            Ok(()) => produced += 1,
            Err(IngestError::Closed) => {
                warn!("ingestor is closed, producer stopping");
                break;
            }
            Err(IngestError::ShutDown) => break,
            Err(error) => warn!(error = %error, "failed to add operation"),
        }

        if ticker.is_none() {
            tokio::task::yield_now().await;
        }
    }

    produced
}

async fn report_until_stopped(
    ingestor: &BulkIngestor,
    ct: &CancellationToken,
    deadline: Option<Duration>,
) {
    let stop = async {
        match deadline {
            Some(deadline) => tokio::time::sleep(deadline).await,
            None => std::future::pending().await,
        }
    };
    tokio::pin!(stop);

    let mut report = tokio::time::interval(Duration::from_secs(1));
    report.tick().await;

    loop {
        tokio::select! {
            _ = ct.cancelled() => {
                info!("interrupted, stopping producers");
                break;
            }
            _ = &mut stop => {
                info!("duration elapsed, stopping producers");
                break;
            }
            _ = report.tick() => {
                println!("{}", format_stats(&ingestor.stats()));
            }
        }
    }
}
