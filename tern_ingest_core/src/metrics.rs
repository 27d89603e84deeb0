use tern_observability::{Counter, Histogram};

pub struct IngestionMetrics {
    pub batches: Counter<u64>,
    pub operations: Counter<u64>,
    pub bytes: Counter<u64>,
    pub failed_operations: Counter<u64>,
    pub fatal_batches: Counter<u64>,
    pub batch_duration: Histogram<f64>,
    pub admission_wait: Histogram<f64>,
}

impl Default for IngestionMetrics {
    fn default() -> Self {
        let meter = tern_observability::meter("ingestion");
        Self {
            batches: meter
                .u64_counter("ingest.batches")
                .with_unit("{batch}")
                .with_description("number of batches sent to the sink")
                .build(),
            operations: meter
                .u64_counter("ingest.operations")
                .with_unit("{operation}")
                .with_description("number of operations sent to the sink")
                .build(),
            bytes: meter
                .u64_counter("ingest.bytes")
                .with_unit("By")
                .with_description("estimated bytes sent to the sink")
                .build(),
            failed_operations: meter
                .u64_counter("ingest.failed_operations")
                .with_unit("{operation}")
                .with_description("number of operations rejected by the sink or dropped before it")
                .build(),
            fatal_batches: meter
                .u64_counter("ingest.fatal_batches")
                .with_unit("{batch}")
                .with_description("number of batches the sink could not execute")
                .build(),
            batch_duration: meter
                .f64_histogram("ingest.batch.duration")
                .with_unit("ms")
                .with_description("time the sink took to execute a batch")
                .build(),
            admission_wait: meter
                .f64_histogram("ingest.batch.admission_wait")
                .with_unit("ms")
                .with_description("time between cutting a batch and admitting it")
                .build(),
        }
    }
}
