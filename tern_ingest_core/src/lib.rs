pub mod accumulator;
pub mod batch;
pub mod cutter;
pub mod dispatcher;
pub mod error;
pub mod gate;
pub mod ingestor;
pub mod listener;
pub mod memory;
pub mod metrics;
pub mod operation;
pub mod options;
pub mod outcome;
pub mod sink;
pub mod state;

pub use batch::{Batch, BatchId, BatchIdGenerator, SequentialBatchIdGenerator};
pub use error::{IngestError, Result};
pub use ingestor::{BulkIngestor, IngestorStats, run_background_flusher};
pub use listener::{IngestListener, LoggingListener, NoopListener};
pub use memory::InMemorySink;
pub use operation::{OPERATION_OVERHEAD_BYTES, PendingOperation};
pub use options::IngestorOptions;
pub use outcome::{BatchOutcome, FailureRecord};
pub use sink::{BulkResponse, BulkSink, ItemOutcome, ShardId, SinkError};
pub use state::EngineCounters;
