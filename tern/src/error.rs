use snafu::Snafu;
use tern_ingest_core::IngestError;
use tern_observability::ObservabilityError;

use crate::helpers::RangeParserError;

/// CLI error types.
#[derive(Debug, Snafu)]
#[snafu(visibility(pub))]
pub enum CliError {
    #[snafu(display("Invalid range format"))]
    InvalidRange { source: RangeParserError },
    #[snafu(display("Invalid argument: {message}"))]
    InvalidArgument { message: String },
    #[snafu(display("Failed to initialize observability"))]
    Observability { source: ObservabilityError },
    #[snafu(display("Failed ingest operation {operation}"))]
    Ingest {
        operation: &'static str,
        source: IngestError,
    },
    #[snafu(display("Background task failed"))]
    Join { source: tokio::task::JoinError },
}

pub type Result<T, E = CliError> = std::result::Result<T, E>;
