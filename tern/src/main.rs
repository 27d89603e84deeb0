use clap::{Parser, Subcommand};
use snafu::ResultExt;
use tokio_util::sync::CancellationToken;

use crate::{
    error::{ObservabilitySnafu, Result},
    stress::StressArgs,
};

mod error;
mod generators;
mod helpers;
mod stress;

#[derive(Parser)]
#[command(name = "tern")]
#[command(about = "Tern bulk ingest CLI")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Drive the ingest engine with synthetic documents against an in-memory store
    Stress {
        #[clap(flatten)]
        inner: StressArgs,
    },
}

#[tokio::main]
#[snafu::report]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    tern_observability::init_observability(env!("CARGO_PKG_NAME"), env!("CARGO_PKG_VERSION"))
        .context(ObservabilitySnafu {})?;

    let ct = CancellationToken::new();

    tokio::spawn({
        let ct = ct.clone();
        async move {
            let _ = tokio::signal::ctrl_c().await;
            ct.cancel();
        }
    });

    match cli.command {
        Commands::Stress { inner } => inner.run(ct).await,
    }
}
