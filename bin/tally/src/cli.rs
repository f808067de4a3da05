//! Contains the tally CLI.

use crate::{
    flags::{ConsensusArgs, DatabaseArgs, ExecutionArgs, ScheduleArgs},
    indexer::Indexer,
};
use anyhow::Result;
use clap::Parser;
use tally_cli::{LogArgs, MetricsArgs, cli_styles};

/// Indexes execution-layer blocks and consensus-layer validator absences into PostgreSQL.
#[derive(Parser, Clone, Debug)]
#[command(author, version, about, styles = cli_styles(), long_about = None)]
pub struct Cli {
    /// Logging arguments.
    #[command(flatten)]
    pub log: LogArgs,
    /// Prometheus arguments.
    #[command(flatten)]
    pub metrics: MetricsArgs,
    /// Database arguments.
    #[command(flatten)]
    pub database: DatabaseArgs,
    /// Execution-layer arguments.
    #[command(flatten)]
    pub execution: ExecutionArgs,
    /// Consensus-layer arguments.
    #[command(flatten)]
    pub consensus: ConsensusArgs,
    /// Worker scheduling arguments.
    #[command(flatten)]
    pub schedule: ScheduleArgs,
}

impl Cli {
    /// Runs the indexer until ctrl-c or a fatal worker error.
    pub fn run(self) -> Result<()> {
        self.init_stack()?;
        Self::tokio_runtime()?.block_on(Indexer::new(self).run())
    }

    /// Initializes the tracing stack and the metrics recorder.
    pub fn init_stack(&self) -> Result<()> {
        self.log.init_tracing()?;
        self.metrics.init_metrics()?;
        tally_rpc::Metrics::init();
        tally_ingest::Metrics::init();
        Ok(())
    }

    /// Creates a new default tokio multi-thread [Runtime](tokio::runtime::Runtime) with all
    /// features enabled
    pub fn tokio_runtime() -> Result<tokio::runtime::Runtime, std::io::Error> {
        tokio::runtime::Builder::new_multi_thread().enable_all().build()
    }
}
