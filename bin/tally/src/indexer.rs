//! Wiring of the ingestion workers.

use crate::cli::Cli;
use anyhow::{Result, anyhow, bail};
use std::{sync::Arc, time::Duration};
use tally_ingest::{
    AbsenceWorker, ElPipeline, IngestWorker, RetryWorker, SnapshotWorker, StageProviders,
    WorkerError, WorkerRunner,
};
use tally_rpc::{consensus_client, execution_client};
use tally_storage::PgStore;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

/// The indexer process: one runner per worker on a shared cancellation token.
#[derive(Debug)]
pub struct Indexer {
    cli: Cli,
    cancel: CancellationToken,
}

impl Indexer {
    /// Creates the indexer from parsed flags.
    pub fn new(cli: Cli) -> Self {
        Self { cli, cancel: CancellationToken::new() }
    }

    /// Connects to the store, spawns every worker and waits until they all stopped.
    ///
    /// Ctrl-C cancels the workers; they finish their unit of work in flight and exit. A fatal
    /// worker error cancels the remaining workers and is returned. A worker that reached its
    /// failure threshold stops alone.
    pub async fn run(self) -> Result<()> {
        let Self { cli, cancel } = self;
        let pipeline_config = cli.execution.pipeline_config();
        let max_connections =
            cli.database.max_connections.unwrap_or_else(|| pipeline_config.pool_size());

        let store = Arc::new(PgStore::connect(&cli.database.url, max_connections).await?);
        info!(target: "tally", max_connections, "Connected to database");
        if cli.database.init_schema {
            store.apply_schema().await?;
            info!(target: "tally", "Applied database schema");
        }

        let el_urls = cli.execution.rpc.urls();
        let cl_urls = cli.consensus.rpc.urls();
        let providers = StageProviders {
            headers: execution_client(el_urls)?,
            transactions: execution_client(el_urls)?,
            receipts: execution_client(el_urls)?,
        };
        let schedule = &cli.schedule;
        let threshold = schedule.failure_threshold;

        let mut tasks = JoinSet::new();
        spawn(
            &mut tasks,
            ElPipeline::new(providers, Arc::clone(&store), pipeline_config, cancel.clone()),
            schedule.el(),
            threshold,
            &cancel,
        );
        spawn(
            &mut tasks,
            AbsenceWorker::new(
                consensus_client(cl_urls)?,
                Arc::clone(&store),
                cli.consensus.absence_config(),
                cancel.clone(),
            ),
            schedule.cl(),
            threshold,
            &cancel,
        );
        spawn(
            &mut tasks,
            SnapshotWorker::new(consensus_client(cl_urls)?, Arc::clone(&store), cancel.clone()),
            schedule.snapshot(),
            threshold,
            &cancel,
        );
        spawn(
            &mut tasks,
            RetryWorker::new(
                execution_client(el_urls)?,
                Arc::clone(&store),
                cli.execution.retry_config(),
                cancel.clone(),
            ),
            schedule.retry(),
            threshold,
            &cancel,
        );
        info!(
            target: "tally",
            el_endpoints = el_urls.len(),
            cl_endpoints = cl_urls.len(),
            workers = tasks.len(),
            "Started indexer"
        );

        supervise(tasks, cancel).await
    }
}

fn spawn<W>(
    tasks: &mut JoinSet<Result<(), WorkerError>>,
    worker: W,
    interval: Duration,
    threshold: u32,
    cancel: &CancellationToken,
) where
    W: IngestWorker + 'static,
{
    tasks.spawn(WorkerRunner::new(worker, interval, threshold, cancel.clone()).run());
}

async fn supervise(
    mut tasks: JoinSet<Result<(), WorkerError>>,
    cancel: CancellationToken,
) -> Result<()> {
    let shutdown = tokio::signal::ctrl_c();
    tokio::pin!(shutdown);
    let mut failure = None;

    loop {
        tokio::select! {
            signal = &mut shutdown, if !cancel.is_cancelled() => {
                if let Err(err) = signal {
                    warn!(target: "tally", %err, "Failed to listen for ctrl-c");
                }
                info!(target: "tally", "Received shutdown signal, stopping workers");
                cancel.cancel();
            }
            joined = tasks.join_next() => {
                let Some(joined) = joined else { break };
                match joined {
                    Ok(Ok(())) => {}
                    Ok(Err(err)) if err.is_fatal() => {
                        error!(target: "tally", %err, "Worker failed fatally, shutting down");
                        cancel.cancel();
                        failure.get_or_insert_with(|| anyhow!(err));
                    }
                    Ok(Err(err)) => {
                        warn!(target: "tally", %err, remaining = tasks.len(), "Worker stopped");
                    }
                    Err(err) => {
                        error!(target: "tally", %err, "Worker task aborted, shutting down");
                        cancel.cancel();
                        failure.get_or_insert_with(|| anyhow!(err));
                    }
                }
            }
        }
    }

    if let Some(err) = failure {
        return Err(err);
    }
    if !cancel.is_cancelled() {
        bail!("every worker stopped");
    }
    info!(target: "tally", "Indexer stopped");
    Ok(())
}
