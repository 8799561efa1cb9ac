//! Global ingestion queue.
//!
//! One worker task drains a bounded channel of [`IngestJob`]s, so at most one
//! ingestion run executes at a time across all projects. Each job carries its
//! own log sink and completion channel. Dropping either receiver on the
//! [`IngestHandle`] only stops delivery; the job itself runs to the end.

use anyhow::{anyhow, Result};
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;

use crate::app::App;
use crate::ingest::{run_ingestion, IngestReport};
use crate::progress::{ChannelLogger, IngestLogger};

/// Jobs waiting behind the running one before `submit` starts to wait.
pub const DEFAULT_QUEUE_DEPTH: usize = 32;

pub struct IngestJob {
    pub project_id: i64,
    pub source: String,
    logger: ChannelLogger,
    done: oneshot::Sender<Result<IngestReport>>,
}

/// Observer side of a submitted job.
pub struct IngestHandle {
    pub logs: mpsc::UnboundedReceiver<String>,
    pub done: oneshot::Receiver<Result<IngestReport>>,
}

impl IngestHandle {
    /// Wait for the job result, discarding log lines.
    pub async fn wait(self) -> Result<IngestReport> {
        drop(self.logs);
        self.done
            .await
            .map_err(|_| anyhow!("ingestion worker stopped before the job finished"))?
    }
}

#[derive(Clone)]
pub struct IngestQueue {
    tx: mpsc::Sender<IngestJob>,
}

impl IngestQueue {
    /// Start the worker. It exits once every queue handle is dropped and the
    /// backlog is drained.
    pub fn spawn(app: App, depth: usize) -> (Self, JoinHandle<()>) {
        let (tx, mut rx) = mpsc::channel::<IngestJob>(depth.max(1));

        let worker = tokio::spawn(async move {
            while let Some(job) = rx.recv().await {
                tracing::debug!(project_id = job.project_id, source = %job.source, "ingestion job started");
                let result = run_ingestion(&app, job.project_id, &job.source, &job.logger).await;
                if let Err(e) = &result {
                    tracing::error!(project_id = job.project_id, error = %e, "ingestion job failed");
                    job.logger.log(&format!("error: {:#}", e));
                }
                // The submitter may have stopped listening.
                let _ = job.done.send(result);
            }
            tracing::debug!("ingestion queue closed");
        });

        (Self { tx }, worker)
    }

    pub async fn submit(&self, project_id: i64, source: impl Into<String>) -> Result<IngestHandle> {
        let (logger, logs) = ChannelLogger::channel();
        let (done_tx, done) = oneshot::channel();
        let job = IngestJob {
            project_id,
            source: source.into(),
            logger,
            done: done_tx,
        };
        self.tx
            .send(job)
            .await
            .map_err(|_| anyhow!("ingestion queue is closed"))?;
        Ok(IngestHandle { logs, done })
    }
}
