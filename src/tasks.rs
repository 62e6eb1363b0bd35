use crate::config::ReconcilerConfig;
use crate::db_types::TranscriptMessage;
use crate::error::CallError;
use crate::provider::VoiceProvider;
use crate::store::CallStore;

use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc::{self, error::TrySendError};
use tokio::sync::Semaphore;
use tracing::{debug, error, info, info_span, warn, Instrument, Span};
use uuid::Uuid;

/// Fetch-and-store work for one completed call.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TranscriptJob {
    pub call_id: Uuid,
    pub vendor_session_id: String,
}

#[derive(Debug, PartialEq, Eq)]
enum ReconcileOutcome {
    Stored(u64),
    Failed,
    TimedOut,
}

struct Worker {
    provider: Arc<dyn VoiceProvider>,
    store: Arc<dyn CallStore>,
    fetch_timeout: Duration,
    span: Span,
}

impl Worker {
    async fn run(&self, job: TranscriptJob) -> ReconcileOutcome {
        let span = info_span!(
            parent: &self.span,
            "transcript_job",
            call_id = %job.call_id,
            vendor_session_id = %job.vendor_session_id
        );
        async {
            match tokio::time::timeout(self.fetch_timeout, self.reconcile(&job)).await {
                Ok(Ok(stored)) => {
                    info!(stored, "transcript reconciled");
                    ReconcileOutcome::Stored(stored)
                }
                Ok(Err(e)) => {
                    error!(error=%e, "failed to reconcile transcript");
                    ReconcileOutcome::Failed
                }
                Err(_) => {
                    error!(
                        timeout_ms = self.fetch_timeout.as_millis() as u64,
                        "transcript fetch timed out"
                    );
                    ReconcileOutcome::TimedOut
                }
            }
        }
        .instrument(span)
        .await
    }

    async fn reconcile(&self, job: &TranscriptJob) -> Result<u64, CallError> {
        let messages = self.provider.get_transcript(&job.vendor_session_id).await?;
        if messages.is_empty() {
            debug!("provider returned an empty transcript");
            return Ok(0);
        }
        let rows: Vec<TranscriptMessage> = messages
            .into_iter()
            .enumerate()
            .map(|(seq, m)| TranscriptMessage {
                call_id: job.call_id,
                seq: seq as i32,
                role: m.role,
                text: m.text,
                timestamp: m.timestamp,
            })
            .collect();
        Ok(self.store.create_transcripts_batch(&rows).await?)
    }
}

/// Background transcript retrieval.  Jobs run outside the request that scheduled them, each
/// under its own timeout; failures are logged and dropped.
#[derive(Clone)]
pub struct TranscriptReconciler {
    worker: Arc<Worker>,
    /// `None` in inline mode
    queue: Option<mpsc::Sender<TranscriptJob>>,
}

impl TranscriptReconciler {
    /// Start the dispatcher; at most `config.workers` jobs run at once and up to
    /// `config.queue_depth` wait.
    pub fn spawn(
        provider: Arc<dyn VoiceProvider>,
        store: Arc<dyn CallStore>,
        config: &ReconcilerConfig,
    ) -> Self {
        let worker = Arc::new(Worker {
            provider,
            store,
            fetch_timeout: config.fetch_timeout,
            span: info_span!("transcript_reconciler"),
        });
        let (queue, jobs) = mpsc::channel(config.queue_depth);
        let dispatcher = dispatch(jobs, worker.clone(), Arc::new(Semaphore::new(config.workers)));
        tokio::spawn(dispatcher.instrument(worker.span.clone()));
        info!(
            workers = config.workers,
            queue_depth = config.queue_depth,
            "transcript reconciler started"
        );
        Self {
            worker,
            queue: Some(queue),
        }
    }

    /// Runs every job to completion inside `schedule`.
    #[cfg(test)]
    pub fn inline(
        provider: Arc<dyn VoiceProvider>,
        store: Arc<dyn CallStore>,
        fetch_timeout: Duration,
    ) -> Self {
        Self {
            worker: Arc::new(Worker {
                provider,
                store,
                fetch_timeout,
                span: info_span!("transcript_reconciler", mode = "inline"),
            }),
            queue: None,
        }
    }

    pub async fn schedule(&self, job: TranscriptJob) {
        let Some(queue) = &self.queue else {
            self.worker.run(job).await;
            return;
        };
        match queue.try_send(job) {
            Ok(()) => debug!("transcript job queued"),
            Err(TrySendError::Full(job)) => {
                warn!(call_id=%job.call_id, "transcript queue full; dropping job")
            }
            Err(TrySendError::Closed(job)) => {
                error!(call_id=%job.call_id, "transcript dispatcher is gone; dropping job")
            }
        }
    }
}

async fn dispatch(
    mut jobs: mpsc::Receiver<TranscriptJob>,
    worker: Arc<Worker>,
    permits: Arc<Semaphore>,
) {
    while let Some(job) = jobs.recv().await {
        let Ok(permit) = permits.clone().acquire_owned().await else {
            break;
        };
        let worker = worker.clone();
        tokio::spawn(async move {
            worker.run(job).await;
            drop(permit);
        });
    }
    debug!("transcript dispatcher stopped");
}
