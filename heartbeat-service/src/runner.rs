use agent_core::{ActivityRecord, ErrorReporter, RunError, RunRequest};
use std::sync::Arc;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::pipeline::DecisionPipeline;

/// What happened to an asynchronous trigger.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AsyncTrigger {
    /// Nothing was in flight; the run starts right away.
    Started,
    /// Waiting behind the in-flight run.
    Queued,
    /// Took the place of an earlier queued request, which is dropped.
    Replaced,
}

#[derive(Default)]
struct Queue {
    pending: Option<RunRequest>,
    worker_active: bool,
    worker: Option<JoinHandle<()>>,
}

/// Front door for manual triggers.
///
/// Synchronous triggers run inline and fail with [`RunError::Busy`] while
/// another run is in flight. Asynchronous triggers go through a single queue
/// slot drained by one background worker; a newer request replaces an older
/// one that has not started yet.
pub struct AgentRunner {
    pipeline: Arc<DecisionPipeline>,
    queue: Arc<Mutex<Queue>>,
    reporter: ErrorReporter,
}

impl AgentRunner {
    pub fn new(pipeline: Arc<DecisionPipeline>) -> Self {
        Self {
            pipeline,
            queue: Arc::new(Mutex::new(Queue::default())),
            reporter: ErrorReporter::new("runner"),
        }
    }

    pub fn pipeline(&self) -> &Arc<DecisionPipeline> {
        &self.pipeline
    }

    pub async fn trigger_sync(&self, request: RunRequest) -> Result<ActivityRecord, RunError> {
        self.pipeline.run(request).await
    }

    pub async fn trigger_async(&self, request: RunRequest) -> AsyncTrigger {
        let mut queue = self.queue.lock().await;
        let busy = self.pipeline.is_running() || queue.worker_active;
        let replaced = queue.pending.replace(request).is_some();

        if !queue.worker_active {
            queue.worker_active = true;
            queue.worker = Some(tokio::spawn(drain(
                self.pipeline.clone(),
                self.queue.clone(),
                self.reporter,
            )));
        }

        let outcome = match (replaced, busy) {
            (true, _) => AsyncTrigger::Replaced,
            (false, true) => AsyncTrigger::Queued,
            (false, false) => AsyncTrigger::Started,
        };
        debug!("Asynchronous trigger {:?}", outcome);
        outcome
    }

    /// Wait until every accepted asynchronous request has run.
    pub async fn settle(&self) {
        let worker = self.queue.lock().await.worker.take();
        if let Some(worker) = worker {
            let _ = worker.await;
        }
    }
}

async fn drain(pipeline: Arc<DecisionPipeline>, queue: Arc<Mutex<Queue>>, reporter: ErrorReporter) {
    loop {
        pipeline.wait_idle().await;

        let request = {
            let mut queue = queue.lock().await;
            match queue.pending.take() {
                Some(request) => request,
                None => {
                    queue.worker_active = false;
                    return;
                }
            }
        };

        match pipeline.run(request.clone()).await {
            Ok(record) => info!(
                "Queued {} run finished with {}",
                record.trigger, record.outcome
            ),
            Err(RunError::Busy) if pipeline.is_running() => {
                // Lost the race to another trigger. Requeue unless a newer
                // request arrived meanwhile.
                let mut queue = queue.lock().await;
                if queue.pending.is_none() {
                    queue.pending = Some(request);
                }
            }
            Err(RunError::Busy) => {
                // Held by another process; this one has nothing to wait on.
                warn!(
                    "Dropped queued {} run: the activity store has a run in progress",
                    request.trigger
                );
            }
            Err(e) => reporter.report_run_error(&e),
        }
    }
}
