use agent_core::{ErrorReporter, RunError, RunRequest};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{watch, Mutex};
use tokio::task::JoinHandle;
use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tracing::{debug, info};

use crate::pipeline::DecisionPipeline;

/// Periodic heartbeat that fires scheduled runs.
///
/// Ticks that land while a run is in flight are dropped. Stopping cancels
/// future ticks but lets an in-flight run reach its Log stage.
pub struct Scheduler {
    pipeline: Arc<DecisionPipeline>,
    reporter: ErrorReporter,
    run_on_start: bool,
    shutdown: watch::Sender<bool>,
    task: Mutex<Option<JoinHandle<()>>>,
}

impl Scheduler {
    pub fn new(pipeline: Arc<DecisionPipeline>, run_on_start: bool) -> Self {
        let (shutdown, _) = watch::channel(false);
        Self {
            pipeline,
            reporter: ErrorReporter::new("scheduler"),
            run_on_start,
            shutdown,
            task: Mutex::new(None),
        }
    }

    pub async fn is_started(&self) -> bool {
        self.task
            .lock()
            .await
            .as_ref()
            .map(|task| !task.is_finished())
            .unwrap_or(false)
    }

    /// Start ticking every `interval`. Restarting replaces the previous timer.
    pub async fn start(&self, interval: Duration) {
        self.stop().await;
        self.shutdown.send_replace(false);

        let first_tick = if self.run_on_start {
            Instant::now()
        } else {
            Instant::now() + interval
        };
        let pipeline = self.pipeline.clone();
        let reporter = self.reporter;
        let mut shutdown = self.shutdown.subscribe();

        info!(
            "Starting heartbeat every {}s (run on start: {})",
            interval.as_secs(),
            self.run_on_start
        );
        let task = tokio::spawn(async move {
            let mut ticker = interval_at(first_tick, interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

            loop {
                tokio::select! {
                    biased;
                    _ = stop_requested(&mut shutdown) => break,
                    _ = ticker.tick() => tick(&pipeline, reporter).await,
                }
            }
            debug!("Heartbeat loop exited");
        });

        *self.task.lock().await = Some(task);
    }

    /// Stop future ticks and wait for an in-flight scheduled run to finish.
    pub async fn stop(&self) {
        self.shutdown.send_replace(true);
        let task = self.task.lock().await.take();
        if let Some(task) = task {
            let _ = task.await;
            info!("Heartbeat stopped");
        }
    }
}

/// Resolves once `stop` has been called. The borrowed value is dropped
/// here so the loop future stays `Send`.
async fn stop_requested(shutdown: &mut watch::Receiver<bool>) {
    let _ = shutdown.wait_for(|stopped| *stopped).await;
}

async fn tick(pipeline: &DecisionPipeline, reporter: ErrorReporter) {
    if pipeline.is_running() {
        debug!("Heartbeat tick skipped: a run is in flight");
        return;
    }

    match pipeline.run(RunRequest::scheduled()).await {
        Ok(record) => info!(
            "Heartbeat run {} finished: decision={} outcome={}",
            record.run_id,
            record.decision.map(|d| d.as_str()).unwrap_or("-"),
            record.outcome
        ),
        Err(RunError::AutonomousModeDisabled) => {
            debug!("Heartbeat tick skipped: autonomous mode is disabled")
        }
        Err(e) => reporter.report_run_error(&e),
    }
}
