//! The Observe → Decide → Draft → Evaluate → Execute → Log run.
//!
//! A run is driven by [`next_stage`], a pure transition function over the
//! [`RunContext`]. Stage code only fills in the context; once an outcome is
//! set every path leads to `Log`, which writes exactly one activity record.

use agent_core::settings::AgentSettings;
use agent_core::{
    ActivityRecord, ActivityStore, AgentConfig, ConfigUpdate, ContentGenerator, CoreError,
    Decision, Draft, DraftRequest, Evaluation, FeedItem, FeedSource, LlmError, Outcome, Persona,
    PlatformExecutor, QualityEvaluator, Receipt, RunError, RunRequest, RunState, Stage,
};
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tracing::{debug, error, info, info_span, warn, Instrument};
use uuid::Uuid;

use crate::guard;

/// Ports the pipeline drives.
#[derive(Clone)]
pub struct Collaborators {
    pub feed: Arc<dyn FeedSource>,
    pub generator: Arc<dyn ContentGenerator>,
    pub evaluator: Arc<dyn QualityEvaluator>,
    pub executor: Arc<dyn PlatformExecutor>,
    pub store: Arc<dyn ActivityStore>,
}

/// Mutable state of one run. Created after the config snapshot is taken and
/// turned into an [`ActivityRecord`] by the Log stage.
#[derive(Debug, Clone)]
pub struct RunContext {
    pub run_id: String,
    pub started_at: DateTime<Utc>,
    pub request: RunRequest,
    pub config: AgentConfig,
    pub persona: Persona,
    pub feed: Vec<FeedItem>,
    pub decision: Option<Decision>,
    pub decision_reason: Option<String>,
    pub target: Option<FeedItem>,
    pub target_item_id: Option<String>,
    pub draft: Option<Draft>,
    /// The draft came from the operator and skips Draft and Evaluate.
    pub draft_supplied: bool,
    pub evaluation: Option<Evaluation>,
    pub receipt: Option<Receipt>,
    pub outcome: Option<Outcome>,
    pub error: Option<String>,
    pub failed_stage: Option<Stage>,
}

impl RunContext {
    pub fn new(request: RunRequest, config: AgentConfig, persona: Persona) -> Self {
        Self {
            run_id: Uuid::new_v4().to_string(),
            started_at: Utc::now(),
            request,
            config,
            persona,
            feed: Vec::new(),
            decision: None,
            decision_reason: None,
            target: None,
            target_item_id: None,
            draft: None,
            draft_supplied: false,
            evaluation: None,
            receipt: None,
            outcome: None,
            error: None,
            failed_stage: None,
        }
    }

    fn finish(&mut self, outcome: Outcome, error: Option<String>) {
        self.outcome = Some(outcome);
        self.error = error;
    }

    fn fail(&mut self, stage: Stage, error: &CoreError) {
        self.failed_stage = Some(stage);
        self.finish(Outcome::Failed, Some(error.to_string()));
    }

    pub fn to_record(&self, completed_at: DateTime<Utc>) -> ActivityRecord {
        ActivityRecord {
            run_id: self.run_id.clone(),
            started_at: self.started_at,
            completed_at,
            trigger: self.request.trigger,
            trigger_context: self.request.context.clone(),
            decision: self.decision,
            decision_reason: self.decision_reason.clone(),
            target_item_id: self.target_item_id.clone(),
            draft: self.draft.clone(),
            evaluation: self.evaluation.clone(),
            outcome: self.outcome.unwrap_or(Outcome::Failed),
            error: self.error.clone(),
            failed_stage: self.failed_stage,
            receipt: self.receipt.clone(),
            feed_items_seen: self.feed.len(),
        }
    }
}

/// Next stage after `stage` has run against `ctx`.
pub fn next_stage(stage: Stage, ctx: &RunContext) -> Stage {
    match stage {
        Stage::Log | Stage::Done => Stage::Done,
        _ if ctx.outcome.is_some() => Stage::Log,
        Stage::Observe => Stage::Decide,
        Stage::Decide => match ctx.decision {
            Some(Decision::Post | Decision::Comment) if ctx.draft_supplied => Stage::Execute,
            Some(Decision::Post | Decision::Comment) => Stage::Draft,
            Some(Decision::Upvote) => Stage::Execute,
            Some(Decision::Nothing) | None => Stage::Log,
        },
        Stage::Draft if ctx.draft.is_some() => Stage::Evaluate,
        Stage::Draft => Stage::Log,
        Stage::Evaluate => Stage::Execute,
        Stage::Execute => Stage::Log,
    }
}

/// Snapshot returned by [`DecisionPipeline::status`].
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AgentStatus {
    pub last_run_at: Option<DateTime<Utc>>,
    pub last_error: Option<String>,
    pub is_running: bool,
    pub posts_last_24h: u32,
    pub autonomous_mode: bool,
}

impl AgentStatus {
    /// Assemble a status from what `store` holds. `in_flight` reports a run
    /// this process is driving that may not be persisted yet.
    pub async fn load(store: &dyn ActivityStore, in_flight: bool) -> Result<Self, CoreError> {
        let state = store.get_run_state().await?;
        let config = store.get_config().await?;
        let history = store.read_recent(guard::quota_window()).await?;

        Ok(Self {
            last_run_at: state.last_run_at,
            last_error: state.last_error,
            is_running: in_flight || state.is_running,
            posts_last_24h: guard::posts_in_window(&history, Utc::now()),
            autonomous_mode: config.autonomous_mode,
        })
    }
}

/// Resets the in-flight flag when a run ends, however it ends.
struct RunGuard<'a> {
    running: &'a AtomicBool,
    idle: &'a watch::Sender<bool>,
}

impl<'a> RunGuard<'a> {
    fn acquire(running: &'a AtomicBool, idle: &'a watch::Sender<bool>) -> Option<Self> {
        running
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .ok()?;
        idle.send_replace(false);
        Some(Self { running, idle })
    }
}

impl Drop for RunGuard<'_> {
    fn drop(&mut self) {
        self.running.store(false, Ordering::Release);
        self.idle.send_replace(true);
    }
}

pub struct DecisionPipeline {
    collaborators: Collaborators,
    agent: AgentSettings,
    call_timeout: Duration,
    running: AtomicBool,
    idle: watch::Sender<bool>,
}

impl DecisionPipeline {
    pub fn new(collaborators: Collaborators, agent: AgentSettings) -> Self {
        let call_timeout = agent.call_timeout();
        let (idle, _) = watch::channel(true);
        Self {
            collaborators,
            agent,
            call_timeout,
            running: AtomicBool::new(false),
            idle,
        }
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::Acquire)
    }

    /// Resolves once no run is in flight.
    pub async fn wait_idle(&self) {
        let mut idle = self.idle.subscribe();
        // The sender lives as long as `self`, so this cannot fail.
        let _ = idle.wait_for(|idle| *idle).await;
    }

    pub async fn run(&self, request: RunRequest) -> Result<ActivityRecord, RunError> {
        let config = self
            .bounded(self.collaborators.store.get_config())
            .await
            .map_err(RunError::Store)?;

        if request.trigger.requires_autonomous_mode() && !config.autonomous_mode {
            info!("Autonomous mode is disabled, skipping {} run", request.trigger);
            return Err(RunError::AutonomousModeDisabled);
        }

        let Some(_guard) = RunGuard::acquire(&self.running, &self.idle) else {
            warn!("Rejected {} run: another run is in flight", request.trigger);
            return Err(RunError::Busy);
        };
        // Other processes share the store, so the persisted flag decides.
        let claimed = self
            .bounded(self.collaborators.store.try_begin_run())
            .await
            .map_err(RunError::Store)?;
        if !claimed {
            warn!(
                "Rejected {} run: the activity store has a run in progress",
                request.trigger
            );
            return Err(RunError::Busy);
        }

        let persona = self.agent.persona(&config);
        let ctx = RunContext::new(request, config, persona);
        let span = info_span!("run", run_id = %ctx.run_id, trigger = %ctx.request.trigger);
        self.drive(ctx).instrument(span).await
    }

    async fn drive(&self, mut ctx: RunContext) -> Result<ActivityRecord, RunError> {
        info!("Run started");
        let mut stage = Stage::Observe;
        while stage != Stage::Log {
            debug!("Entering {} stage", stage);
            if let Err(e) = self.run_stage(stage, &mut ctx).await {
                error!("{} stage failed: {}", stage, e);
                ctx.fail(stage, &e);
            }
            stage = next_stage(stage, &ctx);
        }

        if ctx.outcome.is_none() {
            // Every path that reaches Log without an outcome is a skip.
            ctx.finish(Outcome::Skipped, None);
        }
        let record = ctx.to_record(Utc::now());
        self.log(&record).await?;

        match (record.outcome, record.failed_stage) {
            (Outcome::Failed, Some(stage)) => Err(RunError::Fault {
                run_id: record.run_id.clone(),
                stage,
                message: record.error.clone().unwrap_or_default(),
                record: Box::new(record),
            }),
            _ => Ok(record),
        }
    }

    async fn log(&self, record: &ActivityRecord) -> Result<(), RunError> {
        let appended = self.bounded(self.collaborators.store.append(record)).await;

        let last_error = match (&appended, record.outcome) {
            (Err(e), _) => Some(e.to_string()),
            (Ok(()), Outcome::Failed) => record.error.clone(),
            (Ok(()), _) => None,
        };
        let state = RunState {
            last_run_at: Some(record.completed_at),
            last_error,
            is_running: false,
        };
        let stored = self
            .bounded(self.collaborators.store.set_run_state(&state))
            .await;

        match (appended, stored) {
            (Err(e), _) => {
                error!("Failed to record run {}: {}", record.run_id, e);
                Err(RunError::Store(e))
            }
            (Ok(()), Err(e)) => {
                error!("Failed to update run state after run {}: {}", record.run_id, e);
                Err(RunError::Store(e))
            }
            (Ok(()), Ok(())) => {
                info!(
                    "Run finished: decision={} outcome={}",
                    record.decision.map(|d| d.as_str()).unwrap_or("-"),
                    record.outcome
                );
                Ok(())
            }
        }
    }

    async fn run_stage(&self, stage: Stage, ctx: &mut RunContext) -> Result<(), CoreError> {
        match stage {
            Stage::Observe => self.observe(ctx).await,
            Stage::Decide => self.decide(ctx).await,
            Stage::Draft => self.draft(ctx).await,
            Stage::Evaluate => self.evaluate(ctx).await,
            Stage::Execute => self.execute(ctx).await,
            Stage::Log | Stage::Done => Ok(()),
        }
    }

    async fn observe(&self, ctx: &mut RunContext) -> Result<(), CoreError> {
        ctx.feed = self.bounded(self.collaborators.feed.fetch_feed()).await?;
        info!("Observed {} feed items", ctx.feed.len());
        Ok(())
    }

    async fn decide(&self, ctx: &mut RunContext) -> Result<(), CoreError> {
        if let Some(action) = ctx.request.action.clone() {
            let decision = action.decision();
            ctx.decision = Some(decision);
            ctx.decision_reason = Some(format!("direct {} requested by operator", decision));
            ctx.target_item_id = action.target_item_id().map(str::to_string);
            ctx.target = ctx
                .target_item_id
                .as_deref()
                .and_then(|id| ctx.feed.iter().find(|item| item.id == id).cloned());

            if let Some(draft) = action.supplied_draft() {
                ctx.draft = Some(draft);
                ctx.draft_supplied = true;
            } else if decision == Decision::Comment && ctx.target.is_none() {
                return Err(CoreError::NotFound {
                    resource: format!(
                        "post {} in the observed feed",
                        ctx.target_item_id.as_deref().unwrap_or_default()
                    ),
                });
            }
            info!("Using operator-chosen action {}", decision);
            return Ok(());
        }

        let proposal = self
            .bounded(self.collaborators.generator.decide(
                &ctx.feed,
                &ctx.persona,
                ctx.request.context.as_deref(),
            ))
            .await?;

        let decision = proposal.decision;
        ctx.decision = Some(decision);
        ctx.decision_reason = Some(proposal.reason);

        if decision.needs_target() {
            let id = proposal.target_item_id.ok_or_else(|| LlmError::InvalidDecision {
                reason: format!("{} decision without a target post", decision),
            })?;
            let target = ctx
                .feed
                .iter()
                .find(|item| item.id == id)
                .cloned()
                .ok_or_else(|| LlmError::InvalidDecision {
                    reason: format!("target post {} is not in the observed feed", id),
                })?;
            ctx.target_item_id = Some(id);
            ctx.target = Some(target);
        }

        info!("Decided {} ({:?})", decision, ctx.target_item_id);
        if decision == Decision::Nothing {
            ctx.finish(Outcome::Skipped, None);
        }
        Ok(())
    }

    async fn draft(&self, ctx: &mut RunContext) -> Result<(), CoreError> {
        let decision = ctx.decision.ok_or_else(|| CoreError::Internal {
            message: "draft stage reached without a decision".to_string(),
        })?;
        let request = DraftRequest {
            decision,
            target: ctx.target.clone(),
            context: ctx.request.context.clone(),
            reason: ctx.decision_reason.clone(),
        };

        let draft = self
            .bounded(self.collaborators.generator.draft(&request, &ctx.persona))
            .await?;
        debug!("Drafted {} chars", draft.content.len());
        ctx.draft = Some(draft);
        Ok(())
    }

    async fn evaluate(&self, ctx: &mut RunContext) -> Result<(), CoreError> {
        let draft = ctx.draft.as_ref().ok_or_else(|| CoreError::Internal {
            message: "evaluate stage reached without a draft".to_string(),
        })?;

        let evaluation = self
            .bounded(self.collaborators.evaluator.evaluate(draft, &ctx.persona))
            .await?;
        if !evaluation.accepted {
            warn!("Draft rejected: {}", evaluation.reason);
            ctx.finish(Outcome::Rejected, Some(evaluation.reason.clone()));
        }
        ctx.evaluation = Some(evaluation);
        Ok(())
    }

    async fn execute(&self, ctx: &mut RunContext) -> Result<(), CoreError> {
        let decision = ctx.decision.ok_or_else(|| CoreError::Internal {
            message: "execute stage reached without a decision".to_string(),
        })?;

        let history = self
            .bounded(
                self.collaborators
                    .store
                    .read_recent(guard::history_window(&ctx.config)),
            )
            .await?;
        if let Err(block) = guard::check(decision, Utc::now(), &history, &ctx.config) {
            warn!("Skipping {}: {}", decision, block);
            ctx.finish(Outcome::Skipped, Some(block.reason().to_string()));
            return Ok(());
        }

        let executor = &self.collaborators.executor;
        let receipt = match decision {
            Decision::Post => {
                let draft = Self::require(ctx.draft.as_ref(), "draft")?;
                self.bounded(executor.post(draft)).await?
            }
            Decision::Comment => {
                let draft = Self::require(ctx.draft.as_ref(), "draft")?;
                let target = Self::require(ctx.target_item_id.as_deref(), "target")?;
                self.bounded(executor.comment(target, &draft.content)).await?
            }
            Decision::Upvote => {
                let target = Self::require(ctx.target_item_id.as_deref(), "target")?;
                self.bounded(executor.upvote(target)).await?
            }
            Decision::Nothing => {
                ctx.finish(Outcome::Skipped, None);
                return Ok(());
            }
        };

        info!("Executed {} (receipt {:?})", decision, receipt.id);
        ctx.receipt = Some(receipt);
        ctx.finish(Outcome::Success, None);
        Ok(())
    }

    fn require<'a, T: ?Sized>(value: Option<&'a T>, what: &str) -> Result<&'a T, CoreError> {
        value.ok_or_else(|| CoreError::Internal {
            message: format!("execute stage reached without a {}", what),
        })
    }

    async fn bounded<T, F>(&self, call: F) -> Result<T, CoreError>
    where
        F: Future<Output = Result<T, CoreError>>,
    {
        match tokio::time::timeout(self.call_timeout, call).await {
            Ok(result) => result,
            Err(_) => Err(CoreError::Timeout {
                seconds: self.call_timeout.as_secs(),
            }),
        }
    }

    pub async fn status(&self) -> Result<AgentStatus, CoreError> {
        self.bounded(AgentStatus::load(
            self.collaborators.store.as_ref(),
            self.is_running(),
        ))
        .await
    }

    pub async fn current_config(&self) -> Result<AgentConfig, CoreError> {
        self.bounded(self.collaborators.store.get_config()).await
    }

    /// Applies to the next run; an in-flight run keeps its snapshot.
    pub async fn update_config(&self, update: &ConfigUpdate) -> Result<AgentConfig, CoreError> {
        let config = self
            .bounded(self.collaborators.store.set_config(update))
            .await?;
        info!("Configuration updated: {:?}", update);
        Ok(config)
    }

    pub async fn activity(&self, limit: usize) -> Result<Vec<ActivityRecord>, CoreError> {
        self.bounded(self.collaborators.store.list_activity(limit)).await
    }
}
