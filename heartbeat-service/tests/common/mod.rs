#![allow(dead_code)]

use agent_core::settings::AgentSettings;
use agent_core::{
    ActivityRecord, ActivityStore, AgentConfig, ContentGenerator, CoreError, Decision,
    DecisionProposal, Draft, DraftRequest, Evaluation, FeedItem, FeedSource, Outcome, Persona,
    PlatformError, PlatformExecutor, QualityEvaluator, Receipt, TriggerKind,
};
use async_trait::async_trait;
use chrono::{Duration as ChronoDuration, Utc};
use database::MemoryStore;
use heartbeat_service::{Collaborators, DecisionPipeline};
use serde_json::json;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::Notify;

pub fn item(id: &str, title: &str) -> FeedItem {
    FeedItem {
        id: id.to_string(),
        author: "molty".to_string(),
        title: title.to_string(),
        text: format!("{} body", title),
        submolt: "general".to_string(),
        timestamp: Some(Utc::now()),
        upvotes: 5,
        comment_count: 2,
    }
}

pub fn default_feed() -> Vec<FeedItem> {
    vec![
        item("p1", "Shipping an agent scheduler"),
        item("p2", "Hello from a new molty"),
    ]
}

/// A finished run `minutes_ago`, for seeding guard history.
pub fn past_run(decision: Decision, outcome: Outcome, minutes_ago: i64) -> ActivityRecord {
    let completed_at = Utc::now() - ChronoDuration::minutes(minutes_ago);
    ActivityRecord {
        run_id: uuid::Uuid::new_v4().to_string(),
        started_at: completed_at - ChronoDuration::seconds(30),
        completed_at,
        trigger: TriggerKind::Scheduled,
        trigger_context: None,
        decision: Some(decision),
        decision_reason: None,
        target_item_id: None,
        draft: None,
        evaluation: None,
        outcome,
        error: None,
        failed_stage: None,
        receipt: None,
        feed_items_seen: 2,
    }
}

/// Pauses the first fetch until released, so tests can act mid-run.
#[derive(Default)]
pub struct Gate {
    pub entered: Notify,
    pub release: Notify,
}

#[derive(Default)]
pub struct FakeFeed {
    pub items: Mutex<Vec<FeedItem>>,
    pub fail: Mutex<Option<PlatformError>>,
    pub delay: Mutex<Option<Duration>>,
    pub gate: Mutex<Option<Arc<Gate>>>,
    pub calls: AtomicUsize,
}

impl FakeFeed {
    pub fn with_items(items: Vec<FeedItem>) -> Self {
        Self {
            items: Mutex::new(items),
            ..Self::default()
        }
    }

    /// Block the next fetch on a fresh gate.
    pub fn hold(&self) -> Arc<Gate> {
        let gate = Arc::new(Gate::default());
        *self.gate.lock().unwrap() = Some(gate.clone());
        gate
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl FeedSource for FakeFeed {
    async fn fetch_feed(&self) -> Result<Vec<FeedItem>, CoreError> {
        self.calls.fetch_add(1, Ordering::SeqCst);

        let gate = self.gate.lock().unwrap().take();
        if let Some(gate) = gate {
            gate.entered.notify_one();
            gate.release.notified().await;
        }
        let delay = *self.delay.lock().unwrap();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }

        if let Some(error) = self.fail.lock().unwrap().clone() {
            return Err(error.into());
        }
        Ok(self.items.lock().unwrap().clone())
    }
}

pub struct FakeGenerator {
    pub proposal: Mutex<DecisionProposal>,
    pub draft: Mutex<Draft>,
    pub fail_decide: Mutex<bool>,
    pub decide_calls: AtomicUsize,
    pub draft_calls: AtomicUsize,
    pub last_persona: Mutex<Option<Persona>>,
    pub last_context: Mutex<Option<String>>,
}

impl FakeGenerator {
    pub fn proposing(decision: Decision, target: Option<&str>) -> Self {
        Self {
            proposal: Mutex::new(DecisionProposal {
                decision,
                target_item_id: target.map(str::to_string),
                reason: format!("{} looks right", decision),
            }),
            draft: Mutex::new(Draft::comment("Great point about run serialization.")),
            fail_decide: Mutex::new(false),
            decide_calls: AtomicUsize::new(0),
            draft_calls: AtomicUsize::new(0),
            last_persona: Mutex::new(None),
            last_context: Mutex::new(None),
        }
    }

    pub fn set_proposal(&self, decision: Decision, target: Option<&str>) {
        *self.proposal.lock().unwrap() = DecisionProposal {
            decision,
            target_item_id: target.map(str::to_string),
            reason: format!("{} looks right", decision),
        };
    }

    pub fn set_draft(&self, draft: Draft) {
        *self.draft.lock().unwrap() = draft;
    }

    pub fn decide_calls(&self) -> usize {
        self.decide_calls.load(Ordering::SeqCst)
    }

    pub fn draft_calls(&self) -> usize {
        self.draft_calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ContentGenerator for FakeGenerator {
    async fn decide(
        &self,
        _feed: &[FeedItem],
        persona: &Persona,
        context: Option<&str>,
    ) -> Result<DecisionProposal, CoreError> {
        self.decide_calls.fetch_add(1, Ordering::SeqCst);
        *self.last_persona.lock().unwrap() = Some(persona.clone());
        *self.last_context.lock().unwrap() = context.map(str::to_string);
        if *self.fail_decide.lock().unwrap() {
            return Err(agent_core::LlmError::ServiceUnavailable {
                provider: "fake".to_string(),
            }
            .into());
        }
        Ok(self.proposal.lock().unwrap().clone())
    }

    async fn draft(&self, _request: &DraftRequest, _persona: &Persona) -> Result<Draft, CoreError> {
        self.draft_calls.fetch_add(1, Ordering::SeqCst);
        Ok(self.draft.lock().unwrap().clone())
    }
}

pub struct FakeEvaluator {
    pub verdict: Mutex<Evaluation>,
    pub calls: AtomicUsize,
}

impl FakeEvaluator {
    pub fn accepting() -> Self {
        Self {
            verdict: Mutex::new(Evaluation {
                accepted: true,
                reason: "approved".to_string(),
                score: Some(0.9),
            }),
            calls: AtomicUsize::new(0),
        }
    }

    pub fn reject(&self, reason: &str) {
        *self.verdict.lock().unwrap() = Evaluation {
            accepted: false,
            reason: reason.to_string(),
            score: Some(0.2),
        };
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl QualityEvaluator for FakeEvaluator {
    async fn evaluate(&self, _draft: &Draft, _persona: &Persona) -> Result<Evaluation, CoreError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(self.verdict.lock().unwrap().clone())
    }
}

#[derive(Default)]
pub struct FakeExecutor {
    pub calls: Mutex<Vec<String>>,
    pub fail: Mutex<Option<PlatformError>>,
}

impl FakeExecutor {
    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }

    fn record(&self, call: String) -> Result<Receipt, CoreError> {
        self.calls.lock().unwrap().push(call);
        if let Some(error) = self.fail.lock().unwrap().clone() {
            return Err(error.into());
        }
        let id = format!("receipt-{}", self.calls.lock().unwrap().len());
        Ok(Receipt {
            id: Some(id.clone()),
            raw: json!({"success": true, "id": id}),
        })
    }
}

#[async_trait]
impl PlatformExecutor for FakeExecutor {
    async fn post(&self, draft: &Draft) -> Result<Receipt, CoreError> {
        self.record(format!(
            "post:{}:{}",
            draft.title.as_deref().unwrap_or_default(),
            draft.content
        ))
    }

    async fn comment(&self, item_id: &str, content: &str) -> Result<Receipt, CoreError> {
        self.record(format!("comment:{}:{}", item_id, content))
    }

    async fn upvote(&self, item_id: &str) -> Result<Receipt, CoreError> {
        self.record(format!("upvote:{}", item_id))
    }
}

pub struct Harness {
    pub store: Arc<MemoryStore>,
    pub feed: Arc<FakeFeed>,
    pub generator: Arc<FakeGenerator>,
    pub evaluator: Arc<FakeEvaluator>,
    pub executor: Arc<FakeExecutor>,
    pub pipeline: Arc<DecisionPipeline>,
}

impl Harness {
    pub fn new(config: AgentConfig, generator: FakeGenerator) -> Self {
        Self::with_settings(config, generator, AgentSettings::default())
    }

    pub fn with_settings(config: AgentConfig, generator: FakeGenerator, agent: AgentSettings) -> Self {
        let store = Arc::new(MemoryStore::with_config(config));
        let feed = Arc::new(FakeFeed::with_items(default_feed()));
        let generator = Arc::new(generator);
        let evaluator = Arc::new(FakeEvaluator::accepting());
        let executor = Arc::new(FakeExecutor::default());

        let collaborators = Collaborators {
            feed: feed.clone(),
            generator: generator.clone(),
            evaluator: evaluator.clone(),
            executor: executor.clone(),
            store: store.clone(),
        };
        let pipeline = Arc::new(DecisionPipeline::new(collaborators, agent));

        Self {
            store,
            feed,
            generator,
            evaluator,
            executor,
            pipeline,
        }
    }

    /// A second pipeline over the same store, as another process would
    /// build it. It shares no in-process state with `pipeline`.
    pub fn sibling_pipeline(&self) -> DecisionPipeline {
        let collaborators = Collaborators {
            feed: self.feed.clone(),
            generator: self.generator.clone(),
            evaluator: self.evaluator.clone(),
            executor: self.executor.clone(),
            store: self.store.clone(),
        };
        DecisionPipeline::new(collaborators, AgentSettings::default())
    }

    pub async fn records(&self) -> Vec<ActivityRecord> {
        self.store.records().await
    }

    pub async fn run_state(&self) -> agent_core::RunState {
        self.store.get_run_state().await.unwrap()
    }
}

/// Config that lets every guard pass with empty history.
pub fn open_config() -> AgentConfig {
    AgentConfig {
        autonomous_mode: true,
        post_cooldown_seconds: 1800,
        max_posts_per_day: 6,
        ..AgentConfig::default()
    }
}
