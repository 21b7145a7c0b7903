//! Contracts the decision pipeline consumes. Adapters live in the
//! `moltbook-client`, `llm-interface` and `database` crates.

use async_trait::async_trait;
use chrono::Duration;

use crate::error::CoreError;
use crate::types::{
    ActivityRecord, AgentConfig, ConfigUpdate, DecisionProposal, Draft, DraftRequest,
    Evaluation, FeedItem, Persona, Receipt, RunState,
};

#[async_trait]
pub trait FeedSource: Send + Sync {
    /// Current observable feed, in display order.
    async fn fetch_feed(&self) -> Result<Vec<FeedItem>, CoreError>;
}

#[async_trait]
pub trait ContentGenerator: Send + Sync {
    async fn decide(
        &self,
        feed: &[FeedItem],
        persona: &Persona,
        context: Option<&str>,
    ) -> Result<DecisionProposal, CoreError>;

    async fn draft(&self, request: &DraftRequest, persona: &Persona) -> Result<Draft, CoreError>;
}

#[async_trait]
pub trait QualityEvaluator: Send + Sync {
    async fn evaluate(&self, draft: &Draft, persona: &Persona) -> Result<Evaluation, CoreError>;
}

#[async_trait]
pub trait PlatformExecutor: Send + Sync {
    async fn post(&self, draft: &Draft) -> Result<Receipt, CoreError>;

    async fn comment(&self, item_id: &str, content: &str) -> Result<Receipt, CoreError>;

    async fn upvote(&self, item_id: &str) -> Result<Receipt, CoreError>;
}

#[async_trait]
pub trait ActivityStore: Send + Sync {
    /// Append a record. Fails with a constraint violation if `run_id` exists.
    async fn append(&self, record: &ActivityRecord) -> Result<(), CoreError>;

    /// Records completed within the trailing `window`, newest first.
    async fn read_recent(&self, window: Duration) -> Result<Vec<ActivityRecord>, CoreError>;

    /// The newest `limit` records.
    async fn list_activity(&self, limit: usize) -> Result<Vec<ActivityRecord>, CoreError>;

    async fn get_run_state(&self) -> Result<RunState, CoreError>;

    async fn set_run_state(&self, state: &RunState) -> Result<(), CoreError>;

    /// Atomically flip the persisted `is_running` flag from false to true.
    /// Returns false, changing nothing, when a run is already marked in
    /// progress. Every process sharing the store must see the same answer.
    async fn try_begin_run(&self) -> Result<bool, CoreError>;

    async fn get_config(&self) -> Result<AgentConfig, CoreError>;

    /// Merge `update` into the stored config and return the result.
    async fn set_config(&self, update: &ConfigUpdate) -> Result<AgentConfig, CoreError>;
}
