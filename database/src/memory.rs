use agent_core::{
    ActivityRecord, ActivityStore, AgentConfig, ConfigUpdate, CoreError, DatabaseError, RunState,
};
use async_trait::async_trait;
use chrono::Utc;
use tokio::sync::RwLock;

#[derive(Debug, Default)]
struct Inner {
    records: Vec<ActivityRecord>,
    run_state: RunState,
    config: AgentConfig,
}

/// In-process activity store with the same semantics as [`crate::Database`].
/// Nothing survives the process; used for tests and dry runs.
#[derive(Debug, Default)]
pub struct MemoryStore {
    inner: RwLock<Inner>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_config(config: AgentConfig) -> Self {
        Self {
            inner: RwLock::new(Inner {
                config,
                ..Inner::default()
            }),
        }
    }

    /// Every record in append order.
    pub async fn records(&self) -> Vec<ActivityRecord> {
        self.inner.read().await.records.clone()
    }

    /// Insert a record directly, bypassing the duplicate check. Lets tests
    /// seed history with arbitrary timestamps.
    pub async fn seed(&self, record: ActivityRecord) {
        self.inner.write().await.records.push(record);
    }
}

fn newest_first(records: &[ActivityRecord]) -> Vec<ActivityRecord> {
    let mut sorted: Vec<_> = records.to_vec();
    // stable sort keeps later appends ahead when completed_at ties
    sorted.reverse();
    sorted.sort_by(|a, b| b.completed_at.cmp(&a.completed_at));
    sorted
}

#[async_trait]
impl ActivityStore for MemoryStore {
    async fn append(&self, record: &ActivityRecord) -> Result<(), CoreError> {
        let mut inner = self.inner.write().await;
        if inner.records.iter().any(|r| r.run_id == record.run_id) {
            return Err(DatabaseError::ConstraintViolation {
                constraint: format!("activity_log.run_id = {}", record.run_id),
            }
            .into());
        }
        inner.records.push(record.clone());
        Ok(())
    }

    async fn read_recent(&self, window: chrono::Duration) -> Result<Vec<ActivityRecord>, CoreError> {
        let since = Utc::now().checked_sub_signed(window);
        let inner = self.inner.read().await;
        let recent: Vec<_> = inner
            .records
            .iter()
            .filter(|r| since.map_or(true, |since| r.completed_at >= since))
            .cloned()
            .collect();
        Ok(newest_first(&recent))
    }

    async fn list_activity(&self, limit: usize) -> Result<Vec<ActivityRecord>, CoreError> {
        let inner = self.inner.read().await;
        let mut records = newest_first(&inner.records);
        records.truncate(limit);
        Ok(records)
    }

    async fn get_run_state(&self) -> Result<RunState, CoreError> {
        Ok(self.inner.read().await.run_state.clone())
    }

    async fn set_run_state(&self, state: &RunState) -> Result<(), CoreError> {
        self.inner.write().await.run_state = state.clone();
        Ok(())
    }

    async fn try_begin_run(&self) -> Result<bool, CoreError> {
        let mut inner = self.inner.write().await;
        if inner.run_state.is_running {
            return Ok(false);
        }
        inner.run_state.is_running = true;
        Ok(true)
    }

    async fn get_config(&self) -> Result<AgentConfig, CoreError> {
        Ok(self.inner.read().await.config.clone())
    }

    async fn set_config(&self, update: &ConfigUpdate) -> Result<AgentConfig, CoreError> {
        let mut inner = self.inner.write().await;
        let next = inner.config.apply(update)?;
        inner.config = next.clone();
        Ok(next)
    }
}
