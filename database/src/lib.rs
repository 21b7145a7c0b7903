//! SQLite-backed activity store: the audit log, the run-state row and the
//! runtime agent configuration.

pub mod memory;

#[cfg(test)]
mod tests;

use agent_core::{
    ActivityRecord, ActivityStore, AgentConfig, ConfigUpdate, CoreError, DatabaseError, Decision,
    Draft, Evaluation, Outcome, Receipt, RunState, Stage, TriggerKind,
};
use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};
use serde::de::DeserializeOwned;
use serde::Serialize;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePool, SqlitePoolOptions, SqliteRow};
use sqlx::Row;
use std::str::FromStr;
use std::time::Duration;
use tracing::{debug, info, warn};

pub use memory::MemoryStore;

const ACTIVITY_COLUMNS: &str = "run_id, started_at, completed_at, trigger_kind, trigger_context, \
     decision, decision_reason, target_item_id, draft, evaluation, outcome, error, failed_stage, \
     receipt, feed_items_seen";

pub struct Database {
    connection_string: String,
    pool: Option<SqlitePool>,
}

fn sql_error(error: sqlx::Error) -> CoreError {
    if let sqlx::Error::Database(db_error) = &error {
        if db_error.is_unique_violation() {
            return DatabaseError::ConstraintViolation {
                constraint: db_error.message().to_string(),
            }
            .into();
        }
        if db_error.message().contains("database is locked") {
            return DatabaseError::DatabaseLocked.into();
        }
    }
    DatabaseError::Sql(error).into()
}

fn to_millis(at: DateTime<Utc>) -> i64 {
    at.timestamp_millis()
}

fn from_millis(millis: i64) -> Result<DateTime<Utc>, CoreError> {
    Utc.timestamp_millis_opt(millis).single().ok_or_else(|| {
        DatabaseError::CorruptRecord {
            details: format!("timestamp {} out of range", millis),
        }
        .into()
    })
}

fn to_json<T: Serialize>(value: &Option<T>) -> Result<Option<String>, CoreError> {
    value
        .as_ref()
        .map(|v| serde_json::to_string(v).map_err(CoreError::from))
        .transpose()
}

fn from_json<T: DeserializeOwned>(raw: Option<String>, column: &str) -> Result<Option<T>, CoreError> {
    raw.map(|raw| {
        serde_json::from_str(&raw).map_err(|e| {
            DatabaseError::CorruptRecord {
                details: format!("{}: {}", column, e),
            }
            .into()
        })
    })
    .transpose()
}

fn parse_column<T>(raw: Option<String>) -> Result<Option<T>, CoreError>
where
    T: FromStr<Err = CoreError>,
{
    raw.map(|raw| raw.parse::<T>()).transpose()
}

fn record_from_row(row: &SqliteRow) -> Result<ActivityRecord, CoreError> {
    let trigger: String = row.try_get("trigger_kind").map_err(sql_error)?;
    let outcome: String = row.try_get("outcome").map_err(sql_error)?;
    let feed_items_seen: i64 = row.try_get("feed_items_seen").map_err(sql_error)?;

    Ok(ActivityRecord {
        run_id: row.try_get("run_id").map_err(sql_error)?,
        started_at: from_millis(row.try_get("started_at").map_err(sql_error)?)?,
        completed_at: from_millis(row.try_get("completed_at").map_err(sql_error)?)?,
        trigger: trigger.parse::<TriggerKind>()?,
        trigger_context: row.try_get("trigger_context").map_err(sql_error)?,
        decision: parse_column::<Decision>(row.try_get("decision").map_err(sql_error)?)?,
        decision_reason: row.try_get("decision_reason").map_err(sql_error)?,
        target_item_id: row.try_get("target_item_id").map_err(sql_error)?,
        draft: from_json::<Draft>(row.try_get("draft").map_err(sql_error)?, "draft")?,
        evaluation: from_json::<Evaluation>(
            row.try_get("evaluation").map_err(sql_error)?,
            "evaluation",
        )?,
        outcome: outcome.parse::<Outcome>()?,
        error: row.try_get("error").map_err(sql_error)?,
        failed_stage: parse_column::<Stage>(row.try_get("failed_stage").map_err(sql_error)?)?,
        receipt: from_json::<Receipt>(row.try_get("receipt").map_err(sql_error)?, "receipt")?,
        feed_items_seen: usize::try_from(feed_items_seen).unwrap_or_default(),
    })
}

impl Database {
    pub fn new(connection_string: String) -> Self {
        Self {
            connection_string,
            pool: None,
        }
    }

    pub async fn connect(&mut self) -> Result<(), CoreError> {
        let options = SqliteConnectOptions::from_str(&self.connection_string)
            .map_err(|e| DatabaseError::ConnectionFailed {
                reason: e.to_string(),
            })?
            .create_if_missing(true)
            .busy_timeout(Duration::from_secs(5));

        let pool = SqlitePoolOptions::new()
            .max_connections(5)
            .connect_with(options)
            .await
            .map_err(|e| DatabaseError::ConnectionFailed {
                reason: e.to_string(),
            })?;

        info!("Connected to database {}", self.connection_string);
        self.pool = Some(pool);
        Ok(())
    }

    pub async fn run_migrations(&self) -> Result<(), CoreError> {
        sqlx::migrate!("./migrations")
            .run(self.pool()?)
            .await
            .map_err(|e| DatabaseError::MigrationFailed {
                migration: e.to_string(),
            })?;
        debug!("Database migrations applied");
        Ok(())
    }

    /// Seed the runtime config with `defaults` unless one is already stored.
    pub async fn initialize(&self, defaults: &AgentConfig) -> Result<(), CoreError> {
        let config = serde_json::to_string(defaults)?;
        let result = sqlx::query(
            "INSERT OR IGNORE INTO agent_config (id, config, updated_at) VALUES (1, ?, ?)",
        )
        .bind(config)
        .bind(to_millis(Utc::now()))
        .execute(self.pool()?)
        .await
        .map_err(sql_error)?;

        if result.rows_affected() > 0 {
            info!("Seeded agent configuration from defaults");
        }
        Ok(())
    }

    /// Clear an `is_running` flag left behind by a process that died mid-run.
    /// Returns true when a stale flag was found.
    pub async fn recover_stale_state(&self) -> Result<bool, CoreError> {
        let result = sqlx::query(
            "UPDATE run_state SET is_running = 0, \
             last_error = COALESCE(last_error, 'interrupted: process exited during a run') \
             WHERE id = 1 AND is_running = 1",
        )
        .execute(self.pool()?)
        .await
        .map_err(sql_error)?;

        let recovered = result.rows_affected() > 0;
        if recovered {
            warn!("Found a run marked in progress from a previous process; cleared it");
        }
        Ok(recovered)
    }

    pub async fn close(&self) {
        if let Some(pool) = &self.pool {
            pool.close().await;
        }
    }

    fn pool(&self) -> Result<&SqlitePool, CoreError> {
        self.pool.as_ref().ok_or_else(|| {
            DatabaseError::ConnectionFailed {
                reason: "database not connected".to_string(),
            }
            .into()
        })
    }
}

#[async_trait]
impl ActivityStore for Database {
    async fn append(&self, record: &ActivityRecord) -> Result<(), CoreError> {
        let feed_items_seen = i64::try_from(record.feed_items_seen).unwrap_or(i64::MAX);
        let sql = format!(
            "INSERT INTO activity_log ({}) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
            ACTIVITY_COLUMNS
        );
        sqlx::query(&sql)
            .bind(&record.run_id)
            .bind(to_millis(record.started_at))
            .bind(to_millis(record.completed_at))
            .bind(record.trigger.as_str())
            .bind(&record.trigger_context)
            .bind(record.decision.map(|d| d.as_str()))
            .bind(&record.decision_reason)
            .bind(&record.target_item_id)
            .bind(to_json(&record.draft)?)
            .bind(to_json(&record.evaluation)?)
            .bind(record.outcome.as_str())
            .bind(&record.error)
            .bind(record.failed_stage.map(|s| s.as_str()))
            .bind(to_json(&record.receipt)?)
            .bind(feed_items_seen)
            .execute(self.pool()?)
            .await
            .map_err(sql_error)?;

        debug!("Recorded run {} ({})", record.run_id, record.outcome);
        Ok(())
    }

    async fn read_recent(&self, window: chrono::Duration) -> Result<Vec<ActivityRecord>, CoreError> {
        let since = Utc::now()
            .checked_sub_signed(window)
            .map(to_millis)
            .unwrap_or(i64::MIN);
        let sql = format!(
            "SELECT {} FROM activity_log WHERE completed_at >= ? \
             ORDER BY completed_at DESC, rowid DESC",
            ACTIVITY_COLUMNS
        );
        let rows = sqlx::query(&sql)
            .bind(since)
            .fetch_all(self.pool()?)
            .await
            .map_err(sql_error)?;

        rows.iter().map(record_from_row).collect()
    }

    async fn list_activity(&self, limit: usize) -> Result<Vec<ActivityRecord>, CoreError> {
        let limit = i64::try_from(limit).unwrap_or(i64::MAX);
        let sql = format!(
            "SELECT {} FROM activity_log ORDER BY completed_at DESC, rowid DESC LIMIT ?",
            ACTIVITY_COLUMNS
        );
        let rows = sqlx::query(&sql)
            .bind(limit)
            .fetch_all(self.pool()?)
            .await
            .map_err(sql_error)?;

        rows.iter().map(record_from_row).collect()
    }

    async fn get_run_state(&self) -> Result<RunState, CoreError> {
        let row = sqlx::query("SELECT last_run_at, last_error, is_running FROM run_state WHERE id = 1")
            .fetch_optional(self.pool()?)
            .await
            .map_err(sql_error)?;

        let Some(row) = row else {
            return Ok(RunState::default());
        };
        let last_run_at: Option<i64> = row.try_get("last_run_at").map_err(sql_error)?;
        Ok(RunState {
            last_run_at: last_run_at.map(from_millis).transpose()?,
            last_error: row.try_get("last_error").map_err(sql_error)?,
            is_running: row.try_get("is_running").map_err(sql_error)?,
        })
    }

    async fn set_run_state(&self, state: &RunState) -> Result<(), CoreError> {
        sqlx::query(
            "INSERT INTO run_state (id, last_run_at, last_error, is_running) VALUES (1, ?, ?, ?) \
             ON CONFLICT(id) DO UPDATE SET last_run_at = excluded.last_run_at, \
             last_error = excluded.last_error, is_running = excluded.is_running",
        )
        .bind(state.last_run_at.map(to_millis))
        .bind(&state.last_error)
        .bind(state.is_running)
        .execute(self.pool()?)
        .await
        .map_err(sql_error)?;
        Ok(())
    }

    async fn try_begin_run(&self) -> Result<bool, CoreError> {
        let result = sqlx::query(
            "INSERT INTO run_state (id, last_run_at, last_error, is_running) VALUES (1, NULL, NULL, 1) \
             ON CONFLICT(id) DO UPDATE SET is_running = 1 WHERE run_state.is_running = 0",
        )
        .execute(self.pool()?)
        .await
        .map_err(sql_error)?;
        Ok(result.rows_affected() > 0)
    }

    async fn get_config(&self) -> Result<AgentConfig, CoreError> {
        let row = sqlx::query("SELECT config FROM agent_config WHERE id = 1")
            .fetch_optional(self.pool()?)
            .await
            .map_err(sql_error)?;

        match row {
            Some(row) => {
                let raw: String = row.try_get("config").map_err(sql_error)?;
                from_json::<AgentConfig>(Some(raw), "config")
                    .map(|config| config.unwrap_or_default())
            }
            None => {
                debug!("No stored agent configuration, using defaults");
                Ok(AgentConfig::default())
            }
        }
    }

    async fn set_config(&self, update: &ConfigUpdate) -> Result<AgentConfig, CoreError> {
        let mut tx = self.pool()?.begin().await.map_err(sql_error)?;

        let current = match sqlx::query("SELECT config FROM agent_config WHERE id = 1")
            .fetch_optional(&mut *tx)
            .await
            .map_err(sql_error)?
        {
            Some(row) => {
                let raw: String = row.try_get("config").map_err(sql_error)?;
                from_json::<AgentConfig>(Some(raw), "config")?.unwrap_or_default()
            }
            None => AgentConfig::default(),
        };

        let next = current.apply(update)?;
        sqlx::query(
            "INSERT INTO agent_config (id, config, updated_at) VALUES (1, ?, ?) \
             ON CONFLICT(id) DO UPDATE SET config = excluded.config, updated_at = excluded.updated_at",
        )
        .bind(serde_json::to_string(&next)?)
        .bind(to_millis(Utc::now()))
        .execute(&mut *tx)
        .await
        .map_err(sql_error)?;

        tx.commit().await.map_err(sql_error)?;
        info!("Agent configuration updated");
        Ok(next)
    }
}
