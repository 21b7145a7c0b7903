use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::error::{ConfigError, CoreError};

/// One item of the observed Moltbook feed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FeedItem {
    pub id: String,
    pub author: String,
    pub title: String,
    pub text: String,
    pub submolt: String,
    pub timestamp: Option<DateTime<Utc>>,
    pub upvotes: i64,
    pub comment_count: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum TriggerKind {
    Scheduled,
    ManualSync,
    ManualAsync,
    DirectPost,
    DirectComment,
}

impl TriggerKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            TriggerKind::Scheduled => "scheduled",
            TriggerKind::ManualSync => "manual-sync",
            TriggerKind::ManualAsync => "manual-async",
            TriggerKind::DirectPost => "direct-post",
            TriggerKind::DirectComment => "direct-comment",
        }
    }

    /// Only scheduled ticks are gated on `autonomous_mode`.
    pub fn requires_autonomous_mode(&self) -> bool {
        matches!(self, TriggerKind::Scheduled)
    }
}

impl fmt::Display for TriggerKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TriggerKind {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "scheduled" => Ok(TriggerKind::Scheduled),
            "manual-sync" => Ok(TriggerKind::ManualSync),
            "manual-async" => Ok(TriggerKind::ManualAsync),
            "direct-post" => Ok(TriggerKind::DirectPost),
            "direct-comment" => Ok(TriggerKind::DirectComment),
            other => Err(CoreError::InvalidInput {
                message: format!("unknown trigger kind '{}'", other),
            }),
        }
    }
}

/// The categorical action chosen for a run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Decision {
    Post,
    Comment,
    Upvote,
    #[serde(rename = "none")]
    Nothing,
}

impl Decision {
    pub fn as_str(&self) -> &'static str {
        match self {
            Decision::Post => "post",
            Decision::Comment => "comment",
            Decision::Upvote => "upvote",
            Decision::Nothing => "none",
        }
    }

    pub fn needs_draft(&self) -> bool {
        matches!(self, Decision::Post | Decision::Comment)
    }

    pub fn needs_target(&self) -> bool {
        matches!(self, Decision::Comment | Decision::Upvote)
    }
}

impl fmt::Display for Decision {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Decision {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "post" => Ok(Decision::Post),
            "comment" => Ok(Decision::Comment),
            "upvote" => Ok(Decision::Upvote),
            "none" | "nothing" => Ok(Decision::Nothing),
            other => Err(CoreError::InvalidInput {
                message: format!("unknown decision '{}'", other),
            }),
        }
    }
}

/// Pipeline stages. `Done` is terminal and only reachable from `Log`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Stage {
    Observe,
    Decide,
    Draft,
    Evaluate,
    Execute,
    Log,
    Done,
}

impl Stage {
    pub fn as_str(&self) -> &'static str {
        match self {
            Stage::Observe => "observe",
            Stage::Decide => "decide",
            Stage::Draft => "draft",
            Stage::Evaluate => "evaluate",
            Stage::Execute => "execute",
            Stage::Log => "log",
            Stage::Done => "done",
        }
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Stage {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "observe" => Ok(Stage::Observe),
            "decide" => Ok(Stage::Decide),
            "draft" => Ok(Stage::Draft),
            "evaluate" => Ok(Stage::Evaluate),
            "execute" => Ok(Stage::Execute),
            "log" => Ok(Stage::Log),
            "done" => Ok(Stage::Done),
            other => Err(CoreError::InvalidInput {
                message: format!("unknown stage '{}'", other),
            }),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Outcome {
    Success,
    Skipped,
    Rejected,
    Failed,
}

impl Outcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            Outcome::Success => "success",
            Outcome::Skipped => "skipped",
            Outcome::Rejected => "rejected",
            Outcome::Failed => "failed",
        }
    }
}

impl fmt::Display for Outcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Outcome {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "success" => Ok(Outcome::Success),
            "skipped" => Ok(Outcome::Skipped),
            "rejected" => Ok(Outcome::Rejected),
            "failed" => Ok(Outcome::Failed),
            other => Err(CoreError::InvalidInput {
                message: format!("unknown outcome '{}'", other),
            }),
        }
    }
}

/// Text to be published. Posts carry a title and submolt, comments only content.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Draft {
    pub title: Option<String>,
    pub content: String,
    pub submolt: Option<String>,
}

impl Draft {
    pub const DEFAULT_SUBMOLT: &'static str = "general";

    pub fn comment(content: impl Into<String>) -> Self {
        Self {
            title: None,
            content: content.into(),
            submolt: None,
        }
    }

    pub fn post(title: impl Into<String>, content: impl Into<String>, submolt: Option<String>) -> Self {
        Self {
            title: Some(title.into()),
            content: content.into(),
            submolt: Some(submolt.unwrap_or_else(|| Self::DEFAULT_SUBMOLT.to_string())),
        }
    }

    pub fn submolt_or_default(&self) -> &str {
        self.submolt.as_deref().unwrap_or(Self::DEFAULT_SUBMOLT)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Evaluation {
    pub accepted: bool,
    pub reason: String,
    pub score: Option<f64>,
}

/// Acknowledgement of an executed platform action.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Receipt {
    pub id: Option<String>,
    pub raw: serde_json::Value,
}

/// What the generator chose to do with the observed feed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DecisionProposal {
    pub decision: Decision,
    pub target_item_id: Option<String>,
    pub reason: String,
}

/// Everything the generator needs to draft a post or comment.
#[derive(Debug, Clone)]
pub struct DraftRequest {
    pub decision: Decision,
    pub target: Option<FeedItem>,
    pub context: Option<String>,
    pub reason: Option<String>,
}

/// Operator-chosen action that bypasses the generator's decision.
///
/// When `content` is supplied it is used verbatim as the draft; otherwise the
/// generator drafts it.
#[derive(Debug, Clone, PartialEq)]
pub enum ExplicitAction {
    Post {
        title: Option<String>,
        content: Option<String>,
        submolt: Option<String>,
    },
    Comment {
        item_id: String,
        content: Option<String>,
    },
}

impl ExplicitAction {
    pub fn decision(&self) -> Decision {
        match self {
            ExplicitAction::Post { .. } => Decision::Post,
            ExplicitAction::Comment { .. } => Decision::Comment,
        }
    }

    pub fn target_item_id(&self) -> Option<&str> {
        match self {
            ExplicitAction::Post { .. } => None,
            ExplicitAction::Comment { item_id, .. } => Some(item_id),
        }
    }

    /// The draft the operator supplied, if any.
    pub fn supplied_draft(&self) -> Option<Draft> {
        match self {
            ExplicitAction::Post {
                title,
                content: Some(content),
                submolt,
            } => Some(Draft::post(
                title.clone().unwrap_or_else(|| "Untitled".to_string()),
                content.clone(),
                submolt.clone(),
            )),
            ExplicitAction::Comment {
                content: Some(content),
                ..
            } => Some(Draft::comment(content.clone())),
            _ => None,
        }
    }
}

#[derive(Debug, Clone)]
pub struct RunRequest {
    pub trigger: TriggerKind,
    pub action: Option<ExplicitAction>,
    pub context: Option<String>,
}

impl RunRequest {
    pub fn scheduled() -> Self {
        Self {
            trigger: TriggerKind::Scheduled,
            action: None,
            context: None,
        }
    }

    pub fn manual(trigger: TriggerKind, context: Option<String>) -> Self {
        Self {
            trigger,
            action: None,
            context,
        }
    }

    pub fn direct(action: ExplicitAction) -> Self {
        let trigger = match action {
            ExplicitAction::Post { .. } => TriggerKind::DirectPost,
            ExplicitAction::Comment { .. } => TriggerKind::DirectComment,
        };
        Self {
            trigger,
            action: Some(action),
            context: None,
        }
    }
}

/// Persisted, append-only audit entry; one per completed run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ActivityRecord {
    pub run_id: String,
    pub started_at: DateTime<Utc>,
    pub completed_at: DateTime<Utc>,
    pub trigger: TriggerKind,
    pub trigger_context: Option<String>,
    pub decision: Option<Decision>,
    pub decision_reason: Option<String>,
    pub target_item_id: Option<String>,
    pub draft: Option<Draft>,
    pub evaluation: Option<Evaluation>,
    pub outcome: Outcome,
    pub error: Option<String>,
    pub failed_stage: Option<Stage>,
    pub receipt: Option<Receipt>,
    pub feed_items_seen: usize,
}

impl ActivityRecord {
    /// True for records that count against the cooldown and quota guards.
    pub fn is_successful(&self, decision: Decision) -> bool {
        self.outcome == Outcome::Success && self.decision == Some(decision)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RunState {
    pub last_run_at: Option<DateTime<Utc>>,
    pub last_error: Option<String>,
    pub is_running: bool,
}

/// One week.
pub const MAX_HEARTBEAT_INTERVAL_SECONDS: u64 = 7 * 24 * 3600;
/// Thirty days.
pub const MAX_POST_COOLDOWN_SECONDS: u64 = 30 * 24 * 3600;

/// Runtime-tunable agent configuration, stored alongside the activity log.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AgentConfig {
    pub autonomous_mode: bool,
    pub heartbeat_interval_seconds: u64,
    pub max_posts_per_day: u32,
    pub post_cooldown_seconds: u64,
    pub topics: Vec<String>,
    pub style_hints: Vec<String>,
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            autonomous_mode: false,
            heartbeat_interval_seconds: 14_400,
            max_posts_per_day: 6,
            post_cooldown_seconds: 1_800,
            topics: Vec::new(),
            style_hints: Vec::new(),
        }
    }
}

impl AgentConfig {
    /// Merge a partial update, rejecting values the scheduler cannot run with.
    pub fn apply(&self, update: &ConfigUpdate) -> Result<AgentConfig, ConfigError> {
        let mut next = self.clone();
        if let Some(autonomous_mode) = update.autonomous_mode {
            next.autonomous_mode = autonomous_mode;
        }
        if let Some(interval) = update.heartbeat_interval_seconds {
            next.heartbeat_interval_seconds = interval;
        }
        if let Some(max_posts) = update.max_posts_per_day {
            next.max_posts_per_day = max_posts;
        }
        if let Some(cooldown) = update.post_cooldown_seconds {
            next.post_cooldown_seconds = cooldown;
        }
        if let Some(topics) = &update.topics {
            next.topics = topics.clone();
        }
        if let Some(style_hints) = &update.style_hints {
            next.style_hints = style_hints.clone();
        }
        next.validate()?;
        Ok(next)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if !(1..=MAX_HEARTBEAT_INTERVAL_SECONDS).contains(&self.heartbeat_interval_seconds) {
            return Err(ConfigError::InvalidValue {
                field: "heartbeat_interval_seconds".to_string(),
                value: self.heartbeat_interval_seconds.to_string(),
            });
        }
        if self.post_cooldown_seconds > MAX_POST_COOLDOWN_SECONDS {
            return Err(ConfigError::InvalidValue {
                field: "post_cooldown_seconds".to_string(),
                value: self.post_cooldown_seconds.to_string(),
            });
        }
        Ok(())
    }
}

/// Partial configuration change from the administrative path.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ConfigUpdate {
    pub autonomous_mode: Option<bool>,
    pub heartbeat_interval_seconds: Option<u64>,
    pub max_posts_per_day: Option<u32>,
    pub post_cooldown_seconds: Option<u64>,
    pub topics: Option<Vec<String>>,
    pub style_hints: Option<Vec<String>>,
}

impl ConfigUpdate {
    pub fn is_empty(&self) -> bool {
        *self == ConfigUpdate::default()
    }
}

/// Who the agent speaks as. Passed to the generator and evaluator untouched.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Persona {
    pub name: String,
    pub description: String,
    pub topics: Vec<String>,
    pub style_hints: Vec<String>,
}
