//! Cooldown and daily quota checks run before any platform write.
//!
//! Everything here is a pure function of the clock, the recent activity
//! history and the run's config snapshot.

use agent_core::{ActivityRecord, AgentConfig, Decision};
use chrono::{DateTime, Duration, Utc};
use std::fmt;

/// Trailing window the daily post quota is counted over.
pub fn quota_window() -> Duration {
    Duration::hours(24)
}

fn cooldown(config: &AgentConfig) -> Duration {
    i64::try_from(config.post_cooldown_seconds)
        .ok()
        .and_then(Duration::try_seconds)
        .unwrap_or(Duration::MAX)
}

/// History needed to evaluate both guards: the quota window or the
/// cooldown, whichever reaches further back.
pub fn history_window(config: &AgentConfig) -> Duration {
    quota_window().max(cooldown(config))
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GuardBlock {
    Cooldown { remaining: Duration },
    Quota { posts: u32, limit: u32 },
}

impl GuardBlock {
    /// Machine-readable reason stored on the activity record.
    pub fn reason(&self) -> &'static str {
        match self {
            GuardBlock::Cooldown { .. } => "cooldown",
            GuardBlock::Quota { .. } => "quota",
        }
    }
}

impl fmt::Display for GuardBlock {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            GuardBlock::Cooldown { remaining } => write!(
                f,
                "cooldown active for another {}s",
                remaining.num_seconds().max(0)
            ),
            GuardBlock::Quota { posts, limit } => {
                write!(f, "daily quota reached ({} of {} posts)", posts, limit)
            }
        }
    }
}

/// Completion time of the newest successful post or comment.
pub fn last_successful_write(history: &[ActivityRecord]) -> Option<DateTime<Utc>> {
    history
        .iter()
        .filter(|r| r.is_successful(Decision::Post) || r.is_successful(Decision::Comment))
        .map(|r| r.completed_at)
        .max()
}

/// Successful posts completed within the quota window ending at `now`.
pub fn posts_in_window(history: &[ActivityRecord], now: DateTime<Utc>) -> u32 {
    let since = now - quota_window();
    let count = history
        .iter()
        .filter(|r| r.is_successful(Decision::Post) && r.completed_at > since && r.completed_at <= now)
        .count();
    u32::try_from(count).unwrap_or(u32::MAX)
}

pub fn check(
    decision: Decision,
    now: DateTime<Utc>,
    history: &[ActivityRecord],
    config: &AgentConfig,
) -> Result<(), GuardBlock> {
    if !decision.needs_draft() {
        return Ok(());
    }

    let cooldown = cooldown(config);
    if let Some(last) = last_successful_write(history) {
        let elapsed = now.signed_duration_since(last);
        if elapsed < cooldown {
            return Err(GuardBlock::Cooldown {
                remaining: cooldown.checked_sub(&elapsed).unwrap_or(cooldown),
            });
        }
    }

    if decision == Decision::Post {
        let posts = posts_in_window(history, now);
        if posts >= config.max_posts_per_day {
            return Err(GuardBlock::Quota {
                posts,
                limit: config.max_posts_per_day,
            });
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use agent_core::{Outcome, TriggerKind};

    fn record(decision: Decision, outcome: Outcome, at: DateTime<Utc>) -> ActivityRecord {
        ActivityRecord {
            run_id: uuid::Uuid::new_v4().to_string(),
            started_at: at,
            completed_at: at,
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
            feed_items_seen: 0,
        }
    }

    fn config(cooldown: u64, max_posts: u32) -> AgentConfig {
        AgentConfig {
            post_cooldown_seconds: cooldown,
            max_posts_per_day: max_posts,
            ..AgentConfig::default()
        }
    }

    #[test]
    fn test_empty_history_allows_everything() {
        let now = Utc::now();
        for decision in [Decision::Post, Decision::Comment, Decision::Upvote] {
            assert_eq!(check(decision, now, &[], &config(1800, 6)), Ok(()));
        }
    }

    #[test]
    fn test_cooldown_blocks_post_and_comment_but_not_upvote() {
        let now = Utc::now();
        let history = vec![record(Decision::Comment, Outcome::Success, now - Duration::minutes(10))];
        let config = config(1800, 6);

        let block = check(Decision::Post, now, &history, &config).unwrap_err();
        assert_eq!(block.reason(), "cooldown");
        assert_eq!(
            block,
            GuardBlock::Cooldown {
                remaining: Duration::minutes(20)
            }
        );
        assert!(check(Decision::Comment, now, &history, &config).is_err());
        assert!(check(Decision::Upvote, now, &history, &config).is_ok());
    }

    #[test]
    fn test_cooldown_boundary_is_inclusive() {
        let now = Utc::now();
        let history = vec![record(Decision::Post, Outcome::Success, now - Duration::seconds(1800))];
        assert!(check(Decision::Comment, now, &history, &config(1800, 6)).is_ok());
    }

    #[test]
    fn test_failed_and_skipped_runs_do_not_start_cooldown() {
        let now = Utc::now();
        let history = vec![
            record(Decision::Post, Outcome::Failed, now - Duration::minutes(1)),
            record(Decision::Post, Outcome::Skipped, now - Duration::minutes(2)),
            record(Decision::Comment, Outcome::Rejected, now - Duration::minutes(3)),
            record(Decision::Upvote, Outcome::Success, now - Duration::minutes(4)),
        ];
        assert!(check(Decision::Post, now, &history, &config(1800, 6)).is_ok());
    }

    #[test]
    fn test_quota_counts_trailing_window() {
        let now = Utc::now();
        let history = vec![
            record(Decision::Post, Outcome::Success, now - Duration::hours(2)),
            record(Decision::Post, Outcome::Success, now - Duration::hours(10)),
            record(Decision::Post, Outcome::Success, now - Duration::hours(25)),
            record(Decision::Comment, Outcome::Success, now - Duration::hours(3)),
        ];
        assert_eq!(posts_in_window(&history, now), 2);

        let block = check(Decision::Post, now, &history, &config(0, 2)).unwrap_err();
        assert_eq!(block, GuardBlock::Quota { posts: 2, limit: 2 });
        assert_eq!(block.reason(), "quota");

        // Quota only applies to posts
        assert!(check(Decision::Comment, now, &history, &config(0, 2)).is_ok());
        assert!(check(Decision::Post, now, &history, &config(0, 3)).is_ok());
    }

    #[test]
    fn test_zero_quota_blocks_all_posts() {
        let now = Utc::now();
        let block = check(Decision::Post, now, &[], &config(0, 0)).unwrap_err();
        assert_eq!(block.reason(), "quota");
    }

    #[test]
    fn test_cooldown_longer_than_a_day() {
        let now = Utc::now();
        let config = config(48 * 3600, 6);
        let history = vec![record(Decision::Post, Outcome::Success, now - Duration::hours(25))];

        assert_eq!(history_window(&config), Duration::hours(48));
        let block = check(Decision::Comment, now, &history, &config).unwrap_err();
        assert_eq!(
            block,
            GuardBlock::Cooldown {
                remaining: Duration::hours(23)
            }
        );
    }

    #[test]
    fn test_huge_cooldown_blocks_without_overflow() {
        let now = Utc::now();
        let config = config(u64::MAX, 6);
        let history = vec![record(Decision::Post, Outcome::Success, now - Duration::days(3650))];

        assert_eq!(history_window(&config), Duration::MAX);
        let block = check(Decision::Post, now, &history, &config).unwrap_err();
        assert_eq!(block.reason(), "cooldown");
        // A write stamped in the future still blocks
        let future = vec![record(Decision::Post, Outcome::Success, now + Duration::hours(1))];
        assert!(check(Decision::Post, now, &future, &config).is_err());
    }

    #[test]
    fn test_quota_window_is_the_floor() {
        assert_eq!(history_window(&config(60, 6)), quota_window());
    }

    #[test]
    fn test_cooldown_checked_before_quota() {
        let now = Utc::now();
        let history = vec![record(Decision::Post, Outcome::Success, now - Duration::minutes(5))];
        let block = check(Decision::Post, now, &history, &config(1800, 1)).unwrap_err();
        assert_eq!(block.reason(), "cooldown");
    }
}
