//! Plan quotas and usage tracking
//!
//! Each plan caps resource types per calendar month. Counters upsert
//! atomically through `rem_usage_increment`; over-quota background tasks are
//! skipped, never failed.

use rem_core::{PlanTier, QueueError};
use rem_store::Db;
use uuid::Uuid;

/// Resource types the tracker meters.
pub mod resources {
    pub const TOKENS: &str = "tokens";
    pub const MINUTES: &str = "minutes";
    pub const REQUESTS: &str = "requests";
}

/// Monthly caps for one plan.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PlanLimits {
    pub tokens: i64,
    pub minutes: i64,
    pub requests: i64,
}

impl PlanLimits {
    pub fn for_plan(plan: PlanTier) -> Self {
        match plan {
            PlanTier::Free => Self {
                tokens: 200_000,
                minutes: 60,
                requests: 1_000,
            },
            PlanTier::Pro => Self {
                tokens: 5_000_000,
                minutes: 600,
                requests: 20_000,
            },
            PlanTier::Team => Self {
                tokens: 20_000_000,
                minutes: 3_000,
                requests: 100_000,
            },
            PlanTier::Enterprise => Self {
                tokens: i64::MAX,
                minutes: i64::MAX,
                requests: i64::MAX,
            },
        }
    }

    pub fn cap(&self, resource_type: &str) -> i64 {
        match resource_type {
            resources::TOKENS => self.tokens,
            resources::MINUTES => self.minutes,
            resources::REQUESTS => self.requests,
            _ => 0,
        }
    }
}

/// Result of one atomic usage upsert.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct UsageOutcome {
    pub new_used: i64,
    pub effective_limit: i64,
    pub exceeded: bool,
}

#[derive(Clone)]
pub struct UsageTracker {
    db: Db,
}

impl UsageTracker {
    pub fn new(db: Db) -> Self {
        Self { db }
    }

    /// Atomically add `amount` and report the counter against the limit.
    pub async fn increment(
        &self,
        user_id: Uuid,
        resource_type: &str,
        amount: i64,
        limit: i64,
    ) -> Result<UsageOutcome, QueueError> {
        let row = self
            .db
            .query_one(
                "SELECT new_used, effective_limit, exceeded \
                 FROM rem_usage_increment($1, $2, $3, $4)",
                &[&user_id, &resource_type, &amount, &limit],
            )
            .await?;
        Ok(UsageOutcome {
            new_used: row.get(0),
            effective_limit: row.get(1),
            exceeded: row.get(2),
        })
    }

    /// Current month-to-date usage without mutating the counter.
    pub async fn current(&self, user_id: Uuid, resource_type: &str) -> Result<i64, QueueError> {
        let row = self
            .db
            .query_opt(
                "SELECT used FROM usage_tracking \
                 WHERE user_id = $1 AND resource_type = $2 \
                   AND period_start = date_trunc('month', now())",
                &[&user_id, &resource_type],
            )
            .await?;
        Ok(row.map(|r| r.get(0)).unwrap_or(0))
    }

    /// Quota gate consulted before dispatching a task. Over-quota surfaces
    /// `QuotaExceeded`, which the worker treats as skip.
    pub async fn check_quota(
        &self,
        user_id: Uuid,
        plan: PlanTier,
        resource_type: &str,
    ) -> Result<(), QueueError> {
        let limit = PlanLimits::for_plan(plan).cap(resource_type);
        if limit == i64::MAX {
            return Ok(());
        }
        let used = self.current(user_id, resource_type).await?;
        let extra = self.granted_extra(user_id, resource_type).await?;
        if used >= limit + extra {
            return Err(QueueError::QuotaExceeded {
                user_id,
                resource_type: resource_type.to_string(),
                used,
                limit: limit + extra,
            });
        }
        Ok(())
    }

    async fn granted_extra(&self, user_id: Uuid, resource_type: &str) -> Result<i64, QueueError> {
        let row = self
            .db
            .query_opt(
                "SELECT granted_extra FROM usage_tracking \
                 WHERE user_id = $1 AND resource_type = $2 \
                   AND period_start = date_trunc('month', now())",
                &[&user_id, &resource_type],
            )
            .await?;
        Ok(row.map(|r| r.get(0)).unwrap_or(0))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn plans_are_strictly_ordered() {
        let free = PlanLimits::for_plan(PlanTier::Free);
        let pro = PlanLimits::for_plan(PlanTier::Pro);
        let team = PlanLimits::for_plan(PlanTier::Team);
        assert!(free.tokens < pro.tokens && pro.tokens < team.tokens);
        assert!(free.requests < pro.requests && pro.requests < team.requests);
    }

    #[test]
    fn enterprise_is_uncapped() {
        let limits = PlanLimits::for_plan(PlanTier::Enterprise);
        assert_eq!(limits.cap(resources::TOKENS), i64::MAX);
    }

    #[test]
    fn unknown_resources_cap_at_zero() {
        assert_eq!(PlanLimits::for_plan(PlanTier::Pro).cap("widgets"), 0);
    }
}
