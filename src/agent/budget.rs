// src/agent/budget.rs
// Daily token budget: every chat response's usage is recorded; once the
// day's total crosses the limit, turns short-circuit with a fixed message.

use anyhow::Result;
use chrono::Utc;
use std::sync::Arc;

use crate::db::{usage, DatabasePool};
use crate::llm::Usage;

/// What the user sees when the budget runs out.
pub const DAILY_LIMIT_MESSAGE: &str =
    "I've used up today's token budget. I'll be available again tomorrow.";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BudgetState {
    Ok,
    Exhausted,
}

pub struct BudgetTracker {
    pool: Arc<DatabasePool>,
    /// 0 disables enforcement.
    daily_limit: u64,
}

impl BudgetTracker {
    pub fn new(pool: Arc<DatabasePool>, daily_limit: u64) -> Self {
        Self { pool, daily_limit }
    }

    /// Record a response's usage and report whether the day's budget is
    /// now exhausted.
    pub async fn record(&self, provider: &str, model: &str, usage: &Usage) -> Result<BudgetState> {
        let day = Utc::now().format("%Y-%m-%d").to_string();
        let (p, m) = (provider.to_string(), model.to_string());
        let (prompt, completion) = (usage.prompt_tokens, usage.completion_tokens);

        let day_for_sum = day.clone();
        let total = self
            .pool
            .interact_raw(move |conn| {
                usage::record_usage_sync(conn, &day_for_sum, &p, &m, prompt, completion)?;
                usage::tokens_for_day_sync(conn, &day_for_sum)
            })
            .await?;

        if self.daily_limit > 0 && total >= self.daily_limit {
            tracing::warn!(total, limit = self.daily_limit, "Daily token budget exhausted");
            return Ok(BudgetState::Exhausted);
        }
        Ok(BudgetState::Ok)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn usage_of(total: u32) -> Usage {
        Usage {
            prompt_tokens: total / 2,
            completion_tokens: total - total / 2,
            total_tokens: total,
        }
    }

    #[tokio::test]
    async fn test_unlimited_when_zero() {
        let pool = Arc::new(DatabasePool::open_in_memory().await.unwrap());
        let tracker = BudgetTracker::new(pool, 0);

        for _ in 0..5 {
            let state = tracker
                .record("kimi", "kimi-k2", &usage_of(1_000_000))
                .await
                .unwrap();
            assert_eq!(state, BudgetState::Ok);
        }
    }

    #[tokio::test]
    async fn test_exhaustion_crosses_limit() {
        let pool = Arc::new(DatabasePool::open_in_memory().await.unwrap());
        let tracker = BudgetTracker::new(pool, 1000);

        assert_eq!(
            tracker.record("kimi", "kimi-k2", &usage_of(600)).await.unwrap(),
            BudgetState::Ok
        );
        assert_eq!(
            tracker.record("kimi", "kimi-k2", &usage_of(600)).await.unwrap(),
            BudgetState::Exhausted
        );
    }
}
