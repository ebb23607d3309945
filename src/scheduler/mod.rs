// src/scheduler/mod.rs
// Scheduled trigger runtime: a per-minute tick over the persisted cron
// rows. Firing never touches session locks, so scheduled work proceeds
// regardless of any chat in progress.

pub mod schedule;

use anyhow::Result;
use async_trait::async_trait;
use chrono::Utc;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

use crate::agent::Agent;
use crate::db::schema::TEMPORAL_DOMAIN_IDS;
use crate::db::{crons, CronRow, DatabasePool};
use crate::memory::{MemoryStore, RecallOptions};
use crate::tools::{Services, ToolCtx};

use schedule::{format_db_time, next_run_after, now_db_time, parse_schedule};

/// Delay before the first tick, letting transports settle after start.
const STARTUP_DELAY: Duration = Duration::from_secs(10);

/// Tick cadence.
const TICK_INTERVAL: Duration = Duration::from_secs(60);

/// How many recalled facts feed a trigger prompt.
const RECALL_LIMIT: usize = 5;

/// The slice of the agent the runner needs: running one system trigger.
/// A seam for tests; [`Agent`] is the production implementation.
#[async_trait]
pub trait TriggerAgent: Send + Sync {
    async fn run_trigger(&self, ctx: &ToolCtx, prompt: &str) -> Result<String>;
}

#[async_trait]
impl TriggerAgent for Agent {
    async fn run_trigger(&self, ctx: &ToolCtx, prompt: &str) -> Result<String> {
        self.run_system_trigger(ctx, prompt).await
    }
}

pub struct CronRunner {
    pool: Arc<DatabasePool>,
    memory: Arc<MemoryStore>,
    agent: Arc<dyn TriggerAgent>,
    services: Arc<Services>,
    /// Transport prefix for the session ids crons run under.
    transport_name: String,
}

impl CronRunner {
    pub fn new(
        pool: Arc<DatabasePool>,
        memory: Arc<MemoryStore>,
        agent: Arc<dyn TriggerAgent>,
        services: Arc<Services>,
        transport_name: String,
    ) -> Self {
        Self {
            pool,
            memory,
            agent,
            services,
            transport_name,
        }
    }

    /// The tick loop. Runs until the task is aborted.
    pub async fn run(self: Arc<Self>) {
        tokio::time::sleep(STARTUP_DELAY).await;
        let mut ticker = tokio::time::interval(TICK_INTERVAL);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
        loop {
            ticker.tick().await;
            if let Err(e) = self.tick().await {
                warn!("Cron tick failed: {}", e);
            }
        }
    }

    /// One tick: purge expired rows, fire everything due, advance next_run.
    /// Due rows are processed sequentially; ordering within a tick is
    /// deterministic (next_run, then id).
    pub async fn tick(&self) -> Result<()> {
        let now = now_db_time();

        let now_for_purge = now.clone();
        let purged = self
            .pool
            .interact_raw(move |conn| crons::delete_expired_crons_sync(conn, &now_for_purge))
            .await?;
        if purged > 0 {
            info!("Purged {} expired cron(s)", purged);
        }

        let now_for_due = now.clone();
        let due = self
            .pool
            .interact_raw(move |conn| crons::due_crons_sync(conn, &now_for_due))
            .await?;

        for row in due {
            if let Err(e) = self.fire(&row).await {
                warn!("Cron #{} ('{}') failed to fire: {}", row.id, row.keyword, e);
            }
            self.advance(&row).await?;
        }
        Ok(())
    }

    /// Fire one due cron: recall the keyword across the temporal domains,
    /// run the agent as a system trigger, send the result to the chat.
    /// Falls back to a plain reminder when the agent cannot answer.
    async fn fire(&self, row: &CronRow) -> Result<()> {
        let recalled = self
            .memory
            .recall(
                &row.keyword,
                &TEMPORAL_DOMAIN_IDS,
                RECALL_LIMIT,
                RecallOptions::default(),
            )
            .await
            .map(|r| r.facts)
            .unwrap_or_default();

        let mut prompt = format!(
            "Scheduled trigger '{}' just fired for this chat. \
             Write one short, natural reminder message for the user.",
            row.keyword
        );
        if !recalled.is_empty() {
            prompt.push_str("\n\nRelevant memories:");
            for fact in &recalled {
                prompt.push_str(&format!("\n- {}: {}", fact.field, fact.value));
            }
        }

        let ctx = ToolCtx {
            chat_id: row.chat_id,
            session_id: format!("{}:{}", self.transport_name, row.chat_id),
            user_id: None,
            media: Vec::new(),
            safe_mode: false,
            services: self.services.clone(),
        };

        let text = match self.agent.run_trigger(&ctx, &prompt).await {
            Ok(text) if !text.trim().is_empty() => text,
            Ok(_) => format!("Reminder: {}", row.keyword),
            Err(e) => {
                warn!("Trigger agent failed for cron #{}: {}", row.id, e);
                format!("Reminder: {}", row.keyword)
            }
        };

        self.services.notifier.send(row.chat_id, text);
        Ok(())
    }

    /// Advance next_run strictly past now. A row whose stored expression no
    /// longer parses is dropped so it cannot re-fire forever.
    async fn advance(&self, row: &CronRow) -> Result<()> {
        let id = row.id;
        match parse_schedule(&row.schedule) {
            Ok(schedule) => {
                let next = next_run_after(&schedule, Utc::now())
                    .map(format_db_time)
                    .ok_or_else(|| anyhow::anyhow!("schedule '{}' never fires again", row.schedule))?;
                self.pool
                    .interact_raw(move |conn| crons::set_next_run_sync(conn, id, &next))
                    .await?;
            }
            Err(e) => {
                warn!("Cron #{} has unparseable schedule, deleting: {}", id, e);
                self.pool
                    .interact_raw(move |conn| crons::delete_cron_sync(conn, id))
                    .await?;
            }
        }
        Ok(())
    }
}
