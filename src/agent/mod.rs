// src/agent/mod.rs
// The agent loop: per-turn state machine over the LLM and the tool
// registry. Normal turns may flip one-way into isolated and/or degraded
// mode; provider errors drive the fallback policy; a per-tool circuit
// breaker and a hard iteration cap bound the damage of a looping model.

pub mod approval;
pub mod budget;
pub mod modes;

pub use approval::ApprovalBroker;
pub use budget::{BudgetState, BudgetTracker, DAILY_LIMIT_MESSAGE};
pub use modes::TurnModes;

use anyhow::Result;
use async_trait::async_trait;
use chrono::Utc;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tracing::{info, warn};

use crate::llm::factory::ProviderFactory;
use crate::llm::{is_fallback_error, LlmClient, Message, Provider, ToolCall};
use crate::session::ConversationBuffer;
use crate::tools::{Services, ToolCtx, ToolRegistry};

/// Fixed apology when the iteration cap is hit.
pub const MAX_ITERATIONS_MESSAGE: &str =
    "Sorry, I could not finish that within my tool budget. Try asking in smaller steps.";

/// Returned to both the LLM and the user when the circuit breaker trips.
pub const CIRCUIT_BREAKER_MESSAGE: &str =
    "I stopped to avoid looping: the same tool kept failing.";

/// User-facing string when every provider is exhausted.
pub const PROVIDERS_EXHAUSTED_MESSAGE: &str =
    "All language-model providers are unavailable right now (quota or overload). Please try again later.";

/// Consecutive same-tool failures before the breaker trips.
const TOOL_FAILURE_LIMIT: u32 = 3;

/// Where the agent gets its LLM clients. The factory implements this; tests
/// substitute scripted sources.
#[async_trait]
pub trait ClientSource: Send + Sync {
    /// Client for a fresh request.
    async fn primary(&self) -> Option<Arc<dyn LlmClient>>;
    /// Next candidate after the given providers failed this request.
    async fn fallback(&self, failed: &[Provider]) -> Option<Arc<dyn LlmClient>>;
}

#[async_trait]
impl ClientSource for ProviderFactory {
    async fn primary(&self) -> Option<Arc<dyn LlmClient>> {
        self.primary_client().await
    }

    async fn fallback(&self, failed: &[Provider]) -> Option<Arc<dyn LlmClient>> {
        self.next_fallback(failed).await.map(|(_, client)| client)
    }
}

struct ActiveClient {
    provider: Provider,
    client: Arc<dyn LlmClient>,
    /// Selected by the fallback policy rather than primary configuration.
    /// A local model reached this way keeps later turns degraded too.
    via_fallback: bool,
}

pub struct Agent {
    clients: Arc<dyn ClientSource>,
    registry: Arc<ToolRegistry>,
    services: Arc<Services>,
    approvals: Arc<ApprovalBroker>,
    budget: BudgetTracker,
    buffer: ConversationBuffer,
    essence: String,
    max_tool_iterations: usize,
    active: tokio::sync::RwLock<Option<ActiveClient>>,
    llm_config_hash: AtomicU64,
}

impl Agent {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        clients: Arc<dyn ClientSource>,
        registry: Arc<ToolRegistry>,
        services: Arc<Services>,
        approvals: Arc<ApprovalBroker>,
        budget: BudgetTracker,
        buffer: ConversationBuffer,
        essence: String,
        max_tool_iterations: usize,
    ) -> Self {
        Self {
            clients,
            registry,
            services,
            approvals,
            budget,
            buffer,
            essence,
            max_tool_iterations,
            active: tokio::sync::RwLock::new(None),
            llm_config_hash: AtomicU64::new(0),
        }
    }

    pub fn services(&self) -> &Arc<Services> {
        &self.services
    }

    pub fn approvals(&self) -> &Arc<ApprovalBroker> {
        &self.approvals
    }

    pub fn buffer(&self) -> &ConversationBuffer {
        &self.buffer
    }

    /// Drop the cached client when the runtime LLM configuration changed;
    /// the next turn re-resolves from the factory.
    pub async fn note_llm_config(&self, hash: u64) {
        let previous = self.llm_config_hash.swap(hash, Ordering::SeqCst);
        if previous != 0 && previous != hash {
            info!("LLM configuration changed, refreshing active client");
            *self.active.write().await = None;
        }
    }

    /// A full user turn: replay the recent buffer, run the loop, append the
    /// exchange, capture any overflow as a chunk. The caller must hold the
    /// session's processing guard.
    pub async fn run_user_turn(&self, ctx: &ToolCtx, text: &str) -> Result<String> {
        let mut messages = vec![Message::system(self.build_system_prompt().await)];
        for past in self.buffer.recent(&ctx.session_id).await? {
            messages.push(Message {
                role: past.role,
                content: Some(past.content),
                tool_calls: None,
                tool_call_id: None,
            });
        }
        messages.push(Message::user(text));

        let response = self.run_loop(ctx, messages).await?;

        let evicted = self
            .buffer
            .append(
                &ctx.session_id,
                vec![
                    ("user".to_string(), text.to_string()),
                    ("assistant".to_string(), response.clone()),
                ],
            )
            .await?;
        self.buffer.persist_overflow(&ctx.session_id, &evicted).await?;

        Ok(response)
    }

    /// A system trigger (cron path): same loop, but no session mutex, no
    /// buffer replay or append, and the caller skips fact extraction.
    pub async fn run_system_trigger(&self, ctx: &ToolCtx, prompt: &str) -> Result<String> {
        let messages = vec![
            Message::system(self.build_system_prompt().await),
            Message::user(prompt),
        ];
        self.run_loop(ctx, messages).await
    }

    /// System prompt: the essence file plus active notes and today's date.
    async fn build_system_prompt(&self) -> String {
        let mut prompt = self.essence.clone();
        prompt.push_str(&format!(
            "\n\nCurrent date: {}",
            Utc::now().format("%Y-%m-%d")
        ));
        if let Ok(notes) = self.services.memory.list_notes().await {
            if !notes.is_empty() {
                prompt.push_str("\n\nActive notes:");
                for note in notes {
                    prompt.push_str(&format!("\n- {}: {}", note.key, note.content));
                }
            }
        }
        prompt
    }

    /// The loop body of §turn processing. Returns the final user-visible
    /// text; provider exhaustion and budget stops surface as fixed strings
    /// rather than errors.
    async fn run_loop(&self, ctx: &ToolCtx, mut messages: Vec<Message>) -> Result<String> {
        let mut turn_modes = TurnModes::default();
        let mut failed_providers: Vec<Provider> = Vec::new();
        let mut tool_failures: HashMap<String, u32> = HashMap::new();

        for _iteration in 0..self.max_tool_iterations {
            let Some((provider, client)) =
                self.acquire_client(&mut turn_modes, &failed_providers).await
            else {
                return Ok(PROVIDERS_EXHAUSTED_MESSAGE.to_string());
            };

            let tools = turn_modes.filter_tools(self.registry.definitions());

            let result = match client.chat(messages.clone(), Some(tools)).await {
                Ok(result) => result,
                Err(e) => {
                    let error = e.to_string();
                    if is_fallback_error(&error) {
                        warn!(provider = %provider, error = %error, "Provider failed, trying fallback");
                        failed_providers.push(provider);
                        *self.active.write().await = None;
                        continue;
                    }
                    return Err(e);
                }
            };

            if let Some(usage) = &result.usage {
                let state = self
                    .budget
                    .record(&provider.to_string(), &client.model_name(), usage)
                    .await?;
                if state == BudgetState::Exhausted {
                    return Ok(DAILY_LIMIT_MESSAGE.to_string());
                }
            }

            let Some(tool_calls) = result.tool_calls.clone() else {
                return Ok(result.content.unwrap_or_default());
            };

            messages.push(Message::assistant_with_tool_calls(
                result.content.clone(),
                tool_calls.clone(),
            ));

            for call in &tool_calls {
                let (outcome, tripped) = self
                    .run_tool_call(ctx, call, &mut turn_modes, &mut tool_failures)
                    .await;
                messages.push(Message::tool_result(call.id.clone(), outcome));
                if tripped {
                    return Ok(CIRCUIT_BREAKER_MESSAGE.to_string());
                }
            }
        }

        Ok(MAX_ITERATIONS_MESSAGE.to_string())
    }

    /// Execute one tool call: mode gate, approval gate, execution,
    /// isolation marking, failure accounting. Returns the tool-role message
    /// text and whether the circuit breaker tripped.
    async fn run_tool_call(
        &self,
        ctx: &ToolCtx,
        call: &ToolCall,
        turn_modes: &mut TurnModes,
        tool_failures: &mut HashMap<String, u32>,
    ) -> (String, bool) {
        let name = call.function.name.as_str();

        if !turn_modes.allows(name) {
            return (
                format!("[TOOL ERROR] {name} is not available in the current mode"),
                false,
            );
        }

        if self.registry.requires_approval(name) && !self.request_approval(ctx, call).await {
            return (format!("{name} was denied by the user"), false);
        }

        match self.registry.execute(ctx, name, &call.function.arguments).await {
            Ok(output) => {
                tool_failures.remove(name);
                // Anything fetched from outside may be attacker-controlled:
                // lock down the rest of the turn.
                if modes::is_untrusted_content_tool(name) {
                    turn_modes.mark_isolated();
                }
                (output, false)
            }
            Err(error) => {
                if modes::is_untrusted_content_tool(name) {
                    turn_modes.mark_isolated();
                }
                let attempt = tool_failures.entry(name.to_string()).or_insert(0);
                *attempt += 1;
                let attempt = *attempt;
                if attempt >= TOOL_FAILURE_LIMIT {
                    warn!(tool = name, "Circuit breaker tripped");
                    (CIRCUIT_BREAKER_MESSAGE.to_string(), true)
                } else {
                    (
                        format!(
                            "[TOOL ERROR] {name} failed (attempt {attempt}/{TOOL_FAILURE_LIMIT}): {error}"
                        ),
                        false,
                    )
                }
            }
        }
    }

    /// Send the approval request to the user and park until resolved,
    /// timed out, or cancelled. Everything but an explicit yes is a no.
    async fn request_approval(&self, ctx: &ToolCtx, call: &ToolCall) -> bool {
        let (id, rx) = self.approvals.start();
        self.services.notifier.send(
            ctx.chat_id,
            format!(
                "Approval needed: {} with {}\nReply /approve {} or /deny {}",
                call.function.name, call.function.arguments, id, id
            ),
        );
        self.approvals.wait(&id, rx).await
    }

    /// Resolve the client for this iteration. Keeps the previously-selected
    /// client unless it failed; lands on the fallback chain otherwise.
    /// Arriving at Ollama through fallback flips degraded mode.
    async fn acquire_client(
        &self,
        turn_modes: &mut TurnModes,
        failed: &[Provider],
    ) -> Option<(Provider, Arc<dyn LlmClient>)> {
        {
            let active = self.active.read().await;
            if let Some(a) = active.as_ref() {
                if !failed.contains(&a.provider) {
                    if a.provider == Provider::Ollama && a.via_fallback {
                        turn_modes.mark_degraded();
                    }
                    return Some((a.provider, a.client.clone()));
                }
            }
        }

        let via_fallback = !failed.is_empty();
        let client = if via_fallback {
            self.clients.fallback(failed).await?
        } else {
            self.clients.primary().await?
        };
        let provider = client.provider_type();

        if provider == Provider::Ollama && via_fallback {
            turn_modes.mark_degraded();
        }

        self.services.set_active_model(provider, client.model_name());
        *self.active.write().await = Some(ActiveClient {
            provider,
            client: client.clone(),
            via_fallback,
        });

        Some((provider, client))
    }
}
