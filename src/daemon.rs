// src/daemon.rs
// Message dispatch: transport inbound -> session registry -> agent turn ->
// notify outbound, with queued-message drain and post-turn background work.

use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{debug, error, info};

use crate::agent::{Agent, ApprovalBroker};
use crate::background;
use crate::config::Config;
use crate::llm::LlmClient;
use crate::memory::MemoryStore;
use crate::session::{QueuedMessage, Session, SessionRegistry};
use crate::tools::{Services, ToolCtx};
use crate::transport::InboundMessage;

pub struct Daemon {
    agent: Arc<Agent>,
    sessions: SessionRegistry,
    services: Arc<Services>,
    approvals: Arc<ApprovalBroker>,
    memory: Arc<MemoryStore>,
    extractor: Option<Arc<dyn LlmClient>>,
    transport_name: String,
    owner_chat_id: Option<i64>,
}

impl Daemon {
    pub fn new(
        agent: Arc<Agent>,
        memory: Arc<MemoryStore>,
        extractor: Option<Arc<dyn LlmClient>>,
        transport_name: String,
        owner_chat_id: Option<i64>,
    ) -> Self {
        let services = agent.services().clone();
        let approvals = agent.approvals().clone();
        Self {
            agent,
            sessions: SessionRegistry::new(),
            services,
            approvals,
            memory,
            extractor,
            transport_name,
            owner_chat_id,
        }
    }

    /// Consume the inbound channel until the transport closes it.
    pub async fn run(self: Arc<Self>, mut inbound: mpsc::UnboundedReceiver<InboundMessage>) {
        info!("Daemon dispatching on {}", self.transport_name);
        while let Some(message) = inbound.recv().await {
            self.handle_inbound(message).await;
        }
        info!("Inbound channel closed, daemon stopping");
    }

    pub async fn handle_inbound(self: &Arc<Self>, message: InboundMessage) {
        // Out-of-band approval callbacks resolve directly.
        if let Some(reply) = message.approval {
            self.resolve_approval(message.chat_id, &reply.approval_id, reply.approved);
            return;
        }
        // Text-command fallback for clients without buttons.
        if let Some((id, approved)) = parse_approval_command(&message.text) {
            self.resolve_approval(message.chat_id, &id, approved);
            return;
        }

        let session_id = format!("{}:{}", self.transport_name, message.chat_id);
        let session = self.sessions.get(&session_id);
        let queued = QueuedMessage {
            chat_id: message.chat_id,
            user_id: message.user_id,
            text: message.text,
            media: message.media,
        };

        // Busy session: the message queues and the in-flight turn's release
        // drain picks it up. No reply now; the typing indicator is the
        // transport's problem.
        let Some(first) = session.try_begin(queued) else {
            debug!(session = %session_id, "Turn in flight, message queued");
            return;
        };

        let daemon = self.clone();
        tokio::spawn(async move {
            daemon.run_session(session, first).await;
        });
    }

    fn resolve_approval(&self, chat_id: i64, approval_id: &str, approved: bool) {
        if self.approvals.resolve(approval_id, approved) {
            let verdict = if approved { "approved" } else { "denied" };
            self.services.notifier.send(chat_id, format!("Okay, {verdict}."));
        } else {
            self.services
                .notifier
                .send(chat_id, "That approval already expired.");
        }
    }

    /// Own the session until the queue drains: process, release, repeat.
    async fn run_session(&self, session: Arc<Session>, first: QueuedMessage) {
        let mut current = Some(first);
        while let Some(message) = current.take() {
            self.process_turn(&session.id, &message).await;
            current = session.finish();
        }
    }

    async fn process_turn(&self, session_id: &str, message: &QueuedMessage) {
        // Pick up runtime LLM reconfiguration before the turn.
        self.agent
            .note_llm_config(Config::from_env().llm_config_hash())
            .await;

        let safe_mode = self
            .owner_chat_id
            .map(|owner| message.chat_id != owner)
            .unwrap_or(false);
        let ctx = ToolCtx {
            chat_id: message.chat_id,
            session_id: session_id.to_string(),
            user_id: message.user_id,
            media: message.media.clone(),
            safe_mode,
            services: self.services.clone(),
        };

        match self.agent.run_user_turn(&ctx, &message.text).await {
            Ok(response) => {
                self.services.notifier.send(message.chat_id, response.clone());
                background::spawn_post_turn(
                    self.memory.clone(),
                    self.extractor.clone(),
                    session_id.to_string(),
                    message.text.clone(),
                    response,
                );
            }
            Err(e) => {
                error!(session = %session_id, "Turn failed: {}", e);
                self.services.notifier.send(
                    message.chat_id,
                    format!("Something went wrong on my side: {e}"),
                );
            }
        }
    }
}

/// `/approve <id>` and `/deny <id>` text commands.
fn parse_approval_command(text: &str) -> Option<(String, bool)> {
    let trimmed = text.trim();
    if let Some(id) = trimmed.strip_prefix("/approve ") {
        return Some((id.trim().to_string(), true));
    }
    if let Some(id) = trimmed.strip_prefix("/deny ") {
        return Some((id.trim().to_string(), false));
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::agent::{BudgetTracker, ClientSource};
    use crate::db::DatabasePool;
    use crate::llm::types::{Capabilities, ChatResult, Tool};
    use crate::llm::{Message, Provider};
    use crate::session::ConversationBuffer;
    use crate::tools::{register_builtin_tools, ToolRegistry};
    use crate::transport::{Notifier, OutboundMessage};
    use anyhow::Result;
    use async_trait::async_trait;
    use std::sync::RwLock;
    use std::time::Duration;

    /// Echoes the last user message; lets turn ordering be observed.
    struct EchoLlm {
        delay: Duration,
    }

    #[async_trait]
    impl crate::llm::LlmClient for EchoLlm {
        async fn chat(
            &self,
            messages: Vec<Message>,
            _tools: Option<Vec<Tool>>,
        ) -> Result<ChatResult> {
            tokio::time::sleep(self.delay).await;
            let last = messages
                .iter()
                .rev()
                .find(|m| m.role == "user")
                .and_then(|m| m.content.clone())
                .unwrap_or_default();
            Ok(ChatResult {
                request_id: "echo".into(),
                content: Some(format!("echo: {last}")),
                tool_calls: None,
                usage: None,
                stop_reason: Some("stop".into()),
                duration_ms: 0,
            })
        }

        fn capabilities(&self) -> Capabilities {
            Capabilities::default()
        }

        fn provider_type(&self) -> Provider {
            Provider::Kimi
        }

        fn model_name(&self) -> String {
            "echo".into()
        }
    }

    struct EchoSource {
        delay: Duration,
    }

    #[async_trait]
    impl ClientSource for EchoSource {
        async fn primary(&self) -> Option<Arc<dyn crate::llm::LlmClient>> {
            Some(Arc::new(EchoLlm { delay: self.delay }))
        }

        async fn fallback(
            &self,
            _failed: &[Provider],
        ) -> Option<Arc<dyn crate::llm::LlmClient>> {
            None
        }
    }

    async fn daemon(
        delay: Duration,
    ) -> (Arc<Daemon>, mpsc::UnboundedReceiver<OutboundMessage>) {
        let pool = Arc::new(DatabasePool::open_in_memory().await.unwrap());
        let memory = Arc::new(MemoryStore::new(pool.clone(), None));
        let (notifier, rx) = Notifier::channel();
        let services = Arc::new(Services {
            memory: memory.clone(),
            notifier,
            configured_providers: vec![Provider::Kimi],
            active_model: Arc::new(RwLock::new(None)),
            deployer: None,
            web_search_key: None,
        });
        let mut registry = ToolRegistry::new();
        register_builtin_tools(&mut registry);

        let agent = Arc::new(Agent::new(
            Arc::new(EchoSource { delay }),
            Arc::new(registry),
            services,
            Arc::new(ApprovalBroker::new()),
            BudgetTracker::new(pool.clone(), 0),
            ConversationBuffer::new(pool, 12),
            "essence".into(),
            20,
        ));
        let daemon = Arc::new(Daemon::new(agent, memory, None, "telegram".into(), Some(1)));
        (daemon, rx)
    }

    fn inbound(chat_id: i64, text: &str) -> InboundMessage {
        InboundMessage {
            chat_id,
            user_id: Some(1),
            text: text.into(),
            media: Vec::new(),
            approval: None,
        }
    }

    #[tokio::test]
    async fn test_turn_response_reaches_notify_channel() {
        let (daemon, mut rx) = daemon(Duration::ZERO).await;
        daemon.handle_inbound(inbound(42, "hello")).await;

        let out = rx.recv().await.unwrap();
        assert_eq!(out.chat_id, 42);
        assert_eq!(out.text, "echo: hello");
    }

    #[tokio::test]
    async fn test_mid_turn_message_queues_and_drains_in_order() {
        let (daemon, mut rx) = daemon(Duration::from_millis(100)).await;

        daemon.handle_inbound(inbound(42, "first")).await;
        // Arrives while the first turn sleeps inside the echo LLM.
        tokio::time::sleep(Duration::from_millis(10)).await;
        daemon.handle_inbound(inbound(42, "second")).await;

        let first = rx.recv().await.unwrap();
        let second = rx.recv().await.unwrap();
        assert_eq!(first.text, "echo: first");
        assert_eq!(second.text, "echo: second");
    }

    #[tokio::test]
    async fn test_sessions_process_in_parallel() {
        let (daemon, mut rx) = daemon(Duration::from_millis(50)).await;

        daemon.handle_inbound(inbound(1, "a")).await;
        daemon.handle_inbound(inbound(2, "b")).await;

        let mut texts = vec![
            rx.recv().await.unwrap().text,
            rx.recv().await.unwrap().text,
        ];
        texts.sort();
        assert_eq!(texts, vec!["echo: a", "echo: b"]);
    }

    #[tokio::test]
    async fn test_approval_command_resolution() {
        let (daemon, mut rx) = daemon(Duration::ZERO).await;
        let (id, rx_approval) = daemon.approvals.start();

        daemon
            .handle_inbound(inbound(42, &format!("/approve {id}")))
            .await;
        assert!(rx_approval.await.unwrap());
        assert!(rx.recv().await.unwrap().text.contains("approved"));

        // Unknown / expired approval
        daemon
            .handle_inbound(inbound(42, "/deny gone"))
            .await;
        assert!(rx.recv().await.unwrap().text.contains("expired"));
    }

    #[test]
    fn test_parse_approval_command() {
        assert_eq!(
            parse_approval_command("/approve abc"),
            Some(("abc".to_string(), true))
        );
        assert_eq!(
            parse_approval_command("/deny abc"),
            Some(("abc".to_string(), false))
        );
        assert_eq!(parse_approval_command("approve abc"), None);
        assert_eq!(parse_approval_command("hello"), None);
    }
}
