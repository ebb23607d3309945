// src/transport/mod.rs
// Chat transport boundary: the daemon core only knows how to start a
// transport, push text at a chat id, and receive approval callbacks.

pub mod telegram;

use async_trait::async_trait;
use tokio::sync::mpsc;

/// An outbound message on the notify channel.
#[derive(Debug, Clone)]
pub struct OutboundMessage {
    pub chat_id: i64,
    pub text: String,
}

/// Cloneable sender half of the notify channel. Tool handlers, the cron
/// runner, and the queued-message drain all push through this; the
/// transport task owns the receiving end.
#[derive(Clone)]
pub struct Notifier {
    tx: mpsc::UnboundedSender<OutboundMessage>,
}

impl Notifier {
    pub fn channel() -> (Self, mpsc::UnboundedReceiver<OutboundMessage>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }

    /// Queue a message for delivery. Errors only when the transport is
    /// gone, which means the daemon is shutting down; drop silently.
    pub fn send(&self, chat_id: i64, text: impl Into<String>) {
        let _ = self.tx.send(OutboundMessage {
            chat_id,
            text: text.into(),
        });
    }
}

/// An inbound chat message handed to the daemon.
#[derive(Debug, Clone)]
pub struct InboundMessage {
    pub chat_id: i64,
    pub user_id: Option<i64>,
    pub text: String,
    /// Attached media references (file ids / URLs), passed through to tools.
    pub media: Vec<String>,
    /// Approval callback payload (`approve:<id>` / `deny:<id>`), when the
    /// transport delivered a button press instead of text.
    pub approval: Option<ApprovalReply>,
}

/// A resolved approval button press.
#[derive(Debug, Clone)]
pub struct ApprovalReply {
    pub approval_id: String,
    pub approved: bool,
}

/// Long-poll chat transport. Implementations deliver inbound messages to
/// the handler the daemon installs and drain the notify channel.
#[async_trait]
pub trait Transport: Send + Sync {
    /// Transport name for session ids ("telegram").
    fn name(&self) -> &'static str;

    /// Run the long-poll loop until the process shuts down.
    async fn start(
        self: std::sync::Arc<Self>,
        inbound: mpsc::UnboundedSender<InboundMessage>,
        outbound: mpsc::UnboundedReceiver<OutboundMessage>,
    ) -> anyhow::Result<()>;
}
