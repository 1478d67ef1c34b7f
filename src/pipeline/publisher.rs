use async_trait::async_trait;

use crate::common::{NotificationSink, OutboundMessage, SendError, Severity};

use super::sanitizer::sanitize;

/// Remote operation that persists and broadcasts an outbound message.
#[async_trait]
pub trait MessageBackend: Send + Sync {
    async fn send_message(&self, outbound: &OutboundMessage) -> Result<(), SendError>;
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SubmitOutcome {
    /// Input was blank; nothing was sent.
    Skipped,
    /// Backend accepted the sanitized text.
    Sent(String),
    Failed(SendError),
}

/// Owns the compose buffer and sends its contents to the backend.
///
/// Sent messages are not echoed into the store; they are expected to come
/// back through the subscription like any other message.
pub struct Publisher<B> {
    backend: B,
    sender_id: String,
    compose: String,
    notifier: Box<dyn NotificationSink>,
}

impl<B: MessageBackend> Publisher<B> {
    pub fn new(backend: B, sender_id: impl Into<String>, notifier: Box<dyn NotificationSink>) -> Self {
        Self {
            backend,
            sender_id: sender_id.into(),
            compose: String::new(),
            notifier,
        }
    }

    pub fn compose(&self) -> &str {
        &self.compose
    }

    pub fn set_compose(&mut self, text: impl Into<String>) {
        self.compose = text.into();
    }

    pub fn backend(&self) -> &B {
        &self.backend
    }

    /// Submits whatever is currently in the compose buffer.
    pub async fn send_compose(&mut self) -> SubmitOutcome {
        let text = self.compose.clone();
        self.submit(&text).await
    }

    /// Sanitizes `raw_text` and sends it. The compose buffer is cleared on
    /// success and left untouched otherwise so the user can retry.
    pub async fn submit(&mut self, raw_text: &str) -> SubmitOutcome {
        if raw_text.trim().is_empty() {
            log::debug!("Ignoring blank submit");
            return SubmitOutcome::Skipped;
        }

        let outbound = OutboundMessage {
            sender: self.sender_id.clone(),
            message: sanitize(raw_text),
        };
        log::debug!("Sending message as {}: {}", outbound.sender, outbound.message);

        match self.backend.send_message(&outbound).await {
            Ok(()) => {
                log::info!("Message sent successfully");
                self.compose.clear();
                SubmitOutcome::Sent(outbound.message)
            }
            Err(err) => {
                log::warn!("Error sending message: {err}");
                self.notifier
                    .notify("Error sending message", &err.to_string(), Severity::Error);
                SubmitOutcome::Failed(err)
            }
        }
    }
}
