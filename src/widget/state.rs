use crate::common::{ChatMessage, ErrorSink, PayloadError, RawEvent, TransportError};
use crate::pipeline::{InboundPolicy, MessageStore, SubscriptionHandler, normalize};

use super::session::SessionContext;

/// Inbound half of the widget: turns dispatched payloads into stored
/// messages and forwards failures to the error sink.
pub struct WidgetState {
    session: SessionContext,
    store: MessageStore,
    policy: InboundPolicy,
    errors: Box<dyn ErrorSink>,
}

impl WidgetState {
    pub fn new(session: SessionContext, policy: InboundPolicy, errors: Box<dyn ErrorSink>) -> Self {
        Self {
            session,
            store: MessageStore::new(),
            policy,
            errors,
        }
    }

    pub fn session(&self) -> &SessionContext {
        &self.session
    }

    pub fn messages(&self) -> &[ChatMessage] {
        self.store.snapshot()
    }

    pub fn report(&self, error: &TransportError) {
        self.errors.report(error);
    }
}

impl SubscriptionHandler for WidgetState {
    fn on_message(&mut self, raw: RawEvent) {
        let message = normalize(raw, self.session.self_id(), self.policy);
        log::debug!(
            "Received message from {} at {}",
            message.sender(),
            message.display_time()
        );
        self.store.append(message);
    }

    fn on_error(&mut self, error: &TransportError) {
        log::error!("Streaming error: {error}");
        self.errors.report(error);
    }

    fn on_malformed(&mut self, error: &PayloadError) {
        log::warn!("Dropping undecodable payload: {error}");
        self.errors.report(error);
    }
}
