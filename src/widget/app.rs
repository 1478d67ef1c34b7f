use tokio::sync::mpsc;

use crate::common::{ChatMessage, ErrorSink, LogSink, NotificationSink, WidgetCommand};
use crate::config::AppConfig;
use crate::pipeline::{
    EventChannel, InboundPolicy, MessageBackend, Publisher, StreamSubscriber, SubmitOutcome,
    SubscriptionState,
};

use super::session::SessionContext;
use super::state::WidgetState;

/// External surfaces the widget reports to.
pub struct WidgetSinks {
    pub errors: Box<dyn ErrorSink>,
    pub notifications: Box<dyn NotificationSink>,
}

impl Default for WidgetSinks {
    fn default() -> Self {
        Self {
            errors: Box::new(LogSink),
            notifications: Box::new(LogSink),
        }
    }
}

/// One chat widget instance: subscription, message store and publisher,
/// all owned by a single task.
pub struct ChatWidget<C, B> {
    state: WidgetState,
    subscriber: StreamSubscriber<C>,
    publisher: Publisher<B>,
}

impl<C, B> ChatWidget<C, B>
where
    C: EventChannel,
    B: MessageBackend,
{
    /// Builds the widget and subscribes to the configured channel. A failed
    /// subscription is reported, not returned: the widget still comes up.
    pub async fn activate(
        config: &AppConfig,
        session: SessionContext,
        channel: C,
        backend: B,
        sinks: WidgetSinks,
    ) -> Self {
        let publisher = Publisher::new(backend, session.self_id(), sinks.notifications);
        let state = WidgetState::new(
            session,
            InboundPolicy::from_flag(config.sanitize_inbound),
            sinks.errors,
        );
        let mut widget = Self {
            state,
            subscriber: StreamSubscriber::new(channel, config.reconnect.clone()),
            publisher,
        };

        log::info!(
            "Activating chat widget as {}",
            widget.state.session().self_id()
        );
        if let Err(err) = widget.subscriber.start(&config.channel_name).await {
            log::error!("Subscription to {} failed: {err}", config.channel_name);
            widget.state.report(&err);
        }
        widget
    }

    pub fn session(&self) -> &SessionContext {
        self.state.session()
    }

    /// Messages in arrival order.
    pub fn messages(&self) -> &[ChatMessage] {
        self.state.messages()
    }

    pub fn compose(&self) -> &str {
        self.publisher.compose()
    }

    pub fn set_compose(&mut self, text: impl Into<String>) {
        self.publisher.set_compose(text);
    }

    pub fn subscription_state(&self) -> SubscriptionState {
        self.subscriber.state()
    }

    pub fn channel(&self) -> &C {
        self.subscriber.channel()
    }

    pub fn backend(&self) -> &B {
        self.publisher.backend()
    }

    pub async fn submit(&mut self, raw_text: &str) -> SubmitOutcome {
        self.publisher.submit(raw_text).await
    }

    pub async fn send_compose(&mut self) -> SubmitOutcome {
        self.publisher.send_compose().await
    }

    /// Processes one inbound item. Returns `false` once the subscription
    /// has ended.
    pub async fn pump(&mut self) -> bool {
        self.subscriber.pump(&mut self.state).await
    }

    /// Drives the widget until a teardown command arrives or the command
    /// channel closes. `render` sees each new message once, in order.
    /// The subscription is released before returning.
    pub async fn run<F>(&mut self, mut commands: mpsc::Receiver<WidgetCommand>, mut render: F)
    where
        F: FnMut(&ChatMessage),
    {
        let mut rendered = 0;
        let mut live = self.subscriber.state() != SubscriptionState::Unsubscribed;

        loop {
            tokio::select! {
                biased;
                alive = self.subscriber.pump(&mut self.state), if live => {
                    if !alive {
                        log::warn!("Subscription ended; sends are still accepted");
                    }
                    live = alive;
                }
                command = commands.recv() => match command {
                    Some(WidgetCommand::Compose(text)) => self.publisher.set_compose(text),
                    Some(WidgetCommand::Send) => {
                        let outcome = self.publisher.send_compose().await;
                        log::debug!("Submit finished: {outcome:?}");
                    }
                    Some(WidgetCommand::Teardown) | None => break,
                },
            }

            let snapshot = self.state.messages();
            for message in &snapshot[rendered..] {
                render(message);
            }
            rendered = snapshot.len();
        }

        self.teardown().await;
    }

    /// Releases the subscription. Must run on every deactivation path;
    /// calling it twice is harmless.
    pub async fn teardown(&mut self) {
        if let Err(err) = self.subscriber.stop().await {
            log::warn!("Unsubscribe failed during teardown: {err}");
            self.state.report(&err);
        }
        log::info!(
            "Chat widget for {} deactivated",
            self.state.session().self_id()
        );
    }
}
