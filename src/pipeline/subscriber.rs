//! Lifecycle of the push subscription.
//!
//! The subscriber owns one [`EventChannel`] and walks it through
//! `Unsubscribed -> Subscribing -> Subscribed -> Unsubscribed`, with an
//! extra `Reconnecting` state when the [`ReconnectPolicy`] allows retries.
//! Inbound items are dispatched one at a time to a [`SubscriptionHandler`]
//! from [`StreamSubscriber::pump`], so handlers never run concurrently.

use std::fmt;

use async_trait::async_trait;
use tokio::time::{Instant, sleep_until};

use crate::common::{ChannelEvent, PayloadError, RawEvent, TransportError};
use crate::config::ReconnectPolicy;

/// Opaque token for an active subscription.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriptionHandle(u64);

impl SubscriptionHandle {
    pub fn new(id: u64) -> Self {
        Self(id)
    }
}

impl fmt::Display for SubscriptionHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Transport seam for a named push channel. Subscriptions start from
/// "now"; no history is replayed.
#[async_trait]
pub trait EventChannel: Send {
    async fn subscribe(&mut self, channel: &str) -> Result<SubscriptionHandle, TransportError>;

    /// Next item of the active subscription, `None` once the transport is
    /// gone. Must be cancel safe: the widget loop races it against commands.
    async fn next_event(&mut self) -> Option<ChannelEvent>;

    async fn unsubscribe(&mut self, handle: SubscriptionHandle) -> Result<(), TransportError>;
}

/// Receiver of dispatched channel items.
pub trait SubscriptionHandler {
    fn on_message(&mut self, raw: RawEvent);

    fn on_error(&mut self, error: &TransportError);

    fn on_malformed(&mut self, error: &PayloadError) {
        log::warn!("Dropping undecodable payload: {error}");
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SubscriptionState {
    Unsubscribed,
    Subscribing,
    Subscribed,
    Reconnecting { attempt: u32 },
}

pub struct StreamSubscriber<C> {
    channel: C,
    channel_name: String,
    policy: ReconnectPolicy,
    state: SubscriptionState,
    handle: Option<SubscriptionHandle>,
    /// Deadline of the pending resubscribe. Survives a cancelled `pump`.
    retry_at: Option<Instant>,
}

impl<C: EventChannel> StreamSubscriber<C> {
    pub fn new(channel: C, policy: ReconnectPolicy) -> Self {
        Self {
            channel,
            channel_name: String::new(),
            policy,
            state: SubscriptionState::Unsubscribed,
            handle: None,
            retry_at: None,
        }
    }

    pub fn state(&self) -> SubscriptionState {
        self.state
    }

    pub fn handle(&self) -> Option<SubscriptionHandle> {
        self.handle
    }

    pub fn channel(&self) -> &C {
        &self.channel
    }

    /// Subscribes to `channel_name`. Calling it again while a subscription
    /// is held returns the existing handle.
    pub async fn start(&mut self, channel_name: &str) -> Result<SubscriptionHandle, TransportError> {
        if let Some(handle) = self.handle {
            log::warn!(
                "Already subscribed to {} ({handle}); ignoring start",
                self.channel_name
            );
            return Ok(handle);
        }

        self.channel_name = channel_name.to_string();
        self.state = SubscriptionState::Subscribing;
        match self.channel.subscribe(channel_name).await {
            Ok(handle) => {
                log::info!("Subscribed to channel {channel_name} ({handle})");
                self.handle = Some(handle);
                self.state = SubscriptionState::Subscribed;
                Ok(handle)
            }
            Err(err) => {
                if self.policy.retries() {
                    self.schedule_retry(0);
                } else {
                    self.state = SubscriptionState::Unsubscribed;
                }
                Err(err)
            }
        }
    }

    /// Waits for one channel item (or one resubscribe attempt) and
    /// dispatches it. Returns `false` once the subscription is over.
    pub async fn pump<H>(&mut self, handler: &mut H) -> bool
    where
        H: SubscriptionHandler + ?Sized,
    {
        match self.state {
            SubscriptionState::Unsubscribed | SubscriptionState::Subscribing => false,
            SubscriptionState::Reconnecting { attempt } => self.reconnect(attempt, handler).await,
            SubscriptionState::Subscribed => match self.channel.next_event().await {
                Some(ChannelEvent::Payload(bytes)) => {
                    match serde_json::from_slice::<RawEvent>(&bytes) {
                        Ok(raw) => handler.on_message(raw),
                        Err(err) => handler.on_malformed(&PayloadError::from(err)),
                    }
                    true
                }
                Some(ChannelEvent::Error(err)) => {
                    handler.on_error(&err);
                    if self.policy.retries() {
                        self.schedule_retry(0);
                    }
                    true
                }
                None => {
                    log::warn!("Channel {} closed by transport", self.channel_name);
                    handler.on_error(&TransportError::Closed);
                    self.handle = None;
                    self.state = SubscriptionState::Unsubscribed;
                    false
                }
            },
        }
    }

    fn schedule_retry(&mut self, attempt: u32) {
        let delay = self.policy.delay(attempt);
        log::info!(
            "Resubscribing to {} in {delay:?} (attempt {})",
            self.channel_name,
            attempt + 1
        );
        self.state = SubscriptionState::Reconnecting { attempt };
        self.retry_at = Some(Instant::now() + delay);
    }

    async fn reconnect<H>(&mut self, attempt: u32, handler: &mut H) -> bool
    where
        H: SubscriptionHandler + ?Sized,
    {
        let delay = self.policy.delay(attempt);
        let deadline = *self.retry_at.get_or_insert_with(|| Instant::now() + delay);
        sleep_until(deadline).await;

        if let Some(stale) = self.handle.take() {
            if let Err(err) = self.channel.unsubscribe(stale).await {
                log::debug!("Releasing stale subscription {stale} failed: {err}");
            }
        }

        let resubscribed = self.channel.subscribe(&self.channel_name).await;
        self.retry_at = None;
        match resubscribed {
            Ok(handle) => {
                log::info!("Resubscribed to {} ({handle})", self.channel_name);
                self.handle = Some(handle);
                self.state = SubscriptionState::Subscribed;
                true
            }
            Err(err) => {
                handler.on_error(&err);
                let next = attempt + 1;
                if next >= self.policy.max_attempts {
                    log::error!(
                        "Giving up on {} after {next} resubscribe attempts",
                        self.channel_name
                    );
                    self.state = SubscriptionState::Unsubscribed;
                    false
                } else {
                    self.schedule_retry(next);
                    true
                }
            }
        }
    }

    /// Releases the subscription. A no-op when nothing is held.
    pub async fn stop(&mut self) -> Result<(), TransportError> {
        self.state = SubscriptionState::Unsubscribed;
        self.retry_at = None;
        let Some(handle) = self.handle.take() else {
            return Ok(());
        };
        log::info!("Unsubscribing from {} ({handle})", self.channel_name);
        self.channel.unsubscribe(handle).await
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use std::collections::VecDeque;
    use std::time::Duration;

    use super::*;

    /// Channel that replays a fixed script and records lifecycle calls.
    #[derive(Default)]
    pub(crate) struct ScriptedChannel {
        pub events: VecDeque<ChannelEvent>,
        pub subscribe_results: VecDeque<Result<(), TransportError>>,
        pub subscribed: Vec<String>,
        pub unsubscribed: Vec<SubscriptionHandle>,
        /// Pend instead of reporting closure once the script runs out.
        pub hold_open: bool,
        next_id: u64,
    }

    impl ScriptedChannel {
        pub fn with_events(events: impl IntoIterator<Item = ChannelEvent>) -> Self {
            Self {
                events: events.into_iter().collect(),
                ..Self::default()
            }
        }
    }

    #[async_trait]
    impl EventChannel for ScriptedChannel {
        async fn subscribe(&mut self, channel: &str) -> Result<SubscriptionHandle, TransportError> {
            self.subscribed.push(channel.to_string());
            self.subscribe_results.pop_front().unwrap_or(Ok(()))?;
            self.next_id += 1;
            Ok(SubscriptionHandle::new(self.next_id))
        }

        async fn next_event(&mut self) -> Option<ChannelEvent> {
            match self.events.pop_front() {
                Some(event) => Some(event),
                None if self.hold_open => std::future::pending().await,
                None => None,
            }
        }

        async fn unsubscribe(&mut self, handle: SubscriptionHandle) -> Result<(), TransportError> {
            self.unsubscribed.push(handle);
            Ok(())
        }
    }

    #[derive(Default)]
    struct Recorder {
        messages: Vec<RawEvent>,
        errors: Vec<TransportError>,
        malformed: usize,
    }

    impl SubscriptionHandler for Recorder {
        fn on_message(&mut self, raw: RawEvent) {
            self.messages.push(raw);
        }

        fn on_error(&mut self, error: &TransportError) {
            self.errors.push(error.clone());
        }

        fn on_malformed(&mut self, _error: &PayloadError) {
            self.malformed += 1;
        }
    }

    fn payload(sender: &str, message: &str, millis: i64) -> ChannelEvent {
        ChannelEvent::Payload(
            serde_json::to_vec(&RawEvent::new(sender, message, millis)).unwrap(),
        )
    }

    fn fast_retry(max_attempts: u32) -> ReconnectPolicy {
        ReconnectPolicy {
            enabled: true,
            max_attempts,
            initial_backoff_ms: 1,
            max_backoff_ms: 5,
            multiplier: 2.0,
        }
    }

    #[tokio::test]
    async fn start_moves_to_subscribed() {
        let mut subscriber =
            StreamSubscriber::new(ScriptedChannel::default(), ReconnectPolicy::disabled());
        assert_eq!(subscriber.state(), SubscriptionState::Unsubscribed);

        let handle = subscriber.start("/event/Chat").await.unwrap();
        assert_eq!(subscriber.state(), SubscriptionState::Subscribed);
        assert_eq!(subscriber.handle(), Some(handle));

        let again = subscriber.start("/event/Chat").await.unwrap();
        assert_eq!(again, handle);
        assert_eq!(subscriber.channel().subscribed.len(), 1);
    }

    #[tokio::test]
    async fn messages_are_dispatched_in_arrival_order() {
        let channel = ScriptedChannel::with_events([
            payload("U1", "first", 300),
            payload("U2", "second", 100),
            payload("U1", "third", 200),
        ]);
        let mut subscriber = StreamSubscriber::new(channel, ReconnectPolicy::disabled());
        subscriber.start("chat").await.unwrap();

        let mut recorder = Recorder::default();
        while subscriber.pump(&mut recorder).await {}

        let texts: Vec<&str> = recorder.messages.iter().map(|m| m.message.as_str()).collect();
        assert_eq!(texts, ["first", "second", "third"]);
        assert_eq!(recorder.errors, [TransportError::Closed]);
        assert_eq!(subscriber.state(), SubscriptionState::Unsubscribed);
    }

    #[tokio::test]
    async fn undecodable_payload_does_not_stop_the_stream() {
        let channel = ScriptedChannel::with_events([
            ChannelEvent::Payload(b"not json".to_vec()),
            payload("U1", "after", 0),
        ]);
        let mut subscriber = StreamSubscriber::new(channel, ReconnectPolicy::disabled());
        subscriber.start("chat").await.unwrap();

        let mut recorder = Recorder::default();
        assert!(subscriber.pump(&mut recorder).await);
        assert!(subscriber.pump(&mut recorder).await);

        assert_eq!(recorder.malformed, 1);
        assert_eq!(recorder.messages.len(), 1);
    }

    #[tokio::test]
    async fn error_without_retry_stays_subscribed() {
        let channel = ScriptedChannel::with_events([
            ChannelEvent::Error(TransportError::Channel("boom".into())),
            payload("U1", "still here", 0),
        ]);
        let mut subscriber = StreamSubscriber::new(channel, ReconnectPolicy::disabled());
        subscriber.start("chat").await.unwrap();

        let mut recorder = Recorder::default();
        assert!(subscriber.pump(&mut recorder).await);
        assert_eq!(subscriber.state(), SubscriptionState::Subscribed);
        assert_eq!(
            recorder.errors,
            [TransportError::Channel("boom".into())]
        );
        assert_eq!(subscriber.channel().subscribed.len(), 1);

        assert!(subscriber.pump(&mut recorder).await);
        assert_eq!(recorder.messages.len(), 1);
    }

    #[tokio::test]
    async fn error_with_retry_resubscribes() {
        let channel = ScriptedChannel::with_events([
            ChannelEvent::Error(TransportError::Channel("dropped".into())),
            payload("U1", "back", 0),
        ]);
        let mut subscriber = StreamSubscriber::new(channel, fast_retry(3));
        let first = subscriber.start("chat").await.unwrap();

        let mut recorder = Recorder::default();
        assert!(subscriber.pump(&mut recorder).await);
        assert_eq!(
            subscriber.state(),
            SubscriptionState::Reconnecting { attempt: 0 }
        );

        assert!(subscriber.pump(&mut recorder).await);
        assert_eq!(subscriber.state(), SubscriptionState::Subscribed);
        assert_eq!(subscriber.channel().unsubscribed, [first]);
        assert_eq!(subscriber.channel().subscribed, ["chat", "chat"]);
        assert_ne!(subscriber.handle(), Some(first));

        assert!(subscriber.pump(&mut recorder).await);
        assert_eq!(recorder.messages.len(), 1);
    }

    #[tokio::test]
    async fn retry_gives_up_after_max_attempts() {
        let mut channel =
            ScriptedChannel::with_events([ChannelEvent::Error(TransportError::Channel("x".into()))]);
        channel.subscribe_results = VecDeque::from([
            Ok(()),
            Err(TransportError::Channel("down".into())),
            Err(TransportError::Channel("down".into())),
        ]);
        let mut subscriber = StreamSubscriber::new(channel, fast_retry(2));
        subscriber.start("chat").await.unwrap();

        let mut recorder = Recorder::default();
        assert!(subscriber.pump(&mut recorder).await);
        assert!(subscriber.pump(&mut recorder).await);
        assert_eq!(
            subscriber.state(),
            SubscriptionState::Reconnecting { attempt: 1 }
        );
        assert!(!subscriber.pump(&mut recorder).await);
        assert_eq!(subscriber.state(), SubscriptionState::Unsubscribed);
        assert_eq!(recorder.errors.len(), 3);
        assert!(!subscriber.pump(&mut recorder).await);
    }

    #[tokio::test]
    async fn zero_max_attempts_never_resubscribes() {
        let channel = ScriptedChannel::with_events([
            ChannelEvent::Error(TransportError::Channel("gone".into())),
            payload("U1", "kept", 0),
        ]);
        let mut subscriber = StreamSubscriber::new(channel, fast_retry(0));
        subscriber.start("chat").await.unwrap();

        let mut recorder = Recorder::default();
        assert!(subscriber.pump(&mut recorder).await);
        assert_eq!(subscriber.state(), SubscriptionState::Subscribed);
        assert!(subscriber.pump(&mut recorder).await);
        assert_eq!(subscriber.channel().subscribed, ["chat"]);
        assert_eq!(recorder.messages.len(), 1);
    }

    #[tokio::test]
    async fn failed_start_with_zero_attempts_is_final() {
        let mut channel = ScriptedChannel::default();
        channel.subscribe_results = VecDeque::from([Err(TransportError::Channel("no".into()))]);
        let mut subscriber = StreamSubscriber::new(channel, fast_retry(0));

        assert!(subscriber.start("chat").await.is_err());
        assert_eq!(subscriber.state(), SubscriptionState::Unsubscribed);
    }

    #[tokio::test(start_paused = true)]
    async fn cancelled_pump_keeps_the_backoff_deadline() {
        let mut channel =
            ScriptedChannel::with_events([ChannelEvent::Error(TransportError::Channel("x".into()))]);
        channel.hold_open = true;
        let policy = ReconnectPolicy {
            enabled: true,
            max_attempts: 3,
            initial_backoff_ms: 1_000,
            max_backoff_ms: 1_000,
            multiplier: 2.0,
        };
        let mut subscriber = StreamSubscriber::new(channel, policy);
        subscriber.start("chat").await.unwrap();

        let mut recorder = Recorder::default();
        let begun = Instant::now();
        assert!(subscriber.pump(&mut recorder).await);

        // Interrupt the wait more often than the backoff interval.
        while subscriber.state() != SubscriptionState::Subscribed {
            tokio::select! {
                _ = subscriber.pump(&mut recorder) => {}
                _ = tokio::time::sleep(Duration::from_millis(600)) => {}
            }
            assert!(begun.elapsed() < Duration::from_secs(3));
        }
        let waited = begun.elapsed();
        assert!(waited >= Duration::from_millis(1_000));
        assert!(waited < Duration::from_millis(1_200));
        assert_eq!(subscriber.channel().subscribed, ["chat", "chat"]);
    }

    #[tokio::test]
    async fn failed_start_with_retry_recovers_on_pump() {
        let mut channel = ScriptedChannel::with_events([payload("U1", "late", 0)]);
        channel.subscribe_results =
            VecDeque::from([Err(TransportError::Channel("not yet".into())), Ok(())]);
        let mut subscriber = StreamSubscriber::new(channel, fast_retry(3));

        assert!(subscriber.start("chat").await.is_err());
        assert_eq!(
            subscriber.state(),
            SubscriptionState::Reconnecting { attempt: 0 }
        );

        let mut recorder = Recorder::default();
        assert!(subscriber.pump(&mut recorder).await);
        assert_eq!(subscriber.state(), SubscriptionState::Subscribed);
        assert!(subscriber.pump(&mut recorder).await);
        assert_eq!(recorder.messages[0].message, "late");
    }

    #[tokio::test]
    async fn stop_releases_handle_once() {
        let mut subscriber =
            StreamSubscriber::new(ScriptedChannel::default(), ReconnectPolicy::disabled());
        let handle = subscriber.start("chat").await.unwrap();

        subscriber.stop().await.unwrap();
        subscriber.stop().await.unwrap();
        assert_eq!(subscriber.channel().unsubscribed, [handle]);
        assert_eq!(subscriber.state(), SubscriptionState::Unsubscribed);

        let mut recorder = Recorder::default();
        assert!(!subscriber.pump(&mut recorder).await);
    }
}
