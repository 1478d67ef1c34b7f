use async_trait::async_trait;
use chrono::Utc;
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;

use crate::common::{ChannelEvent, OutboundMessage, RawEvent, SendError, TransportError};
use crate::pipeline::{EventChannel, MessageBackend, SubscriptionHandle};

const LOOPBACK_CAPACITY: usize = 100;

/// In-process channel pair. Everything sent through the backend half comes
/// back as an inbound payload on the channel half, the way the hosted
/// backend rebroadcasts to every subscriber including the sender.
pub fn loopback() -> (LoopbackChannel, LoopbackBackend) {
    let (sender, receiver) = mpsc::channel(LOOPBACK_CAPACITY);
    (
        LoopbackChannel {
            inbound: receiver,
            active: None,
            next_id: 0,
        },
        LoopbackBackend { sender },
    )
}

pub struct LoopbackChannel {
    inbound: mpsc::Receiver<ChannelEvent>,
    active: Option<SubscriptionHandle>,
    next_id: u64,
}

#[async_trait]
impl EventChannel for LoopbackChannel {
    async fn subscribe(&mut self, channel: &str) -> Result<SubscriptionHandle, TransportError> {
        // The first subscription starts from now. A resubscribe keeps what
        // the transport queued in between.
        if self.next_id == 0 {
            let mut stale = 0;
            while self.inbound.try_recv().is_ok() {
                stale += 1;
            }
            if stale > 0 {
                log::debug!("Discarded {stale} events queued before subscribing to {channel}");
            }
        }

        self.next_id += 1;
        let handle = SubscriptionHandle::new(self.next_id);
        self.active = Some(handle);
        Ok(handle)
    }

    async fn next_event(&mut self) -> Option<ChannelEvent> {
        self.inbound.recv().await
    }

    async fn unsubscribe(&mut self, handle: SubscriptionHandle) -> Result<(), TransportError> {
        if self.active != Some(handle) {
            return Err(TransportError::Unsubscribe {
                reason: format!("unknown subscription {handle}"),
            });
        }
        self.active = None;
        Ok(())
    }
}

#[derive(Clone)]
pub struct LoopbackBackend {
    sender: mpsc::Sender<ChannelEvent>,
}

impl LoopbackBackend {
    /// Pushes a raw event onto the channel as if another client had sent it.
    pub fn deliver(&self, raw: &RawEvent) -> Result<(), SendError> {
        let payload = serde_json::to_vec(raw).map_err(|err| SendError::Encode(err.to_string()))?;
        self.inject(ChannelEvent::Payload(payload))
    }

    /// Pushes an arbitrary channel item, including transport errors.
    pub fn inject(&self, event: ChannelEvent) -> Result<(), SendError> {
        self.sender.try_send(event).map_err(|err| match err {
            TrySendError::Full(_) => SendError::Broadcast("loopback buffer full".into()),
            TrySendError::Closed(_) => SendError::Broadcast("loopback channel closed".into()),
        })
    }
}

#[async_trait]
impl MessageBackend for LoopbackBackend {
    async fn send_message(&self, outbound: &OutboundMessage) -> Result<(), SendError> {
        let raw = RawEvent::new(
            outbound.sender.clone(),
            outbound.message.clone(),
            Utc::now().timestamp_millis(),
        );
        self.deliver(&raw)
    }
}
