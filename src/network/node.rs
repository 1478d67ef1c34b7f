use std::collections::HashSet;

use async_trait::async_trait;
use chrono::Utc;
use futures::StreamExt;
use libp2p::gossipsub::{self, IdentTopic, TopicHash};
use libp2p::multiaddr::Protocol;
use libp2p::swarm::SwarmEvent;
use libp2p::Swarm;
use tokio::sync::mpsc::error::TrySendError;
use tokio::sync::{mpsc, oneshot};

use crate::common::{ChannelEvent, OutboundMessage, RawEvent, SendError, TransportError};
use crate::config::AppConfig;
use crate::pipeline::{EventChannel, MessageBackend, SubscriptionHandle};

use super::swarm::{ChannelBehavior, ChannelBehaviorEvent, build_swarm, parse_bootstrap_peers};

const COMMAND_CAPACITY: usize = 100;
const INBOUND_CAPACITY: usize = 1024;

enum NodeCommand {
    Subscribe {
        topic: String,
        reply: oneshot::Sender<Result<(), TransportError>>,
    },
    Unsubscribe {
        topic: String,
    },
    Publish {
        topic: String,
        payload: Vec<u8>,
        reply: oneshot::Sender<Result<(), SendError>>,
    },
}

/// Background task that owns the libp2p swarm. Channel names map one to
/// one onto gossipsub topics.
pub struct GossipNode {
    command_receiver: mpsc::Receiver<NodeCommand>,
    event_sender: mpsc::Sender<ChannelEvent>,
    topics: HashSet<TopicHash>,
}

impl GossipNode {
    /// Builds the swarm, dials the bootstrap peers and spawns the event
    /// loop. The loop stops once both returned halves are dropped.
    pub fn start(config: &AppConfig) -> Result<(GossipChannel, GossipBroadcaster), TransportError> {
        let mut swarm = build_swarm(&config.listen_addr).map_err(|err| {
            TransportError::Channel(format!("failed to start gossip node: {err}"))
        })?;

        let bootstrap_peers = parse_bootstrap_peers(&config.bootstrap_nodes);
        if bootstrap_peers.is_empty() {
            log::warn!("No bootstrap peers configured; waiting for inbound connections");
        }
        for (peer_id, addr) in bootstrap_peers {
            log::info!("Dialing bootstrap peer {peer_id} at {addr}");
            if let Err(err) = swarm.dial(addr.with(Protocol::P2p(peer_id))) {
                log::warn!("Failed to dial bootstrap peer {peer_id}: {err}");
            }
        }

        let (command_sender, command_receiver) = mpsc::channel(COMMAND_CAPACITY);
        let (event_sender, event_receiver) = mpsc::channel(INBOUND_CAPACITY);
        let node = Self {
            command_receiver,
            event_sender,
            topics: HashSet::new(),
        };
        tokio::spawn(node.run(swarm));

        Ok((
            GossipChannel {
                commands: command_sender.clone(),
                inbound: event_receiver,
                active: None,
                next_id: 0,
            },
            GossipBroadcaster {
                commands: command_sender,
                topic: config.channel_name.clone(),
            },
        ))
    }

    async fn run(mut self, mut swarm: Swarm<ChannelBehavior>) {
        log::info!("Gossip event loop started");

        loop {
            tokio::select! {
                command = self.command_receiver.recv() => {
                    match command {
                        Some(command) => self.handle_command(command, &mut swarm),
                        None => break,
                    }
                }
                event = swarm.select_next_some() => {
                    self.handle_swarm_event(event, &mut swarm);
                }
            }
        }

        log::info!("Gossip event loop stopped");
    }

    fn handle_command(&mut self, command: NodeCommand, swarm: &mut Swarm<ChannelBehavior>) {
        match command {
            NodeCommand::Subscribe { topic, reply } => {
                let ident = IdentTopic::new(topic.clone());
                let result = match swarm.behaviour_mut().gossipsub.subscribe(&ident) {
                    Ok(_) => {
                        log::info!("Joined gossip topic {topic}");
                        self.topics.insert(ident.hash());
                        Ok(())
                    }
                    Err(err) => Err(TransportError::Subscribe {
                        channel: topic,
                        reason: format!("{err:?}"),
                    }),
                };
                let _ = reply.send(result);
            }
            NodeCommand::Unsubscribe { topic } => {
                let ident = IdentTopic::new(topic.clone());
                self.topics.remove(&ident.hash());
                let _ = swarm.behaviour_mut().gossipsub.unsubscribe(&ident);
                log::info!("Left gossip topic {topic}");
            }
            NodeCommand::Publish {
                topic,
                payload,
                reply,
            } => {
                let ident = IdentTopic::new(topic);
                match swarm
                    .behaviour_mut()
                    .gossipsub
                    .publish(ident.clone(), payload.clone())
                {
                    Ok(_) => {
                        let _ = reply.send(Ok(()));
                        // Gossipsub never hands a node its own messages.
                        if self.topics.contains(&ident.hash()) {
                            self.deliver(ChannelEvent::Payload(payload));
                        }
                    }
                    Err(err) => {
                        log::warn!("Publish error: {err:?}");
                        let _ = reply.send(Err(SendError::Broadcast(format!("{err:?}"))));
                    }
                }
            }
        }
    }

    fn handle_swarm_event(
        &mut self,
        event: SwarmEvent<ChannelBehaviorEvent>,
        swarm: &mut Swarm<ChannelBehavior>,
    ) {
        match event {
            SwarmEvent::Behaviour(ChannelBehaviorEvent::Gossipsub(gossipsub::Event::Message {
                message,
                ..
            })) => {
                if self.topics.contains(&message.topic) {
                    self.deliver(ChannelEvent::Payload(message.data));
                }
            }
            SwarmEvent::Behaviour(ChannelBehaviorEvent::Gossipsub(
                gossipsub::Event::Subscribed { peer_id, topic },
            )) => {
                log::debug!("Peer {peer_id} joined {topic}");
            }
            SwarmEvent::NewListenAddr { address, .. } => {
                log::info!("Listening on {address}");
            }
            SwarmEvent::ConnectionEstablished { peer_id, .. } => {
                log::info!("Connected to {peer_id}");
                swarm.behaviour_mut().gossipsub.add_explicit_peer(&peer_id);
            }
            SwarmEvent::ConnectionClosed { peer_id, .. } => {
                log::info!("Connection to {peer_id} closed");
            }
            SwarmEvent::OutgoingConnectionError { peer_id, error, .. } => {
                // One unreachable peer does not break the topic subscription.
                log::warn!("Outgoing connection to {peer_id:?} failed: {error}");
            }
            SwarmEvent::ListenerError { error, .. } => {
                log::error!("Listener error: {error}");
                self.deliver(ChannelEvent::Error(TransportError::Channel(format!(
                    "listener error: {error}"
                ))));
            }
            _ => {}
        }
    }

    /// Forwards an item to the channel half without blocking the swarm.
    fn deliver(&self, event: ChannelEvent) {
        match self.event_sender.try_send(event) {
            Ok(()) => {}
            Err(TrySendError::Full(_)) => {
                log::warn!("Inbound buffer full; dropping channel event");
            }
            Err(TrySendError::Closed(_)) => {
                log::debug!("Channel half dropped; discarding event");
            }
        }
    }
}

/// Inbound half of a [`GossipNode`].
pub struct GossipChannel {
    commands: mpsc::Sender<NodeCommand>,
    inbound: mpsc::Receiver<ChannelEvent>,
    active: Option<(SubscriptionHandle, String)>,
    next_id: u64,
}

#[async_trait]
impl EventChannel for GossipChannel {
    async fn subscribe(&mut self, channel: &str) -> Result<SubscriptionHandle, TransportError> {
        if self.next_id == 0 {
            while self.inbound.try_recv().is_ok() {}
        }

        let (reply, response) = oneshot::channel();
        self.commands
            .send(NodeCommand::Subscribe {
                topic: channel.to_string(),
                reply,
            })
            .await
            .map_err(|_| TransportError::Closed)?;
        response.await.map_err(|_| TransportError::Closed)??;

        self.next_id += 1;
        let handle = SubscriptionHandle::new(self.next_id);
        self.active = Some((handle, channel.to_string()));
        Ok(handle)
    }

    async fn next_event(&mut self) -> Option<ChannelEvent> {
        self.inbound.recv().await
    }

    async fn unsubscribe(&mut self, handle: SubscriptionHandle) -> Result<(), TransportError> {
        let topic = match self.active.take() {
            Some((active, topic)) if active == handle => topic,
            other => {
                self.active = other;
                return Err(TransportError::Unsubscribe {
                    reason: format!("unknown subscription {handle}"),
                });
            }
        };
        self.commands
            .send(NodeCommand::Unsubscribe { topic })
            .await
            .map_err(|_| TransportError::Unsubscribe {
                reason: "gossip node stopped".into(),
            })
    }
}

/// Outbound half of a [`GossipNode`]: publishes straight onto the topic.
#[derive(Clone)]
pub struct GossipBroadcaster {
    commands: mpsc::Sender<NodeCommand>,
    topic: String,
}

#[async_trait]
impl MessageBackend for GossipBroadcaster {
    async fn send_message(&self, outbound: &OutboundMessage) -> Result<(), SendError> {
        let raw = RawEvent::new(
            outbound.sender.clone(),
            outbound.message.clone(),
            Utc::now().timestamp_millis(),
        );
        let payload = serde_json::to_vec(&raw).map_err(|err| SendError::Encode(err.to_string()))?;

        let (reply, response) = oneshot::channel();
        self.commands
            .send(NodeCommand::Publish {
                topic: self.topic.clone(),
                payload,
                reply,
            })
            .await
            .map_err(|_| SendError::Broadcast("gossip node stopped".into()))?;
        response
            .await
            .map_err(|_| SendError::Broadcast("gossip node stopped".into()))?
    }
}
