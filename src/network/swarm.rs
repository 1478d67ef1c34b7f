use std::collections::hash_map::DefaultHasher;
use std::error::Error;
use std::hash::{Hash, Hasher};
use std::time::Duration;

use libp2p::core::muxing::StreamMuxerBox;
use libp2p::core::transport::Boxed;
use libp2p::core::upgrade::Version;
use libp2p::gossipsub;
use libp2p::multiaddr::Protocol;
use libp2p::swarm::{Config as SwarmConfig, NetworkBehaviour};
use libp2p::{Multiaddr, PeerId, Swarm, Transport, identity, noise, tcp, yamux};

const HEARTBEAT_INTERVAL: Duration = Duration::from_secs(5);
const IDLE_CONNECTION_TIMEOUT: Duration = Duration::from_secs(60);
const MAX_PAYLOAD_BYTES: usize = 64 * 1024;

#[derive(NetworkBehaviour)]
pub struct ChannelBehavior {
    pub gossipsub: gossipsub::Behaviour,
}

impl ChannelBehavior {
    fn new(local_key: &identity::Keypair) -> Result<Self, Box<dyn Error>> {
        let config = gossipsub::ConfigBuilder::default()
            .heartbeat_interval(HEARTBEAT_INTERVAL)
            .max_transmit_size(MAX_PAYLOAD_BYTES)
            .validation_mode(gossipsub::ValidationMode::Strict)
            .message_id_fn(content_id)
            .build()?;
        let gossipsub = gossipsub::Behaviour::new(
            gossipsub::MessageAuthenticity::Signed(local_key.clone()),
            config,
        )?;
        Ok(Self { gossipsub })
    }
}

/// Same topic and same bytes means same message. Payloads carry the sender
/// and a millisecond timestamp, so only true duplicates collide.
fn content_id(message: &gossipsub::Message) -> gossipsub::MessageId {
    let mut hasher = DefaultHasher::new();
    message.topic.hash(&mut hasher);
    message.data.hash(&mut hasher);
    gossipsub::MessageId::from(format!("{:016x}", hasher.finish()))
}

/// TCP, secured with noise and multiplexed with yamux.
fn encrypted_tcp(
    local_key: &identity::Keypair,
) -> Result<Boxed<(PeerId, StreamMuxerBox)>, Box<dyn Error>> {
    let noise = noise::Config::new(local_key)?;
    Ok(tcp::tokio::Transport::new(tcp::Config::default().nodelay(true))
        .upgrade(Version::V1)
        .authenticate(noise)
        .multiplex(yamux::Config::default())
        .boxed())
}

/// Builds a swarm with a fresh identity, listening on `listen_addr`.
pub fn build_swarm(listen_addr: &str) -> Result<Swarm<ChannelBehavior>, Box<dyn Error>> {
    let listen_addr: Multiaddr = listen_addr.parse()?;
    let local_key = identity::Keypair::generate_ed25519();
    let local_peer_id = local_key.public().to_peer_id();

    let mut swarm = Swarm::new(
        encrypted_tcp(&local_key)?,
        ChannelBehavior::new(&local_key)?,
        local_peer_id,
        SwarmConfig::with_tokio_executor().with_idle_connection_timeout(IDLE_CONNECTION_TIMEOUT),
    );
    swarm.listen_on(listen_addr)?;
    log::info!("Gossip node {local_peer_id} created");

    Ok(swarm)
}

/// Splits `/ip4/../tcp/../p2p/<PeerId>` into the peer and its dial address.
fn split_peer_addr(entry: &str) -> Result<(PeerId, Multiaddr), String> {
    let mut addr: Multiaddr = entry.parse().map_err(|err| format!("invalid multiaddr: {err}"))?;
    match addr.pop() {
        Some(Protocol::P2p(peer_id)) => Ok((peer_id, addr)),
        _ => Err("missing /p2p/<PeerId> suffix".to_string()),
    }
}

/// Bootstrap entries that name a peer. Bad entries are logged and skipped.
pub fn parse_bootstrap_peers(entries: &[String]) -> Vec<(PeerId, Multiaddr)> {
    entries
        .iter()
        .filter_map(|entry| {
            split_peer_addr(entry)
                .inspect_err(|reason| log::warn!("Skipping bootstrap entry `{entry}`: {reason}"))
                .ok()
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn split_explains_rejections() {
        assert!(split_peer_addr("/ip4/10.0.0.2/tcp/4001").unwrap_err().contains("/p2p/"));
        assert!(split_peer_addr("nope").unwrap_err().starts_with("invalid multiaddr"));
    }

    #[test]
    fn bootstrap_entries_need_peer_suffix() {
        let peer = PeerId::from(identity::Keypair::generate_ed25519().public());
        let entries = vec![
            format!("/ip4/10.0.0.1/tcp/4001/p2p/{peer}"),
            "/ip4/10.0.0.2/tcp/4001".to_string(),
            "not an address".to_string(),
        ];

        let peers = parse_bootstrap_peers(&entries);
        assert_eq!(peers.len(), 1);
        assert_eq!(peers[0].0, peer);
        assert_eq!(peers[0].1, "/ip4/10.0.0.1/tcp/4001".parse::<Multiaddr>().unwrap());
    }
}
