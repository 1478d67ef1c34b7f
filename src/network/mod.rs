pub mod http;
pub mod loopback;
pub mod node;
pub mod swarm;

pub use http::HttpBackend;
pub use loopback::{LoopbackBackend, LoopbackChannel, loopback};
pub use node::{GossipBroadcaster, GossipChannel, GossipNode};
