use crate::common::errors::TransportError;

/// Item produced by an event channel.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChannelEvent {
    Payload(Vec<u8>),
    Error(TransportError),
}
