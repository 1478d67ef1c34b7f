use thiserror::Error;

/// Failure of the push channel itself.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TransportError {
    #[error("failed to subscribe to {channel}: {reason}")]
    Subscribe { channel: String, reason: String },

    #[error("channel error: {0}")]
    Channel(String),

    #[error("failed to unsubscribe: {reason}")]
    Unsubscribe { reason: String },

    #[error("channel closed")]
    Closed,
}

/// Failure of an outbound send call.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SendError {
    #[error("backend rejected message (status {status}): {body}")]
    Rejected { status: u16, body: String },

    #[error("backend unreachable: {0}")]
    Unreachable(String),

    #[error("failed to encode message: {0}")]
    Encode(String),

    #[error("broadcast failed: {0}")]
    Broadcast(String),
}

/// Payload bytes that could not be decoded at all.
#[derive(Debug, Error)]
pub enum PayloadError {
    #[error("payload is not valid JSON: {0}")]
    Decode(#[from] serde_json::Error),
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read or write config: {0}")]
    Io(#[from] std::io::Error),

    #[error("failed to parse config: {0}")]
    Parse(#[from] serde_json::Error),
}
