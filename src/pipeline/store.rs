use crate::common::ChatMessage;

/// Append-only log of canonical messages in arrival order.
#[derive(Debug, Default)]
pub struct MessageStore {
    messages: Vec<ChatMessage>,
}

impl MessageStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn append(&mut self, message: ChatMessage) {
        self.messages.push(message);
    }

    /// Read-only view for the render surface.
    pub fn snapshot(&self) -> &[ChatMessage] {
        &self.messages
    }

    pub fn len(&self) -> usize {
        self.messages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }
}
