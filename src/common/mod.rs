pub mod commands;
pub mod errors;
pub mod events;
pub mod sinks;
pub mod types;

pub use commands::WidgetCommand;
pub use errors::{ConfigError, PayloadError, SendError, TransportError};
pub use events::ChannelEvent;
pub use sinks::{ErrorSink, LogSink, NotificationSink, Severity};
pub use types::{Alignment, ChatMessage, OutboundMessage, RawEvent};
