pub mod normalizer;
pub mod publisher;
pub mod sanitizer;
pub mod store;
pub mod subscriber;

pub use normalizer::{InboundPolicy, normalize};
pub use publisher::{MessageBackend, Publisher, SubmitOutcome};
pub use sanitizer::sanitize;
pub use store::MessageStore;
pub use subscriber::{
    EventChannel, StreamSubscriber, SubscriptionHandle, SubscriptionHandler, SubscriptionState,
};
