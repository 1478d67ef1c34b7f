//! Real-time chat message pipeline: push subscription, canonical message
//! store, allowlist sanitizer and publisher.

pub mod common;
pub mod config;
pub mod network;
pub mod pipeline;
pub mod widget;
