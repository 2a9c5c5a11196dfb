pub mod processor;
pub mod signature;

pub use processor::{WebhookAck, WebhookProcessor};

/// Inbound payloads larger than this are rejected before parsing.
pub const MAX_BODY_BYTES: usize = 64 * 1024;
