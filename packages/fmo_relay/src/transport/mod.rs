//! Publish/subscribe transport.
//!
//! Submodules:
//! - `mqtt`: rumqttc client, event loop and inbound delivery
//!
//! The relay core only sees the [`Publisher`] trait.

use bytes::Bytes;

pub mod mqtt;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum PublishError {
    #[error("transport is shut down")]
    Closed,

    #[error("publish rejected: {0}")]
    Rejected(String),
}

/// Outbound half of the transport.
///
/// `publish` does not wait for broker acknowledgment. It may wait for room in
/// the transport's outgoing queue, so callers must not hold the buffer lock.
pub trait Publisher: Send + Sync {
    fn publish(
        &self,
        topic: &str,
        payload: Bytes,
    ) -> impl Future<Output = Result<(), PublishError>> + Send;
}
