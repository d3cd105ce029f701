//! Signaling transport seam.
//!
//! The transport is a reliable user-to-user messaging channel shared with
//! external code and outliving the engine. It delivers payloads verbatim,
//! at most once, in order.

use async_trait::async_trait;
use tokio::sync::broadcast;

use crate::errors::Result;

/// The single capability the engine needs from the signaling plane.
#[async_trait]
pub trait SignalingTransport: Send + Sync {
    /// Deliver `payload` to the user addressed by `to`. Resolving means the
    /// transport accepted the message; failures surface to the application
    /// as `call_error(SendMessageFail, Message, …)`.
    async fn send_message(&self, to: &str, payload: &str) -> Result<()>;

    /// Subscribe to inbound payloads addressed to the local user.
    fn incoming(&self) -> broadcast::Receiver<String>;
}
