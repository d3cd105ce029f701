//! Signaling envelope and codec.
//!
//! The envelope is serialized as a self-describing JSON string with stable
//! keys; both peers must run the same codec version. The codec also owns the
//! identity of the pending call: a UUID assigned by the caller, adopted by
//! the callee from the initial invite, and stamped onto every outbound
//! message until teardown.

use serde::{Deserialize, Serialize};
use std::sync::Mutex;
use uuid::Uuid;

use crate::errors::Result;
use crate::types::{SignalOrigin, UserId};

/// Signaling actions carried by the envelope.
#[derive(Debug, Clone, Copy, Hash, Eq, PartialEq, Serialize, Deserialize)]
pub enum CallAction {
    VideoCall,
    AudioCall,
    Accept,
    Reject,
    Cancel,
    Hangup,
}

/// The call-control message exchanged over the signaling plane.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CallMessage {
    #[serde(rename = "callId")]
    pub call_id: String,
    #[serde(rename = "fromUserId")]
    pub from_user_id: UserId,
    #[serde(rename = "remoteUserId")]
    pub remote_user_id: UserId,
    #[serde(rename = "fromRoomId", default, skip_serializing_if = "Option::is_none")]
    pub from_room_id: Option<String>,
    #[serde(rename = "message_action")]
    pub action: CallAction,
    #[serde(rename = "rejectReason", default, skip_serializing_if = "Option::is_none")]
    pub reject_reason: Option<String>,
    #[serde(rename = "rejectByInternal", default)]
    pub reject_by_internal: SignalOrigin,
    #[serde(rename = "cancelCallByInternal", default)]
    pub cancel_call_by_internal: SignalOrigin,
}

impl CallMessage {
    /// A minimal envelope for `action` from `from` towards `remote`.
    /// The call id is left empty for the codec to stamp.
    pub fn new(action: CallAction, from: UserId, remote: UserId) -> Self {
        Self {
            call_id: String::new(),
            from_user_id: from,
            remote_user_id: remote,
            from_room_id: None,
            action,
            reject_reason: None,
            reject_by_internal: SignalOrigin::External,
            cancel_call_by_internal: SignalOrigin::External,
        }
    }
}

/// Encoder/decoder for [`CallMessage`], holding the per-call id.
#[derive(Debug, Default)]
pub struct CallCodec {
    call_id: Mutex<String>,
}

impl CallCodec {
    pub fn new() -> Self {
        Self::default()
    }

    /// Mint a fresh call id for a locally originated call and hold it.
    pub fn assign_call_id(&self) -> String {
        let id = Uuid::new_v4().to_string();
        *self.call_id.lock().unwrap() = id.clone();
        id
    }

    /// Adopt the caller's id from an inbound invite.
    pub fn adopt_call_id(&self, id: &str) {
        *self.call_id.lock().unwrap() = id.to_string();
    }

    /// Current call id; empty when no call is pending.
    pub fn call_id(&self) -> String {
        self.call_id.lock().unwrap().clone()
    }

    pub fn clear(&self) {
        self.call_id.lock().unwrap().clear();
    }

    /// Serialize an envelope, stamping the held call id unless the message
    /// already carries one (busy auto-reject answers with the interloper's
    /// own id).
    pub fn encode(&self, mut message: CallMessage) -> Result<String> {
        if message.call_id.is_empty() {
            message.call_id = self.call_id();
        }
        Ok(serde_json::to_string(&message)?)
    }

    pub fn decode(&self, payload: &str) -> Result<CallMessage> {
        Ok(serde_json::from_str(payload)?)
    }
}
