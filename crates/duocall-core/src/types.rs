//! Core types for duocall-core
//!
//! This module defines the fundamental types used throughout the crate:
//! call states, transition reasons, granular call events, and the payloads
//! delivered on the application-facing observation streams.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Numeric user identifier. `0` means "no peer".
pub type UserId = u64;

/// Kind of call being placed or received.
#[derive(Debug, Clone, Copy, Hash, Eq, PartialEq, Serialize, Deserialize)]
pub enum CallType {
    Video,
    Audio,
}

impl fmt::Display for CallType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CallType::Video => write!(f, "Video"),
            CallType::Audio => write!(f, "Audio"),
        }
    }
}

/// Call states
///
/// `Prepared` is the quiescent resting state after setup and after every
/// teardown; `Idle` is only ever observed before the first
/// `prepare_for_call`.
#[derive(Debug, Clone, Copy, Hash, Eq, PartialEq, Serialize, Deserialize)]
pub enum CallState {
    Idle,
    Prepared,
    Calling,
    Connecting,
    Connected,
}

impl CallState {
    /// Check if a call is currently pending or established.
    pub fn is_busy(&self) -> bool {
        matches!(
            self,
            CallState::Calling | CallState::Connecting | CallState::Connected
        )
    }
}

impl fmt::Display for CallState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CallState::Idle => write!(f, "Idle"),
            CallState::Prepared => write!(f, "Prepared"),
            CallState::Calling => write!(f, "Calling"),
            CallState::Connecting => write!(f, "Connecting"),
            CallState::Connected => write!(f, "Connected"),
        }
    }
}

/// Why a state transition happened. Attached to every `StateChange`.
#[derive(Debug, Clone, Copy, Hash, Eq, PartialEq, Serialize, Deserialize)]
pub enum CallStateReason {
    None,
    LocalVideoCall,
    LocalAudioCall,
    RemoteVideoCall,
    RemoteAudioCall,
    LocalAccepted,
    RemoteAccepted,
    LocalRejected,
    RemoteRejected,
    RemoteCallBusy,
    LocalCancel,
    RemoteCancel,
    LocalHangup,
    RemoteHangup,
    RecvRemoteFirstFrame,
    CallingTimeout,
}

/// Granular call events, finer-grained than state transitions.
#[derive(Debug, Clone, Copy, Hash, Eq, PartialEq, Serialize, Deserialize)]
pub enum CallEvent {
    OnCalling,
    RemoteUserRecvCall,
    LocalAccepted,
    RemoteAccepted,
    LocalRejected,
    RemoteRejected,
    RemoteCallBusy,
    LocalCancelled,
    RemoteCancelled,
    LocalHangup,
    RemoteHangup,
    JoinRtcStart,
    JoinRtcSucceeded,
    LocalJoined,
    RemoteJoined,
    LocalLeft,
    RemoteLeft,
    PublishFirstLocalVideoFrame,
    RecvRemoteFirstFrame,
    CallingTimeout,
    RemoteCallingTimeout,
    StateMismatch,
}

/// Which plane produced an error.
#[derive(Debug, Clone, Copy, Hash, Eq, PartialEq, Serialize, Deserialize)]
pub enum ErrorKind {
    /// Reserved; no engine path currently produces it.
    Normal,
    /// Media plane (join/leave/publish/subscribe/track failures).
    Rtc,
    /// Signaling plane (send_message failures).
    Message,
}

/// Error events surfaced on the `call_error` stream.
#[derive(Debug, Clone, Copy, Hash, Eq, PartialEq, Serialize, Deserialize)]
pub enum ErrorEvent {
    RtcOccurError,
    SendMessageFail,
}

/// Whether a signal was produced by the engine itself (busy auto-reject,
/// timeout cancel) or by an explicit application command.
#[derive(Debug, Clone, Copy, Hash, Eq, PartialEq, Serialize, Deserialize)]
pub enum SignalOrigin {
    External,
    Internal,
}

impl Default for SignalOrigin {
    fn default() -> Self {
        SignalOrigin::External
    }
}

/// Extra context attached to a state transition.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EventInfo {
    pub remote_user_id: Option<UserId>,
    pub from_user_id: Option<UserId>,
    pub reject_reason: Option<String>,
    pub cancel_call_by_internal: Option<SignalOrigin>,
}

/// Payload delivered on the `call_state_changed` stream.
#[derive(Debug, Clone)]
pub struct StateChange {
    pub state: CallState,
    pub reason: CallStateReason,
    /// Human-readable cause, when one exists (reject reason, timeout note).
    pub event_reason: Option<String>,
    pub info: EventInfo,
}

/// Payload delivered on the `call_error` stream.
#[derive(Debug, Clone)]
pub struct ErrorNotice {
    pub event: ErrorEvent,
    pub kind: ErrorKind,
    pub code: i64,
    pub message: String,
}
