//! 1-to-1 call signaling and media orchestration engine.
//!
//! This crate coordinates two peers through invitation, acceptance,
//! media-channel join, first-frame rendezvous, and teardown. It owns neither
//! the signaling transport nor the media SDK; it owns the protocol between
//! them:
//!
//! - State machine: `Idle` / `Prepared` / `Calling` / `Connecting` /
//!   `Connected`, with every transition carrying a reason.
//! - Symmetry breaking under races: mutual call (glare), accept+cancel
//!   crossing, busy auto-reject.
//! - Rendezvous of the signaling sequence with the media sequence, so views
//!   attach only once both sides agreed and (optionally) the first remote
//!   frame decoded.
//! - Bounded-time failure handling: call timeouts, remote hangups and
//!   leaves on either plane, idempotent teardown.
//!
//! The application supplies a [`SignalingTransport`] and a [`MediaClient`],
//! then drives a [`CallEngine`] and observes its four streams: state
//! changes, granular events, errors, and per-call milestone snapshots.
//!
//! Call [`logging::init`] once at startup before constructing the first
//! engine.

pub mod adapters;
pub mod config;
pub mod emitter;
pub mod engine;
pub mod errors;
pub mod info;
pub mod logging;
pub mod message;
pub mod types;

pub use adapters::{
    AudioTrack, LocalTracks, MediaClient, MediaEvent, MediaKind, SignalingTransport,
    VideoSurface, VideoTrack,
};
pub use config::{
    AudioProfile, EngineConfig, PrepareConfig, PrepareConfigPatch, VideoProfile, ViewHandle,
};
pub use emitter::{EventEmitter, HandlerId};
pub use engine::CallEngine;
pub use errors::{CallError, Result};
pub use info::{CallInfo, CallInfoSnapshot, CallMilestone};
pub use logging::LogLevel;
pub use message::{CallAction, CallCodec, CallMessage};
pub use types::{
    CallEvent, CallState, CallStateReason, CallType, ErrorEvent, ErrorKind, ErrorNotice,
    EventInfo, SignalOrigin, StateChange, UserId,
};
