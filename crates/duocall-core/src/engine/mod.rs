//! The call engine: a deterministic state machine coordinating two peers
//! through invitation, acceptance, media-channel join, first-frame
//! rendezvous, and teardown.
//!
//! Application commands and inbound signaling both enter here. The engine
//! issues outbound signaling through the transport adapter, drives the media
//! adapter, and emits four independent observation streams: state changes,
//! granular events, errors, and per-call milestone snapshots.
//!
//! All session fields live behind one async mutex, which linearizes every
//! handler's critical sections. Suspension points (send, join, publish,
//! subscribe, leave) run outside the lock; a handler that resumes re-checks
//! that the call it started with is still current and short-circuits
//! otherwise. In-flight awaits are never aborted; the timeout timer is the
//! only cancellable resource.

mod commands;
mod media;
mod signaling;

use std::sync::{Arc, Mutex as StdMutex};

use tokio::sync::broadcast::error::RecvError;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::adapters::media::{AudioTrack, LocalTracks, MediaClient, VideoTrack};
use crate::adapters::signaling::SignalingTransport;
use crate::config::{EngineConfig, PrepareConfig};
use crate::emitter::{EventEmitter, HandlerId};
use crate::errors::{CallError, Result};
use crate::info::{CallInfo, CallInfoSnapshot};
use crate::logging::LogLevel;
use crate::message::CallCodec;
use crate::types::{
    CallEvent, CallState, CallStateReason, CallType, ErrorEvent, ErrorKind, ErrorNotice,
    EventInfo, StateChange, UserId,
};

/// Mutable per-call state. One pending call at a time.
pub(crate) struct CallSession {
    pub(crate) state: CallState,
    pub(crate) prepare: PrepareConfig,
    /// Effective media channel for the pending call. Starts as the prepared
    /// room; an inbound invite overrides it with the caller's room.
    pub(crate) room_id: String,
    pub(crate) remote_user_id: UserId,
    pub(crate) call_type: CallType,
    pub(crate) rtc_joined: bool,
    pub(crate) local_tracks: Option<LocalTracks>,
    pub(crate) remote_video: Option<Arc<dyn VideoTrack>>,
    pub(crate) remote_audio: Option<Arc<dyn AudioTrack>>,
    pub(crate) received_first_frame: bool,
    pub(crate) info: CallInfo,
    pub(crate) timer: Option<JoinHandle<()>>,
}

impl CallSession {
    fn new() -> Self {
        Self {
            state: CallState::Idle,
            prepare: PrepareConfig::default(),
            room_id: String::new(),
            remote_user_id: 0,
            call_type: CallType::Video,
            rtc_joined: false,
            local_tracks: None,
            remote_video: None,
            remote_audio: None,
            received_first_frame: false,
            info: CallInfo::new(),
            timer: None,
        }
    }

    /// True when no peer is committed yet, or `user_id` is the committed
    /// peer. Admits the first inbound invite (and its glare duplicate)
    /// while rejecting interlopers.
    pub(crate) fn is_calling_user(&self, user_id: UserId) -> bool {
        self.remote_user_id == 0 || self.remote_user_id == user_id
    }
}

pub(crate) struct EngineInner {
    pub(crate) config: EngineConfig,
    pub(crate) signaling: Arc<dyn SignalingTransport>,
    pub(crate) media: Arc<dyn MediaClient>,
    pub(crate) codec: CallCodec,
    pub(crate) session: Mutex<CallSession>,

    state_changed: EventEmitter<StateChange>,
    event_changed: EventEmitter<CallEvent>,
    error_stream: EventEmitter<ErrorNotice>,
    info_changed: EventEmitter<CallInfoSnapshot>,

    router: StdMutex<Option<JoinHandle<()>>>,
}

/// The 1-to-1 call engine. Cheap to clone; all clones drive the same
/// session.
#[derive(Clone)]
pub struct CallEngine {
    inner: Arc<EngineInner>,
}

impl CallEngine {
    /// Create an engine over the given transports and start routing their
    /// events. Must be called within a tokio runtime.
    ///
    /// Both collaborators may be shared with external code; the engine
    /// mutates only its own tracks and joined-channel state.
    pub fn new(
        config: EngineConfig,
        signaling: Arc<dyn SignalingTransport>,
        media: Arc<dyn MediaClient>,
    ) -> Self {
        let inner = Arc::new(EngineInner {
            config,
            signaling,
            media,
            codec: CallCodec::new(),
            session: Mutex::new(CallSession::new()),
            state_changed: EventEmitter::new(),
            event_changed: EventEmitter::new(),
            error_stream: EventEmitter::new(),
            info_changed: EventEmitter::new(),
            router: StdMutex::new(None),
        });
        inner.spawn_router();
        Self { inner }
    }

    // ===== Observation streams =====

    pub fn on_call_state_changed<F>(&self, handler: F) -> HandlerId
    where
        F: Fn(&StateChange) + Send + Sync + 'static,
    {
        self.inner.state_changed.on(handler)
    }

    pub fn on_call_event_changed<F>(&self, handler: F) -> HandlerId
    where
        F: Fn(&CallEvent) + Send + Sync + 'static,
    {
        self.inner.event_changed.on(handler)
    }

    pub fn on_call_error<F>(&self, handler: F) -> HandlerId
    where
        F: Fn(&ErrorNotice) + Send + Sync + 'static,
    {
        self.inner.error_stream.on(handler)
    }

    pub fn on_call_info_changed<F>(&self, handler: F) -> HandlerId
    where
        F: Fn(&CallInfoSnapshot) + Send + Sync + 'static,
    {
        self.inner.info_changed.on(handler)
    }

    pub fn off_call_state_changed(&self, id: HandlerId) {
        self.inner.state_changed.off(id);
    }

    pub fn off_call_event_changed(&self, id: HandlerId) {
        self.inner.event_changed.off(id);
    }

    pub fn off_call_error(&self, id: HandlerId) {
        self.inner.error_stream.off(id);
    }

    pub fn off_call_info_changed(&self, id: HandlerId) {
        self.inner.info_changed.off(id);
    }

    // ===== Queries =====

    /// The pending call's id; empty outside Calling/Connecting/Connected.
    pub fn call_id(&self) -> String {
        self.inner.codec.call_id()
    }

    pub async fn state(&self) -> CallState {
        self.inner.session.lock().await.state
    }

    pub async fn is_busy(&self) -> bool {
        self.inner.session.lock().await.state.is_busy()
    }

    /// The committed peer, or `0` outside a call.
    pub async fn remote_user_id(&self) -> UserId {
        self.inner.session.lock().await.remote_user_id
    }

    /// Retune the process-wide log level.
    pub fn set_log_level(&self, level: LogLevel) {
        crate::logging::set_log_level(level);
    }
}

impl EngineInner {
    // ===== Event routing =====

    /// Subscribe to both external planes and dispatch into the handlers.
    /// The task holds only a weak reference, so dropping the last engine
    /// handle lets it wind down.
    fn spawn_router(self: &Arc<Self>) {
        let weak = Arc::downgrade(self);
        let mut messages = self.signaling.incoming();
        let mut media_events = self.media.events();
        let handle = tokio::spawn(async move {
            loop {
                tokio::select! {
                    // The signaling plane is the control plane: when both
                    // have queued events, the signal carries the end reason
                    // (reject/cancel/hangup) and must win over the peer's
                    // media-channel departure.
                    biased;
                    message = messages.recv() => match message {
                        Ok(payload) => {
                            let Some(inner) = weak.upgrade() else { break };
                            inner.on_signal_payload(&payload).await;
                        }
                        Err(RecvError::Lagged(skipped)) => {
                            warn!("signaling receiver lagged, {} messages dropped", skipped);
                        }
                        Err(RecvError::Closed) => break,
                    },
                    event = media_events.recv() => match event {
                        Ok(event) => {
                            let Some(inner) = weak.upgrade() else { break };
                            inner.on_media_event(event).await;
                        }
                        Err(RecvError::Lagged(skipped)) => {
                            warn!("media receiver lagged, {} events dropped", skipped);
                        }
                        Err(RecvError::Closed) => break,
                    },
                }
            }
        });
        *self.router.lock().unwrap() = Some(handle);
    }

    pub(crate) fn stop_router(&self) {
        if let Some(handle) = self.router.lock().unwrap().take() {
            handle.abort();
        }
    }

    // ===== Emission =====

    /// Apply a state transition and notify observers. Self-transitions are
    /// suppressed and emit nothing.
    pub(crate) fn change_state(
        &self,
        session: &mut CallSession,
        next: CallState,
        reason: CallStateReason,
        event_reason: Option<String>,
        info: EventInfo,
    ) {
        if session.state == next {
            debug!("suppressing self-transition in {}", next);
            return;
        }
        info!("state transition: {} -> {} ({:?})", session.state, next, reason);
        session.state = next;
        self.state_changed.emit(&StateChange {
            state: next,
            reason,
            event_reason,
            info,
        });
    }

    pub(crate) fn emit_event(&self, event: CallEvent) {
        debug!("call event: {:?}", event);
        self.event_changed.emit(&event);
    }

    pub(crate) fn emit_error(&self, event: ErrorEvent, kind: ErrorKind, err: &CallError) {
        self.error_stream.emit(&ErrorNotice {
            event,
            kind,
            code: err.code(),
            message: err.to_string(),
        });
    }

    pub(crate) fn emit_info(&self, snapshot: CallInfoSnapshot) {
        self.info_changed.emit(&snapshot);
    }

    // ===== Outbound signaling =====

    /// Send an encoded envelope to `to`. Failures are surfaced on the error
    /// stream here; propagation to a caller is the caller's choice.
    pub(crate) async fn send_payload(&self, to: UserId, payload: &str) -> Result<()> {
        match self.signaling.send_message(&to.to_string(), payload).await {
            Ok(()) => Ok(()),
            Err(err) => {
                warn!("send to {} failed: {}", to, err);
                self.emit_error(ErrorEvent::SendMessageFail, ErrorKind::Message, &err);
                Err(err)
            }
        }
    }

    // ===== Timers =====

    /// Arm the call timeout. Re-arming cancels any prior pending timer.
    /// `local` selects which timeout event fires on expiry.
    pub(crate) fn arm_timer(self: &Arc<Self>, session: &mut CallSession, local: bool) {
        self.disarm_timer(session);
        let timeout = session.prepare.call_timeout;
        let weak = Arc::downgrade(self);
        session.timer = Some(tokio::spawn(async move {
            tokio::time::sleep(timeout).await;
            if let Some(inner) = weak.upgrade() {
                inner.on_call_timeout(local).await;
            }
        }));
    }

    pub(crate) fn disarm_timer(&self, session: &mut CallSession) {
        if let Some(timer) = session.timer.take() {
            timer.abort();
        }
    }

    /// Timer expiry: abandon a call stuck in Calling/Connecting, notifying
    /// the peer with an internally originated Cancel.
    async fn on_call_timeout(&self, local: bool) {
        let outbound;
        {
            let mut session = self.session.lock().await;
            if !matches!(session.state, CallState::Calling | CallState::Connecting) {
                return;
            }
            info!("call timed out in {}", session.state);
            outbound = self.compose_cancel(&session, crate::types::SignalOrigin::Internal);
            let remote_user_id = session.remote_user_id;
            self.change_state(
                &mut session,
                CallState::Prepared,
                CallStateReason::CallingTimeout,
                Some("calling timeout".to_string()),
                EventInfo {
                    remote_user_id: Some(remote_user_id),
                    ..EventInfo::default()
                },
            );
            self.emit_event(if local {
                CallEvent::CallingTimeout
            } else {
                CallEvent::RemoteCallingTimeout
            });
        }
        let send = async {
            if let Some((to, payload)) = &outbound {
                let _ = self.send_payload(*to, payload).await;
            }
        };
        let (_, teardown_result) = tokio::join!(send, self.teardown());
        if let Err(err) = teardown_result {
            warn!("teardown after timeout failed: {}", err);
        }
    }

    /// Encode a Cancel towards the committed peer, if any. Must run before
    /// reset clears the call id.
    pub(crate) fn compose_cancel(
        &self,
        session: &CallSession,
        origin: crate::types::SignalOrigin,
    ) -> Option<(UserId, String)> {
        if session.remote_user_id == 0 {
            return None;
        }
        let mut message = crate::message::CallMessage::new(
            crate::message::CallAction::Cancel,
            self.config.user_id,
            session.remote_user_id,
        );
        message.cancel_call_by_internal = origin;
        match self.codec.encode(message) {
            Ok(payload) => Some((session.remote_user_id, payload)),
            Err(err) => {
                warn!("failed to encode cancel: {}", err);
                None
            }
        }
    }

    // ===== Teardown =====

    pub(crate) async fn teardown(&self) -> Result<()> {
        let mut session = self.session.lock().await;
        self.teardown_locked(&mut session).await
    }

    /// Release every per-call resource: stop remote playback, close local
    /// tracks, leave the channel if joined, reset session data. Idempotent.
    /// A media-side failure is emitted and returned after the reset.
    pub(crate) async fn teardown_locked(&self, session: &mut CallSession) -> Result<()> {
        if let Some(audio) = session.remote_audio.take() {
            audio.stop();
        }
        if let Some(video) = session.remote_video.take() {
            video.stop();
        }
        if let Some(tracks) = session.local_tracks.take() {
            tracks.close();
        }
        let was_joined = session.rtc_joined;
        let left = if was_joined {
            session.rtc_joined = false;
            self.media.leave().await
        } else {
            Ok(())
        };
        match &left {
            Ok(()) => {
                if was_joined {
                    self.emit_event(CallEvent::LocalLeft);
                }
            }
            Err(err) => {
                self.emit_error(ErrorEvent::RtcOccurError, ErrorKind::Rtc, err);
            }
        }
        self.reset(session);
        left
    }

    /// Clear per-call data back to the prepared baseline.
    pub(crate) fn reset(&self, session: &mut CallSession) {
        self.disarm_timer(session);
        self.codec.clear();
        session.remote_user_id = 0;
        session.rtc_joined = false;
        session.received_first_frame = false;
        session.room_id = session.prepare.room_id.clone();
        if let Some(snapshot) = session.info.finish() {
            info!("call finished: {}", snapshot.report());
        }
    }
}
