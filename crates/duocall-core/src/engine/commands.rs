//! Application-facing commands.
//!
//! Each command follows the same shape: take the session lock, validate and
//! apply the synchronous part of the transition (emitting as it goes),
//! release the lock, then run the I/O legs concurrently and commit any
//! result under a fresh lock if the call is still current.

use std::sync::Arc;

use tracing::warn;

use crate::config::PrepareConfigPatch;
use crate::errors::{CallError, Result};
use crate::info::CallMilestone;
use crate::message::{CallAction, CallMessage};
use crate::types::{
    CallEvent, CallState, CallStateReason, CallType, EventInfo, SignalOrigin, UserId,
};

use super::{CallEngine, EngineInner};

impl CallEngine {
    /// Merge `patch` over the sticky call configuration and settle into
    /// `Prepared`. Fails while a call is pending or established.
    /// Idempotent in `Idle`/`Prepared`.
    pub async fn prepare_for_call(&self, patch: PrepareConfigPatch) -> Result<()> {
        self.inner.cmd_prepare(patch).await
    }

    /// Invite `remote_user_id` to a call. Requires `Prepared`. The media
    /// join/publish runs concurrently with the outbound invite; the command
    /// resolves once both have.
    pub async fn call(&self, remote_user_id: UserId, call_type: CallType) -> Result<()> {
        self.inner.cmd_call(remote_user_id, call_type).await
    }

    /// Abandon the pending call. No precondition; callable any time after
    /// `call`. The Cancel send and the teardown run concurrently.
    pub async fn cancel_call(&self) -> Result<()> {
        self.inner.cmd_cancel().await
    }

    /// Accept the inbound call from `remote_user_id`. Requires `Calling`.
    /// The Accept send and the view-attach check run concurrently.
    pub async fn accept(&self, remote_user_id: UserId) -> Result<()> {
        self.inner.cmd_accept(remote_user_id).await
    }

    /// Decline the inbound call from `remote_user_id`. No precondition.
    pub async fn reject(&self, remote_user_id: UserId, reason: Option<String>) -> Result<()> {
        self.inner.cmd_reject(remote_user_id, reason).await
    }

    /// End the call with `remote_user_id`. No precondition.
    pub async fn hangup(&self, remote_user_id: UserId) -> Result<()> {
        self.inner.cmd_hangup(remote_user_id).await
    }

    /// Release every per-call resource and stop routing external events.
    /// Idempotent. A media-plane failure is emitted and returned.
    pub async fn destroy(&self) -> Result<()> {
        self.inner.cmd_destroy().await
    }
}

impl EngineInner {
    pub(crate) async fn cmd_prepare(&self, patch: PrepareConfigPatch) -> Result<()> {
        let mut session = self.session.lock().await;
        if session.state.is_busy() {
            self.emit_event(CallEvent::StateMismatch);
            return Err(CallError::StateMismatch {
                operation: "prepare_for_call",
                required: "Idle or Prepared",
                actual: session.state,
            });
        }
        patch.apply(&mut session.prepare);
        session.room_id = session.prepare.room_id.clone();
        tracing::debug!("prepared for call: {:?}", session.prepare);
        self.change_state(
            &mut session,
            CallState::Prepared,
            CallStateReason::None,
            None,
            EventInfo::default(),
        );
        Ok(())
    }

    pub(crate) async fn cmd_call(
        self: &Arc<Self>,
        remote_user_id: UserId,
        call_type: CallType,
    ) -> Result<()> {
        let call_id;
        let payload;
        let join;
        {
            let mut session = self.session.lock().await;
            if session.state != CallState::Prepared {
                self.emit_event(CallEvent::StateMismatch);
                return Err(CallError::StateMismatch {
                    operation: "call",
                    required: "Prepared",
                    actual: session.state,
                });
            }
            session.info.start();
            session.remote_user_id = remote_user_id;
            session.call_type = call_type;
            let reason = match call_type {
                CallType::Video => CallStateReason::LocalVideoCall,
                CallType::Audio => CallStateReason::LocalAudioCall,
            };
            self.change_state(
                &mut session,
                CallState::Calling,
                reason,
                None,
                EventInfo {
                    remote_user_id: Some(remote_user_id),
                    from_user_id: Some(self.config.user_id),
                    ..EventInfo::default()
                },
            );
            self.emit_event(CallEvent::OnCalling);
            call_id = self.codec.assign_call_id();
            self.arm_timer(&mut session, true);

            let action = match call_type {
                CallType::Video => CallAction::VideoCall,
                CallType::Audio => CallAction::AudioCall,
            };
            let mut message = CallMessage::new(action, self.config.user_id, remote_user_id);
            message.from_room_id = Some(session.room_id.clone());
            payload = match self.codec.encode(message) {
                Ok(payload) => payload,
                Err(err) => {
                    warn!("failed to encode invite: {}", err);
                    self.change_state(
                        &mut session,
                        CallState::Prepared,
                        CallStateReason::None,
                        None,
                        EventInfo::default(),
                    );
                    self.reset(&mut session);
                    return Err(err);
                }
            };
            join = self.join_context(&session, call_id.clone());
        }

        let send = async {
            self.send_payload(remote_user_id, &payload).await?;
            // The invite reached the peer's transport; to the caller this
            // is "remote user received the call".
            let mut session = self.session.lock().await;
            if self.codec.call_id() == call_id && session.state.is_busy() {
                session.info.mark(CallMilestone::RemoteUserRecvCall);
                self.emit_event(CallEvent::RemoteUserRecvCall);
            }
            Ok(())
        };
        let (join_result, send_result) = tokio::join!(self.rtc_join_and_publish(join), send);
        join_result?;
        send_result
    }

    pub(crate) async fn cmd_cancel(&self) -> Result<()> {
        let outbound;
        {
            let mut session = self.session.lock().await;
            outbound = self.compose_cancel(&session, SignalOrigin::External);
            self.change_state(
                &mut session,
                CallState::Prepared,
                CallStateReason::LocalCancel,
                None,
                EventInfo::default(),
            );
            self.emit_event(CallEvent::LocalCancelled);
        }
        let send = async {
            match &outbound {
                Some((to, payload)) => self.send_payload(*to, payload).await,
                None => Ok(()),
            }
        };
        let (send_result, teardown_result) = tokio::join!(send, self.teardown());
        send_result?;
        teardown_result
    }

    pub(crate) async fn cmd_accept(&self, remote_user_id: UserId) -> Result<()> {
        let payload;
        {
            let mut session = self.session.lock().await;
            if session.state != CallState::Calling {
                self.emit_event(CallEvent::StateMismatch);
                return Err(CallError::StateMismatch {
                    operation: "accept",
                    required: "Calling",
                    actual: session.state,
                });
            }
            self.emit_event(CallEvent::LocalAccepted);
            session.info.mark(CallMilestone::AcceptCall);
            self.change_state(
                &mut session,
                CallState::Connecting,
                CallStateReason::LocalAccepted,
                None,
                EventInfo {
                    remote_user_id: Some(remote_user_id),
                    from_user_id: Some(self.config.user_id),
                    ..EventInfo::default()
                },
            );
            payload = self.codec.encode(CallMessage::new(
                CallAction::Accept,
                self.config.user_id,
                remote_user_id,
            ))?;
        }
        let (send_result, ()) = tokio::join!(
            self.send_payload(remote_user_id, &payload),
            self.check_append_view(),
        );
        send_result
    }

    pub(crate) async fn cmd_reject(
        &self,
        remote_user_id: UserId,
        reason: Option<String>,
    ) -> Result<()> {
        let payload;
        {
            let mut session = self.session.lock().await;
            self.change_state(
                &mut session,
                CallState::Prepared,
                CallStateReason::LocalRejected,
                reason.clone(),
                EventInfo {
                    remote_user_id: Some(remote_user_id),
                    reject_reason: reason.clone(),
                    ..EventInfo::default()
                },
            );
            self.emit_event(CallEvent::LocalRejected);
            let mut message =
                CallMessage::new(CallAction::Reject, self.config.user_id, remote_user_id);
            message.reject_reason = reason;
            message.reject_by_internal = SignalOrigin::External;
            payload = self.codec.encode(message)?;
        }
        let (send_result, teardown_result) = tokio::join!(
            self.send_payload(remote_user_id, &payload),
            self.teardown(),
        );
        send_result?;
        teardown_result
    }

    pub(crate) async fn cmd_hangup(&self, remote_user_id: UserId) -> Result<()> {
        let payload;
        {
            let mut session = self.session.lock().await;
            self.change_state(
                &mut session,
                CallState::Prepared,
                CallStateReason::LocalHangup,
                None,
                EventInfo {
                    remote_user_id: Some(remote_user_id),
                    ..EventInfo::default()
                },
            );
            self.emit_event(CallEvent::LocalHangup);
            payload = self.codec.encode(CallMessage::new(
                CallAction::Hangup,
                self.config.user_id,
                remote_user_id,
            ))?;
        }
        let (send_result, teardown_result) = tokio::join!(
            self.send_payload(remote_user_id, &payload),
            self.teardown(),
        );
        send_result?;
        teardown_result
    }

    pub(crate) async fn cmd_destroy(&self) -> Result<()> {
        let result = self.teardown().await;
        self.stop_router();
        result
    }
}
