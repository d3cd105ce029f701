//! Inbound signaling handlers.
//!
//! The router decodes each payload off the transport and dispatches on the
//! envelope action. Unlike commands, these paths have no caller to reject:
//! failures are emitted on the error stream and otherwise swallowed.

use std::sync::Arc;

use tracing::{debug, warn};

use crate::message::{CallAction, CallMessage};
use crate::types::{
    CallEvent, CallState, CallStateReason, CallType, EventInfo, SignalOrigin,
};

use super::EngineInner;

impl EngineInner {
    pub(crate) async fn on_signal_payload(self: &Arc<Self>, payload: &str) {
        let message = match self.codec.decode(payload) {
            Ok(message) => message,
            Err(err) => {
                warn!("dropping undecodable signaling payload: {}", err);
                return;
            }
        };
        debug!(
            "inbound {:?} from {} (call {})",
            message.action, message.from_user_id, message.call_id
        );
        match message.action {
            CallAction::VideoCall | CallAction::AudioCall => self.on_remote_invite(message).await,
            CallAction::Accept => self.on_remote_accept(message).await,
            CallAction::Reject => self.on_remote_reject(message).await,
            CallAction::Cancel => self.on_remote_cancel(message).await,
            CallAction::Hangup => self.on_remote_hangup(message).await,
        }
    }

    /// Inbound invite. A committed call with a different peer auto-rejects
    /// with "busy"; under glare the invite from the peer we are already
    /// calling is admitted as a valid duplicate.
    async fn on_remote_invite(self: &Arc<Self>, message: CallMessage) {
        let call_type = match message.action {
            CallAction::AudioCall => CallType::Audio,
            _ => CallType::Video,
        };
        let join;
        let auto_accept;
        {
            let mut session = self.session.lock().await;
            if !session.is_calling_user(message.from_user_id) {
                let mut reject = CallMessage::new(
                    CallAction::Reject,
                    self.config.user_id,
                    message.from_user_id,
                );
                // Answer on the interloper's pending call, not ours.
                reject.call_id = message.call_id.clone();
                reject.reject_reason = Some("busy".to_string());
                reject.reject_by_internal = SignalOrigin::Internal;
                let payload = match self.codec.encode(reject) {
                    Ok(payload) => payload,
                    Err(err) => {
                        warn!("failed to encode busy reject: {}", err);
                        return;
                    }
                };
                drop(session);
                let _ = self.send_payload(message.from_user_id, &payload).await;
                return;
            }

            // Under glare the media session from our own outbound call is
            // already up; adopt the signaling identity but keep the channel.
            let need_join = !session.rtc_joined;
            session.info.start();
            self.codec.adopt_call_id(&message.call_id);
            session.remote_user_id = message.from_user_id;
            session.call_type = call_type;
            if need_join {
                if let Some(room_id) = &message.from_room_id {
                    session.room_id = room_id.clone();
                }
            }
            self.arm_timer(&mut session, false);
            let reason = match call_type {
                CallType::Video => CallStateReason::RemoteVideoCall,
                CallType::Audio => CallStateReason::RemoteAudioCall,
            };
            self.change_state(
                &mut session,
                CallState::Calling,
                reason,
                None,
                EventInfo {
                    remote_user_id: Some(message.remote_user_id),
                    from_user_id: Some(message.from_user_id),
                    ..EventInfo::default()
                },
            );
            self.emit_event(CallEvent::OnCalling);
            join = need_join.then(|| self.join_context(&session, message.call_id.clone()));
            auto_accept = session.prepare.auto_accept;
        }

        if let Some(join) = join {
            if let Err(err) = self.rtc_join_and_publish(join).await {
                warn!("join after inbound invite failed: {}", err);
                return;
            }
        }
        if auto_accept {
            if let Err(err) = self.cmd_accept(message.from_user_id).await {
                warn!("auto-accept failed: {}", err);
            }
        }
    }

    /// Inbound accept. Gated so an Accept that crosses with a local cancel
    /// (or arrives from a non-peer) cannot revive a torn-down call.
    async fn on_remote_accept(&self, message: CallMessage) {
        {
            let mut session = self.session.lock().await;
            if session.state != CallState::Calling
                || !session.is_calling_user(message.from_user_id)
            {
                debug!("ignoring accept from {} in {}", message.from_user_id, session.state);
                return;
            }
            session.info.mark(crate::info::CallMilestone::AcceptCall);
            self.emit_event(CallEvent::RemoteAccepted);
            self.change_state(
                &mut session,
                CallState::Connecting,
                CallStateReason::RemoteAccepted,
                None,
                EventInfo {
                    remote_user_id: Some(message.from_user_id),
                    from_user_id: Some(message.from_user_id),
                    ..EventInfo::default()
                },
            );
        }
        self.check_append_view().await;
    }

    /// Inbound reject. Teardown runs before the state emission: observers
    /// see the released state only once resources are gone.
    async fn on_remote_reject(&self, message: CallMessage) {
        let busy = {
            let session = self.session.lock().await;
            if !session.is_calling_user(message.from_user_id) {
                debug!("ignoring reject from non-peer {}", message.from_user_id);
                return;
            }
            message.reject_by_internal == SignalOrigin::Internal
        };
        if busy {
            self.emit_event(CallEvent::RemoteCallBusy);
        }
        if let Err(err) = self.teardown().await {
            warn!("teardown on remote reject failed: {}", err);
        }
        {
            let mut session = self.session.lock().await;
            let reason = if busy {
                CallStateReason::RemoteCallBusy
            } else {
                CallStateReason::RemoteRejected
            };
            self.change_state(
                &mut session,
                CallState::Prepared,
                reason,
                message.reject_reason.clone(),
                EventInfo {
                    remote_user_id: Some(message.from_user_id),
                    reject_reason: message.reject_reason.clone(),
                    ..EventInfo::default()
                },
            );
        }
        self.emit_event(CallEvent::RemoteRejected);
    }

    async fn on_remote_cancel(&self, message: CallMessage) {
        {
            let mut session = self.session.lock().await;
            if !session.is_calling_user(message.from_user_id) {
                debug!("ignoring cancel from non-peer {}", message.from_user_id);
                return;
            }
            self.change_state(
                &mut session,
                CallState::Prepared,
                CallStateReason::RemoteCancel,
                None,
                EventInfo {
                    remote_user_id: Some(message.from_user_id),
                    cancel_call_by_internal: Some(message.cancel_call_by_internal),
                    ..EventInfo::default()
                },
            );
            self.emit_event(CallEvent::RemoteCancelled);
        }
        if let Err(err) = self.teardown().await {
            warn!("teardown on remote cancel failed: {}", err);
        }
    }

    async fn on_remote_hangup(&self, message: CallMessage) {
        {
            let mut session = self.session.lock().await;
            if !session.is_calling_user(message.from_user_id) {
                debug!("ignoring hangup from non-peer {}", message.from_user_id);
                return;
            }
            self.change_state(
                &mut session,
                CallState::Prepared,
                CallStateReason::RemoteHangup,
                None,
                EventInfo {
                    remote_user_id: Some(message.from_user_id),
                    ..EventInfo::default()
                },
            );
            self.emit_event(CallEvent::RemoteHangup);
        }
        if let Err(err) = self.teardown().await {
            warn!("teardown on remote hangup failed: {}", err);
        }
    }
}
