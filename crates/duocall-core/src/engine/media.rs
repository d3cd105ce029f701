//! Media-plane handlers and the view-attach rendezvous.
//!
//! Every remote-user handler short-circuits unless the event's user is the
//! committed peer. Failures on these paths are emitted, never rethrown:
//! there is no caller to receive them.

use std::sync::Arc;

use tracing::{debug, warn};

use crate::adapters::media::{MediaEvent, MediaKind};
use crate::config::{AudioProfile, VideoProfile, ViewHandle};
use crate::errors::Result;
use crate::info::CallMilestone;
use crate::logging::redacted;
use crate::types::{CallEvent, CallState, CallStateReason, CallType, ErrorEvent, ErrorKind, EventInfo, UserId};

use super::{CallSession, EngineInner};

/// Everything `rtc_join_and_publish` needs once the session lock is gone.
/// `call_id` identifies the call the join belongs to; a resumed join whose
/// id is no longer current abandons its work.
pub(crate) struct JoinContext {
    pub(crate) call_id: String,
    pub(crate) room_id: String,
    pub(crate) token: String,
    pub(crate) video: Option<VideoProfile>,
    pub(crate) audio: AudioProfile,
    pub(crate) local_view: Option<ViewHandle>,
}

impl EngineInner {
    pub(crate) fn join_context(&self, session: &CallSession, call_id: String) -> JoinContext {
        JoinContext {
            call_id,
            room_id: session.room_id.clone(),
            token: session.prepare.rtc_token.clone(),
            video: (session.call_type == CallType::Video).then_some(session.prepare.video),
            audio: session.prepare.audio,
            local_view: session.prepare.local_view.clone(),
        }
    }

    // ===== Join and publish =====

    /// Create local tracks and join the channel concurrently, then publish
    /// once both resolve. Local preview starts right after the join,
    /// before publish. Any failure is emitted and returned so the
    /// originating command rejects.
    pub(crate) async fn rtc_join_and_publish(&self, ctx: JoinContext) -> Result<()> {
        self.emit_event(CallEvent::JoinRtcStart);
        debug!(
            "joining {} as {} (token {})",
            ctx.room_id,
            self.config.user_id,
            redacted(&ctx.token)
        );

        let create = self.media.create_tracks(ctx.video.as_ref(), &ctx.audio);
        let join = self
            .media
            .join(&self.config.app_id, &ctx.room_id, &ctx.token, self.config.user_id);
        let tracks = match tokio::join!(create, join) {
            (Ok(tracks), Ok(())) => tracks,
            (Ok(tracks), Err(err)) => {
                tracks.close();
                self.emit_error(ErrorEvent::RtcOccurError, ErrorKind::Rtc, &err);
                return Err(err);
            }
            (Err(err), Ok(())) => {
                let _ = self.media.leave().await;
                self.emit_error(ErrorEvent::RtcOccurError, ErrorKind::Rtc, &err);
                return Err(err);
            }
            (Err(err), Err(join_err)) => {
                debug!("join also failed: {}", join_err);
                self.emit_error(ErrorEvent::RtcOccurError, ErrorKind::Rtc, &err);
                return Err(err);
            }
        };

        {
            let mut session = self.session.lock().await;
            if self.codec.call_id() != ctx.call_id || !session.state.is_busy() {
                // The call went away while we were joining.
                debug!("abandoning stale join for call {}", ctx.call_id);
                tracks.close();
                drop(session);
                let _ = self.media.leave().await;
                return Ok(());
            }
            session.rtc_joined = true;
            session.local_tracks = Some(tracks.clone());
            session.info.mark(CallMilestone::LocalUserJoinChannel);
            self.emit_event(CallEvent::JoinRtcSucceeded);
            self.emit_event(CallEvent::LocalJoined);

            if let (Some(video), Some(view)) = (&tracks.video, &ctx.local_view) {
                if !video.is_playing() {
                    view.clear();
                    if let Err(err) = video.play(view) {
                        self.emit_error(ErrorEvent::RtcOccurError, ErrorKind::Rtc, &err);
                        return Err(err);
                    }
                }
            }
        }

        if let Err(err) = self.media.publish(&tracks).await {
            self.emit_error(ErrorEvent::RtcOccurError, ErrorKind::Rtc, &err);
            return Err(err);
        }
        Ok(())
    }

    // ===== Inbound media events =====

    pub(crate) async fn on_media_event(self: &Arc<Self>, event: MediaEvent) {
        match event {
            MediaEvent::UserJoined { user_id } => self.on_remote_user_joined(user_id).await,
            MediaEvent::UserLeft { user_id } => self.on_remote_user_left(user_id).await,
            MediaEvent::UserPublished { user_id, kind } => {
                self.on_remote_user_published(user_id, kind).await
            }
            MediaEvent::UserUnpublished { user_id, kind } => {
                self.on_remote_user_unpublished(user_id, kind).await
            }
            MediaEvent::FirstRemoteVideoFrame { user_id } => {
                self.on_first_remote_video_frame(user_id).await
            }
            MediaEvent::FirstLocalVideoFrame => self.on_first_local_video_frame().await,
        }
    }

    async fn on_remote_user_joined(&self, user_id: UserId) {
        let mut session = self.session.lock().await;
        if user_id != session.remote_user_id {
            return;
        }
        session.info.mark(CallMilestone::RemoteUserJoinChannel);
        self.emit_event(CallEvent::RemoteJoined);
    }

    /// A silent peer departure on the media plane is treated as a hangup.
    /// The state change is the primary notification and precedes the
    /// resource release.
    async fn on_remote_user_left(&self, user_id: UserId) {
        {
            let mut session = self.session.lock().await;
            if user_id != session.remote_user_id {
                return;
            }
            self.emit_event(CallEvent::RemoteLeft);
            if !session.state.is_busy() {
                return;
            }
            self.change_state(
                &mut session,
                CallState::Prepared,
                CallStateReason::RemoteHangup,
                None,
                EventInfo {
                    remote_user_id: Some(user_id),
                    ..EventInfo::default()
                },
            );
        }
        if let Err(err) = self.teardown().await {
            warn!("teardown on remote leave failed: {}", err);
        }
    }

    async fn on_remote_user_published(&self, user_id: UserId, kind: MediaKind) {
        {
            let session = self.session.lock().await;
            if user_id != session.remote_user_id || !session.state.is_busy() {
                return;
            }
        }
        match kind {
            MediaKind::Video => {
                let track = match self.media.subscribe_video(user_id).await {
                    Ok(track) => track,
                    Err(err) => {
                        self.emit_error(ErrorEvent::RtcOccurError, ErrorKind::Rtc, &err);
                        return;
                    }
                };
                let mut session = self.session.lock().await;
                if user_id != session.remote_user_id {
                    return;
                }
                session.remote_video = Some(track);
                self.try_play_remote_video(&mut session);
            }
            MediaKind::Audio => {
                let track = match self.media.subscribe_audio(user_id).await {
                    Ok(track) => track,
                    Err(err) => {
                        self.emit_error(ErrorEvent::RtcOccurError, ErrorKind::Rtc, &err);
                        return;
                    }
                };
                let mut session = self.session.lock().await;
                if user_id != session.remote_user_id {
                    return;
                }
                session.remote_audio = Some(track);
                // Audio may arrive after Connected was latched by the first
                // video frame; start it straight away in that case.
                if session.state == CallState::Connected {
                    self.try_play_remote_audio(&mut session);
                }
            }
        }
    }

    async fn on_remote_user_unpublished(&self, user_id: UserId, kind: MediaKind) {
        {
            let session = self.session.lock().await;
            if user_id != session.remote_user_id {
                return;
            }
        }
        if let Err(err) = self.media.unsubscribe(user_id, kind).await {
            self.emit_error(ErrorEvent::RtcOccurError, ErrorKind::Rtc, &err);
        }
        let mut session = self.session.lock().await;
        if user_id != session.remote_user_id {
            return;
        }
        match kind {
            MediaKind::Video => {
                if let Some(track) = session.remote_video.take() {
                    track.stop();
                }
            }
            MediaKind::Audio => {
                if let Some(track) = session.remote_audio.take() {
                    track.stop();
                }
            }
        }
    }

    async fn on_first_remote_video_frame(&self, user_id: UserId) {
        {
            let mut session = self.session.lock().await;
            if user_id != session.remote_user_id {
                return;
            }
            session.info.mark(CallMilestone::RecvFirstFrame);
            session.received_first_frame = true;
            self.emit_event(CallEvent::RecvRemoteFirstFrame);
            self.emit_info(session.info.snapshot());
        }
        self.check_append_view().await;
    }

    async fn on_first_local_video_frame(&self) {
        let session = self.session.lock().await;
        if session.state.is_busy() {
            self.emit_event(CallEvent::PublishFirstLocalVideoFrame);
        }
    }

    // ===== View-attach rendezvous =====

    /// The single point that latches `Connected`. Entered from both the
    /// accept path and the first-frame callback; whichever finds the state
    /// at `Connecting` with the frame gate open performs the transition,
    /// the other run is neutered by the state check.
    pub(crate) async fn check_append_view(&self) {
        let mut session = self.session.lock().await;
        if session.state != CallState::Connecting {
            return;
        }
        let frame_gate_open = session.prepare.first_frame_waiting_disabled
            || session.received_first_frame
            || session.call_type == CallType::Audio;
        if !frame_gate_open {
            return;
        }
        let remote_user_id = session.remote_user_id;
        self.disarm_timer(&mut session);
        self.change_state(
            &mut session,
            CallState::Connected,
            CallStateReason::RecvRemoteFirstFrame,
            None,
            EventInfo {
                remote_user_id: Some(remote_user_id),
                ..EventInfo::default()
            },
        );
        self.try_play_local_video(&mut session);
        self.try_play_remote_video(&mut session);
        self.try_play_remote_audio(&mut session);
    }

    /// Mount the local preview if configured and not already playing.
    fn try_play_local_video(&self, session: &mut CallSession) {
        let Some(tracks) = &session.local_tracks else {
            return;
        };
        let (Some(video), Some(view)) = (&tracks.video, &session.prepare.local_view) else {
            return;
        };
        if video.is_playing() {
            return;
        }
        view.clear();
        if let Err(err) = video.play(view) {
            self.emit_error(ErrorEvent::RtcOccurError, ErrorKind::Rtc, &err);
        }
    }

    /// Mount remote video once `Connected`; a no-op before that.
    fn try_play_remote_video(&self, session: &mut CallSession) {
        if session.state != CallState::Connected {
            return;
        }
        let (Some(video), Some(view)) = (&session.remote_video, &session.prepare.remote_view)
        else {
            return;
        };
        if video.is_playing() {
            return;
        }
        view.clear();
        if let Err(err) = video.play(view) {
            self.emit_error(ErrorEvent::RtcOccurError, ErrorKind::Rtc, &err);
        }
    }

    fn try_play_remote_audio(&self, session: &mut CallSession) {
        let Some(audio) = &session.remote_audio else {
            return;
        };
        if audio.is_playing() {
            return;
        }
        if let Err(err) = audio.play() {
            self.emit_error(ErrorEvent::RtcOccurError, ErrorKind::Rtc, &err);
        }
    }
}
