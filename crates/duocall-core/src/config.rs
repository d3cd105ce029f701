//! Engine and per-call configuration.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use crate::adapters::media::VideoSurface;
use crate::logging::redacted;
use crate::types::UserId;

/// Opaque handle to an application-provided rendering surface.
pub type ViewHandle = Arc<dyn VideoSurface>;

/// Capture/encode parameters for the local video track.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct VideoProfile {
    pub width: u32,
    pub height: u32,
    pub frame_rate: u32,
    pub bitrate_kbps: u32,
}

impl Default for VideoProfile {
    fn default() -> Self {
        Self {
            width: 640,
            height: 480,
            frame_rate: 15,
            bitrate_kbps: 500,
        }
    }
}

/// Capture/encode parameters for the local audio track.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AudioProfile {
    pub sample_rate: u32,
    pub channels: u16,
    pub bitrate_kbps: u32,
}

impl Default for AudioProfile {
    fn default() -> Self {
        Self {
            sample_rate: 48_000,
            channels: 1,
            bitrate_kbps: 48,
        }
    }
}

/// Identity of this engine instance.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Application id handed to the media client on join.
    pub app_id: String,
    /// Local user id on both planes.
    pub user_id: UserId,
}

/// Sticky per-call configuration, mutated only via `prepare_for_call`.
#[derive(Clone)]
pub struct PrepareConfig {
    /// Media channel to join. An inbound invite overrides it with the
    /// caller's room for the duration of that call.
    pub room_id: String,
    pub rtc_token: String,
    pub local_view: Option<ViewHandle>,
    pub remote_view: Option<ViewHandle>,
    /// Accept inbound invites without an explicit `accept` command.
    pub auto_accept: bool,
    pub call_timeout: Duration,
    /// Latch `Connected` at accept time instead of waiting for the first
    /// remote video frame.
    pub first_frame_waiting_disabled: bool,
    pub video: VideoProfile,
    pub audio: AudioProfile,
}

impl fmt::Debug for PrepareConfig {
    // View handles are deliberately absent and the token is redacted;
    // this type ends up in logs.
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PrepareConfig")
            .field("room_id", &self.room_id)
            .field("rtc_token", &redacted(&self.rtc_token))
            .field("has_local_view", &self.local_view.is_some())
            .field("has_remote_view", &self.remote_view.is_some())
            .field("auto_accept", &self.auto_accept)
            .field("call_timeout", &self.call_timeout)
            .field(
                "first_frame_waiting_disabled",
                &self.first_frame_waiting_disabled,
            )
            .field("video", &self.video)
            .field("audio", &self.audio)
            .finish()
    }
}

impl Default for PrepareConfig {
    fn default() -> Self {
        Self {
            room_id: String::new(),
            rtc_token: String::new(),
            local_view: None,
            remote_view: None,
            auto_accept: false,
            call_timeout: Duration::from_secs(60),
            first_frame_waiting_disabled: false,
            video: VideoProfile::default(),
            audio: AudioProfile::default(),
        }
    }
}

impl PrepareConfig {
    pub fn new(room_id: impl Into<String>, rtc_token: impl Into<String>) -> Self {
        Self {
            room_id: room_id.into(),
            rtc_token: rtc_token.into(),
            ..Default::default()
        }
    }
}

/// Partial update merged over the existing [`PrepareConfig`] by
/// `prepare_for_call`. Unset fields keep their previous values.
#[derive(Clone, Default)]
pub struct PrepareConfigPatch {
    pub room_id: Option<String>,
    pub rtc_token: Option<String>,
    pub local_view: Option<ViewHandle>,
    pub remote_view: Option<ViewHandle>,
    pub auto_accept: Option<bool>,
    pub call_timeout: Option<Duration>,
    pub first_frame_waiting_disabled: Option<bool>,
    pub video: Option<VideoProfile>,
    pub audio: Option<AudioProfile>,
}

impl PrepareConfigPatch {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn room_id(mut self, room_id: impl Into<String>) -> Self {
        self.room_id = Some(room_id.into());
        self
    }

    pub fn rtc_token(mut self, token: impl Into<String>) -> Self {
        self.rtc_token = Some(token.into());
        self
    }

    pub fn local_view(mut self, view: ViewHandle) -> Self {
        self.local_view = Some(view);
        self
    }

    pub fn remote_view(mut self, view: ViewHandle) -> Self {
        self.remote_view = Some(view);
        self
    }

    pub fn auto_accept(mut self, yes: bool) -> Self {
        self.auto_accept = Some(yes);
        self
    }

    pub fn call_timeout(mut self, timeout: Duration) -> Self {
        self.call_timeout = Some(timeout);
        self
    }

    pub fn first_frame_waiting_disabled(mut self, yes: bool) -> Self {
        self.first_frame_waiting_disabled = Some(yes);
        self
    }

    pub fn video(mut self, profile: VideoProfile) -> Self {
        self.video = Some(profile);
        self
    }

    pub fn audio(mut self, profile: AudioProfile) -> Self {
        self.audio = Some(profile);
        self
    }

    /// Merge this patch over `config`.
    pub fn apply(self, config: &mut PrepareConfig) {
        if let Some(room_id) = self.room_id {
            config.room_id = room_id;
        }
        if let Some(token) = self.rtc_token {
            config.rtc_token = token;
        }
        if let Some(view) = self.local_view {
            config.local_view = Some(view);
        }
        if let Some(view) = self.remote_view {
            config.remote_view = Some(view);
        }
        if let Some(auto_accept) = self.auto_accept {
            config.auto_accept = auto_accept;
        }
        if let Some(timeout) = self.call_timeout {
            config.call_timeout = timeout;
        }
        if let Some(disabled) = self.first_frame_waiting_disabled {
            config.first_frame_waiting_disabled = disabled;
        }
        if let Some(video) = self.video {
            config.video = video;
        }
        if let Some(audio) = self.audio {
            config.audio = audio;
        }
    }
}
