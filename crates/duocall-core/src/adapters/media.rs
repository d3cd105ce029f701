//! Media client seam.
//!
//! Thin abstraction over a real-time media SDK: join/leave a channel,
//! publish local tracks, subscribe to remote ones, and observe channel
//! lifecycle events. The engine drives this interface; it never touches the
//! SDK's encoding or transport.

use async_trait::async_trait;
use std::fmt;
use std::sync::Arc;
use tokio::sync::broadcast;

use crate::config::{AudioProfile, VideoProfile, ViewHandle};
use crate::errors::Result;
use crate::types::UserId;

/// Media track kinds.
#[derive(Debug, Clone, Copy, Hash, Eq, PartialEq)]
pub enum MediaKind {
    Audio,
    Video,
}

impl fmt::Display for MediaKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MediaKind::Audio => write!(f, "audio"),
            MediaKind::Video => write!(f, "video"),
        }
    }
}

/// Application-provided rendering surface the engine mounts video into.
///
/// In a browser this is a container element; elsewhere it is whatever the
/// embedder renders with. The engine only ever clears it and hands it to a
/// video track's `play`.
pub trait VideoSurface: Send + Sync {
    /// Remove any previously mounted content.
    fn clear(&self);
}

/// A video track (local preview or subscribed remote).
pub trait VideoTrack: Send + Sync {
    /// Mount the track's rendering into `surface` and start playback.
    fn play(&self, surface: &ViewHandle) -> Result<()>;
    fn stop(&self);
    fn close(&self);
    fn is_playing(&self) -> bool;
}

/// An audio track. Plays without a surface.
pub trait AudioTrack: Send + Sync {
    fn play(&self) -> Result<()>;
    fn stop(&self);
    fn close(&self);
    fn is_playing(&self) -> bool;
}

/// The local tracks created for one call. Audio is always captured; video
/// only for video calls.
#[derive(Clone)]
pub struct LocalTracks {
    pub video: Option<Arc<dyn VideoTrack>>,
    pub audio: Arc<dyn AudioTrack>,
}

impl LocalTracks {
    /// Stop playback and release capture devices.
    pub fn close(&self) {
        if let Some(video) = &self.video {
            video.stop();
            video.close();
        }
        self.audio.stop();
        self.audio.close();
    }
}

impl fmt::Debug for LocalTracks {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LocalTracks")
            .field("has_video", &self.video.is_some())
            .finish()
    }
}

/// Channel lifecycle events emitted by the media client.
///
/// First-frame decode notifications arrive here keyed by user id rather
/// than as per-track callbacks.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MediaEvent {
    UserJoined { user_id: UserId },
    UserLeft { user_id: UserId },
    UserPublished { user_id: UserId, kind: MediaKind },
    UserUnpublished { user_id: UserId, kind: MediaKind },
    /// The first frame of `user_id`'s video track was decoded locally.
    FirstRemoteVideoFrame { user_id: UserId },
    /// The first frame of the local video track was published.
    FirstLocalVideoFrame,
}

/// The real-time media client the engine drives.
#[async_trait]
pub trait MediaClient: Send + Sync {
    async fn join(&self, app_id: &str, room_id: &str, token: &str, user_id: UserId)
        -> Result<()>;

    async fn leave(&self) -> Result<()>;

    /// Open capture devices for one call. `video` is `None` for audio-only
    /// calls.
    async fn create_tracks(
        &self,
        video: Option<&VideoProfile>,
        audio: &AudioProfile,
    ) -> Result<LocalTracks>;

    async fn publish(&self, tracks: &LocalTracks) -> Result<()>;

    async fn subscribe_video(&self, user_id: UserId) -> Result<Arc<dyn VideoTrack>>;

    async fn subscribe_audio(&self, user_id: UserId) -> Result<Arc<dyn AudioTrack>>;

    async fn unsubscribe(&self, user_id: UserId, kind: MediaKind) -> Result<()>;

    /// Subscribe to channel lifecycle events.
    fn events(&self) -> broadcast::Receiver<MediaEvent>;
}
