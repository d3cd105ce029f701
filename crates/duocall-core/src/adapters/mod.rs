//! Seams to the two external collaborators: the signaling transport and the
//! real-time media client. The engine owns the protocol between them, not
//! the transports themselves.

pub mod media;
pub mod signaling;

pub use media::{AudioTrack, LocalTracks, MediaClient, MediaEvent, MediaKind, VideoSurface, VideoTrack};
pub use signaling::SignalingTransport;
