//! In-memory fakes for the two external planes, plus an event recorder.
//!
//! The signaling hub routes payloads between per-user transports over
//! broadcast channels; the media room mirrors an RTC channel: join/leave
//! membership, publication fan-out, late-joiner sync, and (optionally)
//! automatic first-frame delivery on video subscribe.

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::{broadcast, mpsc};

use duocall_core::{
    AudioProfile, AudioTrack, CallEngine, CallError, CallEvent, CallInfoSnapshot, CallState,
    CallStateReason, ErrorNotice, LocalTracks, MediaClient, MediaEvent, MediaKind, Result,
    SignalingTransport, StateChange, UserId, VideoProfile, VideoSurface, VideoTrack, ViewHandle,
};

const WAIT: Duration = Duration::from_secs(2);

// ===== Signaling =====

#[derive(Default)]
pub struct SignalingHub {
    users: Mutex<HashMap<UserId, broadcast::Sender<String>>>,
}

impl SignalingHub {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Register `user_id` and hand back its transport endpoint.
    pub fn transport(self: &Arc<Self>, user_id: UserId) -> Arc<HubTransport> {
        let (tx, _) = broadcast::channel(64);
        self.users.lock().unwrap().insert(user_id, tx.clone());
        Arc::new(HubTransport {
            hub: self.clone(),
            tx,
            fail_sends: AtomicBool::new(false),
        })
    }
}

pub struct HubTransport {
    hub: Arc<SignalingHub>,
    tx: broadcast::Sender<String>,
    fail_sends: AtomicBool,
}

impl HubTransport {
    pub fn fail_sends(&self, yes: bool) {
        self.fail_sends.store(yes, Ordering::SeqCst);
    }
}

#[async_trait]
impl SignalingTransport for HubTransport {
    async fn send_message(&self, to: &str, payload: &str) -> Result<()> {
        if self.fail_sends.load(Ordering::SeqCst) {
            return Err(CallError::signaling("injected send failure"));
        }
        let to: UserId = to
            .parse()
            .map_err(|_| CallError::signaling(format!("bad user id {to}")))?;
        let target = self
            .hub
            .users
            .lock()
            .unwrap()
            .get(&to)
            .cloned()
            .ok_or_else(|| CallError::signaling(format!("unknown user {to}")))?;
        let _ = target.send(payload.to_string());
        Ok(())
    }

    fn incoming(&self) -> broadcast::Receiver<String> {
        self.tx.subscribe()
    }
}

// ===== Media =====

#[derive(Default)]
struct RoomState {
    /// user -> joined room
    joined: HashMap<UserId, String>,
    /// user -> published kinds
    published: HashMap<UserId, HashSet<MediaKind>>,
    clients: HashMap<UserId, broadcast::Sender<MediaEvent>>,
    /// (subscriber, publisher) -> handed-out remote tracks
    video_tracks: HashMap<(UserId, UserId), Arc<FakeVideoTrack>>,
    audio_tracks: HashMap<(UserId, UserId), Arc<FakeAudioTrack>>,
    /// user -> capture tracks created for it
    local_video: HashMap<UserId, Arc<FakeVideoTrack>>,
    local_audio: HashMap<UserId, Arc<FakeAudioTrack>>,
}

/// Shared fake of the media plane.
pub struct MediaRoom {
    state: Mutex<RoomState>,
    /// Deliver `FirstRemoteVideoFrame` to a subscriber as soon as it
    /// subscribes, simulating an immediately decoding stream.
    auto_first_frame: bool,
}

impl MediaRoom {
    pub fn new() -> Arc<Self> {
        Self::with_auto_first_frame(true)
    }

    pub fn with_auto_first_frame(auto_first_frame: bool) -> Arc<Self> {
        Arc::new(Self {
            state: Mutex::new(RoomState::default()),
            auto_first_frame,
        })
    }

    pub fn client(self: &Arc<Self>, user_id: UserId) -> Arc<FakeMediaClient> {
        let (tx, _) = broadcast::channel(64);
        self.state
            .lock()
            .unwrap()
            .clients
            .insert(user_id, tx.clone());
        Arc::new(FakeMediaClient {
            room: self.clone(),
            user_id,
            events_tx: tx,
            fail_join: AtomicBool::new(false),
        })
    }

    pub fn members_of(&self, room_id: &str) -> Vec<UserId> {
        let state = self.state.lock().unwrap();
        let mut members: Vec<UserId> = state
            .joined
            .iter()
            .filter(|(_, room)| room.as_str() == room_id)
            .map(|(user, _)| *user)
            .collect();
        members.sort_unstable();
        members
    }

    /// Deliver the first-frame-decoded notification for `publisher`'s video
    /// to every other member of its room.
    pub fn decode_first_frame(&self, publisher: UserId) {
        let state = self.state.lock().unwrap();
        let Some(room) = state.joined.get(&publisher).cloned() else {
            return;
        };
        for (user, joined_room) in &state.joined {
            if *user != publisher && *joined_room == room {
                if let Some(tx) = state.clients.get(user) {
                    let _ = tx.send(MediaEvent::FirstRemoteVideoFrame {
                        user_id: publisher,
                    });
                }
            }
        }
    }

    /// Inject a raw media event into one client's stream.
    pub fn emit_to(&self, user_id: UserId, event: MediaEvent) {
        if let Some(tx) = self.state.lock().unwrap().clients.get(&user_id) {
            let _ = tx.send(event);
        }
    }

    /// The remote video track `subscriber` last got for `publisher`.
    pub fn video_track(&self, subscriber: UserId, publisher: UserId) -> Option<Arc<FakeVideoTrack>> {
        self.state
            .lock()
            .unwrap()
            .video_tracks
            .get(&(subscriber, publisher))
            .cloned()
    }

    /// The remote audio track `subscriber` last got for `publisher`.
    pub fn audio_track(&self, subscriber: UserId, publisher: UserId) -> Option<Arc<FakeAudioTrack>> {
        self.state
            .lock()
            .unwrap()
            .audio_tracks
            .get(&(subscriber, publisher))
            .cloned()
    }

    /// The capture tracks created for `user_id`, if any.
    pub fn local_video_track(&self, user_id: UserId) -> Option<Arc<FakeVideoTrack>> {
        self.state.lock().unwrap().local_video.get(&user_id).cloned()
    }

    pub fn local_audio_track(&self, user_id: UserId) -> Option<Arc<FakeAudioTrack>> {
        self.state.lock().unwrap().local_audio.get(&user_id).cloned()
    }

    fn broadcast_to_room(state: &RoomState, room: &str, except: UserId, event: MediaEvent) {
        for (user, joined_room) in &state.joined {
            if *user != except && joined_room == room {
                if let Some(tx) = state.clients.get(user) {
                    let _ = tx.send(event);
                }
            }
        }
    }
}

pub struct FakeMediaClient {
    room: Arc<MediaRoom>,
    user_id: UserId,
    events_tx: broadcast::Sender<MediaEvent>,
    fail_join: AtomicBool,
}

impl FakeMediaClient {
    pub fn fail_join(&self, yes: bool) {
        self.fail_join.store(yes, Ordering::SeqCst);
    }
}

#[async_trait]
impl MediaClient for FakeMediaClient {
    async fn join(&self, _app_id: &str, room_id: &str, _token: &str, user_id: UserId) -> Result<()> {
        if self.fail_join.load(Ordering::SeqCst) {
            return Err(CallError::rtc("injected join failure"));
        }
        let mut state = self.room.state.lock().unwrap();
        if state.joined.contains_key(&user_id) {
            return Err(CallError::rtc("already joined"));
        }
        // Late-joiner sync: see existing members and their publications.
        for (member, joined_room) in state.joined.clone() {
            if joined_room != room_id {
                continue;
            }
            let _ = self.events_tx.send(MediaEvent::UserJoined { user_id: member });
            if let Some(kinds) = state.published.get(&member) {
                for kind in kinds {
                    let _ = self.events_tx.send(MediaEvent::UserPublished {
                        user_id: member,
                        kind: *kind,
                    });
                }
            }
        }
        state.joined.insert(user_id, room_id.to_string());
        MediaRoom::broadcast_to_room(&state, room_id, user_id, MediaEvent::UserJoined { user_id });
        Ok(())
    }

    async fn leave(&self) -> Result<()> {
        let mut state = self.room.state.lock().unwrap();
        let Some(room) = state.joined.remove(&self.user_id) else {
            return Ok(());
        };
        state.published.remove(&self.user_id);
        MediaRoom::broadcast_to_room(
            &state,
            &room,
            self.user_id,
            MediaEvent::UserLeft {
                user_id: self.user_id,
            },
        );
        Ok(())
    }

    async fn create_tracks(
        &self,
        video: Option<&VideoProfile>,
        _audio: &AudioProfile,
    ) -> Result<LocalTracks> {
        let video_track = video.map(|_| Arc::new(FakeVideoTrack::default()));
        let audio_track = Arc::new(FakeAudioTrack::default());
        {
            let mut state = self.room.state.lock().unwrap();
            if let Some(track) = &video_track {
                state.local_video.insert(self.user_id, track.clone());
            }
            state.local_audio.insert(self.user_id, audio_track.clone());
        }
        Ok(LocalTracks {
            video: video_track.map(|track| track as Arc<dyn VideoTrack>),
            audio: audio_track,
        })
    }

    async fn publish(&self, tracks: &LocalTracks) -> Result<()> {
        let mut state = self.room.state.lock().unwrap();
        let Some(room) = state.joined.get(&self.user_id).cloned() else {
            return Err(CallError::rtc("publish before join"));
        };
        let mut kinds = vec![MediaKind::Audio];
        if tracks.video.is_some() {
            kinds.push(MediaKind::Video);
        }
        state
            .published
            .entry(self.user_id)
            .or_default()
            .extend(kinds.iter().copied());
        for kind in kinds {
            MediaRoom::broadcast_to_room(
                &state,
                &room,
                self.user_id,
                MediaEvent::UserPublished {
                    user_id: self.user_id,
                    kind,
                },
            );
        }
        if tracks.video.is_some() {
            let _ = self.events_tx.send(MediaEvent::FirstLocalVideoFrame);
        }
        Ok(())
    }

    async fn subscribe_video(&self, user_id: UserId) -> Result<Arc<dyn VideoTrack>> {
        let track = Arc::new(FakeVideoTrack::default());
        {
            let mut state = self.room.state.lock().unwrap();
            let published = state
                .published
                .get(&user_id)
                .is_some_and(|kinds| kinds.contains(&MediaKind::Video));
            if !published {
                return Err(CallError::rtc(format!("user {user_id} has no video")));
            }
            state
                .video_tracks
                .insert((self.user_id, user_id), track.clone());
        }
        if self.room.auto_first_frame {
            let _ = self
                .events_tx
                .send(MediaEvent::FirstRemoteVideoFrame { user_id });
        }
        Ok(track)
    }

    async fn subscribe_audio(&self, user_id: UserId) -> Result<Arc<dyn AudioTrack>> {
        let track = Arc::new(FakeAudioTrack::default());
        let mut state = self.room.state.lock().unwrap();
        let published = state
            .published
            .get(&user_id)
            .is_some_and(|kinds| kinds.contains(&MediaKind::Audio));
        if !published {
            return Err(CallError::rtc(format!("user {user_id} has no audio")));
        }
        state
            .audio_tracks
            .insert((self.user_id, user_id), track.clone());
        Ok(track)
    }

    async fn unsubscribe(&self, _user_id: UserId, _kind: MediaKind) -> Result<()> {
        Ok(())
    }

    fn events(&self) -> broadcast::Receiver<MediaEvent> {
        self.events_tx.subscribe()
    }
}

// ===== Tracks and surfaces =====

#[derive(Default)]
pub struct FakeVideoTrack {
    playing: AtomicBool,
    closed: AtomicBool,
    plays: AtomicUsize,
}

impl FakeVideoTrack {
    pub fn play_count(&self) -> usize {
        self.plays.load(Ordering::SeqCst)
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }
}

impl VideoTrack for FakeVideoTrack {
    fn play(&self, _surface: &ViewHandle) -> Result<()> {
        self.playing.store(true, Ordering::SeqCst);
        self.plays.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    fn stop(&self) {
        self.playing.store(false, Ordering::SeqCst);
    }

    fn close(&self) {
        self.closed.store(true, Ordering::SeqCst);
    }

    fn is_playing(&self) -> bool {
        self.playing.load(Ordering::SeqCst)
    }
}

#[derive(Default)]
pub struct FakeAudioTrack {
    playing: AtomicBool,
    closed: AtomicBool,
}

impl FakeAudioTrack {
    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }
}

impl AudioTrack for FakeAudioTrack {
    fn play(&self) -> Result<()> {
        self.playing.store(true, Ordering::SeqCst);
        Ok(())
    }

    fn stop(&self) {
        self.playing.store(false, Ordering::SeqCst);
    }

    fn close(&self) {
        self.closed.store(true, Ordering::SeqCst);
    }

    fn is_playing(&self) -> bool {
        self.playing.load(Ordering::SeqCst)
    }
}

#[derive(Default)]
pub struct FakeSurface {
    clears: AtomicUsize,
}

impl FakeSurface {
    pub fn handle() -> (Arc<Self>, ViewHandle) {
        let surface = Arc::new(Self::default());
        let handle: ViewHandle = surface.clone();
        (surface, handle)
    }

    pub fn clear_count(&self) -> usize {
        self.clears.load(Ordering::SeqCst)
    }
}

impl VideoSurface for FakeSurface {
    fn clear(&self) {
        self.clears.fetch_add(1, Ordering::SeqCst);
    }
}

// ===== Event recording =====

/// Buffers an engine's four observation streams for assertion.
pub struct Recorder {
    pub states: mpsc::UnboundedReceiver<StateChange>,
    pub events: mpsc::UnboundedReceiver<CallEvent>,
    pub errors: mpsc::UnboundedReceiver<ErrorNotice>,
    pub infos: mpsc::UnboundedReceiver<CallInfoSnapshot>,
}

impl Recorder {
    pub fn attach(engine: &CallEngine) -> Self {
        let (state_tx, states) = mpsc::unbounded_channel();
        engine.on_call_state_changed(move |change| {
            let _ = state_tx.send(change.clone());
        });
        let (event_tx, events) = mpsc::unbounded_channel();
        engine.on_call_event_changed(move |event| {
            let _ = event_tx.send(*event);
        });
        let (error_tx, errors) = mpsc::unbounded_channel();
        engine.on_call_error(move |notice| {
            let _ = error_tx.send(notice.clone());
        });
        let (info_tx, infos) = mpsc::unbounded_channel();
        engine.on_call_info_changed(move |snapshot| {
            let _ = info_tx.send(snapshot.clone());
        });
        Self {
            states,
            events,
            errors,
            infos,
        }
    }

    /// Next state change, failing the test after a grace period.
    pub async fn next_state(&mut self) -> StateChange {
        tokio::time::timeout(WAIT, self.states.recv())
            .await
            .expect("timed out waiting for a state change")
            .expect("state stream closed")
    }

    pub async fn expect_state(&mut self, state: CallState, reason: CallStateReason) -> StateChange {
        let change = self.next_state().await;
        assert_eq!(change.state, state, "unexpected state in {change:?}");
        assert_eq!(change.reason, reason, "unexpected reason in {change:?}");
        change
    }

    /// Skip events until `wanted` shows up.
    pub async fn wait_event(&mut self, wanted: CallEvent) {
        loop {
            let event = tokio::time::timeout(WAIT, self.events.recv())
                .await
                .unwrap_or_else(|_| panic!("timed out waiting for {wanted:?}"))
                .expect("event stream closed");
            if event == wanted {
                return;
            }
        }
    }

    pub async fn next_info(&mut self) -> CallInfoSnapshot {
        tokio::time::timeout(WAIT, self.infos.recv())
            .await
            .expect("timed out waiting for a call info snapshot")
            .expect("info stream closed")
    }

    pub fn drain_events(&mut self) -> Vec<CallEvent> {
        let mut drained = Vec::new();
        while let Ok(event) = self.events.try_recv() {
            drained.push(event);
        }
        drained
    }

    pub fn drain_states(&mut self) -> Vec<StateChange> {
        let mut drained = Vec::new();
        while let Ok(change) = self.states.try_recv() {
            drained.push(change);
        }
        drained
    }

    pub fn drain_errors(&mut self) -> Vec<ErrorNotice> {
        let mut drained = Vec::new();
        while let Ok(notice) = self.errors.try_recv() {
            drained.push(notice);
        }
        drained
    }
}

/// Let the routers on both sides settle.
pub async fn settle() {
    tokio::time::sleep(Duration::from_millis(50)).await;
}
