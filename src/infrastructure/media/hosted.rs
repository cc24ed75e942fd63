//! Hosted conferencing room adapter

use super::devices::MediaDevices;
use super::lock;
use super::provider::{
    Callbacks, LocalCandidateCallback, ParticipantLeftCallback, ProviderAdapter, RemoteStreamCallback,
};
use super::sdp::{IceCredentials, RemoteSdp, SessionSdp};
use crate::domain::media::{
    IceCandidate, LocalStream, MediaConstraints, MediaError, ProviderKind, RemoteStream, SdpType,
    SessionDescription,
};
use crate::domain::shared::value_objects::SessionId;
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use tracing::{debug, info};
use uuid::Uuid;

/// Room membership known to this process
#[derive(Default)]
pub struct HostedRooms {
    rooms: Mutex<HashMap<String, Vec<(u64, Arc<Callbacks>)>>>,
    next_member: AtomicU64,
}

impl HostedRooms {
    fn member_id(&self) -> u64 {
        self.next_member.fetch_add(1, Ordering::Relaxed)
    }

    fn enter(&self, room: &str, member: u64, callbacks: Arc<Callbacks>) {
        lock(&self.rooms)
            .entry(room.to_string())
            .or_default()
            .push((member, callbacks));
    }

    /// Remove `member`; the remaining members are told a participant left
    fn exit(&self, room: &str, member: u64) {
        let remaining: Vec<Arc<Callbacks>> = {
            let mut rooms = lock(&self.rooms);
            let Some(members) = rooms.get_mut(room) else {
                return;
            };
            members.retain(|(id, _)| *id != member);
            let remaining = members.iter().map(|(_, cb)| cb.clone()).collect();
            if members.is_empty() {
                rooms.remove(room);
            }
            remaining
        };

        for callbacks in remaining {
            callbacks.participant_left();
        }
    }

    pub fn occupancy(&self, room: &str) -> usize {
        lock(&self.rooms).get(room).map(Vec::len).unwrap_or(0)
    }
}

struct HostedState {
    room: Option<String>,
    announced: bool,
    closed: bool,
}

/// Both participants join the same room; media is relayed by the host
///
/// No candidates are trickled. The remote stream is reported as soon as the
/// remote description naming the same room is applied.
pub struct HostedAdapter {
    base_url: String,
    devices: Arc<dyn MediaDevices>,
    rooms: Arc<HostedRooms>,
    member: u64,
    callbacks: Arc<Callbacks>,
    state: tokio::sync::Mutex<HostedState>,
}

impl HostedAdapter {
    pub fn new(base_url: String, devices: Arc<dyn MediaDevices>, rooms: Arc<HostedRooms>) -> Self {
        let member = rooms.member_id();
        Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            devices,
            rooms,
            member,
            callbacks: Arc::new(Callbacks::default()),
            state: tokio::sync::Mutex::new(HostedState {
                room: None,
                announced: false,
                closed: false,
            }),
        }
    }

    fn joined_room(state: &HostedState) -> Result<String, MediaError> {
        if state.closed {
            return Err(MediaError::TransportUnavailable("left the room".to_string()));
        }
        state
            .room
            .clone()
            .ok_or_else(|| MediaError::Provider("room not joined".to_string()))
    }

    fn accept_remote(&self, state: &mut HostedState, description: &SessionDescription) -> Result<(), MediaError> {
        let room = Self::joined_room(state)?;
        let remote = RemoteSdp::parse(&description.sdp)?;
        if remote.room.as_deref() != Some(room.as_str()) {
            return Err(MediaError::Negotiation(format!(
                "remote description is not for room {room}"
            )));
        }

        if !state.announced {
            state.announced = true;
            self.callbacks.remote_stream(RemoteStream {
                id: format!("{room}#{}", remote.ice_ufrag.as_deref().unwrap_or("peer")),
                track_kinds: remote.media_kinds,
            });
        }
        Ok(())
    }
}

#[async_trait]
impl ProviderAdapter for HostedAdapter {
    fn kind(&self) -> ProviderKind {
        ProviderKind::Hosted
    }

    async fn create_session(&self) -> Result<serde_json::Value, MediaError> {
        let room = format!("{}/{}", self.base_url, Uuid::new_v4());
        info!("Created hosted room {}", room);
        Ok(serde_json::json!({ "provider": ProviderKind::Hosted, "room": room }))
    }

    async fn join(&self, session_id: &SessionId, payload: &serde_json::Value) -> Result<(), MediaError> {
        let room = payload
            .get("room")
            .and_then(|r| r.as_str())
            .ok_or_else(|| MediaError::Provider("invitation carries no room".to_string()))?;

        let mut state = self.state.lock().await;
        if state.closed {
            return Err(MediaError::TransportUnavailable("left the room".to_string()));
        }
        if state.room.is_none() {
            self.rooms.enter(room, self.member, self.callbacks.clone());
            state.room = Some(room.to_string());
            debug!(%session_id, room, "Joined hosted room");
        }
        Ok(())
    }

    async fn leave(&self, session_id: &SessionId) -> Result<(), MediaError> {
        let mut state = self.state.lock().await;
        if state.closed {
            return Ok(());
        }
        state.closed = true;
        if let Some(ref room) = state.room {
            self.rooms.exit(room, self.member);
            debug!(%session_id, room = room.as_str(), "Left hosted room");
        }
        Ok(())
    }

    async fn open_local_media(&self, constraints: MediaConstraints) -> Result<LocalStream, MediaError> {
        self.devices.open(constraints).await
    }

    async fn release_local_media(&self, stream: &LocalStream) -> usize {
        self.devices.release(stream).await
    }

    async fn create_offer(&self, local: &LocalStream) -> Result<SessionDescription, MediaError> {
        let state = self.state.lock().await;
        let room = Self::joined_room(&state)?;
        let sdp = SessionSdp::for_stream(SdpType::Offer, local, IceCredentials::generate()).with_room(room);
        Ok(SessionDescription::offer(sdp.to_sdp_string()))
    }

    async fn create_answer(
        &self,
        offer: &SessionDescription,
        local: &LocalStream,
    ) -> Result<SessionDescription, MediaError> {
        let mut state = self.state.lock().await;
        self.accept_remote(&mut state, offer)?;
        let room = Self::joined_room(&state)?;
        let sdp = SessionSdp::for_stream(SdpType::Answer, local, IceCredentials::generate()).with_room(room);
        Ok(SessionDescription::answer(sdp.to_sdp_string()))
    }

    async fn set_remote_answer(&self, answer: &SessionDescription) -> Result<(), MediaError> {
        let mut state = self.state.lock().await;
        self.accept_remote(&mut state, answer)
    }

    async fn add_remote_candidate(&self, _candidate: &IceCandidate) -> Result<(), MediaError> {
        Ok(())
    }

    fn on_remote_stream(&self, callback: RemoteStreamCallback) {
        self.callbacks.set_remote_stream(callback);
    }

    fn on_participant_left(&self, callback: ParticipantLeftCallback) {
        self.callbacks.set_participant_left(callback);
    }

    fn on_local_candidate(&self, callback: LocalCandidateCallback) {
        self.callbacks.set_local_candidate(callback);
    }
}
