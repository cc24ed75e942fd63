//! Trickle-ICE adapter for direct peer links and TURN-relayed links

use super::devices::MediaDevices;
use super::provider::{
    Callbacks, LocalCandidateCallback, ParticipantLeftCallback, ProviderAdapter, RemoteStreamCallback,
};
use super::sdp::{CandidateLine, CandidateType, IceCredentials, RemoteSdp, SessionSdp};
use crate::config::ProviderConfig;
use crate::domain::media::{
    IceCandidate, LocalStream, MediaConstraints, MediaError, ProviderKind, RemoteStream, SdpType,
    SessionDescription,
};
use crate::domain::shared::value_objects::SessionId;
use async_trait::async_trait;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

#[derive(Default)]
struct IceState {
    session_id: Option<SessionId>,
    remote: Option<RemoteSdp>,
    remote_candidates: Vec<CandidateLine>,
    stream_announced: bool,
    closed: bool,
    gatherer: Option<JoinHandle<()>>,
}

/// ICE transport
///
/// `PeerLink` offers host and server-reflexive candidates, `Relay` only the
/// relay candidate allocated on the TURN server. The remote stream is
/// reported once the remote description is applied and a remote candidate
/// has arrived.
pub struct IceAdapter {
    kind: ProviderKind,
    config: ProviderConfig,
    devices: Arc<dyn MediaDevices>,
    credentials: IceCredentials,
    callbacks: Arc<Callbacks>,
    state: Mutex<IceState>,
}

impl IceAdapter {
    pub fn new(kind: ProviderKind, config: ProviderConfig, devices: Arc<dyn MediaDevices>) -> Self {
        Self {
            kind,
            config,
            devices,
            credentials: IceCredentials::generate(),
            callbacks: Arc::new(Callbacks::default()),
            state: Mutex::new(IceState::default()),
        }
    }

    fn parse_addr(addr: &str) -> Option<SocketAddr> {
        match addr.parse() {
            Ok(addr) => Some(addr),
            Err(_) => {
                warn!("Ignoring invalid candidate address {}", addr);
                None
            }
        }
    }

    /// Candidates this side can offer, in priority order
    fn local_candidates(&self) -> Vec<CandidateLine> {
        let hosts: Vec<SocketAddr> = self
            .config
            .host_addresses
            .iter()
            .filter_map(|a| Self::parse_addr(a))
            .collect();

        match self.kind {
            ProviderKind::Relay => self
                .config
                .turn_server
                .as_deref()
                .and_then(Self::parse_addr)
                .map(|relay| {
                    let mut candidate = CandidateLine::new(CandidateType::Relay, relay, 1);
                    if let Some(base) = hosts.first() {
                        candidate = candidate.with_related_address(*base);
                    }
                    vec![candidate]
                })
                .unwrap_or_default(),
            _ => {
                let mut candidates: Vec<CandidateLine> = hosts
                    .iter()
                    .map(|addr| CandidateLine::new(CandidateType::Host, *addr, 1))
                    .collect();
                let reflexive = self.config.stun_server.as_deref().and_then(Self::parse_addr);
                if let (Some(public), Some(base)) = (reflexive, hosts.first()) {
                    candidates.push(
                        CandidateLine::new(CandidateType::ServerReflexive, public, 1).with_related_address(*base),
                    );
                }
                candidates
            }
        }
    }

    /// Start trickling local candidates, one callback per candidate
    fn start_gathering(&self, state: &mut IceState) -> Result<(), MediaError> {
        let candidates = self.local_candidates();
        if candidates.is_empty() {
            return Err(MediaError::TransportUnavailable(format!(
                "no {} candidates available",
                self.kind
            )));
        }

        if let Some(previous) = state.gatherer.take() {
            previous.abort();
        }

        let callbacks = self.callbacks.clone();
        let session_id = state.session_id;
        state.gatherer = Some(tokio::spawn(async move {
            for line in candidates {
                tokio::task::yield_now().await;
                debug!(session_id = ?session_id, "Local candidate {}", line.to_sdp());
                callbacks.local_candidate(IceCandidate {
                    candidate: line.to_sdp(),
                    sdp_mid: Some("0".to_string()),
                    sdp_m_line_index: Some(0),
                });
            }
        }));
        Ok(())
    }

    fn maybe_announce(&self, state: &mut IceState) {
        if state.stream_announced || state.closed || state.remote_candidates.is_empty() {
            return;
        }
        let Some(ref remote) = state.remote else {
            return;
        };

        state.stream_announced = true;
        let stream = RemoteStream {
            id: format!("remote-{}", remote.ice_ufrag.as_deref().unwrap_or("anon")),
            track_kinds: remote.media_kinds.clone(),
        };
        info!(session_id = ?state.session_id, "Remote media flowing over {}", self.kind);
        self.callbacks.remote_stream(stream);
    }

    fn ensure_open(state: &IceState) -> Result<(), MediaError> {
        if state.closed {
            return Err(MediaError::TransportUnavailable("connection closed".to_string()));
        }
        Ok(())
    }
}

#[async_trait]
impl ProviderAdapter for IceAdapter {
    fn kind(&self) -> ProviderKind {
        self.kind
    }

    async fn create_session(&self) -> Result<serde_json::Value, MediaError> {
        if self.kind == ProviderKind::Relay && self.config.turn_server.is_none() {
            return Err(MediaError::Provider("no TURN server configured".to_string()));
        }
        Ok(serde_json::json!({ "provider": self.kind }))
    }

    async fn join(&self, session_id: &SessionId, _payload: &serde_json::Value) -> Result<(), MediaError> {
        let mut state = self.state.lock().await;
        Self::ensure_open(&state)?;
        state.session_id = Some(*session_id);
        Ok(())
    }

    async fn leave(&self, session_id: &SessionId) -> Result<(), MediaError> {
        let mut state = self.state.lock().await;
        if state.closed {
            return Ok(());
        }
        state.closed = true;
        if let Some(gatherer) = state.gatherer.take() {
            gatherer.abort();
        }
        debug!(%session_id, "ICE connection closed");
        Ok(())
    }

    async fn open_local_media(&self, constraints: MediaConstraints) -> Result<LocalStream, MediaError> {
        self.devices.open(constraints).await
    }

    async fn release_local_media(&self, stream: &LocalStream) -> usize {
        self.devices.release(stream).await
    }

    async fn create_offer(&self, local: &LocalStream) -> Result<SessionDescription, MediaError> {
        let mut state = self.state.lock().await;
        Self::ensure_open(&state)?;

        let sdp = SessionSdp::for_stream(SdpType::Offer, local, self.credentials.clone());
        self.start_gathering(&mut state)?;
        Ok(SessionDescription::offer(sdp.to_sdp_string()))
    }

    async fn create_answer(
        &self,
        offer: &SessionDescription,
        local: &LocalStream,
    ) -> Result<SessionDescription, MediaError> {
        if offer.sdp_type != SdpType::Offer {
            return Err(MediaError::Negotiation("expected an offer".to_string()));
        }
        let remote = RemoteSdp::parse(&offer.sdp)?;

        let mut state = self.state.lock().await;
        Self::ensure_open(&state)?;
        state.remote = Some(remote);

        let sdp = SessionSdp::for_stream(SdpType::Answer, local, self.credentials.clone());
        self.start_gathering(&mut state)?;
        self.maybe_announce(&mut state);
        Ok(SessionDescription::answer(sdp.to_sdp_string()))
    }

    async fn set_remote_answer(&self, answer: &SessionDescription) -> Result<(), MediaError> {
        if answer.sdp_type != SdpType::Answer {
            return Err(MediaError::Negotiation("expected an answer".to_string()));
        }
        let remote = RemoteSdp::parse(&answer.sdp)?;

        let mut state = self.state.lock().await;
        Self::ensure_open(&state)?;
        state.remote = Some(remote);
        self.maybe_announce(&mut state);
        Ok(())
    }

    async fn add_remote_candidate(&self, candidate: &IceCandidate) -> Result<(), MediaError> {
        let line = CandidateLine::parse(&candidate.candidate)?;

        let mut state = self.state.lock().await;
        Self::ensure_open(&state)?;
        if state.remote.is_none() {
            return Err(MediaError::Negotiation("remote description not set".to_string()));
        }
        state.remote_candidates.push(line);
        self.maybe_announce(&mut state);
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
