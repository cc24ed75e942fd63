//! Provider adapter contract and selection

use super::devices::MediaDevices;
use super::hosted::{HostedAdapter, HostedRooms};
use super::ice::IceAdapter;
use super::lock;
use crate::config::ProviderConfig;
use crate::domain::media::{
    IceCandidate, LocalStream, MediaConstraints, MediaError, ProviderKind, RemoteStream,
    SessionDescription,
};
use crate::domain::shared::value_objects::SessionId;
use async_trait::async_trait;
use std::sync::{Arc, Mutex};

pub type RemoteStreamCallback = Arc<dyn Fn(RemoteStream) + Send + Sync>;
pub type ParticipantLeftCallback = Arc<dyn Fn() + Send + Sync>;
pub type LocalCandidateCallback = Arc<dyn Fn(IceCandidate) + Send + Sync>;

/// Uniform interface over a concrete media transport
///
/// One adapter instance serves one call session. The caller's side runs
/// `create_session` first and ships the returned payload inside the
/// invitation; both sides then `join` with that payload.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait ProviderAdapter: Send + Sync {
    fn kind(&self) -> ProviderKind;

    /// Allocate provider-side resources; the result travels in the invitation
    async fn create_session(&self) -> Result<serde_json::Value, MediaError>;

    async fn join(&self, session_id: &SessionId, payload: &serde_json::Value) -> Result<(), MediaError>;

    /// Close the connection; repeated calls are no-ops
    async fn leave(&self, session_id: &SessionId) -> Result<(), MediaError>;

    async fn open_local_media(&self, constraints: MediaConstraints) -> Result<LocalStream, MediaError>;

    /// Stop the stream's tracks; returns the number of device handles released
    async fn release_local_media(&self, stream: &LocalStream) -> usize;

    async fn create_offer(&self, local: &LocalStream) -> Result<SessionDescription, MediaError>;

    async fn create_answer(
        &self,
        offer: &SessionDescription,
        local: &LocalStream,
    ) -> Result<SessionDescription, MediaError>;

    async fn set_remote_answer(&self, answer: &SessionDescription) -> Result<(), MediaError>;

    async fn add_remote_candidate(&self, candidate: &IceCandidate) -> Result<(), MediaError>;

    fn on_remote_stream(&self, callback: RemoteStreamCallback);

    fn on_participant_left(&self, callback: ParticipantLeftCallback);

    /// Trickle: invoked once per locally discovered candidate
    fn on_local_candidate(&self, callback: LocalCandidateCallback);
}

/// Registered adapter callbacks
#[derive(Default)]
pub struct Callbacks {
    remote_stream: Mutex<Option<RemoteStreamCallback>>,
    participant_left: Mutex<Option<ParticipantLeftCallback>>,
    local_candidate: Mutex<Option<LocalCandidateCallback>>,
}

impl Callbacks {
    pub fn set_remote_stream(&self, callback: RemoteStreamCallback) {
        *lock(&self.remote_stream) = Some(callback);
    }

    pub fn set_participant_left(&self, callback: ParticipantLeftCallback) {
        *lock(&self.participant_left) = Some(callback);
    }

    pub fn set_local_candidate(&self, callback: LocalCandidateCallback) {
        *lock(&self.local_candidate) = Some(callback);
    }

    pub fn remote_stream(&self, stream: RemoteStream) {
        let callback = lock(&self.remote_stream).clone();
        if let Some(callback) = callback {
            callback(stream);
        }
    }

    pub fn participant_left(&self) {
        let callback = lock(&self.participant_left).clone();
        if let Some(callback) = callback {
            callback();
        }
    }

    pub fn local_candidate(&self, candidate: IceCandidate) {
        let callback = lock(&self.local_candidate).clone();
        if let Some(callback) = callback {
            callback(candidate);
        }
    }
}

/// Builds the adapter for a session from configuration
pub struct ProviderFactory {
    config: ProviderConfig,
    devices: Arc<dyn MediaDevices>,
    rooms: Arc<HostedRooms>,
}

impl ProviderFactory {
    pub fn new(config: ProviderConfig, devices: Arc<dyn MediaDevices>) -> Self {
        Self {
            config,
            devices,
            rooms: Arc::new(HostedRooms::default()),
        }
    }

    /// Provider used for calls placed from this process
    pub fn default_kind(&self) -> ProviderKind {
        self.config.kind
    }

    pub fn devices(&self) -> &Arc<dyn MediaDevices> {
        &self.devices
    }

    pub fn create(&self, kind: ProviderKind) -> Arc<dyn ProviderAdapter> {
        match kind {
            ProviderKind::PeerLink | ProviderKind::Relay => {
                Arc::new(IceAdapter::new(kind, self.config.clone(), self.devices.clone()))
            }
            ProviderKind::Hosted => Arc::new(HostedAdapter::new(
                self.config.hosted_base_url.clone(),
                self.devices.clone(),
                self.rooms.clone(),
            )),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::infrastructure::media::devices::VirtualDevices;

    #[test]
    fn test_factory_selects_variant() {
        let factory = ProviderFactory::new(ProviderConfig::default(), Arc::new(VirtualDevices::default()));
        assert_eq!(factory.default_kind(), ProviderKind::PeerLink);

        for kind in [ProviderKind::PeerLink, ProviderKind::Relay, ProviderKind::Hosted] {
            assert_eq!(factory.create(kind).kind(), kind);
        }
    }

    #[test]
    fn test_callbacks_fire_when_registered() {
        let callbacks = Callbacks::default();
        callbacks.participant_left();

        let fired = Arc::new(std::sync::atomic::AtomicUsize::new(0));
        let counter = fired.clone();
        callbacks.set_participant_left(Arc::new(move || {
            counter.fetch_add(1, std::sync::atomic::Ordering::SeqCst);
        }));
        callbacks.participant_left();
        assert_eq!(fired.load(std::sync::atomic::Ordering::SeqCst), 1);
    }
}
