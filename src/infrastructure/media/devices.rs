//! Local capture devices

use crate::config::DevicesConfig;
use crate::domain::media::{LocalStream, LocalTrack, MediaConstraints, MediaError, TrackKind};
use async_trait::async_trait;
use std::collections::HashSet;
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::sync::Mutex;
use tracing::{debug, warn};
use uuid::Uuid;

/// Access to camera and microphone
#[async_trait]
pub trait MediaDevices: Send + Sync {
    /// Open a capture stream; each track holds one device handle
    async fn open(&self, constraints: MediaConstraints) -> Result<LocalStream, MediaError>;

    /// Release the stream's handles; returns how many were actually released
    async fn release(&self, stream: &LocalStream) -> usize;

    async fn open_handles(&self) -> usize;
}

/// Devices described by configuration
///
/// Used by the server binary and tests; a permission refusal or a missing
/// device surfaces as `MediaError::AccessDenied`.
pub struct VirtualDevices {
    config: DevicesConfig,
    next_handle: AtomicU64,
    open: Mutex<HashSet<u64>>,
}

impl VirtualDevices {
    pub fn new(config: DevicesConfig) -> Self {
        Self {
            config,
            next_handle: AtomicU64::new(1),
            open: Mutex::new(HashSet::new()),
        }
    }

    fn track(&self, kind: TrackKind) -> LocalTrack {
        LocalTrack {
            id: format!("{}-{}", kind.as_str(), Uuid::new_v4()),
            kind,
            device_handle: self.next_handle.fetch_add(1, Ordering::Relaxed),
        }
    }
}

impl Default for VirtualDevices {
    fn default() -> Self {
        Self::new(DevicesConfig::default())
    }
}

#[async_trait]
impl MediaDevices for VirtualDevices {
    async fn open(&self, constraints: MediaConstraints) -> Result<LocalStream, MediaError> {
        if !self.config.permission_granted {
            return Err(MediaError::AccessDenied("permission refused".to_string()));
        }
        if constraints.video && !self.config.camera {
            return Err(MediaError::AccessDenied("no camera found".to_string()));
        }
        if constraints.audio && !self.config.microphone {
            return Err(MediaError::AccessDenied("no microphone found".to_string()));
        }

        let mut tracks = Vec::new();
        if constraints.audio {
            tracks.push(self.track(TrackKind::Audio));
        }
        if constraints.video {
            tracks.push(self.track(TrackKind::Video));
        }

        let mut open = self.open.lock().await;
        for track in &tracks {
            open.insert(track.device_handle);
        }

        let stream = LocalStream {
            id: Uuid::new_v4().to_string(),
            tracks,
        };
        debug!(stream_id = %stream.id, handles = open.len(), "Local media opened");
        Ok(stream)
    }

    async fn release(&self, stream: &LocalStream) -> usize {
        let mut open = self.open.lock().await;
        let released = stream
            .tracks
            .iter()
            .filter(|t| open.remove(&t.device_handle))
            .count();

        if released < stream.tracks.len() {
            warn!(stream_id = %stream.id, "Some device handles were already released");
        }
        released
    }

    async fn open_handles(&self) -> usize {
        self.open.lock().await.len()
    }
}
