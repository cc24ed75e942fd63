//! Media value objects shared by the provider adapters and the state machine

use crate::domain::call::EndReason;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

/// Concrete media transport, selected by configuration
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProviderKind {
    /// Direct peer-to-peer link (host and server-reflexive candidates)
    PeerLink,
    /// Media forced through a TURN relay
    Relay,
    /// Hosted conferencing room
    Hosted,
}

impl ProviderKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ProviderKind::PeerLink => "peer_link",
            ProviderKind::Relay => "relay",
            ProviderKind::Hosted => "hosted",
        }
    }
}

impl fmt::Display for ProviderKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ProviderKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "peer_link" => Ok(ProviderKind::PeerLink),
            "relay" => Ok(ProviderKind::Relay),
            "hosted" => Ok(ProviderKind::Hosted),
            other => Err(format!("unknown provider kind: {other}")),
        }
    }
}

/// Media errors reported by devices and provider adapters
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum MediaError {
    #[error("Media access denied: {0}")]
    AccessDenied(String),

    #[error("Provider error: {0}")]
    Provider(String),

    #[error("Negotiation error: {0}")]
    Negotiation(String),

    #[error("Transport unavailable: {0}")]
    TransportUnavailable(String),
}

impl MediaError {
    /// Terminal reason a session ends with when this error occurs
    pub fn end_reason(&self) -> EndReason {
        match self {
            MediaError::AccessDenied(_) => EndReason::MediaAccessDenied,
            MediaError::Provider(_) | MediaError::Negotiation(_) => EndReason::ProviderError,
            MediaError::TransportUnavailable(_) => EndReason::TransportUnavailable,
        }
    }
}

/// Requested local capture
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct MediaConstraints {
    pub audio: bool,
    pub video: bool,
}

impl Default for MediaConstraints {
    fn default() -> Self {
        Self {
            audio: true,
            video: true,
        }
    }
}

/// Kind of a media track
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TrackKind {
    Audio,
    Video,
}

impl TrackKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            TrackKind::Audio => "audio",
            TrackKind::Video => "video",
        }
    }
}

/// A captured local track, backed by a device handle
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LocalTrack {
    pub id: String,
    pub kind: TrackKind,
    pub device_handle: u64,
}

/// Local capture stream
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LocalStream {
    pub id: String,
    pub tracks: Vec<LocalTrack>,
}

impl LocalStream {
    pub fn has_video(&self) -> bool {
        self.tracks.iter().any(|t| t.kind == TrackKind::Video)
    }
}

/// Stream received from the remote participant
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoteStream {
    pub id: String,
    pub track_kinds: Vec<TrackKind>,
}

/// SDP description type
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SdpType {
    Offer,
    Answer,
}

/// Session description exchanged over signaling
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionDescription {
    #[serde(rename = "type")]
    pub sdp_type: SdpType,
    pub sdp: String,
}

impl SessionDescription {
    pub fn offer(sdp: impl Into<String>) -> Self {
        Self {
            sdp_type: SdpType::Offer,
            sdp: sdp.into(),
        }
    }

    pub fn answer(sdp: impl Into<String>) -> Self {
        Self {
            sdp_type: SdpType::Answer,
            sdp: sdp.into(),
        }
    }
}

/// ICE candidate as carried by signaling (trickle)
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IceCandidate {
    pub candidate: String,
    pub sdp_mid: Option<String>,
    pub sdp_m_line_index: Option<u32>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_media_error_maps_to_single_reason() {
        assert_eq!(
            MediaError::AccessDenied("camera".into()).end_reason(),
            EndReason::MediaAccessDenied
        );
        assert_eq!(MediaError::Provider("x".into()).end_reason(), EndReason::ProviderError);
        assert_eq!(
            MediaError::TransportUnavailable("x".into()).end_reason(),
            EndReason::TransportUnavailable
        );
    }

    #[test]
    fn test_provider_kind_parse() {
        assert_eq!("relay".parse::<ProviderKind>().unwrap(), ProviderKind::Relay);
        assert!("sip".parse::<ProviderKind>().is_err());
    }
}
