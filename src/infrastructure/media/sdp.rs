/// SDP generation and parsing for negotiated sessions
use crate::domain::media::{LocalStream, MediaError, SdpType, TrackKind};
use rand::distributions::Alphanumeric;
use rand::{Rng, RngCore};
use sha2::{Digest, Sha256};
use std::net::SocketAddr;

/// ICE candidate types
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CandidateType {
    /// Local interface address
    Host,
    /// Public address discovered via STUN
    ServerReflexive,
    /// Address allocated on a TURN relay
    Relay,
}

impl CandidateType {
    pub fn priority_preference(&self) -> u32 {
        match self {
            CandidateType::Host => 126,
            CandidateType::ServerReflexive => 100,
            CandidateType::Relay => 0,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            CandidateType::Host => "host",
            CandidateType::ServerReflexive => "srflx",
            CandidateType::Relay => "relay",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "host" => Some(CandidateType::Host),
            "srflx" => Some(CandidateType::ServerReflexive),
            "relay" => Some(CandidateType::Relay),
            _ => None,
        }
    }
}

/// Parsed `candidate:` attribute
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CandidateLine {
    pub foundation: String,
    pub component: u16,
    pub priority: u32,
    pub address: SocketAddr,
    pub candidate_type: CandidateType,
    pub related_address: Option<SocketAddr>,
}

impl CandidateLine {
    pub fn new(candidate_type: CandidateType, address: SocketAddr, component: u16) -> Self {
        let mut hasher = Sha256::new();
        hasher.update(candidate_type.as_str().as_bytes());
        hasher.update(address.to_string().as_bytes());
        let foundation = hex::encode(&hasher.finalize()[..4]);

        Self {
            foundation,
            component,
            priority: Self::compute_priority(candidate_type, component),
            address,
            candidate_type,
            related_address: None,
        }
    }

    pub fn with_related_address(mut self, related: SocketAddr) -> Self {
        self.related_address = Some(related);
        self
    }

    /// priority = (2^24)*(type preference) + (2^8)*(local preference) + (256 - component ID)
    pub fn compute_priority(candidate_type: CandidateType, component: u16) -> u32 {
        let type_pref = candidate_type.priority_preference();
        let local_pref = 65535u32;
        (1 << 24) * type_pref + (1 << 8) * local_pref + (256 - component as u32)
    }

    /// Example: "candidate:1a2b3c4d 1 UDP 2130706431 192.168.1.100 5000 typ host"
    pub fn to_sdp(&self) -> String {
        let mut line = format!(
            "candidate:{} {} UDP {} {} {} typ {}",
            self.foundation,
            self.component,
            self.priority,
            self.address.ip(),
            self.address.port(),
            self.candidate_type.as_str()
        );

        if let Some(related) = self.related_address {
            line.push_str(&format!(" raddr {} rport {}", related.ip(), related.port()));
        }
        line
    }

    pub fn parse(line: &str) -> Result<Self, MediaError> {
        let invalid = |what: &str| MediaError::Negotiation(format!("invalid candidate ({what}): {line}"));
        let parts: Vec<&str> = line.split_whitespace().collect();

        if parts.len() < 8 {
            return Err(invalid("too short"));
        }

        let foundation = parts[0].trim_start_matches("candidate:").to_string();
        let component = parts[1].parse::<u16>().map_err(|_| invalid("component"))?;
        if !parts[2].eq_ignore_ascii_case("udp") {
            return Err(invalid("transport"));
        }
        let priority = parts[3].parse::<u32>().map_err(|_| invalid("priority"))?;
        let address: SocketAddr = format!("{}:{}", parts[4], parts[5])
            .parse()
            .map_err(|_| invalid("address"))?;

        let typ_idx = parts
            .iter()
            .position(|&p| p == "typ")
            .ok_or_else(|| invalid("missing typ"))?;
        let candidate_type = parts
            .get(typ_idx + 1)
            .and_then(|t| CandidateType::parse(t))
            .ok_or_else(|| invalid("type"))?;

        let related_address = match (
            parts.iter().position(|&p| p == "raddr"),
            parts.iter().position(|&p| p == "rport"),
        ) {
            (Some(r), Some(p)) => match (parts.get(r + 1), parts.get(p + 1)) {
                (Some(ip), Some(port)) => format!("{ip}:{port}").parse().ok(),
                _ => None,
            },
            _ => None,
        };

        Ok(Self {
            foundation,
            component,
            priority,
            address,
            candidate_type,
            related_address,
        })
    }
}

/// RTP codec
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RtpCodec {
    pub payload_type: u8,
    pub name: &'static str,
    pub clock_rate: u32,
    pub channels: Option<u8>,
}

impl RtpCodec {
    pub fn opus() -> Self {
        Self {
            payload_type: 111,
            name: "opus",
            clock_rate: 48000,
            channels: Some(2),
        }
    }

    pub fn vp8() -> Self {
        Self {
            payload_type: 96,
            name: "VP8",
            clock_rate: 90000,
            channels: None,
        }
    }

    /// "96 VP8/90000"
    pub fn to_rtpmap(&self) -> String {
        match self.channels {
            Some(channels) => format!("{} {}/{}/{}", self.payload_type, self.name, self.clock_rate, channels),
            None => format!("{} {}/{}", self.payload_type, self.name, self.clock_rate),
        }
    }

    fn for_track(kind: TrackKind) -> Self {
        match kind {
            TrackKind::Audio => Self::opus(),
            TrackKind::Video => Self::vp8(),
        }
    }
}

/// ICE username fragment and password
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IceCredentials {
    pub ufrag: String,
    pub pwd: String,
}

impl IceCredentials {
    pub fn generate() -> Self {
        Self {
            ufrag: random_token(8),
            pwd: random_token(24),
        }
    }
}

fn random_token(len: usize) -> String {
    rand::thread_rng()
        .sample_iter(&Alphanumeric)
        .take(len)
        .map(char::from)
        .collect()
}

/// SHA-256 DTLS fingerprint of a freshly generated certificate key
pub fn generate_fingerprint() -> String {
    let mut key = [0u8; 32];
    rand::thread_rng().fill_bytes(&mut key);
    let digest = Sha256::digest(key);
    digest
        .iter()
        .map(|b| format!("{b:02X}"))
        .collect::<Vec<_>>()
        .join(":")
}

/// One `m=` section
#[derive(Debug, Clone)]
pub struct MediaSection {
    pub kind: TrackKind,
    pub mid: String,
    pub codec: RtpCodec,
}

/// Session description builder
#[derive(Debug, Clone)]
pub struct SessionSdp {
    pub sdp_type: SdpType,
    pub origin_id: u64,
    pub credentials: IceCredentials,
    pub fingerprint: String,
    pub media: Vec<MediaSection>,
    /// Hosted conferencing room the session is bound to
    pub room: Option<String>,
}

impl SessionSdp {
    /// Description covering every track of the local stream
    pub fn for_stream(sdp_type: SdpType, stream: &LocalStream, credentials: IceCredentials) -> Self {
        let media = stream
            .tracks
            .iter()
            .enumerate()
            .map(|(i, track)| MediaSection {
                kind: track.kind,
                mid: i.to_string(),
                codec: RtpCodec::for_track(track.kind),
            })
            .collect();

        Self {
            sdp_type,
            origin_id: rand::thread_rng().gen_range(1..u32::MAX as u64),
            credentials,
            fingerprint: generate_fingerprint(),
            media,
            room: None,
        }
    }

    pub fn with_room(mut self, room: impl Into<String>) -> Self {
        self.room = Some(room.into());
        self
    }

    pub fn to_sdp_string(&self) -> String {
        let mut sdp = String::new();
        sdp.push_str("v=0\r\n");
        sdp.push_str(&format!("o=- {} 2 IN IP4 0.0.0.0\r\n", self.origin_id));
        sdp.push_str("s=-\r\n");
        sdp.push_str("t=0 0\r\n");

        if !self.media.is_empty() {
            let mids: Vec<&str> = self.media.iter().map(|m| m.mid.as_str()).collect();
            sdp.push_str(&format!("a=group:BUNDLE {}\r\n", mids.join(" ")));
        }
        if let Some(ref room) = self.room {
            sdp.push_str(&format!("a=x-room:{room}\r\n"));
        }

        let setup = match self.sdp_type {
            SdpType::Offer => "actpass",
            SdpType::Answer => "active",
        };

        for section in &self.media {
            sdp.push_str(&format!(
                "m={} 9 UDP/TLS/RTP/SAVPF {}\r\n",
                section.kind.as_str(),
                section.codec.payload_type
            ));
            sdp.push_str("c=IN IP4 0.0.0.0\r\n");
            sdp.push_str("a=rtcp-mux\r\n");
            sdp.push_str(&format!("a=mid:{}\r\n", section.mid));
            sdp.push_str("a=sendrecv\r\n");
            sdp.push_str(&format!("a=ice-ufrag:{}\r\n", self.credentials.ufrag));
            sdp.push_str(&format!("a=ice-pwd:{}\r\n", self.credentials.pwd));
            sdp.push_str("a=ice-options:trickle\r\n");
            sdp.push_str(&format!("a=fingerprint:sha-256 {}\r\n", self.fingerprint));
            sdp.push_str(&format!("a=setup:{setup}\r\n"));
            sdp.push_str(&format!("a=rtpmap:{}\r\n", section.codec.to_rtpmap()));
        }

        sdp
    }
}

/// The parts of a remote description the adapters act on
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoteSdp {
    pub ice_ufrag: Option<String>,
    pub media_kinds: Vec<TrackKind>,
    pub room: Option<String>,
}

impl RemoteSdp {
    pub fn parse(sdp: &str) -> Result<Self, MediaError> {
        if !sdp.starts_with("v=0") {
            return Err(MediaError::Negotiation("description is not SDP".to_string()));
        }

        let mut parsed = RemoteSdp {
            ice_ufrag: None,
            media_kinds: Vec::new(),
            room: None,
        };

        for line in sdp.lines() {
            if let Some(media) = line.strip_prefix("m=") {
                match media.split_whitespace().next() {
                    Some("audio") => parsed.media_kinds.push(TrackKind::Audio),
                    Some("video") => parsed.media_kinds.push(TrackKind::Video),
                    _ => {}
                }
            } else if let Some(ufrag) = line.strip_prefix("a=ice-ufrag:") {
                parsed.ice_ufrag.get_or_insert_with(|| ufrag.to_string());
            } else if let Some(room) = line.strip_prefix("a=x-room:") {
                parsed.room = Some(room.to_string());
            }
        }

        if parsed.media_kinds.is_empty() {
            return Err(MediaError::Negotiation("description has no media".to_string()));
        }
        Ok(parsed)
    }
}
