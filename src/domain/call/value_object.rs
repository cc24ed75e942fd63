//! Call value objects

use serde::{Deserialize, Serialize};
use std::fmt;

/// Which side of the call the local state machine represents
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CallRole {
    /// Issued the invitation
    Caller,
    /// Received the invitation
    Callee,
}

/// Reason a call session ended
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EndReason {
    /// Caller gave up after the ring timeout
    NoAnswer,
    /// Recipient declined, explicitly or by auto-decline
    Declined,
    /// Either side abandoned the call before media flowed
    Cancelled,
    /// Media negotiation did not complete in time
    NegotiationTimeout,
    /// Camera/microphone permission refused or device absent
    MediaAccessDenied,
    /// The media provider failed
    ProviderError,
    /// Signaling or media transport went away
    TransportUnavailable,
    /// A participant hung up a connected call
    UserEnded,
    /// The duration cap was reached
    TimeLimitReached,
}

impl EndReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            EndReason::NoAnswer => "no_answer",
            EndReason::Declined => "declined",
            EndReason::Cancelled => "cancelled",
            EndReason::NegotiationTimeout => "negotiation_timeout",
            EndReason::MediaAccessDenied => "media_access_denied",
            EndReason::ProviderError => "provider_error",
            EndReason::TransportUnavailable => "transport_unavailable",
            EndReason::UserEnded => "user_ended",
            EndReason::TimeLimitReached => "time_limit_reached",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        [
            EndReason::NoAnswer,
            EndReason::Declined,
            EndReason::Cancelled,
            EndReason::NegotiationTimeout,
            EndReason::MediaAccessDenied,
            EndReason::ProviderError,
            EndReason::TransportUnavailable,
            EndReason::UserEnded,
            EndReason::TimeLimitReached,
        ]
        .into_iter()
        .find(|r| r.as_str() == s)
    }

    /// The single user-facing message for this reason
    pub fn user_message(&self) -> &'static str {
        match self {
            EndReason::NoAnswer => "No answer",
            EndReason::Declined => "Call declined",
            EndReason::Cancelled => "Call cancelled",
            EndReason::NegotiationTimeout => "Call could not connect",
            EndReason::MediaAccessDenied => "Camera/microphone access denied",
            EndReason::ProviderError => "Call service unavailable",
            EndReason::TransportUnavailable => "Connection lost",
            EndReason::UserEnded => "Call ended",
            EndReason::TimeLimitReached => "Call ended \u{2014} time limit reached",
        }
    }

    /// Whether the reason is a failure rather than an expected ending
    pub fn is_failure(&self) -> bool {
        matches!(
            self,
            EndReason::NegotiationTimeout
                | EndReason::MediaAccessDenied
                | EndReason::ProviderError
                | EndReason::TransportUnavailable
        )
    }
}

impl fmt::Display for EndReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Call session state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "state", content = "reason", rename_all = "snake_case")]
pub enum CallState {
    Idle,
    /// Invitation sent, waiting for the recipient
    Calling,
    /// Invitation received, waiting for the local user
    Incoming,
    /// Accepted, media being negotiated
    Connecting,
    /// Media flowing
    Connected,
    /// Terminal
    Ended(EndReason),
}

impl CallState {
    /// Check if state transition is valid
    pub fn can_transition_to(&self, new_state: &CallState) -> bool {
        use CallState::*;
        use EndReason::*;

        match (self, new_state) {
            (Idle, Calling) | (Idle, Incoming) => true,

            (Calling, Connecting) => true,
            (Calling, Ended(NoAnswer | Cancelled | Declined)) => true,

            (Incoming, Connecting) => true,
            (Incoming, Ended(Declined | Cancelled)) => true,

            (Connecting, Connected) => true,
            (
                Connecting,
                Ended(NegotiationTimeout | MediaAccessDenied | ProviderError | Cancelled),
            ) => true,

            (Connected, Ended(UserEnded | TimeLimitReached | ProviderError)) => true,

            // Ended is never left
            (Ended(_), _) => false,

            // transport failure ends any live state
            (_, Ended(TransportUnavailable)) => true,

            _ => false,
        }
    }

    pub fn is_ended(&self) -> bool {
        matches!(self, CallState::Ended(_))
    }

    pub fn end_reason(&self) -> Option<EndReason> {
        match self {
            CallState::Ended(reason) => Some(*reason),
            _ => None,
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            CallState::Idle => "idle",
            CallState::Calling => "calling",
            CallState::Incoming => "incoming",
            CallState::Connecting => "connecting",
            CallState::Connected => "connected",
            CallState::Ended(_) => "ended",
        }
    }
}
