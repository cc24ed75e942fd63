//! Call session updates published to observers (UI, WebSocket clients)

use crate::domain::call::value_object::{CallState, EndReason};
use crate::domain::shared::value_objects::SessionId;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Update emitted by a call state machine
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum SessionUpdate {
    StateChanged {
        session_id: SessionId,
        state: CallState,
        at: DateTime<Utc>,
    },
    /// The duration cap is approaching
    DurationWarning {
        session_id: SessionId,
        remaining_secs: u64,
    },
    Ended {
        session_id: SessionId,
        reason: EndReason,
        message: String,
        duration_secs: Option<u64>,
    },
}

impl SessionUpdate {
    pub fn session_id(&self) -> &SessionId {
        match self {
            SessionUpdate::StateChanged { session_id, .. } => session_id,
            SessionUpdate::DurationWarning { session_id, .. } => session_id,
            SessionUpdate::Ended { session_id, .. } => session_id,
        }
    }
}
