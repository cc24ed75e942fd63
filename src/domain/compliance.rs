//! Compliance notification records and the delivery port

use crate::domain::shared::result::Result;
use crate::domain::shared::value_objects::SessionId;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Call lifecycle event reported to the compliance supervisor
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ComplianceAction {
    Started,
    Ended,
}

impl ComplianceAction {
    pub fn as_str(&self) -> &'static str {
        match self {
            ComplianceAction::Started => "started",
            ComplianceAction::Ended => "ended",
        }
    }
}

/// Write-once record per `(session_id, action)`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ComplianceRecord {
    pub session_id: SessionId,
    pub supervisor_contact: String,
    pub action: ComplianceAction,
    pub timestamp: DateTime<Utc>,
    pub duration_seconds: u64,
}

/// Delivery of compliance records to the configured third party
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait ComplianceSink: Send + Sync {
    async fn deliver(&self, record: &ComplianceRecord) -> Result<()>;
}
