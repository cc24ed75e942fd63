//! Compliance sink posting records to the supervisor's endpoint

use crate::config::ComplianceConfig;
use crate::domain::compliance::{ComplianceRecord, ComplianceSink};
use crate::domain::shared::error::DomainError;
use crate::domain::shared::result::Result;
use async_trait::async_trait;
use reqwest::Client;
use std::time::Duration;
use tracing::debug;

/// `POST`s each record as JSON; any non-2xx answer is a failed delivery
pub struct HttpComplianceSink {
    client: Client,
    endpoint: String,
}

impl HttpComplianceSink {
    pub fn new(endpoint: impl Into<String>, timeout: Duration) -> Result<Self> {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| DomainError::Internal(format!("failed to build HTTP client: {e}")))?;

        Ok(Self {
            client,
            endpoint: endpoint.into(),
        })
    }

    /// Sink for an enabled configuration, `None` when compliance is off
    pub fn from_config(config: &ComplianceConfig) -> Result<Option<Self>> {
        if !config.enabled {
            return Ok(None);
        }
        let endpoint = config.endpoint.clone().ok_or_else(|| {
            DomainError::Validation("compliance is enabled but no endpoint is configured".to_string())
        })?;
        Self::new(endpoint, config.timeout()).map(Some)
    }
}

#[async_trait]
impl ComplianceSink for HttpComplianceSink {
    async fn deliver(&self, record: &ComplianceRecord) -> Result<()> {
        debug!(session_id = %record.session_id, action = record.action.as_str(), "POST {}", self.endpoint);
        let response = self
            .client
            .post(&self.endpoint)
            .json(record)
            .send()
            .await
            .map_err(|e| DomainError::Unavailable(format!("compliance endpoint unreachable: {e}")))?;

        let status = response.status();
        if status.is_success() {
            Ok(())
        } else {
            Err(DomainError::Unavailable(format!(
                "compliance endpoint answered {status}"
            )))
        }
    }
}
