//! Collaborators shared by call sessions, and the per-session context

use super::compliance::ComplianceNotifier;
use super::duration::{DurationEnforcer, WarningSchedule};
use crate::config::CallsConfig;
use crate::domain::invitation::InvitationStore;
use crate::domain::media::MediaConstraints;
use crate::domain::shared::value_objects::SessionId;
use crate::infrastructure::media::{ControllerEvent, PeerConnectionController, ProviderAdapter, ProviderFactory};
use crate::infrastructure::signaling::SignalingBus;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio_util::task::TaskTracker;

/// Timing and capture policy applied to every session
#[derive(Debug, Clone)]
pub struct CallPolicy {
    pub ring_timeout: Duration,
    pub negotiation_timeout: Duration,
    pub duration_cap_secs: u64,
    pub constraints: MediaConstraints,
}

impl From<&CallsConfig> for CallPolicy {
    fn from(config: &CallsConfig) -> Self {
        Self {
            ring_timeout: config.ring_timeout(),
            negotiation_timeout: config.negotiation_timeout(),
            duration_cap_secs: config.duration_cap_secs,
            constraints: MediaConstraints::default(),
        }
    }
}

impl Default for CallPolicy {
    fn default() -> Self {
        Self::from(&CallsConfig::default())
    }
}

/// Process-wide services a coordinator builds sessions from
#[derive(Clone)]
pub struct CallServices {
    pub store: Arc<dyn InvitationStore>,
    pub bus: SignalingBus,
    pub providers: Arc<ProviderFactory>,
    pub enforcer: Arc<DurationEnforcer>,
    pub compliance: Arc<ComplianceNotifier>,
    pub policy: CallPolicy,
}

impl CallServices {
    pub fn new(
        config: &CallsConfig,
        store: Arc<dyn InvitationStore>,
        bus: SignalingBus,
        providers: Arc<ProviderFactory>,
        compliance: Arc<ComplianceNotifier>,
    ) -> Self {
        Self {
            store,
            bus,
            providers,
            enforcer: Arc::new(DurationEnforcer::new(WarningSchedule::from(config))),
            compliance,
            policy: CallPolicy::from(config),
        }
    }
}

/// Everything one call session works with, built when the session starts
///
/// Owned by the session's state machine; nothing in it is shared with
/// other sessions except the process-wide services it references.
pub struct SessionContext {
    pub store: Arc<dyn InvitationStore>,
    pub bus: SignalingBus,
    pub controller: Arc<PeerConnectionController>,
    pub enforcer: Arc<DurationEnforcer>,
    pub compliance: Arc<ComplianceNotifier>,
    pub policy: CallPolicy,
    /// Teardown work that must finish even during shutdown
    pub teardown: TaskTracker,
}

impl SessionContext {
    pub fn new(
        services: &CallServices,
        session_id: SessionId,
        adapter: Arc<dyn ProviderAdapter>,
        provider_payload: serde_json::Value,
        teardown: TaskTracker,
    ) -> (Self, mpsc::UnboundedReceiver<ControllerEvent>) {
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let controller = PeerConnectionController::new(
            session_id,
            adapter,
            provider_payload,
            services.policy.constraints,
            events_tx,
        );

        let context = Self {
            store: services.store.clone(),
            bus: services.bus.clone(),
            controller: Arc::new(controller),
            enforcer: services.enforcer.clone(),
            compliance: services.compliance.clone(),
            policy: services.policy.clone(),
            teardown,
        };
        (context, events_rx)
    }
}
