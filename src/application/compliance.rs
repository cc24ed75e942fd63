//! Best-effort compliance notifications

use crate::domain::call::CallSession;
use crate::domain::compliance::{ComplianceAction, ComplianceRecord, ComplianceSink};
use crate::domain::shared::value_objects::SessionId;
use crate::infrastructure::sync::lock;
use chrono::Utc;
use std::collections::{HashSet, VecDeque};
use std::sync::{Arc, Mutex};
use tokio_util::task::TaskTracker;
use tracing::{debug, info, warn};

/// Ended sessions remembered to reject late duplicates
const FINISHED_CAPACITY: usize = 1024;

/// Sessions that were reported
#[derive(Default)]
struct Ledger {
    /// Started and not yet ended
    started: HashSet<SessionId>,
    /// Most recently ended, oldest first
    finished: VecDeque<SessionId>,
}

impl Ledger {
    /// Record `action`; false when it was already reported
    fn record(&mut self, session_id: SessionId, action: ComplianceAction) -> bool {
        if self.finished.contains(&session_id) {
            return false;
        }
        match action {
            ComplianceAction::Started => self.started.insert(session_id),
            ComplianceAction::Ended => {
                self.started.remove(&session_id);
                if self.finished.len() == FINISHED_CAPACITY {
                    self.finished.pop_front();
                }
                self.finished.push_back(session_id);
                true
            }
        }
    }
}

/// Notifies the compliance supervisor when calls start and end
///
/// At most one notification is sent per `(session, action)`, and none
/// after a session's end was reported. Delivery runs in the background;
/// failures are logged and counted, never returned.
pub struct ComplianceNotifier {
    sink: Option<Arc<dyn ComplianceSink>>,
    supervisor_contact: String,
    ledger: Mutex<Ledger>,
    tracker: TaskTracker,
}

impl ComplianceNotifier {
    pub fn new(sink: Arc<dyn ComplianceSink>, supervisor_contact: impl Into<String>) -> Self {
        Self {
            sink: Some(sink),
            supervisor_contact: supervisor_contact.into(),
            ledger: Mutex::new(Ledger::default()),
            tracker: TaskTracker::new(),
        }
    }

    /// Notifier that records nothing
    pub fn disabled() -> Self {
        Self {
            sink: None,
            supervisor_contact: String::new(),
            ledger: Mutex::new(Ledger::default()),
            tracker: TaskTracker::new(),
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.sink.is_some()
    }

    /// Returns whether a notification was scheduled
    pub fn on_call_start(&self, session: &CallSession) -> bool {
        self.notify(*session.session_id(), ComplianceAction::Started, 0)
    }

    pub fn on_call_end(&self, session: &CallSession, duration_seconds: u64) -> bool {
        self.notify(*session.session_id(), ComplianceAction::Ended, duration_seconds)
    }

    fn notify(&self, session_id: SessionId, action: ComplianceAction, duration_seconds: u64) -> bool {
        let Some(ref sink) = self.sink else {
            return false;
        };

        if !lock(&self.ledger).record(session_id, action) {
            debug!(%session_id, action = action.as_str(), "Compliance notification already sent");
            return false;
        }

        let record = ComplianceRecord {
            session_id,
            supervisor_contact: self.supervisor_contact.clone(),
            action,
            timestamp: Utc::now(),
            duration_seconds,
        };
        let sink = sink.clone();

        self.tracker.spawn(async move {
            match sink.deliver(&record).await {
                Ok(()) => {
                    info!(session_id = %record.session_id, action = action.as_str(), "Compliance notified");
                    metrics::counter!("compliance_notifications_total", "outcome" => "delivered").increment(1);
                }
                Err(e) => {
                    warn!(session_id = %record.session_id, action = action.as_str(), "Compliance notification failed: {}", e);
                    metrics::counter!("compliance_notifications_total", "outcome" => "failed").increment(1);
                }
            }
        });
        true
    }

    /// Wait for in-flight deliveries
    pub async fn flush(&self) {
        self.tracker.close();
        self.tracker.wait().await;
        self.tracker.reopen();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::call::{CallSession, SessionIdentity};
    use crate::domain::compliance::MockComplianceSink;
    use crate::domain::media::ProviderKind;
    use crate::domain::shared::error::DomainError;
    use crate::domain::shared::value_objects::{CallId, InvitationId};

    fn session() -> CallSession {
        CallSession::outgoing(
            SessionIdentity {
                session_id: SessionId::new(),
                invitation_id: InvitationId::new(),
                call_id: CallId::new(),
                caller_id: "alice".into(),
                recipient_id: "bob".into(),
            },
            ProviderKind::PeerLink,
            300,
        )
    }

    #[tokio::test]
    async fn test_deduplicates_per_session_and_action() {
        let mut sink = MockComplianceSink::new();
        sink.expect_deliver()
            .withf(|r| r.action == ComplianceAction::Started && r.supervisor_contact == "sup@example.com")
            .times(1)
            .returning(|_| Ok(()));
        sink.expect_deliver()
            .withf(|r| r.action == ComplianceAction::Ended && r.duration_seconds == 42)
            .times(1)
            .returning(|_| Ok(()));

        let notifier = ComplianceNotifier::new(Arc::new(sink), "sup@example.com");
        let session = session();

        assert!(notifier.on_call_start(&session));
        assert!(!notifier.on_call_start(&session));
        assert!(notifier.on_call_end(&session, 42));
        assert!(!notifier.on_call_end(&session, 42));
        notifier.flush().await;
    }

    #[tokio::test]
    async fn test_failures_are_swallowed() {
        let mut sink = MockComplianceSink::new();
        sink.expect_deliver()
            .returning(|_| Err(DomainError::Unavailable("endpoint down".to_string())));

        let notifier = ComplianceNotifier::new(Arc::new(sink), "sup@example.com");
        assert!(notifier.on_call_start(&session()));
        notifier.flush().await;
    }

    #[tokio::test]
    async fn test_ended_sessions_are_forgotten_up_to_capacity() {
        let mut sink = MockComplianceSink::new();
        sink.expect_deliver().returning(|_| Ok(()));
        let notifier = ComplianceNotifier::new(Arc::new(sink), "sup@example.com");

        let first = session();
        assert!(notifier.on_call_start(&first));
        assert!(notifier.on_call_end(&first, 10));
        // a late start after the end is not reported
        assert!(!notifier.on_call_start(&first));

        for _ in 0..FINISHED_CAPACITY {
            let other = session();
            assert!(notifier.on_call_start(&other));
            assert!(notifier.on_call_end(&other, 1));
        }
        notifier.flush().await;

        let ledger = lock(&notifier.ledger);
        assert!(ledger.started.is_empty());
        assert_eq!(ledger.finished.len(), FINISHED_CAPACITY);
        assert!(!ledger.finished.contains(first.session_id()));
    }

    #[test]
    fn test_disabled_sends_nothing() {
        let notifier = ComplianceNotifier::disabled();
        assert!(!notifier.is_enabled());
        assert!(!notifier.on_call_start(&session()));
    }
}
