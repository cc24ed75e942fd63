//! Per-user call coordinator: starts, routes and recovers call sessions

use super::context::{CallServices, SessionContext};
use super::state_machine::{CallSessionHandle, CallStateMachine};
use crate::domain::call::{CallRole, CallSession, SessionIdentity, SessionUpdate};
use crate::domain::invitation::{CallInvitation, InvitationStatus, NewInvitation};
use crate::domain::media::ProviderKind;
use crate::domain::shared::error::DomainError;
use crate::domain::shared::result::Result;
use crate::domain::shared::value_objects::{CallId, ParticipantPair, SessionId, UserId};
use crate::domain::signaling::{InvitePayload, SignalingMessage, SignalingType};
use crate::infrastructure::media::ProviderAdapter;
use crate::infrastructure::signaling::{SignalingHandler, Subscription};
use crate::infrastructure::sync::lock;
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::{Arc, Weak};
use std::time::Duration;
use tokio::sync::{broadcast, Mutex, RwLock};
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{debug, info, warn};

const UPDATE_CHANNEL_CAPACITY: usize = 256;

/// How long an ended session is remembered past its ring and negotiation windows
const ENDED_RETENTION_MARGIN: Duration = Duration::from_secs(60);

struct CoordinatorInner {
    user_id: UserId,
    display_name: String,
    services: CallServices,
    sessions: RwLock<HashMap<SessionId, CallSessionHandle>>,
    /// Recently ended sessions and when they ended
    ended: RwLock<HashMap<SessionId, Instant>>,
    /// Invites being validated, with messages that arrived for them meanwhile
    launching: std::sync::Mutex<HashMap<SessionId, Vec<SignalingMessage>>>,
    updates: broadcast::Sender<SessionUpdate>,
    subscription: Mutex<Option<Subscription>>,
    cancel: CancellationToken,
    /// Invite validations running off the delivery path
    invites: TaskTracker,
    teardown: TaskTracker,
}

/// Call sessions of one local user
///
/// Subscribes the user to the signaling bus, creates a state machine per
/// call and routes session-scoped messages to it. Two live sessions for
/// the same participant pair are never allowed.
#[derive(Clone)]
pub struct CallCoordinator {
    inner: Arc<CoordinatorInner>,
}

impl CallCoordinator {
    pub fn new(user_id: UserId, display_name: impl Into<String>, services: CallServices) -> Self {
        let (updates, _) = broadcast::channel(UPDATE_CHANNEL_CAPACITY);
        Self {
            inner: Arc::new(CoordinatorInner {
                user_id,
                display_name: display_name.into(),
                services,
                sessions: RwLock::new(HashMap::new()),
                ended: RwLock::new(HashMap::new()),
                launching: std::sync::Mutex::new(HashMap::new()),
                updates,
                subscription: Mutex::new(None),
                cancel: CancellationToken::new(),
                invites: TaskTracker::new(),
                teardown: TaskTracker::new(),
            }),
        }
    }

    pub fn user_id(&self) -> &UserId {
        &self.inner.user_id
    }

    /// Session updates of every call of this user
    pub fn updates(&self) -> broadcast::Receiver<SessionUpdate> {
        self.inner.updates.subscribe()
    }

    /// Subscribe to signaling and reconcile missed invitations and active calls
    ///
    /// Returns once pending invitations were replayed and accepted but
    /// unclosed sessions were rebuilt.
    pub async fn connect(&self) {
        let handler: Arc<dyn SignalingHandler> = Arc::new(Inbox(Arc::downgrade(&self.inner)));
        let mut subscription = self
            .inner
            .services
            .bus
            .subscribe(self.inner.user_id.clone(), handler);
        subscription.reconciled().await;

        // a previous subscription is dropped, which stops its delivery
        self.inner.subscription.lock().await.replace(subscription);
        info!(user_id = %self.inner.user_id, "Connected to signaling");
    }

    /// Stop receiving signaling; live sessions keep running
    pub async fn disconnect(&self) {
        let subscription = self.inner.subscription.lock().await.take();
        if let Some(subscription) = subscription {
            subscription.unsubscribe().await;
            info!(user_id = %self.inner.user_id, "Disconnected from signaling");
        }
    }

    pub async fn is_connected(&self) -> bool {
        self.inner
            .subscription
            .lock()
            .await
            .as_ref()
            .is_some_and(|s| s.is_active())
    }

    /// Place a call to `recipient`
    pub async fn start_call(&self, recipient: UserId, conversation_id: impl Into<String>) -> Result<CallSessionHandle> {
        let inner = &self.inner;
        if recipient == inner.user_id {
            return Err(DomainError::Validation("cannot call yourself".to_string()));
        }

        let pair = ParticipantPair::new(inner.user_id.clone(), recipient.clone());
        if inner.live_session_for(&pair).await.is_some() {
            return Err(DomainError::Conflict(format!(
                "a call between {} and {} is already in progress",
                inner.user_id, recipient
            )));
        }

        let kind = inner.services.providers.default_kind();
        let adapter = inner.services.providers.create(kind);
        let session_id = SessionId::new();
        let mut provider_payload = adapter.create_session().await.map_err(|e| {
            DomainError::Unavailable(format!("media provider {}: {}", kind, e))
        })?;
        if let Some(fields) = provider_payload.as_object_mut() {
            fields
                .entry("provider")
                .or_insert_with(|| serde_json::Value::String(kind.as_str().to_string()));
        }

        let invitation = inner
            .services
            .store
            .create(NewInvitation {
                conversation_id: conversation_id.into(),
                caller_id: inner.user_id.clone(),
                caller_name: inner.display_name.clone(),
                recipient_id: recipient,
                session_id,
                call_id: CallId::new(),
                provider_payload,
            })
            .await?;

        let session = CallSession::outgoing(identity(&invitation), kind, inner.services.policy.duration_cap_secs);
        let opening = SignalingMessage::invite(&invitation, kind);
        info!(session_id = %session_id, recipient = %invitation.recipient_id, provider = %kind, "Placing call");

        Ok(inner
            .launch(session, adapter, invitation.provider_payload.clone(), Some(opening))
            .await)
    }

    pub async fn accept(&self, session_id: &SessionId) -> Result<()> {
        self.inner.handle(session_id).await?.accept().await
    }

    pub async fn decline(&self, session_id: &SessionId) -> Result<()> {
        self.inner.handle(session_id).await?.decline().await
    }

    pub async fn cancel(&self, session_id: &SessionId) -> Result<()> {
        self.inner.handle(session_id).await?.cancel().await
    }

    /// Hang up; hanging up an already ended session succeeds
    pub async fn hang_up(&self, session_id: &SessionId) -> Result<()> {
        if self.inner.ended.read().await.contains_key(session_id) {
            return Ok(());
        }
        self.inner.handle(session_id).await?.hang_up().await
    }

    /// Handle of a live session
    pub async fn session(&self, session_id: &SessionId) -> Option<CallSessionHandle> {
        self.inner.sessions.read().await.get(session_id).cloned()
    }

    /// Snapshots of all live sessions
    pub async fn sessions(&self) -> Vec<CallSession> {
        self.inner
            .sessions
            .read()
            .await
            .values()
            .map(|h| h.snapshot())
            .collect()
    }

    /// End every live session with `TransportUnavailable` and wait for teardown
    pub async fn shutdown(&self) {
        self.disconnect().await;
        self.inner.cancel.cancel();
        self.inner.settle_invites().await;

        let handles: Vec<_> = self.inner.sessions.read().await.values().cloned().collect();
        for handle in &handles {
            handle.wait_ended().await;
        }

        self.inner.teardown.close();
        self.inner.teardown.wait().await;
        info!(user_id = %self.inner.user_id, sessions = handles.len(), "Call coordinator shut down");
    }
}

impl CoordinatorInner {
    async fn handle(&self, session_id: &SessionId) -> Result<CallSessionHandle> {
        self.sessions
            .read()
            .await
            .get(session_id)
            .cloned()
            .ok_or_else(|| DomainError::NotFound(format!("session {session_id}")))
    }

    async fn live_session_for(&self, pair: &ParticipantPair) -> Option<SessionId> {
        self.sessions
            .read()
            .await
            .values()
            .map(|h| h.snapshot())
            .find(|s| !s.is_ended() && &s.participants() == pair)
            .map(|s| *s.session_id())
    }

    async fn launch(
        self: &Arc<Self>,
        session: CallSession,
        adapter: Arc<dyn ProviderAdapter>,
        provider_payload: serde_json::Value,
        opening: Option<SignalingMessage>,
    ) -> CallSessionHandle {
        let session_id = *session.session_id();
        let (ctx, media_events) = SessionContext::new(
            &self.services,
            session_id,
            adapter,
            provider_payload,
            self.teardown.clone(),
        );
        let (handle, _task) = CallStateMachine::spawn(
            session,
            ctx,
            media_events,
            opening,
            self.updates.clone(),
            self.cancel.child_token(),
        );
        self.sessions.write().await.insert(session_id, handle.clone());

        let weak: Weak<Self> = Arc::downgrade(self);
        let watched = handle.clone();
        tokio::spawn(async move {
            watched.wait_ended().await;
            if let Some(inner) = weak.upgrade() {
                inner.remember_ended(session_id).await;
                inner.sessions.write().await.remove(&session_id);
            }
        });

        handle
    }

    async fn remember_ended(&self, session_id: SessionId) {
        let retention = self.services.policy.ring_timeout
            + self.services.policy.negotiation_timeout
            + ENDED_RETENTION_MARGIN;
        let now = Instant::now();

        let mut ended = self.ended.write().await;
        ended.retain(|_, at| now.duration_since(*at) < retention);
        ended.insert(session_id, now);
    }

    /// Validate an invite off the delivery path, then hand over buffered messages
    fn spawn_invite(self: &Arc<Self>, message: SignalingMessage) {
        let session_id = message.session_id;
        {
            let mut launching = lock(&self.launching);
            if launching.contains_key(&session_id) {
                debug!(%session_id, "Invite already being handled");
                return;
            }
            launching.insert(session_id, Vec::new());
        }

        let inner = self.clone();
        self.invites.spawn(async move {
            let handle = inner.on_invite(message).await;

            let mut launching = lock(&inner.launching);
            let buffered = launching.remove(&session_id).unwrap_or_default();
            match handle {
                Some(handle) => {
                    for message in buffered {
                        if let Err(e) = handle.deliver(message) {
                            debug!("{}", e);
                        }
                    }
                }
                None if !buffered.is_empty() => {
                    debug!(%session_id, count = buffered.len(), "Dropping messages for an ignored invite");
                }
                None => {}
            }
        });
    }

    async fn on_invite(self: &Arc<Self>, message: SignalingMessage) -> Option<CallSessionHandle> {
        let session_id = message.session_id;
        let payload: InvitePayload = match message.payload_as() {
            Ok(payload) => payload,
            Err(e) => {
                warn!(%session_id, "Ignoring invite: {}", e);
                return None;
            }
        };

        let invitation = match self.services.store.get(&payload.invitation_id).await {
            Ok(Some(invitation)) => invitation,
            Ok(None) => {
                debug!(%session_id, "Ignoring invite for unknown invitation");
                return None;
            }
            Err(e) => {
                warn!(%session_id, "Could not load invitation: {}", e);
                return None;
            }
        };
        if invitation.status != InvitationStatus::Pending
            || invitation.closed_at.is_some()
            || invitation.recipient_id != self.user_id
            || invitation.session_id != session_id
            || invitation.caller_id != message.sender_id
        {
            debug!(%session_id, status = %invitation.status, "Ignoring stale or mismatched invite");
            return None;
        }

        if self.cancel.is_cancelled() {
            debug!(%session_id, "Ignoring invite during shutdown");
            return None;
        }
        if self.ended.read().await.contains_key(&session_id) {
            return None;
        }
        if let Some(existing) = self.live_session_for(&invitation.pair()).await {
            info!(%session_id, %existing, "Ignoring invite; a call with this participant is live");
            return None;
        }

        let adapter = self.services.providers.create(payload.provider);
        let session = CallSession::incoming(
            identity(&invitation),
            payload.provider,
            self.services.policy.duration_cap_secs,
        );
        info!(%session_id, caller = %invitation.caller_id, "Incoming call");
        let handle = self
            .launch(session, adapter, invitation.provider_payload.clone(), None)
            .await;
        Some(handle)
    }

    /// Wait for invites that are still being validated
    async fn settle_invites(&self) {
        self.invites.close();
        self.invites.wait().await;
        self.invites.reopen();
    }

    /// Rebuild sessions that were accepted but never closed
    async fn rehydrate(self: &Arc<Self>) {
        let active = match self.services.store.list_active(&self.user_id).await {
            Ok(active) => active,
            Err(e) => {
                warn!(user_id = %self.user_id, "Active session reconciliation failed: {}", e);
                return;
            }
        };

        for invitation in active {
            let session_id = invitation.session_id;
            if self.sessions.read().await.contains_key(&session_id)
                || self.ended.read().await.contains_key(&session_id)
            {
                continue;
            }

            let role = if invitation.caller_id == self.user_id {
                CallRole::Caller
            } else {
                CallRole::Callee
            };
            let kind = provider_of(&invitation).unwrap_or_else(|| self.services.providers.default_kind());
            let adapter = self.services.providers.create(kind);
            let session = CallSession::rehydrated(
                identity(&invitation),
                role,
                kind,
                self.services.policy.duration_cap_secs,
            );
            info!(%session_id, ?role, "Rejoining active call");
            self.launch(session, adapter, invitation.provider_payload.clone(), None)
                .await;
        }
    }
}

/// Bus-facing side of a coordinator; holds it weakly so a forgotten
/// subscription does not keep the coordinator alive
struct Inbox(Weak<CoordinatorInner>);

#[async_trait]
impl SignalingHandler for Inbox {
    async fn handle(&self, message: SignalingMessage) {
        let Some(inner) = self.0.upgrade() else {
            return;
        };
        if message.recipient_id != inner.user_id {
            debug!(recipient = %message.recipient_id, "Dropping misrouted {}", message.kind);
            return;
        }
        if inner.ended.read().await.contains_key(&message.session_id) {
            debug!(session_id = %message.session_id, "Ignoring {} for ended session", message.kind);
            return;
        }

        let message = {
            let mut launching = lock(&inner.launching);
            match launching.get_mut(&message.session_id) {
                Some(buffered) if message.kind != SignalingType::Invite => {
                    buffered.push(message);
                    return;
                }
                Some(_) => {
                    debug!(session_id = %message.session_id, "Duplicate invite while launching");
                    return;
                }
                None => message,
            }
        };

        let known = inner.sessions.read().await.get(&message.session_id).cloned();
        match known {
            Some(handle) => {
                if let Err(e) = handle.deliver(message) {
                    debug!("{}", e);
                }
            }
            None if message.kind == SignalingType::Invite => inner.spawn_invite(message),
            None => {
                debug!(session_id = %message.session_id, "Ignoring {} for unknown session", message.kind);
            }
        }
    }

    async fn reconciled(&self) {
        if let Some(inner) = self.0.upgrade() {
            // replayed invites launch before connect returns
            inner.settle_invites().await;
            inner.rehydrate().await;
        }
    }
}

impl Drop for CoordinatorInner {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

fn identity(invitation: &CallInvitation) -> SessionIdentity {
    SessionIdentity {
        session_id: invitation.session_id,
        invitation_id: invitation.id,
        call_id: invitation.call_id,
        caller_id: invitation.caller_id.clone(),
        recipient_id: invitation.recipient_id.clone(),
    }
}

fn provider_of(invitation: &CallInvitation) -> Option<ProviderKind> {
    invitation
        .provider_payload
        .get("provider")
        .and_then(|v| v.as_str())
        .and_then(|s| s.parse().ok())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::application::compliance::ComplianceNotifier;
    use crate::config::{CallsConfig, DevicesConfig, ProviderConfig};
    use crate::domain::call::{CallState, EndReason};
    use crate::domain::invitation::{InvitationStore, StatusChange};
    use crate::domain::shared::value_objects::InvitationId;
    use crate::infrastructure::media::{ProviderFactory, VirtualDevices};
    use crate::infrastructure::persistence::InMemoryInvitationStore;
    use crate::infrastructure::signaling::SignalingBus;

    fn services(store: Arc<InMemoryInvitationStore>) -> CallServices {
        let bus = SignalingBus::new(store.clone(), ProviderKind::PeerLink);
        services_on(store, bus)
    }

    fn services_on(store: Arc<dyn InvitationStore>, bus: SignalingBus) -> CallServices {
        let devices = Arc::new(VirtualDevices::new(DevicesConfig::default()));
        CallServices::new(
            &CallsConfig::default(),
            store,
            bus,
            Arc::new(ProviderFactory::new(ProviderConfig::default(), devices)),
            Arc::new(ComplianceNotifier::disabled()),
        )
    }

    /// Store whose lookups of one caller's invitations are slow
    struct SlowLookups {
        inner: Arc<InMemoryInvitationStore>,
        slow_caller: UserId,
        delay: std::time::Duration,
    }

    #[async_trait]
    impl InvitationStore for SlowLookups {
        async fn create(&self, invitation: NewInvitation) -> Result<CallInvitation> {
            self.inner.create(invitation).await
        }

        async fn list_pending(&self, user_id: &UserId) -> Result<Vec<CallInvitation>> {
            self.inner.list_pending(user_id).await
        }

        async fn list_active(&self, user_id: &UserId) -> Result<Vec<CallInvitation>> {
            self.inner.list_active(user_id).await
        }

        async fn get(&self, id: &InvitationId) -> Result<Option<CallInvitation>> {
            let found = self.inner.get(id).await?;
            if found.as_ref().is_some_and(|i| i.caller_id == self.slow_caller) {
                tokio::time::sleep(self.delay).await;
            }
            Ok(found)
        }

        async fn update_status(&self, id: &InvitationId, status: InvitationStatus) -> Result<StatusChange> {
            self.inner.update_status(id, status).await
        }

        async fn close_session(&self, session_id: &SessionId) -> Result<()> {
            self.inner.close_session(session_id).await
        }
    }

    async fn invite(store: &InMemoryInvitationStore, caller: &str, recipient: &str) -> CallInvitation {
        store
            .create(NewInvitation {
                conversation_id: "conv-1".to_string(),
                caller_id: caller.into(),
                caller_name: caller.to_uppercase(),
                recipient_id: recipient.into(),
                session_id: SessionId::new(),
                call_id: CallId::new(),
                provider_payload: serde_json::json!({"provider": "peer_link"}),
            })
            .await
            .unwrap()
    }

    #[tokio::test(start_paused = true)]
    async fn test_cannot_call_yourself() {
        let store = Arc::new(InMemoryInvitationStore::default());
        let alice = CallCoordinator::new("alice".into(), "Alice", services(store));

        let result = alice.start_call("alice".into(), "conv-1").await;
        assert!(matches!(result, Err(DomainError::Validation(_))));
    }

    #[tokio::test(start_paused = true)]
    async fn test_second_call_to_same_user_conflicts() {
        let store = Arc::new(InMemoryInvitationStore::default());
        let alice = CallCoordinator::new("alice".into(), "Alice", services(store.clone()));

        let first = alice.start_call("bob".into(), "conv-1").await.unwrap();
        assert_eq!(first.state(), CallState::Calling);
        let second = alice.start_call("bob".into(), "conv-1").await;
        assert!(matches!(second, Err(DomainError::Conflict(_))));

        let pending = store.list_pending(&"bob".into()).await.unwrap();
        assert_eq!(pending.len(), 1);
        assert_eq!(pending[0].provider_payload["provider"], "peer_link");
    }

    #[tokio::test(start_paused = true)]
    async fn test_unknown_session_is_not_found() {
        let store = Arc::new(InMemoryInvitationStore::default());
        let alice = CallCoordinator::new("alice".into(), "Alice", services(store));

        let result = alice.accept(&SessionId::new()).await;
        assert!(matches!(result, Err(DomainError::NotFound(_))));
    }

    #[tokio::test(start_paused = true)]
    async fn test_ended_session_is_forgotten_and_hang_up_is_idempotent() {
        let store = Arc::new(InMemoryInvitationStore::default());
        let alice = CallCoordinator::new("alice".into(), "Alice", services(store));

        let handle = alice.start_call("bob".into(), "conv-1").await.unwrap();
        let session_id = *handle.session_id();
        alice.cancel(&session_id).await.unwrap();
        handle.wait_ended().await;
        tokio::time::sleep(std::time::Duration::from_millis(10)).await;

        assert!(alice.session(&session_id).await.is_none());
        alice.hang_up(&session_id).await.unwrap();
        assert!(alice.sessions().await.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_slow_invite_lookup_does_not_hold_up_other_sessions() {
        let store = Arc::new(InMemoryInvitationStore::default());
        let bus = SignalingBus::new(store.clone(), ProviderKind::PeerLink);
        let slow = Arc::new(SlowLookups {
            inner: store.clone(),
            slow_caller: "carol".into(),
            delay: std::time::Duration::from_secs(10),
        });
        let bob = CallCoordinator::new("bob".into(), "Bob", services_on(slow, bus.clone()));
        bob.connect().await;
        let mut updates = bob.updates();

        let from_alice = invite(&store, "alice", "bob").await;
        bus.publish(SignalingMessage::invite(&from_alice, ProviderKind::PeerLink)).unwrap();
        tokio::time::sleep(std::time::Duration::from_millis(10)).await;
        let answer = bob.session(&from_alice.session_id).await.unwrap();
        assert_eq!(answer.state(), CallState::Incoming);

        // carol's invite takes 10s to validate; alice's end must not wait for it
        let from_carol = invite(&store, "carol", "bob").await;
        bus.publish(SignalingMessage::invite(&from_carol, ProviderKind::PeerLink)).unwrap();
        let end = |sender: &str, session_id| {
            SignalingMessage::control(SignalingType::End, sender.into(), "bob".into(), session_id, None)
        };
        bus.publish(end("alice", from_alice.session_id)).unwrap();
        bus.publish(end("carol", from_carol.session_id)).unwrap();

        tokio::time::sleep(std::time::Duration::from_millis(100)).await;
        assert_eq!(answer.state(), CallState::Ended(EndReason::Cancelled));
        assert!(bob.session(&from_carol.session_id).await.is_none());

        // carol's session launches late and still sees her end
        tokio::time::sleep(std::time::Duration::from_secs(10)).await;
        let mut carol_ended = None;
        while let Ok(update) = updates.try_recv() {
            if let SessionUpdate::Ended { session_id, reason, .. } = update {
                if session_id == from_carol.session_id {
                    carol_ended = Some(reason);
                }
            }
        }
        assert_eq!(carol_ended, Some(EndReason::Cancelled));
    }

    #[tokio::test(start_paused = true)]
    async fn test_duplicate_invite_while_launching_starts_one_session() {
        let store = Arc::new(InMemoryInvitationStore::default());
        let bus = SignalingBus::new(store.clone(), ProviderKind::PeerLink);
        let slow = Arc::new(SlowLookups {
            inner: store.clone(),
            slow_caller: "alice".into(),
            delay: std::time::Duration::from_secs(1),
        });
        let bob = CallCoordinator::new("bob".into(), "Bob", services_on(slow, bus.clone()));
        bob.connect().await;

        let invitation = invite(&store, "alice", "bob").await;
        let message = SignalingMessage::invite(&invitation, ProviderKind::PeerLink);
        bus.publish(message.clone()).unwrap();
        bus.publish(message).unwrap();

        tokio::time::sleep(std::time::Duration::from_secs(2)).await;
        let sessions = bob.sessions().await;
        assert_eq!(sessions.len(), 1);
        assert_eq!(sessions[0].state(), CallState::Incoming);
        bob.shutdown().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_ended_sessions_are_forgotten_after_retention() {
        let store = Arc::new(InMemoryInvitationStore::default());
        let alice = CallCoordinator::new("alice".into(), "Alice", services(store));

        let first = alice.start_call("bob".into(), "conv-1").await.unwrap();
        alice.cancel(first.session_id()).await.unwrap();
        tokio::time::sleep(std::time::Duration::from_millis(10)).await;
        assert!(alice.inner.ended.read().await.contains_key(first.session_id()));

        // ring + negotiation windows plus the margin
        tokio::time::sleep(std::time::Duration::from_secs(30 + 15 + 60)).await;

        let second = alice.start_call("bob".into(), "conv-1").await.unwrap();
        alice.cancel(second.session_id()).await.unwrap();
        tokio::time::sleep(std::time::Duration::from_millis(10)).await;

        let ended = alice.inner.ended.read().await;
        assert_eq!(ended.len(), 1);
        assert!(ended.contains_key(second.session_id()));
    }
}
