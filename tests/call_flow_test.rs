//! End-to-end call flows between two coordinators sharing a bus and store

use async_trait::async_trait;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::time::Instant;
use vidcall::application::{CallCoordinator, CallServices, CallSessionHandle, ComplianceNotifier};
use vidcall::config::{CallsConfig, DevicesConfig, ProviderConfig};
use vidcall::domain::call::{CallRole, CallState, EndReason, SessionUpdate};
use vidcall::domain::compliance::{ComplianceAction, ComplianceRecord, ComplianceSink};
use vidcall::domain::invitation::{InvitationStatus, InvitationStore, NewInvitation};
use vidcall::domain::media::ProviderKind;
use vidcall::domain::shared::value_objects::{CallId, SessionId};
use vidcall::domain::signaling::{SignalingMessage, SignalingType};
use vidcall::infrastructure::media::{MediaDevices, ProviderFactory, VirtualDevices};
use vidcall::infrastructure::persistence::InMemoryInvitationStore;
use vidcall::infrastructure::signaling::{SignalingBus, SignalingHandler};
use vidcall::Result;

#[derive(Default)]
struct RecordingSink {
    records: Mutex<Vec<ComplianceRecord>>,
}

#[async_trait]
impl ComplianceSink for RecordingSink {
    async fn deliver(&self, record: &ComplianceRecord) -> Result<()> {
        self.records.lock().unwrap().push(record.clone());
        Ok(())
    }
}

#[derive(Default)]
struct Inbox {
    received: tokio::sync::Mutex<Vec<SignalingMessage>>,
}

#[async_trait]
impl SignalingHandler for Inbox {
    async fn handle(&self, message: SignalingMessage) {
        self.received.lock().await.push(message);
    }
}

struct Party {
    coordinator: CallCoordinator,
    devices: Arc<VirtualDevices>,
    compliance: Arc<ComplianceNotifier>,
}

struct Network {
    store: Arc<InMemoryInvitationStore>,
    bus: SignalingBus,
}

impl Network {
    fn new() -> Self {
        let store = Arc::new(InMemoryInvitationStore::default());
        let bus = SignalingBus::new(store.clone(), ProviderKind::PeerLink);
        Self { store, bus }
    }

    fn party(&self, user: &str, devices: DevicesConfig, compliance: ComplianceNotifier) -> Party {
        let devices = Arc::new(VirtualDevices::new(devices));
        let providers = Arc::new(ProviderFactory::new(ProviderConfig::default(), devices.clone()));
        let compliance = Arc::new(compliance);
        let services = CallServices::new(
            &CallsConfig::default(),
            self.store.clone(),
            self.bus.clone(),
            providers,
            compliance.clone(),
        );
        Party {
            coordinator: CallCoordinator::new(user.into(), user.to_uppercase(), services),
            devices,
            compliance,
        }
    }

    fn simple_party(&self, user: &str) -> Party {
        self.party(user, DevicesConfig::default(), ComplianceNotifier::disabled())
    }
}

async fn incoming(party: &Party, session_id: &SessionId) -> CallSessionHandle {
    for _ in 0..100 {
        if let Some(handle) = party.coordinator.session(session_id).await {
            return handle;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("session {session_id} never reached {}", party.coordinator.user_id());
}

async fn wait_for_state(handle: &CallSessionHandle, state: CallState) {
    for _ in 0..500 {
        if handle.state() == state {
            return;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("session stuck in {:?}, expected {:?}", handle.state(), state);
}

/// Place a call from `caller` to `callee` and accept it
async fn connect_call(caller: &Party, callee: &Party) -> (CallSessionHandle, CallSessionHandle) {
    let call = caller
        .coordinator
        .start_call(callee.coordinator.user_id().clone(), "conv-1")
        .await
        .unwrap();
    let answer = incoming(callee, call.session_id()).await;
    assert_eq!(answer.state(), CallState::Incoming);

    answer.accept().await.unwrap();
    wait_for_state(&call, CallState::Connected).await;
    wait_for_state(&answer, CallState::Connected).await;
    (call, answer)
}

#[tokio::test(start_paused = true)]
async fn test_connected_call_ends_at_duration_cap() {
    let net = Network::new();
    let sink = Arc::new(RecordingSink::default());
    let alice = net.party(
        "alice",
        DevicesConfig::default(),
        ComplianceNotifier::new(sink.clone(), "supervisor@example.com"),
    );
    let bob = net.party(
        "bob",
        DevicesConfig::default(),
        ComplianceNotifier::new(sink.clone(), "supervisor@example.com"),
    );
    alice.coordinator.connect().await;
    bob.coordinator.connect().await;
    let mut updates = alice.coordinator.updates();

    let (call, answer) = connect_call(&alice, &bob).await;
    let session_id = *call.session_id();
    assert!(alice.devices.open_handles().await > 0);

    let caller_end = call.wait_ended().await;
    let callee_end = answer.wait_ended().await;
    assert_eq!(caller_end.state(), CallState::Ended(EndReason::TimeLimitReached));
    assert_eq!(callee_end.state(), CallState::Ended(EndReason::TimeLimitReached));
    assert_eq!(caller_end.duration_seconds(), Some(300));

    let mut warnings = Vec::new();
    let mut ended_message = None;
    while let Ok(update) = updates.try_recv() {
        match update {
            SessionUpdate::DurationWarning { remaining_secs, .. } => warnings.push(remaining_secs),
            SessionUpdate::Ended { message, .. } => ended_message = Some(message),
            _ => {}
        }
    }
    assert_eq!(warnings, vec![60, 30, 20, 10]);
    assert_eq!(ended_message.as_deref(), Some(EndReason::TimeLimitReached.user_message()));

    alice.coordinator.shutdown().await;
    bob.coordinator.shutdown().await;
    alice.compliance.flush().await;
    bob.compliance.flush().await;

    let records = sink.records.lock().unwrap().clone();
    assert_eq!(records.len(), 2);
    assert!(records.iter().all(|r| r.session_id == session_id));
    assert_eq!(records[0].action, ComplianceAction::Started);
    assert_eq!(records[1].action, ComplianceAction::Ended);
    assert_eq!(records[1].duration_seconds, 300);

    assert_eq!(alice.devices.open_handles().await, 0);
    assert_eq!(bob.devices.open_handles().await, 0);
    assert!(net.store.list_active(&"alice".into()).await.unwrap().is_empty());
}

#[tokio::test(start_paused = true)]
async fn test_hang_up_ends_both_sides() {
    let net = Network::new();
    let alice = net.simple_party("alice");
    let bob = net.simple_party("bob");
    alice.coordinator.connect().await;
    bob.coordinator.connect().await;

    let (call, answer) = connect_call(&alice, &bob).await;
    tokio::time::sleep(Duration::from_secs(42)).await;

    alice.coordinator.hang_up(call.session_id()).await.unwrap();
    assert_eq!(call.state(), CallState::Ended(EndReason::UserEnded));
    let callee_end = answer.wait_ended().await;
    assert_eq!(callee_end.state(), CallState::Ended(EndReason::UserEnded));

    // a second hang-up is a no-op
    alice.coordinator.hang_up(call.session_id()).await.unwrap();

    alice.coordinator.shutdown().await;
    bob.coordinator.shutdown().await;
    assert_eq!(alice.devices.open_handles().await, 0);
    assert_eq!(bob.devices.open_handles().await, 0);
}

#[tokio::test(start_paused = true)]
async fn test_unanswered_call_ends_after_ring_timeout() {
    let net = Network::new();
    let alice = net.simple_party("alice");
    alice.coordinator.connect().await;

    // bob only listens, so his client never rings out on its own
    let bob = Arc::new(Inbox::default());
    let mut subscription = net.bus.subscribe("bob".into(), bob.clone());
    subscription.reconciled().await;

    let started = Instant::now();
    let call = alice.coordinator.start_call("bob".into(), "conv-1").await.unwrap();

    let caller_end = call.wait_ended().await;
    assert_eq!(started.elapsed().as_secs(), 30);
    assert_eq!(caller_end.state(), CallState::Ended(EndReason::NoAnswer));

    let invitation = net.store.get(caller_end.invitation_id()).await.unwrap().unwrap();
    assert!(invitation.status.is_terminal());

    tokio::time::sleep(Duration::from_millis(10)).await;
    let received = bob.received.lock().await;
    let kinds: Vec<_> = received.iter().map(|m| m.kind).collect();
    assert_eq!(kinds, vec![SignalingType::Invite, SignalingType::End]);
    assert_eq!(received[1].payload["reason"], "no_answer");
}

#[tokio::test(start_paused = true)]
async fn test_declined_call() {
    let net = Network::new();
    let alice = net.simple_party("alice");
    let bob = net.simple_party("bob");
    alice.coordinator.connect().await;
    bob.coordinator.connect().await;

    let call = alice.coordinator.start_call("bob".into(), "conv-1").await.unwrap();
    let session_id = *call.session_id();
    incoming(&bob, &session_id).await;

    bob.coordinator.decline(&session_id).await.unwrap();
    let caller_end = call.wait_ended().await;
    assert_eq!(caller_end.state(), CallState::Ended(EndReason::Declined));

    let invitation = net.store.get(caller_end.invitation_id()).await.unwrap().unwrap();
    assert_eq!(invitation.status, InvitationStatus::Declined);
    assert_eq!(bob.devices.open_handles().await, 0);
}

#[tokio::test(start_paused = true)]
async fn test_negotiation_timeout_when_peer_never_answers_offer() {
    let net = Network::new();
    let alice = net.simple_party("alice");
    alice.coordinator.connect().await;

    // bob is a bare signaling client that accepts but never negotiates
    let bob = Arc::new(Inbox::default());
    let mut subscription = net.bus.subscribe("bob".into(), bob.clone());
    subscription.reconciled().await;

    let call = alice.coordinator.start_call("bob".into(), "conv-1").await.unwrap();
    let session_id = *call.session_id();
    net.bus
        .publish(SignalingMessage::control(
            SignalingType::Accept,
            "bob".into(),
            "alice".into(),
            session_id,
            None,
        ))
        .unwrap();

    let accepted = Instant::now();
    let caller_end = call.wait_ended().await;
    assert_eq!(caller_end.state(), CallState::Ended(EndReason::NegotiationTimeout));
    assert_eq!(accepted.elapsed().as_secs(), 15);

    tokio::time::sleep(Duration::from_millis(10)).await;
    let received = bob.received.lock().await;
    let kinds: Vec<_> = received.iter().map(|m| m.kind).collect();
    assert_eq!(kinds.first(), Some(&SignalingType::Invite));
    assert!(kinds.contains(&SignalingType::Offer));
    let end = received.last().unwrap();
    assert_eq!(end.kind, SignalingType::End);
    assert_eq!(end.payload["reason"], "negotiation_timeout");
}

#[tokio::test(start_paused = true)]
async fn test_callee_without_camera_permission() {
    let net = Network::new();
    let alice = net.simple_party("alice");
    let bob = net.party(
        "bob",
        DevicesConfig {
            permission_granted: false,
            ..DevicesConfig::default()
        },
        ComplianceNotifier::disabled(),
    );
    alice.coordinator.connect().await;
    bob.coordinator.connect().await;
    let mut bob_updates = bob.coordinator.updates();

    let call = alice.coordinator.start_call("bob".into(), "conv-1").await.unwrap();
    let answer = incoming(&bob, call.session_id()).await;
    answer.accept().await.unwrap();

    let callee_end = answer.wait_ended().await;
    assert_eq!(callee_end.state(), CallState::Ended(EndReason::MediaAccessDenied));
    let caller_end = call.wait_ended().await;
    assert_eq!(caller_end.state(), CallState::Ended(EndReason::Cancelled));

    let mut message = None;
    while let Ok(update) = bob_updates.try_recv() {
        if let SessionUpdate::Ended { message: m, .. } = update {
            message = Some(m);
        }
    }
    assert_eq!(message.as_deref(), Some("Camera/microphone access denied"));
}

#[tokio::test(start_paused = true)]
async fn test_missed_invite_is_recovered_once_on_connect() {
    let net = Network::new();
    let alice = net.simple_party("alice");
    let bob = net.simple_party("bob");
    alice.coordinator.connect().await;

    // bob is offline: the live invite is dropped
    let call = alice.coordinator.start_call("bob".into(), "conv-1").await.unwrap();
    let session_id = *call.session_id();

    bob.coordinator.connect().await;
    let answer = bob.coordinator.session(&session_id).await.unwrap();
    assert_eq!(answer.state(), CallState::Incoming);

    // reconnecting replays the invite again; it must not create a second session
    bob.coordinator.disconnect().await;
    bob.coordinator.connect().await;
    assert_eq!(bob.coordinator.sessions().await.len(), 1);

    answer.accept().await.unwrap();
    wait_for_state(&call, CallState::Connected).await;
    alice.coordinator.hang_up(&session_id).await.unwrap();
    answer.wait_ended().await;
}

#[tokio::test(start_paused = true)]
async fn test_accepted_session_is_rehydrated_on_connect() {
    let net = Network::new();
    let invitation = net
        .store
        .create(NewInvitation {
            conversation_id: "conv-1".to_string(),
            caller_id: "alice".into(),
            caller_name: "Alice".to_string(),
            recipient_id: "bob".into(),
            session_id: SessionId::new(),
            call_id: CallId::new(),
            provider_payload: serde_json::json!({"provider": "peer_link"}),
        })
        .await
        .unwrap();
    net.store
        .update_status(&invitation.id, InvitationStatus::Accepted)
        .await
        .unwrap();

    let bob = net.simple_party("bob");
    bob.coordinator.connect().await;

    let sessions = bob.coordinator.sessions().await;
    assert_eq!(sessions.len(), 1);
    assert_eq!(sessions[0].state(), CallState::Connecting);
    assert_eq!(sessions[0].role(), CallRole::Callee);

    // the caller never comes back
    let handle = bob.coordinator.session(&invitation.session_id).await.unwrap();
    let ended = handle.wait_ended().await;
    assert_eq!(ended.state(), CallState::Ended(EndReason::NegotiationTimeout));

    bob.coordinator.shutdown().await;
    assert!(net.store.list_active(&"bob".into()).await.unwrap().is_empty());
    assert_eq!(bob.devices.open_handles().await, 0);
}

#[tokio::test(start_paused = true)]
async fn test_shutdown_ends_live_sessions() {
    let net = Network::new();
    let alice = net.simple_party("alice");
    alice.coordinator.connect().await;

    let call = alice.coordinator.start_call("bob".into(), "conv-1").await.unwrap();
    alice.coordinator.shutdown().await;

    assert_eq!(call.state(), CallState::Ended(EndReason::TransportUnavailable));
    assert!(!alice.coordinator.is_connected().await);
}

#[tokio::test(start_paused = true)]
async fn test_caller_shutdown_while_ringing_frees_the_pair() {
    let net = Network::new();
    let alice = net.simple_party("alice");
    alice.coordinator.connect().await;

    let call = alice.coordinator.start_call("bob".into(), "conv-1").await.unwrap();
    alice.coordinator.shutdown().await;
    let caller_end = call.snapshot();
    assert_eq!(caller_end.state(), CallState::Ended(EndReason::TransportUnavailable));

    let invitation = net.store.get(caller_end.invitation_id()).await.unwrap().unwrap();
    assert_eq!(invitation.status, InvitationStatus::Expired);
    assert!(net.store.list_pending(&"bob".into()).await.unwrap().is_empty());

    // bob coming online gets no ghost call
    let bob = net.simple_party("bob");
    bob.coordinator.connect().await;
    assert!(bob.coordinator.sessions().await.is_empty());

    // and alice can call again from a fresh client
    let alice = net.simple_party("alice");
    alice.coordinator.connect().await;
    let call = alice.coordinator.start_call("bob".into(), "conv-1").await.unwrap();
    let answer = incoming(&bob, call.session_id()).await;
    assert_eq!(answer.state(), CallState::Incoming);

    alice.coordinator.shutdown().await;
    bob.coordinator.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn test_replayed_signaling_does_not_change_sessions() {
    let net = Network::new();
    let sink = Arc::new(RecordingSink::default());
    let alice = net.party(
        "alice",
        DevicesConfig::default(),
        ComplianceNotifier::new(sink.clone(), "supervisor@example.com"),
    );
    let bob = net.party(
        "bob",
        DevicesConfig::default(),
        ComplianceNotifier::new(sink.clone(), "supervisor@example.com"),
    );
    alice.coordinator.connect().await;
    bob.coordinator.connect().await;

    let (call, answer) = connect_call(&alice, &bob).await;
    let session_id = *call.session_id();
    let invitation = net.store.get(call.snapshot().invitation_id()).await.unwrap().unwrap();

    let to_bob = |kind| SignalingMessage::control(kind, "alice".into(), "bob".into(), session_id, None);
    let to_alice = |kind| SignalingMessage::control(kind, "bob".into(), "alice".into(), session_id, None);
    let replay = || {
        net.bus.publish(SignalingMessage::invite(&invitation, ProviderKind::PeerLink)).unwrap();
        net.bus.publish(to_alice(SignalingType::Accept)).unwrap();
        net.bus.publish(to_bob(SignalingType::Accept)).unwrap();
        net.bus.publish(to_alice(SignalingType::Decline)).unwrap();
    };

    replay();
    tokio::time::sleep(Duration::from_secs(1)).await;
    assert_eq!(call.state(), CallState::Connected);
    assert_eq!(answer.state(), CallState::Connected);
    assert_eq!(alice.coordinator.sessions().await.len(), 1);
    assert_eq!(bob.coordinator.sessions().await.len(), 1);

    alice.coordinator.hang_up(&session_id).await.unwrap();
    answer.wait_ended().await;

    replay();
    for kind in [SignalingType::End, SignalingType::Offer, SignalingType::Answer] {
        net.bus.publish(to_bob(kind)).unwrap();
        net.bus.publish(to_alice(kind)).unwrap();
    }
    tokio::time::sleep(Duration::from_secs(1)).await;
    assert!(answer.deliver(to_bob(SignalingType::End)).is_err());

    assert_eq!(call.state(), CallState::Ended(EndReason::UserEnded));
    assert_eq!(answer.state(), CallState::Ended(EndReason::UserEnded));
    assert!(alice.coordinator.sessions().await.is_empty());
    assert!(bob.coordinator.sessions().await.is_empty());

    alice.coordinator.shutdown().await;
    bob.coordinator.shutdown().await;
    alice.compliance.flush().await;
    bob.compliance.flush().await;

    let records = sink.records.lock().unwrap().clone();
    assert_eq!(records.len(), 2);
    assert_eq!(records[0].action, ComplianceAction::Started);
    assert_eq!(records[1].action, ComplianceAction::Ended);
}
