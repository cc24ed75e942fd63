//! Call state machine: one actor task per participant per call
//!
//! The actor owns its [`CallSession`] and is the only writer of it. Local
//! user actions, signaling messages, media events, timer expiries and
//! shutdown all arrive on the actor's own `select!` loop and are applied
//! one at a time, so at most one transition is in flight per session.

use super::context::SessionContext;
use super::duration::DurationEvent;
use crate::domain::call::{CallRole, CallSession, CallState, EndReason, SessionUpdate};
use crate::domain::invitation::InvitationStatus;
use crate::domain::media::{IceCandidate, SessionDescription};
use crate::domain::shared::error::DomainError;
use crate::domain::shared::result::Result;
use crate::domain::shared::value_objects::SessionId;
use crate::domain::signaling::{EndPayload, SignalingMessage, SignalingType};
use crate::infrastructure::media::ControllerEvent;
use chrono::{DateTime, Utc};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{broadcast, mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tokio::time::{sleep_until, Instant};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, info_span, warn, Instrument};

const MAILBOX_CAPACITY: usize = 64;

/// Messages accepted by the session actor
#[derive(Debug)]
enum Command {
    Accept { respond_to: oneshot::Sender<Result<()>> },
    Decline { respond_to: oneshot::Sender<Result<()>> },
    Cancel { respond_to: oneshot::Sender<Result<()>> },
    HangUp { respond_to: oneshot::Sender<Result<()>> },
}

/// Handle to a running call session
#[derive(Clone)]
pub struct CallSessionHandle {
    session_id: SessionId,
    sender: mpsc::Sender<Command>,
    signals: mpsc::UnboundedSender<SignalingMessage>,
    snapshot: watch::Receiver<CallSession>,
}

impl CallSessionHandle {
    pub fn session_id(&self) -> &SessionId {
        &self.session_id
    }

    /// Latest published copy of the session
    pub fn snapshot(&self) -> CallSession {
        self.snapshot.borrow().clone()
    }

    pub fn state(&self) -> CallState {
        self.snapshot.borrow().state()
    }

    pub fn is_ended(&self) -> bool {
        self.snapshot.borrow().is_ended()
    }

    /// Accept an incoming call
    pub async fn accept(&self) -> Result<()> {
        self.request(|respond_to| Command::Accept { respond_to }).await
    }

    /// Decline an incoming call
    pub async fn decline(&self) -> Result<()> {
        self.request(|respond_to| Command::Decline { respond_to }).await
    }

    /// Abandon a call that has not connected yet
    pub async fn cancel(&self) -> Result<()> {
        self.request(|respond_to| Command::Cancel { respond_to }).await
    }

    /// End the call from any live state; a no-op once ended
    pub async fn hang_up(&self) -> Result<()> {
        if self.is_ended() {
            return Ok(());
        }
        match self.request(|respond_to| Command::HangUp { respond_to }).await {
            Err(DomainError::InvalidTransition(_)) if self.is_ended() => Ok(()),
            other => other,
        }
    }

    /// Hand a signaling message addressed to this session to the actor
    ///
    /// Never waits on the actor, so a busy session cannot hold up the caller.
    pub fn deliver(&self, message: SignalingMessage) -> Result<()> {
        self.signals.send(message).map_err(|_| self.ended_error())
    }

    /// Wait for the terminal state and return the final session
    pub async fn wait_ended(&self) -> CallSession {
        let mut snapshot = self.snapshot.clone();
        if snapshot.wait_for(|s| s.is_ended()).await.is_err() {
            debug!(session_id = %self.session_id, "Session actor gone before ending");
        }
        let ended = snapshot.borrow().clone();
        ended
    }

    async fn request<F>(&self, command: F) -> Result<()>
    where
        F: FnOnce(oneshot::Sender<Result<()>>) -> Command,
    {
        let (tx, rx) = oneshot::channel();
        self.sender
            .send(command(tx))
            .await
            .map_err(|_| self.ended_error())?;
        rx.await.map_err(|_| self.ended_error())?
    }

    fn ended_error(&self) -> DomainError {
        DomainError::InvalidTransition(format!("session {} has ended", self.session_id))
    }
}

/// Actor driving one [`CallSession`] through its states
pub struct CallStateMachine {
    session: CallSession,
    ctx: SessionContext,
    commands: mpsc::Receiver<Command>,
    signals: mpsc::UnboundedReceiver<SignalingMessage>,
    media_events: mpsc::UnboundedReceiver<ControllerEvent>,
    duration_tx: mpsc::UnboundedSender<DurationEvent>,
    duration_events: mpsc::UnboundedReceiver<DurationEvent>,
    snapshot: watch::Sender<CallSession>,
    updates: broadcast::Sender<SessionUpdate>,
    /// Ring or negotiation deadline of the current state
    deadline: Option<Instant>,
    /// Invite published when an outgoing session starts
    opening: Option<SignalingMessage>,
    /// Monotonic instant media started flowing; call duration is measured from it
    connected_at: Option<Instant>,
    cancel: CancellationToken,
    transport_lost: bool,
}

impl CallStateMachine {
    /// Start the actor for `session`
    ///
    /// `opening` is published as soon as the actor runs; cancelling
    /// `cancel` ends the session with `TransportUnavailable`.
    pub fn spawn(
        session: CallSession,
        ctx: SessionContext,
        media_events: mpsc::UnboundedReceiver<ControllerEvent>,
        opening: Option<SignalingMessage>,
        updates: broadcast::Sender<SessionUpdate>,
        cancel: CancellationToken,
    ) -> (CallSessionHandle, JoinHandle<()>) {
        let (sender, commands) = mpsc::channel(MAILBOX_CAPACITY);
        let (signals_tx, signals) = mpsc::unbounded_channel();
        let (duration_tx, duration_events) = mpsc::unbounded_channel();
        let (snapshot, snapshot_rx) = watch::channel(session.clone());
        let session_id = *session.session_id();
        let span = info_span!("call_session", %session_id, role = ?session.role());

        let actor = Self {
            session,
            ctx,
            commands,
            signals,
            media_events,
            duration_tx,
            duration_events,
            snapshot,
            updates,
            deadline: None,
            opening,
            connected_at: None,
            cancel,
            transport_lost: false,
        };
        let task = tokio::spawn(actor.run().instrument(span));

        let handle = CallSessionHandle {
            session_id,
            sender,
            signals: signals_tx,
            snapshot: snapshot_rx,
        };
        (handle, task)
    }

    async fn run(mut self) {
        self.on_start();

        while !self.session.is_ended() {
            tokio::select! {
                biased;

                _ = self.cancel.cancelled() => {
                    info!("Session shut down");
                    self.finish(EndReason::TransportUnavailable, false).await;
                }
                Some(command) = self.commands.recv() => {
                    self.handle_command(command).await;
                }
                Some(message) = self.signals.recv() => {
                    self.handle_signal(message).await;
                }
                Some(event) = self.media_events.recv() => {
                    self.handle_media_event(event).await;
                }
                Some(event) = self.duration_events.recv() => {
                    self.handle_duration_event(event).await;
                }
                _ = wait_deadline(self.deadline) => {
                    self.handle_deadline().await;
                }
            }

            if self.transport_lost && !self.session.is_ended() {
                self.finish(EndReason::TransportUnavailable, false).await;
            }
        }

        debug!("Session actor stopped");
    }

    fn on_start(&mut self) {
        metrics::gauge!("active_call_sessions").increment(1.0);
        info!(state = self.session.state().name(), "Session started");
        self.emit_state();

        match self.session.state() {
            CallState::Calling => {
                self.arm(self.ctx.policy.ring_timeout);
                if let Some(invite) = self.opening.take() {
                    self.publish(invite);
                }
            }
            CallState::Incoming => self.arm(self.ctx.policy.ring_timeout),
            CallState::Connecting => {
                self.arm(self.ctx.policy.negotiation_timeout);
                match self.session.role() {
                    CallRole::Caller => self.ctx.controller.create_offer(),
                    CallRole::Callee => self.ctx.controller.prepare(),
                }
            }
            _ => {}
        }
    }

    async fn handle_command(&mut self, command: Command) {
        match command {
            Command::Accept { respond_to } => {
                let result = self.accept().await;
                let _ = respond_to.send(result);
            }
            Command::Decline { respond_to } => {
                let result = self.decline().await;
                let _ = respond_to.send(result);
            }
            Command::Cancel { respond_to } => {
                let result = self.cancel_call().await;
                let _ = respond_to.send(result);
            }
            Command::HangUp { respond_to } => {
                let result = self.hang_up().await;
                let _ = respond_to.send(result);
            }
        }
    }

    async fn accept(&mut self) -> Result<()> {
        self.require(CallState::Incoming, "accept")?;

        match self
            .ctx
            .store
            .update_status(self.session.invitation_id(), InvitationStatus::Accepted)
            .await
        {
            Ok(_) => {}
            Err(e @ DomainError::Unavailable(_)) => {
                warn!("Invitation store unavailable on accept: {}", e);
                self.finish(EndReason::TransportUnavailable, false).await;
                return Err(e);
            }
            Err(e) => {
                warn!("Invitation can no longer be accepted: {}", e);
                self.finish(EndReason::Cancelled, false).await;
                return Err(e);
            }
        }

        self.session.begin_connecting()?;
        self.arm(self.ctx.policy.negotiation_timeout);
        self.emit_state();
        self.send_control(SignalingType::Accept, None);
        self.ctx.controller.prepare();
        info!("Call accepted");
        Ok(())
    }

    async fn decline(&mut self) -> Result<()> {
        self.require(CallState::Incoming, "decline")?;

        if let Err(e) = self
            .ctx
            .store
            .update_status(self.session.invitation_id(), InvitationStatus::Declined)
            .await
        {
            warn!("Failed to record declined invitation: {}", e);
        }
        self.send_control(SignalingType::Decline, None);
        self.finish(EndReason::Declined, false).await;
        Ok(())
    }

    async fn cancel_call(&mut self) -> Result<()> {
        match self.session.state() {
            CallState::Calling | CallState::Connecting => {
                self.finish(EndReason::Cancelled, true).await;
                Ok(())
            }
            state => Err(self.not_allowed("cancel", state)),
        }
    }

    async fn hang_up(&mut self) -> Result<()> {
        match self.session.state() {
            CallState::Connected => {
                self.finish(EndReason::UserEnded, true).await;
                Ok(())
            }
            CallState::Calling | CallState::Connecting => self.cancel_call().await,
            CallState::Incoming => self.decline().await,
            CallState::Ended(_) => Ok(()),
            state => Err(self.not_allowed("hang up", state)),
        }
    }

    async fn handle_signal(&mut self, message: SignalingMessage) {
        if &message.sender_id != self.session.remote_user() {
            warn!(sender = %message.sender_id, "Ignoring {} from a non-participant", message.kind);
            return;
        }

        let state = self.session.state();
        let role = self.session.role();
        match (message.kind, state) {
            (SignalingType::Accept, CallState::Calling) => {
                if let Err(e) = self.session.begin_connecting() {
                    warn!("{}", e);
                    return;
                }
                info!("Call accepted by recipient");
                self.arm(self.ctx.policy.negotiation_timeout);
                self.emit_state();
                self.ctx.controller.create_offer();
            }
            (SignalingType::Decline, CallState::Calling) => {
                self.finish(EndReason::Declined, false).await;
            }
            (SignalingType::End, CallState::Calling | CallState::Incoming) => {
                self.finish(EndReason::Cancelled, false).await;
            }
            (SignalingType::End, CallState::Connecting) => {
                let reason = match remote_reason(&message) {
                    Some(EndReason::NegotiationTimeout) => EndReason::NegotiationTimeout,
                    _ => EndReason::Cancelled,
                };
                self.finish(reason, false).await;
            }
            (SignalingType::End, CallState::Connected) => {
                let reason = match remote_reason(&message) {
                    Some(EndReason::TimeLimitReached) => EndReason::TimeLimitReached,
                    _ => EndReason::UserEnded,
                };
                self.finish(reason, false).await;
            }
            (SignalingType::Offer, CallState::Connecting | CallState::Connected)
                if role == CallRole::Callee =>
            {
                match message.payload_as::<SessionDescription>() {
                    Ok(offer) => self.ctx.controller.create_answer(offer),
                    Err(e) => warn!("Discarding offer: {}", e),
                }
            }
            (SignalingType::Answer, CallState::Connecting | CallState::Connected)
                if role == CallRole::Caller =>
            {
                match message.payload_as::<SessionDescription>() {
                    Ok(answer) => self.ctx.controller.apply_answer(answer),
                    Err(e) => warn!("Discarding answer: {}", e),
                }
            }
            (SignalingType::IceCandidate, CallState::Connecting | CallState::Connected) => {
                match message.payload_as::<IceCandidate>() {
                    Ok(candidate) => self.ctx.controller.add_remote_candidate(candidate),
                    Err(e) => warn!("Discarding candidate: {}", e),
                }
            }
            (kind, state) => {
                debug!("Ignoring {} in state {}", kind, state.name());
            }
        }
    }

    async fn handle_media_event(&mut self, event: ControllerEvent) {
        let live = matches!(self.session.state(), CallState::Connecting | CallState::Connected);

        match event {
            ControllerEvent::LocalDescription(description) if live => {
                let message = SignalingMessage::description(
                    self.session.local_user().clone(),
                    self.session.remote_user().clone(),
                    *self.session.session_id(),
                    &description,
                );
                self.publish(message);
            }
            ControllerEvent::LocalCandidate(candidate) if live => {
                let message = SignalingMessage::candidate(
                    self.session.local_user().clone(),
                    self.session.remote_user().clone(),
                    *self.session.session_id(),
                    &candidate,
                );
                self.publish(message);
            }
            ControllerEvent::RemoteStream(stream) => {
                if self.session.state() == CallState::Connecting {
                    debug!(stream_id = %stream.id, "Remote stream received");
                    self.on_connected();
                }
            }
            ControllerEvent::ParticipantLeft => match self.session.state() {
                CallState::Connected => self.finish(EndReason::UserEnded, true).await,
                CallState::Connecting => self.finish(EndReason::Cancelled, true).await,
                _ => {}
            },
            ControllerEvent::Failed(e) if live => {
                warn!("Media failure: {}", e);
                self.finish(e.end_reason(), true).await;
            }
            other => {
                debug!("Ignoring media event {:?} in state {}", other, self.session.state().name());
            }
        }
    }

    fn on_connected(&mut self) {
        if let Err(e) = self.session.mark_connected(Utc::now()) {
            warn!("{}", e);
            return;
        }
        self.connected_at = Some(Instant::now());
        self.deadline = None;

        let tx = self.duration_tx.clone();
        self.ctx.enforcer.start(
            *self.session.session_id(),
            self.session.duration_cap_secs(),
            Arc::new(move |event| {
                let _ = tx.send(event);
            }),
        );

        if self.session.role() == CallRole::Caller {
            self.ctx.compliance.on_call_start(&self.session);
        }

        metrics::counter!("calls_started_total", "provider" => self.session.provider().as_str()).increment(1);
        info!("Call connected");
        self.emit_state();
    }

    async fn handle_duration_event(&mut self, event: DurationEvent) {
        if self.session.state() != CallState::Connected {
            return;
        }
        match event {
            DurationEvent::Warning { remaining_secs } => {
                debug!(remaining_secs, "Duration warning");
                let _ = self.updates.send(SessionUpdate::DurationWarning {
                    session_id: *self.session.session_id(),
                    remaining_secs,
                });
            }
            DurationEvent::Expired => {
                self.finish(EndReason::TimeLimitReached, true).await;
            }
        }
    }

    async fn handle_deadline(&mut self) {
        self.deadline = None;
        match self.session.state() {
            CallState::Calling => {
                info!("No answer");
                self.finish(EndReason::NoAnswer, true).await;
            }
            CallState::Incoming => {
                info!("Incoming call not answered; declining");
                let _ = self.decline().await;
            }
            CallState::Connecting => {
                warn!("Negotiation timed out");
                self.finish(EndReason::NegotiationTimeout, true).await;
            }
            _ => {}
        }
    }

    /// Enter `Ended` and release everything the session holds
    async fn finish(&mut self, requested: EndReason, notify_remote: bool) {
        let state = self.session.state();
        if state.is_ended() {
            return;
        }
        if state == CallState::Calling {
            // an unanswered invite must not stay pending for the callee
            self.expire_invitation().await;
        }

        let reason = [requested, EndReason::ProviderError, EndReason::TransportUnavailable]
            .into_iter()
            .find(|r| state.can_transition_to(&CallState::Ended(*r)))
            .unwrap_or(EndReason::TransportUnavailable);
        if reason != requested {
            debug!("{} is not reachable from {}; ending with {}", requested, state.name(), reason);
        }
        if let Err(e) = self.session.end(reason, self.ended_at()) {
            warn!("{}", e);
            return;
        }

        let session_id = *self.session.session_id();
        self.deadline = None;
        self.ctx.enforcer.cancel(&session_id);

        let controller = self.ctx.controller.clone();
        self.ctx.teardown.spawn(async move {
            controller.teardown().await;
        });

        if notify_remote {
            self.send_control(SignalingType::End, Some(reason.as_str()));
        }

        let duration_secs = self.session.duration_seconds();
        if self.session.role() == CallRole::Caller {
            if let Some(secs) = duration_secs {
                self.ctx.compliance.on_call_end(&self.session, secs);
            }
        }

        let store = self.ctx.store.clone();
        self.ctx.teardown.spawn(async move {
            match store.close_session(&session_id).await {
                Ok(()) => {}
                Err(DomainError::NotFound(_)) => debug!(%session_id, "No invitation to close"),
                Err(e) => warn!(%session_id, "Failed to close session: {}", e),
            }
        });

        metrics::counter!("calls_ended_total", "reason" => reason.as_str()).increment(1);
        metrics::gauge!("active_call_sessions").decrement(1.0);
        info!(reason = reason.as_str(), duration_secs, "Session ended");

        self.snapshot.send_replace(self.session.clone());
        let _ = self.updates.send(SessionUpdate::Ended {
            session_id,
            reason,
            message: reason.user_message().to_string(),
            duration_secs,
        });
    }

    /// End timestamp consistent with the monotonic connected time
    fn ended_at(&self) -> DateTime<Utc> {
        match (self.connected_at, self.session.started_at()) {
            (Some(connected_at), Some(started_at)) => {
                started_at + chrono::Duration::from_std(connected_at.elapsed()).unwrap_or_else(|_| chrono::Duration::zero())
            }
            _ => Utc::now(),
        }
    }

    async fn expire_invitation(&self) {
        if let Err(e) = self
            .ctx
            .store
            .update_status(self.session.invitation_id(), InvitationStatus::Expired)
            .await
        {
            debug!("Invitation not expired: {}", e);
        }
    }

    fn send_control(&mut self, kind: SignalingType, reason: Option<&str>) {
        let message = SignalingMessage::control(
            kind,
            self.session.local_user().clone(),
            self.session.remote_user().clone(),
            *self.session.session_id(),
            reason,
        );
        self.publish(message);
    }

    fn publish(&mut self, message: SignalingMessage) {
        if let Err(e) = self.ctx.bus.publish(message) {
            warn!("Signaling unavailable: {}", e);
            self.transport_lost = true;
        }
    }

    fn emit_state(&self) {
        self.snapshot.send_replace(self.session.clone());
        let _ = self.updates.send(SessionUpdate::StateChanged {
            session_id: *self.session.session_id(),
            state: self.session.state(),
            at: Utc::now(),
        });
    }

    fn arm(&mut self, timeout: Duration) {
        self.deadline = Some(Instant::now() + timeout);
    }

    fn require(&self, expected: CallState, action: &str) -> Result<()> {
        let state = self.session.state();
        if state == expected {
            Ok(())
        } else {
            Err(self.not_allowed(action, state))
        }
    }

    fn not_allowed(&self, action: &str, state: CallState) -> DomainError {
        DomainError::InvalidTransition(format!(
            "cannot {} session {} in state {}",
            action,
            self.session.session_id(),
            state.name()
        ))
    }
}

fn remote_reason(message: &SignalingMessage) -> Option<EndReason> {
    message
        .payload_as::<EndPayload>()
        .ok()
        .and_then(|p| p.reason)
        .and_then(|r| EndReason::parse(&r))
}

async fn wait_deadline(deadline: Option<Instant>) {
    match deadline {
        Some(at) => sleep_until(at).await,
        None => std::future::pending().await,
    }
}
