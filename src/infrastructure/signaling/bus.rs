//! In-process signaling bus: one delivery channel per connected user

use crate::domain::invitation::InvitationStore;
use crate::domain::media::ProviderKind;
use crate::domain::shared::error::DomainError;
use crate::domain::shared::result::Result;
use crate::domain::shared::value_objects::UserId;
use crate::domain::signaling::SignalingMessage;
use crate::infrastructure::sync::{read, write};
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, RwLock};
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Receiver side of a user subscription
#[async_trait]
pub trait SignalingHandler: Send + Sync {
    async fn handle(&self, message: SignalingMessage);

    /// Called once after pending invitations were replayed, before live delivery
    async fn reconciled(&self) {}
}

/// Outcome of a publish
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Delivery {
    /// Queued on the recipient's active subscription
    Delivered,
    /// Recipient not connected; recovery relies on invitation reconciliation
    Dropped,
}

struct Route {
    id: u64,
    tx: mpsc::UnboundedSender<SignalingMessage>,
    cancel: CancellationToken,
}

struct BusInner {
    routes: RwLock<HashMap<UserId, Route>>,
    store: Arc<dyn InvitationStore>,
    default_provider: ProviderKind,
    next_id: AtomicU64,
    closed: AtomicBool,
}

impl BusInner {
    fn remove_route(&self, user_id: &UserId, id: u64) {
        let mut routes = write(&self.routes);
        if routes.get(user_id).is_some_and(|r| r.id == id) {
            if let Some(route) = routes.remove(user_id) {
                route.cancel.cancel();
            }
        }
    }
}

/// Session-scoped message delivery between participants
///
/// Delivery is at-least-once from the sender's point of view and
/// fire-and-forget for offline recipients. Messages published to one
/// recipient are delivered in publish order.
#[derive(Clone)]
pub struct SignalingBus {
    inner: Arc<BusInner>,
}

impl SignalingBus {
    pub fn new(store: Arc<dyn InvitationStore>, default_provider: ProviderKind) -> Self {
        Self {
            inner: Arc::new(BusInner {
                routes: RwLock::new(HashMap::new()),
                store,
                default_provider,
                next_id: AtomicU64::new(1),
                closed: AtomicBool::new(false),
            }),
        }
    }

    /// Deliver a message to the recipient's active subscription
    pub fn publish(&self, message: SignalingMessage) -> Result<Delivery> {
        if self.inner.closed.load(Ordering::Acquire) {
            return Err(DomainError::Unavailable("signaling bus is closed".to_string()));
        }

        let routes = read(&self.inner.routes);

        let recipient = message.recipient_id.clone();
        let kind = message.kind;
        let session_id = message.session_id;

        let delivered = routes
            .get(&recipient)
            .map(|route| route.tx.send(message).is_ok())
            .unwrap_or(false);

        if delivered {
            debug!(%session_id, recipient = %recipient, "Delivered {}", kind);
            Ok(Delivery::Delivered)
        } else {
            debug!(%session_id, recipient = %recipient, "Dropped {} (recipient offline)", kind);
            metrics::counter!("signaling_messages_dropped_total", "event" => kind.event_name())
                .increment(1);
            Ok(Delivery::Dropped)
        }
    }

    /// Subscribe `user_id`, replacing any previous subscription of that user
    ///
    /// The live channel is registered immediately so nothing published from
    /// now on is lost. Pending invitations addressed to the user are then
    /// replayed to the handler as `call-invite` messages before the buffered
    /// live messages are drained.
    pub fn subscribe(&self, user_id: UserId, handler: Arc<dyn SignalingHandler>) -> Subscription {
        let id = self.inner.next_id.fetch_add(1, Ordering::Relaxed);
        let (tx, rx) = mpsc::unbounded_channel();
        let cancel = CancellationToken::new();
        let (ready_tx, ready_rx) = watch::channel(false);

        {
            let mut routes = write(&self.inner.routes);
            if let Some(previous) = routes.insert(
                user_id.clone(),
                Route {
                    id,
                    tx,
                    cancel: cancel.clone(),
                },
            ) {
                info!(user_id = %user_id, "Replacing previous signaling subscription");
                previous.cancel.cancel();
            }
        }

        let task = tokio::spawn(deliver(
            self.inner.clone(),
            user_id.clone(),
            handler,
            rx,
            cancel.clone(),
            ready_tx,
        ));

        Subscription {
            user_id,
            id,
            cancel,
            ready: ready_rx,
            task: Some(task),
            bus: self.inner.clone(),
        }
    }

    pub fn is_connected(&self, user_id: &UserId) -> bool {
        read(&self.inner.routes).contains_key(user_id)
    }

    pub fn subscriber_count(&self) -> usize {
        read(&self.inner.routes).len()
    }

    /// Stop all delivery; later publishes fail with `Unavailable`
    pub fn close(&self) {
        self.inner.closed.store(true, Ordering::Release);
        let mut routes = write(&self.inner.routes);
        for (_, route) in routes.drain() {
            route.cancel.cancel();
        }
        info!("Signaling bus closed");
    }

    pub fn is_closed(&self) -> bool {
        self.inner.closed.load(Ordering::Acquire)
    }
}

async fn deliver(
    bus: Arc<BusInner>,
    user_id: UserId,
    handler: Arc<dyn SignalingHandler>,
    mut rx: mpsc::UnboundedReceiver<SignalingMessage>,
    cancel: CancellationToken,
    ready: watch::Sender<bool>,
) {
    match bus.store.list_pending(&user_id).await {
        Ok(pending) => {
            let missed: Vec<_> = pending
                .into_iter()
                .filter(|inv| inv.recipient_id == user_id)
                .collect();
            if !missed.is_empty() {
                info!(user_id = %user_id, count = missed.len(), "Replaying pending invitations");
            }
            for invitation in missed {
                if cancel.is_cancelled() {
                    break;
                }
                let provider = invitation
                    .provider_payload
                    .get("provider")
                    .and_then(|v| v.as_str())
                    .and_then(|s| s.parse().ok())
                    .unwrap_or(bus.default_provider);
                handler.handle(SignalingMessage::invite(&invitation, provider)).await;
            }
        }
        Err(e) => {
            warn!(user_id = %user_id, "Pending invitation reconciliation failed: {}", e);
        }
    }
    if !cancel.is_cancelled() {
        handler.reconciled().await;
    }
    let _ = ready.send(true);

    loop {
        // already-queued messages are drained before a cancellation is honoured
        tokio::select! {
            biased;
            message = rx.recv() => match message {
                Some(message) => handler.handle(message).await,
                None => break,
            },
            _ = cancel.cancelled() => break,
        }
    }

    debug!(user_id = %user_id, "Signaling delivery stopped");
}

/// Active subscription; dropping it stops delivery
pub struct Subscription {
    user_id: UserId,
    id: u64,
    cancel: CancellationToken,
    ready: watch::Receiver<bool>,
    task: Option<JoinHandle<()>>,
    bus: Arc<BusInner>,
}

impl Subscription {
    pub fn user_id(&self) -> &UserId {
        &self.user_id
    }

    /// Wait until pending invitations were replayed and live delivery began
    pub async fn reconciled(&mut self) {
        let _ = self.ready.wait_for(|ready| *ready).await;
    }

    /// Whether this subscription is still the user's active one
    pub fn is_active(&self) -> bool {
        !self.cancel.is_cancelled()
    }

    /// Stop delivery and wait for the delivery task to finish
    pub async fn unsubscribe(mut self) {
        self.bus.remove_route(&self.user_id, self.id);
        self.cancel.cancel();
        if let Some(task) = self.task.take() {
            let _ = task.await;
        }
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.bus.remove_route(&self.user_id, self.id);
        self.cancel.cancel();
    }
}
