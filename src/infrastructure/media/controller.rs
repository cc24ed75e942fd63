//! Per-session media negotiation driver

use super::lock;
use super::provider::ProviderAdapter;
use crate::domain::media::{
    IceCandidate, LocalStream, MediaConstraints, MediaError, RemoteStream, SessionDescription,
};
use crate::domain::shared::value_objects::SessionId;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Notifications from the controller to the owning state machine
#[derive(Debug, Clone, PartialEq)]
pub enum ControllerEvent {
    /// Local offer or answer ready to be signaled
    LocalDescription(SessionDescription),
    /// Trickled local candidate
    LocalCandidate(IceCandidate),
    /// First remote track arrived
    RemoteStream(RemoteStream),
    ParticipantLeft,
    Failed(MediaError),
}

#[derive(Debug)]
enum Job {
    Prepare,
    Offer,
    Answer(SessionDescription),
    RemoteAnswer(SessionDescription),
    RemoteCandidate(IceCandidate),
}

struct Inner {
    session_id: SessionId,
    adapter: Arc<dyn ProviderAdapter>,
    payload: serde_json::Value,
    constraints: MediaConstraints,
    events: mpsc::UnboundedSender<ControllerEvent>,
    local: Mutex<Option<LocalStream>>,
    remote_stream_id: Mutex<Option<String>>,
    /// Releases of streams opened after teardown started
    late_releases: Mutex<Vec<JoinHandle<usize>>>,
    joined: AtomicBool,
    torn_down: AtomicBool,
}

impl Inner {
    fn emit(&self, event: ControllerEvent) {
        // the owner may already be gone during teardown
        let _ = self.events.send(event);
    }

    async fn acquire_local_media(&self) -> Result<LocalStream, MediaError> {
        if let Some(stream) = lock(&self.local).clone() {
            return Ok(stream);
        }

        let stream = self.adapter.open_local_media(self.constraints).await?;
        let stale = {
            let mut local = lock(&self.local);
            if self.torn_down.load(Ordering::Acquire) {
                true
            } else {
                *local = Some(stream.clone());
                false
            }
        };

        if stale {
            // runs to completion even if the caller is cancelled
            let adapter = self.adapter.clone();
            let release = tokio::spawn(async move { adapter.release_local_media(&stream).await });
            lock(&self.late_releases).push(release);
            return Err(MediaError::TransportUnavailable("session torn down".to_string()));
        }
        debug!(session_id = %self.session_id, tracks = stream.tracks.len(), "Local media acquired");
        Ok(stream)
    }

    async fn prepare(&self) -> Result<LocalStream, MediaError> {
        let stream = self.acquire_local_media().await?;
        if !self.joined.load(Ordering::Acquire) {
            self.adapter.join(&self.session_id, &self.payload).await?;
            self.joined.store(true, Ordering::Release);
        }
        Ok(stream)
    }

    fn attach_remote_stream(&self, stream: RemoteStream) -> bool {
        if self.torn_down.load(Ordering::Acquire) {
            return false;
        }
        {
            let mut current = lock(&self.remote_stream_id);
            if current.as_deref() == Some(stream.id.as_str()) {
                return false;
            }
            if let Some(ref existing) = *current {
                debug!(session_id = %self.session_id, "Ignoring additional remote stream (have {})", existing);
                return false;
            }
            *current = Some(stream.id.clone());
        }

        info!(session_id = %self.session_id, stream_id = %stream.id, "Remote stream attached");
        self.emit(ControllerEvent::RemoteStream(stream));
        true
    }
}

/// Drives media acquisition and SDP/ICE negotiation for one session
///
/// Negotiation steps run one at a time on a worker task in submission
/// order. Remote candidates that arrive before the remote description are
/// held back and applied once it is set.
pub struct PeerConnectionController {
    inner: Arc<Inner>,
    jobs: mpsc::UnboundedSender<Job>,
    cancel: CancellationToken,
    worker: Mutex<Option<JoinHandle<()>>>,
}

impl PeerConnectionController {
    pub fn new(
        session_id: SessionId,
        adapter: Arc<dyn ProviderAdapter>,
        payload: serde_json::Value,
        constraints: MediaConstraints,
        events: mpsc::UnboundedSender<ControllerEvent>,
    ) -> Self {
        let inner = Arc::new(Inner {
            session_id,
            adapter: adapter.clone(),
            payload,
            constraints,
            events,
            local: Mutex::new(None),
            remote_stream_id: Mutex::new(None),
            late_releases: Mutex::new(Vec::new()),
            joined: AtomicBool::new(false),
            torn_down: AtomicBool::new(false),
        });

        let weak = Arc::downgrade(&inner);
        adapter.on_remote_stream(Arc::new(move |stream| {
            if let Some(inner) = weak.upgrade() {
                inner.attach_remote_stream(stream);
            }
        }));
        let weak = Arc::downgrade(&inner);
        adapter.on_local_candidate(Arc::new(move |candidate| {
            if let Some(inner) = weak.upgrade() {
                if !inner.torn_down.load(Ordering::Acquire) {
                    inner.emit(ControllerEvent::LocalCandidate(candidate));
                }
            }
        }));
        let weak = Arc::downgrade(&inner);
        adapter.on_participant_left(Arc::new(move || {
            if let Some(inner) = weak.upgrade() {
                inner.emit(ControllerEvent::ParticipantLeft);
            }
        }));

        let (jobs, rx) = mpsc::unbounded_channel();
        let cancel = CancellationToken::new();
        let worker = tokio::spawn(run_worker(inner.clone(), rx, cancel.clone()));

        Self {
            inner,
            jobs,
            cancel,
            worker: Mutex::new(Some(worker)),
        }
    }

    pub fn session_id(&self) -> &SessionId {
        &self.inner.session_id
    }

    /// Open camera/microphone; returns the already open stream if any
    pub async fn acquire_local_media(&self) -> Result<LocalStream, MediaError> {
        self.inner.acquire_local_media().await
    }

    fn submit(&self, job: Job) {
        if self.jobs.send(job).is_err() {
            debug!(session_id = %self.inner.session_id, "Negotiation worker stopped; job discarded");
        }
    }

    /// Acquire media and join the provider session
    pub fn prepare(&self) {
        self.submit(Job::Prepare);
    }

    pub fn create_offer(&self) {
        self.submit(Job::Offer);
    }

    pub fn create_answer(&self, remote_offer: SessionDescription) {
        self.submit(Job::Answer(remote_offer));
    }

    pub fn apply_answer(&self, remote_answer: SessionDescription) {
        self.submit(Job::RemoteAnswer(remote_answer));
    }

    pub fn add_remote_candidate(&self, candidate: IceCandidate) {
        self.submit(Job::RemoteCandidate(candidate));
    }

    /// Returns false when the stream was already attached
    pub fn attach_remote_stream(&self, stream: RemoteStream) -> bool {
        self.inner.attach_remote_stream(stream)
    }

    pub fn is_torn_down(&self) -> bool {
        self.inner.torn_down.load(Ordering::Acquire)
    }

    /// Stop local tracks, close the connection and release devices
    ///
    /// Only the first call does any work; returns whether this call did.
    pub async fn teardown(&self) -> bool {
        if self.inner.torn_down.swap(true, Ordering::AcqRel) {
            debug!(session_id = %self.inner.session_id, "Teardown already done");
            return false;
        }

        self.cancel.cancel();
        let worker = lock(&self.worker).take();
        if let Some(worker) = worker {
            let _ = worker.await;
        }

        let local = lock(&self.inner.local).take();
        let mut released = match local {
            Some(stream) => self.inner.adapter.release_local_media(&stream).await,
            None => 0,
        };
        let late = std::mem::take(&mut *lock(&self.inner.late_releases));
        for release in late {
            released += release.await.unwrap_or(0);
        }

        if let Err(e) = self.inner.adapter.leave(&self.inner.session_id).await {
            warn!(session_id = %self.inner.session_id, "Provider leave failed: {}", e);
        }

        info!(session_id = %self.inner.session_id, released, "Media torn down");
        true
    }
}

impl Drop for PeerConnectionController {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

async fn run_worker(inner: Arc<Inner>, mut jobs: mpsc::UnboundedReceiver<Job>, cancel: CancellationToken) {
    let mut remote_described = false;
    let mut buffered: Vec<IceCandidate> = Vec::new();

    loop {
        let job = tokio::select! {
            biased;
            _ = cancel.cancelled() => break,
            job = jobs.recv() => match job {
                Some(job) => job,
                None => break,
            },
        };

        let step = run_job(&inner, job, &mut remote_described, &mut buffered);
        let result = tokio::select! {
            biased;
            _ = cancel.cancelled() => break,
            result = step => result,
        };

        if let Err(e) = result {
            warn!(session_id = %inner.session_id, "Negotiation step failed: {}", e);
            inner.emit(ControllerEvent::Failed(e));
        }
    }

    debug!(session_id = %inner.session_id, "Negotiation worker stopped");
}

async fn run_job(
    inner: &Inner,
    job: Job,
    remote_described: &mut bool,
    buffered: &mut Vec<IceCandidate>,
) -> Result<(), MediaError> {
    match job {
        Job::Prepare => {
            inner.prepare().await?;
        }
        Job::Offer => {
            let local = inner.prepare().await?;
            let offer = inner.adapter.create_offer(&local).await?;
            inner.emit(ControllerEvent::LocalDescription(offer));
        }
        Job::Answer(offer) => {
            let local = inner.prepare().await?;
            let answer = inner.adapter.create_answer(&offer, &local).await?;
            *remote_described = true;
            inner.emit(ControllerEvent::LocalDescription(answer));
            flush_candidates(inner, buffered).await;
        }
        Job::RemoteAnswer(answer) => {
            inner.adapter.set_remote_answer(&answer).await?;
            *remote_described = true;
            flush_candidates(inner, buffered).await;
        }
        Job::RemoteCandidate(candidate) => {
            if *remote_described {
                apply_candidate(inner, &candidate).await;
            } else {
                debug!(session_id = %inner.session_id, "Buffering early remote candidate");
                buffered.push(candidate);
            }
        }
    }
    Ok(())
}

async fn flush_candidates(inner: &Inner, buffered: &mut Vec<IceCandidate>) {
    for candidate in std::mem::take(buffered) {
        apply_candidate(inner, &candidate).await;
    }
}

async fn apply_candidate(inner: &Inner, candidate: &IceCandidate) {
    if let Err(e) = inner.adapter.add_remote_candidate(candidate).await {
        warn!(session_id = %inner.session_id, "Remote candidate rejected: {}", e);
    }
}
