//! In-memory doubles for the signaling dialer, peer transport and media devices.
//!
//! They record every interaction so session tests can assert on ordering, and
//! let the test inject server frames and peer events by hand.

use std::collections::VecDeque;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::sync::{mpsc, watch};
use url::Url;

use super::signaling::{LinkEvent, LinkState, SignalingDialer, SignalingLink, SignalingMessage};
use super::webrtc::{
    IceCandidate, PeerEvent, PeerEventSender, PeerFactory, PeerTransport, SessionDescription,
};
use crate::error::{MediaError, NegotiationError, SignalingError};
use crate::media::{LocalMedia, MediaDevices, MediaLease};

#[derive(Clone, Default)]
pub struct MockDialer {
    connections: Arc<Mutex<Vec<MockConnection>>>,
}

impl MockDialer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn dial_count(&self) -> usize {
        self.connections.lock().len()
    }

    pub fn connections(&self) -> Vec<MockConnection> {
        self.connections.lock().clone()
    }

    /// The `index`-th dialed connection. Panics when it does not exist.
    pub fn connection(&self, index: usize) -> MockConnection {
        self.connections.lock()[index].clone()
    }

    pub fn last(&self) -> Option<MockConnection> {
        self.connections.lock().last().cloned()
    }
}

impl SignalingDialer for MockDialer {
    fn dial(&self, url: &Url) -> (Arc<dyn SignalingLink>, mpsc::UnboundedReceiver<LinkEvent>) {
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let link = Arc::new(MockLink {
            state: Mutex::new(LinkState::Connecting),
            sent: Mutex::new(Vec::new()),
            close_calls: AtomicUsize::new(0),
            closed_events: AtomicUsize::new(0),
            events: events_tx,
        });
        self.connections.lock().push(MockConnection {
            url: url.clone(),
            link: Arc::clone(&link),
        });
        (link, events_rx)
    }
}

pub struct MockLink {
    state: Mutex<LinkState>,
    sent: Mutex<Vec<String>>,
    close_calls: AtomicUsize,
    closed_events: AtomicUsize,
    events: mpsc::UnboundedSender<LinkEvent>,
}

impl MockLink {
    fn finish(&self) {
        {
            let mut state = self.state.lock();
            if *state == LinkState::Closed {
                return;
            }
            *state = LinkState::Closed;
        }
        self.closed_events.fetch_add(1, Ordering::SeqCst);
        let _ = self.events.send(LinkEvent::Closed);
    }
}

impl SignalingLink for MockLink {
    fn state(&self) -> LinkState {
        *self.state.lock()
    }

    fn send_text(&self, text: String) -> Result<(), SignalingError> {
        if self.state() != LinkState::Open {
            return Err(SignalingError::NotOpen);
        }
        self.sent.lock().push(text);
        Ok(())
    }

    fn close(&self) {
        self.close_calls.fetch_add(1, Ordering::SeqCst);
        self.finish();
    }
}

/// Test-side view of one dialed link: plays the matching service.
#[derive(Clone)]
pub struct MockConnection {
    url: Url,
    link: Arc<MockLink>,
}

impl MockConnection {
    pub fn url(&self) -> &Url {
        &self.url
    }

    pub fn state(&self) -> LinkState {
        self.link.state()
    }

    pub fn is_closed(&self) -> bool {
        self.state() == LinkState::Closed
    }

    /// Complete the handshake.
    pub fn open(&self) {
        {
            let mut state = self.link.state.lock();
            if *state != LinkState::Connecting {
                return;
            }
            *state = LinkState::Open;
        }
        let _ = self.link.events.send(LinkEvent::Opened);
    }

    pub fn deliver(&self, frame: impl Into<String>) {
        if self.is_closed() {
            return;
        }
        let _ = self.link.events.send(LinkEvent::Frame(frame.into()));
    }

    pub fn deliver_message(&self, message: &SignalingMessage) {
        if let Ok(frame) = serde_json::to_string(message) {
            self.deliver(frame);
        }
    }

    pub fn fail(&self, reason: impl Into<String>) {
        if self.is_closed() {
            return;
        }
        let _ = self.link.events.send(LinkEvent::Error(reason.into()));
        self.link.finish();
    }

    /// Server-side close.
    pub fn hang_up(&self) {
        self.link.finish();
    }

    pub fn sent(&self) -> Vec<String> {
        self.link.sent.lock().clone()
    }

    /// Sent frames that parse as tagged signaling messages.
    pub fn sent_messages(&self) -> Vec<SignalingMessage> {
        self.sent()
            .iter()
            .filter_map(|frame| serde_json::from_str(frame).ok())
            .collect()
    }

    pub fn close_calls(&self) -> usize {
        self.link.close_calls.load(Ordering::SeqCst)
    }

    pub fn closed_events(&self) -> usize {
        self.link.closed_events.load(Ordering::SeqCst)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PeerCall {
    CreateOffer,
    CreateAnswer,
    SetLocal(SessionDescription),
    SetRemote(SessionDescription),
    AddCandidate(IceCandidate),
}

#[derive(Default)]
pub struct MockPeer {
    label: String,
    calls: Mutex<Vec<PeerCall>>,
    remote_set: AtomicBool,
    reject_remote: AtomicBool,
    closed: AtomicBool,
    close_calls: AtomicUsize,
    descriptions: AtomicUsize,
    events: Mutex<Option<PeerEventSender>>,
}

impl MockPeer {
    pub fn new() -> Self {
        Self::default()
    }

    fn with_events(label: &str, events: PeerEventSender) -> Self {
        Self {
            label: label.to_string(),
            events: Mutex::new(Some(events)),
            ..Self::default()
        }
    }

    /// Label of the local media the peer was created with.
    pub fn media_label(&self) -> &str {
        &self.label
    }

    pub fn calls(&self) -> Vec<PeerCall> {
        self.calls.lock().clone()
    }

    pub fn close_calls(&self) -> usize {
        self.close_calls.load(Ordering::SeqCst)
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    /// Make `set_remote_description` fail from now on.
    pub fn reject_remote_descriptions(&self) {
        self.reject_remote.store(true, Ordering::SeqCst);
    }

    /// Raise a transport event as the real peer connection would.
    pub fn emit(&self, event: PeerEvent) -> bool {
        match self.events.lock().as_ref() {
            Some(events) => events.send(event).is_ok(),
            None => false,
        }
    }

    fn record(&self, call: PeerCall) -> Result<(), NegotiationError> {
        if self.is_closed() {
            return Err(NegotiationError::Closed);
        }
        self.calls.lock().push(call);
        Ok(())
    }

    fn next_sdp(&self, prefix: &str) -> String {
        let n = self.descriptions.fetch_add(1, Ordering::SeqCst) + 1;
        format!("{prefix}-{n}")
    }
}

#[async_trait]
impl PeerTransport for MockPeer {
    async fn create_offer(&self) -> Result<SessionDescription, NegotiationError> {
        self.record(PeerCall::CreateOffer)?;
        Ok(SessionDescription::offer(self.next_sdp("mock-offer")))
    }

    async fn create_answer(&self) -> Result<SessionDescription, NegotiationError> {
        self.record(PeerCall::CreateAnswer)?;
        Ok(SessionDescription::answer(self.next_sdp("mock-answer")))
    }

    async fn set_local_description(
        &self,
        desc: SessionDescription,
    ) -> Result<(), NegotiationError> {
        self.record(PeerCall::SetLocal(desc))
    }

    async fn set_remote_description(
        &self,
        desc: SessionDescription,
    ) -> Result<(), NegotiationError> {
        if self.reject_remote.load(Ordering::SeqCst) {
            return Err(NegotiationError::Peer("remote description rejected".into()));
        }
        self.record(PeerCall::SetRemote(desc))?;
        self.remote_set.store(true, Ordering::SeqCst);
        Ok(())
    }

    async fn add_ice_candidate(&self, candidate: IceCandidate) -> Result<(), NegotiationError> {
        self.record(PeerCall::AddCandidate(candidate))
    }

    async fn has_remote_description(&self) -> bool {
        self.remote_set.load(Ordering::SeqCst)
    }

    async fn close(&self) -> Result<(), NegotiationError> {
        self.close_calls.fetch_add(1, Ordering::SeqCst);
        self.closed.store(true, Ordering::SeqCst);
        self.events.lock().take();
        Ok(())
    }
}

#[derive(Clone, Default)]
pub struct MockPeerFactory {
    peers: Arc<Mutex<Vec<Arc<MockPeer>>>>,
    failures: Arc<AtomicUsize>,
}

impl MockPeerFactory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn created(&self) -> usize {
        self.peers.lock().len()
    }

    /// The `index`-th created peer. Panics when it does not exist.
    pub fn peer(&self, index: usize) -> Arc<MockPeer> {
        Arc::clone(&self.peers.lock()[index])
    }

    pub fn last(&self) -> Option<Arc<MockPeer>> {
        self.peers.lock().last().cloned()
    }

    /// Fail the next `count` creations.
    pub fn fail_next(&self, count: usize) {
        self.failures.store(count, Ordering::SeqCst);
    }
}

#[async_trait]
impl PeerFactory for MockPeerFactory {
    async fn create(
        &self,
        local: &LocalMedia,
        events: PeerEventSender,
    ) -> Result<Arc<dyn PeerTransport>, NegotiationError> {
        let failing = self
            .failures
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if failing {
            return Err(NegotiationError::Peer("scripted peer failure".into()));
        }
        let peer = Arc::new(MockPeer::with_events(local.label(), events));
        self.peers.lock().push(Arc::clone(&peer));
        Ok(peer)
    }
}

/// Scripted camera/microphone.
///
/// Succeeds unless failures were queued or `fail_always` was set. While paused,
/// acquisitions wait until `resume` is called.
#[derive(Clone)]
pub struct MockMediaDevices {
    script: Arc<Mutex<VecDeque<MediaError>>>,
    always: Arc<Mutex<Option<MediaError>>>,
    attempts: Arc<AtomicUsize>,
    held: Arc<AtomicUsize>,
    paused: Arc<watch::Sender<bool>>,
}

impl Default for MockMediaDevices {
    fn default() -> Self {
        Self {
            script: Arc::default(),
            always: Arc::default(),
            attempts: Arc::default(),
            held: Arc::default(),
            paused: Arc::new(watch::channel(false).0),
        }
    }
}

impl MockMediaDevices {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn fail_next(&self, count: usize, error: MediaError) {
        let mut script = self.script.lock();
        for _ in 0..count {
            script.push_back(error.clone());
        }
    }

    pub fn fail_always(&self, error: MediaError) {
        *self.always.lock() = Some(error);
    }

    pub fn pause(&self) {
        self.paused.send_replace(true);
    }

    pub fn resume(&self) {
        self.paused.send_replace(false);
    }

    /// Acquisition attempts started so far.
    pub fn attempts(&self) -> usize {
        self.attempts.load(Ordering::SeqCst)
    }

    /// Successful acquisitions whose media has not been released.
    pub fn held(&self) -> usize {
        self.held.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl MediaDevices for MockMediaDevices {
    async fn acquire(&self) -> Result<LocalMedia, MediaError> {
        let attempt = self.attempts.fetch_add(1, Ordering::SeqCst) + 1;
        let mut paused = self.paused.subscribe();
        while *paused.borrow_and_update() {
            if paused.changed().await.is_err() {
                break;
            }
        }
        if let Some(error) = self.script.lock().pop_front() {
            return Err(error);
        }
        if let Some(error) = self.always.lock().clone() {
            return Err(error);
        }
        self.held.fetch_add(1, Ordering::SeqCst);
        let held = Arc::clone(&self.held);
        let lease = MediaLease::new(move || {
            held.fetch_sub(1, Ordering::SeqCst);
        });
        Ok(LocalMedia::new(
            format!("mock-media-{attempt}"),
            Vec::new(),
            lease,
        ))
    }
}
