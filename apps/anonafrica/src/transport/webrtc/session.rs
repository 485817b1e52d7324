use std::collections::VecDeque;
use std::sync::Arc;

use super::{IceCandidate, MediaKind, PeerTransport, RemoteTrack, SessionDescription};
use crate::error::NegotiationError;
use crate::media::LocalMedia;

/// The partner's media as announced through track events.
#[derive(Debug, Clone, PartialEq)]
pub struct RemoteStream {
    pub stream_id: String,
    pub tracks: Vec<RemoteTrack>,
}

impl RemoteStream {
    pub fn has(&self, kind: MediaKind) -> bool {
        self.tracks.iter().any(|track| track.kind == kind)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CandidateOutcome {
    Applied,
    Queued,
}

/// One peer connection plus the local media attached to it.
///
/// Remote candidates that arrive before a remote description are queued and
/// applied right after it is set. Closing releases the local media.
pub struct PeerSession {
    transport: Arc<dyn PeerTransport>,
    local: Option<LocalMedia>,
    remote: Option<RemoteStream>,
    pending: VecDeque<IceCandidate>,
    pending_cap: usize,
    closed: bool,
}

impl PeerSession {
    pub fn new(transport: Arc<dyn PeerTransport>, local: LocalMedia, pending_cap: usize) -> Self {
        Self {
            transport,
            local: Some(local),
            remote: None,
            pending: VecDeque::new(),
            pending_cap: pending_cap.max(1),
            closed: false,
        }
    }

    fn ensure_open(&self) -> Result<(), NegotiationError> {
        if self.closed {
            Err(NegotiationError::Closed)
        } else {
            Ok(())
        }
    }

    /// Create an offer and apply it locally.
    pub async fn create_offer(&mut self) -> Result<SessionDescription, NegotiationError> {
        self.ensure_open()?;
        let offer = self.transport.create_offer().await?;
        self.transport.set_local_description(offer.clone()).await?;
        Ok(offer)
    }

    /// Apply a remote offer and return the answer that was applied locally.
    pub async fn accept_offer(&mut self, sdp: String) -> Result<SessionDescription, NegotiationError> {
        self.ensure_open()?;
        self.transport
            .set_remote_description(SessionDescription::offer(sdp))
            .await?;
        self.flush_pending().await;
        let answer = self.transport.create_answer().await?;
        self.transport.set_local_description(answer.clone()).await?;
        Ok(answer)
    }

    pub async fn accept_answer(&mut self, sdp: String) -> Result<(), NegotiationError> {
        self.ensure_open()?;
        self.transport
            .set_remote_description(SessionDescription::answer(sdp))
            .await?;
        self.flush_pending().await;
        Ok(())
    }

    pub async fn add_remote_candidate(
        &mut self,
        candidate: IceCandidate,
    ) -> Result<CandidateOutcome, NegotiationError> {
        self.ensure_open()?;
        if !self.transport.has_remote_description().await {
            if self.pending.len() >= self.pending_cap {
                tracing::warn!(
                    target = "webrtc",
                    cap = self.pending_cap,
                    "pending candidate queue full; dropping oldest"
                );
                self.pending.pop_front();
            }
            self.pending.push_back(candidate);
            return Ok(CandidateOutcome::Queued);
        }
        self.transport.add_ice_candidate(candidate).await?;
        Ok(CandidateOutcome::Applied)
    }

    async fn flush_pending(&mut self) {
        if self.pending.is_empty() {
            return;
        }
        tracing::debug!(
            target = "webrtc",
            count = self.pending.len(),
            "applying queued remote candidates"
        );
        while let Some(candidate) = self.pending.pop_front() {
            if let Err(err) = self.transport.add_ice_candidate(candidate).await {
                tracing::warn!(target = "webrtc", "queued candidate rejected: {err}");
            }
        }
    }

    pub fn pending_candidates(&self) -> usize {
        self.pending.len()
    }

    /// Record a remote track. The stream is fixed by the first track; returns
    /// whether the visible remote stream changed.
    pub fn attach_remote(&mut self, track: RemoteTrack) -> bool {
        if self.closed {
            return false;
        }
        match &mut self.remote {
            None => {
                self.remote = Some(RemoteStream {
                    stream_id: track.stream_id.clone(),
                    tracks: vec![track],
                });
                true
            }
            Some(stream) if stream.stream_id == track.stream_id => {
                if stream.tracks.iter().any(|t| t.track_id == track.track_id) {
                    return false;
                }
                stream.tracks.push(track);
                true
            }
            Some(stream) => {
                tracing::debug!(
                    target = "webrtc",
                    current = %stream.stream_id,
                    ignored = %track.stream_id,
                    "ignoring track from a second remote stream"
                );
                false
            }
        }
    }

    pub fn remote(&self) -> Option<&RemoteStream> {
        self.remote.as_ref()
    }

    pub fn local(&self) -> Option<&LocalMedia> {
        self.local.as_ref()
    }

    pub fn is_closed(&self) -> bool {
        self.closed
    }

    /// Close the transport, release local media and detach the remote stream.
    pub async fn close(&mut self) {
        if self.closed {
            return;
        }
        self.closed = true;
        self.pending.clear();
        self.remote = None;
        if let Err(err) = self.transport.close().await {
            tracing::debug!(target = "webrtc", "peer close failed: {err}");
        }
        self.local = None;
    }
}

impl Drop for PeerSession {
    fn drop(&mut self) {
        if self.closed {
            return;
        }
        if let Ok(runtime) = tokio::runtime::Handle::try_current() {
            let transport = Arc::clone(&self.transport);
            runtime.spawn(async move {
                let _ = transport.close().await;
            });
        }
    }
}
