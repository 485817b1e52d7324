use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use webrtc::api::interceptor_registry::register_default_interceptors;
use webrtc::api::media_engine::MediaEngine;
use webrtc::api::{API, APIBuilder};
use webrtc::ice_transport::ice_candidate::{RTCIceCandidate, RTCIceCandidateInit};
use webrtc::interceptor::registry::Registry;
use webrtc::peer_connection::RTCPeerConnection;
use webrtc::peer_connection::peer_connection_state::RTCPeerConnectionState;
use webrtc::peer_connection::sdp::session_description::RTCSessionDescription;
use webrtc::rtp_transceiver::rtp_codec::RTPCodecType;
use webrtc::track::track_remote::TrackRemote;

use super::{
    IceCandidate, IceConfig, MediaKind, PeerConnectionState, PeerEvent, PeerEventSender,
    PeerFactory, PeerTransport, RemoteTrack, SdpKind, SessionDescription,
};
use crate::error::{NegotiationError, to_negotiation_error};
use crate::media::LocalMedia;

fn build_api() -> Result<API, NegotiationError> {
    let mut media_engine = MediaEngine::default();
    media_engine
        .register_default_codecs()
        .map_err(to_negotiation_error)?;

    let mut registry = Registry::new();
    registry =
        register_default_interceptors(registry, &mut media_engine).map_err(to_negotiation_error)?;

    Ok(APIBuilder::new()
        .with_media_engine(media_engine)
        .with_interceptor_registry(registry)
        .build())
}

async fn add_local_tracks(
    pc: &RTCPeerConnection,
    local: &LocalMedia,
) -> Result<(), NegotiationError> {
    for track in local.tracks() {
        let sender = pc
            .add_track(Arc::clone(track))
            .await
            .map_err(to_negotiation_error)?;
        // Drain RTCP so interceptors keep running.
        tokio::spawn(async move {
            let mut buf = vec![0u8; 1500];
            while sender.read(&mut buf).await.is_ok() {}
        });
    }
    Ok(())
}

/// Shut down a connection that never made it out of `create`.
async fn abandon(pc: &RTCPeerConnection) {
    if let Err(err) = pc.close().await {
        tracing::debug!(target = "webrtc", "closing abandoned peer connection: {err}");
    }
}

impl From<RTCIceCandidateInit> for IceCandidate {
    fn from(init: RTCIceCandidateInit) -> Self {
        Self {
            candidate: init.candidate,
            sdp_mid: init.sdp_mid,
            sdp_mline_index: init.sdp_mline_index,
            username_fragment: init.username_fragment,
        }
    }
}

impl From<IceCandidate> for RTCIceCandidateInit {
    fn from(candidate: IceCandidate) -> Self {
        RTCIceCandidateInit {
            candidate: candidate.candidate,
            sdp_mid: candidate.sdp_mid,
            sdp_mline_index: candidate.sdp_mline_index,
            username_fragment: candidate.username_fragment,
        }
    }
}

impl From<RTCPeerConnectionState> for PeerConnectionState {
    fn from(state: RTCPeerConnectionState) -> Self {
        match state {
            RTCPeerConnectionState::Connecting => PeerConnectionState::Connecting,
            RTCPeerConnectionState::Connected => PeerConnectionState::Connected,
            RTCPeerConnectionState::Disconnected => PeerConnectionState::Disconnected,
            RTCPeerConnectionState::Failed => PeerConnectionState::Failed,
            RTCPeerConnectionState::Closed => PeerConnectionState::Closed,
            _ => PeerConnectionState::New,
        }
    }
}

fn to_rtc_description(desc: SessionDescription) -> Result<RTCSessionDescription, NegotiationError> {
    match desc.kind {
        SdpKind::Offer => RTCSessionDescription::offer(desc.sdp),
        SdpKind::Answer => RTCSessionDescription::answer(desc.sdp),
    }
    .map_err(to_negotiation_error)
}

/// Peer transports backed by the `webrtc` crate.
#[derive(Debug, Clone, Default)]
pub struct RtcPeerFactory {
    config: IceConfig,
}

impl RtcPeerFactory {
    pub fn new(config: IceConfig) -> Self {
        Self { config }
    }
}

#[async_trait]
impl PeerFactory for RtcPeerFactory {
    async fn create(
        &self,
        local: &LocalMedia,
        events: PeerEventSender,
    ) -> Result<Arc<dyn PeerTransport>, NegotiationError> {
        let api = build_api()?;
        let pc = Arc::new(
            api.new_peer_connection(self.config.rtc_configuration())
                .await
                .map_err(to_negotiation_error)?,
        );

        if let Err(err) = add_local_tracks(&pc, local).await {
            abandon(&pc).await;
            return Err(err);
        }

        let candidate_events = events.clone();
        pc.on_ice_candidate(Box::new(move |candidate: Option<RTCIceCandidate>| {
            let events = candidate_events.clone();
            Box::pin(async move {
                let Some(candidate) = candidate else {
                    return;
                };
                match candidate.to_json() {
                    Ok(init) => {
                        let _ = events.send(PeerEvent::LocalCandidate(init.into()));
                    }
                    Err(err) => {
                        tracing::warn!(target = "webrtc", "failed to serialize local candidate: {err}");
                    }
                }
            })
        }));

        let track_events = events.clone();
        pc.on_track(Box::new(move |track: Arc<TrackRemote>, _receiver, _transceiver| {
            let events = track_events.clone();
            Box::pin(async move {
                let kind = match track.kind() {
                    RTPCodecType::Audio => MediaKind::Audio,
                    _ => MediaKind::Video,
                };
                tracing::debug!(
                    target = "webrtc",
                    stream_id = %track.stream_id(),
                    track_id = %track.id(),
                    ?kind,
                    "remote track"
                );
                let _ = events.send(PeerEvent::RemoteTrack(RemoteTrack {
                    stream_id: track.stream_id(),
                    track_id: track.id(),
                    kind,
                    handle: Some(track),
                }));
            })
        }));

        let state_events = events;
        pc.on_peer_connection_state_change(Box::new(move |state: RTCPeerConnectionState| {
            let events = state_events.clone();
            Box::pin(async move {
                tracing::debug!(target = "webrtc", ?state, "peer connection state");
                let _ = events.send(PeerEvent::StateChanged(state.into()));
            })
        }));

        Ok(Arc::new(RtcPeerTransport {
            pc,
            closed: AtomicBool::new(false),
        }))
    }
}

pub struct RtcPeerTransport {
    pc: Arc<RTCPeerConnection>,
    closed: AtomicBool,
}

#[async_trait]
impl PeerTransport for RtcPeerTransport {
    async fn create_offer(&self) -> Result<SessionDescription, NegotiationError> {
        let offer = self
            .pc
            .create_offer(None)
            .await
            .map_err(to_negotiation_error)?;
        Ok(SessionDescription::offer(offer.sdp))
    }

    async fn create_answer(&self) -> Result<SessionDescription, NegotiationError> {
        let answer = self
            .pc
            .create_answer(None)
            .await
            .map_err(to_negotiation_error)?;
        Ok(SessionDescription::answer(answer.sdp))
    }

    async fn set_local_description(
        &self,
        desc: SessionDescription,
    ) -> Result<(), NegotiationError> {
        self.pc
            .set_local_description(to_rtc_description(desc)?)
            .await
            .map_err(to_negotiation_error)
    }

    async fn set_remote_description(
        &self,
        desc: SessionDescription,
    ) -> Result<(), NegotiationError> {
        self.pc
            .set_remote_description(to_rtc_description(desc)?)
            .await
            .map_err(to_negotiation_error)
    }

    async fn add_ice_candidate(&self, candidate: IceCandidate) -> Result<(), NegotiationError> {
        self.pc
            .add_ice_candidate(candidate.into())
            .await
            .map_err(to_negotiation_error)
    }

    async fn has_remote_description(&self) -> bool {
        self.pc.remote_description().await.is_some()
    }

    async fn close(&self) -> Result<(), NegotiationError> {
        if self.closed.swap(true, Ordering::SeqCst) {
            return Ok(());
        }
        self.pc.close().await.map_err(to_negotiation_error)
    }
}
