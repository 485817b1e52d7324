pub mod retry;

use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use async_trait::async_trait;
use webrtc::api::media_engine::{MIME_TYPE_OPUS, MIME_TYPE_VP8};
use webrtc::rtp_transceiver::rtp_codec::RTCRtpCodecCapability;
use webrtc::track::track_local::TrackLocal;
use webrtc::track::track_local::track_local_static_sample::TrackLocalStaticSample;

use crate::error::MediaError;

pub use retry::{RetryController, RetryDecision, RetryState};

pub type LocalTrack = Arc<dyn TrackLocal + Send + Sync>;

/// Releases the capture hardware when dropped.
pub struct MediaLease {
    release: Option<Box<dyn FnOnce() + Send + Sync>>,
}

impl MediaLease {
    pub fn new(release: impl FnOnce() + Send + Sync + 'static) -> Self {
        Self {
            release: Some(Box::new(release)),
        }
    }

    pub fn detached() -> Self {
        Self { release: None }
    }
}

impl Drop for MediaLease {
    fn drop(&mut self) {
        if let Some(release) = self.release.take() {
            release();
        }
    }
}

/// Camera and microphone tracks held for one session cycle.
pub struct LocalMedia {
    label: String,
    tracks: Vec<LocalTrack>,
    _lease: MediaLease,
}

impl LocalMedia {
    pub fn new(label: impl Into<String>, tracks: Vec<LocalTrack>, lease: MediaLease) -> Self {
        Self {
            label: label.into(),
            tracks,
            _lease: lease,
        }
    }

    pub fn label(&self) -> &str {
        &self.label
    }

    pub fn tracks(&self) -> &[LocalTrack] {
        &self.tracks
    }
}

impl fmt::Debug for LocalMedia {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LocalMedia")
            .field("label", &self.label)
            .field("tracks", &self.tracks.len())
            .finish()
    }
}

#[async_trait]
pub trait MediaDevices: Send + Sync {
    /// Acquire camera and microphone. Each call is one attempt.
    async fn acquire(&self) -> Result<LocalMedia, MediaError>;
}

/// VP8 + Opus sample tracks with no capture behind them.
///
/// Used by the terminal front-end, which has no camera; the partner sees a
/// negotiated but silent stream.
#[derive(Debug, Default, Clone)]
pub struct SyntheticMediaDevices {
    held: Arc<AtomicUsize>,
}

impl SyntheticMediaDevices {
    pub fn new() -> Self {
        Self::default()
    }

    /// Acquisitions not yet released.
    pub fn held(&self) -> usize {
        self.held.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl MediaDevices for SyntheticMediaDevices {
    async fn acquire(&self) -> Result<LocalMedia, MediaError> {
        let stream_id = format!("anonafrica-{}", uuid::Uuid::new_v4());
        let video: LocalTrack = Arc::new(TrackLocalStaticSample::new(
            RTCRtpCodecCapability {
                mime_type: MIME_TYPE_VP8.to_owned(),
                ..Default::default()
            },
            "video".to_owned(),
            stream_id.clone(),
        ));
        let audio: LocalTrack = Arc::new(TrackLocalStaticSample::new(
            RTCRtpCodecCapability {
                mime_type: MIME_TYPE_OPUS.to_owned(),
                ..Default::default()
            },
            "audio".to_owned(),
            stream_id.clone(),
        ));

        self.held.fetch_add(1, Ordering::SeqCst);
        let held = Arc::clone(&self.held);
        let lease = MediaLease::new(move || {
            held.fetch_sub(1, Ordering::SeqCst);
        });
        tracing::debug!(target = "media", stream_id = %stream_id, "synthetic media acquired");
        Ok(LocalMedia::new(stream_id, vec![video, audio], lease))
    }
}
