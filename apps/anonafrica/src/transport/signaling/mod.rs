pub mod channel;
pub mod message;
pub mod socket;

use std::sync::Arc;

use tokio::sync::mpsc;
use url::Url;

use crate::config::ClientConfig;
use crate::error::SignalingError;
use crate::session::descriptor::{PartnerCode, SessionDescriptor};

pub use channel::SignalingChannel;
pub use message::{ChannelKind, SignalingMessage};
pub use socket::WebSocketDialer;

/// Lifecycle notifications from a link. Every link emits exactly one `Closed`, last.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LinkEvent {
    Opened,
    Frame(String),
    Error(String),
    Closed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkState {
    Connecting,
    Open,
    Closed,
}

/// One bidirectional text connection to the matching service.
pub trait SignalingLink: Send + Sync {
    fn state(&self) -> LinkState;
    fn send_text(&self, text: String) -> Result<(), SignalingError>;
    /// Idempotent. Safe to call before the link is open.
    fn close(&self);
}

/// Opens links. Dialing never blocks; progress is reported through the event receiver.
pub trait SignalingDialer: Send + Sync {
    fn dial(&self, url: &Url) -> (Arc<dyn SignalingLink>, mpsc::UnboundedReceiver<LinkEvent>);
}

/// Matching-service endpoint for a descriptor.
///
/// `{scheme}://{host}/ws/{token}` for chat and `/ws/video/{token}` for video.
/// `myCountry` is only added for diaspora routing; `clientId` is always present.
pub fn endpoint_url(
    config: &ClientConfig,
    descriptor: &SessionDescriptor,
    kind: ChannelKind,
) -> Result<Url, SignalingError> {
    let base = format!("{}://{}/", config.websocket_scheme(), config.host);
    let mut url = Url::parse(&base).map_err(|err| SignalingError::InvalidUrl(err.to_string()))?;
    {
        let mut segments = url
            .path_segments_mut()
            .map_err(|_| SignalingError::InvalidUrl(base.clone()))?;
        segments.clear().push("ws");
        if kind == ChannelKind::Video {
            segments.push("video");
        }
        segments.push(descriptor.partner_code().token());
    }
    {
        let mut query = url.query_pairs_mut();
        if *descriptor.partner_code() == PartnerCode::Diaspora {
            if let Some(own) = descriptor.own_code() {
                query.append_pair("myCountry", own);
            }
        }
        query.append_pair("clientId", descriptor.client_id());
    }
    Ok(url)
}
