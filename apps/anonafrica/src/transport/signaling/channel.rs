use std::sync::Arc;

use tokio::sync::mpsc;
use url::Url;

use super::message::{self, ChannelKind, SignalingMessage};
use super::{LinkEvent, LinkState, SignalingDialer, SignalingLink, endpoint_url};
use crate::config::ClientConfig;
use crate::error::{ProtocolError, SignalingError};
use crate::session::descriptor::SessionDescriptor;

/// Connection to the matching service for one session cycle.
///
/// Dropping the channel closes the underlying link.
pub struct SignalingChannel {
    kind: ChannelKind,
    url: Url,
    link: Arc<dyn SignalingLink>,
}

impl SignalingChannel {
    pub fn open(
        dialer: &dyn SignalingDialer,
        config: &ClientConfig,
        descriptor: &SessionDescriptor,
        kind: ChannelKind,
    ) -> Result<(Self, mpsc::UnboundedReceiver<LinkEvent>), SignalingError> {
        let url = endpoint_url(config, descriptor, kind)?;
        tracing::debug!(target = "signaling", url = %url, kind = kind.as_str(), "opening signaling channel");
        let (link, events) = dialer.dial(&url);
        Ok((Self { kind, url, link }, events))
    }

    pub fn kind(&self) -> ChannelKind {
        self.kind
    }

    pub fn url(&self) -> &Url {
        &self.url
    }

    pub fn state(&self) -> LinkState {
        self.link.state()
    }

    pub fn is_open(&self) -> bool {
        self.state() == LinkState::Open
    }

    pub fn send(&self, message: &SignalingMessage) -> Result<(), SignalingError> {
        let frame = message::encode(self.kind, message)?;
        tracing::trace!(target = "signaling", kind = message.name(), "sending frame");
        self.send_frame(frame)
    }

    /// Send a raw frame. Refused with an error log when the link is not open.
    pub fn send_frame(&self, frame: String) -> Result<(), SignalingError> {
        if !self.is_open() {
            tracing::error!(
                target = "signaling",
                state = ?self.state(),
                "signaling connection is not open; frame dropped"
            );
            return Err(SignalingError::NotOpen);
        }
        self.link.send_text(frame)
    }

    pub fn classify(&self, raw: &str) -> Result<SignalingMessage, ProtocolError> {
        message::classify(self.kind, raw)
    }

    pub fn close(&self) {
        self.link.close();
    }
}

impl Drop for SignalingChannel {
    fn drop(&mut self) {
        self.link.close();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::session::descriptor::PartnerCode;
    use crate::transport::mock::MockDialer;

    fn open(dialer: &MockDialer, kind: ChannelKind) -> SignalingChannel {
        let descriptor =
            SessionDescriptor::new(None, PartnerCode::Random, Some("c-9".into())).unwrap();
        let (channel, _events) =
            SignalingChannel::open(dialer, &ClientConfig::default(), &descriptor, kind).unwrap();
        channel
    }

    #[tokio::test]
    async fn send_before_open_is_refused() {
        let dialer = MockDialer::new();
        let channel = open(&dialer, ChannelKind::Video);
        let err = channel
            .send(&SignalingMessage::Answer { sdp: "v=0".into() })
            .unwrap_err();
        assert!(matches!(err, SignalingError::NotOpen));
        assert!(dialer.connection(0).sent().is_empty());
    }

    #[tokio::test]
    async fn frames_are_encoded_per_kind() {
        let dialer = MockDialer::new();
        let channel = open(&dialer, ChannelKind::Chat);
        dialer.connection(0).open();

        channel
            .send(&SignalingMessage::ChatText { text: "hey".into() })
            .unwrap();
        assert!(matches!(
            channel.send(&SignalingMessage::Offer { sdp: "v=0".into() }),
            Err(SignalingError::Protocol(_))
        ));
        assert_eq!(dialer.connection(0).sent(), vec!["hey".to_string()]);
    }

    #[tokio::test]
    async fn drop_closes_the_link_once() {
        let dialer = MockDialer::new();
        let channel = open(&dialer, ChannelKind::Video);
        assert_eq!(
            channel.url().as_str(),
            "wss://anonafrica.fly.dev/ws/video/random?clientId=c-9"
        );
        channel.close();
        drop(channel);
        let connection = dialer.connection(0);
        assert_eq!(connection.close_calls(), 2);
        assert_eq!(connection.closed_events(), 1);
        assert_eq!(connection.state(), LinkState::Closed);
    }
}
