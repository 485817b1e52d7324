use webrtc::ice_transport::ice_server::RTCIceServer;
use webrtc::peer_connection::configuration::RTCConfiguration;

use crate::config::ClientConfig;

/// ICE servers handed to each peer connection.
#[derive(Debug, Clone)]
pub struct IceConfig {
    pub ice_servers: Vec<RTCIceServer>,
}

impl Default for IceConfig {
    fn default() -> Self {
        Self::from_client_config(&ClientConfig::default())
    }
}

impl IceConfig {
    /// One public STUN resolver and no TURN relay.
    pub fn from_client_config(config: &ClientConfig) -> Self {
        Self {
            ice_servers: vec![RTCIceServer {
                urls: vec![config.stun_url.clone()],
                ..Default::default()
            }],
        }
    }

    /// Host candidates only, for loopback tests.
    pub fn localhost() -> Self {
        Self {
            ice_servers: Vec::new(),
        }
    }

    pub fn rtc_configuration(&self) -> RTCConfiguration {
        RTCConfiguration {
            ice_servers: self.ice_servers.clone(),
            ..Default::default()
        }
    }
}
