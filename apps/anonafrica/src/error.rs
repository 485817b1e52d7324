use thiserror::Error;

/// Camera/microphone acquisition failures. Retried by the media retry controller.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum MediaError {
    #[error("media device unavailable: {0}")]
    Unavailable(String),
    #[error("media access denied: {0}")]
    PermissionDenied(String),
    #[error("media setup failed: {0}")]
    Setup(String),
}

/// Failures of the connection to the matching service.
#[derive(Debug, Error)]
pub enum SignalingError {
    #[error("invalid signaling url: {0}")]
    InvalidUrl(String),
    #[error("signaling connection is not open")]
    NotOpen,
    #[error("signaling channel closed")]
    ChannelClosed,
    #[error(transparent)]
    Protocol(#[from] ProtocolError),
}

/// Inbound or outbound frames that do not fit the message schema. Never fatal.
#[derive(Debug, Error)]
pub enum ProtocolError {
    #[error("malformed frame: {0}")]
    Malformed(#[from] serde_json::Error),
    #[error("{message} frame is not valid on the {channel} channel")]
    Unsupported {
        message: &'static str,
        channel: &'static str,
    },
}

/// Offer/answer/candidate application failures. Logged; the session is left as is.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum NegotiationError {
    #[error("peer transport error: {0}")]
    Peer(String),
    #[error("peer transport is closed")]
    Closed,
    #[error("no peer session for the current match")]
    NoSession,
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("invalid value {value:?} for {key}: {reason}")]
    InvalidValue {
        key: &'static str,
        value: String,
        reason: String,
    },
}

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum DescriptorError {
    #[error("partner code cannot be empty")]
    EmptyPartnerCode,
    #[error("unknown partner code {0:?}")]
    UnknownPartnerCode(String),
    #[error("unknown country code {0:?}")]
    UnknownCountry(String),
    #[error("diaspora routing requires the caller's own country code")]
    MissingOwnCode,
    #[error("country table invalid: {0}")]
    InvalidCountryTable(String),
}

pub(crate) fn to_negotiation_error<E: std::fmt::Display>(err: E) -> NegotiationError {
    NegotiationError::Peer(err.to_string())
}
