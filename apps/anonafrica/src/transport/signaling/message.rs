use serde::{Deserialize, Deserializer, Serialize};

use crate::error::ProtocolError;
use crate::transport::webrtc::IceCandidate;

/// Which matching-service endpoint a channel talks to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ChannelKind {
    Chat,
    Video,
}

impl ChannelKind {
    pub fn as_str(self) -> &'static str {
        match self {
            ChannelKind::Chat => "chat",
            ChannelKind::Video => "video",
        }
    }
}

/// Classified signaling frame. The JSON form is tagged by `type`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum SignalingMessage {
    Matched {
        #[serde(default)]
        initiator: bool,
    },
    Offer {
        #[serde(deserialize_with = "sdp_text")]
        sdp: String,
    },
    Answer {
        #[serde(deserialize_with = "sdp_text")]
        sdp: String,
    },
    Candidate {
        #[serde(deserialize_with = "candidate_init")]
        candidate: IceCandidate,
    },
    PartnerDisconnected,
    PartnerSkipped,
    #[serde(rename = "system")]
    SystemText { text: String },
    #[serde(rename = "chat")]
    ChatText { text: String },
}

impl SignalingMessage {
    pub fn name(&self) -> &'static str {
        match self {
            SignalingMessage::Matched { .. } => "matched",
            SignalingMessage::Offer { .. } => "offer",
            SignalingMessage::Answer { .. } => "answer",
            SignalingMessage::Candidate { .. } => "candidate",
            SignalingMessage::PartnerDisconnected => "partner_disconnected",
            SignalingMessage::PartnerSkipped => "partner_skipped",
            SignalingMessage::SystemText { .. } => "system",
            SignalingMessage::ChatText { .. } => "chat",
        }
    }

    fn is_negotiation(&self) -> bool {
        matches!(
            self,
            SignalingMessage::Offer { .. }
                | SignalingMessage::Answer { .. }
                | SignalingMessage::Candidate { .. }
        )
    }

    fn is_text(&self) -> bool {
        matches!(
            self,
            SignalingMessage::SystemText { .. } | SignalingMessage::ChatText { .. }
        )
    }
}

// Browsers often relay the whole RTCSessionDescription object instead of the bare sdp string.
fn sdp_text<'de, D: Deserializer<'de>>(deserializer: D) -> Result<String, D::Error> {
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Sdp {
        Text(String),
        Description { sdp: String },
    }
    Ok(match Sdp::deserialize(deserializer)? {
        Sdp::Text(sdp) | Sdp::Description { sdp } => sdp,
    })
}

fn candidate_init<'de, D: Deserializer<'de>>(deserializer: D) -> Result<IceCandidate, D::Error> {
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Candidate {
        Init(IceCandidate),
        Text(String),
    }
    Ok(match Candidate::deserialize(deserializer)? {
        Candidate::Init(init) => init,
        Candidate::Text(candidate) => IceCandidate::new(candidate),
    })
}

/// Raw server notices understood by older chat servers. A notice may carry
/// trailing text after the phrase, so frames are matched on their opening words.
const LEGACY_MARKERS: &[(&str, LegacyMarker)] = &[
    ("matched with a stranger", LegacyMarker::Matched),
    ("your partner disconnected", LegacyMarker::Disconnected),
    ("partner disconnected", LegacyMarker::Disconnected),
    ("partner_disconnected", LegacyMarker::Disconnected),
    ("your partner skipped", LegacyMarker::Skipped),
    ("partner skipped", LegacyMarker::Skipped),
    ("partner_skipped", LegacyMarker::Skipped),
];

#[derive(Debug, Clone, Copy)]
enum LegacyMarker {
    Matched,
    Disconnected,
    Skipped,
}

fn legacy_marker(raw: &str) -> Option<SignalingMessage> {
    let normalized = raw.trim().to_lowercase();
    LEGACY_MARKERS
        .iter()
        .find(|(phrase, _)| {
            normalized
                .strip_prefix(*phrase)
                .is_some_and(|rest| !rest.starts_with(|c: char| c.is_alphanumeric() || c == '_'))
        })
        .map(|(_, marker)| match marker {
            LegacyMarker::Matched => SignalingMessage::Matched { initiator: false },
            LegacyMarker::Disconnected => SignalingMessage::PartnerDisconnected,
            LegacyMarker::Skipped => SignalingMessage::PartnerSkipped,
        })
}

/// Whether `raw` carries the structured schema rather than free text.
pub fn is_structured(raw: &str) -> bool {
    raw.trim_start().starts_with('{')
}

/// Classify an inbound frame.
///
/// Video frames must match the tagged schema. Chat frames prefer the tagged
/// schema, then legacy markers at the start of the frame, and are otherwise
/// chat text.
pub fn classify(kind: ChannelKind, raw: &str) -> Result<SignalingMessage, ProtocolError> {
    match kind {
        ChannelKind::Video => {
            let message: SignalingMessage = serde_json::from_str(raw)?;
            if message.is_text() {
                return Err(ProtocolError::Unsupported {
                    message: message.name(),
                    channel: kind.as_str(),
                });
            }
            Ok(message)
        }
        ChannelKind::Chat => {
            if is_structured(raw) {
                if let Ok(message) = serde_json::from_str::<SignalingMessage>(raw) {
                    if message.is_negotiation() {
                        return Err(ProtocolError::Unsupported {
                            message: message.name(),
                            channel: kind.as_str(),
                        });
                    }
                    return Ok(message);
                }
            } else if let Some(marker) = legacy_marker(raw) {
                return Ok(marker);
            }
            Ok(SignalingMessage::ChatText {
                text: raw.to_string(),
            })
        }
    }
}

/// Encode an outbound frame. Chat text goes out verbatim; everything else is tagged JSON.
pub fn encode(kind: ChannelKind, message: &SignalingMessage) -> Result<String, ProtocolError> {
    let unsupported = match kind {
        ChannelKind::Video => message.is_text(),
        ChannelKind::Chat => message.is_negotiation(),
    };
    if unsupported {
        return Err(ProtocolError::Unsupported {
            message: message.name(),
            channel: kind.as_str(),
        });
    }
    match (kind, message) {
        (ChannelKind::Chat, SignalingMessage::ChatText { text }) => Ok(text.clone()),
        _ => Ok(serde_json::to_string(message)?),
    }
}
