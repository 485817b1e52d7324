pub mod mock;
pub mod signaling;
pub mod webrtc;
