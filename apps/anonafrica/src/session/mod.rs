pub mod countries;
pub mod descriptor;
pub mod state;
pub mod text;
pub mod video;

use std::sync::Arc;

use tokio::sync::mpsc;

use crate::config::ClientConfig;
use crate::error::DescriptorError;
use crate::scheduler::{Scheduler, TokioScheduler};
use crate::transport::signaling::{SignalingDialer, WebSocketDialer};

pub use descriptor::{PartnerCode, SessionDescriptor};
pub use state::{MatchEvent, MatchState, MatchStateMachine, Transition};
pub use text::{ChatView, Sender, TextChat, TextChatHandle, TranscriptEntry};
pub use video::{VideoChat, VideoChatHandle, VideoView};

/// Everything a session needs from outside, passed in explicitly.
#[derive(Clone)]
pub struct SessionContext {
    pub config: Arc<ClientConfig>,
    pub descriptor: SessionDescriptor,
    pub dialer: Arc<dyn SignalingDialer>,
    pub scheduler: Arc<dyn Scheduler>,
}

impl SessionContext {
    pub fn new(
        config: ClientConfig,
        descriptor: SessionDescriptor,
        dialer: Arc<dyn SignalingDialer>,
        scheduler: Arc<dyn Scheduler>,
    ) -> Result<Self, DescriptorError> {
        countries::validate()?;
        Ok(Self {
            config: Arc::new(config),
            descriptor,
            dialer,
            scheduler,
        })
    }

    /// Real WebSocket dialer and wall-clock timers.
    pub fn live(
        config: ClientConfig,
        descriptor: SessionDescriptor,
    ) -> Result<Self, DescriptorError> {
        Self::new(
            config,
            descriptor,
            Arc::new(WebSocketDialer),
            Arc::new(TokioScheduler),
        )
    }

    pub fn searching_text(&self) -> String {
        format!(
            "Finding someone from {}...",
            self.descriptor.partner_code().label()
        )
    }
}

/// Next item from an optional receiver. Pending forever while there is no
/// receiver; a finished receiver is cleared.
pub(crate) async fn next_event<T>(slot: &mut Option<mpsc::UnboundedReceiver<T>>) -> T {
    let received = match slot.as_mut() {
        Some(rx) => rx.recv().await,
        None => None,
    };
    match received {
        Some(item) => item,
        None => {
            *slot = None;
            std::future::pending().await
        }
    }
}
