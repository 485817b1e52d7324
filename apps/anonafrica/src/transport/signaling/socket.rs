use std::sync::Arc;

use futures_util::{SinkExt, StreamExt};
use parking_lot::Mutex;
use tokio::sync::{mpsc, oneshot};
use tokio_tungstenite::{
    connect_async,
    tungstenite::{Error as WsError, Message, error::ProtocolError},
};
use url::Url;

use super::{LinkEvent, LinkState, SignalingDialer, SignalingLink};
use crate::error::SignalingError;

/// Dials the matching service over `tokio-tungstenite`.
#[derive(Debug, Default, Clone)]
pub struct WebSocketDialer;

impl SignalingDialer for WebSocketDialer {
    fn dial(&self, url: &Url) -> (Arc<dyn SignalingLink>, mpsc::UnboundedReceiver<LinkEvent>) {
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let (outbound_tx, outbound_rx) = mpsc::unbounded_channel();
        let (shutdown_tx, shutdown_rx) = oneshot::channel();
        let state = Arc::new(Mutex::new(LinkState::Connecting));

        tokio::spawn(run_socket(
            url.clone(),
            Arc::clone(&state),
            outbound_rx,
            shutdown_rx,
            events_tx,
        ));

        let link = WebSocketLink {
            state,
            outbound: outbound_tx,
            shutdown: Mutex::new(Some(shutdown_tx)),
        };
        (Arc::new(link), events_rx)
    }
}

pub struct WebSocketLink {
    state: Arc<Mutex<LinkState>>,
    outbound: mpsc::UnboundedSender<String>,
    shutdown: Mutex<Option<oneshot::Sender<()>>>,
}

impl SignalingLink for WebSocketLink {
    fn state(&self) -> LinkState {
        *self.state.lock()
    }

    fn send_text(&self, text: String) -> Result<(), SignalingError> {
        if self.state() != LinkState::Open {
            return Err(SignalingError::NotOpen);
        }
        self.outbound
            .send(text)
            .map_err(|_| SignalingError::ChannelClosed)
    }

    fn close(&self) {
        let Some(shutdown) = self.shutdown.lock().take() else {
            return;
        };
        *self.state.lock() = LinkState::Closed;
        let _ = shutdown.send(());
    }
}

async fn run_socket(
    url: Url,
    state: Arc<Mutex<LinkState>>,
    mut outbound: mpsc::UnboundedReceiver<String>,
    mut shutdown: oneshot::Receiver<()>,
    events: mpsc::UnboundedSender<LinkEvent>,
) {
    let connected = tokio::select! {
        result = connect_async(url.as_str()) => result,
        _ = &mut shutdown => {
            tracing::debug!(target = "signaling", url = %url, "signaling closed before connecting");
            finish(&state, &events);
            return;
        }
    };
    let ws_stream = match connected {
        Ok((ws_stream, _)) => ws_stream,
        Err(err) => {
            tracing::warn!(target = "signaling", url = %url, "signaling connect failed: {err}");
            let _ = events.send(LinkEvent::Error(err.to_string()));
            finish(&state, &events);
            return;
        }
    };
    {
        let mut current = state.lock();
        if *current == LinkState::Closed {
            drop(current);
            finish(&state, &events);
            return;
        }
        *current = LinkState::Open;
    }
    tracing::debug!(target = "signaling", url = %url, "signaling websocket connected");
    let _ = events.send(LinkEvent::Opened);

    let (mut ws_write, mut ws_read) = ws_stream.split();
    loop {
        tokio::select! {
            _ = &mut shutdown => {
                let _ = ws_write.send(Message::Close(None)).await;
                break;
            }
            Some(text) = outbound.recv() => {
                tracing::trace!(target = "signaling", event = "ws_out", len = text.len());
                if let Err(err) = ws_write.send(Message::Text(text)).await {
                    tracing::warn!(target = "signaling", "signaling send failed: {err}");
                    let _ = events.send(LinkEvent::Error(err.to_string()));
                    break;
                }
            }
            incoming = ws_read.next() => match incoming {
                Some(Ok(Message::Text(text))) => {
                    tracing::trace!(target = "signaling", event = "ws_in", kind = "text", len = text.len());
                    let _ = events.send(LinkEvent::Frame(text));
                }
                Some(Ok(Message::Binary(data))) => {
                    tracing::trace!(target = "signaling", event = "ws_in", kind = "binary", len = data.len());
                    match String::from_utf8(data) {
                        Ok(text) => {
                            let _ = events.send(LinkEvent::Frame(text));
                        }
                        Err(_) => {
                            tracing::warn!(target = "signaling", "dropping non-utf8 binary frame");
                        }
                    }
                }
                Some(Ok(Message::Close(_))) | None => break,
                Some(Ok(_)) => {}
                Some(Err(err)) => {
                    match &err {
                        WsError::ConnectionClosed
                        | WsError::AlreadyClosed
                        | WsError::Protocol(ProtocolError::ResetWithoutClosingHandshake) => {
                            tracing::debug!(target = "signaling", "signaling websocket closed: {err}");
                        }
                        _ => {
                            tracing::warn!(target = "signaling", "signaling websocket error: {err}");
                            let _ = events.send(LinkEvent::Error(err.to_string()));
                        }
                    }
                    break;
                }
            }
        }
    }
    finish(&state, &events);
}

fn finish(state: &Mutex<LinkState>, events: &mpsc::UnboundedSender<LinkEvent>) {
    *state.lock() = LinkState::Closed;
    let _ = events.send(LinkEvent::Closed);
}
