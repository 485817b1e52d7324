//! Audio/video matchmaking session.
//!
//! One task owns the whole session: local media, the peer session, the
//! signaling channel and every timer. Link events, peer events, timer firings
//! and media results all arrive on that task, so there is a single writer for
//! session state. Each cycle (media + peer + signaling, from mount or skip to
//! teardown) has a number; timer firings and media results carry it and are
//! discarded when they belong to a torn-down cycle.

use std::sync::Arc;

use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;

use super::state::{
    CONNECTED_TEXT, MatchEvent, MatchState, MatchStateMachine, TRANSPORT_ERROR_TEXT, Transition,
};
use super::{SessionContext, next_event};
use crate::error::{MediaError, NegotiationError, SignalingError};
use crate::media::{LocalMedia, MediaDevices, RetryController, RetryDecision};
use crate::scheduler::TimerHandle;
use crate::transport::signaling::message;
use crate::transport::signaling::{ChannelKind, LinkEvent, SignalingChannel, SignalingMessage};
use crate::transport::webrtc::{CandidateOutcome, PeerEvent, PeerFactory, PeerSession, RemoteStream};

pub const PEER_SETUP_TEXT: &str = "Could not start the video session.";
pub const STOPPED_TEXT: &str = "Stopped.";

/// Snapshot handed to the rendering layer.
#[derive(Debug, Clone, PartialEq)]
pub struct VideoView {
    pub state: MatchState,
    pub status: String,
    pub banner: Option<String>,
    pub local_media: bool,
    pub remote: Option<RemoteStream>,
    pub stopped: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum VideoCommand {
    Skip,
    Stop,
}

/// Control surface of a running video session. Dropping it unmounts the session.
pub struct VideoChatHandle {
    commands: mpsc::UnboundedSender<VideoCommand>,
    view: watch::Receiver<VideoView>,
    task: JoinHandle<()>,
}

impl VideoChatHandle {
    pub fn skip(&self) {
        self.command(VideoCommand::Skip);
    }

    pub fn stop(&self) {
        self.command(VideoCommand::Stop);
    }

    fn command(&self, command: VideoCommand) {
        if self.commands.send(command).is_err() {
            tracing::debug!(target = "session", ?command, "video session already finished");
        }
    }

    pub fn view(&self) -> watch::Receiver<VideoView> {
        self.view.clone()
    }

    pub fn snapshot(&self) -> VideoView {
        self.view.borrow().clone()
    }

    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }

    /// Wait for the session task to exit, after `stop()`.
    pub async fn wait(&mut self) {
        if let Err(err) = (&mut self.task).await {
            tracing::warn!(target = "session", "video session task failed: {err}");
        }
    }

    /// Tear everything down and wait for it.
    pub async fn unmount(self) {
        let Self { commands, task, .. } = self;
        drop(commands);
        if let Err(err) = task.await {
            tracing::warn!(target = "session", "video session task failed: {err}");
        }
    }
}

pub struct VideoChat;

impl VideoChat {
    /// Mount a video session. Must be called within a tokio runtime.
    pub fn start(
        ctx: SessionContext,
        media: Arc<dyn MediaDevices>,
        peers: Arc<dyn PeerFactory>,
    ) -> VideoChatHandle {
        let (commands_tx, commands_rx) = mpsc::unbounded_channel();
        let (internal_tx, internal_rx) = mpsc::unbounded_channel();
        let initial = VideoView {
            state: MatchState::Searching,
            status: ctx.searching_text(),
            banner: None,
            local_media: false,
            remote: None,
            stopped: false,
        };
        let (view_tx, view_rx) = watch::channel(initial.clone());
        let retry = RetryController::new(ctx.config.max_media_retries, ctx.config.retry_delay);
        let actor = VideoActor {
            ctx,
            media,
            peers,
            internal: internal_tx,
            view: view_tx,
            machine: MatchStateMachine::new(),
            cycle: 0,
            status: initial.status,
            banner: None,
            retry,
            acquisition: None,
            offer_timer: None,
            reopen_timer: None,
            peer: None,
            peer_events: None,
            channel: None,
            link_events: None,
        };
        let task = tokio::spawn(actor.run(commands_rx, internal_rx));
        VideoChatHandle {
            commands: commands_tx,
            view: view_rx,
            task,
        }
    }
}

#[derive(Debug)]
enum Internal {
    Media {
        cycle: u64,
        result: Result<LocalMedia, MediaError>,
    },
    RetryDue {
        cycle: u64,
    },
    OfferDue {
        cycle: u64,
    },
    Reopen {
        cycle: u64,
    },
}

impl Internal {
    fn cycle(&self) -> u64 {
        match self {
            Internal::Media { cycle, .. }
            | Internal::RetryDue { cycle }
            | Internal::OfferDue { cycle }
            | Internal::Reopen { cycle } => *cycle,
        }
    }
}

enum Input {
    Command(Option<VideoCommand>),
    Internal(Internal),
    Link(LinkEvent),
    Peer(PeerEvent),
}

struct VideoActor {
    ctx: SessionContext,
    media: Arc<dyn MediaDevices>,
    peers: Arc<dyn PeerFactory>,
    internal: mpsc::UnboundedSender<Internal>,
    view: watch::Sender<VideoView>,
    machine: MatchStateMachine,
    cycle: u64,
    status: String,
    banner: Option<String>,
    retry: RetryController,
    acquisition: Option<JoinHandle<()>>,
    offer_timer: Option<TimerHandle>,
    reopen_timer: Option<TimerHandle>,
    peer: Option<PeerSession>,
    peer_events: Option<mpsc::UnboundedReceiver<PeerEvent>>,
    channel: Option<SignalingChannel>,
    link_events: Option<mpsc::UnboundedReceiver<LinkEvent>>,
}

impl VideoActor {
    async fn run(
        mut self,
        mut commands: mpsc::UnboundedReceiver<VideoCommand>,
        mut internal: mpsc::UnboundedReceiver<Internal>,
    ) {
        tracing::info!(
            target = "session",
            partner = %self.ctx.descriptor.partner_code(),
            client_id = %self.ctx.descriptor.client_id(),
            "video session mounted"
        );
        self.start_cycle();
        loop {
            let input = tokio::select! {
                biased;
                command = commands.recv() => Input::Command(command),
                Some(event) = internal.recv() => Input::Internal(event),
                event = next_event(&mut self.link_events) => Input::Link(event),
                event = next_event(&mut self.peer_events) => Input::Peer(event),
            };
            match input {
                Input::Command(Some(VideoCommand::Skip)) => self.skip().await,
                Input::Command(Some(VideoCommand::Stop)) => {
                    self.stop("stopped").await;
                    break;
                }
                Input::Command(None) => {
                    self.stop("unmounted").await;
                    break;
                }
                Input::Internal(event) => self.on_internal(event).await,
                Input::Link(event) => self.on_link_event(event).await,
                Input::Peer(event) => self.on_peer_event(event),
            }
        }
    }

    fn publish(&self) {
        let next = VideoView {
            state: self.machine.state(),
            status: self.status.clone(),
            banner: self.banner.clone(),
            local_media: self.peer.as_ref().is_some_and(|peer| peer.local().is_some()),
            remote: self.peer.as_ref().and_then(|peer| peer.remote()).cloned(),
            stopped: self.machine.is_stopped(),
        };
        self.view.send_if_modified(|current| {
            if *current == next {
                false
            } else {
                *current = next;
                true
            }
        });
    }

    fn start_cycle(&mut self) {
        self.cycle += 1;
        self.retry = RetryController::new(
            self.ctx.config.max_media_retries,
            self.ctx.config.retry_delay,
        );
        self.machine.resume_search();
        self.status = self.ctx.searching_text();
        self.banner = None;
        tracing::debug!(target = "session", cycle = self.cycle, "starting session cycle");
        self.publish();
        self.spawn_acquisition();
    }

    fn spawn_acquisition(&mut self) {
        let media = Arc::clone(&self.media);
        let internal = self.internal.clone();
        let cycle = self.cycle;
        self.acquisition = Some(tokio::spawn(async move {
            let result = media.acquire().await;
            let _ = internal.send(Internal::Media { cycle, result });
        }));
    }

    fn schedule(&self, delay: std::time::Duration, event: Internal) -> TimerHandle {
        let internal = self.internal.clone();
        self.ctx.scheduler.schedule(
            delay,
            Box::new(move || {
                let _ = internal.send(event);
            }),
        )
    }

    async fn on_internal(&mut self, event: Internal) {
        if event.cycle() != self.cycle {
            // Stale media is released here by drop.
            tracing::debug!(target = "session", current = self.cycle, ?event, "dropping stale event");
            return;
        }
        match event {
            Internal::Media { result, .. } => self.on_media(result).await,
            Internal::RetryDue { .. } => {
                tracing::debug!(target = "media", "retrying media acquisition");
                self.spawn_acquisition();
            }
            Internal::OfferDue { .. } => {
                self.offer_timer = None;
                self.send_offer().await;
            }
            Internal::Reopen { .. } => {
                self.reopen_timer = None;
                self.start_cycle();
            }
        }
    }

    async fn on_media(&mut self, result: Result<LocalMedia, MediaError>) {
        self.acquisition = None;
        match result {
            Ok(local) => {
                tracing::debug!(target = "media", media = local.label(), "local media acquired");
                self.retry.on_success();
                self.banner = None;
                self.begin_session(local).await;
            }
            Err(err) => {
                tracing::warn!(target = "media", error = %err, "media acquisition failed");
                let internal = self.internal.clone();
                let cycle = self.cycle;
                let decision = self.retry.on_failure(
                    self.ctx.scheduler.as_ref(),
                    Box::new(move || {
                        let _ = internal.send(Internal::RetryDue { cycle });
                    }),
                );
                if decision == RetryDecision::Exhausted {
                    tracing::error!(target = "media", "camera/microphone unavailable; session idle");
                }
                self.banner = self.retry.banner().map(str::to_owned);
                self.publish();
            }
        }
    }

    async fn begin_session(&mut self, local: LocalMedia) {
        let (peer_tx, peer_rx) = mpsc::unbounded_channel();
        let transport = match self.peers.create(&local, peer_tx).await {
            Ok(transport) => transport,
            Err(err) => {
                tracing::warn!(target = "webrtc", error = %err, "peer session setup failed");
                self.banner = Some(PEER_SETUP_TEXT.to_string());
                self.publish();
                return;
            }
        };
        self.peer = Some(PeerSession::new(
            transport,
            local,
            self.ctx.config.pending_candidate_cap,
        ));
        self.peer_events = Some(peer_rx);

        match SignalingChannel::open(
            self.ctx.dialer.as_ref(),
            &self.ctx.config,
            &self.ctx.descriptor,
            ChannelKind::Video,
        ) {
            Ok((channel, events)) => {
                self.channel = Some(channel);
                self.link_events = Some(events);
            }
            Err(err) => {
                tracing::warn!(target = "signaling", error = %err, "could not open signaling channel");
                self.banner = Some(TRANSPORT_ERROR_TEXT.to_string());
            }
        }
        self.publish();
    }

    async fn on_link_event(&mut self, event: LinkEvent) {
        match event {
            LinkEvent::Opened => {
                tracing::info!(target = "signaling", "connected to matching service");
                if self.banner.as_deref() == Some(TRANSPORT_ERROR_TEXT) {
                    self.banner = None;
                    self.publish();
                }
            }
            LinkEvent::Frame(raw) => match message::classify(ChannelKind::Video, &raw) {
                Ok(message) => self.on_message(message).await,
                Err(err) => {
                    tracing::warn!(target = "signaling", error = %err, len = raw.len(), "dropping signaling frame");
                }
            },
            LinkEvent::Error(reason) => {
                tracing::warn!(target = "signaling", %reason, "signaling transport error");
                self.banner = Some(TRANSPORT_ERROR_TEXT.to_string());
                self.publish();
            }
            LinkEvent::Closed => {
                self.link_events = None;
                // Our own teardown detaches the events first, so a channel
                // still held here was closed by the server.
                if let Some(channel) = self.channel.take() {
                    tracing::warn!(target = "signaling", "signaling channel closed by the server");
                    drop(channel);
                    self.banner = Some(TRANSPORT_ERROR_TEXT.to_string());
                } else {
                    tracing::debug!(target = "signaling", "signaling channel closed");
                }
                self.publish();
            }
        }
    }

    async fn on_message(&mut self, message: SignalingMessage) {
        tracing::debug!(target = "signaling", kind = message.name(), "signaling message");
        match message {
            SignalingMessage::Matched { initiator } => {
                if self.machine.apply(MatchEvent::Matched) != Transition::Connected {
                    return;
                }
                tracing::info!(target = "session", initiator, "matched with a partner");
                self.status = CONNECTED_TEXT.to_string();
                self.publish();
                if initiator {
                    let delay = self.ctx.config.initiator_delay;
                    self.offer_timer =
                        Some(self.schedule(delay, Internal::OfferDue { cycle: self.cycle }));
                }
            }
            SignalingMessage::Offer { sdp } => self.on_offer(sdp).await,
            SignalingMessage::Answer { sdp } => {
                let result = match self.peer.as_mut() {
                    Some(peer) => peer.accept_answer(sdp).await,
                    None => Err(NegotiationError::NoSession),
                };
                if let Err(err) = result {
                    tracing::warn!(target = "webrtc", error = %err, "failed to apply answer");
                }
            }
            SignalingMessage::Candidate { candidate } => {
                let result = match self.peer.as_mut() {
                    Some(peer) => peer.add_remote_candidate(candidate).await,
                    None => Err(NegotiationError::NoSession),
                };
                match result {
                    Ok(CandidateOutcome::Queued) => {
                        tracing::debug!(target = "webrtc", "remote candidate queued until remote description");
                    }
                    Ok(CandidateOutcome::Applied) => {}
                    Err(err) => {
                        tracing::warn!(target = "webrtc", error = %err, "failed to add remote candidate");
                    }
                }
            }
            SignalingMessage::PartnerDisconnected => {
                self.on_partner_left(MatchEvent::PartnerDisconnected).await
            }
            SignalingMessage::PartnerSkipped => {
                self.on_partner_left(MatchEvent::PartnerSkipped).await
            }
            SignalingMessage::SystemText { .. } | SignalingMessage::ChatText { .. } => {
                tracing::debug!(target = "signaling", "ignoring text frame on video channel");
            }
        }
    }

    async fn on_offer(&mut self, sdp: String) {
        let result = match self.peer.as_mut() {
            Some(peer) => peer.accept_offer(sdp).await,
            None => Err(NegotiationError::NoSession),
        };
        match result {
            Ok(answer) => self.send(SignalingMessage::Answer { sdp: answer.sdp }),
            Err(err) => {
                tracing::warn!(target = "webrtc", error = %err, "failed to answer offer");
            }
        }
    }

    async fn send_offer(&mut self) {
        let result = match self.peer.as_mut() {
            Some(peer) => peer.create_offer().await,
            None => Err(NegotiationError::NoSession),
        };
        match result {
            Ok(offer) => {
                tracing::debug!(target = "webrtc", "sending offer as initiator");
                self.send(SignalingMessage::Offer { sdp: offer.sdp });
            }
            Err(err) => {
                tracing::warn!(target = "webrtc", error = %err, "failed to create offer");
            }
        }
    }

    fn send(&self, message: SignalingMessage) {
        let Some(channel) = &self.channel else {
            tracing::debug!(target = "signaling", kind = message.name(), "no signaling channel; frame dropped");
            return;
        };
        match channel.send(&message) {
            Ok(()) | Err(SignalingError::NotOpen) => {}
            Err(err) => {
                tracing::warn!(target = "signaling", kind = message.name(), error = %err, "failed to send frame");
            }
        }
    }

    fn on_peer_event(&mut self, event: PeerEvent) {
        match event {
            PeerEvent::LocalCandidate(candidate) => {
                self.send(SignalingMessage::Candidate { candidate });
            }
            PeerEvent::RemoteTrack(track) => {
                let attached = self
                    .peer
                    .as_mut()
                    .is_some_and(|peer| peer.attach_remote(track));
                if attached {
                    self.publish();
                }
            }
            PeerEvent::StateChanged(state) => {
                tracing::debug!(target = "webrtc", ?state, "peer connection state changed");
            }
        }
    }

    async fn on_partner_left(&mut self, event: MatchEvent) {
        let Transition::PartnerLeft(exit) = self.machine.apply(event) else {
            return;
        };
        tracing::info!(target = "session", ?exit, "partner left; searching again");
        self.teardown().await;
        self.status = exit.status_text().to_string();
        self.publish();
        self.schedule_reopen();
    }

    async fn skip(&mut self) {
        if self.machine.apply(MatchEvent::LocalSkip) != Transition::Reset {
            return;
        }
        tracing::info!(target = "session", "skipping partner");
        self.teardown().await;
        self.status = self.ctx.searching_text();
        self.banner = None;
        self.publish();
        self.schedule_reopen();
    }

    async fn stop(&mut self, reason: &'static str) {
        self.machine.apply(MatchEvent::LocalStop);
        self.teardown().await;
        self.status = STOPPED_TEXT.to_string();
        self.publish();
        tracing::info!(target = "session", reason, "video session finished");
    }

    fn schedule_reopen(&mut self) {
        let delay = self.ctx.config.reopen_delay;
        self.reopen_timer = Some(self.schedule(delay, Internal::Reopen { cycle: self.cycle }));
    }

    /// Release everything the current cycle holds. Anything still in flight for
    /// it is discarded when it arrives.
    async fn teardown(&mut self) {
        self.cycle += 1;
        self.offer_timer = None;
        self.reopen_timer = None;
        self.retry.cancel();
        if let Some(acquisition) = self.acquisition.take() {
            acquisition.abort();
        }
        self.peer_events = None;
        if let Some(mut peer) = self.peer.take() {
            peer.close().await;
        }
        self.link_events = None;
        if let Some(channel) = self.channel.take() {
            channel.close();
        }
    }
}
