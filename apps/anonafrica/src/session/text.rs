//! Text matchmaking session: the video session without a peer transport.

use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;

use super::state::{
    CONNECTED_TEXT, MatchEvent, MatchState, MatchStateMachine, PartnerExit, TRANSPORT_ERROR_TEXT,
    Transition,
};
use super::{SessionContext, next_event};
use crate::scheduler::TimerHandle;
use crate::transport::signaling::message;
use crate::transport::signaling::{ChannelKind, LinkEvent, SignalingChannel, SignalingMessage};

pub const WAITING_TEXT: &str = "Waiting to be matched...";
pub const MATCHED_NOTICE: &str = "Matched with a stranger!";
pub const DISCONNECTED_NOTICE: &str = "Your partner disconnected.";
pub const SKIPPED_NOTICE: &str = "Your partner skipped.";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Sender {
    User,
    Partner,
    System,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TranscriptEntry {
    pub sender: Sender,
    pub text: String,
}

impl TranscriptEntry {
    fn new(sender: Sender, text: impl Into<String>) -> Self {
        Self {
            sender,
            text: text.into(),
        }
    }
}

/// Snapshot handed to the rendering layer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChatView {
    pub state: MatchState,
    pub status: String,
    pub banner: Option<String>,
    pub connected: bool,
    pub transcript: Vec<TranscriptEntry>,
    /// How many times the transcript has been cleared.
    pub resets: u64,
    pub stopped: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum ChatCommand {
    Send(String),
    Skip,
    Stop,
}

/// Control surface of a running text session. Dropping it unmounts the session.
pub struct TextChatHandle {
    commands: mpsc::UnboundedSender<ChatCommand>,
    view: watch::Receiver<ChatView>,
    task: JoinHandle<()>,
}

impl TextChatHandle {
    pub fn send(&self, text: impl Into<String>) {
        self.command(ChatCommand::Send(text.into()));
    }

    pub fn skip(&self) {
        self.command(ChatCommand::Skip);
    }

    pub fn stop(&self) {
        self.command(ChatCommand::Stop);
    }

    fn command(&self, command: ChatCommand) {
        if self.commands.send(command).is_err() {
            tracing::debug!(target = "session", "text session already finished");
        }
    }

    pub fn view(&self) -> watch::Receiver<ChatView> {
        self.view.clone()
    }

    pub fn snapshot(&self) -> ChatView {
        self.view.borrow().clone()
    }

    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }

    pub async fn wait(&mut self) {
        if let Err(err) = (&mut self.task).await {
            tracing::warn!(target = "session", "text session task failed: {err}");
        }
    }

    pub async fn unmount(self) {
        let Self { commands, task, .. } = self;
        drop(commands);
        if let Err(err) = task.await {
            tracing::warn!(target = "session", "text session task failed: {err}");
        }
    }
}

pub struct TextChat;

impl TextChat {
    /// Mount a text session. Must be called within a tokio runtime.
    pub fn start(ctx: SessionContext) -> TextChatHandle {
        let (commands_tx, commands_rx) = mpsc::unbounded_channel();
        let (reopen_tx, reopen_rx) = mpsc::unbounded_channel();
        let (view_tx, view_rx) = watch::channel(ChatView {
            state: MatchState::Searching,
            status: WAITING_TEXT.to_string(),
            banner: None,
            connected: false,
            transcript: Vec::new(),
            resets: 0,
            stopped: false,
        });
        let actor = TextActor {
            ctx,
            reopen: reopen_tx,
            view: view_tx,
            machine: MatchStateMachine::new(),
            cycle: 0,
            status: WAITING_TEXT.to_string(),
            banner: None,
            transcript: Vec::new(),
            resets: 0,
            reopen_timer: None,
            channel: None,
            link_events: None,
        };
        let task = tokio::spawn(actor.run(commands_rx, reopen_rx));
        TextChatHandle {
            commands: commands_tx,
            view: view_rx,
            task,
        }
    }
}

enum Input {
    Command(Option<ChatCommand>),
    Reopen(u64),
    Link(LinkEvent),
}

struct TextActor {
    ctx: SessionContext,
    reopen: mpsc::UnboundedSender<u64>,
    view: watch::Sender<ChatView>,
    machine: MatchStateMachine,
    cycle: u64,
    status: String,
    banner: Option<String>,
    transcript: Vec<TranscriptEntry>,
    resets: u64,
    reopen_timer: Option<TimerHandle>,
    channel: Option<SignalingChannel>,
    link_events: Option<mpsc::UnboundedReceiver<LinkEvent>>,
}

impl TextActor {
    async fn run(
        mut self,
        mut commands: mpsc::UnboundedReceiver<ChatCommand>,
        mut reopen: mpsc::UnboundedReceiver<u64>,
    ) {
        tracing::info!(
            target = "session",
            partner = %self.ctx.descriptor.partner_code(),
            client_id = %self.ctx.descriptor.client_id(),
            "text session mounted"
        );
        self.open_channel();
        loop {
            let input = tokio::select! {
                biased;
                command = commands.recv() => Input::Command(command),
                Some(cycle) = reopen.recv() => Input::Reopen(cycle),
                event = next_event(&mut self.link_events) => Input::Link(event),
            };
            match input {
                Input::Command(Some(ChatCommand::Send(text))) => self.send_chat(text),
                Input::Command(Some(ChatCommand::Skip)) => self.skip(),
                Input::Command(Some(ChatCommand::Stop)) => {
                    self.stop("stopped");
                    break;
                }
                Input::Command(None) => {
                    self.stop("unmounted");
                    break;
                }
                Input::Reopen(cycle) if cycle == self.cycle => {
                    self.reopen_timer = None;
                    self.open_channel();
                }
                Input::Reopen(cycle) => {
                    tracing::debug!(target = "session", cycle, current = self.cycle, "dropping stale reopen");
                }
                Input::Link(event) => self.on_link_event(event),
            }
        }
    }

    fn publish(&self) {
        let next = ChatView {
            state: self.machine.state(),
            status: self.status.clone(),
            banner: self.banner.clone(),
            connected: self.channel.as_ref().is_some_and(SignalingChannel::is_open),
            transcript: self.transcript.clone(),
            resets: self.resets,
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

    fn open_channel(&mut self) {
        self.cycle += 1;
        self.banner = None;
        self.status = WAITING_TEXT.to_string();
        match SignalingChannel::open(
            self.ctx.dialer.as_ref(),
            &self.ctx.config,
            &self.ctx.descriptor,
            ChannelKind::Chat,
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

    fn close_channel(&mut self) {
        self.cycle += 1;
        self.reopen_timer = None;
        self.link_events = None;
        if let Some(channel) = self.channel.take() {
            channel.close();
        }
    }

    /// Fresh conversation: drop everything and show `notice` as the only line.
    fn reset_transcript(&mut self, notice: Option<String>) {
        self.transcript.clear();
        self.resets += 1;
        if let Some(notice) = notice {
            self.transcript
                .push(TranscriptEntry::new(Sender::System, notice));
        }
    }

    fn on_link_event(&mut self, event: LinkEvent) {
        match event {
            LinkEvent::Opened => {
                tracing::info!(target = "signaling", "connected to matching service");
                self.publish();
            }
            LinkEvent::Frame(raw) => match message::classify(ChannelKind::Chat, &raw) {
                Ok(message) => self.on_message(message, &raw),
                Err(err) => {
                    tracing::warn!(target = "signaling", error = %err, "dropping chat frame");
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

    fn on_message(&mut self, message: SignalingMessage, raw: &str) {
        // Legacy markers show the server's own wording.
        let notice = |fallback: &str| {
            if message::is_structured(raw) {
                fallback.to_string()
            } else {
                raw.trim().to_string()
            }
        };
        match message {
            SignalingMessage::Matched { .. } => {
                let text = notice(MATCHED_NOTICE);
                if self.machine.apply(MatchEvent::Matched) == Transition::Connected {
                    tracing::info!(target = "session", "matched with a partner");
                    self.status = CONNECTED_TEXT.to_string();
                }
                self.reset_transcript(Some(text));
            }
            SignalingMessage::PartnerDisconnected => {
                let text = notice(DISCONNECTED_NOTICE);
                self.on_partner_left(MatchEvent::PartnerDisconnected, text);
            }
            SignalingMessage::PartnerSkipped => {
                let text = notice(SKIPPED_NOTICE);
                self.on_partner_left(MatchEvent::PartnerSkipped, text);
            }
            SignalingMessage::SystemText { text } => {
                self.transcript
                    .push(TranscriptEntry::new(Sender::System, text));
            }
            SignalingMessage::ChatText { text } => {
                self.transcript
                    .push(TranscriptEntry::new(Sender::Partner, text));
            }
            SignalingMessage::Offer { .. }
            | SignalingMessage::Answer { .. }
            | SignalingMessage::Candidate { .. } => {
                tracing::debug!(target = "signaling", kind = message.name(), "ignoring negotiation frame on chat channel");
                return;
            }
        }
        self.publish();
    }

    fn on_partner_left(&mut self, event: MatchEvent, notice: String) {
        let exit = match self.machine.apply(event) {
            Transition::PartnerLeft(exit) => exit,
            _ if event == MatchEvent::PartnerSkipped => PartnerExit::Skipped,
            _ => PartnerExit::Disconnected,
        };
        tracing::info!(target = "session", ?exit, "partner left; waiting for a new match");
        // The server keeps us queued; new frames simply start the next match.
        self.machine.resume_search();
        self.status = exit.status_text().to_string();
        self.reset_transcript(Some(notice));
    }

    fn send_chat(&mut self, text: String) {
        if text.trim().is_empty() {
            return;
        }
        let Some(channel) = self.channel.as_ref().filter(|channel| channel.is_open()) else {
            tracing::error!(target = "signaling", "signaling connection is not open; message not sent");
            return;
        };
        let outcome = channel.send(&SignalingMessage::ChatText { text: text.clone() });
        if let Err(err) = outcome {
            tracing::warn!(target = "signaling", error = %err, "failed to send chat message");
        }
        self.transcript
            .push(TranscriptEntry::new(Sender::User, text));
        self.publish();
    }

    fn skip(&mut self) {
        if self.machine.apply(MatchEvent::LocalSkip) != Transition::Reset {
            return;
        }
        tracing::info!(target = "session", "skipping partner");
        self.close_channel();
        self.reset_transcript(None);
        self.status = WAITING_TEXT.to_string();
        self.banner = None;
        self.publish();
        let internal = self.reopen.clone();
        let cycle = self.cycle;
        self.reopen_timer = Some(self.ctx.scheduler.schedule(
            self.ctx.config.reopen_delay,
            Box::new(move || {
                let _ = internal.send(cycle);
            }),
        ));
    }

    fn stop(&mut self, reason: &'static str) {
        self.machine.apply(MatchEvent::LocalStop);
        self.close_channel();
        self.status = super::video::STOPPED_TEXT.to_string();
        self.publish();
        tracing::info!(target = "session", reason, "text session finished");
    }
}
