use std::io::{self, Write};
use std::sync::Arc;

use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::debug;

use crate::config::ClientConfig;
use crate::media::SyntheticMediaDevices;
use crate::session::countries::{self, COUNTRIES};
use crate::session::{
    ChatView, PartnerCode, Sender, SessionContext, SessionDescriptor, TextChat, VideoChat,
    VideoView,
};
use crate::telemetry::logging;
use crate::terminal::cli::{Cli, Command, SessionArgs};
use crate::terminal::error::CliError;
use crate::transport::webrtc::{IceConfig, MediaKind, RtcPeerFactory};

pub async fn run(cli: Cli) -> Result<(), CliError> {
    let log_config = cli.logging.to_config();
    logging::init(&log_config).map_err(|err| CliError::Logging(err.to_string()))?;
    debug!(log_level = ?log_config.level, log_file = ?log_config.file, "logging configured");

    let mut config = ClientConfig::from_env()?;
    if let Some(host) = cli.host {
        config.host = host;
    }
    if let Some(insecure) = cli.insecure {
        config.secure = !insecure;
    }

    match cli.command {
        Command::Chat(args) => run_chat(config, &args).await,
        Command::Video(args) => run_video(config, &args).await,
        Command::Countries => {
            let mut out = io::stdout().lock();
            for (code, name) in COUNTRIES {
                let flag = countries::flag(code).unwrap_or_default();
                writeln!(out, "{code}  {flag} {name}")?;
            }
            writeln!(out, "globe  {}", PartnerCode::Diaspora.label())?;
            writeln!(out, "random  {}", PartnerCode::Random.label())?;
            Ok(())
        }
    }
}

fn descriptor(args: &SessionArgs) -> Result<SessionDescriptor, CliError> {
    let partner: PartnerCode = args.partner.parse()?;
    Ok(SessionDescriptor::new(
        args.own.as_deref(),
        partner,
        args.client_id.clone(),
    )?)
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Input {
    Skip,
    Stop,
    Text(String),
}

fn parse_input(line: &str) -> Input {
    match line.trim() {
        "/skip" | "/next" => Input::Skip,
        "/stop" | "/quit" => Input::Stop,
        _ => Input::Text(line.to_string()),
    }
}

async fn run_chat(config: ClientConfig, args: &SessionArgs) -> Result<(), CliError> {
    let ctx = SessionContext::live(config, descriptor(args)?)?;
    let mut handle = TextChat::start(ctx);
    let mut view = handle.view();
    let mut printer = ChatPrinter::default();
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let mut stdin_open = true;

    printer.render(&view.borrow_and_update(), &mut io::stdout().lock())?;
    loop {
        tokio::select! {
            line = lines.next_line(), if stdin_open => match line? {
                Some(line) => match parse_input(&line) {
                    Input::Skip => handle.skip(),
                    Input::Stop => handle.stop(),
                    Input::Text(text) => handle.send(text),
                },
                None => {
                    stdin_open = false;
                    handle.stop();
                }
            },
            changed = view.changed() => {
                if changed.is_err() {
                    break;
                }
                let snapshot = view.borrow_and_update().clone();
                printer.render(&snapshot, &mut io::stdout().lock())?;
                if snapshot.stopped {
                    break;
                }
            }
        }
    }
    handle.wait().await;
    Ok(())
}

async fn run_video(config: ClientConfig, args: &SessionArgs) -> Result<(), CliError> {
    let peers = Arc::new(RtcPeerFactory::new(IceConfig::from_client_config(&config)));
    let ctx = SessionContext::live(config, descriptor(args)?)?;
    let mut handle = VideoChat::start(ctx, Arc::new(SyntheticMediaDevices::new()), peers);
    let mut view = handle.view();
    let mut printer = VideoPrinter::default();
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let mut stdin_open = true;

    printer.render(&view.borrow_and_update(), &mut io::stdout().lock())?;
    loop {
        tokio::select! {
            line = lines.next_line(), if stdin_open => match line? {
                Some(line) => match parse_input(&line) {
                    Input::Skip => handle.skip(),
                    Input::Stop => handle.stop(),
                    Input::Text(_) => println!("(commands: /skip, /stop)"),
                },
                None => {
                    stdin_open = false;
                    handle.stop();
                }
            },
            changed = view.changed() => {
                if changed.is_err() {
                    break;
                }
                let snapshot = view.borrow_and_update().clone();
                printer.render(&snapshot, &mut io::stdout().lock())?;
                if snapshot.stopped {
                    break;
                }
            }
        }
    }
    handle.wait().await;
    Ok(())
}

/// Prints only what changed since the previous snapshot.
#[derive(Debug, Default)]
struct ChatPrinter {
    status: String,
    banner: Option<String>,
    resets: u64,
    printed: usize,
}

impl ChatPrinter {
    fn render(&mut self, view: &ChatView, out: &mut impl Write) -> io::Result<()> {
        if view.status != self.status {
            writeln!(out, "-- {}", view.status)?;
            self.status = view.status.clone();
        }
        if view.banner != self.banner {
            if let Some(banner) = &view.banner {
                writeln!(out, "!! {banner}")?;
            }
            self.banner = view.banner.clone();
        }
        if view.resets != self.resets || view.transcript.len() < self.printed {
            self.resets = view.resets;
            self.printed = 0;
        }
        for entry in &view.transcript[self.printed..] {
            match entry.sender {
                Sender::User => writeln!(out, "you: {}", entry.text)?,
                Sender::Partner => writeln!(out, "stranger: {}", entry.text)?,
                Sender::System => writeln!(out, "* {}", entry.text)?,
            }
        }
        self.printed = view.transcript.len();
        out.flush()
    }
}

#[derive(Debug, Default)]
struct VideoPrinter {
    status: String,
    banner: Option<String>,
    remote: Option<(String, usize)>,
}

impl VideoPrinter {
    fn render(&mut self, view: &VideoView, out: &mut impl Write) -> io::Result<()> {
        if view.status != self.status {
            writeln!(out, "-- {}", view.status)?;
            self.status = view.status.clone();
        }
        if view.banner != self.banner {
            if let Some(banner) = &view.banner {
                writeln!(out, "!! {banner}")?;
            }
            self.banner = view.banner.clone();
        }
        let remote = view
            .remote
            .as_ref()
            .map(|stream| (stream.stream_id.clone(), stream.tracks.len()));
        if remote != self.remote {
            if let Some(stream) = &view.remote {
                let audio = if stream.has(MediaKind::Audio) { "audio" } else { "-" };
                let video = if stream.has(MediaKind::Video) { "video" } else { "-" };
                writeln!(out, "** partner stream {} [{audio} {video}]", stream.stream_id)?;
            }
            self.remote = remote;
        }
        out.flush()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::session::{MatchState, TranscriptEntry};

    fn chat_view(resets: u64, transcript: &[(Sender, &str)]) -> ChatView {
        ChatView {
            state: MatchState::Matched,
            status: "Connected to a stranger.".into(),
            banner: None,
            connected: true,
            transcript: transcript
                .iter()
                .map(|(sender, text)| TranscriptEntry {
                    sender: *sender,
                    text: text.to_string(),
                })
                .collect(),
            resets,
            stopped: false,
        }
    }

    #[test]
    fn input_commands() {
        assert_eq!(parse_input(" /skip "), Input::Skip);
        assert_eq!(parse_input("/quit"), Input::Stop);
        assert_eq!(parse_input(" hi "), Input::Text(" hi ".into()));
    }

    #[test]
    fn chat_printer_prints_new_lines_only() {
        let mut printer = ChatPrinter::default();
        let mut out = Vec::new();
        printer
            .render(&chat_view(1, &[(Sender::System, "Matched with a stranger!")]), &mut out)
            .unwrap();
        printer
            .render(
                &chat_view(
                    1,
                    &[
                        (Sender::System, "Matched with a stranger!"),
                        (Sender::Partner, "hello"),
                        (Sender::User, "hey"),
                    ],
                ),
                &mut out,
            )
            .unwrap();
        printer
            .render(&chat_view(2, &[(Sender::System, "Your partner disconnected")]), &mut out)
            .unwrap();
        assert_eq!(
            String::from_utf8(out).unwrap(),
            "-- Connected to a stranger.\n\
             * Matched with a stranger!\n\
             stranger: hello\n\
             you: hey\n\
             * Your partner disconnected\n"
        );
    }
}
