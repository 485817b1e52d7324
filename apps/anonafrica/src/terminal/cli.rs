use clap::{Args, Parser, Subcommand, builder::BoolishValueParser};
use std::path::PathBuf;

use crate::telemetry::logging::{LogConfig, LogLevel};

#[derive(Parser, Debug)]
#[command(
    name = "anonafrica",
    about = "🌍 Chat anonymously with a stranger from a chosen African country",
    version
)]
pub struct Cli {
    #[arg(
        long,
        global = true,
        env = "ANONAFRICA_HOST",
        value_name = "HOST",
        help = "Matching service host (without scheme)"
    )]
    pub host: Option<String>,

    #[arg(
        long,
        global = true,
        env = "ANONAFRICA_INSECURE",
        num_args = 0..=1,
        default_missing_value = "true",
        value_parser = BoolishValueParser::new(),
        value_name = "BOOL",
        help = "Use ws:// instead of wss:// for the matching service"
    )]
    pub insecure: Option<bool>,

    #[command(flatten)]
    pub logging: LoggingArgs,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Args, Debug, Clone)]
pub struct LoggingArgs {
    #[arg(
        long = "log-level",
        value_enum,
        global = true,
        env = "ANONAFRICA_LOG_LEVEL",
        default_value_t = LogLevel::Warn,
        help = "Minimum log level (error, warn, info, debug, trace)"
    )]
    pub level: LogLevel,

    #[arg(
        long = "log-file",
        global = true,
        value_name = "PATH",
        env = "ANONAFRICA_LOG_FILE",
        help = "Write structured logs to the specified file instead of stderr"
    )]
    pub file: Option<PathBuf>,
}

impl LoggingArgs {
    pub fn to_config(&self) -> LogConfig {
        LogConfig {
            level: self.level,
            file: self.file.clone(),
        }
    }
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Text chat with a matched stranger
    Chat(SessionArgs),
    /// Audio/video chat with a matched stranger (synthetic local media)
    Video(SessionArgs),
    /// List the selectable partner countries
    Countries,
}

#[derive(Args, Debug, Clone)]
pub struct SessionArgs {
    #[arg(
        long,
        short = 'p',
        value_name = "CODE",
        help = "Partner country code, 'globe' for the diaspora or 'random'"
    )]
    pub partner: String,

    #[arg(
        long = "own",
        env = "ANONAFRICA_OWN_COUNTRY",
        value_name = "CODE",
        help = "Your own country code (required for 'globe')"
    )]
    pub own: Option<String>,

    #[arg(
        long = "client-id",
        env = "ANONAFRICA_CLIENT_ID",
        value_name = "ID",
        help = "Client identifier sent to the matching service (random by default)"
    )]
    pub client_id: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_session_commands() {
        let cli = Cli::try_parse_from([
            "anonafrica",
            "--insecure",
            "--host",
            "localhost:8080",
            "video",
            "--partner",
            "globe",
            "--own",
            "KE",
        ])
        .unwrap();
        assert_eq!(cli.host.as_deref(), Some("localhost:8080"));
        assert_eq!(cli.insecure, Some(true));
        let Command::Video(args) = cli.command else {
            panic!("expected video command");
        };
        assert_eq!(args.partner, "globe");
        assert_eq!(args.own.as_deref(), Some("KE"));
    }

    #[test]
    fn logging_flags_follow_subcommands() {
        let cli = Cli::try_parse_from(["anonafrica", "chat", "-p", "ET", "--log-level", "debug"])
            .unwrap();
        assert_eq!(cli.logging.to_config().level, LogLevel::Debug);
        assert!(Cli::try_parse_from(["anonafrica", "chat"]).is_err());
    }
}
