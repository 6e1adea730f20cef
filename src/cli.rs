//! Command-line interface (clap v4)

use clap::{Args, Parser, Subcommand};

/// realtime-link - resilient realtime messaging client
///
/// Keeps one WebSocket session to a realtime endpoint alive across network
/// failures, replays channel subscriptions after every reconnect, and
/// buffers outgoing messages while offline.
#[derive(Parser, Debug)]
#[command(name = "realtime-link")]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
pub struct Cli {
    /// Increase logging verbosity (-v for debug, -vv for trace)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    /// Suppress all output except errors
    #[arg(short, long, global = true)]
    pub quiet: bool,

    #[command(subcommand)]
    pub command: Commands,
}

/// Connection options shared by the commands that open a session
#[derive(Args, Debug, Clone, Default)]
pub struct ConnectArgs {
    /// Path to configuration file
    #[arg(short, long, env = "REALTIME_LINK_CONFIG")]
    pub config: Option<String>,

    /// Endpoint URL, overriding the configuration
    #[arg(long)]
    pub url: Option<String>,

    /// Session token, overriding the configuration
    #[arg(long)]
    pub token: Option<String>,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Subscribe to channels and print every message as a JSON line
    Watch {
        #[command(flatten)]
        connect: ConnectArgs,

        /// Channel to subscribe to (repeatable)
        #[arg(long = "channel", value_name = "NAME", required = true)]
        channels: Vec<String>,

        /// Also print connection state changes
        #[arg(long)]
        status: bool,
    },

    /// Send one message and exit once it has been written
    Send {
        #[command(flatten)]
        connect: ConnectArgs,

        /// Message kind (channel name)
        #[arg(short, long)]
        kind: String,

        /// JSON payload
        #[arg(short, long)]
        data: Option<String>,

        /// Give up if the connection is not open within this many seconds
        #[arg(long, default_value = "10")]
        timeout: u64,
    },

    /// Display version and build information
    Version,

    /// Configuration management
    Config {
        #[command(subcommand)]
        subcommand: ConfigSubcommand,
    },
}

#[derive(Subcommand, Debug, Clone)]
pub enum ConfigSubcommand {
    /// Display the effective configuration
    Show {
        /// Path to configuration file
        #[arg(short, long)]
        config: Option<String>,
    },

    /// Write a commented default configuration file
    Init {
        /// Where to create the file
        #[arg(short, long)]
        path: Option<String>,

        /// Overwrite an existing file
        #[arg(short, long)]
        force: bool,
    },

    /// Check a configuration file
    Validate {
        /// Path to configuration file to validate
        #[arg(short, long)]
        config: Option<String>,
    },

    /// List the locations searched for a configuration file
    Path,
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn verify_cli() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_watch_channels() {
        let cli = Cli::parse_from([
            "realtime-link",
            "watch",
            "--channel",
            "alerts",
            "--channel",
            "workflow:42",
            "--url",
            "ws://localhost:4000/realtime",
        ]);
        match cli.command {
            Commands::Watch {
                connect,
                channels,
                status,
            } => {
                assert_eq!(channels, vec!["alerts", "workflow:42"]);
                assert_eq!(connect.url.as_deref(), Some("ws://localhost:4000/realtime"));
                assert!(!status);
            }
            _ => panic!("Expected Watch command"),
        }
    }

    #[test]
    fn test_watch_requires_channel() {
        assert!(Cli::try_parse_from(["realtime-link", "watch"]).is_err());
    }

    #[test]
    fn test_send_defaults() {
        let cli = Cli::parse_from(["realtime-link", "send", "--kind", "orders"]);
        match cli.command {
            Commands::Send {
                kind, data, timeout, ..
            } => {
                assert_eq!(kind, "orders");
                assert!(data.is_none());
                assert_eq!(timeout, 10);
            }
            _ => panic!("Expected Send command"),
        }
    }

    #[test]
    fn test_verbose_flags() {
        let cli = Cli::parse_from(["realtime-link", "-vv", "version"]);
        assert_eq!(cli.verbose, 2);
        assert!(!cli.quiet);
    }

    #[test]
    fn test_config_init() {
        let cli = Cli::parse_from(["realtime-link", "config", "init", "--force"]);
        match cli.command {
            Commands::Config {
                subcommand: ConfigSubcommand::Init { path, force },
            } => {
                assert!(path.is_none());
                assert!(force);
            }
            _ => panic!("Expected Config Init command"),
        }
    }
}
