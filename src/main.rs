//! realtime-link command-line client
//!
//! `watch` streams channel messages to stdout, `send` publishes a single
//! message, `config` manages the configuration file.

mod cli;

use std::io::Write;
use std::time::Duration;

use clap::Parser;
use serde_json::{json, Value};
use tracing::{info, warn};

use realtime_link::client::{ConnectionState, RealtimeClient, SendOutcome};
use realtime_link::config::{self, AppConfig};
use realtime_link::error::{Error, Result};
use realtime_link::logging;
use realtime_link::protocol::Frame;
use realtime_link::version::BuildInfo;

use crate::cli::{Cli, Commands, ConfigSubcommand, ConnectArgs};

/// Time given to the socket task to write its close frame before exit
const CLOSE_GRACE: Duration = Duration::from_millis(200);

fn main() {
    let cli = Cli::parse();

    if let Err(e) = run(cli) {
        eprint!("{}", e.format_for_terminal());
        std::process::exit(e.exit_code());
    }
}

fn run(cli: Cli) -> Result<()> {
    match cli.command {
        Commands::Version => {
            print!("{}", BuildInfo::current());
            Ok(())
        }
        Commands::Config { subcommand } => {
            logging::init_simple(tracing::Level::WARN)?;
            handle_config_command(subcommand)
        }
        Commands::Watch {
            connect,
            channels,
            status,
        } => {
            let config = load_config(&connect)?;
            let _log_guards = logging::init_logging(&config.logging, cli.verbose, cli.quiet)?;
            runtime()?.block_on(watch(config, channels, status))
        }
        Commands::Send {
            connect,
            kind,
            data,
            timeout,
        } => {
            let config = load_config(&connect)?;
            let _log_guards = logging::init_logging(&config.logging, cli.verbose, cli.quiet)?;
            runtime()?.block_on(send(config, kind, data, Duration::from_secs(timeout)))
        }
    }
}

/// Configuration with command-line overrides applied
fn load_config(args: &ConnectArgs) -> Result<AppConfig> {
    let mut config = AppConfig::load(args.config.as_deref())?;
    if let Some(url) = &args.url {
        config.client.url = url.clone();
    }
    if let Some(token) = &args.token {
        config.auth.token = Some(token.clone());
    }
    config.validate()?;
    Ok(config)
}

fn runtime() -> Result<tokio::runtime::Runtime> {
    tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .thread_name("realtime-link")
        .build()
        .map_err(|e| Error::Internal(format!("Failed to create async runtime: {}", e)))
}

/// Client for a CLI command; connecting is left to the caller
fn start_client(config: &AppConfig) -> Result<RealtimeClient> {
    let mut client_config = config.client.to_client_config();
    client_config.auto_connect = false;

    let client = RealtimeClient::new(client_config)?;
    client.set_token(config.auth.token.clone());

    info!(
        client_id = %client.client_id(),
        url = %config.client.url,
        build = %BuildInfo::current().banner(),
        "Client started"
    );
    Ok(client)
}

async fn watch(config: AppConfig, channels: Vec<String>, status: bool) -> Result<()> {
    let client = start_client(&config)?;

    for channel in &channels {
        let name = channel.clone();
        client.subscribe(channel, move |data: &Value| {
            let line = json!({
                "channel": name,
                "data": data,
                "receivedAt": chrono::Utc::now().to_rfc3339(),
            });
            writeln!(std::io::stdout().lock(), "{}", line)?;
            Ok(())
        });
    }

    let mut state_rx = client.watch_state();
    client.connect();

    let shutdown = tokio::signal::ctrl_c();
    tokio::pin!(shutdown);

    let result = loop {
        tokio::select! {
            _ = &mut shutdown => {
                info!("Shutdown signal received");
                break Ok(());
            }
            changed = state_rx.changed() => {
                if changed.is_err() {
                    break Err(Error::ChannelClosed);
                }
                let snapshot = state_rx.borrow_and_update().clone();
                if status {
                    println!("{}", serde_json::to_string(&json!({ "status": snapshot.status_line(), "state": snapshot }))?);
                }
                if snapshot.state == ConnectionState::Failed {
                    let message = snapshot.error.unwrap_or_else(|| "connection failed".to_string());
                    break Err(Error::transport(message));
                }
            }
        }
    };

    client.clear_subscriptions();
    client.shutdown();
    tokio::time::sleep(CLOSE_GRACE).await;
    result
}

async fn send(config: AppConfig, kind: String, data: Option<String>, timeout: Duration) -> Result<()> {
    let data = match data {
        Some(raw) => serde_json::from_str(&raw)?,
        None => Value::Null,
    };

    let client = start_client(&config)?;
    let mut frame = Frame::new(kind.clone());
    if !data.is_null() {
        frame = frame.with_data(data);
    }
    if client.send_frame(frame)? == SendOutcome::Queued {
        info!(kind = %kind, "Message queued until the connection opens");
    }

    let mut state_rx = client.watch_state();
    client.connect();

    let flushed = tokio::time::timeout(timeout, async {
        loop {
            {
                let snapshot = state_rx.borrow_and_update();
                if snapshot.is_connected && client.queued() == 0 {
                    return Ok(());
                }
                if snapshot.state == ConnectionState::Failed {
                    let message = snapshot
                        .error
                        .clone()
                        .unwrap_or_else(|| "connection failed".to_string());
                    return Err(Error::transport(message));
                }
            }
            if state_rx.changed().await.is_err() {
                return Err(Error::ChannelClosed);
            }
        }
    })
    .await;

    let result = match flushed {
        Ok(result) => result,
        Err(_) => {
            warn!(timeout_secs = timeout.as_secs(), "Connection did not open in time");
            Err(Error::transport(format!(
                "connection not open after {}s",
                timeout.as_secs()
            )))
        }
    };

    client.shutdown();
    tokio::time::sleep(CLOSE_GRACE).await;

    result?;
    println!("Sent '{}'", kind);
    Ok(())
}

fn handle_config_command(subcommand: ConfigSubcommand) -> Result<()> {
    match subcommand {
        ConfigSubcommand::Show { config } => {
            let mut cfg = AppConfig::load(config.as_deref())?;
            if cfg.auth.token.is_some() {
                cfg.auth.token = Some("********".to_string());
            }
            println!("{}", toml::to_string_pretty(&cfg)?);
        }
        ConfigSubcommand::Init { path, force } => {
            let written = config::init_config(path.as_deref(), force)?;
            println!("Configuration file created: {}", written.display());
        }
        ConfigSubcommand::Validate { config } => {
            AppConfig::load(config.as_deref())?;
            println!("Configuration is valid.");
        }
        ConfigSubcommand::Path => {
            for path in config::search_paths() {
                let marker = if path.exists() { " (found)" } else { "" };
                println!("{}{}", path.display(), marker);
            }
        }
    }

    Ok(())
}
