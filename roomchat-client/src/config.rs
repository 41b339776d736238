use std::time::Duration;

use clap::Parser;
use url::Url;

use crate::error::ClientError;

pub const DEFAULT_SERVER_URL: &str = "ws://127.0.0.1:8080/ws";
const MAX_SERVER_URL_LEN: usize = 2048;

#[derive(Parser, Debug, Clone)]
#[command(name = "roomchat", about = "Terminal client for RoomChat rooms")]
pub struct ClientArgs {
    #[arg(long, default_value = DEFAULT_SERVER_URL)]
    pub server_url: String,

    /// Prefills the display name field.
    #[arg(long)]
    pub name: Option<String>,

    /// Prefills the room ID field.
    #[arg(long)]
    pub room: Option<String>,

    #[arg(long, default_value_t = 12)]
    pub connect_timeout_secs: u64,

    /// How long to wait for the server to acknowledge a room command. `0` waits forever.
    #[arg(long, default_value_t = 15)]
    pub ack_timeout_secs: u64,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChannelConfig {
    pub server_url: String,
    pub connect_timeout: Duration,
    pub ack_timeout: Option<Duration>,
}

impl ChannelConfig {
    pub fn new(server_url: impl Into<String>) -> Self {
        Self {
            server_url: server_url.into(),
            connect_timeout: Duration::from_secs(12),
            ack_timeout: Some(Duration::from_secs(15)),
        }
    }

    #[must_use]
    pub fn with_ack_timeout(mut self, ack_timeout: Option<Duration>) -> Self {
        self.ack_timeout = ack_timeout;
        self
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClientConfig {
    pub channel: ChannelConfig,
    pub initial_name: String,
    pub initial_room_id: String,
}

impl ClientConfig {
    pub fn from_args(args: ClientArgs) -> Result<Self, ClientError> {
        let mut errors: Vec<String> = Vec::new();

        let server_url = args.server_url.trim();
        if let Err(err) = validate_server_url(server_url) {
            errors.push(err);
        }
        if args.connect_timeout_secs == 0 {
            errors.push("Connect timeout must be at least 1 second.".to_string());
        }

        if !errors.is_empty() {
            return Err(ClientError::InvalidConfig(format!(
                "Please fix the following:\n\n- {}",
                errors.join("\n- ")
            )));
        }

        let ack_timeout =
            (args.ack_timeout_secs > 0).then(|| Duration::from_secs(args.ack_timeout_secs));

        Ok(Self {
            channel: ChannelConfig {
                server_url: server_url.to_owned(),
                connect_timeout: Duration::from_secs(args.connect_timeout_secs),
                ack_timeout,
            },
            initial_name: args.name.unwrap_or_default(),
            initial_room_id: args.room.unwrap_or_default(),
        })
    }
}

pub fn validate_server_url(server_url: &str) -> Result<(), String> {
    if server_url.is_empty() {
        return Err("Server URL is required.".to_string());
    }
    if server_url.len() > MAX_SERVER_URL_LEN {
        return Err(format!(
            "Server URL is too long ({} > {} chars).",
            server_url.len(),
            MAX_SERVER_URL_LEN
        ));
    }
    let url = Url::parse(server_url).map_err(|err| format!("Server URL is invalid: {err}"))?;
    match url.scheme() {
        "ws" | "wss" => Ok(()),
        _ => Err("Server URL must start with ws:// or wss:// (WebSocket).".to_string()),
    }
}
