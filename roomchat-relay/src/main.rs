use clap::Parser;
use roomchat_relay::{AppState, serve};
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

/// WebSocket relay hosting RoomChat rooms.
#[derive(Parser, Debug)]
#[command(
    name = "roomchat-relay",
    version,
    about = "Hosts RoomChat rooms: assigns room ids, tracks rosters and fans out chat"
)]
struct RelayArgs {
    #[arg(long, default_value = "0.0.0.0:8080")]
    bind_address: String,

    /// Tracing filter used when RUST_LOG is unset, e.g. `debug` or `roomchat_relay=trace`.
    #[arg(long, default_value = "info")]
    log_filter: String,
}

impl RelayArgs {
    fn env_filter(&self, rust_log: Option<&str>) -> EnvFilter {
        let directives = rust_log
            .filter(|value| !value.trim().is_empty())
            .unwrap_or(&self.log_filter);
        EnvFilter::try_new(directives).unwrap_or_else(|err| {
            eprintln!("invalid log filter {directives:?}: {err}; using info");
            EnvFilter::new("info")
        })
    }
}

#[tokio::main]
async fn main() {
    let args = RelayArgs::parse();
    let rust_log = std::env::var(EnvFilter::DEFAULT_ENV).ok();
    tracing_subscriber::fmt()
        .with_env_filter(args.env_filter(rust_log.as_deref()))
        .init();

    let listener = match tokio::net::TcpListener::bind(&args.bind_address).await {
        Ok(listener) => listener,
        Err(err) => {
            error!("failed to bind {}: {}", args.bind_address, err);
            std::process::exit(1);
        }
    };

    info!(bind_address = %args.bind_address, "roomchat relay starting");
    if let Err(err) = serve(listener, AppState::new()).await {
        warn!("relay server exited: {}", err);
    }
}
