use clap::Parser;
use roomchat_client::{ClientArgs, ClientConfig, app, logging};
use tracing::{error, info};

#[tokio::main]
async fn main() {
    let args = ClientArgs::parse();
    let config = match ClientConfig::from_args(args) {
        Ok(config) => config,
        Err(err) => {
            eprintln!("{err}");
            std::process::exit(2);
        }
    };

    logging::init_logging();
    info!(server_url = %config.channel.server_url, "roomchat starting");

    if let Err(err) = app::run(config).await {
        error!("roomchat exited with error: {}", err);
        eprintln!("roomchat: {err}");
        std::process::exit(1);
    }
}
