use std::time::Duration;

use roomchat_core::CoreError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ClientError {
    #[error("{0}")]
    InvalidConfig(String),
    #[error("connect failed: {0}")]
    Connect(#[source] Box<tokio_tungstenite::tungstenite::Error>),
    #[error("connect timed out after {0:?}")]
    ConnectTimeout(Duration),
    #[error("no acknowledgment within {0:?}")]
    AckTimeout(Duration),
    #[error("connection to server closed")]
    ChannelClosed,
    #[error("server rejected {event}: {message}")]
    Server {
        event: &'static str,
        message: String,
    },
    #[error("unexpected acknowledgment for {0}")]
    UnexpectedAck(&'static str),
    #[error(transparent)]
    Core(#[from] CoreError),
    #[error("terminal I/O failed: {0}")]
    Terminal(#[from] std::io::Error),
    #[error("clipboard unavailable: {0}")]
    Clipboard(#[from] arboard::Error),
}
