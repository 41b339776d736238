pub mod app;
pub mod channel;
pub mod config;
pub mod controller;
pub mod error;
pub mod logging;
pub mod view;

pub use channel::{PushReceiver, Reply, RoomChannel, RoomCommands};
pub use config::{ChannelConfig, ClientArgs, ClientConfig};
pub use controller::{RoomClient, RoomReply};
pub use error::ClientError;
