use bytes::{Buf, BufMut, BytesMut};
use serde::{Deserialize, Serialize};
use thiserror::Error;

pub mod session;

pub use session::{ChatMessage, JoinOutcome, JoinedRoom, PushOutcome, Session, SessionState};

pub const MAX_FRAME_BYTES: usize = 64 * 1024;
pub const MAX_CHAT_MESSAGE_BYTES: usize = 4 * 1024;
pub const MAX_NAME_CHARS: usize = 64;
pub const MAX_MEMBERS_PER_ROOM: usize = 10;

/// Sender name reserved for informational messages generated by the server.
pub const SYSTEM_SENDER: &str = "System";

pub type RoomId = String;
pub type ParticipantId = String;
pub type RequestId = u64;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct RosterEntry {
    pub id: ParticipantId,
    pub name: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct CreateRoom {
    pub name: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct JoinRoom {
    pub room_id: RoomId,
    pub name: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct LeaveRoom {
    pub room_id: RoomId,
    pub name: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct OutgoingChat {
    pub room_id: RoomId,
    pub sender: String,
    pub message: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct CreateRoomAck {
    pub room_id: RoomId,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct JoinRoomAck {
    pub success: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct LeaveRoomAck {
    pub success: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct PlayerList {
    pub room_id: RoomId,
    pub players: Vec<RosterEntry>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct ChatPush {
    pub room_id: RoomId,
    pub sender: String,
    pub message: String,
}

/// Client to server.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "event", content = "data", rename_all = "kebab-case")]
pub enum Command {
    CreateRoom(CreateRoom),
    JoinRoom(JoinRoom),
    LeaveRoom(LeaveRoom),
    ChatMessage(OutgoingChat),
}

impl Command {
    pub fn event_name(&self) -> &'static str {
        match self {
            Command::CreateRoom(_) => "create-room",
            Command::JoinRoom(_) => "join-room",
            Command::LeaveRoom(_) => "leave-room",
            Command::ChatMessage(_) => "chat-message",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct CommandEnvelope {
    /// Present when the sender expects exactly one [`AckEnvelope`] back.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub request_id: Option<RequestId>,
    pub command: Command,
}

/// One-shot reply to a single command.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "event", content = "data", rename_all = "kebab-case")]
pub enum Ack {
    CreateRoom(CreateRoomAck),
    JoinRoom(JoinRoomAck),
    LeaveRoom(LeaveRoomAck),
    Error { message: String },
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct AckEnvelope {
    pub request_id: RequestId,
    pub ack: Ack,
}

/// Server to client, independent of any request.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "event", content = "data", rename_all = "kebab-case")]
pub enum Push {
    PlayerList(PlayerList),
    ChatMessage(ChatPush),
}

impl Push {
    pub fn room_id(&self) -> &str {
        match self {
            Push::PlayerList(list) => &list.room_id,
            Push::ChatMessage(chat) => &chat.room_id,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WireMessage {
    Command(CommandEnvelope),
    Ack(AckEnvelope),
    Push(Push),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MessageType {
    Command = 0,
    Ack = 1,
    Push = 2,
}

#[derive(Debug, Error)]
pub enum CoreError {
    #[error("Enter your name")]
    MissingUsername,
    #[error("Enter name & room ID")]
    MissingUsernameOrRoomId,
    #[error("invalid frame length")]
    InvalidFrameLength,
    #[error("frame exceeds 64 KiB")]
    FrameTooLarge,
    #[error("unsupported message type {0}")]
    UnsupportedMessageType(u8),
    #[error("serialization error: {0}")]
    Serialization(String),
}

pub fn is_blank(value: &str) -> bool {
    value.trim().is_empty()
}

pub fn encode_frame(message: &WireMessage) -> Result<Vec<u8>, CoreError> {
    let (message_type, payload) = match message {
        WireMessage::Command(envelope) => (MessageType::Command as u8, to_json(envelope)?),
        WireMessage::Ack(envelope) => (MessageType::Ack as u8, to_json(envelope)?),
        WireMessage::Push(push) => (MessageType::Push as u8, to_json(push)?),
    };

    let frame_len = 1usize
        .checked_add(payload.len())
        .ok_or(CoreError::InvalidFrameLength)?;
    if frame_len + 4 > MAX_FRAME_BYTES {
        return Err(CoreError::FrameTooLarge);
    }
    let frame_len_u32 = u32::try_from(frame_len).map_err(|_| CoreError::InvalidFrameLength)?;

    let mut out = BytesMut::with_capacity(4 + frame_len);
    out.put_u32_le(frame_len_u32);
    out.put_u8(message_type);
    out.extend_from_slice(&payload);
    Ok(out.to_vec())
}

pub fn decode_frame(frame: &[u8]) -> Result<WireMessage, CoreError> {
    if frame.len() > MAX_FRAME_BYTES {
        return Err(CoreError::FrameTooLarge);
    }
    if frame.len() < 5 {
        return Err(CoreError::InvalidFrameLength);
    }

    let mut cursor = frame;
    let expected_len = cursor.get_u32_le() as usize;
    if expected_len + 4 != frame.len() {
        return Err(CoreError::InvalidFrameLength);
    }

    let message_type = cursor.get_u8();
    let payload = cursor;

    match message_type {
        x if x == MessageType::Command as u8 => Ok(WireMessage::Command(from_json(payload)?)),
        x if x == MessageType::Ack as u8 => Ok(WireMessage::Ack(from_json(payload)?)),
        x if x == MessageType::Push as u8 => Ok(WireMessage::Push(from_json(payload)?)),
        other => Err(CoreError::UnsupportedMessageType(other)),
    }
}

fn to_json<T: Serialize>(value: &T) -> Result<Vec<u8>, CoreError> {
    serde_json::to_vec(value).map_err(|err| CoreError::Serialization(err.to_string()))
}

fn from_json<'a, T: Deserialize<'a>>(payload: &'a [u8]) -> Result<T, CoreError> {
    serde_json::from_slice(payload).map_err(|err| CoreError::Serialization(err.to_string()))
}
