//! Client-side session state machine.
//!
//! A [`Session`] is either unjoined or holds exactly one [`JoinedRoom`]. The
//! roster and chat log live inside the joined room, so dropping the room
//! clears all three together. Nothing here performs I/O: request builders
//! return the command payload to send, and the `apply_*` methods consume the
//! server's replies and pushes.

use crate::{
    CoreError, CreateRoom, CreateRoomAck, JoinRoom, JoinRoomAck, LeaveRoom, LeaveRoomAck,
    OutgoingChat, Push, RoomId, RosterEntry, SYSTEM_SENDER, is_blank,
};

const JOIN_REJECTED_FALLBACK: &str = "Unable to join room";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChatMessage {
    pub sender: String,
    pub message: String,
}

impl ChatMessage {
    pub fn is_system(&self) -> bool {
        self.sender == SYSTEM_SENDER
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JoinedRoom {
    pub room_id: RoomId,
    pub roster: Vec<RosterEntry>,
    pub chat: Vec<ChatMessage>,
}

impl JoinedRoom {
    fn new(room_id: RoomId) -> Self {
        Self {
            room_id,
            roster: Vec::new(),
            chat: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Unjoined,
    Joined,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum JoinOutcome {
    Joined,
    Rejected(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PushOutcome {
    Applied,
    /// No room is joined, so there is nothing to apply the push to.
    NotJoined,
    /// The push is tagged with a room other than the joined one.
    OtherRoom,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Session {
    username: String,
    room: Option<JoinedRoom>,
}

impl Session {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn username(&self) -> &str {
        &self.username
    }

    pub fn set_username(&mut self, username: impl Into<String>) {
        self.username = username.into().trim().to_owned();
    }

    pub fn state(&self) -> SessionState {
        if self.room.is_some() {
            SessionState::Joined
        } else {
            SessionState::Unjoined
        }
    }

    pub fn room(&self) -> Option<&JoinedRoom> {
        self.room.as_ref()
    }

    pub fn room_id(&self) -> Option<&str> {
        self.room.as_ref().map(|room| room.room_id.as_str())
    }

    pub fn roster(&self) -> &[RosterEntry] {
        match &self.room {
            Some(room) => &room.roster,
            None => &[],
        }
    }

    pub fn chat(&self) -> &[ChatMessage] {
        match &self.room {
            Some(room) => &room.chat,
            None => &[],
        }
    }

    pub fn create_room_request(&self) -> Result<CreateRoom, CoreError> {
        if is_blank(&self.username) {
            return Err(CoreError::MissingUsername);
        }
        Ok(CreateRoom {
            name: self.username.clone(),
        })
    }

    pub fn join_room_request(&self, room_id: &str) -> Result<JoinRoom, CoreError> {
        if is_blank(&self.username) || is_blank(room_id) {
            return Err(CoreError::MissingUsernameOrRoomId);
        }
        Ok(JoinRoom {
            room_id: room_id.trim().to_owned(),
            name: self.username.clone(),
        })
    }

    pub fn leave_room_request(&self) -> Option<LeaveRoom> {
        self.room.as_ref().map(|room| LeaveRoom {
            room_id: room.room_id.clone(),
            name: self.username.clone(),
        })
    }

    pub fn chat_request(&self, body: &str) -> Option<OutgoingChat> {
        if is_blank(body) {
            return None;
        }
        self.room.as_ref().map(|room| OutgoingChat {
            room_id: room.room_id.clone(),
            sender: self.username.clone(),
            message: body.to_owned(),
        })
    }

    pub fn apply_create_ack(&mut self, ack: CreateRoomAck) -> &str {
        let room = self.room.insert(JoinedRoom::new(ack.room_id));
        &room.room_id
    }

    pub fn apply_join_ack(&mut self, request: &JoinRoom, ack: JoinRoomAck) -> JoinOutcome {
        if !ack.success {
            return JoinOutcome::Rejected(
                ack.message
                    .filter(|message| !is_blank(message))
                    .unwrap_or_else(|| JOIN_REJECTED_FALLBACK.to_owned()),
            );
        }
        self.room = Some(JoinedRoom::new(request.room_id.clone()));
        JoinOutcome::Joined
    }

    /// Returns whether the room was left.
    pub fn apply_leave_ack(&mut self, ack: LeaveRoomAck) -> bool {
        if ack.success {
            self.room = None;
        }
        ack.success
    }

    pub fn apply_push(&mut self, push: Push) -> PushOutcome {
        let Some(room) = self.room.as_mut() else {
            return PushOutcome::NotJoined;
        };
        if push.room_id() != room.room_id {
            return PushOutcome::OtherRoom;
        }

        match push {
            Push::PlayerList(list) => room.roster = list.players,
            Push::ChatMessage(chat) => room.chat.push(ChatMessage {
                sender: chat.sender,
                message: chat.message,
            }),
        }
        PushOutcome::Applied
    }
}
