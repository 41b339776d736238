//! The room session component.
//!
//! [`RoomClient`] combines the [`Session`] state machine with the text
//! inputs, visibility toggles and the pending alert the view renders. The
//! channel is injected at construction through [`RoomCommands`], so tests
//! drive the same code with a recording fake.

use futures::{FutureExt, future::LocalBoxFuture};
use roomchat_core::{
    CreateRoomAck, JoinOutcome, JoinRoom, JoinRoomAck, LeaveRoomAck, MAX_CHAT_MESSAGE_BYTES, Push,
    PushOutcome, RoomId, Session,
};
use tracing::{debug, info, warn};

use crate::{channel::RoomCommands, error::ClientError};

/// The outcome of a room command, applied with [`RoomClient::complete`].
#[derive(Debug)]
pub enum RoomReply {
    Created(Result<CreateRoomAck, ClientError>),
    Joined {
        request: JoinRoom,
        result: Result<JoinRoomAck, ClientError>,
    },
    Left {
        room_id: RoomId,
        result: Result<LeaveRoomAck, ClientError>,
    },
}

pub type PendingReply = LocalBoxFuture<'static, RoomReply>;

#[derive(Debug)]
pub struct RoomClient<C> {
    commands: C,
    session: Session,
    pub name_input: String,
    pub room_id_input: String,
    pub draft: String,
    show_roster: bool,
    show_room_id: bool,
    alert: Option<String>,
    awaiting: Option<&'static str>,
}

impl<C> RoomClient<C> {
    pub fn new(commands: C) -> Self {
        Self {
            commands,
            session: Session::new(),
            name_input: String::new(),
            room_id_input: String::new(),
            draft: String::new(),
            show_roster: false,
            show_room_id: false,
            alert: None,
            awaiting: None,
        }
    }

    #[must_use]
    pub fn with_inputs(mut self, name: impl Into<String>, room_id: impl Into<String>) -> Self {
        self.name_input = name.into();
        self.room_id_input = room_id.into();
        self
    }

    pub fn session(&self) -> &Session {
        &self.session
    }

    pub fn commands(&self) -> &C {
        &self.commands
    }

    pub fn into_commands(self) -> C {
        self.commands
    }

    /// Whether a create, join or leave is waiting for its acknowledgment.
    /// Further room commands are ignored until it completes.
    pub fn is_waiting(&self) -> bool {
        self.awaiting.is_some()
    }

    pub fn alert(&self) -> Option<&str> {
        self.alert.as_deref()
    }

    pub fn show_alert(&mut self, message: impl Into<String>) {
        self.alert = Some(message.into());
    }

    pub fn dismiss_alert(&mut self) {
        self.alert = None;
    }

    pub fn show_roster(&self) -> bool {
        self.show_roster
    }

    pub fn show_room_id(&self) -> bool {
        self.show_room_id
    }

    pub fn toggle_roster(&mut self) {
        self.show_roster = !self.show_roster;
    }

    pub fn toggle_room_id(&mut self) {
        self.show_room_id = !self.show_room_id;
    }

    /// Applies a server push to the joined room. Pushes for another room, or
    /// arriving while unjoined, are dropped.
    pub fn apply_push(&mut self, push: Push) {
        let event = match &push {
            Push::PlayerList(_) => "player-list",
            Push::ChatMessage(_) => "chat-message",
        };
        let tagged_room = push.room_id().to_owned();

        match self.session.apply_push(push) {
            PushOutcome::Applied => {}
            PushOutcome::NotJoined => {
                debug!(event, room_id = %tagged_room, "dropping push while not in a room");
            }
            PushOutcome::OtherRoom => {
                debug!(
                    event,
                    room_id = %tagged_room,
                    joined = self.session.room_id().unwrap_or_default(),
                    "dropping push for another room"
                );
            }
        }
    }

    pub fn complete(&mut self, reply: RoomReply) {
        if let Some(event) = self.awaiting.take() {
            debug!(event, "request completed");
        }

        match reply {
            RoomReply::Created(Ok(ack)) => {
                let room_id = self.session.apply_create_ack(ack).to_owned();
                info!(room_id = %room_id, "created room");
                self.room_id_input = room_id;
            }
            RoomReply::Created(Err(err)) => self.report("create-room", err),
            RoomReply::Joined {
                request,
                result: Ok(ack),
            } => match self.session.apply_join_ack(&request, ack) {
                JoinOutcome::Joined => info!(room_id = %request.room_id, "joined room"),
                JoinOutcome::Rejected(message) => {
                    info!(room_id = %request.room_id, reason = %message, "join rejected");
                    self.alert = Some(message);
                }
            },
            RoomReply::Joined {
                result: Err(err), ..
            } => self.report("join-room", err),
            RoomReply::Left {
                room_id,
                result: Ok(ack),
            } => {
                if self.session.apply_leave_ack(ack) {
                    info!(room_id = %room_id, "left room");
                    self.room_id_input.clear();
                } else {
                    warn!(room_id = %room_id, "server refused leave");
                }
            }
            RoomReply::Left {
                result: Err(err), ..
            } => self.report("leave-room", err),
        }
    }

    fn report(&mut self, action: &str, err: ClientError) {
        warn!(action, "request failed: {}", err);
        self.alert = Some(match err {
            ClientError::AckTimeout(_) => "Server did not respond. Try again.".to_string(),
            ClientError::ChannelClosed => "Disconnected from server".to_string(),
            other => other.to_string(),
        });
    }
}

impl<C: RoomCommands> RoomClient<C> {
    /// Validates the name and queues `create-room`. Returns the reply to poll,
    /// or `None` when nothing was sent.
    pub fn begin_create_room(&mut self) -> Option<PendingReply> {
        if self.awaiting.is_some() || self.session.room().is_some() {
            return None;
        }
        self.session.set_username(self.name_input.as_str());
        let request = match self.session.create_room_request() {
            Ok(request) => request,
            Err(err) => {
                self.alert = Some(err.to_string());
                return None;
            }
        };

        let reply = self.commands.create_room(request);
        self.awaiting = Some("create-room");
        Some(async move { RoomReply::Created(reply.await) }.boxed_local())
    }

    pub fn begin_join_room(&mut self) -> Option<PendingReply> {
        if self.awaiting.is_some() || self.session.room().is_some() {
            return None;
        }
        self.session.set_username(self.name_input.as_str());
        let request = match self.session.join_room_request(&self.room_id_input) {
            Ok(request) => request,
            Err(err) => {
                self.alert = Some(err.to_string());
                return None;
            }
        };

        let reply = self.commands.join_room(request.clone());
        self.awaiting = Some("join-room");
        Some(
            async move {
                RoomReply::Joined {
                    request,
                    result: reply.await,
                }
            }
            .boxed_local(),
        )
    }

    pub fn begin_leave_room(&mut self) -> Option<PendingReply> {
        if self.awaiting.is_some() {
            return None;
        }
        let request = self.session.leave_room_request()?;
        let room_id = request.room_id.clone();

        let reply = self.commands.leave_room(request);
        self.awaiting = Some("leave-room");
        Some(
            async move {
                RoomReply::Left {
                    room_id,
                    result: reply.await,
                }
            }
            .boxed_local(),
        )
    }

    pub async fn create_room(&mut self) {
        if let Some(reply) = self.begin_create_room() {
            let reply = reply.await;
            self.complete(reply);
        }
    }

    pub async fn join_room(&mut self) {
        if let Some(reply) = self.begin_join_room() {
            let reply = reply.await;
            self.complete(reply);
        }
    }

    pub async fn leave_room(&mut self) {
        if let Some(reply) = self.begin_leave_room() {
            let reply = reply.await;
            self.complete(reply);
        }
    }

    pub fn send_message(&mut self) {
        let Some(chat) = self.session.chat_request(&self.draft) else {
            return;
        };
        if chat.message.len() > MAX_CHAT_MESSAGE_BYTES {
            // The draft stays so the user can shorten it.
            self.alert = Some(format!(
                "Message is too long (max {MAX_CHAT_MESSAGE_BYTES} bytes)"
            ));
            return;
        }
        match self.commands.send_chat(chat) {
            Ok(()) => self.draft.clear(),
            Err(err) => self.report("chat-message", err),
        }
    }
}
