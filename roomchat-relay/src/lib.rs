use std::{
    collections::HashMap,
    sync::{
        Arc,
        atomic::{AtomicU64, Ordering},
    },
    time::{Duration, Instant},
};

use axum::{
    Json, Router,
    extract::{State, WebSocketUpgrade, ws::Message},
    response::IntoResponse,
    routing::get,
};
use futures::{SinkExt, StreamExt};
use rand::Rng;
use roomchat_core::{
    Ack, AckEnvelope, ChatPush, Command, CommandEnvelope, CreateRoom, CreateRoomAck, JoinRoom,
    JoinRoomAck, LeaveRoom, LeaveRoomAck, MAX_CHAT_MESSAGE_BYTES, MAX_FRAME_BYTES,
    MAX_MEMBERS_PER_ROOM, MAX_NAME_CHARS, OutgoingChat, ParticipantId, PlayerList, Push,
    RequestId, RoomId, RosterEntry, SYSTEM_SENDER, WireMessage, decode_frame, encode_frame,
    is_blank,
};
use tokio::{
    net::TcpListener,
    sync::{RwLock, mpsc},
};
use tracing::{debug, error, info, warn};

const ROOM_ID_LEN: usize = 6;
const ROOM_ID_ALPHABET: &[u8] = b"ABCDEFGHJKLMNPQRSTUVWXYZ23456789";

#[derive(Debug, Clone)]
struct Member {
    entry: RosterEntry,
    tx: mpsc::UnboundedSender<Message>,
}

/// Members are kept in join order, which is the order of the pushed roster.
#[derive(Debug, Default)]
struct Room {
    members: Vec<Member>,
}

impl Room {
    fn roster(&self) -> Vec<RosterEntry> {
        self.members.iter().map(|member| member.entry.clone()).collect()
    }

    fn recipients(&self) -> Vec<mpsc::UnboundedSender<Message>> {
        self.members.iter().map(|member| member.tx.clone()).collect()
    }

    fn contains(&self, participant_id: &str) -> bool {
        self.members
            .iter()
            .any(|member| member.entry.id == participant_id)
    }
}

#[derive(Debug, Default)]
struct RelayState {
    rooms: HashMap<RoomId, Room>,
}

#[derive(Debug, Clone)]
pub struct AppState {
    inner: Arc<RwLock<RelayState>>,
    next_participant: Arc<AtomicU64>,
}

impl AppState {
    #[must_use]
    pub fn new() -> Self {
        Self {
            inner: Arc::new(RwLock::new(RelayState::default())),
            next_participant: Arc::new(AtomicU64::new(1)),
        }
    }

    fn next_participant_id(&self) -> ParticipantId {
        self.next_participant
            .fetch_add(1, Ordering::Relaxed)
            .to_string()
    }
}

impl Default for AppState {
    fn default() -> Self {
        Self::new()
    }
}

#[derive(Debug)]
struct TokenBucket {
    capacity: f64,
    refill_per_second: f64,
    tokens: f64,
    last_refill: Instant,
}

impl TokenBucket {
    fn new(capacity: f64, refill_per_second: f64) -> Self {
        Self {
            capacity,
            refill_per_second,
            tokens: capacity,
            last_refill: Instant::now(),
        }
    }

    fn consume(&mut self, amount: f64) -> bool {
        let now = Instant::now();
        let elapsed = now.saturating_duration_since(self.last_refill);
        self.last_refill = now;
        self.tokens =
            (self.tokens + elapsed.as_secs_f64() * self.refill_per_second).min(self.capacity);
        if self.tokens >= amount {
            self.tokens -= amount;
            true
        } else {
            false
        }
    }
}

#[derive(Debug, Clone)]
struct Membership {
    room_id: RoomId,
    name: String,
}

/// Per-socket state owned by the connection's receive loop.
struct Connection {
    participant_id: ParticipantId,
    tx: mpsc::UnboundedSender<Message>,
    membership: Option<Membership>,
    chat_limiter: TokenBucket,
}

/// Roster change to fan out to a room right after the triggering ack.
struct RoomUpdate {
    room_id: RoomId,
    recipients: Vec<mpsc::UnboundedSender<Message>>,
    roster: Vec<RosterEntry>,
    notice: String,
}

pub fn build_router(state: AppState) -> Router {
    Router::new()
        .route("/ws", get(ws_handler))
        .route("/healthz", get(healthz_handler))
        .with_state(state)
}

pub async fn serve(listener: TcpListener, state: AppState) -> Result<(), String> {
    info!(
        "relay listening on {}",
        listener
            .local_addr()
            .map(|a| a.to_string())
            .unwrap_or_else(|_| "unknown".to_owned())
    );
    axum::serve(listener, build_router(state))
        .await
        .map_err(|err| err.to_string())
}

async fn healthz_handler() -> impl IntoResponse {
    Json(serde_json::json!({"ok": true}))
}

async fn ws_handler(ws: WebSocketUpgrade, State(state): State<AppState>) -> impl IntoResponse {
    ws.max_frame_size(MAX_FRAME_BYTES)
        .on_upgrade(move |socket| async move {
            if let Err(err) = handle_socket(state, socket).await {
                warn!("socket session ended with error: {}", err);
            }
        })
}

async fn handle_socket(
    state: AppState,
    socket: axum::extract::ws::WebSocket,
) -> Result<(), String> {
    let (mut ws_sender, mut ws_receiver) = socket.split();
    let (outbound_tx, mut outbound_rx) = mpsc::unbounded_channel::<Message>();

    // Pongs queued by the read half are only flushed when the write half
    // sends, so the write half pings on its own schedule.
    const KEEPALIVE_INTERVAL: Duration = Duration::from_secs(30);

    let send_task = tokio::spawn(async move {
        let mut ping_interval = tokio::time::interval(KEEPALIVE_INTERVAL);
        ping_interval.tick().await; // skip first immediate tick

        loop {
            tokio::select! {
                msg = outbound_rx.recv() => {
                    match msg {
                        Some(message) => {
                            if ws_sender.send(message).await.is_err() {
                                break;
                            }
                        }
                        None => break,
                    }
                }
                _ = ping_interval.tick() => {
                    if ws_sender.send(Message::Ping(Vec::new().into())).await.is_err() {
                        break;
                    }
                }
            }
        }
    });

    let mut connection = Connection {
        participant_id: state.next_participant_id(),
        tx: outbound_tx,
        membership: None,
        chat_limiter: TokenBucket::new(20.0, 5.0),
    };

    info!(participant_id = %connection.participant_id, "participant connected");

    let mut result = Ok(());
    while let Some(next_message) = ws_receiver.next().await {
        let message = match next_message {
            Ok(message) => message,
            Err(err) => {
                result = Err(format!("websocket receive error: {err}"));
                break;
            }
        };

        match message {
            Message::Binary(data) => {
                if data.len() > MAX_FRAME_BYTES {
                    warn!(
                        participant_id = %connection.participant_id,
                        "dropping oversized message"
                    );
                    continue;
                }

                match decode_frame(&data) {
                    Ok(WireMessage::Command(envelope)) => {
                        handle_command(&state, &mut connection, envelope).await;
                    }
                    Ok(_) => {
                        warn!(
                            participant_id = %connection.participant_id,
                            "unexpected non-command frame from client"
                        );
                    }
                    Err(err) => {
                        warn!(
                            participant_id = %connection.participant_id,
                            "failed to decode frame: {}", err
                        );
                    }
                }
            }
            Message::Close(_) => break,
            Message::Ping(_) | Message::Pong(_) | Message::Text(_) => {}
        }
    }

    if let Some(membership) = connection.membership.take() {
        let mut relay = state.inner.write().await;
        if let Some(update) = detach_member(&mut relay, &membership, &connection.participant_id) {
            broadcast_update(update);
        }
    }

    send_task.abort();
    info!(participant_id = %connection.participant_id, "participant disconnected");
    result
}

async fn handle_command(state: &AppState, connection: &mut Connection, envelope: CommandEnvelope) {
    debug!(
        participant_id = %connection.participant_id,
        event = envelope.command.event_name(),
        request_id = ?envelope.request_id,
        "command received"
    );

    let mut relay = state.inner.write().await;
    let (ack, updates) = match envelope.command {
        Command::CreateRoom(request) => create_room(&mut relay, connection, request),
        Command::JoinRoom(request) => join_room(&mut relay, connection, request),
        Command::LeaveRoom(request) => leave_room(&mut relay, connection, request),
        Command::ChatMessage(chat) => {
            drop(relay);
            relay_chat(state, connection, chat).await;
            return;
        }
    };

    // Frames are queued before the guard drops, so every member sees roster
    // snapshots in the order the changes were made.
    if let Some(request_id) = envelope.request_id {
        send_ack(&connection.tx, request_id, ack);
    }
    for update in updates {
        broadcast_update(update);
    }
    drop(relay);
}

fn validate_name(name: &str) -> Result<String, String> {
    let name = name.trim();
    if is_blank(name) {
        return Err("Name is required".to_owned());
    }
    if name.chars().count() > MAX_NAME_CHARS {
        return Err(format!("Name must be at most {MAX_NAME_CHARS} characters"));
    }
    Ok(name.to_owned())
}

fn create_room(
    relay: &mut RelayState,
    connection: &mut Connection,
    request: CreateRoom,
) -> (Ack, Vec<RoomUpdate>) {
    let name = match validate_name(&request.name) {
        Ok(name) => name,
        Err(message) => return (Ack::Error { message }, Vec::new()),
    };

    let mut updates = Vec::new();
    if let Some(previous) = connection.membership.take() {
        updates.extend(detach_member(
            relay,
            &previous,
            &connection.participant_id,
        ));
    }

    let room_id = generate_room_id(&relay.rooms);
    let room = relay.rooms.entry(room_id.clone()).or_default();
    room.members.push(Member {
        entry: RosterEntry {
            id: connection.participant_id.clone(),
            name: name.clone(),
        },
        tx: connection.tx.clone(),
    });
    updates.push(RoomUpdate {
        room_id: room_id.clone(),
        recipients: room.recipients(),
        roster: room.roster(),
        notice: format!("{name} joined the room"),
    });

    info!(
        participant_id = %connection.participant_id,
        room_id = %room_id,
        "room created"
    );
    connection.membership = Some(Membership {
        room_id: room_id.clone(),
        name,
    });
    (Ack::CreateRoom(CreateRoomAck { room_id }), updates)
}

fn join_room(
    relay: &mut RelayState,
    connection: &mut Connection,
    request: JoinRoom,
) -> (Ack, Vec<RoomUpdate>) {
    let reject = |message: &str| {
        (
            Ack::JoinRoom(JoinRoomAck {
                success: false,
                message: Some(message.to_owned()),
            }),
            Vec::new(),
        )
    };

    let name = match validate_name(&request.name) {
        Ok(name) => name,
        Err(message) => return reject(&message),
    };
    let room_id = request.room_id.trim().to_owned();

    match relay.rooms.get(&room_id) {
        None => return reject("Room not found"),
        Some(room) if room.contains(&connection.participant_id) => {
            return (
                Ack::JoinRoom(JoinRoomAck {
                    success: true,
                    message: None,
                }),
                Vec::new(),
            );
        }
        Some(room) if room.members.len() >= MAX_MEMBERS_PER_ROOM => {
            return reject("Room is full");
        }
        Some(_) => {}
    }

    let mut updates = Vec::new();
    if let Some(previous) = connection.membership.take() {
        updates.extend(detach_member(relay, &previous, &connection.participant_id));
    }

    let Some(room) = relay.rooms.get_mut(&room_id) else {
        return reject("Room not found");
    };
    room.members.push(Member {
        entry: RosterEntry {
            id: connection.participant_id.clone(),
            name: name.clone(),
        },
        tx: connection.tx.clone(),
    });
    updates.push(RoomUpdate {
        room_id: room_id.clone(),
        recipients: room.recipients(),
        roster: room.roster(),
        notice: format!("{name} joined the room"),
    });

    info!(
        participant_id = %connection.participant_id,
        room_id = %room_id,
        "participant joined room"
    );
    connection.membership = Some(Membership { room_id, name });
    (
        Ack::JoinRoom(JoinRoomAck {
            success: true,
            message: None,
        }),
        updates,
    )
}

fn leave_room(
    relay: &mut RelayState,
    connection: &mut Connection,
    request: LeaveRoom,
) -> (Ack, Vec<RoomUpdate>) {
    let is_member = connection
        .membership
        .as_ref()
        .is_some_and(|membership| membership.room_id == request.room_id);
    if !is_member {
        warn!(
            participant_id = %connection.participant_id,
            room_id = %request.room_id,
            "leave for a room the participant is not in"
        );
        return (Ack::LeaveRoom(LeaveRoomAck { success: false }), Vec::new());
    }

    let mut updates = Vec::new();
    if let Some(membership) = connection.membership.take() {
        updates.extend(detach_member(relay, &membership, &connection.participant_id));
    }

    info!(
        participant_id = %connection.participant_id,
        room_id = %request.room_id,
        "participant left room"
    );
    (Ack::LeaveRoom(LeaveRoomAck { success: true }), updates)
}

async fn relay_chat(state: &AppState, connection: &mut Connection, chat: OutgoingChat) {
    let participant_id = &connection.participant_id;
    let Some(membership) = connection.membership.as_ref() else {
        warn!(participant_id = %participant_id, "chat from participant outside any room");
        return;
    };
    if membership.room_id != chat.room_id {
        warn!(
            participant_id = %participant_id,
            room_id = %chat.room_id,
            "chat tagged with a room the participant is not in"
        );
        return;
    }
    if membership.name != chat.sender {
        warn!(participant_id = %participant_id, "sender name mismatch");
        return;
    }
    if is_blank(&chat.message) {
        return;
    }
    if chat.message.len() > MAX_CHAT_MESSAGE_BYTES {
        warn!(participant_id = %participant_id, "dropping oversized chat message");
        return;
    }
    if !connection.chat_limiter.consume(1.0) {
        warn!(participant_id = %participant_id, "rate limit exceeded");
        return;
    }

    // Held across the fan-out so chat cannot overtake a roster change.
    let relay = state.inner.read().await;
    let recipients = relay
        .rooms
        .get(&chat.room_id)
        .map(Room::recipients)
        .unwrap_or_default();
    broadcast_push(
        recipients,
        Push::ChatMessage(ChatPush {
            room_id: chat.room_id,
            sender: chat.sender,
            message: chat.message,
        }),
    );
    drop(relay);
}

/// Removes a participant from its room, dropping the room once empty.
fn detach_member(
    relay: &mut RelayState,
    membership: &Membership,
    participant_id: &str,
) -> Option<RoomUpdate> {
    let room = relay.rooms.get_mut(&membership.room_id)?;
    room.members.retain(|member| member.entry.id != participant_id);
    if room.members.is_empty() {
        relay.rooms.remove(&membership.room_id);
        info!(room_id = %membership.room_id, "room closed");
        return None;
    }

    Some(RoomUpdate {
        room_id: membership.room_id.clone(),
        recipients: room.recipients(),
        roster: room.roster(),
        notice: format!("{} left the room", membership.name),
    })
}

fn generate_room_id(rooms: &HashMap<RoomId, Room>) -> RoomId {
    let mut rng = rand::rng();
    loop {
        let candidate: String = (0..ROOM_ID_LEN)
            .map(|_| ROOM_ID_ALPHABET[rng.random_range(0..ROOM_ID_ALPHABET.len())] as char)
            .collect();
        if !rooms.contains_key(&candidate) {
            return candidate;
        }
    }
}

fn send_ack(tx: &mpsc::UnboundedSender<Message>, request_id: RequestId, ack: Ack) {
    match encode_frame(&WireMessage::Ack(AckEnvelope { request_id, ack })) {
        Ok(frame) => {
            let _ = tx.send(Message::Binary(frame.into()));
        }
        Err(err) => error!("failed to serialize ack: {}", err),
    }
}

fn broadcast_update(update: RoomUpdate) {
    broadcast_push(
        update.recipients.clone(),
        Push::PlayerList(PlayerList {
            room_id: update.room_id.clone(),
            players: update.roster,
        }),
    );
    broadcast_push(
        update.recipients,
        Push::ChatMessage(ChatPush {
            room_id: update.room_id,
            sender: SYSTEM_SENDER.to_owned(),
            message: update.notice,
        }),
    );
}

fn broadcast_push(recipients: Vec<mpsc::UnboundedSender<Message>>, push: Push) {
    let frame = match encode_frame(&WireMessage::Push(push)) {
        Ok(frame) => frame,
        Err(err) => {
            error!("failed to serialize push: {}", err);
            return;
        }
    };

    for tx in recipients {
        let _ = tx.send(Message::Binary(frame.clone().into()));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn member(id: &str, name: &str) -> Member {
        let (tx, _rx) = mpsc::unbounded_channel();
        Member {
            entry: RosterEntry {
                id: id.to_owned(),
                name: name.to_owned(),
            },
            tx,
        }
    }

    #[test]
    fn generated_room_ids_use_the_alphabet_and_avoid_collisions() {
        let mut rooms = HashMap::new();
        for _ in 0..64 {
            let room_id = generate_room_id(&rooms);
            assert_eq!(room_id.len(), ROOM_ID_LEN);
            assert!(room_id.bytes().all(|b| ROOM_ID_ALPHABET.contains(&b)));
            assert!(!rooms.contains_key(&room_id));
            rooms.insert(room_id, Room::default());
        }
    }

    #[test]
    fn detach_keeps_join_order_and_announces_departure() {
        let mut relay = RelayState::default();
        relay.rooms.insert(
            "ROOM01".to_owned(),
            Room {
                members: vec![member("1", "Alice"), member("2", "Bob"), member("3", "Carol")],
            },
        );

        let update = detach_member(
            &mut relay,
            &Membership {
                room_id: "ROOM01".to_owned(),
                name: "Bob".to_owned(),
            },
            "2",
        )
        .expect("room still has members");

        let names: Vec<&str> = update.roster.iter().map(|e| e.name.as_str()).collect();
        assert_eq!(names, ["Alice", "Carol"]);
        assert_eq!(update.notice, "Bob left the room");
        assert_eq!(update.recipients.len(), 2);
    }

    #[test]
    fn detaching_last_member_closes_room() {
        let mut relay = RelayState::default();
        relay.rooms.insert(
            "ROOM01".to_owned(),
            Room {
                members: vec![member("1", "Alice")],
            },
        );
        let update = detach_member(
            &mut relay,
            &Membership {
                room_id: "ROOM01".to_owned(),
                name: "Alice".to_owned(),
            },
            "1",
        );
        assert!(update.is_none());
        assert!(relay.rooms.is_empty());
    }

    #[test]
    fn name_validation_trims_and_bounds_length() {
        assert_eq!(validate_name("  Alice "), Ok("Alice".to_owned()));
        assert!(validate_name("   ").is_err());
        assert!(validate_name(&"x".repeat(MAX_NAME_CHARS + 1)).is_err());
    }

    #[test]
    fn token_bucket_refuses_when_drained() {
        let mut bucket = TokenBucket::new(2.0, 0.0);
        assert!(bucket.consume(1.0));
        assert!(bucket.consume(1.0));
        assert!(!bucket.consume(1.0));
    }
}
