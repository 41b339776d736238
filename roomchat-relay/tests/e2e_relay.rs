use std::time::Duration;

use futures::{SinkExt, StreamExt};
use roomchat_core::{
    Ack, ChatPush, Command, CommandEnvelope, CreateRoom, JoinRoom, JoinRoomAck, LeaveRoom,
    LeaveRoomAck, MAX_MEMBERS_PER_ROOM, OutgoingChat, Push, RosterEntry, SYSTEM_SENDER, WireMessage,
    decode_frame, encode_frame,
};
use roomchat_relay::{AppState, build_router};
use tokio::{net::TcpListener, sync::oneshot, time::timeout};
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream, connect_async, tungstenite::Message};

type WsStream = WebSocketStream<MaybeTlsStream<tokio::net::TcpStream>>;
type WsWrite = futures::stream::SplitSink<WsStream, Message>;
type WsRead = futures::stream::SplitStream<WsStream>;

struct TestClient {
    write: WsWrite,
    read: WsRead,
    next_request_id: u64,
}

impl TestClient {
    async fn send(&mut self, request_id: Option<u64>, command: Command) {
        let frame = encode_frame(&WireMessage::Command(CommandEnvelope {
            request_id,
            command,
        }))
        .expect("encode command");
        self.write
            .send(Message::Binary(frame.into()))
            .await
            .expect("send command");
    }

    /// Sends an acked command and returns the first message received after it.
    async fn request(&mut self, command: Command) -> (u64, Ack) {
        self.next_request_id += 1;
        let request_id = self.next_request_id;
        self.send(Some(request_id), command).await;
        match recv_next_wire_message(self, Duration::from_secs(2)).await {
            Some(WireMessage::Ack(envelope)) => {
                assert_eq!(envelope.request_id, request_id);
                (request_id, envelope.ack)
            }
            other => panic!("expected ack first, got {other:?}"),
        }
    }

    async fn create_room(&mut self, name: &str) -> String {
        let (_, ack) = self
            .request(Command::CreateRoom(CreateRoom {
                name: name.to_owned(),
            }))
            .await;
        match ack {
            Ack::CreateRoom(created) => created.room_id,
            other => panic!("unexpected create ack: {other:?}"),
        }
    }

    async fn join_room(&mut self, room_id: &str, name: &str) -> JoinRoomAck {
        let (_, ack) = self
            .request(Command::JoinRoom(JoinRoom {
                room_id: room_id.to_owned(),
                name: name.to_owned(),
            }))
            .await;
        match ack {
            Ack::JoinRoom(joined) => joined,
            other => panic!("unexpected join ack: {other:?}"),
        }
    }
}

#[tokio::test]
async fn create_room_acks_before_pushing_roster_and_notice() {
    let (address, shutdown_tx) = start_relay().await;
    let mut alice = connect_client(&address).await;

    let room_id = alice.create_room("Alice").await;
    assert_eq!(room_id.len(), 6);

    let pushes = drain_pushes(&mut alice).await;
    assert_eq!(pushes.len(), 2);
    match &pushes[0] {
        Push::PlayerList(list) => {
            assert_eq!(list.room_id, room_id);
            assert_eq!(list.players.len(), 1);
            assert_eq!(list.players[0].name, "Alice");
        }
        other => panic!("expected roster first, got {other:?}"),
    }
    assert_eq!(
        pushes[1],
        Push::ChatMessage(ChatPush {
            room_id: room_id.clone(),
            sender: SYSTEM_SENDER.to_owned(),
            message: "Alice joined the room".to_owned(),
        })
    );

    let _ = shutdown_tx.send(());
}

#[tokio::test]
async fn joining_unknown_room_is_rejected() {
    let (address, shutdown_tx) = start_relay().await;
    let mut bob = connect_client(&address).await;

    let ack = bob.join_room("NOPE42", "Bob").await;
    assert!(!ack.success);
    assert_eq!(ack.message.as_deref(), Some("Room not found"));
    assert!(drain_pushes(&mut bob).await.is_empty());

    let _ = shutdown_tx.send(());
}

#[tokio::test]
async fn blank_name_is_rejected_on_join() {
    let (address, shutdown_tx) = start_relay().await;
    let mut alice = connect_client(&address).await;
    let room_id = alice.create_room("Alice").await;

    let mut anon = connect_client(&address).await;
    let ack = anon.join_room(&room_id, "   ").await;
    assert!(!ack.success);
    assert_eq!(ack.message.as_deref(), Some("Name is required"));

    let _ = shutdown_tx.send(());
}

#[tokio::test]
async fn chat_is_fanned_out_to_every_member_including_sender() {
    let (address, shutdown_tx) = start_relay().await;
    let mut alice = connect_client(&address).await;
    let mut bob = connect_client(&address).await;

    let room_id = alice.create_room("Alice").await;
    assert!(bob.join_room(&room_id, "Bob").await.success);
    drain_pushes(&mut alice).await;
    drain_pushes(&mut bob).await;

    alice
        .send(
            None,
            Command::ChatMessage(OutgoingChat {
                room_id: room_id.clone(),
                sender: "Alice".to_owned(),
                message: "hi".to_owned(),
            }),
        )
        .await;

    let expected = Push::ChatMessage(ChatPush {
        room_id: room_id.clone(),
        sender: "Alice".to_owned(),
        message: "hi".to_owned(),
    });
    assert_eq!(drain_pushes(&mut bob).await, vec![expected.clone()]);
    assert_eq!(drain_pushes(&mut alice).await, vec![expected]);

    let _ = shutdown_tx.send(());
}

#[tokio::test]
async fn chat_with_spoofed_sender_or_foreign_room_is_dropped() {
    let (address, shutdown_tx) = start_relay().await;
    let mut alice = connect_client(&address).await;
    let mut bob = connect_client(&address).await;

    let room_a = alice.create_room("Alice").await;
    let room_b = bob.create_room("Bob").await;
    drain_pushes(&mut alice).await;
    drain_pushes(&mut bob).await;

    alice
        .send(
            None,
            Command::ChatMessage(OutgoingChat {
                room_id: room_b.clone(),
                sender: "Alice".to_owned(),
                message: "cross-room".to_owned(),
            }),
        )
        .await;
    alice
        .send(
            None,
            Command::ChatMessage(OutgoingChat {
                room_id: room_a.clone(),
                sender: "Mallory".to_owned(),
                message: "spoofed".to_owned(),
            }),
        )
        .await;

    assert!(drain_pushes(&mut bob).await.is_empty());
    assert!(drain_pushes(&mut alice).await.is_empty());

    let _ = shutdown_tx.send(());
}

#[tokio::test]
async fn leave_updates_roster_for_remaining_members() {
    let (address, shutdown_tx) = start_relay().await;
    let mut alice = connect_client(&address).await;
    let mut bob = connect_client(&address).await;

    let room_id = alice.create_room("Alice").await;
    assert!(bob.join_room(&room_id, "Bob").await.success);
    drain_pushes(&mut alice).await;
    drain_pushes(&mut bob).await;

    let (_, ack) = bob
        .request(Command::LeaveRoom(LeaveRoom {
            room_id: room_id.clone(),
            name: "Bob".to_owned(),
        }))
        .await;
    assert_eq!(ack, Ack::LeaveRoom(LeaveRoomAck { success: true }));

    let pushes = drain_pushes(&mut alice).await;
    match &pushes[0] {
        Push::PlayerList(list) => {
            let names: Vec<&str> = list.players.iter().map(|p| p.name.as_str()).collect();
            assert_eq!(names, ["Alice"]);
        }
        other => panic!("expected roster, got {other:?}"),
    }
    assert!(pushes.iter().any(|push| matches!(
        push,
        Push::ChatMessage(chat) if chat.sender == SYSTEM_SENDER && chat.message == "Bob left the room"
    )));
    assert!(drain_pushes(&mut bob).await.is_empty());

    let _ = shutdown_tx.send(());
}

#[tokio::test]
async fn leaving_a_room_not_joined_fails() {
    let (address, shutdown_tx) = start_relay().await;
    let mut bob = connect_client(&address).await;

    let (_, ack) = bob
        .request(Command::LeaveRoom(LeaveRoom {
            room_id: "ABC123".to_owned(),
            name: "Bob".to_owned(),
        }))
        .await;
    assert_eq!(ack, Ack::LeaveRoom(LeaveRoomAck { success: false }));

    let _ = shutdown_tx.send(());
}

#[tokio::test]
async fn disconnect_removes_member_from_roster() {
    let (address, shutdown_tx) = start_relay().await;
    let mut alice = connect_client(&address).await;
    let mut bob = connect_client(&address).await;

    let room_id = alice.create_room("Alice").await;
    assert!(bob.join_room(&room_id, "Bob").await.success);
    drain_pushes(&mut alice).await;

    let _ = bob.write.close().await;
    drop(bob);

    let pushes = drain_pushes_for(&mut alice, Duration::from_secs(1)).await;
    assert!(pushes.iter().any(|push| matches!(
        push,
        Push::PlayerList(list) if list.players.len() == 1 && list.players[0].name == "Alice"
    )));

    let _ = shutdown_tx.send(());
}

#[tokio::test]
async fn malformed_frame_is_ignored_and_connection_stays_usable() {
    let (address, shutdown_tx) = start_relay().await;
    let mut alice = connect_client(&address).await;

    alice
        .write
        .send(Message::Binary(vec![0xFF, 0x00, 0xAB, 0xCD].into()))
        .await
        .expect("send malformed frame");

    let room_id = alice.create_room("Alice").await;
    assert!(!room_id.is_empty());

    let _ = shutdown_tx.send(());
}

#[tokio::test]
async fn room_capacity_rejects_extra_member() {
    let (address, shutdown_tx) = start_relay().await;

    let mut owner = connect_client(&address).await;
    let room_id = owner.create_room("Owner").await;

    let mut members = Vec::with_capacity(MAX_MEMBERS_PER_ROOM);
    for index in 1..MAX_MEMBERS_PER_ROOM {
        let mut client = connect_client(&address).await;
        let ack = client.join_room(&room_id, &format!("Member {index}")).await;
        assert!(ack.success, "member {index} should fit");
        members.push(client);
    }

    let mut overflow = connect_client(&address).await;
    let ack = overflow.join_room(&room_id, "Overflow").await;
    assert!(!ack.success);
    assert_eq!(ack.message.as_deref(), Some("Room is full"));

    let _ = shutdown_tx.send(());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_joins_end_with_the_full_roster_everywhere() {
    let (address, shutdown_tx) = start_relay().await;

    for round in 0..10 {
        let mut observer = connect_client(&address).await;
        let room_id = observer.create_room("Observer").await;

        let mut joiners = Vec::with_capacity(MAX_MEMBERS_PER_ROOM - 1);
        for _ in 1..MAX_MEMBERS_PER_ROOM {
            joiners.push(connect_client(&address).await);
        }
        let acks = futures::future::join_all(joiners.iter_mut().enumerate().map(
            |(index, client)| {
                let room_id = room_id.clone();
                async move { client.join_room(&room_id, &format!("Joiner {index}")).await }
            },
        ))
        .await;
        assert!(acks.iter().all(|ack| ack.success), "round {round}: {acks:?}");

        let clients = std::iter::once(&mut observer).chain(joiners.iter_mut());
        let rosters = futures::future::join_all(clients.map(last_roster)).await;
        for roster in rosters {
            assert_eq!(roster.len(), MAX_MEMBERS_PER_ROOM, "round {round}");
        }
    }

    let _ = shutdown_tx.send(());
}

async fn start_relay() -> (String, oneshot::Sender<()>) {
    let listener = TcpListener::bind("127.0.0.1:0")
        .await
        .expect("bind ephemeral relay socket");
    let address = listener.local_addr().expect("relay local addr");
    let (shutdown_tx, shutdown_rx) = oneshot::channel::<()>();

    let server = axum::serve(listener, build_router(AppState::new())).with_graceful_shutdown(async {
        let _ = shutdown_rx.await;
    });
    tokio::spawn(async move {
        let _ = server.await;
    });

    (format!("ws://{}/ws", address), shutdown_tx)
}

async fn connect_client(ws_url: &str) -> TestClient {
    let (ws_stream, _) = connect_async(ws_url).await.expect("connect websocket");
    let (write, read) = ws_stream.split();
    TestClient {
        write,
        read,
        next_request_id: 0,
    }
}

async fn drain_pushes(client: &mut TestClient) -> Vec<Push> {
    drain_pushes_for(client, Duration::from_millis(150)).await
}

/// The last roster pushed to `client` once the socket goes quiet.
async fn last_roster(client: &mut TestClient) -> Vec<RosterEntry> {
    drain_pushes(client)
        .await
        .into_iter()
        .filter_map(|push| match push {
            Push::PlayerList(list) => Some(list.players),
            Push::ChatMessage(_) => None,
        })
        .last()
        .expect("roster pushed")
}

/// Collects pushes until the socket stays quiet for `quiet`.
async fn drain_pushes_for(client: &mut TestClient, quiet: Duration) -> Vec<Push> {
    let mut pushes = Vec::new();
    loop {
        match recv_next_wire_message(client, quiet).await {
            Some(WireMessage::Push(push)) => pushes.push(push),
            Some(_) => continue,
            None => break,
        }
    }
    pushes
}

async fn recv_next_wire_message(client: &mut TestClient, wait: Duration) -> Option<WireMessage> {
    loop {
        let next = timeout(wait, client.read.next()).await.ok()?;
        let message = next?.ok()?;

        match message {
            Message::Binary(bytes) => return decode_frame(&bytes).ok(),
            Message::Close(_) => return None,
            _ => continue,
        }
    }
}
