//! The connection to the room server.
//!
//! [`RoomChannel`] owns one WebSocket for the client's lifetime. A send task
//! writes queued frames and a receive task routes what arrives: acks resolve
//! the pending request with the same id, pushes go to the [`PushReceiver`]
//! returned from [`RoomChannel::connect`].

use std::{
    collections::HashMap,
    sync::{
        Arc, Mutex,
        atomic::{AtomicU64, Ordering},
    },
    time::Duration,
};

use futures::{FutureExt, SinkExt, StreamExt, future::LocalBoxFuture};
use roomchat_core::{
    Ack, Command, CommandEnvelope, CreateRoom, CreateRoomAck, JoinRoom, JoinRoomAck, LeaveRoom,
    LeaveRoomAck, OutgoingChat, Push, RequestId, WireMessage, decode_frame, encode_frame,
};
use tokio::{
    net::TcpStream,
    sync::{mpsc, oneshot},
    task::JoinHandle,
    time::timeout,
};
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream, connect_async, tungstenite::Message};
use tracing::{debug, info, warn};

use crate::{config::ChannelConfig, error::ClientError};

const SHUTDOWN_GRACE: Duration = Duration::from_secs(1);

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;
type SharedPending = Arc<Mutex<PendingAcks>>;

pub type PushReceiver = mpsc::UnboundedReceiver<Push>;

/// A queued request's acknowledgment, independent of the channel borrow.
pub type Reply<T> = LocalBoxFuture<'static, Result<T, ClientError>>;

/// Requests waiting for their ack. Once closed, nothing new is registered.
#[derive(Debug, Default)]
struct PendingAcks {
    waiters: HashMap<RequestId, oneshot::Sender<Ack>>,
    closed: bool,
}

impl PendingAcks {
    fn register(&mut self, request_id: RequestId, waiter: oneshot::Sender<Ack>) -> bool {
        if self.closed {
            return false;
        }
        self.waiters.insert(request_id, waiter);
        true
    }

    fn take(&mut self, request_id: RequestId) -> Option<oneshot::Sender<Ack>> {
        self.waiters.remove(&request_id)
    }

    /// Drops every waiter, which fails their requests with `ChannelClosed`.
    fn close(&mut self) {
        self.closed = true;
        self.waiters.clear();
    }
}

/// Room commands as typed request/response calls.
///
/// Implemented by [`RoomChannel`]; the session controller only depends on
/// this trait. The command is queued when the method is called and the
/// returned [`Reply`] owns everything it needs, so callers poll it next to
/// other work instead of awaiting it inline.
pub trait RoomCommands {
    fn create_room(&self, request: CreateRoom) -> Reply<CreateRoomAck>;

    fn join_room(&self, request: JoinRoom) -> Reply<JoinRoomAck>;

    fn leave_room(&self, request: LeaveRoom) -> Reply<LeaveRoomAck>;

    /// Queues a chat message. There is no acknowledgment.
    fn send_chat(&self, chat: OutgoingChat) -> Result<(), ClientError>;
}

/// The request half of the channel, cloned into every pending reply.
#[derive(Clone)]
struct Requester {
    outgoing_tx: mpsc::UnboundedSender<WireMessage>,
    pending: SharedPending,
    next_request_id: Arc<AtomicU64>,
    ack_timeout: Option<Duration>,
}

/// A command that was queued and is waiting for its ack.
struct Dispatched {
    request_id: RequestId,
    event: &'static str,
    ack_rx: oneshot::Receiver<Ack>,
}

impl Requester {
    fn dispatch(&self, command: Command) -> Result<Dispatched, ClientError> {
        let event = command.event_name();
        let request_id = self.next_request_id.fetch_add(1, Ordering::Relaxed);
        let (ack_tx, ack_rx) = oneshot::channel();

        let registered = self
            .pending
            .lock()
            .map_err(|_| ClientError::ChannelClosed)?
            .register(request_id, ack_tx);
        if !registered {
            return Err(ClientError::ChannelClosed);
        }

        let envelope = CommandEnvelope {
            request_id: Some(request_id),
            command,
        };
        if self.outgoing_tx.send(WireMessage::Command(envelope)).is_err() {
            self.forget(request_id);
            return Err(ClientError::ChannelClosed);
        }
        debug!(request_id, event, "request sent");

        Ok(Dispatched {
            request_id,
            event,
            ack_rx,
        })
    }

    async fn wait(self, dispatched: Dispatched) -> Result<Ack, ClientError> {
        let Dispatched {
            request_id,
            event,
            ack_rx,
        } = dispatched;

        let received = match self.ack_timeout {
            Some(limit) => match timeout(limit, ack_rx).await {
                Ok(received) => received,
                Err(_) => {
                    self.forget(request_id);
                    warn!(request_id, event, "no acknowledgment within {:?}", limit);
                    return Err(ClientError::AckTimeout(limit));
                }
            },
            None => ack_rx.await,
        };

        match received.map_err(|_| ClientError::ChannelClosed)? {
            Ack::Error { message } => Err(ClientError::Server { event, message }),
            ack => Ok(ack),
        }
    }

    /// Queues `command` now and returns the future resolving to its ack.
    fn request(&self, command: Command) -> Reply<Ack> {
        let dispatched = self.dispatch(command);
        let requester = self.clone();
        async move { requester.wait(dispatched?).await }.boxed_local()
    }

    fn forget(&self, request_id: RequestId) {
        if let Ok(mut pending) = self.pending.lock() {
            pending.take(request_id);
        }
    }
}

pub struct RoomChannel {
    requester: Requester,
    send_task: JoinHandle<()>,
    receive_task: JoinHandle<()>,
}

impl RoomChannel {
    pub async fn connect(config: &ChannelConfig) -> Result<(Self, PushReceiver), ClientError> {
        info!(server_url = %config.server_url, "connecting");

        let (ws_stream, _) = timeout(
            config.connect_timeout,
            connect_async(config.server_url.as_str()),
        )
        .await
        .map_err(|_| ClientError::ConnectTimeout(config.connect_timeout))?
        .map_err(|err| ClientError::Connect(Box::new(err)))?;

        info!(server_url = %config.server_url, "connected");
        Ok(Self::start(ws_stream, config.ack_timeout))
    }

    fn start(ws_stream: WsStream, ack_timeout: Option<Duration>) -> (Self, PushReceiver) {
        let (write_half, read_half) = ws_stream.split();
        let (outgoing_tx, outgoing_rx) = mpsc::unbounded_channel::<WireMessage>();
        let (push_tx, push_rx) = mpsc::unbounded_channel::<Push>();
        let pending: SharedPending = Arc::new(Mutex::new(PendingAcks::default()));

        let send_task = tokio::spawn(network_send_task(write_half, outgoing_rx));
        let receive_task = tokio::spawn(network_receive_task(
            read_half,
            Arc::clone(&pending),
            push_tx,
        ));

        let channel = Self {
            requester: Requester {
                outgoing_tx,
                pending,
                next_request_id: Arc::new(AtomicU64::new(1)),
                ack_timeout,
            },
            send_task,
            receive_task,
        };
        (channel, push_rx)
    }

    /// Closes the socket and stops both network tasks.
    ///
    /// Requests still waiting for an ack fail with [`ClientError::ChannelClosed`].
    pub async fn shutdown(self) {
        let RoomChannel {
            requester,
            send_task,
            receive_task,
        } = self;
        fail_pending(&requester.pending);
        drop(requester);

        // The send task closes the sink once its queue has no senders left.
        // Replies that are still alive keep one, hence the grace period.
        let send_abort = send_task.abort_handle();
        if timeout(SHUTDOWN_GRACE, send_task).await.is_err() {
            warn!("send task did not finish within {:?}", SHUTDOWN_GRACE);
            send_abort.abort();
        }
        receive_task.abort();
        info!("channel shut down");
    }
}

impl RoomCommands for RoomChannel {
    fn create_room(&self, request: CreateRoom) -> Reply<CreateRoomAck> {
        let reply = self.requester.request(Command::CreateRoom(request));
        async move {
            match reply.await? {
                Ack::CreateRoom(ack) => Ok(ack),
                _ => Err(ClientError::UnexpectedAck("create-room")),
            }
        }
        .boxed_local()
    }

    fn join_room(&self, request: JoinRoom) -> Reply<JoinRoomAck> {
        let reply = self.requester.request(Command::JoinRoom(request));
        async move {
            match reply.await? {
                Ack::JoinRoom(ack) => Ok(ack),
                _ => Err(ClientError::UnexpectedAck("join-room")),
            }
        }
        .boxed_local()
    }

    fn leave_room(&self, request: LeaveRoom) -> Reply<LeaveRoomAck> {
        let reply = self.requester.request(Command::LeaveRoom(request));
        async move {
            match reply.await? {
                Ack::LeaveRoom(ack) => Ok(ack),
                _ => Err(ClientError::UnexpectedAck("leave-room")),
            }
        }
        .boxed_local()
    }

    fn send_chat(&self, chat: OutgoingChat) -> Result<(), ClientError> {
        self.requester
            .outgoing_tx
            .send(WireMessage::Command(CommandEnvelope {
                request_id: None,
                command: Command::ChatMessage(chat),
            }))
            .map_err(|_| ClientError::ChannelClosed)
    }
}

fn fail_pending(pending: &SharedPending) {
    if let Ok(mut pending) = pending.lock() {
        pending.close();
    }
}

async fn network_send_task(
    mut ws_write: futures::stream::SplitSink<WsStream, Message>,
    mut outgoing_rx: mpsc::UnboundedReceiver<WireMessage>,
) {
    while let Some(message) = outgoing_rx.recv().await {
        match encode_frame(&message) {
            Ok(frame) => {
                if ws_write.send(Message::Binary(frame.into())).await.is_err() {
                    break;
                }
            }
            Err(err) => warn!("failed to encode outgoing frame: {}", err),
        }
    }
    let _ = ws_write.close().await;
}

async fn network_receive_task(
    mut ws_read: futures::stream::SplitStream<WsStream>,
    pending: SharedPending,
    push_tx: mpsc::UnboundedSender<Push>,
) {
    while let Some(next) = ws_read.next().await {
        let message = match next {
            Ok(msg) => msg,
            Err(err) => {
                warn!("read failed: {}", err);
                break;
            }
        };

        let data = match message {
            Message::Binary(data) => data,
            Message::Close(_) => break,
            _ => continue,
        };

        let frame = match decode_frame(&data) {
            Ok(frame) => frame,
            Err(err) => {
                warn!("decode frame failed: {}", err);
                continue;
            }
        };

        match frame {
            WireMessage::Ack(envelope) => {
                let waiter = pending
                    .lock()
                    .ok()
                    .and_then(|mut pending| pending.take(envelope.request_id));
                match waiter {
                    Some(waiter) => {
                        let _ = waiter.send(envelope.ack);
                    }
                    None => warn!(
                        request_id = envelope.request_id,
                        "ack for unknown or expired request"
                    ),
                }
            }
            WireMessage::Push(push) => {
                if push_tx.send(push).is_err() {
                    debug!("push receiver dropped");
                }
            }
            WireMessage::Command(_) => warn!("unexpected command frame from server"),
        }
    }

    info!("connection closed");
    fail_pending(&pending);
}
