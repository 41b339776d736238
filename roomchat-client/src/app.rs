use std::{io, thread, time::Duration};

use crossterm::{
    event::{self, Event, KeyCode, KeyEvent, KeyEventKind, KeyModifiers},
    execute,
    terminal::{EnterAlternateScreen, LeaveAlternateScreen, disable_raw_mode, enable_raw_mode},
};
use futures::{StreamExt, stream::FuturesUnordered};
use ratatui::{Terminal, backend::CrosstermBackend};
use tokio::sync::mpsc;
use tracing::{info, warn};

use crate::{
    channel::{PushReceiver, RoomChannel, RoomCommands},
    config::ClientConfig,
    controller::{PendingReply, RoomClient},
    error::ClientError,
    view::{self, Focus, ViewState},
};

const INPUT_POLL_INTERVAL: Duration = Duration::from_millis(25);

type TerminalHandle = Terminal<CrosstermBackend<io::Stdout>>;

/// Room commands waiting for their acknowledgment.
pub type Replies = FuturesUnordered<PendingReply>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Flow {
    Continue,
    Quit,
}

pub async fn run(config: ClientConfig) -> Result<(), ClientError> {
    let (channel, pushes) = RoomChannel::connect(&config.channel).await?;
    let mut client =
        RoomClient::new(channel).with_inputs(config.initial_name, config.initial_room_id);

    let mut terminal = match setup_terminal() {
        Ok(terminal) => terminal,
        Err(err) => {
            client.into_commands().shutdown().await;
            return Err(err.into());
        }
    };

    let result = event_loop(&mut terminal, &mut client, pushes).await;
    let restored = restore_terminal(&mut terminal);
    client.into_commands().shutdown().await;

    result?;
    restored?;
    info!("client exited");
    Ok(())
}

fn setup_terminal() -> io::Result<TerminalHandle> {
    enable_raw_mode()?;
    let mut stdout = io::stdout();
    execute!(stdout, EnterAlternateScreen)?;
    let backend = CrosstermBackend::new(stdout);
    Terminal::new(backend)
}

fn restore_terminal(terminal: &mut TerminalHandle) -> io::Result<()> {
    disable_raw_mode()?;
    execute!(terminal.backend_mut(), LeaveAlternateScreen)?;
    terminal.show_cursor()
}

/// Reads terminal events on a blocking thread and forwards them to the loop.
fn spawn_input_thread() -> mpsc::UnboundedReceiver<Event> {
    let (input_tx, input_rx) = mpsc::unbounded_channel();
    thread::spawn(move || {
        while !input_tx.is_closed() {
            match event::poll(INPUT_POLL_INTERVAL) {
                Ok(false) => continue,
                Ok(true) => {}
                Err(err) => {
                    warn!("terminal poll failed: {}", err);
                    break;
                }
            }
            match event::read() {
                Ok(terminal_event) => {
                    if input_tx.send(terminal_event).is_err() {
                        break;
                    }
                }
                Err(err) => {
                    warn!("terminal read failed: {}", err);
                    break;
                }
            }
        }
    });
    input_rx
}

async fn event_loop(
    terminal: &mut TerminalHandle,
    client: &mut RoomClient<RoomChannel>,
    mut pushes: PushReceiver,
) -> Result<(), ClientError> {
    let mut inputs = spawn_input_thread();
    let mut view = ViewState::default();
    let mut replies = Replies::new();

    loop {
        terminal.draw(|frame| view::draw(frame, client, &view))?;

        // Replies first: an ack resolves before the pushes it caused are
        // forwarded, so those pushes find the room already joined.
        tokio::select! {
            biased;
            Some(reply) = replies.next(), if !replies.is_empty() => client.complete(reply),
            input = inputs.recv() => match input {
                Some(Event::Key(key)) => {
                    if handle_key(client, &mut view, key, &mut replies) == Flow::Quit {
                        return Ok(());
                    }
                }
                // Resize and the rest only need a redraw.
                Some(_) => {}
                None => return Ok(()),
            },
            push = pushes.recv(), if view.connected => match push {
                Some(push) => client.apply_push(push),
                None => {
                    warn!("server connection lost");
                    view.connected = false;
                    client.show_alert("Disconnected from server");
                }
            },
        }
    }
}

/// Applies one key press to the client. Room commands are queued on
/// `replies` and never awaited here.
pub fn handle_key<C: RoomCommands>(
    client: &mut RoomClient<C>,
    view: &mut ViewState,
    key: KeyEvent,
    replies: &mut Replies,
) -> Flow {
    // Release events would double every key press on Windows.
    if key.kind == KeyEventKind::Release {
        return Flow::Continue;
    }

    let ctrl = key.modifiers.contains(KeyModifiers::CONTROL);
    if ctrl && key.code == KeyCode::Char('c') {
        return Flow::Quit;
    }

    if client.alert().is_some() {
        if matches!(key.code, KeyCode::Esc | KeyCode::Enter) {
            client.dismiss_alert();
        }
        return Flow::Continue;
    }

    let joined = client.session().room().is_some();

    if ctrl {
        match key.code {
            KeyCode::Char('n') => replies.extend(client.begin_create_room()),
            KeyCode::Char('r') if joined => client.toggle_room_id(),
            KeyCode::Char('p') if joined => client.toggle_roster(),
            KeyCode::Char('y') if joined => copy_room_id(client),
            KeyCode::Char('l') => replies.extend(client.begin_leave_room()),
            _ => {}
        }
        return Flow::Continue;
    }

    match key.code {
        KeyCode::Tab if !joined => view.focus = view.focus.next(),
        KeyCode::Enter if joined => client.send_message(),
        KeyCode::Enter => replies.extend(client.begin_join_room()),
        KeyCode::Backspace => {
            focused_input(client, view).pop();
        }
        KeyCode::Char(ch) if !key.modifiers.contains(KeyModifiers::ALT) => {
            focused_input(client, view).push(ch);
        }
        _ => {}
    }
    Flow::Continue
}

fn focused_input<'a, C>(client: &'a mut RoomClient<C>, view: &ViewState) -> &'a mut String {
    if client.session().room().is_some() {
        return &mut client.draft;
    }
    match view.focus {
        Focus::Name => &mut client.name_input,
        Focus::RoomId => &mut client.room_id_input,
    }
}

fn copy_room_id<C>(client: &mut RoomClient<C>) {
    let Some(room_id) = client.session().room_id().map(str::to_owned) else {
        return;
    };
    let copied = arboard::Clipboard::new().and_then(|mut clipboard| clipboard.set_text(room_id));
    if let Err(err) = copied {
        warn!("failed to copy room id: {}", err);
        client.show_alert(ClientError::from(err).to_string());
    }
}
