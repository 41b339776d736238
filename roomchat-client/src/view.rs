//! Terminal rendering of a [`RoomClient`].
//!
//! Drawing never mutates the client. Everything shown comes from the session,
//! the inputs, the two visibility toggles and the pending alert.

use ratatui::{
    Frame,
    layout::{Alignment, Constraint, Layout, Rect},
    style::{Color, Modifier, Style},
    text::{Line, Span},
    widgets::{Block, Borders, Clear, List, ListItem, Paragraph, Wrap},
};
use roomchat_core::ChatMessage;

use crate::controller::RoomClient;

const TITLE: &str = "RoomChat";
const ALERT_WIDTH: u16 = 50;
const ALERT_HEIGHT: u16 = 7;

const STYLE_FOCUSED: Style = Style::new().fg(Color::Yellow);
const STYLE_HINT: Style = Style::new().fg(Color::DarkGray);
const STYLE_SYSTEM: Style = Style::new().fg(Color::DarkGray).add_modifier(Modifier::ITALIC);
const STYLE_OWN: Style = Style::new().fg(Color::Cyan);
const STYLE_SENDER: Style = Style::new().add_modifier(Modifier::BOLD);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MessageKind {
    Own,
    System,
    Peer,
}

pub fn message_kind(message: &ChatMessage, username: &str) -> MessageKind {
    if message.sender == username {
        MessageKind::Own
    } else if message.is_system() {
        MessageKind::System
    } else {
        MessageKind::Peer
    }
}

pub fn room_id_toggle_label(shown: bool) -> &'static str {
    if shown { "Hide Room ID" } else { "Show Room ID" }
}

pub fn roster_toggle_label(shown: bool) -> &'static str {
    if shown { "Hide Name" } else { "Show Name" }
}

/// Which lobby input receives typed characters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum Focus {
    #[default]
    Name,
    RoomId,
}

impl Focus {
    pub fn next(self) -> Self {
        match self {
            Focus::Name => Focus::RoomId,
            Focus::RoomId => Focus::Name,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ViewState {
    pub focus: Focus,
    pub connected: bool,
}

impl Default for ViewState {
    fn default() -> Self {
        Self {
            focus: Focus::Name,
            connected: true,
        }
    }
}

pub fn draw<C>(frame: &mut Frame, client: &RoomClient<C>, view: &ViewState) {
    let area = frame.area();
    let cursor = if client.session().room().is_some() {
        draw_room(frame, area, client, view)
    } else {
        draw_lobby(frame, area, client, view)
    };

    match client.alert() {
        Some(message) => draw_alert(frame, area, message),
        None => {
            if let Some(position) = cursor {
                frame.set_cursor_position(position);
            }
        }
    }
}

fn draw_lobby<C>(
    frame: &mut Frame,
    area: Rect,
    client: &RoomClient<C>,
    view: &ViewState,
) -> Option<(u16, u16)> {
    let chunks = Layout::vertical([
        Constraint::Min(0),
        Constraint::Length(2),
        Constraint::Length(3),
        Constraint::Length(3),
        Constraint::Length(2),
        Constraint::Min(0),
    ])
    .split(area);

    let title = Paragraph::new(vec![
        Line::styled(TITLE, STYLE_SENDER.fg(Color::Blue)),
        connection_line(view.connected),
    ])
    .alignment(Alignment::Center);
    frame.render_widget(title, chunks[1]);

    let name_area = centered_columns(chunks[2], 50);
    let room_area = centered_columns(chunks[3], 50);
    frame.render_widget(
        input_field("Name", &client.name_input, view.focus == Focus::Name, name_area),
        name_area,
    );
    frame.render_widget(
        input_field(
            "Room ID",
            &client.room_id_input,
            view.focus == Focus::RoomId,
            room_area,
        ),
        room_area,
    );

    let hint = if client.is_waiting() {
        "Waiting for server...  [Ctrl+C] Quit"
    } else {
        "[Ctrl+N] Create Room  [Enter] Join Room  [Tab] Switch field  [Ctrl+C] Quit"
    };
    let hints = Paragraph::new(Line::styled(hint, STYLE_HINT))
    .alignment(Alignment::Center)
    .wrap(Wrap { trim: true });
    frame.render_widget(hints, chunks[4]);

    let (focused_area, text) = match view.focus {
        Focus::Name => (name_area, &client.name_input),
        Focus::RoomId => (room_area, &client.room_id_input),
    };
    input_cursor(focused_area, text)
}

fn draw_room<C>(
    frame: &mut Frame,
    area: Rect,
    client: &RoomClient<C>,
    view: &ViewState,
) -> Option<(u16, u16)> {
    let session = client.session();
    let roster = session.roster();

    let room_id_height = if client.show_room_id() { 1 } else { 0 };
    let roster_height = if client.show_roster() {
        u16::try_from(roster.len())
            .unwrap_or(u16::MAX)
            .saturating_add(2)
    } else {
        0
    };

    let chunks = Layout::vertical([
        Constraint::Length(1),
        Constraint::Length(room_id_height),
        Constraint::Length(roster_height),
        Constraint::Min(3),
        Constraint::Length(3),
    ])
    .split(area);

    let mut header = vec![Span::styled(TITLE, STYLE_SENDER.fg(Color::Blue)), Span::raw("  ")];
    header.extend(connection_line(view.connected).spans);
    header.extend([
        Span::raw("  "),
        Span::styled("[Ctrl+R] ", STYLE_HINT),
        Span::raw(room_id_toggle_label(client.show_room_id())),
        Span::raw("  "),
        Span::styled("[Ctrl+P] ", STYLE_HINT),
        Span::raw(roster_toggle_label(client.show_roster())),
        Span::raw("  "),
        Span::styled("[Ctrl+L] ", STYLE_HINT),
        Span::raw("Leave Room"),
    ]);
    frame.render_widget(Paragraph::new(Line::from(header)), chunks[0]);

    if client.show_room_id() {
        let line = Line::from(vec![
            Span::raw("Room ID: "),
            Span::styled(session.room_id().unwrap_or_default(), STYLE_SENDER),
            Span::styled("  [Ctrl+Y] Copy", STYLE_HINT),
        ]);
        frame.render_widget(Paragraph::new(line), chunks[1]);
    }

    if client.show_roster() {
        let items: Vec<ListItem> = roster
            .iter()
            .map(|entry| ListItem::new(entry.name.as_str()))
            .collect();
        let list = List::new(items).block(
            Block::default()
                .borders(Borders::ALL)
                .title(format!("Players ({})", roster.len())),
        );
        frame.render_widget(list, chunks[2]);
    }

    let chat_block = Block::default().borders(Borders::ALL).title("Chat");
    let chat_inner = chat_block.inner(chunks[3]);
    let lines: Vec<Line> = session
        .chat()
        .iter()
        .map(|message| chat_line(message, session.username()))
        .collect();
    let chat = Paragraph::new(lines).wrap(Wrap { trim: false });

    // Pin the newest rows to the bottom, counted after wrapping.
    let rows = chat.line_count(chat_inner.width);
    let scroll = rows.saturating_sub(usize::from(chat_inner.height));
    let scroll = u16::try_from(scroll).unwrap_or(u16::MAX);
    frame.render_widget(chat.block(chat_block).scroll((scroll, 0)), chunks[3]);

    frame.render_widget(
        input_field("Message", &client.draft, true, chunks[4]),
        chunks[4],
    );
    input_cursor(chunks[4], &client.draft)
}

fn chat_line<'a>(message: &'a ChatMessage, username: &str) -> Line<'a> {
    match message_kind(message, username) {
        MessageKind::Own => {
            Line::styled(message.message.as_str(), STYLE_OWN).alignment(Alignment::Right)
        }
        MessageKind::System => Line::styled(message.message.as_str(), STYLE_SYSTEM),
        MessageKind::Peer => Line::from(vec![
            Span::styled(format!("{}: ", message.sender), STYLE_SENDER),
            Span::raw(message.message.as_str()),
        ]),
    }
}

fn connection_line(connected: bool) -> Line<'static> {
    if connected {
        Line::styled("connected", Style::new().fg(Color::Green))
    } else {
        Line::styled("disconnected", Style::new().fg(Color::Red))
    }
}

fn input_field<'a>(title: &'a str, text: &'a str, focused: bool, area: Rect) -> Paragraph<'a> {
    let block = Block::default().borders(Borders::ALL).title(title);
    let block = if focused {
        block.border_style(STYLE_FOCUSED)
    } else {
        block
    };

    // Keep the tail of long input visible.
    let inner_width = area.width.saturating_sub(2) as usize;
    let typed = text.chars().count();
    let offset = (typed + 1).saturating_sub(inner_width).min(u16::MAX as usize) as u16;
    Paragraph::new(text).block(block).scroll((0, offset))
}

fn input_cursor(area: Rect, text: &str) -> Option<(u16, u16)> {
    if area.width < 3 || area.height < 3 {
        return None;
    }
    let inner_width = area.width - 2;
    let typed = text.chars().count().min(u16::MAX as usize) as u16;
    Some((area.x + 1 + typed.min(inner_width - 1), area.y + 1))
}

fn draw_alert(frame: &mut Frame, area: Rect, message: &str) {
    let popup = centered_rect(area, ALERT_WIDTH, ALERT_HEIGHT);
    let text = vec![
        Line::raw(message),
        Line::raw(""),
        Line::styled("[Enter] OK", STYLE_HINT),
    ];
    let dialog = Paragraph::new(text)
        .alignment(Alignment::Center)
        .wrap(Wrap { trim: true })
        .block(
            Block::default()
                .borders(Borders::ALL)
                .border_style(STYLE_FOCUSED)
                .title("Alert"),
        );

    frame.render_widget(Clear, popup);
    frame.render_widget(dialog, popup);
}

fn centered_columns(area: Rect, width: u16) -> Rect {
    let width = width.min(area.width);
    Rect {
        x: area.x + (area.width - width) / 2,
        width,
        ..area
    }
}

fn centered_rect(area: Rect, width: u16, height: u16) -> Rect {
    let width = width.min(area.width);
    let height = height.min(area.height);
    Rect {
        x: area.x + (area.width - width) / 2,
        y: area.y + (area.height - height) / 2,
        width,
        height,
    }
}

#[cfg(test)]
mod tests {
    use ratatui::{Terminal, backend::TestBackend};
    use roomchat_core::{Ack, ChatPush, CreateRoomAck, PlayerList, Push, RosterEntry};

    use super::*;
    use crate::controller::fake::FakeCommands;

    fn render(client: &RoomClient<FakeCommands>, view: &ViewState) -> Vec<String> {
        render_sized(client, view, 100, 24)
    }

    fn render_sized(
        client: &RoomClient<FakeCommands>,
        view: &ViewState,
        width: u16,
        height: u16,
    ) -> Vec<String> {
        let mut terminal = Terminal::new(TestBackend::new(width, height)).expect("test terminal");
        terminal
            .draw(|frame| draw(frame, client, view))
            .expect("draw");
        let buffer = terminal.backend().buffer();
        buffer
            .content
            .chunks(buffer.area.width as usize)
            .map(|row| row.iter().map(|cell| cell.symbol()).collect::<String>())
            .collect()
    }

    fn contains(rows: &[String], needle: &str) -> bool {
        rows.iter().any(|row| row.contains(needle))
    }

    fn chat(sender: &str, message: &str) -> ChatMessage {
        ChatMessage {
            sender: sender.to_owned(),
            message: message.to_owned(),
        }
    }

    async fn joined_client() -> RoomClient<FakeCommands> {
        let mut client = RoomClient::new(FakeCommands::default()).with_inputs("Alice", "");
        client.commands().reply(Ok(Ack::CreateRoom(CreateRoomAck {
            room_id: "ABC123".to_owned(),
        })));
        client.create_room().await;
        client.apply_push(Push::PlayerList(PlayerList {
            room_id: "ABC123".to_owned(),
            players: vec![
                RosterEntry {
                    id: "1".to_owned(),
                    name: "Alice".to_owned(),
                },
                RosterEntry {
                    id: "2".to_owned(),
                    name: "Bob".to_owned(),
                },
            ],
        }));
        for (sender, message) in [
            ("System", "Bob joined the room"),
            ("Bob", "hey there"),
            ("Alice", "hello bob"),
        ] {
            client.apply_push(Push::ChatMessage(ChatPush {
                room_id: "ABC123".to_owned(),
                sender: sender.to_owned(),
                message: message.to_owned(),
            }));
        }
        client
    }

    #[test]
    fn classifies_messages_by_sender() {
        assert_eq!(message_kind(&chat("Alice", "hi"), "Alice"), MessageKind::Own);
        assert_eq!(
            message_kind(&chat("System", "Bob joined the room"), "Alice"),
            MessageKind::System
        );
        assert_eq!(message_kind(&chat("Bob", "yo"), "Alice"), MessageKind::Peer);
    }

    #[test]
    fn toggle_labels_follow_visibility() {
        assert_eq!(room_id_toggle_label(false), "Show Room ID");
        assert_eq!(room_id_toggle_label(true), "Hide Room ID");
        assert_eq!(roster_toggle_label(false), "Show Name");
        assert_eq!(roster_toggle_label(true), "Hide Name");
    }

    #[test]
    fn focus_cycles_between_lobby_inputs() {
        assert_eq!(Focus::Name.next(), Focus::RoomId);
        assert_eq!(Focus::RoomId.next(), Focus::Name);
    }

    #[test]
    fn lobby_shows_both_inputs_and_hints() {
        let client = RoomClient::new(FakeCommands::default()).with_inputs("Alice", "XYZ789");
        let rows = render(&client, &ViewState::default());

        assert!(contains(&rows, TITLE));
        assert!(contains(&rows, "Name"));
        assert!(contains(&rows, "Alice"));
        assert!(contains(&rows, "XYZ789"));
        assert!(contains(&rows, "Create Room"));
        assert!(!contains(&rows, "Leave Room"));
    }

    #[tokio::test]
    async fn room_hides_id_and_roster_until_toggled() {
        let mut client = joined_client().await;

        let rows = render(&client, &ViewState::default());
        assert!(contains(&rows, "Show Room ID"));
        assert!(contains(&rows, "Show Name"));
        assert!(contains(&rows, "Leave Room"));
        assert!(!contains(&rows, "Room ID: ABC123"));
        assert!(!contains(&rows, "Players (2)"));

        client.toggle_room_id();
        client.toggle_roster();
        let rows = render(&client, &ViewState::default());
        assert!(contains(&rows, "Hide Room ID"));
        assert!(contains(&rows, "Hide Name"));
        assert!(contains(&rows, "Room ID: ABC123"));
        assert!(contains(&rows, "Players (2)"));
        assert!(contains(&rows, "Bob"));
    }

    #[tokio::test]
    async fn chat_lines_are_styled_by_kind() {
        let client = joined_client().await;
        let rows = render(&client, &ViewState::default());

        assert!(contains(&rows, "Bob: hey there"));
        assert!(contains(&rows, "Bob joined the room"));
        assert!(!contains(&rows, "System:"));
        assert!(contains(&rows, "hello bob"));
        assert!(!contains(&rows, "Alice: hello bob"));

        let own_row = rows
            .iter()
            .find(|row| row.contains("hello bob"))
            .expect("own message rendered");
        let peer_row = rows
            .iter()
            .find(|row| row.contains("hey there"))
            .expect("peer message rendered");
        assert!(own_row.find("hello bob") > peer_row.find("hey there"));
    }

    fn push_chat(client: &mut RoomClient<FakeCommands>, sender: &str, message: &str) {
        client.apply_push(Push::ChatMessage(ChatPush {
            room_id: "ABC123".to_owned(),
            sender: sender.to_owned(),
            message: message.to_owned(),
        }));
    }

    #[tokio::test]
    async fn long_messages_wrap_and_keep_their_end_visible() {
        let mut client = joined_client().await;
        let long = format!("{}tail-end", "word ".repeat(30));
        assert!(long.len() > 150);
        push_chat(&mut client, "Bob", &long);

        let rows = render_sized(&client, &ViewState::default(), 80, 24);
        assert!(contains(&rows, "Bob: word"));
        assert!(contains(&rows, "tail-end"));
    }

    #[tokio::test]
    async fn chat_scrolls_by_wrapped_rows() {
        let mut client = joined_client().await;
        for index in 0..20 {
            push_chat(&mut client, "Bob", &format!("line-{index:02}"));
        }
        push_chat(&mut client, "Bob", &format!("{}tail-end", "word ".repeat(30)));

        let rows = render_sized(&client, &ViewState::default(), 80, 24);
        assert!(contains(&rows, "tail-end"));
        assert!(contains(&rows, "line-19"));
        assert!(!contains(&rows, "line-00"));
    }

    #[tokio::test]
    async fn huge_roster_does_not_overflow_the_layout() {
        let mut client = joined_client().await;
        let players = (0..usize::from(u16::MAX))
            .map(|index| RosterEntry {
                id: index.to_string(),
                name: format!("player-{index}"),
            })
            .collect();
        client.apply_push(Push::PlayerList(PlayerList {
            room_id: "ABC123".to_owned(),
            players,
        }));
        client.toggle_roster();

        let rows = render(&client, &ViewState::default());
        assert!(contains(&rows, "Players (65535)"));
    }

    #[test]
    fn lobby_shows_waiting_hint_while_a_request_is_pending() {
        let mut client = RoomClient::new(FakeCommands::default()).with_inputs("Alice", "");
        let _pending = client.begin_create_room().expect("create queued");

        let rows = render(&client, &ViewState::default());
        assert!(contains(&rows, "Waiting for server..."));
        assert!(!contains(&rows, "[Ctrl+N] Create Room"));
    }

    #[test]
    fn alert_is_drawn_over_the_lobby() {
        let mut client = RoomClient::new(FakeCommands::default());
        client.show_alert("Enter your name");
        let rows = render(&client, &ViewState::default());

        assert!(contains(&rows, "Alert"));
        assert!(contains(&rows, "Enter your name"));
        assert!(contains(&rows, "[Enter] OK"));
    }

    #[test]
    fn disconnected_state_is_visible() {
        let client = RoomClient::new(FakeCommands::default());
        let view = ViewState {
            connected: false,
            ..ViewState::default()
        };
        assert!(contains(&render(&client, &view), "disconnected"));
    }
}
