use crate::client::ChatClient;
use crate::conversation::{Applied, Conversation, SendRejected, Turn};
use crate::protocol::StreamFrame;
use crate::stream::StreamHandle;
use crossterm::cursor::MoveTo;
use crossterm::event::{self, Event, KeyCode, KeyModifiers};
use crossterm::execute;
use crossterm::terminal::{disable_raw_mode, enable_raw_mode, size};
use ratatui::backend::CrosstermBackend;
use ratatui::layout::{Constraint, Direction, Layout};
use ratatui::style::{Color, Modifier, Style};
use ratatui::text::{Line, Span, Text};
use ratatui::widgets::{Block, Borders, Paragraph, Widget, Wrap};
use ratatui::{Frame, Terminal, TerminalOptions, Viewport};
use std::io;
use std::io::Write;
use std::time::Duration;
use tokio::sync::mpsc;

type TuiTerminal = Terminal<CrosstermBackend<io::Stdout>>;
type UiResult<T> = Result<T, Box<dyn std::error::Error + Send + Sync>>;

const PREVIEW_HEIGHT: u16 = 3;
const INPUT_HEIGHT: u16 = 6;

// Restores terminal settings even if the loop exits early.
struct TerminalGuard;

impl Drop for TerminalGuard {
    fn drop(&mut self) {
        let _ = disable_raw_mode();
        let _ = io::stdout().flush();
    }
}

#[derive(Debug, Clone)]
struct LineSpec {
    text: String,
    style: Style,
}

impl LineSpec {
    fn new(text: impl Into<String>, style: Style) -> Self {
        Self {
            text: text.into(),
            style,
        }
    }
}

fn speaker_lines(label: &str, body: &str, color: Color) -> Vec<LineSpec> {
    let header_style = Style::default().fg(color).add_modifier(Modifier::BOLD);
    let body_style = Style::default().fg(color);
    let mut lines = vec![LineSpec::new(format!("{label}:"), header_style)];
    for line in body.lines() {
        lines.push(LineSpec::new(format!("  {}", line), body_style));
    }
    lines
}

fn line_specs(turn: &Turn, assistant: &str) -> Vec<LineSpec> {
    match turn {
        Turn::User(msg) => speaker_lines("You", msg, Color::Blue),
        Turn::Assistant(msg) => speaker_lines(assistant, msg, Color::Yellow),
        Turn::Notice(msg) => vec![LineSpec::new(
            format!("ℹ {}", msg),
            Style::default().fg(Color::Red).add_modifier(Modifier::ITALIC),
        )],
    }
}

fn to_text(specs: Vec<LineSpec>) -> Text<'static> {
    let lines = specs
        .into_iter()
        .map(|spec| Line::from(Span::styled(spec.text, spec.style)))
        .collect::<Vec<_>>();
    Text::from(lines)
}

fn rendered_height(specs: &[LineSpec], width: u16) -> u16 {
    let width = width.max(1) as usize;
    let total: usize = specs
        .iter()
        .map(|spec| spec.text.chars().count().max(1).div_ceil(width))
        .sum();
    u16::try_from(total).unwrap_or(u16::MAX)
}

/// Last `rows` wrapped rows of the reply that is still streaming in.
fn preview_tail(text: &str, width: u16, rows: usize) -> String {
    let width = width.max(1) as usize;
    let mut wrapped: Vec<String> = Vec::new();
    for line in text.split('\n') {
        let chars: Vec<char> = line.chars().collect();
        if chars.is_empty() {
            wrapped.push(String::new());
            continue;
        }
        for chunk in chars.chunks(width) {
            wrapped.push(chunk.iter().collect());
        }
    }
    let start = wrapped.len().saturating_sub(rows);
    wrapped[start..].join("\n")
}

#[derive(Debug)]
enum UiEvent {
    Frame(StreamFrame),
}

struct InputBuffer {
    lines: Vec<String>,
    cursor_x: usize,
    cursor_y: usize,
}

impl InputBuffer {
    fn new() -> Self {
        Self {
            lines: vec![String::new()],
            cursor_x: 0,
            cursor_y: 0,
        }
    }

    fn clear(&mut self) {
        self.lines = vec![String::new()];
        self.cursor_x = 0;
        self.cursor_y = 0;
    }

    fn byte_index(line: &str, cursor: usize) -> usize {
        line.char_indices()
            .nth(cursor)
            .map(|(idx, _)| idx)
            .unwrap_or(line.len())
    }

    fn line_chars(&self) -> usize {
        self.lines[self.cursor_y].chars().count()
    }

    fn insert_char(&mut self, c: char) {
        let line = &mut self.lines[self.cursor_y];
        let idx = Self::byte_index(line, self.cursor_x);
        line.insert(idx, c);
        self.cursor_x += 1;
    }

    fn delete_char(&mut self) {
        if self.cursor_x > 0 {
            let line = &mut self.lines[self.cursor_y];
            let idx = Self::byte_index(line, self.cursor_x - 1);
            line.remove(idx);
            self.cursor_x -= 1;
        } else if self.cursor_y > 0 {
            let removed = self.lines.remove(self.cursor_y);
            self.cursor_y -= 1;
            self.cursor_x = self.line_chars();
            self.lines[self.cursor_y].push_str(&removed);
        }
    }

    fn new_line(&mut self) {
        let line = &self.lines[self.cursor_y];
        let remaining: String = line.chars().skip(self.cursor_x).collect();
        self.lines[self.cursor_y] = line.chars().take(self.cursor_x).collect();
        self.lines.insert(self.cursor_y + 1, remaining);
        self.cursor_y += 1;
        self.cursor_x = 0;
    }

    fn move_left(&mut self) {
        if self.cursor_x > 0 {
            self.cursor_x -= 1;
        } else if self.cursor_y > 0 {
            self.cursor_y -= 1;
            self.cursor_x = self.line_chars();
        }
    }

    fn move_right(&mut self) {
        if self.cursor_x < self.line_chars() {
            self.cursor_x += 1;
        } else if self.cursor_y < self.lines.len() - 1 {
            self.cursor_y += 1;
            self.cursor_x = 0;
        }
    }

    fn to_string(&self) -> String {
        self.lines.join("\n")
    }

    fn is_empty(&self) -> bool {
        self.lines.iter().all(|l| l.is_empty())
    }

    fn render(&self) -> Text<'static> {
        if self.is_empty() {
            return Text::from(Span::styled(
                "Type your message here...",
                Style::default().fg(Color::DarkGray),
            ));
        }
        Text::from(
            self.lines
                .iter()
                .map(|l| Line::from(l.clone()))
                .collect::<Vec<_>>(),
        )
    }
}

pub struct App {
    client: ChatClient,
    conversation: Conversation,
    assistant_label: String,
    input: InputBuffer,
    should_quit: bool,
    sender: mpsc::UnboundedSender<UiEvent>,
    receiver: mpsc::UnboundedReceiver<UiEvent>,
    active: Option<StreamHandle>,
    printed: usize,
}

impl App {
    pub fn new(client: ChatClient, conversation: Conversation) -> Self {
        let (sender, receiver) = mpsc::unbounded_channel();
        let assistant_label = match conversation.persona_id() {
            Some(id) => format!("Persona #{id}"),
            None => "Assistant".to_string(),
        };

        Self {
            client,
            conversation,
            assistant_label,
            input: InputBuffer::new(),
            should_quit: false,
            sender,
            receiver,
            active: None,
            printed: 0,
        }
    }

    fn draw(&mut self, f: &mut Frame) {
        let area = f.area();
        let [preview_area, input_area] = Layout::default()
            .direction(Direction::Vertical)
            .constraints([Constraint::Length(PREVIEW_HEIGHT), Constraint::Min(3)])
            .areas(area);

        let preview = match self.conversation.pending_reply() {
            Some(partial) => Paragraph::new(preview_tail(
                partial,
                preview_area.width,
                PREVIEW_HEIGHT as usize,
            ))
            .style(Style::default().fg(Color::Yellow)),
            None => Paragraph::new(match self.conversation.session_id() {
                Some(session) => format!("session {session}"),
                None => "new session".to_string(),
            })
            .style(Style::default().fg(Color::DarkGray)),
        };
        f.render_widget(preview, preview_area);

        let title = if self.conversation.is_streaming() {
            " Input (Enter to send, Esc to quit) [Streaming...] "
        } else {
            " Input (Enter to send, Esc to quit) "
        };
        let input_paragraph = Paragraph::new(self.input.render())
            .block(
                Block::default()
                    .borders(Borders::ALL)
                    .title(title)
                    .border_style(Style::default().fg(Color::DarkGray)),
            )
            .wrap(Wrap { trim: false });
        f.render_widget(input_paragraph, input_area);

        let cursor_x = (self.input.cursor_x + 1) as u16;
        let cursor_y = self.input.cursor_y as u16;
        let x = (input_area.x + cursor_x).min(input_area.x + input_area.width.saturating_sub(2));
        let y = (input_area.y + 1 + cursor_y).min(input_area.y + input_area.height.saturating_sub(2));
        f.set_cursor_position((x, y));
    }

    /// Print finished turns above the inline viewport so they stay in scrollback.
    fn flush_turns(&mut self, terminal: &mut TuiTerminal) -> UiResult<()> {
        let width = terminal.size()?.width;
        while self.printed < self.conversation.turns().len() {
            let specs = line_specs(
                &self.conversation.turns()[self.printed],
                &self.assistant_label,
            );
            let height = rendered_height(&specs, width).saturating_add(1);
            let mut text = to_text(specs);
            text.extend(Text::raw("\n"));
            terminal.insert_before(height, |buf| {
                let paragraph = Paragraph::new(text).wrap(Wrap { trim: false });
                paragraph.render(buf.area, buf);
            })?;
            self.printed += 1;
        }
        Ok(())
    }

    fn send(&mut self) {
        let msg = self.input.to_string();
        let request = match self.conversation.begin_send(&msg) {
            Ok(request) => request,
            Err(SendRejected::Busy) | Err(SendRejected::Empty) => return,
        };
        self.input.clear();

        let sender = self.sender.clone();
        self.active = Some(self.client.open(request, move |frame| {
            let _ = sender.send(UiEvent::Frame(frame));
        }));
    }

    fn handle_events(&mut self, terminal: &mut TuiTerminal) -> UiResult<bool> {
        while let Ok(event) = self.receiver.try_recv() {
            match event {
                UiEvent::Frame(frame) => match self.conversation.apply(frame) {
                    Applied::Completed { .. } | Applied::Failed { .. } => {
                        self.active = None;
                    }
                    Applied::Fragment | Applied::Ignored => {}
                },
            }
        }
        self.flush_turns(terminal)?;

        if event::poll(Duration::from_millis(50))? {
            if let Event::Key(key) = event::read()? {
                if key.modifiers.contains(KeyModifiers::CONTROL) && key.code == KeyCode::Char('c')
                {
                    self.should_quit = true;
                    return Ok(false);
                }

                match key.code {
                    KeyCode::Esc => {
                        self.should_quit = true;
                        return Ok(false);
                    }
                    KeyCode::Enter => {
                        if key.modifiers.contains(KeyModifiers::SHIFT) {
                            self.input.new_line();
                        } else if !self.input.is_empty() {
                            self.send();
                            self.flush_turns(terminal)?;
                        }
                    }
                    KeyCode::Char(c) => {
                        self.input.insert_char(c);
                    }
                    KeyCode::Backspace => {
                        self.input.delete_char();
                    }
                    KeyCode::Left => {
                        self.input.move_left();
                    }
                    KeyCode::Right => {
                        self.input.move_right();
                    }
                    KeyCode::Home => {
                        self.input.cursor_x = 0;
                    }
                    KeyCode::End => {
                        self.input.cursor_x = self.input.line_chars();
                    }
                    _ => {}
                }
            }
        }

        Ok(true)
    }

    fn shutdown(&mut self, terminal: &mut TuiTerminal) -> UiResult<()> {
        if let Some(mut handle) = self.active.take() {
            handle.dispose();
            self.conversation.abandon();
        }
        self.flush_turns(terminal)
    }
}

pub fn run_tui(client: ChatClient, conversation: Conversation) -> UiResult<Option<String>> {
    enable_raw_mode()?;
    let _guard = TerminalGuard;

    let mut stdout = io::stdout();
    let (_, rows) = size()?;
    if rows > 0 {
        // Push existing screen content into scrollback without clearing it.
        for _ in 0..rows {
            writeln!(stdout)?;
        }
        stdout.flush()?;
    }
    execute!(stdout, MoveTo(0, 0))?;
    let backend = CrosstermBackend::new(stdout);
    let mut terminal = Terminal::with_options(
        backend,
        TerminalOptions {
            viewport: Viewport::Inline(PREVIEW_HEIGHT + INPUT_HEIGHT),
        },
    )?;

    let mut app = App::new(client, conversation);
    terminal.draw(|f| app.draw(f))?;

    while !app.should_quit {
        if !app.handle_events(&mut terminal)? {
            break;
        }

        terminal.draw(|f| app.draw(f))?;

        std::thread::sleep(Duration::from_millis(10));
    }

    app.shutdown(&mut terminal)?;
    disable_raw_mode()?;
    io::stdout().flush()?;

    Ok(app.conversation.session_id().map(str::to_string))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn input_buffer_shift_enter_inserts_new_line() {
        let mut buffer = InputBuffer::new();
        for ch in "hello".chars() {
            buffer.insert_char(ch);
        }
        buffer.new_line();
        for ch in "world".chars() {
            buffer.insert_char(ch);
        }

        assert_eq!(buffer.to_string(), "hello\nworld");
        assert_eq!(buffer.lines.len(), 2);
        assert_eq!(buffer.cursor_y, 1);
    }

    #[test]
    fn input_buffer_edits_multibyte_text_by_character() {
        let mut buffer = InputBuffer::new();
        for ch in "héllo".chars() {
            buffer.insert_char(ch);
        }
        buffer.move_left();
        buffer.move_left();
        buffer.delete_char();
        assert_eq!(buffer.to_string(), "hélo");
        assert_eq!(buffer.cursor_x, 2);
    }

    #[test]
    fn preview_shows_only_the_last_wrapped_rows() {
        assert_eq!(preview_tail("abcdefgh", 3, 2), "def\ngh");
        assert_eq!(preview_tail("one\ntwo\nthree", 10, 2), "two\nthree");
        assert_eq!(preview_tail("", 10, 2), "");
    }

    #[test]
    fn turn_rendering_labels_the_speaker() {
        let specs = line_specs(&Turn::Assistant("Hi\nthere".to_string()), "Persona #2");
        let texts: Vec<&str> = specs.iter().map(|s| s.text.as_str()).collect();
        assert_eq!(texts, vec!["Persona #2:", "  Hi", "  there"]);
        assert_eq!(rendered_height(&specs, 80), 3);
    }
}
