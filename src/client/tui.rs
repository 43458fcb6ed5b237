use crossterm::event::{
    self, DisableFocusChange, EnableFocusChange, Event, KeyCode, KeyEvent, KeyEventKind,
    KeyModifiers,
};
use crossterm::execute;
use crossterm::terminal::{
    EnterAlternateScreen, LeaveAlternateScreen, disable_raw_mode, enable_raw_mode,
};
use ratatui::Terminal;
use ratatui::backend::CrosstermBackend;
use ratatui::layout::{Constraint, Layout};
use ratatui::style::{Color, Modifier, Style};
use ratatui::text::{Line, Span};
use ratatui::widgets::{Block, Paragraph, Wrap};
use std::io;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use crate::client::{ChatEntry, ChatKind, ChatLog, SessionView};
use crate::session::{ConnectionState, ManagerHandle};
use crate::terminal::StreamRenderer;

#[derive(thiserror::Error, Debug)]
pub enum UiError {
    #[error("terminal I/O error: {0}")]
    Io(#[from] io::Error),
}

struct UiState {
    chat: Mutex<ChatLog>,
    connection: Mutex<ConnectionState>,
    participants: AtomicU32,
    dirty: AtomicBool,
}

/// View implementation backed by shared state the draw loop reads.
pub struct TuiView {
    state: Arc<UiState>,
}

impl TuiView {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            state: Arc::new(UiState {
                chat: Mutex::new(ChatLog::new()),
                connection: Mutex::new(ConnectionState::Disconnected),
                participants: AtomicU32::new(0),
                dirty: AtomicBool::new(true),
            }),
        })
    }
}

impl SessionView for TuiView {
    fn connection_changed(&self, state: ConnectionState) {
        *self.state.connection.lock().unwrap() = state;
        self.state.dirty.store(true, Ordering::Relaxed);
    }

    fn chat_entry(&self, entry: ChatEntry) {
        self.state.chat.lock().unwrap().push(entry);
        self.state.dirty.store(true, Ordering::Relaxed);
    }

    fn participant_count(&self, count: u32) {
        self.state.participants.store(count, Ordering::Relaxed);
        self.state.dirty.store(true, Ordering::Relaxed);
    }

    fn scrollback_changed(&self) {
        self.state.dirty.store(true, Ordering::Relaxed);
    }
}

#[derive(Clone, Copy, PartialEq, Eq)]
enum InputMode {
    Command,
    Chat,
}

/// Blocking terminal shell: one pane for the shared scrollback, one for
/// chat, a status bar and a single input line that toggles between running
/// commands and chatting.
pub struct Tui {
    state: Arc<UiState>,
    renderer: Arc<Mutex<StreamRenderer>>,
    manager: ManagerHandle,
    input: String,
    mode: InputMode,
}

impl Tui {
    pub fn new(
        view: &TuiView,
        renderer: Arc<Mutex<StreamRenderer>>,
        manager: ManagerHandle,
    ) -> Self {
        Self {
            state: view.state.clone(),
            renderer,
            manager,
            input: String::new(),
            mode: InputMode::Command,
        }
    }

    pub fn run(mut self) -> Result<(), UiError> {
        enable_raw_mode()?;
        let mut stdout = io::stdout();
        execute!(stdout, EnterAlternateScreen, EnableFocusChange)?;
        let backend = CrosstermBackend::new(stdout);
        let mut terminal = Terminal::new(backend)?;

        let result = self.event_loop(&mut terminal);

        terminal.show_cursor().ok();
        disable_raw_mode()?;
        let mut stdout = io::stdout();
        execute!(stdout, LeaveAlternateScreen, DisableFocusChange)?;
        self.manager.shutdown();
        result
    }

    fn event_loop(
        &mut self,
        terminal: &mut Terminal<CrosstermBackend<io::Stdout>>,
    ) -> Result<(), UiError> {
        loop {
            if self.state.dirty.swap(false, Ordering::Relaxed) {
                self.draw(terminal)?;
            }
            if event::poll(Duration::from_millis(50))? {
                match event::read()? {
                    Event::Key(key) if key.kind == KeyEventKind::Press => {
                        if self.handle_key(key) {
                            return Ok(());
                        }
                        self.state.dirty.store(true, Ordering::Relaxed);
                    }
                    Event::FocusGained => self.manager.notify_visible(),
                    Event::Resize(_, _) => self.state.dirty.store(true, Ordering::Relaxed),
                    _ => {}
                }
            }
        }
    }

    fn handle_key(&mut self, key: KeyEvent) -> bool {
        match key.code {
            KeyCode::Esc => return true,
            KeyCode::Char('c') if key.modifiers.contains(KeyModifiers::CONTROL) => return true,
            KeyCode::Tab => {
                self.mode = match self.mode {
                    InputMode::Command => InputMode::Chat,
                    InputMode::Chat => InputMode::Command,
                };
            }
            KeyCode::Enter => self.submit(),
            KeyCode::Backspace => {
                self.input.pop();
            }
            KeyCode::Char(ch) => self.input.push(ch),
            _ => {}
        }
        false
    }

    fn submit(&mut self) {
        let text = std::mem::take(&mut self.input);
        if text.trim().is_empty() {
            return;
        }
        match self.mode {
            InputMode::Command => self.manager.send_command(text),
            InputMode::Chat => self.manager.send_chat(text),
        }
    }

    fn draw(
        &mut self,
        terminal: &mut Terminal<CrosstermBackend<io::Stdout>>,
    ) -> Result<(), UiError> {
        let connection = *self.state.connection.lock().unwrap();
        let participants = self.state.participants.load(Ordering::Relaxed);

        terminal.draw(|frame| {
            let [status_area, main_area, input_area] = Layout::vertical([
                Constraint::Length(1),
                Constraint::Min(1),
                Constraint::Length(3),
            ])
            .areas(frame.area());
            let [terminal_area, chat_area] =
                Layout::horizontal([Constraint::Percentage(68), Constraint::Percentage(32)])
                    .areas(main_area);

            let mut status = vec![
                Span::styled(" coshell ", Style::new().add_modifier(Modifier::BOLD)),
                Span::styled(connection.label(), status_style(connection)),
            ];
            if participants > 0 {
                status.push(Span::raw(format!(" · {participants} online")));
            }
            frame.render_widget(Paragraph::new(Line::from(status)), status_area);

            {
                let renderer = self.renderer.lock().unwrap();
                let lines = renderer.lines();
                let visible = terminal_area.height.saturating_sub(2) as usize;
                let start = lines.len().saturating_sub(visible);
                let text: Vec<Line> = lines[start..]
                    .iter()
                    .map(|line| Line::from(line.display().to_string()))
                    .collect();
                frame.render_widget(
                    Paragraph::new(text).block(Block::bordered().title(" terminal ")),
                    terminal_area,
                );
            }

            {
                let chat = self.state.chat.lock().unwrap();
                let visible = chat_area.height.saturating_sub(2) as usize;
                let skip = chat.len().saturating_sub(visible);
                let text: Vec<Line> = chat.entries().skip(skip).map(chat_line).collect();
                frame.render_widget(
                    Paragraph::new(text)
                        .wrap(Wrap { trim: false })
                        .block(Block::bordered().title(" chat ")),
                    chat_area,
                );
            }

            let input_title = match self.mode {
                InputMode::Command => " command · Tab for chat · Esc to quit ",
                InputMode::Chat => " chat · Tab for command · Esc to quit ",
            };
            frame.render_widget(
                Paragraph::new(self.input.as_str()).block(Block::bordered().title(input_title)),
                input_area,
            );
        })?;
        Ok(())
    }
}

fn status_style(state: ConnectionState) -> Style {
    let color = match state {
        ConnectionState::Connected => Color::Green,
        ConnectionState::Connecting | ConnectionState::Reconnecting => Color::Yellow,
        ConnectionState::Disconnected | ConnectionState::Failed => Color::Red,
    };
    Style::new().fg(color)
}

fn chat_line(entry: &ChatEntry) -> Line<'_> {
    match entry.kind {
        ChatKind::System => Line::from(Span::styled(
            entry.text.clone(),
            Style::new().fg(Color::Yellow),
        )),
        ChatKind::Input => Line::from(Span::styled(
            entry.text.clone(),
            Style::new().fg(Color::Cyan),
        )),
        ChatKind::Chat => {
            let sender = entry.sender.as_deref().unwrap_or("?");
            Line::from(vec![
                Span::styled(
                    format!("{sender}: "),
                    Style::new().add_modifier(Modifier::BOLD),
                ),
                Span::raw(entry.text.clone()),
            ])
        }
    }
}
