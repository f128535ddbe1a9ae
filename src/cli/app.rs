use super::autocomplete::Autocompleter;
use super::ui;
use crossterm::{
    event::{
        self, DisableMouseCapture, EnableMouseCapture, Event, KeyCode, KeyEvent, KeyEventKind,
        KeyModifiers,
    },
    execute,
    terminal::{EnterAlternateScreen, LeaveAlternateScreen, disable_raw_mode, enable_raw_mode},
};
use graph_studio::{
    ClientState, Notification, NotificationKind, Response, SessionState, TransactionConfig,
    TransactionState,
};
use ratatui::{
    Terminal,
    backend::{Backend, CrosstermBackend},
    style::{Color, Modifier, Style},
    text::{Line, Span},
};
use std::io;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use tokio::sync::{broadcast, mpsc};
use tui_textarea::{Input, Key, TextArea};

const TICK: Duration = Duration::from_millis(50);
/// Output lines kept in memory; older ones are dropped
const MAX_MESSAGES: usize = 2_000;

/// Snapshot of the connection state drawn in the status bar
pub struct Status {
    pub address: String,
    pub database: Option<String>,
    pub session_type: String,
    pub transaction_type: String,
    pub session_open: bool,
    pub transaction_open: bool,
    pub running: bool,
    pub stopping: bool,
    /// (name, activated, enabled) per toggle
    pub toggles: Vec<(&'static str, bool, bool)>,
}

pub struct App<'a> {
    pub textarea: TextArea<'a>,
    pub messages: Vec<Line<'static>>,
    pub client: Arc<ClientState>,
    pub exit: bool,

    // Autocomplete State
    pub autocompleter: Autocompleter,
    pub suggestions: Vec<String>,
    pub suggestion_index: usize,
    pub popup_open: bool,

    responses_tx: mpsc::UnboundedSender<Response>,
    responses_rx: mpsc::UnboundedReceiver<Response>,
    notifications: broadcast::Receiver<Notification>,
    schema_stale: Arc<AtomicBool>,
}

impl<'a> App<'a> {
    pub fn new(client: Arc<ClientState>) -> Self {
        let (responses_tx, responses_rx) = mpsc::unbounded_channel();
        let notifications = client.notifier().subscribe();
        let schema_stale = Arc::new(AtomicBool::new(true));

        if let Some(session) = client.session() {
            let stale = Arc::clone(&schema_stale);
            session.on_open(move |_is_new_db| stale.store(true, Ordering::SeqCst));
            let stale = Arc::clone(&schema_stale);
            session
                .transaction()
                .on_schema_write(move |()| stale.store(true, Ordering::SeqCst));
        }

        let mut app = Self {
            textarea: Self::new_textarea(),
            messages: vec![
                Line::from(vec![Span::styled(
                    "Welcome to Graph Studio!",
                    Style::default()
                        .fg(Color::Cyan)
                        .add_modifier(Modifier::BOLD),
                )]),
                Line::from("Ctrl+E run | Ctrl+S stop | Ctrl+K commit | Ctrl+R rollback | Ctrl+T close transaction"),
                Line::from("F2 session type | F3 transaction type | F4 next database | F5 snapshot | F6 infer | F7 explain"),
                Line::from("-".repeat(50)),
            ],
            client,
            exit: false,
            autocompleter: Autocompleter::new(),
            suggestions: Vec::new(),
            suggestion_index: 0,
            popup_open: false,
            responses_tx,
            responses_rx,
            notifications,
            schema_stale,
        };
        // Notifications raised while connecting, before the subscription existed
        for notification in app.client.notifier().queue() {
            app.push_notification(&notification);
        }
        app
    }

    fn new_textarea() -> TextArea<'static> {
        let mut textarea = TextArea::default();
        textarea.set_placeholder_text(
            "Enter query (Press 'Ctrl+E' to run, 'Tab' for autocomplete, 'Esc' to quit)",
        );
        textarea.set_block(
            ratatui::widgets::Block::default()
                .borders(ratatui::widgets::Borders::ALL)
                .title(" Query "),
        );
        textarea
    }

    fn reset_textarea(&mut self) {
        self.textarea = Self::new_textarea();
    }

    fn session(&self) -> Option<Arc<SessionState>> {
        self.client.session()
    }

    fn transaction(&self) -> Option<Arc<TransactionState>> {
        self.session().map(|s| Arc::clone(s.transaction()))
    }

    pub fn status(&self) -> Status {
        let address = self
            .client
            .config()
            .map(|c| c.address())
            .unwrap_or_else(|| "not connected".to_string());
        let Some(session) = self.session() else {
            return Status {
                address,
                database: None,
                session_type: "-".into(),
                transaction_type: "-".into(),
                session_open: false,
                transaction_open: false,
                running: false,
                stopping: false,
                toggles: Vec::new(),
            };
        };
        let tx = session.transaction();
        let toggles = [
            ("snapshot", TransactionConfig::Snapshot),
            ("infer", TransactionConfig::Infer),
            ("explain", TransactionConfig::Explain),
        ]
        .into_iter()
        .map(|(name, config)| {
            let view = tx.config(config);
            (name, view.activated(), view.enabled())
        })
        .collect();

        Status {
            address,
            database: session.database(),
            session_type: session.session_type().to_string(),
            transaction_type: tx.transaction_type().to_string(),
            session_open: session.is_open(),
            transaction_open: tx.is_open(),
            running: tx.has_running_query(),
            stopping: tx.has_stop_signal(),
            toggles,
        }
    }

    pub async fn run(&mut self) -> anyhow::Result<()> {
        // Setup terminal
        enable_raw_mode()?;
        let mut stdout = io::stdout();
        execute!(stdout, EnterAlternateScreen, EnableMouseCapture)?;
        let backend = CrosstermBackend::new(stdout);
        let mut terminal = Terminal::new(backend)?;

        let res = self.run_loop(&mut terminal).await;

        // Restore terminal
        disable_raw_mode()?;
        execute!(
            terminal.backend_mut(),
            LeaveAlternateScreen,
            DisableMouseCapture
        )?;
        terminal.show_cursor()?;

        self.client.disconnect().await;
        res?;
        Ok(())
    }

    async fn run_loop<B: Backend>(&mut self, terminal: &mut Terminal<B>) -> io::Result<()> {
        loop {
            self.drain_background();
            terminal.draw(|f| ui::draw(f, self))?;

            // Poll so answers from running queries keep flowing in
            if !event::poll(TICK)? {
                tokio::task::yield_now().await;
                continue;
            }
            if let Event::Key(key) = event::read()? {
                if key.kind == KeyEventKind::Press {
                    self.handle_key(key);
                }
            }
            if self.exit {
                return Ok(());
            }
        }
    }

    fn handle_key(&mut self, key: KeyEvent) {
        // Navigation inside Popup
        if self.popup_open {
            match key.code {
                KeyCode::Down => {
                    if !self.suggestions.is_empty() {
                        self.suggestion_index = (self.suggestion_index + 1) % self.suggestions.len();
                    }
                    return;
                }
                KeyCode::Up => {
                    if !self.suggestions.is_empty() {
                        self.suggestion_index = (self.suggestion_index + self.suggestions.len() - 1)
                            % self.suggestions.len();
                    }
                    return;
                }
                KeyCode::Enter | KeyCode::Tab => {
                    self.accept_suggestion();
                    return;
                }
                KeyCode::Esc => {
                    self.popup_open = false;
                    return;
                }
                _ => {
                    self.popup_open = false;
                }
            }
        }

        let ctrl = key.modifiers.contains(KeyModifiers::CONTROL);
        match key.code {
            KeyCode::Esc => self.exit = true,
            KeyCode::Char('e') if ctrl => self.run_query(),
            KeyCode::Char('s') if ctrl => {
                if let Some(tx) = self.transaction() {
                    tx.send_stop_signal();
                }
            }
            KeyCode::Char('k') if ctrl => {
                if let Some(tx) = self.transaction() {
                    tokio::spawn(async move { tx.commit().await });
                }
            }
            KeyCode::Char('r') if ctrl => {
                if let Some(tx) = self.transaction() {
                    tokio::spawn(async move { tx.rollback().await });
                }
            }
            KeyCode::Char('t') if ctrl => {
                if let Some(tx) = self.transaction() {
                    tokio::spawn(async move { tx.close(None).await });
                }
            }
            KeyCode::F(2) => self.switch_session_type(),
            KeyCode::F(3) => self.switch_transaction_type(),
            KeyCode::F(4) => self.next_database(),
            KeyCode::F(5) => self.toggle(TransactionConfig::Snapshot),
            KeyCode::F(6) => self.toggle(TransactionConfig::Infer),
            KeyCode::F(7) => self.toggle(TransactionConfig::Explain),
            KeyCode::Tab => {
                self.update_suggestions();
                if !self.suggestions.is_empty() {
                    self.popup_open = true;
                    self.suggestion_index = 0;
                }
            }
            _ => {
                self.textarea.input(key);
                // Auto-trigger on typing letters
                if let KeyCode::Char(c) = key.code {
                    if c.is_alphabetic() || c == '_' {
                        self.update_suggestions();
                        self.popup_open = !self.suggestions.is_empty();
                    } else {
                        self.popup_open = false;
                    }
                }
            }
        }
    }

    /// Pull in answers, notifications and schema refreshes from background tasks.
    fn drain_background(&mut self) {
        while let Ok(response) = self.responses_rx.try_recv() {
            self.push_response(response);
        }
        loop {
            match self.notifications.try_recv() {
                Ok(notification) => self.push_notification(&notification),
                Err(broadcast::error::TryRecvError::Lagged(skipped)) => {
                    tracing::warn!(skipped, "notification display lagged");
                }
                Err(_) => break,
            }
        }
        if self.schema_stale.swap(false, Ordering::SeqCst) {
            self.refresh_schema();
        }
        trim_history(&mut self.messages, MAX_MESSAGES);
    }

    fn refresh_schema(&self) {
        let Some(session) = self.session() else {
            return;
        };
        let autocompleter = self.autocompleter.clone();
        tokio::spawn(async move {
            match session.type_schema().await {
                Some(schema) => autocompleter.set_schema(&schema),
                None => autocompleter.clear(),
            }
        });
    }

    fn push_response(&mut self, response: Response) {
        let line = match response {
            Response::Answer(answer) => {
                self.messages.push(Line::from(answer.text));
                return;
            }
            Response::Stopped => Line::from(Span::styled(
                "Query stopped.",
                Style::default().fg(Color::Yellow),
            )),
            Response::Failed(reason) => Line::from(Span::styled(
                format!("Error: {}", reason),
                Style::default().fg(Color::Red),
            )),
            Response::Done { answers, elapsed } => Line::from(Span::styled(
                format!("OK. {} answers in {} ms", answers, elapsed.as_millis()),
                Style::default().fg(Color::Green),
            )),
        };
        self.messages.push(line);
        self.messages.push(Line::from(Span::styled(
            "-".repeat(50),
            Style::default().fg(Color::DarkGray),
        )));
    }

    fn push_notification(&mut self, notification: &Notification) {
        let color = match notification.kind {
            NotificationKind::Info => Color::Green,
            NotificationKind::Warning => Color::Yellow,
            NotificationKind::Error => Color::Red,
        };
        self.messages.push(Line::from(vec![
            Span::styled(
                format!("[{}] ", notification.code),
                Style::default().fg(Color::DarkGray),
            ),
            Span::styled(notification.message.clone(), Style::default().fg(color)),
        ]));
    }

    fn push_info(&mut self, text: impl Into<String>) {
        self.messages.push(Line::from(Span::styled(
            text.into(),
            Style::default().fg(Color::Cyan),
        )));
    }

    fn run_query(&mut self) {
        let input = self.textarea.lines().join("\n");
        if input.trim().is_empty() {
            return;
        }
        let Some(tx) = self.transaction() else {
            self.push_info("Not connected.");
            return;
        };
        if tx.has_running_query() {
            self.push_info("A query is already running (Ctrl+S to stop it).");
            return;
        }

        self.messages.push(Line::from(vec![
            Span::styled("> ", Style::default().fg(Color::Yellow)),
            Span::raw(input.clone()),
        ]));
        self.reset_textarea();

        let responses = self.responses_tx.clone();
        tokio::spawn(async move {
            if let Some(runner) = tx.query_runner(&input).await {
                runner.run(&responses).await;
            }
        });
    }

    fn switch_session_type(&mut self) {
        let Some(session) = self.session() else {
            return;
        };
        let Some(database) = session.database().or_else(|| self.client.databases().first().cloned())
        else {
            self.push_info("No database to open.");
            return;
        };
        let session_type = session.session_type().flipped();
        tokio::spawn(async move { session.try_open(&database, session_type).await });
    }

    fn switch_transaction_type(&mut self) {
        let Some(tx) = self.transaction() else {
            return;
        };
        if tx.is_open() {
            self.push_info("Close the transaction before changing its type.");
            return;
        }
        tx.set_transaction_type(tx.transaction_type().flipped());
    }

    fn next_database(&mut self) {
        let Some(session) = self.session() else {
            return;
        };
        let databases = self.client.databases();
        if databases.is_empty() {
            self.push_info("No databases on the server.");
            return;
        }
        let next = match session
            .database()
            .and_then(|current| databases.iter().position(|d| *d == current))
        {
            Some(index) => (index + 1) % databases.len(),
            None => 0,
        };
        let database = databases[next].clone();
        let session_type = session.session_type();
        tokio::spawn(async move { session.try_open(&database, session_type).await });
    }

    fn toggle(&mut self, config: TransactionConfig) {
        let Some(tx) = self.transaction() else {
            return;
        };
        if !tx.enabled(config) {
            self.push_info(format!("{} cannot be changed right now.", config));
            return;
        }
        tx.toggle(config);
    }

    fn update_suggestions(&mut self) {
        let (word, _) = self.get_current_word();
        if word.is_empty() {
            self.suggestions.clear();
            self.popup_open = false;
            return;
        }

        self.suggestions = self.autocompleter.suggestions(&word);
        self.suggestion_index = 0;
    }

    fn accept_suggestion(&mut self) {
        if self.suggestions.is_empty() {
            return;
        }
        let suggestion = self.suggestions[self.suggestion_index].clone();
        let (word, _start_col) = self.get_current_word();

        for _ in 0..word.chars().count() {
            self.textarea.input(Input {
                key: Key::Backspace,
                ctrl: false,
                alt: false,
                shift: false,
            });
        }

        self.textarea.insert_str(&suggestion);
        self.popup_open = false;
    }

    fn get_current_word(&self) -> (String, usize) {
        let (line_idx, col_idx) = self.textarea.cursor();

        if line_idx >= self.textarea.lines().len() || col_idx == 0 {
            return (String::new(), 0);
        }

        let line = &self.textarea.lines()[line_idx];
        let prefix_chars: Vec<char> = line.chars().take(col_idx).collect();

        match prefix_chars
            .iter()
            .rposition(|&c| !c.is_alphanumeric() && c != '_' && c != '-')
        {
            Some(separator) => (prefix_chars[separator + 1..].iter().collect(), separator + 1),
            None => (prefix_chars.iter().collect(), 0),
        }
    }
}

fn trim_history<T>(lines: &mut Vec<T>, limit: usize) {
    if lines.len() > limit {
        let excess = lines.len() - limit;
        lines.drain(..excess);
    }
}
