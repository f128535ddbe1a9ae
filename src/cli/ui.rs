use super::app::{App, Status};
use ratatui::{
    Frame,
    layout::{Constraint, Direction, Layout, Rect},
    style::{Color, Modifier, Style},
    text::{Line, Span},
    widgets::{Block, Borders, Clear, List, ListItem, ListState, Paragraph},
};

pub fn draw(f: &mut Frame, app: &mut App) {
    let chunks = Layout::default()
        .direction(Direction::Vertical)
        .constraints(
            [
                Constraint::Length(3),  // Status bar
                Constraint::Min(1),     // Output area grows
                Constraint::Length(10), // Query editor
            ]
            .as_ref(),
        )
        .split(f.area());

    f.render_widget(status_bar(&app.status()), chunks[0]);

    // Output Area
    // Show only the last N messages that fit
    let inner_height = chunks[1].height.saturating_sub(2) as usize; // -2 for borders
    let skip_count = app.messages.len().saturating_sub(inner_height);

    let messages: Vec<ListItem> = app
        .messages
        .iter()
        .skip(skip_count)
        .map(|line| ListItem::new(line.clone()))
        .collect();

    let messages_panel = List::new(messages)
        .block(Block::default().borders(Borders::ALL).title(" Output "))
        .style(Style::default().fg(Color::White));

    f.render_widget(messages_panel, chunks[1]);

    // Input Area
    let textarea_rect = chunks[2];
    f.render_widget(&app.textarea, textarea_rect);

    // Autocomplete Popup
    if app.popup_open && !app.suggestions.is_empty() {
        let (row, col) = app.textarea.cursor();

        // Below the current line, inside the editor border
        let popup_x = textarea_rect.x + (col as u16) + 1;
        let popup_y = textarea_rect.y + (row as u16) + 2;

        // Clamp to screen bounds
        let width = 30.min(f.area().width);
        let height = 5.min(app.suggestions.len() as u16 + 2).min(f.area().height); // +2 for borders

        let area = Rect::new(
            popup_x.min(f.area().width - width),
            popup_y.min(f.area().height - height),
            width,
            height,
        );

        f.render_widget(Clear, area); // Clear underlying text

        let items: Vec<ListItem> = app
            .suggestions
            .iter()
            .map(|s| ListItem::new(s.as_str()))
            .collect();

        let mut state = ListState::default();
        state.select(Some(app.suggestion_index));

        let list = List::new(items)
            .block(Block::default().borders(Borders::ALL).title("Suggestions"))
            .highlight_style(Style::default().add_modifier(Modifier::REVERSED))
            .highlight_symbol(">> ");

        f.render_stateful_widget(list, area, &mut state);
    }
}

fn status_bar(status: &Status) -> Paragraph<'static> {
    let dim = Style::default().fg(Color::DarkGray);
    let mut spans = vec![
        Span::styled(status.address.clone(), Style::default().fg(Color::Cyan)),
        Span::styled(" | ", dim),
        Span::raw(format!(
            "{} ({})",
            status.database.as_deref().unwrap_or("no database"),
            status.session_type
        )),
        Span::styled(" | ", dim),
        Span::raw(format!("tx: {}", status.transaction_type)),
        Span::styled(" | ", dim),
    ];

    for (label, on) in [
        ("session", status.session_open),
        ("open", status.transaction_open),
        ("running", status.running),
        ("stop", status.stopping),
    ] {
        spans.push(flag(label, on));
    }
    spans.push(Span::styled(" | ", dim));

    for (name, activated, enabled) in &status.toggles {
        let style = match (activated, enabled) {
            (true, true) => Style::default().fg(Color::Green).add_modifier(Modifier::BOLD),
            (true, false) => Style::default().fg(Color::Green),
            (false, true) => Style::default().fg(Color::White),
            (false, false) => dim,
        };
        let mark = if *activated { "+" } else { "-" };
        spans.push(Span::styled(format!("{}{} ", mark, name), style));
    }

    Paragraph::new(Line::from(spans))
        .block(Block::default().borders(Borders::ALL).title(" Connection "))
}

fn flag(label: &'static str, on: bool) -> Span<'static> {
    if on {
        Span::styled(
            format!("[{}] ", label),
            Style::default().fg(Color::Yellow).add_modifier(Modifier::BOLD),
        )
    } else {
        Span::styled(format!(" {}  ", label), Style::default().fg(Color::DarkGray))
    }
}
