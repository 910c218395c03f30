// UI rendering logic
//
// This module draws the feed reader: a stream of items grouped into
// time-band headers, an optional error bar, an optional search/filter-status
// bar, and a status bar. ratatui handles layout and widgets; this module
// only decides what goes where.

use super::app::{App, Mode};
use crate::models::Item;
use chrono::{DateTime, Utc};
use ratatui::{
    layout::{Constraint, Direction, Layout, Rect},
    style::{Color, Modifier, Style},
    text::{Line, Span},
    widgets::{Block, Borders, List, ListItem, Paragraph},
    Frame,
};

/// Main render function, called on every frame.
pub fn draw(f: &mut Frame, app: &App) {
    let mut constraints = vec![Constraint::Min(1)];
    if app.error_message.is_some() {
        constraints.push(Constraint::Length(1));
    }
    if matches!(app.mode, Mode::Search) || app.status_message.is_some() {
        constraints.push(Constraint::Length(1));
    }
    constraints.push(Constraint::Length(1));

    let chunks = Layout::default().direction(Direction::Vertical).constraints(constraints).split(f.area());

    let mut idx = 0;
    let stream_area = chunks[idx];
    idx += 1;

    match app.mode {
        Mode::Article => render_article(f, stream_area, app),
        _ => render_stream(f, stream_area, app),
    }

    if app.error_message.is_some() {
        render_error_bar(f, chunks[idx], app);
        idx += 1;
    }

    if matches!(app.mode, Mode::Search) || app.status_message.is_some() {
        render_search_or_status(f, chunks[idx], app);
        idx += 1;
    }

    render_status_bar(f, chunks[idx], app);
}

/// A bucket an item's age falls into, for grouping the stream into
/// time-band headers. Suppressed entirely when search results are showing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum AgeBand {
    JustNow,
    PastHour,
    Today,
    Yesterday,
    Older,
}

impl AgeBand {
    fn label(self) -> &'static str {
        match self {
            AgeBand::JustNow => "Just Now",
            AgeBand::PastHour => "Past Hour",
            AgeBand::Today => "Today",
            AgeBand::Yesterday => "Yesterday",
            AgeBand::Older => "Older",
        }
    }

    fn of(published_at: DateTime<Utc>, now: DateTime<Utc>) -> Self {
        let age = now.signed_duration_since(published_at);
        if age < chrono::Duration::minutes(15) {
            AgeBand::JustNow
        } else if age < chrono::Duration::hours(1) {
            AgeBand::PastHour
        } else if age < chrono::Duration::hours(24) {
            AgeBand::Today
        } else if age < chrono::Duration::hours(48) {
            AgeBand::Yesterday
        } else {
            AgeBand::Older
        }
    }
}

fn item_line(item: &Item, selected: bool) -> ListItem<'static> {
    let marker = if selected { "> " } else { "  " };
    let read_marker = if item.read { " " } else { "*" };
    let saved_marker = if item.saved { "\u{2605}" } else { " " };

    let style = if item.read {
        Style::default().fg(Color::DarkGray)
    } else if selected {
        Style::default().fg(Color::White).add_modifier(Modifier::BOLD)
    } else {
        Style::default().fg(Color::White)
    };

    let line = Line::from(vec![
        Span::raw(marker),
        Span::raw(read_marker),
        Span::raw(saved_marker),
        Span::raw(" "),
        Span::styled(item.title.clone(), style),
        Span::raw("  "),
        Span::styled(format!("[{}]", item.source_name), Style::default().fg(Color::Cyan)),
    ]);
    ListItem::new(line)
}

/// Render the stream area: grouped by age band in List/History mode,
/// ungrouped (plain ranked order) when search results are showing.
fn render_stream(f: &mut Frame, area: Rect, app: &App) {
    let show_bands = !matches!(app.mode, Mode::Results);
    let now = Utc::now();
    let cursor_idx = app
        .cursor_id
        .as_ref()
        .and_then(|id| app.visible_items.iter().position(|i| &i.id == id));

    let mut rows: Vec<ListItem> = Vec::new();
    let mut last_band: Option<AgeBand> = None;

    for (idx, item) in app.visible_items.iter().enumerate() {
        if idx < app.scroll_offset {
            continue;
        }
        if show_bands {
            let band = AgeBand::of(item.published_at, now);
            if last_band != Some(band) {
                rows.push(ListItem::new(Line::from(Span::styled(
                    format!("── {} ──", band.label()),
                    Style::default().fg(Color::DarkGray).add_modifier(Modifier::ITALIC),
                ))));
                last_band = Some(band);
            }
        }
        rows.push(item_line(item, Some(idx) == cursor_idx));
    }

    let title = match app.mode {
        Mode::Results => " Search Results ",
        Mode::History => " History ",
        _ => " Feed ",
    };

    let list = List::new(rows).block(Block::default().borders(Borders::ALL).title(title));
    f.render_widget(list, area);
}

fn render_article(f: &mut Frame, area: Rect, app: &App) {
    let Some(item) = app.article_id.as_ref().and_then(|id| app.visible_items.iter().find(|i| &i.id == id)) else {
        let placeholder = Paragraph::new("No article selected").block(Block::default().borders(Borders::ALL));
        f.render_widget(placeholder, area);
        return;
    };

    let text = format!(
        "{}\n\nSource: {}  Author: {}  Published: {}\n\n{}",
        item.title,
        item.source_name,
        item.author,
        item.published_at.to_rfc3339(),
        item.summary,
    );

    let paragraph = Paragraph::new(text)
        .block(Block::default().borders(Borders::ALL).title(" Article "))
        .wrap(ratatui::widgets::Wrap { trim: false });
    f.render_widget(paragraph, area);
}

fn render_error_bar(f: &mut Frame, area: Rect, app: &App) {
    let message = app.error_message.as_deref().unwrap_or("");
    let bar = Paragraph::new(message).style(Style::default().fg(Color::White).bg(Color::Red));
    f.render_widget(bar, area);
}

fn render_search_or_status(f: &mut Frame, area: Rect, app: &App) {
    let text = if app.mode == Mode::Search {
        format!("/{}", app.search_input)
    } else {
        app.status_message.clone().unwrap_or_default()
    };
    let bar = Paragraph::new(text).style(Style::default().fg(Color::Yellow));
    f.render_widget(bar, area);
}

fn render_status_bar(f: &mut Frame, area: Rect, app: &App) {
    let hint = match app.mode {
        Mode::List => "/ search  m more-like-this  h history  enter read  o open  q quit",
        Mode::Search => "enter submit  esc cancel",
        Mode::Results => "esc back  m more-like-this  enter read  o open",
        Mode::History => "esc back  enter read  o open",
        Mode::Article => "esc back",
    };
    let bar = Paragraph::new(hint).style(Style::default().fg(Color::DarkGray));
    f.render_widget(bar, area);
}
