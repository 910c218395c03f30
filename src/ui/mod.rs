// UI module - Terminal User Interface
//
// This module manages the terminal UI using ratatui. It handles:
// - Terminal initialization and cleanup
// - Event loop (keyboard input, timer ticks, pipeline messages)
// - Rendering the UI
// - Dispatching key presses to application state transitions

pub mod app;
pub mod views;

use crate::config::Config;
use crate::embedder::Embedder;
use crate::logging::Logger;
use crate::reranker::Reranker;
use crate::search::{execute_command, CancellationHandle, Command, PipelineMessage};
use crate::store::Store;
use anyhow::{Context, Result};
use app::{App, Mode};
use crossterm::{
    event::{self, Event, KeyCode, KeyEvent, KeyEventKind},
    execute,
    terminal::{disable_raw_mode, enable_raw_mode, EnterAlternateScreen, LeaveAlternateScreen},
};
use ratatui::{backend::CrosstermBackend, Terminal};
use std::io;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;

/// Run the TUI: set up the terminal, run the event loop, and restore the
/// terminal on exit (including on error, so a panic doesn't leave the
/// user's shell in raw mode).
pub async fn run_tui(
    store: Arc<Store>,
    embedder: Arc<dyn Embedder>,
    reranker: Arc<dyn Reranker>,
    config: Config,
    logger: Option<Logger>,
) -> Result<()> {
    enable_raw_mode().context("Failed to enable raw mode")?;
    let mut stdout = io::stdout();
    execute!(stdout, EnterAlternateScreen).context("Failed to setup terminal")?;
    let backend = CrosstermBackend::new(stdout);
    let mut terminal = Terminal::new(backend).context("Failed to create terminal")?;

    let mut app = App::new(store, embedder, reranker, config, logger);
    let (tx, mut rx) = mpsc::channel::<PipelineMessage>(64);

    // Chain the full-corpus load behind the recent-items list already
    // painted by `App::new`, so startup isn't gated on scanning the store.
    spawn_detached_commands(&app, app.initial_commands(), tx.clone());

    let result = run_event_loop(&mut terminal, &mut app, &tx, &mut rx).await;

    disable_raw_mode().context("Failed to disable raw mode")?;
    execute!(terminal.backend_mut(), LeaveAlternateScreen).context("Failed to restore terminal")?;
    terminal.show_cursor().context("Failed to show cursor")?;

    result
}

/// Main event loop. Handles three kinds of events with `tokio::select!`:
/// keyboard input, periodic redraw ticks, and completed pipeline stages
/// arriving from background tasks.
async fn run_event_loop(
    terminal: &mut Terminal<CrosstermBackend<io::Stdout>>,
    app: &mut App,
    tx: &mpsc::Sender<PipelineMessage>,
    rx: &mut mpsc::Receiver<PipelineMessage>,
) -> Result<()> {
    let mut tick_interval = tokio::time::interval(Duration::from_millis(150));

    loop {
        terminal.draw(|f| views::draw(f, app)).context("Failed to draw terminal")?;

        let mut commands = Vec::new();

        tokio::select! {
            _ = async {
                if event::poll(Duration::from_millis(10)).unwrap_or(false) {
                    if let Ok(Event::Key(key_event)) = event::read() {
                        commands = handle_key_event(app, key_event);
                    }
                }
            } => {}

            _ = tick_interval.tick() => {}

            Some(message) = rx.recv() => {
                commands = app.handle_pipeline_message(message);
            }
        }

        if !commands.is_empty() {
            spawn_commands(app, commands, tx.clone());
        }

        if app.should_quit {
            break;
        }
    }

    Ok(())
}

/// Run each command on a blocking task (the store and the reference HTTP
/// providers are synchronous) and forward its result back to the event
/// loop. Commands from a search that's since been cancelled or superseded
/// still run to completion, but `handle_pipeline_message` discards them as
/// stale by query id.
fn spawn_commands(app: &App, commands: Vec<Command>, tx: mpsc::Sender<PipelineMessage>) {
    let Some(cancellation) = app.current_cancellation() else {
        return;
    };
    let store = app.store_handle();
    let embedder = app.embedder_handle();
    let reranker = app.reranker_handle();

    for command in commands {
        let store = store.clone();
        let embedder = embedder.clone();
        let reranker = reranker.clone();
        let cancellation = cancellation.clone();
        let tx = tx.clone();

        tokio::task::spawn_blocking(move || {
            let message = execute_command(command, store.as_ref(), embedder.as_ref(), reranker.as_ref(), &cancellation);
            let _ = tx.blocking_send(message);
        });
    }
}

/// Like `spawn_commands`, but for commands that aren't tied to any active
/// search (currently only the startup full-corpus load) and so don't need a
/// real cancellation handle.
fn spawn_detached_commands(app: &App, commands: Vec<Command>, tx: mpsc::Sender<PipelineMessage>) {
    let store = app.store_handle();
    let embedder = app.embedder_handle();
    let reranker = app.reranker_handle();
    let cancellation = CancellationHandle::new();

    for command in commands {
        let store = store.clone();
        let embedder = embedder.clone();
        let reranker = reranker.clone();
        let cancellation = cancellation.clone();
        let tx = tx.clone();

        tokio::task::spawn_blocking(move || {
            let message = execute_command(command, store.as_ref(), embedder.as_ref(), reranker.as_ref(), &cancellation);
            let _ = tx.blocking_send(message);
        });
    }
}

/// Layered key dispatch: Mode-specific behavior first (where a mode needs
/// exclusive control of input, like typing into the search box), then
/// global keys shared across modes.
fn handle_key_event(app: &mut App, key_event: KeyEvent) -> Vec<Command> {
    if key_event.kind != KeyEventKind::Press {
        return Vec::new();
    }

    if app.error_message.is_some() {
        app.dismiss_error();
        return Vec::new();
    }

    if app.mode == Mode::Search {
        return handle_search_keys(app, key_event.code);
    }

    handle_mode_keys(app, key_event.code)
}

fn handle_search_keys(app: &mut App, key: KeyCode) -> Vec<Command> {
    match key {
        KeyCode::Enter => app.submit_search(),
        KeyCode::Esc => {
            app.esc_in_search();
            Vec::new()
        }
        KeyCode::Backspace => {
            app.pop_search_char();
            Vec::new()
        }
        KeyCode::Char(c) => {
            app.push_search_char(c);
            Vec::new()
        }
        _ => Vec::new(),
    }
}

fn handle_mode_keys(app: &mut App, key: KeyCode) -> Vec<Command> {
    match key {
        KeyCode::Char('q') => {
            app.should_quit = true;
            Vec::new()
        }
        KeyCode::Char('/') => {
            app.enter_search();
            Vec::new()
        }
        KeyCode::Down | KeyCode::Char('j') => {
            app.move_cursor_down();
            Vec::new()
        }
        KeyCode::Up | KeyCode::Char('k') => {
            app.move_cursor_up();
            Vec::new()
        }
        KeyCode::Home => {
            app.move_cursor_top();
            Vec::new()
        }
        KeyCode::End => {
            app.move_cursor_bottom();
            Vec::new()
        }
        KeyCode::Char('m') => app.more_like_this(),
        KeyCode::Char('o') | KeyCode::Enter => {
            match app.mode {
                Mode::Article => {}
                _ => app.open_article(),
            }
            Vec::new()
        }
        KeyCode::Char('r') => {
            app.mark_focused_read();
            Vec::new()
        }
        KeyCode::Char('s') => {
            app.toggle_saved();
            Vec::new()
        }
        KeyCode::Char('h') => {
            match app.mode {
                Mode::History => app.exit_history(),
                Mode::List => app.enter_history(),
                _ => {}
            }
            Vec::new()
        }
        KeyCode::Esc => {
            match app.mode {
                Mode::Results => app.esc_in_results(),
                Mode::History => app.exit_history(),
                Mode::Article => app.exit_article(),
                Mode::List | Mode::Search => {}
            }
            Vec::new()
        }
        _ => Vec::new(),
    }
}
