use crate::audio::{MediaSink, NullSink, RodioSink};
use crate::config;
use crate::connection::{TaskEvent, TaskRunner};
use crate::gateway::HttpGateway;
use crate::logging;
use crate::model::{DEFAULT_BACKEND, PersistedState};
use crate::sequencer::Sequencer;
use anyhow::Result;
use crossterm::cursor::Show;
use crossterm::event::{self, Event, KeyCode, KeyEvent, KeyEventKind, KeyModifiers};
use crossterm::execute;
use crossterm::terminal::{
    EnterAlternateScreen, LeaveAlternateScreen, disable_raw_mode, enable_raw_mode,
};
use ratatui::Terminal;
use ratatui::backend::CrosstermBackend;
use std::io::stdout;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{info, warn};
use url::Url;

const OK_TOAST: Duration = Duration::from_millis(2600);
const ERROR_TOAST: Duration = Duration::from_millis(4000);
const PAGE_ROWS: usize = 10;
const VOLUME_STEP: f32 = 0.05;
const REDRAW_INTERVAL: Duration = Duration::from_millis(250);
const EVENT_POLL: Duration = Duration::from_millis(33);

#[derive(Debug, Default, Clone)]
pub struct AppStartupOptions {
    pub backend_override: Option<String>,
    pub autoplay_override: Option<bool>,
    pub accept_invalid_certs: bool,
    pub skip_connect: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LinkStatus {
    Disconnected,
    Connecting(String),
    Connected(Url),
    Failed(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ToastKind {
    Ok,
    Error,
}

#[derive(Debug, Clone)]
pub struct Toast {
    pub message: String,
    pub kind: ToastKind,
    expires_at: Instant,
}

pub struct App {
    pub sequencer: Sequencer,
    pub prefs: PersistedState,
    pub tasks: TaskRunner,
    pub link: LinkStatus,
    pub selected_row: usize,
    pub status: String,
    pub toast: Option<Toast>,
    pub command_mode: bool,
    pub command_buffer: String,
    pub dirty: bool,
    state_path: Option<PathBuf>,
}

impl App {
    pub fn new(prefs: PersistedState, tasks: TaskRunner, state_path: Option<PathBuf>) -> Self {
        Self {
            sequencer: Sequencer::new(prefs.autoplay),
            prefs,
            tasks,
            link: LinkStatus::Disconnected,
            selected_row: 0,
            status: String::from("Not connected"),
            toast: None,
            command_mode: false,
            command_buffer: String::new(),
            dirty: true,
            state_path,
        }
    }

    pub fn start_connect(&mut self, raw: Option<&str>) {
        let input = raw
            .map(str::trim)
            .unwrap_or(self.prefs.backend.as_str())
            .trim()
            .to_string();
        let backend = if input.is_empty() {
            String::from(DEFAULT_BACKEND)
        } else {
            input
        };

        self.prefs.backend = backend.clone();
        self.save_prefs();
        self.tasks.connect(&backend);
        self.link = LinkStatus::Connecting(backend);
        self.set_status("Connecting…");
    }

    /// Applies everything that arrived since the last frame: task results,
    /// sink signals, sequencer notices and preference changes.
    pub fn pump(&mut self, sink: &mut dyn MediaSink) {
        while let Some(event) = self.tasks.try_recv_event() {
            self.apply_task_event(event, sink);
        }

        while let Some(event) = sink.poll_event() {
            self.sequencer.handle_sink_event(event, sink);
        }

        for notice in self.sequencer.take_notices() {
            let kind = if notice.is_error() {
                ToastKind::Error
            } else {
                ToastKind::Ok
            };
            let message = notice.message();
            self.set_status(&message);
            self.show_toast(message, kind);
        }

        if self.sequencer.take_persist_request() {
            self.prefs.autoplay = self.sequencer.autoplay();
            self.save_prefs();
        }

        if self
            .toast
            .as_ref()
            .is_some_and(|toast| Instant::now() >= toast.expires_at)
        {
            self.toast = None;
            self.dirty = true;
        }

        if self.sequencer.take_dirty() {
            self.dirty = true;
        }
    }

    fn apply_task_event(&mut self, event: TaskEvent, sink: &mut dyn MediaSink) {
        match event {
            TaskEvent::Connected {
                result: Ok(connection),
                ..
            } => {
                info!(base = %connection.base, "connected");
                sink.stop();
                self.sequencer
                    .initialize(connection.base.clone(), connection.catalog);
                self.selected_row = 0;
                self.link = LinkStatus::Connected(connection.base);
                self.set_status("Connected");
                self.show_toast(String::from("Connected to backend"), ToastKind::Ok);
            }
            TaskEvent::Connected {
                result: Err(err), ..
            } => {
                warn!(error = %err, "connection failed");
                let message = err.to_string();
                self.link = LinkStatus::Failed(message.clone());
                self.set_status(&message);
                self.show_toast(message, ToastKind::Error);
            }
            TaskEvent::Downloaded {
                result: Ok(path), ..
            } => {
                let message = format!("Saved {}", path.display());
                self.set_status(&message);
                self.show_toast(message, ToastKind::Ok);
            }
            TaskEvent::Downloaded {
                track_path,
                result: Err(err),
            } => {
                let message = format!("Download of {track_path} failed: {err}");
                self.set_status(&message);
                self.show_toast(message, ToastKind::Error);
            }
        }
    }

    pub fn select_next_row(&mut self, step: usize) {
        let len = self.sequencer.catalog().len();
        if len == 0 {
            return;
        }
        self.selected_row = self.selected_row.saturating_add(step).min(len - 1);
        self.dirty = true;
    }

    pub fn select_prev_row(&mut self, step: usize) {
        self.selected_row = self.selected_row.saturating_sub(step);
        self.dirty = true;
    }

    pub fn play_row(&mut self, row: usize, sink: &mut dyn MediaSink) {
        self.sequencer.select_index(row, sink);
        if self.sequencer.current_index() == Some(row)
            && let Some(track) = self.sequencer.current_track()
        {
            let message = format!("Playing {}", track.path);
            self.selected_row = row;
            self.set_status(&message);
        }
    }

    pub fn download_row(&mut self, row: usize) {
        let Some(base) = self.sequencer.base().cloned() else {
            self.set_status("Not connected");
            return;
        };
        let Some(track) = self.sequencer.catalog().get(row).cloned() else {
            self.set_status("Nothing selected");
            return;
        };

        let dest_dir = self
            .prefs
            .download_dir
            .clone()
            .or_else(|| std::env::current_dir().ok())
            .unwrap_or_else(|| PathBuf::from("."));
        self.set_status(&format!("Downloading {}", track.path));
        self.tasks.download(base, track, dest_dir);
    }

    pub fn toggle_pause(&mut self, sink: &mut dyn MediaSink) {
        if !self.sequencer.is_playing() {
            return;
        }
        if sink.is_paused() {
            sink.resume();
            self.set_status("Resumed");
        } else {
            sink.pause();
            self.set_status("Paused");
        }
    }

    pub fn adjust_volume(&mut self, delta: f32, sink: &mut dyn MediaSink) {
        let next = (sink.volume() + delta).clamp(0.0, 2.0);
        sink.set_volume(next);
        self.set_status(&format!("Volume: {}%", (next * 100.0).round() as u16));
    }

    /// Returns `true` when the app should quit.
    pub fn handle_key(&mut self, key: KeyEvent, sink: &mut dyn MediaSink) -> bool {
        if key.kind != KeyEventKind::Press {
            return false;
        }

        if self.command_mode {
            match key.code {
                KeyCode::Esc => {
                    self.command_mode = false;
                    self.command_buffer.clear();
                    self.dirty = true;
                }
                KeyCode::Enter => {
                    let command = std::mem::take(&mut self.command_buffer);
                    self.command_mode = false;
                    run_command(self, sink, &command);
                }
                KeyCode::Backspace => {
                    self.command_buffer.pop();
                    self.dirty = true;
                }
                KeyCode::Char(ch) => {
                    self.command_buffer.push(ch);
                    self.dirty = true;
                }
                _ => {}
            }
            return false;
        }

        match key.code {
            KeyCode::Char('c') if key.modifiers.contains(KeyModifiers::CONTROL) => return true,
            KeyCode::Char('q') => return true,
            KeyCode::Down => self.select_next_row(1),
            KeyCode::Up => self.select_prev_row(1),
            KeyCode::PageDown => self.select_next_row(PAGE_ROWS),
            KeyCode::PageUp => self.select_prev_row(PAGE_ROWS),
            KeyCode::Home => self.select_prev_row(usize::MAX),
            KeyCode::End => self.select_next_row(usize::MAX),
            KeyCode::Enter => self.play_row(self.selected_row, sink),
            KeyCode::Char(' ') => self.toggle_pause(sink),
            KeyCode::Char('a') => self.sequencer.toggle_autoplay(),
            KeyCode::Char('c') => self.start_connect(None),
            KeyCode::Char('d') => self.download_row(self.selected_row),
            KeyCode::Char('+') | KeyCode::Char('=') => self.adjust_volume(VOLUME_STEP, sink),
            KeyCode::Char('-') => self.adjust_volume(-VOLUME_STEP, sink),
            KeyCode::Char(':') => {
                self.command_mode = true;
                self.dirty = true;
            }
            _ => {}
        }
        false
    }

    fn show_toast(&mut self, message: String, kind: ToastKind) {
        let lifetime = match kind {
            ToastKind::Ok => OK_TOAST,
            ToastKind::Error => ERROR_TOAST,
        };
        self.toast = Some(Toast {
            message,
            kind,
            expires_at: Instant::now() + lifetime,
        });
        self.dirty = true;
    }

    fn set_status(&mut self, message: &str) {
        self.status = message.to_string();
        self.dirty = true;
    }

    fn save_prefs(&mut self) {
        let Some(path) = &self.state_path else {
            return;
        };
        if let Err(err) = config::save_state_to(path, &self.prefs) {
            let message = format!("save error: {err:#}");
            warn!(error = %message, "failed to save preferences");
            self.status = message;
            self.dirty = true;
        }
    }
}

pub fn run_with_startup(options: AppStartupOptions) -> Result<()> {
    match config::log_path() {
        Ok(path) => {
            if let Err(err) = logging::init(&path) {
                eprintln!("logging disabled: {err:#}");
            }
        }
        Err(err) => eprintln!("logging disabled: {err:#}"),
    }

    let state_path = config::state_path()?;
    let mut prefs = config::load_state_from(&state_path)?;
    if let Some(backend) = options.backend_override {
        prefs.backend = backend;
    }
    if let Some(autoplay) = options.autoplay_override {
        prefs.autoplay = autoplay;
    }
    if options.accept_invalid_certs {
        prefs.accept_invalid_certs = true;
    }

    let gateway = Arc::new(HttpGateway::new(prefs.accept_invalid_certs)?);
    let mut sink: Box<dyn MediaSink> = match RodioSink::new(gateway.transfer_client()) {
        Ok(sink) => Box::new(sink),
        Err(err) => {
            warn!(error = ?err, "no audio output, using null sink");
            Box::new(NullSink::new())
        }
    };

    let mut app = App::new(prefs, TaskRunner::new(gateway), Some(state_path));
    if !options.skip_connect {
        app.start_connect(None);
    }
    info!(backend = %app.prefs.backend, "starting");

    let guard = TerminalGuard::enter()?;
    let mut terminal = Terminal::new(CrosstermBackend::new(stdout()))?;
    terminal.clear()?;

    let result = run_loop(
        &mut app,
        &mut *sink,
        &mut |app: &App, sink: &dyn MediaSink| -> Result<()> {
            terminal.draw(|frame| crate::ui::draw(frame, app, sink))?;
            Ok(())
        },
        &mut next_terminal_event,
    );

    drop(guard);
    sink.stop();
    app.save_prefs();
    result
}

/// Raw mode on the alternate screen for as long as it lives.
struct TerminalGuard;

impl TerminalGuard {
    fn enter() -> Result<Self> {
        enable_raw_mode()?;
        let guard = Self;
        execute!(stdout(), EnterAlternateScreen)?;
        Ok(guard)
    }
}

impl Drop for TerminalGuard {
    fn drop(&mut self) {
        let _ = disable_raw_mode();
        let _ = execute!(stdout(), LeaveAlternateScreen, Show);
    }
}

fn next_terminal_event() -> Result<Option<Event>> {
    if !event::poll(EVENT_POLL)? {
        return Ok(None);
    }
    Ok(Some(event::read()?))
}

/// Runs until a quit key or the first draw or input error.
fn run_loop(
    app: &mut App,
    sink: &mut dyn MediaSink,
    draw: &mut dyn FnMut(&App, &dyn MediaSink) -> Result<()>,
    next_event: &mut dyn FnMut() -> Result<Option<Event>>,
) -> Result<()> {
    let mut last_tick = Instant::now();
    loop {
        app.pump(sink);

        if app.dirty || last_tick.elapsed() > REDRAW_INTERVAL {
            draw(app, &*sink)?;
            app.dirty = false;
            last_tick = Instant::now();
        }

        let Some(Event::Key(key)) = next_event()? else {
            continue;
        };
        if app.handle_key(key, sink) {
            return Ok(());
        }
    }
}

fn run_command(app: &mut App, sink: &mut dyn MediaSink, raw: &str) {
    let input = raw.trim();
    if input.is_empty() {
        app.set_status("No command");
        return;
    }

    let mut command_split = input.splitn(2, char::is_whitespace);
    let command = command_split.next().unwrap_or_default();
    let rest = command_split.next().unwrap_or("").trim();

    match command {
        "help" => app.set_status(
            "Commands: connect [url] | autoplay <on|off> | play <row> | download | help",
        ),
        "connect" => app.start_connect((!rest.is_empty()).then_some(rest)),
        "autoplay" => match rest {
            "on" => app.sequencer.set_autoplay(true),
            "off" => app.sequencer.set_autoplay(false),
            _ => app.set_status("Usage: autoplay <on|off>"),
        },
        "play" => match rest.parse::<usize>() {
            Ok(row) if row >= 1 && row <= app.sequencer.catalog().len() => {
                app.play_row(row - 1, sink)
            }
            Ok(_) => app.set_status("No such row"),
            Err(_) => app.set_status("Usage: play <row>"),
        },
        "download" => app.download_row(app.selected_row),
        _ => app.set_status("Unknown command. Use :help"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audio::{PlayTicket, SinkEvent};
    use crate::gateway::{BackendGateway, ConnectionError, Endpoint};
    use crate::model::{Catalog, Track};
    use std::collections::VecDeque;
    use std::path::Path;
    use std::thread;
    use tempfile::tempdir;

    struct StaticGateway {
        outcome: Result<Catalog, ConnectionError>,
    }

    impl BackendGateway for StaticGateway {
        fn check_health(&self, _base: &Url) -> Result<(), ConnectionError> {
            self.outcome.as_ref().map(|_| ()).map_err(Clone::clone)
        }

        fn fetch_catalog(&self, _base: &Url) -> Result<Catalog, ConnectionError> {
            self.outcome.clone()
        }

        fn download(&self, _base: &Url, track: &Track, dest_dir: &Path) -> anyhow::Result<PathBuf> {
            Ok(dest_dir.join(&track.path))
        }
    }

    #[derive(Default)]
    struct ScriptedSink {
        played: Vec<(Url, PlayTicket)>,
        queued: VecDeque<SinkEvent>,
        paused: bool,
        stops: usize,
        volume: f32,
    }

    impl ScriptedSink {
        fn finish_current(&mut self) {
            let ticket = self.played.last().expect("something played").1;
            self.queued.push_back(SinkEvent::Finished { ticket });
        }

        fn fail_current(&mut self, reason: &str) {
            let ticket = self.played.last().expect("something played").1;
            self.queued.push_back(SinkEvent::Failed {
                ticket,
                reason: reason.to_string(),
            });
        }
    }

    impl MediaSink for ScriptedSink {
        fn play(&mut self, url: &Url, ticket: PlayTicket) {
            self.played.push((url.clone(), ticket));
            self.paused = false;
        }

        fn pause(&mut self) {
            self.paused = true;
        }

        fn resume(&mut self) {
            self.paused = false;
        }

        fn stop(&mut self) {
            self.stops += 1;
        }

        fn is_paused(&self) -> bool {
            self.paused
        }

        fn is_loading(&self) -> bool {
            false
        }

        fn position(&self) -> Option<Duration> {
            None
        }

        fn duration(&self) -> Option<Duration> {
            None
        }

        fn volume(&self) -> f32 {
            self.volume
        }

        fn set_volume(&mut self, volume: f32) {
            self.volume = volume;
        }

        fn output_name(&self) -> Option<String> {
            Some(String::from("scripted"))
        }

        fn poll_event(&mut self) -> Option<SinkEvent> {
            self.queued.pop_front()
        }
    }

    fn catalog() -> Catalog {
        Catalog::new(
            "/srv/music",
            vec![
                Track::new("a.mp3", 10),
                Track::new("b.mp3", 2048),
                Track::new("c.mp3", 3 * 1024 * 1024),
            ],
        )
    }

    fn app_with(outcome: Result<Catalog, ConnectionError>, autoplay: bool) -> App {
        let prefs = PersistedState {
            autoplay,
            ..PersistedState::default()
        };
        App::new(
            prefs,
            TaskRunner::new(Arc::new(StaticGateway { outcome })),
            None,
        )
    }

    fn connected_app(autoplay: bool) -> App {
        let mut app = app_with(Ok(catalog()), autoplay);
        app.sequencer.initialize(
            Url::parse("http://music.lan").expect("url"),
            catalog(),
        );
        app
    }

    fn pump_until(app: &mut App, sink: &mut ScriptedSink, done: impl Fn(&App) -> bool) -> bool {
        let deadline = Instant::now() + Duration::from_secs(2);
        while Instant::now() < deadline {
            app.pump(sink);
            if done(app) {
                return true;
            }
            thread::sleep(Duration::from_millis(5));
        }
        false
    }

    fn key(code: KeyCode) -> KeyEvent {
        KeyEvent::new(code, KeyModifiers::NONE)
    }

    #[test]
    fn connect_installs_catalog_and_stops_sink() {
        let mut app = app_with(Ok(catalog()), false);
        let mut sink = ScriptedSink::default();
        app.start_connect(Some("http://music.lan"));
        assert!(matches!(app.link, LinkStatus::Connecting(_)));

        assert!(pump_until(&mut app, &mut sink, |app| matches!(
            app.link,
            LinkStatus::Connected(_)
        )));
        assert_eq!(app.sequencer.catalog().len(), 3);
        assert_eq!(app.sequencer.current_index(), None);
        assert_eq!(sink.stops, 1);
        assert_eq!(app.status, "Connected");
        assert_eq!(
            app.toast.as_ref().map(|toast| toast.message.as_str()),
            Some("Connected to backend")
        );
        assert_eq!(app.prefs.backend, "http://music.lan");
    }

    #[test]
    fn failed_connect_keeps_previous_catalog() {
        let mut app = app_with(
            Err(ConnectionError::Transport {
                endpoint: Endpoint::Ping,
                reason: String::from("connection refused"),
            }),
            false,
        );
        let mut sink = ScriptedSink::default();
        let base = Url::parse("http://old.lan").expect("url");
        app.sequencer.initialize(base.clone(), catalog());
        app.play_row(1, &mut sink);

        app.start_connect(Some("http://new.lan"));
        assert!(pump_until(&mut app, &mut sink, |app| matches!(
            app.link,
            LinkStatus::Failed(_)
        )));

        assert_eq!(app.sequencer.base(), Some(&base));
        assert_eq!(app.sequencer.current_index(), Some(1));
        assert!(app.status.contains("connection refused"));
        assert_eq!(app.toast.as_ref().map(|toast| toast.kind), Some(ToastKind::Error));
        assert_eq!(sink.stops, 0);
    }

    #[test]
    fn sink_completion_advances_with_autoplay() {
        let mut app = connected_app(true);
        let mut sink = ScriptedSink::default();
        app.handle_key(key(KeyCode::Enter), &mut sink);
        assert_eq!(app.sequencer.current_index(), Some(0));

        sink.finish_current();
        app.pump(&mut sink);
        assert_eq!(app.sequencer.current_index(), Some(1));
        assert_eq!(sink.played.len(), 2);
    }

    #[test]
    fn end_of_list_is_toasted() {
        let mut app = connected_app(true);
        let mut sink = ScriptedSink::default();
        app.play_row(2, &mut sink);
        sink.finish_current();
        app.pump(&mut sink);

        assert_eq!(app.sequencer.current_index(), Some(2));
        assert_eq!(app.status, "Reached end of list");
        assert_eq!(sink.played.len(), 1);
    }

    #[test]
    fn playback_failure_without_autoplay_is_reported_only() {
        let mut app = connected_app(false);
        let mut sink = ScriptedSink::default();
        app.play_row(0, &mut sink);
        sink.fail_current("Stream failed (404)");
        app.pump(&mut sink);

        assert_eq!(app.sequencer.current_index(), Some(0));
        assert_eq!(sink.played.len(), 1);
        assert_eq!(app.toast.as_ref().map(|toast| toast.kind), Some(ToastKind::Error));
        assert!(app.status.contains("Stream failed (404)"));
    }

    #[test]
    fn autoplay_toggle_is_persisted() {
        let dir = tempdir().expect("tempdir");
        let path = dir.path().join("state.json");
        let mut app = App::new(
            PersistedState::default(),
            TaskRunner::new(Arc::new(StaticGateway { outcome: Ok(catalog()) })),
            Some(path.clone()),
        );
        let mut sink = ScriptedSink::default();

        app.handle_key(key(KeyCode::Char('a')), &mut sink);
        app.pump(&mut sink);

        assert!(app.prefs.autoplay);
        assert!(config::load_state_from(&path).expect("load").autoplay);
    }

    #[test]
    fn row_cursor_stays_in_catalog() {
        let mut app = connected_app(false);
        let mut sink = ScriptedSink::default();
        app.handle_key(key(KeyCode::End), &mut sink);
        assert_eq!(app.selected_row, 2);
        app.handle_key(key(KeyCode::Down), &mut sink);
        assert_eq!(app.selected_row, 2);
        app.handle_key(key(KeyCode::Home), &mut sink);
        assert_eq!(app.selected_row, 0);
    }

    #[test]
    fn pause_requires_a_playing_track() {
        let mut app = connected_app(false);
        let mut sink = ScriptedSink::default();
        app.handle_key(key(KeyCode::Char(' ')), &mut sink);
        assert!(!sink.paused);

        app.play_row(0, &mut sink);
        app.handle_key(key(KeyCode::Char(' ')), &mut sink);
        assert!(sink.paused);
        assert_eq!(app.status, "Paused");
    }

    #[test]
    fn play_command_uses_one_based_rows() {
        let mut app = connected_app(false);
        let mut sink = ScriptedSink::default();
        run_command(&mut app, &mut sink, "play 2");
        assert_eq!(app.sequencer.current_index(), Some(1));

        run_command(&mut app, &mut sink, "play 9");
        assert_eq!(app.status, "No such row");
        assert_eq!(app.sequencer.current_index(), Some(1));
    }

    #[test]
    fn command_mode_collects_input() {
        let mut app = connected_app(false);
        let mut sink = ScriptedSink::default();
        for code in [
            KeyCode::Char(':'),
            KeyCode::Char('a'),
            KeyCode::Char('u'),
            KeyCode::Char('t'),
            KeyCode::Char('o'),
            KeyCode::Char('p'),
            KeyCode::Char('l'),
            KeyCode::Char('a'),
            KeyCode::Char('y'),
            KeyCode::Char(' '),
            KeyCode::Char('o'),
            KeyCode::Char('n'),
            KeyCode::Enter,
        ] {
            app.handle_key(key(code), &mut sink);
        }
        assert!(!app.command_mode);
        assert!(app.sequencer.autoplay());
    }

    #[test]
    fn unknown_command_is_reported() {
        let mut app = app_with(Ok(catalog()), false);
        let mut sink = ScriptedSink::default();
        run_command(&mut app, &mut sink, "wat");
        assert!(app.status.contains("Unknown command"));
    }

    #[test]
    fn download_reports_saved_path() {
        let mut app = connected_app(false);
        let mut sink = ScriptedSink::default();
        app.prefs.download_dir = Some(PathBuf::from("downloads"));
        app.download_row(1);

        assert!(pump_until(&mut app, &mut sink, |app| app.status.starts_with("Saved")));
        assert!(app.status.contains("b.mp3"));
    }

    #[test]
    fn download_without_connection_is_refused() {
        let mut app = app_with(Ok(catalog()), false);
        app.download_row(0);
        assert_eq!(app.status, "Not connected");
    }

    #[test]
    fn loop_returns_after_quit_key() {
        let mut app = connected_app(false);
        let mut sink = ScriptedSink::default();
        let mut events = VecDeque::from([None, Some(Event::Key(key(KeyCode::Char('q'))))]);
        let mut draws = 0;

        let result = run_loop(
            &mut app,
            &mut sink,
            &mut |_: &App, _: &dyn MediaSink| -> Result<()> {
                draws += 1;
                Ok(())
            },
            &mut || Ok(events.pop_front().flatten()),
        );

        assert!(result.is_ok());
        assert!(draws >= 1);
    }

    #[test]
    fn input_error_ends_the_loop_with_that_error() {
        let mut app = connected_app(false);
        let mut sink = ScriptedSink::default();
        let mut draws = 0;

        let result = run_loop(
            &mut app,
            &mut sink,
            &mut |_: &App, _: &dyn MediaSink| -> Result<()> {
                draws += 1;
                Ok(())
            },
            &mut || Err(anyhow::anyhow!("terminal went away")),
        );

        let err = result.expect_err("input error");
        assert_eq!(err.to_string(), "terminal went away");
        assert_eq!(draws, 1);
    }

    #[test]
    fn draw_error_ends_the_loop_before_reading_input() {
        let mut app = connected_app(false);
        let mut sink = ScriptedSink::default();
        let mut reads = 0;

        let result = run_loop(
            &mut app,
            &mut sink,
            &mut |_: &App, _: &dyn MediaSink| -> Result<()> {
                Err(anyhow::anyhow!("backend write failed"))
            },
            &mut || {
                reads += 1;
                Ok(None)
            },
        );

        assert!(result.is_err());
        assert_eq!(reads, 0);
    }
}
