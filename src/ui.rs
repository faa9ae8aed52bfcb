use std::error::Error;
use std::io;
use std::thread;
use std::time::Duration as StdDuration;

use chrono::{DateTime, Datelike, Local, NaiveDateTime, Utc};
use crossbeam_channel::{Sender, unbounded};
use crossterm::event::{self, Event as CEvent, KeyCode, KeyEventKind};
use crossterm::cursor::Show;
use crossterm::terminal::{EnterAlternateScreen, LeaveAlternateScreen, disable_raw_mode, enable_raw_mode};
use crossterm::{ExecutableCommand, execute};
use ratatui::backend::CrosstermBackend;
use ratatui::layout::{Constraint, Direction, Layout, Rect};
use ratatui::style::{Color, Modifier, Style};
use ratatui::text::{Line, Span};
use ratatui::widgets::{Block, Borders, List, ListItem, ListState, Paragraph, Wrap};
use ratatui::{Frame, Terminal};
use tracing::{info, warn};
use url::Url;

use crate::api::{Dashboard, DashboardError, Endpoint, FetchError, HttpSource, load_dashboard};
use crate::domain::{Event, EventStatus, Filter, TimeLeft};
use crate::settings::Settings;
use crate::ticker::{CountdownSlot, TICK_PERIOD, Tick};

const INPUT_POLL: StdDuration = StdDuration::from_millis(250);
const ACCENT_COLOR: Color = Color::Red;
const INACTIVE_COLOR: Color = Color::DarkGray;
const HIGHLIGHT_BACKGROUND_COLOR: Color = Color::Rgb(42, 45, 52);

pub fn run_dashboard(settings: &Settings) -> Result<(), Box<dyn Error>> {
	let base = settings.api_base()?;
	info!("dashboard starting against {base}");

	let _restore = TerminalGuard::enter()?;
	let backend = CrosstermBackend::new(io::stdout());
	let mut terminal = Terminal::new(backend)?;

	run_event_loop(&mut terminal, settings, base)
}

/// Puts the terminal back in cooked mode when dropped, including on panic.
struct TerminalGuard {
	restore: fn() -> io::Result<()>,
}

impl TerminalGuard {
	fn enter() -> io::Result<Self> {
		enable_raw_mode()?;
		let guard = Self {
			restore: restore_terminal,
		};
		io::stdout().execute(EnterAlternateScreen)?;
		Ok(guard)
	}
}

impl Drop for TerminalGuard {
	fn drop(&mut self) {
		if let Err(err) = (self.restore)() {
			warn!("failed to restore terminal: {err}");
		}
	}
}

fn restore_terminal() -> io::Result<()> {
	disable_raw_mode()?;
	execute!(io::stdout(), LeaveAlternateScreen, Show)
}

fn run_event_loop(
	terminal: &mut Terminal<CrosstermBackend<io::Stdout>>,
	settings: &Settings,
	base: Url,
) -> Result<(), Box<dyn Error>> {
	let (load_tx, load_rx) = unbounded();
	let (tick_tx, tick_rx) = unbounded();
	let mut countdown = CountdownSlot::new(TICK_PERIOD, tick_tx);
	let mut app = App::new(settings.season);
	spawn_load(&mut app, &base, settings, &load_tx);

	loop {
		for loaded in load_rx.try_iter() {
			app.apply_load(loaded);
		}
		for tick in tick_rx.try_iter() {
			app.apply_tick(tick);
		}
		countdown.sync(app.countdown_target());

		let view = build_view(&app, Local::now().naive_local(), Utc::now());
		app.clamp_selection(&view);
		terminal.draw(|frame| draw_dashboard(frame, &app, &view))?;

		if event::poll(INPUT_POLL)? {
			if let CEvent::Key(key) = event::read()? {
				if key.kind != KeyEventKind::Press {
					continue;
				}

				match handle_key(&mut app, key.code, &view) {
					KeyAction::Quit => break,
					KeyAction::Reload => spawn_load(&mut app, &base, settings, &load_tx),
					KeyAction::Continue => {}
				}
			}
		}
	}

	Ok(())
}

/// Loads on a worker thread; the outcome comes back tagged with its generation.
fn spawn_load(app: &mut App, base: &Url, settings: &Settings, out: &Sender<Loaded>) {
	let generation = app.begin_load();
	let base = base.clone();
	let timeout = settings.request_timeout;
	let season = settings.season;
	let out = out.clone();

	thread::spawn(move || {
		let dashboard = match HttpSource::new(base, timeout) {
			Ok(source) => load_dashboard(&source, season),
			Err(err) => Dashboard {
				error: Some(DashboardError::Fetch {
					endpoint: Endpoint::NextRace,
					source: FetchError::Transport(err),
				}),
				..Dashboard::default()
			},
		};
		let _ = out.send(Loaded { generation, dashboard });
	});
}

fn draw_dashboard(frame: &mut Frame, app: &App, view: &ViewModel) {
	let banner_height = if app.dashboard.error.is_some() { 4 } else { 0 };
	let layout = Layout::default()
		.direction(Direction::Vertical)
		.constraints([
			Constraint::Length(3),
			Constraint::Length(banner_height),
			Constraint::Min(8),
			Constraint::Length(4),
		])
		.split(frame.area());

	render_header(frame, layout[0], view);
	if let Some(error) = &app.dashboard.error {
		render_error_banner(frame, layout[1], error);
	}

	if app.loading {
		render_loading(frame, layout[2]);
	} else if let Some(next) = &view.next {
		let body = Layout::default()
			.direction(Direction::Vertical)
			.constraints([Constraint::Length(9), Constraint::Min(5)])
			.split(layout[2]);
		render_next_race_panel(frame, body[0], next);
		render_calendar_panel(frame, body[1], app, view);
	} else {
		render_calendar_panel(frame, layout[2], app, view);
	}

	render_footer(frame, layout[3], app);
}

fn render_header(frame: &mut Frame, area: Rect, view: &ViewModel) {
	let line = Line::from(vec![
		Span::styled(
			" F1 ",
			Style::default().fg(Color::White).bg(ACCENT_COLOR).add_modifier(Modifier::BOLD),
		),
		Span::styled(" Dashboard", Style::default().add_modifier(Modifier::BOLD)),
		Span::raw("   "),
		Span::styled(format!("{} Season", view.season), Style::default().fg(ACCENT_COLOR)),
	]);
	let header = Paragraph::new(line).block(Block::default().borders(Borders::ALL));
	frame.render_widget(header, area);
}

fn render_error_banner(frame: &mut Frame, area: Rect, error: &DashboardError) {
	let lines = vec![
		Line::from(Span::styled(
			format!("Error: {error}"),
			Style::default().fg(Color::LightRed).add_modifier(Modifier::BOLD),
		)),
		Line::from("Please check your connection and try again."),
	];
	let banner = Paragraph::new(lines)
		.wrap(Wrap { trim: true })
		.block(Block::default().borders(Borders::ALL).border_style(Style::default().fg(Color::LightRed)));
	frame.render_widget(banner, area);
}

fn render_loading(frame: &mut Frame, area: Rect) {
	let loading = Paragraph::new(vec![Line::from(""), Line::from("  Loading race data...")])
		.block(Block::default().borders(Borders::ALL));
	frame.render_widget(loading, area);
}

fn render_next_race_panel(frame: &mut Frame, area: Rect, next: &NextRaceView) {
	let mut badge = vec![Span::styled(
		format!("Round {}", next.round),
		Style::default().add_modifier(Modifier::BOLD),
	)];
	if next.sprint {
		badge.push(Span::raw(" "));
		badge.push(Span::styled(
			" Sprint ",
			Style::default().fg(Color::Black).bg(Color::Yellow),
		));
	}
	badge.push(Span::raw(format!("  {}", next.date)));

	let mut countdown = Vec::new();
	for (value, label) in next.time_left.cells() {
		countdown.push(Span::styled(
			value,
			Style::default().fg(ACCENT_COLOR).add_modifier(Modifier::BOLD),
		));
		countdown.push(Span::styled(format!(" {label}   "), Style::default().fg(INACTIVE_COLOR)));
	}

	let lines = vec![
		Line::from(badge),
		Line::from(Span::styled(next.title.clone(), Style::default().add_modifier(Modifier::BOLD))),
		Line::from(next.location.clone()),
		Line::from(format!("Race starts at: {}", next.starts_at)),
		Line::from(""),
		Line::from(countdown),
	];

	let panel = Paragraph::new(lines).block(
		Block::default()
			.borders(Borders::ALL)
			.title("Next Race")
			.border_style(Style::default().fg(ACCENT_COLOR)),
	);
	frame.render_widget(panel, area);
}

fn render_calendar_panel(frame: &mut Frame, area: Rect, app: &App, view: &ViewModel) {
	let block = Block::default()
		.borders(Borders::ALL)
		.title(format!("{} Race Calendar", view.season));
	let inner = block.inner(area);
	frame.render_widget(block, area);

	let sections = Layout::default()
		.direction(Direction::Vertical)
		.constraints([Constraint::Length(2), Constraint::Min(1)])
		.split(inner);

	let mut tabs = vec![Span::raw("Filter Races: ")];
	for filter in [Filter::All, Filter::Upcoming, Filter::Completed] {
		let style = if filter == app.filter {
			Style::default().fg(Color::Black).bg(ACCENT_COLOR).add_modifier(Modifier::BOLD)
		} else {
			Style::default().fg(INACTIVE_COLOR)
		};
		tabs.push(Span::styled(format!(" {} ", filter.label()), style));
		tabs.push(Span::raw(" "));
	}
	frame.render_widget(Paragraph::new(Line::from(tabs)), sections[0]);

	if view.rows.is_empty() {
		frame.render_widget(Paragraph::new(app.filter.empty_message()), sections[1]);
		return;
	}

	let items = view
		.rows
		.iter()
		.map(|row| ListItem::new(render_row_line(row)))
		.collect::<Vec<_>>();
	let mut state = ListState::default();
	state.select(Some(app.selected.min(view.rows.len() - 1)));
	let list = List::new(items)
		.highlight_style(Style::default().bg(HIGHLIGHT_BACKGROUND_COLOR).add_modifier(Modifier::BOLD));
	frame.render_stateful_widget(list, sections[1], &mut state);
}

fn render_row_line(row: &CalendarRow) -> Line<'static> {
	let mut spans = vec![
		Span::styled(format!("{:>3} ", row.round), Style::default().add_modifier(Modifier::BOLD)),
		Span::styled(
			if row.sprint { "S " } else { "  " },
			Style::default().fg(Color::Yellow),
		),
		Span::styled(row.title.clone(), Style::default().add_modifier(Modifier::BOLD)),
		Span::raw(format!(" | {} | {} | ", row.location, row.date)),
		Span::styled(format!("● {}", row.status), status_style(row.status)),
	];

	if row.is_next {
		spans.push(Span::raw(" "));
		spans.push(Span::styled(
			" Next ",
			Style::default().fg(Color::White).bg(ACCENT_COLOR).add_modifier(Modifier::BOLD),
		));
	}

	Line::from(spans)
}

fn status_style(status: EventStatus) -> Style {
	match status {
		EventStatus::Upcoming => Style::default().fg(Color::Cyan),
		EventStatus::Ongoing => Style::default().fg(Color::Yellow).add_modifier(Modifier::BOLD),
		EventStatus::Completed => Style::default().fg(INACTIVE_COLOR),
	}
}

fn render_footer(frame: &mut Frame, area: Rect, app: &App) {
	let mut status = app.status.clone();
	if let Some(updated) = &app.dashboard.last_updated {
		status.push_str(&format!(" | data updated {updated}"));
	}

	let lines = vec![
		Line::from("a all | u upcoming | c completed | f/Tab cycle filter | j/k scroll | r reload | q quit"),
		Line::from(status),
	];
	let footer = Paragraph::new(lines).block(Block::default().borders(Borders::ALL).title("Shortcuts"));
	frame.render_widget(footer, area);
}

fn handle_key(app: &mut App, code: KeyCode, view: &ViewModel) -> KeyAction {
	match code {
		KeyCode::Char('q') | KeyCode::Esc => KeyAction::Quit,
		KeyCode::Char('r') => {
			if app.loading {
				app.status = "Already loading".to_string();
				KeyAction::Continue
			} else {
				KeyAction::Reload
			}
		}
		KeyCode::Char('a') => {
			app.set_filter(Filter::All);
			KeyAction::Continue
		}
		KeyCode::Char('u') => {
			app.set_filter(Filter::Upcoming);
			KeyAction::Continue
		}
		KeyCode::Char('c') => {
			app.set_filter(Filter::Completed);
			KeyAction::Continue
		}
		KeyCode::Char('f') | KeyCode::Tab => {
			app.set_filter(app.filter.next());
			KeyAction::Continue
		}
		KeyCode::Up | KeyCode::Char('k') => {
			app.move_selection(-1, view);
			KeyAction::Continue
		}
		KeyCode::Down | KeyCode::Char('j') => {
			app.move_selection(1, view);
			KeyAction::Continue
		}
		KeyCode::Home | KeyCode::Char('g') => {
			app.selected = 0;
			KeyAction::Continue
		}
		KeyCode::End | KeyCode::Char('G') => {
			app.selected = view.rows.len().saturating_sub(1);
			KeyAction::Continue
		}
		_ => KeyAction::Continue,
	}
}

fn build_view(app: &App, now: NaiveDateTime, utc_now: DateTime<Utc>) -> ViewModel {
	let next_event = app.dashboard.next.as_ref();
	let season = app
		.dashboard
		.season
		.or(app.season)
		.or_else(|| next_event.and_then(|next| next.date).map(|date| date.year()))
		.unwrap_or_else(|| now.year());

	let rows = app
		.filter
		.apply(&app.dashboard.calendar, now)
		.into_iter()
		.map(|(event, status)| CalendarRow {
			round: round_label(event),
			sprint: event.sprint,
			title: event.title().to_string(),
			location: event.location.to_string(),
			date: event.date_label(),
			status,
			is_next: event.is_next(next_event),
		})
		.collect();

	let next = next_event.map(|next| {
		let time_left = match (app.time_left, next.countdown_target()) {
			(Some(time_left), _) => time_left,
			(None, Some(target)) => TimeLeft::until(target, utc_now),
			(None, None) => TimeLeft::default(),
		};
		NextRaceView {
			round: round_label(next),
			sprint: next.sprint,
			date: next.date_label(),
			title: next.title().to_string(),
			location: next.location.to_string(),
			starts_at: next.start_time_label(),
			time_left,
		}
	});

	ViewModel { season, rows, next }
}

fn round_label(event: &Event) -> String {
	event
		.round
		.map(|round| round.to_string())
		.unwrap_or_else(|| "-".to_string())
}

#[derive(Debug)]
struct Loaded {
	generation: u64,
	dashboard: Dashboard,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum KeyAction {
	Continue,
	Reload,
	Quit,
}

#[derive(Debug)]
struct App {
	season: Option<i32>,
	generation: u64,
	loading: bool,
	dashboard: Dashboard,
	time_left: Option<TimeLeft>,
	filter: Filter,
	selected: usize,
	status: String,
}

impl App {
	fn new(season: Option<i32>) -> Self {
		Self {
			season,
			generation: 0,
			loading: false,
			dashboard: Dashboard::default(),
			time_left: None,
			filter: Filter::All,
			selected: 0,
			status: "Ready".to_string(),
		}
	}

	fn begin_load(&mut self) -> u64 {
		self.generation += 1;
		self.loading = true;
		self.dashboard = Dashboard::default();
		self.time_left = None;
		self.selected = 0;
		self.status = "Loading...".to_string();
		self.generation
	}

	fn apply_load(&mut self, loaded: Loaded) {
		if loaded.generation != self.generation {
			warn!("discarding stale load {} (current {})", loaded.generation, self.generation);
			return;
		}

		self.loading = false;
		self.status = match &loaded.dashboard.error {
			Some(_) => "Load failed, press r to retry".to_string(),
			None => format!("Loaded {} races", loaded.dashboard.calendar.len()),
		};
		self.dashboard = loaded.dashboard;
	}

	fn apply_tick(&mut self, tick: Tick) {
		if self.countdown_target() == Some(tick.target) {
			self.time_left = Some(tick.left);
		}
	}

	fn countdown_target(&self) -> Option<DateTime<Utc>> {
		if self.loading {
			return None;
		}
		self.dashboard.next.as_ref().and_then(Event::countdown_target)
	}

	fn set_filter(&mut self, filter: Filter) {
		self.filter = filter;
		self.selected = 0;
		self.status = format!("Showing {} races", filter.label().to_lowercase());
	}

	fn clamp_selection(&mut self, view: &ViewModel) {
		self.selected = self.selected.min(view.rows.len().saturating_sub(1));
	}

	fn move_selection(&mut self, delta: i32, view: &ViewModel) {
		if view.rows.is_empty() {
			self.selected = 0;
			return;
		}

		if delta > 0 {
			self.selected = (self.selected + delta as usize).min(view.rows.len() - 1);
		} else {
			self.selected = self.selected.saturating_sub(delta.unsigned_abs() as usize);
		}
	}
}

#[derive(Debug)]
struct ViewModel {
	season: i32,
	rows: Vec<CalendarRow>,
	next: Option<NextRaceView>,
}

#[derive(Debug)]
struct CalendarRow {
	round: String,
	sprint: bool,
	title: String,
	location: String,
	date: String,
	status: EventStatus,
	is_next: bool,
}

#[derive(Debug)]
struct NextRaceView {
	round: String,
	sprint: bool,
	date: String,
	title: String,
	location: String,
	starts_at: String,
	time_left: TimeLeft,
}

/// One-shot rendering of the next race for the `next` command.
pub fn print_next_race(dashboard: &Dashboard) {
	let Some(next) = &dashboard.next else {
		println!("no next race available");
		return;
	};

	println!("Next race: round {} {}", round_label(next), next.title());
	if next.sprint {
		println!("  sprint weekend");
	}
	println!("  {}", next.location);
	println!("  {} | starts at {}", next.date_label(), next.start_time_label());
	let time_left = next
		.countdown_target()
		.map(|target| TimeLeft::until(target, Utc::now()))
		.unwrap_or_default();
	println!("  countdown: {time_left}");
}

/// One-shot rendering of the filtered calendar for the `calendar` command.
pub fn print_calendar(dashboard: &Dashboard, filter: Filter) {
	let now = Local::now().naive_local();
	let rows = filter.apply(&dashboard.calendar, now);
	if rows.is_empty() {
		println!("{}", filter.empty_message());
		return;
	}

	for (event, status) in rows {
		println!(
			"{:>3} {} {} | {} | {} | {}{}",
			round_label(event),
			if event.sprint { "S" } else { " " },
			event.title(),
			event.location,
			event.date_label(),
			status,
			if event.is_next(dashboard.next.as_ref()) { " | next" } else { "" }
		);
	}
}
