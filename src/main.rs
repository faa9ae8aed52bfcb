mod api;
mod domain;
mod payload;
mod settings;
mod ticker;
mod ui;

use std::error::Error;
use std::path::PathBuf;

use clap::{Parser, Subcommand};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_appender::rolling::{RollingFileAppender, Rotation};
use tracing_subscriber::EnvFilter;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt};

use crate::api::{HttpSource, load_dashboard};
use crate::domain::Filter;
use crate::settings::{Overrides, Settings, resolve_settings};
use crate::ui::{print_calendar, print_next_race, run_dashboard};

#[derive(Debug, Parser)]
#[command(name = "f1-dashboard", about = "Terminal dashboard for the race calendar and next-race countdown")]
struct Cli {
	/// Config file (TOML)
	#[arg(long)]
	config: Option<PathBuf>,
	/// Host the dashboard runs against; localhost selects the local API
	#[arg(long)]
	origin: Option<String>,
	/// API base URL, bypassing host detection
	#[arg(long)]
	api: Option<String>,
	#[arg(long)]
	season: Option<i32>,
	#[command(subcommand)]
	command: Option<Command>,
}

#[derive(Debug, Subcommand)]
enum Command {
	Dashboard,
	Next,
	Calendar {
		#[arg(long, value_enum, default_value_t = Filter::All)]
		filter: Filter,
	},
	Config,
}

fn main() {
	if let Err(err) = run() {
		eprintln!("error: {err}");
		std::process::exit(1);
	}
}

fn run() -> Result<(), Box<dyn Error>> {
	let cli = Cli::parse();
	let settings = resolve_settings(Overrides {
		config: cli.config,
		origin: cli.origin,
		api: cli.api,
		season: cli.season,
	})?;
	let _guard = setup_logging(&settings);

	match cli.command.unwrap_or(Command::Dashboard) {
		Command::Dashboard => {
			run_dashboard(&settings)?;
		}
		Command::Next => {
			let dashboard = fetch_once(&settings)?;
			print_next_race(&dashboard);
		}
		Command::Calendar { filter } => {
			let dashboard = fetch_once(&settings)?;
			print_calendar(&dashboard, filter);
		}
		Command::Config => {
			print_settings(&settings)?;
		}
	}

	Ok(())
}

fn fetch_once(settings: &Settings) -> Result<api::Dashboard, Box<dyn Error>> {
	let source = HttpSource::new(settings.api_base()?, settings.request_timeout)?;
	let mut dashboard = load_dashboard(&source, settings.season);
	if let Some(err) = dashboard.error.take() {
		if dashboard.next.is_none() && dashboard.calendar.is_empty() {
			return Err(err.into());
		}
		eprintln!("warning: {err}");
	}
	Ok(dashboard)
}

fn print_settings(settings: &Settings) -> Result<(), Box<dyn Error>> {
	println!(
		"config:   {}",
		settings
			.config_path
			.as_ref()
			.map(|path| path.display().to_string())
			.unwrap_or_else(|| "(none)".to_string())
	);
	println!("origin:   {}", settings.origin);
	println!("api:      {}", settings.api_base()?);
	println!(
		"season:   {}",
		settings
			.season
			.map(|season| season.to_string())
			.unwrap_or_else(|| "(current)".to_string())
	);
	println!("timeout:  {}s", settings.request_timeout.as_secs());
	println!("logs:     {}", settings.log_dir.display());
	Ok(())
}

/// File-only logging: stdout belongs to the terminal UI.
fn setup_logging(settings: &Settings) -> Option<WorkerGuard> {
	if let Err(err) = std::fs::create_dir_all(&settings.log_dir) {
		eprintln!("warning: logging disabled, cannot create {}: {err}", settings.log_dir.display());
		return None;
	}

	let file_appender = RollingFileAppender::new(
		Rotation::DAILY,
		&settings.log_dir,
		format!("f1_dashboard-{}.log", env!("CARGO_PKG_VERSION")),
	);
	let (non_blocking, guard) = tracing_appender::non_blocking(file_appender);
	let file_layer = fmt::layer().with_ansi(false).with_writer(non_blocking);
	let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("f1_dashboard=info"));

	tracing_subscriber::registry()
		.with(file_layer)
		.with(env_filter)
		.init();

	Some(guard)
}
