use std::env;
use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::time::Duration as StdDuration;

use serde::Deserialize;
use thiserror::Error;
use url::Url;

use crate::api::resolve_base_url;

const APP_DIR: &str = "f1_dashboard";
const CONFIG_FILE: &str = "config.toml";
const DEFAULT_ORIGIN: &str = "http://localhost:3000";
const DEFAULT_TIMEOUT_SECS: u64 = 10;

#[derive(Debug, Error)]
pub enum SettingsError {
	#[error("failed to read config {}: {source}", .path.display())]
	Io {
		path: PathBuf,
		#[source]
		source: std::io::Error,
	},

	#[error("failed to parse config {}: {source}", .path.display())]
	Toml {
		path: PathBuf,
		#[source]
		source: toml::de::Error,
	},

	#[error("invalid {field} URL '{value}': {source}")]
	Url {
		field: &'static str,
		value: String,
		#[source]
		source: url::ParseError,
	},

	#[error("invalid season '{0}', expected a year")]
	Season(String),
}

#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
struct FileSettings {
	origin: Option<String>,
	api: Option<String>,
	season: Option<i32>,
	request_timeout_secs: Option<u64>,
	log_dir: Option<PathBuf>,
}

/// Values given on the command line; they win over everything else.
#[derive(Debug, Default, Clone)]
pub struct Overrides {
	pub config: Option<PathBuf>,
	pub origin: Option<String>,
	pub api: Option<String>,
	pub season: Option<i32>,
}

#[derive(Debug, Clone)]
pub struct Settings {
	pub origin: Url,
	pub api: Option<Url>,
	pub season: Option<i32>,
	pub request_timeout: StdDuration,
	pub log_dir: PathBuf,
	pub config_path: Option<PathBuf>,
}

impl Settings {
	pub fn api_base(&self) -> Result<Url, SettingsError> {
		if let Some(api) = &self.api {
			return Ok(api.clone());
		}

		resolve_base_url(&self.origin).map_err(|source| SettingsError::Url {
			field: "origin",
			value: self.origin.to_string(),
			source,
		})
	}
}

pub fn resolve_settings(overrides: Overrides) -> Result<Settings, SettingsError> {
	resolve_with(overrides, |key| env::var(key).ok())
}

fn resolve_with(overrides: Overrides, lookup: impl Fn(&str) -> Option<String>) -> Result<Settings, SettingsError> {
	let config_path = overrides
		.config
		.clone()
		.or_else(|| non_empty(&lookup, "F1_DASHBOARD_CONFIG").map(PathBuf::from))
		.or_else(|| config_dir(&lookup).map(|dir| dir.join(CONFIG_FILE)));
	let (file, loaded_from) = match &config_path {
		Some(path) => match load_file_settings(path)? {
			Some(file) => (file, Some(path.clone())),
			None => (FileSettings::default(), None),
		},
		None => (FileSettings::default(), None),
	};

	let origin = overrides
		.origin
		.or_else(|| non_empty(&lookup, "F1_DASHBOARD_ORIGIN"))
		.or(file.origin)
		.unwrap_or_else(|| DEFAULT_ORIGIN.to_string());
	let api = overrides
		.api
		.or_else(|| non_empty(&lookup, "F1_DASHBOARD_API"))
		.or(file.api);
	let season = match overrides.season {
		Some(season) => Some(season),
		None => match non_empty(&lookup, "F1_DASHBOARD_SEASON") {
			Some(raw) => Some(parse_season(&raw)?),
			None => file.season,
		},
	};

	Ok(Settings {
		origin: parse_url("origin", &origin)?,
		api: api.as_deref().map(|raw| parse_url("api", raw)).transpose()?,
		season,
		request_timeout: StdDuration::from_secs(file.request_timeout_secs.unwrap_or(DEFAULT_TIMEOUT_SECS)),
		log_dir: file.log_dir.unwrap_or_else(|| state_dir(&lookup)),
		config_path: loaded_from,
	})
}

fn load_file_settings(path: &Path) -> Result<Option<FileSettings>, SettingsError> {
	let raw = match fs::read_to_string(path) {
		Ok(raw) => raw,
		Err(err) if err.kind() == ErrorKind::NotFound => return Ok(None),
		Err(source) => {
			return Err(SettingsError::Io {
				path: path.to_path_buf(),
				source,
			});
		}
	};

	toml::from_str(&raw).map(Some).map_err(|source| SettingsError::Toml {
		path: path.to_path_buf(),
		source,
	})
}

fn parse_url(field: &'static str, value: &str) -> Result<Url, SettingsError> {
	Url::parse(value).map_err(|source| SettingsError::Url {
		field,
		value: value.to_string(),
		source,
	})
}

fn parse_season(raw: &str) -> Result<i32, SettingsError> {
	raw.trim()
		.parse()
		.map_err(|_| SettingsError::Season(raw.to_string()))
}

fn non_empty(lookup: &impl Fn(&str) -> Option<String>, key: &str) -> Option<String> {
	lookup(key).filter(|value| !value.trim().is_empty())
}

fn config_dir(lookup: &impl Fn(&str) -> Option<String>) -> Option<PathBuf> {
	#[cfg(target_os = "windows")]
	{
		if let Some(path) = non_empty(lookup, "APPDATA") {
			return Some(PathBuf::from(path).join(APP_DIR));
		}
	}

	if let Some(path) = non_empty(lookup, "XDG_CONFIG_HOME") {
		return Some(PathBuf::from(path).join(APP_DIR));
	}

	non_empty(lookup, "HOME").map(|home| PathBuf::from(home).join(".config").join(APP_DIR))
}

fn state_dir(lookup: &impl Fn(&str) -> Option<String>) -> PathBuf {
	if let Some(path) = non_empty(lookup, "F1_DASHBOARD_STATE_DIR") {
		return PathBuf::from(path);
	}

	#[cfg(target_os = "windows")]
	{
		if let Some(path) = non_empty(lookup, "LOCALAPPDATA") {
			return PathBuf::from(path).join(APP_DIR);
		}
	}

	if let Some(path) = non_empty(lookup, "XDG_STATE_HOME") {
		return PathBuf::from(path).join(APP_DIR);
	}

	if let Some(path) = non_empty(lookup, "HOME") {
		return PathBuf::from(path).join(".local").join("state").join(APP_DIR);
	}

	PathBuf::from(".f1_dashboard")
}

#[cfg(test)]
mod tests {
	use std::collections::HashMap;
	use std::fs;
	use std::path::PathBuf;
	use std::time::Duration as StdDuration;

	use pretty_assertions::assert_eq;

	use super::{Overrides, SettingsError, resolve_with};

	fn env_of(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
		let map = pairs
			.iter()
			.map(|(key, value)| (key.to_string(), value.to_string()))
			.collect::<HashMap<_, _>>();
		move |key: &str| map.get(key).cloned()
	}

	#[test]
	fn defaults_to_local_development() {
		let dir = tempfile::tempdir().expect("tempdir");
		let home = dir.path().to_string_lossy().to_string();
		let settings = resolve_with(Overrides::default(), env_of(&[("HOME", home.as_str())])).expect("settings");

		assert_eq!(settings.origin.as_str(), "http://localhost:3000/");
		assert_eq!(settings.api_base().unwrap().as_str(), "http://localhost:5000/");
		assert_eq!(settings.request_timeout, StdDuration::from_secs(10));
		assert_eq!(settings.config_path, None);
		assert_eq!(
			settings.log_dir,
			dir.path().join(".local").join("state").join("f1_dashboard")
		);
	}

	#[test]
	fn layers_file_then_env_then_cli() {
		let dir = tempfile::tempdir().expect("tempdir");
		let path = dir.path().join("config.toml");
		fs::write(
			&path,
			"origin = \"https://file.example\"\nseason = 2023\nrequest_timeout_secs = 3\nlog_dir = \"/tmp/f1-logs\"\n",
		)
		.expect("write config");

		let lookup = env_of(&[("F1_DASHBOARD_ORIGIN", "https://env.example"), ("F1_DASHBOARD_SEASON", "2024")]);
		let settings = resolve_with(
			Overrides {
				config: Some(path.clone()),
				season: Some(2025),
				..Overrides::default()
			},
			lookup,
		)
		.expect("settings");

		assert_eq!(settings.origin.as_str(), "https://env.example/");
		assert_eq!(settings.season, Some(2025));
		assert_eq!(settings.request_timeout, StdDuration::from_secs(3));
		assert_eq!(settings.log_dir, PathBuf::from("/tmp/f1-logs"));
		assert_eq!(settings.config_path, Some(path));
		assert_eq!(
			settings.api_base().unwrap().as_str(),
			"https://env.example/.netlify/functions/api"
		);
	}

	#[test]
	fn explicit_api_skips_host_detection() {
		let settings = resolve_with(
			Overrides {
				config: Some(PathBuf::from("/nonexistent/f1/config.toml")),
				origin: Some("https://f1.example.app".to_string()),
				api: Some("http://10.0.0.5:5000".to_string()),
				..Overrides::default()
			},
			env_of(&[]),
		)
		.expect("settings");
		assert_eq!(settings.api_base().unwrap().as_str(), "http://10.0.0.5:5000/");
	}

	#[test]
	fn reports_bad_values() {
		let dir = tempfile::tempdir().expect("tempdir");
		let path = dir.path().join("config.toml");
		fs::write(&path, "colour = \"red\"\n").expect("write config");
		let err = resolve_with(
			Overrides {
				config: Some(path),
				..Overrides::default()
			},
			env_of(&[]),
		)
		.expect_err("unknown key should fail");
		assert!(matches!(err, SettingsError::Toml { .. }));

		let err = resolve_with(Overrides::default(), env_of(&[("F1_DASHBOARD_SEASON", "next")]))
			.expect_err("bad season should fail");
		assert_eq!(err.to_string(), "invalid season 'next', expected a year");

		let err = resolve_with(
			Overrides {
				origin: Some("not a url".to_string()),
				..Overrides::default()
			},
			env_of(&[]),
		)
		.expect_err("bad origin should fail");
		assert!(matches!(err, SettingsError::Url { field: "origin", .. }));
	}
}
