use std::fmt::{Display, Formatter};
use std::time::Duration as StdDuration;

use serde_json::Value;
use thiserror::Error;
use tracing::{info, warn};
use url::Url;

use crate::domain::Event;
use crate::payload::{decode_calendar, decode_event};

pub const LOCAL_API_BASE: &str = "http://localhost:5000";
pub const DEPLOYED_FUNCTION_PATH: &str = "/.netlify/functions/api";
const LOCAL_HOSTS: [&str; 2] = ["localhost", "127.0.0.1"];

/// Picks the API root from the host the dashboard runs against.
pub fn resolve_base_url(origin: &Url) -> Result<Url, url::ParseError> {
    match origin.host_str() {
        Some(host) if LOCAL_HOSTS.contains(&host) => Url::parse(LOCAL_API_BASE),
        _ => origin.join(DEPLOYED_FUNCTION_PATH),
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Endpoint {
    NextRace,
    Calendar { season: Option<i32> },
}

impl Endpoint {
    pub fn path(&self) -> String {
        match self {
            Endpoint::NextRace => "next-race".to_string(),
            Endpoint::Calendar { season: None } => "calendar".to_string(),
            Endpoint::Calendar { season: Some(year) } => format!("calendar/{year}"),
        }
    }

    fn title(&self) -> &'static str {
        match self {
            Endpoint::NextRace => "Next race",
            Endpoint::Calendar { .. } => "Calendar",
        }
    }
}

impl Display for Endpoint {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Endpoint::NextRace => f.write_str("next race"),
            Endpoint::Calendar { .. } => f.write_str("calendar"),
        }
    }
}

#[derive(Debug, Error)]
pub enum FetchError {
    #[error("server responded with HTTP {0}")]
    Status(u16),

    #[error("request failed: {0}")]
    Transport(#[from] reqwest::Error),

    #[error("response is not valid JSON: {0}")]
    Json(#[from] serde_json::Error),
}

#[derive(Debug, Error)]
pub enum DashboardError {
    #[error("Failed to fetch {endpoint} data ({source})")]
    Fetch {
        endpoint: Endpoint,
        #[source]
        source: FetchError,
    },

    #[error("{} data has invalid format", .endpoint.title())]
    InvalidFormat {
        endpoint: Endpoint,
        #[source]
        source: serde_json::Error,
    },
}

/// Read side of the dashboard backend.
pub trait ApiSource {
    fn get_json(&self, path: &str) -> Result<Value, FetchError>;
}

pub struct HttpSource {
    base: Url,
    client: reqwest::blocking::Client,
}

impl HttpSource {
    pub fn new(base: Url, timeout: StdDuration) -> Result<Self, reqwest::Error> {
        let client = reqwest::blocking::Client::builder()
            .timeout(timeout)
            .user_agent(concat!(env!("CARGO_PKG_NAME"), "/", env!("CARGO_PKG_VERSION")))
            .build()?;
        Ok(Self { base, client })
    }

    pub fn endpoint_url(&self, path: &str) -> String {
        format!("{}/{}", self.base.as_str().trim_end_matches('/'), path)
    }
}

impl ApiSource for HttpSource {
    fn get_json(&self, path: &str) -> Result<Value, FetchError> {
        let url = self.endpoint_url(path);
        info!("GET {url}");

        let response = self.client.get(&url).send()?;
        let status = response.status();
        if !status.is_success() {
            return Err(FetchError::Status(status.as_u16()));
        }

        let body = response.text()?;
        Ok(serde_json::from_str(&body)?)
    }
}

/// Outcome of one load. `error` is the single message shown to the user.
#[derive(Debug, Default)]
pub struct Dashboard {
    pub next: Option<Event>,
    pub calendar: Vec<Event>,
    pub season: Option<i32>,
    pub last_updated: Option<String>,
    pub error: Option<DashboardError>,
}

impl Dashboard {
    fn failed(error: DashboardError) -> Self {
        warn!("dashboard load failed: {error}");
        Self {
            error: Some(error),
            ..Self::default()
        }
    }
}

/// Fetches the next race, then the calendar. Neither is published unless both
/// requests succeed; a calendar of unknown shape keeps the next race.
pub fn load_dashboard(api: &impl ApiSource, season: Option<i32>) -> Dashboard {
    let next_endpoint = Endpoint::NextRace;
    let next_value = match api.get_json(&next_endpoint.path()) {
        Ok(value) => value,
        Err(source) => {
            return Dashboard::failed(DashboardError::Fetch {
                endpoint: next_endpoint,
                source,
            });
        }
    };

    let calendar_endpoint = Endpoint::Calendar { season };
    let calendar_value = match api.get_json(&calendar_endpoint.path()) {
        Ok(value) => value,
        Err(source) => {
            return Dashboard::failed(DashboardError::Fetch {
                endpoint: calendar_endpoint,
                source,
            });
        }
    };

    let next = match decode_event(next_value) {
        Ok(next) => next,
        Err(source) => {
            return Dashboard::failed(DashboardError::InvalidFormat {
                endpoint: next_endpoint,
                source,
            });
        }
    };

    match decode_calendar(calendar_value) {
        Ok(calendar) => {
            info!(
                "loaded {} events, next round {:?}",
                calendar.events.len(),
                next.round
            );
            let matches = calendar
                .events
                .iter()
                .filter(|event| event.is_next(Some(&next)))
                .count();
            if matches > 1 {
                warn!("{matches} calendar entries share next round {:?}", next.round);
            }

            Dashboard {
                next: Some(next),
                calendar: calendar.events,
                season: calendar.season,
                last_updated: calendar.last_updated,
                error: None,
            }
        }
        Err(source) => {
            let error = DashboardError::InvalidFormat {
                endpoint: calendar_endpoint,
                source,
            };
            warn!("dashboard load failed: {error}");
            Dashboard {
                next: Some(next),
                error: Some(error),
                ..Dashboard::default()
            }
        }
    }
}

#[cfg(test)]
pub mod tests {
    use std::cell::RefCell;
    use std::collections::HashMap;

    use pretty_assertions::assert_eq;
    use serde_json::{Value, json};
    use url::Url;

    use crate::domain::EventStatus;

    use super::{ApiSource, DashboardError, FetchError, HttpSource, load_dashboard, resolve_base_url};

    /// Canned responses keyed by path; unknown paths answer 404.
    #[derive(Default)]
    pub struct FakeSource {
        responses: HashMap<String, Result<Value, u16>>,
        pub requested: RefCell<Vec<String>>,
    }

    impl FakeSource {
        pub fn with(mut self, path: &str, response: Result<Value, u16>) -> Self {
            self.responses.insert(path.to_string(), response);
            self
        }
    }

    impl ApiSource for FakeSource {
        fn get_json(&self, path: &str) -> Result<Value, FetchError> {
            self.requested.borrow_mut().push(path.to_string());
            match self.responses.get(path) {
                Some(Ok(value)) => Ok(value.clone()),
                Some(Err(status)) => Err(FetchError::Status(*status)),
                None => Err(FetchError::Status(404)),
            }
        }
    }

    fn next_race() -> Value {
        json!({"round": 1, "date": "2030-01-01", "time": "14:00:00", "raceName": "Test GP"})
    }

    #[test]
    fn resolves_local_and_deployed_hosts() {
        let local = Url::parse("http://localhost:3000/").unwrap();
        let loopback = Url::parse("http://127.0.0.1:8080/index.html").unwrap();
        let deployed = Url::parse("https://f1.example.app/season/").unwrap();

        assert_eq!(resolve_base_url(&local).unwrap().as_str(), "http://localhost:5000/");
        assert_eq!(resolve_base_url(&loopback).unwrap().as_str(), "http://localhost:5000/");
        assert_eq!(
            resolve_base_url(&deployed).unwrap().as_str(),
            "https://f1.example.app/.netlify/functions/api"
        );
    }

    #[test]
    fn joins_endpoint_paths_onto_the_base() {
        let source = HttpSource::new(
            Url::parse("https://f1.example.app/.netlify/functions/api").unwrap(),
            std::time::Duration::from_secs(1),
        )
        .expect("client should build");
        assert_eq!(
            source.endpoint_url("calendar/2025"),
            "https://f1.example.app/.netlify/functions/api/calendar/2025"
        );
    }

    #[test]
    fn loads_wrapped_calendar_and_next_race() {
        let source = FakeSource::default()
            .with("next-race", Ok(next_race()))
            .with(
                "calendar",
                Ok(json!({"races": [{"round": 1, "date": "2030-01-01", "raceName": "Test GP"}]})),
            );

        let dashboard = load_dashboard(&source, None);
        assert!(dashboard.error.is_none());
        assert_eq!(dashboard.calendar.len(), 1);
        assert_eq!(dashboard.calendar[0].title(), "Test GP");
        assert!(dashboard.calendar[0].is_next(dashboard.next.as_ref()));

        let now = chrono::NaiveDate::from_ymd_opt(2026, 10, 18)
            .unwrap()
            .and_hms_opt(12, 0, 0)
            .unwrap();
        assert_eq!(dashboard.calendar[0].status(now), Some(EventStatus::Upcoming));
        assert_eq!(*source.requested.borrow(), vec!["next-race", "calendar"]);
    }

    #[test]
    fn next_race_failure_stops_before_the_calendar() {
        let source = FakeSource::default()
            .with("next-race", Err(500))
            .with("calendar", Ok(json!([])));

        let dashboard = load_dashboard(&source, None);
        assert!(dashboard.next.is_none());
        assert!(dashboard.calendar.is_empty());
        let error = dashboard.error.expect("error should be set");
        assert!(matches!(
            error,
            DashboardError::Fetch {
                source: FetchError::Status(500),
                ..
            }
        ));
        assert_eq!(
            error.to_string(),
            "Failed to fetch next race data (server responded with HTTP 500)"
        );
        assert_eq!(*source.requested.borrow(), vec!["next-race"]);
    }

    #[test]
    fn calendar_failure_discards_the_next_race() {
        let source = FakeSource::default()
            .with("next-race", Ok(next_race()))
            .with("calendar", Err(503));

        let dashboard = load_dashboard(&source, None);
        assert!(dashboard.next.is_none());
        assert!(dashboard.calendar.is_empty());
        assert!(dashboard.error.is_some());
    }

    #[test]
    fn malformed_calendar_keeps_next_race_and_empties_the_list() {
        let source = FakeSource::default()
            .with("next-race", Ok(next_race()))
            .with("calendar", Ok(json!({"foo": 1})));

        let dashboard = load_dashboard(&source, None);
        assert!(dashboard.next.is_some());
        assert!(dashboard.calendar.is_empty());
        assert_eq!(
            dashboard.error.map(|error| error.to_string()).as_deref(),
            Some("Calendar data has invalid format")
        );
    }

    #[test]
    fn requests_the_configured_season() {
        let source = FakeSource::default()
            .with("next-race", Ok(next_race()))
            .with("calendar/2025", Ok(json!({"year": 2025, "races": []})));

        let dashboard = load_dashboard(&source, Some(2025));
        assert!(dashboard.error.is_none());
        assert_eq!(dashboard.season, Some(2025));
        assert_eq!(*source.requested.borrow(), vec!["next-race", "calendar/2025"]);
    }
}
