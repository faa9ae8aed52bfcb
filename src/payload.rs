use chrono::{DateTime, FixedOffset, NaiveDate, NaiveDateTime, NaiveTime, Offset, Utc};
use serde::{Deserialize, Deserializer};
use serde_json::Value;
use tracing::warn;

use crate::domain::{Event, Location, UNKNOWN};

const DATE_FORMAT: &str = "%Y-%m-%d";
const NAIVE_STAMP_FORMAT: &str = "%Y-%m-%dT%H:%M:%S%.f";
const TIME_FORMATS: [&str; 2] = ["%H:%M:%S", "%H:%M"];

/// Event record exactly as the API sends it.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RawEvent {
    #[serde(default, deserialize_with = "deserialize_round")]
    pub round: Option<u32>,
    pub race_name: Option<String>,
    pub date: Option<String>,
    pub time: Option<String>,
    pub sprint: Option<bool>,
    #[serde(rename = "Circuit")]
    pub circuit: Option<RawCircuit>,
    pub location: Option<String>,
    pub country: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct RawCircuit {
    #[serde(rename = "Location")]
    pub location: Option<RawCircuitLocation>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct RawCircuitLocation {
    pub locality: Option<String>,
    pub country: Option<String>,
}

#[derive(Deserialize)]
#[serde(untagged)]
enum RoundField {
    Number(u32),
    Text(String),
}

fn deserialize_round<'de, D>(deserializer: D) -> Result<Option<u32>, D::Error>
where
    D: Deserializer<'de>,
{
    let round = Option::<RoundField>::deserialize(deserializer)?;
    Ok(match round {
        Some(RoundField::Number(round)) => Some(round),
        Some(RoundField::Text(raw)) => raw.trim().parse().ok(),
        None => None,
    })
}

/// The two location layouts the API is known to produce.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LocationShape<'a> {
    Circuit {
        locality: Option<&'a str>,
        country: Option<&'a str>,
    },
    Flat {
        locality: &'a str,
        country: &'a str,
    },
    Missing,
}

impl RawEvent {
    pub fn location_shape(&self) -> LocationShape<'_> {
        if let Some(location) = self.circuit.as_ref().and_then(|circuit| circuit.location.as_ref()) {
            return LocationShape::Circuit {
                locality: location.locality.as_deref(),
                country: location.country.as_deref(),
            };
        }

        match (self.location.as_deref(), self.country.as_deref()) {
            (Some(locality), Some(country)) => LocationShape::Flat { locality, country },
            _ => LocationShape::Missing,
        }
    }

    pub fn normalize(&self) -> Event {
        let stamp = self.date.as_deref().and_then(parse_date);
        // An explicit time field wins over a time carried inside the date.
        let (time, offset) = match (self.time.as_deref().and_then(parse_time), stamp) {
            (Some(clock), _) => (Some(clock.time), clock.offset),
            (None, Some(stamp)) => (stamp.time, stamp.offset),
            (None, None) => (None, None),
        };

        Event {
            round: self.round,
            name: self.race_name.clone(),
            date: stamp.map(|stamp| stamp.date),
            time,
            offset,
            sprint: self.sprint.unwrap_or(false),
            location: self.location_shape().into(),
        }
    }
}

impl From<LocationShape<'_>> for Location {
    fn from(shape: LocationShape<'_>) -> Self {
        match shape {
            LocationShape::Circuit { locality, country } => Location {
                locality: locality.unwrap_or(UNKNOWN).to_string(),
                country: country.unwrap_or(UNKNOWN).to_string(),
            },
            LocationShape::Flat { locality, country } => Location {
                locality: locality.to_string(),
                country: country.to_string(),
            },
            LocationShape::Missing => Location::default(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum SeasonField {
    Number(i32),
    Text(String),
}

impl SeasonField {
    pub fn year(&self) -> Option<i32> {
        match self {
            SeasonField::Number(year) => Some(*year),
            SeasonField::Text(raw) => raw.trim().parse().ok(),
        }
    }
}

/// Entries stay raw here so one malformed record cannot sink the calendar.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CalendarEnvelope {
    pub races: Vec<Value>,
    pub year: Option<SeasonField>,
    #[serde(alias = "last_updated")]
    pub last_updated: Option<String>,
}

/// Calendar responses come either as a bare list or wrapped under `races`.
/// Anything else fails to decode.
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum CalendarPayload {
    List(Vec<Value>),
    Wrapped(CalendarEnvelope),
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Calendar {
    pub events: Vec<Event>,
    pub season: Option<i32>,
    pub last_updated: Option<String>,
}

impl CalendarPayload {
    pub fn into_calendar(self) -> Calendar {
        match self {
            CalendarPayload::List(races) => Calendar {
                events: normalize_all(races),
                season: None,
                last_updated: None,
            },
            CalendarPayload::Wrapped(envelope) => Calendar {
                events: normalize_all(envelope.races),
                season: envelope.year.as_ref().and_then(SeasonField::year),
                last_updated: envelope.last_updated,
            },
        }
    }
}

fn normalize_all(races: Vec<Value>) -> Vec<Event> {
    races
        .into_iter()
        .enumerate()
        .filter(|(_, value)| !value.is_null())
        .filter_map(|(index, value)| match serde_json::from_value::<RawEvent>(value) {
            Ok(raw) => Some(raw.normalize()),
            Err(err) => {
                warn!("skipping calendar entry {index}: {err}");
                None
            }
        })
        .collect()
}

pub fn decode_calendar(value: Value) -> Result<Calendar, serde_json::Error> {
    serde_json::from_value::<CalendarPayload>(value).map(CalendarPayload::into_calendar)
}

pub fn decode_event(value: Value) -> Result<Event, serde_json::Error> {
    serde_json::from_value::<RawEvent>(value).map(|raw| raw.normalize())
}

#[derive(Debug, Clone, Copy)]
struct DateStamp {
    date: NaiveDate,
    time: Option<NaiveTime>,
    offset: Option<FixedOffset>,
}

#[derive(Debug, Clone, Copy)]
struct ClockTime {
    time: NaiveTime,
    offset: Option<FixedOffset>,
}

/// Accepts RFC 3339 timestamps, zone-less ISO timestamps and plain dates.
fn parse_date(raw: &str) -> Option<DateStamp> {
    let raw = raw.trim();
    if let Ok(stamp) = DateTime::parse_from_rfc3339(raw) {
        return Some(DateStamp {
            date: stamp.date_naive(),
            time: Some(stamp.time()),
            offset: Some(*stamp.offset()),
        });
    }

    if let Ok(naive) = NaiveDateTime::parse_from_str(raw, NAIVE_STAMP_FORMAT) {
        return Some(DateStamp {
            date: naive.date(),
            time: Some(naive.time()),
            offset: None,
        });
    }

    let day = raw.get(..10).unwrap_or(raw);
    NaiveDate::parse_from_str(day, DATE_FORMAT).ok().map(|date| DateStamp {
        date,
        time: None,
        offset: None,
    })
}

/// A trailing `Z` pins the time to UTC.
fn parse_time(raw: &str) -> Option<ClockTime> {
    let raw = raw.trim();
    let (clock, offset) = match raw.strip_suffix('Z') {
        Some(clock) => (clock, Some(Utc.fix())),
        None => (raw, None),
    };
    TIME_FORMATS
        .iter()
        .find_map(|format| NaiveTime::parse_from_str(clock, format).ok())
        .map(|time| ClockTime { time, offset })
}

#[cfg(test)]
mod tests {
    use chrono::{FixedOffset, NaiveDate, NaiveTime, TimeZone, Utc};
    use pretty_assertions::assert_eq;
    use serde_json::json;

    use crate::domain::Location;

    use super::{LocationShape, RawEvent, decode_calendar, decode_event};

    #[test]
    fn decodes_bare_and_wrapped_calendars_alike() {
        let race = json!({"round": 1, "date": "2030-01-01", "raceName": "Test GP"});

        let bare = decode_calendar(json!([race.clone()])).expect("bare list should decode");
        let wrapped = decode_calendar(json!({
            "year": "2030",
            "lastUpdated": "2030-01-01T00:00:00Z",
            "races": [race],
        }))
        .expect("wrapped list should decode");

        assert_eq!(bare.events, wrapped.events);
        assert_eq!(bare.season, None);
        assert_eq!(wrapped.season, Some(2030));
        assert_eq!(wrapped.last_updated.as_deref(), Some("2030-01-01T00:00:00Z"));
        assert_eq!(wrapped.events[0].title(), "Test GP");
        assert_eq!(wrapped.events[0].date, NaiveDate::from_ymd_opt(2030, 1, 1));

        let snake = decode_calendar(json!({
            "year": 2025,
            "last_updated": "2025-03-01T00:00:00+00:00",
            "races": [],
        }))
        .expect("snake_case envelope should decode");
        assert_eq!(snake.season, Some(2025));
        assert_eq!(snake.last_updated.as_deref(), Some("2025-03-01T00:00:00+00:00"));
    }

    #[test]
    fn drops_malformed_entries_and_keeps_the_rest() {
        let races = json!([
            {"round": 1, "date": "2030-03-01", "raceName": "A GP"},
            {"round": 2, "date": "2030-03-08", "raceName": "B GP", "sprint": "yes"},
            {"round": -3, "raceName": "C GP"},
            "not an event",
            {"round": 4, "date": "2030-03-22", "raceName": "D GP"},
        ]);

        let bare = decode_calendar(races.clone()).expect("list with bad entries should decode");
        let titles: Vec<&str> = bare.events.iter().map(|event| event.title()).collect();
        assert_eq!(titles, vec!["A GP", "D GP"]);

        let wrapped = decode_calendar(json!({"races": races})).expect("wrapped list should decode");
        assert_eq!(wrapped.events, bare.events);
    }

    #[test]
    fn rejects_payloads_of_neither_shape() {
        assert!(decode_calendar(json!({"foo": 1})).is_err());
        assert!(decode_calendar(json!("calendar")).is_err());
        assert!(decode_calendar(json!({"races": {"round": 1}})).is_err());
        assert!(decode_event(json!("next race")).is_err());
    }

    #[test]
    fn skips_null_entries_and_tolerates_sparse_records() {
        let calendar = decode_calendar(json!([null, {"raceName": "Sparse GP"}, {"round": "7", "date": "bogus"}]))
            .expect("list should decode");
        assert_eq!(calendar.events.len(), 2);
        assert_eq!(calendar.events[0].round, None);
        assert_eq!(calendar.events[0].date, None);
        assert_eq!(calendar.events[1].round, Some(7));
        assert_eq!(calendar.events[1].date, None);
        assert_eq!(calendar.events[1].title(), "Unknown Race");
    }

    #[test]
    fn parses_times_with_and_without_zone_suffix() {
        let event = decode_event(json!({"round": 3, "date": "2026-04-12", "time": "13:00:00Z", "sprint": true}))
            .expect("event should decode");
        assert_eq!(event.time, NaiveTime::from_hms_opt(13, 0, 0));
        assert_eq!(event.countdown_target(), Some(Utc.with_ymd_and_hms(2026, 4, 12, 13, 0, 0).unwrap()));
        assert!(event.sprint);

        let event = decode_event(json!({"date": "2026-04-12T00:00:00", "time": "15:30"}))
            .expect("event should decode");
        assert_eq!(event.date, NaiveDate::from_ymd_opt(2026, 4, 12));
        assert_eq!(event.time, NaiveTime::from_hms_opt(15, 30, 0));
        assert_eq!(event.offset, None);
        assert!(!event.sprint);
    }

    #[test]
    fn reads_full_timestamps_in_the_date_field() {
        let event = decode_event(json!({"date": "2025-03-16T04:00:00+00:00"})).expect("event should decode");
        assert_eq!(event.date, NaiveDate::from_ymd_opt(2025, 3, 16));
        assert_eq!(event.time, NaiveTime::from_hms_opt(4, 0, 0));
        assert_eq!(event.countdown_target(), Some(Utc.with_ymd_and_hms(2025, 3, 16, 4, 0, 0).unwrap()));

        let event = decode_event(json!({"date": "2025-04-06T14:00:00+09:00"})).expect("event should decode");
        assert_eq!(event.offset, FixedOffset::east_opt(9 * 3600));
        assert_eq!(event.countdown_target(), Some(Utc.with_ymd_and_hms(2025, 4, 6, 5, 0, 0).unwrap()));

        let event = decode_event(json!({"date": "2025-04-06T14:00:00.250000"})).expect("event should decode");
        assert_eq!(event.offset, None);
        assert_eq!(event.date, NaiveDate::from_ymd_opt(2025, 4, 6));
    }

    #[test]
    fn classifies_location_shapes() {
        let nested: RawEvent = serde_json::from_value(json!({
            "Circuit": {"Location": {"locality": "Monza"}}
        }))
        .unwrap();
        assert_eq!(
            nested.location_shape(),
            LocationShape::Circuit {
                locality: Some("Monza"),
                country: None
            }
        );
        assert_eq!(
            nested.normalize().location,
            Location {
                locality: "Monza".to_string(),
                country: "Unknown".to_string()
            }
        );

        let flat: RawEvent =
            serde_json::from_value(json!({"location": "Suzuka", "country": "Japan"})).unwrap();
        assert_eq!(flat.normalize().location.to_string(), "Suzuka, Japan");

        let partial: RawEvent = serde_json::from_value(json!({"location": "Suzuka"})).unwrap();
        assert_eq!(partial.location_shape(), LocationShape::Missing);
        assert_eq!(partial.normalize().location, Location::default());

        let empty_circuit: RawEvent = serde_json::from_value(json!({"Circuit": {}})).unwrap();
        assert_eq!(empty_circuit.location_shape(), LocationShape::Missing);
    }
}
