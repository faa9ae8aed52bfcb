use std::fmt::{Display, Formatter};

use chrono::{DateTime, Duration, FixedOffset, Local, LocalResult, NaiveDate, NaiveDateTime, NaiveTime, TimeZone, Utc};
use clap::ValueEnum;

const MILLIS_PER_SECOND: i64 = 1_000;
const MILLIS_PER_MINUTE: i64 = 60 * MILLIS_PER_SECOND;
const MILLIS_PER_HOUR: i64 = 60 * MILLIS_PER_MINUTE;
const MILLIS_PER_DAY: i64 = 24 * MILLIS_PER_HOUR;

pub const UNKNOWN: &str = "Unknown";
pub const UNKNOWN_RACE: &str = "Unknown Race";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Location {
    pub locality: String,
    pub country: String,
}

impl Default for Location {
    fn default() -> Self {
        Self {
            locality: UNKNOWN.to_string(),
            country: UNKNOWN.to_string(),
        }
    }
}

impl Display for Location {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}, {}", self.locality, self.country)
    }
}

/// One calendar entry after normalization at the payload boundary.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Event {
    pub round: Option<u32>,
    pub name: Option<String>,
    pub date: Option<NaiveDate>,
    pub time: Option<NaiveTime>,
    /// Zone of `date`/`time` when the payload named one; local time otherwise.
    pub offset: Option<FixedOffset>,
    pub sprint: bool,
    pub location: Location,
}

impl Event {
    pub fn title(&self) -> &str {
        self.name.as_deref().unwrap_or(UNKNOWN_RACE)
    }

    /// Start as written in the payload; a missing time-of-day means midnight.
    fn scheduled(&self) -> Option<NaiveDateTime> {
        let time = self.time.unwrap_or(NaiveTime::MIN);
        self.date.map(|date| date.and_time(time))
    }

    /// Local wall-clock start.
    pub fn starts_at(&self) -> Option<NaiveDateTime> {
        match self.offset {
            Some(_) => self
                .countdown_target()
                .map(|start| start.with_timezone(&Local).naive_local()),
            None => self.scheduled(),
        }
    }

    pub fn countdown_target(&self) -> Option<DateTime<Utc>> {
        let scheduled = self.scheduled()?;
        Some(match self.offset {
            Some(offset) => scheduled
                .and_local_timezone(offset)
                .single()
                .map_or_else(|| scheduled.and_utc(), |start| start.with_timezone(&Utc)),
            None => local_naive_to_utc_resolved(scheduled),
        })
    }

    pub fn status(&self, now: NaiveDateTime) -> Option<EventStatus> {
        self.starts_at().map(|start| EventStatus::derive(start, now))
    }

    pub fn start_time_label(&self) -> String {
        self.time
            .map(|time| time.format("%H:%M:%S").to_string())
            .unwrap_or_else(|| "TBD".to_string())
    }

    pub fn date_label(&self) -> String {
        self.date
            .map(format_event_date)
            .unwrap_or_else(|| "Date TBD".to_string())
    }

    pub fn is_next(&self, next: Option<&Event>) -> bool {
        match (self.round, next.and_then(|next| next.round)) {
            (Some(round), Some(next_round)) => round == next_round,
            _ => false,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum EventStatus {
    Upcoming,
    Ongoing,
    Completed,
}

impl EventStatus {
    pub fn derive(start: NaiveDateTime, now: NaiveDateTime) -> Self {
        if now > start {
            EventStatus::Completed
        } else if now.date() == start.date() {
            EventStatus::Ongoing
        } else {
            EventStatus::Upcoming
        }
    }

    pub fn label(self) -> &'static str {
        match self {
            EventStatus::Upcoming => "upcoming",
            EventStatus::Ongoing => "ongoing",
            EventStatus::Completed => "completed",
        }
    }
}

impl Display for EventStatus {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.label())
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, ValueEnum)]
pub enum Filter {
    #[default]
    All,
    Upcoming,
    Completed,
}

impl Filter {
    pub fn matches(self, status: EventStatus) -> bool {
        match self {
            Filter::All => true,
            Filter::Upcoming => status == EventStatus::Upcoming,
            Filter::Completed => status == EventStatus::Completed,
        }
    }

    /// Undated events never pass, whatever the filter.
    pub fn apply(self, events: &[Event], now: NaiveDateTime) -> Vec<(&Event, EventStatus)> {
        events
            .iter()
            .filter_map(|event| event.status(now).map(|status| (event, status)))
            .filter(|(_, status)| self.matches(*status))
            .collect()
    }

    pub fn next(self) -> Self {
        match self {
            Filter::All => Filter::Upcoming,
            Filter::Upcoming => Filter::Completed,
            Filter::Completed => Filter::All,
        }
    }

    pub fn label(self) -> &'static str {
        match self {
            Filter::All => "All",
            Filter::Upcoming => "Upcoming",
            Filter::Completed => "Completed",
        }
    }

    pub fn empty_message(self) -> &'static str {
        match self {
            Filter::All => "No race data available.",
            Filter::Upcoming | Filter::Completed => "No races match the selected filter.",
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TimeLeft {
    pub days: i64,
    pub hours: i64,
    pub minutes: i64,
    pub seconds: i64,
}

impl TimeLeft {
    pub fn until(target: DateTime<Utc>, now: DateTime<Utc>) -> Self {
        Self::from_millis((target - now).num_milliseconds())
    }

    pub fn from_millis(difference: i64) -> Self {
        if difference <= 0 {
            return Self::default();
        }

        Self {
            days: difference / MILLIS_PER_DAY,
            hours: (difference / MILLIS_PER_HOUR) % 24,
            minutes: (difference / MILLIS_PER_MINUTE) % 60,
            seconds: (difference / MILLIS_PER_SECOND) % 60,
        }
    }

    pub fn as_millis(&self) -> i64 {
        self.days * MILLIS_PER_DAY
            + self.hours * MILLIS_PER_HOUR
            + self.minutes * MILLIS_PER_MINUTE
            + self.seconds * MILLIS_PER_SECOND
    }

    pub fn is_zero(&self) -> bool {
        self.as_millis() == 0
    }

    /// Display cells in days/hours/minutes/seconds order. Days are not padded.
    pub fn cells(&self) -> [(String, &'static str); 4] {
        [
            (self.days.to_string(), "Days"),
            (pad_two(self.hours), "Hours"),
            (pad_two(self.minutes), "Minutes"),
            (pad_two(self.seconds), "Seconds"),
        ]
    }
}

impl Display for TimeLeft {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{}d {}h {}m {}s",
            self.days,
            pad_two(self.hours),
            pad_two(self.minutes),
            pad_two(self.seconds)
        )
    }
}

fn pad_two(value: i64) -> String {
    format!("{value:02}")
}

pub fn format_event_date(date: NaiveDate) -> String {
    date.format("%a, %b %-d").to_string()
}

fn local_naive_to_utc(naive: NaiveDateTime) -> Option<DateTime<Utc>> {
    match Local.from_local_datetime(&naive) {
        LocalResult::Single(local_datetime) => Some(local_datetime.with_timezone(&Utc)),
        LocalResult::Ambiguous(first, second) => Some(first.min(second).with_timezone(&Utc)),
        LocalResult::None => None,
    }
}

/// Resolves a local wall-clock time, skipping forward over DST gaps.
pub fn local_naive_to_utc_resolved(naive: NaiveDateTime) -> DateTime<Utc> {
    let mut cursor = naive;
    for _ in 0..=120 {
        if let Some(timestamp) = local_naive_to_utc(cursor) {
            return timestamp;
        }
        cursor += Duration::minutes(1);
    }

    naive.and_utc()
}
