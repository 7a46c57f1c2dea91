// File: ./src/model/event.rs
use chrono::{DateTime, Duration, NaiveDate, NaiveDateTime, NaiveTime, TimeZone, Utc, Weekday};
use chrono_tz::Tz;
use serde::{Deserialize, Serialize};

/// A DTSTART/DTEND style value as delivered by the calendar source.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EventTime {
    /// A specific instant, plus the TZID it was declared in (if any).
    Specific {
        at: DateTime<Utc>,
        tzid: Option<String>,
    },
    /// A date-only value. Resolves to midnight in `tzid`, or UTC.
    AllDay { date: NaiveDate, tzid: Option<String> },
}

impl EventTime {
    pub fn utc(at: DateTime<Utc>) -> Self {
        EventTime::Specific { at, tzid: None }
    }

    /// Interprets a wall-clock time in `tzid`. Unknown zones fall back to UTC.
    pub fn local(naive: NaiveDateTime, tzid: Option<&str>) -> Self {
        let at = match tzid.and_then(parse_tz) {
            // Ambiguous wall-clock times (DST fall-back) take the earlier instant.
            Some(tz) => tz
                .from_local_datetime(&naive)
                .earliest()
                .map(|d| d.with_timezone(&Utc))
                .unwrap_or_else(|| naive.and_utc()),
            None => naive.and_utc(),
        };
        EventTime::Specific {
            at,
            tzid: tzid.map(str::to_string),
        }
    }

    pub fn all_day(date: NaiveDate, tzid: Option<&str>) -> Self {
        EventTime::AllDay {
            date,
            tzid: tzid.map(str::to_string),
        }
    }

    pub fn tzid(&self) -> Option<&str> {
        match self {
            EventTime::Specific { tzid, .. } | EventTime::AllDay { tzid, .. } => tzid.as_deref(),
        }
    }

    /// The declared timezone, when it is one chrono-tz knows.
    pub fn timezone(&self) -> Option<Tz> {
        self.tzid().and_then(parse_tz)
    }

    pub fn to_utc(&self) -> DateTime<Utc> {
        match self {
            EventTime::Specific { at, .. } => *at,
            EventTime::AllDay { date, tzid } => {
                EventTime::local(date.and_time(NaiveTime::MIN), tzid.as_deref()).to_utc()
            }
        }
    }

    /// Weekday of this value on the wall clock it was declared in.
    pub fn local_weekday(&self) -> Weekday {
        use chrono::Datelike;
        match (self, self.timezone()) {
            (EventTime::AllDay { date, .. }, _) => date.weekday(),
            (EventTime::Specific { at, .. }, Some(tz)) => at.with_timezone(&tz).weekday(),
            (EventTime::Specific { at, .. }, None) => at.weekday(),
        }
    }
}

pub(crate) fn parse_tz(tzid: &str) -> Option<Tz> {
    tzid.trim().parse::<Tz>().ok()
}

/// The subset of an RRULE this service understands.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecurrenceRule {
    /// Upper-cased FREQ value, empty if the rule had none.
    pub freq: String,
    pub interval: u32,
    /// Raw BYDAY tokens, upper-cased.
    pub by_day: Vec<String>,
    pub count: Option<u32>,
    pub until: Option<EventTime>,
}

impl RecurrenceRule {
    /// Parses an RRULE value such as `FREQ=WEEKLY;INTERVAL=2;BYDAY=MO,TH`.
    /// Unknown parts are ignored; malformed numbers fall back to their defaults.
    pub fn parse(value: &str) -> Self {
        let clean = value.trim();
        let clean = if clean.to_uppercase().starts_with("RRULE:") {
            &clean[6..]
        } else {
            clean
        };

        let mut rule = RecurrenceRule {
            freq: String::new(),
            interval: 1,
            by_day: Vec::new(),
            count: None,
            until: None,
        };

        for part in clean.split(';') {
            let Some((key, val)) = part.split_once('=') else {
                continue;
            };
            let val = val.trim();
            match key.trim().to_uppercase().as_str() {
                "FREQ" => rule.freq = val.to_uppercase(),
                "INTERVAL" => rule.interval = val.parse().ok().filter(|n| *n > 0).unwrap_or(1),
                "BYDAY" => {
                    rule.by_day = val
                        .split(',')
                        .map(|d| d.trim().to_uppercase())
                        .filter(|d| !d.is_empty())
                        .collect()
                }
                "COUNT" => rule.count = val.parse().ok(),
                "UNTIL" => rule.until = parse_ical_time(val, None),
                _ => {}
            }
        }
        rule
    }

    /// BYDAY tokens mapped to weekdays. Unknown tokens (including ordinal
    /// forms like `1MO`) are dropped.
    pub fn weekdays(&self) -> Vec<Weekday> {
        let mut days = Vec::new();
        for token in &self.by_day {
            let day = match token.as_str() {
                "MO" => Weekday::Mon,
                "TU" => Weekday::Tue,
                "WE" => Weekday::Wed,
                "TH" => Weekday::Thu,
                "FR" => Weekday::Fri,
                "SA" => Weekday::Sat,
                "SU" => Weekday::Sun,
                _ => continue,
            };
            if !days.contains(&day) {
                days.push(day);
            }
        }
        days
    }
}

/// Parses an iCalendar DATE or DATE-TIME value.
/// `20250106` is a date, `20250106T100000Z` is UTC, anything else is wall-clock
/// time in `tzid` (or UTC for floating values).
pub fn parse_ical_time(val: &str, tzid: Option<&str>) -> Option<EventTime> {
    let val = val.trim();
    if val.len() == 8 {
        return NaiveDate::parse_from_str(val, "%Y%m%d")
            .ok()
            .map(|d| EventTime::all_day(d, tzid));
    }
    if let Some(stripped) = val.strip_suffix('Z') {
        return NaiveDateTime::parse_from_str(stripped, "%Y%m%dT%H%M%S")
            .ok()
            .map(|d| EventTime::utc(d.and_utc()));
    }
    NaiveDateTime::parse_from_str(val, "%Y%m%dT%H%M%S")
        .ok()
        .map(|d| EventTime::local(d, tzid))
}

/// One VEVENT as returned by the calendar source.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct RawEvent {
    pub summary: String,
    pub start: Option<EventTime>,
    pub end: Option<EventTime>,
    pub rrule: Option<RecurrenceRule>,
    pub uid: Option<String>,
    pub description: Option<String>,
    /// Set on an overridden instance of a recurring series.
    pub recurrence_id: Option<EventTime>,
    /// Instances removed from the series (EXDATE and overridden instances).
    pub exdates: Vec<EventTime>,
}

impl RawEvent {
    pub fn new(summary: &str, start: DateTime<Utc>, end: DateTime<Utc>) -> Self {
        Self {
            summary: summary.to_string(),
            start: Some(EventTime::utc(start)),
            end: Some(EventTime::utc(end)),
            ..Default::default()
        }
    }

    pub fn with_rrule(mut self, rule: &str) -> Self {
        self.rrule = Some(RecurrenceRule::parse(rule));
        self
    }

    pub fn with_uid(mut self, uid: &str) -> Self {
        self.uid = Some(uid.to_string());
        self
    }
}

/// One concrete, time-bounded instance of a source event.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Occurrence {
    pub id: String,
    pub summary: String,
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
}

impl Occurrence {
    pub fn duration(&self) -> Duration {
        self.end - self.start
    }
}
