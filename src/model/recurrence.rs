// File: ./src/model/recurrence.rs
use crate::model::event::{EventTime, Occurrence, RawEvent};
use chrono::{DateTime, Duration, Utc, Weekday};
use rrule::RRuleSet;
use sha1::{Digest, Sha1};
use std::str::FromStr;

/// Used when a VEVENT has no DTEND.
pub const DEFAULT_DURATION_MINS: i64 = 60;

/// How an event repeats, resolved once per event before expansion.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Recurrence {
    Single,
    Weekly(WeeklyPattern),
    /// A rule we do not expand (e.g. FREQ=DAILY). Treated like `Single`.
    Unsupported(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WeeklyPattern {
    pub interval: u32,
    pub weekdays: Vec<Weekday>,
    pub count: Option<u32>,
    pub until: Option<DateTime<Utc>>,
}

impl Recurrence {
    pub fn classify(event: &RawEvent, start: &EventTime) -> Self {
        // An overridden instance stands alone even if it repeats the master's RRULE.
        if event.recurrence_id.is_some() {
            return Recurrence::Single;
        }
        let Some(rule) = &event.rrule else {
            return Recurrence::Single;
        };
        if rule.freq != "WEEKLY" {
            return Recurrence::Unsupported(rule.freq.clone());
        }

        let mut weekdays = rule.weekdays();
        if weekdays.is_empty() {
            if !rule.by_day.is_empty() {
                log::debug!(
                    "No usable BYDAY in {:?} for '{}'; using the start weekday",
                    rule.by_day,
                    event.summary
                );
            }
            weekdays.push(start.local_weekday());
        }

        Recurrence::Weekly(WeeklyPattern {
            interval: rule.interval.max(1),
            weekdays,
            count: rule.count,
            until: rule.until.as_ref().map(EventTime::to_utc),
        })
    }
}

pub struct RecurrenceEngine;

impl RecurrenceEngine {
    /// Identity of the source event: its UID, or a content hash of summary and start.
    pub fn base_id(event: &RawEvent, start: DateTime<Utc>) -> String {
        match &event.uid {
            Some(uid) if !uid.trim().is_empty() => uid.trim().to_string(),
            _ => {
                let mut hasher = Sha1::new();
                hasher.update(event.summary.as_bytes());
                hasher.update(start.to_rfc3339().as_bytes());
                format!("{:x}", hasher.finalize())
            }
        }
    }

    /// One id per calendar day (UTC) of the series.
    pub fn occurrence_id(base_id: &str, start: DateTime<Utc>) -> String {
        format!("{}#{}", base_id, start.format("%Y%m%d"))
    }

    /// Expands `event` into the occurrences that fall inside
    /// `[window_start, window_end]` (both ends inclusive), in start order.
    pub fn expand(
        event: &RawEvent,
        window_start: DateTime<Utc>,
        window_end: DateTime<Utc>,
    ) -> Vec<Occurrence> {
        let Some(start) = &event.start else {
            log::warn!("Skipping event without DTSTART: '{}'", event.summary);
            return Vec::new();
        };

        let base_start = start.to_utc();
        let default_duration = Duration::minutes(DEFAULT_DURATION_MINS);
        let duration = match &event.end {
            Some(end) if end.to_utc() >= base_start => end.to_utc() - base_start,
            Some(_) => {
                log::warn!(
                    "Event '{}' ends before it starts; using {}m",
                    event.summary,
                    DEFAULT_DURATION_MINS
                );
                default_duration
            }
            None => {
                log::debug!(
                    "Event '{}' has no DTEND; using {}m",
                    event.summary,
                    DEFAULT_DURATION_MINS
                );
                default_duration
            }
        };
        let base_id = Self::base_id(event, base_start);

        let starts = match Recurrence::classify(event, start) {
            Recurrence::Single => Self::single(base_start, duration, window_start, window_end),
            Recurrence::Unsupported(freq) => {
                log::info!(
                    "Unsupported RRULE frequency '{}' for '{}'; using a single occurrence",
                    freq,
                    event.summary
                );
                Self::single(base_start, duration, window_start, window_end)
            }
            Recurrence::Weekly(pattern) => {
                Self::weekly(event, start, &pattern, duration, window_start, window_end)
            }
        };

        // A moved instance keeps the identity of the slot it replaced.
        let anchor = event.recurrence_id.as_ref().map(EventTime::to_utc);

        starts
            .into_iter()
            .map(|s| Occurrence {
                id: Self::occurrence_id(&base_id, anchor.unwrap_or(s)),
                summary: event.summary.clone(),
                start: s,
                end: s + duration,
            })
            .collect()
    }

    fn single(
        start: DateTime<Utc>,
        duration: Duration,
        window_start: DateTime<Utc>,
        window_end: DateTime<Utc>,
    ) -> Vec<DateTime<Utc>> {
        if start + duration < window_start || start > window_end {
            return Vec::new();
        }
        vec![start]
    }

    fn weekly(
        event: &RawEvent,
        start: &EventTime,
        pattern: &WeeklyPattern,
        duration: Duration,
        window_start: DateTime<Utc>,
        window_end: DateTime<Utc>,
    ) -> Vec<DateTime<Utc>> {
        let base_start = start.to_utc();

        // COUNT bounds the series itself; otherwise UNTIL (capped by the window) does.
        let upper = match (pattern.count, pattern.until) {
            (None, Some(until)) => until.min(window_end),
            _ => window_end,
        };
        if upper < window_start || upper < base_start {
            return Vec::new();
        }

        let rule_text = Self::rule_text(start, pattern);
        let rrule_set = match RRuleSet::from_str(&rule_text) {
            Ok(set) => set,
            Err(e) => {
                log::warn!(
                    "Could not build recurrence for '{}' ({}); using a single occurrence",
                    event.summary,
                    e
                );
                return Self::single(base_start, duration, window_start, window_end);
            }
        };

        let excluded: Vec<DateTime<Utc>> = event.exdates.iter().map(EventTime::to_utc).collect();

        let mut starts = Vec::new();
        for candidate in rrule_set.into_iter() {
            let s = candidate.to_utc();
            if s > upper {
                break;
            }
            if s < window_start || excluded.contains(&s) {
                continue;
            }
            starts.push(s);
        }

        // The generator can skip DTSTART itself (e.g. when BYDAY does not contain
        // its weekday after timezone conversion). The seed is always an occurrence.
        if base_start >= window_start
            && base_start <= upper
            && !excluded.contains(&base_start)
            && !starts.contains(&base_start)
        {
            starts.insert(0, base_start);
        }

        starts
    }

    /// Builds the DTSTART/RRULE text fed to the `rrule` crate. The seed keeps its
    /// declared timezone so BYDAY is evaluated on the event's own wall clock.
    fn rule_text(start: &EventTime, pattern: &WeeklyPattern) -> String {
        let base = start.to_utc();
        let dtstart = match start.timezone() {
            Some(tz) => format!(
                "DTSTART;TZID={}:{}",
                tz.name(),
                base.with_timezone(&tz).format("%Y%m%dT%H%M%S")
            ),
            None => format!("DTSTART:{}", base.format("%Y%m%dT%H%M%SZ")),
        };

        let days: Vec<&str> = pattern.weekdays.iter().map(|d| ical_weekday(*d)).collect();
        let mut rule = format!(
            "FREQ=WEEKLY;INTERVAL={};BYDAY={}",
            pattern.interval,
            days.join(",")
        );
        if let Some(count) = pattern.count {
            rule.push_str(&format!(";COUNT={}", count));
        }

        format!("{}\nRRULE:{}", dtstart, rule)
    }
}

fn ical_weekday(day: Weekday) -> &'static str {
    match day {
        Weekday::Mon => "MO",
        Weekday::Tue => "TU",
        Weekday::Wed => "WE",
        Weekday::Thu => "TH",
        Weekday::Fri => "FR",
        Weekday::Sat => "SA",
        Weekday::Sun => "SU",
    }
}
