// File: tests/recurrence_expansion.rs
use chrono::{DateTime, Duration, NaiveDate, TimeZone, Utc};
use lessoncal::model::{EventTime, RawEvent, RecurrenceEngine};

fn utc(y: i32, m: u32, d: u32, h: u32, min: u32) -> DateTime<Utc> {
    Utc.with_ymd_and_hms(y, m, d, h, min, 0).unwrap()
}

/// Alice, every Monday 10:00-11:00 UTC, starting Monday 2025-01-06.
fn alice_weekly(rule: &str) -> RawEvent {
    RawEvent::new("Alice", utc(2025, 1, 6, 10, 0), utc(2025, 1, 6, 11, 0))
        .with_uid("lesson-1")
        .with_rrule(rule)
}

fn starts(event: &RawEvent, ws: DateTime<Utc>, we: DateTime<Utc>) -> Vec<DateTime<Utc>> {
    RecurrenceEngine::expand(event, ws, we)
        .into_iter()
        .map(|o| o.start)
        .collect()
}

#[test]
fn test_monday_lesson_in_one_week_window() {
    let event = alice_weekly("FREQ=WEEKLY;BYDAY=MO;INTERVAL=1");
    let ws = utc(2025, 1, 6, 0, 0);
    let occs = RecurrenceEngine::expand(&event, ws, ws + Duration::days(7));

    assert_eq!(occs.len(), 1);
    assert_eq!(occs[0].id, "lesson-1#20250106");
    assert_eq!(occs[0].summary, "Alice");
    assert_eq!(occs[0].start, utc(2025, 1, 6, 10, 0));
    assert_eq!(occs[0].end, utc(2025, 1, 6, 11, 0));
}

#[test]
fn test_expansion_is_deterministic() {
    let event = alice_weekly("FREQ=WEEKLY;BYDAY=MO,TH");
    let ws = utc(2025, 1, 1, 0, 0);
    let we = ws + Duration::days(30);
    assert_eq!(
        RecurrenceEngine::expand(&event, ws, we),
        RecurrenceEngine::expand(&event, ws, we)
    );
}

#[test]
fn test_same_monday_same_id_across_polls() {
    let event = alice_weekly("FREQ=WEEKLY;BYDAY=MO");

    let first_poll = RecurrenceEngine::expand(
        &event,
        utc(2025, 1, 6, 0, 0),
        utc(2025, 1, 20, 0, 0),
    );
    let later_poll = RecurrenceEngine::expand(
        &event,
        utc(2025, 1, 10, 8, 15),
        utc(2025, 1, 17, 8, 15),
    );

    let from_first = first_poll
        .iter()
        .find(|o| o.start == utc(2025, 1, 13, 10, 0))
        .unwrap();
    assert_eq!(later_poll.len(), 1);
    assert_eq!(later_poll[0].id, from_first.id);
    assert_eq!(later_poll[0].id, "lesson-1#20250113");
}

#[test]
fn test_window_edges_are_inclusive() {
    let event = alice_weekly("FREQ=WEEKLY;BYDAY=MO");

    // Base start exactly at the window start.
    let at_start = starts(&event, utc(2025, 1, 6, 10, 0), utc(2025, 1, 8, 0, 0));
    assert_eq!(at_start, vec![utc(2025, 1, 6, 10, 0)]);

    // A later instance exactly at the window end.
    let at_end = starts(&event, utc(2025, 1, 7, 0, 0), utc(2025, 1, 13, 10, 0));
    assert_eq!(at_end, vec![utc(2025, 1, 13, 10, 0)]);
}

#[test]
fn test_series_started_before_window() {
    let event = RawEvent::new("Bob", utc(2024, 12, 2, 17, 0), utc(2024, 12, 2, 18, 30))
        .with_uid("bob")
        .with_rrule("FREQ=WEEKLY;BYDAY=MO");
    let occs = RecurrenceEngine::expand(&event, utc(2025, 1, 6, 0, 0), utc(2025, 1, 12, 0, 0));
    assert_eq!(occs.len(), 1);
    assert_eq!(occs[0].start, utc(2025, 1, 6, 17, 0));
    assert_eq!(occs[0].duration(), Duration::minutes(90));
    assert_eq!(occs[0].id, "bob#20250106");
}

#[test]
fn test_interval_skips_weeks() {
    let event = alice_weekly("FREQ=WEEKLY;INTERVAL=2;BYDAY=MO");
    let got = starts(&event, utc(2025, 1, 1, 0, 0), utc(2025, 2, 8, 0, 0));
    assert_eq!(
        got,
        vec![
            utc(2025, 1, 6, 10, 0),
            utc(2025, 1, 20, 10, 0),
            utc(2025, 2, 3, 10, 0)
        ]
    );
}

#[test]
fn test_count_bounds_series() {
    let event = alice_weekly("FREQ=WEEKLY;BYDAY=MO;COUNT=3");
    let got = starts(&event, utc(2025, 1, 1, 0, 0), utc(2025, 6, 1, 0, 0));
    assert_eq!(got.len(), 3);
    assert_eq!(got.last(), Some(&utc(2025, 1, 20, 10, 0)));
}

#[test]
fn test_until_bounds_series() {
    let event = alice_weekly("FREQ=WEEKLY;BYDAY=MO;UNTIL=20250120T235959Z");
    let got = starts(&event, utc(2025, 1, 1, 0, 0), utc(2025, 6, 1, 0, 0));
    assert_eq!(
        got,
        vec![
            utc(2025, 1, 6, 10, 0),
            utc(2025, 1, 13, 10, 0),
            utc(2025, 1, 20, 10, 0)
        ]
    );
}

#[test]
fn test_several_weekdays_are_ordered() {
    let event = alice_weekly("FREQ=WEEKLY;BYDAY=TH,MO");
    let got = starts(&event, utc(2025, 1, 6, 0, 0), utc(2025, 1, 14, 0, 0));
    assert_eq!(
        got,
        vec![
            utc(2025, 1, 6, 10, 0),
            utc(2025, 1, 9, 10, 0),
            utc(2025, 1, 13, 10, 0)
        ]
    );
}

#[test]
fn test_missing_byday_uses_start_weekday() {
    let no_byday = alice_weekly("FREQ=WEEKLY");
    let bogus = alice_weekly("FREQ=WEEKLY;BYDAY=XX,1MO");
    let ws = utc(2025, 1, 1, 0, 0);
    let we = utc(2025, 1, 20, 0, 0);

    let expected = vec![utc(2025, 1, 6, 10, 0), utc(2025, 1, 13, 10, 0)];
    assert_eq!(starts(&no_byday, ws, we), expected);
    assert_eq!(starts(&bogus, ws, we), expected);
}

#[test]
fn test_unsupported_frequency_acts_as_single() {
    let daily = alice_weekly("FREQ=DAILY");
    let occs = RecurrenceEngine::expand(&daily, utc(2025, 1, 6, 0, 0), utc(2025, 1, 13, 0, 0));
    assert_eq!(occs.len(), 1);
    assert_eq!(occs[0].id, "lesson-1#20250106");

    // Outside the window it yields nothing, like a one-off event.
    let later = RecurrenceEngine::expand(&daily, utc(2025, 2, 1, 0, 0), utc(2025, 2, 8, 0, 0));
    assert!(later.is_empty());
}

#[test]
fn test_single_event_overlapping_window_start() {
    let event = RawEvent::new("Carol", utc(2025, 1, 6, 9, 30), utc(2025, 1, 6, 10, 30));
    let occs = RecurrenceEngine::expand(&event, utc(2025, 1, 6, 10, 0), utc(2025, 1, 7, 0, 0));
    assert_eq!(occs.len(), 1);
    assert!(occs[0].id.ends_with("#20250106"));

    let past = RecurrenceEngine::expand(&event, utc(2025, 1, 6, 11, 0), utc(2025, 1, 7, 0, 0));
    assert!(past.is_empty());
}

#[test]
fn test_event_without_start_is_skipped() {
    let event = RawEvent {
        summary: "Nobody".to_string(),
        ..Default::default()
    };
    assert!(RecurrenceEngine::expand(&event, utc(2025, 1, 1, 0, 0), utc(2025, 2, 1, 0, 0)).is_empty());
}

#[test]
fn test_missing_end_defaults_to_one_hour() {
    let mut event = alice_weekly("FREQ=WEEKLY;BYDAY=MO");
    event.end = None;
    let occs = RecurrenceEngine::expand(&event, utc(2025, 1, 6, 0, 0), utc(2025, 1, 7, 0, 0));
    assert_eq!(occs[0].end, utc(2025, 1, 6, 11, 0));
}

#[test]
fn test_id_without_uid_is_stable_hash() {
    let event = RawEvent::new("Dave", utc(2025, 1, 6, 10, 0), utc(2025, 1, 6, 11, 0))
        .with_rrule("FREQ=WEEKLY;BYDAY=MO");
    let ws = utc(2025, 1, 1, 0, 0);
    let we = utc(2025, 1, 20, 0, 0);

    let a = RecurrenceEngine::expand(&event, ws, we);
    let b = RecurrenceEngine::expand(&event.clone(), ws, we);
    assert_eq!(a, b);

    let base = RecurrenceEngine::base_id(&event, utc(2025, 1, 6, 10, 0));
    assert_eq!(base.len(), 40);
    assert_eq!(a[0].id, format!("{}#20250106", base));
    assert_eq!(a[1].id, format!("{}#20250113", base));
}

#[test]
fn test_byday_is_evaluated_in_event_timezone() {
    // Monday 00:30 in Berlin is Sunday 23:30 UTC.
    let naive = NaiveDate::from_ymd_opt(2025, 1, 6)
        .unwrap()
        .and_hms_opt(0, 30, 0)
        .unwrap();
    let event = RawEvent {
        summary: "Eve".to_string(),
        uid: Some("eve".to_string()),
        start: Some(EventTime::local(naive, Some("Europe/Berlin"))),
        end: Some(EventTime::local(
            naive + Duration::hours(1),
            Some("Europe/Berlin"),
        )),
        ..Default::default()
    }
    .with_rrule("FREQ=WEEKLY;BYDAY=MO");

    let occs = RecurrenceEngine::expand(&event, utc(2025, 1, 5, 0, 0), utc(2025, 1, 18, 0, 0));
    let got: Vec<_> = occs.iter().map(|o| (o.id.as_str(), o.start)).collect();
    assert_eq!(
        got,
        vec![
            ("eve#20250105", utc(2025, 1, 5, 23, 30)),
            ("eve#20250112", utc(2025, 1, 12, 23, 30)),
        ]
    );
}

#[test]
fn test_wall_clock_kept_across_dst_change() {
    // Berlin switches to summer time on 2025-03-30.
    let naive = NaiveDate::from_ymd_opt(2025, 3, 24)
        .unwrap()
        .and_hms_opt(10, 0, 0)
        .unwrap();
    let event = RawEvent {
        summary: "Frank".to_string(),
        start: Some(EventTime::local(naive, Some("Europe/Berlin"))),
        end: Some(EventTime::local(
            naive + Duration::hours(1),
            Some("Europe/Berlin"),
        )),
        ..Default::default()
    }
    .with_rrule("FREQ=WEEKLY;BYDAY=MO");

    let got = starts(&event, utc(2025, 3, 24, 0, 0), utc(2025, 4, 1, 0, 0));
    assert_eq!(got, vec![utc(2025, 3, 24, 9, 0), utc(2025, 3, 31, 8, 0)]);
}

#[test]
fn test_exdate_removes_instance() {
    let mut event = alice_weekly("FREQ=WEEKLY;BYDAY=MO");
    event.exdates.push(EventTime::utc(utc(2025, 1, 13, 10, 0)));
    let got = starts(&event, utc(2025, 1, 1, 0, 0), utc(2025, 1, 21, 0, 0));
    assert_eq!(got, vec![utc(2025, 1, 6, 10, 0), utc(2025, 1, 20, 10, 0)]);
}

#[test]
fn test_moved_instance_keeps_slot_id() {
    let mut moved = RawEvent::new("Alice", utc(2025, 1, 14, 15, 0), utc(2025, 1, 14, 16, 0))
        .with_uid("lesson-1")
        .with_rrule("FREQ=WEEKLY;BYDAY=MO");
    moved.recurrence_id = Some(EventTime::utc(utc(2025, 1, 13, 10, 0)));

    let occs = RecurrenceEngine::expand(&moved, utc(2025, 1, 6, 0, 0), utc(2025, 1, 20, 0, 0));
    assert_eq!(occs.len(), 1);
    assert_eq!(occs[0].id, "lesson-1#20250113");
    assert_eq!(occs[0].start, utc(2025, 1, 14, 15, 0));
}
