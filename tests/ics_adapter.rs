// File: tests/ics_adapter.rs
use chrono::{NaiveDate, TimeZone, Utc};
use lessoncal::model::{EventTime, RawEvent, RecurrenceEngine};

const WEEKLY: &str = "BEGIN:VCALENDAR\r
VERSION:2.0\r
PRODID:-//test//EN\r
BEGIN:VEVENT\r
UID:alice-mondays\r
SUMMARY:Alice\r
DTSTART;TZID=Europe/Berlin:20250106T100000\r
DTEND;TZID=Europe/Berlin:20250106T110000\r
RRULE:FREQ=WEEKLY;INTERVAL=1;BYDAY=MO\r
EXDATE;TZID=Europe/Berlin:20250120T100000\r
DESCRIPTION:Piano\r
END:VEVENT\r
BEGIN:VEVENT\r
UID:alice-mondays\r
RECURRENCE-ID;TZID=Europe/Berlin:20250113T100000\r
SUMMARY:Alice\r
DTSTART;TZID=Europe/Berlin:20250114T150000\r
DTEND;TZID=Europe/Berlin:20250114T160000\r
END:VEVENT\r
END:VCALENDAR\r
";

#[test]
fn test_parses_tzid_rrule_and_description() {
    let events = RawEvent::from_ics(WEEKLY).unwrap();
    assert_eq!(events.len(), 2);

    let master = &events[0];
    assert_eq!(master.summary, "Alice");
    assert_eq!(master.uid.as_deref(), Some("alice-mondays"));
    assert_eq!(master.description.as_deref(), Some("Piano"));
    assert_eq!(
        master.start.as_ref().map(EventTime::to_utc),
        Some(Utc.with_ymd_and_hms(2025, 1, 6, 9, 0, 0).unwrap())
    );
    assert_eq!(master.start.as_ref().and_then(|s| s.tzid()), Some("Europe/Berlin"));

    let rule = master.rrule.as_ref().unwrap();
    assert_eq!(rule.freq, "WEEKLY");
    assert_eq!(rule.interval, 1);
    assert_eq!(rule.by_day, vec!["MO".to_string()]);
}

#[test]
fn test_override_is_excluded_from_master() {
    let events = RawEvent::from_ics(WEEKLY).unwrap();
    let master = &events[0];

    let excluded: Vec<_> = master.exdates.iter().map(EventTime::to_utc).collect();
    assert!(excluded.contains(&Utc.with_ymd_and_hms(2025, 1, 20, 9, 0, 0).unwrap()));
    assert!(excluded.contains(&Utc.with_ymd_and_hms(2025, 1, 13, 9, 0, 0).unwrap()));
}

#[test]
fn test_expanded_calendar_has_one_entry_per_slot() {
    let events = RawEvent::from_ics(WEEKLY).unwrap();
    let ws = Utc.with_ymd_and_hms(2025, 1, 6, 0, 0, 0).unwrap();
    let we = Utc.with_ymd_and_hms(2025, 1, 27, 0, 0, 0).unwrap();

    let mut occs: Vec<_> = events
        .iter()
        .flat_map(|e| RecurrenceEngine::expand(e, ws, we))
        .collect();
    occs.sort_by_key(|o| o.start);

    let ids: Vec<&str> = occs.iter().map(|o| o.id.as_str()).collect();
    // Jan 13 moved to Tuesday, Jan 20 cancelled.
    assert_eq!(ids, vec!["alice-mondays#20250106", "alice-mondays#20250113"]);
    assert_eq!(occs[1].start, Utc.with_ymd_and_hms(2025, 1, 14, 14, 0, 0).unwrap());
}

#[test]
fn test_all_day_and_utc_values() {
    let ics = "BEGIN:VCALENDAR\r
VERSION:2.0\r
PRODID:-//test//EN\r
BEGIN:VEVENT\r
UID:exam\r
SUMMARY:Bob\r
DTSTART;VALUE=DATE:20250110\r
END:VEVENT\r
BEGIN:VEVENT\r
UID:trial\r
SUMMARY:Carol\r
DTSTART:20250111T080000Z\r
DTEND:20250111T083000Z\r
END:VEVENT\r
END:VCALENDAR\r
";
    let events = RawEvent::from_ics(ics).unwrap();
    assert_eq!(events.len(), 2);

    assert_eq!(
        events[0].start,
        Some(EventTime::all_day(
            NaiveDate::from_ymd_opt(2025, 1, 10).unwrap(),
            None
        ))
    );
    assert!(events[0].end.is_none());
    assert!(events[0].rrule.is_none());

    assert_eq!(
        events[1].end.as_ref().map(EventTime::to_utc),
        Some(Utc.with_ymd_and_hms(2025, 1, 11, 8, 30, 0).unwrap())
    );
}

#[test]
fn test_garbage_is_an_error_not_a_panic() {
    if let Ok(events) = RawEvent::from_ics("not a calendar") {
        assert!(events.is_empty());
    }
}
