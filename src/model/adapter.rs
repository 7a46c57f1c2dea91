// File: src/model/adapter.rs
use crate::model::event::{EventTime, RawEvent, RecurrenceRule, parse_ical_time};
use anyhow::Result;
use icalendar::{Calendar, CalendarComponent, Component, Event, Property};

impl RawEvent {
    /// Parses every VEVENT in a VCALENDAR document.
    ///
    /// Overridden instances (RECURRENCE-ID) are returned as their own events and
    /// their original slot is added to the master's `exdates`, so the master does
    /// not emit the slot a second time.
    pub fn from_ics(raw_ics: &str) -> Result<Vec<RawEvent>> {
        let calendar: Calendar = raw_ics
            .parse()
            .map_err(|e| anyhow::anyhow!("Parse: {}", e))?;

        let mut events: Vec<RawEvent> = calendar
            .components
            .iter()
            .filter_map(|component| match component {
                CalendarComponent::Event(e) => Some(Self::from_vevent(e)),
                _ => None,
            })
            .collect();

        let overrides: Vec<(String, EventTime)> = events
            .iter()
            .filter_map(|e| Some((e.uid.clone()?, e.recurrence_id.clone()?)))
            .collect();

        if !overrides.is_empty() {
            for master in events
                .iter_mut()
                .filter(|e| e.rrule.is_some() && e.recurrence_id.is_none())
            {
                for (uid, slot) in &overrides {
                    if master.uid.as_deref() == Some(uid.as_str()) && !master.exdates.contains(slot)
                    {
                        master.exdates.push(slot.clone());
                    }
                }
            }
        }

        Ok(events)
    }

    fn from_vevent(event: &Event) -> RawEvent {
        let summary = event.get_summary().unwrap_or("").trim().to_string();
        let uid = event
            .get_uid()
            .map(|u| u.trim().to_string())
            .filter(|u| !u.is_empty());
        let description = event
            .get_description()
            .map(str::to_string)
            .filter(|d| !d.is_empty());

        let props = event.properties();
        let start = props.get("DTSTART").and_then(time_prop);
        let end = props.get("DTEND").and_then(time_prop);
        let recurrence_id = props.get("RECURRENCE-ID").and_then(time_prop);
        let rrule = props
            .get("RRULE")
            .map(|p| RecurrenceRule::parse(p.value()));

        let mut exdates = Vec::new();
        if let Some(prop) = props.get("EXDATE") {
            exdates.extend(time_list_prop(prop));
        }
        if let Some(multi) = event.multi_properties().get("EXDATE") {
            for prop in multi {
                exdates.extend(time_list_prop(prop));
            }
        }

        RawEvent {
            summary,
            start,
            end,
            rrule,
            uid,
            description,
            recurrence_id,
            exdates,
        }
    }
}

fn tzid_of(prop: &Property) -> Option<&str> {
    prop.params().get("TZID").map(|p| p.value())
}

fn time_prop(prop: &Property) -> Option<EventTime> {
    let parsed = parse_ical_time(prop.value(), tzid_of(prop));
    if parsed.is_none() {
        log::warn!("Ignoring unparseable {} value '{}'", prop.key(), prop.value());
    }
    parsed
}

/// EXDATE may carry several comma-separated values.
fn time_list_prop(prop: &Property) -> Vec<EventTime> {
    let tzid = tzid_of(prop);
    prop.value()
        .split(',')
        .filter_map(|v| parse_ical_time(v, tzid))
        .collect()
}
