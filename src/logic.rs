/*
Working-time accounting for work item state changes.
Module was independently written from HTTP / Axum for testing
*/

use chrono::{DateTime, FixedOffset, NaiveDate, TimeZone, Utc};

use crate::models::{StateChangeEvent, TimeInState, WorkCalendar, WorkItemUpdate};

pub const STATE_FIELD: &str = "System.State";
pub const STATE_CHANGE_DATE_FIELD: &str = "Microsoft.VSTS.Common.StateChangeDate";

// Pull state transitions out of raw update records.
//
// Rules:
// - An update counts only if it carries both a new state and a state change date
// - Empty state labels and unparseable dates count as missing
// - Result is ordered by timestamp; equal timestamps keep input order
pub fn extract_state_changes(updates: &[WorkItemUpdate]) -> Vec<StateChangeEvent> {
    let mut events: Vec<StateChangeEvent> = updates
        .iter()
        .filter_map(|u| {
            let state = new_value(u, STATE_FIELD)?.as_str()?;
            if state.is_empty() {
                return None;
            }
            let changed = new_value(u, STATE_CHANGE_DATE_FIELD)?.as_str()?;
            let timestamp = DateTime::parse_from_rfc3339(changed).ok()?;
            Some(StateChangeEvent {
                revision: u.rev,
                state: state.to_string(),
                timestamp: timestamp.with_timezone(&Utc),
            })
        })
        .collect();

    // sort_by_key is stable
    events.sort_by_key(|e| e.timestamp);
    events
}

fn new_value<'a>(update: &'a WorkItemUpdate, field: &str) -> Option<&'a serde_json::Value> {
    update
        .fields
        .get(field)
        .and_then(|change| change.new_value.as_ref())
        .filter(|v| !v.is_null())
}

// Whole hour on the given date, in the calendar's offset.
fn at_hour(date: NaiveDate, hour: u32, offset: FixedOffset) -> Option<DateTime<FixedOffset>> {
    let naive = date.and_hms_opt(hour, 0, 0)?;
    offset.from_local_datetime(&naive).single()
}

/// Seconds of `[start, end)` that fall inside the calendar's work hours on
/// its work days.
///
/// Walks one calendar day at a time (in the calendar's offset) from the day
/// of `start` through the day of `end`, intersecting each work day's window
/// with the interval. Returns 0 when `start >= end`. Sub-second precision is
/// kept, so the result is real-valued.
pub fn working_seconds(start: DateTime<Utc>, end: DateTime<Utc>, calendar: &WorkCalendar) -> f64 {
    if start >= end {
        return 0.0;
    }

    let offset = calendar.offset();
    let start = start.with_timezone(&offset);
    let end = end.with_timezone(&offset);
    let last_day = end.date_naive();

    let mut total = chrono::Duration::zero();
    let mut day = start.date_naive();

    while day <= last_day {
        if calendar.is_work_day(day) {
            let window = at_hour(day, calendar.start_hour(), offset)
                .zip(at_hour(day, calendar.end_hour(), offset));

            if let Some((work_start, work_end)) = window {
                let from = work_start.max(start);
                let to = work_end.min(end);
                if to > from {
                    total += to - from;
                }
            }
        }

        day = match day.succ_opt() {
            Some(next) => next,
            None => break,
        };
    }

    duration_seconds(total)
}

fn duration_seconds(d: chrono::Duration) -> f64 {
    match d.num_microseconds() {
        Some(us) => us as f64 / 1_000_000.0,
        None => d.num_milliseconds() as f64 / 1000.0,
    }
}

/// Accumulate working time per state over time-ordered events.
///
/// Each state is charged from the event that entered it until the next event
/// with a different state. A repeated state is a no-op and does not move the
/// start of the open interval. The last state stays open until `now`.
pub fn accumulate_time_in_state(
    events: &[StateChangeEvent],
    calendar: &WorkCalendar,
    now: DateTime<Utc>,
) -> TimeInState {
    let (mut totals, open) = events.iter().fold(
        (TimeInState::canonical(), None::<(&str, DateTime<Utc>)>),
        |(mut totals, open), event| match open {
            Some((state, since)) if state == event.state => (totals, Some((state, since))),
            Some((state, since)) => {
                totals.add(state, working_seconds(since, event.timestamp, calendar));
                (totals, Some((event.state.as_str(), event.timestamp)))
            }
            None => (totals, Some((event.state.as_str(), event.timestamp))),
        },
    );

    if let Some((state, since)) = open {
        totals.add(state, working_seconds(since, now, calendar));
    }

    totals
}

/// Extraction and accumulation for one work item's raw history.
pub fn time_in_state(
    updates: &[WorkItemUpdate],
    calendar: &WorkCalendar,
    now: DateTime<Utc>,
) -> TimeInState {
    let events = extract_state_changes(updates);
    accumulate_time_in_state(&events, calendar, now)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::FieldChange;
    use serde_json::json;
    use std::collections::HashMap;

    fn utc() -> FixedOffset {
        FixedOffset::east_opt(0).unwrap()
    }

    // Mon..Sat, 11:00-19:00
    fn office() -> WorkCalendar {
        WorkCalendar::new([1, 2, 3, 4, 5, 6], 11, 19, utc()).unwrap()
    }

    // 2024-06-10 is a Monday
    fn at(day: u32, h: u32, m: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 6, day, h, m, 0).unwrap()
    }

    fn event(state: &str, ts: DateTime<Utc>) -> StateChangeEvent {
        StateChangeEvent {
            revision: 0,
            state: state.to_string(),
            timestamp: ts,
        }
    }

    fn update(rev: i64, state: Option<&str>, date: Option<&str>) -> WorkItemUpdate {
        let mut fields = HashMap::new();
        if let Some(s) = state {
            fields.insert(
                STATE_FIELD.to_string(),
                FieldChange {
                    new_value: Some(json!(s)),
                },
            );
        }
        if let Some(d) = date {
            fields.insert(
                STATE_CHANGE_DATE_FIELD.to_string(),
                FieldChange {
                    new_value: Some(json!(d)),
                },
            );
        }
        WorkItemUpdate { rev, fields }
    }

    fn close(a: f64, b: f64) -> bool {
        (a - b).abs() < 0.001
    }

    #[test]
    fn clips_before_work_start_and_keeps_open_state_until_now() {
        let events = vec![event("To Do", at(10, 10, 0)), event("Doing", at(10, 15, 0))];
        let tis = accumulate_time_in_state(&events, &office(), at(10, 16, 0));

        assert!(close(tis.get("To Do").unwrap(), 14400.0));
        assert!(close(tis.get("Doing").unwrap(), 3600.0));
        assert_eq!(tis.get("Done"), Some(0.0));
    }

    #[test]
    fn non_positive_interval_is_zero() {
        assert_eq!(working_seconds(at(10, 12, 0), at(10, 12, 0), &office()), 0.0);
        assert_eq!(working_seconds(at(11, 12, 0), at(10, 12, 0), &office()), 0.0);
    }

    #[test]
    fn no_work_days_means_no_working_time() {
        let cal = WorkCalendar::new(Vec::<u32>::new(), 0, 23, utc()).unwrap();
        assert_eq!(working_seconds(at(1, 0, 0), at(30, 0, 0), &cal), 0.0);
    }

    #[test]
    fn excluded_sunday_contributes_nothing() {
        // 2024-06-09 is a Sunday
        assert_eq!(working_seconds(at(9, 8, 0), at(9, 20, 0), &office()), 0.0);
    }

    #[test]
    fn spans_several_days_skipping_sunday() {
        // Fri 18:00 -> Mon 12:00: Fri 1h, Sat 8h, Sun 0h, Mon 1h
        let secs = working_seconds(at(14, 18, 0), at(17, 12, 0), &office());
        assert!(close(secs, 10.0 * 3600.0));
    }

    #[test]
    fn interval_ending_at_midnight() {
        let secs = working_seconds(at(10, 12, 0), at(11, 0, 0), &office());
        assert!(close(secs, 7.0 * 3600.0));
    }

    #[test]
    fn work_hours_follow_calendar_offset() {
        let tokyo = FixedOffset::east_opt(9 * 3600).unwrap();
        let cal = WorkCalendar::new([1, 2, 3, 4, 5], 9, 17, tokyo).unwrap();
        // 00:00Z-08:00Z is 09:00-17:00 in +09:00
        assert!(close(working_seconds(at(10, 0, 0), at(10, 8, 0), &cal), 28800.0));

        let cal = WorkCalendar::new([1, 2, 3, 4, 5], 9, 17, utc()).unwrap();
        assert_eq!(working_seconds(at(10, 0, 0), at(10, 8, 0), &cal), 0.0);
    }

    #[test]
    fn keeps_sub_second_precision() {
        let start = at(10, 12, 0);
        let end = start + chrono::Duration::milliseconds(1250);
        assert!(close(working_seconds(start, end, &office()), 1.25));
    }

    #[test]
    fn repeated_state_does_not_restart_interval() {
        let events = vec![
            event("Doing", at(10, 11, 0)),
            event("Doing", at(10, 13, 0)),
            event("Done", at(10, 15, 0)),
        ];
        let tis = accumulate_time_in_state(&events, &office(), at(10, 15, 0));

        assert!(close(tis.get("Doing").unwrap(), 4.0 * 3600.0));
        assert_eq!(tis.get("Done"), Some(0.0));
    }

    #[test]
    fn single_state_accumulates_only_there() {
        let events = vec![event("To Do", at(10, 12, 0)), event("To Do", at(10, 13, 0))];
        let tis = accumulate_time_in_state(&events, &office(), at(10, 14, 0));

        assert!(close(tis.get("To Do").unwrap(), 7200.0));
        assert!(close(tis.total(), 7200.0));
    }

    #[test]
    fn no_events_yields_canonical_zeroes() {
        let tis = accumulate_time_in_state(&[], &office(), at(10, 14, 0));
        assert_eq!(tis, TimeInState::canonical());
        assert_eq!(tis.iter().count(), 5);
        assert_eq!(tis.total(), 0.0);
    }

    #[test]
    fn unknown_states_are_reported() {
        let events = vec![event("Blocked", at(10, 12, 0)), event("Doing", at(10, 13, 0))];
        let tis = accumulate_time_in_state(&events, &office(), at(10, 13, 0));

        assert!(close(tis.get("Blocked").unwrap(), 3600.0));
        assert_eq!(tis.iter().last().map(|(l, _)| l), Some("Blocked"));
    }

    #[test]
    fn clock_before_last_change_adds_nothing() {
        let events = vec![event("Doing", at(10, 12, 0))];
        let tis = accumulate_time_in_state(&events, &office(), at(10, 11, 0));
        assert_eq!(tis.get("Doing"), Some(0.0));
    }

    #[test]
    fn total_matches_clipped_span_from_first_event() {
        let events = vec![
            event("To Do", at(10, 9, 30)),
            event("Doing", at(11, 16, 45)),
            event("TESTING", at(13, 12, 0)),
            event("Doing", at(14, 18, 10)),
            event("Done", at(17, 11, 5)),
        ];
        let now = at(18, 15, 0);
        let tis = accumulate_time_in_state(&events, &office(), now);

        let span = working_seconds(events[0].timestamp, now, &office());
        assert!(close(tis.total(), span));
    }

    #[test]
    fn accumulation_is_repeatable() {
        let events = vec![event("To Do", at(10, 10, 0)), event("Doing", at(12, 15, 0))];
        let now = at(14, 16, 0);
        assert_eq!(
            accumulate_time_in_state(&events, &office(), now),
            accumulate_time_in_state(&events, &office(), now)
        );
    }

    #[test]
    fn extraction_skips_incomplete_updates() {
        let mut null_state = update(4, None, Some("2024-06-10T12:00:00Z"));
        null_state.fields.insert(
            STATE_FIELD.to_string(),
            FieldChange {
                new_value: Some(serde_json::Value::Null),
            },
        );

        let updates = vec![
            update(1, Some("To Do"), Some("2024-06-10T10:00:00Z")),
            update(2, Some("Doing"), None),
            update(3, None, Some("2024-06-10T11:00:00Z")),
            null_state,
            update(5, Some(""), Some("2024-06-10T12:00:00Z")),
            update(6, Some("Done"), Some("not a date")),
            update(7, Some("Doing"), Some("2024-06-10T15:00:00.000Z")),
        ];

        let events = extract_state_changes(&updates);
        let revs: Vec<i64> = events.iter().map(|e| e.revision).collect();
        assert_eq!(revs, vec![1, 7]);
        assert_eq!(events[1].timestamp, at(10, 15, 0));
    }

    #[test]
    fn extraction_sorts_by_time_and_keeps_ties_in_input_order() {
        let updates = vec![
            update(1, Some("Doing"), Some("2024-06-10T15:00:00Z")),
            update(2, Some("To Do"), Some("2024-06-10T10:00:00Z")),
            update(3, Some("TESTING"), Some("2024-06-10T15:00:00Z")),
        ];
        let events = extract_state_changes(&updates);
        let states: Vec<&str> = events.iter().map(|e| e.state.as_str()).collect();
        assert_eq!(states, vec!["To Do", "Doing", "TESTING"]);
    }

    #[test]
    fn pipeline_from_raw_updates() {
        let updates = vec![
            update(2, Some("Doing"), Some("2024-06-10T15:00:00+00:00")),
            update(1, Some("To Do"), Some("2024-06-10T10:00:00Z")),
        ];
        let tis = time_in_state(&updates, &office(), at(10, 16, 0));
        assert!(close(tis.get("To Do").unwrap(), 14400.0));
        assert!(close(tis.get("Doing").unwrap(), 3600.0));
    }
}
