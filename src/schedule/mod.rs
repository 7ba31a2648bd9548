// Schedule mini-language and next-run computation
//
// A schedule is a string of whitespace/comma-separated tokens:
// weekday prefixes (mon..sun), "monthly", "weekly", and one HH:MM
// or *:MM time-of-day token. Unrecognized tokens are ignored.

use chrono::{Datelike, Duration, NaiveDateTime, NaiveTime, Timelike};
use std::collections::BTreeSet;

const WEEKDAYS: [&str; 7] = ["mon", "tue", "wed", "thu", "fri", "sat", "sun"];

/// Time-of-day requested by a schedule.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum TimeToken {
    /// Fixed HH:MM.
    At { hour: u32, minute: u32 },
    /// `*:MM`: the next hour boundary from the reference time, at MM.
    NextHour { minute: u32 },
}

/// Parsed recurrence specification.
///
/// Day-of-month candidates default to every day; `monthly` pins them to
/// the 1st. The day-of-week set is empty by default, meaning "any day";
/// `weekly` pins it to Monday and explicit weekday tokens add to it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScheduleSpec {
    month_days: BTreeSet<u32>,
    week_days: BTreeSet<u32>, // 0 = Monday .. 6 = Sunday
    time: Option<TimeToken>,
}

impl ScheduleSpec {
    /// Parse a schedule string. Returns `None` for an empty/blank spec.
    pub fn parse(spec: &str) -> Option<Self> {
        if spec.trim().is_empty() {
            return None;
        }

        let mut month_days: BTreeSet<u32> = (1..=31).collect();
        let mut week_days = BTreeSet::new();
        let mut time = None;

        for part in spec.to_lowercase().replace(',', " ").split_whitespace() {
            if part == "monthly" {
                month_days = BTreeSet::from([1]);
            } else if part == "weekly" {
                week_days.insert(0);
            } else if let Some(day) = WEEKDAYS.iter().position(|d| part.starts_with(d)) {
                week_days.insert(day as u32);
            } else if let Some((hour, minute)) = parse_time_token(part) {
                // The last time token wins
                time = Some(match hour {
                    Some(hour) => TimeToken::At { hour, minute },
                    None => TimeToken::NextHour { minute },
                });
            }
        }

        Some(Self {
            month_days,
            week_days,
            time,
        })
    }

    /// Compute the first eligible run time strictly after `from_time`.
    ///
    /// Pure: the only clock involved is the `from_time` argument. Scans at
    /// most 32 days ahead and returns `None` past that bound.
    pub fn next_run(&self, from_time: NaiveDateTime) -> Option<NaiveDateTime> {
        // Advance one minute so results are strictly future and the same
        // minute never re-triggers.
        let from_time = from_time + Duration::minutes(1);

        let (hour, minute) = match self.time {
            Some(TimeToken::At { hour, minute }) => (hour, minute),
            Some(TimeToken::NextHour { minute }) => ((from_time.hour() + 1) % 24, minute),
            None => (0, 0),
        };
        let time = NaiveTime::from_hms_opt(hour, minute, 0)?;

        let mut candidate = from_time.date().and_time(time);
        for _ in 0..32 {
            let dow = candidate.weekday().num_days_from_monday();
            if self.month_days.contains(&candidate.day())
                && (self.week_days.is_empty() || self.week_days.contains(&dow))
                && candidate >= from_time
            {
                return Some(candidate);
            }
            candidate += Duration::days(1);
        }

        None
    }
}

/// Convenience wrapper: parse `spec` and compute the next run after
/// `from_time`. Empty specs yield `None`.
pub fn next_run(spec: &str, from_time: NaiveDateTime) -> Option<NaiveDateTime> {
    ScheduleSpec::parse(spec)?.next_run(from_time)
}

fn parse_time_token(part: &str) -> Option<(Option<u32>, u32)> {
    let (hour, minute) = part.split_once(':')?;
    let minute: u32 = minute.parse().ok().filter(|m| *m < 60)?;
    if hour == "*" {
        return Some((None, minute));
    }
    let hour: u32 = hour.parse().ok().filter(|h| *h < 24)?;
    Some((Some(hour), minute))
}

/// Format a timestamp relative to `now`, e.g. "0d 2h 5m from now",
/// "1d 0h 12m ago", "just now" or "never".
pub fn format_relative(time: Option<NaiveDateTime>, now: NaiveDateTime) -> String {
    let Some(time) = time else {
        return "never".to_string();
    };
    let secs = (time - now).num_seconds();
    if secs.abs() < 60 {
        return "just now".to_string();
    }
    let days = secs.abs() / 86_400;
    let hours = (secs.abs() / 3_600) % 24;
    let minutes = (secs.abs() / 60) % 60;
    let suffix = if secs > 0 { "from now" } else { "ago" };
    format!("{days}d {hours}h {minutes}m {suffix}")
}
