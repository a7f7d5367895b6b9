//! Clock & Schedule: turns a recurrence description into the next
//! absolute `(start, duration)` window.

use std::time::{Duration, SystemTime};

use chrono::{DateTime, Datelike, Local, NaiveTime, TimeZone, Weekday};

/// Read-only to the rest of the engine: produces the next occurrence of a
/// recurring window, or `None` if the schedule has no more occurrences.
pub trait Schedule: Send + Sync {
    /// Returns the next `(start, duration)` whose widened window ends after
    /// `now`, or `None` if this schedule is exhausted. `leeway_seconds`
    /// widens the window symmetrically: the start moves `leeway_seconds`
    /// earlier and the duration grows by `2 * leeway_seconds`.
    fn next_occurrence(&self, now: SystemTime, leeway_seconds: i64) -> Option<(SystemTime, Duration)>;
}

/// A show that recurs weekly on one or more weekdays, within a daily
/// time-of-day window. The window may cross midnight (`end < start`), in
/// which case its duration extends into the following day.
#[derive(Debug, Clone)]
pub struct WeeklySchedule {
    weekdays: Vec<Weekday>,
    start_seconds: u32,
    end_seconds: u32,
}

impl WeeklySchedule {
    pub fn new(weekdays: Vec<Weekday>, start_seconds: u32, end_seconds: u32) -> Self {
        Self {
            weekdays,
            start_seconds,
            end_seconds,
        }
    }

    fn base_duration_seconds(&self) -> i64 {
        if self.end_seconds < self.start_seconds {
            self.end_seconds as i64 + 86_400 - self.start_seconds as i64
        } else {
            self.end_seconds as i64 - self.start_seconds as i64
        }
    }
}

impl Schedule for WeeklySchedule {
    fn next_occurrence(&self, now: SystemTime, leeway_seconds: i64) -> Option<(SystemTime, Duration)> {
        if self.weekdays.is_empty() {
            return None;
        }

        let now_local: DateTime<Local> = now.into();
        let widened_start_seconds = self.start_seconds as i64 - leeway_seconds;
        let widened_duration_seconds = self.base_duration_seconds() + 2 * leeway_seconds;
        if widened_duration_seconds <= 0 {
            return None;
        }

        // A schedule with at least one weekday always has an occurrence
        // within the next 8 days - if this week's remaining days don't
        // satisfy the "ends after now" test, the same weekday next week
        // will, since its window hasn't started yet.
        for offset in 0i64..=7 {
            let day = now_local.date_naive() + chrono::Duration::days(offset);
            if !self.weekdays.contains(&day.weekday()) {
                continue;
            }

            let midnight = day.and_time(NaiveTime::MIN);
            let candidate_start = Local
                .from_local_datetime(&midnight)
                .single()
                .unwrap_or_else(|| now_local)
                + chrono::Duration::seconds(widened_start_seconds);
            let candidate_end = candidate_start + chrono::Duration::seconds(widened_duration_seconds);

            if candidate_end > now_local {
                return Some((
                    candidate_start.into(),
                    Duration::from_secs(widened_duration_seconds as u64),
                ));
            }
        }

        None
    }
}

/// Parses a time-of-day field as either raw seconds-from-midnight or an
/// `[H:]M:S` string, matching the format the configuration parser hands
/// down for `start`/`end` fields.
pub fn parse_time_of_day(input: &str) -> anyhow::Result<u32> {
    let input = input.trim();
    if let Ok(seconds) = input.parse::<u32>() {
        return Ok(seconds);
    }

    let parts: Vec<&str> = input.split(':').collect();
    let (h, m, s) = match parts.as_slice() {
        [m, s] => (0u32, parse_component(m)?, parse_component(s)?),
        [h, m, s] => (parse_component(h)?, parse_component(m)?, parse_component(s)?),
        _ => anyhow::bail!("invalid time-of-day '{input}', expected seconds or '[H:]M:S'"),
    };

    Ok(h * 3600 + m * 60 + s)
}

fn parse_component(s: &str) -> anyhow::Result<u32> {
    s.trim()
        .parse::<u32>()
        .map_err(|_| anyhow::anyhow!("invalid time-of-day component '{s}'"))
}

/// Parses a weekday token, matching on the prefixes the original
/// configuration accepted (`M`, `Tu`, `W`, `Th`, `Fr`, `Sa`, `Su`, or a
/// full English weekday name).
pub fn parse_weekday_token(token: &str) -> anyhow::Result<Weekday> {
    let lower = token.trim().to_lowercase();
    let weekday = match lower.as_str() {
        "m" | "mo" | "mon" | "monday" => Weekday::Mon,
        "tu" | "tue" | "tues" | "tuesday" => Weekday::Tue,
        "w" | "we" | "wed" | "wednesday" => Weekday::Wed,
        "th" | "thu" | "thur" | "thursday" => Weekday::Thu,
        "fr" | "fri" | "friday" => Weekday::Fri,
        "sa" | "sat" | "saturday" => Weekday::Sat,
        "su" | "sun" | "sunday" => Weekday::Sun,
        _ => anyhow::bail!("unrecognized weekday '{token}'"),
    };
    Ok(weekday)
}
