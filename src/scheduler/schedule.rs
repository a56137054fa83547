//! Schedule configuration and minute matching
//!
//! Daily entries are `HH:MM` strings compared against the wall clock at
//! minute resolution. One-time entries carry an absolute local timestamp
//! and are consumed by the engine after they match.

use chrono::{NaiveDateTime, NaiveTime, Timelike};
use serde::{Deserialize, Serialize};
use std::fmt;

use super::error::{SchedulerError, SchedulerResult};

/// Daily time format
pub const TIME_FORMAT: &str = "%H:%M";

// ============================================================================
// Entries
// ============================================================================

/// What a one-time entry does
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ScheduleAction {
    Start,
    Stop,
}

impl fmt::Display for ScheduleAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Start => f.write_str("Start"),
            Self::Stop => f.write_str("Stop"),
        }
    }
}

/// Daily start/stop pair
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimeInterval {
    pub start: String,
    pub stop: String,
}

/// Entry bound to an absolute timestamp, fired at most once
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OneTimeAction {
    pub at: NaiveDateTime,
    pub action: ScheduleAction,
}

/// Parse and reformat an `HH:MM` value
pub fn parse_time(field: &str, value: &str) -> SchedulerResult<String> {
    NaiveTime::parse_from_str(value.trim(), TIME_FORMAT)
        .map(|t| t.format(TIME_FORMAT).to_string())
        .map_err(|_| SchedulerError::invalid_time(field, value))
}

fn minute_start(at: NaiveDateTime) -> NaiveDateTime {
    at.with_second(0)
        .and_then(|t| t.with_nanosecond(0))
        .unwrap_or(at)
}

// ============================================================================
// Schedule Config
// ============================================================================

/// Persisted schedule for one task
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ScheduleConfig {
    #[serde(default)]
    pub use_schedule: bool,

    #[serde(default)]
    pub intervals: Vec<TimeInterval>,

    #[serde(default)]
    pub single_start_times: Vec<String>,

    #[serde(default)]
    pub single_stop_times: Vec<String>,

    #[serde(default)]
    pub one_time_actions: Vec<OneTimeAction>,
}

/// Result of evaluating a schedule against one minute
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ScheduleMatch {
    pub stop: bool,
    pub start: bool,
    /// Indices of one-time entries matching this minute
    pub one_time: Vec<usize>,
    /// Indices of one-time entries whose minute has already passed
    pub expired: Vec<usize>,
}

impl ScheduleMatch {
    pub fn consumes_entries(&self) -> bool {
        !self.one_time.is_empty() || !self.expired.is_empty()
    }
}

impl ScheduleConfig {
    pub fn add_interval(&mut self, start: &str, stop: &str) -> SchedulerResult<()> {
        let interval = TimeInterval {
            start: parse_time("intervals.start", start)?,
            stop: parse_time("intervals.stop", stop)?,
        };
        if !self.intervals.contains(&interval) {
            self.intervals.push(interval);
        }
        Ok(())
    }

    pub fn add_single_start(&mut self, time: &str) -> SchedulerResult<()> {
        let time = parse_time("singleStartTimes", time)?;
        if !self.single_start_times.contains(&time) {
            self.single_start_times.push(time);
        }
        Ok(())
    }

    pub fn add_single_stop(&mut self, time: &str) -> SchedulerResult<()> {
        let time = parse_time("singleStopTimes", time)?;
        if !self.single_stop_times.contains(&time) {
            self.single_stop_times.push(time);
        }
        Ok(())
    }

    pub fn add_one_time(&mut self, at: NaiveDateTime, action: ScheduleAction) {
        let entry = OneTimeAction {
            at: minute_start(at),
            action,
        };
        if !self.one_time_actions.contains(&entry) {
            self.one_time_actions.push(entry);
            self.one_time_actions.sort_by_key(|entry| entry.at);
        }
    }

    /// Remove every entry, keeping `use_schedule`
    pub fn clear_entries(&mut self) {
        self.intervals.clear();
        self.single_start_times.clear();
        self.single_stop_times.clear();
        self.one_time_actions.clear();
    }

    /// Reformat loaded entries to canonical `HH:MM`, dropping invalid and
    /// duplicate ones. Returns a description of each dropped entry.
    pub fn normalize(&mut self) -> Vec<String> {
        let mut problems = Vec::new();

        let intervals = std::mem::take(&mut self.intervals);
        for interval in intervals {
            if let Err(e) = self.add_interval(&interval.start, &interval.stop) {
                problems.push(e.to_string());
            }
        }

        for time in std::mem::take(&mut self.single_start_times) {
            if let Err(e) = self.add_single_start(&time) {
                problems.push(e.to_string());
            }
        }

        for time in std::mem::take(&mut self.single_stop_times) {
            if let Err(e) = self.add_single_stop(&time) {
                problems.push(e.to_string());
            }
        }

        for entry in std::mem::take(&mut self.one_time_actions) {
            self.add_one_time(entry.at, entry.action);
        }

        problems
    }

    /// Evaluate start and stop conditions for the minute containing `now`
    pub fn evaluate(&self, now: NaiveDateTime) -> ScheduleMatch {
        let minute = now.format(TIME_FORMAT).to_string();
        let current = minute_start(now);
        let mut result = ScheduleMatch::default();

        for (index, entry) in self.one_time_actions.iter().enumerate() {
            let at = minute_start(entry.at);
            if at == current {
                result.one_time.push(index);
                match entry.action {
                    ScheduleAction::Start => result.start = true,
                    ScheduleAction::Stop => result.stop = true,
                }
            } else if at < current {
                result.expired.push(index);
            }
        }

        result.stop |= self.intervals.iter().any(|i| i.stop == minute)
            || self.single_stop_times.iter().any(|t| *t == minute);
        result.start |= self.intervals.iter().any(|i| i.start == minute)
            || self.single_start_times.iter().any(|t| *t == minute);

        result
    }

    /// Remove one-time entries by index. Returns the removed entries.
    pub fn remove_one_time(&mut self, indices: &[usize]) -> Vec<OneTimeAction> {
        let mut removed = Vec::new();
        let mut kept = Vec::with_capacity(self.one_time_actions.len());
        for (index, entry) in std::mem::take(&mut self.one_time_actions)
            .into_iter()
            .enumerate()
        {
            if indices.contains(&index) {
                removed.push(entry);
            } else {
                kept.push(entry);
            }
        }
        self.one_time_actions = kept;
        removed
    }

    /// Format as display string
    pub fn display(&self) -> String {
        let mut output = String::from("Schedule\n");
        output.push_str(&format!("{:-<40}\n", ""));
        output.push_str(&format!("Enabled: {}\n", self.use_schedule));

        output.push_str("Intervals:\n");
        for interval in &self.intervals {
            output.push_str(&format!("  {} - {}\n", interval.start, interval.stop));
        }

        output.push_str(&format!("Daily starts: {}\n", self.single_start_times.join(", ")));
        output.push_str(&format!("Daily stops: {}\n", self.single_stop_times.join(", ")));

        output.push_str("One-time actions:\n");
        for entry in &self.one_time_actions {
            output.push_str(&format!("  {} {}\n", entry.at.format("%Y-%m-%d %H:%M"), entry.action));
        }

        output
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;

    fn at(h: u32, m: u32, s: u32) -> NaiveDateTime {
        NaiveDate::from_ymd_opt(2024, 5, 1)
            .unwrap()
            .and_hms_opt(h, m, s)
            .unwrap()
    }

    #[test]
    fn test_parse_time_normalizes() {
        assert_eq!(parse_time("f", "9:05").unwrap(), "09:05");
        assert!(parse_time("f", "24:00").is_err());
        assert!(parse_time("f", "noon").is_err());
    }

    #[test]
    fn test_interval_and_single_matching() {
        let mut config = ScheduleConfig::default();
        config.add_interval("08:00", "09:00").unwrap();
        config.add_single_start("12:30").unwrap();

        let m = config.evaluate(at(9, 0, 42));
        assert!(m.stop);
        assert!(!m.start);

        let m = config.evaluate(at(12, 30, 0));
        assert!(m.start);

        let m = config.evaluate(at(9, 1, 0));
        assert_eq!(m, ScheduleMatch::default());
    }

    #[test]
    fn test_one_time_match_and_expiry() {
        let mut config = ScheduleConfig::default();
        config.add_one_time(at(10, 0, 0), ScheduleAction::Start);
        config.add_one_time(at(7, 0, 0), ScheduleAction::Stop);

        let m = config.evaluate(at(10, 0, 30));
        assert!(m.start);
        assert!(!m.stop);
        assert_eq!(m.one_time, vec![1]);
        assert_eq!(m.expired, vec![0]);
        assert!(m.consumes_entries());

        let removed = config.remove_one_time(&m.one_time);
        assert_eq!(removed[0].action, ScheduleAction::Start);
        assert_eq!(config.one_time_actions.len(), 1);
    }

    #[test]
    fn test_one_time_in_future_untouched() {
        let mut config = ScheduleConfig::default();
        config.add_one_time(at(23, 59, 0), ScheduleAction::Stop);
        let m = config.evaluate(at(10, 0, 0));
        assert!(!m.consumes_entries());
    }

    #[test]
    fn test_normalize_drops_invalid_and_duplicates() {
        let mut config = ScheduleConfig {
            use_schedule: true,
            intervals: vec![TimeInterval {
                start: "7:00".into(),
                stop: "bad".into(),
            }],
            single_start_times: vec!["8:00".into(), "08:00".into()],
            single_stop_times: vec!["25:00".into()],
            one_time_actions: vec![],
        };

        let problems = config.normalize();
        assert_eq!(problems.len(), 2);
        assert!(config.intervals.is_empty());
        assert_eq!(config.single_start_times, vec!["08:00"]);
        assert!(config.single_stop_times.is_empty());
    }

    #[test]
    fn test_persisted_field_names() {
        let mut config = ScheduleConfig {
            use_schedule: true,
            ..Default::default()
        };
        config.add_interval("08:00", "09:00").unwrap();
        config.add_one_time(at(10, 0, 0), ScheduleAction::Stop);

        let json = serde_json::to_value(&config).unwrap();
        assert_eq!(json["useSchedule"], true);
        assert_eq!(json["intervals"][0]["start"], "08:00");
        assert_eq!(json["oneTimeActions"][0]["action"], "Stop");
        assert_eq!(json["oneTimeActions"][0]["at"], "2024-05-01T10:00:00");
        assert!(json["singleStartTimes"].is_array());
        assert!(json["singleStopTimes"].is_array());
    }
}
