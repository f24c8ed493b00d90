//! Schedule-time labels.
//!
//! A record is either pinned to a wall-clock minute (`"HH:MM"`) or left
//! unscheduled, in which case it is stored under the `"NA"` sentinel and only
//! picked up by the fallback slot of a default posting time.

use std::fmt;
use std::str::FromStr;
use std::sync::LazyLock;

use chrono::{NaiveTime, Timelike};
use regex::Regex;
use serde::{Deserialize, Deserializer, Serialize, Serializer};

use crate::error::CoreError;

/// Persisted sentinel for records without a concrete posting time.
pub const UNSCHEDULED: &str = "NA";

static LABEL_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^([0-1][0-9]|2[0-3]):[0-5][0-9]$").expect("valid regex"));

/// A schedule-time label: a concrete minute of the day or the unscheduled sentinel.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Default)]
pub enum ScheduleLabel {
    #[default]
    Unscheduled,
    At(String),
}

impl ScheduleLabel {
    /// Parse an operator-supplied `"HH:MM"` label. The sentinel is not accepted here.
    pub fn parse_time(s: &str) -> Result<Self, CoreError> {
        if is_time_label(s) {
            Ok(ScheduleLabel::At(s.to_string()))
        } else {
            Err(CoreError::validation(format!("time '{s}' is invalid")))
        }
    }

    /// Label for the minute containing `time`.
    pub fn from_time(time: NaiveTime) -> Self {
        ScheduleLabel::At(format!("{:02}:{:02}", time.hour(), time.minute()))
    }

    /// Label for the current local minute.
    pub fn now_local() -> Self {
        Self::from_time(chrono::Local::now().time())
    }

    pub fn as_str(&self) -> &str {
        match self {
            ScheduleLabel::Unscheduled => UNSCHEDULED,
            ScheduleLabel::At(s) => s,
        }
    }

    pub fn is_unscheduled(&self) -> bool {
        matches!(self, ScheduleLabel::Unscheduled)
    }

    /// Human-facing form used in reports (`--:--` for the sentinel).
    pub fn display_label(&self) -> &str {
        match self {
            ScheduleLabel::Unscheduled => "--:--",
            ScheduleLabel::At(s) => s,
        }
    }
}

/// Whether `s` is a well-formed `"HH:MM"` label.
pub fn is_time_label(s: &str) -> bool {
    LABEL_RE.is_match(s)
}

impl fmt::Display for ScheduleLabel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ScheduleLabel {
    type Err = CoreError;

    /// Accepts both stored forms: `"NA"` and `"HH:MM"`.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if s == UNSCHEDULED {
            Ok(ScheduleLabel::Unscheduled)
        } else {
            Self::parse_time(s)
        }
    }
}

impl Serialize for ScheduleLabel {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.as_str())
    }
}

impl<'de> Deserialize<'de> for ScheduleLabel {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        raw.parse().map_err(serde::de::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn accepts_valid_times() {
        for s in ["00:00", "09:30", "19:59", "23:59"] {
            assert_eq!(ScheduleLabel::parse_time(s).unwrap().as_str(), s);
        }
    }

    #[test]
    fn rejects_malformed_times() {
        for s in ["24:00", "9:30", "12:60", "12:5", "ab:cd", "", "NA", " 12:00"] {
            assert!(ScheduleLabel::parse_time(s).is_err(), "{s} should be rejected");
        }
    }

    #[test]
    fn sentinel_parses_from_stored_form() {
        let label: ScheduleLabel = "NA".parse().unwrap();
        assert!(label.is_unscheduled());
        assert_eq!(label.display_label(), "--:--");
    }

    #[test]
    fn from_time_pads_fields() {
        let t = NaiveTime::from_hms_opt(7, 5, 42).unwrap();
        assert_eq!(ScheduleLabel::from_time(t).as_str(), "07:05");
    }

    #[test]
    fn serde_uses_plain_string() {
        let json = serde_json::to_string(&ScheduleLabel::At("10:15".into())).unwrap();
        assert_eq!(json, "\"10:15\"");
        let back: ScheduleLabel = serde_json::from_str("\"NA\"").unwrap();
        assert_eq!(back, ScheduleLabel::Unscheduled);
        assert!(serde_json::from_str::<ScheduleLabel>("\"25:00\"").is_err());
    }
}
