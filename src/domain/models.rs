use chrono::{DateTime, NaiveDateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize};
use std::fmt;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum SessionStatus {
    Pending,
    Ongoing,
    Ended,
    Cancelled,
    Other(String),
}

impl SessionStatus {
    pub fn as_str(&self) -> &str {
        match self {
            Self::Pending => "PENDING",
            Self::Ongoing => "ONGOING",
            Self::Ended => "ENDED",
            Self::Cancelled => "CANCELLED",
            Self::Other(value) => value.as_str(),
        }
    }
}

impl From<String> for SessionStatus {
    fn from(value: String) -> Self {
        match value.trim().to_ascii_uppercase().as_str() {
            "PENDING" => Self::Pending,
            "ONGOING" => Self::Ongoing,
            "ENDED" => Self::Ended,
            "CANCELLED" | "CANCELED" => Self::Cancelled,
            _ => Self::Other(value),
        }
    }
}

impl From<SessionStatus> for String {
    fn from(value: SessionStatus) -> Self {
        value.as_str().to_string()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum IntervalStatus {
    Pending,
    Ongoing,
    Ended,
    #[serde(other)]
    Unknown,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TimerType {
    #[default]
    FocusTimer,
    StopWatch,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct Interval {
    #[serde(deserialize_with = "deserialize_id")]
    pub id: String,
    pub status: IntervalStatus,
    #[serde(
        default,
        deserialize_with = "deserialize_lenient_timestamp",
        skip_serializing_if = "Option::is_none"
    )]
    pub started_at: Option<DateTime<Utc>>,
    #[serde(
        default,
        deserialize_with = "deserialize_lenient_timestamp",
        skip_serializing_if = "Option::is_none"
    )]
    pub pinged_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct StudySession {
    #[serde(deserialize_with = "deserialize_id")]
    pub id: String,
    pub status: SessionStatus,
    #[serde(default)]
    pub timer_type: TimerType,
    #[serde(default)]
    pub focus_time: u32,
    #[serde(default)]
    pub short_break: u32,
    #[serde(default)]
    pub long_break: u32,
    #[serde(default)]
    pub intervals: Vec<Interval>,
}

impl StudySession {
    pub fn validate(&self) -> Result<(), String> {
        validate_non_empty(&self.id, "session.id")?;
        if self.timer_type == TimerType::FocusTimer && self.focus_time == 0 {
            return Err("session.focusTime must be > 0".to_string());
        }
        for interval in &self.intervals {
            validate_non_empty(&interval.id, "interval.id")?;
        }
        let ongoing = self
            .intervals
            .iter()
            .filter(|interval| interval.status == IntervalStatus::Ongoing)
            .count();
        if ongoing > 1 {
            return Err(format!(
                "session {} has {ongoing} ongoing intervals; at most one is allowed",
                self.id
            ));
        }
        Ok(())
    }

    pub fn duration_minutes(&self, kind: IntervalKind) -> u32 {
        match kind {
            IntervalKind::Focus => self.focus_time,
            IntervalKind::ShortBreak => self.short_break,
            IntervalKind::LongBreak => self.long_break,
        }
    }

    pub fn ongoing_interval(&self) -> Option<(usize, &Interval)> {
        self.intervals
            .iter()
            .enumerate()
            .find(|(_, interval)| interval.status == IntervalStatus::Ongoing)
    }

    pub fn is_stopwatch(&self) -> bool {
        self.timer_type == TimerType::StopWatch
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum IntervalKind {
    Focus,
    ShortBreak,
    LongBreak,
}

impl IntervalKind {
    pub fn for_position(index: usize, total: usize) -> Self {
        if total > 0 && index + 1 == total {
            Self::LongBreak
        } else if index % 2 == 0 {
            Self::Focus
        } else {
            Self::ShortBreak
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Focus => "focus",
            Self::ShortBreak => "shortBreak",
            Self::LongBreak => "longBreak",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NextInterval {
    Advance { index: usize, kind: IntervalKind },
    Complete,
}

pub fn next_interval(index: usize, total: usize) -> NextInterval {
    let next = index.saturating_add(1);
    if next >= total {
        return NextInterval::Complete;
    }
    NextInterval::Advance {
        index: next,
        kind: IntervalKind::for_position(next, total),
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Countdown {
    pub minutes: u32,
    pub seconds: u32,
}

impl Countdown {
    pub const ZERO: Self = Self {
        minutes: 0,
        seconds: 0,
    };

    pub fn from_minutes(minutes: u32) -> Self {
        Self { minutes, seconds: 0 }
    }

    pub fn from_seconds(total_seconds: u64) -> Self {
        let minutes = u32::try_from(total_seconds / 60).unwrap_or(u32::MAX);
        Self {
            minutes,
            seconds: (total_seconds % 60) as u32,
        }
    }

    pub fn total_seconds(self) -> u64 {
        u64::from(self.minutes) * 60 + u64::from(self.seconds)
    }

    pub fn is_zero(self) -> bool {
        self.minutes == 0 && self.seconds == 0
    }

    pub fn tick_down(self) -> Self {
        match (self.minutes, self.seconds) {
            (0, 0) => Self::ZERO,
            (minutes, 0) => Self {
                minutes: minutes - 1,
                seconds: 59,
            },
            (minutes, seconds) => Self {
                minutes,
                seconds: seconds - 1,
            },
        }
    }

    pub fn tick_up(self) -> Self {
        if self.seconds >= 59 {
            Self {
                minutes: self.minutes.saturating_add(1),
                seconds: 0,
            }
        } else {
            Self {
                minutes: self.minutes,
                seconds: self.seconds + 1,
            }
        }
    }
}

impl fmt::Display for Countdown {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:02}:{:02}", self.minutes, self.seconds)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TimerSetting {
    #[serde(rename_all = "camelCase")]
    FocusTimer {
        focus_time: u32,
        short_break: u32,
        long_break: u32,
        cycles: u32,
    },
    StopWatch,
}

impl TimerSetting {
    pub fn validate(&self) -> Result<(), String> {
        match self {
            Self::FocusTimer {
                focus_time,
                short_break,
                long_break,
                cycles,
            } => {
                if *focus_time == 0 {
                    return Err("timerSetting.focusTime must be > 0".to_string());
                }
                if *short_break == 0 {
                    return Err("timerSetting.shortBreak must be > 0".to_string());
                }
                if *long_break == 0 {
                    return Err("timerSetting.longBreak must be > 0".to_string());
                }
                if *cycles == 0 {
                    return Err("timerSetting.cycles must be >= 1".to_string());
                }
                Ok(())
            }
            Self::StopWatch => Ok(()),
        }
    }
}

fn validate_non_empty(value: &str, field_name: &str) -> Result<(), String> {
    if value.trim().is_empty() {
        return Err(format!("{field_name} must not be empty"));
    }
    Ok(())
}

fn deserialize_id<'de, D>(deserializer: D) -> Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    match serde_json::Value::deserialize(deserializer)? {
        serde_json::Value::String(value) => Ok(value),
        serde_json::Value::Number(value) => Ok(value.to_string()),
        other => Err(serde::de::Error::custom(format!(
            "expected string or number id, got {other}"
        ))),
    }
}

// Backends without an offset send local-less timestamps; those are read as UTC.
fn deserialize_lenient_timestamp<'de, D>(deserializer: D) -> Result<Option<DateTime<Utc>>, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Option::<serde_json::Value>::deserialize(deserializer)?;
    Ok(value
        .as_ref()
        .and_then(serde_json::Value::as_str)
        .and_then(parse_timestamp))
}

pub fn parse_timestamp(raw: &str) -> Option<DateTime<Utc>> {
    let raw = raw.trim();
    if raw.is_empty() {
        return None;
    }
    if let Ok(parsed) = DateTime::parse_from_rfc3339(raw) {
        return Some(parsed.with_timezone(&Utc));
    }
    NaiveDateTime::parse_from_str(raw, "%Y-%m-%dT%H:%M:%S%.f")
        .ok()
        .map(|naive| naive.and_utc())
}
