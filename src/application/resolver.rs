use crate::application::ticker::TickMode;
use crate::domain::models::{
    Countdown, Interval, IntervalKind, IntervalStatus, SessionStatus, StudySession,
};
use serde::Serialize;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionPhase {
    None,
    Pending,
    Ongoing,
    Complete,
}

impl SessionPhase {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::None => "none",
            Self::Pending => "pending",
            Self::Ongoing => "ongoing",
            Self::Complete => "complete",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedState {
    pub session_id: Option<String>,
    pub phase: SessionPhase,
    pub interval_index: usize,
    pub kind: IntervalKind,
    pub countdown: Countdown,
    pub mode: TickMode,
    // Set when the resolver had to substitute a display value for inconsistent data.
    pub defaulted: bool,
}

impl ResolvedState {
    pub fn empty() -> Self {
        Self {
            session_id: None,
            phase: SessionPhase::None,
            interval_index: 0,
            kind: IntervalKind::Focus,
            countdown: Countdown::ZERO,
            mode: TickMode::Countdown,
            defaulted: false,
        }
    }
}

pub fn select_current_session<'a>(
    ongoing: &'a [StudySession],
    pending: &'a [StudySession],
) -> Option<&'a StudySession> {
    ongoing.first().or_else(|| pending.first())
}

pub fn elapsed_seconds(interval: &Interval) -> u64 {
    let (Some(started_at), Some(pinged_at)) = (interval.started_at, interval.pinged_at) else {
        return 0;
    };
    let millis = (pinged_at - started_at).num_milliseconds().max(0);
    (millis / 1_000) as u64
}

pub fn resolve(session: Option<&StudySession>) -> ResolvedState {
    let Some(session) = session else {
        return ResolvedState::empty();
    };

    let total = session.intervals.len();
    let mode = if session.is_stopwatch() {
        TickMode::Stopwatch
    } else {
        TickMode::Countdown
    };
    let full = match mode {
        TickMode::Countdown => Countdown::from_minutes(session.focus_time),
        TickMode::Stopwatch => Countdown::ZERO,
    };
    let base = ResolvedState {
        session_id: Some(session.id.clone()),
        phase: SessionPhase::Pending,
        interval_index: 0,
        kind: IntervalKind::for_position(0, total),
        countdown: full,
        mode,
        defaulted: false,
    };

    match session.status {
        SessionStatus::Pending => base,
        SessionStatus::Ongoing => match session.ongoing_interval() {
            Some((index, interval)) => {
                let elapsed = elapsed_seconds(interval);
                let countdown = match mode {
                    TickMode::Countdown => Countdown::from_seconds(
                        (u64::from(session.focus_time) * 60).saturating_sub(elapsed),
                    ),
                    TickMode::Stopwatch => Countdown::from_seconds(elapsed),
                };
                ResolvedState {
                    phase: SessionPhase::Ongoing,
                    interval_index: index,
                    kind: IntervalKind::for_position(index, total),
                    countdown,
                    ..base
                }
            }
            None => {
                let index = session
                    .intervals
                    .iter()
                    .position(|interval| interval.status != IntervalStatus::Ended)
                    .unwrap_or(0);
                ResolvedState {
                    phase: SessionPhase::Ongoing,
                    interval_index: index,
                    kind: IntervalKind::for_position(index, total),
                    defaulted: true,
                    ..base
                }
            }
        },
        SessionStatus::Ended | SessionStatus::Cancelled | SessionStatus::Other(_) => {
            ResolvedState {
                phase: SessionPhase::Complete,
                countdown: Countdown::ZERO,
                ..base
            }
        }
    }
}
