use crate::domain::models::{next_interval, Countdown, IntervalKind, NextInterval, StudySession};
use crate::infrastructure::error::InfraError;
use crate::infrastructure::room_client::StudySessionClient;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransitionOutcome {
    Advanced {
        index: usize,
        kind: IntervalKind,
        countdown: Countdown,
    },
    Completed,
}

pub async fn advance_interval<C>(
    client: &C,
    session: &StudySession,
    current_index: usize,
) -> Result<TransitionOutcome, InfraError>
where
    C: StudySessionClient + ?Sized,
{
    let current = session.intervals.get(current_index).ok_or_else(|| {
        InfraError::InvalidState(format!(
            "session {} has no interval at position {current_index}",
            session.id
        ))
    })?;

    client.end_interval(&session.id, &current.id).await?;
    tracing::info!(
        session_id = %session.id,
        interval_id = %current.id,
        index = current_index,
        "interval ended"
    );

    match next_interval(current_index, session.intervals.len()) {
        NextInterval::Complete => Ok(TransitionOutcome::Completed),
        NextInterval::Advance { index, kind } => {
            let next = &session.intervals[index];
            client.start_interval(&session.id, &next.id).await?;
            tracing::info!(
                session_id = %session.id,
                interval_id = %next.id,
                index,
                kind = kind.as_str(),
                "interval started"
            );
            Ok(TransitionOutcome::Advanced {
                index,
                kind,
                countdown: Countdown::from_minutes(session.duration_minutes(kind)),
            })
        }
    }
}
