use crate::domain::models::StudySession;
use crate::infrastructure::error::InfraError;
use chrono::{DateTime, Utc};
use std::sync::Mutex;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionSnapshot {
    pub ongoing: Vec<StudySession>,
    pub pending: Vec<StudySession>,
    pub fetched_at: DateTime<Utc>,
}

pub trait SessionSnapshotRepository: Send + Sync {
    fn load(&self) -> Result<Option<SessionSnapshot>, InfraError>;
    fn save(&self, snapshot: SessionSnapshot) -> Result<(), InfraError>;
}

#[derive(Debug, Default)]
pub struct InMemorySessionSnapshotRepository {
    snapshot: Mutex<Option<SessionSnapshot>>,
}

impl SessionSnapshotRepository for InMemorySessionSnapshotRepository {
    fn load(&self) -> Result<Option<SessionSnapshot>, InfraError> {
        let snapshot = self
            .snapshot
            .lock()
            .map_err(|error| InfraError::InvalidState(format!("session cache lock poisoned: {error}")))?;
        Ok(snapshot.clone())
    }

    fn save(&self, snapshot: SessionSnapshot) -> Result<(), InfraError> {
        let mut current = self
            .snapshot
            .lock()
            .map_err(|error| InfraError::InvalidState(format!("session cache lock poisoned: {error}")))?;
        *current = Some(snapshot);
        Ok(())
    }
}
