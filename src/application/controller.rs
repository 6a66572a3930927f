use crate::application::resolver::{resolve, select_current_session, ResolvedState, SessionPhase};
use crate::application::ticker::{TickMode, TickerState, DEFAULT_PING_EVERY_TICKS};
use crate::application::transitioner::{advance_interval, TransitionOutcome};
use crate::domain::models::{
    next_interval, Countdown, IntervalKind, IntervalStatus, NextInterval, SessionStatus,
    StudySession, TimerSetting,
};
use crate::infrastructure::error::InfraError;
use crate::infrastructure::room_client::StudySessionClient;
use crate::infrastructure::session_cache::{SessionSnapshot, SessionSnapshotRepository};
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::sync::{Arc, Mutex as StdMutex, MutexGuard};
use std::time::Duration;
use tokio::sync::{broadcast, Mutex, Notify};
use tokio::task::JoinHandle;
use tokio::time::{self, sleep, Instant, MissedTickBehavior};

pub type NowProvider = Arc<dyn Fn() -> DateTime<Utc> + Send + Sync>;

const EVENT_CHANNEL_CAPACITY: usize = 256;
const DEFAULT_TICK_INTERVAL: Duration = Duration::from_secs(1);

#[derive(Debug, Clone)]
pub struct RetryPolicy {
    pub max_attempts: u8,
    pub base_delay_ms: u64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay_ms: 200,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum NotificationLevel {
    Info,
    Error,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TimerEvent {
    Tick {
        countdown: Countdown,
    },
    PingSent {
        interval_id: String,
    },
    IntervalAdvanced {
        index: usize,
        kind: IntervalKind,
        countdown: Countdown,
    },
    SessionCompleted {
        session_id: String,
    },
    Notification {
        level: NotificationLevel,
        message: String,
    },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TimerSnapshot {
    pub session_id: Option<String>,
    pub phase: SessionPhase,
    pub interval_index: usize,
    pub interval_id: Option<String>,
    pub total_intervals: usize,
    pub kind: IntervalKind,
    pub mode: TickMode,
    pub countdown: Countdown,
    pub display: String,
    pub active: bool,
}

#[derive(Debug)]
struct ControllerState {
    session: Option<StudySession>,
    resolved: ResolvedState,
    ticker: TickerState,
    epoch: u64,
}

impl ControllerState {
    fn new(ping_every: u32) -> Self {
        Self {
            session: None,
            resolved: ResolvedState::empty(),
            ticker: TickerState::new(TickMode::Countdown, Countdown::ZERO, ping_every),
            epoch: 0,
        }
    }

    fn replace(&mut self, session: Option<StudySession>, resolved: ResolvedState) {
        self.ticker.reset(resolved.mode, resolved.countdown);
        self.session = session;
        self.resolved = resolved;
        self.epoch = self.epoch.wrapping_add(1);
    }

    fn current_interval_ids(&self) -> Option<(String, String)> {
        let session = self.session.as_ref()?;
        let interval = session.intervals.get(self.resolved.interval_index)?;
        Some((session.id.clone(), interval.id.clone()))
    }

    fn set_interval_status(&mut self, index: usize, status: IntervalStatus) {
        if let Some(interval) = self
            .session
            .as_mut()
            .and_then(|session| session.intervals.get_mut(index))
        {
            interval.status = status;
        }
    }

    fn complete(&mut self) {
        self.resolved.phase = SessionPhase::Complete;
        self.resolved.countdown = Countdown::ZERO;
        self.ticker.reset(self.resolved.mode, Countdown::ZERO);
        if let Some(session) = self.session.as_mut() {
            session.status = SessionStatus::Ended;
        }
    }

    fn move_to(&mut self, index: usize, kind: IntervalKind, countdown: Countdown) {
        self.resolved.interval_index = index;
        self.resolved.kind = kind;
        self.resolved.countdown = countdown;
    }

    fn snapshot(&self) -> TimerSnapshot {
        let countdown = self.ticker.countdown();
        TimerSnapshot {
            session_id: self.resolved.session_id.clone(),
            phase: self.resolved.phase,
            interval_index: self.resolved.interval_index,
            interval_id: self.current_interval_ids().map(|(_, interval_id)| interval_id),
            total_intervals: self
                .session
                .as_ref()
                .map(|session| session.intervals.len())
                .unwrap_or(0),
            kind: self.resolved.kind,
            mode: self.ticker.mode(),
            countdown,
            display: countdown.to_string(),
            active: self.ticker.is_active(),
        }
    }
}

struct SchedulerHandle {
    cancel: Arc<Notify>,
    task: JoinHandle<()>,
}

pub struct StudyTimerController<C, R>
where
    C: StudySessionClient + 'static,
    R: SessionSnapshotRepository + 'static,
{
    client: Arc<C>,
    snapshot_repository: Arc<R>,
    room_id: String,
    state: Arc<Mutex<ControllerState>>,
    transition_gate: Arc<Mutex<()>>,
    scheduler: Arc<StdMutex<Option<SchedulerHandle>>>,
    tick_interval: Duration,
    ping_every: u32,
    retry_policy: RetryPolicy,
    now_provider: NowProvider,
    events: broadcast::Sender<TimerEvent>,
}

impl<C, R> Clone for StudyTimerController<C, R>
where
    C: StudySessionClient + 'static,
    R: SessionSnapshotRepository + 'static,
{
    fn clone(&self) -> Self {
        Self {
            client: Arc::clone(&self.client),
            snapshot_repository: Arc::clone(&self.snapshot_repository),
            room_id: self.room_id.clone(),
            state: Arc::clone(&self.state),
            transition_gate: Arc::clone(&self.transition_gate),
            scheduler: Arc::clone(&self.scheduler),
            tick_interval: self.tick_interval,
            ping_every: self.ping_every,
            retry_policy: self.retry_policy.clone(),
            now_provider: Arc::clone(&self.now_provider),
            events: self.events.clone(),
        }
    }
}

impl<C, R> StudyTimerController<C, R>
where
    C: StudySessionClient + 'static,
    R: SessionSnapshotRepository + 'static,
{
    pub fn new(client: Arc<C>, snapshot_repository: Arc<R>, room_id: impl Into<String>) -> Self {
        let (events, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        Self {
            client,
            snapshot_repository,
            room_id: room_id.into(),
            state: Arc::new(Mutex::new(ControllerState::new(DEFAULT_PING_EVERY_TICKS))),
            transition_gate: Arc::new(Mutex::new(())),
            scheduler: Arc::new(StdMutex::new(None)),
            tick_interval: DEFAULT_TICK_INTERVAL,
            ping_every: DEFAULT_PING_EVERY_TICKS,
            retry_policy: RetryPolicy::default(),
            now_provider: Arc::new(Utc::now),
            events,
        }
    }

    pub fn with_retry_policy(mut self, retry_policy: RetryPolicy) -> Self {
        self.retry_policy = retry_policy;
        self
    }

    pub fn with_now_provider(mut self, now_provider: NowProvider) -> Self {
        self.now_provider = now_provider;
        self
    }

    pub fn with_tick_interval(mut self, tick_interval: Duration) -> Self {
        self.tick_interval = tick_interval.max(Duration::from_millis(1));
        self
    }

    pub fn with_ping_every(mut self, ping_every: u32) -> Self {
        self.ping_every = ping_every.max(1);
        self
    }

    pub fn subscribe(&self) -> broadcast::Receiver<TimerEvent> {
        self.events.subscribe()
    }

    pub async fn snapshot(&self) -> TimerSnapshot {
        self.state.lock().await.snapshot()
    }

    // Waits for an interval transition that is already talking to the server.
    pub async fn refresh(&self) -> Result<TimerSnapshot, InfraError> {
        let transition = self.transition_gate.lock().await;
        let ongoing = self.list_sessions_with_retry(SessionStatus::Ongoing).await?;
        let pending = self.list_sessions_with_retry(SessionStatus::Pending).await?;
        for session in ongoing.iter().chain(pending.iter()) {
            if let Err(reason) = session.validate() {
                tracing::warn!(session_id = %session.id, %reason, "inconsistent study session");
            }
        }

        let previous = self.snapshot_repository.load()?;
        let snapshot = SessionSnapshot {
            ongoing,
            pending,
            fetched_at: (self.now_provider)(),
        };
        self.snapshot_repository.save(snapshot.clone())?;

        let current = select_current_session(&snapshot.ongoing, &snapshot.pending).cloned();
        let resolved = resolve(current.as_ref());
        if resolved.defaulted {
            tracing::warn!(
                session_id = ?resolved.session_id,
                "ongoing session has no ongoing interval; showing full focus time"
            );
        }
        if let Some(previous) = previous {
            let previous_id = select_current_session(&previous.ongoing, &previous.pending)
                .map(|session| session.id.as_str());
            if previous_id != resolved.session_id.as_deref() {
                tracing::info!(
                    previous = ?previous_id,
                    current = ?resolved.session_id,
                    since = %previous.fetched_at,
                    "current study session changed"
                );
            }
        }

        let (timer, keep_running) = {
            let mut state = self.state.lock().await;
            let keep_running =
                state.ticker.is_active() && state.resolved.session_id == resolved.session_id;
            if keep_running {
                state.session = current;
            } else {
                state.replace(current, resolved);
            }
            tracing::info!(
                session_id = ?state.resolved.session_id,
                phase = state.resolved.phase.as_str(),
                display = %state.ticker.countdown(),
                "study sessions refreshed"
            );
            (state.snapshot(), keep_running)
        };
        drop(transition);

        if !keep_running {
            self.cancel_scheduler().await?;
        }
        Ok(timer)
    }

    pub async fn start(&self) -> Result<TimerSnapshot, InfraError> {
        let (ids, needs_start) = {
            let state = self.state.lock().await;
            let session = state
                .session
                .as_ref()
                .ok_or_else(|| InfraError::InvalidState("no study session to start".to_string()))?;
            if state.resolved.phase == SessionPhase::Complete {
                return Err(InfraError::InvalidState(format!(
                    "study session {} is already complete",
                    session.id
                )));
            }
            if state.ticker.is_active() {
                return Ok(state.snapshot());
            }

            let index = state.resolved.interval_index;
            match session.intervals.get(index) {
                Some(interval) if interval.status == IntervalStatus::Ended => {
                    return Err(InfraError::InvalidState(format!(
                        "interval {} has already ended",
                        interval.id
                    )));
                }
                Some(interval) => (
                    Some((session.id.clone(), interval.id.clone())),
                    interval.status != IntervalStatus::Ongoing,
                ),
                None if session.is_stopwatch() => (None, false),
                None => {
                    return Err(InfraError::InvalidState(format!(
                        "session {} has no interval at position {index}",
                        session.id
                    )));
                }
            }
        };

        if needs_start {
            if let Some((session_id, interval_id)) = &ids {
                if let Err(error) = self.client.start_interval(session_id, interval_id).await {
                    self.notify_error(format!("failed to start interval: {error}"));
                    return Err(error);
                }
                tracing::info!(%session_id, %interval_id, "interval started");
            }
        }

        {
            let mut state = self.state.lock().await;
            let index = state.resolved.interval_index;
            state.set_interval_status(index, IntervalStatus::Ongoing);
            if let Some(session) = state.session.as_mut() {
                session.status = SessionStatus::Ongoing;
            }
            state.resolved.phase = SessionPhase::Ongoing;
            state.ticker.set_ping_every(self.ping_every);
            if needs_start {
                let countdown = state.ticker.countdown();
                state.ticker.activate(countdown);
            } else {
                state.ticker.resume();
            }
        }

        self.spawn_scheduler().await?;
        Ok(self.snapshot().await)
    }

    pub async fn pause(&self) -> Result<TimerSnapshot, InfraError> {
        self.cancel_scheduler().await?;
        let mut state = self.state.lock().await;
        state.ticker.deactivate();
        tracing::info!(display = %state.ticker.countdown(), "timer paused");
        Ok(state.snapshot())
    }

    pub async fn stop(&self) -> Result<TimerSnapshot, InfraError> {
        self.cancel_scheduler().await?;
        let (session_id, interval_id, index, total) = {
            let mut state = self.state.lock().await;
            state.ticker.deactivate();
            let session = state
                .session
                .as_ref()
                .ok_or_else(|| InfraError::InvalidState("no study session to stop".to_string()))?;
            let index = state.resolved.interval_index;
            let interval = session.intervals.get(index).ok_or_else(|| {
                InfraError::InvalidState(format!(
                    "session {} has no interval at position {index}",
                    session.id
                ))
            })?;
            if interval.status != IntervalStatus::Ongoing {
                return Err(InfraError::InvalidState(format!(
                    "interval {} is not running",
                    interval.id
                )));
            }
            (
                session.id.clone(),
                interval.id.clone(),
                index,
                session.intervals.len(),
            )
        };

        if let Err(error) = self.client.end_interval(&session_id, &interval_id).await {
            self.notify_error(format!("failed to end interval: {error}"));
            return Err(error);
        }
        tracing::info!(%session_id, %interval_id, "interval stopped");

        let mut state = self.state.lock().await;
        state.set_interval_status(index, IntervalStatus::Ended);
        match next_interval(index, total) {
            NextInterval::Complete => {
                state.complete();
                self.publish(TimerEvent::SessionCompleted { session_id });
            }
            NextInterval::Advance { index, kind } => {
                let minutes = state
                    .session
                    .as_ref()
                    .map(|session| session.duration_minutes(kind))
                    .unwrap_or(0);
                let countdown = match state.ticker.mode() {
                    TickMode::Countdown => Countdown::from_minutes(minutes),
                    TickMode::Stopwatch => Countdown::ZERO,
                };
                state.move_to(index, kind, countdown);
                let mode = state.ticker.mode();
                state.ticker.reset(mode, countdown);
            }
        }
        Ok(state.snapshot())
    }

    pub async fn tick(&self) -> Result<TimerSnapshot, InfraError> {
        let (outcome, ping_target, transition_target) = {
            let mut state = self.state.lock().await;
            if !state.ticker.is_active() {
                return Ok(state.snapshot());
            }
            let outcome = state.ticker.tick();
            state.resolved.countdown = outcome.countdown;
            let ping_target = if outcome.ping_due {
                state.current_interval_ids()
            } else {
                None
            };
            let transition_target = if outcome.expired {
                let index = state.resolved.interval_index;
                let epoch = state.epoch;
                state.session.clone().map(|session| (session, index, epoch))
            } else {
                None
            };
            (outcome, ping_target, transition_target)
        };

        tracing::debug!(display = %outcome.countdown, "tick");
        self.publish(TimerEvent::Tick {
            countdown: outcome.countdown,
        });
        if let Some((session_id, interval_id)) = ping_target {
            if transition_target.is_some() {
                // Last ping of an expiring interval goes out before it is ended.
                send_ping(self.client.as_ref(), &self.events, &session_id, &interval_id).await;
            } else {
                self.spawn_ping(session_id, interval_id);
            }
        }

        if let Some((session, index, epoch)) = transition_target {
            let _transition = self.transition_gate.lock().await;
            if self.state.lock().await.epoch != epoch {
                tracing::info!(session_id = %session.id, index, "sessions reloaded; interval transition skipped");
                return Ok(self.snapshot().await);
            }
            match advance_interval(self.client.as_ref(), &session, index).await {
                Ok(transition) => self.apply_transition(&session.id, index, transition).await,
                Err(error) => {
                    tracing::error!(session_id = %session.id, index, %error, "interval transition failed");
                    self.notify_error(format!("failed to advance interval: {error}"));
                }
            }
        }

        Ok(self.snapshot().await)
    }

    pub async fn create_timer_setting(&self, setting: TimerSetting) -> Result<TimerSnapshot, InfraError> {
        setting.validate().map_err(InfraError::InvalidState)?;
        if let Err(error) = self.client.create_timer_setting(&self.room_id, &setting).await {
            self.notify_error(format!("failed to create timer setting: {error}"));
            return Err(error);
        }
        tracing::info!(room_id = %self.room_id, "timer setting created");
        self.publish(TimerEvent::Notification {
            level: NotificationLevel::Info,
            message: "Timer setting created".to_string(),
        });
        self.refresh().await
    }

    pub async fn shutdown(&self) -> Result<(), InfraError> {
        self.cancel_scheduler().await?;
        self.state.lock().await.ticker.deactivate();
        Ok(())
    }

    async fn apply_transition(&self, session_id: &str, ended_index: usize, transition: TransitionOutcome) {
        let mut state = self.state.lock().await;
        if state.resolved.session_id.as_deref() != Some(session_id) {
            return;
        }
        state.set_interval_status(ended_index, IntervalStatus::Ended);

        match transition {
            TransitionOutcome::Completed => {
                state.complete();
                drop(state);
                tracing::info!(%session_id, "study session complete");
                self.publish(TimerEvent::SessionCompleted {
                    session_id: session_id.to_string(),
                });
                self.publish(TimerEvent::Notification {
                    level: NotificationLevel::Info,
                    message: "Study session complete".to_string(),
                });
            }
            TransitionOutcome::Advanced {
                index,
                kind,
                countdown,
            } => {
                state.set_interval_status(index, IntervalStatus::Ongoing);
                state.move_to(index, kind, countdown);
                state.ticker.activate(countdown);
                drop(state);
                self.publish(TimerEvent::IntervalAdvanced {
                    index,
                    kind,
                    countdown,
                });
                self.publish(TimerEvent::Notification {
                    level: NotificationLevel::Info,
                    message: format!("{} started", kind_label(kind)),
                });
            }
        }
    }

    fn spawn_ping(&self, session_id: String, interval_id: String) {
        let client = Arc::clone(&self.client);
        let events = self.events.clone();
        tokio::spawn(async move {
            send_ping(client.as_ref(), &events, &session_id, &interval_id).await;
        });
    }

    async fn spawn_scheduler(&self) -> Result<(), InfraError> {
        self.cancel_scheduler().await?;
        let controller = self.clone();
        let period = self.tick_interval;
        let cancel = Arc::new(Notify::new());
        let cancelled = Arc::clone(&cancel);
        let task = tokio::spawn(async move {
            let mut interval = time::interval_at(Instant::now() + period, period);
            interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                // Cancellation lands between ticks, never inside a transition.
                tokio::select! {
                    biased;
                    _ = cancelled.notified() => break,
                    _ = interval.tick() => {}
                }
                match controller.tick().await {
                    Ok(snapshot) if snapshot.active => {}
                    Ok(_) => break,
                    Err(error) => {
                        tracing::error!(%error, "timer tick failed");
                        break;
                    }
                }
            }
        });
        *self.lock_scheduler()? = Some(SchedulerHandle { cancel, task });
        Ok(())
    }

    async fn cancel_scheduler(&self) -> Result<(), InfraError> {
        let handle = self.lock_scheduler()?.take();
        if let Some(handle) = handle {
            handle.cancel.notify_one();
            if let Err(error) = handle.task.await {
                tracing::warn!(%error, "timer scheduler stopped abnormally");
            }
        }
        Ok(())
    }

    fn lock_scheduler(&self) -> Result<MutexGuard<'_, Option<SchedulerHandle>>, InfraError> {
        self.scheduler
            .lock()
            .map_err(|error| InfraError::InvalidState(format!("scheduler lock poisoned: {error}")))
    }

    async fn list_sessions_with_retry(
        &self,
        status: SessionStatus,
    ) -> Result<Vec<StudySession>, InfraError> {
        let max_attempts = self.retry_policy.max_attempts.max(1);
        let mut attempt: u8 = 0;

        loop {
            match self.client.list_sessions(&self.room_id, status.clone()).await {
                Ok(sessions) => return Ok(sessions),
                Err(error) if error.is_transient() && attempt + 1 < max_attempts => {
                    let delay = self
                        .retry_policy
                        .base_delay_ms
                        .saturating_mul(2u64.saturating_pow(attempt as u32));
                    tracing::warn!(status = status.as_str(), attempt, %error, "retrying session query");
                    sleep(Duration::from_millis(delay)).await;
                    attempt = attempt.saturating_add(1);
                }
                Err(error) => return Err(error),
            }
        }
    }

    fn publish(&self, event: TimerEvent) {
        let _ = self.events.send(event);
    }

    fn notify_error(&self, message: String) {
        self.publish(TimerEvent::Notification {
            level: NotificationLevel::Error,
            message,
        });
    }
}

async fn send_ping<C>(
    client: &C,
    events: &broadcast::Sender<TimerEvent>,
    session_id: &str,
    interval_id: &str,
) where
    C: StudySessionClient + ?Sized,
{
    match client.ping_interval(session_id, interval_id).await {
        Ok(()) => {
            tracing::debug!(%session_id, %interval_id, "interval pinged");
            let _ = events.send(TimerEvent::PingSent {
                interval_id: interval_id.to_string(),
            });
        }
        Err(error) => {
            tracing::warn!(%session_id, %interval_id, %error, "interval ping failed");
            let _ = events.send(TimerEvent::Notification {
                level: NotificationLevel::Error,
                message: format!("failed to ping interval: {error}"),
            });
        }
    }
}

fn kind_label(kind: IntervalKind) -> &'static str {
    match kind {
        IntervalKind::Focus => "Focus",
        IntervalKind::ShortBreak => "Short break",
        IntervalKind::LongBreak => "Long break",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::application::transitioner::tests::{
        pomodoro_session, FakeStudySessionClient, RecordedCall,
    };
    use crate::domain::models::TimerType;
    use crate::infrastructure::session_cache::InMemorySessionSnapshotRepository;

    type TestController = StudyTimerController<FakeStudySessionClient, InMemorySessionSnapshotRepository>;

    fn fixed_time() -> DateTime<Utc> {
        DateTime::parse_from_rfc3339("2026-02-16T09:00:00Z")
            .expect("valid datetime")
            .with_timezone(&Utc)
    }

    fn controller(client: FakeStudySessionClient) -> (TestController, Arc<FakeStudySessionClient>, Arc<InMemorySessionSnapshotRepository>) {
        let client = Arc::new(client);
        let repository = Arc::new(InMemorySessionSnapshotRepository::default());
        let controller = StudyTimerController::new(Arc::clone(&client), Arc::clone(&repository), "room-1")
            .with_tick_interval(Duration::from_secs(3_600))
            .with_retry_policy(RetryPolicy {
                max_attempts: 3,
                base_delay_ms: 1,
            })
            .with_now_provider(Arc::new(fixed_time));
        (controller, client, repository)
    }

    async fn settle() {
        for _ in 0..20 {
            tokio::task::yield_now().await;
        }
    }

    async fn tick_times(controller: &TestController, times: usize) -> TimerSnapshot {
        let mut snapshot = controller.snapshot().await;
        for _ in 0..times {
            snapshot = controller.tick().await.expect("tick");
        }
        snapshot
    }

    fn drain(receiver: &mut broadcast::Receiver<TimerEvent>) -> Vec<TimerEvent> {
        let mut events = Vec::new();
        while let Ok(event) = receiver.try_recv() {
            events.push(event);
        }
        events
    }

    fn non_ping_calls(client: &FakeStudySessionClient) -> Vec<RecordedCall> {
        client
            .calls()
            .into_iter()
            .filter(|call| !matches!(call, RecordedCall::Ping(_)))
            .collect()
    }

    fn pings(client: &FakeStudySessionClient) -> usize {
        client.count(|call| matches!(call, RecordedCall::Ping(_)))
    }

    #[tokio::test]
    async fn refresh_resolves_ongoing_session_and_stores_snapshot() {
        let mut ongoing = pomodoro_session(SessionStatus::Ongoing, Some(0));
        ongoing.intervals[0].started_at = Some(fixed_time());
        ongoing.intervals[0].pinged_at = Some(fixed_time() + chrono::Duration::seconds(61));
        let pending = pomodoro_session(SessionStatus::Pending, None);
        let (controller, _client, repository) =
            controller(FakeStudySessionClient::with_sessions(vec![ongoing], vec![pending]));

        let snapshot = controller.refresh().await.expect("refresh");
        assert_eq!(snapshot.phase, SessionPhase::Ongoing);
        assert_eq!(snapshot.display, "23:59");
        assert_eq!(snapshot.interval_id.as_deref(), Some("interval-0"));
        assert!(!snapshot.active);

        let stored = repository.load().expect("load").expect("snapshot stored");
        assert_eq!(stored.ongoing.len(), 1);
        assert_eq!(stored.pending.len(), 1);
        assert_eq!(stored.fetched_at, fixed_time());
    }

    #[tokio::test]
    async fn refresh_without_sessions_shows_zero() {
        let (controller, _client, _repository) = controller(FakeStudySessionClient::default());
        let snapshot = controller.refresh().await.expect("refresh");
        assert_eq!(snapshot.phase, SessionPhase::None);
        assert_eq!(snapshot.display, "00:00");
        assert!(matches!(
            controller.start().await,
            Err(InfraError::InvalidState(_))
        ));
    }

    #[tokio::test]
    async fn refresh_retries_transient_query_failures() {
        let client = FakeStudySessionClient::with_sessions(
            Vec::new(),
            vec![pomodoro_session(SessionStatus::Pending, None)],
        );
        client
            .list_failures
            .lock()
            .expect("failure lock")
            .push_back(InfraError::Network("network error while listing sessions".to_string()));
        let (controller, client, _repository) = controller(client);

        let snapshot = controller.refresh().await.expect("refresh");
        assert_eq!(snapshot.phase, SessionPhase::Pending);
        assert_eq!(
            client.calls(),
            vec![
                RecordedCall::List("ONGOING".to_string()),
                RecordedCall::List("ONGOING".to_string()),
                RecordedCall::List("PENDING".to_string()),
            ]
        );
    }

    #[tokio::test]
    async fn refresh_does_not_retry_client_errors() {
        let client = FakeStudySessionClient::default();
        client
            .list_failures
            .lock()
            .expect("failure lock")
            .push_back(InfraError::Api {
                status: 403,
                body: "forbidden".to_string(),
            });
        let (controller, client, _repository) = controller(client);

        assert!(matches!(
            controller.refresh().await,
            Err(InfraError::Api { status: 403, .. })
        ));
        assert_eq!(client.calls().len(), 1);
    }

    #[tokio::test]
    async fn starting_pending_session_starts_first_interval_once() {
        let (controller, client, _repository) = controller(FakeStudySessionClient::with_sessions(
            Vec::new(),
            vec![pomodoro_session(SessionStatus::Pending, None)],
        ));
        controller.refresh().await.expect("refresh");

        let snapshot = controller.start().await.expect("start");
        assert!(snapshot.active);
        assert_eq!(snapshot.phase, SessionPhase::Ongoing);
        assert_eq!(snapshot.display, "25:00");
        controller.start().await.expect("start again");

        assert_eq!(
            client.count(|call| matches!(call, RecordedCall::Start(_))),
            1
        );
        controller.shutdown().await.expect("shutdown");
    }

    #[tokio::test]
    async fn resuming_ongoing_interval_does_not_call_start() {
        let (controller, client, _repository) = controller(FakeStudySessionClient::with_sessions(
            vec![pomodoro_session(SessionStatus::Ongoing, Some(1))],
            Vec::new(),
        ));
        controller.refresh().await.expect("refresh");

        let snapshot = controller.start().await.expect("start");
        assert!(snapshot.active);
        assert_eq!(snapshot.interval_index, 1);
        assert_eq!(snapshot.kind, IntervalKind::ShortBreak);
        assert_eq!(
            client.count(|call| matches!(call, RecordedCall::Start(_))),
            0
        );
        controller.shutdown().await.expect("shutdown");
    }

    #[tokio::test]
    async fn full_session_runs_focus_short_break_long_break_then_completes() {
        let (controller, client, _repository) = controller(FakeStudySessionClient::with_sessions(
            vec![pomodoro_session(SessionStatus::Ongoing, Some(0))],
            Vec::new(),
        ));
        controller.refresh().await.expect("refresh");
        controller.start().await.expect("start");

        let snapshot = tick_times(&controller, 25 * 60).await;
        settle().await;
        assert_eq!(snapshot.interval_index, 1);
        assert_eq!(snapshot.kind, IntervalKind::ShortBreak);
        assert_eq!(snapshot.display, "05:00");
        assert!(snapshot.active);
        assert_eq!(
            non_ping_calls(&client)[2..],
            [
                RecordedCall::End("interval-0".to_string()),
                RecordedCall::Start("interval-1".to_string()),
            ]
        );
        assert_eq!(pings(&client), 25 * 60 / 30);

        let snapshot = tick_times(&controller, 5 * 60).await;
        assert_eq!(snapshot.kind, IntervalKind::LongBreak);
        assert_eq!(snapshot.display, "15:00");

        let snapshot = tick_times(&controller, 15 * 60 - 1).await;
        assert_eq!(snapshot.display, "00:01");
        let mut receiver = controller.subscribe();
        let snapshot = controller.tick().await.expect("final tick");
        assert_eq!(snapshot.phase, SessionPhase::Complete);
        assert!(!snapshot.active);
        assert_eq!(snapshot.display, "00:00");

        let events = drain(&mut receiver);
        assert!(events.contains(&TimerEvent::SessionCompleted {
            session_id: "session-1".to_string()
        }));
        assert_eq!(
            client.count(|call| matches!(call, RecordedCall::End(_))),
            3
        );
        assert!(!client.calls().contains(&RecordedCall::Start("interval-3".to_string())));
        assert_eq!(
            client.count(|call| matches!(call, RecordedCall::Start(_))),
            2
        );

        let snapshot = controller.tick().await.expect("tick after completion");
        assert_eq!(snapshot.phase, SessionPhase::Complete);
        assert_eq!(
            client.count(|call| matches!(call, RecordedCall::End(_))),
            3
        );
        controller.shutdown().await.expect("shutdown");
    }

    #[tokio::test]
    async fn failed_end_call_leaves_ticker_stopped_and_notifies() {
        let client = FakeStudySessionClient::with_sessions(
            vec![pomodoro_session(SessionStatus::Ongoing, Some(0))],
            Vec::new(),
        );
        *client.fail_end.lock().expect("flag lock") = true;
        let (controller, client, _repository) = controller(client);
        controller.refresh().await.expect("refresh");
        controller.start().await.expect("start");

        tick_times(&controller, 25 * 60 - 1).await;
        let mut receiver = controller.subscribe();
        let snapshot = controller.tick().await.expect("expiring tick");

        assert!(!snapshot.active);
        assert_eq!(snapshot.interval_index, 0);
        assert_eq!(snapshot.display, "00:00");
        assert_eq!(
            client.count(|call| matches!(call, RecordedCall::Start(_))),
            0
        );
        let events = drain(&mut receiver);
        assert!(events.iter().any(|event| matches!(
            event,
            TimerEvent::Notification {
                level: NotificationLevel::Error,
                ..
            }
        )));

        tick_times(&controller, 5).await;
        assert_eq!(
            client.count(|call| matches!(call, RecordedCall::End(_))),
            1
        );
        controller.shutdown().await.expect("shutdown");
    }

    #[tokio::test]
    async fn failed_ping_notifies_without_stopping_the_countdown() {
        let client = FakeStudySessionClient::with_sessions(
            vec![pomodoro_session(SessionStatus::Ongoing, Some(0))],
            Vec::new(),
        );
        *client.fail_ping.lock().expect("flag lock") = true;
        let (controller, client, _repository) = controller(client);
        controller.refresh().await.expect("refresh");
        controller.start().await.expect("start");
        let mut receiver = controller.subscribe();

        let snapshot = tick_times(&controller, 30).await;
        settle().await;
        assert!(snapshot.active);
        assert_eq!(snapshot.display, "24:30");
        assert_eq!(pings(&client), 1);
        let events = drain(&mut receiver);
        assert!(events.iter().any(|event| matches!(
            event,
            TimerEvent::Notification {
                level: NotificationLevel::Error,
                message,
            } if message.contains("ping")
        )));
        controller.shutdown().await.expect("shutdown");
    }

    #[tokio::test]
    async fn pause_keeps_countdown_without_network_calls() {
        let (controller, client, _repository) = controller(FakeStudySessionClient::with_sessions(
            vec![pomodoro_session(SessionStatus::Ongoing, Some(0))],
            Vec::new(),
        ));
        controller.refresh().await.expect("refresh");
        controller.start().await.expect("start");
        tick_times(&controller, 10).await;
        let calls_before = client.calls().len();

        let snapshot = controller.pause().await.expect("pause");
        assert!(!snapshot.active);
        assert_eq!(snapshot.display, "24:50");
        let snapshot = tick_times(&controller, 3).await;
        assert_eq!(snapshot.display, "24:50");
        assert_eq!(client.calls().len(), calls_before);

        let snapshot = controller.start().await.expect("resume");
        assert!(snapshot.active);
        assert_eq!(client.calls().len(), calls_before);
        controller.shutdown().await.expect("shutdown");
    }

    #[tokio::test]
    async fn stop_ends_interval_and_moves_to_next_without_starting_it() {
        let (controller, client, _repository) = controller(FakeStudySessionClient::with_sessions(
            vec![pomodoro_session(SessionStatus::Ongoing, Some(0))],
            Vec::new(),
        ));
        controller.refresh().await.expect("refresh");
        controller.start().await.expect("start");

        let snapshot = controller.stop().await.expect("stop");
        assert!(!snapshot.active);
        assert_eq!(snapshot.interval_index, 1);
        assert_eq!(snapshot.display, "05:00");
        assert_eq!(
            client.calls().last(),
            Some(&RecordedCall::End("interval-0".to_string()))
        );

        controller.start().await.expect("start break");
        assert_eq!(
            client.calls().last(),
            Some(&RecordedCall::Start("interval-1".to_string()))
        );
        controller.shutdown().await.expect("shutdown");
    }

    #[tokio::test]
    async fn stopping_last_interval_completes_session() {
        let (controller, _client, _repository) = controller(FakeStudySessionClient::with_sessions(
            vec![pomodoro_session(SessionStatus::Ongoing, Some(2))],
            Vec::new(),
        ));
        controller.refresh().await.expect("refresh");

        let snapshot = controller.stop().await.expect("stop");
        assert_eq!(snapshot.phase, SessionPhase::Complete);
        assert!(matches!(
            controller.start().await,
            Err(InfraError::InvalidState(_))
        ));
    }

    #[tokio::test]
    async fn stop_before_start_is_rejected() {
        let (controller, client, _repository) = controller(FakeStudySessionClient::with_sessions(
            Vec::new(),
            vec![pomodoro_session(SessionStatus::Pending, None)],
        ));
        controller.refresh().await.expect("refresh");

        assert!(matches!(
            controller.stop().await,
            Err(InfraError::InvalidState(_))
        ));
        assert_eq!(
            client.count(|call| matches!(call, RecordedCall::End(_))),
            0
        );
    }

    #[tokio::test]
    async fn stopwatch_counts_up_and_pings() {
        let mut stopwatch = pomodoro_session(SessionStatus::Ongoing, Some(0));
        stopwatch.timer_type = TimerType::StopWatch;
        stopwatch.intervals.truncate(1);
        let (controller, client, _repository) =
            controller(FakeStudySessionClient::with_sessions(vec![stopwatch], Vec::new()));
        controller.refresh().await.expect("refresh");
        controller.start().await.expect("start");

        let snapshot = tick_times(&controller, 61).await;
        settle().await;
        assert_eq!(snapshot.mode, TickMode::Stopwatch);
        assert_eq!(snapshot.display, "01:01");
        assert_eq!(pings(&client), 2);
        controller.shutdown().await.expect("shutdown");
    }

    #[tokio::test]
    async fn create_timer_setting_validates_then_refreshes() {
        let (controller, client, _repository) = controller(FakeStudySessionClient::default());

        let invalid = TimerSetting::FocusTimer {
            focus_time: 0,
            short_break: 5,
            long_break: 15,
            cycles: 4,
        };
        assert!(controller.create_timer_setting(invalid).await.is_err());
        assert!(client.calls().is_empty());

        let setting = TimerSetting::FocusTimer {
            focus_time: 25,
            short_break: 5,
            long_break: 15,
            cycles: 4,
        };
        controller
            .create_timer_setting(setting.clone())
            .await
            .expect("create setting");
        assert_eq!(
            client.calls(),
            vec![
                RecordedCall::CreateSetting(setting),
                RecordedCall::List("ONGOING".to_string()),
                RecordedCall::List("PENDING".to_string()),
            ]
        );
    }

    #[tokio::test]
    async fn configured_ping_interval_applies_once_started() {
        let (controller, client, _repository) = controller(FakeStudySessionClient::with_sessions(
            vec![pomodoro_session(SessionStatus::Ongoing, Some(0))],
            Vec::new(),
        ));
        let controller = controller.with_ping_every(10);
        controller.refresh().await.expect("refresh");
        controller.start().await.expect("start");

        tick_times(&controller, 30).await;
        settle().await;
        assert_eq!(pings(&client), 3);
        controller.shutdown().await.expect("shutdown");
    }

    #[tokio::test]
    async fn refresh_logs_against_previous_snapshot_and_keeps_latest() {
        let (controller, client, repository) = controller(FakeStudySessionClient::with_sessions(
            Vec::new(),
            vec![pomodoro_session(SessionStatus::Pending, None)],
        ));
        controller.refresh().await.expect("first refresh");
        client.pending.lock().expect("pending lock").clear();

        let snapshot = controller.refresh().await.expect("second refresh");
        assert_eq!(snapshot.phase, SessionPhase::None);
        let stored = repository.load().expect("load").expect("snapshot stored");
        assert!(stored.pending.is_empty());
    }

    fn slow_end_controller() -> (TestController, Arc<FakeStudySessionClient>) {
        let mut session = pomodoro_session(SessionStatus::Pending, None);
        session.focus_time = 1;
        let client = FakeStudySessionClient::with_sessions(Vec::new(), vec![session]);
        *client.end_delay.lock().expect("delay lock") = Some(Duration::from_secs(2));
        let client = Arc::new(client);
        let controller = StudyTimerController::new(
            Arc::clone(&client),
            Arc::new(InMemorySessionSnapshotRepository::default()),
            "room-1",
        );
        (controller, client)
    }

    fn ends(client: &FakeStudySessionClient) -> usize {
        client.count(|call| matches!(call, RecordedCall::End(_)))
    }

    #[tokio::test(start_paused = true)]
    async fn pause_during_pending_end_lets_transition_land() {
        let (controller, client) = slow_end_controller();
        controller.refresh().await.expect("refresh");
        controller.start().await.expect("start");

        time::sleep(Duration::from_millis(60_500)).await;
        let waiting = controller.snapshot().await;
        assert!(!waiting.active);
        assert_eq!(waiting.interval_index, 0);
        assert_eq!(waiting.display, "00:00");

        let snapshot = controller.pause().await.expect("pause");
        assert!(!snapshot.active);
        assert_eq!(snapshot.interval_index, 1);
        assert_eq!(snapshot.display, "05:00");

        controller.start().await.expect("resume");
        time::sleep(Duration::from_millis(5_500)).await;
        assert_eq!(controller.snapshot().await.display, "04:55");
        assert_eq!(ends(&client), 1);
        assert_eq!(
            non_ping_calls(&client)[2..],
            [
                RecordedCall::Start("interval-0".to_string()),
                RecordedCall::End("interval-0".to_string()),
                RecordedCall::Start("interval-1".to_string()),
            ]
        );
        controller.shutdown().await.expect("shutdown");
    }

    #[tokio::test(start_paused = true)]
    async fn shutdown_during_pending_end_finishes_transition_then_stops() {
        let (controller, client) = slow_end_controller();
        controller.refresh().await.expect("refresh");
        controller.start().await.expect("start");

        time::sleep(Duration::from_millis(60_500)).await;
        controller.shutdown().await.expect("shutdown");

        let snapshot = controller.snapshot().await;
        assert!(!snapshot.active);
        assert_eq!(snapshot.interval_index, 1);
        let calls = client.calls();
        assert_eq!(calls.last(), Some(&RecordedCall::Start("interval-1".to_string())));

        time::sleep(Duration::from_secs(10)).await;
        assert_eq!(client.calls(), calls);
        assert_eq!(ends(&client), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn refresh_during_pending_end_queries_after_transition() {
        let (controller, client) = slow_end_controller();
        controller.refresh().await.expect("refresh");
        controller.start().await.expect("start");

        time::sleep(Duration::from_millis(60_500)).await;
        let snapshot = controller.refresh().await.expect("refresh while ending");
        assert!(snapshot.active);
        assert_eq!(snapshot.interval_index, 1);
        assert_eq!(
            non_ping_calls(&client)[2..],
            [
                RecordedCall::Start("interval-0".to_string()),
                RecordedCall::End("interval-0".to_string()),
                RecordedCall::Start("interval-1".to_string()),
                RecordedCall::List("ONGOING".to_string()),
                RecordedCall::List("PENDING".to_string()),
            ]
        );
        assert_eq!(ends(&client), 1);
        controller.shutdown().await.expect("shutdown");
    }

    #[tokio::test(start_paused = true)]
    async fn scheduler_drives_ticks_and_transitions() {
        let mut session = pomodoro_session(SessionStatus::Pending, None);
        session.focus_time = 1;
        let client = Arc::new(FakeStudySessionClient::with_sessions(Vec::new(), vec![session]));
        let controller = StudyTimerController::new(
            Arc::clone(&client),
            Arc::new(InMemorySessionSnapshotRepository::default()),
            "room-1",
        );
        controller.refresh().await.expect("refresh");
        controller.start().await.expect("start");

        time::sleep(Duration::from_millis(65_500)).await;

        let snapshot = controller.snapshot().await;
        assert_eq!(snapshot.interval_index, 1);
        assert_eq!(snapshot.kind, IntervalKind::ShortBreak);
        assert_eq!(snapshot.display, "04:55");
        assert!(snapshot.active);
        assert_eq!(
            client.calls()[2..],
            [
                RecordedCall::Start("interval-0".to_string()),
                RecordedCall::Ping("interval-0".to_string()),
                RecordedCall::Ping("interval-0".to_string()),
                RecordedCall::End("interval-0".to_string()),
                RecordedCall::Start("interval-1".to_string()),
            ]
        );

        controller.shutdown().await.expect("shutdown");
        time::sleep(Duration::from_secs(10)).await;
        assert_eq!(controller.snapshot().await.display, "04:55");
    }
}
