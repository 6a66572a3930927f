use crate::application::bootstrap::bootstrap_workspace;
use crate::application::controller::{
    NotificationLevel, RetryPolicy, StudyTimerController, TimerEvent, TimerSnapshot,
};
use crate::domain::models::TimerSetting;
use crate::infrastructure::config::{
    read_client_settings, read_timer_settings, save_client_settings, ClientSettings,
};
use crate::infrastructure::credential_store::{CredentialStore, KeyringCredentialStore};
use crate::infrastructure::error::InfraError;
use crate::infrastructure::room_client::{ReqwestStudySessionClient, StudySessionClient};
use crate::infrastructure::session_cache::{
    InMemorySessionSnapshotRepository, SessionSnapshotRepository,
};
use serde::Serialize;
use std::future::Future;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast::error::RecvError;

pub type RoomController =
    StudyTimerController<ReqwestStudySessionClient, InMemorySessionSnapshotRepository>;

pub struct AppState {
    workspace_root: PathBuf,
    config_dir: PathBuf,
    credential_store: Box<dyn CredentialStore>,
}

impl AppState {
    pub fn new(workspace_root: PathBuf) -> Result<Self, InfraError> {
        Self::with_credential_store(workspace_root, Box::new(KeyringCredentialStore::default()))
    }

    pub fn with_credential_store(
        workspace_root: PathBuf,
        credential_store: Box<dyn CredentialStore>,
    ) -> Result<Self, InfraError> {
        let bootstrap = bootstrap_workspace(&workspace_root)?;
        Ok(Self {
            workspace_root: bootstrap.workspace_root,
            config_dir: bootstrap.config_dir,
            credential_store,
        })
    }

    pub fn workspace_root(&self) -> &Path {
        &self.workspace_root
    }

    pub fn config_dir(&self) -> &Path {
        &self.config_dir
    }

    pub fn command_error(&self, command: &str, error: &InfraError) -> String {
        tracing::error!(command, %error, "command failed");
        error.to_string()
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct InitResponse {
    pub workspace_root: String,
    pub api_base_url: String,
    pub room_id: Option<String>,
    pub has_token: bool,
}

pub fn init_impl(
    state: &AppState,
    api_base_url: Option<String>,
    room_id: Option<String>,
) -> Result<InitResponse, InfraError> {
    save_client_settings(
        state.config_dir(),
        api_base_url.as_deref(),
        room_id.as_deref(),
    )?;
    let settings = read_client_settings(state.config_dir())?;
    let has_token = resolve_api_token(&settings, state.credential_store.as_ref())?.is_some();
    tracing::info!(api_base_url = %settings.api_base_url, room_id = ?settings.room_id, "workspace initialized");

    Ok(InitResponse {
        workspace_root: state.workspace_root().display().to_string(),
        api_base_url: settings.api_base_url,
        room_id: settings.room_id,
        has_token,
    })
}

pub fn login_impl(state: &AppState, token: String) -> Result<(), InfraError> {
    state.credential_store.save_token(&token)?;
    tracing::info!("api token stored");
    Ok(())
}

pub fn logout_impl(state: &AppState) -> Result<(), InfraError> {
    state.credential_store.delete_token()?;
    tracing::info!("api token removed");
    Ok(())
}

fn resolve_api_token(
    settings: &ClientSettings,
    credential_store: &dyn CredentialStore,
) -> Result<Option<String>, InfraError> {
    if let Some(token) = &settings.api_token {
        return Ok(Some(token.clone()));
    }
    credential_store.load_token()
}

fn resolve_room_id(settings: &ClientSettings, room_override: Option<String>) -> Result<String, InfraError> {
    room_override
        .map(|room_id| room_id.trim().to_string())
        .filter(|room_id| !room_id.is_empty())
        .or_else(|| settings.room_id.clone())
        .ok_or_else(|| {
            InfraError::InvalidConfig(
                "room id is not configured; pass --room or run init --room <id>".to_string(),
            )
        })
}

pub fn build_controller(
    state: &AppState,
    room_override: Option<String>,
) -> Result<RoomController, InfraError> {
    let settings = read_client_settings(state.config_dir())?;
    let timer = read_timer_settings(state.config_dir())?;
    let room_id = resolve_room_id(&settings, room_override)?;
    let token = resolve_api_token(&settings, state.credential_store.as_ref())?;
    if token.is_none() {
        tracing::warn!("no api token configured; requests are sent unauthenticated");
    }

    let client = ReqwestStudySessionClient::new(&settings.api_base_url, token)?;
    Ok(StudyTimerController::new(
        Arc::new(client),
        Arc::new(InMemorySessionSnapshotRepository::default()),
        room_id,
    )
    .with_ping_every(timer.ping_every_ticks)
    .with_tick_interval(Duration::from_millis(timer.tick_millis))
    .with_retry_policy(RetryPolicy {
        max_attempts: timer.query_max_attempts,
        base_delay_ms: timer.query_base_delay_ms,
    }))
}

pub async fn status_impl<C, R>(controller: &StudyTimerController<C, R>) -> Result<TimerSnapshot, InfraError>
where
    C: StudySessionClient + 'static,
    R: SessionSnapshotRepository + 'static,
{
    controller.refresh().await
}

pub async fn stop_impl<C, R>(controller: &StudyTimerController<C, R>) -> Result<TimerSnapshot, InfraError>
where
    C: StudySessionClient + 'static,
    R: SessionSnapshotRepository + 'static,
{
    controller.refresh().await?;
    controller.stop().await
}

pub async fn create_timer_impl<C, R>(
    controller: &StudyTimerController<C, R>,
    focus_time: u32,
    short_break: u32,
    long_break: u32,
    cycles: u32,
) -> Result<TimerSnapshot, InfraError>
where
    C: StudySessionClient + 'static,
    R: SessionSnapshotRepository + 'static,
{
    controller
        .create_timer_setting(TimerSetting::FocusTimer {
            focus_time,
            short_break,
            long_break,
            cycles,
        })
        .await
}

pub async fn create_stopwatch_impl<C, R>(
    controller: &StudyTimerController<C, R>,
) -> Result<TimerSnapshot, InfraError>
where
    C: StudySessionClient + 'static,
    R: SessionSnapshotRepository + 'static,
{
    controller.create_timer_setting(TimerSetting::StopWatch).await
}

// Runs until the session completes or `shutdown` resolves; the timer is paused on shutdown.
pub async fn watch_impl<C, R, S, F>(
    controller: &StudyTimerController<C, R>,
    shutdown: S,
    mut on_event: F,
) -> Result<TimerSnapshot, InfraError>
where
    C: StudySessionClient + 'static,
    R: SessionSnapshotRepository + 'static,
    S: Future<Output = ()>,
    F: FnMut(&TimerEvent),
{
    let mut events = controller.subscribe();
    controller.refresh().await?;
    controller.start().await?;
    tokio::pin!(shutdown);

    loop {
        tokio::select! {
            _ = &mut shutdown => {
                tracing::info!("watch interrupted; pausing timer");
                return controller.pause().await;
            }
            received = events.recv() => match received {
                Ok(event) => {
                    on_event(&event);
                    if matches!(event, TimerEvent::SessionCompleted { .. }) {
                        break;
                    }
                    let failed = matches!(
                        event,
                        TimerEvent::Notification { level: NotificationLevel::Error, .. }
                    );
                    if failed && !controller.snapshot().await.active {
                        tracing::warn!("timer stopped before the session completed");
                        break;
                    }
                }
                Err(RecvError::Lagged(skipped)) => {
                    tracing::debug!(skipped, "timer events lagged");
                }
                Err(RecvError::Closed) => break,
            },
        }
    }

    controller.shutdown().await?;
    Ok(controller.snapshot().await)
}
