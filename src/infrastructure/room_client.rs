use crate::domain::models::{SessionStatus, StudySession, TimerSetting};
use crate::infrastructure::error::InfraError;
use async_trait::async_trait;
use reqwest::{Client, RequestBuilder};
use std::time::Duration;
use url::Url;

const REQUEST_TIMEOUT_SECS: u64 = 15;

#[async_trait]
pub trait StudySessionClient: Send + Sync {
    async fn list_sessions(
        &self,
        room_id: &str,
        status: SessionStatus,
    ) -> Result<Vec<StudySession>, InfraError>;

    async fn start_interval(&self, session_id: &str, interval_id: &str) -> Result<(), InfraError>;

    async fn end_interval(&self, session_id: &str, interval_id: &str) -> Result<(), InfraError>;

    async fn ping_interval(&self, session_id: &str, interval_id: &str) -> Result<(), InfraError>;

    async fn create_timer_setting(
        &self,
        room_id: &str,
        setting: &TimerSetting,
    ) -> Result<(), InfraError>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum IntervalAction {
    Start,
    End,
    Ping,
}

impl IntervalAction {
    fn segment(self) -> &'static str {
        match self {
            Self::Start => "start",
            Self::End => "end",
            Self::Ping => "ping",
        }
    }

    fn operation(self) -> &'static str {
        match self {
            Self::Start => "starting interval",
            Self::End => "ending interval",
            Self::Ping => "pinging interval",
        }
    }
}

#[derive(Debug, Clone)]
pub struct ReqwestStudySessionClient {
    client: Client,
    base_url: Url,
    api_token: Option<String>,
}

impl ReqwestStudySessionClient {
    pub fn new(base_url: &str, api_token: Option<String>) -> Result<Self, InfraError> {
        let base_url = Url::parse(base_url.trim()).map_err(|error| {
            InfraError::InvalidConfig(format!("invalid study room api base url: {error}"))
        })?;
        if base_url.cannot_be_a_base() {
            return Err(InfraError::InvalidConfig(
                "study room api base url cannot be a base".to_string(),
            ));
        }
        let client = Client::builder()
            .timeout(Duration::from_secs(REQUEST_TIMEOUT_SECS))
            .build()
            .map_err(|error| InfraError::Network(format!("failed building http client: {error}")))?;

        Ok(Self {
            client,
            base_url,
            api_token: api_token
                .map(|token| token.trim().to_string())
                .filter(|token| !token.is_empty()),
        })
    }

    fn ensure_non_empty(value: &str, field: &str) -> Result<(), InfraError> {
        if value.trim().is_empty() {
            return Err(InfraError::InvalidState(format!("{field} must not be empty")));
        }
        Ok(())
    }

    fn endpoint(&self, segments: &[&str]) -> Result<Url, InfraError> {
        let mut url = self.base_url.clone();
        {
            let mut path = url.path_segments_mut().map_err(|_| {
                InfraError::InvalidConfig("study room api base url cannot be a base".to_string())
            })?;
            path.pop_if_empty();
            for segment in segments {
                path.push(segment.trim());
            }
        }
        Ok(url)
    }

    fn sessions_endpoint(&self, room_id: &str, status: &SessionStatus) -> Result<Url, InfraError> {
        let mut url = self.endpoint(&["rooms", room_id, "sessions"])?;
        url.query_pairs_mut().append_pair("status", status.as_str());
        Ok(url)
    }

    fn interval_endpoint(
        &self,
        session_id: &str,
        interval_id: &str,
        action: IntervalAction,
    ) -> Result<Url, InfraError> {
        self.endpoint(&[
            "sessions",
            session_id,
            "intervals",
            interval_id,
            action.segment(),
        ])
    }

    async fn execute(&self, request: RequestBuilder, operation: &str) -> Result<String, InfraError> {
        let request = match &self.api_token {
            Some(token) => request.bearer_auth(token),
            None => request,
        };
        let response = request
            .send()
            .await
            .map_err(|error| InfraError::Network(format!("network error while {operation}: {error}")))?;

        let status = response.status();
        let body = response.text().await.map_err(|error| {
            InfraError::Network(format!("failed reading response while {operation}: {error}"))
        })?;

        if !status.is_success() {
            return Err(InfraError::Api {
                status: status.as_u16(),
                body,
            });
        }
        Ok(body)
    }

    async fn post_interval_action(
        &self,
        session_id: &str,
        interval_id: &str,
        action: IntervalAction,
    ) -> Result<(), InfraError> {
        Self::ensure_non_empty(session_id, "session id")?;
        Self::ensure_non_empty(interval_id, "interval id")?;

        let url = self.interval_endpoint(session_id, interval_id, action)?;
        self.execute(self.client.post(url), action.operation()).await?;
        Ok(())
    }
}

#[derive(Debug, serde::Deserialize)]
#[serde(untagged)]
enum SessionListPayload {
    Bare(Vec<StudySession>),
    Wrapped {
        #[serde(alias = "content", alias = "sessions")]
        data: Vec<StudySession>,
    },
}

impl SessionListPayload {
    fn into_sessions(self) -> Vec<StudySession> {
        match self {
            Self::Bare(sessions) => sessions,
            Self::Wrapped { data } => data,
        }
    }
}

fn parse_session_list(body: &str) -> Result<Vec<StudySession>, InfraError> {
    if body.trim().is_empty() {
        return Ok(Vec::new());
    }
    let payload: SessionListPayload = serde_json::from_str(body).map_err(|error| {
        InfraError::InvalidState(format!("invalid session list payload: {error}; body={body}"))
    })?;
    Ok(payload.into_sessions())
}

#[async_trait]
impl StudySessionClient for ReqwestStudySessionClient {
    async fn list_sessions(
        &self,
        room_id: &str,
        status: SessionStatus,
    ) -> Result<Vec<StudySession>, InfraError> {
        Self::ensure_non_empty(room_id, "room id")?;

        let url = self.sessions_endpoint(room_id, &status)?;
        let body = self.execute(self.client.get(url), "listing sessions").await?;
        parse_session_list(&body)
    }

    async fn start_interval(&self, session_id: &str, interval_id: &str) -> Result<(), InfraError> {
        self.post_interval_action(session_id, interval_id, IntervalAction::Start)
            .await
    }

    async fn end_interval(&self, session_id: &str, interval_id: &str) -> Result<(), InfraError> {
        self.post_interval_action(session_id, interval_id, IntervalAction::End)
            .await
    }

    async fn ping_interval(&self, session_id: &str, interval_id: &str) -> Result<(), InfraError> {
        self.post_interval_action(session_id, interval_id, IntervalAction::Ping)
            .await
    }

    async fn create_timer_setting(
        &self,
        room_id: &str,
        setting: &TimerSetting,
    ) -> Result<(), InfraError> {
        Self::ensure_non_empty(room_id, "room id")?;
        setting.validate().map_err(InfraError::InvalidState)?;

        let url = self.endpoint(&["rooms", room_id, "timer-settings"])?;
        self.execute(self.client.post(url).json(setting), "creating timer setting")
            .await?;
        Ok(())
    }
}
