use std::time::Duration;

use async_trait::async_trait;
use reqwest::header::{HeaderMap, HeaderValue, AUTHORIZATION};
use reqwest::{Client, Response, StatusCode};
use serde::de::DeserializeOwned;
use tracing::{debug, warn};

use tether_wire::{
    ActiveTasksResponse, CancelAck, ErrorBody, InteractionProbe, InteractionReply,
    PendingInteraction, RecentTasksResponse, RespondAck, StartRequest, TaskErrorKind, TaskStarted,
    TaskStatusResponse, TaskSummary,
};

use crate::config::ClientConfig;
use crate::error::{ClientError, Result};

/// Cancel is fire-and-forget; it gets a short deadline of its own instead of
/// the configured request timeout.
const CANCEL_TIMEOUT: Duration = Duration::from_secs(5);

/// Dial deadline separate from the request timeout, so an unreachable host
/// fails fast instead of hanging for the full request window.
const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

/// REST surface of the workflow server. Split out as a trait so session and
/// recovery logic can run against a stub in tests.
#[async_trait]
pub trait TaskApi: Send + Sync {
    async fn start(&self, request: &StartRequest) -> Result<TaskStarted>;
    async fn fetch_status(&self, task_id: &str) -> Result<TaskStatusResponse>;
    async fn respond(&self, task_id: &str, reply: &InteractionReply) -> Result<RespondAck>;
    /// Best-effort: returns whether the server accepted the cancel, never an
    /// error. The local state machine does not depend on the answer.
    async fn cancel(&self, task_id: &str) -> Result<bool>;
    async fn pending_interaction(&self, task_id: &str) -> Result<Option<PendingInteraction>>;
    async fn active_tasks(&self) -> Result<Vec<TaskSummary>>;
    async fn recent_tasks(&self, limit: u32) -> Result<Vec<TaskStatusResponse>>;
}

pub struct ApiClient {
    base: String,
    client: Client,
}

impl ApiClient {
    pub fn new(config: &ClientConfig) -> Result<Self> {
        let mut headers = HeaderMap::new();
        let token = config.api_token.trim();
        if !token.is_empty() {
            if let Ok(value) = HeaderValue::from_str(&format!("Bearer {token}")) {
                headers.insert(AUTHORIZATION, value);
            }
        }
        let client = Client::builder()
            .default_headers(headers)
            .connect_timeout(CONNECT_TIMEOUT)
            .timeout(config.request_timeout)
            .build()?;
        Ok(Self {
            base: config.api_base(),
            client,
        })
    }
}

#[async_trait]
impl TaskApi for ApiClient {
    async fn start(&self, request: &StartRequest) -> Result<TaskStarted> {
        let url = format!("{}/{}", self.base, request.kind().as_str());
        debug!(%url, "starting workflow");
        let response = self.client.post(&url).json(request).send().await?;
        decode(response).await
    }

    async fn fetch_status(&self, task_id: &str) -> Result<TaskStatusResponse> {
        let url = format!("{}/status/{task_id}", self.base);
        let response = self.client.get(&url).send().await?;
        decode(response).await
    }

    async fn respond(&self, task_id: &str, reply: &InteractionReply) -> Result<RespondAck> {
        let url = format!("{}/respond/{task_id}", self.base);
        let response = self.client.post(&url).json(reply).send().await?;
        decode(response).await
    }

    async fn cancel(&self, task_id: &str) -> Result<bool> {
        let url = format!("{}/cancel/{task_id}", self.base);
        match self.client.post(&url).timeout(CANCEL_TIMEOUT).send().await {
            Ok(response) if response.status().is_success() => {
                if let Ok(ack) = response.json::<CancelAck>().await {
                    debug!(task_id = %ack.task_id, "cancel acknowledged");
                }
                Ok(true)
            }
            Ok(response) => {
                let detail = read_detail(response).await;
                warn!(%detail, "cancel request rejected");
                Ok(false)
            }
            Err(err) => {
                warn!(%err, "cancel request did not reach the server");
                Ok(false)
            }
        }
    }

    async fn pending_interaction(&self, task_id: &str) -> Result<Option<PendingInteraction>> {
        let url = format!("{}/interaction/{task_id}", self.base);
        let response = self.client.get(&url).send().await?;
        let probe: InteractionProbe = decode(response).await?;
        Ok(probe.interaction.filter(|_| probe.has_interaction))
    }

    async fn active_tasks(&self) -> Result<Vec<TaskSummary>> {
        let url = format!("{}/active", self.base);
        let response = self.client.get(&url).send().await?;
        let body: ActiveTasksResponse = decode(response).await?;
        Ok(body.tasks)
    }

    async fn recent_tasks(&self, limit: u32) -> Result<Vec<TaskStatusResponse>> {
        let url = format!("{}/recent", self.base);
        let response = self
            .client
            .get(&url)
            .query(&[("limit", limit)])
            .send()
            .await?;
        let body: RecentTasksResponse = decode(response).await?;
        Ok(body.tasks)
    }
}

async fn decode<T: DeserializeOwned>(response: Response) -> Result<T> {
    let status = response.status();
    if status.is_success() {
        return Ok(response.json::<T>().await?);
    }

    let detail = read_detail(response).await;
    if status == StatusCode::NOT_FOUND
        && TaskErrorKind::classify(&detail) == TaskErrorKind::NotFound
    {
        return Err(ClientError::TaskNotFound);
    }
    Err(ClientError::Api {
        status: status.as_u16(),
        detail,
    })
}

async fn read_detail(response: Response) -> String {
    let raw = response.text().await.unwrap_or_default();
    match serde_json::from_str::<ErrorBody>(&raw) {
        Ok(body) if !body.detail.is_empty() => body.detail,
        _ => raw,
    }
}
