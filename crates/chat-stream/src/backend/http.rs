//! HTTP client for the chat job API.
//!
//! Wraps the submit, poll, history and active-jobs endpoints with optional
//! bearer auth and maps status codes onto `ChatStreamError`.

use async_trait::async_trait;
use reqwest::StatusCode;

use crate::config::ChatStreamConfig;
use crate::error::ChatStreamError;
use crate::traits::ChatBackend;
use crate::types::{
    ActiveJob, ActiveJobsBody, HistoryBody, HistoryMessage, Job, ModelConfig, PollResult,
    RateLimitBody, SubmitRequest,
};

/// Chat job API client.
#[derive(Clone)]
pub struct HttpChatBackend {
    client: reqwest::Client,
    config: ChatStreamConfig,
}

impl HttpChatBackend {
    pub fn new(config: &ChatStreamConfig) -> Result<Self, ChatStreamError> {
        config
            .validate()
            .map_err(|e| ChatStreamError::Config(e.to_string()))?;

        let client = reqwest::Client::builder()
            .timeout(config.request_timeout)
            .build()
            .map_err(|e| ChatStreamError::Config(format!("HTTP client init: {}", e)))?;

        Ok(Self {
            client,
            config: config.clone(),
        })
    }

    fn url(&self, path: &str) -> String {
        self.config.endpoint(path)
    }

    fn authorize(&self, request: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        match self.config.auth_token {
            Some(ref token) => request.bearer_auth(token),
            None => request,
        }
    }

    async fn send(
        &self,
        request: reqwest::RequestBuilder,
        what: &str,
    ) -> Result<reqwest::Response, ChatStreamError> {
        self.authorize(request).send().await.map_err(|e| {
            if e.is_timeout() {
                ChatStreamError::Timeout
            } else {
                ChatStreamError::network(None, format!("{} failed: {}", what, e))
            }
        })
    }
}

/// Map a non-success status shared by every endpoint.
async fn status_error(response: reqwest::Response, what: &str) -> ChatStreamError {
    let status = response.status();
    if status == StatusCode::UNAUTHORIZED {
        return ChatStreamError::Unauthenticated;
    }
    let body = response
        .text()
        .await
        .unwrap_or_else(|_| "Unknown error".to_string());
    ChatStreamError::network(Some(status.as_u16()), format!("{}: {}", what, body))
}

/// 429 from the daily quota carries the limit. Anything else answering 429
/// (a proxy, say) is still reported with its status.
async fn rate_limit_error(response: reqwest::Response) -> ChatStreamError {
    let body = response.text().await.unwrap_or_default();
    match serde_json::from_str::<RateLimitBody>(&body) {
        Ok(body) => ChatStreamError::DailyLimitExceeded {
            limit: body.limit.limit,
            used: body.limit.used,
            remaining: body.limit.remaining,
        },
        Err(_) => ChatStreamError::network(
            Some(StatusCode::TOO_MANY_REQUESTS.as_u16()),
            format!("submit: rate limited: {}", body),
        ),
    }
}

async fn parse_json<T: serde::de::DeserializeOwned>(
    response: reqwest::Response,
    what: &str,
) -> Result<T, ChatStreamError> {
    response
        .json()
        .await
        .map_err(|e| ChatStreamError::Parse(format!("{} parse: {}", what, e)))
}

#[async_trait]
impl ChatBackend for HttpChatBackend {
    async fn submit_job(
        &self,
        message: &str,
        model_config: Option<&ModelConfig>,
        session_id: Option<&str>,
    ) -> Result<Job, ChatStreamError> {
        let body = SubmitRequest {
            message,
            model_config,
            session_id,
        };
        let response = self
            .send(self.client.post(self.url("/chat/jobs")).json(&body), "submit")
            .await?;

        match response.status() {
            s if s.is_success() => parse_json(response, "submit").await,
            StatusCode::TOO_MANY_REQUESTS => Err(rate_limit_error(response).await),
            StatusCode::SERVICE_UNAVAILABLE => Err(ChatStreamError::ServerBusy),
            _ => Err(status_error(response, "submit").await),
        }
    }

    async fn poll_events(
        &self,
        job_id: &str,
        last_id: &str,
    ) -> Result<PollResult, ChatStreamError> {
        let url = self.url(&format!(
            "/chat/jobs/{}/events",
            urlencoding::encode(job_id)
        ));
        let response = self
            .send(
                self.client.get(url).query(&[("last_id", last_id)]),
                "poll",
            )
            .await?;

        if !response.status().is_success() {
            return Err(status_error(response, "poll").await);
        }
        parse_json(response, "poll").await
    }

    async fn fetch_history(
        &self,
        session_id: &str,
    ) -> Result<Vec<HistoryMessage>, ChatStreamError> {
        let url = self.url(&format!(
            "/chat/history/{}",
            urlencoding::encode(session_id)
        ));
        let response = self.send(self.client.get(url), "history").await?;

        if !response.status().is_success() {
            return Err(status_error(response, "history").await);
        }
        let body: HistoryBody = parse_json(response, "history").await?;
        Ok(body.data.messages)
    }

    async fn list_active_jobs(
        &self,
        session_id: Option<&str>,
    ) -> Result<Vec<ActiveJob>, ChatStreamError> {
        let mut request = self.client.get(self.url("/chat/jobs/active"));
        if let Some(session_id) = session_id {
            request = request.query(&[("session_id", session_id)]);
        }
        let response = self.send(request, "active jobs").await?;

        if !response.status().is_success() {
            return Err(status_error(response, "active jobs").await);
        }
        let body: ActiveJobsBody = parse_json(response, "active jobs").await?;
        Ok(body.jobs)
    }
}
