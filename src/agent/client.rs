use super::types::*;
use reqwest_eventsource::EventSource;
use serde::Serialize;
use serde_json::{Value, json};
use thiserror::Error;
use tokio_util::sync::CancellationToken;

#[derive(Debug, Error)]
pub enum ClientError {
    #[error("agent request failed: {0}")]
    Http(#[from] reqwest::Error),
    #[error("agent returned {status}: {body}")]
    Status {
        status: reqwest::StatusCode,
        body: String,
    },
    #[error("agent event stream failed: {0}")]
    EventStream(String),
    #[error("request aborted")]
    Aborted,
}

/// One prompt input part sent to the Agent.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum PromptPart {
    Text { text: String },
    File { mime: String, filename: String, url: String },
}

/// Handle onto one running Agent server. Cheap to clone.
#[derive(Debug, Clone)]
pub struct AgentClient {
    base: String,
    http: reqwest::Client,
}

impl AgentClient {
    pub fn new(port: u16) -> Self {
        // streaming endpoints may idle for minutes, so no request timeout
        let http = reqwest::Client::builder()
            .connect_timeout(std::time::Duration::from_secs(10))
            .build()
            .unwrap_or_default();
        Self {
            base: format!("http://127.0.0.1:{port}"),
            http,
        }
    }

    pub fn base_url(&self) -> &str {
        &self.base
    }

    async fn check(response: reqwest::Response) -> Result<reqwest::Response, ClientError> {
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }
        let body = response.text().await.unwrap_or_default();
        Err(ClientError::Status { status, body })
    }

    pub async fn healthy(&self) -> bool {
        match self.http.get(format!("{}/app", self.base)).send().await {
            Ok(resp) => resp.status().is_success(),
            Err(_) => false,
        }
    }

    pub async fn create_session(&self, title: &str) -> Result<Session, ClientError> {
        let resp = self
            .http
            .post(format!("{}/session", self.base))
            .json(&json!({ "title": title }))
            .send()
            .await?;
        Ok(Self::check(resp).await?.json().await?)
    }

    pub async fn session(&self, id: &str) -> Result<Session, ClientError> {
        let resp = self
            .http
            .get(format!("{}/session/{id}", self.base))
            .send()
            .await?;
        Ok(Self::check(resp).await?.json().await?)
    }

    pub async fn sessions(&self) -> Result<Vec<Session>, ClientError> {
        let resp = self.http.get(format!("{}/session", self.base)).send().await?;
        Ok(Self::check(resp).await?.json().await?)
    }

    pub async fn session_messages(&self, id: &str) -> Result<Vec<MessageWithParts>, ClientError> {
        let resp = self
            .http
            .get(format!("{}/session/{id}/message", self.base))
            .send()
            .await?;
        Ok(Self::check(resp).await?.json().await?)
    }

    /// Submit a prompt. Blocks until the Agent finishes generating (part
    /// streaming happens on the event stream); the token aborts mid-flight.
    pub async fn prompt(
        &self,
        session_id: &str,
        parts: Vec<PromptPart>,
        system: Option<String>,
        token: &CancellationToken,
    ) -> Result<Value, ClientError> {
        let mut body = json!({ "parts": parts });
        if let Some(system) = system {
            body["system"] = Value::String(system);
        }

        let fut = async {
            let resp = self
                .http
                .post(format!("{}/session/{session_id}/message", self.base))
                .json(&body)
                .send()
                .await?;
            Ok(Self::check(resp).await?.json::<Value>().await?)
        };

        tokio::select! {
            _ = token.cancelled() => Err(ClientError::Aborted),
            result = fut => result,
        }
    }

    /// Run a named Agent slash-command inside the session.
    pub async fn command(
        &self,
        session_id: &str,
        command: &str,
        arguments: &str,
        token: &CancellationToken,
    ) -> Result<Value, ClientError> {
        let fut = async {
            let resp = self
                .http
                .post(format!("{}/session/{session_id}/command", self.base))
                .json(&json!({ "command": command, "arguments": arguments }))
                .send()
                .await?;
            Ok(Self::check(resp).await?.json::<Value>().await?)
        };

        tokio::select! {
            _ = token.cancelled() => Err(ClientError::Aborted),
            result = fut => result,
        }
    }

    pub async fn abort_session(&self, id: &str) -> Result<(), ClientError> {
        let resp = self
            .http
            .post(format!("{}/session/{id}/abort", self.base))
            .send()
            .await?;
        Self::check(resp).await?;
        Ok(())
    }

    pub async fn share_session(&self, id: &str) -> Result<Option<String>, ClientError> {
        let resp = self
            .http
            .post(format!("{}/session/{id}/share", self.base))
            .send()
            .await?;
        let session: Session = Self::check(resp).await?.json().await?;
        Ok(session.share.map(|s| s.url))
    }

    pub async fn reply_permission(
        &self,
        session_id: &str,
        permission_id: &str,
        scope: PermissionScope,
    ) -> Result<(), ClientError> {
        let resp = self
            .http
            .post(format!(
                "{}/session/{session_id}/permissions/{permission_id}",
                self.base
            ))
            .json(&json!({ "response": scope.as_str() }))
            .send()
            .await?;
        Self::check(resp).await?;
        Ok(())
    }

    pub async fn projects(&self) -> Result<Vec<ProjectInfo>, ClientError> {
        let resp = self.http.get(format!("{}/project", self.base)).send().await?;
        Ok(Self::check(resp).await?.json().await?)
    }

    pub async fn providers(&self) -> Result<ProvidersResponse, ClientError> {
        let resp = self
            .http
            .get(format!("{}/config/providers", self.base))
            .send()
            .await?;
        Ok(Self::check(resp).await?.json().await?)
    }

    /// Context window of `model_id`, looked up across all providers.
    pub async fn model_context_limit(&self, model_id: &str) -> Result<Option<u64>, ClientError> {
        let providers = self.providers().await?;
        for provider in providers.providers {
            if let Some(model) = provider.models.get(model_id) {
                if model.limit.context > 0 {
                    return Ok(Some(model.limit.context));
                }
            }
        }
        Ok(None)
    }

    pub async fn register_auth(&self, provider_id: &str, key: &str) -> Result<(), ClientError> {
        let resp = self
            .http
            .put(format!("{}/auth/{provider_id}", self.base))
            .json(&json!({ "type": "api", "key": key }))
            .send()
            .await?;
        Self::check(resp).await?;
        Ok(())
    }

    /// Open the server-sent event stream. The caller drives the stream and
    /// applies its own cancellation.
    pub fn events(&self) -> Result<EventSource, ClientError> {
        EventSource::new(self.http.get(format!("{}/event", self.base)))
            .map_err(|e| ClientError::EventStream(e.to_string()))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PermissionScope {
    Once,
    Always,
    Reject,
}

impl PermissionScope {
    pub fn as_str(self) -> &'static str {
        match self {
            PermissionScope::Once => "once",
            PermissionScope::Always => "always",
            PermissionScope::Reject => "reject",
        }
    }
}
