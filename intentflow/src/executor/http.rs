//! HTTP transport for agents.
//!
//! Each agent is reached at `POST {base_url}/agents/{agent}/invoke` with a
//! JSON body `{node_id, tool, input, attempt}` and answers with an
//! [`AgentResponse`]. One pooled [`reqwest::Client`] is shared by every call.

use super::agent::{AgentClient, AgentError, AgentRequest, AgentResponse};
use async_trait::async_trait;
use reqwest::StatusCode;
use serde::Serialize;
use serde_json::Value;
use std::time::Duration;

#[derive(Serialize)]
struct InvokeBody<'a> {
    node_id: &'a str,
    tool: &'a str,
    input: &'a Value,
    attempt: u32,
}

/// Agent client speaking JSON over HTTP.
#[derive(Debug, Clone)]
pub struct HttpAgentClient {
    client: reqwest::Client,
    base_url: String,
    bearer_token: Option<String>,
}

impl HttpAgentClient {
    /// Creates a client with a connection pool tuned for many short calls.
    pub fn new(base_url: &str) -> Result<Self, AgentError> {
        let client = reqwest::Client::builder()
            .pool_idle_timeout(Duration::from_secs(90))
            .pool_max_idle_per_host(32)
            .build()
            .map_err(|e| AgentError::Transport(format!("failed to build HTTP client: {e}")))?;
        Ok(Self::with_client(client, base_url))
    }

    /// Wraps an existing client.
    #[must_use]
    pub fn with_client(client: reqwest::Client, base_url: &str) -> Self {
        Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            bearer_token: None,
        }
    }

    /// Sends `Authorization: Bearer <token>` with every call.
    #[must_use]
    pub fn with_bearer_token(mut self, token: impl Into<String>) -> Self {
        self.bearer_token = Some(token.into());
        self
    }

    fn endpoint(&self, agent: &str) -> String {
        format!("{}/agents/{}/invoke", self.base_url, agent)
    }
}

/// Maps a non-success HTTP status to an agent error.
fn classify_status(status: StatusCode, body: &str) -> AgentError {
    let detail = format!("HTTP {status}: {body}");
    if status.is_server_error()
        || status == StatusCode::TOO_MANY_REQUESTS
        || status == StatusCode::REQUEST_TIMEOUT
    {
        AgentError::Transport(detail)
    } else if status == StatusCode::BAD_REQUEST || status == StatusCode::UNPROCESSABLE_ENTITY {
        AgentError::Validation(detail)
    } else {
        AgentError::Agent(detail)
    }
}

#[async_trait]
impl AgentClient for HttpAgentClient {
    async fn invoke(&self, request: AgentRequest) -> Result<AgentResponse, AgentError> {
        let mut req = self
            .client
            .post(self.endpoint(&request.agent))
            .json(&InvokeBody {
                node_id: &request.node_id,
                tool: &request.tool,
                input: &request.input,
                attempt: request.attempt,
            });

        if let Some(ref token) = self.bearer_token {
            req = req.bearer_auth(token);
        }

        let resp = req
            .send()
            .await
            .map_err(|e| AgentError::Transport(format!("agent request failed: {e}")))?;

        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            return Err(classify_status(status, &body));
        }

        resp.json::<AgentResponse>()
            .await
            .map_err(|e| AgentError::Agent(format!("malformed agent response: {e}")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_classify_status() {
        assert!(classify_status(StatusCode::SERVICE_UNAVAILABLE, "").is_transient());
        assert!(classify_status(StatusCode::TOO_MANY_REQUESTS, "").is_transient());
        assert!(matches!(
            classify_status(StatusCode::UNPROCESSABLE_ENTITY, "bad input"),
            AgentError::Validation(_)
        ));
        assert!(matches!(
            classify_status(StatusCode::NOT_FOUND, ""),
            AgentError::Agent(_)
        ));
    }

    #[test]
    fn test_endpoint_strips_trailing_slash() {
        let client = HttpAgentClient::with_client(reqwest::Client::new(), "http://agents.local/");
        assert_eq!(
            client.endpoint("summarizer"),
            "http://agents.local/agents/summarizer/invoke"
        );
    }

    #[tokio::test]
    async fn test_unreachable_host_is_transport_error() {
        let client = HttpAgentClient::new("http://127.0.0.1:9").unwrap();
        let err = client
            .invoke(AgentRequest {
                node_id: "n".into(),
                agent: "a".into(),
                tool: "t".into(),
                input: Value::Null,
                attempt: 1,
            })
            .await
            .unwrap_err();
        assert!(err.is_transient());
    }
}
