use async_trait::async_trait;
use reqwest::{Client, Response, StatusCode};
use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::models::checkpoint::Resolution;
use crate::models::mode::{ExecutionStyle, Mode, SelectionStrategy};
use crate::services::engine::{EngineError, EngineSession, EngineStep, ExecutionEngine};

/// Client for the Python AI backend that runs expert orchestration.
pub struct HttpEngine {
    http: Client,
    base_url: String,
    api_token: Option<String>,
}

#[derive(Serialize)]
struct OpenSessionRequest<'a> {
    mode: Mode,
    selection: SelectionStrategy,
    execution: ExecutionStyle,
    input: &'a serde_json::Value,
}

#[derive(Deserialize)]
struct OpenSessionResponse {
    session_id: String,
}

impl HttpEngine {
    pub fn new(
        base_url: &str,
        api_token: Option<String>,
        timeout: Duration,
    ) -> Result<Self, EngineError> {
        let http = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| EngineError::fatal(format!("failed to build HTTP client: {}", e)))?;
        Ok(Self {
            http,
            base_url: base_url.trim_end_matches('/').to_string(),
            api_token,
        })
    }

    fn post(&self, path: &str) -> reqwest::RequestBuilder {
        let request = self.http.post(format!("{}{}", self.base_url, path));
        match &self.api_token {
            Some(token) => request.bearer_auth(token),
            None => request,
        }
    }
}

#[async_trait]
impl ExecutionEngine for HttpEngine {
    async fn open(
        &self,
        mode: Mode,
        input: &serde_json::Value,
    ) -> Result<Box<dyn EngineSession>, EngineError> {
        let body = OpenSessionRequest {
            mode,
            selection: mode.selection(),
            execution: mode.execution(),
            input,
        };
        let response = self
            .post("/v1/sessions")
            .json(&body)
            .send()
            .await
            .map_err(transport_error)?;
        let opened: OpenSessionResponse = decode(response).await?;

        tracing::debug!(session_id = %opened.session_id, mode = %mode, "Engine session opened");

        Ok(Box::new(HttpSession {
            http: self.http.clone(),
            base_url: self.base_url.clone(),
            api_token: self.api_token.clone(),
            session_id: opened.session_id,
        }))
    }

    async fn health_check(&self) -> Result<(), EngineError> {
        let response = self
            .http
            .get(format!("{}/health", self.base_url))
            .send()
            .await
            .map_err(transport_error)?;
        check_status(response).await.map(|_| ())
    }
}

struct HttpSession {
    http: Client,
    base_url: String,
    api_token: Option<String>,
    session_id: String,
}

impl HttpSession {
    fn post(&self, action: &str) -> reqwest::RequestBuilder {
        let url = format!("{}/v1/sessions/{}/{}", self.base_url, self.session_id, action);
        let request = self.http.post(url);
        match &self.api_token {
            Some(token) => request.bearer_auth(token),
            None => request,
        }
    }
}

#[async_trait]
impl EngineSession for HttpSession {
    async fn next_step(&mut self) -> Result<EngineStep, EngineError> {
        let response = self.post("next").send().await.map_err(transport_error)?;
        decode(response).await
    }

    async fn resume(&mut self, resolution: &Resolution) -> Result<(), EngineError> {
        let response = self
            .post("resume")
            .json(resolution)
            .send()
            .await
            .map_err(transport_error)?;
        check_status(response).await.map(|_| ())
    }

    async fn abort(&mut self) {
        match self.post("abort").send().await {
            Ok(response) if response.status().is_success() => {
                tracing::debug!(session_id = %self.session_id, "Engine session aborted");
            }
            Ok(response) => {
                tracing::warn!(
                    session_id = %self.session_id,
                    status = %response.status(),
                    "Engine rejected abort"
                );
            }
            Err(e) => {
                tracing::warn!(session_id = %self.session_id, error = %e, "Engine abort failed");
            }
        }
    }
}

/// Connection failures and timeouts are worth one more try.
fn transport_error(e: reqwest::Error) -> EngineError {
    if e.is_connect() || e.is_timeout() || e.is_request() {
        EngineError::retryable(format!("engine unreachable: {}", e))
    } else {
        EngineError::fatal(format!("engine request failed: {}", e))
    }
}

fn is_retryable_status(status: StatusCode) -> bool {
    status.is_server_error() || status == StatusCode::TOO_MANY_REQUESTS
}

async fn check_status(response: Response) -> Result<Response, EngineError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let body = response.text().await.unwrap_or_default();
    let message = format!("engine returned {}: {}", status, body.trim());
    if is_retryable_status(status) {
        Err(EngineError::retryable(message))
    } else {
        Err(EngineError::fatal(message))
    }
}

async fn decode<T: serde::de::DeserializeOwned>(response: Response) -> Result<T, EngineError> {
    let response = check_status(response).await?;
    response
        .json()
        .await
        .map_err(|e| EngineError::fatal(format!("failed to decode engine response: {}", e)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_step_wire_format() {
        let turn: EngineStep =
            serde_json::from_value(json!({"type": "turn", "status": "thinking", "percent": 30}))
                .unwrap();
        assert_eq!(
            turn,
            EngineStep::Turn {
                status: "thinking".to_string(),
                percent: Some(30.0),
                output: None
            }
        );

        let fractional: EngineStep =
            serde_json::from_value(json!({"type": "turn", "status": "x", "percent": 312.5}))
                .unwrap();
        assert!(matches!(fractional, EngineStep::Turn { percent: Some(p), .. } if p == 312.5));

        let checkpoint: EngineStep =
            serde_json::from_value(json!({"type": "checkpoint", "payload": {"plan": [1, 2]}}))
                .unwrap();
        assert!(matches!(checkpoint, EngineStep::Checkpoint { .. }));

        let finished: EngineStep =
            serde_json::from_value(json!({"type": "finished", "result": "answer"})).unwrap();
        assert_eq!(
            finished,
            EngineStep::Finished {
                result: json!("answer")
            }
        );
    }

    #[test]
    fn test_status_classification() {
        assert!(is_retryable_status(StatusCode::BAD_GATEWAY));
        assert!(is_retryable_status(StatusCode::TOO_MANY_REQUESTS));
        assert!(!is_retryable_status(StatusCode::BAD_REQUEST));
        assert!(!is_retryable_status(StatusCode::UNPROCESSABLE_ENTITY));
    }

    #[tokio::test]
    async fn test_unreachable_engine_is_retryable() {
        let engine =
            HttpEngine::new("http://127.0.0.1:9", None, Duration::from_millis(500)).unwrap();
        let err = engine.open(Mode::ManualAutonomous, &json!({})).await.err().unwrap();
        assert!(err.retryable);
    }

    #[test]
    fn test_open_request_carries_capabilities() {
        let input = json!({"question": "dose?"});
        let body = serde_json::to_value(OpenSessionRequest {
            mode: Mode::AutomaticAutonomous,
            selection: Mode::AutomaticAutonomous.selection(),
            execution: Mode::AutomaticAutonomous.execution(),
            input: &input,
        })
        .unwrap();
        assert_eq!(body["mode"], "automatic-autonomous");
        assert_eq!(body["selection"], "automatic");
        assert_eq!(body["execution"], "autonomous");
    }
}
