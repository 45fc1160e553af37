//! HTTP client for the inference server's slot API.
//!
//! Covers health, slot listing, per-slot status and the `save`/`restore`
//! slot actions. Every call is a single attempt: retrying is the caller's
//! business (in practice, the next scheduled cycle).

use crate::config::ServerConfig;
use crate::utils::errors::{KeeperError, Result};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Usage counters the server reports for a slot.
///
/// Field names differ between server versions, so both spellings are kept.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct SlotStatus {
    pub id: u32,
    #[serde(default)]
    pub n_ctx_used: Option<u64>,
    #[serde(default)]
    pub n_past: Option<u64>,
    #[serde(default)]
    pub n_prompt_tokens: Option<u64>,
    #[serde(default)]
    pub n_prompt_tokens_processed: Option<u64>,
}

impl SlotStatus {
    pub fn used_context(&self) -> Option<u64> {
        self.n_ctx_used.or(self.n_past)
    }

    pub fn prompt_tokens(&self) -> Option<u64> {
        self.n_prompt_tokens.or(self.n_prompt_tokens_processed)
    }

    /// Whether any usage counter was present at all.
    pub fn reports_usage(&self) -> bool {
        self.used_context().is_some() || self.prompt_tokens().is_some()
    }

    /// Nonzero used context or nonzero prompt tokens.
    pub fn has_context(&self) -> bool {
        self.used_context().unwrap_or(0) > 0 || self.prompt_tokens().unwrap_or(0) > 0
    }
}

#[derive(Debug, Serialize)]
struct SlotFileRequest<'a> {
    filename: &'a str,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum SlotAction {
    Save,
    Restore,
}

impl SlotAction {
    fn as_str(self) -> &'static str {
        match self {
            SlotAction::Save => "save",
            SlotAction::Restore => "restore",
        }
    }
}

/// Client for the llama.cpp-compatible slot API
#[derive(Clone)]
pub struct LlamaClient {
    client: reqwest::Client,
    base_url: String,
    query_timeout: Duration,
    health_timeout: Duration,
}

impl LlamaClient {
    pub fn new(config: &ServerConfig) -> Result<Self> {
        let client = reqwest::Client::builder()
            .connect_timeout(Duration::from_secs(5))
            .timeout(Duration::from_secs(config.request_timeout_secs))
            .build()?;

        Ok(Self {
            client,
            base_url: config.url.trim_end_matches('/').to_string(),
            query_timeout: Duration::from_secs(config.query_timeout_secs),
            health_timeout: Duration::from_secs(config.health_timeout_secs),
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// `GET /health`; Ok only on a success status.
    pub async fn health(&self) -> Result<()> {
        let response = self
            .client
            .get(format!("{}/health", self.base_url))
            .timeout(self.health_timeout)
            .send()
            .await?;
        ensure_success(response).await.map(|_| ())
    }

    /// `GET /slots`
    pub async fn list_slots(&self) -> Result<Vec<SlotStatus>> {
        let response = self
            .client
            .get(format!("{}/slots", self.base_url))
            .timeout(self.query_timeout)
            .send()
            .await?;
        let response = ensure_success(response).await?;
        Ok(response.json().await?)
    }

    /// `GET /slots/{id}`; accepts an object or a one-element array.
    pub async fn slot_status(&self, id: u32) -> Result<SlotStatus> {
        let response = self
            .client
            .get(format!("{}/slots/{}", self.base_url, id))
            .timeout(self.query_timeout)
            .send()
            .await?;
        let response = ensure_success(response).await?;
        let body: serde_json::Value = response.json().await?;

        let value = match body {
            serde_json::Value::Array(items) => items
                .into_iter()
                .find(|item| item.get("id").and_then(|v| v.as_u64()) == Some(u64::from(id)))
                .ok_or_else(|| KeeperError::Status {
                    status: 404,
                    body: format!("slot {id} missing from response"),
                })?,
            other => other,
        };
        Ok(serde_json::from_value(value)?)
    }

    /// Ask the server to write slot `id` to `filename` in its save directory.
    pub async fn save_slot(&self, id: u32, filename: &str) -> Result<()> {
        self.slot_action(id, SlotAction::Save, filename).await
    }

    /// Ask the server to load `filename` into slot `id`.
    pub async fn restore_slot(&self, id: u32, filename: &str) -> Result<()> {
        self.slot_action(id, SlotAction::Restore, filename).await
    }

    async fn slot_action(&self, id: u32, action: SlotAction, filename: &str) -> Result<()> {
        let response = self
            .client
            .post(format!("{}/slots/{}", self.base_url, id))
            .query(&[("action", action.as_str())])
            .json(&SlotFileRequest { filename })
            .send()
            .await?;
        ensure_success(response).await.map(|_| ())
    }
}

async fn ensure_success(response: reqwest::Response) -> Result<reqwest::Response> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let body = response.text().await.unwrap_or_default();
    Err(KeeperError::Status {
        status: status.as_u16(),
        body,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{body_json, method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn client_for(server: &MockServer) -> LlamaClient {
        let config = ServerConfig {
            url: format!("{}/", server.uri()),
            ..ServerConfig::default()
        };
        LlamaClient::new(&config).unwrap()
    }

    #[test]
    fn test_has_context() {
        let empty = SlotStatus { id: 0, ..Default::default() };
        assert!(!empty.has_context());
        assert!(!empty.reports_usage());

        let used = SlotStatus { id: 1, n_past: Some(12), ..Default::default() };
        assert!(used.has_context());

        let prompt_only = SlotStatus {
            id: 2,
            n_ctx_used: Some(0),
            n_prompt_tokens: Some(5),
            ..Default::default()
        };
        assert!(prompt_only.has_context());

        let zeros = SlotStatus {
            id: 3,
            n_ctx_used: Some(0),
            n_prompt_tokens: Some(0),
            ..Default::default()
        };
        assert!(zeros.reports_usage());
        assert!(!zeros.has_context());
    }

    #[tokio::test]
    async fn test_health_ok_and_unavailable() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/health"))
            .respond_with(ResponseTemplate::new(503))
            .up_to_n_times(1)
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/health"))
            .respond_with(ResponseTemplate::new(200))
            .mount(&server)
            .await;

        let client = client_for(&server);
        assert!(matches!(
            client.health().await,
            Err(KeeperError::Status { status: 503, .. })
        ));
        assert!(client.health().await.is_ok());
    }

    #[tokio::test]
    async fn test_list_slots() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/slots"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!([
                {"id": 0, "n_ctx": 4096, "n_past": 120, "is_processing": false},
                {"id": 1, "n_ctx": 4096, "is_processing": false}
            ])))
            .mount(&server)
            .await;

        let slots = client_for(&server).list_slots().await.unwrap();
        assert_eq!(slots.len(), 2);
        assert_eq!(slots[0].used_context(), Some(120));
        assert!(!slots[1].reports_usage());
    }

    #[tokio::test]
    async fn test_slot_status_accepts_array() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/slots/2"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!([
                {"id": 2, "n_prompt_tokens": 7}
            ])))
            .mount(&server)
            .await;

        let status = client_for(&server).slot_status(2).await.unwrap();
        assert_eq!(status.id, 2);
        assert!(status.has_context());
    }

    #[tokio::test]
    async fn test_save_sends_filename_and_action() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/slots/1"))
            .and(query_param("action", "save"))
            .and(body_json(serde_json::json!({"filename": "s_slot1_20250101120000.bin"})))
            .respond_with(ResponseTemplate::new(200))
            .expect(1)
            .mount(&server)
            .await;

        client_for(&server)
            .save_slot(1, "s_slot1_20250101120000.bin")
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_restore_error_carries_status_and_body() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/slots/0"))
            .and(query_param("action", "restore"))
            .respond_with(ResponseTemplate::new(400).set_body_string("file not found"))
            .mount(&server)
            .await;

        let err = client_for(&server)
            .restore_slot(0, "missing.bin")
            .await
            .unwrap_err();
        match err {
            KeeperError::Status { status, body } => {
                assert_eq!(status, 400);
                assert_eq!(body, "file not found");
            }
            other => panic!("unexpected error: {other}"),
        }
    }
}
