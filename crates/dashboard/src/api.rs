//! The hub's HTTP surface as seen from the dashboard.

use async_trait::async_trait;
use farming_common::{CommandAck, DeviceData, Envelope, PumpCommand};
use reqwest::header::ACCEPT;
use reqwest::StatusCode;
use serde::de::DeserializeOwned;
use std::time::Duration;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ApiError {
    /// The hub answered with a failure envelope or an error status.
    #[error("hub rejected request ({status}): {message}")]
    Rejected { status: u16, message: String },

    #[error("request failed: {0}")]
    Transport(#[from] reqwest::Error),

    #[error("unexpected response: {0}")]
    Malformed(String),
}

impl ApiError {
    /// The hub's own message when it sent one, `fallback` otherwise.
    pub fn user_message(&self, fallback: &str) -> String {
        match self {
            Self::Rejected { message, .. } if !message.trim().is_empty() => message.clone(),
            _ => fallback.to_string(),
        }
    }
}

/// Device State Source and Command Sink.
#[async_trait]
pub trait FarmingApi: Send + Sync {
    /// Current state of every device, newest history first.
    async fn fetch_devices(&self) -> Result<Vec<DeviceData>, ApiError>;

    /// Ask the hub to change a pump. Resolves once the hub has persisted it.
    async fn send_command(&self, cmd: &PumpCommand) -> Result<CommandAck, ApiError>;
}

/// [`FarmingApi`] over HTTP/JSON.
pub struct HttpApi {
    client: reqwest::Client,
    base_url: String,
}

impl HttpApi {
    pub fn new(base_url: impl Into<String>) -> Result<Self, ApiError> {
        let base_url: String = base_url.into();
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(10))
            .build()?;
        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
        })
    }

    fn api_url(&self, endpoint: &str) -> String {
        format!("{}/{endpoint}", self.base_url)
    }

    async fn decode<T: DeserializeOwned>(resp: reqwest::Response) -> Result<T, ApiError> {
        let status = resp.status();
        let body = resp.bytes().await?;
        parse_envelope(status, &body)
    }
}

#[async_trait]
impl FarmingApi for HttpApi {
    async fn fetch_devices(&self) -> Result<Vec<DeviceData>, ApiError> {
        let resp = self
            .client
            .get(self.api_url("api/farming"))
            .header(ACCEPT, "application/json")
            .send()
            .await?;
        Self::decode(resp).await
    }

    async fn send_command(&self, cmd: &PumpCommand) -> Result<CommandAck, ApiError> {
        let resp = self
            .client
            .patch(self.api_url("api/farming"))
            .header(ACCEPT, "application/json")
            .json(cmd)
            .send()
            .await?;
        Self::decode(resp).await
    }
}

/// Unwrap a hub envelope. A body that does not parse still counts as a
/// rejection when the status says so, with no message to show.
pub(crate) fn parse_envelope<T: DeserializeOwned>(
    status: StatusCode,
    body: &[u8],
) -> Result<T, ApiError> {
    let envelope: Envelope<T> = match serde_json::from_slice(body) {
        Ok(e) => e,
        Err(_) if !status.is_success() => {
            return Err(ApiError::Rejected {
                status: status.as_u16(),
                message: String::new(),
            })
        }
        Err(e) => return Err(ApiError::Malformed(e.to_string())),
    };

    if !status.is_success() || !envelope.success {
        return Err(ApiError::Rejected {
            status: status.as_u16(),
            message: envelope.message,
        });
    }
    envelope
        .data
        .ok_or_else(|| ApiError::Malformed("envelope has no data".into()))
}
