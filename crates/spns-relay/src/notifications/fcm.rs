//! FCM HTTP v1 push sink.
//!
//! Sends data-only, high priority messages. The payload travels base64
//! encoded under `enc_payload`; payloads too large for FCM are replaced by a
//! `too_big` marker carrying the original size.

use std::collections::BTreeMap;
use std::path::Path;
use std::time::Duration;

use async_trait::async_trait;
use base64::{Engine, engine::general_purpose::STANDARD};
use serde::{Deserialize, Serialize};
use spns_core::config::NotifyConfig;
use tracing::{debug, warn};

use super::NotificationError;
use super::sink::{DeliveryOutcome, PushSink};
use crate::dispatch::NotificationJob;
use crate::registry::token_prefix;

/// FCM HTTP v1 API endpoint template.
const FCM_API_URL_TEMPLATE: &str =
    "https://fcm.googleapis.com/v1/projects/{project_id}/messages:send";

/// Largest payload (in bytes, before encoding) sent as-is.
pub const MAX_PAYLOAD_SIZE: usize = 2500;

/// Environment variable holding the OAuth bearer token for FCM.
const FCM_ACCESS_TOKEN_ENV: &str = "SPNS_FCM_ACCESS_TOKEN";

/// Service account credentials loaded from a Google Cloud JSON key file.
#[derive(Debug, Clone, Deserialize)]
pub struct ServiceAccountCredentials {
    pub project_id: String,
    #[serde(default)]
    pub client_email: String,
    #[serde(default)]
    pub private_key: String,
}

#[derive(Debug, Serialize)]
pub struct FcmMessage {
    pub message: FcmMessageBody,
}

#[derive(Debug, Serialize)]
pub struct FcmMessageBody {
    pub token: String,
    pub data: BTreeMap<String, String>,
    pub android: FcmAndroidConfig,
}

#[derive(Debug, Serialize)]
pub struct FcmAndroidConfig {
    pub priority: &'static str,
}

/// Client for the FCM HTTP v1 API.
#[derive(Debug)]
pub struct FcmClient {
    http: reqwest::Client,
    credentials: ServiceAccountCredentials,
    api_url: String,
    /// OAuth bearer token, read from `SPNS_FCM_ACCESS_TOKEN`.
    access_token: String,
}

fn require_access_token(token: Option<String>) -> Result<String, NotificationError> {
    token.filter(|t| !t.trim().is_empty()).ok_or_else(|| {
        NotificationError::Credentials(format!("{FCM_ACCESS_TOKEN_ENV} is not set"))
    })
}

impl FcmClient {
    /// Load service account credentials from a JSON key file.
    ///
    /// # Errors
    ///
    /// Returns `NotificationError::Credentials` if the file cannot be read or
    /// parsed, `SPNS_FCM_ACCESS_TOKEN` is unset, or the HTTP client cannot be
    /// built.
    pub fn from_credentials_file(path: &Path) -> Result<Self, NotificationError> {
        Self::load(path, std::env::var(FCM_ACCESS_TOKEN_ENV).ok())
    }

    fn load(path: &Path, access_token: Option<String>) -> Result<Self, NotificationError> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            NotificationError::Credentials(format!(
                "Failed to read credentials file {}: {e}",
                path.display()
            ))
        })?;

        let credentials: ServiceAccountCredentials =
            serde_json::from_str(&content).map_err(|e| {
                NotificationError::Credentials(format!("Failed to parse credentials JSON: {e}"))
            })?;
        let access_token = require_access_token(access_token)?;

        // No-op if a provider is already installed.
        let _ = rustls::crypto::ring::default_provider().install_default();
        let http = reqwest::Client::builder()
            .build()
            .map_err(|e| NotificationError::Credentials(format!("HTTP client: {e}")))?;

        let client = Self::from_credentials(credentials, http, access_token);
        debug!(project_id = %client.credentials.project_id, "FCM client initialized");
        Ok(client)
    }

    pub fn from_credentials(
        credentials: ServiceAccountCredentials,
        http: reqwest::Client,
        access_token: String,
    ) -> Self {
        let api_url = FCM_API_URL_TEMPLATE.replace("{project_id}", &credentials.project_id);
        Self {
            http,
            credentials,
            api_url,
            access_token,
        }
    }

    #[cfg(test)]
    #[allow(clippy::expect_used)]
    pub(crate) fn for_testing(credentials: ServiceAccountCredentials) -> Self {
        let api_url = FCM_API_URL_TEMPLATE.replace("{project_id}", &credentials.project_id);
        let _ = rustls::crypto::ring::default_provider().install_default();
        let http = reqwest::Client::builder()
            .build()
            .expect("failed to build test HTTP client");

        Self {
            http,
            credentials,
            api_url,
            access_token: "test-access-token".to_string(),
        }
    }

    /// Build the data-only message carrying `payload` to `device_token`.
    pub fn build_message(device_token: &str, payload: &[u8]) -> FcmMessage {
        let mut data = BTreeMap::from([("spns".to_string(), "1".to_string())]);
        if payload.len() > MAX_PAYLOAD_SIZE {
            data.insert("too_big".to_string(), "1".to_string());
            data.insert("size".to_string(), payload.len().to_string());
        } else {
            data.insert("enc_payload".to_string(), STANDARD.encode(payload));
        }

        FcmMessage {
            message: FcmMessageBody {
                token: device_token.to_string(),
                data,
                android: FcmAndroidConfig { priority: "high" },
            },
        }
    }

    /// Send one message.
    ///
    /// # Errors
    ///
    /// Returns `NotificationError::Request` if the HTTP request fails, or
    /// `NotificationError::ApiError` if FCM returns a non-2xx status code.
    pub async fn send(&self, message: &FcmMessage) -> Result<(), NotificationError> {
        let response = self
            .http
            .post(&self.api_url)
            .header("Authorization", self.auth_header())
            .json(message)
            .send()
            .await
            .map_err(|e| NotificationError::Request(e.to_string()))?;

        let status = response.status();
        if status.is_success() {
            return Ok(());
        }
        let body = response
            .text()
            .await
            .unwrap_or_else(|_| "<failed to read body>".to_string());
        Err(NotificationError::ApiError {
            status: status.as_u16(),
            body,
        })
    }

    fn auth_header(&self) -> String {
        format!("Bearer {}", self.access_token)
    }

    pub fn project_id(&self) -> &str {
        &self.credentials.project_id
    }

    pub fn api_url(&self) -> &str {
        &self.api_url
    }
}

/// True when FCM says the token will never work again.
pub fn is_invalid_token(err: &NotificationError) -> bool {
    match err {
        NotificationError::ApiError { status, body } => {
            *status == 404 || body.contains("UNREGISTERED") || body.contains("INVALID_ARGUMENT")
        }
        NotificationError::Credentials(_) | NotificationError::Request(_) => false,
    }
}

/// [`PushSink`] delivering through FCM with a fixed retry policy.
#[derive(Debug)]
pub struct FcmSink {
    client: FcmClient,
    retries: u32,
    retry_interval: Duration,
}

impl FcmSink {
    pub const fn new(client: FcmClient, retries: u32, retry_interval: Duration) -> Self {
        Self {
            client,
            retries,
            retry_interval,
        }
    }

    /// Build the sink from the `notify` config section.
    ///
    /// # Errors
    ///
    /// Returns `NotificationError::Credentials` when no credentials file is
    /// configured or it cannot be loaded.
    pub fn from_config(config: &NotifyConfig) -> Result<Self, NotificationError> {
        let path = config.fcm_credentials.as_deref().ok_or_else(|| {
            NotificationError::Credentials("notify.fcm_credentials is not set".to_string())
        })?;
        Ok(Self::new(
            FcmClient::from_credentials_file(path)?,
            config.retries,
            Duration::from_secs(config.retry_interval_secs),
        ))
    }
}

#[async_trait]
impl PushSink for FcmSink {
    fn name(&self) -> &'static str {
        "fcm"
    }

    async fn send(&self, job: &NotificationJob) -> DeliveryOutcome {
        let message = FcmClient::build_message(&job.destination.token, &job.payload);
        let mut attempt = 0;
        loop {
            match self.client.send(&message).await {
                Ok(()) => {
                    debug!(job_id = %job.id, "FCM notification sent");
                    return DeliveryOutcome::Delivered;
                }
                Err(e) if is_invalid_token(&e) => {
                    debug!(
                        token_prefix = %token_prefix(&job.destination.token),
                        error = %e,
                        "FCM rejected token"
                    );
                    return DeliveryOutcome::InvalidToken;
                }
                Err(e) if attempt < self.retries => {
                    attempt += 1;
                    warn!(job_id = %job.id, attempt, error = %e, "FCM send failed, retrying");
                    tokio::time::sleep(self.retry_interval).await;
                }
                Err(e) => {
                    warn!(
                        job_id = %job.id,
                        retries = self.retries,
                        error = %e,
                        "FCM send failed, giving up"
                    );
                    return DeliveryOutcome::Failed(e.to_string());
                }
            }
        }
    }
}
