use std::time::Duration;

use chrono::{DateTime, Utc};
use reqwest::header::{HeaderMap, HeaderName, HeaderValue, CONTENT_TYPE};
use reqwest::{Client, Method, RequestBuilder, Response, StatusCode};
use secrecy::{ExposeSecret, SecretString};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tokio::time::sleep;

use crate::{TracelaneConfig, TracelaneError};

const MAX_ATTEMPTS: u32 = 3;

#[derive(Clone, Debug, Deserialize)]
pub struct Project {
    pub id: String,
    #[serde(default)]
    pub name: Option<String>,
}

#[derive(Clone, Debug, Deserialize)]
pub struct ProjectsResponse {
    #[serde(default)]
    pub data: Vec<Project>,
}

#[derive(Clone, Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MediaUploadRequest {
    pub trace_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub observation_id: Option<String>,
    pub content_type: String,
    pub content_length: usize,
    pub sha256_hash: String,
    pub field: String,
}

#[derive(Clone, Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MediaUploadResponse {
    pub media_id: String,
    /// Absent when the backend already stores this content.
    #[serde(default)]
    pub upload_url: Option<String>,
}

#[derive(Clone, Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MediaUploadReport {
    pub uploaded_at: DateTime<Utc>,
    pub upload_http_status: u16,
    pub upload_http_error: Option<String>,
    pub upload_time_ms: u64,
}

#[derive(Clone, Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AgentDisplayNameResponse {
    pub success: bool,
    pub agent_id: String,
    pub display_name: String,
    pub updated_at: DateTime<Utc>,
}

/// Client for the Tracelane public API.
///
/// The configured timeout applies to every request, including media
/// uploads, so a hung call cannot stall a flush indefinitely.
#[derive(Clone)]
pub struct TracelaneClient {
    client: Client,
    base_url: String,
    public_key: Option<String>,
    secret_key: Option<SecretString>,
    /// Upper bound on any single retry wait, including `Retry-After`.
    max_retry_delay: Duration,
}

impl TracelaneClient {
    pub fn new(config: &TracelaneConfig) -> Result<Self, TracelaneError> {
        let mut headers = HeaderMap::new();
        for (name, value) in &config.additional_headers {
            let name = HeaderName::from_bytes(name.as_bytes())
                .map_err(|err| TracelaneError::Config(format!("invalid header '{name}': {err}")))?;
            let value = HeaderValue::from_str(value)
                .map_err(|err| TracelaneError::Config(format!("invalid header value: {err}")))?;
            headers.insert(name, value);
        }
        let client = Client::builder()
            .timeout(config.timeout)
            .default_headers(headers)
            .build()?;

        Ok(Self {
            client,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            public_key: config.public_key.clone(),
            secret_key: config.secret_key.clone(),
            max_retry_delay: config.timeout,
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// Projects visible to the configured key pair.
    pub async fn get_projects(&self) -> Result<ProjectsResponse, TracelaneError> {
        let url = self.url("/api/public/projects");
        let response = self
            .send_with_retry(|| self.authorized(Method::GET, &url))
            .await?;
        parse_json(response).await
    }

    pub async fn create_media_upload(
        &self,
        request: &MediaUploadRequest,
    ) -> Result<MediaUploadResponse, TracelaneError> {
        let url = self.url("/api/public/media");
        let response = self
            .send_with_retry(|| self.authorized(Method::POST, &url).json(request))
            .await?;
        parse_json(response).await
    }

    /// Puts raw media bytes to a presigned upload URL. Not retried; the
    /// outcome is reported back through [`Self::report_media_upload`].
    pub async fn upload_media_bytes(
        &self,
        upload_url: &str,
        content_type: &str,
        sha256_hash: &str,
        bytes: Vec<u8>,
    ) -> Result<StatusCode, TracelaneError> {
        let response = self
            .client
            .put(upload_url)
            .header(CONTENT_TYPE, content_type)
            .header("x-amz-checksum-sha256", sha256_hash)
            .body(bytes)
            .send()
            .await?;
        let status = response.status();
        if status.is_success() {
            return Ok(status);
        }
        let body = response.text().await.unwrap_or_default();
        Err(TracelaneError::Http { status, body })
    }

    pub async fn report_media_upload(
        &self,
        media_id: &str,
        report: &MediaUploadReport,
    ) -> Result<(), TracelaneError> {
        let url = self.url(&format!("/api/public/media/{media_id}"));
        self.send_with_retry(|| self.authorized(Method::PATCH, &url).json(report))
            .await?;
        Ok(())
    }

    /// Renames an agent for display. The agent id and name are unaffected.
    pub async fn update_agent_display_name(
        &self,
        agent_id: &str,
        display_name: &str,
    ) -> Result<AgentDisplayNameResponse, TracelaneError> {
        let url = self.url(&format!("/api/public/agents/{agent_id}/display-name"));
        let payload = json!({ "displayName": display_name });
        let response = self
            .send_with_retry(|| self.authorized(Method::PATCH, &url).json(&payload))
            .await?;
        parse_json(response).await
    }

    /// Posts an OTLP/HTTP JSON trace payload.
    pub async fn export_traces(&self, payload: &Value) -> Result<(), TracelaneError> {
        let url = self.url("/api/public/otel/v1/traces");
        self.send_with_retry(|| self.authorized(Method::POST, &url).json(payload))
            .await?;
        Ok(())
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    fn authorized(&self, method: Method, url: &str) -> RequestBuilder {
        let request = self.client.request(method, url);
        match &self.public_key {
            Some(public_key) => request.basic_auth(
                public_key,
                self.secret_key.as_ref().map(|key| key.expose_secret()),
            ),
            None => request,
        }
    }

    async fn send_with_retry<F>(&self, build: F) -> Result<Response, TracelaneError>
    where
        F: Fn() -> RequestBuilder,
    {
        let mut attempt = 0;
        let mut backoff = Duration::from_millis(200);

        loop {
            attempt += 1;
            match build().send().await {
                Ok(response) => {
                    if response.status().is_success() {
                        return Ok(response);
                    }
                    if should_retry(response.status()) && attempt < MAX_ATTEMPTS {
                        backoff = next_delay(
                            response.status(),
                            response.headers(),
                            backoff,
                            self.max_retry_delay,
                        );
                        sleep(backoff).await;
                        continue;
                    }
                    let status = response.status();
                    let body = response.text().await.unwrap_or_default();
                    return Err(TracelaneError::Http { status, body });
                }
                Err(err) => {
                    if (err.is_timeout() || err.is_connect()) && attempt < MAX_ATTEMPTS {
                        sleep(backoff.min(self.max_retry_delay)).await;
                        backoff = backoff.saturating_mul(2);
                        continue;
                    }
                    return Err(TracelaneError::Request(err));
                }
            }
        }
    }
}

async fn parse_json<T: DeserializeOwned>(response: Response) -> Result<T, TracelaneError> {
    response
        .json::<T>()
        .await
        .map_err(|err| TracelaneError::Malformed(err.to_string()))
}

fn should_retry(status: StatusCode) -> bool {
    status.is_server_error() || status == StatusCode::TOO_MANY_REQUESTS
}

fn next_delay(
    status: StatusCode,
    headers: &HeaderMap,
    backoff: Duration,
    max_delay: Duration,
) -> Duration {
    if status == StatusCode::TOO_MANY_REQUESTS {
        if let Some(value) = headers.get("Retry-After").and_then(|v| v.to_str().ok()) {
            if let Ok(seconds) = value.parse::<u64>() {
                return Duration::from_secs(seconds).min(max_delay);
            }
        }
    }
    backoff.saturating_mul(2).min(max_delay)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn retry_after_is_honored_for_rate_limits() {
        let mut headers = HeaderMap::new();
        headers.insert("Retry-After", HeaderValue::from_static("3"));
        let delay = next_delay(
            StatusCode::TOO_MANY_REQUESTS,
            &headers,
            Duration::from_millis(200),
            Duration::from_secs(5),
        );
        assert_eq!(delay, Duration::from_secs(3));
    }

    #[test]
    fn retry_after_is_capped_by_the_request_timeout() {
        let mut headers = HeaderMap::new();
        headers.insert("Retry-After", HeaderValue::from_static("3600"));
        let delay = next_delay(
            StatusCode::TOO_MANY_REQUESTS,
            &headers,
            Duration::from_millis(200),
            Duration::from_secs(1),
        );
        assert_eq!(delay, Duration::from_secs(1));
    }

    #[test]
    fn server_errors_double_the_backoff() {
        let delay = next_delay(
            StatusCode::BAD_GATEWAY,
            &HeaderMap::new(),
            Duration::from_millis(200),
            Duration::from_secs(5),
        );
        assert_eq!(delay, Duration::from_millis(400));
        assert!(should_retry(StatusCode::BAD_GATEWAY));
        assert!(!should_retry(StatusCode::BAD_REQUEST));
    }
}
