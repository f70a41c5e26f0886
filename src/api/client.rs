//! HTTP layer for the remote inventory API.
//!
//! A single logical operation maps to one [`ApiClient::execute`] call:
//! transport failures are retried, list responses are followed across pages
//! and the response status is classified into an [`Outcome`] or a fatal
//! error.

use std::time::Duration;

use reqwest::header::{HeaderMap, HeaderValue, AUTHORIZATION, CONTENT_TYPE, USER_AGENT};
use reqwest::{Client, RequestBuilder, Response, StatusCode};
use serde_json::{Map, Value};
use tracing::{debug, error, info, warn};

use crate::config::SyncConfig;
use crate::error::{Error, Result};
use crate::model::RecordSchema;

/// Minimum remote API version this client supports.
const MIN_API_VERSION: (u32, u32) = (2, 9);

/// HTTP method of a logical operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Method {
    Get,
    Post,
    Patch,
    Delete,
}

impl Method {
    fn as_reqwest(self) -> reqwest::Method {
        match self {
            Self::Get => reqwest::Method::GET,
            Self::Post => reqwest::Method::POST,
            Self::Patch => reqwest::Method::PATCH,
            Self::Delete => reqwest::Method::DELETE,
        }
    }

    fn as_str(self) -> &'static str {
        match self {
            Self::Get => "GET",
            Self::Post => "POST",
            Self::Patch => "PATCH",
            Self::Delete => "DELETE",
        }
    }
}

/// Classified result of a single operation.
#[derive(Debug, Clone, PartialEq)]
pub enum Outcome {
    /// 200/201 payload, pagination already flattened.
    Payload(Value),
    /// 204, the record is gone.
    Deleted,
    /// Non-fatal client error; the operation was logged and dropped.
    Abandoned,
}

impl Outcome {
    /// Payload value, if any.
    pub fn into_payload(self) -> Option<Value> {
        match self {
            Self::Payload(value) => Some(value),
            _ => None,
        }
    }
}

/// Client for the remote inventory API.
pub struct ApiClient {
    config: SyncConfig,
    http: Client,
}

impl ApiClient {
    pub fn new(config: &SyncConfig) -> Result<Self> {
        let mut headers = HeaderMap::new();
        let token = format!("Token {}", config.api_token);
        headers.insert(
            AUTHORIZATION,
            HeaderValue::from_str(&token)
                .map_err(|_| Error::Config("api_token contains invalid characters".into()))?,
        );
        headers.insert(
            USER_AGENT,
            HeaderValue::from_static(concat!("racksync/", env!("CARGO_PKG_VERSION"))),
        );
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));

        let http = Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .default_headers(headers)
            .danger_accept_invalid_certs(!config.validate_tls)
            .build()
            .map_err(|e| Error::Config(format!("failed to build HTTP client: {e}")))?;

        Ok(Self {
            config: config.clone(),
            http,
        })
    }

    /// Read the remote API version from the root endpoint and verify it
    /// against the supported minimum.
    pub async fn probe_version(&self) -> Result<String> {
        let url = format!("{}/api/", self.config.base_url.trim_end_matches('/'));
        let response = self.send_with_retry(self.http.get(&url)).await?;

        let version = response
            .headers()
            .get("API-Version")
            .and_then(|v| v.to_str().ok())
            .map(str::to_string)
            .ok_or_else(|| Error::ApiVersion("'API-Version' response header missing".into()))?;

        let mut parts = version.split('.').map(|p| p.parse::<u32>().unwrap_or(0));
        let parsed = (parts.next().unwrap_or(0), parts.next().unwrap_or(0));
        if parsed < MIN_API_VERSION {
            return Err(Error::ApiVersion(format!(
                "remote API version '{version}' not supported, minimum is {}.{}",
                MIN_API_VERSION.0, MIN_API_VERSION.1
            )));
        }

        info!(%version, "connected to remote inventory API");
        Ok(version)
    }

    /// Perform one logical operation against a record type endpoint.
    ///
    /// GET list responses transparently follow the `next` locator and return
    /// the concatenated results in server order.
    pub async fn execute(
        &self,
        schema: &RecordSchema,
        method: Method,
        data: Option<&Map<String, Value>>,
        params: &[(&str, String)],
        id: Option<i64>,
    ) -> Result<Outcome> {
        let mut url = format!(
            "{}/api/{}/",
            self.config.base_url.trim_end_matches('/'),
            schema.api_path
        );
        if let Some(id) = id {
            url.push_str(&format!("{id}/"));
        }

        let mut query: Vec<(String, String)> =
            params.iter().map(|(k, v)| (k.to_string(), v.clone())).collect();
        if method == Method::Get {
            if !query.iter().any(|(k, _)| k == "limit") {
                query.push(("limit".into(), self.config.page_limit.to_string()));
            }
            // config contexts can be huge and are never synchronized
            query.push(("exclude".into(), "config_context".into()));
        }

        let mut request = self.http.request(method.as_reqwest(), &url).query(&query);
        if let Some(data) = data {
            request = request.json(data);
        }

        let response = self.send_with_retry(request).await?;
        let status = response.status();

        match status {
            StatusCode::OK => {
                let mut payload = self.read_json(response).await?;
                if method == Method::Get {
                    self.follow_pagination(schema, &mut payload).await?;
                }
                Ok(Outcome::Payload(payload))
            }
            StatusCode::CREATED => {
                let payload = self.read_json(response).await?;
                let name = payload
                    .get(&schema.primary_key)
                    .map(Value::to_string)
                    .unwrap_or_default();
                info!("remote API created {} record {name}", schema.name);
                Ok(Outcome::Payload(payload))
            }
            StatusCode::NO_CONTENT => {
                info!("remote API deleted {} record", schema.name);
                Ok(Outcome::Deleted)
            }
            StatusCode::FORBIDDEN => {
                let detail = self.error_detail(response).await;
                Err(Error::Auth(detail))
            }
            status if status.is_client_error() => {
                let detail = self.error_detail(response).await;
                error!(
                    "remote API returned {} for {} {url}: {detail}",
                    status.as_u16(),
                    method.as_str()
                );
                Ok(Outcome::Abandoned)
            }
            status if status.is_server_error() => {
                let detail = self.error_detail(response).await;
                Err(Error::remote_server(status.as_u16(), detail))
            }
            status => {
                warn!(
                    "remote API returned unexpected status {} for {} {url}",
                    status.as_u16(),
                    method.as_str()
                );
                Ok(Outcome::Abandoned)
            }
        }
    }

    /// Follow the `next` locator of a paginated list response, appending
    /// each page's results to the first page in server order.
    async fn follow_pagination(&self, schema: &RecordSchema, payload: &mut Value) -> Result<()> {
        loop {
            let Some(next) = payload.get("next").and_then(Value::as_str).map(str::to_string)
            else {
                return Ok(());
            };
            debug!("results are paginated, requesting next page");

            let response = self.send_with_retry(self.http.get(&next)).await?;
            if response.status() != StatusCode::OK {
                return Err(Error::remote_server(
                    response.status().as_u16(),
                    format!("pagination request for {} failed", schema.name),
                ));
            }
            let page = self.read_json(response).await?;

            let page_results = page
                .get("results")
                .and_then(Value::as_array)
                .cloned()
                .ok_or_else(|| Error::missing_results(&schema.name))?;
            let results = payload
                .get_mut("results")
                .and_then(Value::as_array_mut)
                .ok_or_else(|| Error::missing_results(&schema.name))?;
            results.extend(page_results);

            payload["next"] = page.get("next").cloned().unwrap_or(Value::Null);
        }
    }

    /// Send a request, retrying transport-level failures immediately up to
    /// the configured attempt count. Exhausting all attempts is fatal.
    async fn send_with_retry(&self, request: RequestBuilder) -> Result<Response> {
        let attempts = self.config.max_retry_attempts;
        let mut last_error = String::new();

        for attempt in 1..=attempts {
            let prepared = request.try_clone().ok_or_else(|| {
                Error::transport(attempt, "request body is not replayable".to_string())
            })?;
            match prepared.send().await {
                Ok(response) => {
                    debug!("received HTTP status {}", response.status().as_u16());
                    return Ok(response);
                }
                Err(e) => {
                    last_error = e.to_string();
                    warn!("request failed, trying again: {last_error}");
                }
            }
        }

        Err(Error::transport(attempts, last_error))
    }

    async fn read_json(&self, response: Response) -> Result<Value> {
        let body = response
            .text()
            .await
            .map_err(|e| Error::transport(1, format!("failed to read response body: {e}")))?;
        Ok(serde_json::from_str(&body)?)
    }

    async fn error_detail(&self, response: Response) -> String {
        let status = response.status();
        match response.text().await {
            Ok(body) if !body.is_empty() => {
                match serde_json::from_str::<Value>(&body) {
                    Ok(parsed) => parsed
                        .get("detail")
                        .and_then(Value::as_str)
                        .map(str::to_string)
                        .unwrap_or(body),
                    Err(_) => body,
                }
            }
            _ => status.to_string(),
        }
    }
}
