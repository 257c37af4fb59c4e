//! Authenticated HTTP transport to the approval service

use std::time::Duration;

use hitl_common::ClientConfig;
use reqwest::{header, Client, Method, Response};
use serde::{de::DeserializeOwned, Serialize};
use tracing::{debug, instrument};

use crate::error::{ApprovalError, Result};

/// HTTP connection with connection pooling and bearer authentication
#[derive(Clone)]
pub struct CloudConnection {
    /// Base URL without trailing slash, e.g. `https://api.humanlayer.dev/humanlayer/v1`
    base_url: String,

    api_key: String,

    /// Client for request/response calls, bounded by the configured timeout
    client: Client,

    /// Client for long-lived streams; only the connect phase is bounded
    stream_client: Client,
}

impl std::fmt::Debug for CloudConnection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CloudConnection")
            .field("base_url", &self.base_url)
            .finish_non_exhaustive()
    }
}

impl CloudConnection {
    /// Build a connection from configuration.
    ///
    /// Fails when the configuration is invalid or no API key is set.
    pub fn new(config: &ClientConfig) -> Result<Self> {
        config.validate()?;
        let api_key = config.require_api_key()?.to_string();
        let timeout = Duration::from_secs(config.http_timeout_secs);

        let client = Client::builder()
            .timeout(timeout)
            .pool_max_idle_per_host(10)
            .pool_idle_timeout(Duration::from_secs(90))
            .build()
            .map_err(|e| ApprovalError::from_transport(&config.api_base_url, e))?;

        let stream_client = Client::builder()
            .connect_timeout(timeout)
            .build()
            .map_err(|e| ApprovalError::from_transport(&config.api_base_url, e))?;

        Ok(Self {
            base_url: config.api_base_url.trim_end_matches('/').to_string(),
            api_key,
            client,
            stream_client,
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    pub fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    /// Send a JSON request and decode a JSON response.
    ///
    /// `resource` and `id` name the addressed record so that 404/409 map to
    /// `NotFound` / `Conflict`; collection endpoints pass `None`.
    #[instrument(skip(self, body))]
    pub async fn request<B, T>(
        &self,
        method: Method,
        path: &str,
        body: Option<&B>,
        resource: &str,
        id: Option<&str>,
    ) -> Result<T>
    where
        B: Serialize + ?Sized,
        T: DeserializeOwned,
    {
        let url = self.url(path);

        let mut request = self
            .client
            .request(method, &url)
            .bearer_auth(&self.api_key)
            .header(header::ACCEPT, "application/json");
        if let Some(body) = body {
            request = request.json(body);
        }

        let response = request
            .send()
            .await
            .map_err(|e| ApprovalError::from_transport(&url, e))?;

        let status = response.status();
        let text = response
            .text()
            .await
            .map_err(|e| ApprovalError::from_transport(&url, e))?;

        debug!("response {} ({} bytes)", status, text.len());

        if !status.is_success() {
            return Err(ApprovalError::from_response(status, &text, resource, id));
        }

        serde_json::from_str(&text).map_err(|e| ApprovalError::Decode {
            endpoint: path.to_string(),
            message: e.to_string(),
        })
    }

    pub async fn get<T: DeserializeOwned>(&self, path: &str, resource: &str, id: Option<&str>) -> Result<T> {
        self.request::<(), T>(Method::GET, path, None, resource, id).await
    }

    pub async fn post<B, T>(&self, path: &str, body: &B, resource: &str, id: Option<&str>) -> Result<T>
    where
        B: Serialize + ?Sized,
        T: DeserializeOwned,
    {
        self.request(Method::POST, path, Some(body), resource, id).await
    }

    /// Open a `text/event-stream` response
    #[instrument(skip(self, query))]
    pub async fn open_stream(&self, path: &str, query: &[(&str, String)]) -> Result<Response> {
        let url = self.url(path);

        let response = self
            .stream_client
            .get(&url)
            .query(query)
            .bearer_auth(&self.api_key)
            .header(header::ACCEPT, "text/event-stream")
            .header(header::CACHE_CONTROL, "no-cache")
            .send()
            .await
            .map_err(|e| ApprovalError::from_transport(&url, e))?;

        let status = response.status();
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            return Err(ApprovalError::from_response(status, &text, "event stream", None));
        }

        Ok(response)
    }
}
