use super::transport::{Transport, TransportError};
use bytes::Bytes;
use flate2::{Compression, write::GzEncoder};
use reqwest::header::{CONTENT_ENCODING, CONTENT_TYPE, HeaderMap, HeaderName, HeaderValue};
use reqwest::{Client, ClientBuilder};
use std::io::Write;
use std::time::Duration;
use thiserror::Error;
use tracing::debug;
use url::Url;

pub const DEFAULT_INGEST_ENDPOINT: &str = "https://ingest.amberflo.io";

const API_KEY_HEADER: &str = "x-api-key";

#[derive(Error, Debug)]
pub enum ClientError {
    #[error("Invalid configuration: {0}")]
    InvalidConfiguration(String),
    #[error("Network error: {0}")]
    NetworkError(#[from] reqwest::Error),
}

#[derive(Clone)]
pub struct ClientConfig {
    pub endpoint: String,
    pub api_key: String,
    pub timeout: Duration,
    pub connection_timeout: Duration,
    pub max_idle_connections: usize,
    pub keep_alive_timeout: Duration,
    pub user_agent: String,
    pub enable_compression: bool,
}

impl ClientConfig {
    pub fn new(api_key: impl Into<String>) -> Self {
        Self {
            api_key: api_key.into(),
            ..Self::default()
        }
    }
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            endpoint: DEFAULT_INGEST_ENDPOINT.to_string(),
            api_key: String::new(),
            timeout: Duration::from_secs(30),
            connection_timeout: Duration::from_secs(10),
            max_idle_connections: 20,
            keep_alive_timeout: Duration::from_secs(60),
            user_agent: format!("meter-ingest/{}", env!("CARGO_PKG_VERSION")),
            enable_compression: false,
        }
    }
}

impl std::fmt::Debug for ClientConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ClientConfig")
            .field("endpoint", &self.endpoint)
            .field("api_key", &"<redacted>")
            .field("timeout", &self.timeout)
            .field("connection_timeout", &self.connection_timeout)
            .field("max_idle_connections", &self.max_idle_connections)
            .field("keep_alive_timeout", &self.keep_alive_timeout)
            .field("user_agent", &self.user_agent)
            .field("enable_compression", &self.enable_compression)
            .finish()
    }
}

/// HTTP transport posting JSON batches to `{endpoint}/ingest`.
#[derive(Debug, Clone)]
pub struct HttpClient {
    client: Client,
    config: ClientConfig,
    ingest_url: Url,
    headers: HeaderMap,
}

impl HttpClient {
    pub fn new(config: ClientConfig) -> Result<Self, ClientError> {
        if config.api_key.trim().is_empty() {
            return Err(ClientError::InvalidConfiguration(
                "API key must not be empty".to_string(),
            ));
        }

        let endpoint_url: Url = config
            .endpoint
            .parse()
            .map_err(|e| ClientError::InvalidConfiguration(format!("Invalid endpoint URL: {e}")))?;
        let ingest_url = ingest_url_for(&endpoint_url);

        let client = ClientBuilder::new()
            .timeout(config.timeout)
            .connect_timeout(config.connection_timeout)
            .pool_max_idle_per_host(config.max_idle_connections)
            .pool_idle_timeout(config.keep_alive_timeout)
            .user_agent(&config.user_agent)
            .gzip(true)
            .build()
            .map_err(|e| {
                ClientError::InvalidConfiguration(format!("Failed to build HTTP client: {e}"))
            })?;

        let headers = build_headers(&config)?;

        Ok(Self {
            client,
            config,
            ingest_url,
            headers,
        })
    }

    async fn post(&self, payload: Bytes) -> Result<Bytes, TransportError> {
        let mut request = self
            .client
            .post(self.ingest_url.clone())
            .headers(self.headers.clone());

        request = if self.config.enable_compression {
            let compressed = gzip(&payload)
                .map_err(|e| TransportError::InvalidRequest(format!("gzip failed: {e}")))?;
            request
                .header(CONTENT_ENCODING, HeaderValue::from_static("gzip"))
                .body(compressed)
        } else {
            request.body(payload)
        };

        let response = request.send().await.map_err(|e| {
            if e.is_timeout() {
                TransportError::Timeout(self.config.timeout)
            } else {
                TransportError::Request(e.to_string())
            }
        })?;

        let status = response.status();
        let body = response
            .bytes()
            .await
            .map_err(|e| TransportError::Request(format!("Failed to read response body: {e}")))?;

        if status.as_u16() < 400 {
            debug!(url = %self.ingest_url, status = %status, "Ingest API response");
            Ok(body)
        } else {
            Err(TransportError::Status {
                status: status.as_u16(),
                body: String::from_utf8_lossy(&body).into_owned(),
            })
        }
    }
}

impl Transport for HttpClient {
    fn send(
        &self,
        payload: Bytes,
    ) -> impl std::future::Future<Output = Result<Bytes, TransportError>> + Send {
        self.post(payload)
    }
}

fn ingest_url_for(endpoint: &Url) -> Url {
    if endpoint.path().trim_end_matches('/').ends_with("/ingest") {
        return endpoint.clone();
    }
    let mut url = endpoint.clone();
    let base = endpoint.path().trim_end_matches('/');
    url.set_path(&format!("{base}/ingest"));
    url
}

fn build_headers(config: &ClientConfig) -> Result<HeaderMap, ClientError> {
    let mut headers = HeaderMap::new();
    headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));

    let mut api_key = HeaderValue::from_str(&config.api_key)
        .map_err(|e| ClientError::InvalidConfiguration(format!("Invalid API key: {e}")))?;
    api_key.set_sensitive(true);
    headers.insert(HeaderName::from_static(API_KEY_HEADER), api_key);

    Ok(headers)
}

fn gzip(data: &[u8]) -> std::io::Result<Vec<u8>> {
    let mut encoder = GzEncoder::new(Vec::new(), Compression::fast());
    encoder.write_all(data)?;
    encoder.finish()
}
