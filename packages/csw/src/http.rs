//! HTTP transport for catalogue and OGC service requests.

use std::time::Duration;

use reqwest::header::CONTENT_TYPE;
use reqwest::Client;

use crate::config::{DEFAULT_MAX_RETRIES, HTTP_TIMEOUT_SECS};
use crate::error::{CswError, Result};
use crate::request::{HttpMethod, RequestSpec};

/// User agent string identifying this harvester.
const USER_AGENT: &str = concat!("geoharvest/", env!("CARGO_PKG_VERSION"));

/// Base delay for exponential backoff (milliseconds).
const RETRY_BASE_DELAY_MS: u64 = 500;

/// Basic-auth credentials, used by CSW-T endpoints.
#[derive(Clone, PartialEq, Eq)]
pub struct Credentials {
    pub username: String,
    pub password: Option<String>,
}

impl std::fmt::Debug for Credentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Credentials")
            .field("username", &self.username)
            .field("password", &self.password.as_ref().map(|_| "<redacted>"))
            .finish()
    }
}

/// Transport options for one service endpoint.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HttpOptions {
    pub timeout: Duration,
    pub proxy: Option<String>,
    pub accept_invalid_certs: bool,
    pub max_retries: u32,
    pub credentials: Option<Credentials>,
}

impl Default for HttpOptions {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(HTTP_TIMEOUT_SECS),
            proxy: None,
            accept_invalid_certs: false,
            max_retries: DEFAULT_MAX_RETRIES,
            credentials: None,
        }
    }
}

/// Create a configured HTTP client.
pub fn create_client(options: &HttpOptions) -> Result<Client> {
    let mut builder = Client::builder()
        .timeout(options.timeout)
        .user_agent(USER_AGENT);

    if let Some(proxy) = &options.proxy {
        let proxy = reqwest::Proxy::all(proxy)
            .map_err(|e| CswError::InvalidOption(format!("invalid proxy '{proxy}': {e}")))?;
        builder = builder.proxy(proxy);
    }

    if options.accept_invalid_certs {
        tracing::warn!("TLS certificate verification disabled");
        builder = builder.danger_accept_invalid_certs(true);
    }

    Ok(builder.build()?)
}

/// Execute a request with retry logic and return the response body.
///
/// Uses exponential backoff for transient failures (network errors, timeouts,
/// 5xx responses). Client errors (4xx) are returned immediately.
pub async fn send_text(client: &Client, request: &RequestSpec, options: &HttpOptions) -> Result<String> {
    let attempts = options.max_retries.max(1);
    let mut last_error: Option<String> = None;

    for attempt in 0..attempts {
        if attempt > 0 {
            // Exponential backoff: 500ms, 1000ms, 2000ms, ...
            let delay = RETRY_BASE_DELAY_MS * (1 << (attempt - 1).min(6));
            tracing::debug!(attempt, delay_ms = delay, url = %request.url, "Retrying after delay");
            tokio::time::sleep(Duration::from_millis(delay)).await;
        }

        let mut builder = match request.method {
            HttpMethod::Get => client.get(request.url.clone()),
            HttpMethod::Post => client
                .post(request.url.clone())
                .header(CONTENT_TYPE, "application/xml; charset=utf-8")
                .body(request.body.clone().unwrap_or_default()),
        };
        if let Some(credentials) = &options.credentials {
            builder = builder.basic_auth(&credentials.username, credentials.password.as_ref());
        }

        match builder.send().await {
            Ok(response) => {
                let status = response.status();

                if status.is_server_error() {
                    tracing::warn!(
                        status = %status,
                        attempt = attempt + 1,
                        max_retries = attempts,
                        url = %request.url,
                        "Server error, will retry"
                    );
                    last_error = Some(format!("Server error: {status}"));
                    continue;
                }

                if !status.is_success() {
                    return Err(CswError::Status {
                        status: status.as_u16(),
                        url: request.url.to_string(),
                    });
                }

                return Ok(response.text().await?);
            }
            Err(e) => {
                if e.is_connect() || e.is_timeout() {
                    tracing::warn!(
                        error = %e,
                        attempt = attempt + 1,
                        max_retries = attempts,
                        url = %request.url,
                        "Connection error, will retry"
                    );
                    last_error = Some(e.to_string());
                    continue;
                }
                return Err(CswError::Http(e));
            }
        }
    }

    Err(CswError::RetriesExhausted {
        attempts,
        message: last_error.unwrap_or_else(|| "Unknown error".to_string()),
    })
}
