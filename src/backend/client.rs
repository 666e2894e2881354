//! HTTP client for the hosted backend's REST table API with secure
//! credential handling and safe logging.

use std::time::Instant;

use reqwest::header::{HeaderMap, HeaderValue, USER_AGENT};
use reqwest::{Method, RequestBuilder, Response, StatusCode};
use secrecy::{ExposeSecret, SecretString};
use serde::Deserialize;
use tracing::{info, warn};
use url::Url;

use crate::config::BackendConfig;
use crate::error::AppError;

// ─────────────────────────────────────────────────────────────────────────────
// Constants
// ─────────────────────────────────────────────────────────────────────────────

/// User agent string for all backend requests.
const CLIENT_USER_AGENT: &str = concat!("flashcards-import/", env!("CARGO_PKG_VERSION"));

/// Path prefix of the REST table API.
const REST_PREFIX: &str = "/rest/v1";

/// Query parameter keys (case-insensitive) that should have their values redacted.
const SENSITIVE_QUERY_PARAMS: &[&str] = &[
    "apikey",
    "api_key",
    "access_token",
    "refresh_token",
    "token",
    "authorization",
];

// ─────────────────────────────────────────────────────────────────────────────
// LoggingMode
// ─────────────────────────────────────────────────────────────────────────────

/// Controls how URLs are sanitized for logging.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum LoggingMode {
    /// Log only the path component. Strips scheme, host, query, and fragment.
    /// Example: `/rest/v1/flashcards`
    #[default]
    PathOnly,

    /// Log path and query parameters, but redact sensitive values.
    /// Example: `/rest/v1/flashcards?folder_id=eq.42&apikey=***`
    PathAndQueryRedacted,
}

// ─────────────────────────────────────────────────────────────────────────────
// URL Sanitization
// ─────────────────────────────────────────────────────────────────────────────

fn is_sensitive_param(key: &str) -> bool {
    let key_lower = key.to_ascii_lowercase();
    SENSITIVE_QUERY_PARAMS
        .iter()
        .any(|&sensitive| key_lower == sensitive)
}

/// Sanitizes a URL for safe logging based on the specified mode.
///
/// The result never contains the scheme, host, or fragment.
pub fn sanitize_url_for_logs(url: &Url, mode: LoggingMode) -> String {
    let path = url.path();

    match mode {
        LoggingMode::PathOnly => path.to_string(),
        LoggingMode::PathAndQueryRedacted => {
            let query_pairs: Vec<_> = url.query_pairs().collect();
            if query_pairs.is_empty() {
                return path.to_string();
            }

            let redacted_pairs: Vec<String> = query_pairs
                .into_iter()
                .map(|(key, value)| {
                    if is_sensitive_param(&key) {
                        format!("{}=***", key)
                    } else {
                        format!("{}={}", key, value)
                    }
                })
                .collect();

            format!("{}?{}", path, redacted_pairs.join("&"))
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Error Body
// ─────────────────────────────────────────────────────────────────────────────

/// Error body returned by the REST table API.
#[derive(Debug, Deserialize)]
struct RestErrorBody {
    #[serde(default)]
    code: Option<String>,
    #[serde(default)]
    message: Option<String>,
    #[serde(default)]
    details: Option<String>,
    #[serde(default)]
    hint: Option<String>,
}

impl RestErrorBody {
    fn describe(&self) -> Option<String> {
        let message = self.message.as_deref().filter(|m| !m.is_empty())?;
        let mut out = match self.code.as_deref() {
            Some(code) if !code.is_empty() => format!("[{}] {}", code, message),
            _ => message.to_string(),
        };
        if let Some(details) = self.details.as_deref().filter(|d| !d.is_empty()) {
            out.push_str(&format!(" ({})", details));
        }
        if let Some(hint) = self.hint.as_deref().filter(|h| !h.is_empty()) {
            out.push_str(&format!(" Hint: {}", hint));
        }
        Some(out)
    }
}

/// Maps an unsuccessful response to the matching `AppError`.
pub(crate) async fn parse_error_response(response: Response, status: StatusCode) -> AppError {
    if status == StatusCode::TOO_MANY_REQUESTS {
        let retry_after = response
            .headers()
            .get("Retry-After")
            .and_then(|v| v.to_str().ok())
            .and_then(|s| s.trim().parse::<u64>().ok());
        return AppError::RateLimited {
            retry_after_secs: retry_after,
        };
    }

    if status == StatusCode::PAYLOAD_TOO_LARGE {
        return AppError::PayloadTooLarge(format!(
            "HTTP {} - {}",
            status.as_u16(),
            status.canonical_reason().unwrap_or("Payload Too Large")
        ));
    }

    if status == StatusCode::UNAUTHORIZED {
        warn!("[CARDS] Backend rejected credentials");
    }

    let body = response
        .text()
        .await
        .unwrap_or_else(|_| String::from("Unable to read error body"));

    let message = serde_json::from_str::<RestErrorBody>(&body)
        .ok()
        .and_then(|b| b.describe())
        .unwrap_or_else(|| {
            status
                .canonical_reason()
                .unwrap_or("Unknown error")
                .to_string()
        });

    AppError::Backend {
        status: status.as_u16(),
        message,
    }
}

/// Maps a transport failure, keeping timeouts distinct.
fn map_send_error(e: &reqwest::Error) -> AppError {
    if e.is_timeout() {
        AppError::Timeout
    } else {
        AppError::ConnectionFailed("Connection to backend failed".to_string())
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// SupabaseClient
// ─────────────────────────────────────────────────────────────────────────────

/// Client for the backend's REST table API.
///
/// Cheap to clone; clones share the connection pool.
#[derive(Clone)]
pub struct SupabaseClient {
    http: reqwest::Client,
    base_url: Url,
    api_key: SecretString,
    access_token: Option<SecretString>,
    table: String,
    logging_mode: LoggingMode,
}

impl std::fmt::Debug for SupabaseClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SupabaseClient")
            .field("table", &self.table)
            .field("api_key", &"[REDACTED]")
            .field("access_token", &self.access_token.as_ref().map(|_| "[REDACTED]"))
            .field("logging_mode", &self.logging_mode)
            .finish()
    }
}

impl SupabaseClient {
    /// Creates a client from backend settings.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Internal` if the HTTP client fails to initialize.
    pub fn new(config: &BackendConfig) -> Result<Self, AppError> {
        let http = build_http_client(config)?;
        Ok(Self {
            http,
            base_url: config.base_url.clone(),
            api_key: config.api_key.clone(),
            access_token: config.access_token.clone(),
            table: config.table.clone(),
            logging_mode: LoggingMode::default(),
        })
    }

    /// Updates the logging mode for URL sanitization.
    pub fn with_logging_mode(mut self, mode: LoggingMode) -> Self {
        self.logging_mode = mode;
        self
    }

    /// Table the client reads and writes.
    pub fn table(&self) -> &str {
        &self.table
    }

    /// Builds `{base}/rest/v1/{table}`.
    pub(crate) fn table_url(&self) -> Result<Url, AppError> {
        let path = format!("{}/{}", REST_PREFIX, self.table);
        self.base_url
            .join(&path)
            .map_err(|e| AppError::Internal(format!("Failed to build table URL: {}", e)))
    }

    /// Starts a request carrying the API key and bearer token.
    pub(crate) fn request(&self, method: Method, url: Url) -> RequestBuilder {
        let bearer = self
            .access_token
            .as_ref()
            .unwrap_or(&self.api_key)
            .expose_secret();

        self.http
            .request(method, url)
            .header("apikey", self.api_key.expose_secret())
            .bearer_auth(bearer)
    }

    /// Sends a request with timing and logging. Only method, sanitized path,
    /// status and duration are logged.
    pub(crate) async fn execute(
        &self,
        method: &Method,
        url: &Url,
        request: RequestBuilder,
    ) -> Result<Response, AppError> {
        let start = Instant::now();
        let sanitized_url = sanitize_url_for_logs(url, self.logging_mode);

        let result = request.send().await;
        let duration_ms = start.elapsed().as_millis();

        match result {
            Ok(response) => {
                info!(
                    "[CARDS] {} {} {} {}ms",
                    method,
                    sanitized_url,
                    response.status().as_u16(),
                    duration_ms
                );
                Ok(response)
            }
            Err(e) => {
                info!(
                    "[CARDS] {} {} FAILED {}ms",
                    method, sanitized_url, duration_ms
                );
                Err(map_send_error(&e))
            }
        }
    }
}

/// Creates the HTTP client with the user agent and request timeout.
fn build_http_client(config: &BackendConfig) -> Result<reqwest::Client, AppError> {
    let mut headers = HeaderMap::new();
    headers.insert(USER_AGENT, HeaderValue::from_static(CLIENT_USER_AGENT));

    reqwest::Client::builder()
        .default_headers(headers)
        .timeout(config.timeout)
        .build()
        .map_err(|e| AppError::Internal(format!("Failed to build HTTP client: {}", e)))
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
