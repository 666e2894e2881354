//! Runtime configuration read from the environment.
//!
//! Values come from process environment variables, optionally seeded from a
//! `.env` file in the working directory. Secrets are wrapped in
//! `SecretString` as soon as they are read.

use std::time::Duration;

use secrecy::SecretString;
use tracing::debug;
use url::Url;

use crate::error::AppError;
use crate::import::writer::{
    RetryPolicy, DEFAULT_BATCH_SIZE, DEFAULT_INTER_BATCH_DELAY, DEFAULT_REQUEST_TIMEOUT,
};

// ─────────────────────────────────────────────────────────────────────────────
// Environment Keys
// ─────────────────────────────────────────────────────────────────────────────

pub const ENV_SUPABASE_URL: &str = "SUPABASE_URL";
pub const ENV_SUPABASE_ANON_KEY: &str = "SUPABASE_ANON_KEY";
pub const ENV_SUPABASE_ACCESS_TOKEN: &str = "SUPABASE_ACCESS_TOKEN";
pub const ENV_USER_ID: &str = "FLASHCARDS_USER_ID";
pub const ENV_TABLE: &str = "FLASHCARDS_TABLE";
pub const ENV_BATCH_SIZE: &str = "FLASHCARDS_IMPORT_BATCH_SIZE";
pub const ENV_DELAY_MS: &str = "FLASHCARDS_IMPORT_DELAY_MS";
pub const ENV_MAX_RETRIES: &str = "FLASHCARDS_IMPORT_MAX_RETRIES";
pub const ENV_BASE_DELAY_MS: &str = "FLASHCARDS_IMPORT_BASE_DELAY_MS";
pub const ENV_REQUEST_TIMEOUT_SECS: &str = "FLASHCARDS_REQUEST_TIMEOUT_SECS";

/// Table holding flashcards when `FLASHCARDS_TABLE` is not set.
pub const DEFAULT_TABLE: &str = "flashcards";

// ─────────────────────────────────────────────────────────────────────────────
// BackendConfig
// ─────────────────────────────────────────────────────────────────────────────

/// Connection settings for the hosted backend.
#[derive(Clone)]
pub struct BackendConfig {
    /// Project URL, e.g. `https://xyz.supabase.co`.
    pub base_url: Url,
    /// Public API key sent as the `apikey` header.
    pub api_key: SecretString,
    /// Signed-in user's token; the API key is used as bearer when absent.
    pub access_token: Option<SecretString>,
    /// Table the flashcards are stored in.
    pub table: String,
    /// Overall per-request timeout of the HTTP client.
    pub timeout: Duration,
}

impl std::fmt::Debug for BackendConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BackendConfig")
            .field("base_url", &self.base_url.as_str())
            .field("api_key", &"[REDACTED]")
            .field("access_token", &self.access_token.as_ref().map(|_| "[REDACTED]"))
            .field("table", &self.table)
            .field("timeout", &self.timeout)
            .finish()
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// ImportSettings
// ─────────────────────────────────────────────────────────────────────────────

/// Tuning of the batch writer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImportSettings {
    pub batch_size: usize,
    pub inter_batch_delay: Duration,
    pub retry: RetryPolicy,
    pub request_timeout: Duration,
}

impl Default for ImportSettings {
    fn default() -> Self {
        Self {
            batch_size: DEFAULT_BATCH_SIZE,
            inter_batch_delay: DEFAULT_INTER_BATCH_DELAY,
            retry: RetryPolicy::default(),
            request_timeout: DEFAULT_REQUEST_TIMEOUT,
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Config
// ─────────────────────────────────────────────────────────────────────────────

/// Everything the importer needs to run.
#[derive(Debug, Clone)]
pub struct Config {
    pub backend: BackendConfig,
    /// Owner of imported cards, if known ahead of time.
    pub user_id: Option<String>,
    pub import: ImportSettings,
}

impl Config {
    /// Loads `.env` (if present) and reads the process environment.
    pub fn from_env() -> Result<Self, AppError> {
        match dotenvy::dotenv() {
            Ok(path) => debug!("[CONFIG] Loaded environment from {}", path.display()),
            Err(e) if e.not_found() => {}
            Err(e) => return Err(AppError::Config(format!("Failed to read .env file: {}", e))),
        }

        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Builds the configuration from an arbitrary key lookup.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, AppError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        let raw_url = get(ENV_SUPABASE_URL)
            .ok_or_else(|| AppError::Config(format!("{} is not set", ENV_SUPABASE_URL)))?;
        let base_url = Url::parse(raw_url.trim())
            .map_err(|e| AppError::Config(format!("{} is not a valid URL: {}", ENV_SUPABASE_URL, e)))?;
        if !matches!(base_url.scheme(), "http" | "https") {
            return Err(AppError::Config(format!(
                "{} must use http or https",
                ENV_SUPABASE_URL
            )));
        }

        let api_key = get(ENV_SUPABASE_ANON_KEY)
            .map(SecretString::from)
            .ok_or_else(|| AppError::Config(format!("{} is not set", ENV_SUPABASE_ANON_KEY)))?;

        let defaults = ImportSettings::default();

        let request_timeout = parse_number(&get, ENV_REQUEST_TIMEOUT_SECS)?
            .map(Duration::from_secs)
            .unwrap_or(defaults.request_timeout);
        if request_timeout.is_zero() {
            return Err(AppError::Config(format!(
                "{} must be greater than zero",
                ENV_REQUEST_TIMEOUT_SECS
            )));
        }

        let batch_size = parse_number(&get, ENV_BATCH_SIZE)?
            .map(|n| n as usize)
            .unwrap_or(defaults.batch_size);
        if batch_size == 0 {
            return Err(AppError::Config(format!(
                "{} must be greater than zero",
                ENV_BATCH_SIZE
            )));
        }

        let import = ImportSettings {
            batch_size,
            inter_batch_delay: parse_number(&get, ENV_DELAY_MS)?
                .map(Duration::from_millis)
                .unwrap_or(defaults.inter_batch_delay),
            retry: RetryPolicy {
                max_retries: parse_number(&get, ENV_MAX_RETRIES)?
                    .map(|n| n.min(u32::MAX as u64) as u32)
                    .unwrap_or(defaults.retry.max_retries),
                base_delay: parse_number(&get, ENV_BASE_DELAY_MS)?
                    .map(Duration::from_millis)
                    .unwrap_or(defaults.retry.base_delay),
                max_jitter: defaults.retry.max_jitter,
            },
            request_timeout,
        };

        Ok(Self {
            backend: BackendConfig {
                base_url,
                api_key,
                access_token: get(ENV_SUPABASE_ACCESS_TOKEN).map(SecretString::from),
                table: get(ENV_TABLE).unwrap_or_else(|| DEFAULT_TABLE.to_string()),
                // The HTTP client limit sits above the per-insert limit so the
                // writer's own timeout is the one that fires.
                timeout: request_timeout + Duration::from_secs(5),
            },
            user_id: get(ENV_USER_ID),
            import,
        })
    }
}

fn parse_number<G>(get: &G, key: &str) -> Result<Option<u64>, AppError>
where
    G: Fn(&str) -> Option<String>,
{
    get(key)
        .map(|raw| {
            raw.trim().parse::<u64>().map_err(|_| {
                AppError::Config(format!("{} must be a non-negative integer, got {:?}", key, raw))
            })
        })
        .transpose()
}
