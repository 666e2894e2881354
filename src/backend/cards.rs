//! Flashcard table operations: bulk insert and per-folder refetch.
//!
//! Card contents are never logged; only row counts and redacted ids are.

use std::future::Future;
use std::pin::Pin;

use reqwest::Method;
use serde::{Deserialize, Serialize};
use tracing::info;
use uuid::Uuid;

use crate::backend::client::{parse_error_response, SupabaseClient};
use crate::error::AppError;
use crate::import::row::ImportRow;
use crate::import::writer::RowSink;

/// Insert preferences: no response body, and rows whose id is already stored
/// are skipped instead of failing the batch with a duplicate key.
const INSERT_PREFER: &str = "return=minimal,resolution=ignore-duplicates";

/// Columns selected when refetching cards.
const CARD_COLUMNS: &str = "id,user_id,front,back,known,folder_id";

/// A stored flashcard as returned by the backend.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CardRecord {
    pub id: Uuid,
    pub user_id: String,
    pub front: String,
    pub back: String,
    #[serde(default)]
    pub known: bool,
    #[serde(default)]
    pub folder_id: Option<String>,
}

impl SupabaseClient {
    /// Inserts all rows in a single request. The backend stores either every
    /// row or none of them.
    ///
    /// # Errors
    ///
    /// - `AppError::PayloadTooLarge` - request body rejected as too large
    /// - `AppError::RateLimited` - HTTP 429
    /// - `AppError::Backend` - any other error status
    /// - `AppError::Timeout` / `AppError::ConnectionFailed` - transport failure
    pub async fn insert_cards(&self, rows: &[ImportRow]) -> Result<(), AppError> {
        if rows.is_empty() {
            return Ok(());
        }

        let url = self.table_url()?;
        let request = self
            .request(Method::POST, url.clone())
            .header("Prefer", INSERT_PREFER)
            .json(rows);

        info!("[CARDS] Inserting {} rows into {}", rows.len(), self.table());

        let response = self.execute(&Method::POST, &url, request).await?;
        let status = response.status();

        if !status.is_success() {
            return Err(parse_error_response(response, status).await);
        }

        Ok(())
    }

    /// Fetches every card stored in a folder.
    pub async fn fetch_cards(&self, folder_id: &str) -> Result<Vec<CardRecord>, AppError> {
        let mut url = self.table_url()?;
        url.query_pairs_mut()
            .append_pair("select", CARD_COLUMNS)
            .append_pair("folder_id", &format!("eq.{}", folder_id));

        info!("[CARDS] Refetching cards for folder {}", redact_id(folder_id));

        let request = self.request(Method::GET, url.clone());
        let response = self.execute(&Method::GET, &url, request).await?;
        let status = response.status();

        if !status.is_success() {
            return Err(parse_error_response(response, status).await);
        }

        response.json().await.map_err(|e| AppError::Backend {
            status: status.as_u16(),
            message: format!("Failed to parse cards response: {}", e),
        })
    }
}

impl RowSink for SupabaseClient {
    fn insert_rows<'a>(
        &'a self,
        rows: &'a [ImportRow],
    ) -> Pin<Box<dyn Future<Output = Result<(), AppError>> + Send + 'a>> {
        Box::pin(self.insert_cards(rows))
    }
}

/// Redacts an id for logging (shows first 8 chars).
fn redact_id(id: &str) -> String {
    match id.char_indices().nth(8) {
        Some((idx, _)) => format!("{}...", &id[..idx]),
        None => id.to_string(),
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
