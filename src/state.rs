//! Application state shared by the import commands.

use std::sync::Arc;
use tokio::sync::RwLock;

use crate::backend::{LoggingMode, SupabaseClient};
use crate::config::{Config, ImportSettings};
use crate::error::AppError;

// ─────────────────────────────────────────────────────────────────────────────
// Application State
// ─────────────────────────────────────────────────────────────────────────────

/// State shared across commands.
///
/// Constructed once at startup and passed by reference; there is no global
/// client instance.
pub struct AppState {
    /// Backend client used for inserts and refetches.
    pub client: Arc<SupabaseClient>,
    /// Batch writer tuning.
    pub settings: ImportSettings,
    /// Signed-in user, if any.
    /// Protected by RwLock for thread-safe read/write access.
    pub user_id: RwLock<Option<String>>,
    /// Folder selected as the import destination, if any.
    pub import_folder_id: RwLock<Option<String>>,
}

impl AppState {
    /// Creates a new AppState around an existing client.
    pub fn new(client: SupabaseClient, settings: ImportSettings) -> Self {
        Self {
            client: Arc::new(client),
            settings,
            user_id: RwLock::new(None),
            import_folder_id: RwLock::new(None),
        }
    }

    /// Builds the client from configuration and seeds the signed-in user.
    pub fn from_config(config: &Config) -> Result<Self, AppError> {
        let mut client = SupabaseClient::new(&config.backend)?;
        if tracing::enabled!(tracing::Level::DEBUG) {
            client = client.with_logging_mode(LoggingMode::PathAndQueryRedacted);
        }
        Ok(Self {
            user_id: RwLock::new(config.user_id.clone()),
            ..Self::new(client, config.import.clone())
        })
    }

    /// Gets the signed-in user id, if any.
    pub async fn get_user_id(&self) -> Option<String> {
        self.user_id.read().await.clone()
    }

    /// Sets the signed-in user id.
    pub async fn set_user_id(&self, user_id: Option<String>) {
        *self.user_id.write().await = user_id;
    }

    /// Gets the selected import folder id, if any.
    pub async fn get_import_folder(&self) -> Option<String> {
        self.import_folder_id.read().await.clone()
    }

    /// Selects the folder imported cards go into.
    pub async fn set_import_folder(&self, folder_id: Option<String>) {
        *self.import_folder_id.write().await = folder_id;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config() -> Config {
        Config::from_lookup(|key| match key {
            "SUPABASE_URL" => Some("https://project.supabase.co".to_string()),
            "SUPABASE_ANON_KEY" => Some("anon-key".to_string()),
            "FLASHCARDS_USER_ID" => Some("user-1".to_string()),
            _ => None,
        })
        .unwrap()
    }

    #[tokio::test]
    async fn from_config_seeds_user_and_no_folder() {
        let state = AppState::from_config(&config()).unwrap();

        assert_eq!(state.get_user_id().await.as_deref(), Some("user-1"));
        assert!(state.get_import_folder().await.is_none());
        assert_eq!(state.client.table(), "flashcards");
    }

    #[tokio::test]
    async fn import_folder_can_be_selected_and_cleared() {
        let state = AppState::from_config(&config()).unwrap();

        state.set_import_folder(Some("folder-1".into())).await;
        assert_eq!(state.get_import_folder().await.as_deref(), Some("folder-1"));

        state.set_import_folder(None).await;
        assert!(state.get_import_folder().await.is_none());
    }
}
