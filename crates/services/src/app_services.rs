use std::sync::Arc;

use shelf_core::model::Session;
use storage::repository::Storage;

use crate::config::ServicesConfig;
use crate::error::AppServicesError;
use crate::session_context::SessionContext;
use crate::Clock;

/// Assembles app-facing services and resumes the last session.
#[derive(Clone)]
pub struct AppServices {
    config: ServicesConfig,
    restored: Session,
    sessions: Arc<SessionContext>,
}

impl AppServices {
    /// Build services backed by `SQLite` storage.
    ///
    /// # Errors
    ///
    /// Returns `AppServicesError` if storage initialization or session restore fails.
    pub async fn new_sqlite(
        db_url: &str,
        clock: Clock,
        config: ServicesConfig,
    ) -> Result<Self, AppServicesError> {
        let storage = Storage::sqlite(db_url).await?;
        Self::with_storage(storage, clock, config).await
    }

    /// Build services over an already assembled `Storage`.
    ///
    /// # Errors
    ///
    /// Returns `AppServicesError::Session` if the remembered session cannot be restored.
    pub async fn with_storage(
        storage: Storage,
        clock: Clock,
        config: ServicesConfig,
    ) -> Result<Self, AppServicesError> {
        let sessions = Arc::new(SessionContext::new(storage, clock, config.clone()));
        let restored = sessions.restore().await?;

        Ok(Self {
            config,
            restored,
            sessions,
        })
    }

    #[must_use]
    pub fn config(&self) -> &ServicesConfig {
        &self.config
    }

    /// Session that was active when the services started.
    #[must_use]
    pub fn restored_session(&self) -> Session {
        self.restored
    }

    #[must_use]
    pub fn sessions(&self) -> Arc<SessionContext> {
        Arc::clone(&self.sessions)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use shelf_core::time::fixed_clock;

    #[tokio::test]
    async fn fresh_storage_starts_logged_out() {
        let services =
            AppServices::with_storage(Storage::in_memory(), fixed_clock(), ServicesConfig::default())
                .await
                .unwrap();
        assert_eq!(services.restored_session(), Session::Anonymous);
        assert!(services.sessions().store().await.is_none());
    }
}
