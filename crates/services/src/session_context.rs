use std::sync::Arc;

use shelf_core::model::{
    PartitionKey, Session, UserError, UserId, UserRecord, Username, demo_catalog,
};
use storage::repository::{Storage, StorageError};
use tokio::sync::Mutex;

use crate::book_store::BookStore;
use crate::config::ServicesConfig;
use crate::credentials::{hash_password, verify_password};
use crate::error::SessionError;
use crate::progress_tracker::ProgressTracker;
use crate::Clock;

#[derive(Default)]
struct Current {
    session: Session,
    user: Option<UserRecord>,
    store: Option<Arc<BookStore>>,
}

/// Owns the active session and the book store bound to its partition.
///
/// Moving between sessions always builds a fresh store for the new
/// partition and stops progress tracking, so nothing from the previous
/// session can be read or written afterwards.
pub struct SessionContext {
    clock: Clock,
    config: ServicesConfig,
    storage: Storage,
    tracker: ProgressTracker,
    current: Mutex<Current>,
}

impl SessionContext {
    #[must_use]
    pub fn new(storage: Storage, clock: Clock, config: ServicesConfig) -> Self {
        let tracker = ProgressTracker::new(config.tracker);
        Self {
            clock,
            config,
            storage,
            tracker,
            current: Mutex::new(Current::default()),
        }
    }

    pub async fn session(&self) -> Session {
        self.current.lock().await.session
    }

    /// Store for the active session; `None` when logged out.
    pub async fn store(&self) -> Option<Arc<BookStore>> {
        self.current.lock().await.store.clone()
    }

    pub async fn partition(&self) -> Option<PartitionKey> {
        self.current.lock().await.session.partition()
    }

    /// Account behind the active session, if it is a registered user.
    pub async fn user(&self) -> Option<UserRecord> {
        self.current.lock().await.user.clone()
    }

    #[must_use]
    pub fn tracker(&self) -> &ProgressTracker {
        &self.tracker
    }

    /// Create an account. Does not log in.
    ///
    /// # Errors
    ///
    /// Returns `SessionError::User` for blank input, `SessionError::UsernameTaken`
    /// if the name is registered or reserved for the demo, or storage errors.
    pub async fn register(
        &self,
        username: &str,
        password: &str,
    ) -> Result<UserRecord, SessionError> {
        let username = Username::new(username)?;
        if password.is_empty() {
            return Err(UserError::EmptyPassword.into());
        }
        if username.as_str() == self.config.demo_username {
            return Err(SessionError::UsernameTaken);
        }

        let existing = self.storage.users.list_users().await?;
        if existing.iter().any(|u| u.username() == &username) {
            return Err(SessionError::UsernameTaken);
        }
        let floor = existing
            .iter()
            .map(|u| u.id().value().saturating_add(1))
            .max()
            .unwrap_or(0);
        let id = UserId::new(self.clock.now_millis().max(floor));

        let user = UserRecord::new(id, username, hash_password(password)?);
        self.storage
            .users
            .insert_user(&user)
            .await
            .map_err(|err| match err {
                StorageError::Conflict => SessionError::UsernameTaken,
                other => SessionError::Storage(other),
            })?;

        tracing::info!(user_id = %user.id(), username = %user.username(), "registered user");
        Ok(user)
    }

    /// Enter a session with exact credentials, replacing any current one.
    ///
    /// The configured demo pair opens the ephemeral demo shelf; anything
    /// else must match a registered user.
    ///
    /// # Errors
    ///
    /// Returns `SessionError::InvalidCredentials` on mismatch (the current
    /// session is left as it was), or storage errors.
    pub async fn login(
        &self,
        username: &str,
        password: &str,
    ) -> Result<Arc<BookStore>, SessionError> {
        if self.config.is_demo_login(username, password) {
            return self.enter_demo().await;
        }

        let users = self.storage.users.list_users().await?;
        let user = users
            .into_iter()
            .find(|u| u.username().as_str() == username.trim())
            .filter(|u| verify_password(password, u.password_hash()))
            .ok_or(SessionError::InvalidCredentials)?;

        self.enter_user(user, true).await
    }

    /// Start a demo session directly, ending any current one.
    ///
    /// # Errors
    ///
    /// Returns storage errors from leaving the previous session.
    pub async fn enter_demo(&self) -> Result<Arc<BookStore>, SessionError> {
        let mut current = self.current.lock().await;
        self.leave(&mut current).await?;

        tracing::info!("entered demo session");
        Ok(Self::install_demo(&mut current, self.clock))
    }

    /// Switch this context to a throwaway demo shelf without logging out.
    ///
    /// The remembered user stays remembered, so the next start restores it.
    pub async fn visit_demo(&self) -> Arc<BookStore> {
        let mut current = self.current.lock().await;
        self.tracker.stop();
        if current.session.is_demo() {
            self.discard_demo().await;
        }

        tracing::debug!("visiting demo session");
        Self::install_demo(&mut current, self.clock)
    }

    /// Return to the logged-out state. Demo data is discarded.
    ///
    /// # Errors
    ///
    /// Returns `SessionError::Storage` if the session marker cannot be cleared.
    pub async fn logout(&self) -> Result<(), SessionError> {
        let mut current = self.current.lock().await;
        let was = current.session;
        self.leave(&mut current).await?;
        if !was.is_anonymous() {
            tracing::info!(session = ?was, "logged out");
        }
        Ok(())
    }

    /// Re-enter the session remembered from a previous run, if any.
    ///
    /// A marker pointing at a missing user, or one that cannot be read, is
    /// cleared and the context stays logged out.
    ///
    /// # Errors
    ///
    /// Returns `SessionError::Storage` if the user list or the user's shelf
    /// cannot be read.
    pub async fn restore(&self) -> Result<Session, SessionError> {
        let marker = match self.storage.sessions.current_user().await {
            Ok(marker) => marker,
            Err(err) => {
                tracing::warn!(error = %err, "unreadable session marker, clearing it");
                self.storage.sessions.clear_current_user().await?;
                None
            }
        };
        let Some(user_id) = marker else {
            return Ok(Session::Anonymous);
        };

        let Some(user) = self.storage.users.get_user(user_id).await? else {
            tracing::warn!(%user_id, "session marker points at an unknown user");
            self.storage.sessions.clear_current_user().await?;
            return Ok(Session::Anonymous);
        };

        self.enter_user(user, false).await?;
        Ok(Session::Authenticated(user_id))
    }

    /// Open the user's shelf and make it current. With `remember`, the
    /// marker is written only once the shelf has opened.
    async fn enter_user(
        &self,
        user: UserRecord,
        remember: bool,
    ) -> Result<Arc<BookStore>, SessionError> {
        let partition = PartitionKey::User(user.id());
        let store = Arc::new(
            BookStore::open(partition, self.clock, Arc::clone(&self.storage.books)).await?,
        );
        if remember {
            self.storage.sessions.set_current_user(user.id()).await?;
            tracing::info!(user_id = %user.id(), username = %user.username(), "logged in");
        } else {
            tracing::debug!(user_id = %user.id(), username = %user.username(), "restored session");
        }

        let mut current = self.current.lock().await;
        self.tracker.stop();
        if current.session.is_demo() {
            self.discard_demo().await;
        }
        *current = Current {
            session: Session::Authenticated(user.id()),
            user: Some(user),
            store: Some(Arc::clone(&store)),
        };
        Ok(store)
    }

    fn install_demo(current: &mut Current, clock: Clock) -> Arc<BookStore> {
        let store = Arc::new(BookStore::ephemeral(
            PartitionKey::Demo,
            clock,
            demo_catalog(),
        ));
        *current = Current {
            session: Session::Demo,
            user: None,
            store: Some(Arc::clone(&store)),
        };
        store
    }

    async fn leave(&self, current: &mut Current) -> Result<(), SessionError> {
        self.tracker.stop();
        match current.session {
            Session::Anonymous => {}
            Session::Demo => self.discard_demo().await,
            Session::Authenticated(_) => self.storage.sessions.clear_current_user().await?,
        }
        *current = Current::default();
        Ok(())
    }

    async fn discard_demo(&self) {
        // Demo stores never write, but clear the key in case an older build did.
        if let Err(err) = self.storage.books.drop_partition(PartitionKey::Demo).await {
            tracing::warn!(error = %err, "could not discard demo partition");
        }
    }
}
