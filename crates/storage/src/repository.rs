use async_trait::async_trait;
use shelf_core::model::{Book, PartitionKey, UserId, UserRecord};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use thiserror::Error;

use crate::records::{self, BookRecord, StoredUser};

/// Key holding the JSON array of registered users.
pub const USERS_KEY: &str = "users";

/// Key holding the id of the user whose session should be restored.
pub const CURRENT_USER_KEY: &str = "currentUser";

/// Errors surfaced by storage adapters.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum StorageError {
    #[error("not found")]
    NotFound,

    #[error("conflict")]
    Conflict,

    #[error("connection error: {0}")]
    Connection(String),

    #[error("serialization error: {0}")]
    Serialization(String),
}

/// Flat string-to-string store; every persisted value is a JSON document.
#[async_trait]
pub trait KeyValueStore: Send + Sync {
    /// Read the value stored under `key`.
    ///
    /// # Errors
    ///
    /// Returns `StorageError` if the backend cannot be read.
    async fn get(&self, key: &str) -> Result<Option<String>, StorageError>;

    /// Overwrite the value stored under `key`.
    ///
    /// # Errors
    ///
    /// Returns `StorageError` if the backend cannot be written.
    async fn set(&self, key: &str, value: String) -> Result<(), StorageError>;

    /// Delete `key`. Removing a missing key is not an error.
    ///
    /// # Errors
    ///
    /// Returns `StorageError` if the backend cannot be written.
    async fn remove(&self, key: &str) -> Result<(), StorageError>;
}

/// Whole-collection snapshots of one partition's books.
#[async_trait]
pub trait BookRepository: Send + Sync {
    /// Load a partition. A partition that was never written is empty.
    ///
    /// # Errors
    ///
    /// Returns `StorageError::Serialization` if the stored snapshot cannot be decoded.
    async fn load_books(&self, partition: PartitionKey) -> Result<Vec<Book>, StorageError>;

    /// Replace a partition with `books`.
    ///
    /// # Errors
    ///
    /// Returns `StorageError` if the snapshot cannot be encoded or stored.
    async fn save_books(&self, partition: PartitionKey, books: &[Book])
    -> Result<(), StorageError>;

    /// Delete a partition entirely.
    ///
    /// # Errors
    ///
    /// Returns `StorageError` if the backend cannot be written.
    async fn drop_partition(&self, partition: PartitionKey) -> Result<(), StorageError>;

    /// Move a partition's raw snapshot to a backup key and leave the
    /// partition empty. Returns the backup key, or `None` if nothing was stored.
    ///
    /// # Errors
    ///
    /// Returns `StorageError` if the backend cannot be read or written; the
    /// original value is kept in that case.
    async fn set_aside_partition(
        &self,
        partition: PartitionKey,
        stamp: u64,
    ) -> Result<Option<String>, StorageError>;
}

#[async_trait]
pub trait UserRepository: Send + Sync {
    /// All registered users in registration order.
    ///
    /// # Errors
    ///
    /// Returns `StorageError` if the user list cannot be read or decoded.
    async fn list_users(&self) -> Result<Vec<UserRecord>, StorageError>;

    /// Append a user to the list.
    ///
    /// # Errors
    ///
    /// Returns `StorageError::Conflict` if the username or id is already taken.
    async fn insert_user(&self, user: &UserRecord) -> Result<(), StorageError>;

    /// Fetch a user by id.
    ///
    /// # Errors
    ///
    /// Returns `StorageError` if the user list cannot be read or decoded.
    async fn get_user(&self, id: UserId) -> Result<Option<UserRecord>, StorageError> {
        let users = self.list_users().await?;
        Ok(users.into_iter().find(|u| u.id() == id))
    }
}

/// Remembers which user was logged in across restarts.
#[async_trait]
pub trait SessionMarkerRepository: Send + Sync {
    /// # Errors
    ///
    /// Returns `StorageError::Serialization` if the stored marker is not a user id.
    async fn current_user(&self) -> Result<Option<UserId>, StorageError>;

    /// # Errors
    ///
    /// Returns `StorageError` if the backend cannot be written.
    async fn set_current_user(&self, id: UserId) -> Result<(), StorageError>;

    /// # Errors
    ///
    /// Returns `StorageError` if the backend cannot be written.
    async fn clear_current_user(&self) -> Result<(), StorageError>;
}

//
// ─── TYPED VIEWS OVER ANY KEY-VALUE BACKEND ────────────────────────────────────
//

#[async_trait]
impl<T: KeyValueStore> BookRepository for T {
    async fn load_books(&self, partition: PartitionKey) -> Result<Vec<Book>, StorageError> {
        let Some(raw) = self.get(&partition.storage_key()).await? else {
            return Ok(Vec::new());
        };
        let stored: Vec<BookRecord> = records::decode(&raw)?;
        Ok(stored.into_iter().map(BookRecord::into_book).collect())
    }

    async fn save_books(
        &self,
        partition: PartitionKey,
        books: &[Book],
    ) -> Result<(), StorageError> {
        let stored: Vec<BookRecord> = books.iter().map(BookRecord::from_book).collect();
        let raw = records::encode(&stored)?;
        self.set(&partition.storage_key(), raw).await
    }

    async fn drop_partition(&self, partition: PartitionKey) -> Result<(), StorageError> {
        self.remove(&partition.storage_key()).await
    }

    async fn set_aside_partition(
        &self,
        partition: PartitionKey,
        stamp: u64,
    ) -> Result<Option<String>, StorageError> {
        let key = partition.storage_key();
        let Some(raw) = self.get(&key).await? else {
            return Ok(None);
        };
        let backup = format!("{key}.unreadable-{stamp}");
        self.set(&backup, raw).await?;
        self.remove(&key).await?;
        Ok(Some(backup))
    }
}

#[async_trait]
impl<T: KeyValueStore> UserRepository for T {
    async fn list_users(&self) -> Result<Vec<UserRecord>, StorageError> {
        let Some(raw) = self.get(USERS_KEY).await? else {
            return Ok(Vec::new());
        };
        let stored: Vec<StoredUser> = records::decode(&raw)?;
        stored.into_iter().map(StoredUser::into_user).collect()
    }

    async fn insert_user(&self, user: &UserRecord) -> Result<(), StorageError> {
        let mut users = self.list_users().await?;
        if users
            .iter()
            .any(|u| u.username() == user.username() || u.id() == user.id())
        {
            return Err(StorageError::Conflict);
        }
        users.push(user.clone());

        let stored: Vec<StoredUser> = users.iter().map(StoredUser::from_user).collect();
        self.set(USERS_KEY, records::encode(&stored)?).await
    }
}

#[async_trait]
impl<T: KeyValueStore> SessionMarkerRepository for T {
    async fn current_user(&self) -> Result<Option<UserId>, StorageError> {
        let Some(raw) = self.get(CURRENT_USER_KEY).await? else {
            return Ok(None);
        };
        raw.parse::<UserId>()
            .map(Some)
            .map_err(|e| StorageError::Serialization(e.to_string()))
    }

    async fn set_current_user(&self, id: UserId) -> Result<(), StorageError> {
        self.set(CURRENT_USER_KEY, id.to_string()).await
    }

    async fn clear_current_user(&self) -> Result<(), StorageError> {
        self.remove(CURRENT_USER_KEY).await
    }
}

//
// ─── IN-MEMORY BACKEND ─────────────────────────────────────────────────────────
//

/// Simple in-memory repository implementation for testing and prototyping.
#[derive(Clone, Default)]
pub struct InMemoryRepository {
    entries: Arc<Mutex<HashMap<String, String>>>,
}

impl InMemoryRepository {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl KeyValueStore for InMemoryRepository {
    async fn get(&self, key: &str) -> Result<Option<String>, StorageError> {
        let guard = self
            .entries
            .lock()
            .map_err(|e| StorageError::Connection(e.to_string()))?;
        Ok(guard.get(key).cloned())
    }

    async fn set(&self, key: &str, value: String) -> Result<(), StorageError> {
        let mut guard = self
            .entries
            .lock()
            .map_err(|e| StorageError::Connection(e.to_string()))?;
        guard.insert(key.to_owned(), value);
        Ok(())
    }

    async fn remove(&self, key: &str) -> Result<(), StorageError> {
        let mut guard = self
            .entries
            .lock()
            .map_err(|e| StorageError::Connection(e.to_string()))?;
        guard.remove(key);
        Ok(())
    }
}

/// Aggregates the typed repositories behind trait objects for easy backend swapping.
#[derive(Clone)]
pub struct Storage {
    pub books: Arc<dyn BookRepository>,
    pub users: Arc<dyn UserRepository>,
    pub sessions: Arc<dyn SessionMarkerRepository>,
}

impl Storage {
    #[must_use]
    pub fn in_memory() -> Self {
        Self::from_backend(InMemoryRepository::new())
    }

    /// Wire every repository to the same key-value backend.
    #[must_use]
    pub fn from_backend<T>(backend: T) -> Self
    where
        T: KeyValueStore + Clone + 'static,
    {
        let books: Arc<dyn BookRepository> = Arc::new(backend.clone());
        let users: Arc<dyn UserRepository> = Arc::new(backend.clone());
        let sessions: Arc<dyn SessionMarkerRepository> = Arc::new(backend);
        Self {
            books,
            users,
            sessions,
        }
    }
}
