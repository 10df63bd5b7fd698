use std::fmt;
use std::sync::Arc;

use shelf_core::model::{Book, BookDraft, BookId, BookPatch, PartitionKey, ReadingProgress};
use storage::repository::{BookRepository, StorageError};
use tokio::sync::Mutex;

use crate::Clock;
use crate::error::StoreError;

/// The two lists a shelf view renders.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Shelves {
    pub complete: Vec<Book>,
    pub incomplete: Vec<Book>,
}

impl Shelves {
    fn split(books: impl IntoIterator<Item = Book>) -> Self {
        let (complete, incomplete) = books.into_iter().partition(Book::is_complete);
        Self {
            complete,
            incomplete,
        }
    }
}

/// Book collection of one session.
///
/// A store is bound to a single partition for its whole life. Every change
/// to the collection is written back as a full snapshot before the call
/// returns, except in the demo partition, which only lives in memory. Unknown
/// ids are reported through return values (`false` / `None`), never as errors.
pub struct BookStore {
    partition: PartitionKey,
    clock: Clock,
    repo: Option<Arc<dyn BookRepository>>,
    books: Mutex<Vec<Book>>,
}

impl fmt::Debug for BookStore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BookStore")
            .field("partition", &self.partition)
            .field("ephemeral", &self.is_ephemeral())
            .finish_non_exhaustive()
    }
}

impl BookStore {
    /// Open the store for `partition`, loading its last snapshot.
    ///
    /// A snapshot that cannot be decoded is moved to a backup key and the
    /// shelf starts empty, so later writes never overwrite it. Ephemeral
    /// partitions start empty and are never written.
    ///
    /// # Errors
    ///
    /// Returns `StorageError` if the backend cannot be reached, or if an
    /// undecodable snapshot cannot be moved aside.
    pub async fn open(
        partition: PartitionKey,
        clock: Clock,
        repo: Arc<dyn BookRepository>,
    ) -> Result<Self, StorageError> {
        if partition.is_ephemeral() {
            return Ok(Self::ephemeral(partition, clock, Vec::new()));
        }

        let books = match repo.load_books(partition).await {
            Ok(books) => books,
            Err(StorageError::Serialization(reason)) => {
                let backup = repo
                    .set_aside_partition(partition, clock.now_millis())
                    .await?;
                tracing::warn!(
                    %partition,
                    %reason,
                    backup = backup.as_deref().unwrap_or("-"),
                    "unreadable shelf moved aside, starting empty"
                );
                Vec::new()
            }
            Err(err) => return Err(err),
        };
        tracing::debug!(%partition, count = books.len(), "opened shelf");

        Ok(Self {
            partition,
            clock,
            repo: Some(repo),
            books: Mutex::new(books),
        })
    }

    /// A memory-only store seeded with `books`.
    #[must_use]
    pub fn ephemeral(partition: PartitionKey, clock: Clock, books: Vec<Book>) -> Self {
        Self {
            partition,
            clock,
            repo: None,
            books: Mutex::new(books),
        }
    }

    #[must_use]
    pub fn partition(&self) -> PartitionKey {
        self.partition
    }

    /// True when changes are kept in memory only.
    #[must_use]
    pub fn is_ephemeral(&self) -> bool {
        self.repo.is_none()
    }

    /// All books in insertion order.
    pub async fn list(&self) -> Vec<Book> {
        self.books.lock().await.clone()
    }

    pub async fn get(&self, id: BookId) -> Option<Book> {
        self.books
            .lock()
            .await
            .iter()
            .find(|b| b.id() == id)
            .cloned()
    }

    /// Books whose title contains `term`, ignoring case. A blank term matches everything.
    pub async fn search(&self, term: &str) -> Vec<Book> {
        let term = term.trim();
        let books = self.books.lock().await;
        if term.is_empty() {
            return books.clone();
        }
        books
            .iter()
            .filter(|b| b.title_matches(term))
            .cloned()
            .collect()
    }

    pub async fn shelves(&self) -> Shelves {
        Shelves::split(self.list().await)
    }

    pub async fn shelves_matching(&self, term: &str) -> Shelves {
        Shelves::split(self.search(term).await)
    }

    /// Validate and append a new book with a fresh time-based id.
    ///
    /// # Errors
    ///
    /// Returns `StoreError::Validation` if a required field is missing, or
    /// `StoreError::Storage` if the snapshot cannot be written.
    pub async fn add(&self, draft: BookDraft) -> Result<Book, StoreError> {
        let validated = draft.validate()?;

        let mut books = self.books.lock().await;
        let id = BookId::next_after(self.clock.now_millis(), books.iter().map(Book::id));
        let book = validated.assign_id(id);

        let previous = books.clone();
        books.push(book.clone());
        self.persist(&mut books, previous).await?;

        tracing::debug!(partition = %self.partition, %id, "added book");
        Ok(book)
    }

    /// Merge `patch` into the book with `id`. Returns false if there is no such book.
    ///
    /// # Errors
    ///
    /// Returns `StoreError::Validation` if the patch blanks a required field,
    /// or `StoreError::Storage` if the snapshot cannot be written.
    pub async fn update(&self, id: BookId, patch: BookPatch) -> Result<bool, StoreError> {
        let mut books = self.books.lock().await;
        let Some(index) = books.iter().position(|b| b.id() == id) else {
            return Ok(false);
        };

        let previous = books.clone();
        books[index].apply_patch(patch)?;
        self.persist(&mut books, previous).await?;
        Ok(true)
    }

    /// Delete the book with `id`. Returns false if there is no such book.
    ///
    /// # Errors
    ///
    /// Returns `StoreError::Storage` if the snapshot cannot be written.
    pub async fn remove(&self, id: BookId) -> Result<bool, StoreError> {
        let mut books = self.books.lock().await;
        let Some(index) = books.iter().position(|b| b.id() == id) else {
            return Ok(false);
        };

        let previous = books.clone();
        books.remove(index);
        self.persist(&mut books, previous).await?;

        tracing::debug!(partition = %self.partition, %id, "removed book");
        Ok(true)
    }

    /// Flip the finished/unfinished shelf of a book.
    ///
    /// # Errors
    ///
    /// Returns `StoreError::Storage` if the snapshot cannot be written.
    pub async fn toggle_complete(&self, id: BookId) -> Result<Option<Book>, StoreError> {
        self.modify(id, |book| {
            book.toggle_complete();
            true
        })
        .await
    }

    /// Flip the read flag of a book.
    ///
    /// # Errors
    ///
    /// Returns `StoreError::Storage` if the snapshot cannot be written.
    pub async fn toggle_read(&self, id: BookId) -> Result<Option<Book>, StoreError> {
        self.modify(id, |book| {
            book.toggle_read();
            true
        })
        .await
    }

    /// Record reading progress, clamped to `0..=100`.
    ///
    /// Writing the value already stored does not touch storage.
    ///
    /// # Errors
    ///
    /// Returns `StoreError::Storage` if the snapshot cannot be written.
    pub async fn set_progress(&self, id: BookId, percent: i64) -> Result<Option<Book>, StoreError> {
        let progress = ReadingProgress::clamped(percent);
        self.modify(id, |book| book.set_progress(progress)).await
    }

    /// Apply `change` to one book; persist only if it reports a change.
    async fn modify(
        &self,
        id: BookId,
        change: impl FnOnce(&mut Book) -> bool,
    ) -> Result<Option<Book>, StoreError> {
        let mut books = self.books.lock().await;
        let Some(index) = books.iter().position(|b| b.id() == id) else {
            return Ok(None);
        };

        let previous = books.clone();
        if change(&mut books[index]) {
            self.persist(&mut books, previous).await?;
        }
        Ok(Some(books[index].clone()))
    }

    /// Write the full collection; on failure restore `previous` so memory
    /// matches what is on disk.
    async fn persist(&self, books: &mut Vec<Book>, previous: Vec<Book>) -> Result<(), StoreError> {
        let Some(repo) = &self.repo else {
            return Ok(());
        };
        if let Err(err) = repo.save_books(self.partition, books).await {
            tracing::warn!(partition = %self.partition, error = %err, "failed to save shelf");
            *books = previous;
            return Err(err.into());
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use async_trait::async_trait;
    use shelf_core::model::{BookError, UserId};
    use shelf_core::time::fixed_clock;
    use storage::repository::{InMemoryRepository, KeyValueStore};

    fn alice() -> PartitionKey {
        PartitionKey::User(UserId::new(1))
    }

    async fn open_store(repo: &InMemoryRepository) -> BookStore {
        BookStore::open(alice(), fixed_clock(), Arc::new(repo.clone()))
            .await
            .unwrap()
    }

    /// Accepts reads, fails every write.
    #[derive(Clone, Default)]
    struct ReadOnlyRepository {
        inner: InMemoryRepository,
    }

    #[async_trait]
    impl KeyValueStore for ReadOnlyRepository {
        async fn get(&self, key: &str) -> Result<Option<String>, StorageError> {
            self.inner.get(key).await
        }

        async fn set(&self, _key: &str, _value: String) -> Result<(), StorageError> {
            Err(StorageError::Connection("disk full".into()))
        }

        async fn remove(&self, _key: &str) -> Result<(), StorageError> {
            Err(StorageError::Connection("disk full".into()))
        }
    }

    /// Fails the first read, then behaves.
    #[derive(Clone, Default)]
    struct FlakyRepository {
        inner: InMemoryRepository,
        failed: Arc<std::sync::atomic::AtomicBool>,
    }

    #[async_trait]
    impl KeyValueStore for FlakyRepository {
        async fn get(&self, key: &str) -> Result<Option<String>, StorageError> {
            if !self.failed.swap(true, std::sync::atomic::Ordering::SeqCst) {
                return Err(StorageError::Connection("database is locked".into()));
            }
            self.inner.get(key).await
        }

        async fn set(&self, key: &str, value: String) -> Result<(), StorageError> {
            self.inner.set(key, value).await
        }

        async fn remove(&self, key: &str) -> Result<(), StorageError> {
            self.inner.remove(key).await
        }
    }

    #[tokio::test]
    async fn add_then_list_contains_the_new_book() {
        let repo = InMemoryRepository::new();
        let store = open_store(&repo).await;
        let before = store.list().await.len();

        let book = store
            .add(BookDraft::new("X", "Y", 2020).complete(false))
            .await
            .unwrap();

        let books = store.list().await;
        assert_eq!(books.len(), before + 1);
        let last = books.last().unwrap();
        assert_eq!(last.id(), book.id());
        assert!(!last.is_complete());
        assert_eq!(last.year(), 2020);
        assert!(!last.is_read());
        assert_eq!(last.progress().percent(), 0);
    }

    #[tokio::test]
    async fn ids_stay_unique_within_the_same_millisecond() {
        let repo = InMemoryRepository::new();
        let store = open_store(&repo).await;

        let a = store.add(BookDraft::new("A", "Y", 2020)).await.unwrap();
        let b = store.add(BookDraft::new("B", "Y", 2020)).await.unwrap();
        assert_ne!(a.id(), b.id());
        assert_eq!(a.id().value(), fixed_clock().now_millis());
    }

    #[tokio::test]
    async fn mutations_are_persisted_as_snapshots() {
        let repo = InMemoryRepository::new();
        let store = open_store(&repo).await;
        let book = store.add(BookDraft::new("X", "Y", 2020)).await.unwrap();
        store.toggle_complete(book.id()).await.unwrap();

        let reopened = open_store(&repo).await;
        let books = reopened.list().await;
        assert_eq!(books.len(), 1);
        assert!(books[0].is_complete());
    }

    #[tokio::test]
    async fn invalid_draft_is_rejected_and_not_stored() {
        let repo = InMemoryRepository::new();
        let store = open_store(&repo).await;

        let err = store.add(BookDraft::new("", "Y", 2020)).await.unwrap_err();
        assert!(matches!(err, StoreError::Validation(BookError::EmptyTitle)));
        assert!(store.list().await.is_empty());
        assert!(repo.load_books(alice()).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn update_merges_fields_and_reports_missing_ids() {
        let repo = InMemoryRepository::new();
        let store = open_store(&repo).await;
        let book = store.add(BookDraft::new("X", "Y", 2020)).await.unwrap();

        let patch = BookPatch {
            title: Some("X, revised".into()),
            ..BookPatch::default()
        };
        assert!(store.update(book.id(), patch.clone()).await.unwrap());
        assert!(!store.update(BookId::new(1), patch).await.unwrap());

        let stored = store.get(book.id()).await.unwrap();
        assert_eq!(stored.title(), "X, revised");
        assert_eq!(stored.author(), "Y");
    }

    #[tokio::test]
    async fn remove_deletes_exactly_one_record() {
        let repo = InMemoryRepository::new();
        let store = open_store(&repo).await;
        let keep = store.add(BookDraft::new("Keep", "Y", 2020)).await.unwrap();
        let gone = store.add(BookDraft::new("Gone", "Y", 2020)).await.unwrap();

        assert!(store.remove(gone.id()).await.unwrap());
        assert!(!store.remove(gone.id()).await.unwrap());

        let books = store.list().await;
        assert_eq!(books.len(), 1);
        assert_eq!(books[0].id(), keep.id());
    }

    #[tokio::test]
    async fn toggling_twice_restores_the_record() {
        let repo = InMemoryRepository::new();
        let store = open_store(&repo).await;
        let book = store.add(BookDraft::new("X", "Y", 2020)).await.unwrap();

        let once = store.toggle_complete(book.id()).await.unwrap().unwrap();
        assert!(once.is_complete());
        let twice = store.toggle_complete(book.id()).await.unwrap().unwrap();
        assert_eq!(twice, book);

        assert!(store.toggle_complete(BookId::new(3)).await.unwrap().is_none());
        assert!(store.toggle_read(BookId::new(3)).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn progress_is_clamped() {
        let repo = InMemoryRepository::new();
        let store = open_store(&repo).await;
        let book = store.add(BookDraft::new("X", "Y", 2020)).await.unwrap();

        let high = store.set_progress(book.id(), 150).await.unwrap().unwrap();
        assert_eq!(high.progress().percent(), 100);
        let low = store.set_progress(book.id(), -10).await.unwrap().unwrap();
        assert_eq!(low.progress().percent(), 0);

        assert!(store.set_progress(BookId::new(5), 50).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn search_and_shelves_split_by_completion() {
        let repo = InMemoryRepository::new();
        let store = open_store(&repo).await;
        store
            .add(BookDraft::new("Bumi Manusia", "Pramoedya", 1980).complete(true))
            .await
            .unwrap();
        store
            .add(BookDraft::new("Anak Semua Bangsa", "Pramoedya", 1980))
            .await
            .unwrap();
        store.add(BookDraft::new("Cantik Itu Luka", "Eka", 2002)).await.unwrap();

        assert_eq!(store.search("BUMI").await.len(), 1);
        assert_eq!(store.search("   ").await.len(), 3);

        let shelves = store.shelves().await;
        assert_eq!(shelves.complete.len(), 1);
        assert_eq!(shelves.incomplete.len(), 2);

        let filtered = store.shelves_matching("a").await;
        assert_eq!(filtered.complete.len() + filtered.incomplete.len(), 3);
        let filtered = store.shelves_matching("luka").await;
        assert!(filtered.complete.is_empty());
        assert_eq!(filtered.incomplete.len(), 1);
    }

    #[tokio::test]
    async fn corrupt_snapshot_is_set_aside_not_overwritten() {
        let repo = InMemoryRepository::new();
        repo.set(&alice().storage_key(), "[{\"broken\"".into())
            .await
            .unwrap();

        let store = open_store(&repo).await;
        assert!(store.list().await.is_empty());
        store.add(BookDraft::new("New", "Y", 2020)).await.unwrap();

        let backup = format!("books_1.unreadable-{}", fixed_clock().now_millis());
        assert_eq!(
            repo.get(&backup).await.unwrap().as_deref(),
            Some("[{\"broken\"")
        );
        assert_eq!(repo.load_books(alice()).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn unreachable_backend_fails_open_and_keeps_the_shelf() {
        let repo = FlakyRepository::default();
        let seeded = open_store(&repo.inner).await;
        for title in ["A", "B", "C"] {
            seeded.add(BookDraft::new(title, "Y", 2020)).await.unwrap();
        }

        let err = BookStore::open(alice(), fixed_clock(), Arc::new(repo.clone()))
            .await
            .unwrap_err();
        assert!(matches!(err, StorageError::Connection(_)));

        // Once the backend answers again the shelf is intact.
        let store = BookStore::open(alice(), fixed_clock(), Arc::new(repo.clone()))
            .await
            .unwrap();
        store.add(BookDraft::new("New", "Y", 2020)).await.unwrap();
        assert_eq!(repo.inner.load_books(alice()).await.unwrap().len(), 4);
    }

    #[tokio::test]
    async fn failed_write_rolls_memory_back() {
        let repo = ReadOnlyRepository::default();
        let store = BookStore::open(alice(), fixed_clock(), Arc::new(repo))
            .await
            .unwrap();

        let err = store.add(BookDraft::new("X", "Y", 2020)).await.unwrap_err();
        assert!(matches!(err, StoreError::Storage(_)));
        assert!(store.list().await.is_empty());
    }

    #[tokio::test]
    async fn opening_the_demo_partition_is_ephemeral() {
        let repo = InMemoryRepository::new();
        let store = BookStore::open(PartitionKey::Demo, fixed_clock(), Arc::new(repo.clone()))
            .await
            .unwrap();
        assert!(store.is_ephemeral());
        store.add(BookDraft::new("X", "Y", 2020)).await.unwrap();
        assert!(repo.get("books_demo").await.unwrap().is_none());
    }
}
