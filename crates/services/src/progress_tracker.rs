//! Samples how far a reader has scrolled through an open book.
//!
//! At most one book is tracked at a time. Starting a new book or stopping
//! ends the previous sampling task before it can write again; a write that is
//! already in flight is allowed to finish so memory and storage stay in step.

use std::sync::{Arc, Mutex, PoisonError, Weak};
use std::time::Duration;

use shelf_core::model::{BookId, ReadingProgress};
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};

use crate::book_store::BookStore;
use crate::config::TrackerConfig;

/// Something a book is displayed in that can report its scroll position.
pub trait ScrollSurface: Send + Sync {
    /// Current distance scrolled from the top.
    fn scroll_offset(&self) -> f64;

    /// Largest reachable offset (content height minus viewport height).
    fn max_offset(&self) -> f64;
}

struct Active {
    generation: u64,
    book_id: BookId,
    // Dropping the sender tells the task to finish.
    _cancel: oneshot::Sender<()>,
    _task: JoinHandle<()>,
}

#[derive(Default)]
struct TrackerState {
    next_generation: u64,
    active: Option<Active>,
}

type SharedState = Arc<Mutex<TrackerState>>;

fn lock(state: &Mutex<TrackerState>) -> std::sync::MutexGuard<'_, TrackerState> {
    state.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Explicit stop handle for one tracking run.
///
/// Stopping a handle whose run has already been replaced does nothing, so a
/// view that closes late cannot cancel the book opened after it.
#[derive(Clone)]
pub struct TrackingHandle {
    generation: u64,
    book_id: BookId,
    state: Weak<Mutex<TrackerState>>,
}

impl TrackingHandle {
    #[must_use]
    pub fn book_id(&self) -> BookId {
        self.book_id
    }

    /// True while this run is the tracker's current one.
    #[must_use]
    pub fn is_active(&self) -> bool {
        self.state.upgrade().is_some_and(|state| {
            lock(&state)
                .active
                .as_ref()
                .is_some_and(|a| a.generation == self.generation)
        })
    }

    /// Stop this run. Returns false if it was no longer active.
    pub fn stop(&self) -> bool {
        let Some(state) = self.state.upgrade() else {
            return false;
        };
        let mut guard = lock(&state);
        if guard
            .active
            .as_ref()
            .is_some_and(|a| a.generation == self.generation)
        {
            guard.active = None;
            tracing::debug!(book_id = %self.book_id, "stopped progress tracking");
            true
        } else {
            false
        }
    }
}

pub struct ProgressTracker {
    config: TrackerConfig,
    state: SharedState,
}

impl ProgressTracker {
    #[must_use]
    pub fn new(config: TrackerConfig) -> Self {
        Self {
            config,
            state: SharedState::default(),
        }
    }

    #[must_use]
    pub fn config(&self) -> TrackerConfig {
        self.config
    }

    /// Book currently being tracked, if any.
    #[must_use]
    pub fn active_book(&self) -> Option<BookId> {
        lock(&self.state).active.as_ref().map(|a| a.book_id)
    }

    /// Begin sampling `surface` for `book_id`, replacing any previous run.
    ///
    /// Returns `None` (and leaves nothing running) if the book is not in `store`.
    /// Must be called from within a tokio runtime.
    pub async fn start(
        &self,
        store: Arc<BookStore>,
        book_id: BookId,
        surface: Arc<dyn ScrollSurface>,
    ) -> Option<TrackingHandle> {
        self.stop();

        let last = store.get(book_id).await?.progress();

        let (cancel_tx, cancel_rx) = oneshot::channel();
        let mut guard = lock(&self.state);
        // A concurrent start may have slipped in while we read the store.
        guard.active = None;
        let generation = guard.next_generation;
        guard.next_generation += 1;

        let sampler = Sampler {
            store,
            book_id,
            surface,
            config: self.config,
            last,
            generation,
            state: Arc::downgrade(&self.state),
        };
        let task = tokio::spawn(sampler.run(cancel_rx));

        guard.active = Some(Active {
            generation,
            book_id,
            _cancel: cancel_tx,
            _task: task,
        });
        tracing::debug!(%book_id, %last, "started progress tracking");

        Some(TrackingHandle {
            generation,
            book_id,
            state: Arc::downgrade(&self.state),
        })
    }

    /// Stop whatever is being tracked. Returns false if nothing was running.
    pub fn stop(&self) -> bool {
        let stopped = lock(&self.state).active.take();
        if let Some(active) = &stopped {
            tracing::debug!(book_id = %active.book_id, "stopped progress tracking");
        }
        stopped.is_some()
    }
}

impl Drop for ProgressTracker {
    fn drop(&mut self) {
        self.stop();
    }
}

struct Sampler {
    store: Arc<BookStore>,
    book_id: BookId,
    surface: Arc<dyn ScrollSurface>,
    config: TrackerConfig,
    last: ReadingProgress,
    generation: u64,
    state: Weak<Mutex<TrackerState>>,
}

impl Sampler {
    async fn run(mut self, mut cancel: oneshot::Receiver<()>) {
        let period = self.config.interval.max(Duration::from_millis(1));
        let mut ticker = tokio::time::interval_at(Instant::now() + period, period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                biased;
                _ = &mut cancel => break,
                _ = ticker.tick() => {}
            }

            let Some(sample) = ReadingProgress::from_scroll(
                self.surface.scroll_offset(),
                self.surface.max_offset(),
            ) else {
                continue;
            };
            if sample.distance(self.last) <= self.config.threshold {
                continue;
            }

            match self
                .store
                .set_progress(self.book_id, i64::from(sample.percent()))
                .await
            {
                Ok(Some(_)) => {
                    tracing::trace!(book_id = %self.book_id, %sample, "recorded progress");
                    self.last = sample;
                }
                Ok(None) => {
                    tracing::debug!(book_id = %self.book_id, "tracked book left the shelf");
                    self.release();
                    break;
                }
                Err(err) => {
                    tracing::warn!(book_id = %self.book_id, error = %err, "could not record progress");
                }
            }
        }
    }

    /// Clear the tracker's slot if it still belongs to this run.
    fn release(&self) {
        if let Some(state) = self.state.upgrade() {
            let mut guard = lock(&state);
            if guard
                .active
                .as_ref()
                .is_some_and(|a| a.generation == self.generation)
            {
                guard.active = None;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use shelf_core::model::{BookDraft, PartitionKey, UserId};
    use shelf_core::time::fixed_clock;
    use storage::repository::InMemoryRepository;

    struct TestSurface {
        offset: Mutex<f64>,
        max: f64,
    }

    impl TestSurface {
        fn new(max: f64) -> Arc<Self> {
            Arc::new(Self {
                offset: Mutex::new(0.0),
                max,
            })
        }

        fn scroll_to(&self, offset: f64) {
            *self.offset.lock().unwrap() = offset;
        }
    }

    impl ScrollSurface for TestSurface {
        fn scroll_offset(&self) -> f64 {
            *self.offset.lock().unwrap()
        }

        fn max_offset(&self) -> f64 {
            self.max
        }
    }

    fn config() -> TrackerConfig {
        TrackerConfig {
            interval: Duration::from_millis(200),
            threshold: 2,
        }
    }

    async fn store_with_book() -> (Arc<BookStore>, BookId) {
        let repo = InMemoryRepository::new();
        let store = BookStore::open(
            PartitionKey::User(UserId::new(1)),
            fixed_clock(),
            Arc::new(repo),
        )
        .await
        .unwrap();
        let book = store.add(BookDraft::new("X", "Y", 2020)).await.unwrap();
        (Arc::new(store), book.id())
    }

    async fn progress(store: &BookStore, id: BookId) -> u8 {
        store.get(id).await.unwrap().progress().percent()
    }

    #[tokio::test(start_paused = true)]
    async fn writes_only_past_the_threshold() {
        let (store, id) = store_with_book().await;
        let surface = TestSurface::new(1000.0);
        let tracker = ProgressTracker::new(config());
        let handle = tracker
            .start(Arc::clone(&store), id, surface.clone())
            .await
            .unwrap();
        assert!(handle.is_active());

        surface.scroll_to(20.0);
        tokio::time::sleep(Duration::from_millis(250)).await;
        assert_eq!(progress(&store, id).await, 0);

        surface.scroll_to(300.0);
        tokio::time::sleep(Duration::from_millis(200)).await;
        assert_eq!(progress(&store, id).await, 30);

        surface.scroll_to(320.0);
        tokio::time::sleep(Duration::from_millis(200)).await;
        assert_eq!(progress(&store, id).await, 30);

        surface.scroll_to(2000.0);
        tokio::time::sleep(Duration::from_millis(200)).await;
        assert_eq!(progress(&store, id).await, 100);
    }

    #[tokio::test(start_paused = true)]
    async fn stop_halts_writes() {
        let (store, id) = store_with_book().await;
        let surface = TestSurface::new(1000.0);
        let tracker = ProgressTracker::new(config());
        let handle = tracker
            .start(Arc::clone(&store), id, surface.clone())
            .await
            .unwrap();

        assert!(handle.stop());
        assert!(!handle.is_active());
        assert_eq!(tracker.active_book(), None);

        surface.scroll_to(900.0);
        tokio::time::sleep(Duration::from_millis(1000)).await;
        assert_eq!(progress(&store, id).await, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn switching_books_cancels_the_previous_run() {
        let (store, first) = store_with_book().await;
        let second = store
            .add(BookDraft::new("Second", "Y", 2021))
            .await
            .unwrap()
            .id();
        let tracker = ProgressTracker::new(config());

        let first_surface = TestSurface::new(1000.0);
        let old = tracker
            .start(Arc::clone(&store), first, first_surface.clone())
            .await
            .unwrap();
        let second_surface = TestSurface::new(500.0);
        let new = tracker
            .start(Arc::clone(&store), second, second_surface.clone())
            .await
            .unwrap();

        assert!(!old.is_active());
        assert!(new.is_active());
        assert_eq!(tracker.active_book(), Some(second));

        // A late stop from the old view must not cancel the new one.
        assert!(!old.stop());
        assert!(new.is_active());

        first_surface.scroll_to(800.0);
        second_surface.scroll_to(250.0);
        tokio::time::sleep(Duration::from_millis(250)).await;

        assert_eq!(progress(&store, first).await, 0);
        assert_eq!(progress(&store, second).await, 50);
    }

    #[tokio::test(start_paused = true)]
    async fn unknown_book_is_not_tracked() {
        let (store, _) = store_with_book().await;
        let tracker = ProgressTracker::new(config());
        let handle = tracker
            .start(store, BookId::new(1), TestSurface::new(100.0))
            .await;
        assert!(handle.is_none());
        assert_eq!(tracker.active_book(), None);
    }

    #[tokio::test(start_paused = true)]
    async fn removed_book_ends_tracking() {
        let (store, id) = store_with_book().await;
        let surface = TestSurface::new(1000.0);
        let tracker = ProgressTracker::new(config());
        let handle = tracker
            .start(Arc::clone(&store), id, surface.clone())
            .await
            .unwrap();

        store.remove(id).await.unwrap();
        surface.scroll_to(500.0);
        tokio::time::sleep(Duration::from_millis(250)).await;

        assert!(!handle.is_active());
        assert_eq!(tracker.active_book(), None);
    }

    #[tokio::test(start_paused = true)]
    async fn unscrollable_surface_records_nothing() {
        let (store, id) = store_with_book().await;
        let surface = TestSurface::new(0.0);
        let tracker = ProgressTracker::new(config());
        let _handle = tracker
            .start(Arc::clone(&store), id, surface.clone())
            .await
            .unwrap();

        surface.scroll_to(50.0);
        tokio::time::sleep(Duration::from_millis(1000)).await;
        assert_eq!(progress(&store, id).await, 0);
    }
}
