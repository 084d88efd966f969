//! Per-instance snapshot ownership, refresh discipline, and patching.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

use arc_swap::ArcSwap;
use async_trait::async_trait;
use flotilla_qbit::models::MainData;
use tokio::sync::Mutex;
use tracing::{debug, warn};

use crate::error::SyncResult;
use crate::snapshot::{Snapshot, SnapshotState};

/// Fetches `sync/maindata` payloads for one instance. Implemented over the
/// client pool in production and stubbed in tests.
#[async_trait]
pub trait MaindataSource: Send + Sync {
    /// Fetch the delta since `rid`.
    async fn fetch(&self, rid: i64) -> SyncResult<MainData>;
}

/// One reader's view of a snapshot plus its effective freshness.
#[derive(Debug, Clone)]
pub struct SnapshotRead {
    /// The published image at read time.
    pub snapshot: Arc<Snapshot>,
    /// Effective state at read time.
    pub state: SnapshotState,
}

impl SnapshotRead {
    /// Whether the image was inside the freshness window.
    #[must_use]
    pub const fn is_fresh(&self) -> bool {
        matches!(self.state, SnapshotState::Fresh)
    }
}

/// Exclusive owner of one instance's [`Snapshot`].
///
/// Publication is a single pointer swap: readers load the current pointer
/// without locking and keep the image alive for as long as they hold it.
/// The refresh mutex guarantees one in-flight populate per instance;
/// callers that arrive during a populate wait on the mutex and then find
/// the snapshot already fresh, so exactly one upstream fetch is issued.
pub struct SnapshotManager {
    instance_id: i64,
    source: Arc<dyn MaindataSource>,
    current: ArcSwap<Snapshot>,
    refresh_lock: Mutex<()>,
    populating: AtomicBool,
    ttl: Duration,
}

impl SnapshotManager {
    /// Build a manager over a maindata source.
    #[must_use]
    pub fn new(instance_id: i64, source: Arc<dyn MaindataSource>, ttl: Duration) -> Self {
        Self {
            instance_id,
            source,
            current: ArcSwap::from_pointee(Snapshot::default()),
            refresh_lock: Mutex::new(()),
            populating: AtomicBool::new(false),
            ttl,
        }
    }

    /// The instance this manager serves.
    #[must_use]
    pub const fn instance_id(&self) -> i64 {
        self.instance_id
    }

    /// Read the snapshot, refreshing per the state machine: an empty
    /// snapshot populates synchronously, a stale one is served while a
    /// background refresh proceeds.
    ///
    /// # Errors
    ///
    /// Returns an error only when there is no populated image to serve and
    /// the populate fails.
    pub async fn read(self: &Arc<Self>) -> SyncResult<SnapshotRead> {
        let current = self.current.load_full();
        match self.state_of(&current) {
            SnapshotState::Fresh => Ok(SnapshotRead {
                snapshot: current,
                state: SnapshotState::Fresh,
            }),
            SnapshotState::Empty | SnapshotState::Populating if !current.is_populated() => {
                self.refresh().await?;
                let populated = self.current.load_full();
                let state = self.state_of(&populated);
                Ok(SnapshotRead {
                    snapshot: populated,
                    state,
                })
            }
            // Populated but past the window: stale, errored, or with a
            // refresh already in flight. Serve the published image while
            // the refresh proceeds.
            state => {
                self.spawn_background_refresh();
                Ok(SnapshotRead {
                    snapshot: current,
                    state,
                })
            }
        }
    }

    /// Force a refresh now, coalescing with any in-flight populate.
    ///
    /// # Errors
    ///
    /// Returns the refresh failure; the prior image stays published.
    pub async fn refresh(&self) -> SyncResult<()> {
        let _guard = self.refresh_lock.lock().await;
        // A populate that finished while we waited satisfies this call.
        let current = self.current.load_full();
        if matches!(self.state_of(&current), SnapshotState::Fresh) {
            return Ok(());
        }

        self.populating.store(true, Ordering::Release);
        let outcome = self.source.fetch(current.rid).await;
        self.populating.store(false, Ordering::Release);

        match outcome {
            Ok(data) => {
                let next = current.apply_maindata(&data, Instant::now());
                debug!(
                    instance_id = self.instance_id,
                    torrents = next.torrents.len(),
                    serving_version = next.serving_version,
                    "snapshot refreshed"
                );
                self.current.store(Arc::new(next));
                Ok(())
            }
            Err(err) => {
                warn!(
                    instance_id = self.instance_id,
                    error = %err,
                    "snapshot refresh failed"
                );
                let mut next = (*current).clone();
                next.last_error = Some(err.to_string());
                self.current.store(Arc::new(next));
                Err(err)
            }
        }
    }

    fn spawn_background_refresh(self: &Arc<Self>) {
        // Cheap dedup: if a refresh holds the lock, skip spawning.
        if self.refresh_lock.try_lock().is_err() {
            return;
        }
        let manager = Arc::clone(self);
        tokio::spawn(async move {
            let _ = manager.refresh().await;
        });
    }

    /// Apply an optimistic patch to the published snapshot.
    ///
    /// The patch is applied to a clone and republished with a bumped
    /// `serving_version`; concurrent patches are serialized by a CAS loop.
    /// Patches only modify existing records; they never invent torrents.
    pub fn patch<F>(&self, mutate: F)
    where
        F: Fn(&mut Snapshot),
    {
        self.current.rcu(|current| {
            let mut next = (**current).clone();
            mutate(&mut next);
            next.serving_version = current.serving_version + 1;
            next
        });
    }

    /// Mark the snapshot expired so the next read refreshes, used to roll
    /// back an optimistic patch whose upstream call failed.
    pub fn invalidate(&self) {
        self.patch(|snapshot| snapshot.expired = true);
    }

    /// The currently-published image without any refresh side effects.
    #[must_use]
    pub fn peek(&self) -> Arc<Snapshot> {
        self.current.load_full()
    }

    /// Effective state of the published snapshot right now, without
    /// triggering a refresh.
    #[must_use]
    pub fn status(&self) -> SnapshotState {
        self.state_of(&self.current.load_full())
    }

    fn state_of(&self, snapshot: &Snapshot) -> SnapshotState {
        let populating = self.populating.load(Ordering::Acquire);
        if !snapshot.is_populated() {
            return if populating {
                SnapshotState::Populating
            } else {
                SnapshotState::Empty
            };
        }
        let expired = snapshot.expired
            || snapshot
                .fetched_at
                .is_none_or(|fetched| fetched.elapsed() > self.ttl);
        if !expired {
            SnapshotState::Fresh
        } else if populating {
            SnapshotState::Populating
        } else if snapshot.last_error.is_some() {
            SnapshotState::Error
        } else {
            SnapshotState::Stale
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::SyncError;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct CountingSource {
        fetches: AtomicUsize,
        delay: Duration,
    }

    #[async_trait]
    impl MaindataSource for CountingSource {
        async fn fetch(&self, rid: i64) -> SyncResult<MainData> {
            self.fetches.fetch_add(1, Ordering::SeqCst);
            tokio::time::sleep(self.delay).await;
            Ok(serde_json::from_value(serde_json::json!({
                "rid": rid + 1,
                "full_update": rid == 0,
                "torrents": {
                    "aabb": { "name": "one", "state": "uploading", "size": 100 }
                }
            }))
            .expect("fixture"))
        }
    }

    struct FailingSource;

    #[async_trait]
    impl MaindataSource for FailingSource {
        async fn fetch(&self, _rid: i64) -> SyncResult<MainData> {
            Err(SyncError::Upstream(flotilla_qbit::QbitError::Transient {
                detail: "boom".to_string(),
            }))
        }
    }

    fn manager(source: Arc<dyn MaindataSource>, ttl: Duration) -> Arc<SnapshotManager> {
        Arc::new(SnapshotManager::new(1, source, ttl))
    }

    #[tokio::test]
    async fn first_read_populates_synchronously() {
        let source = Arc::new(CountingSource {
            fetches: AtomicUsize::new(0),
            delay: Duration::ZERO,
        });
        let manager = manager(source.clone(), Duration::from_secs(5));

        let read = manager.read().await.expect("read");
        assert!(read.is_fresh());
        assert_eq!(read.snapshot.torrents.len(), 1);
        assert_eq!(source.fetches.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn concurrent_empty_readers_share_one_fetch() {
        let source = Arc::new(CountingSource {
            fetches: AtomicUsize::new(0),
            delay: Duration::from_millis(50),
        });
        let manager = manager(source.clone(), Duration::from_secs(5));

        let readers: Vec<_> = (0..8)
            .map(|_| {
                let manager = Arc::clone(&manager);
                tokio::spawn(async move { manager.read().await })
            })
            .collect();
        for reader in readers {
            let read = reader.await.expect("join").expect("read");
            assert_eq!(read.snapshot.torrents.len(), 1);
        }
        assert_eq!(source.fetches.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn fresh_reads_do_not_refetch() {
        let source = Arc::new(CountingSource {
            fetches: AtomicUsize::new(0),
            delay: Duration::ZERO,
        });
        let manager = manager(source.clone(), Duration::from_secs(60));

        for _ in 0..5 {
            manager.read().await.expect("read");
        }
        assert_eq!(source.fetches.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn populate_in_flight_is_observable() {
        let source = Arc::new(CountingSource {
            fetches: AtomicUsize::new(0),
            delay: Duration::from_millis(200),
        });
        let manager = manager(source, Duration::from_secs(60));
        assert_eq!(manager.status(), SnapshotState::Empty);

        let reader = {
            let manager = Arc::clone(&manager);
            tokio::spawn(async move { manager.read().await })
        };
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(manager.status(), SnapshotState::Populating);

        let read = reader.await.expect("join").expect("read");
        assert!(read.is_fresh());
        assert_eq!(manager.status(), SnapshotState::Fresh);
    }

    #[tokio::test]
    async fn stale_reads_serve_old_image_and_refresh_in_background() {
        let source = Arc::new(CountingSource {
            fetches: AtomicUsize::new(0),
            delay: Duration::from_millis(20),
        });
        let manager = manager(source.clone(), Duration::ZERO);

        let first = manager.read().await.expect("populate");
        assert_eq!(first.snapshot.serving_version, 1);

        // TTL zero makes everything stale immediately; the stale read must
        // not block on the background refresh.
        let second = manager.read().await.expect("stale read");
        assert_eq!(second.state, SnapshotState::Stale);
        assert_eq!(second.snapshot.serving_version, 1);

        tokio::time::sleep(Duration::from_millis(80)).await;
        assert!(source.fetches.load(Ordering::SeqCst) >= 2);
    }

    #[tokio::test]
    async fn empty_populate_failure_surfaces() {
        let manager = manager(Arc::new(FailingSource), Duration::from_secs(5));
        let err = manager.read().await.expect_err("must fail");
        assert!(matches!(err, SyncError::Upstream(_)));
    }

    #[tokio::test]
    async fn patch_bumps_serving_version_and_preserves_monotonicity() {
        let source = Arc::new(CountingSource {
            fetches: AtomicUsize::new(0),
            delay: Duration::ZERO,
        });
        let manager = manager(source, Duration::from_secs(60));
        manager.read().await.expect("populate");

        let before = manager.peek().serving_version;
        manager.patch(|snapshot| {
            if let Some(view) = snapshot.torrents.get_mut("aabb") {
                view.tags.insert("x".to_string());
            }
        });
        let after = manager.peek();
        assert!(after.serving_version > before);
        assert!(after.torrents["aabb"].tags.contains("x"));
    }

    #[tokio::test]
    async fn invalidate_forces_next_read_to_refresh() {
        let source = Arc::new(CountingSource {
            fetches: AtomicUsize::new(0),
            delay: Duration::ZERO,
        });
        let manager = manager(source.clone(), Duration::from_secs(60));
        manager.read().await.expect("populate");
        manager.invalidate();

        let read = manager.read().await.expect("stale read");
        assert!(!read.is_fresh());
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(source.fetches.load(Ordering::SeqCst) >= 2);
    }
}
