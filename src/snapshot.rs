//! Explicit snapshots
//!
//! A snapshot pins a point-in-time view of the engine. Reads and iterators
//! using it hold a reference for as long as they run; `close()` waits for
//! the count to reach zero before releasing the engine-side handle.

use std::fmt;
use std::sync::{Arc, Weak};

use futures::future::BoxFuture;
use parking_lot::Mutex;
use tokio::sync::watch;

use crate::db::{next_resource_id, Database, Resource};
use crate::error::{LevelError, LevelResult};
use crate::storage::RawSnapshot;

struct SnapshotState {
    open: bool,
    refs: usize,
}

struct SnapshotInner {
    id: u64,
    db: Database,
    raw: Arc<dyn RawSnapshot>,
    state: Mutex<SnapshotState>,
    /// Number of outstanding references; close waits for zero
    refs: watch::Sender<usize>,
    /// Flips to `true` once the snapshot is closed
    closed: watch::Sender<bool>,
}

/// Point-in-time view of a database
#[derive(Clone)]
pub struct Snapshot {
    inner: Arc<SnapshotInner>,
}

impl Snapshot {
    /// The database that created this snapshot
    pub fn db(&self) -> &Database {
        &self.inner.db
    }

    pub fn is_open(&self) -> bool {
        self.inner.state.lock().open
    }

    /// Take a reference, delaying `close()` until it is released
    pub fn add_ref(&self) -> LevelResult<()> {
        let mut state = self.inner.state.lock();
        if !state.open {
            return Err(LevelError::SnapshotNotOpen);
        }
        state.refs += 1;
        self.inner.refs.send_replace(state.refs);
        Ok(())
    }

    /// Release a reference taken with [`Snapshot::add_ref`]
    pub fn unref(&self) {
        let mut state = self.inner.state.lock();
        state.refs = state.refs.saturating_sub(1);
        self.inner.refs.send_replace(state.refs);
    }

    /// Take a reference for one operation on `db`
    pub(crate) fn acquire(&self, db: &Database) -> LevelResult<SnapshotGuard> {
        self.inner.db.assert_same_root(db)?;
        self.add_ref()?;
        Ok(SnapshotGuard {
            snapshot: self.clone(),
        })
    }

    /// Close the snapshot once every reference is released
    ///
    /// Idempotent; concurrent callers all resolve when it is closed.
    pub async fn close(&self) -> LevelResult<()> {
        let first = {
            let mut state = self.inner.state.lock();
            let first = state.open;
            state.open = false;
            first
        };
        if !first {
            let mut closed = self.inner.closed.subscribe();
            let _ = closed.wait_for(|closed| *closed).await;
            return Ok(());
        }

        let mut refs = self.inner.refs.subscribe();
        let _ = refs.wait_for(|refs| *refs == 0).await;

        let result = self.inner.raw.close().await;
        self.inner.db.detach_resource(self.inner.id);
        self.inner.closed.send_replace(true);
        tracing::debug!(snapshot = self.inner.id, "Snapshot closed");
        Ok(result?)
    }
}

impl fmt::Debug for Snapshot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.inner.state.lock();
        f.debug_struct("Snapshot")
            .field("id", &self.inner.id)
            .field("open", &state.open)
            .field("refs", &state.refs)
            .finish()
    }
}

impl Resource for SnapshotInner {
    fn close_resource(self: Arc<Self>) -> BoxFuture<'static, LevelResult<()>> {
        let snapshot = Snapshot { inner: self };
        Box::pin(async move { snapshot.close().await })
    }
}

/// A reference on a snapshot, released on drop
pub(crate) struct SnapshotGuard {
    snapshot: Snapshot,
}

impl SnapshotGuard {
    pub(crate) fn raw(&self) -> Arc<dyn RawSnapshot> {
        Arc::clone(&self.snapshot.inner.raw)
    }
}

impl Drop for SnapshotGuard {
    fn drop(&mut self) {
        self.snapshot.unref();
    }
}

impl Database {
    /// Capture a point-in-time view
    ///
    /// Fails with `NOT_SUPPORTED` unless the engine declares explicit
    /// snapshots.
    pub async fn snapshot(&self) -> LevelResult<Snapshot> {
        if !self.supports().explicit_snapshots {
            return Err(LevelError::NotSupported("snapshot".into()));
        }
        self.ready(None).await?;
        let raw = self.backend_snapshot().await?;

        let (refs, _) = watch::channel(0);
        let (closed, _) = watch::channel(false);
        let snapshot = Snapshot {
            inner: Arc::new(SnapshotInner {
                id: next_resource_id(),
                db: self.clone(),
                raw,
                state: Mutex::new(SnapshotState {
                    open: true,
                    refs: 0,
                }),
                refs,
                closed,
            }),
        };
        let weak = Arc::downgrade(&snapshot.inner) as Weak<dyn Resource>;
        self.attach_resource(snapshot.inner.id, weak);
        Ok(snapshot)
    }
}
