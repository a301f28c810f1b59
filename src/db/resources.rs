//! Resources attached to a database
//!
//! Iterators, chained batches, sublevels and snapshots register here while
//! they are open. Closing the database closes all of them in parallel.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};

use futures::future::{join_all, BoxFuture};
use parking_lot::Mutex;

use crate::error::{LevelError, LevelResult};

static NEXT_RESOURCE_ID: AtomicU64 = AtomicU64::new(1);

/// Allocate a process-wide unique id for a database or resource
#[inline]
pub(crate) fn next_resource_id() -> u64 {
    NEXT_RESOURCE_ID.fetch_add(1, Ordering::Relaxed)
}

/// Something a database closes when it closes
pub(crate) trait Resource: Send + Sync + 'static {
    /// Close the resource; must be idempotent
    fn close_resource(self: Arc<Self>) -> BoxFuture<'static, LevelResult<()>>;
}

/// Registry of open resources
///
/// Holds weak references so a resource dropped without being closed does
/// not stay alive through its database.
#[derive(Default)]
pub(crate) struct ResourceRegistry {
    resources: Mutex<HashMap<u64, Weak<dyn Resource>>>,
}

impl ResourceRegistry {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    pub(crate) fn attach(&self, id: u64, resource: Weak<dyn Resource>) {
        self.resources.lock().insert(id, resource);
    }

    pub(crate) fn detach(&self, id: u64) {
        self.resources.lock().remove(&id);
    }

    pub(crate) fn len(&self) -> usize {
        self.resources.lock().len()
    }

    /// Close every live resource and wait for all of them
    ///
    /// One failing resource does not stop the others; failures are
    /// combined into a single error.
    pub(crate) async fn close_all(&self) -> Option<LevelError> {
        let live: Vec<(u64, Arc<dyn Resource>)> = {
            let mut resources = self.resources.lock();
            resources.retain(|_, r| r.strong_count() > 0);
            resources
                .iter()
                .filter_map(|(id, r)| r.upgrade().map(|r| (*id, r)))
                .collect()
        };
        if live.is_empty() {
            return None;
        }

        let closes = live.into_iter().map(|(id, resource)| async move {
            let result = resource.close_resource().await;
            if let Err(ref e) = result {
                tracing::warn!(resource = id, error = %e, "Failed to close resource");
            }
            result.err()
        });
        let errors = join_all(closes).await;
        LevelError::combine(errors)
    }
}
