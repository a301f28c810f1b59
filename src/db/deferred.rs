//! Deferred operations and abort signals
//!
//! Operations issued while a database is opening are parked here as
//! continuations and run exactly once, in FIFO order, when the database
//! lands in `open` or `closed`. A continuation may carry an
//! [`AbortSignal`]; aborting the signal rejects only the continuations
//! registered with it.

use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};

use parking_lot::Mutex;
use tokio::runtime::Handle;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::error::{LevelError, LevelResult};

static NEXT_SIGNAL_ID: AtomicU64 = AtomicU64::new(1);

/// Cooperative cancellation for deferred operations
///
/// Aborting removes and rejects queued operations registered with this
/// signal. Work already handed to an engine is not interrupted.
#[derive(Clone)]
pub struct AbortSignal {
    id: u64,
    token: CancellationToken,
}

impl AbortSignal {
    pub fn new() -> Self {
        Self::from_token(CancellationToken::new())
    }

    /// Wrap an existing token, e.g. a child of an application-wide one
    pub fn from_token(token: CancellationToken) -> Self {
        Self {
            id: NEXT_SIGNAL_ID.fetch_add(1, Ordering::Relaxed),
            token,
        }
    }

    pub fn abort(&self) {
        self.token.cancel();
    }

    pub fn is_aborted(&self) -> bool {
        self.token.is_cancelled()
    }

    pub fn token(&self) -> &CancellationToken {
        &self.token
    }
}

impl Default for AbortSignal {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for AbortSignal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AbortSignal")
            .field("id", &self.id)
            .field("aborted", &self.is_aborted())
            .finish()
    }
}

/// Continuation run when the database lands, or rejected on abort
pub(crate) type Continuation = Box<dyn FnOnce(LevelResult<()>) + Send>;

struct Deferred {
    continuation: Continuation,
    signal: Option<u64>,
}

struct SignalWatch {
    seqs: Vec<u64>,
    watcher: Option<JoinHandle<()>>,
}

#[derive(Default)]
struct QueueState {
    next_seq: u64,
    entries: BTreeMap<u64, Deferred>,
    signals: HashMap<u64, SignalWatch>,
}

/// FIFO queue of continuations
#[derive(Default)]
pub(crate) struct DeferredQueue {
    state: Mutex<QueueState>,
}

impl DeferredQueue {
    pub(crate) fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub(crate) fn len(&self) -> usize {
        self.state.lock().entries.len()
    }

    /// Park a continuation
    ///
    /// Fails with [`LevelError::Aborted`] without queueing when the signal
    /// is already aborted.
    pub(crate) fn push(
        self: &Arc<Self>,
        continuation: Continuation,
        signal: Option<&AbortSignal>,
    ) -> LevelResult<()> {
        if signal.is_some_and(|s| s.is_aborted()) {
            return Err(LevelError::Aborted);
        }

        let mut state = self.state.lock();
        let seq = state.next_seq;
        state.next_seq += 1;
        state.entries.insert(
            seq,
            Deferred {
                continuation,
                signal: signal.map(|s| s.id),
            },
        );

        if let Some(signal) = signal {
            let watch = state.signals.entry(signal.id).or_insert_with(|| SignalWatch {
                seqs: Vec::new(),
                watcher: self.watch(signal),
            });
            watch.seqs.push(seq);
        }
        Ok(())
    }

    /// One watcher task per distinct signal
    fn watch(self: &Arc<Self>, signal: &AbortSignal) -> Option<JoinHandle<()>> {
        let handle = Handle::try_current().ok()?;
        let queue: Weak<Self> = Arc::downgrade(self);
        let token = signal.token.clone();
        let id = signal.id;
        Some(handle.spawn(async move {
            token.cancelled().await;
            if let Some(queue) = queue.upgrade() {
                queue.abort(id);
            }
        }))
    }

    /// Reject the continuations registered with one signal
    pub(crate) fn abort(&self, signal_id: u64) {
        let aborted: Vec<Continuation> = {
            let mut state = self.state.lock();
            let Some(watch) = state.signals.remove(&signal_id) else {
                return;
            };
            watch
                .seqs
                .iter()
                .filter_map(|seq| state.entries.remove(seq))
                .map(|d| d.continuation)
                .collect()
        };

        tracing::debug!(signal = signal_id, count = aborted.len(), "aborting deferred operations");
        for continuation in aborted {
            continuation(Err(LevelError::Aborted));
        }
    }

    /// Run every parked continuation in order
    ///
    /// `opened` tells continuations whether the database landed in `open`.
    pub(crate) fn drain(&self, opened: bool) {
        let (entries, signals) = {
            let mut state = self.state.lock();
            (
                std::mem::take(&mut state.entries),
                std::mem::take(&mut state.signals),
            )
        };

        for watch in signals.into_values() {
            if let Some(watcher) = watch.watcher {
                watcher.abort();
            }
        }
        for (_, deferred) in entries {
            let outcome = if opened {
                Ok(())
            } else {
                Err(LevelError::not_open())
            };
            (deferred.continuation)(outcome);
        }
    }
}

impl Drop for DeferredQueue {
    fn drop(&mut self) {
        for watch in self.state.get_mut().signals.values_mut() {
            if let Some(watcher) = watch.watcher.take() {
                watcher.abort();
            }
        }
    }
}
