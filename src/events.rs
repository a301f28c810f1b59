//! Database event observers
//!
//! Listeners are registered per event kind. Producers check
//! [`EventEmitter::has_listeners`] before building expensive payloads.

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::RwLock;

use crate::batch::WriteOperation;
use crate::db::ClearOptions;

/// Kinds of events a database emits
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventKind {
    Opening,
    Open,
    Closing,
    Closed,
    Write,
    Clear,
}

/// An emitted event
#[derive(Debug, Clone)]
pub enum DbEvent {
    Opening,
    Open,
    Closing,
    Closed,
    /// Operations committed by one `put`, `del` or batch, in commit order
    Write(Arc<Vec<WriteOperation>>),
    /// A range delete completed
    Clear(ClearOptions),
}

impl DbEvent {
    pub fn kind(&self) -> EventKind {
        match self {
            DbEvent::Opening => EventKind::Opening,
            DbEvent::Open => EventKind::Open,
            DbEvent::Closing => EventKind::Closing,
            DbEvent::Closed => EventKind::Closed,
            DbEvent::Write(_) => EventKind::Write,
            DbEvent::Clear(_) => EventKind::Clear,
        }
    }
}

/// Handle returned by `on`, used to remove the listener
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ListenerId(u64);

pub type Listener = Arc<dyn Fn(&DbEvent) + Send + Sync>;

/// Registry of event listeners
pub struct EventEmitter {
    next_id: AtomicU64,
    listeners: RwLock<Vec<(ListenerId, EventKind, Listener)>>,
}

impl EventEmitter {
    pub fn new() -> Self {
        Self {
            next_id: AtomicU64::new(1),
            listeners: RwLock::new(Vec::new()),
        }
    }

    pub fn on(&self, kind: EventKind, listener: Listener) -> ListenerId {
        let id = ListenerId(self.next_id.fetch_add(1, Ordering::Relaxed));
        self.listeners.write().push((id, kind, listener));
        id
    }

    /// Remove a listener; returns `false` if it was not registered
    pub fn off(&self, id: ListenerId) -> bool {
        let mut listeners = self.listeners.write();
        let before = listeners.len();
        listeners.retain(|(lid, _, _)| *lid != id);
        listeners.len() != before
    }

    pub fn has_listeners(&self, kind: EventKind) -> bool {
        self.listeners.read().iter().any(|(_, k, _)| *k == kind)
    }

    /// Deliver an event to every listener of its kind
    ///
    /// Listeners run outside the registry lock and may register or remove
    /// listeners themselves.
    pub fn emit(&self, event: &DbEvent) {
        let kind = event.kind();
        let matching: Vec<Listener> = self
            .listeners
            .read()
            .iter()
            .filter(|(_, k, _)| *k == kind)
            .map(|(_, _, l)| Arc::clone(l))
            .collect();
        for listener in matching {
            listener(event);
        }
    }
}

impl Default for EventEmitter {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for EventEmitter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EventEmitter")
            .field("listeners", &self.listeners.read().len())
            .finish()
    }
}
