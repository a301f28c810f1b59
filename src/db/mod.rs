//! The database
//!
//! A [`Database`] enforces the contract on top of a primitive engine:
//! lifecycle, encodings, validation, hooks, events and attached resources.
//! A sublevel is a `Database` whose backend forwards to its parent with the
//! key rewritten, so it is usable anywhere a database is.

mod backend;
mod deferred;
mod lifecycle;
mod ops;
mod options;
mod resources;

use std::fmt;
use std::sync::Arc;

use parking_lot::Mutex;
use tokio::runtime::Handle;
use tokio::sync::watch;

use crate::encoding::{Encoded, Encoding, EncodingSpec, Transcoder};
use crate::error::{LevelError, LevelResult};
use crate::events::{DbEvent, EventEmitter, EventKind, ListenerId};
use crate::hooks::Hooks;
use crate::storage::{StorageEngine, Supports};
use crate::sublevel::SublevelLink;

pub use deferred::AbortSignal;
pub use lifecycle::DbStatus;
pub use options::{
    ClearOptions, DatabaseOptions, DelOptions, IteratorOptions, OpenOptions, PutOptions,
    RangeOptions, ReadOptions, WriteOptions,
};

pub(crate) use deferred::DeferredQueue;
pub(crate) use lifecycle::LifecycleState;
pub(crate) use ops::{decode_key, decode_value, encode_key, encode_range, encode_value};
pub(crate) use resources::{next_resource_id, Resource, ResourceRegistry};

/// Where primitive operations go
pub(crate) enum Backend {
    Engine(Arc<dyn StorageEngine>),
    Sublevel(SublevelLink),
}

pub(crate) struct DbInner {
    pub(crate) id: u64,
    pub(crate) backend: Backend,
    pub(crate) supports: Supports,
    /// Shared by a root and all of its sublevels
    pub(crate) transcoder: Arc<Transcoder>,
    pub(crate) key_encoding: Encoding,
    pub(crate) value_encoding: Encoding,
    pub(crate) state: Mutex<LifecycleState>,
    /// `true` while an open or close is in flight
    pub(crate) landing: watch::Sender<bool>,
    pub(crate) deferred: Arc<DeferredQueue>,
    pub(crate) resources: ResourceRegistry,
    pub(crate) hooks: Hooks,
    pub(crate) events: EventEmitter,
    pub(crate) open_options: OpenOptions,
}

/// A sorted key-value database, or a sublevel of one
///
/// Cloning is cheap and yields a handle to the same database.
#[derive(Clone)]
pub struct Database {
    pub(crate) inner: Arc<DbInner>,
}

impl Database {
    /// Create a database over an engine with default options
    ///
    /// When called inside a tokio runtime the database starts opening on
    /// its own; otherwise it stays `opening` until [`Database::open`].
    pub fn new(engine: impl StorageEngine) -> LevelResult<Self> {
        Self::with_options(Arc::new(engine), DatabaseOptions::default())
    }

    pub fn with_options(
        engine: Arc<dyn StorageEngine>,
        options: DatabaseOptions,
    ) -> LevelResult<Self> {
        let supports = engine.supports();
        let transcoder = Arc::new(Transcoder::new(&supports.formats)?);
        let key_encoding = transcoder.resolve(&options.key_encoding)?;
        let value_encoding = transcoder.resolve(&options.value_encoding)?;

        let db = Self::from_parts(
            Backend::Engine(engine),
            supports,
            transcoder,
            key_encoding,
            value_encoding,
            options.open,
        );
        if options.auto_open {
            db.schedule_open();
        }
        Ok(db)
    }

    pub(crate) fn from_parts(
        backend: Backend,
        supports: Supports,
        transcoder: Arc<Transcoder>,
        key_encoding: Encoding,
        value_encoding: Encoding,
        open_options: OpenOptions,
    ) -> Self {
        let (landing, _) = watch::channel(false);
        Self {
            inner: Arc::new(DbInner {
                id: next_resource_id(),
                backend,
                supports,
                transcoder,
                key_encoding,
                value_encoding,
                state: Mutex::new(LifecycleState::new()),
                landing,
                deferred: DeferredQueue::new(),
                resources: ResourceRegistry::new(),
                hooks: Hooks::new(),
                events: EventEmitter::new(),
                open_options,
            }),
        }
    }

    /// Open on the current runtime unless an explicit open or close came first
    pub(crate) fn schedule_open(&self) {
        let Ok(handle) = Handle::try_current() else {
            tracing::debug!(db = self.id(), "No runtime; open deferred until open() is called");
            return;
        };
        let db = self.clone();
        handle.spawn(async move {
            let pending = db.inner.state.lock().defer_open;
            if !pending {
                return;
            }
            if let Err(e) = db.open().await {
                tracing::warn!(db = db.id(), error = %e, "Scheduled open failed");
            }
        });
    }

    pub fn id(&self) -> u64 {
        self.inner.id
    }

    /// `true` when both handles refer to the same database
    pub fn is(&self, other: &Database) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }

    /// Capabilities of the underlying engine
    pub fn supports(&self) -> &Supports {
        &self.inner.supports
    }

    pub fn hooks(&self) -> &Hooks {
        &self.inner.hooks
    }

    /// Default key encoding
    pub fn key_encoding(&self) -> &Encoding {
        &self.inner.key_encoding
    }

    /// Default value encoding
    pub fn value_encoding(&self) -> &Encoding {
        &self.inner.value_encoding
    }

    /// Resolve an encoding against the engine's formats
    pub fn resolve_encoding(&self, spec: &EncodingSpec) -> LevelResult<Encoding> {
        self.inner.transcoder.resolve(spec)
    }

    pub(crate) fn key_encoding_for(&self, spec: Option<&EncodingSpec>) -> LevelResult<Encoding> {
        match spec {
            Some(spec) => self.inner.transcoder.resolve(spec),
            None => Ok(self.inner.key_encoding.clone()),
        }
    }

    pub(crate) fn value_encoding_for(&self, spec: Option<&EncodingSpec>) -> LevelResult<Encoding> {
        match spec {
            Some(spec) => self.inner.transcoder.resolve(spec),
            None => Ok(self.inner.value_encoding.clone()),
        }
    }

    /// Register an event listener
    pub fn on<F>(&self, kind: EventKind, listener: F) -> ListenerId
    where
        F: Fn(&DbEvent) + Send + Sync + 'static,
    {
        self.inner.events.on(kind, Arc::new(listener))
    }

    /// Remove an event listener; returns `false` if it was not registered
    pub fn off(&self, id: ListenerId) -> bool {
        self.inner.events.off(id)
    }

    pub(crate) fn emit(&self, event: DbEvent) {
        self.inner.events.emit(&event);
    }

    pub(crate) fn has_listeners(&self, kind: EventKind) -> bool {
        self.inner.events.has_listeners(kind)
    }

    pub(crate) fn attach_resource(&self, id: u64, resource: std::sync::Weak<dyn Resource>) {
        self.inner.resources.attach(id, resource);
    }

    pub(crate) fn detach_resource(&self, id: u64) {
        self.inner.resources.detach(id);
    }

    /// Number of open resources attached to this database
    pub fn resource_count(&self) -> usize {
        self.inner.resources.len()
    }

    pub(crate) fn link(&self) -> Option<&SublevelLink> {
        match &self.inner.backend {
            Backend::Sublevel(link) => Some(link),
            Backend::Engine(_) => None,
        }
    }

    /// Parent database; `None` for a root
    pub fn parent(&self) -> Option<Database> {
        self.link().map(|link| link.parent.clone())
    }

    /// Root database; the database itself for a root
    pub fn root(&self) -> Database {
        match self.link() {
            Some(link) => link.root.clone(),
            None => self.clone(),
        }
    }

    /// Global key prefix; empty for a root
    pub fn prefix(&self) -> &str {
        match self.link() {
            Some(link) => link.prefix.global.as_str(),
            None => "",
        }
    }

    pub(crate) fn global_prefix_len(&self) -> usize {
        self.link().map_or(0, |link| link.prefix.global.len())
    }

    /// Names from the root down to this sublevel, or only this sublevel's
    /// own names when `local` is set
    pub fn path(&self, local: bool) -> Vec<String> {
        let Some(link) = self.link() else {
            return Vec::new();
        };
        if local {
            return link.names.clone();
        }
        let mut path = link.parent.path(false);
        path.extend(link.names.iter().cloned());
        path
    }

    /// Prefix an encoded key with this sublevel's local or global prefix
    ///
    /// The key is returned unchanged on a root.
    pub fn prefix_key(&self, key: Encoded, local: bool) -> Encoded {
        match self.link() {
            Some(link) if local => link.prefix.local.apply(key),
            Some(link) => link.prefix.global.apply(key),
            None => key,
        }
    }

    /// `true` when this database is `ancestor` or nested below it
    pub(crate) fn descends_from(&self, ancestor: &Database) -> bool {
        let mut current = self.clone();
        loop {
            if current.is(ancestor) {
                return true;
            }
            match current.parent() {
                Some(parent) => current = parent,
                None => return false,
            }
        }
    }

    /// Prefix a key of this database into the key space of `ancestor`
    ///
    /// Applies the local prefixes from this database up to, but excluding,
    /// `ancestor`. Gives the key back when `ancestor` is not an ancestor.
    pub(crate) fn prefix_chain(&self, key: Encoded, ancestor: &Database) -> Result<Encoded, Encoded> {
        if !self.descends_from(ancestor) {
            return Err(key);
        }
        let mut key = key;
        let mut current = self.clone();
        while !current.is(ancestor) {
            let Some(link) = current.link() else {
                break;
            };
            key = link.prefix.local.apply(key);
            let parent = link.parent.clone();
            current = parent;
        }
        Ok(key)
    }

    pub(crate) fn assert_same_root(&self, other: &Database) -> LevelResult<()> {
        if self.root().is(&other.root()) {
            Ok(())
        } else {
            Err(LevelError::NotSupported(
                "operations on a sublevel of another database".into(),
            ))
        }
    }
}

impl fmt::Debug for Database {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Database")
            .field("id", &self.id())
            .field("prefix", &self.prefix())
            .field("status", &self.status())
            .field("key_encoding", &self.key_encoding().name())
            .field("value_encoding", &self.value_encoding().name())
            .finish()
    }
}
