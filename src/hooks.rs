//! Extension hooks
//!
//! Three independently typed hooks:
//! - `postopen`: async, run sequentially after a successful open
//! - `prewrite`: sync, run once per written operation
//! - `newsub`: sync, run once per sublevel created from this database
//!
//! An empty hook is a no-op checked through a flag. A hook with one
//! function calls it directly; otherwise it iterates the list frozen when
//! functions were last added or removed.

use std::future::Future;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

use futures::future::BoxFuture;
use parking_lot::RwLock;

use crate::batch::{Operation, PrewriteBatch};
use crate::db::{Database, OpenOptions};
use crate::error::LevelResult;
use crate::sublevel::SublevelOptions;

pub type PostopenFn =
    dyn Fn(Database, OpenOptions) -> BoxFuture<'static, LevelResult<()>> + Send + Sync;

pub type PrewriteFn =
    dyn Fn(&mut Operation, &mut PrewriteBatch<'_>) -> LevelResult<()> + Send + Sync;

pub type NewsubFn = dyn Fn(&Database, &SublevelOptions) -> LevelResult<()> + Send + Sync;

/// Handle returned by `add`, used to delete the function again
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct HookId(u64);

static NEXT_HOOK_ID: AtomicU64 = AtomicU64::new(1);

struct HookFunctions<F: ?Sized> {
    functions: Vec<(HookId, Arc<F>)>,
    frozen: Arc<[Arc<F>]>,
}

/// A set of functions of one hook kind
pub struct Hook<F: ?Sized> {
    inner: RwLock<HookFunctions<F>>,
    noop: AtomicBool,
}

impl<F: ?Sized> Hook<F> {
    fn new() -> Self {
        Self {
            inner: RwLock::new(HookFunctions {
                functions: Vec::new(),
                frozen: Vec::new().into(),
            }),
            noop: AtomicBool::new(true),
        }
    }

    /// `true` when no functions are registered
    pub fn is_noop(&self) -> bool {
        self.noop.load(Ordering::Acquire)
    }

    /// Remove a function; returns `false` if it was not registered
    pub fn delete(&self, id: HookId) -> bool {
        let mut inner = self.inner.write();
        let before = inner.functions.len();
        inner.functions.retain(|(fid, _)| *fid != id);
        let removed = inner.functions.len() != before;
        if removed {
            Self::refreeze(&mut inner);
            self.noop.store(inner.functions.is_empty(), Ordering::Release);
        }
        removed
    }

    fn insert(&self, function: Arc<F>) -> HookId {
        let id = HookId(NEXT_HOOK_ID.fetch_add(1, Ordering::Relaxed));
        let mut inner = self.inner.write();
        inner.functions.push((id, function));
        Self::refreeze(&mut inner);
        self.noop.store(false, Ordering::Release);
        id
    }

    fn refreeze(inner: &mut HookFunctions<F>) {
        inner.frozen = inner
            .functions
            .iter()
            .map(|(_, f)| Arc::clone(f))
            .collect::<Vec<_>>()
            .into();
    }

    fn frozen(&self) -> Arc<[Arc<F>]> {
        Arc::clone(&self.inner.read().frozen)
    }
}

impl Hook<PostopenFn> {
    /// Add an async function run after the database opened
    ///
    /// The function sees the database open and may use or close it. Other
    /// tasks, including ones it spawns, wait until every function finished.
    pub fn add<F, Fut>(&self, function: F) -> HookId
    where
        F: Fn(Database, OpenOptions) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = LevelResult<()>> + Send + 'static,
    {
        let boxed: Arc<PostopenFn> = Arc::new(move |db, options| {
            Box::pin(function(db, options)) as BoxFuture<'static, LevelResult<()>>
        });
        self.insert(boxed)
    }

    /// Run every function in order, stopping at the first error
    pub(crate) async fn run(&self, db: &Database, options: &OpenOptions) -> LevelResult<()> {
        let functions = self.frozen();
        if let [only] = &functions[..] {
            return only(db.clone(), options.clone()).await;
        }
        for function in functions.iter() {
            function(db.clone(), options.clone()).await?;
        }
        Ok(())
    }
}

impl Hook<PrewriteFn> {
    /// Add a function that may rewrite operations or append new ones
    pub fn add<F>(&self, function: F) -> HookId
    where
        F: Fn(&mut Operation, &mut PrewriteBatch<'_>) -> LevelResult<()> + Send + Sync + 'static,
    {
        self.insert(Arc::new(function))
    }

    pub(crate) fn run(&self, op: &mut Operation, batch: &mut PrewriteBatch<'_>) -> LevelResult<()> {
        let functions = self.frozen();
        if let [only] = &functions[..] {
            return only(op, batch);
        }
        for function in functions.iter() {
            function(op, batch)?;
        }
        Ok(())
    }
}

impl Hook<NewsubFn> {
    /// Add a function run for each sublevel created from this database
    pub fn add<F>(&self, function: F) -> HookId
    where
        F: Fn(&Database, &SublevelOptions) -> LevelResult<()> + Send + Sync + 'static,
    {
        self.insert(Arc::new(function))
    }

    pub(crate) fn run(&self, sublevel: &Database, options: &SublevelOptions) -> LevelResult<()> {
        let functions = self.frozen();
        if let [only] = &functions[..] {
            return only(sublevel, options);
        }
        for function in functions.iter() {
            function(sublevel, options)?;
        }
        Ok(())
    }
}

/// The hooks of one database
pub struct Hooks {
    pub postopen: Hook<PostopenFn>,
    pub prewrite: Hook<PrewriteFn>,
    pub newsub: Hook<NewsubFn>,
}

impl Hooks {
    pub(crate) fn new() -> Self {
        Self {
            postopen: Hook::new(),
            prewrite: Hook::new(),
            newsub: Hook::new(),
        }
    }
}

impl std::fmt::Debug for Hooks {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Hooks")
            .field("postopen", &!self.postopen.is_noop())
            .field("prewrite", &!self.prewrite.is_noop())
            .field("newsub", &!self.newsub.is_noop())
            .finish()
    }
}
