//! Open/close state machine
//!
//! Transitions: `opening -> open`, `opening -> closed` (failed open),
//! `open -> closing -> closed`, and `closing -> open` when a close fails.
//! Only one transition is in flight at a time. Calls arriving meanwhile
//! wait for it to land and then re-evaluate against the landed state.
//!
//! `postopen` hooks run with the status already `open` but before the open
//! lands. Only the task running the hooks sees the database as open; every
//! other caller waits for the landing as it would during `opening`.

use std::fmt;
use std::sync::Arc;

use futures::future::BoxFuture;
use tokio::sync::{oneshot, watch};

use crate::db::{AbortSignal, Database, DbInner, OpenOptions, Resource};
use crate::error::{HookKind, LevelError, LevelResult};
use crate::events::DbEvent;

/// Lifecycle status of a database
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DbStatus {
    Opening,
    Open,
    Closing,
    Closed,
}

impl DbStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            DbStatus::Opening => "opening",
            DbStatus::Open => "open",
            DbStatus::Closing => "closing",
            DbStatus::Closed => "closed",
        }
    }
}

impl fmt::Display for DbStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

pub(crate) struct LifecycleState {
    pub(crate) status: DbStatus,
    /// Cleared by the first explicit `open()` or `close()`
    pub(crate) defer_open: bool,
    /// `postopen` hooks are running; cleared when the open lands
    pub(crate) postopen: bool,
}

impl LifecycleState {
    pub(crate) fn new() -> Self {
        Self {
            status: DbStatus::Opening,
            defer_open: true,
            postopen: false,
        }
    }
}

tokio::task_local! {
    /// Databases whose `postopen` hooks the current task is running
    static POSTOPEN_SCOPE: Vec<u64>;
}

fn in_postopen_scope(id: u64) -> bool {
    POSTOPEN_SCOPE
        .try_with(|ids| ids.contains(&id))
        .unwrap_or(false)
}

enum Step {
    /// Another transition is in flight
    Wait(watch::Receiver<bool>),
    /// Parked until the database lands
    Park(oneshot::Receiver<LevelResult<()>>),
    /// This call runs the transition
    Begin,
}

async fn landed(mut rx: watch::Receiver<bool>) {
    let _ = rx.wait_for(|in_flight| !*in_flight).await.map(|_| ());
}

async fn unparked(rx: oneshot::Receiver<LevelResult<()>>) -> LevelResult<()> {
    match rx.await {
        Ok(outcome) => outcome,
        Err(_) => Err(LevelError::not_open()),
    }
}

impl Database {
    pub fn status(&self) -> DbStatus {
        self.inner.state.lock().status
    }

    /// Fail unless the database is open, without waiting
    pub(crate) fn check_open(&self) -> LevelResult<()> {
        match self.status() {
            DbStatus::Open => Ok(()),
            _ => Err(LevelError::not_open()),
        }
    }

    /// `true` while this database runs `postopen` hooks for another task
    fn held_by_postopen(&self, state: &LifecycleState) -> bool {
        state.postopen && !in_postopen_scope(self.id())
    }

    /// `true` while the `postopen` hooks of this database or an ancestor
    /// hold the caller back
    pub(crate) fn behind_postopen(&self) -> bool {
        let mut current = Some(self.clone());
        while let Some(db) = current {
            if db.held_by_postopen(&db.inner.state.lock()) {
                return true;
            }
            current = db.parent();
        }
        false
    }

    /// Park behind an ancestor that is still running its `postopen` hooks
    fn park_behind_ancestor(
        &self,
        signal: Option<&AbortSignal>,
    ) -> LevelResult<Option<oneshot::Receiver<LevelResult<()>>>> {
        let mut current = self.parent();
        while let Some(db) = current {
            {
                let state = db.inner.state.lock();
                if db.held_by_postopen(&state) {
                    return db.park(signal).map(Some);
                }
            }
            current = db.parent();
        }
        Ok(None)
    }

    /// Park a continuation until the database lands
    ///
    /// Must be called with the state lock held so a concurrent landing
    /// cannot slip between the status check and the push.
    fn park(
        &self,
        signal: Option<&AbortSignal>,
    ) -> LevelResult<oneshot::Receiver<LevelResult<()>>> {
        let (tx, rx) = oneshot::channel();
        self.inner.deferred.push(
            Box::new(move |outcome| {
                let _ = tx.send(outcome);
            }),
            signal,
        )?;
        Ok(rx)
    }

    /// Wait until the database is open
    ///
    /// Resolves immediately when open, waits through `opening`, and fails
    /// with `DATABASE_NOT_OPEN` otherwise. Aborting `signal` while waiting
    /// fails with `ABORTED`.
    pub async fn ready(&self, signal: Option<&AbortSignal>) -> LevelResult<()> {
        loop {
            if let Some(rx) = self.park_behind_ancestor(signal)? {
                unparked(rx).await?;
                continue;
            }
            let rx = {
                let state = self.inner.state.lock();
                match state.status {
                    DbStatus::Open if self.held_by_postopen(&state) => self.park(signal)?,
                    DbStatus::Open => return Ok(()),
                    DbStatus::Opening => self.park(signal)?,
                    DbStatus::Closing | DbStatus::Closed => return Err(LevelError::not_open()),
                }
            };
            unparked(rx).await?;
        }
    }

    /// Open with the options given at construction
    pub async fn open(&self) -> LevelResult<()> {
        self.open_with(self.inner.open_options.clone()).await
    }

    /// Open the database, or wait for an open in flight
    ///
    /// In passive mode the call never starts an open; it waits for one
    /// started elsewhere and fails if the database does not end up open.
    pub async fn open_with(&self, options: OpenOptions) -> LevelResult<()> {
        self.open_inner(options, false).await
    }

    /// Open, or wait for an open in flight
    ///
    /// `through_postopen` treats a database running its `postopen` hooks as
    /// open, so sublevels can open underneath the hooks.
    pub(crate) async fn open_inner(
        &self,
        options: OpenOptions,
        through_postopen: bool,
    ) -> LevelResult<()> {
        loop {
            let step = {
                let mut state = self.inner.state.lock();
                let passing =
                    state.postopen && (through_postopen || in_postopen_scope(self.id()));
                if *self.inner.landing.borrow() && !passing {
                    Step::Wait(self.inner.landing.subscribe())
                } else {
                    match state.status {
                        DbStatus::Open => return Ok(()),
                        DbStatus::Opening if options.passive => Step::Park(self.park(None)?),
                        DbStatus::Closed | DbStatus::Closing if options.passive => {
                            return Err(LevelError::not_open())
                        }
                        DbStatus::Opening | DbStatus::Closed | DbStatus::Closing => {
                            state.defer_open = false;
                            state.status = DbStatus::Opening;
                            self.inner.landing.send_replace(true);
                            Step::Begin
                        }
                    }
                }
            };

            match step {
                Step::Wait(rx) => landed(rx).await,
                Step::Park(rx) => unparked(rx).await?,
                Step::Begin => return self.run_open(options).await,
            }
        }
    }

    async fn run_open(&self, options: OpenOptions) -> LevelResult<()> {
        tracing::debug!(db = self.id(), "Opening database");
        self.emit(DbEvent::Opening);

        if let Err(err) = self.backend_open(options.clone()).await {
            let closed = self.abandon().await;
            self.land(DbStatus::Closed);
            tracing::debug!(db = self.id(), error = %err, "Open failed");
            return Err(LevelError::DatabaseNotOpen {
                cause: LevelError::combine([Some(err), closed]).map(Box::new),
            });
        }

        if !self.inner.hooks.postopen.is_noop() {
            // Hooks run against an open database and may use or close it.
            // The landing stays raised so other callers keep waiting.
            {
                let mut state = self.inner.state.lock();
                state.status = DbStatus::Open;
                state.postopen = true;
            }
            let mut scope = POSTOPEN_SCOPE.try_with(Vec::clone).unwrap_or_default();
            scope.push(self.id());
            let hooked = POSTOPEN_SCOPE
                .scope(scope, self.inner.hooks.postopen.run(self, &options))
                .await;

            let rollback = {
                let mut state = self.inner.state.lock();
                if state.status != DbStatus::Open || !state.postopen {
                    None
                } else if hooked.is_err() {
                    state.status = DbStatus::Closing;
                    state.postopen = false;
                    Some(true)
                } else {
                    Some(false)
                }
            };

            match rollback {
                None => {
                    return Err(LevelError::DatabaseNotOpen {
                        cause: hooked
                            .err()
                            .map(|e| Box::new(LevelError::hook(HookKind::Postopen, "open", e))),
                    })
                }
                Some(true) => {
                    let closed = self.abandon().await;
                    let backend = self.backend_close().await.err();
                    if let Some(e) = LevelError::combine([closed, backend]) {
                        tracing::warn!(db = self.id(), error = %e, "Failed to close after postopen hook error");
                    }
                    self.land(DbStatus::Closed);
                    let cause = match hooked {
                        Err(e) => e,
                        Ok(()) => LevelError::not_open(),
                    };
                    return Err(LevelError::hook(HookKind::Postopen, "open", cause));
                }
                Some(false) => {}
            }
        }

        self.land(DbStatus::Open);
        tracing::debug!(db = self.id(), "Database open");
        self.emit(DbEvent::Open);
        Ok(())
    }

    /// Close the database and every attached resource
    ///
    /// Idempotent. A failed close rolls the database back to `open`.
    pub async fn close(&self) -> LevelResult<()> {
        loop {
            let mut unopened = false;
            let step = {
                let mut state = self.inner.state.lock();
                let passing = state.postopen && in_postopen_scope(self.id());
                if *self.inner.landing.borrow() && !passing {
                    Step::Wait(self.inner.landing.subscribe())
                } else {
                    match state.status {
                        DbStatus::Closed => return Ok(()),
                        DbStatus::Opening => {
                            state.defer_open = false;
                            state.status = DbStatus::Closing;
                            self.inner.landing.send_replace(true);
                            unopened = true;
                            Step::Begin
                        }
                        DbStatus::Open | DbStatus::Closing => {
                            state.status = DbStatus::Closing;
                            self.inner.landing.send_replace(true);
                            Step::Begin
                        }
                    }
                }
            };

            match step {
                Step::Wait(rx) => landed(rx).await,
                Step::Park(rx) => unparked(rx).await?,
                Step::Begin if unopened => return self.close_unopened().await,
                Step::Begin => return self.run_close().await,
            }
        }
    }

    /// Close a database that never finished opening
    async fn close_unopened(&self) -> LevelResult<()> {
        if let Some(e) = self.abandon().await {
            tracing::warn!(db = self.id(), error = %e, "Failed to close resources of unopened database");
        }
        self.land(DbStatus::Closed);
        Ok(())
    }

    async fn run_close(&self) -> LevelResult<()> {
        tracing::debug!(db = self.id(), "Closing database");
        self.emit(DbEvent::Closing);

        let resources = self.inner.resources.close_all().await;
        let backend = self.backend_close().await.err();

        if let Some(err) = LevelError::combine([resources, backend]) {
            self.land(DbStatus::Open);
            tracing::debug!(db = self.id(), error = %err, "Close failed; database stays open");
            return Err(LevelError::DatabaseNotClosed {
                cause: Some(Box::new(err)),
            });
        }

        self.land(DbStatus::Closed);
        tracing::debug!(db = self.id(), "Database closed");
        self.emit(DbEvent::Closed);
        Ok(())
    }

    /// Leave a failed or cancelled open: reject parked operations first so
    /// resources waiting on them can close, then close the resources
    async fn abandon(&self) -> Option<LevelError> {
        self.inner.state.lock().status = DbStatus::Closing;
        self.inner.deferred.drain(false);
        self.inner.resources.close_all().await
    }

    /// Settle a transition and run everything parked behind it
    fn land(&self, status: DbStatus) {
        {
            let mut state = self.inner.state.lock();
            state.status = status;
            state.postopen = false;
            self.inner.landing.send_replace(false);
        }
        self.inner.deferred.drain(status == DbStatus::Open);
    }
}

/// A sublevel is closed by its parent like any other resource
impl Resource for DbInner {
    fn close_resource(self: Arc<Self>) -> BoxFuture<'static, LevelResult<()>> {
        let db = Database { inner: self };
        Box::pin(async move { db.close().await })
    }
}
