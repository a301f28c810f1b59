//! Incrementally built batches
//!
//! A chained batch stages operations synchronously and commits them with
//! one `write()`. Status moves `open -> writing -> closing -> closed`;
//! every call after `write()` or `close()` fails with `BATCH_NOT_OPEN`.

use std::sync::{Arc, Weak};

use futures::future::BoxFuture;
use parking_lot::Mutex;
use tokio::sync::watch;

use super::{validate_operation, Operation, PreparedOp, PrewriteBatch, WriteOperation};
use crate::db::{next_resource_id, Database, DbStatus, DelOptions, PutOptions, Resource};
use crate::encoding::Data;
use crate::error::{HookKind, LevelError, LevelResult};
use crate::events::{DbEvent, EventKind};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum BatchStatus {
    Open,
    Writing,
    Closing,
    Closed,
}

struct BatchState {
    status: BatchStatus,
    operations: Vec<PreparedOp>,
    publics: Vec<WriteOperation>,
}

struct BatchInner {
    id: u64,
    db: Database,
    state: Mutex<BatchState>,
    /// Flips to `true` once the batch is closed
    closed: watch::Sender<bool>,
}

/// A batch built one operation at a time
#[derive(Clone)]
pub struct ChainedBatch {
    inner: Arc<BatchInner>,
}

impl ChainedBatch {
    pub(crate) fn new(db: &Database) -> LevelResult<Self> {
        match db.status() {
            DbStatus::Open | DbStatus::Opening => {}
            DbStatus::Closing | DbStatus::Closed => return Err(LevelError::not_open()),
        }
        let (closed, _) = watch::channel(false);
        let batch = Self {
            inner: Arc::new(BatchInner {
                id: next_resource_id(),
                db: db.clone(),
                state: Mutex::new(BatchState {
                    status: BatchStatus::Open,
                    operations: Vec::new(),
                    publics: Vec::new(),
                }),
                closed,
            }),
        };
        let weak = Arc::downgrade(&batch.inner) as Weak<dyn Resource>;
        db.attach_resource(batch.inner.id, weak);
        Ok(batch)
    }

    /// Number of staged operations, including ones added by hooks
    pub fn length(&self) -> usize {
        self.inner.state.lock().operations.len()
    }

    pub fn is_empty(&self) -> bool {
        self.length() == 0
    }

    /// Stage a put
    pub fn put(&self, key: impl Into<Data>, value: impl Into<Data>) -> LevelResult<&Self> {
        self.put_with(key, value, PutOptions::default())
    }

    pub fn put_with(
        &self,
        key: impl Into<Data>,
        value: impl Into<Data>,
        options: PutOptions,
    ) -> LevelResult<&Self> {
        let op = Operation {
            key_encoding: options.key_encoding,
            value_encoding: options.value_encoding,
            sublevel: options.sublevel,
            ..Operation::put(key, value)
        };
        self.stage(op, "put")?;
        Ok(self)
    }

    /// Stage a delete
    pub fn del(&self, key: impl Into<Data>) -> LevelResult<&Self> {
        self.del_with(key, DelOptions::default())
    }

    pub fn del_with(&self, key: impl Into<Data>, options: DelOptions) -> LevelResult<&Self> {
        let op = Operation {
            key_encoding: options.key_encoding,
            sublevel: options.sublevel,
            ..Operation::del(key)
        };
        self.stage(op, "del")?;
        Ok(self)
    }

    /// Discard every staged operation
    pub fn clear(&self) -> LevelResult<&Self> {
        let mut state = self.inner.state.lock();
        if state.status != BatchStatus::Open {
            return Err(LevelError::BatchNotOpen);
        }
        state.operations.clear();
        state.publics.clear();
        Ok(self)
    }

    fn stage(&self, op: Operation, name: &'static str) -> LevelResult<()> {
        if self.inner.state.lock().status != BatchStatus::Open {
            return Err(LevelError::BatchNotOpen);
        }

        let db = &self.inner.db;
        let mut op = op;
        validate_operation(&op)?;

        let want_public = db.has_listeners(EventKind::Write);
        let mut extra = PrewriteBatch::new(db, want_public);
        let hook = &db.inner.hooks.prewrite;
        if !hook.is_noop() {
            hook.run(&mut op, &mut extra)
                .map_err(|e| LevelError::hook(HookKind::Prewrite, name, e))?;
            validate_operation(&op)?;
        }
        let staged = db.prepare_operation(&op, want_public)?;
        let added = extra.into_added();

        let mut state = self.inner.state.lock();
        // Closed while the hook ran
        if state.status != BatchStatus::Open {
            return Err(LevelError::BatchNotOpen);
        }
        for (op, public) in std::iter::once(staged).chain(added) {
            state.operations.push(op);
            state.publics.extend(public);
        }
        Ok(())
    }

    /// Commit the staged operations and close the batch
    ///
    /// Closes without touching the engine when nothing is staged.
    pub async fn write(&self) -> LevelResult<()> {
        let staged = {
            let mut state = self.inner.state.lock();
            if state.status != BatchStatus::Open {
                return Err(LevelError::BatchNotOpen);
            }
            if state.operations.is_empty() {
                None
            } else {
                state.status = BatchStatus::Writing;
                Some((
                    std::mem::take(&mut state.operations),
                    std::mem::take(&mut state.publics),
                ))
            }
        };
        let Some((operations, publics)) = staged else {
            return self.close().await;
        };

        let db = self.inner.db.clone();
        let result = async {
            db.ready(None).await?;
            db.backend_batch(operations).await
        }
        .await;

        self.inner.state.lock().status = BatchStatus::Closing;
        self.finish();
        result?;

        if !publics.is_empty() {
            db.emit(DbEvent::Write(Arc::new(publics)));
        }
        Ok(())
    }

    /// Discard staged operations and close; safe to call more than once
    pub async fn close(&self) -> LevelResult<()> {
        let waiting = {
            let mut state = self.inner.state.lock();
            match state.status {
                BatchStatus::Open => {
                    state.status = BatchStatus::Closing;
                    state.operations.clear();
                    state.publics.clear();
                    None
                }
                BatchStatus::Writing | BatchStatus::Closing => Some(self.inner.closed.subscribe()),
                BatchStatus::Closed => return Ok(()),
            }
        };

        match waiting {
            None => self.finish(),
            Some(mut rx) => {
                let _ = rx.wait_for(|closed| *closed).await;
            }
        }
        Ok(())
    }

    fn finish(&self) {
        self.inner.state.lock().status = BatchStatus::Closed;
        self.inner.db.detach_resource(self.inner.id);
        self.inner.closed.send_replace(true);
    }

    /// `true` once written or closed
    pub fn is_closed(&self) -> bool {
        self.inner.state.lock().status == BatchStatus::Closed
    }
}

impl Resource for BatchInner {
    fn close_resource(self: Arc<Self>) -> BoxFuture<'static, LevelResult<()>> {
        let batch = ChainedBatch { inner: self };
        Box::pin(async move { batch.close().await })
    }
}

impl std::fmt::Debug for ChainedBatch {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.inner.state.lock();
        f.debug_struct("ChainedBatch")
            .field("id", &self.inner.id)
            .field("status", &state.status)
            .field("length", &state.operations.len())
            .finish()
    }
}
