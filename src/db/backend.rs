//! Primitive dispatch
//!
//! Every operation leaves a database through one of these methods. A root
//! hands the encoded operation to its engine. A sublevel prefixes keys and
//! range bounds with its local prefix and passes them to its parent, which
//! checks it is open and repeats until the root is reached. Forwarding does
//! not run the parent's hooks or emit its events.

use std::mem;
use std::sync::{Arc, Weak};

use futures::future::BoxFuture;

use crate::batch::PreparedOp;
use crate::db::{Backend, Database, OpenOptions, Resource};
use crate::encoding::{Encoded, Format};
use crate::error::{LevelError, LevelResult};
use crate::storage::{EncodedOperation, FetchOptions, RawIterator, RawSnapshot, ScanOptions};

impl Database {
    pub(crate) fn backend_open(&self, options: OpenOptions) -> BoxFuture<'static, LevelResult<()>> {
        let db = self.clone();
        Box::pin(async move {
            match &db.inner.backend {
                Backend::Engine(engine) => Ok(engine.open(&options).await?),
                Backend::Sublevel(link) => {
                    // Sublevels never open their parent, they wait for it.
                    // Outside callers of the sublevel still wait behind the
                    // parent's postopen hooks in `ready()`.
                    let parent = link.parent.clone();
                    let passive = OpenOptions {
                        passive: true,
                        ..options
                    };
                    parent.open_inner(passive, true).await?;
                    let weak = Arc::downgrade(&db.inner) as Weak<dyn Resource>;
                    parent.attach_resource(db.id(), weak);
                    Ok(())
                }
            }
        })
    }

    pub(crate) fn backend_close(&self) -> BoxFuture<'static, LevelResult<()>> {
        let db = self.clone();
        Box::pin(async move {
            match &db.inner.backend {
                Backend::Engine(engine) => Ok(engine.close().await?),
                Backend::Sublevel(link) => {
                    link.parent.detach_resource(db.id());
                    Ok(())
                }
            }
        })
    }

    pub(crate) fn backend_get(
        &self,
        key: Encoded,
        options: FetchOptions,
    ) -> BoxFuture<'static, LevelResult<Option<Encoded>>> {
        let db = self.clone();
        Box::pin(async move {
            match &db.inner.backend {
                Backend::Engine(engine) => Ok(engine.get(key, &options).await?),
                Backend::Sublevel(link) => {
                    let key = link.prefix.local.apply(key);
                    link.forward()?.backend_get(key, options).await
                }
            }
        })
    }

    pub(crate) fn backend_get_many(
        &self,
        keys: Vec<Encoded>,
        options: FetchOptions,
    ) -> BoxFuture<'static, LevelResult<Vec<Option<Encoded>>>> {
        let db = self.clone();
        Box::pin(async move {
            match &db.inner.backend {
                Backend::Engine(engine) => Ok(engine.get_many(keys, &options).await?),
                Backend::Sublevel(link) => {
                    let keys = keys
                        .into_iter()
                        .map(|k| link.prefix.local.apply(k))
                        .collect();
                    link.forward()?.backend_get_many(keys, options).await
                }
            }
        })
    }

    pub(crate) fn backend_has(
        &self,
        key: Encoded,
        options: FetchOptions,
    ) -> BoxFuture<'static, LevelResult<bool>> {
        let db = self.clone();
        Box::pin(async move {
            match &db.inner.backend {
                Backend::Engine(engine) => Ok(engine.has(key, &options).await?),
                Backend::Sublevel(link) => {
                    let key = link.prefix.local.apply(key);
                    link.forward()?.backend_has(key, options).await
                }
            }
        })
    }

    pub(crate) fn backend_has_many(
        &self,
        keys: Vec<Encoded>,
        options: FetchOptions,
    ) -> BoxFuture<'static, LevelResult<Vec<bool>>> {
        let db = self.clone();
        Box::pin(async move {
            match &db.inner.backend {
                Backend::Engine(engine) => Ok(engine.has_many(keys, &options).await?),
                Backend::Sublevel(link) => {
                    let keys = keys
                        .into_iter()
                        .map(|k| link.prefix.local.apply(k))
                        .collect();
                    link.forward()?.backend_has_many(keys, options).await
                }
            }
        })
    }

    pub(crate) fn backend_put(
        &self,
        key: Encoded,
        value: Encoded,
    ) -> BoxFuture<'static, LevelResult<()>> {
        let db = self.clone();
        Box::pin(async move {
            match &db.inner.backend {
                Backend::Engine(engine) => Ok(engine.put(key, value).await?),
                Backend::Sublevel(link) => {
                    let key = link.prefix.local.apply(key);
                    link.forward()?.backend_put(key, value).await
                }
            }
        })
    }

    pub(crate) fn backend_del(&self, key: Encoded) -> BoxFuture<'static, LevelResult<()>> {
        let db = self.clone();
        Box::pin(async move {
            match &db.inner.backend {
                Backend::Engine(engine) => Ok(engine.del(key).await?),
                Backend::Sublevel(link) => {
                    let key = link.prefix.local.apply(key);
                    link.forward()?.backend_del(key).await
                }
            }
        })
    }

    /// Commit prepared operations in one atomic engine batch
    ///
    /// Operations aimed at a sublevel outside this database's subtree stay
    /// pending until they reach an ancestor of that sublevel.
    pub(crate) fn backend_batch(
        &self,
        operations: Vec<PreparedOp>,
    ) -> BoxFuture<'static, LevelResult<()>> {
        let db = self.clone();
        Box::pin(async move {
            let mut operations = operations;
            db.resolve_pending(&mut operations);

            match &db.inner.backend {
                Backend::Engine(engine) => {
                    let mut encoded = Vec::with_capacity(operations.len());
                    for op in operations {
                        if op.pending.is_some() {
                            return Err(LevelError::NotSupported(
                                "operation targets a sublevel of another database".into(),
                            ));
                        }
                        encoded.push(EncodedOperation {
                            kind: op.kind,
                            key: op.key,
                            value: op.value,
                        });
                    }
                    Ok(engine.batch(encoded).await?)
                }
                Backend::Sublevel(link) => {
                    for op in operations.iter_mut().filter(|op| op.pending.is_none()) {
                        let key = mem::replace(&mut op.key, Encoded::empty(Format::Utf8));
                        op.key = link.prefix.local.apply(key);
                    }
                    link.forward()?.backend_batch(operations).await
                }
            }
        })
    }

    /// Apply the prefixes of pending operations whose target lives below
    /// this database
    fn resolve_pending(&self, operations: &mut [PreparedOp]) {
        for op in operations.iter_mut() {
            let Some(target) = op.pending.take() else {
                continue;
            };
            let key = mem::replace(&mut op.key, Encoded::empty(Format::Utf8));
            match target.prefix_chain(key, self) {
                Ok(key) => op.key = key,
                Err(key) => {
                    op.key = key;
                    op.pending = Some(target);
                }
            }
        }
    }

    /// Delete a range; a sublevel scopes the range to its namespace first
    pub(crate) fn backend_clear(&self, options: ScanOptions) -> BoxFuture<'static, LevelResult<()>> {
        let db = self.clone();
        Box::pin(async move {
            match &db.inner.backend {
                Backend::Engine(engine) => Ok(engine.clear(options).await?),
                Backend::Sublevel(link) => {
                    let mut options = options;
                    options.range = link.prefix.scope_range(options.range, options.key_format);
                    link.forward()?.backend_clear(options).await
                }
            }
        })
    }

    pub(crate) fn backend_iterator(
        &self,
        options: ScanOptions,
    ) -> LevelResult<Box<dyn RawIterator>> {
        match &self.inner.backend {
            Backend::Engine(engine) => Ok(engine.iterator(options)?),
            Backend::Sublevel(link) => {
                let mut options = options;
                options.range = link.prefix.scope_range(options.range, options.key_format);
                link.forward()?.backend_iterator(options)
            }
        }
    }

    pub(crate) fn backend_snapshot(&self) -> BoxFuture<'static, LevelResult<Arc<dyn RawSnapshot>>> {
        let db = self.clone();
        Box::pin(async move {
            match &db.inner.backend {
                Backend::Engine(engine) => Ok(engine.snapshot().await?),
                Backend::Sublevel(link) => link.forward()?.backend_snapshot().await,
            }
        })
    }
}
