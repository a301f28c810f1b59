//! Iterators
//!
//! An iterator wraps a primitive engine cursor and enforces the protocol
//! around it: one fetch at a time, seek only between fetches, an overall
//! limit, and a close that waits for the fetch in flight. Once the end of
//! data or the limit is reached no further primitive calls are made.
//!
//! `next()`, `nextv()` and `all()` check the iterator state when called,
//! not when awaited, so a second call made before the first settled fails
//! with `ITERATOR_BUSY` right away.

use std::fmt;
use std::mem;
use std::sync::{Arc, Weak};

use futures::future::{self, BoxFuture};
use futures::stream::{self, Stream};
use parking_lot::Mutex;
use tokio::runtime::Handle;
use tokio::sync::watch;

use crate::db::{
    decode_key, decode_value, encode_key, encode_range, next_resource_id, Database, DbStatus,
    IteratorOptions, Resource,
};
use crate::encoding::{Data, Encoded, Encoding, EncodingSpec};
use crate::error::{LevelError, LevelResult};
use crate::snapshot::SnapshotGuard;
use crate::storage::{RawEntry, RawIterator, ScanOptions};
use crate::sublevel::unfix;

/// Entries fetched per primitive call by `all()`
const ALL_CHUNK_SIZE: usize = 1000;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum IterStatus {
    Idle,
    Fetching,
    Closing,
    Closed,
}

struct IterState {
    status: IterStatus,
    /// Entries yielded so far
    count: usize,
    /// End of data or limit reached; no more primitive fetches
    ended: bool,
    /// `close()` called while a fetch was in flight
    close_requested: bool,
}

enum RawSlot {
    /// Database still opening; seeks are replayed once the cursor exists
    Pending {
        options: ScanOptions,
        seeks: Vec<Encoded>,
    },
    Ready(Box<dyn RawIterator>),
    Closed,
}

/// One decoded entry; a half is `None` when it was not requested
#[derive(Debug, Clone, PartialEq)]
pub struct Entry {
    pub key: Option<Data>,
    pub value: Option<Data>,
}

struct IteratorCore {
    id: u64,
    db: Database,
    state: Mutex<IterState>,
    raw: tokio::sync::Mutex<RawSlot>,
    /// Flips to `true` once the iterator is closed
    closed: watch::Sender<bool>,
    key_encoding: Encoding,
    value_encoding: Encoding,
    keys: bool,
    values: bool,
    limit: Option<usize>,
    /// Length of the global prefix stripped from returned keys
    prefix_len: usize,
    snapshot: Mutex<Option<SnapshotGuard>>,
}

/// Marks a fetch in flight; a fetch future dropped before it settled
/// returns the iterator to idle
struct FetchGuard {
    core: Arc<IteratorCore>,
    settled: bool,
}

impl Drop for FetchGuard {
    fn drop(&mut self) {
        if self.settled || !self.core.end_fetch() {
            return;
        }
        // A close was waiting on the abandoned fetch
        let core = Arc::clone(&self.core);
        match Handle::try_current() {
            Ok(handle) => {
                handle.spawn(async move {
                    if let Err(e) = core.finish_close().await {
                        tracing::warn!(iterator = core.id, error = %e, "Failed to close iterator");
                    }
                });
            }
            Err(_) => tracing::warn!(iterator = core.id, "No runtime to finish iterator close"),
        }
    }
}

impl IteratorCore {
    fn new(
        db: &Database,
        options: IteratorOptions,
        keys: bool,
        values: bool,
    ) -> LevelResult<Arc<Self>> {
        let status = db.status();
        if !matches!(status, DbStatus::Open | DbStatus::Opening) {
            return Err(LevelError::not_open());
        }

        let key_encoding = db.key_encoding_for(options.key_encoding.as_ref())?;
        let value_encoding = db.value_encoding_for(options.value_encoding.as_ref())?;
        let range = encode_range(&options.range, &key_encoding)?;
        let snapshot = options
            .snapshot
            .as_ref()
            .map(|s| s.acquire(db))
            .transpose()?;

        let scan = ScanOptions {
            range,
            reverse: options.reverse,
            limit: options.limit,
            keys,
            values,
            key_format: key_encoding.format(),
            value_format: value_encoding.format(),
            snapshot: snapshot.as_ref().map(SnapshotGuard::raw),
        };
        let raw = if status == DbStatus::Open && !db.behind_postopen() {
            RawSlot::Ready(db.backend_iterator(scan)?)
        } else {
            RawSlot::Pending {
                options: scan,
                seeks: Vec::new(),
            }
        };

        let (closed, _) = watch::channel(false);
        let core = Arc::new(Self {
            id: next_resource_id(),
            db: db.clone(),
            state: Mutex::new(IterState {
                status: IterStatus::Idle,
                count: 0,
                ended: options.limit == Some(0),
                close_requested: false,
            }),
            raw: tokio::sync::Mutex::new(raw),
            closed,
            key_encoding,
            value_encoding,
            keys,
            values,
            limit: options.limit,
            prefix_len: db.global_prefix_len(),
            snapshot: Mutex::new(snapshot),
        });

        let weak = Arc::downgrade(&core) as Weak<dyn Resource>;
        db.attach_resource(core.id, weak);
        Ok(core)
    }

    fn begin_fetch(self: &Arc<Self>) -> LevelResult<FetchGuard> {
        let mut state = self.state.lock();
        match state.status {
            IterStatus::Closing | IterStatus::Closed => Err(LevelError::IteratorNotOpen),
            IterStatus::Fetching if state.close_requested => Err(LevelError::IteratorNotOpen),
            IterStatus::Fetching => Err(LevelError::IteratorBusy),
            IterStatus::Idle => {
                state.status = IterStatus::Fetching;
                Ok(FetchGuard {
                    core: Arc::clone(self),
                    settled: false,
                })
            }
        }
    }

    /// Leave the fetching state; `true` when a close is now due
    fn end_fetch(&self) -> bool {
        let mut state = self.state.lock();
        if state.close_requested {
            state.status = IterStatus::Closing;
            true
        } else {
            state.status = IterStatus::Idle;
            false
        }
    }

    async fn settle(&self, mut guard: FetchGuard) {
        guard.settled = true;
        if self.end_fetch() {
            if let Err(e) = self.finish_close().await {
                tracing::warn!(iterator = self.id, error = %e, "Failed to close iterator");
            }
        }
    }

    fn ended(&self) -> bool {
        self.state.lock().ended
    }

    /// Size of the next primitive fetch after applying the limit
    fn budget(&self, size: usize) -> usize {
        let mut state = self.state.lock();
        if state.ended {
            return 0;
        }
        let size = match self.limit {
            Some(limit) => size.min(limit.saturating_sub(state.count)),
            None => size,
        };
        if size == 0 {
            state.ended = true;
        }
        size
    }

    /// Create the primitive cursor of an iterator made while opening
    async fn ensure_raw(&self, slot: &mut RawSlot) -> LevelResult<()> {
        if !matches!(slot, RawSlot::Pending { .. }) {
            return Ok(());
        }
        self.db.ready(None).await?;
        if let RawSlot::Pending { options, seeks } = mem::replace(slot, RawSlot::Closed) {
            let mut raw = self.db.backend_iterator(options)?;
            for target in seeks {
                raw.seek(target)?;
            }
            *slot = RawSlot::Ready(raw);
        }
        Ok(())
    }

    async fn fetch_raw(&self, size: usize, single: bool) -> LevelResult<Vec<RawEntry>> {
        let size = self.budget(size);
        if size == 0 {
            return Ok(Vec::new());
        }

        let mut slot = self.raw.lock().await;
        self.ensure_raw(&mut slot).await?;
        let RawSlot::Ready(raw) = &mut *slot else {
            return Err(LevelError::IteratorNotOpen);
        };
        let entries: Vec<RawEntry> = if single {
            raw.next().await?.into_iter().collect()
        } else {
            raw.nextv(size).await?
        };

        let mut state = self.state.lock();
        state.count += entries.len();
        if entries.len() < size || self.limit.is_some_and(|limit| state.count >= limit) {
            state.ended = true;
        }
        Ok(entries)
    }

    fn decode(&self, entries: Vec<RawEntry>) -> LevelResult<Vec<Entry>> {
        entries
            .into_iter()
            .map(|(key, value)| {
                let key = match key {
                    Some(key) if self.keys => {
                        Some(decode_key(&self.key_encoding, unfix(key, self.prefix_len))?)
                    }
                    _ => None,
                };
                let value = match value {
                    Some(value) if self.values => Some(decode_value(&self.value_encoding, value)?),
                    _ => None,
                };
                Ok(Entry { key, value })
            })
            .collect()
    }

    /// Fetch up to `size` entries
    fn fetch(self: &Arc<Self>, size: usize, single: bool) -> BoxFuture<'static, LevelResult<Vec<Entry>>> {
        let guard = match self.begin_fetch() {
            Ok(guard) => guard,
            Err(e) => return Box::pin(future::ready(Err(e))),
        };
        let core = Arc::clone(self);
        Box::pin(async move {
            let fetched = core.fetch_raw(size, single).await;
            core.settle(guard).await;
            core.decode(fetched?)
        })
    }

    /// Fetch every remaining entry, then close
    fn all(self: &Arc<Self>) -> BoxFuture<'static, LevelResult<Vec<Entry>>> {
        let guard = match self.begin_fetch() {
            Ok(guard) => guard,
            Err(e) => return Box::pin(future::ready(Err(e))),
        };
        let core = Arc::clone(self);
        Box::pin(async move {
            let mut all = Vec::new();
            let fetched = loop {
                let chunk = match core.fetch_raw(ALL_CHUNK_SIZE, false).await {
                    Ok(chunk) => chunk,
                    Err(e) => break Err(e),
                };
                let done = chunk.is_empty() || core.ended();
                match core.decode(chunk) {
                    Ok(entries) => all.extend(entries),
                    Err(e) => break Err(e),
                }
                if done {
                    break Ok(());
                }
            };
            core.settle(guard).await;
            let closed = core.close().await;
            fetched?;
            closed?;
            Ok(all)
        })
    }

    fn seek(&self, target: Data, encoding: Option<&EncodingSpec>) -> LevelResult<()> {
        {
            let state = self.state.lock();
            match state.status {
                IterStatus::Fetching if !state.close_requested => {
                    return Err(LevelError::IteratorBusy)
                }
                IterStatus::Idle => {}
                // Closing: ignored
                _ => return Ok(()),
            }
        }
        if !self.db.supports().seek {
            return Err(LevelError::NotSupported("seek".into()));
        }

        let encoding = match encoding {
            Some(spec) => self.db.resolve_encoding(spec)?,
            None => self.key_encoding.clone(),
        };
        let target = encode_key(&encoding, &target)?;
        let target = self.db.prefix_key(target, false);

        let Ok(mut slot) = self.raw.try_lock() else {
            return Err(LevelError::IteratorBusy);
        };
        match &mut *slot {
            RawSlot::Pending { seeks, .. } => seeks.push(target),
            RawSlot::Ready(raw) => raw.seek(target)?,
            RawSlot::Closed => return Ok(()),
        }

        let mut state = self.state.lock();
        state.ended = self.limit.is_some_and(|limit| state.count >= limit);
        Ok(())
    }

    async fn close(&self) -> LevelResult<()> {
        let waiting = {
            let mut state = self.state.lock();
            match state.status {
                IterStatus::Idle => {
                    state.status = IterStatus::Closing;
                    None
                }
                IterStatus::Fetching => {
                    state.close_requested = true;
                    Some(self.closed.subscribe())
                }
                IterStatus::Closing => Some(self.closed.subscribe()),
                IterStatus::Closed => return Ok(()),
            }
        };

        match waiting {
            None => self.finish_close().await,
            Some(mut rx) => {
                let _ = rx.wait_for(|closed| *closed).await;
                Ok(())
            }
        }
    }

    async fn finish_close(&self) -> LevelResult<()> {
        let raw = {
            let mut slot = self.raw.lock().await;
            mem::replace(&mut *slot, RawSlot::Closed)
        };
        let result = match raw {
            RawSlot::Ready(mut raw) => raw.close().await.map_err(LevelError::from),
            RawSlot::Pending { .. } | RawSlot::Closed => Ok(()),
        };

        self.state.lock().status = IterStatus::Closed;
        self.snapshot.lock().take();
        self.db.detach_resource(self.id);
        self.closed.send_replace(true);
        result
    }

    fn count(&self) -> usize {
        self.state.lock().count
    }

    fn is_closed(&self) -> bool {
        self.state.lock().status == IterStatus::Closed
    }
}

impl Resource for IteratorCore {
    fn close_resource(self: Arc<Self>) -> BoxFuture<'static, LevelResult<()>> {
        Box::pin(async move { self.close().await })
    }
}

macro_rules! iterator_common {
    ($name:ident) => {
        impl $name {
            /// Move to the first key at or after `target`, or at or before
            /// it when reversed
            ///
            /// Fails with `ITERATOR_BUSY` while a fetch is in flight and is
            /// ignored once the iterator is closing.
            pub fn seek(&self, target: impl Into<Data>) -> LevelResult<()> {
                self.core.seek(target.into(), None)
            }

            /// Seek with a key encoding other than the iterator's
            pub fn seek_with(
                &self,
                target: impl Into<Data>,
                key_encoding: impl Into<EncodingSpec>,
            ) -> LevelResult<()> {
                self.core.seek(target.into(), Some(&key_encoding.into()))
            }

            /// Close the iterator; safe to call more than once
            pub async fn close(&self) -> LevelResult<()> {
                self.core.close().await
            }

            /// Entries yielded so far
            pub fn count(&self) -> usize {
                self.core.count()
            }

            pub fn limit(&self) -> Option<usize> {
                self.core.limit
            }

            pub fn is_closed(&self) -> bool {
                self.core.is_closed()
            }

            pub fn db(&self) -> &Database {
                &self.core.db
            }
        }

        impl fmt::Debug for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                let state = self.core.state.lock();
                f.debug_struct(stringify!($name))
                    .field("id", &self.core.id)
                    .field("status", &state.status)
                    .field("count", &state.count)
                    .field("limit", &self.core.limit)
                    .finish()
            }
        }
    };
}

/// Iterator over key-value entries
pub struct EntryIterator {
    core: Arc<IteratorCore>,
}

iterator_common!(EntryIterator);

impl EntryIterator {
    /// Fetch the next entry; `None` at the end
    pub fn next(&self) -> BoxFuture<'static, LevelResult<Option<Entry>>> {
        let fetch = self.core.fetch(1, true);
        Box::pin(async move { Ok(fetch.await?.into_iter().next()) })
    }

    /// Fetch up to `size` entries; fewer than `size` means the end
    pub fn nextv(&self, size: usize) -> BoxFuture<'static, LevelResult<Vec<Entry>>> {
        self.core.fetch(size.max(1), false)
    }

    /// Fetch every remaining entry and close
    pub fn all(&self) -> BoxFuture<'static, LevelResult<Vec<Entry>>> {
        self.core.all()
    }

    /// Adapt to a stream that closes the iterator at its end
    pub fn into_stream(self) -> impl Stream<Item = LevelResult<Entry>> + Send + 'static {
        stream::unfold(Some(self), |iterator| async move {
            let iterator = iterator?;
            match iterator.next().await {
                Ok(Some(entry)) => Some((Ok(entry), Some(iterator))),
                Ok(None) => iterator.close().await.err().map(|e| (Err(e), None)),
                Err(e) => {
                    let _ = iterator.close().await;
                    Some((Err(e), None))
                }
            }
        })
    }
}

/// Iterator over keys only
pub struct KeyIterator {
    core: Arc<IteratorCore>,
}

iterator_common!(KeyIterator);

fn keys_of(entries: Vec<Entry>) -> Vec<Data> {
    entries.into_iter().filter_map(|e| e.key).collect()
}

fn values_of(entries: Vec<Entry>) -> Vec<Data> {
    entries.into_iter().filter_map(|e| e.value).collect()
}

impl KeyIterator {
    pub fn next(&self) -> BoxFuture<'static, LevelResult<Option<Data>>> {
        let fetch = self.core.fetch(1, true);
        Box::pin(async move { Ok(keys_of(fetch.await?).into_iter().next()) })
    }

    pub fn nextv(&self, size: usize) -> BoxFuture<'static, LevelResult<Vec<Data>>> {
        let fetch = self.core.fetch(size.max(1), false);
        Box::pin(async move { Ok(keys_of(fetch.await?)) })
    }

    pub fn all(&self) -> BoxFuture<'static, LevelResult<Vec<Data>>> {
        let fetch = self.core.all();
        Box::pin(async move { Ok(keys_of(fetch.await?)) })
    }

    pub fn into_stream(self) -> impl Stream<Item = LevelResult<Data>> + Send + 'static {
        stream::unfold(Some(self), |iterator| async move {
            let iterator = iterator?;
            match iterator.next().await {
                Ok(Some(key)) => Some((Ok(key), Some(iterator))),
                Ok(None) => iterator.close().await.err().map(|e| (Err(e), None)),
                Err(e) => {
                    let _ = iterator.close().await;
                    Some((Err(e), None))
                }
            }
        })
    }
}

/// Iterator over values only
pub struct ValueIterator {
    core: Arc<IteratorCore>,
}

iterator_common!(ValueIterator);

impl ValueIterator {
    pub fn next(&self) -> BoxFuture<'static, LevelResult<Option<Data>>> {
        let fetch = self.core.fetch(1, true);
        Box::pin(async move { Ok(values_of(fetch.await?).into_iter().next()) })
    }

    pub fn nextv(&self, size: usize) -> BoxFuture<'static, LevelResult<Vec<Data>>> {
        let fetch = self.core.fetch(size.max(1), false);
        Box::pin(async move { Ok(values_of(fetch.await?)) })
    }

    pub fn all(&self) -> BoxFuture<'static, LevelResult<Vec<Data>>> {
        let fetch = self.core.all();
        Box::pin(async move { Ok(values_of(fetch.await?)) })
    }

    pub fn into_stream(self) -> impl Stream<Item = LevelResult<Data>> + Send + 'static {
        stream::unfold(Some(self), |iterator| async move {
            let iterator = iterator?;
            match iterator.next().await {
                Ok(Some(value)) => Some((Ok(value), Some(iterator))),
                Ok(None) => iterator.close().await.err().map(|e| (Err(e), None)),
                Err(e) => {
                    let _ = iterator.close().await;
                    Some((Err(e), None))
                }
            }
        })
    }
}

impl Database {
    /// Iterate over entries in key order
    ///
    /// Available while `open`, and while `opening`, in which case the
    /// primitive cursor is created once the database is open.
    pub fn iterator(&self, options: IteratorOptions) -> LevelResult<EntryIterator> {
        let (keys, values) = (options.keys, options.values);
        Ok(EntryIterator {
            core: IteratorCore::new(self, options, keys, values)?,
        })
    }

    /// Iterate over keys only
    pub fn keys(&self, options: IteratorOptions) -> LevelResult<KeyIterator> {
        Ok(KeyIterator {
            core: IteratorCore::new(self, options, true, false)?,
        })
    }

    /// Iterate over values only
    pub fn values(&self, options: IteratorOptions) -> LevelResult<ValueIterator> {
        Ok(ValueIterator {
            core: IteratorCore::new(self, options, false, true)?,
        })
    }
}
