//! Shared test utilities
//!
//! Note: clippy reports false-positive dead_code warnings because it can't
//! trace usage across test binaries. These utilities are used by multiple tests.

#![allow(dead_code)]

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::sync::oneshot;

use kvlayer::db::OpenOptions;
use kvlayer::encoding::Encoded;
use kvlayer::storage::{
    EncodedOperation, FetchOptions, MemoryEngine, RawEntry, RawIterator, RawSnapshot, ScanOptions,
    StorageEngine, StorageError, StorageResult, Supports,
};
use kvlayer::{Data, Database, DatabaseOptions, LevelError};

/// Primitive call counters
#[derive(Default)]
pub struct Calls {
    pub opens: AtomicUsize,
    pub closes: AtomicUsize,
    pub gets: AtomicUsize,
    pub puts: AtomicUsize,
    pub dels: AtomicUsize,
    pub batches: AtomicUsize,
    pub clears: AtomicUsize,
    pub iterators: AtomicUsize,
    pub nexts: AtomicUsize,
    pub nextvs: AtomicUsize,
    pub iterator_closes: AtomicUsize,
}

impl Calls {
    pub fn get(counter: &AtomicUsize) -> usize {
        counter.load(Ordering::SeqCst)
    }
}

/// Memory engine that records primitive calls and can inject failures
pub struct SpyEngine {
    inner: MemoryEngine,
    pub calls: Arc<Calls>,
    /// Operations of every committed batch, in commit order
    pub batches: Mutex<Vec<Vec<EncodedOperation>>>,
    pub fail_open: AtomicBool,
    pub fail_close: AtomicBool,
    /// Hide the engine's bulk fetch so the default one is used
    pub disable_nextv: AtomicBool,
    gate: Mutex<Option<oneshot::Receiver<()>>>,
}

impl SpyEngine {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            inner: MemoryEngine::new(),
            calls: Arc::new(Calls::default()),
            batches: Mutex::new(Vec::new()),
            fail_open: AtomicBool::new(false),
            fail_close: AtomicBool::new(false),
            disable_nextv: AtomicBool::new(false),
            gate: Mutex::new(None),
        })
    }

    /// Hold the next `open()` until the returned sender fires or drops
    pub fn gate_open(&self) -> oneshot::Sender<()> {
        let (tx, rx) = oneshot::channel();
        *self.gate.lock() = Some(rx);
        tx
    }

    /// Keys of every committed batch as UTF-8 strings
    pub fn batch_keys(&self) -> Vec<Vec<String>> {
        self.batches
            .lock()
            .iter()
            .map(|ops| {
                ops.iter()
                    .map(|op| String::from_utf8_lossy(op.key.as_bytes()).into_owned())
                    .collect()
            })
            .collect()
    }

    pub fn len(&self) -> usize {
        self.inner.len()
    }
}

#[async_trait]
impl StorageEngine for SpyEngine {
    fn supports(&self) -> Supports {
        self.inner.supports()
    }

    async fn open(&self, options: &OpenOptions) -> StorageResult<()> {
        self.calls.opens.fetch_add(1, Ordering::SeqCst);
        let gate = self.gate.lock().take();
        if let Some(gate) = gate {
            let _ = gate.await;
        }
        if self.fail_open.load(Ordering::SeqCst) {
            return Err(StorageError::Backend("open failed".into()));
        }
        self.inner.open(options).await
    }

    async fn close(&self) -> StorageResult<()> {
        self.calls.closes.fetch_add(1, Ordering::SeqCst);
        if self.fail_close.load(Ordering::SeqCst) {
            return Err(StorageError::Backend("close failed".into()));
        }
        self.inner.close().await
    }

    async fn get(&self, key: Encoded, options: &FetchOptions) -> StorageResult<Option<Encoded>> {
        self.calls.gets.fetch_add(1, Ordering::SeqCst);
        self.inner.get(key, options).await
    }

    async fn put(&self, key: Encoded, value: Encoded) -> StorageResult<()> {
        self.calls.puts.fetch_add(1, Ordering::SeqCst);
        self.inner.put(key, value).await
    }

    async fn del(&self, key: Encoded) -> StorageResult<()> {
        self.calls.dels.fetch_add(1, Ordering::SeqCst);
        self.inner.del(key).await
    }

    async fn batch(&self, operations: Vec<EncodedOperation>) -> StorageResult<()> {
        self.calls.batches.fetch_add(1, Ordering::SeqCst);
        self.batches.lock().push(operations.clone());
        self.inner.batch(operations).await
    }

    async fn clear(&self, options: ScanOptions) -> StorageResult<()> {
        self.calls.clears.fetch_add(1, Ordering::SeqCst);
        self.inner.clear(options).await
    }

    fn iterator(&self, options: ScanOptions) -> StorageResult<Box<dyn RawIterator>> {
        self.calls.iterators.fetch_add(1, Ordering::SeqCst);
        let inner = self.inner.iterator(options)?;
        Ok(Box::new(SpyIterator {
            inner,
            calls: Arc::clone(&self.calls),
            native_nextv: !self.disable_nextv.load(Ordering::SeqCst),
        }))
    }

    async fn snapshot(&self) -> StorageResult<Arc<dyn RawSnapshot>> {
        self.inner.snapshot().await
    }
}

struct SpyIterator {
    inner: Box<dyn RawIterator>,
    calls: Arc<Calls>,
    native_nextv: bool,
}

#[async_trait]
impl RawIterator for SpyIterator {
    async fn next(&mut self) -> StorageResult<Option<RawEntry>> {
        self.calls.nexts.fetch_add(1, Ordering::SeqCst);
        // Give concurrent callers a chance to observe the fetch in flight
        tokio::task::yield_now().await;
        self.inner.next().await
    }

    async fn nextv(&mut self, size: usize) -> StorageResult<Vec<RawEntry>> {
        if !self.native_nextv {
            let mut entries = Vec::new();
            while entries.len() < size {
                match self.next().await? {
                    Some(entry) => entries.push(entry),
                    None => break,
                }
            }
            return Ok(entries);
        }
        self.calls.nextvs.fetch_add(1, Ordering::SeqCst);
        self.inner.nextv(size).await
    }

    fn seek(&mut self, target: Encoded) -> StorageResult<()> {
        self.inner.seek(target)
    }

    async fn close(&mut self) -> StorageResult<()> {
        self.calls.iterator_closes.fetch_add(1, Ordering::SeqCst);
        self.inner.close().await
    }
}

/// An open database over a fresh memory engine
pub async fn open_memory_db() -> Database {
    let db = Database::new(MemoryEngine::new()).expect("create database");
    db.open().await.expect("open database");
    db
}

/// An open database over a spy engine
pub async fn open_spy_db() -> (Database, Arc<SpyEngine>) {
    let spy = SpyEngine::new();
    let db = Database::with_options(spy.clone(), DatabaseOptions::default())
        .expect("create database");
    db.open().await.expect("open database");
    (db, spy)
}

pub fn text(s: &str) -> Data {
    Data::Text(s.to_string())
}

/// Error code of a result as its wire string
pub fn code_of<T: std::fmt::Debug>(result: Result<T, LevelError>) -> &'static str {
    result
        .expect_err("expected an error")
        .code()
        .expect("error has a code")
        .as_str()
}
