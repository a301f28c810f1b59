//! Integration tests for the primitive engine contract
//!
//! `BareEngine` implements only the required primitives, so these tests
//! exercise the default bulk reads, existence checks, range deletes and
//! multi-fetch derived from them.

mod test_utils;

use std::ops::Bound;
use std::sync::Arc;

use async_trait::async_trait;

use kvlayer::encoding::{Encoded, Format};
use kvlayer::storage::{
    EncodedOperation, FetchOptions, KeyRange, MemoryEngine, RawEntry, RawIterator, ScanOptions,
    StorageEngine, StorageResult, Supports,
};
use kvlayer::{ClearOptions, Database, DatabaseOptions, IteratorOptions, RangeOptions, ReadOptions};
use test_utils::{code_of, text};

struct BareEngine {
    inner: MemoryEngine,
}

struct BareIterator {
    inner: Box<dyn RawIterator>,
}

#[async_trait]
impl RawIterator for BareIterator {
    async fn next(&mut self) -> StorageResult<Option<RawEntry>> {
        self.inner.next().await
    }
}

#[async_trait]
impl StorageEngine for BareEngine {
    fn supports(&self) -> Supports {
        Supports {
            formats: vec![Format::Utf8],
            explicit_snapshots: false,
            seek: false,
            ..self.inner.supports()
        }
    }

    async fn open(&self, options: &kvlayer::OpenOptions) -> StorageResult<()> {
        self.inner.open(options).await
    }

    async fn get(&self, key: Encoded, options: &FetchOptions) -> StorageResult<Option<Encoded>> {
        self.inner.get(key, options).await
    }

    async fn put(&self, key: Encoded, value: Encoded) -> StorageResult<()> {
        self.inner.put(key, value).await
    }

    async fn del(&self, key: Encoded) -> StorageResult<()> {
        self.inner.del(key).await
    }

    async fn batch(&self, operations: Vec<EncodedOperation>) -> StorageResult<()> {
        self.inner.batch(operations).await
    }

    fn iterator(&self, options: ScanOptions) -> StorageResult<Box<dyn RawIterator>> {
        Ok(Box::new(BareIterator {
            inner: self.inner.iterator(options)?,
        }))
    }
}

async fn bare_db() -> Database {
    let engine = Arc::new(BareEngine {
        inner: MemoryEngine::new(),
    });
    let db = Database::with_options(engine, DatabaseOptions::default()).unwrap();
    db.open().await.unwrap();
    for key in ["a", "b", "c", "d"] {
        db.put(key, key).await.unwrap();
    }
    db
}

fn scan(range: KeyRange, limit: Option<usize>) -> ScanOptions {
    ScanOptions {
        range,
        reverse: false,
        limit,
        keys: true,
        values: true,
        key_format: Format::Utf8,
        value_format: Format::Utf8,
        snapshot: None,
    }
}

#[tokio::test]
async fn test_default_bulk_reads() {
    let db = bare_db().await;
    assert_eq!(
        db.get_many(["a", "x", "d"]).await.unwrap(),
        vec![Some(text("a")), None, Some(text("d"))]
    );
    assert!(db.has("b").await.unwrap());
    assert_eq!(db.has_many(["x", "c"]).await.unwrap(), vec![false, true]);
}

#[tokio::test]
async fn test_default_clear() {
    let db = bare_db().await;
    db.clear_with(
        ClearOptions::default()
            .with_range(RangeOptions::new().gt("a"))
            .limit(2),
    )
    .await
    .unwrap();

    assert_eq!(
        db.get_many(["a", "b", "c", "d"]).await.unwrap(),
        vec![Some(text("a")), None, None, Some(text("d"))]
    );
}

#[tokio::test]
async fn test_default_nextv() {
    let db = bare_db().await;
    let it = db.keys(IteratorOptions::default()).unwrap();
    assert_eq!(it.nextv(3).await.unwrap(), vec![text("a"), text("b"), text("c")]);
    assert_eq!(it.nextv(3).await.unwrap(), vec![text("d")]);
    assert!(it.nextv(3).await.unwrap().is_empty());
}

#[tokio::test]
async fn test_missing_capabilities() {
    let db = bare_db().await;
    assert_eq!(code_of(db.snapshot().await), "NOT_SUPPORTED");

    let it = db.keys(IteratorOptions::default()).unwrap();
    assert_eq!(code_of(it.seek("b")), "NOT_SUPPORTED");
}

#[tokio::test]
async fn test_value_transcoded_to_engine_format() {
    let db = bare_db().await;
    // buffer is not a native format here, so it is carried as utf8
    let value = db
        .get_with("a", ReadOptions::default().with_value_encoding("buffer"))
        .await
        .unwrap()
        .unwrap();
    assert_eq!(value.as_bytes(), Some(&b"a"[..]));
}

#[tokio::test]
async fn test_memory_engine_clear_range() {
    let engine = MemoryEngine::new();
    engine.open(&kvlayer::OpenOptions::default()).await.unwrap();
    for key in ["a", "b", "c"] {
        engine
            .put(Encoded::from(key), Encoded::from(key))
            .await
            .unwrap();
    }

    let range = KeyRange {
        start: Bound::Included(Encoded::from("b")),
        end: Bound::Unbounded,
    };
    engine.clear(scan(range, None)).await.unwrap();
    assert_eq!(engine.len(), 1);

    let mut it = engine.iterator(scan(KeyRange::all(), None)).unwrap();
    let entries = it.nextv(10).await.unwrap();
    assert_eq!(entries.len(), 1);
    assert_eq!(entries[0].0, Some(Encoded::from("a")));
}
