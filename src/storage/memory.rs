//! In-memory engine over a sorted map
//!
//! The map lives behind an `Arc` and writers clone it on demand
//! (`Arc::make_mut`), so iterators and snapshots keep reading the version
//! that was current when they were created.

use std::any::Any;
use std::collections::BTreeMap;
use std::ops::Bound;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::RwLock;

use crate::db::OpenOptions;
use crate::encoding::{Encoded, Format};
use crate::storage::error::{StorageError, StorageResult};
use crate::storage::traits::{
    EncodedOperation, FetchOptions, OperationKind, RawEntry, RawIterator, RawSnapshot, ScanOptions,
    StorageEngine, Supports,
};

type Map = BTreeMap<Vec<u8>, Vec<u8>>;

/// Sorted in-memory engine supporting every wire format
pub struct MemoryEngine {
    data: RwLock<Arc<Map>>,
    /// Closed flag
    closed: AtomicBool,
}

impl MemoryEngine {
    /// Create a new empty engine
    pub fn new() -> Self {
        Self {
            data: RwLock::new(Arc::new(BTreeMap::new())),
            closed: AtomicBool::new(true),
        }
    }

    /// Number of stored entries
    pub fn len(&self) -> usize {
        self.data.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.read().is_empty()
    }

    fn check_open(&self) -> StorageResult<()> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(StorageError::Closed);
        }
        Ok(())
    }

    /// Current version of the map, or the one captured by a snapshot
    fn view(&self, snapshot: Option<&Arc<dyn RawSnapshot>>) -> StorageResult<Arc<Map>> {
        match snapshot {
            Some(snapshot) => snapshot
                .as_any()
                .downcast_ref::<MemorySnapshot>()
                .map(|s| Arc::clone(&s.data))
                .ok_or_else(|| StorageError::NotSupported("foreign snapshot".into())),
            None => Ok(Arc::clone(&self.data.read())),
        }
    }
}

impl Default for MemoryEngine {
    fn default() -> Self {
        Self::new()
    }
}

fn to_format(format: Format, bytes: &[u8]) -> StorageResult<Encoded> {
    Encoded::from_vec(format, bytes.to_vec()).map_err(|e| StorageError::Encoding(e.to_string()))
}

#[async_trait]
impl StorageEngine for MemoryEngine {
    fn supports(&self) -> Supports {
        Supports {
            formats: vec![Format::Utf8, Format::Buffer, Format::View],
            implicit_snapshots: true,
            explicit_snapshots: true,
            seek: true,
            permanence: false,
            create_if_missing: false,
            error_if_exists: false,
        }
    }

    async fn open(&self, _options: &OpenOptions) -> StorageResult<()> {
        self.closed.store(false, Ordering::SeqCst);
        Ok(())
    }

    async fn close(&self) -> StorageResult<()> {
        self.closed.store(true, Ordering::SeqCst);
        Ok(())
    }

    async fn get(&self, key: Encoded, options: &FetchOptions) -> StorageResult<Option<Encoded>> {
        self.check_open()?;
        let data = self.view(options.snapshot.as_ref())?;
        data.get(key.as_bytes())
            .map(|v| to_format(options.value_format, v))
            .transpose()
    }

    async fn get_many(
        &self,
        keys: Vec<Encoded>,
        options: &FetchOptions,
    ) -> StorageResult<Vec<Option<Encoded>>> {
        self.check_open()?;
        let data = self.view(options.snapshot.as_ref())?;
        keys.iter()
            .map(|key| {
                data.get(key.as_bytes())
                    .map(|v| to_format(options.value_format, v))
                    .transpose()
            })
            .collect()
    }

    async fn has(&self, key: Encoded, options: &FetchOptions) -> StorageResult<bool> {
        self.check_open()?;
        let data = self.view(options.snapshot.as_ref())?;
        Ok(data.contains_key(key.as_bytes()))
    }

    async fn put(&self, key: Encoded, value: Encoded) -> StorageResult<()> {
        self.check_open()?;
        let mut data = self.data.write();
        Arc::make_mut(&mut data).insert(key.into_vec(), value.into_vec());
        Ok(())
    }

    async fn del(&self, key: Encoded) -> StorageResult<()> {
        self.check_open()?;
        let mut data = self.data.write();
        Arc::make_mut(&mut data).remove(key.as_bytes());
        Ok(())
    }

    async fn batch(&self, operations: Vec<EncodedOperation>) -> StorageResult<()> {
        self.check_open()?;
        // Validate first so a bad operation leaves the map untouched
        if operations
            .iter()
            .any(|op| op.kind == OperationKind::Put && op.value.is_none())
        {
            return Err(StorageError::InvalidValue("put without a value".into()));
        }

        let mut data = self.data.write();
        let map = Arc::make_mut(&mut data);
        for op in operations {
            match (op.kind, op.value) {
                (OperationKind::Put, Some(value)) => {
                    map.insert(op.key.into_vec(), value.into_vec());
                }
                _ => {
                    map.remove(op.key.as_bytes());
                }
            }
        }
        Ok(())
    }

    async fn clear(&self, options: ScanOptions) -> StorageResult<()> {
        self.check_open()?;
        let mut data = self.data.write();

        let lower = to_owned_bound(&options.range.start);
        let upper = to_owned_bound(&options.range.end);
        if is_empty_range(&lower, &upper) {
            return Ok(());
        }
        let limit = options.limit.unwrap_or(usize::MAX);
        let range = data.range::<Vec<u8>, _>((lower, upper)).map(|(k, _)| k.clone());
        let matching: Vec<Vec<u8>> = if options.reverse {
            range.rev().take(limit).collect()
        } else {
            range.take(limit).collect()
        };
        if matching.is_empty() {
            return Ok(());
        }

        let map = Arc::make_mut(&mut data);
        for key in matching {
            map.remove(&key);
        }
        Ok(())
    }

    fn iterator(&self, options: ScanOptions) -> StorageResult<Box<dyn RawIterator>> {
        self.check_open()?;
        let data = self.view(options.snapshot.as_ref())?;
        Ok(Box::new(MemoryIterator::new(data, options)))
    }

    async fn snapshot(&self) -> StorageResult<Arc<dyn RawSnapshot>> {
        self.check_open()?;
        Ok(Arc::new(MemorySnapshot {
            data: Arc::clone(&self.data.read()),
        }))
    }
}

/// Point-in-time version of a [`MemoryEngine`]
pub struct MemorySnapshot {
    data: Arc<Map>,
}

#[async_trait]
impl RawSnapshot for MemorySnapshot {
    fn as_any(&self) -> &dyn Any {
        self
    }
}

fn to_owned_bound(bound: &Bound<Encoded>) -> Bound<Vec<u8>> {
    match bound {
        Bound::Included(k) => Bound::Included(k.as_bytes().to_vec()),
        Bound::Excluded(k) => Bound::Excluded(k.as_bytes().to_vec()),
        Bound::Unbounded => Bound::Unbounded,
    }
}

/// `BTreeMap::range` panics on inverted or empty-excluded ranges
fn is_empty_range(lower: &Bound<Vec<u8>>, upper: &Bound<Vec<u8>>) -> bool {
    match (lower, upper) {
        (Bound::Included(l), Bound::Included(u)) => l > u,
        (Bound::Included(l), Bound::Excluded(u))
        | (Bound::Excluded(l), Bound::Included(u))
        | (Bound::Excluded(l), Bound::Excluded(u)) => l >= u,
        _ => false,
    }
}

/// Cursor over one version of the map
///
/// The cursor narrows its own bounds as it advances, so each step is a
/// fresh range lookup against the captured version.
struct MemoryIterator {
    data: Arc<Map>,
    /// Bounds requested at creation, used to clamp seeks
    start: Bound<Vec<u8>>,
    end: Bound<Vec<u8>>,
    lower: Bound<Vec<u8>>,
    upper: Bound<Vec<u8>>,
    reverse: bool,
    remaining: Option<usize>,
    keys: bool,
    values: bool,
    key_format: Format,
    value_format: Format,
}

impl MemoryIterator {
    fn new(data: Arc<Map>, options: ScanOptions) -> Self {
        let start = to_owned_bound(&options.range.start);
        let end = to_owned_bound(&options.range.end);
        Self {
            data,
            lower: start.clone(),
            upper: end.clone(),
            start,
            end,
            reverse: options.reverse,
            remaining: options.limit,
            keys: options.keys,
            values: options.values,
            key_format: options.key_format,
            value_format: options.value_format,
        }
    }

    fn step(&mut self) -> Option<(Vec<u8>, Vec<u8>)> {
        if self.remaining == Some(0) || is_empty_range(&self.lower, &self.upper) {
            return None;
        }
        let mut range = self
            .data
            .range::<Vec<u8>, _>((self.lower.clone(), self.upper.clone()));
        let (k, v) = if self.reverse {
            range.next_back()?
        } else {
            range.next()?
        };
        let entry = (k.clone(), v.clone());

        if self.reverse {
            self.upper = Bound::Excluded(entry.0.clone());
        } else {
            self.lower = Bound::Excluded(entry.0.clone());
        }
        if let Some(n) = self.remaining.as_mut() {
            *n -= 1;
        }
        Some(entry)
    }
}

impl MemoryIterator {
    fn entry(&self, k: &[u8], v: &[u8]) -> StorageResult<RawEntry> {
        let key = if self.keys {
            Some(to_format(self.key_format, k)?)
        } else {
            None
        };
        let value = if self.values {
            Some(to_format(self.value_format, v)?)
        } else {
            None
        };
        Ok((key, value))
    }
}

#[async_trait]
impl RawIterator for MemoryIterator {
    async fn next(&mut self) -> StorageResult<Option<RawEntry>> {
        match self.step() {
            Some((k, v)) => Ok(Some(self.entry(&k, &v)?)),
            None => Ok(None),
        }
    }

    async fn nextv(&mut self, size: usize) -> StorageResult<Vec<RawEntry>> {
        let mut entries = Vec::with_capacity(size.min(self.data.len()));
        while entries.len() < size {
            let Some((k, v)) = self.step() else {
                break;
            };
            entries.push(self.entry(&k, &v)?);
        }
        Ok(entries)
    }

    fn seek(&mut self, target: Encoded) -> StorageResult<()> {
        let target = target.into_vec();
        if self.reverse {
            let within = match &self.end {
                Bound::Included(e) => target <= *e,
                Bound::Excluded(e) => target < *e,
                Bound::Unbounded => true,
            };
            self.lower = self.start.clone();
            self.upper = if within {
                Bound::Included(target)
            } else {
                self.end.clone()
            };
        } else {
            let within = match &self.start {
                Bound::Included(s) => target >= *s,
                Bound::Excluded(s) => target > *s,
                Bound::Unbounded => true,
            };
            self.upper = self.end.clone();
            self.lower = if within {
                Bound::Included(target)
            } else {
                self.start.clone()
            };
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::traits::KeyRange;

    async fn open_engine() -> MemoryEngine {
        let engine = MemoryEngine::new();
        engine.open(&OpenOptions::default()).await.unwrap();
        engine
    }

    fn fetch() -> FetchOptions {
        FetchOptions::default()
    }

    #[tokio::test]
    async fn test_put_get() {
        let engine = open_engine().await;

        engine.put("key1".into(), "value1".into()).await.unwrap();
        engine.put("key2".into(), "value2".into()).await.unwrap();

        assert_eq!(
            engine.get("key1".into(), &fetch()).await.unwrap(),
            Some(Encoded::from("value1"))
        );
        assert_eq!(engine.get("key3".into(), &fetch()).await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_closed() {
        let engine = MemoryEngine::new();
        let result = engine.put("k".into(), "v".into()).await;
        assert!(matches!(result, Err(StorageError::Closed)));
    }

    #[tokio::test]
    async fn test_batch_atomic() {
        let engine = open_engine().await;
        engine.put("a".into(), "1".into()).await.unwrap();

        let bad = vec![
            EncodedOperation::del("a".into()),
            EncodedOperation {
                kind: OperationKind::Put,
                key: "b".into(),
                value: None,
            },
        ];
        assert!(engine.batch(bad).await.is_err());
        assert_eq!(engine.len(), 1);

        let good = vec![
            EncodedOperation::del("a".into()),
            EncodedOperation::put("b".into(), "2".into()),
        ];
        engine.batch(good).await.unwrap();
        assert!(!engine.has("a".into(), &fetch()).await.unwrap());
        assert!(engine.has("b".into(), &fetch()).await.unwrap());
    }

    #[tokio::test]
    async fn test_iterator_range_and_reverse() {
        let engine = open_engine().await;
        for k in ["a", "b", "c", "d", "e"] {
            engine.put(k.into(), k.into()).await.unwrap();
        }

        let options = ScanOptions {
            range: KeyRange {
                start: Bound::Included("b".into()),
                end: Bound::Excluded("e".into()),
            },
            reverse: true,
            ..Default::default()
        };
        let mut iter = engine.iterator(options).unwrap();
        let entries = iter.nextv(10).await.unwrap();
        let keys: Vec<_> = entries
            .into_iter()
            .map(|(k, _)| k.unwrap().into_vec())
            .collect();
        assert_eq!(keys, vec![b"d".to_vec(), b"c".to_vec(), b"b".to_vec()]);
    }

    #[tokio::test]
    async fn test_iterator_sees_creation_version() {
        let engine = open_engine().await;
        engine.put("a".into(), "1".into()).await.unwrap();

        let mut iter = engine.iterator(ScanOptions::default()).unwrap();
        engine.put("b".into(), "2".into()).await.unwrap();

        assert!(iter.next().await.unwrap().is_some());
        assert!(iter.next().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_seek_clamps_to_range() {
        let engine = open_engine().await;
        for k in ["a", "b", "c", "d"] {
            engine.put(k.into(), k.into()).await.unwrap();
        }

        let options = ScanOptions {
            range: KeyRange {
                start: Bound::Included("b".into()),
                end: Bound::Unbounded,
            },
            ..Default::default()
        };
        let mut iter = engine.iterator(options).unwrap();
        iter.seek("c".into()).unwrap();
        let (key, _) = iter.next().await.unwrap().unwrap();
        assert_eq!(key.unwrap(), Encoded::from("c"));

        iter.seek("a".into()).unwrap();
        let (key, _) = iter.next().await.unwrap().unwrap();
        assert_eq!(key.unwrap(), Encoded::from("b"));
    }

    #[tokio::test]
    async fn test_empty_excluded_range() {
        let engine = open_engine().await;
        engine.put("a".into(), "1".into()).await.unwrap();

        let options = ScanOptions {
            range: KeyRange {
                start: Bound::Excluded("a".into()),
                end: Bound::Excluded("a".into()),
            },
            ..Default::default()
        };
        let mut iter = engine.iterator(options).unwrap();
        assert!(iter.next().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_snapshot_isolation() {
        let engine = open_engine().await;
        engine.put("k".into(), "old".into()).await.unwrap();

        let snapshot = engine.snapshot().await.unwrap();
        engine.put("k".into(), "new".into()).await.unwrap();

        let options = FetchOptions {
            snapshot: Some(snapshot),
            ..Default::default()
        };
        assert_eq!(
            engine.get("k".into(), &options).await.unwrap(),
            Some(Encoded::from("old"))
        );
        assert_eq!(
            engine.get("k".into(), &fetch()).await.unwrap(),
            Some(Encoded::from("new"))
        );
    }

    #[tokio::test]
    async fn test_clear_with_limit() {
        let engine = open_engine().await;
        for k in ["a", "b", "c", "d"] {
            engine.put(k.into(), k.into()).await.unwrap();
        }

        let options = ScanOptions {
            reverse: true,
            limit: Some(2),
            ..Default::default()
        };
        engine.clear(options).await.unwrap();
        assert!(engine.has("b".into(), &fetch()).await.unwrap());
        assert!(!engine.has("c".into(), &fetch()).await.unwrap());
        assert_eq!(engine.len(), 2);
    }

    #[tokio::test]
    async fn test_clear_range() {
        let engine = open_engine().await;
        for k in ["a", "b", "c", "d", "e"] {
            engine.put(k.into(), k.into()).await.unwrap();
        }

        let options = ScanOptions {
            range: KeyRange {
                start: Bound::Excluded("a".into()),
                end: Bound::Included("d".into()),
            },
            limit: Some(2),
            ..Default::default()
        };
        engine.clear(options).await.unwrap();
        let mut left = Vec::new();
        for k in ["a", "b", "c", "d", "e"] {
            left.push(engine.has(k.into(), &fetch()).await.unwrap());
        }
        assert_eq!(left, vec![true, false, false, true, true]);

        // Inverted bounds delete nothing
        let inverted = ScanOptions {
            range: KeyRange {
                start: Bound::Included("e".into()),
                end: Bound::Excluded("a".into()),
            },
            ..Default::default()
        };
        engine.clear(inverted).await.unwrap();
        assert_eq!(engine.len(), 3);
    }
}
