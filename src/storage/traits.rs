//! Primitive engine contract
//!
//! Engines only see wire formats: every key and value arrives already
//! prefixed and encoded, and every range bound is already scoped.

use std::any::Any;
use std::ops::Bound;
use std::sync::Arc;

use async_trait::async_trait;

use crate::db::OpenOptions;
use crate::encoding::{Encoded, Format};
use crate::storage::error::{StorageError, StorageResult};

/// Number of deletes committed per batch by the derived `clear`
pub const CLEAR_CHUNK_SIZE: usize = 1000;

/// A fetched entry; either half is `None` when it was not requested
pub type RawEntry = (Option<Encoded>, Option<Encoded>);

/// Capabilities an engine declares
#[derive(Debug, Clone)]
pub struct Supports {
    /// Wire formats the engine accepts, in no particular order
    pub formats: Vec<Format>,
    /// Reads and iterators see a consistent view without an explicit snapshot
    pub implicit_snapshots: bool,
    /// `StorageEngine::snapshot` is implemented
    pub explicit_snapshots: bool,
    /// `RawIterator::seek` is implemented
    pub seek: bool,
    /// Data survives a close
    pub permanence: bool,
    pub create_if_missing: bool,
    pub error_if_exists: bool,
}

impl Default for Supports {
    fn default() -> Self {
        Self {
            formats: vec![Format::Utf8],
            implicit_snapshots: false,
            explicit_snapshots: false,
            seek: false,
            permanence: false,
            create_if_missing: false,
            error_if_exists: false,
        }
    }
}

/// Kind of a write operation
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OperationKind {
    Put,
    Del,
}

impl OperationKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            OperationKind::Put => "put",
            OperationKind::Del => "del",
        }
    }
}

/// Operation as committed to an engine
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EncodedOperation {
    pub kind: OperationKind,
    pub key: Encoded,
    /// Present for puts only
    pub value: Option<Encoded>,
}

impl EncodedOperation {
    pub fn put(key: Encoded, value: Encoded) -> Self {
        Self {
            kind: OperationKind::Put,
            key,
            value: Some(value),
        }
    }

    pub fn del(key: Encoded) -> Self {
        Self {
            kind: OperationKind::Del,
            key,
            value: None,
        }
    }
}

/// Encoded key range
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KeyRange {
    pub start: Bound<Encoded>,
    pub end: Bound<Encoded>,
}

impl KeyRange {
    /// Range covering every key
    pub fn all() -> Self {
        Self {
            start: Bound::Unbounded,
            end: Bound::Unbounded,
        }
    }

    /// Check whether a key falls within the range
    pub fn contains(&self, key: &[u8]) -> bool {
        let above = match &self.start {
            Bound::Included(s) => key >= s.as_bytes(),
            Bound::Excluded(s) => key > s.as_bytes(),
            Bound::Unbounded => true,
        };
        let below = match &self.end {
            Bound::Included(e) => key <= e.as_bytes(),
            Bound::Excluded(e) => key < e.as_bytes(),
            Bound::Unbounded => true,
        };
        above && below
    }
}

impl Default for KeyRange {
    fn default() -> Self {
        Self::all()
    }
}

/// Options for a range scan or a range delete
#[derive(Clone)]
pub struct ScanOptions {
    pub range: KeyRange,
    pub reverse: bool,
    /// `None` means unbounded
    pub limit: Option<usize>,
    pub keys: bool,
    pub values: bool,
    pub key_format: Format,
    pub value_format: Format,
    pub snapshot: Option<Arc<dyn RawSnapshot>>,
}

impl Default for ScanOptions {
    fn default() -> Self {
        Self {
            range: KeyRange::all(),
            reverse: false,
            limit: None,
            keys: true,
            values: true,
            key_format: Format::Utf8,
            value_format: Format::Utf8,
            snapshot: None,
        }
    }
}

/// Options for point reads
#[derive(Clone)]
pub struct FetchOptions {
    pub value_format: Format,
    pub snapshot: Option<Arc<dyn RawSnapshot>>,
}

impl Default for FetchOptions {
    fn default() -> Self {
        Self {
            value_format: Format::Utf8,
            snapshot: None,
        }
    }
}

/// Primitive storage engine
///
/// Engines implement point reads, writes, atomic batches and iterators.
/// Bulk reads, existence checks and range deletes have default versions
/// derived from those primitives.
#[async_trait]
pub trait StorageEngine: Send + Sync + 'static {
    /// Capabilities of this engine
    fn supports(&self) -> Supports;

    async fn open(&self, _options: &OpenOptions) -> StorageResult<()> {
        Ok(())
    }

    async fn close(&self) -> StorageResult<()> {
        Ok(())
    }

    /// Get a value by key
    ///
    /// Returns `None` if the key does not exist.
    async fn get(&self, key: Encoded, options: &FetchOptions) -> StorageResult<Option<Encoded>>;

    async fn get_many(
        &self,
        keys: Vec<Encoded>,
        options: &FetchOptions,
    ) -> StorageResult<Vec<Option<Encoded>>> {
        let mut values = Vec::with_capacity(keys.len());
        for key in keys {
            values.push(self.get(key, options).await?);
        }
        Ok(values)
    }

    async fn has(&self, key: Encoded, options: &FetchOptions) -> StorageResult<bool> {
        Ok(self.get(key, options).await?.is_some())
    }

    async fn has_many(
        &self,
        keys: Vec<Encoded>,
        options: &FetchOptions,
    ) -> StorageResult<Vec<bool>> {
        let mut found = Vec::with_capacity(keys.len());
        for key in keys {
            found.push(self.has(key, options).await?);
        }
        Ok(found)
    }

    /// Put a key-value pair, overwriting any existing value
    async fn put(&self, key: Encoded, value: Encoded) -> StorageResult<()>;

    /// Delete a key; a no-op if the key does not exist
    async fn del(&self, key: Encoded) -> StorageResult<()>;

    /// Apply all operations atomically
    async fn batch(&self, operations: Vec<EncodedOperation>) -> StorageResult<()>;

    /// Delete every key in a range
    async fn clear(&self, options: ScanOptions) -> StorageResult<()> {
        let mut options = options;
        options.keys = true;
        options.values = false;
        let mut remaining = options.limit;

        let mut iter = self.iterator(options)?;
        let result = async {
            loop {
                let size = match remaining {
                    Some(0) => break,
                    Some(n) => n.min(CLEAR_CHUNK_SIZE),
                    None => CLEAR_CHUNK_SIZE,
                };
                let entries = iter.nextv(size).await?;
                if entries.is_empty() {
                    break;
                }
                if let Some(n) = remaining.as_mut() {
                    *n = n.saturating_sub(entries.len());
                }
                let ops: Vec<EncodedOperation> = entries
                    .into_iter()
                    .filter_map(|(key, _)| key.map(EncodedOperation::del))
                    .collect();
                self.batch(ops).await?;
            }
            Ok::<(), StorageError>(())
        }
        .await;

        let closed = iter.close().await;
        result.and(closed)
    }

    /// Create an iterator over a range
    fn iterator(&self, options: ScanOptions) -> StorageResult<Box<dyn RawIterator>>;

    /// Capture a point-in-time view
    async fn snapshot(&self) -> StorageResult<Arc<dyn RawSnapshot>> {
        Err(StorageError::NotSupported("snapshot".into()))
    }
}

/// Primitive cursor over an engine
#[async_trait]
pub trait RawIterator: Send + 'static {
    /// Fetch the next entry, `None` at the end
    async fn next(&mut self) -> StorageResult<Option<RawEntry>>;

    /// Fetch up to `size` entries; fewer means the end was reached
    async fn nextv(&mut self, size: usize) -> StorageResult<Vec<RawEntry>> {
        let mut entries = Vec::with_capacity(size.min(CLEAR_CHUNK_SIZE));
        while entries.len() < size {
            match self.next().await? {
                Some(entry) => entries.push(entry),
                None => break,
            }
        }
        Ok(entries)
    }

    /// Move to the first key at or after `target` (at or before when reversed)
    fn seek(&mut self, _target: Encoded) -> StorageResult<()> {
        Err(StorageError::NotSupported("seek".into()))
    }

    async fn close(&mut self) -> StorageResult<()> {
        Ok(())
    }
}

/// Engine-side handle of an explicit snapshot
#[async_trait]
pub trait RawSnapshot: Send + Sync + 'static {
    fn as_any(&self) -> &dyn Any;

    async fn close(&self) -> StorageResult<()> {
        Ok(())
    }
}
