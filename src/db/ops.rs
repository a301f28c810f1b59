//! Public read and write operations
//!
//! Every operation validates its arguments before anything else, so a bad
//! key never waits for an open and never reaches an engine. It then waits
//! through `opening`, encodes, and dispatches to the backend.

use std::ops::Bound;
use std::sync::Arc;

use crate::batch::{validate_operation, Operation};
use crate::db::{ClearOptions, Database, RangeOptions, ReadOptions, WriteOptions};
use crate::encoding::{Data, Encoded, Encoding};
use crate::error::{LevelError, LevelResult};
use crate::events::{DbEvent, EventKind};
use crate::snapshot::SnapshotGuard;
use crate::storage::{FetchOptions, KeyRange, ScanOptions};

/// Encode a key, rejecting null
pub(crate) fn encode_key(encoding: &Encoding, key: &Data) -> LevelResult<Encoded> {
    if key.is_null() {
        return Err(LevelError::invalid_key("Key cannot be null"));
    }
    encoding.encode(key).map_err(|e| LevelError::InvalidKey {
        reason: format!("could not encode key with {} encoding", encoding.name()),
        cause: Some(e),
    })
}

/// Encode a value, rejecting null
pub(crate) fn encode_value(encoding: &Encoding, value: &Data) -> LevelResult<Encoded> {
    if value.is_null() {
        return Err(LevelError::invalid_value("Value cannot be null"));
    }
    encoding.encode(value).map_err(|e| LevelError::InvalidValue {
        reason: format!("could not encode value with {} encoding", encoding.name()),
        cause: Some(e),
    })
}

pub(crate) fn decode_key(encoding: &Encoding, key: Encoded) -> LevelResult<Data> {
    encoding.decode(key).map_err(|cause| LevelError::KeyDecode {
        encoding: encoding.name().to_string(),
        cause,
    })
}

pub(crate) fn decode_value(encoding: &Encoding, value: Encoded) -> LevelResult<Data> {
    encoding.decode(value).map_err(|cause| LevelError::ValueDecode {
        encoding: encoding.name().to_string(),
        cause,
    })
}

/// Encode range bounds; `gte` wins over `gt` and `lte` over `lt`
pub(crate) fn encode_range(range: &RangeOptions, encoding: &Encoding) -> LevelResult<KeyRange> {
    let start = match (&range.gte, &range.gt) {
        (Some(gte), _) => Bound::Included(encode_key(encoding, gte)?),
        (None, Some(gt)) => Bound::Excluded(encode_key(encoding, gt)?),
        (None, None) => Bound::Unbounded,
    };
    let end = match (&range.lte, &range.lt) {
        (Some(lte), _) => Bound::Included(encode_key(encoding, lte)?),
        (None, Some(lt)) => Bound::Excluded(encode_key(encoding, lt)?),
        (None, None) => Bound::Unbounded,
    };
    Ok(KeyRange { start, end })
}

impl Database {
    /// Take a reference on a snapshot for the duration of one read
    fn snapshot_guard(&self, options: &ReadOptions) -> LevelResult<Option<SnapshotGuard>> {
        options
            .snapshot
            .as_ref()
            .map(|snapshot| snapshot.acquire(self))
            .transpose()
    }

    /// Get a value; `None` when the key does not exist
    pub async fn get(&self, key: impl Into<Data>) -> LevelResult<Option<Data>> {
        self.get_with(key, ReadOptions::default()).await
    }

    pub async fn get_with(
        &self,
        key: impl Into<Data>,
        options: ReadOptions,
    ) -> LevelResult<Option<Data>> {
        let key_encoding = self.key_encoding_for(options.key_encoding.as_ref())?;
        let value_encoding = self.value_encoding_for(options.value_encoding.as_ref())?;
        let key = encode_key(&key_encoding, &key.into())?;

        self.ready(options.signal.as_ref()).await?;
        let guard = self.snapshot_guard(&options)?;
        let fetch = FetchOptions {
            value_format: value_encoding.format(),
            snapshot: guard.as_ref().map(SnapshotGuard::raw),
        };
        let value = self.backend_get(key, fetch).await;
        drop(guard);

        value?
            .map(|v| decode_value(&value_encoding, v))
            .transpose()
    }

    /// Get several values, in the order of `keys`
    pub async fn get_many<K: Into<Data>>(
        &self,
        keys: impl IntoIterator<Item = K>,
    ) -> LevelResult<Vec<Option<Data>>> {
        self.get_many_with(keys, ReadOptions::default()).await
    }

    pub async fn get_many_with<K: Into<Data>>(
        &self,
        keys: impl IntoIterator<Item = K>,
        options: ReadOptions,
    ) -> LevelResult<Vec<Option<Data>>> {
        let key_encoding = self.key_encoding_for(options.key_encoding.as_ref())?;
        let value_encoding = self.value_encoding_for(options.value_encoding.as_ref())?;
        let keys = keys
            .into_iter()
            .map(|k| encode_key(&key_encoding, &k.into()))
            .collect::<LevelResult<Vec<_>>>()?;

        self.ready(options.signal.as_ref()).await?;
        if keys.is_empty() {
            return Ok(Vec::new());
        }
        let guard = self.snapshot_guard(&options)?;
        let fetch = FetchOptions {
            value_format: value_encoding.format(),
            snapshot: guard.as_ref().map(SnapshotGuard::raw),
        };
        let values = self.backend_get_many(keys, fetch).await;
        drop(guard);

        values?
            .into_iter()
            .map(|v| v.map(|v| decode_value(&value_encoding, v)).transpose())
            .collect()
    }

    /// Check whether a key exists
    pub async fn has(&self, key: impl Into<Data>) -> LevelResult<bool> {
        self.has_with(key, ReadOptions::default()).await
    }

    pub async fn has_with(&self, key: impl Into<Data>, options: ReadOptions) -> LevelResult<bool> {
        let key_encoding = self.key_encoding_for(options.key_encoding.as_ref())?;
        let key = encode_key(&key_encoding, &key.into())?;

        self.ready(options.signal.as_ref()).await?;
        let guard = self.snapshot_guard(&options)?;
        let fetch = FetchOptions {
            value_format: self.value_encoding().format(),
            snapshot: guard.as_ref().map(SnapshotGuard::raw),
        };
        let found = self.backend_has(key, fetch).await;
        drop(guard);
        found
    }

    pub async fn has_many<K: Into<Data>>(
        &self,
        keys: impl IntoIterator<Item = K>,
    ) -> LevelResult<Vec<bool>> {
        self.has_many_with(keys, ReadOptions::default()).await
    }

    pub async fn has_many_with<K: Into<Data>>(
        &self,
        keys: impl IntoIterator<Item = K>,
        options: ReadOptions,
    ) -> LevelResult<Vec<bool>> {
        let key_encoding = self.key_encoding_for(options.key_encoding.as_ref())?;
        let keys = keys
            .into_iter()
            .map(|k| encode_key(&key_encoding, &k.into()))
            .collect::<LevelResult<Vec<_>>>()?;

        self.ready(options.signal.as_ref()).await?;
        if keys.is_empty() {
            return Ok(Vec::new());
        }
        let guard = self.snapshot_guard(&options)?;
        let fetch = FetchOptions {
            value_format: self.value_encoding().format(),
            snapshot: guard.as_ref().map(SnapshotGuard::raw),
        };
        let found = self.backend_has_many(keys, fetch).await;
        drop(guard);
        found
    }

    /// Put a key-value pair
    pub async fn put(&self, key: impl Into<Data>, value: impl Into<Data>) -> LevelResult<()> {
        self.put_with(key, value, WriteOptions::default()).await
    }

    pub async fn put_with(
        &self,
        key: impl Into<Data>,
        value: impl Into<Data>,
        options: WriteOptions,
    ) -> LevelResult<()> {
        let op = Operation::put(key, value).with_defaults(&options);
        if !self.inner.hooks.prewrite.is_noop() {
            return self.write_operations(vec![op], &options, "put").await;
        }
        self.write_single(op, &options).await
    }

    /// Delete a key; deleting a missing key is not an error
    pub async fn del(&self, key: impl Into<Data>) -> LevelResult<()> {
        self.del_with(key, WriteOptions::default()).await
    }

    pub async fn del_with(&self, key: impl Into<Data>, options: WriteOptions) -> LevelResult<()> {
        let op = Operation::del(key).with_defaults(&options);
        if !self.inner.hooks.prewrite.is_noop() {
            return self.write_operations(vec![op], &options, "del").await;
        }
        self.write_single(op, &options).await
    }

    /// `put` or `del` without a prewrite hook, through the engine's own
    /// single-key primitive
    async fn write_single(&self, op: Operation, options: &WriteOptions) -> LevelResult<()> {
        validate_operation(&op)?;
        self.ready(options.signal.as_ref()).await?;

        let want_public = self.has_listeners(EventKind::Write);
        let (prepared, public) = self.prepare_operation(&op, want_public)?;
        match prepared.value {
            Some(value) => self.backend_put(prepared.key, value).await?,
            None => self.backend_del(prepared.key).await?,
        }

        if let Some(public) = public {
            self.emit(DbEvent::Write(Arc::new(vec![public])));
        }
        Ok(())
    }

    /// Delete every entry
    pub async fn clear(&self) -> LevelResult<()> {
        self.clear_with(ClearOptions::default()).await
    }

    /// Delete the entries of a range
    pub async fn clear_with(&self, options: ClearOptions) -> LevelResult<()> {
        let key_encoding = self.key_encoding_for(options.key_encoding.as_ref())?;
        let range = encode_range(&options.range, &key_encoding)?;

        self.ready(options.signal.as_ref()).await?;
        if options.limit == Some(0) {
            return Ok(());
        }

        let scan = ScanOptions {
            range,
            reverse: options.reverse,
            limit: options.limit,
            keys: true,
            values: false,
            key_format: key_encoding.format(),
            value_format: self.value_encoding().format(),
            snapshot: None,
        };
        self.backend_clear(scan).await?;

        if self.has_listeners(EventKind::Clear) {
            self.emit(DbEvent::Clear(options));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::encoding::{EncodingSpec, Format, Transcoder};

    #[test]
    fn test_encode_range_precedence() {
        let transcoder = Transcoder::new(&[Format::Utf8]).unwrap();
        let utf8 = transcoder.resolve(&EncodingSpec::default()).unwrap();

        let range = RangeOptions::new().gt("a").gte("b").lt("y").lte("x");
        let encoded = encode_range(&range, &utf8).unwrap();
        assert_eq!(encoded.start, Bound::Included(Encoded::from("b")));
        assert_eq!(encoded.end, Bound::Included(Encoded::from("x")));

        let open = encode_range(&RangeOptions::new().gt("a"), &utf8).unwrap();
        assert_eq!(open.start, Bound::Excluded(Encoded::from("a")));
        assert_eq!(open.end, Bound::Unbounded);
    }

    #[test]
    fn test_null_key_rejected() {
        let transcoder = Transcoder::new(&[Format::Utf8]).unwrap();
        let json = transcoder.resolve(&EncodingSpec::from("json")).unwrap();

        let err = encode_key(&json, &Data::Json(serde_json::Value::Null)).unwrap_err();
        assert_eq!(err.code().unwrap().as_str(), "INVALID_KEY");

        let err = encode_value(&json, &Data::Json(serde_json::Value::Null)).unwrap_err();
        assert_eq!(err.code().unwrap().as_str(), "INVALID_VALUE");
    }
}
