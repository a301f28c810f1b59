//! Batched writes
//!
//! `batch()` commits a list of operations in one atomic engine call.
//! Every operation is validated before any is encoded, then passed through
//! the `prewrite` hook, which may rewrite it or append new operations.
//! Appended operations follow all input operations in the order the hook
//! added them.

mod chained;

use std::sync::Arc;

use crate::db::{encode_key, encode_value, Database, WriteOptions};
use crate::encoding::{Data, Encoded, Encoding, EncodingSpec};
use crate::error::{HookKind, LevelError, LevelResult};
use crate::events::{DbEvent, EventKind};
use crate::storage::OperationKind;

pub use chained::ChainedBatch;

/// A write operation as the caller builds it
#[derive(Debug, Clone)]
pub struct Operation {
    pub kind: OperationKind,
    pub key: Data,
    /// Required for puts, ignored for deletes
    pub value: Option<Data>,
    pub key_encoding: Option<EncodingSpec>,
    pub value_encoding: Option<EncodingSpec>,
    /// Write into this sublevel instead of the database the batch runs on
    pub sublevel: Option<Database>,
}

impl Operation {
    pub fn put(key: impl Into<Data>, value: impl Into<Data>) -> Self {
        Self {
            kind: OperationKind::Put,
            key: key.into(),
            value: Some(value.into()),
            key_encoding: None,
            value_encoding: None,
            sublevel: None,
        }
    }

    pub fn del(key: impl Into<Data>) -> Self {
        Self {
            kind: OperationKind::Del,
            key: key.into(),
            value: None,
            key_encoding: None,
            value_encoding: None,
            sublevel: None,
        }
    }

    pub fn with_key_encoding(mut self, encoding: impl Into<EncodingSpec>) -> Self {
        self.key_encoding = Some(encoding.into());
        self
    }

    pub fn with_value_encoding(mut self, encoding: impl Into<EncodingSpec>) -> Self {
        self.value_encoding = Some(encoding.into());
        self
    }

    pub fn with_sublevel(mut self, sublevel: &Database) -> Self {
        self.sublevel = Some(sublevel.clone());
        self
    }

    /// Fill in encodings the operation does not set itself
    pub(crate) fn with_defaults(mut self, options: &WriteOptions) -> Self {
        if self.key_encoding.is_none() {
            self.key_encoding = options.key_encoding.clone();
        }
        if self.value_encoding.is_none() {
            self.value_encoding = options.value_encoding.clone();
        }
        self
    }
}

/// A committed operation as reported to `write` listeners
#[derive(Debug, Clone)]
pub struct WriteOperation {
    pub kind: OperationKind,
    pub key: Data,
    pub value: Option<Data>,
    pub key_encoding: Encoding,
    pub value_encoding: Encoding,
    /// Key as the emitting database sees it, including the prefixes of a
    /// target sublevel below it
    pub encoded_key: Encoded,
    pub encoded_value: Option<Encoded>,
    pub sublevel: Option<Database>,
}

/// An encoded operation on its way to the engine
pub(crate) struct PreparedOp {
    pub(crate) kind: OperationKind,
    pub(crate) key: Encoded,
    pub(crate) value: Option<Encoded>,
    /// Target sublevel whose prefixes are still to be applied, by the first
    /// database on the way to the root that is one of its ancestors
    pub(crate) pending: Option<Database>,
}

/// Check key and value presence before anything is encoded
pub(crate) fn validate_operation(op: &Operation) -> LevelResult<()> {
    if op.key.is_null() {
        return Err(LevelError::invalid_key("Key cannot be null"));
    }
    if op.kind == OperationKind::Put && op.value.as_ref().map_or(true, Data::is_null) {
        return Err(LevelError::invalid_value("Value cannot be null"));
    }
    Ok(())
}

/// Builder handed to `prewrite` hook functions for appending operations
///
/// Appended operations are validated and encoded immediately and are not
/// passed through the hook again.
pub struct PrewriteBatch<'a> {
    db: &'a Database,
    want_public: bool,
    added: Vec<(PreparedOp, Option<WriteOperation>)>,
}

impl<'a> PrewriteBatch<'a> {
    pub(crate) fn new(db: &'a Database, want_public: bool) -> Self {
        Self {
            db,
            want_public,
            added: Vec::new(),
        }
    }

    /// Append an operation
    pub fn add(&mut self, op: Operation) -> LevelResult<&mut Self> {
        validate_operation(&op)?;
        let prepared = self.db.prepare_operation(&op, self.want_public)?;
        self.added.push(prepared);
        Ok(self)
    }

    /// Number of operations appended so far
    pub fn len(&self) -> usize {
        self.added.len()
    }

    pub fn is_empty(&self) -> bool {
        self.added.is_empty()
    }

    pub(crate) fn into_added(self) -> Vec<(PreparedOp, Option<WriteOperation>)> {
        self.added
    }
}

impl Database {
    /// Commit operations atomically
    pub async fn batch(&self, operations: Vec<Operation>) -> LevelResult<()> {
        self.batch_with(operations, WriteOptions::default()).await
    }

    pub async fn batch_with(
        &self,
        operations: Vec<Operation>,
        options: WriteOptions,
    ) -> LevelResult<()> {
        let operations = operations
            .into_iter()
            .map(|op| op.with_defaults(&options))
            .collect();
        self.write_operations(operations, &options, "batch").await
    }

    /// Start an incrementally built batch
    pub fn chained_batch(&self) -> LevelResult<ChainedBatch> {
        ChainedBatch::new(self)
    }

    /// Encode one operation and work out where its prefixes get applied
    ///
    /// The operation is encoded with its target sublevel's encodings. A
    /// target below this database gets its prefixes applied here. Any other
    /// target in the same tree is left pending for a common ancestor and is
    /// not reported to this database's `write` listeners.
    pub(crate) fn prepare_operation(
        &self,
        op: &Operation,
        want_public: bool,
    ) -> LevelResult<(PreparedOp, Option<WriteOperation>)> {
        let encoder = op.sublevel.as_ref().unwrap_or(self);
        let key_encoding = encoder.key_encoding_for(op.key_encoding.as_ref())?;
        let value_encoding = encoder.value_encoding_for(op.value_encoding.as_ref())?;

        let encoded_key = encode_key(&key_encoding, &op.key)?;
        let encoded_value = match (op.kind, &op.value) {
            (OperationKind::Put, Some(value)) => Some(encode_value(&value_encoding, value)?),
            (OperationKind::Put, None) => {
                return Err(LevelError::invalid_value("Value cannot be null"))
            }
            (OperationKind::Del, _) => None,
        };

        let (key, pending) = match &op.sublevel {
            Some(target) if !target.is(self) => {
                self.assert_same_root(target)?;
                match target.prefix_chain(encoded_key, self) {
                    Ok(key) => (key, None),
                    Err(key) => (key, Some(target.clone())),
                }
            }
            _ => (encoded_key, None),
        };

        let public = (want_public && pending.is_none()).then(|| WriteOperation {
            kind: op.kind,
            key: op.key.clone(),
            value: encoded_value.as_ref().and(op.value.clone()),
            key_encoding,
            value_encoding,
            encoded_key: key.clone(),
            encoded_value: encoded_value.clone(),
            sublevel: op.sublevel.clone(),
        });

        let prepared = PreparedOp {
            kind: op.kind,
            key,
            value: encoded_value,
            pending,
        };
        Ok((prepared, public))
    }

    /// Run operations through the `prewrite` hook and commit them in one
    /// engine batch
    pub(crate) async fn write_operations(
        &self,
        operations: Vec<Operation>,
        options: &WriteOptions,
        name: &'static str,
    ) -> LevelResult<()> {
        for op in &operations {
            validate_operation(op)?;
        }
        self.ready(options.signal.as_ref()).await?;
        if operations.is_empty() {
            return Ok(());
        }

        let want_public = self.has_listeners(EventKind::Write);
        let (prepared, publics) = self.run_prewrite(operations, want_public, name)?;

        self.backend_batch(prepared).await?;

        if !publics.is_empty() {
            self.emit(DbEvent::Write(Arc::new(publics)));
        }
        Ok(())
    }

    /// Hook and encode every operation; hook-added ones go last
    fn run_prewrite(
        &self,
        operations: Vec<Operation>,
        want_public: bool,
        name: &'static str,
    ) -> LevelResult<(Vec<PreparedOp>, Vec<WriteOperation>)> {
        let hook = &self.inner.hooks.prewrite;
        let hooked = !hook.is_noop();
        let mut prepared = Vec::with_capacity(operations.len());
        let mut publics = Vec::new();
        let mut extra = PrewriteBatch::new(self, want_public);

        for mut op in operations {
            if hooked {
                hook.run(&mut op, &mut extra)
                    .map_err(|e| LevelError::hook(HookKind::Prewrite, name, e))?;
                validate_operation(&op)?;
            }
            let (op, public) = self.prepare_operation(&op, want_public)?;
            prepared.push(op);
            publics.extend(public);
        }
        for (op, public) in extra.into_added() {
            prepared.push(op);
            publics.extend(public);
        }
        Ok((prepared, publics))
    }
}
