//! kvlayer - a contract layer for sorted key-value stores
//!
//! Features:
//! - Open/close lifecycle with operations deferred while opening
//! - Key and value encodings transcoded to the engine's wire formats
//! - Sublevels: prefixed namespaces usable as databases
//! - Iterators with limits, seeking and snapshots
//! - Atomic and chained batches with `prewrite` hooks
//! - In-memory reference engine

pub mod batch;
pub mod db;
pub mod encoding;
pub mod error;
pub mod events;
pub mod hooks;
pub mod iterator;
pub mod snapshot;
pub mod storage;
pub mod sublevel;

pub use batch::{ChainedBatch, Operation, PrewriteBatch, WriteOperation};
pub use db::{
    AbortSignal, ClearOptions, Database, DatabaseOptions, DbStatus, DelOptions, IteratorOptions,
    OpenOptions, PutOptions, RangeOptions, ReadOptions, WriteOptions,
};
pub use encoding::{Codec, Data, Encoded, Encoding, EncodingSpec, Format};
pub use error::{ErrorCode, HookKind, LevelError, LevelResult};
pub use events::{DbEvent, EventKind, ListenerId};
pub use iterator::{Entry, EntryIterator, KeyIterator, ValueIterator};
pub use snapshot::Snapshot;
pub use storage::{MemoryEngine, OperationKind, StorageEngine, StorageError, Supports};
pub use sublevel::{SublevelOptions, DEFAULT_SEPARATOR};
