//! Storage engine subsystem
//!
//! The primitive contract concrete engines implement, plus an in-memory
//! reference engine.

pub mod error;
pub mod memory;
pub mod traits;

pub use error::{StorageError, StorageResult};
pub use memory::{MemoryEngine, MemorySnapshot};
pub use traits::{
    EncodedOperation, FetchOptions, KeyRange, OperationKind, RawEntry, RawIterator, RawSnapshot,
    ScanOptions, StorageEngine, Supports, CLEAR_CHUNK_SIZE,
};
