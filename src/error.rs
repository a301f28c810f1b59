//! Caller-facing error types
//!
//! Every contract violation surfaces as a [`LevelError`] carrying a stable
//! [`ErrorCode`]. Wrapping variants keep their cause reachable through
//! [`std::error::Error::source`].

use std::fmt;

use crate::encoding::CodecError;
use crate::storage::StorageError;

/// Boxed error used for causes of arbitrary origin
pub type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// Result type for database operations
pub type LevelResult<T> = Result<T, LevelError>;

/// Stable error codes forming the wire contract for callers
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorCode {
    DatabaseNotOpen,
    DatabaseNotClosed,
    IteratorNotOpen,
    IteratorBusy,
    BatchNotOpen,
    InvalidKey,
    InvalidValue,
    InvalidPrefix,
    DecodeError,
    HookError,
    Aborted,
    SnapshotNotOpen,
    NotSupported,
    EncodingNotFound,
    EncodingNotSupported,
}

impl ErrorCode {
    /// The code as it appears on the wire
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorCode::DatabaseNotOpen => "DATABASE_NOT_OPEN",
            ErrorCode::DatabaseNotClosed => "DATABASE_NOT_CLOSED",
            ErrorCode::IteratorNotOpen => "ITERATOR_NOT_OPEN",
            ErrorCode::IteratorBusy => "ITERATOR_BUSY",
            ErrorCode::BatchNotOpen => "BATCH_NOT_OPEN",
            ErrorCode::InvalidKey => "INVALID_KEY",
            ErrorCode::InvalidValue => "INVALID_VALUE",
            ErrorCode::InvalidPrefix => "INVALID_PREFIX",
            ErrorCode::DecodeError => "DECODE_ERROR",
            ErrorCode::HookError => "HOOK_ERROR",
            ErrorCode::Aborted => "ABORTED",
            ErrorCode::SnapshotNotOpen => "SNAPSHOT_NOT_OPEN",
            ErrorCode::NotSupported => "NOT_SUPPORTED",
            ErrorCode::EncodingNotFound => "ENCODING_NOT_FOUND",
            ErrorCode::EncodingNotSupported => "ENCODING_NOT_SUPPORTED",
        }
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Which extension point a hook error came from
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HookKind {
    Postopen,
    Prewrite,
    Newsub,
}

impl fmt::Display for HookKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            HookKind::Postopen => f.write_str("postopen"),
            HookKind::Prewrite => f.write_str("prewrite"),
            HookKind::Newsub => f.write_str("newsub"),
        }
    }
}

/// Database layer errors
#[derive(Debug)]
pub enum LevelError {
    /// Operation on a database that is not open, or a failed open
    DatabaseNotOpen { cause: Option<Box<LevelError>> },

    /// A failed close; the database rolled back to open
    DatabaseNotClosed { cause: Option<Box<LevelError>> },

    /// Iterator has been closed or a close was requested
    IteratorNotOpen,

    /// A fetch is already in flight on this iterator
    IteratorBusy,

    /// Chained batch was written or closed
    BatchNotOpen,

    /// Snapshot has been closed
    SnapshotNotOpen,

    /// Key rejected before reaching the engine
    InvalidKey {
        reason: String,
        cause: Option<CodecError>,
    },

    /// Value rejected before reaching the engine
    InvalidValue {
        reason: String,
        cause: Option<CodecError>,
    },

    /// Sublevel name or separator is not usable as a prefix
    InvalidPrefix(String),

    /// A key returned by the engine could not be decoded
    KeyDecode { encoding: String, cause: CodecError },

    /// A value returned by the engine could not be decoded
    ValueDecode { encoding: String, cause: CodecError },

    /// A hook function failed
    Hook {
        hook: HookKind,
        operation: &'static str,
        cause: Box<LevelError>,
    },

    /// A deferred operation was cancelled through its abort signal
    Aborted,

    /// Capability not offered by the engine or this layer
    NotSupported(String),

    /// No encoding registered under this name
    EncodingNotFound(String),

    /// Encoding cannot be represented in any format the engine accepts
    EncodingNotSupported(String),

    /// Error from the primitive engine
    Storage(StorageError),

    /// Two or more independent failures during the same transition
    Combined(Vec<LevelError>),

    /// Error raised by user code (hooks, custom codecs)
    Other(BoxError),
}

impl LevelError {
    /// Database not open, without a cause
    pub fn not_open() -> Self {
        LevelError::DatabaseNotOpen { cause: None }
    }

    /// Wrap an arbitrary error raised from user code
    pub fn other(err: impl Into<BoxError>) -> Self {
        LevelError::Other(err.into())
    }

    pub(crate) fn invalid_key(reason: impl Into<String>) -> Self {
        LevelError::InvalidKey {
            reason: reason.into(),
            cause: None,
        }
    }

    pub(crate) fn invalid_value(reason: impl Into<String>) -> Self {
        LevelError::InvalidValue {
            reason: reason.into(),
            cause: None,
        }
    }

    pub(crate) fn hook(hook: HookKind, operation: &'static str, cause: LevelError) -> Self {
        LevelError::Hook {
            hook,
            operation,
            cause: Box::new(cause),
        }
    }

    /// Stable code, if this is a contract error
    pub fn code(&self) -> Option<ErrorCode> {
        let code = match self {
            LevelError::DatabaseNotOpen { .. } => ErrorCode::DatabaseNotOpen,
            LevelError::DatabaseNotClosed { .. } => ErrorCode::DatabaseNotClosed,
            LevelError::IteratorNotOpen => ErrorCode::IteratorNotOpen,
            LevelError::IteratorBusy => ErrorCode::IteratorBusy,
            LevelError::BatchNotOpen => ErrorCode::BatchNotOpen,
            LevelError::SnapshotNotOpen => ErrorCode::SnapshotNotOpen,
            LevelError::InvalidKey { .. } => ErrorCode::InvalidKey,
            LevelError::InvalidValue { .. } => ErrorCode::InvalidValue,
            LevelError::InvalidPrefix(_) => ErrorCode::InvalidPrefix,
            LevelError::KeyDecode { .. } | LevelError::ValueDecode { .. } => {
                ErrorCode::DecodeError
            }
            LevelError::Hook { .. } => ErrorCode::HookError,
            LevelError::Aborted => ErrorCode::Aborted,
            LevelError::NotSupported(_) => ErrorCode::NotSupported,
            LevelError::EncodingNotFound(_) => ErrorCode::EncodingNotFound,
            LevelError::EncodingNotSupported(_) => ErrorCode::EncodingNotSupported,
            LevelError::Storage(StorageError::NotSupported(_)) => ErrorCode::NotSupported,
            LevelError::Storage(_) | LevelError::Combined(_) | LevelError::Other(_) => {
                return None
            }
        };
        Some(code)
    }

    /// The wrapped cause of a lifecycle or hook error
    pub fn cause(&self) -> Option<&LevelError> {
        match self {
            LevelError::DatabaseNotOpen { cause } | LevelError::DatabaseNotClosed { cause } => {
                cause.as_deref()
            }
            LevelError::Hook { cause, .. } => Some(cause),
            _ => None,
        }
    }

    /// Join independent failures
    ///
    /// Returns `None` when there is nothing to report, the error itself when
    /// there is exactly one, and [`LevelError::Combined`] otherwise. Nested
    /// combined errors are flattened.
    pub fn combine<I>(errors: I) -> Option<LevelError>
    where
        I: IntoIterator<Item = Option<LevelError>>,
    {
        let mut all = Vec::new();
        for err in errors.into_iter().flatten() {
            match err {
                LevelError::Combined(inner) => all.extend(inner),
                other => all.push(other),
            }
        }
        match all.len() {
            0 => None,
            1 => all.pop(),
            _ => Some(LevelError::Combined(all)),
        }
    }
}

impl fmt::Display for LevelError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LevelError::DatabaseNotOpen { cause: None } => write!(f, "Database is not open"),
            LevelError::DatabaseNotOpen { cause: Some(e) } => {
                write!(f, "Database is not open: {}", e)
            }
            LevelError::DatabaseNotClosed { cause: None } => write!(f, "Database is not closed"),
            LevelError::DatabaseNotClosed { cause: Some(e) } => {
                write!(f, "Database is not closed: {}", e)
            }
            LevelError::IteratorNotOpen => write!(f, "Iterator is not open"),
            LevelError::IteratorBusy => write!(
                f,
                "Iterator is busy: cannot call next() until previous call has completed"
            ),
            LevelError::BatchNotOpen => write!(f, "Batch is not open"),
            LevelError::SnapshotNotOpen => write!(f, "Snapshot is not open"),
            LevelError::InvalidKey { reason, .. } => write!(f, "Invalid key: {}", reason),
            LevelError::InvalidValue { reason, .. } => write!(f, "Invalid value: {}", reason),
            LevelError::InvalidPrefix(msg) => write!(f, "Invalid sublevel prefix: {}", msg),
            LevelError::KeyDecode { encoding, cause } => {
                write!(f, "Could not decode key with {} encoding: {}", encoding, cause)
            }
            LevelError::ValueDecode { encoding, cause } => {
                write!(f, "Could not decode value with {} encoding: {}", encoding, cause)
            }
            LevelError::Hook {
                hook,
                operation,
                cause,
            } => write!(f, "The {} hook failed on {}(): {}", hook, operation, cause),
            LevelError::Aborted => write!(f, "Operation has been aborted"),
            LevelError::NotSupported(what) => write!(f, "Not supported: {}", what),
            LevelError::EncodingNotFound(name) => write!(f, "Encoding '{}' is not found", name),
            LevelError::EncodingNotSupported(name) => {
                write!(f, "Encoding '{}' is not supported", name)
            }
            LevelError::Storage(e) => write!(f, "storage error: {}", e),
            LevelError::Combined(errors) => {
                let messages: Vec<String> = errors.iter().map(|e| e.to_string()).collect();
                write!(f, "{}", messages.join("; "))
            }
            LevelError::Other(e) => write!(f, "{}", e),
        }
    }
}

impl std::error::Error for LevelError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            LevelError::DatabaseNotOpen { cause } | LevelError::DatabaseNotClosed { cause } => {
                match cause {
                    Some(e) => Some(e.as_ref() as &(dyn std::error::Error + 'static)),
                    None => None,
                }
            }
            LevelError::InvalidKey { cause, .. } | LevelError::InvalidValue { cause, .. } => {
                match cause {
                    Some(e) => Some(e as &(dyn std::error::Error + 'static)),
                    None => None,
                }
            }
            LevelError::KeyDecode { cause, .. } | LevelError::ValueDecode { cause, .. } => {
                Some(cause as &(dyn std::error::Error + 'static))
            }
            LevelError::Hook { cause, .. } => {
                Some(cause.as_ref() as &(dyn std::error::Error + 'static))
            }
            LevelError::Storage(e) => Some(e as &(dyn std::error::Error + 'static)),
            LevelError::Combined(errors) => match errors.first() {
                Some(e) => Some(e as &(dyn std::error::Error + 'static)),
                None => None,
            },
            LevelError::Other(e) => Some(e.as_ref() as &(dyn std::error::Error + 'static)),
            _ => None,
        }
    }
}

impl From<StorageError> for LevelError {
    fn from(e: StorageError) -> Self {
        LevelError::Storage(e)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_codes() {
        assert_eq!(
            LevelError::not_open().code(),
            Some(ErrorCode::DatabaseNotOpen)
        );
        assert_eq!(LevelError::IteratorBusy.code().unwrap().as_str(), "ITERATOR_BUSY");
        assert_eq!(
            LevelError::from(StorageError::NotSupported("seek".into())).code(),
            Some(ErrorCode::NotSupported)
        );
        assert_eq!(LevelError::from(StorageError::Closed).code(), None);
    }

    #[test]
    fn test_combine() {
        assert!(LevelError::combine([None, None]).is_none());

        let single = LevelError::combine([None, Some(LevelError::Aborted)]).unwrap();
        assert!(matches!(single, LevelError::Aborted));

        let joined = LevelError::combine([
            Some(LevelError::Aborted),
            Some(LevelError::Combined(vec![
                LevelError::IteratorBusy,
                LevelError::BatchNotOpen,
            ])),
        ])
        .unwrap();
        match &joined {
            LevelError::Combined(all) => assert_eq!(all.len(), 3),
            other => panic!("unexpected {:?}", other),
        }
        assert!(joined.to_string().contains("aborted"));
        assert!(joined.to_string().contains("Batch is not open"));
    }

    #[test]
    fn test_source_chain() {
        use std::error::Error;

        let err = LevelError::DatabaseNotOpen {
            cause: Some(Box::new(LevelError::Storage(StorageError::Closed))),
        };
        let source = err.source().unwrap();
        assert_eq!(source.to_string(), "storage error: Storage is closed");
        assert!(matches!(err.cause(), Some(LevelError::Storage(_))));
    }
}
