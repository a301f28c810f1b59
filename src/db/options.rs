//! Option structs for database operations
//!
//! Every struct has a `Default` and chainable `with_*` builders.

use crate::db::{AbortSignal, Database};
use crate::encoding::{Data, EncodingSpec};
use crate::snapshot::Snapshot;

/// Options passed to `open()` and on to the engine
#[derive(Debug, Clone)]
pub struct OpenOptions {
    pub create_if_missing: bool,
    pub error_if_exists: bool,
    /// Wait for an open started elsewhere instead of starting one
    pub passive: bool,
}

impl Default for OpenOptions {
    fn default() -> Self {
        Self {
            create_if_missing: true,
            error_if_exists: false,
            passive: false,
        }
    }
}

impl OpenOptions {
    pub fn passive() -> Self {
        Self {
            passive: true,
            ..Default::default()
        }
    }

    pub fn with_create_if_missing(mut self, create: bool) -> Self {
        self.create_if_missing = create;
        self
    }

    pub fn with_error_if_exists(mut self, error: bool) -> Self {
        self.error_if_exists = error;
        self
    }
}

/// Options for constructing a root database
#[derive(Debug, Clone)]
pub struct DatabaseOptions {
    pub key_encoding: EncodingSpec,
    pub value_encoding: EncodingSpec,
    /// Schedule `open()` on the current runtime at construction
    pub auto_open: bool,
    /// Options used by the scheduled and by argument-less opens
    pub open: OpenOptions,
}

impl Default for DatabaseOptions {
    fn default() -> Self {
        Self {
            key_encoding: EncodingSpec::default(),
            value_encoding: EncodingSpec::default(),
            auto_open: true,
            open: OpenOptions::default(),
        }
    }
}

impl DatabaseOptions {
    pub fn with_key_encoding(mut self, encoding: impl Into<EncodingSpec>) -> Self {
        self.key_encoding = encoding.into();
        self
    }

    pub fn with_value_encoding(mut self, encoding: impl Into<EncodingSpec>) -> Self {
        self.value_encoding = encoding.into();
        self
    }

    pub fn with_auto_open(mut self, auto_open: bool) -> Self {
        self.auto_open = auto_open;
        self
    }

    pub fn with_open_options(mut self, open: OpenOptions) -> Self {
        self.open = open;
        self
    }
}

/// Options for `get`, `get_many`, `has` and `has_many`
#[derive(Debug, Clone, Default)]
pub struct ReadOptions {
    pub key_encoding: Option<EncodingSpec>,
    pub value_encoding: Option<EncodingSpec>,
    pub snapshot: Option<Snapshot>,
    pub signal: Option<AbortSignal>,
}

impl ReadOptions {
    pub fn with_key_encoding(mut self, encoding: impl Into<EncodingSpec>) -> Self {
        self.key_encoding = Some(encoding.into());
        self
    }

    pub fn with_value_encoding(mut self, encoding: impl Into<EncodingSpec>) -> Self {
        self.value_encoding = Some(encoding.into());
        self
    }

    pub fn with_snapshot(mut self, snapshot: &Snapshot) -> Self {
        self.snapshot = Some(snapshot.clone());
        self
    }

    pub fn with_signal(mut self, signal: &AbortSignal) -> Self {
        self.signal = Some(signal.clone());
        self
    }
}

/// Options for `put`, `del` and `batch`
#[derive(Debug, Clone, Default)]
pub struct WriteOptions {
    pub key_encoding: Option<EncodingSpec>,
    pub value_encoding: Option<EncodingSpec>,
    pub signal: Option<AbortSignal>,
}

impl WriteOptions {
    pub fn with_key_encoding(mut self, encoding: impl Into<EncodingSpec>) -> Self {
        self.key_encoding = Some(encoding.into());
        self
    }

    pub fn with_value_encoding(mut self, encoding: impl Into<EncodingSpec>) -> Self {
        self.value_encoding = Some(encoding.into());
        self
    }

    pub fn with_signal(mut self, signal: &AbortSignal) -> Self {
        self.signal = Some(signal.clone());
        self
    }
}

/// Per-entry options for a chained batch `put`
#[derive(Debug, Clone, Default)]
pub struct PutOptions {
    pub key_encoding: Option<EncodingSpec>,
    pub value_encoding: Option<EncodingSpec>,
    /// Write into this sublevel instead of the batch's database
    pub sublevel: Option<Database>,
}

impl PutOptions {
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
}

/// Per-entry options for a chained batch `del`
#[derive(Debug, Clone, Default)]
pub struct DelOptions {
    pub key_encoding: Option<EncodingSpec>,
    pub sublevel: Option<Database>,
}

impl DelOptions {
    pub fn with_key_encoding(mut self, encoding: impl Into<EncodingSpec>) -> Self {
        self.key_encoding = Some(encoding.into());
        self
    }

    pub fn with_sublevel(mut self, sublevel: &Database) -> Self {
        self.sublevel = Some(sublevel.clone());
        self
    }
}

/// Key range bounds; `gte` wins over `gt` and `lte` over `lt`
#[derive(Debug, Clone, Default)]
pub struct RangeOptions {
    pub gt: Option<Data>,
    pub gte: Option<Data>,
    pub lt: Option<Data>,
    pub lte: Option<Data>,
}

impl RangeOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn gt(mut self, key: impl Into<Data>) -> Self {
        self.gt = Some(key.into());
        self
    }

    pub fn gte(mut self, key: impl Into<Data>) -> Self {
        self.gte = Some(key.into());
        self
    }

    pub fn lt(mut self, key: impl Into<Data>) -> Self {
        self.lt = Some(key.into());
        self
    }

    pub fn lte(mut self, key: impl Into<Data>) -> Self {
        self.lte = Some(key.into());
        self
    }
}

/// Normalize a signed limit; every negative value means unbounded
pub(crate) fn normalize_limit(limit: i64) -> Option<usize> {
    if limit < 0 {
        None
    } else {
        Some(usize::try_from(limit).unwrap_or(usize::MAX))
    }
}

/// Options for `iterator()`, `keys()` and `values()`
#[derive(Debug, Clone)]
pub struct IteratorOptions {
    pub range: RangeOptions,
    pub reverse: bool,
    /// `None` means unbounded
    pub limit: Option<usize>,
    pub keys: bool,
    pub values: bool,
    pub key_encoding: Option<EncodingSpec>,
    pub value_encoding: Option<EncodingSpec>,
    pub snapshot: Option<Snapshot>,
}

impl Default for IteratorOptions {
    fn default() -> Self {
        Self {
            range: RangeOptions::default(),
            reverse: false,
            limit: None,
            keys: true,
            values: true,
            key_encoding: None,
            value_encoding: None,
            snapshot: None,
        }
    }
}

impl IteratorOptions {
    pub fn with_range(mut self, range: RangeOptions) -> Self {
        self.range = range;
        self
    }

    pub fn with_reverse(mut self, reverse: bool) -> Self {
        self.reverse = reverse;
        self
    }

    /// Cap the number of entries; any negative value means unbounded
    pub fn limit(mut self, limit: i64) -> Self {
        self.limit = normalize_limit(limit);
        self
    }

    pub fn with_keys(mut self, keys: bool) -> Self {
        self.keys = keys;
        self
    }

    pub fn with_values(mut self, values: bool) -> Self {
        self.values = values;
        self
    }

    pub fn with_key_encoding(mut self, encoding: impl Into<EncodingSpec>) -> Self {
        self.key_encoding = Some(encoding.into());
        self
    }

    pub fn with_value_encoding(mut self, encoding: impl Into<EncodingSpec>) -> Self {
        self.value_encoding = Some(encoding.into());
        self
    }

    pub fn with_snapshot(mut self, snapshot: &Snapshot) -> Self {
        self.snapshot = Some(snapshot.clone());
        self
    }
}

/// Options for `clear()`
#[derive(Debug, Clone, Default)]
pub struct ClearOptions {
    pub range: RangeOptions,
    pub reverse: bool,
    pub limit: Option<usize>,
    pub key_encoding: Option<EncodingSpec>,
    pub signal: Option<AbortSignal>,
}

impl ClearOptions {
    pub fn with_range(mut self, range: RangeOptions) -> Self {
        self.range = range;
        self
    }

    pub fn with_reverse(mut self, reverse: bool) -> Self {
        self.reverse = reverse;
        self
    }

    pub fn limit(mut self, limit: i64) -> Self {
        self.limit = normalize_limit(limit);
        self
    }

    pub fn with_key_encoding(mut self, encoding: impl Into<EncodingSpec>) -> Self {
        self.key_encoding = Some(encoding.into());
        self
    }

    pub fn with_signal(mut self, signal: &AbortSignal) -> Self {
        self.signal = Some(signal.clone());
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_limit_normalization() {
        assert_eq!(IteratorOptions::default().limit(-1).limit, None);
        assert_eq!(IteratorOptions::default().limit(-20).limit, None);
        assert_eq!(IteratorOptions::default().limit(0).limit, Some(0));
        assert_eq!(ClearOptions::default().limit(5).limit, Some(5));
        assert_eq!(normalize_limit(i64::MIN), None);
        // Saturates where usize is narrower than i64
        let max = usize::try_from(i64::MAX).unwrap_or(usize::MAX);
        assert_eq!(normalize_limit(i64::MAX), Some(max));
    }

    #[test]
    fn test_defaults() {
        let open = OpenOptions::default();
        assert!(open.create_if_missing);
        assert!(!open.error_if_exists);
        assert!(!open.passive);
        assert!(OpenOptions::passive().passive);

        let db = DatabaseOptions::default();
        assert!(db.auto_open);
        assert!(matches!(db.key_encoding, EncodingSpec::Named(ref n) if n == "utf8"));
    }
}
