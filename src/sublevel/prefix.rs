//! Key prefixes of a sublevel
//!
//! A prefix is kept in all three wire representations so prefixing an
//! encoded key never re-encodes the prefix.

use std::ops::Bound;

use bytes::{BufMut, Bytes, BytesMut};

use crate::encoding::{Encoded, Format};
use crate::error::{LevelError, LevelResult};
use crate::storage::KeyRange;

/// Default separator between sublevel names
pub const DEFAULT_SEPARATOR: char = '!';

/// One prefix in text, fixed-bytes and growable-bytes form
#[derive(Debug, Clone)]
pub(crate) struct Prefix {
    text: String,
    buffer: Bytes,
    view: Vec<u8>,
}

impl Prefix {
    pub(crate) fn new(text: String) -> Self {
        let buffer = Bytes::copy_from_slice(text.as_bytes());
        let view = text.as_bytes().to_vec();
        Self { text, buffer, view }
    }

    pub(crate) fn as_str(&self) -> &str {
        &self.text
    }

    pub(crate) fn len(&self) -> usize {
        self.text.len()
    }

    /// The prefix itself as a key of the given format
    pub(crate) fn encoded(&self, format: Format) -> Encoded {
        match format {
            Format::Utf8 => Encoded::Utf8(self.text.clone()),
            Format::Buffer => Encoded::Buffer(self.buffer.clone()),
            Format::View => Encoded::View(self.view.clone()),
        }
    }

    /// Concatenate the prefix in front of an encoded key
    pub(crate) fn apply(&self, key: Encoded) -> Encoded {
        if key.is_empty() {
            return self.encoded(key.format());
        }
        match key {
            Encoded::Utf8(s) => {
                let mut out = String::with_capacity(self.text.len() + s.len());
                out.push_str(&self.text);
                out.push_str(&s);
                Encoded::Utf8(out)
            }
            Encoded::Buffer(b) => {
                let mut out = BytesMut::with_capacity(self.buffer.len() + b.len());
                out.put_slice(&self.buffer);
                out.put_slice(&b);
                Encoded::Buffer(out.freeze())
            }
            Encoded::View(v) => {
                let mut out = Vec::with_capacity(self.view.len() + v.len());
                out.extend_from_slice(&self.view);
                out.extend_from_slice(&v);
                Encoded::View(out)
            }
        }
    }
}

/// Prefixes of one sublevel
#[derive(Debug, Clone)]
pub(crate) struct SublevelPrefix {
    /// `separator + name + separator`
    pub(crate) local: Prefix,
    /// Parent's global prefix followed by the local prefix
    pub(crate) global: Prefix,
    /// Local prefix with its last byte incremented; excludes the namespace
    pub(crate) upper: Prefix,
}

impl SublevelPrefix {
    pub(crate) fn new(name: &str, separator: char, parent_global: &str) -> Self {
        let local = format!("{separator}{name}{separator}");
        let global = format!("{parent_global}{local}");
        let upper = match char::from_u32(separator as u32 + 1) {
            Some(next) => format!("{separator}{name}{next}"),
            None => local.clone(),
        };
        Self {
            local: Prefix::new(local),
            global: Prefix::new(global),
            upper: Prefix::new(upper),
        }
    }

    /// Scope a range to this namespace
    ///
    /// Missing lower bounds become the prefix itself, missing upper bounds
    /// the exclusive upper marker, and given bounds are prefixed.
    pub(crate) fn scope_range(&self, range: KeyRange, format: Format) -> KeyRange {
        let start = match range.start {
            Bound::Included(k) => Bound::Included(self.local.apply(k)),
            Bound::Excluded(k) => Bound::Excluded(self.local.apply(k)),
            Bound::Unbounded => Bound::Included(self.local.encoded(format)),
        };
        let end = match range.end {
            Bound::Included(k) => Bound::Included(self.local.apply(k)),
            Bound::Excluded(k) => Bound::Excluded(self.local.apply(k)),
            Bound::Unbounded => Bound::Excluded(self.upper.encoded(format)),
        };
        KeyRange { start, end }
    }
}

/// Check a separator and trim and check one name
pub(crate) fn validate_name(name: &str, separator: char) -> LevelResult<String> {
    if !separator.is_ascii() || separator as u32 >= 126 {
        return Err(LevelError::InvalidPrefix(format!(
            "separator {:?} must be an ASCII character below '~'",
            separator
        )));
    }
    let trimmed = name.trim_matches(separator);
    let min = separator as u8 + 1;
    if let Some(bad) = trimmed.bytes().find(|b| *b <= min || *b >= 127) {
        return Err(LevelError::InvalidPrefix(format!(
            "name {:?} contains byte {:#04x}; names must only use bytes above {:#04x} and below 0x7f",
            name, bad, min
        )));
    }
    Ok(trimmed.to_string())
}

/// Strip the first `len` bytes of a key without re-encoding
pub(crate) fn unfix(key: Encoded, len: usize) -> Encoded {
    if len == 0 {
        return key;
    }
    match key {
        Encoded::Utf8(mut s) => {
            if s.is_char_boundary(len) {
                s.replace_range(..len, "");
            } else {
                s.clear();
            }
            Encoded::Utf8(s)
        }
        Encoded::Buffer(b) => Encoded::Buffer(if b.len() >= len {
            b.slice(len..)
        } else {
            Bytes::new()
        }),
        // Shift in place; the allocation is reused
        Encoded::View(mut v) => {
            let rest = v.len().saturating_sub(len);
            if rest > 0 {
                v.copy_within(len.., 0);
            }
            v.truncate(rest);
            Encoded::View(v)
        }
    }
}
