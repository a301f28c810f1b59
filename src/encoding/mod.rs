//! Key and value encodings
//!
//! User data ([`Data`]) is turned into one of three byte-equivalent wire
//! representations ([`Encoded`]) before it reaches an engine:
//! - `utf8`: text (`String`)
//! - `buffer`: fixed bytes (`bytes::Bytes`), sliced without copying
//! - `view`: growable bytes (`Vec<u8>`)
//!
//! A [`Codec`] converts between the two. The [`Transcoder`] resolves a named
//! or custom codec into an [`Encoding`] whose format the engine supports.

mod codecs;
mod transcoder;

use std::cmp::Ordering;
use std::fmt;
use std::hash::{Hash, Hasher};
use std::sync::Arc;

use bytes::Bytes;
use serde::de::DeserializeOwned;
use serde::Serialize;
use thiserror::Error;

pub use codecs::{
    Base64Codec, BufferCodec, HexCodec, JsonCodec, TranscodedCodec, Utf8Codec, ViewCodec,
};
pub use transcoder::Transcoder;

/// Codec errors
#[derive(Error, Debug)]
pub enum CodecError {
    /// Bytes are not valid UTF-8
    #[error("invalid UTF-8: {0}")]
    Utf8(#[from] std::string::FromUtf8Error),

    /// JSON (de)serialization failed
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Text is not valid hex
    #[error("invalid hex: {0}")]
    Hex(#[from] hex::FromHexError),

    /// Text is not valid base64
    #[error("invalid base64: {0}")]
    Base64(#[from] base64::DecodeError),

    /// Data of this shape cannot be encoded by this codec
    #[error("{0}")]
    Unsupported(String),
}

/// Result type for codec operations
pub type CodecResult<T> = Result<T, CodecError>;

/// Wire format understood by engines
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Format {
    Utf8,
    Buffer,
    View,
}

impl Format {
    pub fn as_str(&self) -> &'static str {
        match self {
            Format::Utf8 => "utf8",
            Format::Buffer => "buffer",
            Format::View => "view",
        }
    }
}

impl fmt::Display for Format {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Encoded key or value in one of the wire formats
///
/// Equality, ordering and hashing compare the underlying bytes, so the three
/// representations of the same bytes are interchangeable.
#[derive(Debug, Clone)]
pub enum Encoded {
    Utf8(String),
    Buffer(Bytes),
    View(Vec<u8>),
}

impl Encoded {
    /// Build from raw bytes in the requested format
    pub fn from_vec(format: Format, bytes: Vec<u8>) -> CodecResult<Self> {
        Ok(match format {
            Format::Utf8 => Encoded::Utf8(String::from_utf8(bytes)?),
            Format::Buffer => Encoded::Buffer(Bytes::from(bytes)),
            Format::View => Encoded::View(bytes),
        })
    }

    /// Empty key or value in the requested format
    pub fn empty(format: Format) -> Self {
        match format {
            Format::Utf8 => Encoded::Utf8(String::new()),
            Format::Buffer => Encoded::Buffer(Bytes::new()),
            Format::View => Encoded::View(Vec::new()),
        }
    }

    pub fn format(&self) -> Format {
        match self {
            Encoded::Utf8(_) => Format::Utf8,
            Encoded::Buffer(_) => Format::Buffer,
            Encoded::View(_) => Format::View,
        }
    }

    pub fn as_bytes(&self) -> &[u8] {
        match self {
            Encoded::Utf8(s) => s.as_bytes(),
            Encoded::Buffer(b) => b,
            Encoded::View(v) => v,
        }
    }

    pub fn len(&self) -> usize {
        self.as_bytes().len()
    }

    pub fn is_empty(&self) -> bool {
        self.as_bytes().is_empty()
    }

    /// Owned byte vector, copying only when the representation is shared
    pub fn into_vec(self) -> Vec<u8> {
        match self {
            Encoded::Utf8(s) => s.into_bytes(),
            Encoded::Buffer(b) => b.to_vec(),
            Encoded::View(v) => v,
        }
    }

    /// Convert to another format; a no-op when already in it
    pub fn into_format(self, format: Format) -> CodecResult<Self> {
        if self.format() == format {
            return Ok(self);
        }
        match (self, format) {
            (Encoded::Buffer(b), Format::View) => Ok(Encoded::View(b.to_vec())),
            (Encoded::View(v), Format::Buffer) => Ok(Encoded::Buffer(Bytes::from(v))),
            (Encoded::Utf8(s), Format::Buffer) => Ok(Encoded::Buffer(Bytes::from(s))),
            (Encoded::Utf8(s), Format::View) => Ok(Encoded::View(s.into_bytes())),
            (other, format) => Encoded::from_vec(format, other.into_vec()),
        }
    }
}

impl PartialEq for Encoded {
    fn eq(&self, other: &Self) -> bool {
        self.as_bytes() == other.as_bytes()
    }
}

impl Eq for Encoded {}

impl PartialOrd for Encoded {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Encoded {
    fn cmp(&self, other: &Self) -> Ordering {
        self.as_bytes().cmp(other.as_bytes())
    }
}

impl Hash for Encoded {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.as_bytes().hash(state);
    }
}

impl From<&str> for Encoded {
    fn from(s: &str) -> Self {
        Encoded::Utf8(s.to_string())
    }
}

impl From<Vec<u8>> for Encoded {
    fn from(v: Vec<u8>) -> Self {
        Encoded::View(v)
    }
}

impl From<Bytes> for Encoded {
    fn from(b: Bytes) -> Self {
        Encoded::Buffer(b)
    }
}

/// A key or value as the caller sees it
#[derive(Debug, Clone, PartialEq)]
pub enum Data {
    Text(String),
    Buffer(Bytes),
    View(Vec<u8>),
    Json(serde_json::Value),
}

impl Data {
    /// Serialize any value into JSON data
    pub fn json<T: Serialize>(value: &T) -> CodecResult<Self> {
        Ok(Data::Json(serde_json::to_value(value)?))
    }

    /// Deserialize JSON data into a typed value
    pub fn deserialize<T: DeserializeOwned>(&self) -> CodecResult<T> {
        match self {
            Data::Json(value) => Ok(serde_json::from_value(value.clone())?),
            Data::Text(s) => Ok(serde_json::from_str(s)?),
            Data::Buffer(b) => Ok(serde_json::from_slice(b)?),
            Data::View(v) => Ok(serde_json::from_slice(v)?),
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Data::Text(s) => Some(s),
            Data::Json(serde_json::Value::String(s)) => Some(s),
            _ => None,
        }
    }

    pub fn as_bytes(&self) -> Option<&[u8]> {
        match self {
            Data::Text(s) => Some(s.as_bytes()),
            Data::Buffer(b) => Some(b),
            Data::View(v) => Some(v),
            Data::Json(_) => None,
        }
    }

    /// `true` for JSON null, the only value this layer treats as absent
    pub fn is_null(&self) -> bool {
        matches!(self, Data::Json(serde_json::Value::Null))
    }
}

impl From<&str> for Data {
    fn from(s: &str) -> Self {
        Data::Text(s.to_string())
    }
}

impl From<String> for Data {
    fn from(s: String) -> Self {
        Data::Text(s)
    }
}

impl From<&String> for Data {
    fn from(s: &String) -> Self {
        Data::Text(s.clone())
    }
}

impl From<Bytes> for Data {
    fn from(b: Bytes) -> Self {
        Data::Buffer(b)
    }
}

impl From<Vec<u8>> for Data {
    fn from(v: Vec<u8>) -> Self {
        Data::View(v)
    }
}

impl From<&[u8]> for Data {
    fn from(v: &[u8]) -> Self {
        Data::Buffer(Bytes::copy_from_slice(v))
    }
}

impl From<serde_json::Value> for Data {
    fn from(v: serde_json::Value) -> Self {
        Data::Json(v)
    }
}

/// Converts between caller data and one wire format
pub trait Codec: Send + Sync + 'static {
    /// Name the codec is registered or reported under
    fn name(&self) -> &str;

    /// Wire format produced by `encode` and accepted by `decode`
    fn format(&self) -> Format;

    fn encode(&self, data: &Data) -> CodecResult<Encoded>;

    fn decode(&self, encoded: Encoded) -> CodecResult<Data>;
}

/// Requested encoding, before resolution against an engine
#[derive(Clone)]
pub enum EncodingSpec {
    Named(String),
    Custom(Arc<dyn Codec>),
}

impl EncodingSpec {
    pub fn custom<C: Codec>(codec: C) -> Self {
        EncodingSpec::Custom(Arc::new(codec))
    }
}

impl Default for EncodingSpec {
    fn default() -> Self {
        EncodingSpec::Named("utf8".to_string())
    }
}

impl fmt::Debug for EncodingSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EncodingSpec::Named(name) => write!(f, "Named({})", name),
            EncodingSpec::Custom(codec) => write!(f, "Custom({})", codec.name()),
        }
    }
}

impl From<&str> for EncodingSpec {
    fn from(name: &str) -> Self {
        EncodingSpec::Named(name.to_string())
    }
}

impl From<String> for EncodingSpec {
    fn from(name: String) -> Self {
        EncodingSpec::Named(name)
    }
}

impl From<Format> for EncodingSpec {
    fn from(format: Format) -> Self {
        EncodingSpec::Named(format.as_str().to_string())
    }
}

/// A resolved encoding whose format the engine accepts
#[derive(Clone)]
pub struct Encoding {
    codec: Arc<dyn Codec>,
}

impl Encoding {
    pub(crate) fn new(codec: Arc<dyn Codec>) -> Self {
        Self { codec }
    }

    /// Name, including the target format when transcoded (e.g. `json+view`)
    pub fn name(&self) -> &str {
        self.codec.name()
    }

    pub fn format(&self) -> Format {
        self.codec.format()
    }

    pub fn encode(&self, data: &Data) -> CodecResult<Encoded> {
        self.codec.encode(data)
    }

    pub fn decode(&self, encoded: Encoded) -> CodecResult<Data> {
        self.codec.decode(encoded)
    }
}

impl fmt::Debug for Encoding {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Encoding")
            .field("name", &self.name())
            .field("format", &self.format())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_encoded_compares_bytes() {
        let a = Encoded::Utf8("abc".into());
        let b = Encoded::Buffer(Bytes::from_static(b"abc"));
        let c = Encoded::View(b"abd".to_vec());

        assert_eq!(a, b);
        assert!(b < c);
        assert_eq!(a.len(), 3);
    }

    #[test]
    fn test_into_format() {
        let text = Encoded::Utf8("key".into());
        let view = text.into_format(Format::View).unwrap();
        assert_eq!(view.format(), Format::View);

        let back = view.into_format(Format::Utf8).unwrap();
        assert!(matches!(back, Encoded::Utf8(ref s) if s == "key"));

        let invalid = Encoded::View(vec![0xff, 0xfe]).into_format(Format::Utf8);
        assert!(matches!(invalid, Err(CodecError::Utf8(_))));
    }

    #[test]
    fn test_data_json_helpers() {
        #[derive(serde::Serialize, serde::Deserialize, PartialEq, Debug)]
        struct Point {
            x: i32,
            y: i32,
        }

        let data = Data::json(&Point { x: 1, y: 2 }).unwrap();
        let point: Point = data.deserialize().unwrap();
        assert_eq!(point, Point { x: 1, y: 2 });
        assert!(!data.is_null());
        assert!(Data::Json(serde_json::Value::Null).is_null());
    }
}
