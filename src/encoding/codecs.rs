//! Built-in codecs

use std::sync::Arc;

use base64::Engine as _;
use bytes::Bytes;

use super::{Codec, CodecError, CodecResult, Data, Encoded, Format};

/// Text in, text out
#[derive(Debug, Default, Clone, Copy)]
pub struct Utf8Codec;

impl Codec for Utf8Codec {
    fn name(&self) -> &str {
        "utf8"
    }

    fn format(&self) -> Format {
        Format::Utf8
    }

    fn encode(&self, data: &Data) -> CodecResult<Encoded> {
        let text = match data {
            Data::Text(s) => s.clone(),
            Data::Buffer(b) => String::from_utf8(b.to_vec())?,
            Data::View(v) => String::from_utf8(v.clone())?,
            Data::Json(serde_json::Value::String(s)) => s.clone(),
            Data::Json(value) => value.to_string(),
        };
        Ok(Encoded::Utf8(text))
    }

    fn decode(&self, encoded: Encoded) -> CodecResult<Data> {
        match encoded.into_format(Format::Utf8)? {
            Encoded::Utf8(s) => Ok(Data::Text(s)),
            _ => Err(CodecError::Unsupported("expected utf8 data".into())),
        }
    }
}

/// Fixed bytes in, fixed bytes out
#[derive(Debug, Default, Clone, Copy)]
pub struct BufferCodec;

impl Codec for BufferCodec {
    fn name(&self) -> &str {
        "buffer"
    }

    fn format(&self) -> Format {
        Format::Buffer
    }

    fn encode(&self, data: &Data) -> CodecResult<Encoded> {
        Ok(Encoded::Buffer(match data {
            Data::Buffer(b) => b.clone(),
            Data::View(v) => Bytes::copy_from_slice(v),
            Data::Text(s) => Bytes::copy_from_slice(s.as_bytes()),
            Data::Json(serde_json::Value::String(s)) => Bytes::copy_from_slice(s.as_bytes()),
            Data::Json(value) => Bytes::from(value.to_string()),
        }))
    }

    fn decode(&self, encoded: Encoded) -> CodecResult<Data> {
        match encoded.into_format(Format::Buffer)? {
            Encoded::Buffer(b) => Ok(Data::Buffer(b)),
            _ => Err(CodecError::Unsupported("expected buffer data".into())),
        }
    }
}

/// Growable bytes in, growable bytes out
#[derive(Debug, Default, Clone, Copy)]
pub struct ViewCodec;

impl Codec for ViewCodec {
    fn name(&self) -> &str {
        "view"
    }

    fn format(&self) -> Format {
        Format::View
    }

    fn encode(&self, data: &Data) -> CodecResult<Encoded> {
        Ok(Encoded::View(match data {
            Data::View(v) => v.clone(),
            Data::Buffer(b) => b.to_vec(),
            Data::Text(s) => s.as_bytes().to_vec(),
            Data::Json(serde_json::Value::String(s)) => s.as_bytes().to_vec(),
            Data::Json(value) => value.to_string().into_bytes(),
        }))
    }

    fn decode(&self, encoded: Encoded) -> CodecResult<Data> {
        match encoded.into_format(Format::View)? {
            Encoded::View(v) => Ok(Data::View(v)),
            _ => Err(CodecError::Unsupported("expected view data".into())),
        }
    }
}

/// Any JSON value, stored as its serialized text
#[derive(Debug, Default, Clone, Copy)]
pub struct JsonCodec;

impl Codec for JsonCodec {
    fn name(&self) -> &str {
        "json"
    }

    fn format(&self) -> Format {
        Format::Utf8
    }

    fn encode(&self, data: &Data) -> CodecResult<Encoded> {
        let text = match data {
            Data::Json(value) => serde_json::to_string(value)?,
            Data::Text(s) => serde_json::to_string(s)?,
            Data::Buffer(b) => serde_json::to_string(b.as_ref())?,
            Data::View(v) => serde_json::to_string(v)?,
        };
        Ok(Encoded::Utf8(text))
    }

    fn decode(&self, encoded: Encoded) -> CodecResult<Data> {
        Ok(Data::Json(serde_json::from_slice(encoded.as_bytes())?))
    }
}

/// Hex text in, raw bytes stored
#[derive(Debug, Default, Clone, Copy)]
pub struct HexCodec;

impl Codec for HexCodec {
    fn name(&self) -> &str {
        "hex"
    }

    fn format(&self) -> Format {
        Format::Buffer
    }

    fn encode(&self, data: &Data) -> CodecResult<Encoded> {
        let bytes = match data {
            Data::Text(s) => hex::decode(s)?,
            Data::Json(serde_json::Value::String(s)) => hex::decode(s)?,
            Data::Buffer(b) => b.to_vec(),
            Data::View(v) => v.clone(),
            Data::Json(_) => return Err(CodecError::Unsupported("hex expects text".into())),
        };
        Ok(Encoded::Buffer(Bytes::from(bytes)))
    }

    fn decode(&self, encoded: Encoded) -> CodecResult<Data> {
        Ok(Data::Text(hex::encode(encoded.as_bytes())))
    }
}

/// Base64 text in, raw bytes stored
#[derive(Debug, Default, Clone, Copy)]
pub struct Base64Codec;

impl Codec for Base64Codec {
    fn name(&self) -> &str {
        "base64"
    }

    fn format(&self) -> Format {
        Format::Buffer
    }

    fn encode(&self, data: &Data) -> CodecResult<Encoded> {
        let engine = base64::engine::general_purpose::STANDARD;
        let bytes = match data {
            Data::Text(s) => engine.decode(s)?,
            Data::Json(serde_json::Value::String(s)) => engine.decode(s)?,
            Data::Buffer(b) => b.to_vec(),
            Data::View(v) => v.clone(),
            Data::Json(_) => return Err(CodecError::Unsupported("base64 expects text".into())),
        };
        Ok(Encoded::Buffer(Bytes::from(bytes)))
    }

    fn decode(&self, encoded: Encoded) -> CodecResult<Data> {
        let engine = base64::engine::general_purpose::STANDARD;
        Ok(Data::Text(engine.encode(encoded.as_bytes())))
    }
}

/// Wraps a codec so its output lands in a format the engine accepts
pub struct TranscodedCodec {
    inner: Arc<dyn Codec>,
    format: Format,
    name: String,
}

impl TranscodedCodec {
    pub fn new(inner: Arc<dyn Codec>, format: Format) -> Self {
        let name = format!("{}+{}", inner.name(), format);
        Self {
            inner,
            format,
            name,
        }
    }
}

impl Codec for TranscodedCodec {
    fn name(&self) -> &str {
        &self.name
    }

    fn format(&self) -> Format {
        self.format
    }

    fn encode(&self, data: &Data) -> CodecResult<Encoded> {
        self.inner.encode(data)?.into_format(self.format)
    }

    fn decode(&self, encoded: Encoded) -> CodecResult<Data> {
        self.inner
            .decode(encoded.into_format(self.inner.format())?)
    }
}

/// Look up a built-in codec by name
pub(super) fn builtin(name: &str) -> Option<Arc<dyn Codec>> {
    let codec: Arc<dyn Codec> = match name {
        "utf8" | "utf-8" => Arc::new(Utf8Codec),
        "buffer" | "binary" => Arc::new(BufferCodec),
        "view" => Arc::new(ViewCodec),
        "json" => Arc::new(JsonCodec),
        "hex" => Arc::new(HexCodec),
        "base64" => Arc::new(Base64Codec),
        _ => return None,
    };
    Some(codec)
}
