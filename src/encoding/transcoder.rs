//! Resolves requested encodings against the formats an engine supports

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::Mutex;

use super::codecs::{builtin, TranscodedCodec};
use super::{Codec, Encoding, EncodingSpec, Format};
use crate::error::{LevelError, LevelResult};

/// Preference order when a codec's own format is not supported
const FORMAT_PREFERENCE: [Format; 3] = [Format::View, Format::Buffer, Format::Utf8];

/// Encoding resolver bound to one set of engine formats
///
/// Named encodings are resolved once and cached; custom codecs are adapted
/// on every call since two codecs may share a name.
pub struct Transcoder {
    formats: Vec<Format>,
    cache: Mutex<HashMap<String, Encoding>>,
}

impl Transcoder {
    /// Create a resolver for an engine accepting `formats`
    pub fn new(formats: &[Format]) -> LevelResult<Self> {
        if formats.is_empty() {
            return Err(LevelError::EncodingNotSupported(
                "engine declares no formats".into(),
            ));
        }
        Ok(Self {
            formats: formats.to_vec(),
            cache: Mutex::new(HashMap::new()),
        })
    }

    /// Formats the engine accepts
    pub fn formats(&self) -> &[Format] {
        &self.formats
    }

    pub fn supports(&self, format: Format) -> bool {
        self.formats.contains(&format)
    }

    /// Resolve a requested encoding
    pub fn resolve(&self, spec: &EncodingSpec) -> LevelResult<Encoding> {
        match spec {
            EncodingSpec::Named(name) => {
                if let Some(encoding) = self.cache.lock().get(name) {
                    return Ok(encoding.clone());
                }
                let codec =
                    builtin(name).ok_or_else(|| LevelError::EncodingNotFound(name.clone()))?;
                let encoding = self.adapt(codec);
                self.cache.lock().insert(name.clone(), encoding.clone());
                Ok(encoding)
            }
            EncodingSpec::Custom(codec) => Ok(self.adapt(Arc::clone(codec))),
        }
    }

    /// Identity encoding for one of the engine formats
    pub fn for_format(&self, format: Format) -> LevelResult<Encoding> {
        self.resolve(&EncodingSpec::from(format))
    }

    fn adapt(&self, codec: Arc<dyn Codec>) -> Encoding {
        if self.supports(codec.format()) {
            return Encoding::new(codec);
        }
        let target = FORMAT_PREFERENCE
            .iter()
            .copied()
            .find(|f| self.supports(*f))
            .unwrap_or(self.formats[0]);
        Encoding::new(Arc::new(TranscodedCodec::new(codec, target)))
    }
}

impl std::fmt::Debug for Transcoder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Transcoder")
            .field("formats", &self.formats)
            .finish()
    }
}
