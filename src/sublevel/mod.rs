//! Sublevels
//!
//! A sublevel is a [`Database`] over a namespace of its parent. Keys are
//! stored as `separator + name + separator + key`; nesting concatenates the
//! prefixes, so `db.sublevel("a").sublevel("b")` stores `k` as `!a!!b!k`.
//! Scans are bounded by the prefix and the prefix with its last byte
//! incremented, so they never see keys of another namespace.

mod prefix;

use crate::db::{Backend, Database};
use crate::encoding::EncodingSpec;
use crate::error::{HookKind, LevelError, LevelResult};

pub use prefix::DEFAULT_SEPARATOR;
pub(crate) use prefix::{unfix, SublevelPrefix};

/// Options for creating a sublevel
#[derive(Debug, Clone)]
pub struct SublevelOptions {
    pub separator: char,
    /// Defaults to `utf8`
    pub key_encoding: Option<EncodingSpec>,
    /// Defaults to `utf8`
    pub value_encoding: Option<EncodingSpec>,
    /// Open as soon as the parent is open
    pub auto_open: bool,
}

impl Default for SublevelOptions {
    fn default() -> Self {
        Self {
            separator: DEFAULT_SEPARATOR,
            key_encoding: None,
            value_encoding: None,
            auto_open: true,
        }
    }
}

impl SublevelOptions {
    pub fn with_separator(mut self, separator: char) -> Self {
        self.separator = separator;
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

    pub fn with_auto_open(mut self, auto_open: bool) -> Self {
        self.auto_open = auto_open;
        self
    }
}

/// Link from a sublevel to the database it forwards to
pub(crate) struct SublevelLink {
    pub(crate) parent: Database,
    pub(crate) root: Database,
    pub(crate) prefix: SublevelPrefix,
    /// Names this sublevel was created with
    pub(crate) names: Vec<String>,
}

impl SublevelLink {
    /// Parent to forward a primitive to; it must be open
    pub(crate) fn forward(&self) -> LevelResult<&Database> {
        self.parent.check_open()?;
        Ok(&self.parent)
    }
}

impl Database {
    /// Create a sublevel with default options
    pub fn sublevel(&self, name: &str) -> LevelResult<Database> {
        self.sublevel_with(&[name], SublevelOptions::default())
    }

    pub fn sublevel_with_options(
        &self,
        name: &str,
        options: SublevelOptions,
    ) -> LevelResult<Database> {
        self.sublevel_with(&[name], options)
    }

    /// Create one sublevel spanning several names
    ///
    /// `db.sublevel_with(&["a", "b"], ..)` shares its key space with
    /// `db.sublevel("a")?.sublevel("b")` but is a single hop from `db`.
    pub fn sublevel_with(&self, names: &[&str], options: SublevelOptions) -> LevelResult<Database> {
        let separator = options.separator;
        let names = names
            .iter()
            .map(|name| prefix::validate_name(name, separator))
            .collect::<LevelResult<Vec<_>>>()?;
        if names.is_empty() {
            return Err(LevelError::InvalidPrefix(
                "a sublevel needs at least one name".into(),
            ));
        }

        let joined = names.join(format!("{separator}{separator}").as_str());
        let prefixes = SublevelPrefix::new(&joined, separator, self.prefix());

        let transcoder = self.inner.transcoder.clone();
        let key_encoding = transcoder.resolve(&options.key_encoding.clone().unwrap_or_default())?;
        let value_encoding =
            transcoder.resolve(&options.value_encoding.clone().unwrap_or_default())?;

        let link = SublevelLink {
            parent: self.clone(),
            root: self.root(),
            prefix: prefixes,
            names,
        };
        let sublevel = Database::from_parts(
            Backend::Sublevel(link),
            self.supports().clone(),
            transcoder,
            key_encoding,
            value_encoding,
            self.inner.open_options.clone(),
        );

        self.inner
            .hooks
            .newsub
            .run(&sublevel, &options)
            .map_err(|e| LevelError::hook(HookKind::Newsub, "sublevel", e))?;

        tracing::debug!(
            parent = self.id(),
            sublevel = sublevel.id(),
            prefix = sublevel.prefix(),
            "Created sublevel"
        );
        if options.auto_open {
            sublevel.schedule_open();
        }
        Ok(sublevel)
    }
}
