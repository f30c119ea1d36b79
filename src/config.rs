//! Snapshot configuration: serializable options plus the pluggable extensions.
use std::collections::BTreeSet;
use std::path::Path;

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::restore::Reviver;
use crate::runtime::types::TypeName;
use crate::snapshot::handler::ValueHandler;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct SnapshotOptions {
    /// Types whose static state is not walked. Their instances are still
    /// captured when reached through other roots.
    pub excluded_types: BTreeSet<TypeName>,
    pub include_globals: bool,
}

impl Default for SnapshotOptions {
    fn default() -> Self {
        Self { excluded_types: BTreeSet::new(), include_globals: true }
    }
}

impl SnapshotOptions {
    pub fn exclude(mut self, ty: TypeName) -> Self {
        self.excluded_types.insert(ty);
        self
    }

    pub fn from_json_str(src: &str) -> Result<Self> {
        from_str_with_path(src).map_err(Error::Options)
    }

    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let bytes = std::fs::read(path)
            .map_err(|e| Error::Options(format!("cannot read {}: {e}", path.display())))?;
        from_slice_with_path(&bytes).map_err(Error::Options)
    }
}

/// Deserialize with JSON-path context in error messages.
fn from_str_with_path<T: DeserializeOwned>(src: &str) -> std::result::Result<T, String> {
    let de = &mut serde_json::Deserializer::from_str(src);
    serde_path_to_error::deserialize::<_, T>(de).map_err(|err| {
        let path = err.path().to_string();
        format!("at JSON path {path}: {}", err.into_inner())
    })
}

fn from_slice_with_path<T: DeserializeOwned>(bytes: &[u8]) -> std::result::Result<T, String> {
    let de = &mut serde_json::Deserializer::from_slice(bytes);
    serde_path_to_error::deserialize::<_, T>(de).map_err(|err| {
        let path = err.path().to_string();
        format!("at JSON path {path}: {}", err.into_inner())
    })
}

/// Everything a [`crate::facade::Library`] is built from.
#[derive(Default)]
pub struct SnapshotConfig {
    pub options: SnapshotOptions,
    /// Tried in order, before the built-in handlers.
    pub handlers: Vec<Box<dyn ValueHandler>>,
    /// Consulted before the built-in revivers.
    pub revivers: Vec<Box<dyn Reviver>>,
}

impl SnapshotConfig {
    pub fn new(options: SnapshotOptions) -> Self {
        Self { options, handlers: Vec::new(), revivers: Vec::new() }
    }

    pub fn exclude(mut self, ty: TypeName) -> Self {
        self.options.excluded_types.insert(ty);
        self
    }

    pub fn include_globals(mut self, include: bool) -> Self {
        self.options.include_globals = include;
        self
    }

    pub fn handler(mut self, handler: impl ValueHandler + 'static) -> Self {
        self.handlers.push(Box::new(handler));
        self
    }

    pub fn reviver(mut self, reviver: impl Reviver + 'static) -> Self {
        self.revivers.push(Box::new(reviver));
        self
    }
}
