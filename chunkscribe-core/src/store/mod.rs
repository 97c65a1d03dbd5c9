//! File-backed storage for a single schema-checked JSON document.
//!
//! The schema of a document is its serde shape plus the [`Validate`] rules of
//! the stored type. Every write replaces the whole file through a temporary
//! file in the same directory, so readers only ever see a complete document.

mod error;

use std::fmt;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use serde::de::DeserializeOwned;
use serde::Serialize;
use tempfile::NamedTempFile;
use tracing::{debug, warn};

pub use error::{StoreError, StoreResult};

/// Semantic rules a document must satisfy on top of deserializing cleanly.
pub trait Validate {
    fn validate(&self) -> Result<(), String> {
        Ok(())
    }
}

pub type InvalidHook = Arc<dyn Fn(&StoreError) + Send + Sync>;
pub type RepairedHook<T> = Arc<dyn Fn(&T) + Send + Sync>;

pub struct JsonStoreBuilder<T> {
    path: PathBuf,
    default_value: Option<T>,
    auto_repair: bool,
    on_invalid: Option<InvalidHook>,
    on_auto_repaired: Option<RepairedHook<T>>,
}

impl<T> JsonStoreBuilder<T>
where
    T: Serialize + DeserializeOwned + Validate + Clone,
{
    pub fn new(path: impl AsRef<Path>) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
            default_value: None,
            auto_repair: true,
            on_invalid: None,
            on_auto_repaired: None,
        }
    }

    pub fn default_value(mut self, value: T) -> Self {
        self.default_value = Some(value);
        self
    }

    pub fn auto_repair(mut self, enabled: bool) -> Self {
        self.auto_repair = enabled;
        self
    }

    pub fn on_invalid<F>(mut self, hook: F) -> Self
    where
        F: Fn(&StoreError) + Send + Sync + 'static,
    {
        self.on_invalid = Some(Arc::new(hook));
        self
    }

    pub fn on_auto_repaired<F>(mut self, hook: F) -> Self
    where
        F: Fn(&T) + Send + Sync + 'static,
    {
        self.on_auto_repaired = Some(Arc::new(hook));
        self
    }

    pub fn build(self) -> JsonStore<T> {
        JsonStore {
            path: self.path,
            default_value: self.default_value,
            auto_repair: self.auto_repair,
            on_invalid: self.on_invalid,
            on_auto_repaired: self.on_auto_repaired,
        }
    }
}

#[derive(Clone)]
pub struct JsonStore<T> {
    path: PathBuf,
    default_value: Option<T>,
    auto_repair: bool,
    on_invalid: Option<InvalidHook>,
    on_auto_repaired: Option<RepairedHook<T>>,
}

impl<T> fmt::Debug for JsonStore<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("JsonStore")
            .field("path", &self.path)
            .field("has_default", &self.default_value.is_some())
            .field("auto_repair", &self.auto_repair)
            .finish()
    }
}

impl<T> JsonStore<T>
where
    T: Serialize + DeserializeOwned + Validate + Clone,
{
    pub fn builder(path: impl AsRef<Path>) -> JsonStoreBuilder<T> {
        JsonStoreBuilder::new(path)
    }

    /// Loads the document, writing the default when the file is absent.
    ///
    /// An unparsable or schema-violating document is replaced by the default
    /// when auto-repair is on; otherwise the error is returned and the file is
    /// left as it was.
    pub fn load(&self) -> StoreResult<T> {
        if !self.path.exists() {
            return match &self.default_value {
                Some(default) => {
                    self.save(default)?;
                    Ok(default.clone())
                }
                None => Err(StoreError::NotFound {
                    path: self.path.clone(),
                }),
            };
        }

        match self.read() {
            Ok(value) => Ok(value),
            Err(err @ StoreError::InvalidConfig { .. }) => self.repair(err),
            Err(err) => Err(err),
        }
    }

    /// Reads and checks the document without ever writing to it.
    pub fn read(&self) -> StoreResult<T> {
        let content = std::fs::read_to_string(&self.path).map_err(|source| {
            if source.kind() == std::io::ErrorKind::NotFound {
                StoreError::NotFound {
                    path: self.path.clone(),
                }
            } else {
                StoreError::Io {
                    source,
                    path: self.path.clone(),
                }
            }
        })?;
        if content.trim().is_empty() {
            return Err(StoreError::invalid(&self.path, "document is empty"));
        }
        let value: T = serde_json::from_str(&content)
            .map_err(|err| StoreError::invalid(&self.path, err.to_string()))?;
        value
            .validate()
            .map_err(|reason| StoreError::invalid(&self.path, reason))?;
        Ok(value)
    }

    /// Validates and then replaces the whole document.
    pub fn save(&self, value: &T) -> StoreResult<()> {
        value
            .validate()
            .map_err(|reason| StoreError::invalid(&self.path, reason))?;
        let payload = serde_json::to_vec_pretty(value)
            .map_err(|err| StoreError::invalid(&self.path, err.to_string()))?;
        self.write_atomic(&payload)?;
        debug!(path = %self.path.display(), bytes = payload.len(), "document saved");
        Ok(())
    }

    fn repair(&self, err: StoreError) -> StoreResult<T> {
        let default = match (&self.default_value, self.auto_repair) {
            (Some(default), true) => default,
            _ => return Err(err),
        };
        default.validate().map_err(|reason| {
            StoreError::invalid(
                &self.path,
                format!("default value rejected by schema: {reason}"),
            )
        })?;
        warn!(path = %self.path.display(), error = %err, "document invalid, restoring default");
        self.save(default)?;
        if let Some(hook) = &self.on_invalid {
            hook(&err);
        }
        if let Some(hook) = &self.on_auto_repaired {
            hook(default);
        }
        Ok(default.clone())
    }

    fn write_atomic(&self, payload: &[u8]) -> StoreResult<()> {
        let parent = self
            .path
            .parent()
            .filter(|dir| !dir.as_os_str().is_empty())
            .unwrap_or_else(|| Path::new("."));
        std::fs::create_dir_all(parent).map_err(|source| StoreError::Io {
            source,
            path: parent.to_path_buf(),
        })?;
        let mut file = NamedTempFile::new_in(parent).map_err(|source| StoreError::Io {
            source,
            path: parent.to_path_buf(),
        })?;
        file.write_all(payload)
            .and_then(|_| file.as_file().sync_all())
            .map_err(|source| StoreError::Io {
                source,
                path: file.path().to_path_buf(),
            })?;
        file.persist(&self.path).map_err(|err| StoreError::Io {
            source: err.error,
            path: self.path.clone(),
        })?;
        Ok(())
    }
}
