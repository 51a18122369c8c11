//! Cache keys identifying a logical API query.

use serde::Serialize;
use std::fmt;

use crate::error::CacheError;

/// Composite key of controller, action and serialized options.
///
/// Display format: `{controller}::{action}::{options}`
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct CacheKey {
    controller: String,
    action: String,
    options: String,
}

impl CacheKey {
    /// Build a key by serializing `options` to JSON.
    ///
    /// Structs serialize their fields in declaration order, so equal option
    /// values always yield the same key.
    pub fn new<O>(controller: &str, action: &str, options: &O) -> Result<Self, CacheError>
    where
        O: Serialize + ?Sized,
    {
        let options = serde_json::to_string(options).map_err(|e| {
            CacheError::Serialization(format!("Options serialization failed: {}", e))
        })?;
        Ok(Self::from_parts(controller, action, options))
    }

    /// Build a key from an already serialized options string.
    pub fn from_parts(
        controller: impl Into<String>,
        action: impl Into<String>,
        options: impl Into<String>,
    ) -> Self {
        CacheKey {
            controller: controller.into(),
            action: action.into(),
            options: options.into(),
        }
    }

    pub fn controller(&self) -> &str {
        &self.controller
    }

    pub fn action(&self) -> &str {
        &self.action
    }

    /// The serialized options string.
    pub fn options(&self) -> &str {
        &self.options
    }
}

impl fmt::Display for CacheKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}::{}::{}", self.controller, self.action, self.options)
    }
}
