//! Error types for designer operations.
//!
//! Validation problems found while compiling a project are not errors: they
//! are collected as [`crate::compiler::CompileIssue`]s. The types here cover
//! lookups that fail outright and infrastructure faults.

use thiserror::Error;

/// Errors raised by the widget schema registry.
#[derive(Debug, Error)]
pub enum RegistryError {
    /// No schema is registered for the widget type.
    #[error("Widget schema not found: {0}")]
    NotFound(String),

    /// A schema definition could not be parsed.
    #[error("Invalid widget schema {origin}: {message}")]
    InvalidSchema {
        /// File name or builtin label the definition came from.
        origin: String,
        /// Parser or consistency message.
        message: String,
    },

    /// A schema declares a newer format than this build understands.
    #[error("Widget schema {origin} uses schema_version {found}, max supported is {supported}")]
    UnsupportedSchemaVersion {
        /// File name or builtin label the definition came from.
        origin: String,
        /// Version declared by the definition.
        found: u32,
        /// Highest version this build reads.
        supported: u32,
    },

    /// Two definitions in the same source declare the same type.
    #[error("Duplicate widget type {0} in one schema source")]
    DuplicateType(String),

    /// Reading a schema directory failed.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Errors returned by a [`crate::capability::CapabilityResolver`].
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ResolveError {
    /// The platform has no such entity.
    #[error("Entity not found: {0}")]
    EntityNotFound(String),

    /// The platform could not be reached. Retryable.
    #[error("Capability resolver unavailable: {0}")]
    Unavailable(String),
}

impl ResolveError {
    /// Returns true if retrying the lookup later may succeed.
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Unavailable(_))
    }
}

/// Errors raised by the hardware recipe catalog.
#[derive(Debug, Error)]
pub enum RecipeError {
    /// No recipe with that identifier exists.
    #[error("Recipe not found: {0}")]
    NotFound(String),

    /// Builtin recipes cannot be changed or deleted; clone them instead.
    #[error("Recipe is builtin and read-only: {0}")]
    ReadOnly(String),

    /// Imported or edited YAML is not a usable recipe document.
    #[error("Invalid recipe YAML: {0}")]
    InvalidYaml(String),

    /// No user recipe directory is configured.
    #[error("No user recipe directory configured")]
    NoUserDirectory,

    /// Recipe metadata could not be encoded.
    #[error("Recipe metadata error: {0}")]
    Metadata(#[from] serde_json::Error),

    /// Reading or writing the user recipe directory failed.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Errors raised by the asset store.
#[derive(Debug, Error)]
pub enum AssetError {
    /// The asset name is empty, too long, or not a plain file name.
    #[error("Invalid asset name: {0}")]
    InvalidName(String),

    /// The asset payload exceeds the configured limit.
    #[error("Asset too large: {size} bytes (max {max})")]
    TooLarge {
        /// Payload size in bytes.
        size: usize,
        /// Configured maximum in bytes.
        max: usize,
    },

    /// Filesystem failure.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Errors raised by the deployment coordinator.
#[derive(Debug, Error)]
pub enum DeployError {
    /// The caller's expected hash does not match the recorded one.
    #[error("Deploy conflict: expected {expected}, current {}", current.as_deref().unwrap_or("<none>"))]
    Conflict {
        /// Hash supplied by the caller.
        expected: String,
        /// Hash currently recorded for the device, if any.
        current: Option<String>,
    },

    /// Filesystem failure while writing the artifact or record.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// A deploy record could not be encoded or decoded.
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Errors raised by the device store.
#[derive(Debug, Error)]
pub enum StoreError {
    /// The requested device does not exist.
    #[error("Device not found: {0}")]
    DeviceNotFound(String),

    /// Device ids must be non-empty and free of control characters.
    #[error("Invalid device id: {0:?}")]
    InvalidDeviceId(String),

    /// A stored project must be a JSON object.
    #[error("Project document must be a JSON object")]
    InvalidProject,

    /// An I/O error occurred during persistence.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// A serialization or deserialization error occurred.
    #[error("Serialization error: {0}")]
    Serialization(String),
}

/// Errors raised while migrating a project document.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum MigrationError {
    /// The document declares a version newer than this build knows.
    #[error("model_version {found} is newer than supported {supported}")]
    UnsupportedVersion {
        /// Version declared by the document.
        found: u64,
        /// Highest version this build can migrate to.
        supported: u64,
    },

    /// The document is not a JSON object or has a non-integer version.
    #[error("Malformed project document: {0}")]
    Malformed(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_resolve_error_is_retryable() {
        assert!(ResolveError::Unavailable("down".into()).is_retryable());
        assert!(!ResolveError::EntityNotFound("light.x".into()).is_retryable());
    }

    #[test]
    fn test_conflict_display_without_current() {
        let err = DeployError::Conflict {
            expected: "abc".into(),
            current: None,
        };
        assert_eq!(err.to_string(), "Deploy conflict: expected abc, current <none>");
    }
}
