//! Error codes surfaced to registry clients.

use thiserror::Error;

/// Result type alias using our Error
pub type Result<T> = std::result::Result<T, RegError>;

/// The closed set of errors a request handler can report.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum RegError {
    /// A path component or value name does not exist
    #[error("path component or value not found")]
    NotFound,

    /// Enumeration index past the end
    #[error("no more items")]
    NoMoreItems,

    /// The target key has been deleted out from under its handle
    #[error("key has been deleted")]
    KeyDeleted,

    /// Deleting a root key or a key that still has subkeys
    #[error("access denied")]
    AccessDenied,

    /// A non-volatile key cannot live under a volatile parent
    #[error("child of a volatile key must be volatile")]
    ChildMustBeVolatile,

    /// Allocation limit exceeded, or a request payload too large to store
    #[error("out of memory")]
    OutOfMemory,

    /// Load input without the expected header line
    #[error("not a registry file")]
    NotRegistryFile,

    /// Handle manager failure (bad handle, insufficient granted access)
    #[error("handle error: {0}")]
    Handle(String),

    /// File stream failure during load or save
    #[error("file error: {0}")]
    File(String),
}
