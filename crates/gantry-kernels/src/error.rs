//! Error types for kernel sources.

use std::path::PathBuf;
use thiserror::Error;

/// Result type for kernel source operations.
pub type Result<T> = std::result::Result<T, KernelError>;

/// Errors that can occur while loading kernel sources.
#[derive(Debug, Error)]
pub enum KernelError {
    #[error("Failed to read kernel source {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}
