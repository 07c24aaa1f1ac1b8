//! Error types for loading and invoking plugins

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

/// Errors that fail a `load` (or the creation of an isolation boundary)
#[derive(Debug, thiserror::Error)]
pub enum LoadError {
    #[error("isolation boundary creation failed: {message}")]
    BoundaryCreation {
        message: String,
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },

    #[error("plugin directory unreadable: {}: {message}", path.display())]
    DirectoryUnreadable { path: PathBuf, message: String },

    #[error("plugin path is not a directory: {}", path.display())]
    NotADirectory { path: PathBuf },

    #[error("isolation boundary lost: {message}")]
    BoundaryLost { message: String },
}

impl LoadError {
    pub(crate) fn boundary_creation(
        message: impl Into<String>,
        source: impl std::error::Error + Send + Sync + 'static,
    ) -> Self {
        Self::BoundaryCreation {
            message: message.into(),
            source: Some(Box::new(source)),
        }
    }
}

/// A single module that could not be loaded during a scan.
///
/// Non-fatal: the module is excluded from the export registry and the scan
/// continues.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, thiserror::Error)]
#[error("failed to load module {}: {reason}", path.display())]
pub struct ModuleLoadError {
    pub path: PathBuf,
    pub reason: String,
}

impl ModuleLoadError {
    pub fn new(path: impl Into<PathBuf>, reason: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            reason: reason.into(),
        }
    }
}

/// Errors raised while running the resolved providers
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum InvocationError {
    #[error("no plugins loaded; call load first")]
    NotLoaded,

    #[error("provider '{provider}' (slot {index}) failed to activate: {message}")]
    Activation {
        index: usize,
        provider: String,
        message: String,
    },

    #[error("provider '{provider}' (slot {index}) failed: {message}")]
    Provider {
        index: usize,
        provider: String,
        message: String,
    },

    #[error("provider '{provider}' (slot {index}) timed out after {timeout:?}")]
    Timeout {
        index: usize,
        provider: String,
        timeout: Duration,
    },

    #[error("slot index {index} out of range (slot holds {len} providers)")]
    SlotOutOfRange { index: usize, len: usize },

    #[error("isolation boundary lost: {message}")]
    BoundaryLost { message: String },
}

impl InvocationError {
    /// True when the boundary that raised this error is no longer usable
    pub fn is_boundary_fatal(&self) -> bool {
        matches!(self, Self::Timeout { .. } | Self::BoundaryLost { .. })
    }
}
