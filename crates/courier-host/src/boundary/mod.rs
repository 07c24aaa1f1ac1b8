//! Isolation boundaries
//!
//! An [`IsolationBoundary`] owns one [`crate::context::IsolationContext`] and
//! is the only way to reach it. Destroying the boundary destroys the context
//! and everything created inside it.
//!
//! Two implementations ship:
//!
//! - [`ProcessBoundary`]: the context lives in a child `courier worker`
//!   process. Teardown kills the child, which releases every object regardless
//!   of in-flight calls.
//! - [`InProcessBoundary`]: the context lives in the host process and is
//!   dropped on teardown, unloading module libraries with it. Providers can
//!   still crash or hang the host.

mod in_process;
mod process;

pub use in_process::{InProcessBoundary, InProcessBoundaryFactory};
pub use process::{ProcessBoundary, ProcessBoundaryFactory};

use crate::catalog::ScanReport;
use crate::composition::ProviderInfo;
use crate::error::{InvocationError, LoadError};
use async_trait::async_trait;
use courier_core::ContractId;
use std::path::Path;
use uuid::Uuid;

/// A disposable execution context reachable only through these calls.
///
/// Every call is a synchronous round trip from the caller's perspective: the
/// caller waits until the in-context operation has completed.
#[async_trait]
pub trait IsolationBoundary: Send + std::fmt::Debug {
    /// Identifier for logging
    fn id(&self) -> Uuid;

    /// Scan `dir` into the context's catalog (additive)
    async fn scan(&mut self, dir: &Path) -> Result<ScanReport, LoadError>;

    /// Resolve the import slot for `contract` from everything scanned so far
    async fn resolve(&mut self, contract: &ContractId) -> Result<Vec<ProviderInfo>, LoadError>;

    /// Activate the provider at `index` of the resolved slot and send `message`.
    ///
    /// Returns the provider name.
    async fn invoke(&mut self, index: usize, message: &str) -> Result<String, InvocationError>;

    /// Destroy the context and everything in it.
    ///
    /// Must succeed even while a provider call is stuck. The boundary is
    /// unusable afterwards.
    async fn teardown(&mut self);
}

/// Creates fresh, empty boundaries
#[async_trait]
pub trait BoundaryFactory: Send + Sync + std::fmt::Debug {
    async fn create(&self) -> Result<Box<dyn IsolationBoundary>, LoadError>;
}
