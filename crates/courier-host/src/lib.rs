//! courier-host library crate.
//!
//! Discovers message-sender provider modules in a directory, loads them into a
//! disposable isolation boundary, composes them against a contract and drives
//! the load/run/unload lifecycle. Exposed as a library for the `courier`
//! binary and for integration testing.
//!
//! The pieces, bottom-up:
//!
//! - [`catalog`]: scans a directory and records every export of every module
//! - [`composition`]: resolves a contract into an import slot of lazy handles
//! - [`context`]: catalog + composition, as owned by one boundary
//! - [`boundary`]: in-process and child-process isolation boundaries
//! - [`protocol`] / [`worker`]: the stdio protocol a process boundary speaks
//! - [`lifecycle`]: the manager the host drives

pub mod boundary;
pub mod catalog;
pub mod cli;
pub mod composition;
pub mod config;
pub mod context;
pub mod error;
pub mod lifecycle;
pub mod logging;
pub mod protocol;
pub mod worker;

#[cfg(any(test, feature = "test-support"))]
pub mod testing;

#[doc(inline)]
pub use boundary::{BoundaryFactory, InProcessBoundaryFactory, IsolationBoundary, ProcessBoundaryFactory};
pub use config::{BoundaryKind, ConfigOverrides, HostConfig, resolve_config};
pub use error::{InvocationError, LoadError, ModuleLoadError};
pub use lifecycle::{FailurePolicy, LifecycleManager, LifecycleSettings, LifecycleState, LoadReport, RunReport};
