//! Shared contract types for courier.
//!
//! This crate is linked by both the host and every provider module. It defines:
//!
//! - [`ContractId`]: the identity a provider exports itself under
//! - [`MessageSender`]: the capability a provider implements
//! - [`ModuleExports`] / [`ExportDecl`]: the table a module hands to the host
//! - [`export_module!`]: generates the C-ABI entry points the host looks up
//!
//! Provider modules are Rust `cdylib`s. Trait objects cross the library
//! boundary as-is, so a module must be built with the same toolchain and the
//! same `courier-core` version as the host that loads it. The host checks
//! [`ABI_VERSION`] through [`ABI_SYMBOL`] before calling the entry point.

pub mod contract;
pub mod export;
pub mod provider;

pub use contract::ContractId;
pub use export::{
    ABI_SYMBOL, ABI_VERSION, AbiVersionFn, ENTRY_SYMBOL, ExportDecl, FactoryFn, ModuleEntryFn, ModuleExports,
};
pub use provider::{MessageSender, SendError};
