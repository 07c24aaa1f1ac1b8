//! Module export table and C-ABI entry point

use crate::contract::ContractId;
use crate::provider::{MessageSender, SendError};
use std::sync::Arc;

/// Version of the export table layout.
///
/// Bumped whenever [`ModuleExports`] or [`ExportDecl`] change shape.
pub const ABI_VERSION: u32 = 1;

/// Symbol every provider module must export
pub const ENTRY_SYMBOL: &[u8] = b"courier_module_exports";

/// Symbol reporting the module's [`ABI_VERSION`], checked before [`ENTRY_SYMBOL`] is called
pub const ABI_SYMBOL: &[u8] = b"courier_abi_version";

/// Signature of the entry point behind [`ENTRY_SYMBOL`]
pub type ModuleEntryFn = extern "C" fn() -> *mut ModuleExports;

/// Signature of the function behind [`ABI_SYMBOL`]
pub type AbiVersionFn = extern "C" fn() -> u32;

/// A factory function that constructs a provider instance
pub type FactoryFn = Arc<dyn Fn() -> Result<Box<dyn MessageSender>, SendError> + Send + Sync>;

/// One provider exported under one contract
#[derive(Clone)]
pub struct ExportDecl {
    /// Contract the provider is exported under
    pub contract: ContractId,
    /// Provider name (e.g., "email", "sms")
    pub name: String,
    /// Factory function: builds a fresh provider
    pub create: FactoryFn,
}

impl ExportDecl {
    pub fn new<F>(contract: impl Into<ContractId>, name: impl Into<String>, create: F) -> Self
    where
        F: Fn() -> Result<Box<dyn MessageSender>, SendError> + Send + Sync + 'static,
    {
        Self {
            contract: contract.into(),
            name: name.into(),
            create: Arc::new(create),
        }
    }
}

impl std::fmt::Debug for ExportDecl {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ExportDecl")
            .field("contract", &self.contract)
            .field("name", &self.name)
            .field("create", &"<factory_fn>")
            .finish()
    }
}

/// Everything a module exports, returned by its entry point.
///
/// `abi_version` sits at offset 0 so a host can read it from any layout
/// revision of the table.
#[derive(Debug, Clone)]
#[repr(C)]
pub struct ModuleExports {
    /// Layout version the module was built against
    pub abi_version: u32,
    /// Module name for logging
    pub module: String,
    /// Exports in declaration order
    pub exports: Vec<ExportDecl>,
}

impl ModuleExports {
    pub fn new(module: impl Into<String>) -> Self {
        Self {
            abi_version: ABI_VERSION,
            module: module.into(),
            exports: Vec::new(),
        }
    }

    /// Add an export (builder style)
    pub fn export(mut self, decl: ExportDecl) -> Self {
        self.exports.push(decl);
        self
    }

    /// Export the same provider type under several contracts.
    ///
    /// Each contract gets its own factory, so every resolved handle builds
    /// its own instance.
    pub fn export_as<T, F>(mut self, name: &str, contracts: &[ContractId], create: F) -> Self
    where
        T: MessageSender + 'static,
        F: Fn() -> Result<T, SendError> + Send + Sync + Clone + 'static,
    {
        for contract in contracts {
            let create = create.clone();
            self.exports.push(ExportDecl::new(contract.clone(), name, move || {
                create().map(|p| Box::new(p) as Box<dyn MessageSender>)
            }));
        }
        self
    }
}

/// Generate the C-ABI entry points for a provider module.
///
/// Takes a function returning [`ModuleExports`]. Emits `courier_abi_version`
/// and `courier_module_exports`; the host takes ownership of the boxed table
/// with `Box::from_raw`.
///
/// ```ignore
/// fn exports() -> courier_core::ModuleExports {
///     courier_core::ModuleExports::new("sms")
/// }
/// courier_core::export_module!(exports);
/// ```
#[macro_export]
macro_rules! export_module {
    ($builder:path) => {
        #[unsafe(no_mangle)]
        pub extern "C" fn courier_abi_version() -> u32 {
            $crate::ABI_VERSION
        }

        #[unsafe(no_mangle)]
        pub extern "C" fn courier_module_exports() -> *mut $crate::ModuleExports {
            ::std::boxed::Box::into_raw(::std::boxed::Box::new($builder()))
        }
    };
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug, Default, Clone)]
    struct Quiet;

    impl MessageSender for Quiet {
        fn send(&self, _message: &str) -> Result<(), SendError> {
            Ok(())
        }

        fn sender_name(&self) -> &str {
            "quiet"
        }
    }

    fn table() -> ModuleExports {
        ModuleExports::new("quiet-module").export_as(
            "quiet",
            &[ContractId::message_sender(), ContractId::message_sender_v2()],
            || Ok(Quiet),
        )
    }

    export_module!(table);

    #[test]
    fn test_export_as_registers_each_contract() {
        let exports = table();
        assert_eq!(exports.abi_version, ABI_VERSION);
        assert_eq!(exports.exports.len(), 2);
        assert_eq!(exports.exports[0].contract, ContractId::message_sender());
        assert_eq!(exports.exports[1].contract, ContractId::message_sender_v2());
        assert!(exports.exports.iter().all(|e| e.name == "quiet"));
    }

    #[test]
    fn test_factory_builds_provider() {
        let exports = table();
        let provider = (exports.exports[0].create)().unwrap();
        assert_eq!(provider.sender_name(), "quiet");
        assert!(provider.send("hello").is_ok());
    }

    #[test]
    fn test_entry_point_round_trips_ownership() {
        let ptr = courier_module_exports();
        assert!(!ptr.is_null());
        // Safety: the pointer came from Box::into_raw in the generated entry point
        let exports = unsafe { Box::from_raw(ptr) };
        assert_eq!(exports.module, "quiet-module");
    }

    #[test]
    fn test_abi_entry_point_reports_crate_version() {
        assert_eq!(courier_abi_version(), ABI_VERSION);
        let entry: AbiVersionFn = courier_abi_version;
        assert_eq!(entry(), ABI_VERSION);
    }

    #[test]
    fn test_export_decl_debug_hides_factory() {
        let decl = ExportDecl::new("message-sender", "quiet", || {
            Ok(Box::new(Quiet) as Box<dyn MessageSender>)
        });
        let debug = format!("{decl:?}");
        assert!(debug.contains("<factory_fn>"));
        assert!(debug.contains("quiet"));
    }
}
