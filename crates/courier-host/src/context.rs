//! Everything alive inside one isolation boundary

use crate::catalog::{ModuleLoader, PluginCatalog, ScanReport};
use crate::composition::{CompositionEngine, ImportSlot, ProviderInfo};
use crate::error::{InvocationError, LoadError};
use courier_core::ContractId;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::path::Path;
use std::sync::Arc;
use tracing::{debug, info};

/// The object graph of one isolation boundary: catalog, composition engine
/// and the currently resolved import slot.
///
/// Dropping the context drops every provider instance, then every export
/// record, then unloads every module library, in that order.
#[derive(Debug)]
pub struct IsolationContext {
    slot: Option<ImportSlot>,
    engine: CompositionEngine,
    catalog: PluginCatalog,
    loader: Arc<dyn ModuleLoader>,
}

impl IsolationContext {
    pub fn new(loader: Arc<dyn ModuleLoader>) -> Self {
        Self {
            slot: None,
            engine: CompositionEngine::new(),
            catalog: PluginCatalog::new(),
            loader,
        }
    }

    /// Scan `dir` into the catalog (additive)
    pub fn scan(&mut self, dir: &Path) -> Result<ScanReport, LoadError> {
        let report = self.catalog.scan(dir, self.loader.as_ref())?;
        info!(
            "Scanned {}: {} module(s), {} export(s), {} error(s)",
            dir.display(),
            report.modules_loaded,
            report.exports_added,
            report.errors.len()
        );
        Ok(report)
    }

    /// Resolve the import slot for `contract`, replacing the previous one
    pub fn resolve(&mut self, contract: &ContractId) -> Vec<ProviderInfo> {
        // Drop the old slot's instances before building the new one
        self.slot = None;
        let slot = self.engine.resolve_many(self.catalog.records(), contract);
        debug!("Resolved {} provider(s) for contract '{}'", slot.len(), contract);
        let providers = slot.providers();
        self.slot = Some(slot);
        providers
    }

    /// Activate the provider at `index` and hand it `message`.
    ///
    /// A panicking provider is reported as a provider failure.
    pub fn invoke(&self, index: usize, message: &str) -> Result<String, InvocationError> {
        let slot = self.slot.as_ref();
        let handle = slot.and_then(|s| s.get(index)).ok_or(InvocationError::SlotOutOfRange {
            index,
            len: slot.map_or(0, ImportSlot::len),
        })?;
        let provider = handle.info().provider.clone();

        let outcome = catch_unwind(AssertUnwindSafe(|| {
            let sender = handle.activate().map_err(|e| InvocationError::Activation {
                index,
                provider: provider.clone(),
                message: e.to_string(),
            })?;
            sender.send(message).map_err(|e| InvocationError::Provider {
                index,
                provider: provider.clone(),
                message: e.to_string(),
            })
        }));

        match outcome {
            Ok(result) => result.map(|()| provider),
            Err(panic) => Err(InvocationError::Provider {
                index,
                provider: provider.clone(),
                message: format!("provider panicked: {}", panic_message(panic.as_ref())),
            }),
        }
    }

    pub fn catalog(&self) -> &PluginCatalog {
        &self.catalog
    }

    pub fn slot(&self) -> Option<&ImportSlot> {
        self.slot.as_ref()
    }
}

fn panic_message(payload: &(dyn std::any::Any + Send)) -> &str {
    if let Some(s) = payload.downcast_ref::<&str>() {
        s
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.as_str()
    } else {
        "non-string panic payload"
    }
}
