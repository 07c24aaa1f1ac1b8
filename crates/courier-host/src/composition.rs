//! Import-many composition: contract → ordered lazy provider handles

use crate::catalog::ExportRecord;
use courier_core::{ContractId, FactoryFn, MessageSender, SendError};
use once_cell::sync::OnceCell;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Description of one resolved provider, safe to send across the boundary
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProviderInfo {
    /// Position in the import slot
    pub index: usize,
    pub provider: String,
    pub contract: ContractId,
    pub module: PathBuf,
}

/// A provider whose construction is deferred until first use.
///
/// The first successful [`LazyProviderHandle::activate`] constructs the
/// provider and caches it for the lifetime of the handle. A failed
/// construction is not cached.
pub struct LazyProviderHandle {
    // Dropped before `create`, whose code may own the instance's vtable.
    instance: OnceCell<Box<dyn MessageSender>>,
    info: ProviderInfo,
    create: FactoryFn,
}

impl LazyProviderHandle {
    fn new(index: usize, record: &ExportRecord) -> Self {
        Self {
            instance: OnceCell::new(),
            info: ProviderInfo {
                index,
                provider: record.provider.clone(),
                contract: record.contract.clone(),
                module: record.module.clone(),
            },
            create: record.create.clone(),
        }
    }

    /// Construct the provider if needed and return it
    pub fn activate(&self) -> Result<&dyn MessageSender, SendError> {
        self.instance
            .get_or_try_init(|| (self.create)())
            .map(|instance| instance.as_ref())
    }

    pub fn is_activated(&self) -> bool {
        self.instance.get().is_some()
    }

    pub fn info(&self) -> &ProviderInfo {
        &self.info
    }
}

impl std::fmt::Debug for LazyProviderHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LazyProviderHandle")
            .field("info", &self.info)
            .field("activated", &self.is_activated())
            .finish()
    }
}

/// Every provider of one contract, fixed at resolution time
#[derive(Debug)]
pub struct ImportSlot {
    contract: ContractId,
    handles: Vec<LazyProviderHandle>,
}

impl ImportSlot {
    pub fn contract(&self) -> &ContractId {
        &self.contract
    }

    pub fn get(&self, index: usize) -> Option<&LazyProviderHandle> {
        self.handles.get(index)
    }

    pub fn iter(&self) -> impl Iterator<Item = &LazyProviderHandle> {
        self.handles.iter()
    }

    pub fn providers(&self) -> Vec<ProviderInfo> {
        self.handles.iter().map(|h| h.info.clone()).collect()
    }

    pub fn len(&self) -> usize {
        self.handles.len()
    }

    pub fn is_empty(&self) -> bool {
        self.handles.is_empty()
    }
}

/// Matches import requests against an export registry.
///
/// Matching is by contract identity only. Resolution cannot fail: zero
/// matches yields an empty slot.
#[derive(Debug, Default)]
pub struct CompositionEngine {
    passes: u64,
}

impl CompositionEngine {
    pub fn new() -> Self {
        Self::default()
    }

    /// Resolve an import-many request, preserving registry order
    pub fn resolve_many(&mut self, records: &[ExportRecord], contract: &ContractId) -> ImportSlot {
        self.passes += 1;
        let handles = records
            .iter()
            .filter(|r| &r.contract == contract)
            .enumerate()
            .map(|(index, record)| LazyProviderHandle::new(index, record))
            .collect();

        ImportSlot {
            contract: contract.clone(),
            handles,
        }
    }

    /// Number of composition passes run by this engine
    pub fn passes(&self) -> u64 {
        self.passes
    }
}
