//! In-memory modules and recording providers for tests

use crate::catalog::{LoadedModule, ModuleLoader};
use crate::error::ModuleLoadError;
use courier_core::{ContractId, ExportDecl, MessageSender, ModuleExports, SendError};
use std::collections::HashMap;
use std::path::Path;
use std::sync::{Arc, Mutex};

/// Something a recording provider observed
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProviderEvent {
    Activated { provider: String },
    Sent { provider: String, message: String },
    Dropped { provider: String },
}

/// Shared log of provider events, cloned into every provider it tracks
#[derive(Debug, Clone, Default)]
pub struct CallLog {
    events: Arc<Mutex<Vec<ProviderEvent>>>,
}

impl CallLog {
    pub fn new() -> Self {
        Self::default()
    }

    fn push(&self, event: ProviderEvent) {
        self.events.lock().unwrap().push(event);
    }

    /// Get a copy of every event for assertions
    pub fn events(&self) -> Vec<ProviderEvent> {
        self.events.lock().unwrap().clone()
    }

    /// Provider names in the order `send` was called
    pub fn sent_by(&self) -> Vec<String> {
        self.events()
            .into_iter()
            .filter_map(|e| match e {
                ProviderEvent::Sent { provider, .. } => Some(provider),
                _ => None,
            })
            .collect()
    }

    /// Provider names in the order they were constructed
    pub fn activations(&self) -> Vec<String> {
        self.events()
            .into_iter()
            .filter_map(|e| match e {
                ProviderEvent::Activated { provider } => Some(provider),
                _ => None,
            })
            .collect()
    }

    /// Number of provider instances dropped so far
    pub fn drops(&self) -> usize {
        self.events()
            .iter()
            .filter(|e| matches!(e, ProviderEvent::Dropped { .. }))
            .count()
    }

    pub fn clear(&self) {
        self.events.lock().unwrap().clear();
    }
}

/// Provider that records every call and optionally fails
#[derive(Debug)]
pub struct RecordingSender {
    name: String,
    log: CallLog,
    fail_with: Option<String>,
}

impl RecordingSender {
    pub fn new(name: impl Into<String>, log: CallLog) -> Self {
        let name = name.into();
        log.push(ProviderEvent::Activated {
            provider: name.clone(),
        });
        Self {
            name,
            log,
            fail_with: None,
        }
    }

    /// Make every `send` return this error after recording the call
    pub fn failing(mut self, reason: impl Into<String>) -> Self {
        self.fail_with = Some(reason.into());
        self
    }
}

impl MessageSender for RecordingSender {
    fn send(&self, message: &str) -> Result<(), SendError> {
        self.log.push(ProviderEvent::Sent {
            provider: self.name.clone(),
            message: message.to_string(),
        });
        match &self.fail_with {
            Some(reason) => Err(SendError::failed(reason.clone())),
            None => Ok(()),
        }
    }

    fn sender_name(&self) -> &str {
        &self.name
    }
}

impl Drop for RecordingSender {
    fn drop(&mut self) {
        self.log.push(ProviderEvent::Dropped {
            provider: self.name.clone(),
        });
    }
}

fn recording_decl(contract: ContractId, name: &str, log: &CallLog, fail_with: Option<&str>) -> ExportDecl {
    let provider = name.to_string();
    let log = log.clone();
    let fail_with = fail_with.map(str::to_string);
    ExportDecl::new(contract, name, move || {
        let sender = RecordingSender::new(provider.clone(), log.clone());
        Ok(Box::new(match &fail_with {
            Some(reason) => sender.failing(reason.clone()),
            None => sender,
        }) as Box<dyn MessageSender>)
    })
}

/// A module exporting recording providers.
///
/// Each entry is a provider name and the contracts it is exported under.
pub fn recording_module(module: &str, providers: &[(&str, &[ContractId])], log: &CallLog) -> ModuleExports {
    let mut exports = ModuleExports::new(module);
    for (name, contracts) in providers {
        for contract in contracts.iter() {
            exports = exports.export(recording_decl(contract.clone(), name, log, None));
        }
    }
    exports
}

/// A module with one recording provider under `message-sender`
pub fn sender_module(name: &str, log: &CallLog) -> ModuleExports {
    ModuleExports::new(name).export(recording_decl(ContractId::message_sender(), name, log, None))
}

/// A module with one `message-sender` provider whose `send` always fails
pub fn failing_sender_module(name: &str, reason: &str, log: &CallLog) -> ModuleExports {
    ModuleExports::new(name).export(recording_decl(
        ContractId::message_sender(),
        name,
        log,
        Some(reason),
    ))
}

/// A module with one `message-sender` provider that cannot be constructed
pub fn unconstructible_module(name: &str, reason: &str) -> ModuleExports {
    let reason = reason.to_string();
    ModuleExports::new(name).export(ExportDecl::new(ContractId::message_sender(), name, move || {
        Err(SendError::construction(reason.clone()))
    }))
}

enum StaticEntry {
    Module(ModuleExports),
    Failure(String),
}

/// Module loader serving export tables registered in memory, keyed by file name.
///
/// Files still have to exist in the scanned directory; only the loading step
/// is replaced. Unknown file names fail to load.
#[derive(Clone, Default)]
pub struct StaticModuleLoader {
    entries: Arc<Mutex<HashMap<String, StaticEntry>>>,
}

impl std::fmt::Debug for StaticModuleLoader {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut names: Vec<String> = self.entries.lock().unwrap().keys().cloned().collect();
        names.sort_unstable();
        f.debug_struct("StaticModuleLoader").field("modules", &names).finish()
    }
}

impl StaticModuleLoader {
    pub fn new() -> Self {
        Self::default()
    }

    /// Serve `exports` for files named `file_name`
    pub fn register(&self, file_name: impl Into<String>, exports: ModuleExports) {
        self.entries
            .lock()
            .unwrap()
            .insert(file_name.into(), StaticEntry::Module(exports));
    }

    /// Fail to load files named `file_name`
    pub fn register_failure(&self, file_name: impl Into<String>, reason: impl Into<String>) {
        self.entries
            .lock()
            .unwrap()
            .insert(file_name.into(), StaticEntry::Failure(reason.into()));
    }
}

impl ModuleLoader for StaticModuleLoader {
    fn load(&self, path: &Path) -> Result<LoadedModule, ModuleLoadError> {
        let file_name = path
            .file_name()
            .and_then(|n| n.to_str())
            .unwrap_or_default()
            .to_string();

        match self.entries.lock().unwrap().get(&file_name) {
            Some(StaticEntry::Module(exports)) => Ok(LoadedModule::in_memory(exports.clone())),
            Some(StaticEntry::Failure(reason)) => Err(ModuleLoadError::new(path, reason.clone())),
            None => Err(ModuleLoadError::new(path, "not a registered module")),
        }
    }
}
