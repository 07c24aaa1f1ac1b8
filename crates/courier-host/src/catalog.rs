//! Directory-based discovery of provider modules

use crate::error::{LoadError, ModuleLoadError};
use courier_core::{
    ABI_SYMBOL, ABI_VERSION, AbiVersionFn, ContractId, ENTRY_SYMBOL, FactoryFn, ModuleEntryFn, ModuleExports,
};
use libloading::{Library, Symbol};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

/// A module opened by a [`ModuleLoader`], not yet registered
pub struct LoadedModule {
    // Dropped before `library`: the factories in the table point into it.
    exports: ModuleExports,
    library: Option<Library>,
}

impl LoadedModule {
    /// A module whose code is already part of the running process
    pub fn in_memory(exports: ModuleExports) -> Self {
        Self {
            exports,
            library: None,
        }
    }

    fn from_library(exports: ModuleExports, library: Library) -> Self {
        Self {
            exports,
            library: Some(library),
        }
    }
}

/// Opens candidate files and returns their export tables
pub trait ModuleLoader: Send + Sync + std::fmt::Debug {
    /// Whether a directory entry should be offered to [`ModuleLoader::load`]
    fn is_candidate(&self, path: &Path) -> bool {
        is_module_library(path)
    }

    /// Load one module
    fn load(&self, path: &Path) -> Result<LoadedModule, ModuleLoadError>;
}

/// Loads provider modules as dynamic libraries.
///
/// Each library must export a C-ABI function named `courier_module_exports`,
/// normally generated with [`courier_core::export_module!`].
#[derive(Debug, Default, Clone, Copy)]
pub struct DylibLoader;

impl ModuleLoader for DylibLoader {
    fn load(&self, path: &Path) -> Result<LoadedModule, ModuleLoadError> {
        // Safety: loading a library runs its initializers. Only directories the
        // operator points the host at are scanned.
        let lib = unsafe {
            Library::new(path)
                .map_err(|e| ModuleLoadError::new(path, format!("failed to open library: {e}")))?
        };

        // Safety: both symbol types must match what export_module! generates.
        let reported = unsafe {
            let symbol: Symbol<AbiVersionFn> = lib.get(ABI_SYMBOL).map_err(|e| {
                ModuleLoadError::new(path, format!("library missing 'courier_abi_version' symbol: {e}"))
            })?;
            symbol()
        };
        // The table layout is only known once the versions agree
        check_abi_version(path, "library", reported)?;

        let exports = unsafe {
            let symbol: Symbol<ModuleEntryFn> = lib.get(ENTRY_SYMBOL).map_err(|e| {
                ModuleLoadError::new(
                    path,
                    format!("library missing 'courier_module_exports' symbol: {e}"),
                )
            })?;

            let table = symbol();
            if table.is_null() {
                return Err(ModuleLoadError::new(path, "entry point returned null"));
            }

            // The module allocated the table with Box::into_raw
            Box::from_raw(table)
        };

        Ok(LoadedModule::from_library(*exports, lib))
    }
}

/// Reject a module built against another export table layout
pub fn check_abi_version(path: &Path, module: &str, reported: u32) -> Result<(), ModuleLoadError> {
    if reported == ABI_VERSION {
        return Ok(());
    }
    Err(ModuleLoadError::new(
        path,
        format!("{module} built for ABI {reported}, host speaks ABI {ABI_VERSION}"),
    ))
}

/// Check if a path is a module library based on file extension
pub fn is_module_library(path: &Path) -> bool {
    if !path.is_file() {
        return false;
    }

    matches!(
        path.extension().and_then(|e| e.to_str()),
        Some("so") | Some("dylib") | Some("dll")
    )
}

/// Status of a module seen during a scan
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum ModuleStatus {
    Loaded { exports: usize },
    Failed { reason: String },
}

/// A candidate file found under a scanned directory
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PluginModule {
    pub path: PathBuf,
    pub status: ModuleStatus,
}

/// A registered export: one provider under one contract
#[derive(Clone)]
pub struct ExportRecord {
    pub contract: ContractId,
    pub provider: String,
    /// Module the export was discovered in
    pub module: PathBuf,
    /// Position in discovery order, unique within one catalog
    pub seq: u64,
    pub create: FactoryFn,
}

impl std::fmt::Debug for ExportRecord {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ExportRecord")
            .field("contract", &self.contract)
            .field("provider", &self.provider)
            .field("module", &self.module)
            .field("seq", &self.seq)
            .finish_non_exhaustive()
    }
}

/// Outcome of one scan
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScanReport {
    pub dir: PathBuf,
    /// Modules that loaded successfully in this scan
    pub modules_loaded: usize,
    /// Export records appended to the registry by this scan
    pub exports_added: usize,
    /// Modules excluded from the registry
    pub errors: Vec<ModuleLoadError>,
}

/// The export registry of one isolation context.
///
/// Scanning is additive: a second scan of the same directory appends a second
/// set of records. Nothing is ever removed; the whole catalog goes away with
/// its context.
#[derive(Debug, Default)]
pub struct PluginCatalog {
    // Field order is drop order. Records hold factory closures and must go
    // before the libraries that contain their code.
    records: Vec<ExportRecord>,
    modules: Vec<PluginModule>,
    libraries: Vec<Library>,
    next_seq: u64,
}

impl PluginCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Scan a directory and register every export found in it.
    ///
    /// Candidates are visited in file-name order. A module that fails to load
    /// is reported in [`ScanReport::errors`] and does not fail the scan.
    ///
    /// # Errors
    ///
    /// Returns [`LoadError::DirectoryUnreadable`] or [`LoadError::NotADirectory`]
    /// if `dir` itself cannot be listed.
    pub fn scan(&mut self, dir: &Path, loader: &dyn ModuleLoader) -> Result<ScanReport, LoadError> {
        let unreadable = |e: std::io::Error| LoadError::DirectoryUnreadable {
            path: dir.to_path_buf(),
            message: e.to_string(),
        };

        let metadata = std::fs::metadata(dir).map_err(unreadable)?;
        if !metadata.is_dir() {
            return Err(LoadError::NotADirectory {
                path: dir.to_path_buf(),
            });
        }

        let mut candidates = Vec::new();
        for entry in std::fs::read_dir(dir).map_err(unreadable)? {
            let entry = match entry {
                Ok(e) => e,
                Err(e) => {
                    warn!("Failed to read directory entry in {}: {}", dir.display(), e);
                    continue;
                }
            };
            let path = entry.path();
            if loader.is_candidate(&path) {
                candidates.push(path);
            }
        }
        candidates.sort_by(|a, b| a.file_name().cmp(&b.file_name()));

        let mut report = ScanReport {
            dir: dir.to_path_buf(),
            ..Default::default()
        };

        for path in candidates {
            match loader.load(&path).and_then(|m| self.register(&path, m)) {
                Ok(added) => {
                    debug!("Loaded module {} ({} exports)", path.display(), added);
                    report.modules_loaded += 1;
                    report.exports_added += added;
                    self.modules.push(PluginModule {
                        path,
                        status: ModuleStatus::Loaded { exports: added },
                    });
                }
                Err(e) => {
                    warn!("{}", e);
                    self.modules.push(PluginModule {
                        path,
                        status: ModuleStatus::Failed {
                            reason: e.reason.clone(),
                        },
                    });
                    report.errors.push(e);
                }
            }
        }

        Ok(report)
    }

    fn register(&mut self, path: &Path, module: LoadedModule) -> Result<usize, ModuleLoadError> {
        let LoadedModule { exports, library } = module;

        let module_name = format!("module '{}'", exports.module);
        if let Err(err) = check_abi_version(path, &module_name, exports.abi_version) {
            drop(exports);
            drop(library);
            return Err(err);
        }

        let added = exports.exports.len();
        for decl in exports.exports {
            self.records.push(ExportRecord {
                contract: decl.contract,
                provider: decl.name,
                module: path.to_path_buf(),
                seq: self.next_seq,
                create: decl.create,
            });
            self.next_seq += 1;
        }
        if let Some(lib) = library {
            self.libraries.push(lib);
        }

        Ok(added)
    }

    /// All export records, in discovery order
    pub fn records(&self) -> &[ExportRecord] {
        &self.records
    }

    /// Every module seen so far, including failed ones
    pub fn modules(&self) -> &[PluginModule] {
        &self.modules
    }

    /// Load errors recorded so far
    pub fn load_errors(&self) -> Vec<ModuleLoadError> {
        self.modules
            .iter()
            .filter_map(|m| match &m.status {
                ModuleStatus::Failed { reason } => Some(ModuleLoadError::new(&m.path, reason)),
                ModuleStatus::Loaded { .. } => None,
            })
            .collect()
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}
