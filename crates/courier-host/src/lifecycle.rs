//! Load/run/unload lifecycle over a replaceable isolation boundary

use crate::boundary::{BoundaryFactory, IsolationBoundary};
use crate::catalog::ScanReport;
use crate::composition::ProviderInfo;
use crate::error::{InvocationError, LoadError, ModuleLoadError};
use courier_core::ContractId;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::sync::Arc;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

/// Payload sent to every provider unless configured otherwise
pub const DEFAULT_PAYLOAD: &str = "test message";

/// Lifecycle state as seen by the host
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LifecycleState {
    Unloaded,
    Loaded,
    Running,
}

/// What `run` does when a provider fails
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum FailurePolicy {
    /// Stop at the first failing provider and return its error
    #[default]
    FailFast,
    /// Record the failure and keep invoking the remaining providers
    Isolate,
}

impl FromStr for FailurePolicy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "fail-fast" | "failfast" => Ok(Self::FailFast),
            "isolate" => Ok(Self::Isolate),
            other => Err(format!("unknown failure policy '{other}' (expected fail-fast or isolate)")),
        }
    }
}

/// Settings the manager applies to every cycle
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LifecycleSettings {
    /// Contract the host imports
    pub contract: ContractId,
    /// Message handed to each provider by `run`
    pub payload: String,
    pub failure_policy: FailurePolicy,
}

impl Default for LifecycleSettings {
    fn default() -> Self {
        Self {
            contract: ContractId::message_sender(),
            payload: DEFAULT_PAYLOAD.to_string(),
            failure_policy: FailurePolicy::FailFast,
        }
    }
}

/// Outcome of a successful `load`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoadReport {
    pub dir: PathBuf,
    pub boundary: Uuid,
    pub scan: ScanReport,
    /// The resolved import slot, in invocation order
    pub providers: Vec<ProviderInfo>,
}

/// Outcome of a `run` that was not aborted
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RunReport {
    /// Providers that accepted the message, in invocation order
    pub invoked: Vec<String>,
    /// Failures recorded under [`FailurePolicy::Isolate`]
    pub failures: Vec<InvocationError>,
}

impl RunReport {
    pub fn is_clean(&self) -> bool {
        self.failures.is_empty()
    }
}

/// Drives discovery, composition and invocation through one isolation
/// boundary at a time.
///
/// The manager is the only owner of its boundary. Every operation takes
/// `&mut self`, so calls into the boundary are strictly sequential.
#[derive(Debug)]
pub struct LifecycleManager {
    factory: Arc<dyn BoundaryFactory>,
    /// `None` only after a failed re-creation during `unload`
    boundary: Option<Box<dyn IsolationBoundary>>,
    state: LifecycleState,
    slot: Vec<ProviderInfo>,
    module_errors: Vec<ModuleLoadError>,
    settings: LifecycleSettings,
}

impl LifecycleManager {
    /// Create a manager and its first boundary.
    ///
    /// # Errors
    ///
    /// Returns [`LoadError::BoundaryCreation`] if the boundary cannot be created.
    pub async fn new(factory: Arc<dyn BoundaryFactory>, settings: LifecycleSettings) -> Result<Self, LoadError> {
        let boundary = factory.create().await?;
        info!("Plugin host ready (boundary {})", boundary.id());
        Ok(Self {
            factory,
            boundary: Some(boundary),
            state: LifecycleState::Unloaded,
            slot: Vec::new(),
            module_errors: Vec::new(),
            settings,
        })
    }

    /// Scan `dir` into the current boundary and resolve the import slot.
    ///
    /// Modules that fail to load are reported in the returned
    /// [`LoadReport`] and do not fail the call. Loading again without an
    /// intervening [`LifecycleManager::unload`] accumulates: every provider
    /// found again is registered (and later invoked) once more.
    ///
    /// # Errors
    ///
    /// - [`LoadError::BoundaryCreation`] if no boundary exists and one cannot be created
    /// - [`LoadError::DirectoryUnreadable`] / [`LoadError::NotADirectory`] for a bad `dir`
    /// - [`LoadError::BoundaryLost`] if the boundary died; the manager unloads
    pub async fn load(&mut self, dir: &Path) -> Result<LoadReport, LoadError> {
        if self.boundary.is_none() {
            self.boundary = Some(self.factory.create().await?);
        }
        let boundary_id = self.boundary_mut()?.id();

        let scanned = self.boundary_mut()?.scan(dir).await;
        let scan = match scanned {
            Ok(scan) => scan,
            Err(e) => return Err(self.load_failed(e).await),
        };
        for err in &scan.errors {
            warn!("Excluded module: {}", err);
        }

        let contract = self.settings.contract.clone();
        let resolved = self.boundary_mut()?.resolve(&contract).await;
        let providers = match resolved {
            Ok(providers) => providers,
            Err(e) => return Err(self.load_failed(e).await),
        };

        info!(
            "Loaded {} provider(s) of '{}' from {}",
            providers.len(),
            contract,
            dir.display()
        );
        self.module_errors.extend(scan.errors.iter().cloned());
        self.slot = providers.clone();
        self.state = LifecycleState::Loaded;

        Ok(LoadReport {
            dir: dir.to_path_buf(),
            boundary: boundary_id,
            scan,
            providers,
        })
    }

    fn boundary_mut(&mut self) -> Result<&mut Box<dyn IsolationBoundary>, LoadError> {
        self.boundary.as_mut().ok_or_else(|| LoadError::BoundaryLost {
            message: "no isolation boundary".to_string(),
        })
    }

    async fn load_failed(&mut self, err: LoadError) -> LoadError {
        if matches!(err, LoadError::BoundaryLost { .. }) {
            error!("Boundary lost during load: {}", err);
            self.unload().await;
        } else {
            warn!("Load failed: {}", err);
        }
        err
    }

    /// Invoke every resolved provider, in slot order, with the configured payload.
    ///
    /// # Errors
    ///
    /// - [`InvocationError::NotLoaded`] unless the manager is `Loaded` or `Running`
    /// - under [`FailurePolicy::FailFast`], the first provider failure
    /// - [`InvocationError::Timeout`] / [`InvocationError::BoundaryLost`] under
    ///   either policy; the boundary is gone and the manager unloads
    pub async fn run(&mut self) -> Result<RunReport, InvocationError> {
        if self.state == LifecycleState::Unloaded {
            return Err(InvocationError::NotLoaded);
        }
        if self.boundary.is_none() {
            return Err(InvocationError::NotLoaded);
        }
        self.state = LifecycleState::Running;

        let payload = self.settings.payload.clone();
        let indices: Vec<usize> = self.slot.iter().map(|p| p.index).collect();
        let mut report = RunReport::default();

        for index in indices {
            let Some(boundary) = self.boundary.as_mut() else {
                return Err(InvocationError::NotLoaded);
            };
            let outcome = boundary.invoke(index, &payload).await;
            match outcome {
                Ok(provider) => {
                    debug!("Provider '{}' accepted the message", provider);
                    report.invoked.push(provider);
                }
                Err(e) if e.is_boundary_fatal() => {
                    error!("{}; tearing down boundary", e);
                    self.unload().await;
                    return Err(e);
                }
                Err(e) => match self.settings.failure_policy {
                    FailurePolicy::FailFast => {
                        warn!("{}; aborting run", e);
                        return Err(e);
                    }
                    FailurePolicy::Isolate => {
                        warn!("{}; continuing", e);
                        report.failures.push(e);
                    }
                },
            }
        }

        info!(
            "Run complete: {} invoked, {} failed",
            report.invoked.len(),
            report.failures.len()
        );
        Ok(report)
    }

    /// Tear down the current boundary and create a fresh, empty one.
    ///
    /// Clears every export record accumulated by earlier loads. If the new
    /// boundary cannot be created the error is logged and creation is retried
    /// by the next [`LifecycleManager::load`].
    pub async fn unload(&mut self) {
        if let Some(mut boundary) = self.boundary.take() {
            let id = boundary.id();
            boundary.teardown().await;
            drop(boundary);
            info!("Unloaded plugins (boundary {})", id);
        }
        self.slot.clear();
        self.module_errors.clear();
        self.state = LifecycleState::Unloaded;

        match self.factory.create().await {
            Ok(boundary) => {
                debug!("Fresh boundary {} ready", boundary.id());
                self.boundary = Some(boundary);
            }
            Err(e) => error!("Failed to create a fresh boundary: {}", e),
        }
    }

    pub fn state(&self) -> LifecycleState {
        self.state
    }

    /// The resolved import slot of the last load
    pub fn providers(&self) -> &[ProviderInfo] {
        &self.slot
    }

    /// Module load errors since the last unload
    pub fn module_errors(&self) -> &[ModuleLoadError] {
        &self.module_errors
    }

    /// Identifier of the current boundary, if one exists
    pub fn boundary_id(&self) -> Option<Uuid> {
        self.boundary.as_ref().map(|b| b.id())
    }

    pub fn settings(&self) -> &LifecycleSettings {
        &self.settings
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::boundary::InProcessBoundaryFactory;
    use crate::testing::{CallLog, StaticModuleLoader, sender_module};
    use async_trait::async_trait;
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    /// Factory that fails after a number of successful creations
    #[derive(Debug)]
    struct FlakyFactory {
        inner: InProcessBoundaryFactory,
        remaining: AtomicUsize,
    }

    #[async_trait]
    impl BoundaryFactory for FlakyFactory {
        async fn create(&self) -> Result<Box<dyn IsolationBoundary>, LoadError> {
            let left = self.remaining.load(Ordering::SeqCst);
            if left == 0 {
                return Err(LoadError::BoundaryCreation {
                    message: "out of boundaries".to_string(),
                    source: None,
                });
            }
            self.remaining.store(left - 1, Ordering::SeqCst);
            self.inner.create().await
        }
    }

    fn flaky(loader: StaticModuleLoader, creations: usize) -> Arc<dyn BoundaryFactory> {
        Arc::new(FlakyFactory {
            inner: InProcessBoundaryFactory::new(Arc::new(loader)),
            remaining: AtomicUsize::new(creations),
        })
    }

    /// Boundary whose invoke of one slot index times out
    #[derive(Debug)]
    struct StallingBoundary {
        inner: Box<dyn IsolationBoundary>,
        stall_at: usize,
        invoked: Arc<Mutex<Vec<usize>>>,
    }

    #[async_trait]
    impl IsolationBoundary for StallingBoundary {
        fn id(&self) -> Uuid {
            self.inner.id()
        }

        async fn scan(&mut self, dir: &Path) -> Result<ScanReport, LoadError> {
            self.inner.scan(dir).await
        }

        async fn resolve(&mut self, contract: &ContractId) -> Result<Vec<ProviderInfo>, LoadError> {
            self.inner.resolve(contract).await
        }

        async fn invoke(&mut self, index: usize, message: &str) -> Result<String, InvocationError> {
            self.invoked.lock().unwrap().push(index);
            if index == self.stall_at {
                return Err(InvocationError::Timeout {
                    index,
                    provider: format!("slot {index}"),
                    timeout: Duration::from_millis(10),
                });
            }
            self.inner.invoke(index, message).await
        }

        async fn teardown(&mut self) {
            self.inner.teardown().await
        }
    }

    #[derive(Debug)]
    struct StallingFactory {
        inner: InProcessBoundaryFactory,
        stall_at: usize,
        invoked: Arc<Mutex<Vec<usize>>>,
    }

    #[async_trait]
    impl BoundaryFactory for StallingFactory {
        async fn create(&self) -> Result<Box<dyn IsolationBoundary>, LoadError> {
            Ok(Box::new(StallingBoundary {
                inner: self.inner.create().await?,
                stall_at: self.stall_at,
                invoked: Arc::clone(&self.invoked),
            }))
        }
    }

    /// Three providers a, b, c whose boundaries time out on slot `stall_at`
    fn stalling_setup(stall_at: usize) -> (tempfile::TempDir, CallLog, Arc<Mutex<Vec<usize>>>, Arc<dyn BoundaryFactory>) {
        let temp_dir = tempfile::tempdir().unwrap();
        let log = CallLog::new();
        let loader = StaticModuleLoader::new();
        for name in ["a", "b", "c"] {
            let file_name = format!("lib{name}.so");
            std::fs::write(temp_dir.path().join(&file_name), "module").unwrap();
            loader.register(file_name, sender_module(name, &log));
        }
        let invoked = Arc::new(Mutex::new(Vec::new()));
        let factory = Arc::new(StallingFactory {
            inner: InProcessBoundaryFactory::new(Arc::new(loader)),
            stall_at,
            invoked: Arc::clone(&invoked),
        });
        (temp_dir, log, invoked, factory)
    }

    #[tokio::test]
    async fn test_timeout_mid_run_unloads_and_skips_the_rest() {
        let (temp_dir, log, invoked, factory) = stalling_setup(1);
        let mut manager = LifecycleManager::new(factory, LifecycleSettings::default()).await.unwrap();
        manager.load(temp_dir.path()).await.unwrap();
        assert_eq!(manager.providers().len(), 3);
        let before = manager.boundary_id().unwrap();

        let err = manager.run().await.unwrap_err();
        assert!(matches!(err, InvocationError::Timeout { index: 1, .. }));

        // Slot 2 is never reached
        assert_eq!(*invoked.lock().unwrap(), vec![0, 1]);
        assert_eq!(log.sent_by(), vec!["a"]);
        assert!(!log.activations().contains(&"c".to_string()));

        assert_eq!(manager.state(), LifecycleState::Unloaded);
        assert!(manager.providers().is_empty());
        let after = manager.boundary_id().unwrap();
        assert_ne!(before, after);

        assert_eq!(manager.run().await.unwrap_err(), InvocationError::NotLoaded);
    }

    #[tokio::test]
    async fn test_timeout_aborts_run_under_isolate_policy() {
        let (temp_dir, log, invoked, factory) = stalling_setup(0);
        let settings = LifecycleSettings {
            failure_policy: FailurePolicy::Isolate,
            ..Default::default()
        };
        let mut manager = LifecycleManager::new(factory, settings).await.unwrap();
        manager.load(temp_dir.path()).await.unwrap();

        let err = manager.run().await.unwrap_err();
        assert!(err.is_boundary_fatal());
        assert_eq!(*invoked.lock().unwrap(), vec![0]);
        assert!(log.sent_by().is_empty());
        assert_eq!(manager.state(), LifecycleState::Unloaded);
    }

    #[test]
    fn test_failure_policy_parse() {
        assert_eq!("fail-fast".parse::<FailurePolicy>().unwrap(), FailurePolicy::FailFast);
        assert_eq!("Isolate".parse::<FailurePolicy>().unwrap(), FailurePolicy::Isolate);
        assert!("retry".parse::<FailurePolicy>().is_err());
    }

    #[tokio::test]
    async fn test_new_fails_without_boundary() {
        let err = LifecycleManager::new(flaky(StaticModuleLoader::new(), 0), LifecycleSettings::default())
            .await
            .unwrap_err();
        assert!(matches!(err, LoadError::BoundaryCreation { .. }));
    }

    #[tokio::test]
    async fn test_load_failure_keeps_state() {
        let factory = Arc::new(InProcessBoundaryFactory::new(Arc::new(StaticModuleLoader::new())));
        let mut manager = LifecycleManager::new(factory, LifecycleSettings::default()).await.unwrap();

        let err = manager.load(Path::new("/nonexistent/plugins")).await.unwrap_err();
        assert!(matches!(err, LoadError::DirectoryUnreadable { .. }));
        assert_eq!(manager.state(), LifecycleState::Unloaded);
        assert!(manager.boundary_id().is_some());
    }

    #[tokio::test]
    async fn test_unload_recreation_failure_is_retried_by_load() {
        let temp_dir = tempfile::tempdir().unwrap();
        std::fs::write(temp_dir.path().join("liba.so"), "module").unwrap();
        let log = CallLog::new();
        let loader = StaticModuleLoader::new();
        loader.register("liba.so", sender_module("a", &log));

        // First boundary succeeds, the one unload asks for fails
        let mut manager = LifecycleManager::new(flaky(loader, 1), LifecycleSettings::default())
            .await
            .unwrap();
        manager.unload().await;
        assert!(manager.boundary_id().is_none());
        assert_eq!(manager.state(), LifecycleState::Unloaded);

        let err = manager.load(temp_dir.path()).await.unwrap_err();
        assert!(matches!(err, LoadError::BoundaryCreation { .. }));
        assert_eq!(manager.run().await.unwrap_err(), InvocationError::NotLoaded);
    }

    #[tokio::test]
    async fn test_unload_replaces_boundary() {
        let factory = Arc::new(InProcessBoundaryFactory::new(Arc::new(StaticModuleLoader::new())));
        let mut manager = LifecycleManager::new(factory, LifecycleSettings::default()).await.unwrap();
        let first = manager.boundary_id().unwrap();

        manager.unload().await;
        let second = manager.boundary_id().unwrap();
        assert_ne!(first, second);
    }

    #[tokio::test]
    async fn test_module_errors_accumulate_until_unload() {
        let temp_dir = tempfile::tempdir().unwrap();
        std::fs::write(temp_dir.path().join("libbad.so"), "module").unwrap();
        let loader = StaticModuleLoader::new();
        loader.register_failure("libbad.so", "bad magic");

        let factory = Arc::new(InProcessBoundaryFactory::new(Arc::new(loader)));
        let mut manager = LifecycleManager::new(factory, LifecycleSettings::default()).await.unwrap();

        let report = manager.load(temp_dir.path()).await.unwrap();
        assert_eq!(report.scan.errors.len(), 1);
        assert_eq!(manager.state(), LifecycleState::Loaded);
        manager.load(temp_dir.path()).await.unwrap();
        assert_eq!(manager.module_errors().len(), 2);

        manager.unload().await;
        assert!(manager.module_errors().is_empty());
    }
}
