//! Boundary whose context lives in the host process

use super::{BoundaryFactory, IsolationBoundary};
use crate::catalog::{ModuleLoader, ScanReport};
use crate::composition::ProviderInfo;
use crate::context::IsolationContext;
use crate::error::{InvocationError, LoadError};
use async_trait::async_trait;
use courier_core::ContractId;
use std::path::Path;
use std::sync::Arc;
use tracing::debug;
use uuid::Uuid;

/// Context held in memory; teardown drops it
#[derive(Debug)]
pub struct InProcessBoundary {
    id: Uuid,
    context: Option<IsolationContext>,
}

impl InProcessBoundary {
    pub fn new(loader: Arc<dyn ModuleLoader>) -> Self {
        Self {
            id: Uuid::new_v4(),
            context: Some(IsolationContext::new(loader)),
        }
    }

    fn context_mut(&mut self) -> Result<&mut IsolationContext, String> {
        self.context
            .as_mut()
            .ok_or_else(|| format!("boundary {} was torn down", self.id))
    }
}

#[async_trait]
impl IsolationBoundary for InProcessBoundary {
    fn id(&self) -> Uuid {
        self.id
    }

    async fn scan(&mut self, dir: &Path) -> Result<ScanReport, LoadError> {
        self.context_mut()
            .map_err(|message| LoadError::BoundaryLost { message })?
            .scan(dir)
    }

    async fn resolve(&mut self, contract: &ContractId) -> Result<Vec<ProviderInfo>, LoadError> {
        Ok(self
            .context_mut()
            .map_err(|message| LoadError::BoundaryLost { message })?
            .resolve(contract))
    }

    async fn invoke(&mut self, index: usize, message: &str) -> Result<String, InvocationError> {
        self.context_mut()
            .map_err(|message| InvocationError::BoundaryLost { message })?
            .invoke(index, message)
    }

    async fn teardown(&mut self) {
        if self.context.take().is_some() {
            debug!("In-process boundary {} torn down", self.id);
        }
    }
}

/// Creates [`InProcessBoundary`] instances sharing one module loader
#[derive(Debug, Clone)]
pub struct InProcessBoundaryFactory {
    loader: Arc<dyn ModuleLoader>,
}

impl InProcessBoundaryFactory {
    pub fn new(loader: Arc<dyn ModuleLoader>) -> Self {
        Self { loader }
    }
}

#[async_trait]
impl BoundaryFactory for InProcessBoundaryFactory {
    async fn create(&self) -> Result<Box<dyn IsolationBoundary>, LoadError> {
        let boundary = InProcessBoundary::new(Arc::clone(&self.loader));
        debug!("Created in-process boundary {}", boundary.id);
        Ok(Box::new(boundary))
    }
}
