//! Boundary whose context lives in a child worker process

use super::{BoundaryFactory, IsolationBoundary};
use crate::catalog::ScanReport;
use crate::composition::ProviderInfo;
use crate::error::{InvocationError, LoadError};
use crate::protocol::{MessageReader, Request, Response, WireError, write_message};
use async_trait::async_trait;
use courier_core::{ABI_VERSION, ContractId};
use std::ffi::OsString;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::Duration;
use tokio::process::{Child, ChildStdin, ChildStdout, Command};
use tracing::{debug, info, warn};
use uuid::Uuid;

/// Default limit for one provider invocation
pub const DEFAULT_INVOKE_TIMEOUT: Duration = Duration::from_secs(30);

/// Default limit for the worker to answer its first ping
pub const DEFAULT_STARTUP_TIMEOUT: Duration = Duration::from_secs(10);

enum ExchangeError {
    Lost(String),
    TimedOut(Duration),
}

/// Context held by a child process; teardown kills the process
#[derive(Debug)]
pub struct ProcessBoundary {
    id: Uuid,
    pid: Option<u32>,
    child: Option<Child>,
    stdin: Option<ChildStdin>,
    stdout: Option<MessageReader<ChildStdout>>,
    invoke_timeout: Option<Duration>,
    /// Provider names from the last resolve, for error reporting
    resolved: Vec<ProviderInfo>,
    /// Set once the worker died, misbehaved or was killed
    lost: Option<String>,
}

impl ProcessBoundary {
    /// OS process id of the worker, while it is alive
    pub fn pid(&self) -> Option<u32> {
        self.pid
    }

    async fn kill(&mut self, reason: String) {
        self.stdin = None;
        self.stdout = None;
        if let Some(mut child) = self.child.take() {
            if let Err(e) = child.kill().await {
                warn!("Failed to kill boundary worker {:?}: {}", self.pid, e);
            }
        }
        self.pid = None;
        self.lost.get_or_insert(reason);
    }

    /// One request/response round trip.
    ///
    /// Any I/O failure, EOF or timeout kills the worker: the boundary is not
    /// reusable after a failed exchange.
    async fn exchange(&mut self, request: &Request, limit: Option<Duration>) -> Result<Response, ExchangeError> {
        if let Some(reason) = &self.lost {
            return Err(ExchangeError::Lost(reason.clone()));
        }
        let (Some(stdin), Some(stdout)) = (self.stdin.as_mut(), self.stdout.as_mut()) else {
            return Err(ExchangeError::Lost(format!("boundary {} was torn down", self.id)));
        };

        let round_trip = async {
            write_message(stdin, request).await?;
            stdout.next_message::<Response>().await
        };

        let outcome = match limit {
            Some(limit) => {
                let timed = tokio::time::timeout(limit, round_trip).await;
                match timed {
                    Ok(outcome) => outcome,
                    Err(_) => {
                        self.kill(format!("worker did not answer within {limit:?}")).await;
                        return Err(ExchangeError::TimedOut(limit));
                    }
                }
            }
            None => round_trip.await,
        };

        match outcome {
            Ok(Some(response)) => Ok(response),
            Ok(None) => {
                let reason = "worker closed its output".to_string();
                self.kill(reason.clone()).await;
                Err(ExchangeError::Lost(reason))
            }
            Err(e) => {
                let reason = format!("worker i/o error: {e}");
                self.kill(reason.clone()).await;
                Err(ExchangeError::Lost(reason))
            }
        }
    }

    async fn protocol_violation(&mut self, expected: &str, got: &Response) -> String {
        let reason = format!("expected {expected} response, got {got:?}");
        self.kill(reason.clone()).await;
        reason
    }

    /// Map a worker-reported load error; one that means the worker is unusable kills it
    async fn load_failure(&mut self, error: WireError) -> LoadError {
        let err = error.into_load_error();
        if let LoadError::BoundaryLost { message } = &err {
            self.kill(message.clone()).await;
        }
        err
    }

    async fn invocation_failure(&mut self, error: WireError) -> InvocationError {
        let err = error.into_invocation_error();
        if let InvocationError::BoundaryLost { message } = &err {
            self.kill(message.clone()).await;
        }
        err
    }

    async fn handshake(&mut self, limit: Duration) -> Result<u32, String> {
        match self.exchange(&Request::Ping, Some(limit)).await {
            Ok(Response::Pong { pid, abi_version }) if abi_version == ABI_VERSION => Ok(pid),
            Ok(Response::Pong { abi_version, .. }) => Err(format!(
                "worker speaks ABI {abi_version}, host speaks ABI {ABI_VERSION}"
            )),
            Ok(other) => Err(self.protocol_violation("pong", &other).await),
            Err(ExchangeError::Lost(reason)) => Err(reason),
            Err(ExchangeError::TimedOut(limit)) => Err(format!("worker did not answer within {limit:?}")),
        }
    }
}

#[async_trait]
impl IsolationBoundary for ProcessBoundary {
    fn id(&self) -> Uuid {
        self.id
    }

    async fn scan(&mut self, dir: &Path) -> Result<ScanReport, LoadError> {
        let request = Request::Scan {
            dir: dir.to_path_buf(),
        };
        match self.exchange(&request, None).await {
            Ok(Response::Scanned { report }) => Ok(report),
            Ok(Response::Failed { error }) => Err(self.load_failure(error).await),
            Ok(other) => Err(LoadError::BoundaryLost {
                message: self.protocol_violation("scanned", &other).await,
            }),
            Err(ExchangeError::Lost(message)) => Err(LoadError::BoundaryLost { message }),
            Err(ExchangeError::TimedOut(limit)) => Err(LoadError::BoundaryLost {
                message: format!("scan timed out after {limit:?}"),
            }),
        }
    }

    async fn resolve(&mut self, contract: &ContractId) -> Result<Vec<ProviderInfo>, LoadError> {
        let request = Request::Resolve {
            contract: contract.clone(),
        };
        match self.exchange(&request, None).await {
            Ok(Response::Resolved { providers }) => {
                self.resolved = providers.clone();
                Ok(providers)
            }
            Ok(Response::Failed { error }) => Err(self.load_failure(error).await),
            Ok(other) => Err(LoadError::BoundaryLost {
                message: self.protocol_violation("resolved", &other).await,
            }),
            Err(ExchangeError::Lost(message)) => Err(LoadError::BoundaryLost { message }),
            Err(ExchangeError::TimedOut(limit)) => Err(LoadError::BoundaryLost {
                message: format!("resolve timed out after {limit:?}"),
            }),
        }
    }

    async fn invoke(&mut self, index: usize, message: &str) -> Result<String, InvocationError> {
        let request = Request::Invoke {
            index,
            message: message.to_string(),
        };
        match self.exchange(&request, self.invoke_timeout).await {
            Ok(Response::Invoked { provider }) => Ok(provider),
            Ok(Response::Failed { error }) => Err(self.invocation_failure(error).await),
            Ok(other) => Err(InvocationError::BoundaryLost {
                message: self.protocol_violation("invoked", &other).await,
            }),
            Err(ExchangeError::Lost(message)) => Err(InvocationError::BoundaryLost { message }),
            Err(ExchangeError::TimedOut(timeout)) => Err(InvocationError::Timeout {
                index,
                provider: self
                    .resolved
                    .get(index)
                    .map(|p| p.provider.clone())
                    .unwrap_or_else(|| "<unknown>".to_string()),
                timeout,
            }),
        }
    }

    async fn teardown(&mut self) {
        if self.child.is_some() {
            info!("Tearing down process boundary {} (worker {:?})", self.id, self.pid);
        }
        self.kill(format!("boundary {} was torn down", self.id)).await;
        self.resolved.clear();
    }
}

/// Spawns a worker process per boundary.
///
/// The worker is normally this same binary run as `courier worker`.
#[derive(Debug, Clone)]
pub struct ProcessBoundaryFactory {
    program: PathBuf,
    args: Vec<OsString>,
    invoke_timeout: Option<Duration>,
    startup_timeout: Duration,
}

impl ProcessBoundaryFactory {
    /// Spawn `program worker`
    pub fn new(program: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
            args: vec![OsString::from("worker")],
            invoke_timeout: Some(DEFAULT_INVOKE_TIMEOUT),
            startup_timeout: DEFAULT_STARTUP_TIMEOUT,
        }
    }

    /// Spawn the running executable as the worker
    pub fn current_exe() -> Result<Self, LoadError> {
        let exe = std::env::current_exe()
            .map_err(|e| LoadError::boundary_creation("cannot locate the current executable", e))?;
        Ok(Self::new(exe))
    }

    /// Replace the worker arguments (default: `worker`)
    pub fn with_args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<OsString>,
    {
        self.args = args.into_iter().map(Into::into).collect();
        self
    }

    /// Limit for one provider invocation; `None` waits forever
    pub fn with_invoke_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.invoke_timeout = timeout;
        self
    }

    pub fn with_startup_timeout(mut self, timeout: Duration) -> Self {
        self.startup_timeout = timeout;
        self
    }
}

#[async_trait]
impl BoundaryFactory for ProcessBoundaryFactory {
    async fn create(&self) -> Result<Box<dyn IsolationBoundary>, LoadError> {
        let mut child = Command::new(&self.program)
            .args(&self.args)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::inherit())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| {
                LoadError::boundary_creation(format!("failed to spawn worker {}", self.program.display()), e)
            })?;

        let (Some(stdin), Some(stdout)) = (child.stdin.take(), child.stdout.take()) else {
            return Err(LoadError::BoundaryCreation {
                message: "worker stdio was not piped".to_string(),
                source: None,
            });
        };

        let mut boundary = ProcessBoundary {
            id: Uuid::new_v4(),
            pid: child.id(),
            child: Some(child),
            stdin: Some(stdin),
            stdout: Some(MessageReader::new(stdout)),
            invoke_timeout: self.invoke_timeout,
            resolved: Vec::new(),
            lost: None,
        };

        match boundary.handshake(self.startup_timeout).await {
            Ok(pid) => {
                debug!("Created process boundary {} (worker {})", boundary.id, pid);
                Ok(Box::new(boundary))
            }
            Err(message) => {
                boundary.teardown().await;
                Err(LoadError::BoundaryCreation { message, source: None })
            }
        }
    }
}
