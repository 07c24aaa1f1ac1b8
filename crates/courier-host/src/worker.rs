//! Boundary worker: serves one [`IsolationContext`] over the stdio protocol.
//!
//! Runs inside the child process spawned by
//! [`crate::boundary::ProcessBoundary`]. Protocol replies go to the stdout the
//! host connected; before any module is loaded, fd 1 is pointed at stderr so
//! whatever providers print cannot reach the protocol channel. Logs go to
//! stderr.

use crate::catalog::{DylibLoader, ModuleLoader};
use crate::context::IsolationContext;
use crate::protocol::{MessageReader, Request, Response, WireError, write_message};
use courier_core::ABI_VERSION;
use std::io;
use std::sync::Arc;
use tokio::io::{AsyncRead, AsyncWrite};
use tracing::{debug, info, warn};

/// Serve requests until the reader reaches EOF.
///
/// Requests are handled one at a time, in arrival order. A malformed request
/// is answered with [`WireError::Protocol`] and the loop continues.
pub async fn serve<R, W>(reader: R, mut writer: W, context: &mut IsolationContext) -> io::Result<()>
where
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin,
{
    let mut reader = MessageReader::new(reader);

    while let Some(line) = reader.next_line().await? {
        let response = match serde_json::from_str::<Request>(&line) {
            Ok(request) => {
                debug!("Worker request: {:?}", request);
                handle(context, request)
            }
            Err(e) => {
                warn!("Malformed request from host: {}", e);
                Response::Failed {
                    error: WireError::Protocol {
                        message: format!("malformed request: {e}"),
                    },
                }
            }
        };
        write_message(&mut writer, &response).await?;
    }

    debug!("Host closed the request channel");
    Ok(())
}

/// Dispatch one request against the context
pub fn handle(context: &mut IsolationContext, request: Request) -> Response {
    match request {
        Request::Ping => Response::Pong {
            pid: std::process::id(),
            abi_version: ABI_VERSION,
        },
        Request::Scan { dir } => match context.scan(&dir) {
            Ok(report) => Response::Scanned { report },
            Err(e) => Response::Failed { error: e.into() },
        },
        Request::Resolve { contract } => Response::Resolved {
            providers: context.resolve(&contract),
        },
        Request::Invoke { index, message } => match context.invoke(index, &message) {
            Ok(provider) => Response::Invoked { provider },
            Err(e) => Response::Failed { error: e.into() },
        },
    }
}

/// Entry point of `courier worker`: serve stdin/stdout with dynamic-library modules
pub async fn run_stdio() -> io::Result<()> {
    run_stdio_with(Arc::new(DylibLoader)).await
}

/// Serve stdin/stdout with the given module loader
pub async fn run_stdio_with(loader: Arc<dyn ModuleLoader>) -> io::Result<()> {
    info!("Boundary worker {} starting", std::process::id());
    let protocol_out = detach_stdout()?;
    let mut context = IsolationContext::new(loader);
    let result = serve(tokio::io::stdin(), protocol_out, &mut context).await;
    drop(context);
    info!("Boundary worker {} exiting", std::process::id());
    result
}

/// Take over the process stdout as the protocol channel.
///
/// Returns a writer on a duplicate of the original fd 1 and redirects fd 1 to
/// stderr, so `println!` in a provider lands on the worker's stderr.
#[cfg(unix)]
fn detach_stdout() -> io::Result<tokio::fs::File> {
    use std::io::Write;
    use std::os::fd::FromRawFd;

    std::io::stdout().flush()?;

    // Safety: plain descriptor calls on the process's own standard fds
    let protocol_fd = unsafe { libc::dup(libc::STDOUT_FILENO) };
    if protocol_fd < 0 {
        return Err(io::Error::last_os_error());
    }
    if unsafe { libc::dup2(libc::STDERR_FILENO, libc::STDOUT_FILENO) } < 0 {
        let err = io::Error::last_os_error();
        unsafe { libc::close(protocol_fd) };
        return Err(err);
    }

    // Safety: protocol_fd is a fresh descriptor owned by nothing else
    let file = unsafe { std::fs::File::from_raw_fd(protocol_fd) };
    debug!("Protocol channel moved to fd {}", protocol_fd);
    Ok(tokio::fs::File::from_std(file))
}

#[cfg(not(unix))]
fn detach_stdout() -> io::Result<tokio::io::Stdout> {
    warn!("Provider output to stdout is not redirected on this platform");
    Ok(tokio::io::stdout())
}
