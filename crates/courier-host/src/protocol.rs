//! Request/response protocol between the host and a boundary worker.
//!
//! One JSON object per `\n`-terminated line in each direction. The host sends
//! a [`Request`] and blocks until the matching [`Response`] arrives; there is
//! never more than one request in flight.

use crate::catalog::ScanReport;
use crate::composition::ProviderInfo;
use crate::error::{InvocationError, LoadError};
use courier_core::ContractId;
use serde::{Deserialize, Serialize};
use std::io;
use std::path::PathBuf;
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncWrite, AsyncWriteExt, BufReader};

/// Host → worker
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum Request {
    /// Liveness and ABI check sent right after spawn
    Ping,
    Scan { dir: PathBuf },
    Resolve { contract: ContractId },
    Invoke { index: usize, message: String },
}

/// Worker → host
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum Response {
    Pong { pid: u32, abi_version: u32 },
    Scanned { report: ScanReport },
    Resolved { providers: Vec<ProviderInfo> },
    Invoked { provider: String },
    Failed { error: WireError },
}

/// Serialized form of the errors an in-boundary operation can raise
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum WireError {
    DirectoryUnreadable { path: PathBuf, message: String },
    NotADirectory { path: PathBuf },
    Activation { index: usize, provider: String, message: String },
    Provider { index: usize, provider: String, message: String },
    SlotOutOfRange { index: usize, len: usize },
    Protocol { message: String },
}

impl From<LoadError> for WireError {
    fn from(err: LoadError) -> Self {
        match err {
            LoadError::DirectoryUnreadable { path, message } => Self::DirectoryUnreadable { path, message },
            LoadError::NotADirectory { path } => Self::NotADirectory { path },
            other => Self::Protocol {
                message: other.to_string(),
            },
        }
    }
}

impl From<InvocationError> for WireError {
    fn from(err: InvocationError) -> Self {
        match err {
            InvocationError::Activation {
                index,
                provider,
                message,
            } => Self::Activation {
                index,
                provider,
                message,
            },
            InvocationError::Provider {
                index,
                provider,
                message,
            } => Self::Provider {
                index,
                provider,
                message,
            },
            InvocationError::SlotOutOfRange { index, len } => Self::SlotOutOfRange { index, len },
            other => Self::Protocol {
                message: other.to_string(),
            },
        }
    }
}

impl WireError {
    /// Map back to the error of a `scan`/`resolve` request
    pub fn into_load_error(self) -> LoadError {
        match self {
            Self::DirectoryUnreadable { path, message } => LoadError::DirectoryUnreadable { path, message },
            Self::NotADirectory { path } => LoadError::NotADirectory { path },
            other => LoadError::BoundaryLost {
                message: format!("unexpected worker error: {other:?}"),
            },
        }
    }

    /// Map back to the error of an `invoke` request
    pub fn into_invocation_error(self) -> InvocationError {
        match self {
            Self::Activation {
                index,
                provider,
                message,
            } => InvocationError::Activation {
                index,
                provider,
                message,
            },
            Self::Provider {
                index,
                provider,
                message,
            } => InvocationError::Provider {
                index,
                provider,
                message,
            },
            Self::SlotOutOfRange { index, len } => InvocationError::SlotOutOfRange { index, len },
            other => InvocationError::BoundaryLost {
                message: format!("unexpected worker error: {other:?}"),
            },
        }
    }
}

/// Reads newline-delimited JSON messages, skipping blank lines
#[derive(Debug)]
pub struct MessageReader<R> {
    reader: BufReader<R>,
    buf: String,
}

impl<R: AsyncRead + Unpin> MessageReader<R> {
    pub fn new(reader: R) -> Self {
        Self {
            reader: BufReader::new(reader),
            buf: String::new(),
        }
    }

    /// Read the next message line, returning `None` on EOF
    pub async fn next_line(&mut self) -> io::Result<Option<String>> {
        loop {
            self.buf.clear();
            let n = self.reader.read_line(&mut self.buf).await?;
            if n == 0 {
                return Ok(None);
            }

            let trimmed = self.buf.trim();
            if trimmed.is_empty() {
                continue;
            }
            return Ok(Some(trimmed.to_string()));
        }
    }

    /// Read and decode the next message, returning `None` on EOF
    pub async fn next_message<T: serde::de::DeserializeOwned>(&mut self) -> io::Result<Option<T>> {
        match self.next_line().await? {
            Some(line) => serde_json::from_str(&line)
                .map(Some)
                .map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e)),
            None => Ok(None),
        }
    }
}

/// Encode `message` as one line, write it and flush
pub async fn write_message<W, T>(writer: &mut W, message: &T) -> io::Result<()>
where
    W: AsyncWrite + Unpin,
    T: Serialize,
{
    let json = serde_json::to_string(message).map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))?;
    writer.write_all(json.as_bytes()).await?;
    writer.write_all(b"\n").await?;
    writer.flush().await?;
    Ok(())
}
