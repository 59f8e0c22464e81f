//! Typed errors for the components whose failures callers must tell apart.

use std::path::PathBuf;
use thiserror::Error;

/// Failure of one external-tool invocation run through the process limiter.
#[derive(Debug, Error)]
pub enum ProcessError {
    #[error("failed to spawn {command}: {source}")]
    Spawn {
        command: String,
        #[source]
        source: std::io::Error,
    },
    #[error("process {pid} ({command}) exited with code {code}")]
    Exit { command: String, pid: u32, code: i32 },
    #[error("process {pid} ({command}) was killed by a signal")]
    Killed { command: String, pid: u32 },
    #[error("process {command} could not be awaited: {source}")]
    Wait {
        command: String,
        #[source]
        source: std::io::Error,
    },
    #[error("process limiter is shutting down")]
    ShuttingDown,
}

/// Failure of one scan attempt or derivation step.
#[derive(Debug, Error)]
pub enum ScanError {
    /// Tool ran fine but the file has no decodable stream. Terminal for the task.
    #[error("not media: {0}")]
    NotMedia(String),
    #[error("identifier {id} is already bound to {existing}")]
    Collision { id: String, existing: PathBuf },
    #[error("invalid scan request: {0}")]
    InvalidRequest(String),
    #[error(transparent)]
    Process(#[from] ProcessError),
    #[error("{context}: {source}")]
    Io {
        context: String,
        #[source]
        source: std::io::Error,
    },
    #[error("malformed tool output: {0}")]
    Malformed(String),
    #[error("document store: {0:#}")]
    Store(anyhow::Error),
    #[error("worker panicked: {0}")]
    Worker(String),
}

impl ScanError {
    pub fn io(context: impl Into<String>, source: std::io::Error) -> Self {
        ScanError::Io {
            context: context.into(),
            source,
        }
    }

    /// True for failures worth retrying (tool exits, spawn errors, filesystem or store races).
    pub fn is_transient(&self) -> bool {
        !matches!(
            self,
            ScanError::NotMedia(_) | ScanError::Collision { .. } | ScanError::InvalidRequest(_)
        )
    }
}

/// Document store failures the caller may want to match on.
#[derive(Debug, Error)]
pub enum StoreError {
    /// An update carried a revision but the document is gone.
    #[error("document {id} not found")]
    NotFound { id: String },
    #[error("document {id} has revision {current:?}, update was based on {given:?}")]
    Conflict {
        id: String,
        current: Option<String>,
        given: Option<String>,
    },
}

/// Watchdog cycle failures. Only `Timeout` is fatal.
#[derive(Debug, Error)]
pub enum WatchdogError {
    #[error("Timeout: {0}")]
    Timeout(&'static str),
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

/// Rejected caller input (unknown job kind, malformed identifier).
#[derive(Debug, Error)]
pub enum RequestError {
    #[error("unknown job kind: {0}")]
    UnknownJobKind(String),
    #[error("malformed identifier: {0:?}")]
    MalformedId(String),
}
