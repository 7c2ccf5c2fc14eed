//! Error taxonomy for a mailbox synchronization run

use std::io;
use std::path::PathBuf;

use thiserror::Error;

use crate::index::IndexError;
use crate::session::SessionError;

/// How far a failure propagates inside a run
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorScope {
    /// Aborts the current message; the folder's cursor is not advanced
    Message,
    /// Aborts the current folder
    Folder,
    /// Aborts the whole run
    Run,
}

/// Errors produced by the synchronization engine
#[derive(Debug, Error)]
pub enum SyncError {
    /// Mailbox configuration is incomplete; no connection was attempted
    #[error("configuration error: {0}")]
    Config(String),

    /// Could not reach the remote server
    #[error("cannot connect to server: {0}")]
    Connect(#[source] SessionError),

    /// The server rejected the credentials
    #[error("cannot authenticate: {0}")]
    Auth(#[source] SessionError),

    /// A folder listed in the include rules does not exist on the server
    #[error("folder {0} not found on server")]
    FolderNotFound(String),

    /// The server returned malformed or missing data where it must not
    #[error("protocol error: {0}")]
    Protocol(String),

    /// Any other failure reported by the remote session
    #[error("remote session error: {0}")]
    Session(#[from] SessionError),

    /// Local filesystem failure
    #[error("I/O error on {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    /// The server returned no body for a message it announced
    #[error("server returned no body for UID {uid} in folder {folder}")]
    NotFound { folder: String, uid: u32 },

    /// The search/tag index rejected an operation
    #[error("index error: {0}")]
    Index(#[from] IndexError),

    /// Some folders failed while the run was allowed to continue past them
    #[error("{} folder(s) failed: {}", .0.len(), describe_failures(.0))]
    FoldersFailed(Vec<(String, String)>),
}

impl SyncError {
    /// Wrap an I/O error together with the path it happened on
    pub fn io(path: impl Into<PathBuf>, source: io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }

    /// Returns how far this error propagates.
    ///
    /// Message and folder scoped errors abort the folder they happen in;
    /// run scoped errors always abort the whole run.
    pub fn scope(&self) -> ErrorScope {
        match self {
            SyncError::NotFound { .. } | SyncError::Index(_) | SyncError::Io { .. } => {
                ErrorScope::Message
            }
            SyncError::Protocol(_) | SyncError::Session(_) => ErrorScope::Folder,
            SyncError::Config(_)
            | SyncError::Connect(_)
            | SyncError::Auth(_)
            | SyncError::FolderNotFound(_)
            | SyncError::FoldersFailed(_) => ErrorScope::Run,
        }
    }
}

fn describe_failures(failures: &[(String, String)]) -> String {
    failures
        .iter()
        .map(|(folder, reason)| format!("{}: {}", folder, reason))
        .collect::<Vec<_>>()
        .join("; ")
}

/// Result type for synchronization operations
pub type Result<T> = std::result::Result<T, SyncError>;
