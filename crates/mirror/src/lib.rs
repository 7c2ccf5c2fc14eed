//! Mirror crate - incremental IMAP to maildir mirroring
//!
//! This crate provides the mail mirroring engine including:
//! - Domain models (Cursor, MessageId, TagPolicy)
//! - Remote session traits with IMAP and in-memory implementations
//! - A message index trait with SQLite and in-memory implementations
//! - Maildir delivery with atomic tmp → cur commits
//! - Idempotent per-mailbox sync engine and a re-indexer
//!
//! The engine is blocking and single-threaded per mailbox. Every
//! collaborator sits behind a trait so runs can be exercised entirely in
//! memory.

pub mod config;
pub mod error;
pub mod index;
pub mod models;
pub mod session;
pub mod storage;
pub mod sync;

pub use crate::config::{Config, Folders, MailboxConfig};
pub use crate::error::{ErrorScope, Result, SyncError};
pub use crate::index::{AddOutcome, InMemoryIndex, IndexError, MessageHandle, MessageIndex, SqliteIndex};
pub use crate::models::{
    CandidateMessage, Cursor, DeliveredFile, IndexUpdate, MessageId, TagAction, TagOp, TagPolicy,
};
pub use crate::session::{
    Connector, Endpoint, ImapConnector, InMemoryServer, RemoteSession, SessionError, StoredMessage,
    TlsMode,
};
pub use crate::storage::{CursorStore, Maildir, UniqueNames};
pub use crate::sync::{
    FolderReport, MailboxSync, ReindexStats, SyncOptions, SyncPhase, SyncReport, reindex_since,
};
